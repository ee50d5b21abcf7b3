//! Transient message handlers
//!
//! These read from a short-lived IMAP connection; missing accounts and
//! messages surface as 404 on this surface.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use mailgate_core::{MessageDetail, MessageMeta};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ApiError;
use crate::routes::AppState;

fn default_limit() -> usize {
    50
}

fn default_include_raw() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMessagesQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ListMessagesResponse {
    pub messages: Vec<MessageMeta>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetMessageQuery {
    #[serde(default = "default_include_raw")]
    pub include_raw: bool,
}

/// List recent inbox messages
///
/// GET /mailbox/accounts/:id/messages?limit&since
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<ListMessagesResponse>, ApiError> {
    let (_, secret) = state
        .accounts
        .get(&id)
        .await
        .map_err(ApiError::not_found_as_404)?;

    let messages = mailgate_core::list_recent(&secret.imap, query.limit, query.since)
        .await
        .map_err(ApiError::not_found_as_404)?;

    Ok(Json(ListMessagesResponse { messages }))
}

/// Fetch one message with parsed body views
///
/// GET /mailbox/accounts/:id/messages/:uid?includeRaw
pub async fn get_message(
    State(state): State<Arc<AppState>>,
    Path((id, uid)): Path<(String, u32)>,
    Query(query): Query<GetMessageQuery>,
) -> Result<Json<MessageDetail>, ApiError> {
    let (_, secret) = state
        .accounts
        .get(&id)
        .await
        .map_err(ApiError::not_found_as_404)?;

    let detail = mailgate_core::fetch_one(&secret.imap, uid, query.include_raw)
        .await
        .map_err(ApiError::not_found_as_404)?;

    Ok(Json(detail))
}
