//! Account handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use mailgate_store::models::{AccountDetail, AccountSummary, Secret, SecretView, ServerSettings};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::error::ApiError;
use crate::handlers::OkResponse;
use crate::routes::AppState;

/// Request body for account creation
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    pub tenant_id: String,
    #[serde(default)]
    pub label: Option<String>,
    pub primary_email: String,
    pub imap: ServerSettings,
    pub smtp: ServerSettings,
    #[serde(default)]
    pub test_connection: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountResponse {
    pub account_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListAccountsQuery {
    pub tenant_id: String,
}

#[derive(Debug, Serialize)]
pub struct ListAccountsResponse {
    pub accounts: Vec<AccountSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAccountQuery {
    #[serde(default)]
    pub include_passwords: bool,
}

/// Create a new mailbox account
///
/// POST /mailbox/accounts
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    Json(input): Json<CreateAccountRequest>,
) -> Result<Json<CreateAccountResponse>, ApiError> {
    let secret = Secret {
        label: input.label,
        primary_email: input.primary_email,
        imap: input.imap,
        smtp: input.smtp,
    };
    secret.validate()?;

    if input.test_connection {
        mailgate_core::smtp::verify(&secret.smtp).await?;
        mailgate_core::imap::verify(&secret.imap).await?;
    }

    let record = state.accounts.create(&input.tenant_id, secret).await?;
    info!("account {} created for tenant {}", record.id, record.tenant_id);

    Ok(Json(CreateAccountResponse { account_id: record.id }))
}

/// List a tenant's accounts with masked addresses
///
/// GET /mailbox/accounts?tenantId=…
pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListAccountsQuery>,
) -> Result<Json<ListAccountsResponse>, ApiError> {
    let accounts = state.accounts.list(&query.tenant_id).await?;
    Ok(Json(ListAccountsResponse { accounts }))
}

/// Get one account; passwords only appear when explicitly requested
///
/// GET /mailbox/accounts/:id?includePasswords=…
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<GetAccountQuery>,
) -> Result<Json<AccountDetail>, ApiError> {
    let (record, secret) = state.accounts.get(&id).await?;

    Ok(Json(AccountDetail {
        id: record.id,
        tenant_id: record.tenant_id,
        created_at: record.created_at,
        updated_at: record.updated_at,
        secret: SecretView::from_secret(&secret, query.include_passwords),
    }))
}

/// Replace an account's whole secret
///
/// PUT /mailbox/accounts/:id
pub async fn update_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(secret): Json<Secret>,
) -> Result<Json<OkResponse>, ApiError> {
    state.accounts.update(&id, secret).await?;
    info!("account {} credentials rotated", id);
    Ok(Json(OkResponse::ok()))
}

/// Delete an account, stopping any running watcher first
///
/// DELETE /mailbox/accounts/:id
pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OkResponse>, ApiError> {
    state.hub.stop(&id);

    match state.accounts.delete(&id).await? {
        Some(tenant_id) => info!("account {} deleted for tenant {}", id, tenant_id),
        None => info!("account {} already absent on delete", id),
    }

    Ok(Json(OkResponse::ok()))
}

/// Verify an account's mail-server connectivity
///
/// POST /mailbox/accounts/:id/test
pub async fn test_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OkResponse>, ApiError> {
    let (_, secret) = state.accounts.get(&id).await?;

    mailgate_core::smtp::verify(&secret.smtp).await?;
    mailgate_core::imap::verify(&secret.imap).await?;

    Ok(Json(OkResponse::ok()))
}
