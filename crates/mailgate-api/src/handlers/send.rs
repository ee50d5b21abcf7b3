//! Outbound send handler

use axum::{
    extract::{Path, State},
    Json,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use mailgate_core::{OutgoingAttachment, OutgoingMessage, SendOutcome};
use mailgate_common::Error;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::error::ApiError;
use crate::routes::AppState;

/// Request body for an outbound send
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentBody {
    pub filename: String,
    pub content_base64: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

fn decode_attachment(body: AttachmentBody) -> Result<OutgoingAttachment, Error> {
    let content = BASE64.decode(&body.content_base64).map_err(|_| {
        Error::Validation(format!(
            "attachment {} content is not valid base64",
            body.filename
        ))
    })?;

    Ok(OutgoingAttachment {
        filename: body.filename,
        content,
        content_type: body
            .content_type
            .unwrap_or_else(|| "application/octet-stream".to_string()),
    })
}

/// Send a message through the account's SMTP server
///
/// POST /mailbox/accounts/:id/send
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(input): Json<SendRequest>,
) -> Result<Json<SendOutcome>, ApiError> {
    let (record, secret) = state.accounts.get(&id).await?;

    let attachments = input
        .attachments
        .into_iter()
        .map(decode_attachment)
        .collect::<Result<Vec<_>, Error>>()?;

    let outgoing = OutgoingMessage {
        to: input.to,
        cc: input.cc,
        bcc: input.bcc,
        subject: input.subject,
        text: input.text,
        html: input.html,
        attachments,
    };

    let outcome = mailgate_core::send(&secret.smtp, &outgoing).await?;
    info!(
        "account {} submitted message {} to {} recipients",
        record.id,
        outcome.message_id,
        outcome.accepted.len()
    );

    Ok(Json(outcome))
}
