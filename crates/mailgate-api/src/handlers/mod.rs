//! Request handlers

pub mod accounts;
pub mod health;
pub mod messages;
pub mod send;
pub mod watch;

use serde::Serialize;

/// Plain acknowledgement body
#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}
