//! Mailgate API - REST control plane
//!
//! This crate provides the HTTP surface for account management, outbound
//! sends, transient message reads, and the live push stream.

pub mod error;
pub mod handlers;
pub mod routes;

pub use routes::{create_router, AppState};
