//! Mailgate Store - Encrypted account persistence
//!
//! This crate provides the remote key-value store client, the envelope
//! encryption for credential secrets, and the account repository built
//! on both.

pub mod crypto;
pub mod kv;
pub mod models;
pub mod repository;

pub use crypto::MasterKey;
pub use kv::{KvClient, KvStore};
pub use models::*;
pub use repository::{AccountRepository, KvAccountRepository};
