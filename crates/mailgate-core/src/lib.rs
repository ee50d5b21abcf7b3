//! Mailgate Core - Mail-server clients and the live inbox watcher
//!
//! This crate provides the transient SMTP and IMAP operations and the
//! long-lived per-account inbox watcher with its subscriber registry.

pub mod events;
pub mod imap;
pub mod smtp;
pub mod watch;

pub use events::PushEvent;
pub use imap::fetch::{fetch_one, list_recent, AttachmentMeta, MessageDetail, MessageMeta, ParsedBody};
pub use smtp::{send, verify, OutgoingAttachment, OutgoingMessage, SendOutcome};
pub use watch::{Subscription, WatcherHub};
