//! Live inbox watcher
//!
//! One task per account: keeps a single IMAP connection with the inbox
//! selected, tracks the last seen UID, sits in IDLE between fetch passes
//! and publishes one event per new message. New-mail signals arriving
//! during a fetch pass are coalesced — the next pass re-reads everything
//! above the last seen UID.

use std::sync::Weak;
use std::time::Duration;

use async_imap::extensions::idle::IdleResponse;
use mailgate_common::{Error, Result};
use mailgate_store::models::ServerSettings;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::fetch::{fetch_metas, MessageMeta};
use super::{connect_and_login, select_inbox, uid_next, LOGOUT_TIMEOUT};
use crate::events::PushEvent;
use crate::watch::{WatcherEntry, WatcherHub};

/// One watcher task's wiring
pub(crate) struct WatchTask {
    pub hub: Weak<WatcherHub>,
    pub entry: std::sync::Arc<WatcherEntry>,
    pub settings: ServerSettings,
    pub keepalive: Duration,
}

impl WatchTask {
    fn publish(&self, event: PushEvent) {
        if let Some(hub) = self.hub.upgrade() {
            hub.broadcast(&self.entry, &event);
        }
    }
}

/// Keep only messages strictly above the baseline, in ascending UID order
///
/// A fetch of `N:*` always returns at least the newest message even when
/// nothing is new, so an empty result here is the normal no-op case.
pub(crate) fn new_messages(last_uid: u32, mut fetched: Vec<MessageMeta>) -> Vec<MessageMeta> {
    fetched.retain(|meta| meta.uid > last_uid);
    fetched.sort_by_key(|meta| meta.uid);
    fetched.dedup_by_key(|meta| meta.uid);
    fetched
}

/// Run one watcher to completion
pub(crate) async fn run(task: WatchTask) {
    let account_id = task.entry.account_id().to_string();
    info!("watcher for account {} starting", account_id);

    if let Err(e) = watch_loop(&task, &account_id).await {
        warn!("watcher for account {} failed: {}", account_id, e);
        task.publish(PushEvent::error(e.to_string()));
    }

    if let Some(hub) = task.hub.upgrade() {
        hub.finished(&task.entry);
    }
    info!("watcher for account {} stopped", account_id);
}

async fn watch_loop(task: &WatchTask, account_id: &str) -> Result<()> {
    let mut session = connect_and_login(&task.settings).await?;

    let mailbox = match select_inbox(&mut session).await {
        Ok(mailbox) => mailbox,
        Err(e) => {
            super::logout(session).await;
            return Err(e);
        }
    };

    // Everything strictly above this baseline counts as new. The baseline
    // is never persisted; each watcher lifetime derives its own.
    let mut last_uid = uid_next(&mailbox)?.saturating_sub(1);
    debug!("watcher for account {} baseline uid {}", account_id, last_uid);

    task.publish(PushEvent::watcher_ready(account_id));

    loop {
        if task.entry.is_stopping() {
            super::logout(session).await;
            return Ok(());
        }

        // One coalesced pass over everything that arrived since the last one.
        let metas = fetch_metas(&mut session, &format!("{}:*", last_uid + 1)).await?;
        for meta in new_messages(last_uid, metas) {
            last_uid = last_uid.max(meta.uid);
            debug!("watcher for account {} publishing uid {}", account_id, meta.uid);
            task.publish(PushEvent::email_received(account_id, meta));
        }

        if task.entry.is_stopping() {
            super::logout(session).await;
            return Ok(());
        }

        let mut idle = session.idle();
        idle.init()
            .await
            .map_err(|e| Error::Upstream(format!("IDLE init failed: {}", e)))?;

        let outcome = {
            let (idle_wait, _interrupt) = idle.wait_with_timeout(task.keepalive);
            tokio::select! {
                result = idle_wait => Some(result),
                _ = task.entry.stopped() => None,
            }
        };

        match outcome {
            None => {
                // Stop requested mid-idle: leave IDLE and log out, best effort.
                if let Ok(Ok(mut session)) = timeout(LOGOUT_TIMEOUT, idle.done()).await {
                    let _ = timeout(LOGOUT_TIMEOUT, session.logout()).await;
                }
                return Ok(());
            }
            Some(Ok(response)) => {
                if matches!(response, IdleResponse::Timeout) {
                    // Keepalive tick; the fetch pass doubles as the probe.
                    debug!("watcher for account {} re-issuing IDLE", account_id);
                }
                session = idle
                    .done()
                    .await
                    .map_err(|e| Error::Upstream(format!("IDLE teardown failed: {}", e)))?;
            }
            Some(Err(e)) => {
                return Err(Error::Upstream(format!("IDLE wait failed: {}", e)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(uid: u32) -> MessageMeta {
        MessageMeta {
            uid,
            subject: None,
            from: Vec::new(),
            to: Vec::new(),
            date: None,
            flags: Vec::new(),
        }
    }

    #[test]
    fn test_new_messages_filters_baseline() {
        // A 1000:* fetch with nothing new re-yields the newest message.
        let fresh = new_messages(1000, vec![meta(1000)]);
        assert!(fresh.is_empty());
    }

    #[test]
    fn test_new_messages_strictly_increasing_order() {
        let fresh = new_messages(1000, vec![meta(1003), meta(1001), meta(1002)]);
        let uids: Vec<u32> = fresh.iter().map(|m| m.uid).collect();
        assert_eq!(uids, vec![1001, 1002, 1003]);
    }

    #[test]
    fn test_new_messages_drops_old_and_duplicate_uids() {
        let fresh = new_messages(1000, vec![meta(999), meta(1002), meta(1002), meta(1001)]);
        let uids: Vec<u32> = fresh.iter().map(|m| m.uid).collect();
        assert_eq!(uids, vec![1001, 1002]);
    }

    #[test]
    fn test_new_messages_empty_fetch() {
        assert!(new_messages(0, Vec::new()).is_empty());
    }
}
