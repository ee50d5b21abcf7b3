//! Watcher registry and push-subscriber fan-out
//!
//! One hub per process owns every live watcher. Subscribers attach to an
//! account's watcher and receive serialized push events over a bounded
//! channel; a subscriber that cannot keep up or has gone away is dropped
//! without holding up the watcher or its other subscribers. A watcher
//! whose subscriber set stays empty for the idle-grace window is torn
//! down; any new subscription cancels the pending tear-down.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use mailgate_store::models::ServerSettings;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::events::PushEvent;
use crate::imap::watcher::{self, WatchTask};

/// Outbound queue depth per subscriber; a full queue drops the subscriber
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 64;

/// Shared state of one account's watcher
pub struct WatcherEntry {
    account_id: String,
    subscribers: Mutex<HashMap<u64, mpsc::Sender<Arc<String>>>>,
    next_subscriber: AtomicU64,
    stop: watch::Sender<bool>,
    idle_timer: Mutex<Option<JoinHandle<()>>>,
}

impl WatcherEntry {
    fn new(account_id: &str) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            account_id: account_id.to_string(),
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber: AtomicU64::new(0),
            stop,
            idle_timer: Mutex::new(None),
        }
    }

    pub(crate) fn account_id(&self) -> &str {
        &self.account_id
    }

    /// True once tear-down has begun; latches permanently
    pub(crate) fn is_stopping(&self) -> bool {
        *self.stop.borrow()
    }

    /// Resolves when tear-down begins
    pub(crate) async fn stopped(&self) {
        let mut rx = self.stop.subscribe();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn begin_stop(&self) {
        self.stop.send_replace(true);
        self.cancel_idle_timer();
    }

    fn subscriber_count(&self) -> usize {
        self.lock_subscribers().len()
    }

    fn add_subscriber(&self) -> (u64, mpsc::Receiver<Arc<String>>) {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        self.lock_subscribers().insert(id, tx);
        (id, rx)
    }

    fn remove_subscriber(&self, id: u64) {
        self.lock_subscribers().remove(&id);
    }

    /// Deliver a payload to one subscriber only
    fn send_to(&self, id: u64, payload: Arc<String>) {
        if let Some(tx) = self.lock_subscribers().get(&id) {
            let _ = tx.try_send(payload);
        }
    }

    /// Write a payload to every subscriber; returns how many were dropped
    fn fan_out(&self, payload: &Arc<String>) -> usize {
        let mut subscribers = self.lock_subscribers();
        let dead: Vec<u64> = subscribers
            .iter()
            .filter(|(_, tx)| tx.try_send(payload.clone()).is_err())
            .map(|(id, _)| *id)
            .collect();
        for id in &dead {
            subscribers.remove(id);
        }
        dead.len()
    }

    fn set_idle_timer(&self, handle: JoinHandle<()>) {
        let mut timer = self.lock_timer();
        if let Some(old) = timer.replace(handle) {
            old.abort();
        }
    }

    fn cancel_idle_timer(&self) {
        if let Some(handle) = self.lock_timer().take() {
            handle.abort();
        }
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, HashMap<u64, mpsc::Sender<Arc<String>>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_timer(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.idle_timer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One subscriber's live push stream
///
/// Dropping the subscription detaches it from the watcher; when the last
/// subscriber goes, the watcher's idle-grace timer is armed.
pub struct Subscription {
    account_id: String,
    id: u64,
    hub: Weak<WatcherHub>,
    rx: mpsc::Receiver<Arc<String>>,
}

impl Subscription {
    /// Receive the next serialized event; `None` once the watcher is gone
    pub async fn recv(&mut self) -> Option<Arc<String>> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = Arc<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.detach(&self.account_id, self.id);
        }
    }
}

/// Process-wide registry of live watchers, keyed by account id
pub struct WatcherHub {
    weak: Weak<WatcherHub>,
    watchers: Mutex<HashMap<String, Arc<WatcherEntry>>>,
    idle_grace: Duration,
    keepalive: Duration,
}

impl WatcherHub {
    pub fn new(idle_grace: Duration, keepalive: Duration) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            watchers: Mutex::new(HashMap::new()),
            idle_grace,
            keepalive,
        })
    }

    fn lock_watchers(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<WatcherEntry>>> {
        self.watchers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up or register the entry for an account
    ///
    /// Returns `true` when a fresh entry was created and a watcher task
    /// still needs to be spawned for it.
    fn ensure_entry(&self, account_id: &str) -> (Arc<WatcherEntry>, bool) {
        let mut watchers = self.lock_watchers();
        if let Some(entry) = watchers.get(account_id) {
            if !entry.is_stopping() {
                return (entry.clone(), false);
            }
        }

        let entry = Arc::new(WatcherEntry::new(account_id));
        watchers.insert(account_id.to_string(), entry.clone());
        (entry, true)
    }

    fn spawn_watcher(&self, entry: Arc<WatcherEntry>, settings: ServerSettings) {
        let task = WatchTask {
            hub: self.weak.clone(),
            entry,
            settings,
            keepalive: self.keepalive,
        };
        tokio::spawn(watcher::run(task));
    }

    /// Ensure a watcher without subscribing to it
    ///
    /// With nobody attached the idle-grace timer is armed immediately, so
    /// an unaccompanied start lives exactly one grace window.
    pub fn start(&self, account_id: &str, settings: ServerSettings) {
        let (entry, created) = self.ensure_entry(account_id);
        if created {
            info!("starting watcher for account {}", account_id);
            self.spawn_watcher(entry.clone(), settings);
        }
        if entry.subscriber_count() == 0 {
            self.arm_idle_timer(&entry);
        }
    }

    /// Ensure a watcher and attach a new push subscriber to it
    ///
    /// The ready frame is queued for the new subscriber before this
    /// returns, ahead of anything the watcher publishes afterwards.
    pub fn attach(&self, account_id: &str, settings: ServerSettings) -> Subscription {
        let (entry, created) = self.ensure_entry(account_id);
        if created {
            info!("starting watcher for account {} on first subscription", account_id);
            self.spawn_watcher(entry.clone(), settings);
        }

        entry.cancel_idle_timer();
        let (id, rx) = entry.add_subscriber();
        entry.send_to(id, Arc::new(PushEvent::sse_ready(account_id).to_json()));
        debug!("subscriber {} attached to account {}", id, account_id);

        Subscription {
            account_id: account_id.to_string(),
            id,
            hub: self.weak.clone(),
            rx,
        }
    }

    pub(crate) fn detach(&self, account_id: &str, id: u64) {
        let entry = self.lock_watchers().get(account_id).cloned();
        if let Some(entry) = entry {
            entry.remove_subscriber(id);
            debug!("subscriber {} detached from account {}", id, account_id);
            if entry.subscriber_count() == 0 && !entry.is_stopping() {
                self.arm_idle_timer(&entry);
            }
        }
    }

    /// Serialize an event once and write it to every subscriber
    pub(crate) fn broadcast(&self, entry: &Arc<WatcherEntry>, event: &PushEvent) {
        let payload = Arc::new(event.to_json());
        let dropped = entry.fan_out(&payload);
        if dropped > 0 && entry.subscriber_count() == 0 && !entry.is_stopping() {
            self.arm_idle_timer(entry);
        }
    }

    fn arm_idle_timer(&self, entry: &Arc<WatcherEntry>) {
        let Some(hub) = self.weak.upgrade() else {
            return;
        };
        let entry_for_task = entry.clone();
        let grace = self.idle_grace;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            hub.stop_if_idle(&entry_for_task);
        });
        entry.set_idle_timer(handle);
    }

    fn stop_if_idle(&self, entry: &Arc<WatcherEntry>) {
        if entry.subscriber_count() > 0 || entry.is_stopping() {
            return;
        }
        info!(
            "watcher for account {} idle past grace, tearing down",
            entry.account_id()
        );
        self.stop(entry.account_id());
    }

    /// Stop an account's watcher; a no-op when none is running
    pub fn stop(&self, account_id: &str) {
        let entry = self.lock_watchers().remove(account_id);
        if let Some(entry) = entry {
            entry.begin_stop();
        }
    }

    /// Watcher task epilogue: drop the registry entry if it is still current
    pub(crate) fn finished(&self, entry: &Arc<WatcherEntry>) {
        let mut watchers = self.lock_watchers();
        if let Some(current) = watchers.get(entry.account_id()) {
            if Arc::ptr_eq(current, entry) {
                watchers.remove(entry.account_id());
            }
        }
        drop(watchers);
        entry.begin_stop();
    }

    /// True while a watcher is registered for the account
    pub fn contains(&self, account_id: &str) -> bool {
        self.lock_watchers().contains_key(account_id)
    }

    /// Stop every watcher; used on process shutdown
    pub fn shutdown(&self) {
        let entries: Vec<Arc<WatcherEntry>> = self.lock_watchers().drain().map(|(_, e)| e).collect();
        for entry in entries {
            entry.begin_stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn hub_with_grace(grace_ms: u64) -> Arc<WatcherHub> {
        WatcherHub::new(Duration::from_millis(grace_ms), Duration::from_secs(300))
    }

    fn dummy_settings() -> ServerSettings {
        ServerSettings {
            host: "imap.example.com".to_string(),
            port: 993,
            username: "a@b.co".to_string(),
            password: "p".to_string(),
            connection: mailgate_store::models::ConnectionSecurity::Tls,
        }
    }

    /// Attach without spawning a real watcher task
    fn attach_test(hub: &Arc<WatcherHub>, account_id: &str) -> (Arc<WatcherEntry>, Subscription) {
        let (entry, _) = hub.ensure_entry(account_id);
        let sub = hub.attach(account_id, dummy_settings());
        (entry, sub)
    }

    fn parse(payload: Arc<String>) -> Value {
        serde_json::from_str(&payload).unwrap()
    }

    #[tokio::test]
    async fn test_attach_delivers_ready_frame_first() {
        let hub = hub_with_grace(60_000);
        let (entry, mut sub) = attach_test(&hub, "acc1");

        hub.broadcast(&entry, &PushEvent::watcher_ready("acc1"));

        let first = parse(sub.recv().await.unwrap());
        assert_eq!(first["type"], "SSEReady");
        assert_eq!(first["accountId"], "acc1");

        let second = parse(sub.recv().await.unwrap());
        assert_eq!(second["type"], "WatcherReady");
    }

    #[tokio::test]
    async fn test_broadcast_fans_out_to_all_subscribers() {
        let hub = hub_with_grace(60_000);
        let (entry, mut first) = attach_test(&hub, "acc1");
        let mut second = hub.attach("acc1", dummy_settings());

        // Skip the per-subscriber ready frames.
        assert_eq!(parse(first.recv().await.unwrap())["type"], "SSEReady");
        assert_eq!(parse(second.recv().await.unwrap())["type"], "SSEReady");

        hub.broadcast(&entry, &PushEvent::watcher_ready("acc1"));
        assert_eq!(parse(first.recv().await.unwrap())["type"], "WatcherReady");
        assert_eq!(parse(second.recv().await.unwrap())["type"], "WatcherReady");

        // A closed subscriber does not affect the others.
        drop(second);
        hub.broadcast(&entry, &PushEvent::error("boom"));
        assert_eq!(parse(first.recv().await.unwrap())["type"], "Error");
        assert_eq!(entry.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_drops_dead_subscriber() {
        let hub = hub_with_grace(60_000);
        let (entry, _) = hub.ensure_entry("acc1");

        let (_, rx) = entry.add_subscriber();
        drop(rx);
        assert_eq!(entry.subscriber_count(), 1);

        hub.broadcast(&entry, &PushEvent::watcher_ready("acc1"));
        assert_eq!(entry.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_idle_grace_tears_down() {
        let hub = hub_with_grace(50);
        let (_entry, sub) = attach_test(&hub, "acc1");
        assert!(hub.contains("acc1"));

        drop(sub);
        assert!(hub.contains("acc1"));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!hub.contains("acc1"));
    }

    #[tokio::test]
    async fn test_reattach_cancels_idle_teardown() {
        let hub = hub_with_grace(80);
        let (entry, sub) = attach_test(&hub, "acc1");

        drop(sub);
        let mut again = hub.attach("acc1", dummy_settings());
        assert_eq!(parse(again.recv().await.unwrap())["type"], "SSEReady");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(hub.contains("acc1"));
        assert!(!entry.is_stopping());
    }

    #[tokio::test]
    async fn test_stop_removes_entry_and_latches() {
        let hub = hub_with_grace(60_000);
        let (entry, _sub) = attach_test(&hub, "acc1");

        hub.stop("acc1");
        assert!(!hub.contains("acc1"));
        assert!(entry.is_stopping());

        // Stopping again is a no-op.
        hub.stop("acc1");
    }

    #[tokio::test]
    async fn test_stopped_future_resolves() {
        let hub = hub_with_grace(60_000);
        let (entry, _sub) = attach_test(&hub, "acc1");

        let waiter = {
            let entry = entry.clone();
            tokio::spawn(async move { entry.stopped().await })
        };
        hub.stop("acc1");
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("stop latch must wake waiters")
            .unwrap();
    }

    #[tokio::test]
    async fn test_start_without_subscribers_arms_grace() {
        let hub = hub_with_grace(50);
        let (_entry, created) = hub.ensure_entry("acc1");
        assert!(created);
        // Simulate watch/start on the already-registered entry.
        hub.start("acc1", dummy_settings());
        assert!(hub.contains("acc1"));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!hub.contains("acc1"));
    }
}
