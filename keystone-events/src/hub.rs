//! The WebSocket event hub (C5): a shared, lock-protected registry of
//! connected clients plus permission-filtered fan-out (§4.5).
//!
//! Publishers never block on slow consumers — each client owns a bounded
//! queue with drop-oldest overflow, drained by that connection's own send
//! loop (§5 "Event hub's per-connection send loop owns its queue exclusively").

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use keystone_security::SecurityEngine;
use tokio::sync::{Mutex, Notify, RwLock};
use uuid::Uuid;

use crate::event::{Event, ServerFrame};

/// Default bounded queue size per client (§4.5 "default 64 messages").
pub const DEFAULT_QUEUE_SIZE: usize = 64;

/// A client's outbound frame queue. Drop-oldest on overflow, never blocks
/// the publisher; `dropped` is the running overflow counter surfaced to
/// `/stats` (§8 B3).
struct ClientQueue {
    inner: Mutex<VecDeque<ServerFrame>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl ClientQueue {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    async fn push(&self, frame: ServerFrame) {
        let mut guard = self.inner.lock().await;
        if guard.len() >= self.capacity {
            guard.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        guard.push_back(frame);
        drop(guard);
        self.notify.notify_one();
    }

    /// Drain everything currently queued, in FIFO order. Used by the
    /// per-connection send loop; waits for `notify` when empty.
    async fn drain(&self) -> Vec<ServerFrame> {
        loop {
            let mut guard = self.inner.lock().await;
            if !guard.is_empty() {
                return guard.drain(..).collect();
            }
            drop(guard);
            self.notify.notified().await;
        }
    }

    fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// One connected WebSocket client (§4.5 "Connection model").
pub struct ClientHandle {
    pub id: Uuid,
    pub username: String,
    subscriptions: RwLock<HashSet<String>>,
    queue: Arc<ClientQueue>,
    closing: Notify,
}

impl ClientHandle {
    fn new(username: String, queue_size: usize) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            username,
            subscriptions: RwLock::new(HashSet::new()),
            queue: Arc::new(ClientQueue::new(queue_size)),
            closing: Notify::new(),
        })
    }

    /// Wake this client's send loop so it emits a WebSocket close frame and
    /// exits (§4.5 "Cancellation": graceful close frame on shutdown).
    pub fn request_close(&self) {
        self.closing.notify_waiters();
    }

    /// Resolves once [`request_close`](Self::request_close) has been called.
    pub async fn closing(&self) {
        self.closing.notified().await;
    }

    pub async fn is_subscribed(&self, event_type: &str) -> bool {
        self.subscriptions.read().await.contains(event_type)
    }

    pub async fn subscribe(&self, event_types: &[String]) {
        let mut subs = self.subscriptions.write().await;
        subs.extend(event_types.iter().cloned());
    }

    pub async fn unsubscribe(&self, event_types: &[String]) {
        let mut subs = self.subscriptions.write().await;
        for t in event_types {
            subs.remove(t);
        }
    }

    /// Blocks until at least one frame is queued, then returns all of them
    /// in arrival order. The connection's own task is the only caller.
    pub async fn next_frames(&self) -> Vec<ServerFrame> {
        self.queue.drain().await
    }

    pub async fn push_frame(&self, frame: ServerFrame) {
        self.queue.push(frame).await;
    }

    /// Queue a server-initiated heartbeat ping (§4.5 "server also sends periodic pings").
    pub async fn queue_ping(&self) {
        self.queue.push(ServerFrame::Ping).await;
    }

    pub fn dropped_count(&self) -> u64 {
        self.queue.dropped_count()
    }
}

/// Aggregate counters exposed via `/stats/events` (§6 "GET /stats/*").
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct HubStats {
    pub connected_clients: usize,
    pub total_dropped: u64,
}

/// The shared hub: a client registry plus the permission engine consulted
/// for step 2 of event delivery. Cheaply `Clone`d — all state lives behind
/// `Arc`/`DashMap`.
#[derive(Clone)]
pub struct EventHub {
    clients: Arc<DashMap<Uuid, Arc<ClientHandle>>>,
    engine: Arc<SecurityEngine>,
    queue_size: usize,
}

impl EventHub {
    pub fn new(engine: Arc<SecurityEngine>) -> Self {
        Self::with_queue_size(engine, DEFAULT_QUEUE_SIZE)
    }

    pub fn with_queue_size(engine: Arc<SecurityEngine>, queue_size: usize) -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
            engine,
            queue_size,
        }
    }

    /// Register a newly authenticated connection; returns the handle the
    /// connection task owns for its lifetime.
    pub fn connect(&self, username: String) -> Arc<ClientHandle> {
        let handle = ClientHandle::new(username, self.queue_size);
        self.clients.insert(handle.id, handle.clone());
        handle
    }

    /// Remove a connection from the registry (§4.5 "removed within one hub
    /// cycle" on disconnect).
    pub fn disconnect(&self, client_id: Uuid) {
        self.clients.remove(&client_id);
    }

    pub async fn subscribe(&self, client_id: Uuid, event_types: &[String]) {
        if let Some(handle) = self.clients.get(&client_id) {
            handle.subscribe(event_types).await;
        }
    }

    pub async fn unsubscribe(&self, client_id: Uuid, event_types: &[String]) {
        if let Some(handle) = self.clients.get(&client_id) {
            handle.unsubscribe(event_types).await;
        }
    }

    /// Send a single control frame (ack, pong, error) directly to one
    /// client, bypassing subscription/permission matching.
    pub async fn ack(&self, client_id: Uuid, frame: ServerFrame) {
        let handle = self.clients.get(&client_id).map(|e| e.value().clone());
        if let Some(handle) = handle {
            handle.push_frame(frame).await;
        }
    }

    /// Fan an event out to every matching, permission-passing subscriber
    /// (§4.5 "Event delivery", steps 1-3). Never awaits a slow consumer —
    /// each `push` only ever touches that client's own queue.
    pub async fn publish(&self, event: Event) {
        let candidates: Vec<Arc<ClientHandle>> = self.clients.iter().map(|e| e.value().clone()).collect();
        for client in candidates {
            if !client.is_subscribed(&event.event_type).await {
                continue;
            }
            if event.context.requires_permission_check() {
                let Some(project_id) = event.context.project_id.as_deref() else {
                    continue;
                };
                let allowed = self
                    .engine
                    .can_user_read(&client.username, "project", Some(project_id))
                    .await;
                if !allowed {
                    continue;
                }
            }
            client
                .queue
                .push(ServerFrame::Event { event: event.clone() })
                .await;
        }
    }

    pub fn stats(&self) -> HubStats {
        let total_dropped = self.clients.iter().map(|e| e.value().dropped_count()).sum();
        HubStats {
            connected_clients: self.clients.len(),
            total_dropped,
        }
    }

    /// Graceful shutdown (§4.5 "Cancellation"): signal every connected
    /// client's send loop to emit a close frame, then wait up to `drain`
    /// for them to disconnect before returning.
    pub async fn shutdown(&self, drain: Duration) {
        for entry in self.clients.iter() {
            entry.value().request_close();
        }
        let deadline = tokio::time::Instant::now() + drain;
        while !self.clients.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventContext;
    use async_trait::async_trait;
    use keystone_security::model::{Action, Principal, Role};
    use keystone_security::store::SecurityStore;
    use keystone_security::{AuditQueue, DecisionCache, NullAuditSink};
    use keystone_storage::StorageError;
    use std::time::Duration;

    /// Grants READ on `project` to every principal when `readable` is true,
    /// nothing otherwise — just enough of `SecurityStore` to exercise the
    /// hub's step-2 permission filter without a real database.
    struct FakeStore {
        readable: bool,
    }

    #[async_trait]
    impl SecurityStore for FakeStore {
        async fn has_direct_grant(&self, _u: &str, _rt: &str, _rid: Option<&str>, _a: Action) -> Result<bool, StorageError> {
            Ok(self.readable)
        }
        async fn user_teams(&self, _u: &str) -> Result<Vec<String>, StorageError> {
            Ok(Vec::new())
        }
        async fn has_team_grant(&self, _t: &str, _rt: &str, _rid: Option<&str>, _a: Action) -> Result<bool, StorageError> {
            Ok(false)
        }
        async fn user_roles(&self, _u: &str, _p: Option<&str>) -> Result<Vec<Role>, StorageError> {
            Ok(Vec::new())
        }
        async fn resource_security_level(&self, _rt: &str, _rid: &str) -> Result<Option<i64>, StorageError> {
            Ok(None)
        }
        async fn security_level_allows(&self, _level: i64, _p: &[Principal]) -> Result<bool, StorageError> {
            Ok(true)
        }
        async fn min_project_role_level(&self, _p: &str, _a: Action) -> Result<Option<u8>, StorageError> {
            Ok(None)
        }
        async fn grant_permission(
            &self,
            _p: &Principal,
            _rt: &str,
            _rid: Option<&str>,
            _a: Action,
            _level: u8,
        ) -> Result<String, StorageError> {
            unimplemented!("not exercised by hub tests")
        }
        async fn revoke_permission(&self, _id: &str) -> Result<bool, StorageError> {
            unimplemented!("not exercised by hub tests")
        }
        async fn add_team_member(&self, _t: &str, _u: &str) -> Result<(), StorageError> {
            unimplemented!("not exercised by hub tests")
        }
        async fn remove_team_member(&self, _t: &str, _u: &str) -> Result<bool, StorageError> {
            unimplemented!("not exercised by hub tests")
        }
        async fn assign_role(&self, _u: &str, _r: &str, _p: Option<&str>) -> Result<(), StorageError> {
            unimplemented!("not exercised by hub tests")
        }
        async fn revoke_role(&self, _u: &str, _r: &str, _p: Option<&str>) -> Result<bool, StorageError> {
            unimplemented!("not exercised by hub tests")
        }
    }

    fn engine(readable: bool) -> Arc<SecurityEngine> {
        let store: Arc<dyn SecurityStore> = Arc::new(FakeStore { readable });
        let audit = AuditQueue::spawn(Arc::new(NullAuditSink), 16);
        let cache = DecisionCache::new(Duration::from_secs(60), 100);
        Arc::new(SecurityEngine::new(store, cache, audit))
    }

    fn project_event(project_id: &str) -> Event {
        let mut context = EventContext::with_project(project_id);
        context.permissions = vec!["READ".to_string()];
        Event::new("ticket", "created", "T-1", "author", 0, serde_json::json!({}), context)
    }

    /// Peeks a client's queue without blocking, unlike [`ClientHandle::next_frames`]
    /// which waits for at least one frame to arrive.
    async fn queued_frames(client: &ClientHandle) -> Vec<ServerFrame> {
        client.queue.inner.lock().await.iter().cloned().collect()
    }

    #[tokio::test]
    async fn subscriber_without_project_access_is_filtered_out() {
        let hub = EventHub::new(engine(false));
        let client = hub.connect("eve".to_string());
        hub.subscribe(client.id, &["ticket.created".to_string()]).await;

        hub.publish(project_event("P1")).await;

        assert!(queued_frames(&client).await.is_empty());
    }

    #[tokio::test]
    async fn subscriber_with_project_access_receives_the_event() {
        let hub = EventHub::new(engine(true));
        let client = hub.connect("alice".to_string());
        hub.subscribe(client.id, &["ticket.created".to_string()]).await;

        hub.publish(project_event("P1")).await;

        let frames = client.next_frames().await;
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], ServerFrame::Event { .. }));
    }

    #[tokio::test]
    async fn unsubscribed_event_type_never_reaches_the_client() {
        let hub = EventHub::new(engine(true));
        let client = hub.connect("alice".to_string());
        hub.subscribe(client.id, &["comment.created".to_string()]).await;

        hub.publish(project_event("P1")).await;

        assert!(queued_frames(&client).await.is_empty());
    }

    #[tokio::test]
    async fn queue_drops_oldest_frame_once_capacity_is_exceeded() {
        let hub = EventHub::with_queue_size(engine(true), 2);
        let client = hub.connect("alice".to_string());
        hub.subscribe(client.id, &["ticket.created".to_string()]).await;

        for _ in 0..3 {
            hub.publish(project_event("P1")).await;
        }

        assert_eq!(client.dropped_count(), 1);
        assert_eq!(client.next_frames().await.len(), 2);
    }

    #[tokio::test]
    async fn disconnect_removes_the_client_from_fan_out() {
        let hub = EventHub::new(engine(true));
        let client = hub.connect("alice".to_string());
        hub.subscribe(client.id, &["ticket.created".to_string()]).await;
        hub.disconnect(client.id);

        hub.publish(project_event("P1")).await;

        assert_eq!(hub.stats().connected_clients, 0);
    }
}
