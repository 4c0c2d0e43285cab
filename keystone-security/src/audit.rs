//! Audit trail: every `check_access` call writes one immutable entry,
//! best-effort and asynchronous so the decision never waits on the write.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub timestamp: i64,
    pub principal: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub action: String,
    pub allowed: bool,
    pub reason: String,
    pub cache_hit: bool,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub context: HashMap<String, String>,
    pub severity: Severity,
}

/// Where audit entries ultimately land. Implemented against C1 storage by
/// the binary crate; kept as a trait here so the engine doesn't need to know
/// the schema.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn write(&self, entry: AuditEntry);
}

/// No-op sink for tests and for environments that haven't wired a real one yet.
pub struct NullAuditSink;

#[async_trait]
impl AuditSink for NullAuditSink {
    async fn write(&self, _entry: AuditEntry) {}
}

/// Bounded best-effort queue in front of an [`AuditSink`].
///
/// `submit` never blocks the caller: a full queue drops the entry and counts
/// it rather than applying backpressure to the authorization path.
pub struct AuditQueue {
    tx: mpsc::Sender<AuditEntry>,
    dropped: Arc<AtomicU64>,
}

impl AuditQueue {
    /// Spawn the background writer and return a handle to submit entries to it.
    pub fn spawn(sink: Arc<dyn AuditSink>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel(capacity);
        tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                sink.write(entry).await;
            }
        });
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueue an entry without waiting. Drops (and counts) on overflow.
    pub fn submit(&self, entry: AuditEntry) {
        if self.tx.try_send(entry).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("audit queue full, dropping entry");
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
