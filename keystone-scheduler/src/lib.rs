//! Background task scheduler: interval, delayed-interval, and cron task
//! execution, used by the binary crate to run the audit-retention sweeper
//! (§3 — prune audit entries past `security.audit.retention_days`, default
//! 90) and any other fixed-cadence housekeeping.
//!
//! Call [`start_scheduler`] once at startup with every [`ScheduledTaskDef`]
//! the process needs; it returns a [`SchedulerHandle`] whose token cancels
//! every task's loop together, for use in the shutdown sequence.

mod types;

pub use types::{extract_tasks, ScheduleConfig, ScheduledResult, ScheduledTask, ScheduledTaskDef};

use std::future::Future;
use std::sync::{Arc, Mutex};

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use tokio_util::sync::CancellationToken;

/// Handle to the scheduler runtime: cancels every running task's loop.
///
/// Can be extracted as an Axum handler parameter (via `axum::Extension`) to
/// check scheduler status or trigger cancellation from an admin endpoint.
#[derive(Clone)]
pub struct SchedulerHandle {
    cancel: CancellationToken,
}

impl SchedulerHandle {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for SchedulerHandle {
    type Rejection = (StatusCode, &'static str);

    fn from_request_parts(parts: &mut Parts, _state: &S) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            parts
                .extensions
                .get::<SchedulerHandle>()
                .cloned()
                .ok_or((StatusCode::INTERNAL_SERVER_ERROR, "scheduler not installed"))
        }
    }
}

/// Metadata about one registered scheduled job, for the `/stats/scheduler`
/// debug view.
#[derive(Clone, Debug)]
pub struct ScheduledJobInfo {
    pub name: String,
    pub schedule: String,
}

/// Runtime-queryable registry of scheduled jobs.
#[derive(Clone)]
pub struct ScheduledJobRegistry {
    inner: Arc<Mutex<Vec<ScheduledJobInfo>>>,
}

impl ScheduledJobRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn register(&self, info: ScheduledJobInfo) {
        self.inner.lock().expect("job registry mutex poisoned").push(info);
    }

    pub fn list_jobs(&self) -> Vec<ScheduledJobInfo> {
        self.inner.lock().expect("job registry mutex poisoned").clone()
    }
}

impl Default for ScheduledJobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn format_schedule(config: &ScheduleConfig) -> String {
    match config {
        ScheduleConfig::Interval(d) => format!("every {}s", d.as_secs()),
        ScheduleConfig::IntervalWithDelay { interval, initial_delay } => {
            format!("every {}s (delay {}s)", interval.as_secs(), initial_delay.as_secs())
        }
        ScheduleConfig::Cron(expr) => format!("cron: {expr}"),
    }
}

/// Start every task, returning a handle whose cancellation stops them all,
/// and a registry describing what's running (for `/stats/scheduler`).
pub fn start_scheduler(tasks: Vec<Box<dyn ScheduledTask>>) -> (SchedulerHandle, ScheduledJobRegistry) {
    let token = CancellationToken::new();
    let handle = SchedulerHandle::new(token.clone());
    let registry = ScheduledJobRegistry::new();

    for task in tasks {
        registry.register(ScheduledJobInfo {
            name: task.name().to_string(),
            schedule: format_schedule(task.schedule()),
        });
        task.start(token.clone());
    }

    (handle, registry)
}
