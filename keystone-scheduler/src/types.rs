use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// When a scheduled task runs.
#[derive(Clone, Debug)]
pub enum ScheduleConfig {
    /// Fire immediately, then every `Duration`.
    Interval(Duration),
    /// Wait `initial_delay` once, then fire every `interval`.
    IntervalWithDelay {
        interval: Duration,
        initial_delay: Duration,
    },
    /// Standard cron expression (seconds-resolution, per the `cron` crate).
    Cron(String),
}

/// Trivial "did this tick fail" contract so a task body can return `()` or a
/// `Result` and either way have failures logged instead of silently dropped.
pub trait ScheduledResult {
    fn log_if_err(self, task_name: &str);
}

impl ScheduledResult for () {
    fn log_if_err(self, _task_name: &str) {}
}

impl<E: Display> ScheduledResult for Result<(), E> {
    fn log_if_err(self, task_name: &str) {
        if let Err(err) = self {
            tracing::error!(task = task_name, %err, "scheduled task tick failed");
        }
    }
}

type TaskFn<T> = Box<dyn Fn(T) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// A named task plus the state it closes over and its schedule.
///
/// `T` is cloned once per tick and handed to the task body, so the body can
/// take ownership without fighting borrow lifetimes across `.await` points.
pub struct ScheduledTaskDef<T> {
    pub name: String,
    pub schedule: ScheduleConfig,
    pub state: T,
    pub task: TaskFn<T>,
}

impl<T> ScheduledTaskDef<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schedule(&self) -> &ScheduleConfig {
        &self.schedule
    }
}

/// Object-safe handle so heterogeneous `ScheduledTaskDef<T>`s can be
/// collected into one `Vec<Box<dyn ScheduledTask>>` and started together.
pub trait ScheduledTask: Send {
    fn name(&self) -> &str;
    fn schedule(&self) -> &ScheduleConfig;

    /// Spawn the task's tokio loop. Consumes `self` since the loop owns its
    /// state and closure for the rest of the process lifetime.
    fn start(self: Box<Self>, cancel: CancellationToken);
}

impl<T: Clone + Send + Sync + 'static> ScheduledTask for ScheduledTaskDef<T> {
    fn name(&self) -> &str {
        ScheduledTaskDef::name(self)
    }

    fn schedule(&self) -> &ScheduleConfig {
        ScheduledTaskDef::schedule(self)
    }

    fn start(self: Box<Self>, cancel: CancellationToken) {
        let name = self.name;
        let state = self.state;
        let task = self.task;

        match self.schedule {
            ScheduleConfig::Interval(interval) => {
                tokio::spawn(run_interval(name, state, task, interval, None, cancel));
            }
            ScheduleConfig::IntervalWithDelay { interval, initial_delay } => {
                tokio::spawn(run_interval(name, state, task, interval, Some(initial_delay), cancel));
            }
            ScheduleConfig::Cron(expr) => {
                tokio::spawn(run_cron(name, state, task, expr, cancel));
            }
        }
    }
}

async fn run_interval<T: Clone + Send + Sync + 'static>(
    name: String,
    state: T,
    task: TaskFn<T>,
    interval: Duration,
    initial_delay: Option<Duration>,
    cancel: CancellationToken,
) {
    if let Some(delay) = initial_delay {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(task = %name, "scheduled task cancelled");
                return;
            }
            _ = ticker.tick() => {
                (task)(state.clone()).await;
            }
        }
    }
}

async fn run_cron<T: Clone + Send + Sync + 'static>(
    name: String,
    state: T,
    task: TaskFn<T>,
    expr: String,
    cancel: CancellationToken,
) {
    let schedule = match cron::Schedule::from_str(&expr) {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(task = %name, expr = %expr, %err, "invalid cron expression, task will never run");
            return;
        }
    };

    loop {
        let now = chrono::Utc::now();
        let Some(next) = schedule.after(&now).next() else {
            tracing::debug!(task = %name, "cron schedule has no further occurrences");
            return;
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(task = %name, "scheduled task cancelled");
                return;
            }
            _ = tokio::time::sleep(wait) => {
                (task)(state.clone()).await;
            }
        }
    }
}

/// Downcast a batch of type-erased task definitions back to `ScheduledTask`
/// trait objects, silently dropping anything that isn't one.
pub fn extract_tasks(boxed: Vec<Box<dyn Any + Send>>) -> Vec<Box<dyn ScheduledTask>> {
    boxed
        .into_iter()
        .filter_map(|b| b.downcast::<Box<dyn ScheduledTask>>().ok().map(|b| *b))
        .collect()
}
