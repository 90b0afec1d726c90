//! Reminder dispatch loop.
//!
//! A cancellable tokio task that, once on start and then every interval, asks the
//! [`ReminderDueSelector`] what is due, hands each reminder to a
//! [`NotificationSink`], and writes the sent-marker back. Failures are isolated per
//! task: the reminder keeps no marker and is tried again on the next tick.
//!
//! There is no lock between reading due tasks and writing markers, so two
//! processes polling the same store can both deliver one reminder. Delivery is
//! at-least-once, usually once.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::db::{format_due_relative, format_local};
use crate::error::{Result, TaskError};
use crate::permission::PermissionState;
use crate::reminders::ReminderDueSelector;
use crate::task::Task;

/// Default interval between dispatch ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// A reminder ready to be shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub task_id: u64,
    pub title: String,
    pub body: String,
}

impl Notification {
    pub fn for_task(task: &Task, tz: FixedOffset, now: DateTime<Utc>) -> Self {
        let body = match task.due_at() {
            Some(due) => format!(
                "Due {} ({})",
                format_local(due, tz),
                format_due_relative(Some(due), now)
            ),
            None => "No due date".to_string(),
        };
        Notification {
            task_id: task.id,
            title: task.title.clone(),
            body,
        }
    }
}

/// Where reminders are delivered.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<()>;
}

/// Prints reminders to stdout.
#[derive(Debug, Default)]
pub struct ConsoleSink;

#[async_trait]
impl NotificationSink for ConsoleSink {
    async fn deliver(&self, notification: &Notification) -> Result<()> {
        use std::io::Write;
        let mut out = std::io::stdout().lock();
        writeln!(out, "\u{1F514} {}: {}", notification.title, notification.body)
            .and_then(|_| out.flush())
            .map_err(|e| TaskError::Delivery(e.to_string()))
    }
}

/// What a single tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Delivered and marked as sent.
    pub delivered: usize,
    /// Sink or marker write failed; still eligible.
    pub failed: usize,
    /// Task changed between selection and marking.
    pub skipped: usize,
}

/// Periodic reminder delivery for one owner.
pub struct NotificationDispatchLoop {
    selector: ReminderDueSelector,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    owner: String,
    tz: FixedOffset,
    interval: Duration,
}

impl NotificationDispatchLoop {
    pub fn new(
        selector: ReminderDueSelector,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        owner: impl Into<String>,
        tz: FixedOffset,
    ) -> Self {
        NotificationDispatchLoop {
            selector,
            sink,
            clock,
            owner: owner.into(),
            tz,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the tick interval (minimum one millisecond).
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one poll-deliver-mark pass. Never fails; problems are logged and counted.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        let now = self.clock.now();
        let selector = self.selector.clone();
        let owner = self.owner.clone();
        let due = match blocking(move || selector.due_reminders(&owner, now)).await {
            Ok(due) => due,
            Err(e) => {
                warn!(owner = %self.owner, error = %e, "could not load due reminders");
                return report;
            }
        };

        for task in due {
            let Some(due_at) = task.due_at() else {
                continue;
            };
            let notification = Notification::for_task(&task, self.tz, now);
            if let Err(e) = self.sink.deliver(&notification).await {
                warn!(task_id = task.id, error = %e, retryable = e.is_retryable(), "reminder delivery failed");
                report.failed += 1;
                continue;
            }
            let repo = self.selector.repository().clone();
            let owner = self.owner.clone();
            let id = task.id;
            match blocking(move || repo.mark_notified(&owner, id, due_at, now)).await {
                Ok(true) => {
                    debug!(task_id = task.id, "reminder delivered");
                    report.delivered += 1;
                }
                Ok(false) => {
                    debug!(task_id = task.id, "task changed during delivery, marker not written");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(task_id = task.id, error = %e, "reminder delivered but not recorded, will retry");
                    report.failed += 1;
                }
            }
        }

        if report != TickReport::default() {
            info!(
                delivered = report.delivered,
                failed = report.failed,
                skipped = report.skipped,
                "reminder tick"
            );
        }
        report
    }

    /// Tick immediately, then once per interval, until `cancel` fires.
    ///
    /// A tick already running when `cancel` fires is allowed to finish. Ticks
    /// missed while a tick was slow are dropped, not replayed.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(owner = %self.owner, interval_secs = self.interval.as_secs_f64(), "reminder dispatch started");
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
        info!(owner = %self.owner, "reminder dispatch stopped");
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }
}

/// Run store I/O on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TaskError::Persistence(format!("store task failed: {e}")))?
}

/// Keep the dispatch loop running exactly while the permission is `Granted`.
///
/// Each grant starts a fresh loop (which ticks immediately); any other state
/// cancels it and waits for it to stop. Returns once `shutdown` fires or the
/// permission channel closes.
pub async fn supervise(
    dispatch: Arc<NotificationDispatchLoop>,
    mut permission: watch::Receiver<PermissionState>,
    shutdown: CancellationToken,
) {
    let mut running: Option<(CancellationToken, JoinHandle<()>)> = None;

    loop {
        let granted = *permission.borrow_and_update() == PermissionState::Granted;
        if granted && running.is_none() {
            let token = shutdown.child_token();
            let handle = dispatch.clone().spawn(token.clone());
            running = Some((token, handle));
        } else if !granted {
            if let Some((token, handle)) = running.take() {
                info!("notification permission withdrawn, stopping dispatch");
                stop(token, handle).await;
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = permission.changed() => {
                if changed.is_err() {
                    debug!("permission channel closed");
                    break;
                }
            }
        }
    }

    if let Some((token, handle)) = running.take() {
        stop(token, handle).await;
    }
}

async fn stop(token: CancellationToken, handle: JoinHandle<()>) {
    token.cancel();
    if let Err(e) = handle.await {
        warn!(error = %e, "dispatch task ended abnormally");
    }
}
