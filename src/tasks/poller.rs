//! Periodic status polling for tracked tasks.
//!
//! Each cycle queries every active task concurrently, waits for all of the
//! queries to settle, then applies the outcomes under a single write lock.
//! Cycles never overlap. Cancellation stops the loop, and outcomes that
//! settle after cancellation are dropped instead of applied.

use async_trait::async_trait;
use futures::future::join_all;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{SharedTaskRegistry, TaskItem, TaskKind, TaskStatus};
use crate::api::types::JobStatus;
use crate::api::{ApiClient, ApiError};
use crate::notify::{Notifier, ToastKind};

/// Delay between poll cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(8);

const MISSING_ANALYSIS: &str = "missing_analysis";
const MISSING_ANALYSIS_MESSAGE: &str = "Run analysis before generating docs.";
const ANALYSIS_FAILED_MESSAGE: &str = "Analysis failed. Please try again.";

/// Where job status comes from.
#[async_trait]
pub trait TaskStatusSource: Send + Sync {
    async fn job_status(&self, task: &TaskItem) -> Result<JobStatus, ApiError>;
}

#[async_trait]
impl TaskStatusSource for ApiClient {
    async fn job_status(&self, task: &TaskItem) -> Result<JobStatus, ApiError> {
        match task.kind {
            TaskKind::Analysis => self.analysis_status(task.subject_id, &task.id).await,
            TaskKind::Docs => self.docs_status(&task.id).await,
        }
    }
}

/// Map a backend job state to a client status.
///
/// Unrecognized states map to `Queued`, which keeps the task polled.
pub fn map_state(state: Option<&str>) -> TaskStatus {
    match state.unwrap_or("").to_ascii_uppercase().as_str() {
        "SUCCESS" => TaskStatus::Completed,
        "FAILURE" | "REVOKED" => TaskStatus::Failed,
        "STARTED" => TaskStatus::Running,
        "PENDING" => TaskStatus::Queued,
        other => {
            if !other.is_empty() {
                tracing::debug!(state = %other, "Unrecognized job state; treating as queued");
            }
            TaskStatus::Queued
        }
    }
}

/// What one query means for its task.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Decision {
    status: TaskStatus,
    notification: Option<String>,
}

/// Work out the next status of `task` (its current record) from a query result.
fn decide(task: &TaskItem, response: &Result<JobStatus, ApiError>) -> Decision {
    let job = match response {
        Ok(job) => job,
        Err(e) => {
            // Not surfaced to the user, unlike a failure the backend reports.
            tracing::warn!(
                task_id = %task.id,
                kind = %task.kind,
                error = %e,
                "Status query failed; marking task failed"
            );
            return Decision {
                status: TaskStatus::Failed,
                notification: None,
            };
        }
    };

    let status = map_state(job.state.as_deref());

    if task.kind == TaskKind::Docs && status == TaskStatus::Completed {
        if let Some(result_status) = job.result_status().filter(|s| *s != "completed") {
            let message = match job.result_error() {
                Some(error) => error.to_string(),
                None if result_status == MISSING_ANALYSIS => MISSING_ANALYSIS_MESSAGE.to_string(),
                None => format!("Docs failed: {}", result_status),
            };
            return Decision {
                status: TaskStatus::Failed,
                notification: Some(message),
            };
        }
    }

    let notification = (task.kind == TaskKind::Analysis
        && status == TaskStatus::Failed
        && task.status != TaskStatus::Failed)
        .then(|| {
            job.error_message()
                .or_else(|| job.result_error())
                .unwrap_or(ANALYSIS_FAILED_MESSAGE)
                .to_string()
        });

    Decision {
        status,
        notification,
    }
}

/// Summary of one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Queries issued
    pub polled: usize,
    /// Tasks whose status changed
    pub updated: usize,
    /// Notifications emitted
    pub notified: usize,
    /// Active tasks left after the cycle
    pub remaining_active: usize,
    /// Outcomes dropped because the poller was cancelled mid-cycle
    pub discarded: bool,
}

/// Drives status queries for a shared task registry.
pub struct TaskPoller<S> {
    source: S,
    interval: Duration,
}

impl<S: TaskStatusSource> TaskPoller<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run a single cycle.
    pub async fn poll_once<N: Notifier + ?Sized>(
        &self,
        registry: &SharedTaskRegistry,
        notifier: &mut N,
        cancel: &CancellationToken,
    ) -> CycleReport {
        // Snapshot, then release the lock before any network wait.
        let active = registry.read().await.active();
        let mut report = CycleReport {
            polled: active.len(),
            remaining_active: active.len(),
            ..CycleReport::default()
        };
        if active.is_empty() {
            return report;
        }

        let queries = join_all(active.iter().map(|task| self.source.job_status(task)));
        let responses = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            responses = queries => Some(responses),
        };
        let responses = match responses {
            Some(responses) if !cancel.is_cancelled() => responses,
            _ => {
                tracing::debug!(tasks = active.len(), "Poll cycle cancelled; discarding results");
                report.discarded = true;
                return report;
            }
        };

        let mut registry = registry.write().await;
        for (snapshot, response) in active.iter().zip(responses) {
            // Re-read: the task may have been dismissed or changed mid-cycle.
            let Some(current) = registry.get(&snapshot.id).cloned() else {
                continue;
            };
            if current.status.is_terminal() {
                continue;
            }

            let decision = decide(&current, &response);
            if let Some(message) = &decision.notification {
                notifier.notify(message, ToastKind::Error);
                report.notified += 1;
            }
            match registry.update_status(&current.id, decision.status).await {
                Ok(true) => report.updated += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(task_id = %current.id, "Failed to persist task status: {}", e),
            }
        }
        report.remaining_active = registry.active().len();

        tracing::debug!(
            polled = report.polled,
            updated = report.updated,
            notified = report.notified,
            remaining = report.remaining_active,
            "Poll cycle finished"
        );
        report
    }

    /// Poll until `cancel` fires. The first cycle runs immediately.
    pub async fn run<N: Notifier + ?Sized>(
        &self,
        registry: &SharedTaskRegistry,
        notifier: &mut N,
        cancel: &CancellationToken,
    ) {
        self.run_loop(registry, notifier, cancel, false).await;
    }

    /// Poll until no active task is left, or until `cancel` fires.
    pub async fn run_until_idle<N: Notifier + ?Sized>(
        &self,
        registry: &SharedTaskRegistry,
        notifier: &mut N,
        cancel: &CancellationToken,
    ) {
        self.run_loop(registry, notifier, cancel, true).await;
    }

    async fn run_loop<N: Notifier + ?Sized>(
        &self,
        registry: &SharedTaskRegistry,
        notifier: &mut N,
        cancel: &CancellationToken,
        stop_when_idle: bool,
    ) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = self.poll_once(registry, notifier, cancel).await;
            if report.discarded {
                break;
            }
            if stop_when_idle && report.remaining_active == 0 {
                tracing::info!("No active tasks left; stopping poller");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ToastStore;
    use crate::storage::LocalStore;
    use crate::tasks::TaskRegistry;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::RwLock;

    /// Answers from a fixed table; a missing entry is a transport failure.
    #[derive(Default)]
    struct ScriptedSource {
        responses: Mutex<HashMap<String, serde_json::Value>>,
        calls: AtomicUsize,
        cancel_on_call: Option<CancellationToken>,
    }

    impl ScriptedSource {
        fn respond(&self, id: &str, body: serde_json::Value) {
            self.responses
                .lock()
                .expect("lock")
                .insert(id.to_string(), body);
        }
    }

    #[async_trait]
    impl TaskStatusSource for ScriptedSource {
        async fn job_status(&self, task: &TaskItem) -> Result<JobStatus, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(cancel) = &self.cancel_on_call {
                cancel.cancel();
            }
            let body = self.responses.lock().expect("lock").get(&task.id).cloned();
            match body {
                Some(body) => serde_json::from_value(body)
                    .map_err(|e| ApiError::InvalidInput(e.to_string())),
                None => Err(ApiError::Stream("connection reset".to_string())),
            }
        }
    }

    async fn registry_with(tasks: Vec<TaskItem>) -> SharedTaskRegistry {
        let mut registry = TaskRegistry::load(Arc::new(LocalStore::in_memory())).await;
        for task in tasks.into_iter().rev() {
            registry.add(task).await.expect("add");
        }
        Arc::new(RwLock::new(registry))
    }

    async fn status_of(registry: &SharedTaskRegistry, id: &str) -> Option<TaskStatus> {
        registry.read().await.get(id).map(|t| t.status)
    }

    #[test]
    fn state_mapping_is_case_insensitive_with_queued_fallback() {
        assert_eq!(map_state(Some("PENDING")), TaskStatus::Queued);
        assert_eq!(map_state(Some("started")), TaskStatus::Running);
        assert_eq!(map_state(Some("Success")), TaskStatus::Completed);
        assert_eq!(map_state(Some("FAILURE")), TaskStatus::Failed);
        assert_eq!(map_state(Some("revoked")), TaskStatus::Failed);
        assert_eq!(map_state(Some("RETRY")), TaskStatus::Queued);
        assert_eq!(map_state(None), TaskStatus::Queued);
    }

    #[tokio::test]
    async fn docs_missing_analysis_fails_and_notifies_once() {
        let registry = registry_with(vec![TaskItem::docs("d1", 4, "readme")]).await;
        let source = ScriptedSource::default();
        source.respond(
            "d1",
            json!({"state": "SUCCESS", "result": {"status": "missing_analysis"}}),
        );
        let poller = TaskPoller::new(source);
        let mut toasts = ToastStore::default();
        let cancel = CancellationToken::new();

        let first = poller.poll_once(&registry, &mut toasts, &cancel).await;
        assert_eq!(first.notified, 1);
        assert_eq!(status_of(&registry, "d1").await, Some(TaskStatus::Failed));
        assert_eq!(toasts.toasts().len(), 1);
        assert_eq!(toasts.toasts()[0].message, MISSING_ANALYSIS_MESSAGE);
        assert_eq!(toasts.toasts()[0].kind, ToastKind::Error);

        let second = poller.poll_once(&registry, &mut toasts, &cancel).await;
        assert_eq!(second.polled, 0);
        assert_eq!(toasts.toasts().len(), 1);
        assert_eq!(poller.source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn docs_result_error_and_generic_messages() {
        let registry = registry_with(vec![
            TaskItem::docs("with-error", 1, "api"),
            TaskItem::docs("generic", 1, "api"),
            TaskItem::docs("ok", 1, "api"),
        ])
        .await;
        let source = ScriptedSource::default();
        source.respond(
            "with-error",
            json!({"state": "SUCCESS", "result": {"status": "error", "error": "LLM quota exceeded"}}),
        );
        source.respond(
            "generic",
            json!({"state": "SUCCESS", "result": {"status": "skipped"}}),
        );
        source.respond(
            "ok",
            json!({"state": "SUCCESS", "result": {"status": "completed"}}),
        );
        let poller = TaskPoller::new(source);
        let mut toasts = ToastStore::default();

        let report = poller
            .poll_once(&registry, &mut toasts, &CancellationToken::new())
            .await;
        assert_eq!(report.updated, 3);
        assert_eq!(report.remaining_active, 0);

        let messages: Vec<&str> = toasts.toasts().iter().map(|t| t.message.as_str()).collect();
        assert_eq!(messages, vec!["LLM quota exceeded", "Docs failed: skipped"]);
        assert_eq!(status_of(&registry, "ok").await, Some(TaskStatus::Completed));
    }

    #[tokio::test]
    async fn analysis_failure_message_fallbacks() {
        let registry = registry_with(vec![
            TaskItem::analysis("top", 2),
            TaskItem::analysis("nested", 2),
            TaskItem::analysis("bare", 2),
        ])
        .await;
        let source = ScriptedSource::default();
        source.respond("top", json!({"state": "FAILURE", "error": "Clone failed"}));
        source.respond(
            "nested",
            json!({"state": "FAILURE", "result": {"error": "Parser crashed"}}),
        );
        source.respond("bare", json!({"state": "REVOKED"}));
        let poller = TaskPoller::new(source);
        let mut toasts = ToastStore::default();

        poller
            .poll_once(&registry, &mut toasts, &CancellationToken::new())
            .await;
        let messages: Vec<&str> = toasts.toasts().iter().map(|t| t.message.as_str()).collect();
        assert_eq!(
            messages,
            vec!["Clone failed", "Parser crashed", ANALYSIS_FAILED_MESSAGE]
        );
    }

    #[test]
    fn analysis_already_failed_is_not_renotified() {
        let mut task = TaskItem::analysis("t", 1);
        task.status = TaskStatus::Failed;
        let decision = decide(&task, &Ok(JobStatus {
            state: Some("FAILURE".to_string()),
            ..JobStatus::default()
        }));
        assert_eq!(decision.status, TaskStatus::Failed);
        assert_eq!(decision.notification, None);
    }

    #[tokio::test]
    async fn query_failure_marks_failed_without_notification() {
        let registry = registry_with(vec![TaskItem::analysis("lost", 1)]).await;
        let poller = TaskPoller::new(ScriptedSource::default());
        let mut toasts = ToastStore::default();

        let report = poller
            .poll_once(&registry, &mut toasts, &CancellationToken::new())
            .await;
        assert_eq!(report.notified, 0);
        assert!(toasts.toasts().is_empty());
        assert_eq!(status_of(&registry, "lost").await, Some(TaskStatus::Failed));
    }

    #[tokio::test]
    async fn one_failed_query_leaves_the_rest_of_the_cycle_intact() {
        let registry = registry_with(vec![
            TaskItem::analysis("lost", 1),
            TaskItem::analysis("busy", 1),
            TaskItem::docs("done", 1, "readme"),
        ])
        .await;
        let source = ScriptedSource::default();
        source.respond("busy", json!({"state": "STARTED"}));
        source.respond(
            "done",
            json!({"state": "SUCCESS", "result": {"status": "completed"}}),
        );
        let poller = TaskPoller::new(source);
        let mut toasts = ToastStore::default();

        let report = poller
            .poll_once(&registry, &mut toasts, &CancellationToken::new())
            .await;
        assert_eq!(report.polled, 3);
        assert_eq!(report.updated, 3);
        assert_eq!(report.notified, 0);
        assert_eq!(report.remaining_active, 1);
        assert!(toasts.toasts().is_empty());
        assert_eq!(poller.source.calls.load(Ordering::SeqCst), 3);

        assert_eq!(status_of(&registry, "lost").await, Some(TaskStatus::Failed));
        assert_eq!(status_of(&registry, "busy").await, Some(TaskStatus::Running));
        assert_eq!(status_of(&registry, "done").await, Some(TaskStatus::Completed));
    }

    #[tokio::test]
    async fn running_then_pending_does_not_go_backward() {
        let registry = registry_with(vec![TaskItem::analysis("a", 1)]).await;
        let source = ScriptedSource::default();
        source.respond("a", json!({"state": "STARTED"}));
        let poller = TaskPoller::new(source);
        let mut toasts = ToastStore::default();
        let cancel = CancellationToken::new();

        poller.poll_once(&registry, &mut toasts, &cancel).await;
        assert_eq!(status_of(&registry, "a").await, Some(TaskStatus::Running));

        poller.source.respond("a", json!({"state": "PENDING"}));
        let report = poller.poll_once(&registry, &mut toasts, &cancel).await;
        assert_eq!(report.updated, 0);
        assert_eq!(status_of(&registry, "a").await, Some(TaskStatus::Running));
    }

    #[tokio::test]
    async fn results_after_cancellation_are_discarded() {
        let registry = registry_with(vec![TaskItem::analysis("a", 1)]).await;
        let cancel = CancellationToken::new();
        let source = ScriptedSource {
            cancel_on_call: Some(cancel.clone()),
            ..ScriptedSource::default()
        };
        source.respond("a", json!({"state": "SUCCESS"}));
        let poller = TaskPoller::new(source);
        let mut toasts = ToastStore::default();

        let report = poller.poll_once(&registry, &mut toasts, &cancel).await;
        assert!(report.discarded);
        assert_eq!(status_of(&registry, "a").await, Some(TaskStatus::Queued));
    }

    /// Dismisses the task while its query is in flight.
    struct DismissingSource {
        registry: SharedTaskRegistry,
    }

    #[async_trait]
    impl TaskStatusSource for DismissingSource {
        async fn job_status(&self, task: &TaskItem) -> Result<JobStatus, ApiError> {
            self.registry
                .write()
                .await
                .remove(&task.id)
                .await
                .map_err(ApiError::from)?;
            Ok(JobStatus {
                state: Some("SUCCESS".to_string()),
                ..JobStatus::default()
            })
        }
    }

    #[tokio::test]
    async fn dismissed_mid_cycle_is_skipped() {
        let registry = registry_with(vec![TaskItem::analysis("gone", 1)]).await;
        let poller = TaskPoller::new(DismissingSource {
            registry: registry.clone(),
        });
        let mut toasts = ToastStore::default();

        let report = poller
            .poll_once(&registry, &mut toasts, &CancellationToken::new())
            .await;
        assert_eq!(report.polled, 1);
        assert_eq!(report.updated, 0);
        assert!(registry.read().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_until_idle_stops_when_everything_settles() {
        let registry = registry_with(vec![TaskItem::analysis("a", 1)]).await;
        let source = ScriptedSource::default();
        source.respond("a", json!({"state": "STARTED"}));
        let poller = TaskPoller::new(source).with_interval(Duration::from_secs(8));
        let mut toasts = ToastStore::default();
        let cancel = CancellationToken::new();

        let shared = registry.clone();
        let finish = async {
            // Let the first (immediate) cycle run, then settle the job.
            tokio::time::sleep(Duration::from_secs(1)).await;
            poller.source.respond("a", json!({"state": "SUCCESS"}));
        };
        tokio::join!(
            poller.run_until_idle(&shared, &mut toasts, &cancel),
            finish
        );

        assert_eq!(status_of(&registry, "a").await, Some(TaskStatus::Completed));
        assert_eq!(poller.source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let registry = registry_with(vec![]).await;
        let poller = TaskPoller::new(ScriptedSource::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        poller
            .run(&registry, &mut ToastStore::default(), &cancel)
            .await;
        assert_eq!(poller.source.calls.load(Ordering::SeqCst), 0);
    }
}
