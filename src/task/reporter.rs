//! Task Reporter
//!
//! Pushes progress of one task to the task service and turns the service's
//! cancellation sentinel into a terminal `Cancelled` update.

use crate::discovery::progress::ProgressAccumulator;
use crate::domain::ports::{HttpMethod, TaskState, TaskStatus, TaskUpdate, TaskUpdaterRef};
use crate::error::{Error, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Progress reporting for one task id
pub struct TaskReporter {
    updater: TaskUpdaterRef,
    task_id: String,
    target_uri: String,
    http_method: HttpMethod,
    progress: Mutex<ProgressAccumulator>,
}

impl TaskReporter {
    pub fn new(updater: TaskUpdaterRef, task_id: impl Into<String>, target_uri: impl Into<String>) -> Self {
        Self {
            updater,
            task_id: task_id.into(),
            target_uri: target_uri.into(),
            http_method: HttpMethod::Post,
            progress: Mutex::new(ProgressAccumulator::default()),
        }
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.http_method = method;
        self
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn percent(&self) -> u32 {
        self.progress.lock().percent()
    }

    /// Build an update for this task
    pub fn update(
        &self,
        state: TaskState,
        status: TaskStatus,
        percent_complete: u32,
        status_code: u16,
        payload: Option<Value>,
    ) -> TaskUpdate {
        TaskUpdate {
            task_id: self.task_id.clone(),
            state,
            status,
            percent_complete,
            target_uri: self.target_uri.clone(),
            http_method: self.http_method,
            status_code,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Send an update as-is; the cancellation sentinel is returned unchanged
    pub async fn push(&self, update: TaskUpdate) -> Result<()> {
        debug!(
            task = %self.task_id,
            state = ?update.state,
            percent = update.percent_complete,
            "Updating task"
        );
        self.updater.update_task(update).await
    }

    /// Send an update, converting the cancellation sentinel into
    /// `CancelledByOperator` after recording the cancelled state
    pub async fn report(
        &self,
        state: TaskState,
        status: TaskStatus,
        percent: u32,
        status_code: u16,
        payload: Option<Value>,
    ) -> Result<()> {
        match self.push(self.update(state, status, percent, status_code, payload)).await {
            Err(Error::TaskCancelling { .. }) => Err(self.cancel(status, percent).await),
            other => other,
        }
    }

    /// Record the cancelled state and return the error ending the task
    pub async fn cancel(&self, status: TaskStatus, percent: u32) -> Error {
        let update = self.update(TaskState::Cancelled, status, percent, 200, None);
        if let Err(e) = self.updater.update_task(update).await {
            warn!(task = %self.task_id, error = %e, "Unable to record task cancellation");
        }
        if percent == 0 {
            info!(task = %self.task_id, "Task cancelled before it started");
        } else {
            info!(task = %self.task_id, percent, "Task cancelled by operator");
        }
        Error::CancelledByOperator {
            task_id: self.task_id.clone(),
            percent,
        }
    }

    /// Credit completed work and report the running percent
    pub async fn progress(&self, delta: u32) -> Result<u32> {
        let percent = self.progress.lock().advance(delta);
        self.report(TaskState::Running, TaskStatus::OK, percent, 202, None)
            .await?;
        Ok(percent)
    }

    /// Report successful completion at 100 percent
    pub async fn complete(&self, payload: Option<Value>) -> Result<()> {
        let percent = self.progress.lock().advance(100);
        self.report(TaskState::Completed, TaskStatus::OK, percent, 200, payload)
            .await
    }

    /// Report a failure at the current percent, carrying the structured error
    pub async fn fail(&self, error: &Error) -> Result<()> {
        let response = error.to_response();
        let payload = serde_json::to_value(&response).ok();
        self.report(
            TaskState::Exception,
            TaskStatus::Critical,
            self.percent(),
            response.status_code,
            payload,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingTaskUpdater;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_progress_accumulates_and_completes() {
        let updater = RecordingTaskUpdater::new();
        let reporter = TaskReporter::new(updater.clone(), "task-1", "/redfish/v1/AggregationService/Actions/Add");

        assert_eq!(reporter.progress(10).await.unwrap(), 10);
        assert_eq!(reporter.progress(50).await.unwrap(), 60);
        reporter.complete(None).await.unwrap();

        let updates = updater.updates();
        assert_eq!(updates.len(), 3);
        assert_eq!(updates[1].percent_complete, 60);
        assert_eq!(updates[1].state, TaskState::Running);
        assert_eq!(updates[2].state, TaskState::Completed);
        assert_eq!(updates[2].percent_complete, 100);
        assert_eq!(updates[2].task_id, "task-1");
    }

    #[tokio::test]
    async fn test_cancellation_sentinel_records_cancelled() {
        let updater = RecordingTaskUpdater::new();
        let reporter = TaskReporter::new(updater.clone(), "task-2", "/redfish/v1/Systems");
        reporter.progress(20).await.unwrap();
        updater.cancel_next();

        let err = reporter.progress(30).await.unwrap_err();
        assert_matches!(err, Error::CancelledByOperator { percent: 50, .. });

        let last = updater.updates().pop().unwrap();
        assert_eq!(last.state, TaskState::Cancelled);
        assert_eq!(last.percent_complete, 50);
    }

    #[tokio::test]
    async fn test_fail_carries_error_response() {
        let updater = RecordingTaskUpdater::new();
        let reporter = TaskReporter::new(updater.clone(), "task-3", "/redfish/v1/Systems");
        reporter.progress(10).await.unwrap();

        let error = Error::DuplicateResource {
            kind: "ComputerSystem".into(),
            uuid: "u1".into(),
        };
        reporter.fail(&error).await.unwrap();

        let last = updater.updates().pop().unwrap();
        assert_eq!(last.state, TaskState::Exception);
        assert_eq!(last.status, TaskStatus::Critical);
        assert_eq!(last.percent_complete, 10);
        assert_eq!(last.status_code, 409);
        assert_eq!(last.payload.unwrap()["statusCode"], 409);
    }
}
