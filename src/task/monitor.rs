//! Plugin Task Monitor
//!
//! Follows a long-running plugin action that answered 202 with a `Location`
//! header: the remote task's state is mirrored into the local task until the
//! location answers 200. The only point where a discovery flow observes an
//! operator cancellation between polls.

use crate::domain::ports::{TaskState, TaskStatus};
use crate::error::{Error, Result};
use crate::plugin::{PluginReply, PluginSession};
use crate::task::reporter::TaskReporter;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Task fields reported by the plugin while the action runs
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteTaskStatus {
    #[serde(default)]
    pub task_state: Option<TaskState>,
    #[serde(default)]
    pub task_status: Option<TaskStatus>,
    #[serde(default)]
    pub percent_complete: u32,
}

impl RemoteTaskStatus {
    pub fn parse(location: &str, body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(|e| Error::malformed(location, e))
    }
}

/// Poll `location` until it answers 200, mirroring each remote status.
///
/// `initial_body` is the body of the 202 reply that returned the location.
/// A cancellation request pushes a critical `Cancelled` update at 100
/// percent and stops polling with `CancelledByOperator`. A failed poll ends
/// monitoring with that error.
pub async fn monitor_plugin_task(
    session: &PluginSession,
    location: &str,
    initial_body: &str,
    reporter: &TaskReporter,
    poll_interval: Duration,
) -> Result<PluginReply> {
    let mut body = initial_body.to_string();
    let mut status_code = 202u16;
    loop {
        let remote = RemoteTaskStatus::parse(location, &body)?;
        let update = reporter.update(
            remote.task_state.unwrap_or(TaskState::Running),
            remote.task_status.unwrap_or(TaskStatus::OK),
            remote.percent_complete,
            status_code,
            serde_json::from_str(&body).ok(),
        );
        match reporter.push(update).await {
            Ok(()) => {}
            Err(Error::TaskCancelling { .. }) => {
                return Err(reporter.cancel(TaskStatus::Critical, 100).await);
            }
            Err(e) => warn!(task = %reporter.task_id(), error = %e, "Task update failed"),
        }

        tokio::time::sleep(poll_interval).await;
        let reply = session.get(location).await?;
        if reply.status == 200 {
            info!(task = %reporter.task_id(), location = %location, "Plugin task finished");
            return Ok(reply);
        }
        debug!(location = %location, status = reply.status, "Plugin task still running");
        status_code = reply.status;
        body = reply.body;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::PluginResponse;
    use crate::testing::{basic_session, RecordingTaskUpdater, ScriptedTransport};
    use assert_matches::assert_matches;
    use serde_json::json;

    const LOCATION: &str = "/taskmon/7";

    #[tokio::test]
    async fn test_polls_until_done() {
        let transport = ScriptedTransport::new();
        transport.respond(
            LOCATION,
            PluginResponse::json(202, &json!({"TaskState": "Running", "TaskStatus": "OK", "PercentComplete": 60})),
        );
        transport.respond(
            LOCATION,
            PluginResponse::json(200, &json!({"TaskState": "Completed", "PercentComplete": 100})),
        );
        let session = basic_session(transport.clone()).await;
        let updater = RecordingTaskUpdater::new();
        let reporter = TaskReporter::new(updater.clone(), "sub-1", "/redfish/v1/Systems/d1.1");

        let reply = monitor_plugin_task(
            &session,
            LOCATION,
            r#"{"TaskState":"Starting","PercentComplete":0}"#,
            &reporter,
            Duration::from_millis(1),
        )
        .await
        .unwrap();

        assert_eq!(reply.status, 200);
        assert_eq!(transport.calls(LOCATION), 2);
        let updates = updater.updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].state, TaskState::Starting);
        assert_eq!(updates[1].state, TaskState::Running);
        assert_eq!(updates[1].percent_complete, 60);
    }

    #[tokio::test]
    async fn test_cancellation_stops_polling() {
        let transport = ScriptedTransport::new();
        let session = basic_session(transport.clone()).await;
        let updater = RecordingTaskUpdater::new();
        updater.cancel_next();
        let reporter = TaskReporter::new(updater.clone(), "sub-2", "/redfish/v1/Systems/d1.1");

        let result = monitor_plugin_task(
            &session,
            LOCATION,
            r#"{"TaskState":"Running","PercentComplete":40}"#,
            &reporter,
            Duration::from_millis(1),
        )
        .await;

        assert_matches!(result, Err(Error::CancelledByOperator { percent: 100, .. }));
        assert_eq!(transport.calls(LOCATION), 0);
        let last = updater.updates().pop().unwrap();
        assert_eq!(last.state, TaskState::Cancelled);
        assert_eq!(last.status, TaskStatus::Critical);
    }

    #[tokio::test]
    async fn test_poll_failure_ends_monitoring() {
        let transport = ScriptedTransport::new();
        transport.respond(LOCATION, PluginResponse::json(500, &json!({})));
        let session = basic_session(transport).await;
        let reporter = TaskReporter::new(RecordingTaskUpdater::new(), "sub-3", "/redfish/v1/Systems/d1.1");

        let result = monitor_plugin_task(&session, LOCATION, "{}", &reporter, Duration::from_millis(1)).await;
        assert_matches!(result, Err(Error::UpstreamStatus { status: 500, .. }));

        let result = monitor_plugin_task(&session, LOCATION, "not json", &reporter, Duration::from_millis(1)).await;
        assert_matches!(result, Err(Error::MalformedUpstreamBody { .. }));
    }
}
