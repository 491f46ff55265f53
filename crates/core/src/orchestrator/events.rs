//! # Update Events
//!
//! Wire-level update events, one per state transition. Events are flat JSON
//! objects with a snake_case `type` discriminator and camelCase fields, each
//! carrying a preformatted human-readable `message` and an RFC 3339 timestamp.
//! Consumers treat ids as stable upsert keys; [`EventLog`] validates every
//! event against the status fold before recording and publishing it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::orchestrator::status::{ProjectStatus, RunState, Status};

/// Overall run state changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUpdate {
    pub status: RunState,
    pub progress: u8,
    pub details: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProjectUpdate {
    pub fn new(status: RunState, progress: u8, details: Option<String>) -> Self {
        Self {
            message: format!("Project generation: {} - {}%", status, progress),
            timestamp: Utc::now(),
            status,
            progress,
            details,
        }
    }
}

/// An iteration opened, advanced, or closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationUpdate {
    pub iteration_id: String,
    pub iteration_number: u32,
    pub status: Status,
    pub progress: u8,
    pub details: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl IterationUpdate {
    pub fn new(
        iteration_id: &str,
        iteration_number: u32,
        status: Status,
        progress: u8,
        details: Option<String>,
    ) -> Self {
        Self {
            iteration_id: iteration_id.to_string(),
            message: format!("Iteration {}: {} - {}%", iteration_number, status, progress),
            timestamp: Utc::now(),
            iteration_number,
            status,
            progress,
            details,
        }
    }
}

/// An agent opened, advanced, or closed within an iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentUpdate {
    pub iteration_id: String,
    pub agent_id: String,
    pub agent_name: String,
    pub status: Status,
    pub progress: u8,
    pub details: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl AgentUpdate {
    pub fn new(
        iteration_id: &str,
        agent_id: &str,
        agent_name: &str,
        status: Status,
        progress: u8,
        details: Option<String>,
    ) -> Self {
        Self {
            iteration_id: iteration_id.to_string(),
            agent_id: agent_id.to_string(),
            agent_name: agent_name.to_string(),
            message: format!("Agent {}: {} - {}%", agent_name, status, progress),
            timestamp: Utc::now(),
            status,
            progress,
            details,
        }
    }
}

/// A tool call moved through its lifecycle. Tool calls are atomic, so there is
/// no progress field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallUpdate {
    pub iteration_id: String,
    pub agent_id: String,
    pub tool_id: String,
    pub tool_name: String,
    pub status: Status,
    pub details: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ToolCallUpdate {
    pub fn new(
        iteration_id: &str,
        agent_id: &str,
        tool_id: &str,
        tool_name: &str,
        status: Status,
        details: Option<String>,
    ) -> Self {
        Self {
            iteration_id: iteration_id.to_string(),
            agent_id: agent_id.to_string(),
            tool_id: tool_id.to_string(),
            tool_name: tool_name.to_string(),
            message: format!("Tool {}: {}", tool_name, status),
            timestamp: Utc::now(),
            status,
            details,
        }
    }
}

/// One update event, tagged on the wire by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdateEvent {
    /// Overall run state / blended progress.
    ProjectUpdate(ProjectUpdate),
    /// Iteration-level snapshot.
    IterationUpdate(IterationUpdate),
    /// Agent-level snapshot.
    AgentUpdate(AgentUpdate),
    /// Tool-call-level snapshot.
    ToolCall(ToolCallUpdate),
}

impl From<ProjectUpdate> for UpdateEvent {
    fn from(up: ProjectUpdate) -> Self {
        Self::ProjectUpdate(up)
    }
}

impl From<IterationUpdate> for UpdateEvent {
    fn from(up: IterationUpdate) -> Self {
        Self::IterationUpdate(up)
    }
}

impl From<AgentUpdate> for UpdateEvent {
    fn from(up: AgentUpdate) -> Self {
        Self::AgentUpdate(up)
    }
}

impl From<ToolCallUpdate> for UpdateEvent {
    fn from(up: ToolCallUpdate) -> Self {
        Self::ToolCall(up)
    }
}

/// Canonical ordered record of a run's events.
///
/// Owns the status fold so every event is validated exactly once, in emission
/// order, before it becomes visible anywhere. Publishing to the optional
/// channel is best-effort: a dropped or slow subscriber never fails the run.
#[derive(Debug)]
pub struct EventLog {
    status: ProjectStatus,
    events: Vec<UpdateEvent>,
    tx: Option<mpsc::Sender<UpdateEvent>>,
}

impl EventLog {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            status: ProjectStatus::new(max_iterations),
            events: Vec::new(),
            tx: None,
        }
    }

    /// Attach a subscriber channel.
    pub fn with_channel(mut self, tx: mpsc::Sender<UpdateEvent>) -> Self {
        self.tx = Some(tx);
        self
    }

    /// Validate, record, and publish one event.
    pub async fn emit(&mut self, event: UpdateEvent) -> Result<()> {
        self.status.apply(&event)?;
        self.events.push(event.clone());
        if let Some(tx) = &self.tx {
            let _ = tx.send(event).await;
        }
        Ok(())
    }

    pub fn status(&self) -> &ProjectStatus {
        &self.status
    }

    pub fn events(&self) -> &[UpdateEvent] {
        &self.events
    }
}

/// Generate a simple UUID-shaped id (not cryptographic).
pub(crate) fn uuid_v4() -> String {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos();
    format!("{:x}-{:x}", nanos, rand_u32())
}

fn rand_u32() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iteration_event_wire_shape() {
        let event: UpdateEvent =
            IterationUpdate::new("it-1", 1, Status::InProgress, 0, Some("Starting iteration 1".into()))
                .into();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "iteration_update");
        assert_eq!(json["iterationId"], "it-1");
        assert_eq!(json["iterationNumber"], 1);
        assert_eq!(json["status"], "in_progress");
        assert_eq!(json["progress"], 0);
        assert_eq!(json["message"], "Iteration 1: in_progress - 0%");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_tool_call_wire_shape_has_no_progress() {
        let event: UpdateEvent =
            ToolCallUpdate::new("it-1", "ag-1", "ag-1-tool-2", "generate_code", Status::Completed, None)
                .into();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "tool_call");
        assert_eq!(json["toolId"], "ag-1-tool-2");
        assert_eq!(json["toolName"], "generate_code");
        assert_eq!(json["message"], "Tool generate_code: completed");
        assert!(json.get("progress").is_none());
    }

    #[test]
    fn test_agent_event_message_format() {
        let event = AgentUpdate::new("it-1", "ag-1", "Review Agent", Status::Completed, 100, None);
        assert_eq!(event.message, "Agent Review Agent: completed - 100%");
    }

    #[test]
    fn test_project_event_roundtrip() {
        let event: UpdateEvent = ProjectUpdate::new(RunState::Exhausted, 100, None).into();
        let json = serde_json::to_string(&event).unwrap();
        let back: UpdateEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }

    #[tokio::test]
    async fn test_event_log_records_and_publishes() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut log = EventLog::new(2).with_channel(tx);
        log.emit(ProjectUpdate::new(RunState::Running, 0, None).into())
            .await
            .unwrap();

        assert_eq!(log.events().len(), 1);
        assert_eq!(log.status().state, RunState::Running);
        let received = rx.recv().await.unwrap();
        assert_eq!(&received, &log.events()[0]);
    }

    #[tokio::test]
    async fn test_event_log_rejects_without_recording() {
        let mut log = EventLog::new(2);
        let bogus = IterationUpdate::new("it-9", 9, Status::InProgress, 0, None).into();
        assert!(log.emit(bogus).await.is_err());
        assert!(log.events().is_empty());
    }

    #[test]
    fn test_uuid_v4_uniqueness() {
        assert_ne!(uuid_v4(), uuid_v4());
    }
}
