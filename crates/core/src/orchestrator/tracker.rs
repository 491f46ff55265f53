//! # Tool-Call Tracker
//!
//! Allocates tool-call ids and enforces the per-call lifecycle for one agent.
//! Every accepted transition yields exactly one [`ToolCallUpdate`] for the
//! caller to emit, so the event stream and the tracker can never disagree.

use crate::error::{CrucibleError, Result};
use crate::orchestrator::events::ToolCallUpdate;
use crate::orchestrator::status::Status;

/// Stable identifier of one tracked tool call, `{agent_id}-tool-{n}`.
pub type ToolCallId = String;

#[derive(Debug)]
struct TrackedCall {
    id: ToolCallId,
    name: String,
    status: Status,
}

/// Lifecycle bookkeeping for the tool calls of a single agent run.
#[derive(Debug)]
pub struct ToolCallTracker {
    iteration_id: String,
    agent_id: String,
    calls: Vec<TrackedCall>,
}

impl ToolCallTracker {
    pub fn new(iteration_id: &str, agent_id: &str) -> Self {
        Self {
            iteration_id: iteration_id.to_string(),
            agent_id: agent_id.to_string(),
            calls: Vec::new(),
        }
    }

    /// Register a new call as pending. Creation is silent: the first event
    /// for a call is its in_progress (or terminal) transition.
    pub fn begin(&mut self, name: &str) -> ToolCallId {
        let id = format!("{}-tool-{}", self.agent_id, self.calls.len() + 1);
        self.calls.push(TrackedCall {
            id: id.clone(),
            name: name.to_string(),
            status: Status::Pending,
        });
        id
    }

    /// Report a status for a call. Re-announcing the current non-terminal
    /// status (with fresh detail text) is allowed; backward moves and moves
    /// on terminal calls are not.
    pub fn update(&mut self, id: &str, status: Status, details: Option<String>) -> Result<ToolCallUpdate> {
        self.transition(id, status, details)
    }

    /// Close a call with a terminal status.
    pub fn end(&mut self, id: &str, status: Status, details: Option<String>) -> Result<ToolCallUpdate> {
        if !status.is_terminal() {
            return Err(CrucibleError::invalid_transition(
                format!("tool {}", id),
                status,
                "end requires a terminal status",
            ));
        }
        self.transition(id, status, details)
    }

    fn transition(&mut self, id: &str, status: Status, details: Option<String>) -> Result<ToolCallUpdate> {
        let call = self
            .calls
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| {
                CrucibleError::invalid_transition(format!("tool {}", id), "unknown", status)
            })?;
        if !call.status.can_become(status) {
            return Err(CrucibleError::invalid_transition(
                format!("tool {}", id),
                call.status,
                status,
            ));
        }
        call.status = status;
        Ok(ToolCallUpdate::new(
            &self.iteration_id,
            &self.agent_id,
            &call.id,
            &call.name,
            status,
            details,
        ))
    }

    pub fn total(&self) -> usize {
        self.calls.len()
    }

    pub fn completed_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| c.status == Status::Completed)
            .count()
    }

    pub fn all_terminal(&self) -> bool {
        self.calls.iter().all(|c| c.status.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_allocates_sequential_ids() {
        let mut tracker = ToolCallTracker::new("it-1", "ag-7");
        assert_eq!(tracker.begin("read_artifacts"), "ag-7-tool-1");
        assert_eq!(tracker.begin("generate_code"), "ag-7-tool-2");
        assert_eq!(tracker.total(), 2);
        assert_eq!(tracker.completed_count(), 0);
    }

    #[test]
    fn test_lifecycle_produces_events() {
        let mut tracker = ToolCallTracker::new("it-1", "ag-1");
        let id = tracker.begin("generate_schema");

        let started = tracker
            .update(&id, Status::InProgress, Some("Starting generate_schema".into()))
            .unwrap();
        assert_eq!(started.tool_id, id);
        assert_eq!(started.tool_name, "generate_schema");
        assert_eq!(started.status, Status::InProgress);

        let done = tracker.end(&id, Status::Completed, None).unwrap();
        assert_eq!(done.status, Status::Completed);
        assert_eq!(tracker.completed_count(), 1);
        assert!(tracker.all_terminal());
    }

    #[test]
    fn test_unknown_id_rejected() {
        let mut tracker = ToolCallTracker::new("it-1", "ag-1");
        assert!(tracker.update("ag-1-tool-9", Status::InProgress, None).is_err());
        assert!(tracker.end("ag-1-tool-9", Status::Failed, None).is_err());
    }

    #[test]
    fn test_terminal_calls_are_frozen() {
        let mut tracker = ToolCallTracker::new("it-1", "ag-1");
        let id = tracker.begin("write_artifacts");
        tracker.end(&id, Status::Completed, None).unwrap();

        assert!(tracker.update(&id, Status::InProgress, None).is_err());
        assert!(tracker.end(&id, Status::Failed, None).is_err());
    }

    #[test]
    fn test_end_requires_terminal_status() {
        let mut tracker = ToolCallTracker::new("it-1", "ag-1");
        let id = tracker.begin("generate_code");
        assert!(tracker.end(&id, Status::InProgress, None).is_err());
    }

    #[test]
    fn test_retry_reannounces_in_progress() {
        let mut tracker = ToolCallTracker::new("it-1", "ag-1");
        let id = tracker.begin("generate_code");
        tracker.update(&id, Status::InProgress, None).unwrap();
        let retry = tracker
            .update(&id, Status::InProgress, Some("retrying (attempt 2/3)".into()))
            .unwrap();
        assert_eq!(retry.details.as_deref(), Some("retrying (attempt 2/3)"));
        assert!(!tracker.all_terminal());
    }
}
