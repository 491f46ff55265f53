//! # Status Tree
//!
//! The nested progress hierarchy observers see: iteration → agent → tool call,
//! plus the overall run state. The tree is never mutated directly by the
//! control loop; every change arrives as an [`UpdateEvent`] folded in through
//! [`ProjectStatus::apply`], so the live tree and a replay of the event stream
//! are always identical.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CrucibleError, Result};
use crate::orchestrator::events::UpdateEvent;

/// Lifecycle status of a tool call, agent, or iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::InProgress => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    /// Whether an entity currently in `self` may report `next`.
    ///
    /// Forward moves (including skips) and re-announcing the current
    /// non-terminal status are allowed; backward moves are not, and terminal
    /// entities are frozen.
    pub fn can_become(&self, next: Status) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

/// Overall state of one project run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// No iteration has started yet.
    Idle,
    /// The iteration loop is underway.
    Running,
    /// The acceptance policy was satisfied.
    Completed,
    /// An iteration failed unrecoverably (or the run was cancelled).
    Failed,
    /// The iteration budget ran out before acceptance; the artifacts produced
    /// so far are still usable.
    Exhausted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Idle | Self::Running)
    }

    pub fn can_become(&self, next: RunState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Running)
                | (Self::Running, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Exhausted)
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Exhausted => "exhausted",
        })
    }
}

/// Snapshot of one tracked tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallState {
    pub tool_id: String,
    pub tool_name: String,
    /// Owning agent, also recoverable from the tree position.
    pub agent_id: String,
    pub status: Status,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Snapshot of one agent within an iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub agent_id: String,
    pub agent_name: String,
    pub status: Status,
    pub progress: u8,
    pub details: Option<String>,
    /// Insertion order is invocation order.
    pub tool_calls: Vec<ToolCallState>,
}

impl AgentState {
    pub fn tool_call(&self, tool_id: &str) -> Option<&ToolCallState> {
        self.tool_calls.iter().find(|t| t.tool_id == tool_id)
    }
}

/// Snapshot of one refinement iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationState {
    pub iteration_id: String,
    /// 1-based, contiguous across the run.
    pub iteration_number: u32,
    pub status: Status,
    pub progress: u8,
    pub details: Option<String>,
    pub agents: Vec<AgentState>,
}

impl IterationState {
    pub fn agent(&self, agent_id: &str) -> Option<&AgentState> {
        self.agents.iter().find(|a| a.agent_id == agent_id)
    }
}

/// The full status tree for one project run.
///
/// A pure fold over the run's event stream: `apply` validates each event
/// against the transition rules, then upserts the addressed entity by its
/// stable id. Replaying the same events into a fresh tree reproduces this one
/// exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStatus {
    pub state: RunState,
    pub progress: u8,
    pub max_iterations: u32,
    pub iterations: Vec<IterationState>,
}

impl ProjectStatus {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            state: RunState::Idle,
            progress: 0,
            max_iterations,
            iterations: Vec::new(),
        }
    }

    pub fn iteration(&self, iteration_id: &str) -> Option<&IterationState> {
        self.iterations.iter().find(|i| i.iteration_id == iteration_id)
    }

    pub fn current_iteration(&self) -> Option<&IterationState> {
        self.iterations.last()
    }

    /// Blended overall progress: terminal iterations count in full, the
    /// in-flight iteration contributes its own progress. Monotonic as long as
    /// per-iteration progress is.
    pub fn overall_progress(&self) -> u8 {
        if self.max_iterations == 0 {
            return 0;
        }
        let terminal = self
            .iterations
            .iter()
            .filter(|i| i.status.is_terminal())
            .count() as u32;
        let in_flight: u32 = self
            .iterations
            .iter()
            .filter(|i| !i.status.is_terminal())
            .map(|i| i.progress as u32)
            .sum();
        (((terminal * 100 + in_flight) / self.max_iterations).min(100)) as u8
    }

    /// Fold one event into the tree.
    ///
    /// Upsert semantics: an event for an unseen id inserts a new entity, a
    /// repeated id replaces that entity's status/progress snapshot (an absent
    /// detail text leaves the previous detail in place). Invalid transitions -
    /// backward moves, updates to terminal entities, decreasing progress,
    /// children of unstarted or terminal parents, out-of-order inserts - are
    /// rejected without mutating the tree.
    pub fn apply(&mut self, event: &UpdateEvent) -> Result<()> {
        match event {
            UpdateEvent::ProjectUpdate(up) => {
                if !self.state.can_become(up.status) {
                    return Err(CrucibleError::invalid_transition(
                        "project",
                        self.state,
                        up.status,
                    ));
                }
                if up.progress < self.progress {
                    return Err(CrucibleError::invalid_transition(
                        "project progress",
                        self.progress,
                        up.progress,
                    ));
                }
                self.state = up.status;
                self.progress = up.progress;
                Ok(())
            }
            UpdateEvent::IterationUpdate(up) => {
                match self
                    .iterations
                    .iter_mut()
                    .find(|i| i.iteration_id == up.iteration_id)
                {
                    Some(existing) => {
                        let entity = format!("iteration {}", existing.iteration_number);
                        check_move(&entity, existing.status, existing.progress, up.status, up.progress)?;
                        if up.status == Status::Completed
                            && existing.agents.iter().any(|a| !a.status.is_terminal())
                        {
                            return Err(CrucibleError::invalid_transition(
                                entity,
                                existing.status,
                                "completed with a non-terminal agent",
                            ));
                        }
                        existing.status = up.status;
                        existing.progress = up.progress;
                        if up.details.is_some() {
                            existing.details = up.details.clone();
                        }
                        Ok(())
                    }
                    None => {
                        let expected = self.iterations.len() as u32 + 1;
                        if up.iteration_number != expected {
                            return Err(CrucibleError::invalid_transition(
                                format!("iteration {}", up.iteration_number),
                                format!("expected sequence {}", expected),
                                up.iteration_number,
                            ));
                        }
                        if let Some(prev) = self.iterations.last() {
                            if !prev.status.is_terminal() {
                                return Err(CrucibleError::invalid_transition(
                                    format!("iteration {}", up.iteration_number),
                                    format!("iteration {} still open", prev.iteration_number),
                                    up.status,
                                ));
                            }
                        }
                        self.iterations.push(IterationState {
                            iteration_id: up.iteration_id.clone(),
                            iteration_number: up.iteration_number,
                            status: up.status,
                            progress: up.progress,
                            details: up.details.clone(),
                            agents: Vec::new(),
                        });
                        Ok(())
                    }
                }
            }
            UpdateEvent::AgentUpdate(up) => {
                let iteration = self
                    .iterations
                    .iter_mut()
                    .find(|i| i.iteration_id == up.iteration_id)
                    .ok_or_else(|| {
                        CrucibleError::invalid_transition(
                            format!("agent {}", up.agent_id),
                            "unknown iteration",
                            up.status,
                        )
                    })?;
                if iteration.status != Status::InProgress {
                    return Err(CrucibleError::invalid_transition(
                        format!("iteration {}", iteration.iteration_number),
                        iteration.status,
                        format!("agent update while {}", iteration.status),
                    ));
                }
                match iteration.agents.iter_mut().find(|a| a.agent_id == up.agent_id) {
                    Some(existing) => {
                        let entity = format!("agent {}", existing.agent_id);
                        check_move(&entity, existing.status, existing.progress, up.status, up.progress)?;
                        if up.status == Status::Completed
                            && existing.tool_calls.iter().any(|t| !t.status.is_terminal())
                        {
                            return Err(CrucibleError::invalid_transition(
                                entity,
                                existing.status,
                                "completed with a non-terminal tool call",
                            ));
                        }
                        existing.status = up.status;
                        existing.progress = up.progress;
                        if up.details.is_some() {
                            existing.details = up.details.clone();
                        }
                        Ok(())
                    }
                    None => {
                        if let Some(prev) = iteration.agents.last() {
                            if !prev.status.is_terminal() {
                                return Err(CrucibleError::invalid_transition(
                                    format!("agent {}", up.agent_id),
                                    format!("agent {} still open", prev.agent_id),
                                    up.status,
                                ));
                            }
                        }
                        iteration.agents.push(AgentState {
                            agent_id: up.agent_id.clone(),
                            agent_name: up.agent_name.clone(),
                            status: up.status,
                            progress: up.progress,
                            details: up.details.clone(),
                            tool_calls: Vec::new(),
                        });
                        Ok(())
                    }
                }
            }
            UpdateEvent::ToolCall(up) => {
                let iteration = self
                    .iterations
                    .iter_mut()
                    .find(|i| i.iteration_id == up.iteration_id)
                    .ok_or_else(|| {
                        CrucibleError::invalid_transition(
                            format!("tool {}", up.tool_id),
                            "unknown iteration",
                            up.status,
                        )
                    })?;
                let agent = iteration
                    .agents
                    .iter_mut()
                    .find(|a| a.agent_id == up.agent_id)
                    .ok_or_else(|| {
                        CrucibleError::invalid_transition(
                            format!("tool {}", up.tool_id),
                            "unknown agent",
                            up.status,
                        )
                    })?;
                if agent.status != Status::InProgress {
                    return Err(CrucibleError::invalid_transition(
                        format!("agent {}", agent.agent_id),
                        agent.status,
                        format!("tool call while {}", agent.status),
                    ));
                }
                match agent.tool_calls.iter_mut().find(|t| t.tool_id == up.tool_id) {
                    Some(existing) => {
                        let entity = format!("tool {}", existing.tool_id);
                        if !existing.status.can_become(up.status) {
                            return Err(CrucibleError::invalid_transition(
                                entity,
                                existing.status,
                                up.status,
                            ));
                        }
                        existing.status = up.status;
                        if up.details.is_some() {
                            existing.details = up.details.clone();
                        }
                        Ok(())
                    }
                    None => {
                        if let Some(prev) = agent.tool_calls.last() {
                            if !prev.status.is_terminal() {
                                return Err(CrucibleError::invalid_transition(
                                    format!("tool {}", up.tool_id),
                                    format!("tool {} still open", prev.tool_id),
                                    up.status,
                                ));
                            }
                        }
                        agent.tool_calls.push(ToolCallState {
                            tool_id: up.tool_id.clone(),
                            tool_name: up.tool_name.clone(),
                            agent_id: up.agent_id.clone(),
                            status: up.status,
                            details: up.details.clone(),
                            created_at: up.timestamp,
                        });
                        Ok(())
                    }
                }
            }
        }
    }

    /// Structural self-check used by replay tests: returns the first violated
    /// rule, if any.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        for (idx, iteration) in self.iterations.iter().enumerate() {
            let expected = idx as u32 + 1;
            if iteration.iteration_number != expected {
                return Err(format!(
                    "iteration at position {} has sequence {}",
                    idx, iteration.iteration_number
                ));
            }
            if iteration.progress > 100 {
                return Err(format!("iteration {} progress > 100", expected));
            }
            if iteration.status == Status::Completed
                && iteration.agents.iter().any(|a| !a.status.is_terminal())
            {
                return Err(format!(
                    "iteration {} completed with a non-terminal agent",
                    expected
                ));
            }
            let mut agent_ids = std::collections::HashSet::new();
            for agent in &iteration.agents {
                if !agent_ids.insert(&agent.agent_id) {
                    return Err(format!("duplicate agent id {}", agent.agent_id));
                }
                if agent.progress > 100 {
                    return Err(format!("agent {} progress > 100", agent.agent_id));
                }
                if agent.status == Status::Completed
                    && agent.tool_calls.iter().any(|t| !t.status.is_terminal())
                {
                    return Err(format!(
                        "agent {} completed with a non-terminal tool call",
                        agent.agent_id
                    ));
                }
                let mut tool_ids = std::collections::HashSet::new();
                for tool in &agent.tool_calls {
                    if !tool_ids.insert(&tool.tool_id) {
                        return Err(format!("duplicate tool id {}", tool.tool_id));
                    }
                }
            }
        }
        Ok(())
    }
}

fn check_move(entity: &str, current: Status, current_progress: u8, next: Status, next_progress: u8) -> Result<()> {
    if !current.can_become(next) {
        return Err(CrucibleError::invalid_transition(entity, current, next));
    }
    if next_progress < current_progress {
        return Err(CrucibleError::invalid_transition(
            format!("{} progress", entity),
            current_progress,
            next_progress,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::events::{AgentUpdate, IterationUpdate, ProjectUpdate, ToolCallUpdate};

    fn valid_stream() -> Vec<UpdateEvent> {
        vec![
            ProjectUpdate::new(RunState::Running, 0, Some("Starting project generation".into()))
                .into(),
            IterationUpdate::new("it-1", 1, Status::InProgress, 0, Some("Starting iteration 1".into()))
                .into(),
            AgentUpdate::new("it-1", "ag-1", "Schema Agent", Status::InProgress, 0, None).into(),
            ToolCallUpdate::new("it-1", "ag-1", "ag-1-tool-1", "generate_schema", Status::InProgress, None)
                .into(),
            ToolCallUpdate::new("it-1", "ag-1", "ag-1-tool-1", "generate_schema", Status::Completed, None)
                .into(),
            AgentUpdate::new("it-1", "ag-1", "Schema Agent", Status::InProgress, 50, None).into(),
            ToolCallUpdate::new("it-1", "ag-1", "ag-1-tool-2", "write_artifacts", Status::InProgress, None)
                .into(),
            ToolCallUpdate::new("it-1", "ag-1", "ag-1-tool-2", "write_artifacts", Status::Completed, None)
                .into(),
            AgentUpdate::new("it-1", "ag-1", "Schema Agent", Status::Completed, 100, None).into(),
            IterationUpdate::new("it-1", 1, Status::Completed, 100, None).into(),
            ProjectUpdate::new(RunState::Completed, 100, None).into(),
        ]
    }

    fn fold(events: &[UpdateEvent]) -> ProjectStatus {
        let mut status = ProjectStatus::new(1);
        for event in events {
            status.apply(event).unwrap();
        }
        status
    }

    #[test]
    fn test_status_transition_rules() {
        assert!(Status::Pending.can_become(Status::InProgress));
        assert!(Status::Pending.can_become(Status::Completed));
        assert!(Status::InProgress.can_become(Status::InProgress));
        assert!(Status::InProgress.can_become(Status::Failed));
        assert!(!Status::InProgress.can_become(Status::Pending));
        assert!(!Status::Completed.can_become(Status::Failed));
        assert!(!Status::Failed.can_become(Status::InProgress));
    }

    #[test]
    fn test_run_state_transition_rules() {
        assert!(RunState::Idle.can_become(RunState::Running));
        assert!(RunState::Running.can_become(RunState::Running));
        assert!(RunState::Running.can_become(RunState::Exhausted));
        assert!(!RunState::Idle.can_become(RunState::Completed));
        assert!(!RunState::Completed.can_become(RunState::Running));
        assert!(!RunState::Exhausted.can_become(RunState::Failed));
    }

    #[test]
    fn test_apply_builds_tree() {
        let status = fold(&valid_stream());
        assert_eq!(status.state, RunState::Completed);
        assert_eq!(status.progress, 100);
        assert_eq!(status.iterations.len(), 1);

        let iteration = &status.iterations[0];
        assert_eq!(iteration.status, Status::Completed);
        let agent = iteration.agent("ag-1").unwrap();
        assert_eq!(agent.status, Status::Completed);
        assert_eq!(agent.progress, 100);
        assert_eq!(agent.tool_calls.len(), 2);
        assert_eq!(agent.tool_call("ag-1-tool-1").unwrap().status, Status::Completed);
    }

    #[test]
    fn test_upsert_replaces_instead_of_appending() {
        let mut status = ProjectStatus::new(1);
        status
            .apply(&IterationUpdate::new("it-1", 1, Status::InProgress, 0, Some("a".into())).into())
            .unwrap();
        status
            .apply(&IterationUpdate::new("it-1", 1, Status::InProgress, 40, None).into())
            .unwrap();
        assert_eq!(status.iterations.len(), 1);
        assert_eq!(status.iterations[0].progress, 40);
        // An absent detail keeps the previous one.
        assert_eq!(status.iterations[0].details.as_deref(), Some("a"));
    }

    #[test]
    fn test_apply_rejects_backward_and_terminal_moves() {
        let mut status = fold(&valid_stream());
        let backward =
            IterationUpdate::new("it-1", 1, Status::InProgress, 100, None).into();
        assert!(status.apply(&backward).is_err());

        let resurrect =
            ToolCallUpdate::new("it-1", "ag-1", "ag-1-tool-1", "generate_schema", Status::Failed, None)
                .into();
        assert!(status.apply(&resurrect).is_err());
    }

    #[test]
    fn test_apply_rejects_progress_decrease() {
        let mut status = ProjectStatus::new(1);
        status
            .apply(&IterationUpdate::new("it-1", 1, Status::InProgress, 60, None).into())
            .unwrap();
        let decrease = IterationUpdate::new("it-1", 1, Status::InProgress, 30, None).into();
        assert!(status.apply(&decrease).is_err());
    }

    #[test]
    fn test_apply_requires_contiguous_iteration_numbers() {
        let mut status = ProjectStatus::new(3);
        let skip = IterationUpdate::new("it-2", 2, Status::InProgress, 0, None).into();
        assert!(status.apply(&skip).is_err());
        status
            .apply(&IterationUpdate::new("it-1", 1, Status::InProgress, 0, None).into())
            .unwrap();
        // Second iteration cannot open while the first is still in flight.
        let overlap = IterationUpdate::new("it-2", 2, Status::InProgress, 0, None).into();
        assert!(status.apply(&overlap).is_err());
    }

    #[test]
    fn test_apply_rejects_completed_parent_with_open_child() {
        let mut status = ProjectStatus::new(1);
        status
            .apply(&IterationUpdate::new("it-1", 1, Status::InProgress, 0, None).into())
            .unwrap();
        status
            .apply(&AgentUpdate::new("it-1", "ag-1", "Schema Agent", Status::InProgress, 0, None).into())
            .unwrap();
        status
            .apply(
                &ToolCallUpdate::new("it-1", "ag-1", "ag-1-tool-1", "generate_schema", Status::InProgress, None)
                    .into(),
            )
            .unwrap();

        let agent_done =
            AgentUpdate::new("it-1", "ag-1", "Schema Agent", Status::Completed, 100, None).into();
        assert!(status.apply(&agent_done).is_err());

        let iteration_done = IterationUpdate::new("it-1", 1, Status::Completed, 100, None).into();
        assert!(status.apply(&iteration_done).is_err());
    }

    #[test]
    fn test_apply_rejects_orphan_children() {
        let mut status = ProjectStatus::new(1);
        let orphan_agent =
            AgentUpdate::new("missing", "ag-1", "Schema Agent", Status::InProgress, 0, None).into();
        assert!(status.apply(&orphan_agent).is_err());

        status
            .apply(&IterationUpdate::new("it-1", 1, Status::InProgress, 0, None).into())
            .unwrap();
        let orphan_tool =
            ToolCallUpdate::new("it-1", "ag-9", "ag-9-tool-1", "generate_schema", Status::InProgress, None)
                .into();
        assert!(status.apply(&orphan_tool).is_err());
    }

    #[test]
    fn test_overall_progress_blend() {
        let mut status = ProjectStatus::new(3);
        assert_eq!(status.overall_progress(), 0);
        status
            .apply(&IterationUpdate::new("it-1", 1, Status::InProgress, 50, None).into())
            .unwrap();
        assert_eq!(status.overall_progress(), 16);
        status
            .apply(&IterationUpdate::new("it-1", 1, Status::Completed, 100, None).into())
            .unwrap();
        assert_eq!(status.overall_progress(), 33);
        status
            .apply(&IterationUpdate::new("it-2", 2, Status::InProgress, 50, None).into())
            .unwrap();
        assert_eq!(status.overall_progress(), 50);
    }

    #[test]
    fn test_replay_reproduces_live_tree() {
        let events = valid_stream();
        let live = fold(&events);
        let replayed = fold(&events);
        assert_eq!(live, replayed);
        assert!(live.check_invariants().is_ok());
    }

    fn xorshift(state: &mut u64) -> u64 {
        let mut x = *state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        *state = x;
        x
    }

    #[test]
    fn test_shuffled_streams_never_break_invariants() {
        let events = valid_stream();
        for seed in 1..=25u64 {
            let mut order: Vec<usize> = (0..events.len()).collect();
            let mut state = seed.wrapping_mul(0x9e3779b97f4a7c15) | 1;
            for i in (1..order.len()).rev() {
                let j = (xorshift(&mut state) as usize) % (i + 1);
                order.swap(i, j);
            }

            let mut status = ProjectStatus::new(1);
            for idx in order {
                // Rejected events must leave the tree untouched; accepted ones
                // must keep it structurally valid.
                let before = status.clone();
                if status.apply(&events[idx]).is_err() {
                    assert_eq!(status, before);
                }
                assert!(status.check_invariants().is_ok());
            }
        }
    }
}
