//! # Orchestration
//!
//! Runs a project from brief to terminal state and keeps observers
//! informed along the way.
//!
//! ## Run Flow
//!
//! ```text
//! Orchestrator → IterationController → AgentRunner → tool calls
//!      │                │                   │            │
//!      └── project ─────┴── iteration ──────┴── agent ───┴── tool   (status tree)
//! ```
//!
//! Every level reports through the same [`EventLog`]: updates are validated
//! against the status tree, recorded in order, and optionally streamed to a
//! channel. Replaying the recorded events rebuilds the final tree exactly.

pub mod controller;
pub mod events;
pub mod feedback;
pub mod iteration;
pub mod runner;
pub mod status;
pub mod tracker;

#[cfg(test)]
pub(crate) mod support;

pub use controller::{Orchestrator, OrchestratorConfig, RunOutcome};
pub use events::{
    AgentUpdate, EventLog, IterationUpdate, ProjectUpdate, ToolCallUpdate, UpdateEvent,
};
pub use feedback::{
    AcceptancePolicy, FeedbackAccumulator, FeedbackSet, Issue, IssueCategory, NoBlockingIssues,
    Severity,
};
pub use iteration::{IterationController, IterationResult};
pub use runner::{AgentCx, AgentRunResult, AgentRunner, RunnerEnv};
pub use status::{
    AgentState, IterationState, ProjectStatus, RunState, Status, ToolCallState,
};
pub use tracker::{ToolCallId, ToolCallTracker};
