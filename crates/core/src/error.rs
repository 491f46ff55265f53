//! Failure taxonomy for the orchestration engine.
//!
//! Failures escalate level by level: a [`ToolCallFailure`] is retried inside the
//! agent runner, an [`AgentFailure`] fails the current iteration, and an
//! [`IterationFailure`] ends the run. [`CrucibleError`] is reserved for
//! contract violations in the status protocol itself and is never produced by
//! ordinary generation failures.

use thiserror::Error;

/// One tracked operation failed after its retry budget was spent.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("tool call '{tool}' failed after {attempts} attempt(s): {message}")]
pub struct ToolCallFailure {
    /// Name of the operation, e.g. `generate_code`.
    pub tool: String,
    /// Total attempts made, including the first.
    pub attempts: u32,
    pub message: String,
}

/// Why an agent could not finish its contribution to an iteration.
///
/// `Internal` is not a domain failure: it tunnels a status-protocol violation
/// out of an agent's execution context so the runner can surface it as a
/// run-level error instead of a failed iteration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentFailure {
    #[error(transparent)]
    ToolCall(#[from] ToolCallFailure),

    #[error("cancelled")]
    Cancelled,

    #[error("status tracking violation: {0}")]
    Internal(#[from] CrucibleError),
}

impl AgentFailure {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// The first agent failure within an iteration, recorded with its position.
///
/// Fatal to the iteration (later agents are skipped) and, under the default
/// policy, to the run as a whole - but it is carried inside `RunOutcome::Failed`
/// rather than surfacing as an `Err`.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("iteration {seq} failed in {agent}")]
pub struct IterationFailure {
    /// 1-based iteration sequence number.
    pub seq: u32,
    /// Display name of the agent that failed.
    pub agent: String,
    #[source]
    pub source: AgentFailure,
}

/// Violations of the status-tracking contract.
///
/// These indicate a bug in the caller (updating an unknown id, moving a
/// terminal entity, decreasing progress) and abort the run instead of being
/// folded into the status tree.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CrucibleError {
    #[error("invalid transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },
}

impl CrucibleError {
    pub fn invalid_transition(
        entity: impl Into<String>,
        from: impl std::fmt::Display,
        to: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidTransition {
            entity: entity.into(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CrucibleError>;
