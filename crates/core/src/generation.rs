//! # Generation Boundary
//!
//! The external generation service (the thing that actually produces schema,
//! code, tests, and review findings) is an opaque collaborator behind
//! [`GenerationClient`]. It may be slow and it may fail; transient failures
//! are retried by the agent runner, fatal ones escalate.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifacts::Artifact;
use crate::orchestrator::feedback::{FeedbackSet, Issue};

/// Fixed agent roles in invocation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Schema,
    Implementation,
    TestGeneration,
    Review,
}

impl AgentKind {
    /// Observer-facing agent name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Schema => "Schema Agent",
            Self::Implementation => "Code Generation Agent",
            Self::TestGeneration => "Test Generation Agent",
            Self::Review => "Review Agent",
        }
    }

    /// Short task phrase used in detail texts.
    pub fn task(&self) -> &'static str {
        match self {
            Self::Schema => "schema design",
            Self::Implementation => "code generation",
            Self::TestGeneration => "test generation",
            Self::Review => "review",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Opaque handle returned by project initiation: where a run's output goes
/// and how it is addressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectBrief {
    pub project_id: String,
    pub name: String,
    pub description: String,
    /// Opaque to the engine; stores interpret it.
    pub directory: String,
}

impl ProjectBrief {
    pub fn new(project_id: &str, name: &str, description: &str, directory: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            directory: directory.to_string(),
        }
    }
}

/// Everything one generation call gets to see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub agent: AgentKind,
    /// 1-based iteration this call belongs to.
    pub iteration: u32,
    pub project_description: String,
    /// Role-specific instructions composed by the calling agent.
    pub instructions: String,
    /// Artifacts visible to this call: the previous iteration's output plus
    /// anything earlier agents produced this iteration.
    pub artifacts: Vec<Artifact>,
    /// Feedback from the previous iteration (empty on the first).
    pub feedback: FeedbackSet,
}

/// What one generation call produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub artifacts: Vec<Artifact>,
    pub issues: Vec<Issue>,
    pub summary: Option<String>,
    pub suggestions: Vec<String>,
}

/// Why a generation call failed. Transient failures are worth retrying with
/// the same input; the rest are not.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    #[error("generation service unavailable: {0}")]
    Unavailable(String),

    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("generation request rejected: {0}")]
    Rejected(String),

    #[error("malformed generation output: {0}")]
    Malformed(String),
}

impl GenerationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

/// The generation service seam. Implementations decide how artifacts actually
/// get produced; the engine only sequences and tracks the calls.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn invoke(&self, request: GenerationRequest) -> Result<GenerationOutput, GenerationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_kind_names() {
        assert_eq!(AgentKind::Schema.display_name(), "Schema Agent");
        assert_eq!(AgentKind::Implementation.display_name(), "Code Generation Agent");
        assert_eq!(AgentKind::TestGeneration.display_name(), "Test Generation Agent");
        assert_eq!(AgentKind::Review.display_name(), "Review Agent");
    }

    #[test]
    fn test_agent_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&AgentKind::TestGeneration).unwrap(),
            "\"test_generation\""
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(GenerationError::Unavailable("503".into()).is_transient());
        assert!(GenerationError::Timeout(Duration::from_secs(30)).is_transient());
        assert!(!GenerationError::Rejected("bad request".into()).is_transient());
        assert!(!GenerationError::Malformed("not json".into()).is_transient());
    }
}
