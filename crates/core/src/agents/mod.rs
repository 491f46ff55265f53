//! # Crucible Agents
//!
//! The specialized roles that make up one refinement iteration. Agents are
//! deliberately thin: each one names its tool calls and delegates retry,
//! timeout, cancellation, and status emission to the runner's [`AgentCx`].
//!
//! ## Architecture
//!
//! ```text
//! IterationController
//!     └── AgentRunner            (opens/closes the agent in the status tree)
//!           └── Agent::execute   (role logic, declarative tool calls)
//!                 └── AgentCx    (generate / read / persist, all tracked)
//! ```
//!
//! The standard roster runs Schema -> Implementation -> TestGeneration ->
//! Review, in that order, every iteration.

use async_trait::async_trait;

use crate::error::AgentFailure;
use crate::generation::AgentKind;
use crate::orchestrator::feedback::Issue;
use crate::orchestrator::runner::AgentCx;

// Roster roles
pub mod implementation_agent;
pub mod review_agent;
pub mod schema_agent;
pub mod test_generation_agent;

pub use implementation_agent::ImplementationAgent;
pub use review_agent::ReviewAgent;
pub use schema_agent::SchemaAgent;
pub use test_generation_agent::TestGenerationAgent;

/// What an agent hands back on success. Artifacts are not part of this:
/// they flow through [`AgentCx::persist_artifacts`] as they are written.
#[derive(Debug, Clone, Default)]
pub struct AgentOutput {
    /// Problems found in the current state of the project.
    pub issues: Vec<Issue>,
    /// One-line assessment, if the agent has one.
    pub summary: Option<String>,
    /// Improvement ideas that are not blocking problems.
    pub suggestions: Vec<String>,
}

/// One role in the iteration sequence.
#[async_trait]
pub trait Agent: Send + Sync {
    fn kind(&self) -> AgentKind;

    /// Display name used in status updates.
    fn name(&self) -> &'static str {
        self.kind().display_name()
    }

    /// How many tool calls this agent makes when nothing goes wrong. The
    /// runner derives the agent's progress from this. `None` opts out of
    /// derivation; the agent then reports through
    /// [`AgentCx::report_progress`].
    fn planned_tool_calls(&self) -> Option<usize>;

    async fn execute(&self, cx: &mut AgentCx<'_>) -> Result<AgentOutput, AgentFailure>;
}

/// The standard roster in invocation order.
pub fn default_roster() -> Vec<Box<dyn Agent>> {
    vec![
        Box::new(SchemaAgent::new()),
        Box::new(ImplementationAgent::new()),
        Box::new(TestGenerationAgent::new()),
        Box::new(ReviewAgent::new()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roster_order() {
        let roster = default_roster();
        let kinds: Vec<_> = roster.iter().map(|a| a.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                AgentKind::Schema,
                AgentKind::Implementation,
                AgentKind::TestGeneration,
                AgentKind::Review,
            ]
        );
    }

    #[test]
    fn test_roster_names_match_kinds() {
        for agent in default_roster() {
            assert_eq!(agent.name(), agent.kind().display_name());
        }
    }
}
