//! # Review Agent
//!
//! Last role in the iteration: inspects everything the earlier roles
//! produced and turns problems into structured feedback. The review writes
//! no artifacts; its issues decide whether another iteration runs.

use async_trait::async_trait;

use crate::agents::{Agent, AgentOutput};
use crate::error::AgentFailure;
use crate::generation::{AgentKind, GenerationOutput};
use crate::orchestrator::runner::AgentCx;

const INSTRUCTIONS: &str = "Review the project artifacts as a whole: correctness, \
security, performance, and agreement between schema, code, and tests. Report every \
problem as an issue with a severity and, where possible, a target artifact and a \
concrete recommendation. An empty issue list means the project is acceptable.";

/// Judges the iteration's output and produces the feedback for the next one.
#[derive(Debug, Default)]
pub struct ReviewAgent;

impl ReviewAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for ReviewAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Review
    }

    fn planned_tool_calls(&self) -> Option<usize> {
        Some(2)
    }

    async fn execute(&self, cx: &mut AgentCx<'_>) -> Result<AgentOutput, AgentFailure> {
        cx.read_artifacts("read_artifacts").await?;
        let GenerationOutput {
            artifacts: _,
            issues,
            summary,
            suggestions,
        } = cx.generate("generate_review", INSTRUCTIONS).await?;
        Ok(AgentOutput {
            issues,
            summary,
            suggestions,
        })
    }
}
