//! # Implementation Agent
//!
//! Second role in the iteration: turns the schema and the accumulated
//! feedback into application code.

use async_trait::async_trait;

use crate::agents::{Agent, AgentOutput};
use crate::error::AgentFailure;
use crate::generation::{AgentKind, GenerationOutput};
use crate::orchestrator::runner::AgentCx;

const INSTRUCTIONS: &str = "Implement the application code on top of the current schema \
artifacts. Address every feedback item aimed at the implementation before adding \
anything new, and keep the code consistent with the schema.";

/// Writes the application code for the current schema.
#[derive(Debug, Default)]
pub struct ImplementationAgent;

impl ImplementationAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for ImplementationAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Implementation
    }

    fn planned_tool_calls(&self) -> Option<usize> {
        Some(3)
    }

    async fn execute(&self, cx: &mut AgentCx<'_>) -> Result<AgentOutput, AgentFailure> {
        cx.read_artifacts("read_artifacts").await?;
        let GenerationOutput {
            artifacts,
            issues,
            summary,
            suggestions,
        } = cx.generate("generate_code", INSTRUCTIONS).await?;
        cx.persist_artifacts("write_artifacts", artifacts).await?;
        Ok(AgentOutput {
            issues,
            summary,
            suggestions,
        })
    }
}
