//! # Schema Agent
//!
//! First role in every iteration: designs the project's data model and
//! persists it as schema artifacts for the later roles to build on.

use async_trait::async_trait;

use crate::agents::{Agent, AgentOutput};
use crate::error::AgentFailure;
use crate::generation::{AgentKind, GenerationOutput};
use crate::orchestrator::runner::AgentCx;

const INSTRUCTIONS: &str = "Design the data model for the project: entities, fields, \
relationships, and constraints. When feedback names schema problems, revise the \
existing schema artifacts instead of starting over.";

/// Designs the project's data model.
#[derive(Debug, Default)]
pub struct SchemaAgent;

impl SchemaAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for SchemaAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Schema
    }

    fn planned_tool_calls(&self) -> Option<usize> {
        Some(2)
    }

    async fn execute(&self, cx: &mut AgentCx<'_>) -> Result<AgentOutput, AgentFailure> {
        let GenerationOutput {
            artifacts,
            issues,
            summary,
            suggestions,
        } = cx.generate("generate_schema", INSTRUCTIONS).await?;
        cx.persist_artifacts("write_artifacts", artifacts).await?;
        Ok(AgentOutput {
            issues,
            summary,
            suggestions,
        })
    }
}
