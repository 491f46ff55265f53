//! # Crucible Core
//!
//! The "Engine" of the Crucible system - iterative multi-agent project
//! generation with live, replayable status tracking.
//!
//! ## Architecture
//!
//! - `agents/` - The specialized roles run each iteration (schema, code,
//!   tests, review)
//! - `artifacts` - Generated files and the stores that persist them
//! - `generation` - The backend boundary: one trait, typed requests and
//!   outputs
//! - `orchestrator/` - The run loop, status tree, event log, and feedback
//!   accumulation
//!
//! ## Usage
//!
//! ```rust,ignore
//! use crucible_core::generation::ProjectBrief;
//! use crucible_core::orchestrator::{Orchestrator, OrchestratorConfig};
//!
//! let brief = ProjectBrief::new("project_1", "Todo App", "A todo app", "out/project_1");
//! let mut orchestrator = Orchestrator::new(brief, OrchestratorConfig::new(3), client);
//! let outcome = orchestrator.run().await?;
//! ```

pub mod agents;
pub mod artifacts;
pub mod error;
pub mod generation;
pub mod orchestrator;
