//! # Orchestrator
//!
//! The run loop. Sequences refinement iterations under a fixed budget,
//! carries feedback from each completed iteration into the next, folds
//! iteration progress into an overall figure, and settles the run in one
//! of three terminal states: accepted, failed, or out of budget.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agents::Agent;
use crate::artifacts::{Artifact, ArtifactStore, MemoryArtifactStore};
use crate::error::{CrucibleError, IterationFailure};
use crate::generation::{GenerationClient, ProjectBrief};
use crate::orchestrator::events::{EventLog, ProjectUpdate, UpdateEvent};
use crate::orchestrator::feedback::{AcceptancePolicy, FeedbackAccumulator, NoBlockingIssues};
use crate::orchestrator::iteration::IterationController;
use crate::orchestrator::runner::RunnerEnv;
use crate::orchestrator::status::{ProjectStatus, RunState};

/// Limits and knobs for one run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Refinement budget. The run never opens more iterations than this.
    pub max_iterations: u32,
    /// Retries per tool call beyond the first attempt.
    pub max_tool_retries: u32,
    /// Optional per-tool-call deadline.
    pub tool_timeout: Option<Duration>,
}

impl OrchestratorConfig {
    /// A budget of at least one iteration is required; zero is clamped.
    pub fn new(max_iterations: u32) -> Self {
        Self {
            max_iterations: max_iterations.max(1),
            max_tool_retries: 2,
            tool_timeout: None,
        }
    }

    pub fn with_max_tool_retries(mut self, retries: u32) -> Self {
        self.max_tool_retries = retries;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }
}

/// How a run ended. Exhausting the budget is a normal outcome, not an
/// error: the best artifacts produced so far are kept either way.
#[derive(Debug)]
pub enum RunOutcome {
    /// The acceptance policy passed within budget.
    Completed {
        iterations_run: u32,
        artifacts: Vec<Artifact>,
    },
    /// An iteration failed and refinement stopped immediately.
    Failed {
        iterations_run: u32,
        failure: IterationFailure,
        artifacts: Vec<Artifact>,
    },
    /// Every budgeted iteration ran without the policy passing.
    Exhausted {
        iterations_run: u32,
        artifacts: Vec<Artifact>,
    },
}

impl RunOutcome {
    pub fn iterations_run(&self) -> u32 {
        match self {
            Self::Completed { iterations_run, .. }
            | Self::Failed { iterations_run, .. }
            | Self::Exhausted { iterations_run, .. } => *iterations_run,
        }
    }

    pub fn artifacts(&self) -> &[Artifact] {
        match self {
            Self::Completed { artifacts, .. }
            | Self::Failed { artifacts, .. }
            | Self::Exhausted { artifacts, .. } => artifacts,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Runs one project from brief to terminal state. One-shot: a second call
/// to [`Orchestrator::run`] is rejected by the status tree.
pub struct Orchestrator {
    brief: ProjectBrief,
    config: OrchestratorConfig,
    controller: IterationController,
    accumulator: FeedbackAccumulator,
    acceptance: Box<dyn AcceptancePolicy>,
    log: EventLog,
    generation: Arc<dyn GenerationClient>,
    store: Arc<dyn ArtifactStore>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        brief: ProjectBrief,
        config: OrchestratorConfig,
        generation: Arc<dyn GenerationClient>,
    ) -> Self {
        let log = EventLog::new(config.max_iterations);
        Self {
            brief,
            config,
            controller: IterationController::new(),
            accumulator: FeedbackAccumulator::new(),
            acceptance: Box::new(NoBlockingIssues::default()),
            log,
            generation,
            store: Arc::new(MemoryArtifactStore::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Persist artifacts somewhere other than memory.
    pub fn with_artifact_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = store;
        self
    }

    /// Stream every accepted update to `tx` as it is applied.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<UpdateEvent>) -> Self {
        self.log = self.log.with_channel(tx);
        self
    }

    pub fn with_acceptance(mut self, policy: Box<dyn AcceptancePolicy>) -> Self {
        self.acceptance = policy;
        self
    }

    /// Drive cancellation from a caller-owned token instead of the run's own.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Replace the standard roster. Order is invocation order.
    pub fn with_agents(mut self, agents: Vec<Box<dyn Agent>>) -> Self {
        self.controller = IterationController::with_agents(agents);
        self
    }

    /// Token observers use to request cancellation. Cancellation is
    /// cooperative: in-flight work notices at the next checkpoint.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> RunState {
        self.log.status().state
    }

    pub fn status(&self) -> &ProjectStatus {
        self.log.status()
    }

    /// Every update applied so far, in emission order.
    pub fn events(&self) -> &[UpdateEvent] {
        self.log.events()
    }

    /// Drive the run to a terminal state. `Err` means the engine broke its
    /// own status protocol, not that the project failed.
    #[tracing::instrument(skip(self), fields(project = %self.brief.project_id))]
    pub async fn run(&mut self) -> Result<RunOutcome, CrucibleError> {
        let env = RunnerEnv {
            generation: self.generation.clone(),
            store: self.store.clone(),
            cancel: self.cancel.clone(),
            max_tool_retries: self.config.max_tool_retries,
            tool_timeout: self.config.tool_timeout,
        };

        let started = ProjectUpdate::new(
            RunState::Running,
            0,
            Some("Starting project generation".to_string()),
        );
        self.log.emit(started.into()).await?;
        tracing::info!(max_iterations = self.config.max_iterations, "run started");

        let mut artifacts: Vec<Artifact> = Vec::new();

        for seq in 1..=self.config.max_iterations {
            let feedback = self.accumulator.context_for(seq);
            let result = self
                .controller
                .run_iteration(
                    &env,
                    &mut self.log,
                    &self.brief,
                    seq,
                    std::mem::take(&mut artifacts),
                    &feedback,
                )
                .await?;
            artifacts = result.artifacts;

            if let Some(failure) = result.failure {
                let update = ProjectUpdate::new(
                    RunState::Failed,
                    self.log.status().progress,
                    Some(format!("Project generation failed: {}", failure)),
                );
                self.log.emit(update.into()).await?;
                tracing::warn!(iterations_run = seq, "run failed: {}", failure);
                return Ok(RunOutcome::Failed {
                    iterations_run: seq,
                    failure,
                    artifacts,
                });
            }

            let accepted = self.acceptance.accept(&result.feedback);
            self.accumulator.accumulate(seq, result.feedback);

            if accepted {
                let update = ProjectUpdate::new(
                    RunState::Completed,
                    100,
                    Some("Project generation completed successfully".to_string()),
                );
                self.log.emit(update.into()).await?;
                tracing::info!(iterations_run = seq, "run completed");
                return Ok(RunOutcome::Completed {
                    iterations_run: seq,
                    artifacts,
                });
            }

            if seq < self.config.max_iterations {
                let overall = self.log.status().overall_progress();
                let update = ProjectUpdate::new(RunState::Running, overall, None);
                self.log.emit(update.into()).await?;
            }
        }

        let update = ProjectUpdate::new(
            RunState::Exhausted,
            self.log.status().overall_progress(),
            Some("Maximum iterations reached".to_string()),
        );
        self.log.emit(update.into()).await?;
        tracing::info!(
            iterations_run = self.config.max_iterations,
            "run exhausted its budget"
        );
        Ok(RunOutcome::Exhausted {
            iterations_run: self.config.max_iterations,
            artifacts,
        })
    }
}
