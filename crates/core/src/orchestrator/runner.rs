//! # Agent Runner
//!
//! Executes one agent's contribution to one iteration. The runner opens the
//! agent in the status tree, hands the agent an [`AgentCx`] for its tool
//! calls, and closes the agent with a terminal status whatever happens.
//! Retry, timeout, and cancellation handling all live here so agent
//! implementations stay declarative.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::agents::Agent;
use crate::artifacts::{merge_artifacts, Artifact, ArtifactStore};
use crate::error::{AgentFailure, CrucibleError, ToolCallFailure};
use crate::generation::{
    AgentKind, GenerationClient, GenerationError, GenerationOutput, GenerationRequest, ProjectBrief,
};
use crate::orchestrator::events::{uuid_v4, AgentUpdate, EventLog};
use crate::orchestrator::feedback::{FeedbackSet, Issue};
use crate::orchestrator::status::Status;
use crate::orchestrator::tracker::ToolCallTracker;

/// Collaborators and limits shared by every agent run in one project run.
#[derive(Clone)]
pub struct RunnerEnv {
    pub generation: Arc<dyn GenerationClient>,
    pub store: Arc<dyn ArtifactStore>,
    pub cancel: CancellationToken,
    /// Retries per tool call beyond the first attempt.
    pub max_tool_retries: u32,
    /// Optional per-tool-call deadline.
    pub tool_timeout: Option<Duration>,
}

/// What one agent run left behind, success or not.
#[derive(Debug)]
pub struct AgentRunResult {
    pub agent_id: String,
    pub agent_name: String,
    pub status: Status,
    /// Final progress as reported to observers.
    pub progress: u8,
    /// Artifacts persisted before the run ended. Kept on failure too.
    pub artifacts: Vec<Artifact>,
    pub issues: Vec<Issue>,
    pub summary: Option<String>,
    pub suggestions: Vec<String>,
    pub failure: Option<AgentFailure>,
}

impl AgentRunResult {
    pub fn is_success(&self) -> bool {
        self.status == Status::Completed
    }
}

/// Runs agents one at a time within a single iteration.
pub struct AgentRunner<'a> {
    env: &'a RunnerEnv,
    iteration_id: &'a str,
    iteration_number: u32,
    brief: &'a ProjectBrief,
}

impl<'a> AgentRunner<'a> {
    pub fn new(
        env: &'a RunnerEnv,
        iteration_id: &'a str,
        iteration_number: u32,
        brief: &'a ProjectBrief,
    ) -> Self {
        Self {
            env,
            iteration_id,
            iteration_number,
            brief,
        }
    }

    /// Run one agent to a terminal status.
    ///
    /// `artifacts` is everything the agent may see: the previous iteration's
    /// output plus what earlier agents produced this iteration. Domain
    /// failures land in the result; only status-protocol violations are `Err`.
    #[tracing::instrument(skip_all, fields(agent = %agent.kind(), iteration = self.iteration_number))]
    pub async fn run(
        &self,
        agent: &dyn Agent,
        log: &mut EventLog,
        artifacts: &[Artifact],
        feedback: &FeedbackSet,
    ) -> Result<AgentRunResult, CrucibleError> {
        let agent_id = uuid_v4();
        let name = agent.name();
        let kind = agent.kind();

        let started = AgentUpdate::new(
            self.iteration_id,
            &agent_id,
            name,
            Status::InProgress,
            0,
            Some(format!(
                "Setting up {} for iteration {}",
                kind.task(),
                self.iteration_number
            )),
        );
        log.emit(started.into()).await?;

        let mut cx = AgentCx {
            env: self.env,
            log,
            tracker: ToolCallTracker::new(self.iteration_id, &agent_id),
            iteration_id: self.iteration_id,
            iteration_number: self.iteration_number,
            agent_id: agent_id.clone(),
            agent_name: name,
            kind,
            brief: self.brief,
            artifacts,
            feedback,
            planned: agent.planned_tool_calls(),
            produced: Vec::new(),
            reported_progress: 0,
        };

        let outcome = agent.execute(&mut cx).await;
        let produced = std::mem::take(&mut cx.produced);
        let progress = cx.reported_progress;
        drop(cx);

        match outcome {
            Ok(output) => {
                let done = AgentUpdate::new(
                    self.iteration_id,
                    &agent_id,
                    name,
                    Status::Completed,
                    100,
                    Some(format!(
                        "Completed {} for iteration {}",
                        kind.task(),
                        self.iteration_number
                    )),
                );
                log.emit(done.into()).await?;
                tracing::debug!(agent = name, "agent completed");
                Ok(AgentRunResult {
                    agent_id,
                    agent_name: name.to_string(),
                    status: Status::Completed,
                    progress: 100,
                    artifacts: produced,
                    issues: output.issues,
                    summary: output.summary,
                    suggestions: output.suggestions,
                    failure: None,
                })
            }
            Err(AgentFailure::Internal(err)) => Err(err),
            Err(failure) => {
                let detail = match &failure {
                    AgentFailure::Cancelled => "Cancelled during execution".to_string(),
                    other => other.to_string(),
                };
                let failed = AgentUpdate::new(
                    self.iteration_id,
                    &agent_id,
                    name,
                    Status::Failed,
                    progress,
                    Some(detail),
                );
                log.emit(failed.into()).await?;
                tracing::warn!(agent = name, "agent failed: {}", failure);
                Ok(AgentRunResult {
                    agent_id,
                    agent_name: name.to_string(),
                    status: Status::Failed,
                    progress,
                    artifacts: produced,
                    issues: Vec::new(),
                    summary: None,
                    suggestions: Vec::new(),
                    failure: Some(failure),
                })
            }
        }
    }
}

enum InvokeOutcome {
    Ready(Result<GenerationOutput, GenerationError>),
    Cancelled,
}

/// Execution context handed to an agent: inputs, tool-call tracking, and the
/// collaborators it works through. All status emission funnels through here.
pub struct AgentCx<'a> {
    env: &'a RunnerEnv,
    log: &'a mut EventLog,
    tracker: ToolCallTracker,
    iteration_id: &'a str,
    iteration_number: u32,
    agent_id: String,
    agent_name: &'static str,
    kind: AgentKind,
    brief: &'a ProjectBrief,
    artifacts: &'a [Artifact],
    feedback: &'a FeedbackSet,
    planned: Option<usize>,
    produced: Vec<Artifact>,
    reported_progress: u8,
}

impl AgentCx<'_> {
    pub fn iteration_number(&self) -> u32 {
        self.iteration_number
    }

    pub fn brief(&self) -> &ProjectBrief {
        self.brief
    }

    /// Artifacts visible to this agent.
    pub fn artifacts(&self) -> &[Artifact] {
        self.artifacts
    }

    /// Feedback from the previous iteration.
    pub fn feedback(&self) -> &FeedbackSet {
        self.feedback
    }

    /// Run one generation call as a tracked tool call, retrying transient
    /// failures with the same input up to the configured budget.
    pub async fn generate(
        &mut self,
        tool_name: &str,
        instructions: &str,
    ) -> Result<GenerationOutput, AgentFailure> {
        let id = self.tracker.begin(tool_name);
        let started = self.tracker.update(
            &id,
            Status::InProgress,
            Some(format!("Starting {}", tool_name)),
        )?;
        self.log.emit(started.into()).await?;

        let max_attempts = self.env.max_tool_retries + 1;
        let mut attempt = 1u32;
        loop {
            if self.env.cancel.is_cancelled() {
                return Err(self.cancel_call(&id, tool_name).await?);
            }

            let request = GenerationRequest {
                agent: self.kind,
                iteration: self.iteration_number,
                project_description: self.brief.description.clone(),
                instructions: instructions.to_string(),
                artifacts: self.artifacts.to_vec(),
                feedback: self.feedback.clone(),
            };

            match self.invoke_once(request).await {
                InvokeOutcome::Ready(Ok(output)) => {
                    let done = self.tracker.end(
                        &id,
                        Status::Completed,
                        Some(format!("Completed {}", tool_name)),
                    )?;
                    self.log.emit(done.into()).await?;
                    self.emit_derived_progress().await?;
                    return Ok(output);
                }
                InvokeOutcome::Ready(Err(err)) if err.is_transient() && attempt < max_attempts => {
                    attempt += 1;
                    tracing::warn!(
                        tool = tool_name,
                        attempt,
                        "transient generation failure, retrying: {}",
                        err
                    );
                    let retrying = self.tracker.update(
                        &id,
                        Status::InProgress,
                        Some(format!(
                            "retrying (attempt {}/{}): {}",
                            attempt, max_attempts, err
                        )),
                    )?;
                    self.log.emit(retrying.into()).await?;
                }
                InvokeOutcome::Ready(Err(err)) => {
                    let failed = self.tracker.end(
                        &id,
                        Status::Failed,
                        Some(format!("Error in {}: {}", tool_name, err)),
                    )?;
                    self.log.emit(failed.into()).await?;
                    return Err(ToolCallFailure {
                        tool: tool_name.to_string(),
                        attempts: attempt,
                        message: err.to_string(),
                    }
                    .into());
                }
                InvokeOutcome::Cancelled => {
                    return Err(self.cancel_call(&id, tool_name).await?);
                }
            }
        }
    }

    /// Snapshot the artifacts visible to this agent, tracked as a tool call.
    pub async fn read_artifacts(&mut self, tool_name: &str) -> Result<Vec<Artifact>, AgentFailure> {
        let id = self.tracker.begin(tool_name);
        let started = self.tracker.update(
            &id,
            Status::InProgress,
            Some(format!("Starting {}", tool_name)),
        )?;
        self.log.emit(started.into()).await?;

        if self.env.cancel.is_cancelled() {
            return Err(self.cancel_call(&id, tool_name).await?);
        }

        let snapshot = self.artifacts.to_vec();
        let done = self.tracker.end(
            &id,
            Status::Completed,
            Some(format!("Read {} artifact(s)", snapshot.len())),
        )?;
        self.log.emit(done.into()).await?;
        self.emit_derived_progress().await?;
        Ok(snapshot)
    }

    /// Persist artifacts through the store as one tracked tool call.
    /// Artifacts are recorded as produced file by file, so earlier writes
    /// survive a later failure.
    pub async fn persist_artifacts(
        &mut self,
        tool_name: &str,
        artifacts: Vec<Artifact>,
    ) -> Result<(), AgentFailure> {
        let id = self.tracker.begin(tool_name);
        let started = self.tracker.update(
            &id,
            Status::InProgress,
            Some(format!("Starting {}", tool_name)),
        )?;
        self.log.emit(started.into()).await?;

        let total = artifacts.len();
        for artifact in artifacts {
            if self.env.cancel.is_cancelled() {
                return Err(self.cancel_call(&id, tool_name).await?);
            }
            if let Err(err) = self.env.store.persist(&artifact).await {
                let message = format!("failed to persist '{}': {}", artifact.name, err);
                let failed = self.tracker.end(
                    &id,
                    Status::Failed,
                    Some(format!("Error in {}: {}", tool_name, message)),
                )?;
                self.log.emit(failed.into()).await?;
                return Err(ToolCallFailure {
                    tool: tool_name.to_string(),
                    attempts: 1,
                    message,
                }
                .into());
            }
            merge_artifacts(&mut self.produced, vec![artifact]);
        }

        let done = self.tracker.end(
            &id,
            Status::Completed,
            Some(format!("Wrote {} artifact(s)", total)),
        )?;
        self.log.emit(done.into()).await?;
        self.emit_derived_progress().await?;
        Ok(())
    }

    /// Progress override for agents without a fixed tool-call plan. Values
    /// that do not advance the last report are ignored.
    pub async fn report_progress(
        &mut self,
        progress: u8,
        details: Option<String>,
    ) -> Result<(), AgentFailure> {
        if progress <= self.reported_progress || progress >= 100 {
            return Ok(());
        }
        self.reported_progress = progress;
        let update = AgentUpdate::new(
            self.iteration_id,
            &self.agent_id,
            self.agent_name,
            Status::InProgress,
            progress,
            details,
        );
        self.log.emit(update.into()).await?;
        Ok(())
    }

    async fn emit_derived_progress(&mut self) -> Result<(), AgentFailure> {
        let Some(planned) = self.planned else {
            return Ok(());
        };
        if planned == 0 {
            return Ok(());
        }
        let progress = ((100 * self.tracker.completed_count()) / planned).min(100) as u8;
        if progress > self.reported_progress && progress < 100 {
            self.reported_progress = progress;
            let update = AgentUpdate::new(
                self.iteration_id,
                &self.agent_id,
                self.agent_name,
                Status::InProgress,
                progress,
                None,
            );
            self.log.emit(update.into()).await?;
        }
        Ok(())
    }

    async fn cancel_call(&mut self, id: &str, tool_name: &str) -> Result<AgentFailure, AgentFailure> {
        let failed = self.tracker.end(
            id,
            Status::Failed,
            Some(format!("Error in {}: cancelled", tool_name)),
        )?;
        self.log.emit(failed.into()).await?;
        Ok(AgentFailure::Cancelled)
    }

    async fn invoke_once(&self, request: GenerationRequest) -> InvokeOutcome {
        let call = async {
            match self.env.tool_timeout {
                Some(limit) => match tokio::time::timeout(limit, self.env.generation.invoke(request)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(GenerationError::Timeout(limit)),
                },
                None => self.env.generation.invoke(request).await,
            }
        };
        tokio::select! {
            _ = self.env.cancel.cancelled() => InvokeOutcome::Cancelled,
            result = call => InvokeOutcome::Ready(result),
        }
    }
}
