//! # Iteration Controller
//!
//! Runs the agent roster through one refinement pass. The controller owns
//! the iteration node in the status tree: it opens the iteration, reports
//! roster progress as agents finish, and closes the iteration with a
//! terminal status. Agents run strictly in roster order and the first
//! failure ends the pass, skipping the rest of the roster.

use crate::agents::{default_roster, Agent};
use crate::artifacts::{merge_artifacts, Artifact};
use crate::error::{AgentFailure, CrucibleError, IterationFailure};
use crate::generation::ProjectBrief;
use crate::orchestrator::events::{uuid_v4, EventLog, IterationUpdate};
use crate::orchestrator::feedback::FeedbackSet;
use crate::orchestrator::runner::{AgentRunner, RunnerEnv};
use crate::orchestrator::status::Status;

/// What one iteration left behind.
#[derive(Debug)]
pub struct IterationResult {
    pub iteration_id: String,
    /// 1-based position in the run.
    pub seq: u32,
    pub status: Status,
    /// The artifact set after this pass: the inputs overlaid with everything
    /// the agents persisted. Kept even when the iteration failed.
    pub artifacts: Vec<Artifact>,
    /// Findings from the roster, review last. Empty when the pass failed.
    pub feedback: FeedbackSet,
    pub failure: Option<IterationFailure>,
}

impl IterationResult {
    pub fn is_success(&self) -> bool {
        self.status == Status::Completed
    }
}

/// Drives the fixed agent sequence for one iteration at a time.
pub struct IterationController {
    agents: Vec<Box<dyn Agent>>,
}

impl IterationController {
    pub fn new() -> Self {
        Self {
            agents: default_roster(),
        }
    }

    /// Replace the standard roster. Order is invocation order.
    pub fn with_agents(agents: Vec<Box<dyn Agent>>) -> Self {
        Self { agents }
    }

    /// Run iteration `seq` over `artifacts`, with `feedback` carried from
    /// the most recent completed iteration.
    #[tracing::instrument(skip_all, fields(iteration = seq))]
    pub async fn run_iteration(
        &self,
        env: &RunnerEnv,
        log: &mut EventLog,
        brief: &ProjectBrief,
        seq: u32,
        artifacts: Vec<Artifact>,
        feedback: &FeedbackSet,
    ) -> Result<IterationResult, CrucibleError> {
        let iteration_id = uuid_v4();
        let started = IterationUpdate::new(
            &iteration_id,
            seq,
            Status::InProgress,
            0,
            Some(format!("Starting iteration {}", seq)),
        );
        log.emit(started.into()).await?;

        let mut artifacts = artifacts;
        let mut collected = FeedbackSet::new();
        let total = self.agents.len();
        let runner = AgentRunner::new(env, &iteration_id, seq, brief);

        for (index, agent) in self.agents.iter().enumerate() {
            let roster_progress = ((index * 100) / total) as u8;
            if env.cancel.is_cancelled() {
                return self
                    .fail(
                        log,
                        iteration_id,
                        seq,
                        roster_progress,
                        artifacts,
                        IterationFailure {
                            seq,
                            agent: agent.name().to_string(),
                            source: AgentFailure::Cancelled,
                        },
                    )
                    .await;
            }

            let result = runner
                .run(agent.as_ref(), log, &artifacts, feedback)
                .await?;
            merge_artifacts(&mut artifacts, result.artifacts);

            if let Some(source) = result.failure {
                return self
                    .fail(
                        log,
                        iteration_id,
                        seq,
                        roster_progress,
                        artifacts,
                        IterationFailure {
                            seq,
                            agent: result.agent_name,
                            source,
                        },
                    )
                    .await;
            }

            let mut contribution = FeedbackSet::new();
            contribution.extend(result.issues);
            contribution.summary = result.summary;
            contribution.suggestions = result.suggestions;
            collected.merge(contribution);

            if index + 1 < total {
                let advanced = IterationUpdate::new(
                    &iteration_id,
                    seq,
                    Status::InProgress,
                    (((index + 1) * 100) / total) as u8,
                    None,
                );
                log.emit(advanced.into()).await?;
            }
        }

        let completed = IterationUpdate::new(
            &iteration_id,
            seq,
            Status::Completed,
            100,
            Some(format!("Iteration {} completed successfully", seq)),
        );
        log.emit(completed.into()).await?;
        tracing::info!(iteration = seq, issues = collected.issue_count(), "iteration completed");

        Ok(IterationResult {
            iteration_id,
            seq,
            status: Status::Completed,
            artifacts,
            feedback: collected,
            failure: None,
        })
    }

    async fn fail(
        &self,
        log: &mut EventLog,
        iteration_id: String,
        seq: u32,
        progress: u8,
        artifacts: Vec<Artifact>,
        failure: IterationFailure,
    ) -> Result<IterationResult, CrucibleError> {
        let update = IterationUpdate::new(
            &iteration_id,
            seq,
            Status::Failed,
            progress,
            Some(failure.to_string()),
        );
        log.emit(update.into()).await?;
        tracing::warn!(iteration = seq, "iteration failed: {}", failure);
        Ok(IterationResult {
            iteration_id,
            seq,
            status: Status::Failed,
            artifacts,
            feedback: FeedbackSet::new(),
            failure: Some(failure),
        })
    }
}

impl Default for IterationController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{AgentKind, GenerationOutput};
    use crate::orchestrator::events::UpdateEvent;
    use crate::orchestrator::feedback::{Issue, IssueCategory, Severity};
    use crate::orchestrator::support::{test_brief, test_env, ScriptedClient, ScriptedReply};
    use std::sync::Arc;

    fn iteration_progress(log: &EventLog) -> Vec<(Status, u8)> {
        log.events()
            .iter()
            .filter_map(|e| match e {
                UpdateEvent::IterationUpdate(up) => Some((up.status, up.progress)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_full_roster_completes_iteration() {
        let client = Arc::new(ScriptedClient::new());
        let (env, _store) = test_env(client);
        let brief = test_brief();
        let mut log = EventLog::new(1);

        let controller = IterationController::new();
        let result = controller
            .run_iteration(&env, &mut log, &brief, 1, Vec::new(), &FeedbackSet::new())
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.seq, 1);
        let names: Vec<_> = result.artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["schema.sql", "main.py", "test_main.py"]);
        // Review runs last, so its summary is the one that sticks.
        assert_eq!(result.feedback.summary.as_deref(), Some("Looks good"));
        assert!(result.feedback.is_empty());

        assert_eq!(
            iteration_progress(&log),
            vec![
                (Status::InProgress, 0),
                (Status::InProgress, 25),
                (Status::InProgress, 50),
                (Status::InProgress, 75),
                (Status::Completed, 100),
            ]
        );
        match log.events().first() {
            Some(UpdateEvent::IterationUpdate(up)) => {
                assert_eq!(up.details.as_deref(), Some("Starting iteration 1"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        match log.events().last() {
            Some(UpdateEvent::IterationUpdate(up)) => {
                assert_eq!(up.details.as_deref(), Some("Iteration 1 completed successfully"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(log.status().check_invariants().is_ok());
    }

    #[tokio::test]
    async fn test_failed_agent_skips_remaining_roster() {
        let client = Arc::new(
            ScriptedClient::new()
                .script(AgentKind::Implementation, ScriptedReply::fail_fatal("rejected")),
        );
        let (env, _store) = test_env(client.clone());
        let brief = test_brief();
        let mut log = EventLog::new(1);

        let controller = IterationController::new();
        let result = controller
            .run_iteration(&env, &mut log, &brief, 1, Vec::new(), &FeedbackSet::new())
            .await
            .unwrap();

        assert_eq!(result.status, Status::Failed);
        let failure = result.failure.unwrap();
        assert_eq!(failure.seq, 1);
        assert_eq!(failure.agent, "Code Generation Agent");
        assert_eq!(client.calls_for(AgentKind::TestGeneration).await, 0);
        assert_eq!(client.calls_for(AgentKind::Review).await, 0);
        // The schema output survives the later failure.
        let names: Vec<_> = result.artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["schema.sql"]);

        match log.events().last() {
            Some(UpdateEvent::IterationUpdate(up)) => {
                assert_eq!(up.status, Status::Failed);
                assert_eq!(up.progress, 25);
                assert!(up.details.as_deref().unwrap().contains("failed in Code Generation Agent"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(log.status().check_invariants().is_ok());
    }

    #[tokio::test]
    async fn test_review_findings_become_iteration_feedback() {
        let review = GenerationOutput {
            issues: vec![Issue::new(
                IssueCategory::Security,
                Severity::High,
                "passwords stored in plain text",
            )
            .with_target("main.py")],
            summary: Some("Needs another pass".to_string()),
            suggestions: vec!["add auth middleware".to_string()],
            ..GenerationOutput::default()
        };
        let client = Arc::new(
            ScriptedClient::new().script(AgentKind::Review, ScriptedReply::ok(review)),
        );
        let (env, _store) = test_env(client);
        let brief = test_brief();
        let mut log = EventLog::new(1);

        let controller = IterationController::new();
        let result = controller
            .run_iteration(&env, &mut log, &brief, 1, Vec::new(), &FeedbackSet::new())
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.feedback.issue_count(), 1);
        assert!(result.feedback.has_blocking(Severity::High));
        assert_eq!(result.feedback.summary.as_deref(), Some("Needs another pass"));
        assert_eq!(result.feedback.suggestions, vec!["add auth middleware".to_string()]);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_agent() {
        let client = Arc::new(ScriptedClient::new());
        let (env, _store) = test_env(client.clone());
        env.cancel.cancel();
        let brief = test_brief();
        let mut log = EventLog::new(1);

        let controller = IterationController::new();
        let result = controller
            .run_iteration(&env, &mut log, &brief, 1, Vec::new(), &FeedbackSet::new())
            .await
            .unwrap();

        assert_eq!(result.status, Status::Failed);
        let failure = result.failure.unwrap();
        assert!(failure.source.is_cancelled());
        assert_eq!(failure.agent, "Schema Agent");
        assert_eq!(client.calls_for(AgentKind::Schema).await, 0);

        match log.events().last() {
            Some(UpdateEvent::IterationUpdate(up)) => {
                assert_eq!(up.status, Status::Failed);
                assert_eq!(up.progress, 0);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
