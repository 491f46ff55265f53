//! Test doubles shared across the orchestrator tests: a scripted generation
//! backend and ready-made runner environments.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::artifacts::{Artifact, MemoryArtifactStore};
use crate::generation::{
    AgentKind, GenerationClient, GenerationError, GenerationOutput, GenerationRequest, ProjectBrief,
};
use crate::orchestrator::runner::RunnerEnv;

/// One scripted response, optionally delayed to stand in for a slow backend.
pub(crate) struct ScriptedReply {
    delay: Option<Duration>,
    result: Result<GenerationOutput, GenerationError>,
}

impl ScriptedReply {
    pub(crate) fn ok(output: GenerationOutput) -> Self {
        Self {
            delay: None,
            result: Ok(output),
        }
    }

    /// Success with the canned output for `kind`.
    pub(crate) fn ok_for(kind: AgentKind) -> Self {
        Self::ok(default_output(kind))
    }

    pub(crate) fn fail_transient(message: &str) -> Self {
        Self {
            delay: None,
            result: Err(GenerationError::Unavailable(message.to_string())),
        }
    }

    pub(crate) fn fail_fatal(message: &str) -> Self {
        Self {
            delay: None,
            result: Err(GenerationError::Rejected(message.to_string())),
        }
    }

    pub(crate) fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Generation backend driven by per-role reply queues. Every request is
/// recorded; once a role's queue is empty it falls back to the canned
/// success output, so tests only script the interesting calls.
#[derive(Default)]
pub(crate) struct ScriptedClient {
    replies: Mutex<HashMap<AgentKind, VecDeque<ScriptedReply>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue `reply` for the next unscripted request from `kind`.
    pub(crate) fn script(mut self, kind: AgentKind, reply: ScriptedReply) -> Self {
        self.replies.get_mut().entry(kind).or_default().push_back(reply);
        self
    }

    pub(crate) async fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().await.clone()
    }

    pub(crate) async fn calls_for(&self, kind: AgentKind) -> usize {
        self.requests
            .lock()
            .await
            .iter()
            .filter(|r| r.agent == kind)
            .count()
    }
}

#[async_trait]
impl GenerationClient for ScriptedClient {
    async fn invoke(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationOutput, GenerationError> {
        let kind = request.agent;
        self.requests.lock().await.push(request);
        let reply = self
            .replies
            .lock()
            .await
            .get_mut(&kind)
            .and_then(|queue| queue.pop_front());
        match reply {
            Some(reply) => {
                if let Some(delay) = reply.delay {
                    tokio::time::sleep(delay).await;
                }
                reply.result
            }
            None => Ok(default_output(kind)),
        }
    }
}

/// Canned success output per role, roughly what the real backend returns
/// for a small project.
pub(crate) fn default_output(kind: AgentKind) -> GenerationOutput {
    match kind {
        AgentKind::Schema => GenerationOutput {
            artifacts: vec![Artifact::new(
                "schema.sql",
                "CREATE TABLE tasks (id INTEGER PRIMARY KEY, title TEXT NOT NULL, done BOOLEAN);",
            )],
            summary: Some("Schema drafted".to_string()),
            ..GenerationOutput::default()
        },
        AgentKind::Implementation => GenerationOutput {
            artifacts: vec![Artifact::new(
                "main.py",
                "def list_tasks():\n    return []\n",
            )],
            summary: Some("Implementation drafted".to_string()),
            ..GenerationOutput::default()
        },
        AgentKind::TestGeneration => GenerationOutput {
            artifacts: vec![Artifact::new(
                "test_main.py",
                "def test_list_tasks():\n    assert list_tasks() == []\n",
            )],
            summary: Some("Tests drafted".to_string()),
            ..GenerationOutput::default()
        },
        AgentKind::Review => GenerationOutput {
            summary: Some("Looks good".to_string()),
            ..GenerationOutput::default()
        },
    }
}

pub(crate) fn test_brief() -> ProjectBrief {
    ProjectBrief::new(
        "project_test",
        "Todo App",
        "A todo application with a web UI",
        "generated_projects/project_test",
    )
}

/// Runner environment wired to `generation` and an in-memory store, with
/// the default retry budget and no timeout.
pub(crate) fn test_env(generation: Arc<ScriptedClient>) -> (RunnerEnv, Arc<MemoryArtifactStore>) {
    let store = Arc::new(MemoryArtifactStore::new());
    let env = RunnerEnv {
        generation,
        store: store.clone(),
        cancel: CancellationToken::new(),
        max_tool_retries: 2,
        tool_timeout: None,
    };
    (env, store)
}
