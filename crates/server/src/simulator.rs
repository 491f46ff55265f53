//! # Simulated Generation Backend
//!
//! Stands in for a real model service so the server works out of the box.
//! Emits a small canned todo application and keeps the review blocking
//! until a configured iteration, making the refinement loop visible end
//! to end: the first schema stores plain-text passwords, the review flags
//! it, and the next pass ships the fix.

use std::time::Duration;

use async_trait::async_trait;
use crucible_core::artifacts::Artifact;
use crucible_core::generation::{
    AgentKind, GenerationClient, GenerationError, GenerationOutput, GenerationRequest,
};
use crucible_core::orchestrator::{Issue, IssueCategory, Severity};

const SCHEMA_FIRST_PASS: &str = "CREATE TABLE users (\n    id INTEGER PRIMARY KEY AUTOINCREMENT,\n    username TEXT NOT NULL UNIQUE,\n    password TEXT NOT NULL\n);\n\nCREATE TABLE tasks (\n    id INTEGER PRIMARY KEY AUTOINCREMENT,\n    user_id INTEGER NOT NULL REFERENCES users(id),\n    title TEXT NOT NULL,\n    done BOOLEAN NOT NULL DEFAULT 0\n);\n";

const SCHEMA_REVISED: &str = "-- Revised after review: passwords are stored as salted hashes.\nCREATE TABLE users (\n    id INTEGER PRIMARY KEY AUTOINCREMENT,\n    username TEXT NOT NULL UNIQUE,\n    password_hash TEXT NOT NULL\n);\n\nCREATE TABLE tasks (\n    id INTEGER PRIMARY KEY AUTOINCREMENT,\n    user_id INTEGER NOT NULL REFERENCES users(id),\n    title TEXT NOT NULL,\n    done BOOLEAN NOT NULL DEFAULT 0\n);\n\nCREATE INDEX idx_tasks_user_id ON tasks(user_id);\n";

const MAIN_FIRST_PASS: &str = "import sqlite3\n\n\ndef create_user(conn, username, password):\n    conn.execute(\n        \"INSERT INTO users (username, password) VALUES (?, ?)\",\n        (username, password),\n    )\n\n\ndef add_task(conn, user_id, title):\n    conn.execute(\n        \"INSERT INTO tasks (user_id, title) VALUES (?, ?)\",\n        (user_id, title),\n    )\n\n\ndef list_tasks(conn, user_id):\n    cursor = conn.execute(\"SELECT id, title, done FROM tasks WHERE user_id = ?\", (user_id,))\n    return cursor.fetchall()\n";

const MAIN_REVISED: &str = "import hashlib\nimport os\nimport sqlite3\n\n\ndef hash_password(password):\n    salt = os.urandom(16)\n    digest = hashlib.pbkdf2_hmac(\"sha256\", password.encode(), salt, 100_000)\n    return salt.hex() + \":\" + digest.hex()\n\n\ndef create_user(conn, username, password):\n    conn.execute(\n        \"INSERT INTO users (username, password_hash) VALUES (?, ?)\",\n        (username, hash_password(password)),\n    )\n\n\ndef add_task(conn, user_id, title):\n    if not title.strip():\n        raise ValueError(\"task title must not be empty\")\n    conn.execute(\n        \"INSERT INTO tasks (user_id, title) VALUES (?, ?)\",\n        (user_id, title),\n    )\n\n\ndef list_tasks(conn, user_id):\n    cursor = conn.execute(\"SELECT id, title, done FROM tasks WHERE user_id = ?\", (user_id,))\n    return cursor.fetchall()\n";

const TESTS: &str = "import sqlite3\n\nimport pytest\n\nfrom main import add_task, create_user, list_tasks\n\n\n@pytest.fixture\ndef conn():\n    conn = sqlite3.connect(\":memory:\")\n    conn.executescript(open(\"schema.sql\").read())\n    return conn\n\n\ndef test_create_user_and_add_task(conn):\n    create_user(conn, \"alice\", \"s3cret\")\n    add_task(conn, 1, \"write tests\")\n    tasks = list_tasks(conn, 1)\n    assert len(tasks) == 1\n    assert tasks[0][1] == \"write tests\"\n\n\ndef test_list_tasks_empty_for_new_user(conn):\n    create_user(conn, \"bob\", \"hunter2\")\n    assert list_tasks(conn, 2) == []\n";

/// Deterministic stand-in for the real generation service.
pub struct SimulatedGenerator {
    /// Iteration from which the review stops raising blocking issues.
    clean_after: u32,
    delay: Duration,
}

impl Default for SimulatedGenerator {
    fn default() -> Self {
        Self {
            clean_after: 2,
            delay: Duration::from_millis(200),
        }
    }
}

impl SimulatedGenerator {
    pub fn new(clean_after: u32, delay: Duration) -> Self {
        Self { clean_after, delay }
    }
}

#[async_trait]
impl GenerationClient for SimulatedGenerator {
    async fn invoke(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationOutput, GenerationError> {
        tokio::time::sleep(self.delay).await;

        let revised = !request.feedback.is_empty();
        Ok(match request.agent {
            AgentKind::Schema => GenerationOutput {
                artifacts: vec![Artifact::new(
                    "schema.sql",
                    if revised { SCHEMA_REVISED } else { SCHEMA_FIRST_PASS },
                )],
                summary: Some(if revised {
                    "Schema revised per review feedback".to_string()
                } else {
                    "Initial schema drafted".to_string()
                }),
                ..GenerationOutput::default()
            },
            AgentKind::Implementation => GenerationOutput {
                artifacts: vec![Artifact::new(
                    "main.py",
                    if revised { MAIN_REVISED } else { MAIN_FIRST_PASS },
                )],
                summary: Some("Implementation generated".to_string()),
                ..GenerationOutput::default()
            },
            AgentKind::TestGeneration => GenerationOutput {
                artifacts: vec![Artifact::new("test_main.py", TESTS)],
                summary: Some("Test suite generated".to_string()),
                ..GenerationOutput::default()
            },
            AgentKind::Review => {
                if request.iteration < self.clean_after {
                    GenerationOutput {
                        issues: vec![
                            Issue::new(
                                IssueCategory::Security,
                                Severity::High,
                                "Passwords are stored in plain text",
                            )
                            .with_target("schema.sql")
                            .with_recommendation("Store a salted hash instead of the raw password"),
                            Issue::new(
                                IssueCategory::Performance,
                                Severity::Medium,
                                "tasks.user_id has no index",
                            )
                            .with_target("schema.sql"),
                        ],
                        summary: Some("Security review failed; another pass is needed".to_string()),
                        suggestions: vec!["Add input validation for task titles".to_string()],
                        ..GenerationOutput::default()
                    }
                } else {
                    GenerationOutput {
                        summary: Some("All earlier findings are addressed".to_string()),
                        ..GenerationOutput::default()
                    }
                }
            }
        })
    }
}
