//! Crucible Server
//!
//! Axum server around the generation engine: starts runs, serves live
//! status over WebSocket and SSE, and accepts cooperative cancellation.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json,
    },
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use crucible_core::artifacts::DirectoryArtifactStore;
use crucible_core::generation::ProjectBrief;
use crucible_core::orchestrator::{
    Orchestrator, OrchestratorConfig, ProjectStatus, RunOutcome, UpdateEvent,
};
use futures::{
    stream::{self, Stream},
    SinkExt, StreamExt,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{hash_map::Entry, HashMap},
    convert::Infallible,
    net::SocketAddr,
    sync::Arc,
};
use tokio::{
    net::TcpListener,
    sync::{broadcast, mpsc, RwLock},
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use utoipa::{OpenApi, ToSchema};

mod simulator;

use simulator::SimulatedGenerator;

/// One generation run and everything observers need from it.
struct ProjectEntry {
    /// Server-side fold of every update applied so far.
    snapshot: RwLock<ProjectStatus>,
    /// Ordered update history, replayed to late WebSocket subscribers.
    events: RwLock<Vec<UpdateEvent>>,
    tx: broadcast::Sender<UpdateEvent>,
    cancel: CancellationToken,
}

/// Application state
struct AppState {
    projects: RwLock<HashMap<String, Arc<ProjectEntry>>>,
}

type SharedState = Arc<AppState>;

// === API Types ===

#[derive(Deserialize, ToSchema)]
struct StartProjectRequest {
    project_name: String,
    /// What to build.
    description: String,
    /// Refinement budget; defaults to CRUCIBLE_MAX_ITERATIONS or 3.
    max_iterations: Option<u32>,
}

#[derive(Serialize, ToSchema)]
struct StartProjectResponse {
    success: bool,
    project_id: String,
    directory: String,
    message: String,
}

#[derive(Serialize, ToSchema)]
struct ApiResponse {
    success: bool,
    message: String,
}

/// First WebSocket frame: which project to watch.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeMessage {
    project_id: String,
}

// === CLI ===

#[derive(Parser)]
#[command(
    name = "crucible",
    about = "Crucible - iterative multi-agent project generation",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the Crucible server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// Generate one project from the command line, no server
    Run {
        /// What to build
        description: String,
        /// Project name
        #[arg(short, long)]
        name: Option<String>,
        /// Refinement budget
        #[arg(short, long)]
        max_iterations: Option<u32>,
    },
}

#[derive(OpenApi)]
#[openapi(
    paths(start_project, get_project_status, cancel_project),
    components(schemas(StartProjectRequest, StartProjectResponse, ApiResponse)),
    tags(
        (name = "projects", description = "Project generation runs")
    )
)]
struct ApiDoc;

fn default_max_iterations() -> u32 {
    std::env::var("CRUCIBLE_MAX_ITERATIONS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3)
}

fn describe_outcome(outcome: &RunOutcome) -> String {
    match outcome {
        RunOutcome::Completed {
            iterations_run,
            artifacts,
        } => format!(
            "completed after {} iteration(s), {} artifact(s)",
            iterations_run,
            artifacts.len()
        ),
        RunOutcome::Failed { failure, .. } => format!("failed ({})", failure),
        RunOutcome::Exhausted {
            iterations_run,
            artifacts,
        } => format!(
            "stopped after {} iteration(s) without acceptance, {} artifact(s) kept",
            iterations_run,
            artifacts.len()
        ),
    }
}

// === API Handlers ===

/// Start generating a project
#[utoipa::path(
    post,
    path = "/start-project",
    tag = "projects",
    request_body = StartProjectRequest,
    responses(
        (status = 200, description = "Run started (or refused)", body = StartProjectResponse)
    )
)]
async fn start_project(
    State(state): State<SharedState>,
    Json(req): Json<StartProjectRequest>,
) -> Json<StartProjectResponse> {
    let project_id = format!("project_{}", chrono::Local::now().format("%Y%m%d_%H%M%S"));
    let directory = format!("generated_projects/{}", project_id);
    launch_project(state, req, project_id, directory).await
}

/// Register the run under `project_id` and spawn it. The registry entry is
/// reserved under a single write lock before the first await, so of two
/// concurrent starts with the same id exactly one is admitted.
async fn launch_project(
    state: SharedState,
    req: StartProjectRequest,
    project_id: String,
    directory: String,
) -> Json<StartProjectResponse> {
    let max_iterations = req.max_iterations.unwrap_or_else(default_max_iterations);
    let (broadcast_tx, _) = broadcast::channel::<UpdateEvent>(100);
    let cancel = CancellationToken::new();
    let entry = Arc::new(ProjectEntry {
        snapshot: RwLock::new(ProjectStatus::new(max_iterations)),
        events: RwLock::new(Vec::new()),
        tx: broadcast_tx,
        cancel: cancel.clone(),
    });

    match state.projects.write().await.entry(project_id.clone()) {
        Entry::Occupied(_) => {
            return Json(StartProjectResponse {
                success: false,
                project_id,
                directory,
                message: "A run with this project ID already exists".to_string(),
            });
        }
        Entry::Vacant(slot) => {
            slot.insert(entry.clone());
        }
    }

    if let Err(e) = tokio::fs::create_dir_all(&directory).await {
        state.projects.write().await.remove(&project_id);
        return Json(StartProjectResponse {
            success: false,
            project_id,
            directory,
            message: format!("Failed to create project directory: {}", e),
        });
    }

    let brief = ProjectBrief::new(&project_id, &req.project_name, &req.description, &directory);

    println!(
        "🚀 Starting project generation: {} ({})",
        req.project_name, project_id
    );

    let (event_tx, mut event_rx) = mpsc::channel::<UpdateEvent>(100);

    let mut orchestrator = Orchestrator::new(
        brief,
        OrchestratorConfig::new(max_iterations),
        Arc::new(SimulatedGenerator::default()),
    )
    .with_artifact_store(Arc::new(DirectoryArtifactStore::new(directory.as_str())))
    .with_event_channel(event_tx)
    .with_cancellation(cancel);

    // Fold updates into the shared snapshot and fan out to subscribers.
    let bridge_entry = entry.clone();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            {
                let mut snapshot = bridge_entry.snapshot.write().await;
                if let Err(e) = snapshot.apply(&event) {
                    tracing::warn!("status fold rejected an update: {}", e);
                }
            }
            // Record and publish under one lock; subscribers snapshot the
            // history under the same lock, so an update lands in exactly one
            // of the two.
            let mut events = bridge_entry.events.write().await;
            events.push(event.clone());
            let _ = bridge_entry.tx.send(event);
        }
    });

    // Run the orchestrator
    let run_id = project_id.clone();
    tokio::spawn(async move {
        match orchestrator.run().await {
            Ok(outcome) => {
                println!("✅ Project {} {}", run_id, describe_outcome(&outcome));
            }
            Err(e) => {
                eprintln!("❌ Project {} aborted: {}", run_id, e);
            }
        }
    });

    Json(StartProjectResponse {
        success: true,
        project_id,
        directory,
        message: format!("Project generation started for '{}'", req.project_name),
    })
}

/// Get the current status tree of a run
#[utoipa::path(
    get,
    path = "/api/v1/projects/{project_id}/status",
    tag = "projects",
    params(
        ("project_id" = String, Path, description = "Project identifier")
    ),
    responses(
        (status = 200, description = "Current project status tree"),
        (status = 404, description = "No such project")
    )
)]
async fn get_project_status(
    State(state): State<SharedState>,
    Path(project_id): Path<String>,
) -> Result<Json<ProjectStatus>, StatusCode> {
    let entry = state
        .projects
        .read()
        .await
        .get(&project_id)
        .cloned()
        .ok_or(StatusCode::NOT_FOUND)?;
    let snapshot = entry.snapshot.read().await.clone();
    Ok(Json(snapshot))
}

/// Request cooperative cancellation of a run
#[utoipa::path(
    post,
    path = "/api/v1/projects/{project_id}/cancel",
    tag = "projects",
    params(
        ("project_id" = String, Path, description = "Project identifier")
    ),
    responses(
        (status = 200, description = "Cancellation requested", body = ApiResponse)
    )
)]
async fn cancel_project(
    State(state): State<SharedState>,
    Path(project_id): Path<String>,
) -> Json<ApiResponse> {
    match state.projects.read().await.get(&project_id) {
        Some(entry) => {
            entry.cancel.cancel();
            println!("🛑 Cancellation requested for {}", project_id);
            Json(ApiResponse {
                success: true,
                message: format!("Cancellation requested for {}", project_id),
            })
        }
        None => Json(ApiResponse {
            success: false,
            message: "No project with that ID".to_string(),
        }),
    }
}

/// SSE endpoint for live updates with heartbeat
async fn project_events(
    State(state): State<SharedState>,
    Path(project_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let entry = state
        .projects
        .read()
        .await
        .get(&project_id)
        .cloned()
        .ok_or(StatusCode::NOT_FOUND)?;
    let rx = entry.tx.subscribe();

    Ok(Sse::new(event_stream(rx)).keep_alive(KeepAlive::default()))
}

/// Stream of serialized updates. Ends only when the channel closes; a
/// subscriber that falls behind skips ahead instead of losing the stream.
fn event_stream(
    rx: broadcast::Receiver<UpdateEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(rx, |mut rx| async move {
        let timeout = tokio::time::timeout(std::time::Duration::from_secs(15), rx.recv()).await;
        match timeout {
            Ok(Ok(event)) => {
                let json = serde_json::to_string(&event).unwrap_or_default();
                Some((Ok(Event::default().data(json)), rx))
            }
            Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                let note = format!("lagged: skipped {} update(s)", skipped);
                Some((Ok(Event::default().comment(note)), rx))
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => None,
            Err(_) => Some((Ok(Event::default().comment("heartbeat")), rx)),
        }
    })
}

async fn serve_openapi() -> impl IntoResponse {
    let spec = ApiDoc::openapi().to_json().unwrap_or_default();
    ([(header::CONTENT_TYPE, "application/json")], spec)
}

// === WebSocket Handler ===

fn is_cancel_frame(text: &str) -> bool {
    if text.trim().eq_ignore_ascii_case("cancel") {
        return true;
    }
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(|t| t == "cancel"))
        .unwrap_or(false)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let (mut sender, mut receiver) = socket.split();

    // The first text frame names the project to watch.
    let (project_id, entry) = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<SubscribeMessage>(&text)
            {
                Ok(msg) => {
                    let found = state.projects.read().await.get(&msg.project_id).cloned();
                    match found {
                        Some(entry) => break (msg.project_id, entry),
                        None => {
                            let _ = sender
                                .send(Message::Text(
                                    "{\"error\":\"unknown project\"}".to_string(),
                                ))
                                .await;
                            return;
                        }
                    }
                }
                Err(_) => {
                    let _ = sender
                        .send(Message::Text(
                            "{\"error\":\"expected {\\\"projectId\\\":...}\"}".to_string(),
                        ))
                        .await;
                    return;
                }
            },
            Some(Ok(Message::Close(_))) | None => return,
            _ => continue,
        }
    };

    // Snapshot and subscribe under one lock so the replay neither misses
    // nor repeats an update.
    let cancel = entry.cancel.clone();
    let (past, rx) = {
        let events = entry.events.read().await;
        (events.clone(), entry.tx.subscribe())
    };

    let mut send_task = tokio::spawn(async move {
        for event in past {
            let json = serde_json::to_string(&event).unwrap_or_default();
            if sender.send(Message::Text(json)).await.is_err() {
                return;
            }
        }
        let mut rx = rx;
        while let Ok(event) = rx.recv().await {
            let json = serde_json::to_string(&event).unwrap_or_default();
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if is_cancel_frame(&text) {
                        println!("🛑 Cancellation requested for {}", project_id);
                        cancel.cancel();
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

// === Entry Points ===

async fn run_once(
    description: String,
    name: Option<String>,
    max_iterations: Option<u32>,
) -> anyhow::Result<()> {
    let project_id = format!("project_{}", chrono::Local::now().format("%Y%m%d_%H%M%S"));
    let name = name.unwrap_or_else(|| "Generated Project".to_string());
    let directory = format!("generated_projects/{}", project_id);
    tokio::fs::create_dir_all(&directory).await?;

    println!("🚀 Generating '{}' in {}", name, directory);

    let config = OrchestratorConfig::new(max_iterations.unwrap_or_else(default_max_iterations));
    let brief = ProjectBrief::new(&project_id, &name, &description, &directory);
    let mut orchestrator =
        Orchestrator::new(brief, config, Arc::new(SimulatedGenerator::default()))
            .with_artifact_store(Arc::new(DirectoryArtifactStore::new(directory.as_str())));

    match orchestrator.run().await {
        Ok(outcome) => {
            println!("✅ Project generation {}", describe_outcome(&outcome));
            for artifact in outcome.artifacts() {
                println!("   {}", artifact.name);
            }
        }
        Err(e) => eprintln!("❌ Project generation aborted: {}", e),
    }
    Ok(())
}

pub async fn run_server() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    let server_port = match args.command {
        Some(CliCommand::Run {
            description,
            name,
            max_iterations,
        }) => {
            return run_once(description, name, max_iterations).await;
        }
        Some(CliCommand::Serve { port }) => port,
        None => 8080,
    };

    let state: SharedState = Arc::new(AppState {
        projects: RwLock::new(HashMap::new()),
    });

    let project_routes = Router::new()
        .route("/:project_id/status", get(get_project_status))
        .route("/:project_id/events", get(project_events))
        .route("/:project_id/cancel", post(cancel_project));

    let app = Router::new()
        .route("/start-project", post(start_project))
        .nest("/api/v1/projects", project_routes)
        .route("/api/v1/openapi.json", get(serve_openapi))
        // Non-versioned routes (WebSocket)
        .route("/ws", get(ws_handler))
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], server_port));
    println!("🚀 Crucible Server running at http://{}", addr);
    println!("   Start:   POST /start-project");
    println!("   Status:  GET  /api/v1/projects/:id/status");
    println!("   Events:  GET  /api/v1/projects/:id/events (SSE)");
    println!("   Cancel:  POST /api/v1/projects/:id/cancel");
    println!("   Updates: /ws (WebSocket)");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("╔══════════════════════════════════════╗");
    println!("║          CRUCIBLE SERVER             ║");
    println!("╚══════════════════════════════════════╝");

    run_server().await
}
