use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info, warn};

use crate::chain::{ChainDriver, RunContext};
use crate::config::Config;

/// Events streamed to observers via SSE.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    StepStarted { number: usize, url: String },
    Answered { number: usize, submit_url: String, answer: String },
    StepError { message: String },
    ChainFinished { reason: String },
}

impl AgentEvent {
    fn name(&self) -> &'static str {
        match self {
            AgentEvent::StepStarted { .. } => "step_started",
            AgentEvent::Answered { .. } => "answered",
            AgentEvent::StepError { .. } => "step_error",
            AgentEvent::ChainFinished { .. } => "chain_finished",
        }
    }

    fn to_sse_event(&self) -> Event {
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        Event::default().event(self.name()).data(data)
    }
}

pub struct AppState {
    pub config: Config,
    pub driver: Arc<ChainDriver>,
    pub event_tx: broadcast::Sender<AgentEvent>,
    next_run: AtomicU64,
}

impl AppState {
    pub fn new(config: Config, driver: Arc<ChainDriver>) -> Self {
        let (event_tx, _) = broadcast::channel::<AgentEvent>(64);
        Self {
            config,
            driver,
            event_tx,
            next_run: AtomicU64::new(1),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QuizTask {
    pub email: String,
    pub secret: String,
    pub url: String,
}

/// 403 unless the task carries the configured secret.
fn authorize(config: &Config, task: &QuizTask) -> Result<(), StatusCode> {
    if task.secret == config.secret {
        Ok(())
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/run", post(run_handler))
        .route("/health", get(health_handler))
        .route("/events", get(sse_handler))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(state)
}

/// Serve on the configured address, trying the next nine ports if it is
/// taken.
pub async fn serve(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr: std::net::SocketAddr = state.config.bind.parse()?;

    let mut listener = None;
    for port in addr.port()..addr.port().saturating_add(10) {
        match tokio::net::TcpListener::bind((addr.ip(), port)).await {
            Ok(l) => {
                listener = Some(l);
                break;
            }
            Err(e) => warn!(port, error = %e, "port unavailable"),
        }
    }
    let listener = listener.ok_or_else(|| {
        anyhow::anyhow!("Could not bind to any port from {}. Kill the old agent first.", addr)
    })?;

    info!(addr = %listener.local_addr()?, "Intake server running");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn run_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<QuizTask>, JsonRejection>,
) -> (StatusCode, Json<serde_json::Value>) {
    let start_time = Instant::now();
    let task = match payload {
        Ok(Json(task)) => task,
        Err(rejection) => {
            warn!(error = %rejection, "rejected malformed task");
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid JSON" })));
        }
    };
    if let Err(status) = authorize(&state.config, &task) {
        warn!(email = %task.email, "rejected task with wrong secret");
        return (status, Json(json!({ "error": "invalid secret" })));
    }

    let run_id = state.next_run.fetch_add(1, Ordering::Relaxed);
    info!(run_id, url = %task.url, "accepted quiz task");

    let ctx = RunContext::new(run_id, &task.url).with_events(state.event_tx.clone());
    let driver = Arc::clone(&state.driver);
    let max_seconds = state.config.max_seconds;
    let handle = tokio::spawn(async move {
        driver
            .run(&ctx, &task.url, &task.email, &task.secret, start_time, max_seconds)
            .await;
    });
    tokio::spawn(async move {
        if let Err(e) = handle.await {
            error!(run_id, error = %e, "solver task aborted");
        }
    });

    (StatusCode::OK, Json(json!({ "status": "accepted", "run": run_id })))
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => Some(Ok::<_, Infallible>(event.to_sse_event())),
        Err(_) => None,
    });
    Sse::new(stream)
}
