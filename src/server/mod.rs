mod assets;
mod hub;

pub use hub::*;

use crate::domain::{Project, Session};
use crate::infra::{
    ReaderError, TranscriptsWatcher, get_session, list_projects, watch_transcripts_dir,
};
use axum::extract::{Path as UrlPath, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::sse::{Event, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::StreamExt as _;
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;

#[derive(Clone)]
pub struct AppState {
    pub projects_dir: Arc<PathBuf>,
    pub hub: Arc<BroadcastHub>,
}

impl AppState {
    pub fn new(projects_dir: PathBuf, heartbeat_interval: Duration) -> Self {
        Self {
            projects_dir: Arc::new(projects_dir),
            hub: Arc::new(BroadcastHub::new(heartbeat_interval)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub projects_dir: PathBuf,
    pub heartbeat_interval: Duration,
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

#[derive(Debug, Serialize)]
struct ProjectsResponse {
    projects: Vec<Project>,
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    session: Session,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/events", get(events))
        .route("/api/projects", get(projects))
        .route("/api/sessions/{project_name}/{session_id}", get(session))
        .with_state(state)
}

async fn root() -> impl IntoResponse {
    Html(assets::VIEWER_HTML)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "ok": true,
        "connections": state.hub.connection_count(),
    }))
}

async fn events(State(state): State<AppState>) -> Response {
    let stream = state.hub.register();
    tracing::debug!(conn_id = %stream.id(), "streaming events");
    let stream = stream.map(|event| Event::default().json_data(&event));

    let mut res = Sse::new(stream).into_response();
    let headers = res.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    res
}

async fn projects(State(state): State<AppState>) -> Response {
    let projects_dir = Arc::clone(&state.projects_dir);
    let result = tokio::task::spawn_blocking(move || list_projects(&projects_dir))
        .await
        .map_err(|error| error.to_string())
        .and_then(|res| res.map_err(|error| error.to_string()));

    match result {
        Ok(projects) => {
            tracing::debug!(projects = projects.len(), "listed projects");
            (StatusCode::OK, Json(ProjectsResponse { projects })).into_response()
        }
        Err(message) => {
            tracing::error!(error = %message, "failed to list projects");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, message)
        }
    }
}

async fn session(
    UrlPath((project_name, session_id)): UrlPath<(String, String)>,
    State(state): State<AppState>,
) -> Response {
    let projects_dir = Arc::clone(&state.projects_dir);
    let project_for_blocking = project_name.clone();
    let session_for_blocking = session_id.clone();
    let result = tokio::task::spawn_blocking(move || {
        get_session(&projects_dir, &project_for_blocking, &session_for_blocking)
    })
    .await;

    match result {
        Ok(Ok(Some(session))) => {
            (StatusCode::OK, Json(SessionResponse { session })).into_response()
        }
        Ok(Ok(None)) => {
            tracing::debug!(project = %project_name, session = %session_id, "session not found");
            error_response(StatusCode::NOT_FOUND, "Session not found")
        }
        Ok(Err(ReaderError::InvalidIdentifier(error))) => {
            tracing::warn!(
                project = %project_name,
                session = %session_id,
                error = %error,
                "rejected session lookup"
            );
            error_response(StatusCode::BAD_REQUEST, "Invalid identifier")
        }
        Ok(Err(error)) => {
            tracing::error!(
                project = %project_name,
                session = %session_id,
                error = %error,
                "failed to load session"
            );
            error_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
        Err(error) => {
            tracing::error!(
                project = %project_name,
                session = %session_id,
                error = %error,
                "session task failed"
            );
            error_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn start_watcher(projects_dir: &Path, hub: &Arc<BroadcastHub>) -> Option<TranscriptsWatcher> {
    let sink = Arc::clone(hub);
    match watch_transcripts_dir(projects_dir, move |event| {
        sink.broadcast(event);
    }) {
        Ok(watcher) => {
            tracing::info!(path = %watcher.root().display(), "watching transcripts");
            Some(watcher)
        }
        Err(error) => {
            tracing::warn!(
                path = %projects_dir.display(),
                error = %error,
                "live updates disabled: cannot watch projects directory"
            );
            None
        }
    }
}

pub async fn run_http_server(config: ServerConfig) -> Result<(), ServeError> {
    let listener = TcpListener::bind(config.addr)
        .await
        .map_err(|source| ServeError::Bind {
            addr: config.addr,
            source,
        })?;
    let state = AppState::new(config.projects_dir, config.heartbeat_interval);
    serve(listener, state, shutdown_signal()).await
}

/// Serves on an already bound listener until `shutdown` resolves, then stops
/// the watcher and ends every open event stream.
pub async fn serve<F>(
    listener: TcpListener,
    state: AppState,
    shutdown: F,
) -> Result<(), ServeError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let watcher = start_watcher(&state.projects_dir, &state.hub);
    let hub = Arc::clone(&state.hub);

    if let Ok(addr) = listener.local_addr() {
        tracing::info!(
            addr = %addr,
            projects_dir = %state.projects_dir.display(),
            "ccview listening on http://{addr}"
        );
    }

    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            tracing::info!("shutting down");
            drop(watcher);
            hub.shutdown();
        })
        .await
        .map_err(ServeError::Serve)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::warn!(error = %error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
