//! HTTP API for the display layer.
//!
//! Sessions are opened per onboarding or top-up screen and closed when the
//! screen goes away. Funding attempts run in the background; clients follow
//! them through `GET /api/sessions/{id}`.

use axum::{
	extract::{Path, State},
	http::StatusCode,
	response::{IntoResponse, Json, Response},
	routing::{get, post},
	Router,
};
use funding_bridge::OrchestratorError;
use funding_core::{EngineError, FundingEngine, Presence, SessionView};
use funding_types::SessionId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

#[derive(Clone)]
struct AppState {
	engine: Arc<FundingEngine>,
}

#[derive(Debug, Deserialize)]
struct OpenSessionRequest {
	agent_id: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
	error: String,
	message: String,
}

/// Maps engine errors onto status codes.
struct ApiError(EngineError);

impl From<EngineError> for ApiError {
	fn from(error: EngineError) -> Self {
		Self(error)
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let (status, code) = match &self.0 {
			EngineError::UnknownSession(_) => (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND"),
			EngineError::UnknownAgent(_) => (StatusCode::NOT_FOUND, "AGENT_NOT_FOUND"),
			EngineError::Session(_) | EngineError::NothingToRetry(_) => {
				(StatusCode::CONFLICT, "INVALID_STATE")
			}
			EngineError::Bridge(OrchestratorError::Busy) => (StatusCode::CONFLICT, "BUSY"),
			EngineError::Balances(_) | EngineError::Requirements(_) => {
				(StatusCode::SERVICE_UNAVAILABLE, "DATA_UNAVAILABLE")
			}
			_ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
		};
		let body = ErrorResponse {
			error: code.to_string(),
			message: self.0.to_string(),
		};
		(status, Json(body)).into_response()
	}
}

fn router(engine: Arc<FundingEngine>) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/api/sessions", get(list_sessions).post(open_session))
		.route("/api/sessions/{id}", get(get_session).delete(close_session))
		.route("/api/sessions/{id}/fund", post(fund))
		.route("/api/sessions/{id}/retry", post(retry))
		.route("/api/sessions/{id}/presence", post(update_presence))
		.with_state(AppState { engine })
		.layer(TraceLayer::new_for_http())
		.layer(CorsLayer::permissive())
}

pub async fn start_http_server(engine: Arc<FundingEngine>, port: u16) -> anyhow::Result<()> {
	let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
	info!("API server listening on port {}", port);
	axum::serve(listener, router(engine)).await?;
	Ok(())
}

async fn health() -> Json<serde_json::Value> {
	Json(serde_json::json!({
		"status": "ok",
		"timestamp": chrono::Utc::now().timestamp(),
	}))
}

/// Opens a session and starts polling its requirements.
async fn open_session(
	State(state): State<AppState>,
	Json(request): Json<OpenSessionRequest>,
) -> Result<(StatusCode, Json<SessionView>), ApiError> {
	let session = state.engine.open_session(&request.agent_id).await?;
	state.engine.spawn_monitor(session.clone());
	Ok((StatusCode::CREATED, Json(session.view().await)))
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionView>> {
	let mut views = Vec::new();
	for session in state.engine.sessions() {
		views.push(session.view().await);
	}
	Json(views)
}

async fn get_session(
	State(state): State<AppState>,
	Path(id): Path<SessionId>,
) -> Result<Json<SessionView>, ApiError> {
	Ok(Json(state.engine.session_view(id).await?))
}

async fn close_session(
	State(state): State<AppState>,
	Path(id): Path<SessionId>,
) -> Result<StatusCode, ApiError> {
	state.engine.close_session(id).await?;
	Ok(StatusCode::NO_CONTENT)
}

/// Starts a funding attempt in the background.
async fn fund(
	State(state): State<AppState>,
	Path(id): Path<SessionId>,
) -> Result<StatusCode, ApiError> {
	state.engine.session(id)?;
	let engine = state.engine.clone();
	tokio::spawn(async move {
		match engine.fund(id).await {
			Ok(outcome) => info!(session_id = %id, ?outcome, "Funding attempt finished"),
			Err(e) => warn!(session_id = %id, "Funding attempt failed: {}", e),
		}
	});
	Ok(StatusCode::ACCEPTED)
}

/// Retries the last failed attempt in the background.
async fn retry(
	State(state): State<AppState>,
	Path(id): Path<SessionId>,
) -> Result<StatusCode, ApiError> {
	state.engine.session(id)?;
	let engine = state.engine.clone();
	tokio::spawn(async move {
		match engine.retry(id).await {
			Ok(outcome) => info!(session_id = %id, ?outcome, "Retry finished"),
			Err(e) => warn!(session_id = %id, "Retry failed: {}", e),
		}
	});
	Ok(StatusCode::ACCEPTED)
}

async fn update_presence(
	State(state): State<AppState>,
	Path(id): Path<SessionId>,
	Json(presence): Json<Presence>,
) -> Result<StatusCode, ApiError> {
	state.engine.session(id)?.set_presence(presence).await;
	Ok(StatusCode::NO_CONTENT)
}
