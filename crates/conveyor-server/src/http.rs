//! Axum frontend over [`Backend`] (spec §4.6): `GET /`, `POST /jobs/new`,
//! `GET /jobs/complete`, `POST /jobs/complete`.

use crate::auth::require_valid_signature;
use crate::backend::Backend;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::{middleware, Router};
use conveyor_core::{BasicReply, ConveyorError, JobSpecification, ProcessedJob};
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone)]
struct AppState {
    backend: Arc<Backend>,
}

pub fn router(backend: Arc<Backend>, shared_key: String) -> Router {
    let shared_key = Arc::new(shared_key);
    let state = AppState { backend };

    let authenticated = Router::new()
        .route("/jobs/new", post(post_new_job))
        .route("/jobs/complete", get(get_job_status).post(post_job_status))
        .layer(middleware::from_fn_with_state(
            shared_key,
            require_valid_signature,
        ));

    Router::new()
        .route("/", get(index))
        .merge(authenticated)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}

async fn index() -> impl IntoResponse {
    Json(BasicReply::ok())
}

impl IntoResponse for ConveyorError {
    fn into_response(self) -> Response {
        let status = self.http_status();
        (status, Json(BasicReply::error(self.to_string()))).into_response()
    }
}

async fn post_new_job(
    State(state): State<AppState>,
    Json(spec): Json<JobSpecification>,
) -> Result<impl IntoResponse, ConveyorError> {
    let reply = state.backend.post_new_job(spec).await?;
    Ok(Json(reply))
}

/// Repeated `id` params aren't representable by axum's default
/// `serde_urlencoded`-backed `Query` extractor, so the query string is
/// parsed by hand — the same canonical string the middleware already
/// verified the signature against.
fn parse_job_status_query(uri: &Uri) -> (Vec<Uuid>, bool) {
    let mut ids = Vec::new();
    let mut full = false;
    for (key, value) in url::form_urlencoded::parse(uri.query().unwrap_or("").as_bytes()) {
        match key.as_ref() {
            "id" => {
                if let Ok(id) = value.parse() {
                    ids.push(id);
                }
            }
            "full" => full = value == "true",
            _ => {}
        }
    }
    (ids, full)
}

async fn get_job_status(
    State(state): State<AppState>,
    uri: Uri,
) -> Result<impl IntoResponse, ConveyorError> {
    let (ids, full) = parse_job_status_query(&uri);
    let reply = state.backend.get_job_status(&ids, full).await?;
    Ok(Json(reply))
}

async fn post_job_status(
    State(state): State<AppState>,
    Json(job): Json<ProcessedJob>,
) -> Result<impl IntoResponse, ConveyorError> {
    let reply = state.backend.post_job_status(&job).await?;
    Ok(Json(reply))
}
