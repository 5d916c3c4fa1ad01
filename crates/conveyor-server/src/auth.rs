//! HMAC request authentication middleware (spec §4.1, §4.6).
//!
//! GET requests are verified against their canonical query string; POST
//! requests are verified against the raw body, which is then reinserted so
//! the handler can still deserialize it. Missing headers are `401`,
//! malformed signatures are `403` (spec §4.6's status table).

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use conveyor_core::{canonical_query_bytes, verify};
use std::sync::Arc;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

pub async fn require_valid_signature(
    State(shared_key): State<Arc<String>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if request.method() == Method::GET {
        let query = request.uri().query().unwrap_or("").to_string();
        if !verify(&canonical_query_bytes(&query), &token, &shared_key) {
            return Err(StatusCode::FORBIDDEN);
        }
        return Ok(next.run(request).await);
    }

    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    if !verify(&bytes, &token, &shared_key) {
        return Err(StatusCode::FORBIDDEN);
    }
    let request = Request::from_parts(parts, Body::from(bytes));
    Ok(next.run(request).await)
}
