//! The HTTP adapter (C8): a single `POST /inform` route that hands the raw
//! request body to a [`Reconciler`] and writes back whatever it returns.
//! Every other path or method is a client error, never a panic.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;

use crate::reconcile::Reconciler;

#[derive(Clone)]
struct AppState {
    reconciler: Arc<Reconciler>,
}

pub fn router(reconciler: Arc<Reconciler>) -> Router {
    let state = AppState { reconciler };
    Router::new()
        .route("/inform", post(inform))
        .fallback(not_found)
        .with_state(state)
}

async fn inform(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    match state.reconciler.handle(&body) {
        Ok(reply) => (
            StatusCode::OK,
            [("content-type", "application/octet-stream")],
            reply,
        )
            .into_response(),
        Err(e) if e.is_request_error() => {
            tracing::warn!(error = %e, "inform request rejected");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "inform reply construction failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn not_found() -> impl IntoResponse {
    StatusCode::NOT_FOUND
}
