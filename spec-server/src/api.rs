use axum::{
    Router,
    extract::State,
    response::{IntoResponse, Response},
    routing::get,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::{
    api_error::ApiError,
    server::{SpecResponse, SpecServer, cors_headers},
};

pub const HEALTH_ROUTE: &str = "/health";

pub fn router(server: Arc<SpecServer>, docs_route: &str) -> Router {
    Router::new()
        .route(docs_route, get(api_document))
        .route(HEALTH_ROUTE, get(health))
        .with_state(server)
        .layer(TraceLayer::new_for_http())
}

pub async fn api_document(State(server): State<Arc<SpecServer>>) -> Response {
    match serve_document(server).await {
        Ok(response) => response.into_response(),
        Err(err) => (cors_headers(), err).into_response(),
    }
}

async fn serve_document(server: Arc<SpecServer>) -> Result<SpecResponse, ApiError> {
    tokio::task::spawn_blocking(move || server.serve())
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to join document task");
            ApiError::internal("Failed to generate API document")
        })?
        .map_err(|err| {
            tracing::error!(error = %err, "failed to serve API document");
            ApiError::internal("Failed to generate API document")
        })
}

async fn health() -> &'static str {
    "ok"
}
