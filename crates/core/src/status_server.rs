//! Status HTTP server for Storyframe
//!
//! Serves the current [`StatusSnapshot`] for monitoring tools.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

use crate::service::StoryService;
use crate::status::{collect_status, StatusSnapshot};

/// Errors that can occur when running the status server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid bind address {0}")]
    InvalidAddress(String),

    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

/// Handler for GET /status
async fn get_status(
    State(service): State<Arc<StoryService>>,
) -> Result<Json<StatusSnapshot>, StatusCode> {
    tokio::task::spawn_blocking(move || collect_status(&service))
        .await
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Creates the axum Router with the status endpoint
pub fn create_status_router(service: Arc<StoryService>) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .with_state(service)
}

/// Runs the status HTTP server on `bind` until it fails
pub async fn run_status_server(service: Arc<StoryService>, bind: &str) -> Result<(), ServerError> {
    let addr: SocketAddr = bind
        .parse()
        .map_err(|_| ServerError::InvalidAddress(bind.to_string()))?;
    let app = create_status_router(service);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "status server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
