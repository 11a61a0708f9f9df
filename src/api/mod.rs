//! HTTP read API over the persisted snapshot
//!
//! Handlers never call the external service except `POST /api/stats/refresh`,
//! which runs one refresh synchronously through the shared [`Refresher`].

pub mod error;
pub mod routes;

use crate::pipeline::db::SnapshotStore;
use crate::pipeline::refresher::Refresher;
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;

pub use error::{panic_response, ApiError, ErrorResponse};

/// Shared state for all handlers
pub struct AppState {
    pub store: Arc<dyn SnapshotStore>,
    pub refresher: Arc<Refresher>,
    /// Include error details in 500 bodies (development only)
    pub expose_error_details: bool,
    /// Manual refreshes are cancelled with the process
    pub shutdown: CancellationToken,
}

/// Build the router. `log_requests` enables per-request access logging.
pub fn router(state: Arc<AppState>, log_requests: bool) -> Router {
    let expose_error_details = state.expose_error_details;
    let router = Router::new()
        .route("/health", get(routes::data_health))
        .route("/api/stats/health", get(routes::liveness))
        .route("/api/stats/states", get(routes::list_states))
        .route("/api/stats/states/{state_name}", get(routes::get_state))
        .route("/api/stats/refresh", post(routes::refresh))
        .with_state(state);

    let router = if log_requests {
        router.layer(middleware::from_fn(log_request))
    } else {
        router
    };
    with_error_handling(router, expose_error_details)
}

/// Outer layers: panics become the JSON 500 body, any origin may call the API
pub fn with_error_handling(router: Router, expose_error_details: bool) -> Router {
    router
        .layer(CatchPanicLayer::custom(move |panic: Box<dyn Any + Send + 'static>| {
            panic_response(panic, expose_error_details)
        }))
        .layer(CorsLayer::permissive())
}

/// Cancel `shutdown` once `signal` resolves. A signal that fails to
/// register leaves the token alone.
pub async fn cancel_on_signal<F>(signal: F, shutdown: CancellationToken)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            log::info!("⚠️  Received CTRL+C, shutting down...");
            shutdown.cancel();
        }
        Err(err) => log::error!("❌ Failed to listen for CTRL+C: {}", err),
    }
}

async fn log_request(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    log::info!(
        "➡️  {} {} -> {} ({}ms)",
        method,
        path,
        response.status().as_u16(),
        start.elapsed().as_millis()
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signal_cancels_shutdown() {
        let token = CancellationToken::new();
        cancel_on_signal(async { Ok(()) }, token.clone()).await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_failed_signal_registration_keeps_serving() {
        let token = CancellationToken::new();
        cancel_on_signal(
            async { Err(std::io::Error::new(std::io::ErrorKind::Other, "no signal handler")) },
            token.clone(),
        )
        .await;
        assert!(!token.is_cancelled());
    }
}
