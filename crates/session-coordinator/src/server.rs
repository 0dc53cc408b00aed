//! Signaling server assembly.

use crate::actors::CoordinatorActorHandle;
use crate::gateway::{ws_handler, GatewayState};

use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Build the signaling router: the WebSocket endpoint plus request
/// tracing.
pub fn signaling_router(coordinator: Arc<CoordinatorActorHandle>) -> Router {
    let state = GatewayState { coordinator };
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::recording::RecordingController;
    use crate::workers::WorkerPool;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use media_engine::EngineSettings;
    use tower::util::ServiceExt;

    fn coordinator() -> Arc<CoordinatorActorHandle> {
        let pool = Arc::new(
            WorkerPool::launch(1, &EngineSettings::default()).expect("pool should launch"),
        );
        let recording = RecordingController::new("sh".to_string(), std::env::temp_dir());
        Arc::new(CoordinatorActorHandle::new(
            "sc-test".to_string(),
            pool,
            recording,
            None,
        ))
    }

    #[tokio::test]
    async fn test_ws_route_rejects_plain_http() {
        let app = signaling_router(coordinator());

        // No upgrade headers, so the handshake is refused
        let request = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_ne!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_path_returns_404() {
        let app = signaling_router(coordinator());

        let request = Request::builder()
            .uri("/unknown")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
