//! HTTP routes: the distribution route, health, and metrics.

use crate::state::AppState;
use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use depot_core::FileHash;
use prometheus::{Encoder, TextEncoder};

/// Build the application router.
///
/// The distribution route is only mounted on distribution nodes; a cache
/// node that merely pulls from a peer exposes health and metrics alone.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new().route("/healthz", get(healthz));
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }
    if state.config.cache.is_distribution_node {
        router = router.route(
            &format!("{}/{{hash}}", depot_cache::DISTRIBUTION_ROUTE),
            get(get_file),
        );
    }
    router.with_state(state)
}

/// GET /healthz - liveness probe.
async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

/// GET /metrics - Prometheus metrics endpoint.
async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = depot_cache::metrics::REGISTRY.gather();
    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {e}"),
        )
            .into_response(),
    }
}

/// GET /dist/files/{hash} - serve a file to a pulling peer.
async fn get_file(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Some(provider) = &state.token_provider {
        let expected = provider.bearer_token();
        let presented = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if presented != Some(expected.as_str()) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let hash = match FileHash::new(&hash) {
        Ok(hash) => hash,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    match state.provider.get_or_fetch(&hash).await {
        Some(served) => {
            let len = served.len();
            Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_LENGTH, len)
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(Body::from_stream(served.into_stream()))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::Request;
    use depot_cache::{CachedFileProvider, FetchCoordinator, NullTouchSink, StaticTokenProvider};
    use depot_core::AppConfig;
    use std::path::Path as FsPath;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn seed_hot(root: &FsPath, hash: &str, body: &[u8]) {
        let hash = FileHash::new(hash).unwrap();
        let path = depot_cache::layout::path_for(root, &hash);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, body).unwrap();
    }

    fn router_for(root: &FsPath, token: Option<&str>) -> Router {
        let config = AppConfig::for_testing(root);
        let provider = CachedFileProvider::new(
            &config.cache,
            None,
            FetchCoordinator::new(),
            Arc::new(NullTouchSink),
        );
        let token_provider = token
            .map(|t| Arc::new(StaticTokenProvider::new(t)) as Arc<dyn depot_cache::TokenProvider>);
        create_router(AppState::new(config, provider, token_provider))
    }

    async fn send(router: &Router, uri: &str, bearer: Option<&str>) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = bearer {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let response = router
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn serves_a_hot_file_with_content_length() {
        let dir = tempfile::tempdir().unwrap();
        seed_hot(dir.path(), "AB12", b"file body");
        let router = router_for(dir.path(), None);

        let request = Request::builder()
            .uri("/dist/files/ab12")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(CONTENT_LENGTH)
                .unwrap()
                .to_str()
                .unwrap(),
            "9"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"file body");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_for(dir.path(), None);
        let (status, _) = send(&router, "/dist/files/DEAD", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_hash_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_for(dir.path(), None);
        let (status, _) = send(&router, "/dist/files/not-hex", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn bearer_token_is_enforced_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        seed_hot(dir.path(), "AB34", b"secret bytes");
        let router = router_for(dir.path(), Some("expected-token"));

        let (status, _) = send(&router, "/dist/files/AB34", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(&router, "/dist/files/AB34", Some("wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, body) = send(&router, "/dist/files/AB34", Some("expected-token")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"secret bytes");
    }

    #[tokio::test]
    async fn non_distribution_nodes_do_not_mount_the_route() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::for_testing(dir.path());
        config.cache.is_distribution_node = false;
        let provider = CachedFileProvider::new(
            &config.cache,
            None,
            FetchCoordinator::new(),
            Arc::new(NullTouchSink),
        );
        let router = create_router(AppState::new(config, provider, None));

        let (status, _) = send(&router, "/dist/files/AB12", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&router, "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_endpoint_encodes_the_registry() {
        depot_cache::metrics::register_metrics();
        let dir = tempfile::tempdir().unwrap();
        let router = router_for(dir.path(), None);
        let (status, body) = send(&router, "/metrics", None).await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("depot_files_total"));
    }
}
