#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use pixfarm_api::config::ServerConfig;
use pixfarm_api::middleware::owner::OWNER_HEADER;
use pixfarm_api::router::build_app_router;
use pixfarm_api::state::AppState;
use pixfarm_orchestrator::config::OrchestratorConfig;
use pixfarm_orchestrator::coordinator::BatchCoordinator;
use pixfarm_orchestrator::discovery::{NodeDirectory, StaticDiscovery};
use pixfarm_orchestrator::node_api::HttpNodeApi;
use pixfarm_orchestrator::registry::NodeRegistry;
use pixfarm_orchestrator::storage::LocalArtifactStorage;
use pixfarm_orchestrator::store::InMemoryJobStore;
use tower::ServiceExt;

pub const OWNER: i64 = 11;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        request_timeout_secs: 30,
        database_url: None,
    }
}

pub struct TestApp {
    pub router: Router,
    pub coordinator: BatchCoordinator,
    pub dir: tempfile::TempDir,
}

impl TestApp {
    /// Path of `name` inside the app's uploads directory.
    pub fn upload_ref(&self, name: &str) -> String {
        self.dir
            .path()
            .join("uploads")
            .join(name)
            .to_string_lossy()
            .into_owned()
    }
}

/// Build the full application router over an in-memory store and an empty
/// static node list, so no request ever leaves the process.
pub fn build_test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator_config = OrchestratorConfig {
        probe_timeout_secs: 1,
        uploads_dir: dir.path().join("uploads").to_string_lossy().into_owned(),
        results_dir: dir.path().join("results").to_string_lossy().into_owned(),
        ..OrchestratorConfig::default()
    };

    let node_api = Arc::new(HttpNodeApi::new());
    let registry = Arc::new(NodeRegistry::new(
        NodeDirectory::new(Arc::new(StaticDiscovery::new(HashMap::new())), "node."),
        node_api.clone(),
        Duration::from_secs(1),
    ));
    let coordinator = BatchCoordinator::new(
        &orchestrator_config,
        registry,
        node_api,
        Arc::new(InMemoryJobStore::new()),
        Arc::new(LocalArtifactStorage::new(
            &orchestrator_config.uploads_dir,
            &orchestrator_config.results_dir,
        )),
    );

    let config = test_config();
    let state = AppState {
        pool: None,
        config: Arc::new(config.clone()),
        coordinator: coordinator.clone(),
    };

    TestApp {
        router: build_app_router(state, &config),
        coordinator,
        dir,
    }
}

/// Send a request as `owner` (no owner header when `None`).
pub async fn send(
    app: &TestApp,
    method: Method,
    uri: &str,
    owner: Option<i64>,
    body: Option<serde_json::Value>,
) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(owner) = owner {
        builder = builder.header(OWNER_HEADER, owner.to_string());
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.router.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &TestApp, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, Some(OWNER), None).await
}

pub async fn post_json(app: &TestApp, uri: &str, body: serde_json::Value) -> Response<Body> {
    send(app, Method::POST, uri, Some(OWNER), Some(body)).await
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
