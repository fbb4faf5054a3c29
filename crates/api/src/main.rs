use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pixfarm_orchestrator::config::OrchestratorConfig;
use pixfarm_orchestrator::coordinator::BatchCoordinator;
use pixfarm_orchestrator::discovery::{
    DiscoveryService, HttpDiscoveryClient, NodeDirectory, StaticDiscovery,
};
use pixfarm_orchestrator::node_api::HttpNodeApi;
use pixfarm_orchestrator::registry::NodeRegistry;
use pixfarm_orchestrator::storage::LocalArtifactStorage;
use pixfarm_orchestrator::store::{InMemoryJobStore, JobStore, PgJobStore};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pixfarm_api::config::ServerConfig;
use pixfarm_api::router::build_app_router;
use pixfarm_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "pixfarm_api=debug,pixfarm_orchestrator=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let orchestrator_config = OrchestratorConfig::from_env();
    tracing::info!(
        max_workers = orchestrator_config.max_workers,
        dispatch_timeout_secs = orchestrator_config.dispatch_timeout_secs,
        batch_deadline_secs = orchestrator_config.batch_deadline_secs,
        "Loaded orchestrator configuration",
    );

    // --- Persistence ---
    let pool = match &config.database_url {
        Some(database_url) => {
            let pool = pixfarm_db::create_pool(database_url)
                .await
                .expect("Failed to connect to database");
            tracing::info!("Database connection pool created");

            pixfarm_db::health_check(&pool)
                .await
                .expect("Database health check failed");
            tracing::info!("Database health check passed");

            pixfarm_db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("Database migrations applied");
            Some(pool)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, batch records are kept in memory only");
            None
        }
    };
    let store: Arc<dyn JobStore> = match &pool {
        Some(pool) => Arc::new(PgJobStore::new(pool.clone())),
        None => Arc::new(InMemoryJobStore::new()),
    };

    // --- Nodes ---
    let http = reqwest::Client::new();
    let discovery: Arc<dyn DiscoveryService> = match &orchestrator_config.discovery_url {
        Some(url) => {
            tracing::info!(%url, "Using HTTP discovery service");
            Arc::new(HttpDiscoveryClient::with_client(http.clone(), url.clone()))
        }
        None => {
            let entries = orchestrator_config.node_endpoints.as_deref().unwrap_or("");
            let discovery =
                StaticDiscovery::parse(entries, &orchestrator_config.node_name_prefix)
                    .expect("NODE_ENDPOINTS must be a comma-separated node_id=url list");
            tracing::info!("Using static node list");
            Arc::new(discovery)
        }
    };
    let node_api = Arc::new(HttpNodeApi::with_client(http));
    let registry = Arc::new(NodeRegistry::new(
        NodeDirectory::new(discovery, orchestrator_config.node_name_prefix.clone()),
        node_api.clone(),
        orchestrator_config.probe_timeout(),
    ));

    match registry.discover().await {
        Ok(known) => tracing::info!(known, "Initial node discovery complete"),
        Err(e) => tracing::warn!(error = %e, "Initial node discovery failed, monitor will retry"),
    }

    let monitor_cancel = CancellationToken::new();
    let monitor_handle = Arc::clone(&registry).spawn_monitor(
        orchestrator_config.discovery_interval(),
        monitor_cancel.clone(),
    );

    // --- Coordinator ---
    let storage = Arc::new(LocalArtifactStorage::new(
        &orchestrator_config.uploads_dir,
        &orchestrator_config.results_dir,
    ));
    let coordinator = BatchCoordinator::new(
        &orchestrator_config,
        registry,
        node_api,
        store,
        storage,
    );

    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        coordinator: coordinator.clone(),
    };

    let app = build_app_router(state, &config);

    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Server stopped accepting connections, cleaning up");

    monitor_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), monitor_handle).await;
    tracing::info!("Node discovery monitor stopped");

    coordinator.shutdown().await;

    tracing::info!("Graceful shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
