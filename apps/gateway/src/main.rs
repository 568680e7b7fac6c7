use axum::{routing::get, Router};
use axum_helpers::server::create_production_app;
use axum_helpers::{create_cors_layer, create_permissive_cors_layer, ShutdownCoordinator};
use broker::{DomainEvent, EventBus, JobBroker, Janitor, WorkerRegistry};
use core_config::tracing::{init_tracing, install_color_eyre};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

mod api;
mod config;
mod connections;
mod fanout;
mod openapi;
mod state;
mod submitter;
mod ws;

use config::Config;
use connections::ConnectionRegistry;
use state::AppState;
use submitter::SubmitterMap;

/// Events fan out to monitors, subscribers, and SSE streams; a slow or absent
/// consumer should lag rather than block a submitting request, so the bus is
/// sized generously.
const EVENT_BUS_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    install_color_eyre();

    let config = Config::from_env()?;
    init_tracing(&config.environment);
    observability::init_metrics();
    info!("prometheus metrics initialized");

    let conn = database::redis::connect_from_config_with_retry(config.redis.clone(), None)
        .await
        .map_err(|e| eyre::eyre!("redis connection failed: {e}"))?;

    let (events_tx, _rx) = tokio::sync::broadcast::channel::<DomainEvent>(EVENT_BUS_CAPACITY);

    let broker = JobBroker::new(conn.clone(), events_tx.clone(), &config.broker);
    let registry = WorkerRegistry::new(conn.clone(), events_tx.clone(), config.broker.heartbeat_ttl_seconds);
    let janitor = Arc::new(Janitor::new(
        broker.clone(),
        registry.clone(),
        config.broker.default_max_job_age_minutes,
    ));
    janitor.clone().spawn_periodic(Duration::from_secs(config.broker.janitor_interval_seconds));

    // Pub/sub subscribe isn't supported on `ConnectionManager`, so the
    // Event Bus opens its own dedicated client rather than sharing `conn`.
    let pubsub_client = redis::Client::open(config.redis.url.as_str())
        .map_err(|e| eyre::eyre!("redis pubsub client failed: {e}"))?;
    EventBus::new(pubsub_client, broker.clone(), registry.clone(), events_tx.clone()).spawn();

    let connections = Arc::new(ConnectionRegistry::new());
    let submitters = Arc::new(SubmitterMap::new());
    let (shutdown, _shutdown_rx) = ShutdownCoordinator::new();

    let state = AppState {
        config: Arc::new(config),
        broker: broker.clone(),
        registry,
        janitor,
        connections: connections.clone(),
        submitters: submitters.clone(),
        shutdown,
    };

    fanout::spawn(broker, connections, submitters);

    let cors = if state.config.cors_allowed_origin == "*" {
        create_permissive_cors_layer()
    } else {
        let origin = state.config.cors_allowed_origin.parse().expect("invalid CORS_ALLOWED_ORIGIN");
        create_cors_layer(origin)
    };
    let app_routes = api::router(state.clone())
        .merge(ws::router().with_state(state.clone()))
        .layer(cors);

    let metrics_router = Router::new().route("/metrics", get(observability::metrics_handler));
    let ready_router = Router::new().route("/ready", get(move || readiness(conn.clone())));

    let router = axum_helpers::server::create_router::<openapi::ApiDoc>(app_routes)
        .await?
        .merge(metrics_router)
        .merge(ready_router);

    let server_config = state.config.server.clone();
    let shutdown_timeout = Duration::from_secs(state.config.shutdown_timeout_seconds);
    info!("starting gateway with production-ready shutdown ({shutdown_timeout:?} timeout)");

    create_production_app(router, &server_config, shutdown_timeout, async move {
        info!("shutting down: closing redis connection");
        drop(state.broker);
    })
    .await
    .map_err(|e| eyre::eyre!("server error: {e}"))?;

    info!("gateway shutdown complete");
    Ok(())
}

/// Readiness probe: pings the shared Redis connection the Broker and
/// Worker Registry both depend on. `/health` (mounted by `create_router`)
/// only proves the process is up; this is what a k8s readiness probe
/// should actually gate on.
async fn readiness(conn: redis::aio::ConnectionManager) -> impl axum::response::IntoResponse {
    let checks: Vec<(&str, axum_helpers::health::HealthCheckFuture<'_>)> = vec![(
        "redis",
        Box::pin(async move {
            let mut conn = conn;
            database::redis::check_health(&mut conn).await.map_err(|e| e.to_string())
        }),
    )];
    axum_helpers::health::run_health_checks(checks).await
}
