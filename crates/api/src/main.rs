//! Relay API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use relay_common::config::AppConfig;
use relay_common::db::{create_pool, run_migrations};
use relay_common::redis_pool::create_redis_pool;
use relay_engine::generator::NumberGenerator;
use relay_engine::pg_store::PgRecipientStore;
use relay_engine::sink::{BroadcastSink, EventSink, FanoutSink, RedisEventSink};
use relay_engine::supervisor::{ConnectionSupervisor, SupervisorConfig};
use relay_engine::{DispatchConfig, DispatchController, MemoryRecipientStore, RecipientStore};
use relay_gateway::GatewayTransport;

use relay_api::routes::create_router;
use relay_api::state::AppState;

/// Events buffered per SSE subscriber before it starts lagging.
const EVENT_BUFFER: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = AppConfig::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("relay_api=debug,relay_engine=debug,relay_gateway=debug,tower_http=debug")
    });
    if config.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!("Starting Relay API server...");

    // Recipient store
    let store: Arc<dyn RecipientStore> = match &config.database_url {
        Some(url) => {
            let pool = create_pool(url, config.db_max_connections).await?;
            run_migrations(&pool).await?;
            Arc::new(PgRecipientStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, recipients are kept in memory only");
            Arc::new(MemoryRecipientStore::new())
        }
    };

    // Observer events: SSE always, Redis when configured
    let events = BroadcastSink::new(EVENT_BUFFER);
    let mut sink = FanoutSink::new().with(Arc::new(events.clone()));
    if let Some(url) = &config.redis_url {
        let redis = create_redis_pool(url).await?;
        tracing::info!(channel = %config.events_channel, "Publishing events to Redis");
        sink = sink.with(Arc::new(RedisEventSink::new(
            redis,
            config.events_channel.clone(),
        )));
    }
    tracing::info!(sinks = sink.len(), "Event sinks ready");
    let sink: Arc<dyn EventSink> = Arc::new(sink);

    // Transport and its connection supervisor
    let transport = Arc::new(GatewayTransport::from_config(&config)?);
    let supervisor_config = SupervisorConfig {
        health_interval: Duration::from_secs(config.transport_health_interval_secs),
        ..SupervisorConfig::default()
    };
    let (supervisor, connected) =
        ConnectionSupervisor::new(transport.clone(), sink.clone(), supervisor_config);
    let supervisor_task = tokio::spawn(supervisor.run());

    // Dispatch controller
    let (controller, dispatch) = DispatchController::new(
        store.clone(),
        transport,
        sink,
        NumberGenerator::new(config.dispatch_max_quantity),
        DispatchConfig::from_app_config(&config),
        connected.clone(),
    );
    let controller_task = tokio::spawn(controller.run());

    // Build application state
    let state = AppState::new(dispatch, store, events, connected);

    // Build router
    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr: SocketAddr = config.bind_addr.parse().map_err(|e| {
        anyhow::anyhow!("Invalid API_BIND_ADDR {:?}: {}", config.bind_addr, e)
    })?;
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    supervisor_task.abort();
    controller_task.abort();
    tracing::info!("Relay API server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
