use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing_subscriber::EnvFilter;

use resilience::{CircuitBreakerConfig, ServiceHealth};
use sentinel_rs::ai::AI_SERVICE_BREAKER;
use sentinel_rs::config::Config;
use sentinel_rs::db::init_pool;
use sentinel_rs::state::AppState;
use sentinel_rs::workers::followup::spawn_followup_worker;
use sentinel_rs::workers::replay_worker::{
    spawn_dlq_cleanup, spawn_health_monitor, spawn_replay_worker,
};

#[tokio::main]
async fn main() {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .json()
        .init();

    tracing::info!("Starting sentinel service...");

    let config = Config::from_env().expect("Failed to load configuration from environment");

    tracing::info!(
        host = %config.host,
        port = config.port,
        ai_mode = config.ai_mode.as_str(),
        "Configuration loaded"
    );

    // Database connection + migrations
    tracing::info!("Connecting to database...");
    let pool = init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running migrations...");
    sqlx::migrate!("./db/migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    // Shared circuit breakers for the two storage dependencies; the AI
    // breaker is created by the adapter itself.
    resilience::registry::get_or_create("database", CircuitBreakerConfig::default());
    resilience::registry::get_or_create("redis", CircuitBreakerConfig::default());

    let port = config.port;
    let (state, followup_rx) =
        AppState::assemble(config, pool).expect("Failed to assemble application state");

    register_health_probes(&state).await;

    // Background workers
    spawn_followup_worker(state.clone(), followup_rx);
    spawn_replay_worker(state.clone());
    spawn_dlq_cleanup(state.clone());
    spawn_health_monitor(state.clone());

    // HTTP surface
    let app = sentinel_rs::build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("sentinel service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .await
        .expect("Server failed to start");
}

/// Register async probes for the three outbound dependencies.
///
/// Database and Redis are critical (gate readiness); the AI provider is
/// reported but non-critical because every AI consumer has a rule fallback.
async fn register_health_probes(state: &AppState) {
    let pool = state.pool.clone();
    state
        .health
        .register("database", true, move || {
            let pool = pool.clone();
            Box::pin(async move {
                let started = Instant::now();
                match sqlx::query("SELECT 1").execute(&pool).await {
                    Ok(_) => {
                        let elapsed = started.elapsed();
                        if elapsed > Duration::from_millis(500) {
                            ServiceHealth::degraded("database", elapsed, "slow response")
                        } else {
                            ServiceHealth::healthy("database", elapsed)
                        }
                    }
                    Err(e) => ServiceHealth::unhealthy("database", e.to_string()),
                }
            })
        })
        .await;

    let idempotency = state.idempotency.clone();
    state
        .health
        .register("redis", true, move || {
            let idempotency = idempotency.clone();
            Box::pin(async move {
                let started = Instant::now();
                match idempotency.ping().await {
                    Ok(()) => ServiceHealth::healthy("redis", started.elapsed()),
                    Err(e) => ServiceHealth::unhealthy("redis", e.to_string()),
                }
            })
        })
        .await;

    let ai = state.ai.clone();
    state
        .health
        .register("ai_service", false, move || {
            let ai = ai.clone();
            Box::pin(async move {
                if !ai.is_enabled() {
                    return ServiceHealth::unhealthy("ai_service", "AI service disabled");
                }
                if let Some(breaker) = resilience::registry::get(AI_SERVICE_BREAKER) {
                    if breaker.is_open().await {
                        return ServiceHealth::unhealthy("ai_service", "circuit breaker open");
                    }
                }
                match ai.health_probe().await {
                    Ok(elapsed) => ServiceHealth::healthy("ai_service", elapsed),
                    Err(e) => ServiceHealth::unhealthy("ai_service", e.to_string()),
                }
            })
        })
        .await;
}
