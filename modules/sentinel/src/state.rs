//! Shared application state

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::mpsc;

use resilience::{HealthChecker, SlidingWindowLimiter};

use crate::ai::{AiClient, PromptLoader};
use crate::config::Config;
use crate::error::AppError;
use crate::idempotency::IdempotencyService;
use crate::services::policy::PolicyStore;
use crate::services::resolution::{ResolutionEngine, SimulatedActionRunner};
use crate::workers::followup::{FollowUpQueue, FollowUpTask};

const HEALTH_CACHE_TTL: Duration = Duration::from_secs(10);

/// Everything handlers and workers need, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub idempotency: Arc<IdempotencyService>,
    pub prompts: Arc<PromptLoader>,
    pub ai: Arc<AiClient>,
    pub policies: Arc<PolicyStore>,
    pub resolution: Arc<ResolutionEngine>,
    pub followups: FollowUpQueue,
    pub ingest_limiter: Arc<SlidingWindowLimiter>,
    pub health: Arc<HealthChecker>,
}

impl AppState {
    /// Wire the full application state from configuration and a pool.
    ///
    /// Returns the state plus the follow-up queue receiver for the worker.
    pub fn assemble(
        config: Config,
        pool: PgPool,
    ) -> Result<(AppState, mpsc::Receiver<FollowUpTask>), AppError> {
        let config = Arc::new(config);

        let idempotency = Arc::new(IdempotencyService::new(&config.redis_url)?);
        let prompts = Arc::new(PromptLoader::new(config.prompts_dir.clone()));
        let ai = Arc::new(AiClient::from_config(&config, prompts.clone()));
        let policies = Arc::new(PolicyStore::new());
        let resolution = Arc::new(ResolutionEngine::new(Arc::new(SimulatedActionRunner)));

        let (followups, followup_rx) = FollowUpQueue::bounded(config.followup_queue_capacity);

        let ingest_limiter = Arc::new(SlidingWindowLimiter::new(
            config.ingest_rate_limit_per_minute,
            Duration::from_secs(60),
        ));

        let health = Arc::new(HealthChecker::new(HEALTH_CACHE_TTL));

        Ok((
            AppState {
                pool,
                config,
                idempotency,
                prompts,
                ai,
                policies,
                resolution,
                followups,
                ingest_limiter,
                health,
            },
            followup_rx,
        ))
    }
}
