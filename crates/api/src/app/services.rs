//! Service wiring: picks the store and external clients from configuration.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use leadflow_ai::{EmailGenerator, GeminiGenerator, GenerationError};
use leadflow_core::{Clock, SystemClock};
use leadflow_infra::{
    DeliveryError, DeliveryProvider, InMemoryStore, InboundMatcher, OutboundService, OutboundStore,
    PostgresStore, ResendProvider, ServiceConfig, StoreError, TickEngine,
};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Generation(#[from] GenerationError),
}

/// Everything the handlers need, shared behind one `Arc`.
pub struct AppServices {
    pub engine: TickEngine,
    pub matcher: InboundMatcher,
    pub outbound: OutboundService,
    pub cron_secret: Option<String>,
    pub webhook_secret: Option<String>,
}

impl AppServices {
    pub fn new(
        store: Arc<dyn OutboundStore>,
        generator: Arc<dyn EmailGenerator>,
        provider: Arc<dyn DeliveryProvider>,
        clock: Arc<dyn Clock>,
        config: &ServiceConfig,
    ) -> Self {
        let engine = TickEngine::new(
            Arc::clone(&store),
            generator,
            Arc::clone(&provider),
            Arc::clone(&clock),
            config.outbound.clone(),
        );
        let matcher = InboundMatcher::new(Arc::clone(&store), provider, Arc::clone(&clock));
        let outbound = OutboundService::new(store, clock, config.outbound.clone());

        Self {
            engine,
            matcher,
            outbound,
            cron_secret: config.cron_secret.clone(),
            webhook_secret: config.webhook_secret.clone(),
        }
    }
}

/// Postgres when `DATABASE_URL` is set (migrations applied on connect),
/// otherwise the in-memory store.
pub async fn build_services(config: &ServiceConfig) -> Result<AppServices, BuildError> {
    let store: Arc<dyn OutboundStore> = match config.database_url.as_deref() {
        Some(url) => {
            let store = PostgresStore::connect(url).await?;
            store.migrate().await?;
            info!("using postgres store");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set; state is in-memory and lost on exit");
            Arc::new(InMemoryStore::new())
        }
    };

    if config.delivery.api_key.is_none() {
        warn!("RESEND_API_KEY not set; sends will fail as not configured");
    }
    if config.gemini.api_key.is_none() {
        warn!("GEMINI_API_KEY not set; generation will fail as not configured");
    }
    if config.cron_secret.is_none() {
        warn!("CRON_SECRET not set; the tick endpoint rejects every request");
    }

    let generator = Arc::new(GeminiGenerator::new(config.gemini.clone())?);
    let provider = Arc::new(ResendProvider::new(config.delivery.clone())?);

    Ok(AppServices::new(store, generator, provider, Arc::new(SystemClock), config))
}
