pub mod collector;
pub mod health;
pub mod writer;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use engine::{Backoff, Collector, IngestStats, ServiceFactory, Writer};

use crate::{
    config::Config,
    libs::influx::{StoreClient, StoreConfig},
    services::{
        collector::{CollectorService, registry::RegistryCache},
        writer::{RecordBuffer, WriterOptions, WriterService},
    },
};

/// Shared wiring for the collector and writer services.
///
/// Everything the two services share (counters, the record buffer, the
/// registry cache) is built once here and handed to both factories
/// explicitly; there are no process-wide singletons to reach for.
pub struct Context {
    pub config: Config,
    pub stats: Arc<IngestStats>,
    pub buffer: Arc<RecordBuffer>,
    pub registry: Arc<RegistryCache>,
}

impl Context {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let buffer = Arc::new(RecordBuffer::new(
            config.buffer_capacity,
            config.buffer_high_water,
        ));

        Self {
            stats: Arc::new(IngestStats::new()),
            buffer,
            registry: Arc::new(RegistryCache::new()),
            config,
        }
    }
}

pub struct Provider;

#[async_trait]
impl ServiceFactory<dyn Collector> for Provider {
    type Config = Context;

    async fn from_config(ctx: &Context) -> anyhow::Result<Arc<dyn Collector>> {
        Ok(Arc::new(CollectorService::from_context(ctx)?))
    }
}

#[async_trait]
impl ServiceFactory<dyn Writer> for Provider {
    type Config = Context;

    async fn from_config(ctx: &Context) -> anyhow::Result<Arc<dyn Writer>> {
        let store = StoreClient::new(StoreConfig::new(
            ctx.config.store_url.clone(),
            ctx.config.store_token.clone(),
        ))?;

        let options = WriterOptions {
            measurement: ctx.config.measurement.clone(),
            batch_size: ctx.config.batch_size,
            batch_timeout: Duration::from_secs(ctx.config.batch_timeout_sec),
            shutdown_flush_timeout: Duration::from_secs(10),
            max_retries_per_batch: 3,
            retry_backoff: Backoff::new(Duration::from_secs(1), Duration::from_secs(30)),
        };

        Ok(Arc::new(WriterService::new(
            store,
            Arc::clone(&ctx.buffer),
            Arc::clone(&ctx.stats),
            options,
        )))
    }
}
