use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait Service: Send + Sync {
    async fn start(&self, token: CancellationToken) -> anyhow::Result<()>;
}

/// Collects events from the hub and feeds the record buffer.
#[async_trait]
pub trait Collector: Service {}

/// Drains the record buffer into the time-series store.
#[async_trait]
pub trait Writer: Service {}

/// Configuration sections that can check (and normalize) themselves.
pub trait Validatable {
    fn validate(&mut self) -> anyhow::Result<()>;
}
