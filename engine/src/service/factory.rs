use std::sync::Arc;

use async_trait::async_trait;

/// Builds one service behind its trait object.
///
/// A provider implements this once per role it offers (in this workspace,
/// `dyn Collector` and `dyn Writer`) against a shared `Config` context, so
/// the launcher can assemble the whole pipeline without ever naming a
/// concrete service type. Factories are expected to be cheap: they wire
/// clients and shared state together, they do not connect anywhere yet.
#[async_trait]
pub trait ServiceFactory<T: ?Sized> {
    /// Shared wiring handed to every factory of the same provider, so the
    /// collector and the writer end up with the same counters and buffer.
    type Config;

    async fn from_config(config: &Self::Config) -> anyhow::Result<Arc<T>>;
}
