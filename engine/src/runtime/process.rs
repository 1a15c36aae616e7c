use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tools::http::http_server::HttpServerProcess;
use tracing::{error, info};

use crate::service::traits::Service;

/// Hosts a [`Service`] inside the HTTP server process lifecycle.
///
/// A service that returns an error is restarted after `error_timeout_secs`;
/// a clean return is terminal (the service either finished its work, gave
/// up deliberately, or was cancelled) and the process stops.
pub struct ServiceProcess<S>
where
    S: Service + ?Sized,
{
    error_timeout_secs: Duration,
    service: Arc<S>,
}

impl<S: Service + ?Sized + 'static> ServiceProcess<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self {
            service,
            error_timeout_secs: Duration::from_secs(60),
        }
    }
}

#[async_trait]
impl<S: Service + ?Sized + 'static> HttpServerProcess for ServiceProcess<S> {
    async fn pre_run(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn run(&self, token: CancellationToken) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                result = self.service.start(token.child_token()) => {
                    match result {
                        Ok(()) => {
                            info!("service finished");
                            break;
                        }
                        Err(e) => {
                            error!(error = ?e, "service failed, restarting after timeout");
                            tokio::select! {
                                _ = token.cancelled() => break,
                                () = tokio::time::sleep(self.error_timeout_secs) => {}
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
