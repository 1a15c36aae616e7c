use std::sync::Arc;

use tools::http::http_server::HttpServerProcess;

use crate::{Collector, ServiceFactory, Writer, runtime::process::ServiceProcess};

pub async fn build_services<P, C>(
    config: &C,
) -> anyhow::Result<(Arc<dyn Collector>, Arc<dyn Writer>)>
where
    P: ServiceFactory<dyn Collector, Config = C> + ServiceFactory<dyn Writer, Config = C>,
{
    let collector = P::from_config(config).await?;
    let writer = P::from_config(config).await?;
    Ok((collector, writer))
}

pub fn build_processes(
    collector: Arc<dyn Collector>,
    writer: Arc<dyn Writer>,
) -> Vec<Arc<dyn HttpServerProcess>> {
    vec![
        Arc::new(ServiceProcess::new(collector)),
        Arc::new(ServiceProcess::new(writer)),
    ]
}
