use anyhow::{Context, Result};
use engine::{build_processes, build_services};
use tools::http::http_server::{HttpServer, HttpServerConfig};

use crate::{config::Config, ui};

pub async fn start(config_path: std::path::PathBuf) -> Result<()> {
    let cfg = match Config::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            return {
                ui::print_config_error(&config_path, &e);
                Ok(())
            };
        }
    };

    let context = hass::Context::new(cfg.hass);
    let stats = context.stats.clone();

    let (collector, writer) = build_services::<hass::Provider, _>(&context).await?;
    let processes = build_processes(collector, writer);

    let server_config = HttpServerConfig {
        addr: cfg.general.server_addr.clone(),
        metrics_addr: cfg.general.metrics_addr.clone(),
        ..Default::default()
    };

    HttpServer::from_config(server_config)
        .with_processes(processes)
        .with_router(hass::services::health::router(stats))
        .run()
        .await
        .context("HTTP Server failed")
}
