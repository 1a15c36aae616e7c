use std::{fmt::Display, future::ready, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::{signal, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Long-running process hosted by the HTTP server.
///
/// `pre_run` is awaited for all processes before anything is served;
/// `run` is spawned with a cancellation token that fires on shutdown.
#[async_trait]
pub trait HttpServerProcess: Send + Sync + 'static {
    async fn pre_run(&self) -> Result<()>;
    async fn run(&self, token: CancellationToken) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    pub addr: String,
    pub metrics_addr: String,
    pub pre_run_tasks_timeout: Duration,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:9000".to_owned(),
            metrics_addr: "127.0.0.1:9007".to_owned(),
            pre_run_tasks_timeout: Duration::from_secs(60),
        }
    }
}

/// Application + metrics HTTP servers with hosted background processes.
#[derive(Default)]
pub struct HttpServer {
    config: HttpServerConfig,
    processes: Option<Vec<Arc<dyn HttpServerProcess>>>,
    router: Option<Router>,
}

impl HttpServer {
    #[must_use]
    pub fn from_config(config: HttpServerConfig) -> Self {
        Self {
            config,
            processes: None,
            router: None,
        }
    }

    #[must_use]
    pub fn with_processes(mut self, processes: Vec<Arc<dyn HttpServerProcess>>) -> Self {
        self.processes = Some(processes);
        self
    }

    /// Merges additional application routes (e.g., a health surface) into
    /// the default app router.
    #[must_use]
    pub fn with_router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    pub async fn run(self) -> Result<()> {
        // Pre-run processes
        let empty_vec = Vec::new();
        let processes = self.processes.as_ref().unwrap_or(&empty_vec);
        Self::pre_run_processes(processes, self.config.pre_run_tasks_timeout).await?;

        // Spawn run processes early (concurrent with servers)
        let shutdown = CancellationToken::new();
        let mut runnable_tasks = Self::run_processes(processes, shutdown.clone());

        // Bootstrap servers
        let mut app_router = get_default_router();
        if let Some(router) = self.router {
            app_router = app_router.merge(router);
        }

        let app_server = bootstrap_server(&self.config.addr, app_router, ServerKind::Application);
        let metrics_server = bootstrap_server(
            &self.config.metrics_addr,
            get_metrics_router(),
            ServerKind::Metrics,
        );

        // Run servers
        tokio::try_join!(app_server, metrics_server).context("Failed to bootstrap servers")?;

        // Signal shutdown (cancels token for processes)
        shutdown.cancel();

        // Wait for run tasks to finish gracefully
        Self::shutdown_processes(&mut runnable_tasks).await;

        Ok(())
    }

    async fn pre_run_processes(
        processes: &[Arc<dyn HttpServerProcess>],
        tasks_timeout: Duration,
    ) -> Result<()> {
        let tasks: Vec<_> = processes
            .iter()
            .map(|p| {
                let p = Arc::clone(p);
                tokio::spawn(async move { timeout(tasks_timeout, p.pre_run()).await })
            })
            .collect();

        for task in tasks {
            let result = task.await?.with_context(|| "Pre-run task failed")?;
            result?;
        }

        Ok(())
    }

    fn run_processes(
        processes: &[Arc<dyn HttpServerProcess>],
        token: CancellationToken,
    ) -> Vec<JoinHandle<Result<()>>> {
        processes
            .iter()
            .map(|p| {
                let p = Arc::clone(p);
                let token = token.clone();
                tokio::spawn(async move { p.run(token).await })
            })
            .collect()
    }

    async fn shutdown_processes(tasks: &mut [JoinHandle<Result<()>>]) {
        for task in tasks.iter_mut() {
            match task.await {
                Ok(Err(e)) => error!("Run task returned error: {:?}", e),
                Err(e) => error!("Failed to await run task: {:?}", e),
                Ok(Ok(())) => {}
            }
        }
    }
}

async fn bootstrap_server(addr: &str, router: Router, server_kind: ServerKind) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to address: {addr}"))?;

    info!("Listening {server_kind} server on {addr}");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .with_context(|| format!("Failed to start {server_kind} server on {addr}"))?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(unix)]
    let quit = async {
        signal::unix::signal(signal::unix::SignalKind::quit())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = quit => {},
    }
}

#[derive(Copy, Clone)]
enum ServerKind {
    Application,
    Metrics,
}

impl Display for ServerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Application => write!(f, "app"),
            Self::Metrics => write!(f, "metrics"),
        }
    }
}

fn get_default_router() -> Router {
    Router::new()
        .route("/readiness", get(|| async { "OK" }))
        .route("/liveness", get(|| async { "OK" }))
}

fn get_metrics_router() -> Router {
    let recorder_handle = setup_metrics_recorder();
    get_default_router().route("/metrics", get(move || ready(recorder_handle.render())))
}

fn setup_metrics_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
}
