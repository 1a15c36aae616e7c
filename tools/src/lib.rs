pub mod http;
pub mod observability;
pub mod toml;

use rustls::crypto::ring;

use crate::observability::setup_tracing;

/// Initializes the application with essential setup routines.
///
/// This function should be called early in the application lifecycle
/// to configure panic handling, tracing output, and the TLS crypto
/// provider.
///
/// # Arguments
///
/// * `name` - The name of the application (typically `env!("CARGO_PKG_NAME")`).
///
/// # Errors
///
/// Returns an error if setup fails (e.g., tracing init or rustls provider install).
pub fn setup_application(name: &'static str) -> anyhow::Result<()> {
    // Setup custom panic hook to handle runtime panics gracefully.
    setup_panic_hook();
    // Setup logs/tracing.
    setup_tracing(name);
    // Install rustls crypto provider (ring backend) to fix TLS init panic.
    setup_tls_provider()
}

/// Sets up a custom panic hook for the application.
///
/// Chains the previously installed hook (so the standard backtrace still
/// reaches stderr), then records the panic message and, if available, its
/// source location as structured `tracing` fields. A panicking ingestion
/// process cannot be trusted to keep its buffers consistent, so the hook
/// exits with code 1 and lets the orchestrator restart it.
///
/// # Usage
/// Call this function early in `main()` to ensure all panics are logged properly.
pub fn setup_panic_hook() {
    let previous_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        previous_hook(panic_info);

        if let Some(location) = panic_info.location() {
            tracing::error!(
                message = %panic_info,
                panic.file = location.file(),
                panic.line = location.line(),
                panic.column = location.column(),
            );
        } else {
            tracing::error!(message = %panic_info);
        }

        #[allow(clippy::exit)]
        std::process::exit(1);
    }))
}

/// Installs the rustls crypto provider (ring backend).
///
/// Called early in the application lifecycle, before any TLS handshake.
/// In rustls 0.23+ the provider is not automatically determined, leading to
/// a panic during the handshake ("Could not automatically determine the
/// process-level CryptoProvider").
pub fn setup_tls_provider() -> anyhow::Result<()> {
    ring::default_provider()
        .install_default()
        .map_err(|e| anyhow::anyhow!("Failed to install rustls crypto provider: {e:?}"))
}
