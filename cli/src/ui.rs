use std::path::Path;

use owo_colors::OwoColorize;

pub fn app_name() -> &'static str {
    "ingestd"
}

pub fn build_banner() -> String {
    format!(
        "{} - streams hub state changes into the time-series store",
        "ingestd".bold().cyan()
    )
}

pub fn print_version() {
    println!("{} {}", app_name(), env!("CARGO_PKG_VERSION"));
}

pub fn print_config_error(path: &Path, error: &anyhow::Error) {
    eprintln!(
        "{} failed to load config from {}:\n  {error:#}",
        "error:".bold().red(),
        path.display()
    );
}
