pub mod config;
pub mod libs;
pub mod services;

pub use config::Config;
pub use services::{Context, Provider};
