pub mod enums;
pub mod runtime;
pub mod service;

pub use runtime::{
    backoff::Backoff,
    metrics::{METRICS, Metrics},
    stats::{IngestStats, LastError, StatsSnapshot},
};
pub use service::{
    builder::{build_processes, build_services},
    factory::ServiceFactory,
    traits::{Collector, Service, Validatable, Writer},
};
