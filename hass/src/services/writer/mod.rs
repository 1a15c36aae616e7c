pub mod buffer;
pub mod record;
pub mod service;

pub use buffer::{AppendError, RecordBuffer};
pub use record::NormalizedRecord;
pub use service::{WriterOptions, WriterService};
