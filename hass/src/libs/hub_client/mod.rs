pub mod frame;
pub mod models;
pub mod ws;

pub use frame::{ClientFrame, CodecError, CorrelationIds, ServerFrame};
pub use models::{DeviceEntry, EntityEntry, EventData, RawEvent, StateObject};
pub use ws::{ConnectConfig, ConnectError};
