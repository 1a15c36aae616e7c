pub mod hub_client;
pub mod influx;
pub mod metadata;
