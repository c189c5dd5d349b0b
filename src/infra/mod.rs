//! Infrastructure adapters and runtime bootstrap.

pub mod disk_store;
pub mod error;
pub mod fs;
pub mod http;
pub mod outbox;
pub mod telemetry;
pub mod upstream;
