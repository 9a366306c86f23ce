//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod host;
pub(crate) mod lock;
pub mod memory;
pub mod network;
pub mod telemetry;
