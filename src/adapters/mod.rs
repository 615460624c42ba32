//! Concrete adapter implementations for ports.

pub mod file_config_adapter;
pub mod log_event_sink;
pub mod memory_adapter;
#[cfg(feature = "sqlite")]
pub mod sqlite_adapter;
pub mod system_clock;
