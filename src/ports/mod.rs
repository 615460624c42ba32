//! Port traits: the boundary between domain services and adapters.

pub mod clock_port;
pub mod config_port;
pub mod event_port;
pub mod identity_port;
pub mod store_port;
