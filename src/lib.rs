//! stratvault: versioned trading-strategy storage with a rule-tree
//! validator, access control and a strategy marketplace.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`].

pub mod adapters;
#[cfg(feature = "sqlite")]
pub mod cli;
pub mod domain;
pub mod logging;
pub mod ports;
pub mod services;
