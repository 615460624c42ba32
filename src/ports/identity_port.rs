//! User identity lookup port.

use crate::domain::error::StratvaultError;

pub trait IdentityPort: Send + Sync {
    /// Display name for a user; `NotFound` for unknown ids.
    fn username(&self, user_id: i64) -> Result<String, StratvaultError>;
}
