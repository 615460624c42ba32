//! Read and write authorization for strategy groups.
//!
//! Read access, first match wins:
//! 1. the owner
//! 2. anyone, when the group is public and not deleted
//! 3. holders of an unexpired purchase of any listing for the group

use crate::domain::error::StratvaultError;
use crate::domain::strategy::StrategyGroup;
use crate::ports::clock_port::Clock;
use crate::ports::store_port::StrategyStore;
use std::sync::Arc;

pub struct AccessResolver {
    store: Arc<dyn StrategyStore>,
    clock: Arc<dyn Clock>,
}

impl AccessResolver {
    pub fn new(store: Arc<dyn StrategyStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn can_write(&self, user_id: i64, group: &StrategyGroup) -> bool {
        group.owner_id == user_id && !group.is_deleted()
    }

    /// Whether `user_id` may read `version_number` of the group. Missing
    /// groups and versions read as `false`.
    pub fn can_read(
        &self,
        user_id: i64,
        group_id: i64,
        version_number: u32,
    ) -> Result<bool, StratvaultError> {
        let Some(group) = self.store.get_group(group_id)? else {
            return Ok(false);
        };
        if self.store.get_version(group_id, version_number)?.is_none() {
            return Ok(false);
        }
        self.can_read_group(user_id, &group)
    }

    pub fn can_read_group(
        &self,
        user_id: i64,
        group: &StrategyGroup,
    ) -> Result<bool, StratvaultError> {
        if group.owner_id == user_id {
            tracing::debug!(user_id, group_id = group.id, "read granted: owner");
            return Ok(true);
        }
        if group.is_public && !group.is_deleted() {
            tracing::debug!(user_id, group_id = group.id, "read granted: public");
            return Ok(true);
        }
        let now = self.clock.now();
        let purchased = self
            .store
            .purchases_for_group(user_id, group.id)?
            .iter()
            .any(|p| p.is_active_at(now));
        tracing::debug!(user_id, group_id = group.id, purchased, "read decided by purchase");
        Ok(purchased)
    }

    /// Any purchase record counts, expired or not.
    pub fn has_purchased(&self, user_id: i64, listing_id: i64) -> Result<bool, StratvaultError> {
        Ok(self
            .store
            .purchases_for_buyer(user_id)?
            .iter()
            .any(|p| p.listing_id == listing_id))
    }
}
