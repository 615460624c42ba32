//! Strategy version manager.
//!
//! Every edit appends an immutable version to the group; nothing is updated
//! in place except the group header and the per-user active-version pointer.

use crate::domain::access::AccessResolver;
use crate::domain::error::StratvaultError;
use crate::domain::event::DomainEvent;
use crate::domain::pagination::{Page, PageRequest};
use crate::domain::rule_validator::RuleValidator;
use crate::domain::strategy::{
    INITIAL_VERSION_NOTES, NewStrategyMeta, NewVersion, StrategyGroup, StrategyVersion,
    VersionChanges, VersionHistory,
};
use crate::ports::clock_port::Clock;
use crate::ports::event_port::{EventSink, publish_or_warn};
use crate::ports::store_port::StrategyStore;
use std::sync::Arc;

pub struct VersionManager {
    store: Arc<dyn StrategyStore>,
    validator: Arc<RuleValidator>,
    access: Arc<AccessResolver>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl VersionManager {
    pub fn new(
        store: Arc<dyn StrategyStore>,
        validator: Arc<RuleValidator>,
        access: Arc<AccessResolver>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            validator,
            access,
            events,
            clock,
        }
    }

    pub fn create_group(
        &self,
        owner_id: i64,
        structure_json: &str,
        meta: NewStrategyMeta,
    ) -> Result<(StrategyGroup, StrategyVersion), StratvaultError> {
        meta.validate()?;
        let structure = self.validator.validate_json(structure_json)?;

        let first = NewVersion {
            group_id: 0,
            owner_id,
            structure,
            name: meta.name,
            description: meta.description,
            thumbnail_url: meta.thumbnail_url,
            is_public: meta.is_public,
            change_notes: INITIAL_VERSION_NOTES.to_string(),
        };
        let (group, version) = self.store.insert_group(&first, self.clock.now())?;
        tracing::info!(group_id = group.id, owner_id, "strategy created");

        publish_or_warn(
            self.events.as_ref(),
            DomainEvent::StrategyCreated {
                strategy_id: group.id,
                user_id: owner_id,
                name: group.name.clone(),
                version_number: version.version_number,
                timestamp: version.created_at,
            },
        );
        Ok((group, version))
    }

    pub fn create_version(
        &self,
        group_id: i64,
        editor_id: i64,
        structure_json: &str,
        changes: VersionChanges,
    ) -> Result<StrategyVersion, StratvaultError> {
        let group = self.writable_group(group_id, editor_id)?;
        changes.validate()?;
        let structure = self.validator.validate_json(structure_json)?;

        let latest = self.get_version(group_id, group.latest_version)?;
        let next = changes.apply(&latest, structure);
        self.append(next, editor_id)
    }

    pub fn get_version(
        &self,
        group_id: i64,
        version_number: u32,
    ) -> Result<StrategyVersion, StratvaultError> {
        self.store
            .get_version(group_id, version_number)?
            .ok_or_else(|| {
                StratvaultError::not_found("strategy version", format!("{group_id}/v{version_number}"))
            })
    }

    /// `get_version` for a specific reader.
    pub fn get_version_for(
        &self,
        user_id: i64,
        group_id: i64,
        version_number: u32,
    ) -> Result<StrategyVersion, StratvaultError> {
        let version = self.get_version(group_id, version_number)?;
        if !self.access.can_read(user_id, group_id, version_number)? {
            return Err(StratvaultError::permission_denied(format!(
                "user {user_id} cannot read strategy {group_id} version {version_number}"
            )));
        }
        Ok(version)
    }

    /// The user's pinned version while it stays readable, else the newest
    /// readable version. Never writes the preference.
    pub fn resolve_active_version(
        &self,
        group_id: i64,
        user_id: i64,
    ) -> Result<StrategyVersion, StratvaultError> {
        let not_found = || StratvaultError::not_found("strategy", group_id);
        self.store.get_group(group_id)?.ok_or_else(not_found)?;

        if let Some(pinned) = self.store.get_preference(user_id, group_id)? {
            if self.access.can_read(user_id, group_id, pinned)? {
                return self.get_version(group_id, pinned);
            }
            tracing::debug!(user_id, group_id, pinned, "pinned version no longer readable");
        }

        for version in self.store.list_versions(group_id)? {
            if self.access.can_read(user_id, group_id, version.version_number)? {
                return Ok(version);
            }
        }
        Err(not_found())
    }

    pub fn set_active_version(
        &self,
        user_id: i64,
        group_id: i64,
        version_number: u32,
    ) -> Result<(), StratvaultError> {
        self.get_version_for(user_id, group_id, version_number)?;
        self.store.set_preference(user_id, group_id, version_number)?;
        tracing::info!(user_id, group_id, version_number, "active version pinned");
        Ok(())
    }

    pub fn list_versions(
        &self,
        user_id: i64,
        group_id: i64,
    ) -> Result<VersionHistory, StratvaultError> {
        let group = self.readable_group(user_id, group_id)?;
        let active_version = match self.resolve_active_version(group.id, user_id) {
            Ok(v) => Some(v.version_number),
            Err(StratvaultError::NotFound { .. }) => None,
            Err(e) => return Err(e),
        };
        Ok(VersionHistory {
            group_id: group.id,
            active_version,
            versions: self.store.list_versions(group.id)?,
        })
    }

    /// Append a copy of an old version as the newest version.
    pub fn restore_version(
        &self,
        group_id: i64,
        editor_id: i64,
        version_number: u32,
    ) -> Result<StrategyVersion, StratvaultError> {
        self.writable_group(group_id, editor_id)?;
        let old = self.get_version(group_id, version_number)?;
        self.validator.validate(&old.structure)?;

        let next = NewVersion {
            group_id,
            owner_id: old.owner_id,
            structure: old.structure,
            name: old.name,
            description: old.description,
            thumbnail_url: old.thumbnail_url,
            is_public: old.is_public,
            change_notes: format!("Restored from version {version_number}"),
        };
        self.append(next, editor_id)
    }

    /// Copy the caller's active version of another strategy, and its tags,
    /// into a new private group owned by the caller.
    pub fn clone_strategy(
        &self,
        source_group_id: i64,
        user_id: i64,
        name: &str,
    ) -> Result<(StrategyGroup, StrategyVersion), StratvaultError> {
        let source = self.resolve_active_version(source_group_id, user_id)?;
        let meta = NewStrategyMeta {
            name: name.to_string(),
            description: format!("Cloned from: {}", source.name),
            thumbnail_url: None,
            is_public: false,
        };
        let (group, version) = self.create_group(user_id, source.structure.as_json(), meta)?;

        let tag_ids: Vec<i64> = self
            .store
            .tags_for_group(source_group_id)?
            .iter()
            .map(|t| t.id)
            .collect();
        if !tag_ids.is_empty() {
            self.store.set_group_tags(group.id, &tag_ids)?;
        }
        Ok((group, version))
    }

    /// Soft-delete the group and take its listings off the marketplace.
    /// Existing purchases keep their access.
    pub fn delete_group(&self, group_id: i64, user_id: i64) -> Result<(), StratvaultError> {
        self.writable_group(group_id, user_id)?;
        let now = self.clock.now();
        self.store.soft_delete_group(group_id, now)?;
        for listing in self.store.listings_for_group(group_id)? {
            if listing.active {
                self.store.set_listing_active(listing.id, false)?;
            }
        }
        tracing::info!(group_id, user_id, "strategy deleted");

        publish_or_warn(
            self.events.as_ref(),
            DomainEvent::StrategyDeleted {
                strategy_id: group_id,
                user_id,
                timestamp: now,
            },
        );
        Ok(())
    }

    /// Non-deleted groups the viewer can read, optionally for one owner
    /// and one tag.
    pub fn list_strategies(
        &self,
        viewer_id: i64,
        owner_id: Option<i64>,
        tag_id: Option<i64>,
        page: PageRequest,
    ) -> Result<Page<StrategyGroup>, StratvaultError> {
        let mut visible = Vec::new();
        for group in self.store.list_groups(owner_id, tag_id)? {
            if self.access.can_read_group(viewer_id, &group)? {
                visible.push(group);
            }
        }
        Ok(Page::from_items(visible, page))
    }

    fn writable_group(&self, group_id: i64, user_id: i64) -> Result<StrategyGroup, StratvaultError> {
        let group = self
            .store
            .get_group(group_id)?
            .ok_or_else(|| StratvaultError::not_found("strategy", group_id))?;
        if group.is_deleted() {
            return Err(StratvaultError::permission_denied(format!(
                "strategy {group_id} has been deleted"
            )));
        }
        if !self.access.can_write(user_id, &group) {
            return Err(StratvaultError::permission_denied(format!(
                "user {user_id} does not own strategy {group_id}"
            )));
        }
        Ok(group)
    }

    /// Unreadable groups report `NotFound` so private strategies stay hidden.
    fn readable_group(&self, user_id: i64, group_id: i64) -> Result<StrategyGroup, StratvaultError> {
        let group = self
            .store
            .get_group(group_id)?
            .ok_or_else(|| StratvaultError::not_found("strategy", group_id))?;
        if !self.access.can_read_group(user_id, &group)? {
            return Err(StratvaultError::not_found("strategy", group_id));
        }
        Ok(group)
    }

    /// A concurrent append can win the version number; retry once.
    fn append(&self, next: NewVersion, editor_id: i64) -> Result<StrategyVersion, StratvaultError> {
        let version = match self.store.append_version(&next, self.clock.now()) {
            Err(StratvaultError::Duplicate { reason }) => {
                tracing::warn!(group_id = next.group_id, %reason, "version number taken, retrying");
                self.store.append_version(&next, self.clock.now())?
            }
            other => other?,
        };
        tracing::info!(
            group_id = version.group_id,
            version_number = version.version_number,
            "strategy version created"
        );

        publish_or_warn(
            self.events.as_ref(),
            DomainEvent::VersionCreated {
                strategy_id: version.group_id,
                user_id: editor_id,
                version_number: version.version_number,
                change_notes: version.change_notes.clone(),
                timestamp: version.created_at,
            },
        );
        Ok(version)
    }
}
