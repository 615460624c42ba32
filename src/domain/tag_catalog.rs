//! Tag catalog: the shared tag vocabulary and per-strategy tag sets.

use crate::domain::access::AccessResolver;
use crate::domain::error::StratvaultError;
use crate::domain::pagination::{Page, PageRequest};
use crate::domain::tag::{Tag, TagWithCount, validate_tag_name};
use crate::ports::store_port::StrategyStore;
use std::sync::Arc;

pub struct TagCatalog {
    store: Arc<dyn StrategyStore>,
    access: Arc<AccessResolver>,
}

impl TagCatalog {
    pub fn new(store: Arc<dyn StrategyStore>, access: Arc<AccessResolver>) -> Self {
        Self { store, access }
    }

    pub fn create_tag(&self, name: &str) -> Result<Tag, StratvaultError> {
        let name = validate_tag_name(name)?;
        let tag = self.store.insert_tag(&name)?;
        tracing::info!(tag_id = tag.id, name = %tag.name, "tag created");
        Ok(tag)
    }

    pub fn get_tag(&self, tag_id: i64) -> Result<TagWithCount, StratvaultError> {
        self.store
            .get_tag(tag_id)?
            .ok_or_else(|| StratvaultError::not_found("tag", tag_id))
    }

    /// Tags ordered by name; `search` is a case-insensitive substring match.
    pub fn list_tags(
        &self,
        search: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<TagWithCount>, StratvaultError> {
        let needle = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);
        let tags = self
            .store
            .list_tags()?
            .into_iter()
            .filter(|t| {
                needle
                    .as_deref()
                    .is_none_or(|n| t.tag.name.to_lowercase().contains(n))
            })
            .collect();
        Ok(Page::from_items(tags, page))
    }

    /// The most used tags, most used first. Ties keep name order.
    pub fn popular_tags(&self, limit: usize) -> Result<Vec<TagWithCount>, StratvaultError> {
        let mut tags = self.store.list_tags()?;
        tags.sort_by(|a, b| b.strategy_count.cmp(&a.strategy_count));
        tags.truncate(limit);
        Ok(tags)
    }

    pub fn rename_tag(&self, tag_id: i64, name: &str) -> Result<Tag, StratvaultError> {
        let name = validate_tag_name(name)?;
        let tag = self.store.rename_tag(tag_id, &name)?;
        tracing::info!(tag_id, name = %tag.name, "tag renamed");
        Ok(tag)
    }

    pub fn delete_tag(&self, tag_id: i64) -> Result<(), StratvaultError> {
        self.store.delete_tag(tag_id)?;
        tracing::info!(tag_id, "tag deleted");
        Ok(())
    }

    /// Replace the tags of a strategy. Only the owner of a live strategy may
    /// tag it; repeated ids collapse to one link.
    pub fn set_strategy_tags(
        &self,
        user_id: i64,
        group_id: i64,
        tag_ids: &[i64],
    ) -> Result<Vec<Tag>, StratvaultError> {
        let group = self
            .store
            .get_group(group_id)?
            .ok_or_else(|| StratvaultError::not_found("strategy", group_id))?;
        if !self.access.can_write(user_id, &group) {
            return Err(StratvaultError::permission_denied(format!(
                "user {user_id} cannot tag strategy {group_id}"
            )));
        }

        let mut ids = tag_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        self.store.set_group_tags(group_id, &ids)?;
        tracing::info!(group_id, tags = ids.len(), "strategy tags replaced");
        self.store.tags_for_group(group_id)
    }

    /// Tags of a strategy the viewer can read. Unreadable strategies report
    /// `NotFound`.
    pub fn strategy_tags(&self, viewer_id: i64, group_id: i64) -> Result<Vec<Tag>, StratvaultError> {
        let group = self
            .store
            .get_group(group_id)?
            .ok_or_else(|| StratvaultError::not_found("strategy", group_id))?;
        if !self.access.can_read_group(viewer_id, &group)? {
            return Err(StratvaultError::not_found("strategy", group_id));
        }
        self.store.tags_for_group(group_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_adapter::MemoryStore;
    use crate::adapters::system_clock::SystemClock;
    use crate::domain::rule_parser::DEFAULT_MAX_DEPTH;
    use crate::domain::strategy::NewVersion;
    use crate::domain::structure::Structure;
    use chrono::Utc;

    const OWNER: i64 = 1;
    const OTHER: i64 = 2;

    fn catalog() -> (TagCatalog, Arc<MemoryStore>, i64) {
        let store = Arc::new(MemoryStore::new());
        let access = Arc::new(AccessResolver::new(store.clone(), Arc::new(SystemClock)));
        let first = NewVersion {
            group_id: 0,
            owner_id: OWNER,
            structure: Structure::parse(r#"{"buyRules":[],"sellRules":[]}"#, DEFAULT_MAX_DEPTH)
                .unwrap(),
            name: "Breakout".into(),
            description: String::new(),
            thumbnail_url: None,
            is_public: false,
            change_notes: "Initial version".into(),
        };
        let (group, _) = store.insert_group(&first, Utc::now()).unwrap();
        (TagCatalog::new(store.clone(), access), store, group.id)
    }

    #[test]
    fn create_trims_and_rejects_duplicates() {
        let (catalog, _, _) = catalog();
        assert_eq!(catalog.create_tag("  swing ").unwrap().name, "swing");
        assert!(matches!(
            catalog.create_tag("swing").unwrap_err(),
            StratvaultError::Duplicate { .. }
        ));
        assert!(matches!(
            catalog.create_tag("").unwrap_err(),
            StratvaultError::Validation(e) if e.path == "name"
        ));
    }

    #[test]
    fn list_filters_by_search() {
        let (catalog, _, _) = catalog();
        for name in ["Momentum", "mean-reversion", "swing"] {
            catalog.create_tag(name).unwrap();
        }
        let page = catalog.list_tags(Some("M"), PageRequest::default()).unwrap();
        let names: Vec<&str> = page.items.iter().map(|t| t.tag.name.as_str()).collect();
        assert_eq!(names, vec!["Momentum", "mean-reversion"]);
        assert_eq!(page.total, 2);
        assert_eq!(catalog.list_tags(Some("  "), PageRequest::default()).unwrap().total, 3);
    }

    #[test]
    fn only_owner_sets_tags() {
        let (catalog, store, group_id) = catalog();
        let a = catalog.create_tag("a").unwrap();
        let b = catalog.create_tag("b").unwrap();

        let tags = catalog
            .set_strategy_tags(OWNER, group_id, &[b.id, a.id, b.id])
            .unwrap();
        assert_eq!(tags, vec![a.clone(), b.clone()]);
        assert!(matches!(
            catalog.set_strategy_tags(OTHER, group_id, &[a.id]).unwrap_err(),
            StratvaultError::PermissionDenied { .. }
        ));

        store.soft_delete_group(group_id, Utc::now()).unwrap();
        assert!(matches!(
            catalog.set_strategy_tags(OWNER, group_id, &[]).unwrap_err(),
            StratvaultError::PermissionDenied { .. }
        ));
    }

    #[test]
    fn private_strategy_tags_hidden_from_others() {
        let (catalog, _, group_id) = catalog();
        let a = catalog.create_tag("a").unwrap();
        catalog.set_strategy_tags(OWNER, group_id, &[a.id]).unwrap();
        assert_eq!(catalog.strategy_tags(OWNER, group_id).unwrap(), vec![a]);
        assert!(matches!(
            catalog.strategy_tags(OTHER, group_id).unwrap_err(),
            StratvaultError::NotFound { .. }
        ));
    }

    #[test]
    fn popular_tags_rank_by_use() {
        let (catalog, store, group_id) = catalog();
        let rare = catalog.create_tag("aaa").unwrap();
        let common = catalog.create_tag("zzz").unwrap();
        catalog
            .set_strategy_tags(OWNER, group_id, &[common.id])
            .unwrap();
        let popular = catalog.popular_tags(5).unwrap();
        assert_eq!(popular[0].tag, common);
        assert_eq!(popular[0].strategy_count, 1);
        assert_eq!(popular[1].tag, rare);
        assert_eq!(catalog.popular_tags(1).unwrap().len(), 1);

        catalog.delete_tag(common.id).unwrap();
        assert!(store.tags_for_group(group_id).unwrap().is_empty());
        assert!(matches!(
            catalog.get_tag(common.id).unwrap_err(),
            StratvaultError::NotFound { entity: "tag", .. }
        ));
    }
}
