//! In-memory store.
//!
//! One mutex guards every table, so each port call is atomic. Used by tests
//! and by library embedders that need no database.

use crate::domain::error::StratvaultError;
use crate::domain::indicator::{Indicator, NewIndicator};
use crate::domain::listing::{Listing, NewListing, NewPurchase, NewReview, Purchase, Review};
use crate::domain::strategy::{NewVersion, StrategyGroup, StrategyVersion};
use crate::domain::tag::{Tag, TagWithCount};
use crate::ports::identity_port::IdentityPort;
use crate::ports::store_port::StrategyStore;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Tables {
    groups: BTreeMap<i64, StrategyGroup>,
    versions: BTreeMap<(i64, u32), StrategyVersion>,
    preferences: HashMap<(i64, i64), u32>,
    listings: BTreeMap<i64, Listing>,
    purchases: BTreeMap<i64, Purchase>,
    reviews: BTreeMap<i64, Review>,
    indicators: BTreeMap<i64, Indicator>,
    tags: BTreeMap<i64, Tag>,
    strategy_tags: BTreeSet<(i64, i64)>,
    users: HashMap<i64, String>,
    sequences: HashMap<&'static str, i64>,
}

impl Tables {
    fn next_id(&mut self, table: &'static str) -> i64 {
        let seq = self.sequences.entry(table).or_insert(0);
        *seq += 1;
        *seq
    }

    fn listing_ids_for_group(&self, group_id: i64) -> Vec<i64> {
        self.listings
            .values()
            .filter(|l| l.group_id == group_id)
            .map(|l| l.id)
            .collect()
    }

    fn tag_name_taken(&self, name: &str, except: Option<i64>) -> bool {
        self.tags
            .values()
            .any(|t| t.name == name && Some(t.id) != except)
    }

    fn with_count(&self, tag: &Tag) -> TagWithCount {
        let strategy_count = self
            .strategy_tags
            .iter()
            .filter(|(group_id, tag_id)| {
                *tag_id == tag.id && self.groups.get(group_id).is_some_and(|g| !g.is_deleted())
            })
            .count() as u64;
        TagWithCount {
            tag: tag.clone(),
            strategy_count,
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user_id: i64, username: impl Into<String>) {
        self.lock().users.insert(user_id, username.into());
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StrategyStore for MemoryStore {
    fn insert_group(
        &self,
        first: &NewVersion,
        now: DateTime<Utc>,
    ) -> Result<(StrategyGroup, StrategyVersion), StratvaultError> {
        let mut t = self.lock();
        let group = StrategyGroup {
            id: t.next_id("groups"),
            owner_id: first.owner_id,
            name: first.name.clone(),
            is_public: first.is_public,
            created_at: now,
            deleted_at: None,
            latest_version: 1,
        };
        let version = StrategyVersion {
            id: t.next_id("versions"),
            group_id: group.id,
            version_number: 1,
            structure: first.structure.clone(),
            name: first.name.clone(),
            description: first.description.clone(),
            thumbnail_url: first.thumbnail_url.clone(),
            is_public: first.is_public,
            change_notes: first.change_notes.clone(),
            created_at: now,
            owner_id: first.owner_id,
        };
        t.groups.insert(group.id, group.clone());
        t.versions.insert((group.id, 1), version.clone());
        Ok((group, version))
    }

    fn get_group(&self, group_id: i64) -> Result<Option<StrategyGroup>, StratvaultError> {
        Ok(self.lock().groups.get(&group_id).cloned())
    }

    fn list_groups(
        &self,
        owner_id: Option<i64>,
        tag_id: Option<i64>,
    ) -> Result<Vec<StrategyGroup>, StratvaultError> {
        let t = self.lock();
        Ok(t.groups
            .values()
            .rev()
            .filter(|g| !g.is_deleted())
            .filter(|g| owner_id.is_none_or(|o| g.owner_id == o))
            .filter(|g| tag_id.is_none_or(|tag| t.strategy_tags.contains(&(g.id, tag))))
            .cloned()
            .collect())
    }

    fn soft_delete_group(&self, group_id: i64, now: DateTime<Utc>) -> Result<(), StratvaultError> {
        let mut t = self.lock();
        let group = t
            .groups
            .get_mut(&group_id)
            .ok_or_else(|| StratvaultError::not_found("strategy", group_id))?;
        group.deleted_at.get_or_insert(now);
        Ok(())
    }

    fn append_version(
        &self,
        version: &NewVersion,
        now: DateTime<Utc>,
    ) -> Result<StrategyVersion, StratvaultError> {
        let mut t = self.lock();
        let group = t
            .groups
            .get(&version.group_id)
            .ok_or_else(|| StratvaultError::not_found("strategy", version.group_id))?;
        if group.is_deleted() {
            return Err(StratvaultError::permission_denied(
                "cannot add versions to a deleted strategy",
            ));
        }
        let next = group.latest_version + 1;
        if t.versions.contains_key(&(version.group_id, next)) {
            return Err(StratvaultError::duplicate(format!(
                "version {next} of strategy {} already exists",
                version.group_id
            )));
        }

        let created = StrategyVersion {
            id: t.next_id("versions"),
            group_id: version.group_id,
            version_number: next,
            structure: version.structure.clone(),
            name: version.name.clone(),
            description: version.description.clone(),
            thumbnail_url: version.thumbnail_url.clone(),
            is_public: version.is_public,
            change_notes: version.change_notes.clone(),
            created_at: now,
            owner_id: version.owner_id,
        };
        t.versions.insert((version.group_id, next), created.clone());
        if let Some(group) = t.groups.get_mut(&version.group_id) {
            group.latest_version = next;
            group.name = created.name.clone();
            group.is_public = created.is_public;
        }
        Ok(created)
    }

    fn get_version(
        &self,
        group_id: i64,
        version_number: u32,
    ) -> Result<Option<StrategyVersion>, StratvaultError> {
        Ok(self.lock().versions.get(&(group_id, version_number)).cloned())
    }

    fn list_versions(&self, group_id: i64) -> Result<Vec<StrategyVersion>, StratvaultError> {
        Ok(self
            .lock()
            .versions
            .range((group_id, 0)..=(group_id, u32::MAX))
            .rev()
            .map(|(_, v)| v.clone())
            .collect())
    }

    fn get_preference(&self, user_id: i64, group_id: i64) -> Result<Option<u32>, StratvaultError> {
        Ok(self.lock().preferences.get(&(user_id, group_id)).copied())
    }

    fn set_preference(
        &self,
        user_id: i64,
        group_id: i64,
        version_number: u32,
    ) -> Result<(), StratvaultError> {
        self.lock()
            .preferences
            .insert((user_id, group_id), version_number);
        Ok(())
    }

    fn insert_listing(
        &self,
        listing: &NewListing,
        now: DateTime<Utc>,
    ) -> Result<Listing, StratvaultError> {
        let mut t = self.lock();
        let created = Listing {
            id: t.next_id("listings"),
            group_id: listing.group_id,
            version_number: listing.version_number,
            seller_id: listing.seller_id,
            price: listing.price,
            subscription: listing.subscription,
            description: listing.description.clone(),
            active: true,
            created_at: now,
        };
        t.listings.insert(created.id, created.clone());
        Ok(created)
    }

    fn get_listing(&self, listing_id: i64) -> Result<Option<Listing>, StratvaultError> {
        Ok(self.lock().listings.get(&listing_id).cloned())
    }

    fn list_listings(&self, active_only: bool) -> Result<Vec<Listing>, StratvaultError> {
        Ok(self
            .lock()
            .listings
            .values()
            .rev()
            .filter(|l| !active_only || l.active)
            .cloned()
            .collect())
    }

    fn listings_for_group(&self, group_id: i64) -> Result<Vec<Listing>, StratvaultError> {
        Ok(self
            .lock()
            .listings
            .values()
            .rev()
            .filter(|l| l.group_id == group_id)
            .cloned()
            .collect())
    }

    fn set_listing_active(&self, listing_id: i64, active: bool) -> Result<(), StratvaultError> {
        let mut t = self.lock();
        let listing = t
            .listings
            .get_mut(&listing_id)
            .ok_or_else(|| StratvaultError::not_found("listing", listing_id))?;
        listing.active = active;
        Ok(())
    }

    fn update_listing(&self, listing: &Listing) -> Result<(), StratvaultError> {
        let mut t = self.lock();
        let stored = t
            .listings
            .get_mut(&listing.id)
            .ok_or_else(|| StratvaultError::not_found("listing", listing.id))?;
        stored.price = listing.price;
        stored.description = listing.description.clone();
        stored.active = listing.active;
        Ok(())
    }

    fn insert_purchase(
        &self,
        purchase: &NewPurchase,
        now: DateTime<Utc>,
    ) -> Result<Purchase, StratvaultError> {
        let mut t = self.lock();
        let already = t.purchases.values().any(|p| {
            p.listing_id == purchase.listing_id
                && p.buyer_id == purchase.buyer_id
                && p.is_active_at(now)
        });
        if already {
            return Err(StratvaultError::duplicate("strategy already purchased"));
        }

        let created = Purchase {
            id: t.next_id("purchases"),
            listing_id: purchase.listing_id,
            buyer_id: purchase.buyer_id,
            price_paid: purchase.price_paid,
            created_at: now,
            subscription_end: purchase.subscription_end,
        };
        t.purchases.insert(created.id, created.clone());
        Ok(created)
    }

    fn get_purchase(&self, purchase_id: i64) -> Result<Option<Purchase>, StratvaultError> {
        Ok(self.lock().purchases.get(&purchase_id).cloned())
    }

    fn purchases_for_buyer(&self, buyer_id: i64) -> Result<Vec<Purchase>, StratvaultError> {
        Ok(self
            .lock()
            .purchases
            .values()
            .rev()
            .filter(|p| p.buyer_id == buyer_id)
            .cloned()
            .collect())
    }

    fn purchases_for_group(
        &self,
        buyer_id: i64,
        group_id: i64,
    ) -> Result<Vec<Purchase>, StratvaultError> {
        let t = self.lock();
        let listing_ids = t.listing_ids_for_group(group_id);
        Ok(t.purchases
            .values()
            .rev()
            .filter(|p| p.buyer_id == buyer_id && listing_ids.contains(&p.listing_id))
            .cloned()
            .collect())
    }

    fn count_purchases(&self, listing_id: i64) -> Result<u64, StratvaultError> {
        Ok(self
            .lock()
            .purchases
            .values()
            .filter(|p| p.listing_id == listing_id)
            .count() as u64)
    }

    fn end_subscription(
        &self,
        purchase_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Purchase, StratvaultError> {
        let mut t = self.lock();
        let purchase = t
            .purchases
            .get_mut(&purchase_id)
            .ok_or_else(|| StratvaultError::not_found("purchase", purchase_id))?;
        purchase.subscription_end = Some(at);
        Ok(purchase.clone())
    }

    fn insert_review(
        &self,
        review: &NewReview,
        now: DateTime<Utc>,
    ) -> Result<Review, StratvaultError> {
        let mut t = self.lock();
        let exists = t
            .reviews
            .values()
            .any(|r| r.listing_id == review.listing_id && r.user_id == review.user_id);
        if exists {
            return Err(StratvaultError::duplicate(format!(
                "user {} already reviewed listing {}",
                review.user_id, review.listing_id
            )));
        }

        let created = Review {
            id: t.next_id("reviews"),
            listing_id: review.listing_id,
            user_id: review.user_id,
            rating: review.rating,
            comment: review.comment.clone(),
            created_at: now,
        };
        t.reviews.insert(created.id, created.clone());
        Ok(created)
    }

    fn reviews_for_listing(&self, listing_id: i64) -> Result<Vec<Review>, StratvaultError> {
        Ok(self
            .lock()
            .reviews
            .values()
            .rev()
            .filter(|r| r.listing_id == listing_id)
            .cloned()
            .collect())
    }

    fn get_review(&self, review_id: i64) -> Result<Option<Review>, StratvaultError> {
        Ok(self.lock().reviews.get(&review_id).cloned())
    }

    fn update_review(
        &self,
        review_id: i64,
        rating: u8,
        comment: &str,
    ) -> Result<Review, StratvaultError> {
        let mut t = self.lock();
        let review = t
            .reviews
            .get_mut(&review_id)
            .ok_or_else(|| StratvaultError::not_found("review", review_id))?;
        review.rating = rating;
        review.comment = comment.to_string();
        Ok(review.clone())
    }

    fn delete_review(&self, review_id: i64) -> Result<(), StratvaultError> {
        self.lock()
            .reviews
            .remove(&review_id)
            .map(|_| ())
            .ok_or_else(|| StratvaultError::not_found("review", review_id))
    }

    fn insert_indicator(
        &self,
        indicator: &NewIndicator,
        now: DateTime<Utc>,
    ) -> Result<Indicator, StratvaultError> {
        let mut t = self.lock();
        if t.indicators.values().any(|i| i.name == indicator.name) {
            return Err(StratvaultError::duplicate(format!(
                "indicator {} already exists",
                indicator.name
            )));
        }
        let created = Indicator {
            id: t.next_id("indicators"),
            name: indicator.name.clone(),
            description: indicator.description.clone(),
            category: indicator.category.clone(),
            formula: indicator.formula.clone(),
            active: indicator.active,
            parameters: indicator.parameters.clone(),
            created_at: now,
        };
        t.indicators.insert(created.id, created.clone());
        Ok(created)
    }

    fn get_indicator(&self, indicator_id: i64) -> Result<Option<Indicator>, StratvaultError> {
        Ok(self.lock().indicators.get(&indicator_id).cloned())
    }

    fn list_indicators(&self) -> Result<Vec<Indicator>, StratvaultError> {
        let mut all: Vec<Indicator> = self.lock().indicators.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    fn update_indicator(
        &self,
        indicator_id: i64,
        indicator: &NewIndicator,
    ) -> Result<Indicator, StratvaultError> {
        let mut t = self.lock();
        if t
            .indicators
            .values()
            .any(|i| i.name == indicator.name && i.id != indicator_id)
        {
            return Err(StratvaultError::duplicate(format!(
                "indicator {} already exists",
                indicator.name
            )));
        }
        let stored = t
            .indicators
            .get_mut(&indicator_id)
            .ok_or_else(|| StratvaultError::not_found("indicator", indicator_id))?;
        stored.name = indicator.name.clone();
        stored.description = indicator.description.clone();
        stored.category = indicator.category.clone();
        stored.formula = indicator.formula.clone();
        stored.active = indicator.active;
        stored.parameters = indicator.parameters.clone();
        Ok(stored.clone())
    }

    fn delete_indicator(&self, indicator_id: i64) -> Result<(), StratvaultError> {
        self.lock()
            .indicators
            .remove(&indicator_id)
            .map(|_| ())
            .ok_or_else(|| StratvaultError::not_found("indicator", indicator_id))
    }

    fn insert_tag(&self, name: &str) -> Result<Tag, StratvaultError> {
        let mut t = self.lock();
        if t.tag_name_taken(name, None) {
            return Err(StratvaultError::duplicate(format!("tag {name} already exists")));
        }
        let tag = Tag {
            id: t.next_id("tags"),
            name: name.to_string(),
        };
        t.tags.insert(tag.id, tag.clone());
        Ok(tag)
    }

    fn get_tag(&self, tag_id: i64) -> Result<Option<TagWithCount>, StratvaultError> {
        let t = self.lock();
        Ok(t.tags.get(&tag_id).map(|tag| t.with_count(tag)))
    }

    fn list_tags(&self) -> Result<Vec<TagWithCount>, StratvaultError> {
        let t = self.lock();
        let mut all: Vec<TagWithCount> = t.tags.values().map(|tag| t.with_count(tag)).collect();
        all.sort_by(|a, b| a.tag.name.cmp(&b.tag.name));
        Ok(all)
    }

    fn rename_tag(&self, tag_id: i64, name: &str) -> Result<Tag, StratvaultError> {
        let mut t = self.lock();
        if t.tag_name_taken(name, Some(tag_id)) {
            return Err(StratvaultError::duplicate(format!("tag {name} already exists")));
        }
        let tag = t
            .tags
            .get_mut(&tag_id)
            .ok_or_else(|| StratvaultError::not_found("tag", tag_id))?;
        tag.name = name.to_string();
        Ok(tag.clone())
    }

    fn delete_tag(&self, tag_id: i64) -> Result<(), StratvaultError> {
        let mut t = self.lock();
        t.tags
            .remove(&tag_id)
            .ok_or_else(|| StratvaultError::not_found("tag", tag_id))?;
        t.strategy_tags.retain(|(_, tag)| *tag != tag_id);
        Ok(())
    }

    fn set_group_tags(&self, group_id: i64, tag_ids: &[i64]) -> Result<(), StratvaultError> {
        let mut t = self.lock();
        if !t.groups.contains_key(&group_id) {
            return Err(StratvaultError::not_found("strategy", group_id));
        }
        if let Some(missing) = tag_ids.iter().find(|id| !t.tags.contains_key(*id)) {
            return Err(StratvaultError::not_found("tag", *missing));
        }
        t.strategy_tags.retain(|(group, _)| *group != group_id);
        t.strategy_tags
            .extend(tag_ids.iter().map(|tag_id| (group_id, *tag_id)));
        Ok(())
    }

    fn tags_for_group(&self, group_id: i64) -> Result<Vec<Tag>, StratvaultError> {
        let t = self.lock();
        let mut tags: Vec<Tag> = t
            .strategy_tags
            .iter()
            .filter(|(group, _)| *group == group_id)
            .filter_map(|(_, tag_id)| t.tags.get(tag_id).cloned())
            .collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }
}

impl IdentityPort for MemoryStore {
    fn username(&self, user_id: i64) -> Result<String, StratvaultError> {
        self.lock()
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| StratvaultError::not_found("user", user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule_parser::DEFAULT_MAX_DEPTH;
    use crate::domain::structure::Structure;
    use chrono::Duration;

    fn new_version(owner_id: i64, name: &str) -> NewVersion {
        NewVersion {
            group_id: 0,
            owner_id,
            structure: Structure::parse(r#"{"buyRules":[],"sellRules":[]}"#, DEFAULT_MAX_DEPTH)
                .unwrap(),
            name: name.into(),
            description: String::new(),
            thumbnail_url: None,
            is_public: false,
            change_notes: "Initial version".into(),
        }
    }

    #[test]
    fn append_assigns_next_number_and_updates_group() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let (group, v1) = store.insert_group(&new_version(1, "a"), now).unwrap();
        assert_eq!(v1.version_number, 1);

        let mut next = new_version(1, "b");
        next.group_id = group.id;
        next.is_public = true;
        let v2 = store.append_version(&next, now).unwrap();
        assert_eq!(v2.version_number, 2);

        let group = store.get_group(group.id).unwrap().unwrap();
        assert_eq!(group.latest_version, 2);
        assert_eq!(group.name, "b");
        assert!(group.is_public);

        let numbers: Vec<u32> = store
            .list_versions(group.id)
            .unwrap()
            .iter()
            .map(|v| v.version_number)
            .collect();
        assert_eq!(numbers, vec![2, 1]);
    }

    #[test]
    fn append_to_missing_group_is_not_found() {
        let store = MemoryStore::new();
        let mut next = new_version(1, "a");
        next.group_id = 42;
        assert!(matches!(
            store.append_version(&next, Utc::now()).unwrap_err(),
            StratvaultError::NotFound { .. }
        ));
    }

    #[test]
    fn append_to_deleted_group_is_denied() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let (group, _) = store.insert_group(&new_version(1, "a"), now).unwrap();
        store.soft_delete_group(group.id, now).unwrap();
        let mut next = new_version(1, "b");
        next.group_id = group.id;
        assert!(matches!(
            store.append_version(&next, now).unwrap_err(),
            StratvaultError::PermissionDenied { .. }
        ));
        assert_eq!(store.get_group(group.id).unwrap().unwrap().latest_version, 1);
    }

    #[test]
    fn list_groups_skips_deleted_and_filters_owner() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let (a, _) = store.insert_group(&new_version(1, "a"), now).unwrap();
        store.insert_group(&new_version(2, "b"), now).unwrap();
        store.insert_group(&new_version(1, "c"), now).unwrap();
        store.soft_delete_group(a.id, now).unwrap();

        let names: Vec<String> = store
            .list_groups(None, None)
            .unwrap()
            .into_iter()
            .map(|g| g.name)
            .collect();
        assert_eq!(names, vec!["c", "b"]);
        assert_eq!(store.list_groups(Some(1), None).unwrap().len(), 1);
    }

    #[test]
    fn tags_filter_groups_and_count_live_strategies() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let (a, _) = store.insert_group(&new_version(1, "a"), now).unwrap();
        let (b, _) = store.insert_group(&new_version(2, "b"), now).unwrap();
        let trend = store.insert_tag("trend").unwrap();
        let scalp = store.insert_tag("scalping").unwrap();
        assert!(matches!(
            store.insert_tag("trend").unwrap_err(),
            StratvaultError::Duplicate { .. }
        ));

        store.set_group_tags(a.id, &[trend.id, scalp.id]).unwrap();
        store.set_group_tags(b.id, &[trend.id]).unwrap();
        let tagged: Vec<i64> = store
            .list_groups(None, Some(scalp.id))
            .unwrap()
            .iter()
            .map(|g| g.id)
            .collect();
        assert_eq!(tagged, vec![a.id]);
        assert_eq!(store.list_groups(Some(2), Some(trend.id)).unwrap().len(), 1);

        let names: Vec<String> = store
            .tags_for_group(a.id)
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["scalping", "trend"]);

        store.soft_delete_group(b.id, now).unwrap();
        assert_eq!(store.get_tag(trend.id).unwrap().unwrap().strategy_count, 1);

        store.delete_tag(scalp.id).unwrap();
        assert_eq!(store.tags_for_group(a.id).unwrap().len(), 1);
        assert!(store.get_tag(scalp.id).unwrap().is_none());
        assert!(matches!(
            store.set_group_tags(a.id, &[scalp.id]).unwrap_err(),
            StratvaultError::NotFound { entity: "tag", .. }
        ));
    }

    #[test]
    fn rename_tag_keeps_names_unique() {
        let store = MemoryStore::new();
        let trend = store.insert_tag("trend").unwrap();
        store.insert_tag("swing").unwrap();
        assert!(matches!(
            store.rename_tag(trend.id, "swing").unwrap_err(),
            StratvaultError::Duplicate { .. }
        ));
        assert_eq!(store.rename_tag(trend.id, "trend").unwrap().name, "trend");
        assert_eq!(store.rename_tag(trend.id, "breakout").unwrap().name, "breakout");
    }

    #[test]
    fn active_purchase_blocks_repurchase() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let p = NewPurchase {
            listing_id: 1,
            buyer_id: 2,
            price_paid: 1.0,
            subscription_end: Some(now + Duration::days(30)),
        };
        store.insert_purchase(&p, now).unwrap();
        assert!(matches!(
            store.insert_purchase(&p, now).unwrap_err(),
            StratvaultError::Duplicate { .. }
        ));
        // Once expired, buying again is allowed.
        assert!(store.insert_purchase(&p, now + Duration::days(31)).is_ok());
    }

    #[test]
    fn review_unique_per_listing_and_user() {
        let store = MemoryStore::new();
        let r = NewReview {
            listing_id: 1,
            user_id: 2,
            rating: 5,
            comment: "great".into(),
        };
        let now = Utc::now();
        store.insert_review(&r, now).unwrap();
        let mut again = r.clone();
        again.rating = 1;
        assert!(store.insert_review(&again, now).is_err());
        let reviews = store.reviews_for_listing(1).unwrap();
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].rating, 5);

        let edited = store.update_review(reviews[0].id, 3, "ok").unwrap();
        assert_eq!((edited.rating, edited.comment.as_str()), (3, "ok"));
        assert_eq!(edited.created_at, reviews[0].created_at);
        store.delete_review(edited.id).unwrap();
        assert!(store.get_review(edited.id).unwrap().is_none());
        assert!(store.delete_review(edited.id).is_err());
        // The slot is free again once the review is gone.
        assert!(store.insert_review(&again, now).is_ok());
    }

    #[test]
    fn update_listing_writes_editable_fields() {
        let store = MemoryStore::new();
        let mut listing = store
            .insert_listing(
                &NewListing {
                    group_id: 1,
                    version_number: 1,
                    seller_id: 1,
                    price: 10.0,
                    subscription: None,
                    description: "old".into(),
                },
                Utc::now(),
            )
            .unwrap();
        listing.price = 12.5;
        listing.description = "new".into();
        listing.active = false;
        listing.seller_id = 99;
        store.update_listing(&listing).unwrap();

        let stored = store.get_listing(listing.id).unwrap().unwrap();
        assert_eq!(stored.price, 12.5);
        assert_eq!(stored.description, "new");
        assert!(!stored.active);
        assert_eq!(stored.seller_id, 1);
    }

    #[test]
    fn usernames() {
        let store = MemoryStore::new();
        store.add_user(7, "alice");
        assert_eq!(store.username(7).unwrap(), "alice");
        assert!(store.username(8).is_err());
    }
}
