//! Persistence port for strategies, marketplace records and indicators.
//!
//! Implementations must provide the atomicity the services rely on:
//! - `append_version` assigns `latest + 1` atomically per group; a unique
//!   index (or equivalent) turns a lost race into `Duplicate`.
//! - `insert_purchase` checks for an active purchase of the same listing in
//!   the same transaction as the insert.
//! - `insert_review` rejects a second review per (listing, user).
//!
//! Busy or timed-out backends report `Unavailable`.

use crate::domain::error::StratvaultError;
use crate::domain::indicator::{Indicator, NewIndicator};
use crate::domain::listing::{Listing, NewListing, NewPurchase, NewReview, Purchase, Review};
use crate::domain::strategy::{NewVersion, StrategyGroup, StrategyVersion};
use crate::domain::tag::{Tag, TagWithCount};
use chrono::{DateTime, Utc};

pub trait StrategyStore: Send + Sync {
    /// Create a group together with its version 1.
    fn insert_group(
        &self,
        first: &NewVersion,
        now: DateTime<Utc>,
    ) -> Result<(StrategyGroup, StrategyVersion), StratvaultError>;

    fn get_group(&self, group_id: i64) -> Result<Option<StrategyGroup>, StratvaultError>;

    /// Non-deleted groups, newest first, optionally restricted to one owner
    /// and to groups carrying one tag.
    fn list_groups(
        &self,
        owner_id: Option<i64>,
        tag_id: Option<i64>,
    ) -> Result<Vec<StrategyGroup>, StratvaultError>;

    fn soft_delete_group(&self, group_id: i64, now: DateTime<Utc>) -> Result<(), StratvaultError>;

    /// Append the next version and update the group's name, public flag and
    /// latest version number.
    fn append_version(
        &self,
        version: &NewVersion,
        now: DateTime<Utc>,
    ) -> Result<StrategyVersion, StratvaultError>;

    fn get_version(
        &self,
        group_id: i64,
        version_number: u32,
    ) -> Result<Option<StrategyVersion>, StratvaultError>;

    /// All versions of a group, newest first.
    fn list_versions(&self, group_id: i64) -> Result<Vec<StrategyVersion>, StratvaultError>;

    fn get_preference(&self, user_id: i64, group_id: i64) -> Result<Option<u32>, StratvaultError>;

    fn set_preference(
        &self,
        user_id: i64,
        group_id: i64,
        version_number: u32,
    ) -> Result<(), StratvaultError>;

    fn insert_listing(
        &self,
        listing: &NewListing,
        now: DateTime<Utc>,
    ) -> Result<Listing, StratvaultError>;

    fn get_listing(&self, listing_id: i64) -> Result<Option<Listing>, StratvaultError>;

    /// Listings newest first.
    fn list_listings(&self, active_only: bool) -> Result<Vec<Listing>, StratvaultError>;

    fn listings_for_group(&self, group_id: i64) -> Result<Vec<Listing>, StratvaultError>;

    fn set_listing_active(&self, listing_id: i64, active: bool) -> Result<(), StratvaultError>;

    /// Write back a listing's price, description and active flag.
    fn update_listing(&self, listing: &Listing) -> Result<(), StratvaultError>;

    /// `Duplicate` when the buyer already holds a purchase of the listing
    /// that is still active at `now`.
    fn insert_purchase(
        &self,
        purchase: &NewPurchase,
        now: DateTime<Utc>,
    ) -> Result<Purchase, StratvaultError>;

    fn get_purchase(&self, purchase_id: i64) -> Result<Option<Purchase>, StratvaultError>;

    /// A buyer's purchases, newest first.
    fn purchases_for_buyer(&self, buyer_id: i64) -> Result<Vec<Purchase>, StratvaultError>;

    /// A buyer's purchases of any listing referencing the group.
    fn purchases_for_group(
        &self,
        buyer_id: i64,
        group_id: i64,
    ) -> Result<Vec<Purchase>, StratvaultError>;

    fn count_purchases(&self, listing_id: i64) -> Result<u64, StratvaultError>;

    fn end_subscription(
        &self,
        purchase_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Purchase, StratvaultError>;

    /// `Duplicate` when the user already reviewed the listing.
    fn insert_review(
        &self,
        review: &NewReview,
        now: DateTime<Utc>,
    ) -> Result<Review, StratvaultError>;

    /// Reviews of a listing, newest first.
    fn reviews_for_listing(&self, listing_id: i64) -> Result<Vec<Review>, StratvaultError>;

    fn get_review(&self, review_id: i64) -> Result<Option<Review>, StratvaultError>;

    fn update_review(
        &self,
        review_id: i64,
        rating: u8,
        comment: &str,
    ) -> Result<Review, StratvaultError>;

    fn delete_review(&self, review_id: i64) -> Result<(), StratvaultError>;

    /// `Duplicate` when an indicator with the same name exists.
    fn insert_indicator(
        &self,
        indicator: &NewIndicator,
        now: DateTime<Utc>,
    ) -> Result<Indicator, StratvaultError>;

    fn get_indicator(&self, indicator_id: i64) -> Result<Option<Indicator>, StratvaultError>;

    /// All indicators ordered by name.
    fn list_indicators(&self) -> Result<Vec<Indicator>, StratvaultError>;

    /// Replace a definition in place, keeping its id and creation time.
    /// `Duplicate` when the new name belongs to another indicator.
    fn update_indicator(
        &self,
        indicator_id: i64,
        indicator: &NewIndicator,
    ) -> Result<Indicator, StratvaultError>;

    fn delete_indicator(&self, indicator_id: i64) -> Result<(), StratvaultError>;

    /// `Duplicate` when the name is taken.
    fn insert_tag(&self, name: &str) -> Result<Tag, StratvaultError>;

    fn get_tag(&self, tag_id: i64) -> Result<Option<TagWithCount>, StratvaultError>;

    /// All tags ordered by name, each with its count of non-deleted groups.
    fn list_tags(&self) -> Result<Vec<TagWithCount>, StratvaultError>;

    fn rename_tag(&self, tag_id: i64, name: &str) -> Result<Tag, StratvaultError>;

    /// Remove a tag and detach it from every group.
    fn delete_tag(&self, tag_id: i64) -> Result<(), StratvaultError>;

    /// Replace the full tag set of a group.
    fn set_group_tags(&self, group_id: i64, tag_ids: &[i64]) -> Result<(), StratvaultError>;

    /// Tags of a group ordered by name.
    fn tags_for_group(&self, group_id: i64) -> Result<Vec<Tag>, StratvaultError>;
}
