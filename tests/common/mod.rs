#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use stratvault::adapters::memory_adapter::MemoryStore;
use stratvault::domain::error::StratvaultError;
use stratvault::domain::event::DomainEvent;
use stratvault::domain::indicator::{Indicator, NewIndicator};
use stratvault::domain::indicator_registry::builtin_definitions;
use stratvault::domain::listing::{Listing, NewListing, NewPurchase, NewReview, Purchase, Review};
use stratvault::domain::strategy::{NewStrategyMeta, NewVersion, StrategyGroup, StrategyVersion};
use stratvault::domain::tag::{Tag, TagWithCount};
use stratvault::ports::clock_port::Clock;
use stratvault::ports::event_port::EventSink;
use stratvault::ports::identity_port::IdentityPort;
use stratvault::ports::store_port::StrategyStore;
use stratvault::services::Services;

pub const ALICE: i64 = 1;
pub const BOB: i64 = 2;
pub const CAROL: i64 = 3;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// Clock the test moves by hand.
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self(Mutex::new(start))
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// Keeps every published event for later assertions.
#[derive(Default)]
pub struct RecordingSink(Mutex<Vec<DomainEvent>>);

impl RecordingSink {
    pub fn events(&self) -> Vec<DomainEvent> {
        self.0.lock().unwrap().clone()
    }

    pub fn event_types(&self) -> Vec<&'static str> {
        self.events().iter().map(DomainEvent::event_type).collect()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: &DomainEvent) -> Result<(), StratvaultError> {
        self.0.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// A broker that is always down.
pub struct FailingSink;

impl EventSink for FailingSink {
    fn publish(&self, _event: &DomainEvent) -> Result<(), StratvaultError> {
        Err(StratvaultError::Unavailable {
            reason: "broker offline".into(),
        })
    }
}

pub struct Fixture<S> {
    pub store: Arc<S>,
    pub clock: Arc<ManualClock>,
    pub events: Arc<RecordingSink>,
    pub services: Services,
}

/// Services over `store` with seeded indicators, a manual clock and a
/// recording event sink.
pub fn fixture_with<S>(store: Arc<S>) -> Fixture<S>
where
    S: StrategyStore + IdentityPort + 'static,
{
    let clock = Arc::new(ManualClock::new(t0()));
    let events = Arc::new(RecordingSink::default());
    let services = Services::wire(store.clone(), events.clone(), clock.clone(), 32);
    for def in builtin_definitions() {
        services.registry.create_indicator(def).unwrap();
    }
    Fixture {
        store,
        clock,
        events,
        services,
    }
}

pub fn memory_fixture() -> Fixture<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.add_user(ALICE, "alice");
    store.add_user(BOB, "bob");
    fixture_with(store)
}

pub fn meta(name: &str, is_public: bool) -> NewStrategyMeta {
    NewStrategyMeta {
        name: name.into(),
        description: format!("{name} description"),
        thumbnail_url: None,
        is_public,
    }
}

pub fn leaf(indicator: &str, symbol: &str, value: &str, settings: Value) -> Value {
    json!({
        "type": "rule",
        "operator": "AND",
        "indicator": { "id": indicator.to_lowercase(), "name": indicator },
        "condition": { "id": symbol, "name": symbol, "symbol": symbol },
        "value": value,
        "indicatorSettings": settings,
    })
}

pub fn rsi(symbol: &str, value: &str, period: i64) -> Value {
    leaf("RSI", symbol, value, json!({ "period": period }))
}

pub fn group(operator: &str, rules: Vec<Value>) -> Value {
    json!({ "type": "group", "operator": operator, "rules": rules })
}

pub fn structure(buy: Vec<Value>, sell: Vec<Value>) -> String {
    json!({ "buyRules": buy, "sellRules": sell }).to_string()
}

/// RSI group to buy, single RSI leaf to sell.
pub fn rsi_strategy() -> String {
    structure(
        vec![group("AND", vec![rsi("<", "30", 14), rsi(">", "10", 14)])],
        vec![rsi(">", "70", 14)],
    )
}

/// Store wrapper that fails `append_version` with queued errors before
/// delegating. Every other call passes straight through.
pub struct FlakyStore<S> {
    inner: Arc<S>,
    append_failures: Mutex<VecDeque<StratvaultError>>,
    append_calls: AtomicUsize,
}

impl<S> FlakyStore<S> {
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            append_failures: Mutex::new(VecDeque::new()),
            append_calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_append(&self, err: StratvaultError) {
        self.append_failures.lock().unwrap().push_back(err);
    }

    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }
}

impl<S: StrategyStore> StrategyStore for FlakyStore<S> {
    fn insert_group(
        &self,
        first: &NewVersion,
        now: DateTime<Utc>,
    ) -> Result<(StrategyGroup, StrategyVersion), StratvaultError> {
        self.inner.insert_group(first, now)
    }

    fn get_group(&self, group_id: i64) -> Result<Option<StrategyGroup>, StratvaultError> {
        self.inner.get_group(group_id)
    }

    fn list_groups(
        &self,
        owner_id: Option<i64>,
        tag_id: Option<i64>,
    ) -> Result<Vec<StrategyGroup>, StratvaultError> {
        self.inner.list_groups(owner_id, tag_id)
    }

    fn soft_delete_group(&self, group_id: i64, now: DateTime<Utc>) -> Result<(), StratvaultError> {
        self.inner.soft_delete_group(group_id, now)
    }

    fn append_version(
        &self,
        version: &NewVersion,
        now: DateTime<Utc>,
    ) -> Result<StrategyVersion, StratvaultError> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.append_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.inner.append_version(version, now)
    }

    fn get_version(
        &self,
        group_id: i64,
        version_number: u32,
    ) -> Result<Option<StrategyVersion>, StratvaultError> {
        self.inner.get_version(group_id, version_number)
    }

    fn list_versions(&self, group_id: i64) -> Result<Vec<StrategyVersion>, StratvaultError> {
        self.inner.list_versions(group_id)
    }

    fn get_preference(&self, user_id: i64, group_id: i64) -> Result<Option<u32>, StratvaultError> {
        self.inner.get_preference(user_id, group_id)
    }

    fn set_preference(
        &self,
        user_id: i64,
        group_id: i64,
        version_number: u32,
    ) -> Result<(), StratvaultError> {
        self.inner.set_preference(user_id, group_id, version_number)
    }

    fn insert_listing(
        &self,
        listing: &NewListing,
        now: DateTime<Utc>,
    ) -> Result<Listing, StratvaultError> {
        self.inner.insert_listing(listing, now)
    }

    fn get_listing(&self, listing_id: i64) -> Result<Option<Listing>, StratvaultError> {
        self.inner.get_listing(listing_id)
    }

    fn list_listings(&self, active_only: bool) -> Result<Vec<Listing>, StratvaultError> {
        self.inner.list_listings(active_only)
    }

    fn listings_for_group(&self, group_id: i64) -> Result<Vec<Listing>, StratvaultError> {
        self.inner.listings_for_group(group_id)
    }

    fn set_listing_active(&self, listing_id: i64, active: bool) -> Result<(), StratvaultError> {
        self.inner.set_listing_active(listing_id, active)
    }

    fn update_listing(&self, listing: &Listing) -> Result<(), StratvaultError> {
        self.inner.update_listing(listing)
    }

    fn insert_purchase(
        &self,
        purchase: &NewPurchase,
        now: DateTime<Utc>,
    ) -> Result<Purchase, StratvaultError> {
        self.inner.insert_purchase(purchase, now)
    }

    fn get_purchase(&self, purchase_id: i64) -> Result<Option<Purchase>, StratvaultError> {
        self.inner.get_purchase(purchase_id)
    }

    fn purchases_for_buyer(&self, buyer_id: i64) -> Result<Vec<Purchase>, StratvaultError> {
        self.inner.purchases_for_buyer(buyer_id)
    }

    fn purchases_for_group(
        &self,
        buyer_id: i64,
        group_id: i64,
    ) -> Result<Vec<Purchase>, StratvaultError> {
        self.inner.purchases_for_group(buyer_id, group_id)
    }

    fn count_purchases(&self, listing_id: i64) -> Result<u64, StratvaultError> {
        self.inner.count_purchases(listing_id)
    }

    fn end_subscription(
        &self,
        purchase_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Purchase, StratvaultError> {
        self.inner.end_subscription(purchase_id, at)
    }

    fn insert_review(
        &self,
        review: &NewReview,
        now: DateTime<Utc>,
    ) -> Result<Review, StratvaultError> {
        self.inner.insert_review(review, now)
    }

    fn reviews_for_listing(&self, listing_id: i64) -> Result<Vec<Review>, StratvaultError> {
        self.inner.reviews_for_listing(listing_id)
    }

    fn get_review(&self, review_id: i64) -> Result<Option<Review>, StratvaultError> {
        self.inner.get_review(review_id)
    }

    fn update_review(
        &self,
        review_id: i64,
        rating: u8,
        comment: &str,
    ) -> Result<Review, StratvaultError> {
        self.inner.update_review(review_id, rating, comment)
    }

    fn delete_review(&self, review_id: i64) -> Result<(), StratvaultError> {
        self.inner.delete_review(review_id)
    }

    fn insert_indicator(
        &self,
        indicator: &NewIndicator,
        now: DateTime<Utc>,
    ) -> Result<Indicator, StratvaultError> {
        self.inner.insert_indicator(indicator, now)
    }

    fn get_indicator(&self, indicator_id: i64) -> Result<Option<Indicator>, StratvaultError> {
        self.inner.get_indicator(indicator_id)
    }

    fn list_indicators(&self) -> Result<Vec<Indicator>, StratvaultError> {
        self.inner.list_indicators()
    }

    fn update_indicator(
        &self,
        indicator_id: i64,
        indicator: &NewIndicator,
    ) -> Result<Indicator, StratvaultError> {
        self.inner.update_indicator(indicator_id, indicator)
    }

    fn delete_indicator(&self, indicator_id: i64) -> Result<(), StratvaultError> {
        self.inner.delete_indicator(indicator_id)
    }

    fn insert_tag(&self, name: &str) -> Result<Tag, StratvaultError> {
        self.inner.insert_tag(name)
    }

    fn get_tag(&self, tag_id: i64) -> Result<Option<TagWithCount>, StratvaultError> {
        self.inner.get_tag(tag_id)
    }

    fn list_tags(&self) -> Result<Vec<TagWithCount>, StratvaultError> {
        self.inner.list_tags()
    }

    fn rename_tag(&self, tag_id: i64, name: &str) -> Result<Tag, StratvaultError> {
        self.inner.rename_tag(tag_id, name)
    }

    fn delete_tag(&self, tag_id: i64) -> Result<(), StratvaultError> {
        self.inner.delete_tag(tag_id)
    }

    fn set_group_tags(&self, group_id: i64, tag_ids: &[i64]) -> Result<(), StratvaultError> {
        self.inner.set_group_tags(group_id, tag_ids)
    }

    fn tags_for_group(&self, group_id: i64) -> Result<Vec<Tag>, StratvaultError> {
        self.inner.tags_for_group(group_id)
    }
}

impl<S: IdentityPort> IdentityPort for FlakyStore<S> {
    fn username(&self, user_id: i64) -> Result<String, StratvaultError> {
        self.inner.username(user_id)
    }
}
