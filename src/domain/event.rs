//! Domain events published after successful writes.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum DomainEvent {
    StrategyCreated {
        strategy_id: i64,
        user_id: i64,
        name: String,
        version_number: u32,
        timestamp: DateTime<Utc>,
    },
    VersionCreated {
        strategy_id: i64,
        user_id: i64,
        version_number: u32,
        change_notes: String,
        timestamp: DateTime<Utc>,
    },
    StrategyDeleted {
        strategy_id: i64,
        user_id: i64,
        timestamp: DateTime<Utc>,
    },
    ListingCreated {
        listing_id: i64,
        strategy_id: i64,
        user_id: i64,
        price: f64,
        timestamp: DateTime<Utc>,
    },
    PurchaseCreated {
        purchase_id: i64,
        listing_id: i64,
        buyer_id: i64,
        price_paid: f64,
        timestamp: DateTime<Utc>,
    },
    ReviewCreated {
        review_id: i64,
        listing_id: i64,
        user_id: i64,
        rating: u8,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Partition key: events about the same entity stay ordered.
    pub fn key(&self) -> String {
        match self {
            DomainEvent::StrategyCreated { strategy_id, .. }
            | DomainEvent::VersionCreated { strategy_id, .. }
            | DomainEvent::StrategyDeleted { strategy_id, .. } => {
                format!("strategy-{strategy_id}")
            }
            DomainEvent::ListingCreated { listing_id, .. } => format!("marketplace-{listing_id}"),
            DomainEvent::PurchaseCreated { purchase_id, .. } => format!("purchase-{purchase_id}"),
            DomainEvent::ReviewCreated { review_id, .. } => format!("review-{review_id}"),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::StrategyCreated { .. } => "strategy_created",
            DomainEvent::VersionCreated { .. } => "version_created",
            DomainEvent::StrategyDeleted { .. } => "strategy_deleted",
            DomainEvent::ListingCreated { .. } => "listing_created",
            DomainEvent::PurchaseCreated { .. } => "purchase_created",
            DomainEvent::ReviewCreated { .. } => "review_created",
        }
    }
}
