//! Marketplace listings, purchases and reviews.

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionPeriod {
    Monthly,
    Quarterly,
    Yearly,
}

impl SubscriptionPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionPeriod::Monthly => "monthly",
            SubscriptionPeriod::Quarterly => "quarterly",
            SubscriptionPeriod::Yearly => "yearly",
        }
    }

    pub fn months(&self) -> u32 {
        match self {
            SubscriptionPeriod::Monthly => 1,
            SubscriptionPeriod::Quarterly => 3,
            SubscriptionPeriod::Yearly => 12,
        }
    }

    /// End of a subscription started at `start`. Month ends clamp, so a
    /// monthly subscription bought on Jan 31 ends on the last day of February.
    pub fn end_from(&self, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        start.checked_add_months(Months::new(self.months()))
    }
}

impl FromStr for SubscriptionPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(SubscriptionPeriod::Monthly),
            "quarterly" => Ok(SubscriptionPeriod::Quarterly),
            "yearly" => Ok(SubscriptionPeriod::Yearly),
            other => Err(format!("invalid subscription period: {other}")),
        }
    }
}

impl fmt::Display for SubscriptionPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Listing {
    pub id: i64,
    pub group_id: i64,
    pub version_number: u32,
    pub seller_id: i64,
    pub price: f64,
    pub subscription: Option<SubscriptionPeriod>,
    pub description: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Seller input for a new listing. The subscription period is kept as text
/// until the marketplace parses it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingRequest {
    pub group_id: i64,
    pub version_number: u32,
    pub price: f64,
    pub subscription: Option<String>,
    pub description: String,
}

/// Seller edit of a listing. `None` keeps the current value; the
/// strategy, version and subscription period are fixed once listed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingUpdate {
    pub price: Option<f64>,
    pub description: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewListing {
    pub group_id: i64,
    pub version_number: u32,
    pub seller_id: i64,
    pub price: f64,
    pub subscription: Option<SubscriptionPeriod>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListingDetails {
    #[serde(flatten)]
    pub listing: Listing,
    pub creator_name: String,
    pub average_rating: f64,
    pub review_count: u64,
    pub purchase_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Purchase {
    pub id: i64,
    pub listing_id: i64,
    pub buyer_id: i64,
    pub price_paid: f64,
    pub created_at: DateTime<Utc>,
    pub subscription_end: Option<DateTime<Utc>>,
}

impl Purchase {
    pub fn is_subscription(&self) -> bool {
        self.subscription_end.is_some()
    }

    /// One-time purchases never expire.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.subscription_end.is_none_or(|end| end > now)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPurchase {
    pub listing_id: i64,
    pub buyer_id: i64,
    pub price_paid: f64,
    pub subscription_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Review {
    pub id: i64,
    pub listing_id: i64,
    pub user_id: i64,
    pub rating: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReviewRequest {
    pub listing_id: i64,
    pub rating: i64,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewReview {
    pub listing_id: i64,
    pub user_id: i64,
    pub rating: u8,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewView {
    #[serde(flatten)]
    pub review: Review,
    pub username: String,
}

/// Mean rating over the given reviews, 0.0 when there are none.
pub fn average_rating(reviews: &[Review]) -> f64 {
    if reviews.is_empty() {
        return 0.0;
    }
    let sum: u32 = reviews.iter().map(|r| u32::from(r.rating)).sum();
    f64::from(sum) / reviews.len() as f64
}
