//! Marketplace: listings, purchases, subscriptions and reviews.

use crate::domain::access::AccessResolver;
use crate::domain::error::{StratvaultError, ValidationError};
use crate::domain::event::DomainEvent;
use crate::domain::listing::{
    Listing, ListingDetails, ListingRequest, ListingUpdate, NewListing, NewPurchase, NewReview, Purchase,
    Review, ReviewRequest, ReviewView, SubscriptionPeriod, average_rating,
};
use crate::domain::pagination::{Page, PageRequest};
use crate::ports::clock_port::Clock;
use crate::ports::event_port::{EventSink, publish_or_warn};
use crate::ports::identity_port::IdentityPort;
use crate::ports::store_port::StrategyStore;
use std::sync::Arc;

pub struct Marketplace {
    store: Arc<dyn StrategyStore>,
    access: Arc<AccessResolver>,
    identity: Arc<dyn IdentityPort>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl Marketplace {
    pub fn new(
        store: Arc<dyn StrategyStore>,
        access: Arc<AccessResolver>,
        identity: Arc<dyn IdentityPort>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            access,
            identity,
            events,
            clock,
        }
    }

    pub fn create_listing(
        &self,
        seller_id: i64,
        req: ListingRequest,
    ) -> Result<Listing, StratvaultError> {
        let group = self
            .store
            .get_group(req.group_id)?
            .ok_or_else(|| StratvaultError::not_found("strategy", req.group_id))?;
        if !self.access.can_write(seller_id, &group) {
            return Err(StratvaultError::permission_denied(format!(
                "user {seller_id} cannot list strategy {}",
                group.id
            )));
        }
        if self
            .store
            .get_version(group.id, req.version_number)?
            .is_none()
        {
            return Err(StratvaultError::not_found(
                "strategy version",
                format!("{}/v{}", group.id, req.version_number),
            ));
        }
        check_price(req.price)?;
        let subscription = req
            .subscription
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::parse::<SubscriptionPeriod>)
            .transpose()
            .map_err(|e| ValidationError::new("subscriptionPeriod", e))?;

        let listing = self.store.insert_listing(
            &NewListing {
                group_id: group.id,
                version_number: req.version_number,
                seller_id,
                price: req.price,
                subscription,
                description: req.description,
            },
            self.clock.now(),
        )?;
        tracing::info!(listing_id = listing.id, group_id = group.id, "listing created");

        publish_or_warn(
            self.events.as_ref(),
            DomainEvent::ListingCreated {
                listing_id: listing.id,
                strategy_id: listing.group_id,
                user_id: seller_id,
                price: listing.price,
                timestamp: listing.created_at,
            },
        );
        Ok(listing)
    }

    pub fn get_listing(&self, listing_id: i64) -> Result<ListingDetails, StratvaultError> {
        let listing = self.listing(listing_id)?;
        let reviews = self.store.reviews_for_listing(listing_id)?;
        let purchase_count = self.store.count_purchases(listing_id)?;
        let creator_name = self.username_or(listing.seller_id, || "Unknown".to_string());
        Ok(ListingDetails {
            creator_name,
            average_rating: average_rating(&reviews),
            review_count: reviews.len() as u64,
            purchase_count,
            listing,
        })
    }

    pub fn list_listings(
        &self,
        active_only: bool,
        page: PageRequest,
    ) -> Result<Page<Listing>, StratvaultError> {
        Ok(Page::from_items(self.store.list_listings(active_only)?, page))
    }

    pub fn deactivate_listing(
        &self,
        seller_id: i64,
        listing_id: i64,
    ) -> Result<Listing, StratvaultError> {
        let mut listing = self.listing(listing_id)?;
        if listing.seller_id != seller_id {
            return Err(StratvaultError::permission_denied(format!(
                "user {seller_id} does not own listing {listing_id}"
            )));
        }
        self.store.set_listing_active(listing_id, false)?;
        listing.active = false;
        tracing::info!(listing_id, "listing deactivated");
        Ok(listing)
    }

    /// Seller edit of price, description or availability. A listing of a
    /// deleted strategy cannot be reactivated.
    pub fn update_listing(
        &self,
        seller_id: i64,
        listing_id: i64,
        update: ListingUpdate,
    ) -> Result<Listing, StratvaultError> {
        let mut listing = self.listing(listing_id)?;
        if listing.seller_id != seller_id {
            return Err(StratvaultError::permission_denied(format!(
                "user {seller_id} does not own listing {listing_id}"
            )));
        }
        if let Some(price) = update.price {
            check_price(price)?;
            listing.price = price;
        }
        if let Some(description) = update.description {
            listing.description = description;
        }
        if let Some(active) = update.active {
            if active && !listing.active {
                let deleted = self
                    .store
                    .get_group(listing.group_id)?
                    .is_none_or(|g| g.is_deleted());
                if deleted {
                    return Err(StratvaultError::permission_denied(format!(
                        "strategy {} has been deleted",
                        listing.group_id
                    )));
                }
            }
            listing.active = active;
        }

        self.store.update_listing(&listing)?;
        tracing::info!(listing_id, active = listing.active, "listing updated");
        Ok(listing)
    }

    pub fn purchase(&self, buyer_id: i64, listing_id: i64) -> Result<Purchase, StratvaultError> {
        let listing = self.listing(listing_id)?;
        if !listing.active {
            return Err(StratvaultError::permission_denied(format!(
                "listing {listing_id} is not active"
            )));
        }
        let group = self
            .store
            .get_group(listing.group_id)?
            .ok_or_else(|| StratvaultError::not_found("strategy", listing.group_id))?;
        if group.is_deleted() {
            return Err(StratvaultError::permission_denied(format!(
                "strategy {} has been deleted",
                group.id
            )));
        }
        if group.owner_id == buyer_id {
            return Err(StratvaultError::permission_denied(
                "cannot purchase your own strategy",
            ));
        }

        let now = self.clock.now();
        let subscription_end = match listing.subscription {
            Some(period) => Some(period.end_from(now).ok_or_else(|| {
                ValidationError::new("subscriptionPeriod", "subscription end out of range")
            })?),
            None => None,
        };
        let purchase = self.store.insert_purchase(
            &NewPurchase {
                listing_id,
                buyer_id,
                price_paid: listing.price,
                subscription_end,
            },
            now,
        )?;
        tracing::info!(purchase_id = purchase.id, listing_id, buyer_id, "purchase created");

        publish_or_warn(
            self.events.as_ref(),
            DomainEvent::PurchaseCreated {
                purchase_id: purchase.id,
                listing_id,
                buyer_id,
                price_paid: purchase.price_paid,
                timestamp: purchase.created_at,
            },
        );
        Ok(purchase)
    }

    /// Access ends at once; the purchase record is kept.
    pub fn cancel_subscription(
        &self,
        buyer_id: i64,
        purchase_id: i64,
    ) -> Result<Purchase, StratvaultError> {
        let purchase = self
            .store
            .get_purchase(purchase_id)?
            .ok_or_else(|| StratvaultError::not_found("purchase", purchase_id))?;
        if purchase.buyer_id != buyer_id {
            return Err(StratvaultError::permission_denied(format!(
                "user {buyer_id} does not own purchase {purchase_id}"
            )));
        }
        if !purchase.is_subscription() {
            return Err(
                ValidationError::new("purchase", "only subscriptions can be cancelled").into(),
            );
        }
        let now = self.clock.now();
        if !purchase.is_active_at(now) {
            return Err(ValidationError::new("purchase", "subscription has already ended").into());
        }
        let cancelled = self.store.end_subscription(purchase_id, now)?;
        tracing::info!(purchase_id, buyer_id, "subscription cancelled");
        Ok(cancelled)
    }

    pub fn list_purchases(
        &self,
        buyer_id: i64,
        page: PageRequest,
    ) -> Result<Page<Purchase>, StratvaultError> {
        Ok(Page::from_items(
            self.store.purchases_for_buyer(buyer_id)?,
            page,
        ))
    }

    pub fn create_review(
        &self,
        user_id: i64,
        req: ReviewRequest,
    ) -> Result<Review, StratvaultError> {
        self.listing(req.listing_id)?;
        let rating = check_rating(req.rating)?;
        if !self.access.has_purchased(user_id, req.listing_id)? {
            return Err(StratvaultError::permission_denied(
                "only purchasers can review a strategy",
            ));
        }

        let review = self.store.insert_review(
            &NewReview {
                listing_id: req.listing_id,
                user_id,
                rating,
                comment: req.comment,
            },
            self.clock.now(),
        )?;
        tracing::info!(review_id = review.id, listing_id = review.listing_id, "review created");

        publish_or_warn(
            self.events.as_ref(),
            DomainEvent::ReviewCreated {
                review_id: review.id,
                listing_id: review.listing_id,
                user_id,
                rating,
                timestamp: review.created_at,
            },
        );
        Ok(review)
    }

    /// Authors may change the rating and comment of their own review.
    pub fn update_review(
        &self,
        user_id: i64,
        review_id: i64,
        rating: i64,
        comment: String,
    ) -> Result<Review, StratvaultError> {
        self.own_review(user_id, review_id)?;
        let rating = check_rating(rating)?;
        let review = self.store.update_review(review_id, rating, &comment)?;
        tracing::info!(review_id, rating, "review updated");
        Ok(review)
    }

    pub fn delete_review(&self, user_id: i64, review_id: i64) -> Result<(), StratvaultError> {
        self.own_review(user_id, review_id)?;
        self.store.delete_review(review_id)?;
        tracing::info!(review_id, user_id, "review deleted");
        Ok(())
    }

    pub fn list_reviews(
        &self,
        listing_id: i64,
        page: PageRequest,
    ) -> Result<Page<ReviewView>, StratvaultError> {
        self.listing(listing_id)?;
        let page = Page::from_items(self.store.reviews_for_listing(listing_id)?, page);
        Ok(page.map(|review| ReviewView {
            username: self.username_or(review.user_id, || format!("User {}", review.user_id)),
            review,
        }))
    }

    fn listing(&self, listing_id: i64) -> Result<Listing, StratvaultError> {
        self.store
            .get_listing(listing_id)?
            .ok_or_else(|| StratvaultError::not_found("listing", listing_id))
    }

    fn own_review(&self, user_id: i64, review_id: i64) -> Result<Review, StratvaultError> {
        let review = self
            .store
            .get_review(review_id)?
            .ok_or_else(|| StratvaultError::not_found("review", review_id))?;
        if review.user_id != user_id {
            return Err(StratvaultError::permission_denied(format!(
                "user {user_id} did not write review {review_id}"
            )));
        }
        Ok(review)
    }

    fn username_or(&self, user_id: i64, fallback: impl FnOnce() -> String) -> String {
        match self.identity.username(user_id) {
            Ok(name) => name,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "username lookup failed");
                fallback()
            }
        }
    }
}

fn check_price(price: f64) -> Result<(), ValidationError> {
    if !price.is_finite() || price < 0.0 {
        return Err(ValidationError::new("price", "price must be a non-negative number"));
    }
    Ok(())
}

fn check_rating(rating: i64) -> Result<u8, ValidationError> {
    u8::try_from(rating)
        .ok()
        .filter(|r| (1..=5).contains(r))
        .ok_or_else(|| ValidationError::new("rating", "rating must be between 1 and 5"))
}
