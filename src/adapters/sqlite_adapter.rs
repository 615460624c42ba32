//! SQLite store.
//!
//! Writes that must be atomic (version append, purchase) run in `BEGIN
//! IMMEDIATE` transactions; unique indexes back them up. Timestamps are
//! stored as fixed-width RFC 3339 text so string comparison orders them.

use crate::domain::error::StratvaultError;
use crate::domain::indicator::{Indicator, NewIndicator, Parameter};
use crate::domain::listing::{
    Listing, NewListing, NewPurchase, NewReview, Purchase, Review, SubscriptionPeriod,
};
use crate::domain::rule_parser::MAX_SUPPORTED_DEPTH;
use crate::domain::strategy::{NewVersion, StrategyGroup, StrategyVersion};
use crate::domain::structure::Structure;
use crate::domain::tag::{Tag, TagWithCount};
use crate::ports::config_port::ConfigPort;
use crate::ports::identity_port::IdentityPort;
use crate::ports::store_port::StrategyStore;
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{ErrorCode, OptionalExtension, Row, TransactionBehavior, params};
use std::time::Duration;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const GROUP_COLUMNS: &str =
    "id, owner_id, name, is_public, created_at, deleted_at, latest_version";
const VERSION_COLUMNS: &str = "id, group_id, version_number, structure, name, description, \
     thumbnail_url, is_public, change_notes, created_at, owner_id";
const LISTING_COLUMNS: &str = "id, group_id, version_number, seller_id, price, \
     subscription_period, description, active, created_at";
const PURCHASE_COLUMNS: &str =
    "id, listing_id, buyer_id, price_paid, created_at, subscription_end";
const REVIEW_COLUMNS: &str = "id, listing_id, user_id, rating, comment, created_at";
const INDICATOR_COLUMNS: &str =
    "id, name, description, category, formula, active, parameters, created_at";

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, StratvaultError> {
        let db_path =
            config
                .get_string("sqlite", "path")
                .ok_or_else(|| StratvaultError::ConfigMissing {
                    section: "sqlite".into(),
                    key: "path".into(),
                })?;

        let pool_size = config.get_int("sqlite", "pool_size", 4).max(1) as u32;
        let connection_timeout = config
            .get_int("sqlite", "connection_timeout_ms", 5000)
            .max(1) as u64;
        let busy_timeout = Duration::from_millis(
            config.get_int("sqlite", "busy_timeout_ms", 5000).max(0) as u64,
        );

        let manager = SqliteConnectionManager::file(&db_path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")
        });
        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_timeout(Duration::from_millis(connection_timeout))
            .build(manager)
            .map_err(|e: r2d2::Error| StratvaultError::Database {
                reason: e.to_string(),
            })?;

        tracing::debug!(path = %db_path, pool_size, "sqlite pool ready");
        Ok(Self { pool })
    }

    /// Private in-memory database. The pool holds a single connection
    /// because every SQLite memory connection is its own database.
    pub fn in_memory() -> Result<Self, StratvaultError> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e: r2d2::Error| StratvaultError::Database {
                reason: e.to_string(),
            })?;

        Ok(Self { pool })
    }

    pub fn initialize_schema(&self) -> Result<(), StratvaultError> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                username TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS strategy_groups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                is_public INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                deleted_at TEXT,
                latest_version INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_groups_owner ON strategy_groups(owner_id);
            CREATE TABLE IF NOT EXISTS strategy_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                group_id INTEGER NOT NULL REFERENCES strategy_groups(id),
                version_number INTEGER NOT NULL,
                structure TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                thumbnail_url TEXT,
                is_public INTEGER NOT NULL DEFAULT 0,
                change_notes TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                owner_id INTEGER NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_versions_group_number
                ON strategy_versions(group_id, version_number);
            CREATE TABLE IF NOT EXISTS version_preferences (
                user_id INTEGER NOT NULL,
                group_id INTEGER NOT NULL REFERENCES strategy_groups(id),
                version_number INTEGER NOT NULL,
                PRIMARY KEY (user_id, group_id)
            );
            CREATE TABLE IF NOT EXISTS listings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                group_id INTEGER NOT NULL REFERENCES strategy_groups(id),
                version_number INTEGER NOT NULL,
                seller_id INTEGER NOT NULL,
                price REAL NOT NULL CHECK (price >= 0),
                subscription_period TEXT,
                description TEXT NOT NULL DEFAULT '',
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_listings_group ON listings(group_id);
            CREATE TABLE IF NOT EXISTS purchases (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                listing_id INTEGER NOT NULL REFERENCES listings(id),
                buyer_id INTEGER NOT NULL,
                price_paid REAL NOT NULL,
                created_at TEXT NOT NULL,
                subscription_end TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_purchases_buyer ON purchases(buyer_id, listing_id);
            CREATE TABLE IF NOT EXISTS reviews (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                listing_id INTEGER NOT NULL REFERENCES listings(id),
                user_id INTEGER NOT NULL,
                rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
                comment TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_reviews_listing_user
                ON reviews(listing_id, user_id);
            CREATE TABLE IF NOT EXISTS indicators (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                category TEXT NOT NULL,
                formula TEXT NOT NULL DEFAULT '',
                active INTEGER NOT NULL DEFAULT 1,
                parameters TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS strategy_tags (
                group_id INTEGER NOT NULL REFERENCES strategy_groups(id),
                tag_id INTEGER NOT NULL REFERENCES tags(id),
                PRIMARY KEY (group_id, tag_id)
            );
            CREATE INDEX IF NOT EXISTS idx_strategy_tags_tag ON strategy_tags(tag_id);",
        )
        .map_err(query_err)?;

        Ok(())
    }

    pub fn add_user(&self, user_id: i64, username: &str) -> Result<(), StratvaultError> {
        self.conn()?
            .execute(
                "INSERT INTO users (id, username) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET username = excluded.username",
                params![user_id, username],
            )
            .map_err(query_err)?;
        Ok(())
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StratvaultError> {
        self.pool.get().map_err(|e: r2d2::Error| StratvaultError::Unavailable {
            reason: format!("sqlite pool: {e}"),
        })
    }

    fn query_all<T>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>, StratvaultError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql).map_err(query_err)?;
        let rows = stmt.query_map(params, map).map_err(query_err)?;
        rows.collect::<rusqlite::Result<Vec<T>>>().map_err(query_err)
    }

    fn query_one<T>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        map: impl FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Option<T>, StratvaultError> {
        self.conn()?
            .query_row(sql, params, map)
            .optional()
            .map_err(query_err)
    }
}

/// Busy and locked databases are transient; unique violations are
/// duplicates; everything else is a query failure.
fn query_err(e: rusqlite::Error) -> StratvaultError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &e {
        match failure.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                return StratvaultError::Unavailable {
                    reason: e.to_string(),
                };
            }
            ErrorCode::ConstraintViolation
                if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                return StratvaultError::Duplicate {
                    reason: e.to_string(),
                };
            }
            _ => {}
        }
    }
    StratvaultError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_err(idx: usize, err: impl Into<BoxError>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

fn get_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn get_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(_) => get_ts(row, idx).map(Some),
    }
}

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<StrategyGroup> {
    Ok(StrategyGroup {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        is_public: row.get(3)?,
        created_at: get_ts(row, 4)?,
        deleted_at: get_opt_ts(row, 5)?,
        latest_version: row.get(6)?,
    })
}

/// Stored structures were validated on the way in; a row that no longer
/// parses is corrupt.
fn version_from_row(row: &Row<'_>) -> rusqlite::Result<StrategyVersion> {
    let raw: String = row.get(3)?;
    let structure =
        Structure::parse(raw, MAX_SUPPORTED_DEPTH).map_err(|e| conversion_err(3, e))?;
    Ok(StrategyVersion {
        id: row.get(0)?,
        group_id: row.get(1)?,
        version_number: row.get(2)?,
        structure,
        name: row.get(4)?,
        description: row.get(5)?,
        thumbnail_url: row.get(6)?,
        is_public: row.get(7)?,
        change_notes: row.get(8)?,
        created_at: get_ts(row, 9)?,
        owner_id: row.get(10)?,
    })
}

fn listing_from_row(row: &Row<'_>) -> rusqlite::Result<Listing> {
    let subscription = row
        .get::<_, Option<String>>(5)?
        .map(|s| s.parse::<SubscriptionPeriod>())
        .transpose()
        .map_err(|e| conversion_err(5, e))?;
    Ok(Listing {
        id: row.get(0)?,
        group_id: row.get(1)?,
        version_number: row.get(2)?,
        seller_id: row.get(3)?,
        price: row.get(4)?,
        subscription,
        description: row.get(6)?,
        active: row.get(7)?,
        created_at: get_ts(row, 8)?,
    })
}

fn purchase_from_row(row: &Row<'_>) -> rusqlite::Result<Purchase> {
    Ok(Purchase {
        id: row.get(0)?,
        listing_id: row.get(1)?,
        buyer_id: row.get(2)?,
        price_paid: row.get(3)?,
        created_at: get_ts(row, 4)?,
        subscription_end: get_opt_ts(row, 5)?,
    })
}

fn review_from_row(row: &Row<'_>) -> rusqlite::Result<Review> {
    Ok(Review {
        id: row.get(0)?,
        listing_id: row.get(1)?,
        user_id: row.get(2)?,
        rating: row.get(3)?,
        comment: row.get(4)?,
        created_at: get_ts(row, 5)?,
    })
}

fn tag_from_row(row: &Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        name: row.get(1)?,
    })
}

fn tag_count_from_row(row: &Row<'_>) -> rusqlite::Result<TagWithCount> {
    let count: i64 = row.get(2)?;
    Ok(TagWithCount {
        tag: tag_from_row(row)?,
        strategy_count: count.max(0) as u64,
    })
}

/// Tags with the number of live groups linked to them.
const TAG_COUNT_QUERY: &str = "SELECT t.id, t.name,
        (SELECT COUNT(*) FROM strategy_tags st
         JOIN strategy_groups g ON g.id = st.group_id
         WHERE st.tag_id = t.id AND g.deleted_at IS NULL)
     FROM tags t";

fn indicator_from_row(row: &Row<'_>) -> rusqlite::Result<Indicator> {
    let raw: String = row.get(6)?;
    let parameters: Vec<Parameter> =
        serde_json::from_str(&raw).map_err(|e| conversion_err(6, e))?;
    Ok(Indicator {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        category: row.get(3)?,
        formula: row.get(4)?,
        active: row.get(5)?,
        parameters,
        created_at: get_ts(row, 7)?,
    })
}

impl StrategyStore for SqliteStore {
    fn insert_group(
        &self,
        first: &NewVersion,
        now: DateTime<Utc>,
    ) -> Result<(StrategyGroup, StrategyVersion), StratvaultError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;

        tx.execute(
            "INSERT INTO strategy_groups (owner_id, name, is_public, created_at, latest_version)
             VALUES (?1, ?2, ?3, ?4, 1)",
            params![first.owner_id, first.name, first.is_public, ts(now)],
        )
        .map_err(query_err)?;
        let group_id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO strategy_versions (group_id, version_number, structure, name, description,
                 thumbnail_url, is_public, change_notes, created_at, owner_id)
             VALUES (?1, 1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                group_id,
                first.structure.as_json(),
                first.name,
                first.description,
                first.thumbnail_url,
                first.is_public,
                first.change_notes,
                ts(now),
                first.owner_id
            ],
        )
        .map_err(query_err)?;
        let version_id = tx.last_insert_rowid();
        tx.commit().map_err(query_err)?;

        let group = StrategyGroup {
            id: group_id,
            owner_id: first.owner_id,
            name: first.name.clone(),
            is_public: first.is_public,
            created_at: now,
            deleted_at: None,
            latest_version: 1,
        };
        let version = StrategyVersion {
            id: version_id,
            group_id,
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
        Ok((group, version))
    }

    fn get_group(&self, group_id: i64) -> Result<Option<StrategyGroup>, StratvaultError> {
        self.query_one(
            &format!("SELECT {GROUP_COLUMNS} FROM strategy_groups WHERE id = ?1"),
            params![group_id],
            group_from_row,
        )
    }

    fn list_groups(
        &self,
        owner_id: Option<i64>,
        tag_id: Option<i64>,
    ) -> Result<Vec<StrategyGroup>, StratvaultError> {
        self.query_all(
            &format!(
                "SELECT {GROUP_COLUMNS} FROM strategy_groups
                 WHERE deleted_at IS NULL AND (?1 IS NULL OR owner_id = ?1)
                   AND (?2 IS NULL OR id IN
                        (SELECT group_id FROM strategy_tags WHERE tag_id = ?2))
                 ORDER BY id DESC"
            ),
            params![owner_id, tag_id],
            group_from_row,
        )
    }

    fn soft_delete_group(&self, group_id: i64, now: DateTime<Utc>) -> Result<(), StratvaultError> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE strategy_groups SET deleted_at = COALESCE(deleted_at, ?1) WHERE id = ?2",
                params![ts(now), group_id],
            )
            .map_err(query_err)?;
        if changed == 0 {
            return Err(StratvaultError::not_found("strategy", group_id));
        }
        Ok(())
    }

    fn append_version(
        &self,
        version: &NewVersion,
        now: DateTime<Utc>,
    ) -> Result<StrategyVersion, StratvaultError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;

        let deleted: Option<bool> = tx
            .query_row(
                "SELECT deleted_at IS NOT NULL FROM strategy_groups WHERE id = ?1",
                params![version.group_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_err)?;
        match deleted {
            None => return Err(StratvaultError::not_found("strategy", version.group_id)),
            Some(true) => {
                return Err(StratvaultError::permission_denied(
                    "cannot add versions to a deleted strategy",
                ));
            }
            Some(false) => {}
        }

        let latest: Option<u32> = tx
            .query_row(
                "SELECT MAX(version_number) FROM strategy_versions WHERE group_id = ?1",
                params![version.group_id],
                |row| row.get(0),
            )
            .map_err(query_err)?;
        let next = latest.unwrap_or(0) + 1;

        tx.execute(
            "INSERT INTO strategy_versions (group_id, version_number, structure, name, description,
                 thumbnail_url, is_public, change_notes, created_at, owner_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                version.group_id,
                next,
                version.structure.as_json(),
                version.name,
                version.description,
                version.thumbnail_url,
                version.is_public,
                version.change_notes,
                ts(now),
                version.owner_id
            ],
        )
        .map_err(query_err)?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE strategy_groups SET latest_version = ?1, name = ?2, is_public = ?3
             WHERE id = ?4",
            params![next, version.name, version.is_public, version.group_id],
        )
        .map_err(query_err)?;
        tx.commit().map_err(query_err)?;

        Ok(StrategyVersion {
            id,
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
        })
    }

    fn get_version(
        &self,
        group_id: i64,
        version_number: u32,
    ) -> Result<Option<StrategyVersion>, StratvaultError> {
        self.query_one(
            &format!(
                "SELECT {VERSION_COLUMNS} FROM strategy_versions
                 WHERE group_id = ?1 AND version_number = ?2"
            ),
            params![group_id, version_number],
            version_from_row,
        )
    }

    fn list_versions(&self, group_id: i64) -> Result<Vec<StrategyVersion>, StratvaultError> {
        self.query_all(
            &format!(
                "SELECT {VERSION_COLUMNS} FROM strategy_versions
                 WHERE group_id = ?1 ORDER BY version_number DESC"
            ),
            params![group_id],
            version_from_row,
        )
    }

    fn get_preference(&self, user_id: i64, group_id: i64) -> Result<Option<u32>, StratvaultError> {
        self.query_one(
            "SELECT version_number FROM version_preferences WHERE user_id = ?1 AND group_id = ?2",
            params![user_id, group_id],
            |row| row.get(0),
        )
    }

    fn set_preference(
        &self,
        user_id: i64,
        group_id: i64,
        version_number: u32,
    ) -> Result<(), StratvaultError> {
        self.conn()?
            .execute(
                "INSERT INTO version_preferences (user_id, group_id, version_number)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id, group_id) DO UPDATE SET version_number = excluded.version_number",
                params![user_id, group_id, version_number],
            )
            .map_err(query_err)?;
        Ok(())
    }

    fn insert_listing(
        &self,
        listing: &NewListing,
        now: DateTime<Utc>,
    ) -> Result<Listing, StratvaultError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO listings (group_id, version_number, seller_id, price,
                 subscription_period, description, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)",
            params![
                listing.group_id,
                listing.version_number,
                listing.seller_id,
                listing.price,
                listing.subscription.map(|p| p.as_str()),
                listing.description,
                ts(now)
            ],
        )
        .map_err(query_err)?;

        Ok(Listing {
            id: conn.last_insert_rowid(),
            group_id: listing.group_id,
            version_number: listing.version_number,
            seller_id: listing.seller_id,
            price: listing.price,
            subscription: listing.subscription,
            description: listing.description.clone(),
            active: true,
            created_at: now,
        })
    }

    fn get_listing(&self, listing_id: i64) -> Result<Option<Listing>, StratvaultError> {
        self.query_one(
            &format!("SELECT {LISTING_COLUMNS} FROM listings WHERE id = ?1"),
            params![listing_id],
            listing_from_row,
        )
    }

    fn list_listings(&self, active_only: bool) -> Result<Vec<Listing>, StratvaultError> {
        self.query_all(
            &format!(
                "SELECT {LISTING_COLUMNS} FROM listings
                 WHERE (?1 = 0 OR active = 1) ORDER BY id DESC"
            ),
            params![active_only],
            listing_from_row,
        )
    }

    fn listings_for_group(&self, group_id: i64) -> Result<Vec<Listing>, StratvaultError> {
        self.query_all(
            &format!("SELECT {LISTING_COLUMNS} FROM listings WHERE group_id = ?1 ORDER BY id DESC"),
            params![group_id],
            listing_from_row,
        )
    }

    fn set_listing_active(&self, listing_id: i64, active: bool) -> Result<(), StratvaultError> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE listings SET active = ?1 WHERE id = ?2",
                params![active, listing_id],
            )
            .map_err(query_err)?;
        if changed == 0 {
            return Err(StratvaultError::not_found("listing", listing_id));
        }
        Ok(())
    }

    fn update_listing(&self, listing: &Listing) -> Result<(), StratvaultError> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE listings SET price = ?1, description = ?2, active = ?3 WHERE id = ?4",
                params![listing.price, listing.description, listing.active, listing.id],
            )
            .map_err(query_err)?;
        if changed == 0 {
            return Err(StratvaultError::not_found("listing", listing.id));
        }
        Ok(())
    }

    fn insert_purchase(
        &self,
        purchase: &NewPurchase,
        now: DateTime<Utc>,
    ) -> Result<Purchase, StratvaultError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;

        let active: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM purchases
                 WHERE listing_id = ?1 AND buyer_id = ?2
                   AND (subscription_end IS NULL OR subscription_end > ?3)",
                params![purchase.listing_id, purchase.buyer_id, ts(now)],
                |row| row.get(0),
            )
            .map_err(query_err)?;
        if active > 0 {
            return Err(StratvaultError::duplicate("strategy already purchased"));
        }

        tx.execute(
            "INSERT INTO purchases (listing_id, buyer_id, price_paid, created_at, subscription_end)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                purchase.listing_id,
                purchase.buyer_id,
                purchase.price_paid,
                ts(now),
                purchase.subscription_end.map(ts)
            ],
        )
        .map_err(query_err)?;
        let id = tx.last_insert_rowid();
        tx.commit().map_err(query_err)?;

        Ok(Purchase {
            id,
            listing_id: purchase.listing_id,
            buyer_id: purchase.buyer_id,
            price_paid: purchase.price_paid,
            created_at: now,
            subscription_end: purchase.subscription_end,
        })
    }

    fn get_purchase(&self, purchase_id: i64) -> Result<Option<Purchase>, StratvaultError> {
        self.query_one(
            &format!("SELECT {PURCHASE_COLUMNS} FROM purchases WHERE id = ?1"),
            params![purchase_id],
            purchase_from_row,
        )
    }

    fn purchases_for_buyer(&self, buyer_id: i64) -> Result<Vec<Purchase>, StratvaultError> {
        self.query_all(
            &format!("SELECT {PURCHASE_COLUMNS} FROM purchases WHERE buyer_id = ?1 ORDER BY id DESC"),
            params![buyer_id],
            purchase_from_row,
        )
    }

    fn purchases_for_group(
        &self,
        buyer_id: i64,
        group_id: i64,
    ) -> Result<Vec<Purchase>, StratvaultError> {
        self.query_all(
            "SELECT p.id, p.listing_id, p.buyer_id, p.price_paid, p.created_at, p.subscription_end
             FROM purchases p JOIN listings l ON l.id = p.listing_id
             WHERE p.buyer_id = ?1 AND l.group_id = ?2
             ORDER BY p.id DESC",
            params![buyer_id, group_id],
            purchase_from_row,
        )
    }

    fn count_purchases(&self, listing_id: i64) -> Result<u64, StratvaultError> {
        let count: i64 = self
            .query_one(
                "SELECT COUNT(*) FROM purchases WHERE listing_id = ?1",
                params![listing_id],
                |row| row.get(0),
            )?
            .unwrap_or(0);
        Ok(count.max(0) as u64)
    }

    fn end_subscription(
        &self,
        purchase_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Purchase, StratvaultError> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE purchases SET subscription_end = ?1 WHERE id = ?2",
                params![ts(at), purchase_id],
            )
            .map_err(query_err)?;
        if changed == 0 {
            return Err(StratvaultError::not_found("purchase", purchase_id));
        }
        self.get_purchase(purchase_id)?
            .ok_or_else(|| StratvaultError::not_found("purchase", purchase_id))
    }

    fn insert_review(
        &self,
        review: &NewReview,
        now: DateTime<Utc>,
    ) -> Result<Review, StratvaultError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO reviews (listing_id, user_id, rating, comment, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                review.listing_id,
                review.user_id,
                review.rating,
                review.comment,
                ts(now)
            ],
        )
        .map_err(query_err)?;

        Ok(Review {
            id: conn.last_insert_rowid(),
            listing_id: review.listing_id,
            user_id: review.user_id,
            rating: review.rating,
            comment: review.comment.clone(),
            created_at: now,
        })
    }

    fn reviews_for_listing(&self, listing_id: i64) -> Result<Vec<Review>, StratvaultError> {
        self.query_all(
            &format!("SELECT {REVIEW_COLUMNS} FROM reviews WHERE listing_id = ?1 ORDER BY id DESC"),
            params![listing_id],
            review_from_row,
        )
    }

    fn get_review(&self, review_id: i64) -> Result<Option<Review>, StratvaultError> {
        self.query_one(
            &format!("SELECT {REVIEW_COLUMNS} FROM reviews WHERE id = ?1"),
            params![review_id],
            review_from_row,
        )
    }

    fn update_review(
        &self,
        review_id: i64,
        rating: u8,
        comment: &str,
    ) -> Result<Review, StratvaultError> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE reviews SET rating = ?1, comment = ?2 WHERE id = ?3",
                params![rating, comment, review_id],
            )
            .map_err(query_err)?;
        if changed == 0 {
            return Err(StratvaultError::not_found("review", review_id));
        }
        self.get_review(review_id)?
            .ok_or_else(|| StratvaultError::not_found("review", review_id))
    }

    fn delete_review(&self, review_id: i64) -> Result<(), StratvaultError> {
        let changed = self
            .conn()?
            .execute("DELETE FROM reviews WHERE id = ?1", params![review_id])
            .map_err(query_err)?;
        if changed == 0 {
            return Err(StratvaultError::not_found("review", review_id));
        }
        Ok(())
    }

    fn insert_indicator(
        &self,
        indicator: &NewIndicator,
        now: DateTime<Utc>,
    ) -> Result<Indicator, StratvaultError> {
        let parameters = serde_json::to_string(&indicator.parameters)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO indicators (name, description, category, formula, active, parameters, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                indicator.name,
                indicator.description,
                indicator.category,
                indicator.formula,
                indicator.active,
                parameters,
                ts(now)
            ],
        )
        .map_err(query_err)?;

        Ok(Indicator {
            id: conn.last_insert_rowid(),
            name: indicator.name.clone(),
            description: indicator.description.clone(),
            category: indicator.category.clone(),
            formula: indicator.formula.clone(),
            active: indicator.active,
            parameters: indicator.parameters.clone(),
            created_at: now,
        })
    }

    fn get_indicator(&self, indicator_id: i64) -> Result<Option<Indicator>, StratvaultError> {
        self.query_one(
            &format!("SELECT {INDICATOR_COLUMNS} FROM indicators WHERE id = ?1"),
            params![indicator_id],
            indicator_from_row,
        )
    }

    fn list_indicators(&self) -> Result<Vec<Indicator>, StratvaultError> {
        self.query_all(
            &format!("SELECT {INDICATOR_COLUMNS} FROM indicators ORDER BY name"),
            [],
            indicator_from_row,
        )
    }

    fn update_indicator(
        &self,
        indicator_id: i64,
        indicator: &NewIndicator,
    ) -> Result<Indicator, StratvaultError> {
        let parameters = serde_json::to_string(&indicator.parameters)?;
        let changed = self
            .conn()?
            .execute(
                "UPDATE indicators SET name = ?1, description = ?2, category = ?3, formula = ?4,
                     active = ?5, parameters = ?6
                 WHERE id = ?7",
                params![
                    indicator.name,
                    indicator.description,
                    indicator.category,
                    indicator.formula,
                    indicator.active,
                    parameters,
                    indicator_id
                ],
            )
            .map_err(query_err)?;
        if changed == 0 {
            return Err(StratvaultError::not_found("indicator", indicator_id));
        }
        self.get_indicator(indicator_id)?
            .ok_or_else(|| StratvaultError::not_found("indicator", indicator_id))
    }

    fn delete_indicator(&self, indicator_id: i64) -> Result<(), StratvaultError> {
        let changed = self
            .conn()?
            .execute("DELETE FROM indicators WHERE id = ?1", params![indicator_id])
            .map_err(query_err)?;
        if changed == 0 {
            return Err(StratvaultError::not_found("indicator", indicator_id));
        }
        Ok(())
    }

    fn insert_tag(&self, name: &str) -> Result<Tag, StratvaultError> {
        let conn = self.conn()?;
        conn.execute("INSERT INTO tags (name) VALUES (?1)", params![name])
            .map_err(query_err)?;
        Ok(Tag {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
        })
    }

    fn get_tag(&self, tag_id: i64) -> Result<Option<TagWithCount>, StratvaultError> {
        self.query_one(
            &format!("{TAG_COUNT_QUERY} WHERE t.id = ?1"),
            params![tag_id],
            tag_count_from_row,
        )
    }

    fn list_tags(&self) -> Result<Vec<TagWithCount>, StratvaultError> {
        self.query_all(
            &format!("{TAG_COUNT_QUERY} ORDER BY t.name"),
            [],
            tag_count_from_row,
        )
    }

    fn rename_tag(&self, tag_id: i64, name: &str) -> Result<Tag, StratvaultError> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE tags SET name = ?1 WHERE id = ?2",
                params![name, tag_id],
            )
            .map_err(query_err)?;
        if changed == 0 {
            return Err(StratvaultError::not_found("tag", tag_id));
        }
        Ok(Tag {
            id: tag_id,
            name: name.to_string(),
        })
    }

    fn delete_tag(&self, tag_id: i64) -> Result<(), StratvaultError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;
        tx.execute("DELETE FROM strategy_tags WHERE tag_id = ?1", params![tag_id])
            .map_err(query_err)?;
        let changed = tx
            .execute("DELETE FROM tags WHERE id = ?1", params![tag_id])
            .map_err(query_err)?;
        if changed == 0 {
            return Err(StratvaultError::not_found("tag", tag_id));
        }
        tx.commit().map_err(query_err)
    }

    fn set_group_tags(&self, group_id: i64, tag_ids: &[i64]) -> Result<(), StratvaultError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;

        let group_exists: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM strategy_groups WHERE id = ?1)",
                params![group_id],
                |row| row.get(0),
            )
            .map_err(query_err)?;
        if !group_exists {
            return Err(StratvaultError::not_found("strategy", group_id));
        }

        tx.execute("DELETE FROM strategy_tags WHERE group_id = ?1", params![group_id])
            .map_err(query_err)?;
        for tag_id in tag_ids {
            let tag_exists: bool = tx
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM tags WHERE id = ?1)",
                    params![tag_id],
                    |row| row.get(0),
                )
                .map_err(query_err)?;
            if !tag_exists {
                return Err(StratvaultError::not_found("tag", tag_id));
            }
            tx.execute(
                "INSERT OR IGNORE INTO strategy_tags (group_id, tag_id) VALUES (?1, ?2)",
                params![group_id, tag_id],
            )
            .map_err(query_err)?;
        }
        tx.commit().map_err(query_err)
    }

    fn tags_for_group(&self, group_id: i64) -> Result<Vec<Tag>, StratvaultError> {
        self.query_all(
            "SELECT t.id, t.name FROM tags t
             JOIN strategy_tags st ON st.tag_id = t.id
             WHERE st.group_id = ?1 ORDER BY t.name",
            params![group_id],
            tag_from_row,
        )
    }
}

impl IdentityPort for SqliteStore {
    fn username(&self, user_id: i64) -> Result<String, StratvaultError> {
        self.query_one(
            "SELECT username FROM users WHERE id = ?1",
            params![user_id],
            |row| row.get(0),
        )?
        .ok_or_else(|| StratvaultError::not_found("user", user_id))
    }
}
