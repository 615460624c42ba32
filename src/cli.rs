//! CLI definition and dispatch.
//!
//! Every command prints its result as JSON on stdout. Errors go to stderr
//! as `error: ...` and map to an exit code per error class.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::log_event_sink::LogEventSink;
use crate::adapters::sqlite_adapter::SqliteStore;
use crate::adapters::system_clock::SystemClock;
use crate::domain::config_validation::{max_rule_depth, validate_config};
use crate::domain::error::StratvaultError;
use crate::domain::indicator::{EnumValue, IndicatorUpdate, NewIndicator, Parameter};
use crate::domain::indicator_registry::builtin_definitions;
use crate::domain::listing::{ListingRequest, ListingUpdate, ReviewRequest};
use crate::domain::pagination::PageRequest;
use crate::domain::rule::extract_indicators;
use crate::domain::strategy::{NewStrategyMeta, VersionChanges};
use crate::logging::{LogFormat, init_logging};
use crate::ports::config_port::ConfigPort;
use crate::services::Services;

#[derive(Parser, Debug)]
#[command(name = "stratvault", about = "Versioned trading strategy store and marketplace")]
pub struct Cli {
    /// INI configuration file
    #[arg(short, long, global = true, default_value = "stratvault.ini")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a strategy structure file without storing it
    Validate { file: PathBuf },
    /// Create the database schema and seed the built-in indicators
    InitDb,
    /// Register or rename a user
    AddUser {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        name: String,
    },
    /// Create a strategy from a structure file
    Create {
        #[arg(short, long)]
        user: i64,
        #[arg(short, long)]
        file: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        thumbnail: Option<String>,
        #[arg(long)]
        public: bool,
    },
    /// Append a new version to a strategy
    Update {
        #[arg(short, long)]
        user: i64,
        #[arg(short, long)]
        strategy: i64,
        #[arg(short, long)]
        file: PathBuf,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        thumbnail: Option<String>,
        #[arg(long)]
        public: Option<bool>,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Append a copy of an old version
    Restore {
        #[arg(short, long)]
        user: i64,
        #[arg(short, long)]
        strategy: i64,
        #[arg(short, long)]
        version: u32,
    },
    /// Copy a readable strategy into a new private one
    Clone {
        #[arg(short, long)]
        user: i64,
        #[arg(short, long)]
        strategy: i64,
        #[arg(long)]
        name: String,
    },
    /// Show one version, or the user's active version
    Show {
        #[arg(short, long)]
        user: i64,
        #[arg(short, long)]
        strategy: i64,
        #[arg(short, long)]
        version: Option<u32>,
    },
    /// Show version history
    Versions {
        #[arg(short, long)]
        user: i64,
        #[arg(short, long)]
        strategy: i64,
    },
    /// Pin the version a user sees
    SetActive {
        #[arg(short, long)]
        user: i64,
        #[arg(short, long)]
        strategy: i64,
        #[arg(short, long)]
        version: u32,
    },
    /// Soft-delete a strategy
    Delete {
        #[arg(short, long)]
        user: i64,
        #[arg(short, long)]
        strategy: i64,
    },
    /// List strategies visible to a user
    List {
        #[arg(short, long)]
        user: i64,
        #[arg(long)]
        owner: Option<i64>,
        /// Only strategies carrying this tag id
        #[arg(long)]
        tag: Option<i64>,
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
    /// List indicator definitions
    Indicators {
        /// Show a single definition by name
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        category: Option<String>,
        /// Include inactive definitions
        #[arg(long)]
        all: bool,
    },
    /// Administer indicator definitions
    Indicator {
        #[command(subcommand)]
        action: IndicatorCommand,
    },
    /// Manage tags and strategy tag sets
    Tag {
        #[command(subcommand)]
        action: TagCommand,
    },
    /// Browse marketplace listings, or show one
    ListMarket {
        #[arg(long)]
        listing: Option<i64>,
        /// Include inactive listings
        #[arg(long)]
        all: bool,
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
    /// List a strategy version for sale
    Sell {
        #[arg(short, long)]
        user: i64,
        #[arg(short, long)]
        strategy: i64,
        #[arg(short, long)]
        version: u32,
        #[arg(long)]
        price: f64,
        /// monthly, quarterly or yearly
        #[arg(long)]
        period: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Take a listing off the marketplace
    Unlist {
        #[arg(short, long)]
        user: i64,
        #[arg(short, long)]
        listing: i64,
    },
    /// Change a listing's price, description or availability
    EditListing {
        #[arg(short, long)]
        user: i64,
        #[arg(short, long)]
        listing: i64,
        #[arg(long)]
        price: Option<f64>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        active: Option<bool>,
    },
    /// Buy a listing
    Purchase {
        #[arg(short, long)]
        user: i64,
        #[arg(short, long)]
        listing: i64,
    },
    /// List a user's purchases
    Purchases {
        #[arg(short, long)]
        user: i64,
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
    /// End a subscription now
    Cancel {
        #[arg(short, long)]
        user: i64,
        #[arg(short, long)]
        purchase: i64,
    },
    /// Review a purchased listing
    Review {
        #[arg(short, long)]
        user: i64,
        #[arg(short, long)]
        listing: i64,
        #[arg(short, long)]
        rating: i64,
        #[arg(long, default_value = "")]
        comment: String,
    },
    /// Change the rating and comment of your review
    EditReview {
        #[arg(short, long)]
        user: i64,
        #[arg(long)]
        review: i64,
        #[arg(short, long)]
        rating: i64,
        #[arg(long, default_value = "")]
        comment: String,
    },
    /// Delete your review
    DeleteReview {
        #[arg(short, long)]
        user: i64,
        #[arg(long)]
        review: i64,
    },
    /// List reviews for a listing
    Reviews {
        #[arg(short, long)]
        listing: i64,
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}

#[derive(Subcommand, Debug)]
pub enum IndicatorCommand {
    /// Create a definition from a JSON file
    Create { file: PathBuf },
    /// Apply a JSON patch of header fields
    Update {
        #[arg(long)]
        id: i64,
        file: PathBuf,
    },
    Delete {
        #[arg(long)]
        id: i64,
    },
    /// Add a parameter from a JSON file
    AddParam {
        #[arg(long)]
        id: i64,
        file: PathBuf,
    },
    /// Replace a parameter's schema from a JSON file
    UpdateParam {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        name: String,
        file: PathBuf,
    },
    DeleteParam {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        name: String,
    },
    AddEnum {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        param: String,
        #[arg(long)]
        value: String,
        #[arg(long, default_value = "")]
        display: String,
    },
    UpdateEnum {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        param: String,
        #[arg(long)]
        value: String,
        #[arg(long)]
        new_value: Option<String>,
        #[arg(long, default_value = "")]
        display: String,
    },
    DeleteEnum {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        param: String,
        #[arg(long)]
        value: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum TagCommand {
    Create {
        #[arg(long)]
        name: String,
    },
    /// List tags with strategy counts
    List {
        #[arg(long)]
        search: Option<String>,
        /// Show the most used tags instead
        #[arg(long)]
        popular: Option<usize>,
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    Rename {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        name: String,
    },
    Delete {
        #[arg(long)]
        id: i64,
    },
    /// Replace the tags of a strategy
    Set {
        #[arg(short, long)]
        user: i64,
        #[arg(short, long)]
        strategy: i64,
        /// Comma-separated tag ids; omit to clear
        #[arg(long, value_delimiter = ',')]
        tags: Vec<i64>,
    },
    /// Show the tags of a strategy
    Show {
        #[arg(short, long)]
        user: i64,
        #[arg(short, long)]
        strategy: i64,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match execute(&cli.config, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, StratvaultError> {
    let config = FileConfigAdapter::from_file(path)?;
    validate_config(&config)?;
    Ok(config)
}

/// Open the store from config and initialise logging.
pub fn build_services(
    config: &dyn ConfigPort,
) -> Result<(Arc<SqliteStore>, Services), StratvaultError> {
    let level = config
        .get_string("logging", "level")
        .unwrap_or_else(|| "info".to_string());
    let format = LogFormat::from_config(config.get_string("logging", "format").as_deref());
    init_logging(&level, format, config.get_bool("logging", "ansi", true));

    let store = Arc::new(SqliteStore::from_config(config)?);
    let services = Services::wire(
        store.clone(),
        Arc::new(LogEventSink),
        Arc::new(SystemClock),
        max_rule_depth(config),
    );
    Ok((store, services))
}

fn execute(config_path: &Path, command: Command) -> Result<(), StratvaultError> {
    let config = load_config(config_path)?;
    let (store, services) = build_services(&config)?;

    if let Command::InitDb = command {
        return init_db(&store, &services);
    }
    services.registry.refresh()?;

    match command {
        Command::InitDb => Ok(()),
        Command::Validate { file } => {
            let raw = fs::read_to_string(&file)?;
            let structure = services.validator.validate_json(raw)?;
            let indicators: BTreeSet<&str> = extract_indicators(structure.buy_rules())
                .into_iter()
                .chain(extract_indicators(structure.sell_rules()))
                .map(|ind| ind.name.as_str())
                .collect();
            let leaves: usize = structure
                .buy_rules()
                .iter()
                .chain(structure.sell_rules())
                .map(|node| node.leaf_count())
                .sum();
            print_json(&serde_json::json!({
                "valid": true,
                "buyRules": structure.buy_rules().len(),
                "sellRules": structure.sell_rules().len(),
                "conditions": leaves,
                "maxDepth": services.validator.max_depth(),
                "indicators": indicators,
            }))
        }
        Command::AddUser { id, name } => {
            store.add_user(id, &name)?;
            print_json(&serde_json::json!({ "id": id, "username": name }))
        }
        Command::Create {
            user,
            file,
            name,
            description,
            thumbnail,
            public,
        } => {
            let raw = fs::read_to_string(&file)?;
            let meta = NewStrategyMeta {
                name,
                description,
                thumbnail_url: thumbnail,
                is_public: public,
            };
            let (_, version) = services.versions.create_group(user, &raw, meta)?;
            print_json(&version)
        }
        Command::Update {
            user,
            strategy,
            file,
            name,
            description,
            thumbnail,
            public,
            notes,
        } => {
            let raw = fs::read_to_string(&file)?;
            let changes = VersionChanges {
                name,
                description,
                thumbnail_url: thumbnail,
                is_public: public,
                change_notes: notes,
            };
            print_json(&services.versions.create_version(strategy, user, &raw, changes)?)
        }
        Command::Restore {
            user,
            strategy,
            version,
        } => print_json(&services.versions.restore_version(strategy, user, version)?),
        Command::Clone {
            user,
            strategy,
            name,
        } => {
            let (_, version) = services.versions.clone_strategy(strategy, user, &name)?;
            print_json(&version)
        }
        Command::Show {
            user,
            strategy,
            version,
        } => {
            let shown = match version {
                Some(n) => services.versions.get_version_for(user, strategy, n)?,
                None => services.versions.resolve_active_version(strategy, user)?,
            };
            print_json(&shown)
        }
        Command::Versions { user, strategy } => {
            print_json(&services.versions.list_versions(user, strategy)?)
        }
        Command::SetActive {
            user,
            strategy,
            version,
        } => {
            services.versions.set_active_version(user, strategy, version)?;
            print_json(&serde_json::json!({ "strategyId": strategy, "activeVersion": version }))
        }
        Command::Delete { user, strategy } => {
            services.versions.delete_group(strategy, user)?;
            print_json(&serde_json::json!({ "strategyId": strategy, "deleted": true }))
        }
        Command::List {
            user,
            owner,
            tag,
            page,
            limit,
        } => print_json(&services.versions.list_strategies(
            user,
            owner,
            tag,
            PageRequest::new(page, limit),
        )?),
        Command::Indicator { action } => indicator_command(&services, action),
        Command::Tag { action } => tag_command(&services, action),
        Command::Indicators {
            name: Some(name), ..
        } => print_json(&services.registry.get_indicator_by_name(&name)?),
        Command::Indicators {
            name: None,
            category,
            all,
        } => print_json(
            &services
                .registry
                .list_indicators(category.as_deref(), !all)?,
        ),
        Command::ListMarket {
            listing: Some(id), ..
        } => print_json(&services.marketplace.get_listing(id)?),
        Command::ListMarket {
            listing: None,
            all,
            page,
            limit,
        } => print_json(
            &services
                .marketplace
                .list_listings(!all, PageRequest::new(page, limit))?,
        ),
        Command::Sell {
            user,
            strategy,
            version,
            price,
            period,
            description,
        } => {
            let req = ListingRequest {
                group_id: strategy,
                version_number: version,
                price,
                subscription: period,
                description,
            };
            print_json(&services.marketplace.create_listing(user, req)?)
        }
        Command::Unlist { user, listing } => {
            print_json(&services.marketplace.deactivate_listing(user, listing)?)
        }
        Command::EditListing {
            user,
            listing,
            price,
            description,
            active,
        } => {
            let update = ListingUpdate {
                price,
                description,
                active,
            };
            print_json(&services.marketplace.update_listing(user, listing, update)?)
        }
        Command::Purchase { user, listing } => {
            print_json(&services.marketplace.purchase(user, listing)?)
        }
        Command::Purchases { user, page, limit } => print_json(
            &services
                .marketplace
                .list_purchases(user, PageRequest::new(page, limit))?,
        ),
        Command::Cancel { user, purchase } => {
            print_json(&services.marketplace.cancel_subscription(user, purchase)?)
        }
        Command::Review {
            user,
            listing,
            rating,
            comment,
        } => {
            let req = ReviewRequest {
                listing_id: listing,
                rating,
                comment,
            };
            print_json(&services.marketplace.create_review(user, req)?)
        }
        Command::EditReview {
            user,
            review,
            rating,
            comment,
        } => print_json(
            &services
                .marketplace
                .update_review(user, review, rating, comment)?,
        ),
        Command::DeleteReview { user, review } => {
            services.marketplace.delete_review(user, review)?;
            print_json(&serde_json::json!({ "reviewId": review, "deleted": true }))
        }
        Command::Reviews {
            listing,
            page,
            limit,
        } => print_json(
            &services
                .marketplace
                .list_reviews(listing, PageRequest::new(page, limit))?,
        ),
    }
}

fn indicator_command(services: &Services, action: IndicatorCommand) -> Result<(), StratvaultError> {
    let registry = &services.registry;
    let updated = match action {
        IndicatorCommand::Create { file } => {
            registry.create_indicator(read_json::<NewIndicator>(&file)?)?
        }
        IndicatorCommand::Update { id, file } => {
            registry.update_indicator(id, read_json::<IndicatorUpdate>(&file)?)?
        }
        IndicatorCommand::Delete { id } => {
            registry.delete_indicator(id)?;
            return print_json(&serde_json::json!({ "indicatorId": id, "deleted": true }));
        }
        IndicatorCommand::AddParam { id, file } => {
            registry.add_parameter(id, read_json::<Parameter>(&file)?)?
        }
        IndicatorCommand::UpdateParam { id, name, file } => {
            registry.update_parameter(id, &name, read_json::<Parameter>(&file)?)?
        }
        IndicatorCommand::DeleteParam { id, name } => registry.delete_parameter(id, &name)?,
        IndicatorCommand::AddEnum {
            id,
            param,
            value,
            display,
        } => registry.add_enum_value(
            id,
            &param,
            EnumValue {
                value,
                display_name: display,
            },
        )?,
        IndicatorCommand::UpdateEnum {
            id,
            param,
            value,
            new_value,
            display,
        } => {
            let replacement = EnumValue {
                value: new_value.unwrap_or_else(|| value.clone()),
                display_name: display,
            };
            registry.update_enum_value(id, &param, &value, replacement)?
        }
        IndicatorCommand::DeleteEnum { id, param, value } => {
            registry.delete_enum_value(id, &param, &value)?
        }
    };
    print_json(&updated)
}

fn tag_command(services: &Services, action: TagCommand) -> Result<(), StratvaultError> {
    let tags = &services.tags;
    match action {
        TagCommand::Create { name } => print_json(&tags.create_tag(&name)?),
        TagCommand::List {
            popular: Some(n), ..
        } => print_json(&tags.popular_tags(n)?),
        TagCommand::List {
            search,
            popular: None,
            page,
            limit,
        } => print_json(&tags.list_tags(search.as_deref(), PageRequest::new(page, limit))?),
        TagCommand::Rename { id, name } => print_json(&tags.rename_tag(id, &name)?),
        TagCommand::Delete { id } => {
            tags.delete_tag(id)?;
            print_json(&serde_json::json!({ "tagId": id, "deleted": true }))
        }
        TagCommand::Set {
            user,
            strategy,
            tags: ids,
        } => print_json(&tags.set_strategy_tags(user, strategy, &ids)?),
        TagCommand::Show { user, strategy } => print_json(&tags.strategy_tags(user, strategy)?),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(file: &Path) -> Result<T, StratvaultError> {
    let raw = fs::read_to_string(file)?;
    Ok(serde_json::from_str(&raw)?)
}

fn init_db(store: &SqliteStore, services: &Services) -> Result<(), StratvaultError> {
    store.initialize_schema()?;
    let mut seeded = Vec::new();
    for def in builtin_definitions() {
        let name = def.name.clone();
        match services.registry.create_indicator(def) {
            Ok(_) => seeded.push(name),
            Err(StratvaultError::Duplicate { .. }) => {
                tracing::debug!(indicator = %name, "indicator already present");
            }
            Err(e) => return Err(e),
        }
    }
    tracing::info!(seeded = seeded.len(), "database initialized");
    print_json(&serde_json::json!({ "initialized": true, "seededIndicators": seeded }))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), StratvaultError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
