//! Service wiring shared by the CLI and embedding applications.

use crate::domain::access::AccessResolver;
use crate::domain::indicator_registry::IndicatorRegistry;
use crate::domain::marketplace::Marketplace;
use crate::domain::rule_validator::RuleValidator;
use crate::domain::tag_catalog::TagCatalog;
use crate::domain::version_manager::VersionManager;
use crate::ports::clock_port::Clock;
use crate::ports::event_port::EventSink;
use crate::ports::identity_port::IdentityPort;
use crate::ports::store_port::StrategyStore;
use std::sync::Arc;

pub struct Services {
    pub registry: Arc<IndicatorRegistry>,
    pub validator: Arc<RuleValidator>,
    pub access: Arc<AccessResolver>,
    pub versions: VersionManager,
    pub marketplace: Marketplace,
    pub tags: TagCatalog,
}

impl Services {
    /// Build every service over one store. The indicator cache starts
    /// empty; call `registry.refresh()` once the schema exists.
    pub fn wire<S>(
        store: Arc<S>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        max_depth: usize,
    ) -> Self
    where
        S: StrategyStore + IdentityPort + 'static,
    {
        let strategies: Arc<dyn StrategyStore> = store.clone();
        let identity: Arc<dyn IdentityPort> = store;

        let registry = Arc::new(IndicatorRegistry::new(strategies.clone(), clock.clone()));
        let validator = Arc::new(RuleValidator::new(registry.clone()).with_max_depth(max_depth));
        let access = Arc::new(AccessResolver::new(strategies.clone(), clock.clone()));
        let versions = VersionManager::new(
            strategies.clone(),
            validator.clone(),
            access.clone(),
            events.clone(),
            clock.clone(),
        );
        let tags = TagCatalog::new(strategies.clone(), access.clone());
        let marketplace = Marketplace::new(strategies, access.clone(), identity, events, clock);

        Self {
            registry,
            validator,
            access,
            versions,
            marketplace,
            tags,
        }
    }
}
