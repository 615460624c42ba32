//! Strategy structure validation.
//!
//! Grammar and semantic checks share one pre-order walk in `rule_parser`,
//! with indicator settings checked through the registry. Indicator existence
//! is not checked here.

use crate::domain::error::ValidationError;
use crate::domain::indicator_registry::IndicatorRegistry;
use crate::domain::rule_parser::{self, DEFAULT_MAX_DEPTH};
use crate::domain::structure::Structure;
use std::sync::Arc;

pub struct RuleValidator {
    registry: Arc<IndicatorRegistry>,
    max_depth: usize,
}

impl RuleValidator {
    pub fn new(registry: Arc<IndicatorRegistry>) -> Self {
        Self {
            registry,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Parse and validate submitted JSON in one step.
    pub fn validate_json(&self, raw: impl Into<String>) -> Result<Structure, ValidationError> {
        Structure::parse_validated(raw, self.max_depth, self.registry.as_ref())
    }

    /// Re-check an already parsed structure against the current rules.
    pub fn validate(&self, structure: &Structure) -> Result<(), ValidationError> {
        rule_parser::parse_validated(structure.as_json(), self.max_depth, self.registry.as_ref())
            .map(|_| ())
    }
}
