//! Strategy structure: the buy/sell rule trees plus the exact submitted text.
//!
//! The submitted JSON is kept verbatim. Clients diff versions textually, so
//! key order and whitespace must survive storage untouched; the typed trees
//! are only a parsed view of that text.

use crate::domain::error::ValidationError;
use crate::domain::rule::RuleNode;
use crate::domain::rule_parser::{self, SettingsPolicy};
use serde::{Serialize, Serializer};
use serde_json::value::RawValue;

#[derive(Debug, Clone, PartialEq)]
pub struct Structure {
    raw: String,
    buy_rules: Vec<RuleNode>,
    sell_rules: Vec<RuleNode>,
}

impl Structure {
    /// Parse submitted JSON, enforcing the rule grammar and nesting bound.
    pub fn parse(raw: impl Into<String>, max_depth: usize) -> Result<Self, ValidationError> {
        let raw = raw.into();
        let parsed = rule_parser::parse(&raw, max_depth)?;
        Ok(Self {
            raw,
            buy_rules: parsed.buy_rules,
            sell_rules: parsed.sell_rules,
        })
    }

    /// Parse and validate in one pre-order pass.
    pub fn parse_validated(
        raw: impl Into<String>,
        max_depth: usize,
        policy: &dyn SettingsPolicy,
    ) -> Result<Self, ValidationError> {
        let raw = raw.into();
        let parsed = rule_parser::parse_validated(&raw, max_depth, policy)?;
        Ok(Self {
            raw,
            buy_rules: parsed.buy_rules,
            sell_rules: parsed.sell_rules,
        })
    }

    /// The JSON text exactly as it was submitted.
    pub fn as_json(&self) -> &str {
        &self.raw
    }

    pub fn buy_rules(&self) -> &[RuleNode] {
        &self.buy_rules
    }

    pub fn sell_rules(&self) -> &[RuleNode] {
        &self.sell_rules
    }
}

/// Embeds the stored text as a raw JSON value. The interior bytes are
/// written as-is; only surrounding whitespace is dropped by the embedding.
impl Serialize for Structure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let raw = RawValue::from_string(self.raw.clone()).map_err(serde::ser::Error::custom)?;
        raw.serialize(serializer)
    }
}
