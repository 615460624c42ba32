//! Rule tree parser.
//!
//! Converts the submitted strategy JSON into typed [`RuleNode`] trees.
//! [`parse`] only enforces the grammar: node tags, object/array shapes, known
//! comparison symbols and the nesting bound. It reads stored structures back.
//!
//! [`parse_validated`] runs the semantic checks (empty lists and groups,
//! required indicator fields, numeric values, indicator settings) on each
//! node as it is built. Empty rule lists are rejected before any node is
//! read; after that the walk is pre-order and the first failure wins.
//!
//! Errors carry the path of the offending node, e.g. `buyRules[2].rules[0]`.

use crate::domain::error::ValidationError;
use crate::domain::rule::{
    Combinator, ComparisonOperator, Condition, Group, IndicatorRef, Leaf, RuleNode, Settings,
};
use serde_json::{Map, Value};

/// Default bound on group nesting for untrusted input.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Hard ceiling for the configurable bound. Each node level costs two JSON
/// levels and serde_json stops at 128.
pub const MAX_SUPPORTED_DEPTH: usize = 48;

const NO_RULES: &[Value] = &[];

/// Settings check applied to each leaf during a validating parse.
pub trait SettingsPolicy {
    fn check_settings(&self, indicator_name: &str, settings: &Settings)
        -> Result<(), ValidationError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRules {
    pub buy_rules: Vec<RuleNode>,
    pub sell_rules: Vec<RuleNode>,
}

struct Parser<'a> {
    max_depth: usize,
    policy: Option<&'a dyn SettingsPolicy>,
}

/// Grammar-only parse.
pub fn parse(raw: &str, max_depth: usize) -> Result<ParsedRules, ValidationError> {
    Parser {
        max_depth,
        policy: None,
    }
    .parse_document(raw)
}

/// Grammar and semantic checks in a single pass.
pub fn parse_validated(
    raw: &str,
    max_depth: usize,
    policy: &dyn SettingsPolicy,
) -> Result<ParsedRules, ValidationError> {
    Parser {
        max_depth,
        policy: Some(policy),
    }
    .parse_document(raw)
}

impl Parser<'_> {
    fn validating(&self) -> bool {
        self.policy.is_some()
    }

    fn parse_document(&self, raw: &str) -> Result<ParsedRules, ValidationError> {
        let root: Value = serde_json::from_str(raw)
            .map_err(|e| ValidationError::new("structure", format!("invalid JSON: {e}")))?;
        let obj = root
            .as_object()
            .ok_or_else(|| ValidationError::new("structure", "structure must be a JSON object"))?;

        let buy = rule_list(obj, "buyRules")?;
        let sell = rule_list(obj, "sellRules")?;
        if self.validating() {
            if buy.is_empty() {
                return Err(ValidationError::new("buyRules", "buy rules cannot be empty"));
            }
            if sell.is_empty() {
                return Err(ValidationError::new("sellRules", "sell rules cannot be empty"));
            }
        }

        Ok(ParsedRules {
            buy_rules: self.parse_nodes(buy, "buyRules", 1)?,
            sell_rules: self.parse_nodes(sell, "sellRules", 1)?,
        })
    }

    fn parse_nodes(
        &self,
        items: &[Value],
        prefix: &str,
        depth: usize,
    ) -> Result<Vec<RuleNode>, ValidationError> {
        items
            .iter()
            .enumerate()
            .map(|(i, item)| self.parse_node(item, &format!("{prefix}[{i}]"), depth))
            .collect()
    }

    fn parse_node(&self, value: &Value, path: &str, depth: usize) -> Result<RuleNode, ValidationError> {
        if depth > self.max_depth {
            return Err(ValidationError::new(
                path,
                format!("rule nesting exceeds maximum depth of {}", self.max_depth),
            ));
        }

        let obj = value
            .as_object()
            .ok_or_else(|| ValidationError::new(path, "rule must be an object"))?;

        let node_type = string_field(obj, "type", path)?;
        if node_type != "rule" && node_type != "group" {
            return Err(ValidationError::new(
                path,
                format!("invalid rule type: {node_type}"),
            ));
        }

        let combinator: Combinator = string_field(obj, "operator", path)?
            .parse()
            .map_err(|e: String| ValidationError::new(path, e))?;

        if node_type == "rule" {
            self.parse_leaf(obj, path, combinator).map(RuleNode::Leaf)
        } else {
            self.parse_group(obj, path, combinator, depth)
                .map(RuleNode::Group)
        }
    }

    fn parse_leaf(
        &self,
        obj: &Map<String, Value>,
        path: &str,
        combinator: Combinator,
    ) -> Result<Leaf, ValidationError> {
        match obj.get("rules") {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) if items.is_empty() => {}
            Some(_) => {
                return Err(ValidationError::new(
                    path,
                    "rule of type 'rule' cannot contain nested rules",
                ));
            }
        }

        let indicator = match obj.get("indicator") {
            None | Some(Value::Null) => {
                return Err(ValidationError::new(
                    path,
                    "indicator is required for rule type",
                ));
            }
            Some(Value::Object(ind)) => IndicatorRef {
                id: self.required_string(ind, "id", path, "indicator ID is required")?,
                name: self.required_string(ind, "name", path, "indicator name is required")?,
            },
            Some(_) => return Err(ValidationError::new(path, "indicator must be an object")),
        };

        let condition = match obj.get("condition") {
            None | Some(Value::Null) => {
                return Err(ValidationError::new(
                    path,
                    "condition is required for rule type",
                ));
            }
            Some(Value::Object(cond)) => {
                let symbol = string_field(cond, "symbol", path)?;
                if symbol.is_empty() {
                    return Err(ValidationError::new(path, "comparison symbol is required"));
                }
                let operator: ComparisonOperator = symbol
                    .parse()
                    .map_err(|e: String| ValidationError::new(path, e))?;
                Condition {
                    id: string_field(cond, "id", path)?,
                    name: string_field(cond, "name", path)?,
                    operator,
                }
            }
            Some(_) => return Err(ValidationError::new(path, "condition must be an object")),
        };

        let value = self.required_string(obj, "value", path, "comparison value is required")?;
        if self.validating() && condition.operator.requires_numeric_value() && !is_numeric(&value)
        {
            return Err(ValidationError::new(
                path,
                format!("invalid numeric value: {value}"),
            ));
        }

        let settings = match obj.get("indicatorSettings") {
            None | Some(Value::Null) => Settings::new(),
            Some(Value::Object(settings)) => settings.clone(),
            Some(_) => {
                return Err(ValidationError::new(
                    path,
                    "indicatorSettings must be an object",
                ));
            }
        };
        if let Some(policy) = self.policy {
            policy
                .check_settings(&indicator.name, &settings)
                .map_err(|e| e.at(path))?;
        }

        Ok(Leaf {
            combinator,
            indicator,
            condition,
            value,
            settings,
        })
    }

    fn parse_group(
        &self,
        obj: &Map<String, Value>,
        path: &str,
        combinator: Combinator,
        depth: usize,
    ) -> Result<Group, ValidationError> {
        let carries_leaf_fields = ["indicator", "condition"]
            .iter()
            .any(|key| !matches!(obj.get(*key), None | Some(Value::Null)));
        if carries_leaf_fields {
            return Err(ValidationError::new(
                path,
                "rule group cannot carry an indicator or condition",
            ));
        }

        let items = match obj.get("rules") {
            None | Some(Value::Null) => NO_RULES,
            Some(Value::Array(items)) => items.as_slice(),
            Some(_) => return Err(ValidationError::new(path, "rules must be an array")),
        };
        if self.validating() && items.is_empty() {
            return Err(ValidationError::new(path, "rule group cannot be empty"));
        }

        Ok(Group {
            combinator,
            children: self.parse_nodes(items, &format!("{path}.rules"), depth + 1)?,
        })
    }

    /// A string field that must be non-empty when validating.
    fn required_string(
        &self,
        obj: &Map<String, Value>,
        key: &str,
        path: &str,
        message: &str,
    ) -> Result<String, ValidationError> {
        let value = string_field(obj, key, path)?;
        if self.validating() && value.is_empty() {
            return Err(ValidationError::new(path, message));
        }
        Ok(value)
    }
}

fn rule_list<'v>(obj: &'v Map<String, Value>, field: &str) -> Result<&'v [Value], ValidationError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(NO_RULES),
        Some(Value::Array(items)) => Ok(items.as_slice()),
        Some(_) => Err(ValidationError::new(
            field,
            format!("{field} must be an array"),
        )),
    }
}

/// Missing or null string fields read as empty.
fn string_field(obj: &Map<String, Value>, key: &str, path: &str) -> Result<String, ValidationError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ValidationError::new(path, format!("'{key}' must be a string"))),
    }
}

fn is_numeric(value: &str) -> bool {
    value.parse::<f64>().is_ok_and(f64::is_finite)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEAF: &str = r#"{"type":"rule","operator":"AND","indicator":{"id":"1","name":"RSI"},"condition":{"id":"lt","name":"Less Than","symbol":"<"},"value":"30","indicatorSettings":{"period":14}}"#;

    fn structure(buy: &str, sell: &str) -> String {
        format!(r#"{{"buyRules":[{buy}],"sellRules":[{sell}]}}"#)
    }

    fn parse_default(raw: &str) -> Result<ParsedRules, ValidationError> {
        parse(raw, DEFAULT_MAX_DEPTH)
    }

    struct AcceptAll;

    impl SettingsPolicy for AcceptAll {
        fn check_settings(&self, _: &str, _: &Settings) -> Result<(), ValidationError> {
            Ok(())
        }
    }

    struct RejectAll;

    impl SettingsPolicy for RejectAll {
        fn check_settings(&self, name: &str, _: &Settings) -> Result<(), ValidationError> {
            Err(ValidationError::new("indicatorSettings", format!("{name} rejected")))
        }
    }

    fn parse_checked(raw: &str) -> Result<ParsedRules, ValidationError> {
        parse_validated(raw, DEFAULT_MAX_DEPTH, &AcceptAll)
    }

    #[test]
    fn parse_single_leaf() {
        let parsed = parse_default(&structure(LEAF, LEAF)).unwrap();
        assert_eq!(parsed.buy_rules.len(), 1);
        match &parsed.buy_rules[0] {
            RuleNode::Leaf(leaf) => {
                assert_eq!(leaf.indicator.name, "RSI");
                assert_eq!(leaf.condition.operator, ComparisonOperator::LessThan);
                assert_eq!(leaf.value, "30");
                assert_eq!(leaf.settings["period"], serde_json::json!(14));
            }
            other => panic!("expected leaf, got {other:?}"),
        }
    }

    #[test]
    fn parse_nested_group() {
        let group = format!(r#"{{"type":"group","operator":"OR","rules":[{LEAF},{LEAF}]}}"#);
        let parsed = parse_default(&structure(&group, LEAF)).unwrap();
        match &parsed.buy_rules[0] {
            RuleNode::Group(g) => {
                assert_eq!(g.combinator, Combinator::Or);
                assert_eq!(g.children.len(), 2);
            }
            other => panic!("expected group, got {other:?}"),
        }
    }

    #[test]
    fn missing_rule_lists_parse_as_empty() {
        let parsed = parse_default("{}").unwrap();
        assert!(parsed.buy_rules.is_empty());
        assert!(parsed.sell_rules.is_empty());
    }

    #[test]
    fn error_invalid_json() {
        let err = parse_default("{\"buyRules\": [").unwrap_err();
        assert_eq!(err.path, "structure");
        assert!(err.reason.starts_with("invalid JSON"));
    }

    #[test]
    fn error_structure_not_object() {
        let err = parse_default("[]").unwrap_err();
        assert_eq!(err.path, "structure");
    }

    #[test]
    fn error_rule_list_not_array() {
        let err = parse_default(r#"{"buyRules":{},"sellRules":[]}"#).unwrap_err();
        assert_eq!(err.path, "buyRules");
        assert_eq!(err.reason, "buyRules must be an array");
    }

    #[test]
    fn error_unknown_type() {
        let node = r#"{"type":"leaf","operator":"AND"}"#;
        let err = parse_default(&structure(node, LEAF)).unwrap_err();
        assert_eq!(err.path, "buyRules[0]");
        assert_eq!(err.reason, "invalid rule type: leaf");
    }

    #[test]
    fn error_missing_operator() {
        let node = r#"{"type":"group","rules":[]}"#;
        let err = parse_default(&structure(LEAF, node)).unwrap_err();
        assert_eq!(err.path, "sellRules[0]");
        assert_eq!(err.reason, "invalid operator: ");
    }

    #[test]
    fn error_missing_indicator() {
        let node = r#"{"type":"rule","operator":"AND","condition":{"symbol":">"},"value":"1"}"#;
        let err = parse_default(&structure(node, LEAF)).unwrap_err();
        assert_eq!(err.reason, "indicator is required for rule type");
    }

    #[test]
    fn error_missing_condition() {
        let node = r#"{"type":"rule","operator":"AND","indicator":{"id":"1","name":"RSI"},"value":"1"}"#;
        let err = parse_default(&structure(node, LEAF)).unwrap_err();
        assert_eq!(err.reason, "condition is required for rule type");
    }

    #[test]
    fn error_empty_symbol() {
        let node = r#"{"type":"rule","operator":"AND","indicator":{"id":"1","name":"RSI"},"condition":{"symbol":""},"value":"1"}"#;
        let err = parse_default(&structure(node, LEAF)).unwrap_err();
        assert_eq!(err.reason, "comparison symbol is required");
    }

    #[test]
    fn error_unknown_symbol() {
        let node = r#"{"type":"rule","operator":"AND","indicator":{"id":"1","name":"RSI"},"condition":{"symbol":"~"},"value":"1"}"#;
        let err = parse_default(&structure(node, LEAF)).unwrap_err();
        assert_eq!(err.reason, "invalid comparison symbol: ~");
    }

    #[test]
    fn error_leaf_with_children() {
        let node = format!(
            r#"{{"type":"rule","operator":"AND","indicator":{{"id":"1","name":"RSI"}},"condition":{{"symbol":">"}},"value":"1","rules":[{LEAF}]}}"#
        );
        let err = parse_default(&structure(&node, LEAF)).unwrap_err();
        assert_eq!(err.reason, "rule of type 'rule' cannot contain nested rules");
    }

    #[test]
    fn error_group_with_condition() {
        let node = format!(
            r#"{{"type":"group","operator":"AND","condition":{{"symbol":">"}},"rules":[{LEAF}]}}"#
        );
        let err = parse_default(&structure(&node, LEAF)).unwrap_err();
        assert_eq!(err.reason, "rule group cannot carry an indicator or condition");
    }

    #[test]
    fn error_nested_path() {
        let bad = r#"{"type":"rule","operator":"XOR"}"#;
        let group = format!(r#"{{"type":"group","operator":"AND","rules":[{LEAF},{bad}]}}"#);
        let raw = format!(r#"{{"buyRules":[{LEAF},{LEAF},{group}],"sellRules":[{LEAF}]}}"#);
        let err = parse_default(&raw).unwrap_err();
        assert_eq!(err.path, "buyRules[2].rules[1]");
        assert_eq!(err.reason, "invalid operator: XOR");
    }

    #[test]
    fn error_value_not_string() {
        let node = r#"{"type":"rule","operator":"AND","indicator":{"id":"1","name":"RSI"},"condition":{"symbol":">"},"value":30}"#;
        let err = parse_default(&structure(node, LEAF)).unwrap_err();
        assert_eq!(err.reason, "'value' must be a string");
    }

    #[test]
    fn error_settings_not_object() {
        let node = r#"{"type":"rule","operator":"AND","indicator":{"id":"1","name":"RSI"},"condition":{"symbol":">"},"value":"3","indicatorSettings":[14]}"#;
        let err = parse_default(&structure(node, LEAF)).unwrap_err();
        assert_eq!(err.reason, "indicatorSettings must be an object");
    }

    #[test]
    fn depth_limit_enforced() {
        let mut node = LEAF.to_string();
        for _ in 0..3 {
            node = format!(r#"{{"type":"group","operator":"AND","rules":[{node}]}}"#);
        }
        // Three groups around a leaf: depth 4.
        assert!(parse(&structure(&node, LEAF), 4).is_ok());
        let err = parse(&structure(&node, LEAF), 3).unwrap_err();
        assert_eq!(err.path, "buyRules[0].rules[0].rules[0].rules[0]");
        assert_eq!(err.reason, "rule nesting exceeds maximum depth of 3");
    }

    #[test]
    fn grammar_only_parse_accepts_semantic_gaps() {
        let empty_group = r#"{"type":"group","operator":"AND","rules":[]}"#;
        let no_id = LEAF.replace(r#""id":"1""#, r#""id":"""#);
        let raw = format!(r#"{{"buyRules":[{empty_group}],"sellRules":[{no_id}]}}"#);
        assert!(parse_default(&raw).is_ok());
        assert!(parse_default(r#"{"buyRules":[],"sellRules":[]}"#).is_ok());
    }

    #[test]
    fn validated_parse_checks_empty_lists_before_nodes() {
        let bad_symbol = LEAF.replace(r#""symbol":"<""#, r#""symbol":"~""#);
        let raw = format!(r#"{{"buyRules":[],"sellRules":[{bad_symbol}]}}"#);
        let err = parse_checked(&raw).unwrap_err();
        assert_eq!(err.path, "buyRules");
        assert_eq!(err.reason, "buy rules cannot be empty");

        // List shape is still checked first.
        let err = parse_checked(r#"{"buyRules":[],"sellRules":7}"#).unwrap_err();
        assert_eq!(err.path, "sellRules");
    }

    #[test]
    fn validated_parse_stops_at_first_node_in_preorder() {
        let empty_group = r#"{"type":"group","operator":"OR","rules":[]}"#;
        let bad_type = r#"{"type":"leaf","operator":"AND"}"#;
        let raw = format!(
            r#"{{"buyRules":[{empty_group}],"sellRules":[{LEAF},{bad_type}]}}"#
        );
        let err = parse_checked(&raw).unwrap_err();
        assert_eq!(err.path, "buyRules[0]");
        assert_eq!(err.reason, "rule group cannot be empty");
        // Grammar-only parse reaches the later fault.
        assert_eq!(parse_default(&raw).unwrap_err().path, "sellRules[1]");
    }

    #[test]
    fn validated_leaf_checks_run_in_field_order() {
        let leaf = LEAF
            .replace(r#""id":"1""#, r#""id":"""#)
            .replace(r#""symbol":"<""#, r#""symbol":"~""#);
        let err = parse_checked(&structure(&leaf, LEAF)).unwrap_err();
        assert_eq!(err.reason, "indicator ID is required");

        let leaf = LEAF
            .replace(r#""value":"30""#, r#""value":"low""#)
            .replace(r#""period":14"#, r#""period":"x""#);
        let err = parse_checked(&structure(&leaf, LEAF)).unwrap_err();
        assert_eq!(err.reason, "invalid numeric value: low");
    }

    #[test]
    fn settings_policy_error_anchored_to_leaf() {
        let group = format!(r#"{{"type":"group","operator":"AND","rules":[{LEAF}]}}"#);
        let err = parse_validated(&structure(&group, LEAF), DEFAULT_MAX_DEPTH, &RejectAll)
            .unwrap_err();
        assert_eq!(err.path, "buyRules[0].rules[0]");
        assert_eq!(err.reason, "RSI rejected");
    }
}
