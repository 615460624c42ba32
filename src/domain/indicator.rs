//! Indicator definitions: typed parameter schemas managed by administrators.

use crate::domain::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    Number,
    Boolean,
    String,
    Enum,
}

impl ParameterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterType::Number => "number",
            ParameterType::Boolean => "boolean",
            ParameterType::String => "string",
            ParameterType::Enum => "enum",
        }
    }
}

impl FromStr for ParameterType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "number" => Ok(ParameterType::Number),
            "boolean" => Ok(ParameterType::Boolean),
            "string" => Ok(ParameterType::String),
            "enum" => Ok(ParameterType::Enum),
            other => Err(format!("invalid parameter type: {other}")),
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumValue {
    pub value: String,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<EnumValue>,
}

/// An indicator definition as submitted for creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewIndicator {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub formula: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Indicator {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub category: String,
    pub formula: String,
    pub active: bool,
    pub parameters: Vec<Parameter>,
    pub created_at: DateTime<Utc>,
}

/// Administrator edit of an indicator's header fields. `None` keeps the
/// current value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IndicatorUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub formula: Option<String>,
    pub active: Option<bool>,
}

impl IndicatorUpdate {
    pub fn apply(self, def: &mut NewIndicator) {
        if let Some(name) = self.name {
            def.name = name;
        }
        if let Some(description) = self.description {
            def.description = description;
        }
        if let Some(category) = self.category {
            def.category = category;
        }
        if let Some(formula) = self.formula {
            def.formula = formula;
        }
        if let Some(active) = self.active {
            def.active = active;
        }
    }
}

impl Indicator {
    /// The editable definition behind a stored indicator.
    pub fn definition(&self) -> NewIndicator {
        NewIndicator {
            name: self.name.clone(),
            description: self.description.clone(),
            category: self.category.clone(),
            formula: self.formula.clone(),
            active: self.active,
            parameters: self.parameters.clone(),
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

impl NewIndicator {
    pub fn parameter_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.parameters.iter_mut().find(|p| p.name == name)
    }

    /// Check the definition invariants. Name uniqueness is the store's job.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::new("name", "indicator name is required"));
        }
        if self.category.trim().is_empty() {
            return Err(ValidationError::new(
                "category",
                "indicator category is required",
            ));
        }

        let mut seen = HashSet::new();
        for (i, param) in self.parameters.iter().enumerate() {
            let path = format!("parameters[{i}]");
            if param.name.trim().is_empty() {
                return Err(ValidationError::new(path, "parameter name is required"));
            }
            if !seen.insert(param.name.as_str()) {
                return Err(ValidationError::new(
                    path,
                    format!("duplicate parameter name: {}", param.name),
                ));
            }
            param.validate().map_err(|e| e.at(path))?;
        }
        Ok(())
    }
}

impl Parameter {
    fn validate(&self) -> Result<(), ValidationError> {
        let has_bounds = self.min.is_some() || self.max.is_some();
        if has_bounds && self.param_type != ParameterType::Number {
            return Err(ValidationError::new(
                "",
                format!("bounds are only allowed on number parameters, not {}", self.param_type),
            ));
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(ValidationError::new(
                    "",
                    format!("min {min} is greater than max {max}"),
                ));
            }
        }

        match self.param_type {
            ParameterType::Enum if self.enum_values.is_empty() => {
                return Err(ValidationError::new(
                    "",
                    "enum parameter requires at least one enum value",
                ));
            }
            ParameterType::Enum => {
                let mut seen = HashSet::new();
                for ev in &self.enum_values {
                    if ev.value.is_empty() {
                        return Err(ValidationError::new("", "enum value cannot be empty"));
                    }
                    if !seen.insert(ev.value.as_str()) {
                        return Err(ValidationError::new(
                            "",
                            format!("duplicate enum value: {}", ev.value),
                        ));
                    }
                }
            }
            _ if !self.enum_values.is_empty() => {
                return Err(ValidationError::new(
                    "",
                    format!("{} parameter cannot carry enum values", self.param_type),
                ));
            }
            _ => {}
        }

        if let Some(default) = &self.default_value {
            self.check_default(default)?;
        }
        Ok(())
    }

    fn check_default(&self, default: &str) -> Result<(), ValidationError> {
        let conforms = match self.param_type {
            ParameterType::Number => default.parse::<f64>().is_ok_and(|v| {
                v.is_finite()
                    && self.min.is_none_or(|min| v >= min)
                    && self.max.is_none_or(|max| v <= max)
            }),
            ParameterType::Boolean => matches!(default, "true" | "false"),
            ParameterType::String => true,
            ParameterType::Enum => self.enum_values.iter().any(|ev| ev.value == default),
        };
        if conforms {
            Ok(())
        } else {
            Err(ValidationError::new(
                "",
                format!(
                    "default value '{default}' does not conform to {} parameter '{}'",
                    self.param_type, self.name
                ),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number_param(name: &str, min: Option<f64>, max: Option<f64>) -> Parameter {
        Parameter {
            name: name.into(),
            param_type: ParameterType::Number,
            required: true,
            min,
            max,
            default_value: None,
            description: String::new(),
            enum_values: Vec::new(),
        }
    }

    fn indicator(parameters: Vec<Parameter>) -> NewIndicator {
        NewIndicator {
            name: "ATR".into(),
            description: "Average True Range".into(),
            category: "volatility".into(),
            formula: String::new(),
            active: true,
            parameters,
        }
    }

    #[test]
    fn valid_definition_passes() {
        let mut p = number_param("period", Some(1.0), Some(100.0));
        p.default_value = Some("14".into());
        assert!(indicator(vec![p]).validate().is_ok());
    }

    #[test]
    fn name_and_category_required() {
        let mut def = indicator(vec![]);
        def.name = " ".into();
        assert_eq!(def.validate().unwrap_err().path, "name");

        let mut def = indicator(vec![]);
        def.category = String::new();
        assert_eq!(def.validate().unwrap_err().path, "category");
    }

    #[test]
    fn duplicate_parameter_names_rejected() {
        let def = indicator(vec![
            number_param("period", None, None),
            number_param("period", None, None),
        ]);
        let err = def.validate().unwrap_err();
        assert_eq!(err.path, "parameters[1]");
        assert_eq!(err.reason, "duplicate parameter name: period");
    }

    #[test]
    fn min_greater_than_max_rejected() {
        let err = indicator(vec![number_param("period", Some(10.0), Some(2.0))])
            .validate()
            .unwrap_err();
        assert_eq!(err.path, "parameters[0]");
        assert!(err.reason.contains("greater than max"));
    }

    #[test]
    fn bounds_on_non_number_rejected() {
        let mut p = number_param("flag", Some(0.0), None);
        p.param_type = ParameterType::Boolean;
        let err = indicator(vec![p]).validate().unwrap_err();
        assert!(err.reason.starts_with("bounds are only allowed"));
    }

    #[test]
    fn enum_requires_values_and_rejects_duplicates() {
        let mut p = number_param("type", None, None);
        p.param_type = ParameterType::Enum;
        let err = indicator(vec![p.clone()]).validate().unwrap_err();
        assert_eq!(err.reason, "enum parameter requires at least one enum value");

        p.enum_values = vec![
            EnumValue {
                value: "sma".into(),
                display_name: "Simple".into(),
            },
            EnumValue {
                value: "sma".into(),
                display_name: "Simple again".into(),
            },
        ];
        let err = indicator(vec![p]).validate().unwrap_err();
        assert_eq!(err.reason, "duplicate enum value: sma");
    }

    #[test]
    fn non_enum_with_enum_values_rejected() {
        let mut p = number_param("period", None, None);
        p.enum_values = vec![EnumValue {
            value: "x".into(),
            display_name: String::new(),
        }];
        assert!(indicator(vec![p]).validate().is_err());
    }

    #[test]
    fn default_must_conform() {
        let mut p = number_param("period", Some(2.0), Some(100.0));
        p.default_value = Some("150".into());
        assert!(indicator(vec![p.clone()]).validate().is_err());
        p.default_value = Some("abc".into());
        assert!(indicator(vec![p]).validate().is_err());

        let mut b = number_param("adjust", None, None);
        b.param_type = ParameterType::Boolean;
        b.default_value = Some("yes".into());
        assert!(indicator(vec![b.clone()]).validate().is_err());
        b.default_value = Some("false".into());
        assert!(indicator(vec![b]).validate().is_ok());
    }

    #[test]
    fn deserializes_with_defaults() {
        let def: NewIndicator = serde_json::from_str(
            r#"{"name":"ATR","category":"volatility","parameters":[{"name":"period","type":"number","required":true,"min":1}]}"#,
        )
        .unwrap();
        assert!(def.active);
        assert_eq!(def.parameters[0].param_type, ParameterType::Number);
        assert_eq!(def.parameters[0].min, Some(1.0));
        assert!(def.validate().is_ok());
    }

    #[test]
    fn update_keeps_unset_fields() {
        let mut def = indicator(vec![]);
        IndicatorUpdate {
            category: Some("trend".into()),
            active: Some(false),
            ..IndicatorUpdate::default()
        }
        .apply(&mut def);
        assert_eq!(def.name, "ATR");
        assert_eq!(def.category, "trend");
        assert!(!def.active);
    }

    #[test]
    fn parameter_type_parses() {
        assert_eq!("enum".parse::<ParameterType>().unwrap(), ParameterType::Enum);
        assert!("float".parse::<ParameterType>().is_err());
    }
}
