//! Indicator schema registry.
//!
//! Two sources of truth for indicator settings:
//! - built-in rules, pure functions keyed by indicator name
//! - stored definitions, whose `required` parameters must be present
//!
//! Built-in rules win when both exist. Names with neither are accepted.

use crate::domain::error::{StratvaultError, ValidationError};
use crate::domain::indicator::{
    EnumValue, Indicator, IndicatorUpdate, NewIndicator, Parameter, ParameterType,
};
use crate::domain::rule::Settings;
use crate::domain::rule_parser::SettingsPolicy;
use crate::ports::clock_port::Clock;
use crate::ports::store_port::StrategyStore;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// A settings check for one indicator.
pub type SettingsRule = fn(&Settings) -> Result<(), ValidationError>;

const SETTINGS_PATH: &str = "indicatorSettings";

const MOVING_AVERAGE_TYPES: [&str; 8] = ["sma", "ema", "wma", "dema", "tema", "trima", "kama", "mama"];

pub struct IndicatorRegistry {
    store: Arc<dyn StrategyStore>,
    clock: Arc<dyn Clock>,
    rules: HashMap<String, SettingsRule>,
    definitions: RwLock<HashMap<String, Indicator>>,
}

impl IndicatorRegistry {
    pub fn new(store: Arc<dyn StrategyStore>, clock: Arc<dyn Clock>) -> Self {
        let mut registry = Self {
            store,
            clock,
            rules: HashMap::new(),
            definitions: RwLock::new(HashMap::new()),
        };
        registry.register_rule("RSI", rsi_settings);
        registry.register_rule("Bollinger Bands", bollinger_settings);
        registry.register_rule("MACD", macd_settings);
        registry.register_rule("Moving Average", moving_average_settings);
        registry.register_rule("Stochastic", stochastic_settings);
        registry
    }

    pub fn register_rule(&mut self, indicator_name: impl Into<String>, rule: SettingsRule) {
        self.rules.insert(indicator_name.into(), rule);
    }

    /// Reload the definition cache from the store.
    pub fn refresh(&self) -> Result<usize, StratvaultError> {
        let indicators = self.store.list_indicators()?;
        let count = indicators.len();
        let mut defs = self
            .definitions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        defs.clear();
        for ind in indicators {
            defs.insert(ind.name.clone(), ind);
        }
        tracing::debug!(count, "indicator definitions loaded");
        Ok(count)
    }

    pub fn validate_settings(
        &self,
        indicator_name: &str,
        settings: &Settings,
    ) -> Result<(), ValidationError> {
        if let Some(rule) = self.rules.get(indicator_name) {
            return rule(settings);
        }

        let defs = self
            .definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match defs.get(indicator_name) {
            Some(def) => check_required(def, settings),
            None => Ok(()),
        }
    }

    pub fn get_indicator(&self, id: i64) -> Result<Indicator, StratvaultError> {
        self.store
            .get_indicator(id)?
            .ok_or_else(|| StratvaultError::not_found("indicator", id))
    }

    pub fn get_indicator_by_name(&self, name: &str) -> Result<Indicator, StratvaultError> {
        {
            let defs = self
                .definitions
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(def) = defs.get(name) {
                return Ok(def.clone());
            }
        }
        self.store
            .list_indicators()?
            .into_iter()
            .find(|ind| ind.name == name)
            .ok_or_else(|| StratvaultError::not_found("indicator", name))
    }

    pub fn list_indicators(
        &self,
        category: Option<&str>,
        active_only: bool,
    ) -> Result<Vec<Indicator>, StratvaultError> {
        Ok(self
            .store
            .list_indicators()?
            .into_iter()
            .filter(|ind| category.is_none_or(|c| ind.category == c))
            .filter(|ind| !active_only || ind.active)
            .collect())
    }

    pub fn create_indicator(&self, def: NewIndicator) -> Result<Indicator, StratvaultError> {
        def.validate()?;
        let created = self.store.insert_indicator(&def, self.clock.now())?;
        tracing::info!(id = created.id, name = %created.name, "indicator created");
        self.definitions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(created.name.clone(), created.clone());
        Ok(created)
    }

    pub fn update_indicator(
        &self,
        id: i64,
        update: IndicatorUpdate,
    ) -> Result<Indicator, StratvaultError> {
        self.modify(id, |def| {
            update.apply(def);
            Ok(())
        })
    }

    pub fn delete_indicator(&self, id: i64) -> Result<(), StratvaultError> {
        let existing = self.get_indicator(id)?;
        self.store.delete_indicator(id)?;
        self.definitions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&existing.name);
        tracing::info!(id, name = %existing.name, "indicator deleted");
        Ok(())
    }

    pub fn add_parameter(
        &self,
        indicator_id: i64,
        param: Parameter,
    ) -> Result<Indicator, StratvaultError> {
        self.modify(indicator_id, |def| {
            if def.parameter_mut(&param.name).is_some() {
                return Err(StratvaultError::duplicate(format!(
                    "parameter {} already exists on {}",
                    param.name, def.name
                )));
            }
            def.parameters.push(param);
            Ok(())
        })
    }

    /// Replace a parameter's schema in place. Enum values are edited through
    /// their own operations and carry over unchanged.
    pub fn update_parameter(
        &self,
        indicator_id: i64,
        name: &str,
        mut param: Parameter,
    ) -> Result<Indicator, StratvaultError> {
        self.modify(indicator_id, |def| {
            if param.name != name && def.parameters.iter().any(|p| p.name == param.name) {
                return Err(StratvaultError::duplicate(format!(
                    "parameter {} already exists on {}",
                    param.name, def.name
                )));
            }
            let slot = def
                .parameter_mut(name)
                .ok_or_else(|| StratvaultError::not_found("parameter", name))?;
            param.enum_values = std::mem::take(&mut slot.enum_values);
            *slot = param;
            Ok(())
        })
    }

    pub fn delete_parameter(&self, indicator_id: i64, name: &str) -> Result<Indicator, StratvaultError> {
        self.modify(indicator_id, |def| {
            let before = def.parameters.len();
            def.parameters.retain(|p| p.name != name);
            if def.parameters.len() == before {
                return Err(StratvaultError::not_found("parameter", name));
            }
            Ok(())
        })
    }

    pub fn add_enum_value(
        &self,
        indicator_id: i64,
        param_name: &str,
        value: EnumValue,
    ) -> Result<Indicator, StratvaultError> {
        self.modify(indicator_id, |def| {
            let param = def
                .parameter_mut(param_name)
                .ok_or_else(|| StratvaultError::not_found("parameter", param_name))?;
            if param.enum_values.iter().any(|ev| ev.value == value.value) {
                return Err(StratvaultError::duplicate(format!(
                    "enum value {} already exists on {param_name}",
                    value.value
                )));
            }
            param.enum_values.push(value);
            Ok(())
        })
    }

    pub fn update_enum_value(
        &self,
        indicator_id: i64,
        param_name: &str,
        value: &str,
        replacement: EnumValue,
    ) -> Result<Indicator, StratvaultError> {
        self.modify(indicator_id, |def| {
            let param = def
                .parameter_mut(param_name)
                .ok_or_else(|| StratvaultError::not_found("parameter", param_name))?;
            if replacement.value != value
                && param.enum_values.iter().any(|ev| ev.value == replacement.value)
            {
                return Err(StratvaultError::duplicate(format!(
                    "enum value {} already exists on {param_name}",
                    replacement.value
                )));
            }
            let slot = param
                .enum_values
                .iter_mut()
                .find(|ev| ev.value == value)
                .ok_or_else(|| StratvaultError::not_found("enum value", format!("{param_name}.{value}")))?;
            *slot = replacement;
            Ok(())
        })
    }

    pub fn delete_enum_value(
        &self,
        indicator_id: i64,
        param_name: &str,
        value: &str,
    ) -> Result<Indicator, StratvaultError> {
        self.modify(indicator_id, |def| {
            let param = def
                .parameter_mut(param_name)
                .ok_or_else(|| StratvaultError::not_found("parameter", param_name))?;
            let before = param.enum_values.len();
            param.enum_values.retain(|ev| ev.value != value);
            if param.enum_values.len() == before {
                return Err(StratvaultError::not_found(
                    "enum value",
                    format!("{param_name}.{value}"),
                ));
            }
            Ok(())
        })
    }

    /// Load a definition, edit it, re-check its invariants and store it,
    /// keeping the name-keyed cache in step.
    fn modify(
        &self,
        id: i64,
        edit: impl FnOnce(&mut NewIndicator) -> Result<(), StratvaultError>,
    ) -> Result<Indicator, StratvaultError> {
        let existing = self.get_indicator(id)?;
        let mut def = existing.definition();
        edit(&mut def)?;
        def.validate()?;
        let updated = self.store.update_indicator(id, &def)?;

        let mut defs = self
            .definitions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        defs.remove(&existing.name);
        defs.insert(updated.name.clone(), updated.clone());
        tracing::info!(id, name = %updated.name, "indicator updated");
        Ok(updated)
    }
}

impl SettingsPolicy for IndicatorRegistry {
    fn check_settings(&self, indicator_name: &str, settings: &Settings) -> Result<(), ValidationError> {
        self.validate_settings(indicator_name, settings)
    }
}

fn check_required(def: &Indicator, settings: &Settings) -> Result<(), ValidationError> {
    for param in def.parameters.iter().filter(|p| p.required) {
        if !settings.contains_key(&param.name) {
            return Err(ValidationError::new(
                SETTINGS_PATH,
                format!("{} requires '{}' parameter", def.name, param.name),
            ));
        }
    }
    Ok(())
}

fn require<'a>(settings: &'a Settings, indicator: &str, key: &str) -> Result<&'a Value, ValidationError> {
    settings.get(key).ok_or_else(|| {
        ValidationError::new(
            SETTINGS_PATH,
            format!("{indicator} requires '{key}' parameter"),
        )
    })
}

fn number_between(
    value: &Value,
    indicator: &str,
    key: &str,
    min: f64,
    max: f64,
) -> Result<f64, ValidationError> {
    let n = value.as_f64().ok_or_else(|| {
        ValidationError::new(SETTINGS_PATH, format!("{indicator} {key} must be a number"))
    })?;
    if n < min || n > max {
        return Err(ValidationError::new(
            SETTINGS_PATH,
            format!("{indicator} {key} must be between {min} and {max}"),
        ));
    }
    Ok(n)
}

fn rsi_settings(settings: &Settings) -> Result<(), ValidationError> {
    let period = require(settings, "RSI", "period")?;
    number_between(period, "RSI", "period", 2.0, 100.0)?;
    Ok(())
}

fn bollinger_settings(settings: &Settings) -> Result<(), ValidationError> {
    const NAME: &str = "Bollinger Bands";
    let period = require(settings, NAME, "period")?;
    let deviations = require(settings, NAME, "deviations")?;
    number_between(period, NAME, "period", 2.0, 100.0)?;
    number_between(deviations, NAME, "deviations", 0.1, 5.0)?;
    Ok(())
}

fn macd_settings(settings: &Settings) -> Result<(), ValidationError> {
    let fast = require(settings, "MACD", "fastPeriod")?;
    let slow = require(settings, "MACD", "slowPeriod")?;
    let signal = require(settings, "MACD", "signalPeriod")?;

    let fast = number_between(fast, "MACD", "fastPeriod", 2.0, 100.0)?;
    let slow = number_between(slow, "MACD", "slowPeriod", 2.0, 100.0)?;
    if slow <= fast {
        return Err(ValidationError::new(
            SETTINGS_PATH,
            "MACD slowPeriod must be greater than fastPeriod",
        ));
    }
    number_between(signal, "MACD", "signalPeriod", 2.0, 100.0)?;
    Ok(())
}

fn moving_average_settings(settings: &Settings) -> Result<(), ValidationError> {
    const NAME: &str = "Moving Average";
    let period = require(settings, NAME, "period")?;
    number_between(period, NAME, "period", 2.0, 200.0)?;

    if let Some(ma_type) = settings.get("type") {
        let ma_type = ma_type.as_str().ok_or_else(|| {
            ValidationError::new(SETTINGS_PATH, "Moving Average type must be a string")
        })?;
        if !MOVING_AVERAGE_TYPES.contains(&ma_type) {
            return Err(ValidationError::new(
                SETTINGS_PATH,
                format!("invalid Moving Average type: {ma_type}"),
            ));
        }
    }
    Ok(())
}

fn stochastic_settings(settings: &Settings) -> Result<(), ValidationError> {
    const NAME: &str = "Stochastic";
    let k = require(settings, NAME, "kPeriod")?;
    let d = require(settings, NAME, "dPeriod")?;
    let slowing = require(settings, NAME, "slowing")?;
    number_between(k, NAME, "kPeriod", 1.0, 100.0)?;
    number_between(d, NAME, "dPeriod", 1.0, 100.0)?;
    number_between(slowing, NAME, "slowing", 1.0, 100.0)?;
    Ok(())
}

fn number(name: &str, min: f64, max: f64, default: &str, description: &str) -> Parameter {
    Parameter {
        name: name.into(),
        param_type: ParameterType::Number,
        required: true,
        min: Some(min),
        max: Some(max),
        default_value: Some(default.into()),
        description: description.into(),
        enum_values: Vec::new(),
    }
}

/// Seed definitions matching the built-in settings rules.
pub fn builtin_definitions() -> Vec<NewIndicator> {
    let ma_type = Parameter {
        name: "type".into(),
        param_type: ParameterType::Enum,
        required: false,
        min: None,
        max: None,
        default_value: Some("sma".into()),
        description: "Averaging method".into(),
        enum_values: MOVING_AVERAGE_TYPES
            .iter()
            .map(|v| EnumValue {
                value: (*v).into(),
                display_name: v.to_uppercase(),
            })
            .collect(),
    };

    vec![
        NewIndicator {
            name: "RSI".into(),
            description: "Relative Strength Index".into(),
            category: "momentum".into(),
            formula: "100 - 100 / (1 + avg_gain / avg_loss)".into(),
            active: true,
            parameters: vec![number("period", 2.0, 100.0, "14", "Lookback period")],
        },
        NewIndicator {
            name: "Bollinger Bands".into(),
            description: "Moving average with standard deviation bands".into(),
            category: "volatility".into(),
            formula: "sma(period) +/- deviations * stddev(period)".into(),
            active: true,
            parameters: vec![
                number("period", 2.0, 100.0, "20", "Lookback period"),
                number("deviations", 0.1, 5.0, "2", "Band width in standard deviations"),
            ],
        },
        NewIndicator {
            name: "MACD".into(),
            description: "Moving Average Convergence Divergence".into(),
            category: "trend".into(),
            formula: "ema(fast) - ema(slow), signal = ema(macd, signal)".into(),
            active: true,
            parameters: vec![
                number("fastPeriod", 2.0, 100.0, "12", "Fast EMA period"),
                number("slowPeriod", 2.0, 100.0, "26", "Slow EMA period"),
                number("signalPeriod", 2.0, 100.0, "9", "Signal line period"),
            ],
        },
        NewIndicator {
            name: "Moving Average".into(),
            description: "Moving average of closing prices".into(),
            category: "trend".into(),
            formula: "average(close, period)".into(),
            active: true,
            parameters: vec![number("period", 2.0, 200.0, "20", "Lookback period"), ma_type],
        },
        NewIndicator {
            name: "Stochastic".into(),
            description: "Stochastic oscillator".into(),
            category: "momentum".into(),
            formula: "%K = (close - lowest) / (highest - lowest) * 100".into(),
            active: true,
            parameters: vec![
                number("kPeriod", 1.0, 100.0, "14", "%K period"),
                number("dPeriod", 1.0, 100.0, "3", "%D period"),
                number("slowing", 1.0, 100.0, "3", "%K slowing"),
            ],
        },
    ]
}
