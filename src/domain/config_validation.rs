//! Configuration validation.
//!
//! Checks every config section before services are built, so a bad value
//! fails at startup with the section and key named.

use crate::domain::error::StratvaultError;
use crate::domain::rule_parser::{DEFAULT_MAX_DEPTH, MAX_SUPPORTED_DEPTH};
use crate::ports::config_port::ConfigPort;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 2] = ["pretty", "json"];

pub fn validate_config(config: &dyn ConfigPort) -> Result<(), StratvaultError> {
    validate_sqlite_config(config)?;
    validate_logging_config(config)?;
    validate_rule_config(config)?;
    Ok(())
}

pub fn validate_sqlite_config(config: &dyn ConfigPort) -> Result<(), StratvaultError> {
    match config.get_string("sqlite", "path") {
        Some(s) if !s.trim().is_empty() => {}
        _ => {
            return Err(StratvaultError::ConfigMissing {
                section: "sqlite".to_string(),
                key: "path".to_string(),
            });
        }
    }
    validate_min_int(config, "sqlite", "pool_size", 4, 1)?;
    validate_min_int(config, "sqlite", "connection_timeout_ms", 5000, 1)?;
    validate_min_int(config, "sqlite", "busy_timeout_ms", 5000, 0)?;
    Ok(())
}

pub fn validate_logging_config(config: &dyn ConfigPort) -> Result<(), StratvaultError> {
    if let Some(level) = config.get_string("logging", "level") {
        if !LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
            return Err(StratvaultError::ConfigInvalid {
                section: "logging".to_string(),
                key: "level".to_string(),
                reason: format!("level must be one of {}", LOG_LEVELS.join(", ")),
            });
        }
    }
    if let Some(format) = config.get_string("logging", "format") {
        if !LOG_FORMATS.contains(&format.to_lowercase().as_str()) {
            return Err(StratvaultError::ConfigInvalid {
                section: "logging".to_string(),
                key: "format".to_string(),
                reason: "format must be pretty or json".to_string(),
            });
        }
    }
    Ok(())
}

pub fn validate_rule_config(config: &dyn ConfigPort) -> Result<(), StratvaultError> {
    let depth = config.get_int("validation", "max_rule_depth", DEFAULT_MAX_DEPTH as i64);
    if depth < 1 || depth > MAX_SUPPORTED_DEPTH as i64 {
        return Err(StratvaultError::ConfigInvalid {
            section: "validation".to_string(),
            key: "max_rule_depth".to_string(),
            reason: format!("max_rule_depth must be between 1 and {MAX_SUPPORTED_DEPTH}"),
        });
    }
    Ok(())
}

/// Configured rule nesting bound; call after `validate_rule_config`.
pub fn max_rule_depth(config: &dyn ConfigPort) -> usize {
    let depth = config.get_int("validation", "max_rule_depth", DEFAULT_MAX_DEPTH as i64);
    usize::try_from(depth)
        .unwrap_or(DEFAULT_MAX_DEPTH)
        .clamp(1, MAX_SUPPORTED_DEPTH)
}

fn validate_min_int(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: i64,
    min: i64,
) -> Result<(), StratvaultError> {
    let value = config.get_int(section, key, default);
    if value < min {
        return Err(StratvaultError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: format!("{key} must be at least {min}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    fn make_config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    #[test]
    fn valid_config_passes() {
        let config = make_config(
            r#"
[sqlite]
path = /tmp/stratvault.db
pool_size = 8
connection_timeout_ms = 2000
busy_timeout_ms = 1000

[logging]
level = debug
format = json

[validation]
max_rule_depth = 16
"#,
        );
        assert!(validate_config(&config).is_ok());
        assert_eq!(max_rule_depth(&config), 16);
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = make_config("[sqlite]\npath = data.db\n");
        assert!(validate_config(&config).is_ok());
        assert_eq!(max_rule_depth(&config), DEFAULT_MAX_DEPTH);
    }

    #[test]
    fn sqlite_path_required() {
        let config = make_config("[sqlite]\npool_size = 2\n");
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, StratvaultError::ConfigMissing { key, .. } if key == "path"));
    }

    #[test]
    fn blank_sqlite_path_rejected() {
        let config = make_config("[sqlite]\npath =   \n");
        let err = validate_sqlite_config(&config).unwrap_err();
        assert!(matches!(err, StratvaultError::ConfigMissing { section, .. } if section == "sqlite"));
    }

    #[test]
    fn pool_size_must_be_positive() {
        let config = make_config("[sqlite]\npath = a.db\npool_size = 0\n");
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, StratvaultError::ConfigInvalid { key, .. } if key == "pool_size"));
    }

    #[test]
    fn connection_timeout_must_be_positive() {
        let config = make_config("[sqlite]\npath = a.db\nconnection_timeout_ms = 0\n");
        let err = validate_config(&config).unwrap_err();
        assert!(
            matches!(err, StratvaultError::ConfigInvalid { key, .. } if key == "connection_timeout_ms")
        );
    }

    #[test]
    fn busy_timeout_may_be_zero() {
        let config = make_config("[sqlite]\npath = a.db\nbusy_timeout_ms = 0\n");
        assert!(validate_config(&config).is_ok());
        let config = make_config("[sqlite]\npath = a.db\nbusy_timeout_ms = -1\n");
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn unknown_log_level_rejected() {
        let config = make_config("[sqlite]\npath = a.db\n[logging]\nlevel = verbose\n");
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, StratvaultError::ConfigInvalid { key, .. } if key == "level"));
    }

    #[test]
    fn log_level_case_insensitive() {
        let config = make_config("[logging]\nlevel = WARN\nformat = Pretty\n");
        assert!(validate_logging_config(&config).is_ok());
    }

    #[test]
    fn unknown_log_format_rejected() {
        let config = make_config("[logging]\nformat = xml\n");
        let err = validate_logging_config(&config).unwrap_err();
        assert!(matches!(err, StratvaultError::ConfigInvalid { key, .. } if key == "format"));
    }

    #[test]
    fn rule_depth_bounds() {
        for bad in ["0", "49", "-5"] {
            let config = make_config(&format!("[validation]\nmax_rule_depth = {bad}\n"));
            let err = validate_rule_config(&config).unwrap_err();
            assert!(
                matches!(err, StratvaultError::ConfigInvalid { key, .. } if key == "max_rule_depth")
            );
        }
        let config = make_config("[validation]\nmax_rule_depth = 48\n");
        assert!(validate_rule_config(&config).is_ok());
        assert_eq!(max_rule_depth(&config), 48);
    }
}
