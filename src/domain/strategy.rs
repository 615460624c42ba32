//! Strategy groups and their immutable versions.

use crate::domain::error::ValidationError;
use crate::domain::structure::Structure;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const INITIAL_VERSION_NOTES: &str = "Initial version";

/// Stable identity of a strategy across all of its versions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyGroup {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub latest_version: u32,
}

impl StrategyGroup {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyVersion {
    pub id: i64,
    pub group_id: i64,
    pub version_number: u32,
    pub structure: Structure,
    pub name: String,
    pub description: String,
    pub thumbnail_url: Option<String>,
    pub is_public: bool,
    pub change_notes: String,
    pub created_at: DateTime<Utc>,
    pub owner_id: i64,
}

/// Version contents handed to the store; it assigns id, number and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewVersion {
    pub group_id: i64,
    pub owner_id: i64,
    pub structure: Structure,
    pub name: String,
    pub description: String,
    pub thumbnail_url: Option<String>,
    pub is_public: bool,
    pub change_notes: String,
}

/// Metadata for a brand-new strategy group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewStrategyMeta {
    pub name: String,
    pub description: String,
    pub thumbnail_url: Option<String>,
    pub is_public: bool,
}

impl NewStrategyMeta {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::new("name", "strategy name is required"));
        }
        Ok(())
    }
}

/// Metadata edits for a new version. `None` inherits from the latest version.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub is_public: Option<bool>,
    pub change_notes: String,
}

impl VersionChanges {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match &self.name {
            Some(name) if name.trim().is_empty() => {
                Err(ValidationError::new("name", "strategy name cannot be empty"))
            }
            _ => Ok(()),
        }
    }

    pub fn apply(&self, latest: &StrategyVersion, structure: Structure) -> NewVersion {
        NewVersion {
            group_id: latest.group_id,
            owner_id: latest.owner_id,
            structure,
            name: self.name.clone().unwrap_or_else(|| latest.name.clone()),
            description: self
                .description
                .clone()
                .unwrap_or_else(|| latest.description.clone()),
            thumbnail_url: self
                .thumbnail_url
                .clone()
                .or_else(|| latest.thumbnail_url.clone()),
            is_public: self.is_public.unwrap_or(latest.is_public),
            change_notes: self.change_notes.clone(),
        }
    }
}

/// A group's version list plus the caller's effective active version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionHistory {
    pub group_id: i64,
    pub active_version: Option<u32>,
    pub versions: Vec<StrategyVersion>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule_parser::DEFAULT_MAX_DEPTH;

    const RAW: &str = r#"{"buyRules":[],"sellRules":[]}"#;

    fn latest() -> StrategyVersion {
        StrategyVersion {
            id: 11,
            group_id: 3,
            version_number: 2,
            structure: Structure::parse(RAW, DEFAULT_MAX_DEPTH).unwrap(),
            name: "RSI Dip".into(),
            description: "buys dips".into(),
            thumbnail_url: Some("thumb.png".into()),
            is_public: true,
            change_notes: "tweak".into(),
            created_at: Utc::now(),
            owner_id: 7,
        }
    }

    #[test]
    fn unchanged_fields_are_inherited() {
        let changes = VersionChanges {
            change_notes: "tighter thresholds".into(),
            ..Default::default()
        };
        let structure = Structure::parse(RAW, DEFAULT_MAX_DEPTH).unwrap();
        let next = changes.apply(&latest(), structure);
        assert_eq!(next.group_id, 3);
        assert_eq!(next.owner_id, 7);
        assert_eq!(next.name, "RSI Dip");
        assert_eq!(next.description, "buys dips");
        assert_eq!(next.thumbnail_url.as_deref(), Some("thumb.png"));
        assert!(next.is_public);
        assert_eq!(next.change_notes, "tighter thresholds");
    }

    #[test]
    fn supplied_fields_override() {
        let changes = VersionChanges {
            name: Some("RSI Dip v2".into()),
            is_public: Some(false),
            ..Default::default()
        };
        let structure = Structure::parse(RAW, DEFAULT_MAX_DEPTH).unwrap();
        let next = changes.apply(&latest(), structure);
        assert_eq!(next.name, "RSI Dip v2");
        assert!(!next.is_public);
    }

    #[test]
    fn empty_names_rejected() {
        let meta = NewStrategyMeta {
            name: "  ".into(),
            ..Default::default()
        };
        assert_eq!(meta.validate().unwrap_err().path, "name");

        let changes = VersionChanges {
            name: Some(String::new()),
            ..Default::default()
        };
        assert!(changes.validate().is_err());
    }

    #[test]
    fn deleted_flag_follows_timestamp() {
        let mut group = StrategyGroup {
            id: 1,
            owner_id: 1,
            name: "x".into(),
            is_public: false,
            created_at: Utc::now(),
            deleted_at: None,
            latest_version: 1,
        };
        assert!(!group.is_deleted());
        group.deleted_at = Some(Utc::now());
        assert!(group.is_deleted());
    }
}
