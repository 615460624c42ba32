//! Strategy tags.

use crate::domain::error::ValidationError;
use serde::Serialize;

pub const MAX_TAG_NAME_LEN: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

/// A tag together with the number of non-deleted strategies carrying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagWithCount {
    #[serde(flatten)]
    pub tag: Tag,
    pub strategy_count: u64,
}

/// Trim a submitted tag name and check its length.
pub fn validate_tag_name(name: &str) -> Result<String, ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::new("name", "tag name cannot be empty"));
    }
    if name.chars().count() > MAX_TAG_NAME_LEN {
        return Err(ValidationError::new(
            "name",
            format!("tag name cannot exceed {MAX_TAG_NAME_LEN} characters"),
        ));
    }
    Ok(name.to_string())
}
