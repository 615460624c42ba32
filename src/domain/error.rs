//! Domain error types.

/// A rule-tree or input validation failure, pointing at the offending node.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("validation error at {path}: {reason}")]
pub struct ValidationError {
    pub path: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Re-anchor the error at a different path, keeping the reason.
    pub fn at(self, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: self.reason,
        }
    }
}

/// Top-level error type for stratvault.
#[derive(Debug, thiserror::Error)]
pub enum StratvaultError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("duplicate: {reason}")]
    Duplicate { reason: String },

    #[error("service unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StratvaultError {
    pub fn permission_denied(reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn duplicate(reason: impl Into<String>) -> Self {
        Self::Duplicate {
            reason: reason.into(),
        }
    }

    /// Only timeouts and busy collaborators are worth retrying; everything
    /// else needs the caller to change its input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StratvaultError::Unavailable { .. })
    }
}

impl From<&StratvaultError> for std::process::ExitCode {
    fn from(err: &StratvaultError) -> Self {
        let code: u8 = match err {
            StratvaultError::Io(_) => 1,
            StratvaultError::ConfigParse { .. }
            | StratvaultError::ConfigMissing { .. }
            | StratvaultError::ConfigInvalid { .. } => 2,
            StratvaultError::Database { .. } | StratvaultError::DatabaseQuery { .. } => 3,
            StratvaultError::Validation(_) => 4,
            StratvaultError::PermissionDenied { .. } => 5,
            StratvaultError::NotFound { .. } => 6,
            StratvaultError::Duplicate { .. } => 7,
            StratvaultError::Unavailable { .. } => 8,
            StratvaultError::Json(_) => 9,
        };
        std::process::ExitCode::from(code)
    }
}
