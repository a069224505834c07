//! Configuration errors raised while building strategy maps and registrations.

use thiserror::Error;

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors in strategy configuration or entity-type registration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field strategy name not in the catalog.
    #[error("unknown strategy: {0:?}")]
    UnknownStrategy(String),

    /// A relation action name not in the catalog.
    #[error("unknown relation action: {0:?}")]
    UnknownRelationAction(String),

    /// A raw strategy that is neither a name nor a mapping.
    #[error("invalid strategy: {0}")]
    InvalidSpec(String),

    /// A strategy that needs an option was given without it.
    #[error("strategy `{strategy}` requires option `{option}`")]
    MissingOption {
        strategy: &'static str,
        option: &'static str,
    },

    /// An option of the wrong shape.
    #[error("strategy `{strategy}` option `{option}`: {reason}")]
    InvalidOption {
        strategy: &'static str,
        option: &'static str,
        reason: String,
    },

    /// An override names a field not declared mergeable.
    #[error("field `{field}` is not mergeable for entity type `{entity_type}`")]
    UnknownField { entity_type: String, field: String },

    /// An override names a relation not declared on the entity type.
    #[error("relation `{relation}` is not declared for entity type `{entity_type}`")]
    UnknownRelation {
        entity_type: String,
        relation: String,
    },

    /// A table or column name that is not a plain SQL identifier.
    #[error("invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),

    /// The same entity type registered twice.
    #[error("entity type `{0}` is already registered")]
    DuplicateEntityType(String),

    /// A registration that is internally inconsistent.
    #[error("invalid registration for `{entity_type}`: {reason}")]
    InvalidRegistration { entity_type: String, reason: String },

    /// Registration JSON could not be parsed.
    #[error("registration parse error: {0}")]
    Json(#[from] serde_json::Error),
}
