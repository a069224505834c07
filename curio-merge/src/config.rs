use curio_model::DEFAULT_SEPARATOR;
use serde::{Deserialize, Serialize};

/// Engine-wide settings.
///
/// Lock waits are governed by the connection's busy timeout
/// (`curio_db::DbConfig`), not by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Separator for `CONCATENATE_TEXT` directives that configure none.
    pub default_separator: String,
    /// Whether sources are archived when a request doesn't say.
    pub archive_by_default: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            default_separator: DEFAULT_SEPARATOR.to_string(),
            archive_by_default: true,
        }
    }
}
