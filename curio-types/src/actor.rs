use serde::{Deserialize, Serialize};
use std::fmt;

/// The acting user behind a merge, as handed over by the request layer.
///
/// The engine never interprets or authorizes this value; it is only copied
/// onto the audit entry. Authorization happens before `merge()` is called.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Actor(String);

impl Actor {
    /// Creates an actor from any identity string (username, email, token subject).
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    /// The actor used for merges not triggered by a person.
    #[must_use]
    pub fn system() -> Self {
        Self("system".to_string())
    }

    /// Returns the identity string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Actor {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Actor {
    fn from(s: String) -> Self {
        Self(s)
    }
}
