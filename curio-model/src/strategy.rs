//! The strategy catalog: resolution kinds, their system-wide defaults, and
//! normalization of raw strategies into immutable directives.
//!
//! A raw strategy is a bare kind, a name (case-insensitive), or a mapping
//! `{"strategy": <name>, ...options}`. Names are turned into the closed
//! [`StrategyKind`] / [`RelationAction`] enums here and nowhere else.
//! Normalization is pure, so a directive written to the audit log as JSON
//! normalizes back to an equal directive.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Strategy applied to a mergeable field with no explicit directive.
pub const DEFAULT_FIELD_STRATEGY: StrategyKind = StrategyKind::PreferNonNull;

/// Action applied to a declared relation with no explicit directive.
///
/// The kept record's rows win: source rows move over unless the target
/// already holds an equivalent row.
pub const DEFAULT_RELATION_ACTION: RelationAction = RelationAction::Merge;

/// Separator used by `CONCATENATE_TEXT` when none is configured.
pub const DEFAULT_SEPARATOR: &str = "\n";

const STRATEGY_KEY: &str = "strategy";
const ACTION_KEY: &str = "action";

pub const OPT_SEPARATOR: &str = "separator";
pub const OPT_ALLOWED: &str = "allowed";
pub const OPT_SELECTED_VALUE: &str = "selected_value";
pub const OPT_CALLABLE_NAME: &str = "callable_name";
pub const OPT_DEDUPLICATE: &str = "deduplicate";
pub const OPT_SKIP_CONFLICTS: &str = "skip_conflicts";

// ── Kinds ────────────────────────────────────────────────────────

/// How one field's final value is picked from (source, target).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// The value on the record being kept wins unconditionally.
    LastWrite,
    /// Whichever side is non-empty; the target when both are.
    PreferNonNull,
    /// Ordered, de-duplicated union of separator-delimited entries.
    ConcatenateText,
    /// The value must come from an allowed set.
    Whitelist,
    /// The caller supplies the value explicitly.
    FieldSelection,
    /// Delegates to a registered resolver.
    Custom,
}

impl StrategyKind {
    pub const ALL: [Self; 6] = [
        Self::LastWrite,
        Self::PreferNonNull,
        Self::ConcatenateText,
        Self::Whitelist,
        Self::FieldSelection,
        Self::Custom,
    ];

    /// Canonical catalog name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::LastWrite => "last_write",
            Self::PreferNonNull => "prefer_non_null",
            Self::ConcatenateText => "concatenate_text",
            Self::Whitelist => "whitelist",
            Self::FieldSelection => "field_selection",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| ConfigError::UnknownStrategy(s.to_string()))
    }
}

/// How rows of one relation pointing at the source are rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationAction {
    /// Point every source row at the target.
    Reassign,
    /// Union the source's rows into the target's, de-duplicating on conflict.
    Merge,
    /// Leave the source's rows untouched.
    Skip,
    /// Delegates to a registered relation handler.
    Custom,
}

impl RelationAction {
    pub const ALL: [Self; 4] = [Self::Reassign, Self::Merge, Self::Skip, Self::Custom];

    /// Canonical catalog name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Reassign => "reassign",
            Self::Merge => "merge",
            Self::Skip => "skip",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for RelationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RelationAction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        // "last_write" on a relation means the kept record's rows win.
        if wanted == StrategyKind::LastWrite.name() {
            return Ok(DEFAULT_RELATION_ACTION);
        }
        Self::ALL
            .into_iter()
            .find(|action| action.name() == wanted)
            .ok_or_else(|| ConfigError::UnknownRelationAction(s.to_string()))
    }
}

// ── Raw strategies ──────────────────────────────────────────────

/// A strategy as supplied by configuration or a caller, before
/// normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum RawStrategy {
    Kind(StrategyKind),
    Action(RelationAction),
    Name(String),
    Mapping(Map<String, Value>),
    Other(Value),
}

impl From<Value> for RawStrategy {
    fn from(value: Value) -> Self {
        match value {
            Value::String(name) => Self::Name(name),
            Value::Object(map) => Self::Mapping(map),
            other => Self::Other(other),
        }
    }
}

impl From<RawStrategy> for Value {
    fn from(raw: RawStrategy) -> Self {
        match raw {
            RawStrategy::Kind(kind) => Value::String(kind.name().to_string()),
            RawStrategy::Action(action) => Value::String(action.name().to_string()),
            RawStrategy::Name(name) => Value::String(name),
            RawStrategy::Mapping(map) => Value::Object(map),
            RawStrategy::Other(value) => value,
        }
    }
}

impl From<StrategyKind> for RawStrategy {
    fn from(kind: StrategyKind) -> Self {
        Self::Kind(kind)
    }
}

impl From<RelationAction> for RawStrategy {
    fn from(action: RelationAction) -> Self {
        Self::Action(action)
    }
}

impl From<&str> for RawStrategy {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for RawStrategy {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<StrategyDirective> for RawStrategy {
    fn from(directive: StrategyDirective) -> Self {
        Self::Mapping(directive.into_mapping())
    }
}

impl From<RelationDirective> for RawStrategy {
    fn from(directive: RelationDirective) -> Self {
        Self::Mapping(directive.into_mapping())
    }
}

/// Splits a mapping into its name (under any of `keys`) and remaining options.
fn split_mapping(
    mut map: Map<String, Value>,
    keys: &[&str],
) -> ConfigResult<(String, Map<String, Value>)> {
    let named: Vec<&str> = keys.iter().copied().filter(|key| map.contains_key(*key)).collect();
    if named.len() > 1 {
        return Err(ConfigError::InvalidSpec(format!(
            "mapping names its strategy more than once ({})",
            named.join(", ")
        )));
    }
    let found = keys.iter().find_map(|key| map.remove(*key));
    match found {
        Some(Value::String(name)) => Ok((name, map)),
        Some(other) => Err(ConfigError::InvalidSpec(format!(
            "`{STRATEGY_KEY}` must be a name, got {other}"
        ))),
        None => Err(ConfigError::InvalidSpec(format!(
            "mapping is missing `{STRATEGY_KEY}`"
        ))),
    }
}

// ── Field directives ─────────────────────────────────────────────

/// A normalized (kind, options) pair describing how to resolve one field.
///
/// Only constructed through validation, and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct StrategyDirective {
    kind: StrategyKind,
    options: Map<String, Value>,
}

impl StrategyDirective {
    /// Normalizes a raw strategy, rejecting unknown names and malformed options.
    pub fn normalize(raw: impl Into<RawStrategy>) -> ConfigResult<Self> {
        match raw.into() {
            RawStrategy::Kind(kind) => Self::from_parts(kind, Map::new()),
            RawStrategy::Name(name) => Self::from_parts(name.parse()?, Map::new()),
            RawStrategy::Mapping(map) => {
                let (name, options) = split_mapping(map, &[STRATEGY_KEY])?;
                Self::from_parts(name.parse()?, options)
            }
            RawStrategy::Action(action) => Err(ConfigError::InvalidSpec(format!(
                "relation action `{action}` used as a field strategy"
            ))),
            RawStrategy::Other(value) => Err(ConfigError::InvalidSpec(value.to_string())),
        }
    }

    /// Builds a directive from an already-parsed kind and its options.
    pub fn from_parts(kind: StrategyKind, options: Map<String, Value>) -> ConfigResult<Self> {
        let strategy = kind.name();
        match kind {
            StrategyKind::ConcatenateText => {
                if let Some(sep) = options.get(OPT_SEPARATOR) {
                    match sep.as_str() {
                        Some(s) if !s.is_empty() => {}
                        _ => {
                            return Err(ConfigError::InvalidOption {
                                strategy,
                                option: OPT_SEPARATOR,
                                reason: "must be a non-empty string".into(),
                            });
                        }
                    }
                }
            }
            StrategyKind::Whitelist => match options.get(OPT_ALLOWED) {
                Some(Value::Array(_)) => {}
                Some(_) => {
                    return Err(ConfigError::InvalidOption {
                        strategy,
                        option: OPT_ALLOWED,
                        reason: "must be a list of values".into(),
                    });
                }
                None => {
                    return Err(ConfigError::MissingOption {
                        strategy,
                        option: OPT_ALLOWED,
                    });
                }
            },
            StrategyKind::Custom => require_callable(strategy, &options)?,
            StrategyKind::LastWrite | StrategyKind::PreferNonNull | StrategyKind::FieldSelection => {}
        }
        Ok(Self { kind, options })
    }

    /// `LAST_WRITE`: keep the target's value.
    #[must_use]
    pub fn last_write() -> Self {
        Self::bare(StrategyKind::LastWrite)
    }

    /// `PREFER_NON_NULL`: the first non-empty of target, source.
    #[must_use]
    pub fn prefer_non_null() -> Self {
        Self::bare(StrategyKind::PreferNonNull)
    }

    /// `CONCATENATE_TEXT` with the default newline separator.
    #[must_use]
    pub fn concatenate() -> Self {
        Self::bare(StrategyKind::ConcatenateText)
    }

    /// `CONCATENATE_TEXT` with an explicit separator.
    pub fn concatenate_with(separator: &str) -> ConfigResult<Self> {
        let mut options = Map::new();
        options.insert(OPT_SEPARATOR.into(), Value::String(separator.to_string()));
        Self::from_parts(StrategyKind::ConcatenateText, options)
    }

    /// `WHITELIST` over the given allowed values.
    pub fn whitelist<I, V>(allowed: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let mut options = Map::new();
        options.insert(
            OPT_ALLOWED.into(),
            Value::Array(allowed.into_iter().map(Into::into).collect()),
        );
        Self {
            kind: StrategyKind::Whitelist,
            options,
        }
    }

    /// `FIELD_SELECTION` with the operator's chosen value.
    pub fn field_selection(selected: impl Into<Value>) -> Self {
        let mut options = Map::new();
        options.insert(OPT_SELECTED_VALUE.into(), selected.into());
        Self {
            kind: StrategyKind::FieldSelection,
            options,
        }
    }

    /// `FIELD_SELECTION` still waiting for a value from the caller.
    #[must_use]
    pub fn field_selection_pending() -> Self {
        Self::bare(StrategyKind::FieldSelection)
    }

    /// `CUSTOM` delegating to the resolver registered under `callable_name`.
    pub fn custom(callable_name: impl Into<String>) -> ConfigResult<Self> {
        let mut options = Map::new();
        options.insert(OPT_CALLABLE_NAME.into(), Value::String(callable_name.into()));
        Self::from_parts(StrategyKind::Custom, options)
    }

    fn bare(kind: StrategyKind) -> Self {
        Self {
            kind,
            options: Map::new(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> StrategyKind {
        self.kind
    }

    #[must_use]
    pub const fn options(&self) -> &Map<String, Value> {
        &self.options
    }

    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    /// Configured separator for `CONCATENATE_TEXT`.
    pub fn separator(&self) -> Option<&str> {
        self.option(OPT_SEPARATOR).and_then(Value::as_str)
    }

    /// Allowed set for `WHITELIST`; empty for other kinds.
    pub fn allowed(&self) -> &[Value] {
        self.option(OPT_ALLOWED)
            .and_then(Value::as_array)
            .map_or(&[], Vec::as_slice)
    }

    /// Explicit value for `FIELD_SELECTION`, if the caller supplied one.
    pub fn selected_value(&self) -> Option<&Value> {
        self.option(OPT_SELECTED_VALUE)
    }

    /// Registered resolver name for `CUSTOM`.
    pub fn callable_name(&self) -> Option<&str> {
        self.option(OPT_CALLABLE_NAME).and_then(Value::as_str)
    }

    /// Serialized mapping form, `{"strategy": <name>, ...options}`.
    pub fn into_mapping(self) -> Map<String, Value> {
        let mut map = self.options;
        map.insert(STRATEGY_KEY.into(), Value::String(self.kind.name().to_string()));
        map
    }
}

impl Default for StrategyDirective {
    fn default() -> Self {
        Self::bare(DEFAULT_FIELD_STRATEGY)
    }
}

impl TryFrom<Value> for StrategyDirective {
    type Error = ConfigError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::normalize(RawStrategy::from(value))
    }
}

impl From<StrategyDirective> for Value {
    fn from(directive: StrategyDirective) -> Self {
        Value::Object(directive.into_mapping())
    }
}

// ── Relation directives ──────────────────────────────────────────

/// A normalized (action, options) pair describing how to rewrite one relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct RelationDirective {
    action: RelationAction,
    options: Map<String, Value>,
}

impl RelationDirective {
    /// Normalizes a raw relation strategy. Mappings may name the action under
    /// either `strategy` or `action`.
    pub fn normalize(raw: impl Into<RawStrategy>) -> ConfigResult<Self> {
        match raw.into() {
            RawStrategy::Action(action) => Self::from_parts(action, Map::new()),
            RawStrategy::Name(name) => Self::from_parts(name.parse()?, Map::new()),
            RawStrategy::Mapping(map) => {
                let (name, options) = split_mapping(map, &[STRATEGY_KEY, ACTION_KEY])?;
                Self::from_parts(name.parse()?, options)
            }
            RawStrategy::Kind(StrategyKind::LastWrite) => {
                Self::from_parts(DEFAULT_RELATION_ACTION, Map::new())
            }
            RawStrategy::Kind(kind) => Err(ConfigError::InvalidSpec(format!(
                "field strategy `{kind}` used as a relation action"
            ))),
            RawStrategy::Other(value) => Err(ConfigError::InvalidSpec(value.to_string())),
        }
    }

    /// Builds a directive from an already-parsed action and its options.
    pub fn from_parts(action: RelationAction, options: Map<String, Value>) -> ConfigResult<Self> {
        let strategy = action.name();
        for option in [OPT_DEDUPLICATE, OPT_SKIP_CONFLICTS] {
            if let Some(value) = options.get(option) {
                if !value.is_boolean() {
                    return Err(ConfigError::InvalidOption {
                        strategy,
                        option,
                        reason: "must be true or false".into(),
                    });
                }
            }
        }
        if action == RelationAction::Custom {
            require_callable(strategy, &options)?;
        }
        Ok(Self { action, options })
    }

    #[must_use]
    pub fn reassign() -> Self {
        Self::bare(RelationAction::Reassign)
    }

    #[must_use]
    pub fn merge() -> Self {
        Self::bare(RelationAction::Merge)
    }

    #[must_use]
    pub fn skip() -> Self {
        Self::bare(RelationAction::Skip)
    }

    pub fn custom(callable_name: impl Into<String>) -> ConfigResult<Self> {
        let mut options = Map::new();
        options.insert(OPT_CALLABLE_NAME.into(), Value::String(callable_name.into()));
        Self::from_parts(RelationAction::Custom, options)
    }

    /// Sets the `deduplicate` option.
    #[must_use]
    pub fn deduplicating(mut self, enabled: bool) -> Self {
        self.options.insert(OPT_DEDUPLICATE.into(), Value::Bool(enabled));
        self
    }

    /// Sets the `skip_conflicts` option.
    #[must_use]
    pub fn skipping_conflicts(mut self, enabled: bool) -> Self {
        self.options.insert(OPT_SKIP_CONFLICTS.into(), Value::Bool(enabled));
        self
    }

    fn bare(action: RelationAction) -> Self {
        Self {
            action,
            options: Map::new(),
        }
    }

    #[must_use]
    pub const fn action(&self) -> RelationAction {
        self.action
    }

    #[must_use]
    pub const fn options(&self) -> &Map<String, Value> {
        &self.options
    }

    /// Whether conflicting rows are de-duplicated. `MERGE` does so unless
    /// told otherwise; `REASSIGN` only when asked.
    pub fn deduplicate(&self) -> bool {
        self.options
            .get(OPT_DEDUPLICATE)
            .and_then(Value::as_bool)
            .unwrap_or(self.action == RelationAction::Merge)
    }

    pub fn skip_conflicts(&self) -> bool {
        self.options
            .get(OPT_SKIP_CONFLICTS)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// True when uniqueness conflicts are settled by the skip/delete policy
    /// instead of aborting the merge.
    pub fn resolves_conflicts(&self) -> bool {
        self.deduplicate() || self.skip_conflicts()
    }

    pub fn callable_name(&self) -> Option<&str> {
        self.options.get(OPT_CALLABLE_NAME).and_then(Value::as_str)
    }

    pub fn into_mapping(self) -> Map<String, Value> {
        let mut map = self.options;
        map.insert(STRATEGY_KEY.into(), Value::String(self.action.name().to_string()));
        map
    }
}

impl Default for RelationDirective {
    fn default() -> Self {
        Self::bare(DEFAULT_RELATION_ACTION)
    }
}

impl TryFrom<Value> for RelationDirective {
    type Error = ConfigError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::normalize(RawStrategy::from(value))
    }
}

impl From<RelationDirective> for Value {
    fn from(directive: RelationDirective) -> Self {
        Value::Object(directive.into_mapping())
    }
}

fn require_callable(strategy: &'static str, options: &Map<String, Value>) -> ConfigResult<()> {
    match options.get(OPT_CALLABLE_NAME) {
        Some(Value::String(name)) if !name.is_empty() => Ok(()),
        Some(_) => Err(ConfigError::InvalidOption {
            strategy,
            option: OPT_CALLABLE_NAME,
            reason: "must be a non-empty name".into(),
        }),
        None => Err(ConfigError::MissingOption {
            strategy,
            option: OPT_CALLABLE_NAME,
        }),
    }
}
