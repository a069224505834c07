//! Field resolution.
//!
//! Given a field's directive and both records, decides the value the target
//! ends up with. Nothing here touches the store.

use crate::custom::CustomRegistry;
use crate::error::{EngineResult, MergeError};
use curio_db::blob_bytes;
use curio_model::{FieldSpec, Record, StrategyDirective, StrategyKind};
use serde_json::Value;
use tracing::debug;

/// Outcome of resolving one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Write `value` onto the target. `note` explains the choice when it
    /// isn't obvious.
    Set { value: Value, note: Option<String> },
    /// Leave the target's column alone. Only custom resolvers return this.
    Unchanged,
}

impl Resolution {
    pub fn set(value: impl Into<Value>) -> Self {
        Self::Set {
            value: value.into(),
            note: None,
        }
    }

    pub fn with_note(value: impl Into<Value>, note: impl Into<String>) -> Self {
        Self::Set {
            value: value.into(),
            note: Some(note.into()),
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Set { value, .. } => Some(value),
            Self::Unchanged => None,
        }
    }

    pub fn note(&self) -> Option<&str> {
        match self {
            Self::Set { note, .. } => note.as_deref(),
            Self::Unchanged => None,
        }
    }
}

/// Resolves fields against a fixed set of custom callables and a default
/// separator.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    customs: &'a CustomRegistry,
    default_separator: &'a str,
}

impl<'a> Resolver<'a> {
    pub fn new(customs: &'a CustomRegistry, default_separator: &'a str) -> Self {
        Self {
            customs,
            default_separator,
        }
    }

    /// Resolves `field` between `source` and `target` under `directive`.
    pub fn resolve(
        &self,
        field: &FieldSpec,
        directive: &StrategyDirective,
        source: &Record,
        target: &Record,
    ) -> EngineResult<Resolution> {
        let name = field.name.as_str();
        let source_value = source.get(name);
        let target_value = target.get(name);

        let resolution = match directive.kind() {
            StrategyKind::LastWrite => Resolution::set(target_value.clone()),
            StrategyKind::PreferNonNull => prefer_non_null(field, source_value, target_value),
            StrategyKind::ConcatenateText => {
                let separator = directive.separator().unwrap_or(self.default_separator);
                concatenate_text(source_value, target_value, separator)
            }
            StrategyKind::Whitelist => {
                whitelist(name, directive.allowed(), source_value, target_value)?
            }
            StrategyKind::FieldSelection => match directive.selected_value() {
                Some(selected) => Resolution::with_note(selected.clone(), "selected by operator"),
                None => {
                    return Err(MergeError::MissingFieldSelection {
                        field: name.to_string(),
                    });
                }
            },
            StrategyKind::Custom => {
                let callable = directive.callable_name().unwrap_or_default();
                let resolver = self.customs.resolver(callable).ok_or_else(|| {
                    MergeError::UnknownCustomStrategy {
                        name: callable.to_string(),
                        used_by: name.to_string(),
                    }
                })?;
                resolver(source_value, target_value, source, target)
            }
        };

        debug!(
            "Resolved {}.{} with {}: {:?}",
            target.entity_type,
            name,
            directive.kind(),
            resolution.value()
        );
        Ok(resolution)
    }
}

/// Null, the empty string, and empty arrays/objects count as "no value".
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty() || blob_bytes(value).is_some_and(|b| b.is_empty()),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn prefer_non_null(field: &FieldSpec, source: &Value, target: &Value) -> Resolution {
    match (is_empty_value(target), is_empty_value(source)) {
        (false, false) if source != target => Resolution::with_note(
            target.clone(),
            format!("kept target value; source had {source}"),
        ),
        (false, _) => Resolution::set(target.clone()),
        (true, false) => Resolution::with_note(source.clone(), "target was empty; took source value"),
        (true, true) => Resolution::set(field.empty_value()),
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Union of the entries of `target` and `source`, split on `separator`.
///
/// Target entries come first in their original order, then source entries
/// not already present. Empty entries are dropped and matching is exact.
pub fn concatenate(source: &str, target: &str, separator: &str) -> String {
    let mut entries: Vec<&str> = Vec::new();
    for entry in target.split(separator).chain(source.split(separator)) {
        if !entry.is_empty() && !entries.contains(&entry) {
            entries.push(entry);
        }
    }
    entries.join(separator)
}

fn concatenate_text(source: &Value, target: &Value, separator: &str) -> Resolution {
    let source_text = text_of(source);
    let target_text = text_of(target);
    let merged = concatenate(&source_text, &target_text, separator);
    let kept = concatenate("", &target_text, separator);

    if merged == kept {
        return Resolution::set(merged);
    }
    let added = entry_count(&merged, separator) - entry_count(&kept, separator);
    Resolution::with_note(merged, format!("appended {added} entries from source"))
}

fn entry_count(text: &str, separator: &str) -> usize {
    text.split(separator).filter(|entry| !entry.is_empty()).count()
}

fn whitelist(
    field: &str,
    allowed: &[Value],
    source: &Value,
    target: &Value,
) -> EngineResult<Resolution> {
    if allowed.contains(target) {
        Ok(Resolution::set(target.clone()))
    } else if allowed.contains(source) {
        Ok(Resolution::with_note(
            source.clone(),
            format!("target value {target} is not allowed; took source value"),
        ))
    } else {
        Err(MergeError::InvalidStrategyValue {
            field: field.to_string(),
            value: target.clone(),
        })
    }
}
