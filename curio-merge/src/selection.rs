//! Helpers for the interactive merge flow: picking the source among a set
//! of candidates and turning per-field operator choices into overrides.

use crate::error::{EngineResult, MergeError};
use curio_model::{Record, StrategyDirective};
use curio_types::RecordId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// Which record a field value is taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Source,
    Target,
}

/// The candidates to merge into `target`, in the order given, without
/// duplicates and without the target itself.
///
/// Fails if the target is not among the candidates or nothing is left to
/// merge.
pub fn chain_sources(candidates: &[RecordId], target: RecordId) -> EngineResult<Vec<RecordId>> {
    if !candidates.contains(&target) {
        return Err(MergeError::InvalidRequest(format!(
            "target #{target} is not one of the candidates"
        )));
    }
    let mut seen = HashSet::new();
    let sources: Vec<RecordId> = candidates
        .iter()
        .copied()
        .filter(|id| *id != target && seen.insert(*id))
        .collect();
    if sources.is_empty() {
        return Err(MergeError::InvalidRequest(format!(
            "no other candidates to merge into #{target}"
        )));
    }
    Ok(sources)
}

/// Picks the single source for a pairwise merge.
///
/// With exactly one non-target candidate it is chosen implicitly; otherwise
/// `explicit` must name one of them.
pub fn resolve_source(
    candidates: &[RecordId],
    target: RecordId,
    explicit: Option<RecordId>,
) -> EngineResult<RecordId> {
    let sources = chain_sources(candidates, target)?;
    match explicit {
        Some(id) if sources.contains(&id) => Ok(id),
        Some(id) => Err(MergeError::InvalidRequest(format!(
            "#{id} is not a candidate other than the target"
        ))),
        None => match sources.as_slice() {
            [only] => Ok(*only),
            _ => Err(MergeError::InvalidRequest(format!(
                "{} candidates besides target #{target}; the source must be chosen explicitly",
                sources.len()
            ))),
        },
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Choice {
    Side(Side),
    Value(Value),
}

/// Per-field choices made by an operator, applied as `FIELD_SELECTION`
/// overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSelections {
    choices: BTreeMap<String, Choice>,
}

impl FieldSelections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take `field` from one of the two records.
    pub fn choose(mut self, field: impl Into<String>, side: Side) -> Self {
        self.choices.insert(field.into(), Choice::Side(side));
        self
    }

    /// Set `field` to a value typed in by the operator.
    pub fn set_value(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.choices.insert(field.into(), Choice::Value(value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    /// Fixes each choice to a concrete value read from `source`/`target`.
    pub fn into_overrides(
        self,
        source: &Record,
        target: &Record,
    ) -> BTreeMap<String, StrategyDirective> {
        self.choices
            .into_iter()
            .map(|(field, choice)| {
                let value = match choice {
                    Choice::Side(Side::Source) => source.get(&field).clone(),
                    Choice::Side(Side::Target) => target.get(&field).clone(),
                    Choice::Value(value) => value,
                };
                (field, StrategyDirective::field_selection(value))
            })
            .collect()
    }
}
