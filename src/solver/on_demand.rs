//! The announced type registry and on-demand gating state.

use std::collections::HashMap;

use regex::Regex;

use crate::codec::solver::AliasType;
use crate::error::WorldModelError;
use crate::model::{AttributeUpdate, TypeSpec};

/// One requester's interest in an on-demand type.
///
/// Identical patterns from distinct requesters each get their own entry,
/// so a stop request removes exactly one occurrence. A pattern that
/// failed to compile keeps its entry (with `regex` unset) for that
/// stop-matching symmetry; it never matches a URI.
struct OnDemandPattern {
    source: String,
    regex: Option<Regex>,
}

fn full_match(pattern: &OnDemandPattern, uri: &str) -> bool {
    // A partial match does not gate the type open: the expression has to
    // consume the URI from its first byte to its last.
    pattern.regex.as_ref().is_some_and(|regex| {
        regex
            .find(uri)
            .is_some_and(|found| found.start() == 0 && found.end() == uri.len())
    })
}

/// The attribute types this solver produces, with their wire aliases and
/// on-demand request state.
///
/// Aliases are assigned sequentially from 1 in declaration order and are
/// never reused or renumbered.
pub(super) struct TypeRegistry {
    types: Vec<AliasType>,
    by_name: HashMap<String, u32>,
    on_demand: HashMap<u32, Vec<OnDemandPattern>>,
    next_alias: u32,
}

impl TypeRegistry {
    pub(super) fn new(specs: &[TypeSpec]) -> Self {
        let mut registry = Self {
            types: Vec::new(),
            by_name: HashMap::new(),
            on_demand: HashMap::new(),
            next_alias: 1,
        };
        registry.add(specs);
        registry
    }

    /// Append declarations, returning the newly assigned entries.
    pub(super) fn add(&mut self, specs: &[TypeSpec]) -> Vec<AliasType> {
        let mut added = Vec::with_capacity(specs.len());
        for spec in specs {
            let alias = self.next_alias;
            self.next_alias += 1;
            let entry = AliasType {
                alias,
                name: spec.name.clone(),
                on_demand: spec.on_demand,
            };
            self.by_name.insert(entry.name.clone(), alias);
            if spec.on_demand {
                self.on_demand.entry(alias).or_default();
            }
            self.types.push(entry.clone());
            added.push(entry);
        }
        added
    }

    /// The full registry, for the announcement sent on reconnect.
    pub(super) fn announcement(&self) -> Vec<AliasType> { self.types.clone() }

    pub(super) fn start_on_demand(&mut self, alias: u32, patterns: Vec<String>) {
        for source in patterns {
            let regex = match Regex::new(&source) {
                Ok(regex) => Some(regex),
                Err(error) => {
                    log::error!(
                        "{}",
                        WorldModelError::RegexCompile {
                            pattern: source.clone(),
                            detail: error.to_string(),
                        }
                    );
                    None
                }
            };
            self.on_demand
                .entry(alias)
                .or_default()
                .push(OnDemandPattern { source, regex });
        }
    }

    /// Remove one occurrence per listed pattern; unmatched patterns are
    /// no-ops.
    pub(super) fn stop_on_demand(&mut self, alias: u32, patterns: &[String]) {
        let Some(entries) = self.on_demand.get_mut(&alias) else {
            return;
        };
        for source in patterns {
            if let Some(index) = entries.iter().position(|entry| entry.source == *source) {
                entries.remove(index);
            }
        }
    }

    /// Decide whether `update` goes out, yielding its type alias if so.
    ///
    /// Unknown types are dropped. Types never declared on-demand always
    /// pass; on-demand types pass only while some requester's pattern
    /// full-matches the target URI.
    pub(super) fn gate(&self, update: &AttributeUpdate) -> Option<u32> {
        let alias = *self.by_name.get(&update.type_name)?;
        match self.on_demand.get(&alias) {
            None => Some(alias),
            Some(patterns) => patterns
                .iter()
                .any(|pattern| full_match(pattern, &update.target))
                .then_some(alias),
        }
    }

    /// True if an update of `type_name` for `uri` would currently be
    /// transmitted.
    pub(super) fn requested(&self, type_name: &str, uri: &str) -> bool {
        let Some(alias) = self.by_name.get(type_name) else {
            return false;
        };
        match self.on_demand.get(alias) {
            None => true,
            Some(patterns) => patterns.iter().any(|pattern| full_match(pattern, uri)),
        }
    }
}
