//! Field name resolution.
//!
//! Field definitions are keyed either by an exact name or by a glob pattern such as
//! `price_*`. Exact names win; otherwise the first matching pattern in name order applies.

use std::collections::BTreeMap;

use globset::{Glob, GlobBuilder, GlobMatcher};

use crate::{ConfigError, FieldDefinition};

/// Compiled field definitions ready for name lookups.
#[derive(Debug, Clone)]
pub struct FieldPatterns {
    /// Definitions whose key has no glob metacharacters.
    exact: BTreeMap<String, FieldDefinition>,
    /// Pattern definitions, in key order.
    patterns: Vec<(GlobMatcher, FieldDefinition)>,
}

impl FieldPatterns {
    /// Compiles field definitions.
    pub fn compile(fields: &BTreeMap<String, FieldDefinition>) -> Result<Self, ConfigError> {
        let mut exact = BTreeMap::new();
        let mut patterns = Vec::new();
        for (name, definition) in fields {
            if is_pattern(name) {
                patterns.push((compile_glob(name)?.compile_matcher(), definition.clone()));
            } else {
                exact.insert(name.clone(), definition.clone());
            }
        }
        Ok(Self { exact, patterns })
    }

    /// Resolves the definition for a concrete field name.
    pub fn resolve(&self, name: &str) -> Option<&FieldDefinition> {
        self.exact.get(name).or_else(|| {
            self.patterns
                .iter()
                .find(|(matcher, _)| matcher.is_match(name))
                .map(|(_, definition)| definition)
        })
    }

    /// Iterates over exactly named definitions.
    pub fn exact(&self) -> impl Iterator<Item = (&str, &FieldDefinition)> {
        self.exact.iter().map(|(name, def)| (name.as_str(), def))
    }

    /// Iterates over every definition, pattern ones included.
    pub fn definitions(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.exact
            .values()
            .chain(self.patterns.iter().map(|(_, def)| def))
    }

    /// Returns true if any pattern-keyed definitions exist.
    pub fn has_patterns(&self) -> bool {
        !self.patterns.is_empty()
    }
}

/// Returns true if a field key contains glob metacharacters.
pub fn is_pattern(name: &str) -> bool {
    name.contains(['*', '?', '[', '{'])
}

/// Compiles a single field glob. Field names are flat, so `*` may match any character.
fn compile_glob(pattern: &str) -> Result<Glob, ConfigError> {
    GlobBuilder::new(pattern)
        .literal_separator(false)
        .build()
        .map_err(|e| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            source: e,
        })
}
