//! ACR strength lookup.

use std::collections::HashMap;

/// Maps an ACR label to a numeric strength. Higher is stronger.
pub trait AcrLevelResolver: Send + Sync {
    /// Strength of `acr`, `None` when the label is unknown.
    fn level(&self, acr: &str) -> Option<i32>;
}

/// Fixed ACR table, usually loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticAcrLevels {
    levels: HashMap<String, i32>,
}

impl StaticAcrLevels {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a label.
    #[must_use]
    pub fn with_level(mut self, acr: impl Into<String>, level: i32) -> Self {
        self.levels.insert(acr.into(), level);
        self
    }
}

impl<K: Into<String>> FromIterator<(K, i32)> for StaticAcrLevels {
    fn from_iter<T: IntoIterator<Item = (K, i32)>>(iter: T) -> Self {
        Self {
            levels: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl AcrLevelResolver for StaticAcrLevels {
    fn level(&self, acr: &str) -> Option<i32> {
        self.levels.get(acr).copied()
    }
}
