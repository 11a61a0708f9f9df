//! Per-state population accumulation
//!
//! Keys are compared case-insensitively after trimming. The first spelling
//! seen for a state is the one reported back.

use super::types::Feature;
use std::collections::{BTreeMap, HashMap};

/// Running totals for one refresh
#[derive(Debug, Default)]
pub struct StateTotals {
    // lowercase key -> (display name, population)
    totals: HashMap<String, (String, i64)>,
}

impl StateTotals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `population` to the state's running total
    ///
    /// Blank names are ignored. Returns false if the entry was skipped.
    pub fn add(&mut self, state_name: &str, population: i64) -> bool {
        let trimmed = state_name.trim();
        if trimmed.is_empty() {
            return false;
        }

        let entry = self
            .totals
            .entry(trimmed.to_lowercase())
            .or_insert_with(|| (trimmed.to_string(), 0));
        entry.1 = entry.1.saturating_add(population.max(0));
        true
    }

    /// Accumulate one feature using the given attribute keys
    ///
    /// Returns false when the feature has no usable state name.
    pub fn add_feature(&mut self, feature: &Feature, state_field: &str, population_field: &str) -> bool {
        let Some(state_name) = feature.attribute(state_field).as_trimmed_text() else {
            return false;
        };
        let population = feature.attribute(population_field).as_population();
        self.add(&state_name, population)
    }

    pub fn len(&self) -> usize {
        self.totals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }

    /// Total for a state, looked up case-insensitively
    pub fn get(&self, state_name: &str) -> Option<i64> {
        self.totals
            .get(&state_name.trim().to_lowercase())
            .map(|(_, population)| *population)
    }

    /// Final mapping, ordered by state name
    pub fn into_sorted(self) -> BTreeMap<String, i64> {
        self.totals.into_values().collect()
    }
}
