//! Per-caller experiment selection
//!
//! Each caller picks an experiment once; later requests from the same caller
//! query it. Selections are keyed by identity, so concurrent callers never
//! overwrite each other's choice.

use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Default)]
pub struct ActiveExperiments {
    selections: RwLock<HashMap<String, String>>,
}

impl ActiveExperiments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `experiment` as the caller's active experiment
    pub fn select(&self, identity: &str, experiment: &str) {
        self.selections
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(identity.to_string(), experiment.to_string());
    }

    pub fn active(&self, identity: &str) -> Option<String> {
        self.selections
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(identity)
            .cloned()
    }
}
