//! Bounded history of submitted scripts.

use std::sync::Arc;

use crate::store::{self, CacheTtl, KeyValueStore};

const HISTORY_KEY: &str = "history:scripts";
const HISTORY_LIMIT: usize = 50;

#[derive(Clone)]
pub struct ScriptHistory {
    store: Arc<dyn KeyValueStore>,
}

impl ScriptHistory {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Record a submitted script, newest first. Immediate repeats are
    /// collapsed and the list is capped at [`HISTORY_LIMIT`] entries.
    pub fn record(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let mut scripts: Vec<String> =
            store::get_typed(self.store.as_ref(), HISTORY_KEY).unwrap_or_default();
        if scripts.first().is_some_and(|last| last == text) {
            return;
        }
        scripts.insert(0, text.to_string());
        scripts.truncate(HISTORY_LIMIT);
        store::set_typed(self.store.as_ref(), HISTORY_KEY, &scripts, CacheTtl::Keep);
    }

    /// Up to `limit` most recent scripts, newest first.
    pub fn recent(&self, limit: usize) -> Vec<String> {
        let mut scripts: Vec<String> =
            store::get_typed(self.store.as_ref(), HISTORY_KEY).unwrap_or_default();
        scripts.truncate(limit);
        scripts
    }
}
