//! User annotations persisted across runs: prompt aliases and starred
//! messages.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::protocol::StarredMessage;
use crate::store::{self, CacheTtl, KeyValueStore};

const ALIAS_KEY: &str = "annotations:aliases";
const STARRED_KEY: &str = "annotations:starred";

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// Named prompt snippets. `@name` in a script runs the stored text.
#[derive(Clone)]
pub struct AliasStore {
    store: Arc<dyn KeyValueStore>,
}

impl AliasStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn load(&self) -> BTreeMap<String, String> {
        store::get_typed(self.store.as_ref(), ALIAS_KEY).unwrap_or_default()
    }

    fn save(&self, aliases: &BTreeMap<String, String>) {
        store::set_typed(self.store.as_ref(), ALIAS_KEY, aliases, CacheTtl::Keep);
    }

    /// Store a snippet, replacing any existing one under the name.
    pub fn define(&self, name: &str, text: &str) {
        let mut aliases = self.load();
        aliases.insert(name.to_string(), text.to_string());
        self.save(&aliases);
    }

    /// Remove a snippet. Returns whether it existed.
    pub fn delete(&self, name: &str) -> bool {
        let mut aliases = self.load();
        let existed = aliases.remove(name).is_some();
        if existed {
            self.save(&aliases);
        }
        existed
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.load().get(name).cloned()
    }

    /// All snippets, sorted by name.
    pub fn list(&self) -> Vec<(String, String)> {
        self.load().into_iter().collect()
    }
}

/// Starred assistant messages, newest first.
#[derive(Clone)]
pub struct StarStore {
    store: Arc<dyn KeyValueStore>,
}

impl StarStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn add(&self, starred: StarredMessage) {
        let mut stars: Vec<StarredMessage> =
            store::get_typed(self.store.as_ref(), STARRED_KEY).unwrap_or_default();
        stars.insert(0, starred);
        store::set_typed(self.store.as_ref(), STARRED_KEY, &stars, CacheTtl::Keep);
    }

    pub fn list(&self) -> Vec<StarredMessage> {
        store::get_typed(self.store.as_ref(), STARRED_KEY).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn aliases_define_replace_delete() {
        let aliases = AliasStore::new(Arc::new(MemoryStore::new()));
        assert_eq!(aliases.get("greet"), None);

        aliases.define("greet", "wave politely");
        aliases.define("bye", "wrap up");
        assert_eq!(aliases.get("greet").as_deref(), Some("wave politely"));

        aliases.define("greet", "wave warmly");
        assert_eq!(aliases.get("greet").as_deref(), Some("wave warmly"));

        assert!(aliases.delete("greet"));
        assert!(!aliases.delete("greet"));
        assert_eq!(aliases.get("greet"), None);
    }

    #[test]
    fn alias_listing_is_sorted() {
        let aliases = AliasStore::new(Arc::new(MemoryStore::new()));
        aliases.define("zeta", "z");
        aliases.define("alpha", "a");
        let names: Vec<String> = aliases.list().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["alpha", "zeta"]);
    }

    #[test]
    fn stars_list_newest_first() {
        let stars = StarStore::new(Arc::new(MemoryStore::new()));
        stars.add(StarredMessage {
            conversation_id: Some("c1".to_string()),
            text: "first".to_string(),
            starred_at: 1,
        });
        stars.add(StarredMessage { conversation_id: None, text: "second".to_string(), starred_at: 2 });
        let texts: Vec<String> = stars.list().into_iter().map(|s| s.text).collect();
        assert_eq!(texts, ["second", "first"]);
    }
}
