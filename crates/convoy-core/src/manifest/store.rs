//! In-memory per-node fragment store with single-level undo.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

use super::{Fragment, FragmentChange};

/// Rendered manifest fragments keyed by `(node, fragment id)`.
///
/// Staging a change snapshots the fragment's previous content so a failed
/// task can be rolled back to the last converged state. A later stage of the
/// same key replaces the snapshot, so reverts never reach past the most
/// recent change.
#[derive(Debug, Default)]
pub struct FragmentStore {
    inner: Mutex<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    fragments: HashMap<(String, String), Value>,
    /// Previous content per staged key; `None` means the key was absent.
    undo: HashMap<(String, String), Option<Value>>,
}

impl FragmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a change, snapshotting the previous content for revert.
    pub fn stage(&self, node: &str, change: &FragmentChange) {
        let mut inner = self.inner.lock().expect("fragment store poisoned");
        let key = (node.to_owned(), change.fragment_id().to_owned());

        let previous = inner.fragments.get(&key).cloned();
        inner.undo.insert(key.clone(), previous);

        match change {
            FragmentChange::Put(Fragment { content, .. }) => {
                inner.fragments.insert(key, content.clone());
            }
            FragmentChange::Remove(_) => {
                inner.fragments.remove(&key);
            }
        }
    }

    /// Restore a staged key to its snapshotted previous content.
    pub fn restore(&self, node: &str, fragment_id: &str) {
        let mut inner = self.inner.lock().expect("fragment store poisoned");
        let key = (node.to_owned(), fragment_id.to_owned());
        if let Some(previous) = inner.undo.remove(&key) {
            match previous {
                Some(content) => {
                    inner.fragments.insert(key, content);
                }
                None => {
                    inner.fragments.remove(&key);
                }
            }
        }
    }

    /// Current content of a fragment, if present.
    pub fn get(&self, node: &str, fragment_id: &str) -> Option<Value> {
        let inner = self.inner.lock().expect("fragment store poisoned");
        inner
            .fragments
            .get(&(node.to_owned(), fragment_id.to_owned()))
            .cloned()
    }

    /// All fragment ids currently rendered for a node, sorted.
    pub fn fragment_ids(&self, node: &str) -> Vec<String> {
        let inner = self.inner.lock().expect("fragment store poisoned");
        let mut ids: Vec<String> = inner
            .fragments
            .keys()
            .filter(|(n, _)| n == node)
            .map(|(_, id)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn put(id: &str, content: serde_json::Value) -> FragmentChange {
        FragmentChange::Put(Fragment {
            id: id.to_owned(),
            content,
        })
    }

    #[test]
    fn stage_makes_content_visible() {
        let store = FragmentStore::new();
        store.stage("n1", &put("/items/pkg", json!({"ensure": "installed"})));

        assert_eq!(
            store.get("n1", "/items/pkg"),
            Some(json!({"ensure": "installed"}))
        );
    }

    #[test]
    fn restore_removes_fragment_that_did_not_exist() {
        let store = FragmentStore::new();
        store.stage("n1", &put("/items/pkg", json!({"ensure": "installed"})));
        store.restore("n1", "/items/pkg");

        assert_eq!(store.get("n1", "/items/pkg"), None);
    }

    #[test]
    fn restore_brings_back_previous_content() {
        let store = FragmentStore::new();
        store.stage("n1", &put("/items/pkg", json!({"version": 1})));
        store.stage("n1", &put("/items/pkg", json!({"version": 2})));
        store.restore("n1", "/items/pkg");

        assert_eq!(store.get("n1", "/items/pkg"), Some(json!({"version": 1})));
    }

    #[test]
    fn staged_removal_restores_on_failure() {
        let store = FragmentStore::new();
        store.stage("n1", &put("/items/pkg", json!({"version": 1})));

        store.stage("n1", &FragmentChange::Remove("/items/pkg".to_owned()));
        assert_eq!(store.get("n1", "/items/pkg"), None);

        store.restore("n1", "/items/pkg");
        assert_eq!(store.get("n1", "/items/pkg"), Some(json!({"version": 1})));
    }

    #[test]
    fn restore_without_stage_is_noop() {
        let store = FragmentStore::new();
        store.stage("n1", &put("/items/pkg", json!({"version": 1})));
        store.restore("n1", "/items/other");

        assert_eq!(store.get("n1", "/items/pkg"), Some(json!({"version": 1})));
    }

    #[test]
    fn fragment_ids_are_per_node() {
        let store = FragmentStore::new();
        store.stage("n1", &put("/items/a", json!(1)));
        store.stage("n2", &put("/items/b", json!(2)));

        assert_eq!(store.fragment_ids("n1"), vec!["/items/a".to_owned()]);
        assert_eq!(store.fragment_ids("n2"), vec!["/items/b".to_owned()]);
    }
}
