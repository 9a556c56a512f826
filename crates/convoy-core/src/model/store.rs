use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ApiError;

use super::{ItemState, ModelItem};

/// The model as seen by task generation: items grouped by the kind of work
/// their lifecycle state calls for.
#[derive(Debug, Clone, Default)]
pub struct ModelDelta {
    /// Items in `Initial` state (never deployed).
    pub created: Vec<ModelItem>,
    /// Items in `Updated` state (redeployment pending).
    pub updated: Vec<ModelItem>,
    /// Items in `ForRemoval` state (deconfiguration pending).
    pub removed: Vec<ModelItem>,
    /// Items already `Applied`. Plugins that emit always-run tasks (locks,
    /// reboots) generate from these too; the ledger suppresses the
    /// persisted ones that already succeeded.
    pub applied: Vec<ModelItem>,
}

impl ModelDelta {
    /// True when no item has pending work.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Created and updated items together, in model order.
    pub fn to_deploy(&self) -> impl Iterator<Item = &ModelItem> {
        self.created.iter().chain(self.updated.iter())
    }
}

/// In-memory model store with a generation counter.
///
/// User mutations (create/update/remove) bump the generation, which is what
/// plan invalidation compares against. Lifecycle transitions driven by task
/// execution (`set_applied`, `finalize_removal`, `mark_indeterminable`) do
/// not: converging the model is not a model change.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ModelStore {
    items: BTreeMap<String, ModelItem>,
    generation: i64,
}

impl ModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> i64 {
        self.generation
    }

    pub fn get(&self, path: &str) -> Option<&ModelItem> {
        self.items.get(path)
    }

    pub fn items(&self) -> impl Iterator<Item = &ModelItem> {
        self.items.values()
    }

    /// Create an item in `Initial` state.
    pub fn create_item(
        &mut self,
        path: impl Into<String>,
        item_type: impl Into<String>,
        properties: BTreeMap<String, String>,
    ) -> Result<(), ApiError> {
        let path = path.into();
        if self.items.contains_key(&path) {
            return Err(ApiError::invalid_request(format!(
                "Item already exists at {path}"
            )));
        }
        self.items
            .insert(path.clone(), ModelItem::new(path, item_type, properties));
        self.generation += 1;
        Ok(())
    }

    /// Update an item's properties. An `Applied` item becomes `Updated`; an
    /// `Initial` item stays `Initial` with the new properties.
    pub fn update_item(
        &mut self,
        path: &str,
        properties: BTreeMap<String, String>,
    ) -> Result<(), ApiError> {
        let item = self.items.get_mut(path).ok_or_else(ApiError::not_found)?;
        for (key, value) in properties {
            item.properties.insert(key, value);
        }
        if item.state == ItemState::Applied {
            item.state = ItemState::Updated;
        }
        self.generation += 1;
        Ok(())
    }

    /// Mark an item for removal. A never-deployed `Initial` item is dropped
    /// immediately; a deployed item waits for its deconfiguration task.
    pub fn remove_item(&mut self, path: &str) -> Result<(), ApiError> {
        let item = self.items.get_mut(path).ok_or_else(ApiError::not_found)?;
        if item.state == ItemState::Initial {
            self.items.remove(path);
        } else {
            item.state = ItemState::ForRemoval;
        }
        self.generation += 1;
        Ok(())
    }

    /// Items grouped by the kind of work their state calls for.
    pub fn delta(&self) -> ModelDelta {
        let mut delta = ModelDelta::default();
        for item in self.items.values() {
            match item.state {
                ItemState::Initial => delta.created.push(item.clone()),
                ItemState::Updated => delta.updated.push(item.clone()),
                ItemState::ForRemoval => delta.removed.push(item.clone()),
                ItemState::Applied => delta.applied.push(item.clone()),
            }
        }
        delta
    }

    // -- lifecycle transitions driven by task execution (no generation bump)

    /// The item's configuration converged on its node.
    pub fn set_applied(&mut self, path: &str) {
        if let Some(item) = self.items.get_mut(path) {
            item.state = ItemState::Applied;
            item.applied_properties_determinable = true;
        }
    }

    /// The item's deconfiguration task succeeded; delete it from the model.
    pub fn finalize_removal(&mut self, path: &str) {
        self.items.remove(path);
    }

    /// A deployment attempt left the item's on-node state unknown.
    pub fn mark_indeterminable(&mut self, path: &str) {
        if let Some(item) = self.items.get_mut(path) {
            item.applied_properties_determinable = false;
        }
    }

    /// Cluster subtree ordering: map of cluster subtree path to the subtree
    /// paths it depends on, from `dependency_list` on cluster items.
    pub fn cluster_dependencies(&self) -> BTreeMap<String, Vec<String>> {
        let mut deps = BTreeMap::new();
        for item in self.items.values() {
            if item.item_type != "cluster" {
                continue;
            }
            let list = item.dependency_list();
            if list.is_empty() {
                continue;
            }
            // dependency_list holds sibling cluster ids; resolve them to
            // full cluster paths under the same parent.
            let parent = match item.path.rfind('/') {
                Some(pos) => &item.path[..pos],
                None => continue,
            };
            let resolved: Vec<String> = list
                .into_iter()
                .map(|id| format!("{parent}/{id}"))
                .filter(|path| path != &item.path)
                .collect();
            if !resolved.is_empty() {
                deps.insert(item.path.clone(), resolved);
            }
        }
        deps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn create_bumps_generation() {
        let mut store = ModelStore::new();
        assert_eq!(store.generation(), 0);
        store
            .create_item("/ms/items/httpd", "package", props(&[("name", "httpd")]))
            .unwrap();
        assert_eq!(store.generation(), 1);
        assert_eq!(store.get("/ms/items/httpd").unwrap().state, ItemState::Initial);
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let mut store = ModelStore::new();
        store
            .create_item("/ms/items/httpd", "package", BTreeMap::new())
            .unwrap();
        let err = store
            .create_item("/ms/items/httpd", "package", BTreeMap::new())
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidRequestError");
    }

    #[test]
    fn update_applied_item_becomes_updated() {
        let mut store = ModelStore::new();
        store
            .create_item("/ms/items/httpd", "package", BTreeMap::new())
            .unwrap();
        store.set_applied("/ms/items/httpd");

        store
            .update_item("/ms/items/httpd", props(&[("version", "2")]))
            .unwrap();
        assert_eq!(store.get("/ms/items/httpd").unwrap().state, ItemState::Updated);
    }

    #[test]
    fn update_missing_item_is_not_found() {
        let mut store = ModelStore::new();
        let err = store.update_item("/ms/items/nope", BTreeMap::new()).unwrap_err();
        assert_eq!(err.kind(), "InvalidLocationError");
        assert_eq!(err.to_string(), "Not found");
    }

    #[test]
    fn remove_initial_item_drops_it() {
        let mut store = ModelStore::new();
        store
            .create_item("/ms/items/httpd", "package", BTreeMap::new())
            .unwrap();
        store.remove_item("/ms/items/httpd").unwrap();
        assert!(store.get("/ms/items/httpd").is_none());
    }

    #[test]
    fn remove_applied_item_marks_for_removal() {
        let mut store = ModelStore::new();
        store
            .create_item("/ms/items/httpd", "package", BTreeMap::new())
            .unwrap();
        store.set_applied("/ms/items/httpd");
        store.remove_item("/ms/items/httpd").unwrap();
        assert_eq!(
            store.get("/ms/items/httpd").unwrap().state,
            ItemState::ForRemoval
        );
    }

    #[test]
    fn lifecycle_transitions_do_not_bump_generation() {
        let mut store = ModelStore::new();
        store
            .create_item("/ms/items/httpd", "package", BTreeMap::new())
            .unwrap();
        let generation = store.generation();

        store.set_applied("/ms/items/httpd");
        store.mark_indeterminable("/ms/items/httpd");
        store.finalize_removal("/ms/items/httpd");
        assert_eq!(store.generation(), generation);
    }

    #[test]
    fn delta_groups_by_state() {
        let mut store = ModelStore::new();
        store
            .create_item("/ms/items/a", "package", BTreeMap::new())
            .unwrap();
        store
            .create_item("/ms/items/b", "package", BTreeMap::new())
            .unwrap();
        store.set_applied("/ms/items/b");
        store.remove_item("/ms/items/b").unwrap();

        let delta = store.delta();
        assert_eq!(delta.created.len(), 1);
        assert_eq!(delta.updated.len(), 0);
        assert_eq!(delta.removed.len(), 1);
        assert!(!delta.is_empty());
    }

    #[test]
    fn cluster_dependencies_resolve_sibling_ids() {
        let mut store = ModelStore::new();
        store
            .create_item("/deployments/site/clusters/c1", "cluster", BTreeMap::new())
            .unwrap();
        store
            .create_item(
                "/deployments/site/clusters/c2",
                "cluster",
                props(&[("dependency_list", "c1")]),
            )
            .unwrap();

        let deps = store.cluster_dependencies();
        assert_eq!(
            deps.get("/deployments/site/clusters/c2").unwrap(),
            &vec!["/deployments/site/clusters/c1".to_owned()]
        );
        assert!(!deps.contains_key("/deployments/site/clusters/c1"));
    }
}
