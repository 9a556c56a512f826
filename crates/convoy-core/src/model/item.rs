use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a model item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// Created but never deployed.
    Initial,
    /// Deployed, then modified; redeployment pending.
    Updated,
    /// Marked for deletion; removed from the model once its
    /// deconfiguration task succeeds.
    ForRemoval,
    /// Deployed and converged.
    Applied,
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initial => "Initial",
            Self::Updated => "Updated",
            Self::ForRemoval => "ForRemoval",
            Self::Applied => "Applied",
        };
        f.write_str(s)
    }
}

/// An item in the declarative model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelItem {
    /// Model path, e.g. `/deployments/site/clusters/c1/nodes/n1/items/httpd`.
    pub path: String,
    pub item_type: String,
    pub properties: BTreeMap<String, String>,
    pub state: ItemState,
    /// Cleared when a deployment attempt left the item's on-node state
    /// unknown (applied was triggered but no terminal observation arrived).
    pub applied_properties_determinable: bool,
}

impl ModelItem {
    pub fn new(
        path: impl Into<String>,
        item_type: impl Into<String>,
        properties: BTreeMap<String, String>,
    ) -> Self {
        Self {
            path: path.into(),
            item_type: item_type.into(),
            properties,
            state: ItemState::Initial,
            applied_properties_determinable: true,
        }
    }

    /// The item's short id: the last path segment.
    pub fn id(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Target node extracted from the path (`…/nodes/<node>/…`), or the
    /// management server for items outside any node.
    pub fn node(&self) -> String {
        path_segment_after(&self.path, "nodes").unwrap_or_else(|| "ms".to_owned())
    }

    /// Execution subtree: the cluster path prefix for clustered items, or
    /// the management-server root otherwise.
    pub fn subtree(&self) -> String {
        subtree_of_path(&self.path)
    }

    /// Declared inter-item creation dependency (`requires` property):
    /// this item is configured after the referenced item.
    pub fn requires(&self) -> Option<&str> {
        self.properties.get("requires").map(String::as_str)
    }

    /// Declared subtree ordering for cluster items (`dependency_list`
    /// property, comma-separated sibling cluster ids).
    pub fn dependency_list(&self) -> Vec<String> {
        self.properties
            .get("dependency_list")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// The cluster prefix of a model path, or the management-server root.
pub(crate) fn subtree_of_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if let Some(pos) = segments.iter().position(|s| *s == "clusters") {
        if pos + 1 < segments.len() {
            return format!("/{}", segments[..=pos + 1].join("/"));
        }
    }
    "/ms".to_owned()
}

fn path_segment_after(path: &str, marker: &str) -> Option<String> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let pos = segments.iter().position(|s| *s == marker)?;
    segments.get(pos + 1).map(|s| (*s).to_owned())
}
