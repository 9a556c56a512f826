//! Built-in plugin for generic resource items.
//!
//! Emits one configuration task per created or updated item, rendering the
//! item's properties into its manifest fragment. It deliberately emits no
//! deconfiguration task: removal of resources is covered by the compiler's
//! synthesized removal tasks, driven by the success ledger.

use serde_json::json;

use crate::manifest::{Fragment, FragmentChange};
use crate::model::{ModelDelta, ModelItem};

use super::trait_def::{ItemPlugin, TaskSpec};

pub struct ResourcePlugin;

impl ResourcePlugin {
    fn task_for(item: &ModelItem) -> TaskSpec {
        let node = item.node();
        let description = format!(
            "Configure {} \"{}\" on node \"{}\"",
            item.item_type,
            item.id(),
            node
        );
        let change = FragmentChange::Put(Fragment {
            id: item.path.clone(),
            content: json!({
                "type": item.item_type,
                "properties": item.properties,
            }),
        });
        TaskSpec::config(&item.path, node, description, change)
    }
}

#[async_trait::async_trait]
impl ItemPlugin for ResourcePlugin {
    fn name(&self) -> &str {
        "resource"
    }

    fn generate_tasks(&self, delta: &ModelDelta) -> Vec<TaskSpec> {
        delta
            .to_deploy()
            .filter(|item| item.item_type != "cluster")
            .map(Self::task_for)
            .collect()
    }
}
