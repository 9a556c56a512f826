//! Tests for the plan controller state machine: command legality per plan
//! state, fixed rejection messages, idempotent recreation, and ledger
//! interaction across plan lifecycles.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use convoy_core::controller::{
    PlanController, MSG_INVALID, MSG_NOT_INITIAL, MSG_NOT_RUNNING, MSG_NO_PLAN,
};
use convoy_core::convergence::ConvergeConfig;
use convoy_core::manifest::{
    FragmentChange, FragmentStore, LocalApplier, ManifestApplier, PollStatus,
};
use convoy_core::model::{ModelDelta, ModelStore};
use convoy_core::plugin::{ItemPlugin, PluginRegistry, ResourcePlugin, TaskSpec};
use convoy_core::scheduler::SchedulerResult;
use convoy_db::queries::ledger as ledger_db;
use convoy_test_utils::{create_test_db, TestDb};

// ===========================================================================
// Test harness
// ===========================================================================

struct TestHarness {
    db: TestDb,
    model: Arc<Mutex<ModelStore>>,
    store: Arc<FragmentStore>,
}

impl TestHarness {
    async fn new() -> Self {
        Self {
            db: create_test_db().await,
            model: Arc::new(Mutex::new(ModelStore::new())),
            store: Arc::new(FragmentStore::new()),
        }
    }

    async fn controller(&self) -> PlanController {
        let mut registry = PluginRegistry::new();
        registry.register(ResourcePlugin);
        self.controller_with(registry, Arc::new(LocalApplier::new(Arc::clone(&self.store))))
            .await
    }

    async fn controller_with(
        &self,
        registry: PluginRegistry,
        applier: Arc<dyn ManifestApplier>,
    ) -> PlanController {
        PlanController::new(
            self.db.pool.clone(),
            Arc::clone(&self.model),
            Arc::new(registry),
            applier,
            test_converge(),
        )
        .await
        .expect("controller should construct")
    }

    async fn add_item(&self, path: &str, props: &[(&str, &str)]) {
        let props: BTreeMap<String, String> = props
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        self.model
            .lock()
            .await
            .create_item(path, "package", props)
            .expect("item should create");
    }
}

fn test_converge() -> ConvergeConfig {
    ConvergeConfig {
        puppet_phase_timeout: 0,
        puppet_poll_frequency: 0,
        puppet_poll_count: 3,
        puppet_mco_timeout: 300,
    }
}

// ===========================================================================
// Mock collaborators
// ===========================================================================

/// Applier whose polls never converge for the configured nodes.
struct UnreachableNodesApplier {
    store: Arc<FragmentStore>,
    unreachable: Vec<String>,
}

#[async_trait]
impl ManifestApplier for UnreachableNodesApplier {
    async fn render(&self, node: &str, change: FragmentChange) -> anyhow::Result<()> {
        self.store.stage(node, &change);
        Ok(())
    }

    async fn apply(&self, _node: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn poll(&self, node: &str) -> anyhow::Result<PollStatus> {
        if self.unreachable.iter().any(|n| n == node) {
            Ok(PollStatus::Unreachable)
        } else {
            Ok(PollStatus::Idle)
        }
    }

    async fn revert(&self, node: &str, fragment_id: &str) -> anyhow::Result<()> {
        self.store.restore(node, fragment_id);
        Ok(())
    }
}

/// Plugin that emits one non-persisted callback task per item, applied or
/// not -- the shape of always-run work like node locks.
struct LockStepPlugin;

#[async_trait]
impl ItemPlugin for LockStepPlugin {
    fn name(&self) -> &str {
        "lockstep"
    }

    fn generate_tasks(&self, delta: &ModelDelta) -> Vec<TaskSpec> {
        delta
            .to_deploy()
            .chain(delta.applied.iter())
            .filter(|item| item.item_type != "cluster")
            .map(|item| {
                TaskSpec::callback(
                    &item.path,
                    item.node(),
                    format!("Lock node \"{}\"", item.node()),
                    "lock",
                )
                .not_persisted()
            })
            .collect()
    }

    async fn run_callback(&self, handler: &str, _item: &str, _node: &str) -> anyhow::Result<()> {
        anyhow::ensure!(handler == "lock", "unknown handler {handler:?}");
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn commands_without_plan_are_rejected() {
    let harness = TestHarness::new().await;
    let controller = harness.controller().await;

    for err in [
        controller.run_plan().await.unwrap_err(),
        controller.stop_plan().await.unwrap_err(),
        controller.remove_plan().await.unwrap_err(),
    ] {
        assert_eq!(err.kind(), "InvalidRequestError");
        assert_eq!(err.to_string(), MSG_NO_PLAN);
    }

    let err = controller.show_plan().await.unwrap_err();
    assert_eq!(err.kind(), "InvalidLocationError");
    assert_eq!(err.to_string(), "Not found");
}

#[tokio::test]
async fn create_with_empty_model_is_do_nothing() {
    let harness = TestHarness::new().await;
    let controller = harness.controller().await;

    let err = controller.create_plan().await.unwrap_err();
    assert_eq!(err.kind(), "DoNothingPlanError");
    assert_eq!(
        err.to_string(),
        "Create plan failed: no tasks were generated"
    );
}

#[tokio::test]
async fn create_renders_phases_with_desc_fields() {
    let harness = TestHarness::new().await;
    harness.add_item("/ms/items/base", &[]).await;
    harness
        .add_item("/ms/items/app", &[("requires", "/ms/items/base")])
        .await;
    let controller = harness.controller().await;

    controller.create_plan().await.unwrap();
    let rendered = controller.show_plan().await.unwrap();

    assert!(rendered.contains("Phase 1\n"));
    assert!(rendered.contains("Phase 2\n"));
    assert!(rendered.contains("DESC: Configure package \"base\" on node \"ms\""));
    assert!(rendered.contains("DESC: Configure package \"app\" on node \"ms\""));
    assert!(rendered.contains("Plan Status: Initial\n"));
}

#[tokio::test]
async fn create_twice_is_byte_identical() {
    let harness = TestHarness::new().await;
    harness.add_item("/ms/items/base", &[]).await;
    harness
        .add_item("/ms/items/app", &[("requires", "/ms/items/base")])
        .await;
    let controller = harness.controller().await;

    controller.create_plan().await.unwrap();
    let first = controller.show_plan().await.unwrap();

    controller.create_plan().await.unwrap();
    let second = controller.show_plan().await.unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn successful_run_then_illegal_commands() {
    let harness = TestHarness::new().await;
    harness.add_item("/ms/items/httpd", &[]).await;
    let controller = harness.controller().await;

    controller.create_plan().await.unwrap();
    let result = controller.run_plan().await.unwrap();
    assert_eq!(result, SchedulerResult::Successful);

    let rendered = controller.show_plan().await.unwrap();
    assert!(rendered.contains("Task: Success"));
    assert!(rendered.contains("Plan Status: Successful\n"));

    let err = controller.run_plan().await.unwrap_err();
    assert_eq!(err.to_string(), MSG_NOT_INITIAL);

    let err = controller.stop_plan().await.unwrap_err();
    assert_eq!(err.to_string(), MSG_NOT_RUNNING);

    // No model change since the successful run: nothing to do.
    let err = controller.create_plan().await.unwrap_err();
    assert_eq!(err.kind(), "DoNothingPlanError");
}

#[tokio::test]
async fn successful_run_records_ledger_and_applies_items() {
    let harness = TestHarness::new().await;
    harness.add_item("/ms/items/httpd", &[]).await;
    let controller = harness.controller().await;

    controller.create_plan().await.unwrap();
    controller.run_plan().await.unwrap();

    let entries = ledger_db::all_entries(&harness.db.pool).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].description,
        "Configure package \"httpd\" on node \"ms\""
    );

    let model = harness.model.lock().await;
    let item = model.get("/ms/items/httpd").unwrap();
    assert_eq!(item.state, convoy_core::model::ItemState::Applied);

    // The fragment was rendered for the node.
    assert!(harness.store.get("ms", "/ms/items/httpd").is_some());
}

#[tokio::test]
async fn model_change_invalidates_settled_plan() {
    let harness = TestHarness::new().await;
    harness.add_item("/ms/items/httpd", &[]).await;
    let controller = harness.controller().await;

    controller.create_plan().await.unwrap();

    harness
        .model
        .lock()
        .await
        .update_item(
            "/ms/items/httpd",
            BTreeMap::from([("version".to_owned(), "2".to_owned())]),
        )
        .unwrap();

    let state = controller.plan_state().await.unwrap();
    assert_eq!(state, Some(convoy_db::models::PlanState::Invalid));

    let err = controller.run_plan().await.unwrap_err();
    assert_eq!(err.to_string(), MSG_INVALID);

    // Recreate from the invalid state is allowed.
    controller.create_plan().await.unwrap();
    controller.run_plan().await.unwrap();
}

#[tokio::test]
async fn remove_plan_keeps_ledger() {
    let harness = TestHarness::new().await;
    harness.add_item("/ms/items/httpd", &[]).await;
    let controller = harness.controller().await;

    controller.create_plan().await.unwrap();
    controller.run_plan().await.unwrap();
    controller.remove_plan().await.unwrap();

    let err = controller.show_plan().await.unwrap_err();
    assert_eq!(err.to_string(), "Not found");

    let entries = ledger_db::all_entries(&harness.db.pool).await.unwrap();
    assert_eq!(entries.len(), 1, "ledger must survive plan removal");
}

#[tokio::test]
async fn failed_task_reappears_verbatim_in_next_plan() {
    let harness = TestHarness::new().await;
    harness
        .add_item("/deployments/d/clusters/c1/nodes/n1/items/httpd", &[])
        .await;
    harness
        .add_item("/deployments/d/clusters/c1/nodes/n2/items/vim", &[])
        .await;

    let mut registry = PluginRegistry::new();
    registry.register(ResourcePlugin);
    let applier = Arc::new(UnreachableNodesApplier {
        store: Arc::clone(&harness.store),
        unreachable: vec!["n1".to_owned()],
    });
    let controller = harness.controller_with(registry, applier).await;

    controller.create_plan().await.unwrap();
    let result = controller.run_plan().await.unwrap();
    match result {
        SchedulerResult::Failed { failed_tasks } => {
            assert_eq!(
                failed_tasks,
                vec!["Configure package \"httpd\" on node \"n1\"".to_owned()]
            );
        }
        other => panic!("expected Failed, got {other:?}"),
    }

    let rendered = controller.show_plan().await.unwrap();
    assert!(rendered.contains("Task: Failed    n1"));
    assert!(rendered.contains("Plan Status: Failed\n"));

    // The failed task reappears verbatim; the successful one is suppressed.
    controller.create_plan().await.unwrap();
    let rendered = controller.show_plan().await.unwrap();
    assert!(rendered.contains("DESC: Configure package \"httpd\" on node \"n1\""));
    assert!(!rendered.contains("DESC: Configure package \"vim\" on node \"n2\""));
}

#[tokio::test]
async fn non_persisted_task_reappears_after_success() {
    let harness = TestHarness::new().await;
    harness.add_item("/ms/items/httpd", &[]).await;

    let mut registry = PluginRegistry::new();
    registry.register(ResourcePlugin);
    registry.register(LockStepPlugin);
    let applier = Arc::new(LocalApplier::new(Arc::clone(&harness.store)));
    let controller = harness.controller_with(registry, applier).await;

    controller.create_plan().await.unwrap();
    let result = controller.run_plan().await.unwrap();
    assert_eq!(result, SchedulerResult::Successful);

    // The lock task succeeded but is not ledger-persisted; recreating the
    // plan re-includes it while the config task stays suppressed.
    controller.create_plan().await.unwrap();
    let rendered = controller.show_plan().await.unwrap();
    assert!(rendered.contains("DESC: Lock node \"ms\""));
    assert!(!rendered.contains("DESC: Configure package \"httpd\" on node \"ms\""));
}

/// Plugin that emits a two-task chain joined by an ordered-list link.
struct ChainPlugin;

#[async_trait]
impl ItemPlugin for ChainPlugin {
    fn name(&self) -> &str {
        "chain"
    }

    fn generate_tasks(&self, delta: &ModelDelta) -> Vec<TaskSpec> {
        let mut specs = Vec::new();
        for item in delta.to_deploy() {
            let node = item.node();
            let first = format!("First step for \"{}\"", item.id());
            let second = format!("Second step for \"{}\"", item.id());
            specs.push(TaskSpec::callback(&item.path, &node, &first, "step"));
            specs.push(TaskSpec::ordered_link(
                &item.path,
                &node,
                format!("Chain link for \"{}\"", item.id()),
                vec![first.clone()],
            ));
            specs.push(
                TaskSpec::callback(&item.path, &node, &second, "step")
                    .after(format!("Chain link for \"{}\"", item.id())),
            );
        }
        specs
    }

    async fn run_callback(&self, handler: &str, _item: &str, _node: &str) -> anyhow::Result<()> {
        anyhow::ensure!(handler == "step", "unknown handler {handler:?}");
        Ok(())
    }
}

#[tokio::test]
async fn ordered_list_link_chains_tasks_across_phases() {
    let harness = TestHarness::new().await;
    harness.add_item("/ms/items/httpd", &[]).await;

    let mut registry = PluginRegistry::new();
    registry.register(ChainPlugin);
    let applier = Arc::new(LocalApplier::new(Arc::clone(&harness.store)));
    let controller = harness.controller_with(registry, applier).await;

    controller.create_plan().await.unwrap();
    let rendered = controller.show_plan().await.unwrap();

    // The artificial link occupies its own rank between the two steps.
    assert!(rendered.contains("Phase 1\n"));
    assert!(rendered.contains("Phase 2\n"));
    assert!(rendered.contains("Phase 3\n"));
    assert!(rendered.contains("DESC: Chain link for \"httpd\""));

    let result = controller.run_plan().await.unwrap();
    assert_eq!(result, SchedulerResult::Successful);
}

#[tokio::test]
async fn removal_plan_deletes_item_and_ledger_entries() {
    let harness = TestHarness::new().await;
    harness.add_item("/ms/items/httpd", &[]).await;
    let controller = harness.controller().await;

    controller.create_plan().await.unwrap();
    controller.run_plan().await.unwrap();

    harness
        .model
        .lock()
        .await
        .remove_item("/ms/items/httpd")
        .unwrap();

    controller.create_plan().await.unwrap();
    let rendered = controller.show_plan().await.unwrap();
    assert!(rendered.contains("DESC: Remove Item's resource from node \"ms\" puppet"));

    let result = controller.run_plan().await.unwrap();
    assert_eq!(result, SchedulerResult::Successful);

    let model = harness.model.lock().await;
    assert!(model.get("/ms/items/httpd").is_none(), "item fully deleted");
    drop(model);

    let entries = ledger_db::all_entries(&harness.db.pool).await.unwrap();
    assert!(entries.is_empty(), "ledger entries for the item are cleared");

    // The fragment was removed from the node's rendered manifest.
    assert!(harness.store.get("ms", "/ms/items/httpd").is_none());
}
