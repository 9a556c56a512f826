//! Tests for the convergence monitor: poll-count exhaustion with an exact
//! observation count, mid-poll convergence, rollback on failure, the
//! indeterminable-deployment qualifier, and the phase timeout.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;

use convoy_core::controller::PlanController;
use convoy_core::convergence::{self, ConvergeConfig, ConvergeError};
use convoy_core::manifest::{
    Fragment, FragmentChange, FragmentStore, ManifestApplier, PollStatus,
};
use convoy_core::model::ModelStore;
use convoy_core::plugin::{PluginRegistry, ResourcePlugin};
use convoy_core::scheduler::SchedulerResult;
use convoy_test_utils::create_test_db;

// ===========================================================================
// Mock appliers
// ===========================================================================

/// Applier whose polls follow a fixed script, counting every poll.
struct ScriptedApplier {
    store: Arc<FragmentStore>,
    script: Vec<PollStatus>,
    polls: AtomicU32,
}

impl ScriptedApplier {
    fn new(store: Arc<FragmentStore>, script: Vec<PollStatus>) -> Self {
        Self {
            store,
            script,
            polls: AtomicU32::new(0),
        }
    }

    fn poll_count(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ManifestApplier for ScriptedApplier {
    async fn render(&self, node: &str, change: FragmentChange) -> anyhow::Result<()> {
        self.store.stage(node, &change);
        Ok(())
    }

    async fn apply(&self, _node: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn poll(&self, _node: &str) -> anyhow::Result<PollStatus> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst) as usize;
        Ok(*self.script.get(n).unwrap_or(&PollStatus::Unreachable))
    }

    async fn revert(&self, node: &str, fragment_id: &str) -> anyhow::Result<()> {
        self.store.restore(node, fragment_id);
        Ok(())
    }
}

/// Applier whose polls hang until cancelled by the per-poll timeout.
struct HangingApplier {
    store: Arc<FragmentStore>,
}

#[async_trait]
impl ManifestApplier for HangingApplier {
    async fn render(&self, node: &str, change: FragmentChange) -> anyhow::Result<()> {
        self.store.stage(node, &change);
        Ok(())
    }

    async fn apply(&self, _node: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn poll(&self, _node: &str) -> anyhow::Result<PollStatus> {
        tokio::time::sleep(std::time::Duration::from_secs(86_400)).await;
        Ok(PollStatus::Idle)
    }

    async fn revert(&self, node: &str, fragment_id: &str) -> anyhow::Result<()> {
        self.store.restore(node, fragment_id);
        Ok(())
    }
}

fn put_change(id: &str) -> FragmentChange {
    FragmentChange::Put(Fragment {
        id: id.to_owned(),
        content: serde_json::json!({"ensure": "present"}),
    })
}

fn fast_converge(poll_count: i64) -> ConvergeConfig {
    ConvergeConfig {
        puppet_phase_timeout: 0,
        puppet_poll_frequency: 0,
        puppet_poll_count: poll_count,
        puppet_mco_timeout: 300,
    }
}

// ===========================================================================
// Monitor-level tests
// ===========================================================================

#[tokio::test]
async fn poll_exhaustion_observes_exactly_poll_count() {
    let store = Arc::new(FragmentStore::new());
    // Node goes unreachable and never recovers: with poll_count = 2 the
    // monitor makes exactly 2 polls, each counted as a not-applying
    // observation, then gives up once.
    let applier = ScriptedApplier::new(
        Arc::clone(&store),
        vec![PollStatus::Unreachable, PollStatus::Unreachable],
    );

    let err = convergence::run_config_task(&applier, &fast_converge(2), "n1", put_change("/f"))
        .await
        .unwrap_err();

    match err {
        ConvergeError::PollExhausted { observations } => assert_eq!(observations, 2),
        other => panic!("expected PollExhausted, got {other:?}"),
    }
    assert_eq!(applier.poll_count(), 2, "no extra poll after exhaustion");
}

#[tokio::test]
async fn converges_when_idle_arrives_mid_script() {
    let store = Arc::new(FragmentStore::new());
    let applier = ScriptedApplier::new(
        Arc::clone(&store),
        vec![PollStatus::Applying, PollStatus::Applying, PollStatus::Idle],
    );

    convergence::run_config_task(&applier, &fast_converge(5), "n1", put_change("/f"))
        .await
        .unwrap();

    assert_eq!(applier.poll_count(), 3, "stops polling once idle");
    assert!(store.get("n1", "/f").is_some());
}

#[tokio::test(start_paused = true)]
async fn hung_poll_is_bounded_by_mco_timeout() {
    let store = Arc::new(FragmentStore::new());
    let applier = HangingApplier {
        store: Arc::clone(&store),
    };

    // Each hung poll is cut off by puppet_mco_timeout and counted as a
    // not-applying observation.
    let err = convergence::run_config_task(&applier, &fast_converge(2), "n1", put_change("/f"))
        .await
        .unwrap_err();

    match err {
        ConvergeError::PollExhausted { observations } => assert_eq!(observations, 2),
        other => panic!("expected PollExhausted, got {other:?}"),
    }
}

// ===========================================================================
// Plan-level tests
// ===========================================================================

struct PlanFixture {
    db: convoy_test_utils::TestDb,
    model: Arc<AsyncMutex<ModelStore>>,
    store: Arc<FragmentStore>,
}

impl PlanFixture {
    async fn new() -> Self {
        let db = create_test_db().await;
        let model = Arc::new(AsyncMutex::new(ModelStore::new()));
        model
            .lock()
            .await
            .create_item(
                "/deployments/d/clusters/c1/nodes/n1/items/httpd",
                "package",
                BTreeMap::new(),
            )
            .unwrap();
        Self {
            db,
            model,
            store: Arc::new(FragmentStore::new()),
        }
    }

    async fn controller(
        &self,
        applier: Arc<dyn ManifestApplier>,
        converge: ConvergeConfig,
    ) -> PlanController {
        let mut registry = PluginRegistry::new();
        registry.register(ResourcePlugin);
        PlanController::new(
            self.db.pool.clone(),
            Arc::clone(&self.model),
            Arc::new(registry),
            applier,
            converge,
        )
        .await
        .expect("controller should construct")
    }
}

#[tokio::test]
async fn poll_exhaustion_fails_plan_and_rolls_back() {
    let fixture = PlanFixture::new().await;
    let applier = Arc::new(ScriptedApplier::new(
        Arc::clone(&fixture.store),
        vec![PollStatus::Unreachable, PollStatus::Unreachable],
    ));
    let controller = fixture
        .controller(applier.clone() as Arc<dyn ManifestApplier>, fast_converge(2))
        .await;

    controller.create_plan().await.unwrap();
    let result = controller.run_plan().await.unwrap();
    match result {
        SchedulerResult::Failed { failed_tasks } => {
            assert_eq!(failed_tasks.len(), 1);
        }
        other => panic!("expected Failed, got {other:?}"),
    }

    // Rolled back: the staged fragment is gone from the rendered manifest.
    assert!(
        fixture
            .store
            .get("n1", "/deployments/d/clusters/c1/nodes/n1/items/httpd")
            .is_none(),
        "failed task's fragment must be reverted"
    );

    // Apply was triggered but never confirmed: the item carries the
    // indeterminable qualifier instead of a clean state.
    let model = fixture.model.lock().await;
    let item = model
        .get("/deployments/d/clusters/c1/nodes/n1/items/httpd")
        .unwrap();
    assert!(!item.applied_properties_determinable);
}

// Real time (not `start_paused`): this test builds a real SQLite pool in
// setup, and a paused clock auto-advances to sqlx's acquire timeout before the
// blocking connection completes. The 1-second phase timeout still trips under
// real time, so the asserted behavior is unchanged.
#[tokio::test]
async fn phase_timeout_fails_hung_task() {
    let fixture = PlanFixture::new().await;
    let applier = Arc::new(HangingApplier {
        store: Arc::clone(&fixture.store),
    });
    // Generous poll budget; the 1-second phase timeout (plus the cleanup
    // allowance) trips long before the polls are exhausted.
    let converge = ConvergeConfig {
        puppet_phase_timeout: 1,
        puppet_poll_frequency: 0,
        puppet_poll_count: 1_000,
        puppet_mco_timeout: 900,
    };
    let controller = fixture
        .controller(applier as Arc<dyn ManifestApplier>, converge)
        .await;

    controller.create_plan().await.unwrap();
    let result = controller.run_plan().await.unwrap();
    match result {
        SchedulerResult::Failed { failed_tasks } => {
            assert_eq!(failed_tasks.len(), 1);
        }
        other => panic!("expected Failed, got {other:?}"),
    }
}
