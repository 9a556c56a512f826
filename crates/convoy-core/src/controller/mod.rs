//! Plan controller: the command surface (`create`, `run`, `stop`,
//! `remove`, `show`) and the plan state machine behind it.
//!
//! Every command validates legality against the plan's current state;
//! an illegal command is rejected with `InvalidRequestError` carrying a
//! fixed message and changes nothing, so retries are idempotent.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use convoy_db::models::PlanState;
use convoy_db::queries::ledger as ledger_db;
use convoy_db::queries::plans as plan_db;
use convoy_db::queries::tasks as task_db;

use crate::convergence::ConvergeConfig;
use crate::error::ApiError;
use crate::manifest::ManifestApplier;
use crate::model::ModelStore;
use crate::plan::{compiler, render, service, Plan};
use crate::plugin::PluginRegistry;
use crate::scheduler::{self, SchedulerContext, SchedulerResult};

pub const MSG_ALREADY_RUNNING: &str = "Plan already running";
pub const MSG_STILL_STOPPING: &str = "Previous plan is still stopping";
pub const MSG_RUNNING_OR_STOPPING: &str = "Plan is currently running or stopping";
pub const MSG_NOT_RUNNING: &str = "Plan not currently running";
pub const MSG_NOT_INITIAL: &str = "Plan not in initial state";
pub const MSG_REMOVE_RUNNING: &str = "Removing a running/stopping plan is not allowed";
pub const MSG_INVALID: &str = "Plan is invalid: model changed since the plan was created";
pub const MSG_NO_PLAN: &str = "Plan does not exist";

/// The plan controller: owns the compiled plan, the model handle, and the
/// scheduler collaborators.
pub struct PlanController {
    pool: SqlitePool,
    model: Arc<Mutex<ModelStore>>,
    registry: Arc<PluginRegistry>,
    applier: Arc<dyn ManifestApplier>,
    converge: ConvergeConfig,
    /// The in-memory compiled plan; rebuilt on demand after a restart.
    current: Mutex<Option<Plan>>,
    /// Cancellation handle for an in-process scheduler run.
    cancel: std::sync::Mutex<Option<CancellationToken>>,
    /// Plan-generation counter; bumped on every create.
    generation: AtomicI64,
}

impl PlanController {
    pub async fn new(
        pool: SqlitePool,
        model: Arc<Mutex<ModelStore>>,
        registry: Arc<PluginRegistry>,
        applier: Arc<dyn ManifestApplier>,
        converge: ConvergeConfig,
    ) -> Result<Self, ApiError> {
        let mut generation = 0;
        if let Some(record) = plan_db::current_plan(&pool).await? {
            generation = record.generation;
        }

        Ok(Self {
            pool,
            model,
            registry,
            applier,
            converge,
            current: Mutex::new(None),
            cancel: std::sync::Mutex::new(None),
            generation: AtomicI64::new(generation),
        })
    }

    /// Restart recovery, run once at service start: a plan persisted as
    /// running or stopping was interrupted, so it surfaces as `Stopped` and
    /// tasks caught `Running` are reset to `Initial` (the next compile
    /// re-includes them unmodified).
    ///
    /// Must not be called while another controller is executing the plan;
    /// a concurrent `stop_plan` goes through the state machine instead.
    pub async fn recover_interrupted(&self) -> Result<(), ApiError> {
        if let Some(record) = plan_db::recover_interrupted_plan(&self.pool).await? {
            let interrupted = task_db::reset_interrupted_tasks(&self.pool, record.id).await?;
            for task in &interrupted {
                tracing::warn!(
                    task = %task.description,
                    "task interrupted by service restart; reset to initial"
                );
            }
        }
        Ok(())
    }

    pub fn model(&self) -> Arc<Mutex<ModelStore>> {
        Arc::clone(&self.model)
    }

    /// The plan's current state as observed through the snapshot store.
    ///
    /// A settled plan whose model generation no longer matches the store is
    /// `Invalid`; the transition is applied lazily so a running plan is
    /// never force-invalidated mid-execution.
    pub async fn plan_state(&self) -> Result<Option<PlanState>, ApiError> {
        let Some(record) = plan_db::current_plan(&self.pool).await? else {
            return Ok(None);
        };

        let settled_mismatch = matches!(
            record.state,
            PlanState::Initial | PlanState::Stopped | PlanState::Failed
        ) && {
            let model = self.model.lock().await;
            model.generation() != record.model_generation
        };

        if settled_mismatch {
            plan_db::update_plan_state(&self.pool, record.id, PlanState::Invalid).await?;
            return Ok(Some(PlanState::Invalid));
        }

        Ok(Some(record.state))
    }

    /// Compile a new plan from the current model and the success ledger.
    pub async fn create_plan(&self) -> Result<(), ApiError> {
        match self.plan_state().await? {
            Some(PlanState::Running) => {
                return Err(ApiError::invalid_request(MSG_ALREADY_RUNNING));
            }
            Some(PlanState::Stopping) => {
                return Err(ApiError::invalid_request(MSG_STILL_STOPPING));
            }
            _ => {}
        }

        let plan = self.compile().await?;
        service::persist_plan(&self.pool, &plan)
            .await
            .map_err(ApiError::Internal)?;
        *self.current.lock().await = Some(plan);
        tracing::info!("plan created");
        Ok(())
    }

    async fn compile(&self) -> Result<Plan, ApiError> {
        let model = self.model.lock().await;
        let specs = self.registry.generate_tasks(&model.delta());
        let ledger = ledger_db::all_entries(&self.pool).await?;

        let mut plan = compiler::compile(&model, specs, &ledger)?;
        plan.generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(plan)
    }

    /// Run the plan's phases to a terminal state.
    pub async fn run_plan(&self) -> Result<SchedulerResult, ApiError> {
        match self.plan_state().await? {
            None => return Err(ApiError::invalid_request(MSG_NO_PLAN)),
            Some(PlanState::Initial) => {}
            Some(PlanState::Running) | Some(PlanState::Stopping) => {
                return Err(ApiError::invalid_request(MSG_RUNNING_OR_STOPPING));
            }
            Some(PlanState::Invalid) => {
                return Err(ApiError::invalid_request(MSG_INVALID));
            }
            Some(_) => return Err(ApiError::invalid_request(MSG_NOT_INITIAL)),
        }

        // After a restart there is no in-memory plan; the model is
        // unchanged (the plan is still Initial), so recompiling reproduces
        // the persisted snapshot.
        let mut guard = self.current.lock().await;
        if guard.is_none() {
            let record = plan_db::current_plan(&self.pool)
                .await?
                .ok_or_else(|| ApiError::invalid_request(MSG_NO_PLAN))?;
            let mut plan = self.compile().await?;
            plan.id = record.id;
            plan.generation = record.generation;
            self.generation.store(record.generation, Ordering::SeqCst);
            *guard = Some(plan);
        }
        let mut plan = guard.clone().expect("plan hydrated above");
        drop(guard);

        plan.state = PlanState::Running;
        plan_db::update_plan_state(&self.pool, plan.id, PlanState::Running).await?;

        let cancel = CancellationToken::new();
        *self.cancel.lock().expect("cancel lock poisoned") = Some(cancel.clone());

        let ctx = Arc::new(SchedulerContext {
            pool: self.pool.clone(),
            model: Arc::clone(&self.model),
            registry: Arc::clone(&self.registry),
            applier: Arc::clone(&self.applier),
            converge: self.converge,
        });

        let result = scheduler::run_plan_phases(&ctx, &plan, cancel).await?;

        *self.cancel.lock().expect("cancel lock poisoned") = None;

        // Discard the outcome if the plan was recreated while we ran
        // (stale generation); the snapshot belongs to the new plan.
        let record = plan_db::current_plan(&self.pool).await?;
        if let Some(record) = record {
            if record.id == plan.id && record.generation == plan.generation {
                plan_db::update_plan_state(&self.pool, plan.id, result.plan_state()).await?;
                let mut guard = self.current.lock().await;
                if let Some(current) = guard.as_mut() {
                    current.state = result.plan_state();
                }
            } else {
                tracing::warn!(
                    generation = plan.generation,
                    "plan was recreated during execution; discarding stale result"
                );
            }
        }

        tracing::info!(result = ?result, "plan run finished");
        Ok(result)
    }

    /// Request a stop: advisory at the phase boundary, not preemptive.
    pub async fn stop_plan(&self) -> Result<(), ApiError> {
        match self.plan_state().await? {
            None => return Err(ApiError::invalid_request(MSG_NO_PLAN)),
            Some(PlanState::Running) => {}
            Some(_) => return Err(ApiError::invalid_request(MSG_NOT_RUNNING)),
        }

        let record = plan_db::current_plan(&self.pool)
            .await?
            .ok_or_else(|| ApiError::invalid_request(MSG_NO_PLAN))?;
        plan_db::update_plan_state(&self.pool, record.id, PlanState::Stopping).await?;

        if let Some(cancel) = self.cancel.lock().expect("cancel lock poisoned").as_ref() {
            cancel.cancel();
        }

        tracing::info!("stop requested; running tasks will reach a terminal state");
        Ok(())
    }

    /// Remove the plan. The success ledger is kept.
    pub async fn remove_plan(&self) -> Result<(), ApiError> {
        match self.plan_state().await? {
            None => return Err(ApiError::invalid_request(MSG_NO_PLAN)),
            Some(PlanState::Running) | Some(PlanState::Stopping) => {
                return Err(ApiError::invalid_request(MSG_REMOVE_RUNNING));
            }
            Some(_) => {}
        }

        let record = plan_db::current_plan(&self.pool)
            .await?
            .ok_or_else(|| ApiError::invalid_request(MSG_NO_PLAN))?;
        plan_db::delete_plan(&self.pool, record.id).await?;
        *self.current.lock().await = None;
        tracing::info!("plan removed");
        Ok(())
    }

    /// Render the plan for display.
    pub async fn show_plan(&self) -> Result<String, ApiError> {
        let state = self.plan_state().await?.ok_or_else(ApiError::not_found)?;
        let Some((_, tasks)) = service::load_snapshot(&self.pool).await? else {
            return Err(ApiError::not_found());
        };
        Ok(render::render_plan(state, &tasks))
    }
}
