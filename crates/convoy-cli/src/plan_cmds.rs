//! CLI handlers for the plan commands: `create`, `run`, `stop`, `remove`,
//! and `show`.
//!
//! Each invocation builds a [`PlanController`] over the persisted model
//! store and snapshot database, runs one command, and writes the model
//! store back (task execution moves item lifecycle states).

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;

use convoy_core::controller::PlanController;
use convoy_core::error::ApiError;
use convoy_core::manifest::{FragmentStore, LocalApplier};
use convoy_core::plugin::{PluginRegistry, ResourcePlugin};
use convoy_core::scheduler::SchedulerResult;
use convoy_db::pool;

use crate::config::ConvoyConfig;
use crate::model_cmds::{load_model, save_model};
use crate::PlanCommands;

/// Exit status for a plan command: `Ok` on success, the API error
/// otherwise. The caller prints `<kind>    <message>` so external tooling
/// can match on the literal kind names.
pub async fn run_plan_command(
    command: PlanCommands,
    config: &ConvoyConfig,
) -> Result<(), ApiError> {
    let db_pool = pool::create_pool(&config.db_config)
        .await
        .map_err(ApiError::Internal)?;
    pool::run_migrations(&db_pool)
        .await
        .map_err(ApiError::Internal)?;

    let model = Arc::new(Mutex::new(
        load_model(&config.model_path).map_err(ApiError::Internal)?,
    ));

    let mut registry = PluginRegistry::new();
    registry.register(ResourcePlugin);

    let applier = Arc::new(LocalApplier::new(Arc::new(FragmentStore::new())));

    let controller = PlanController::new(
        db_pool.clone(),
        Arc::clone(&model),
        Arc::new(registry),
        applier,
        config.converge,
    )
    .await?;

    // Restart recovery belongs to the commands that own execution; a
    // cross-process `stop` must observe the live run's state untouched.
    if matches!(command, PlanCommands::Create | PlanCommands::Run) {
        controller.recover_interrupted().await?;
    }

    let result = dispatch(command, &controller).await;

    // Task execution moves item lifecycle states; persist them regardless
    // of the command outcome.
    save_and_close(&config.model_path, &model, db_pool).await?;

    result
}

async fn dispatch(command: PlanCommands, controller: &PlanController) -> Result<(), ApiError> {
    match command {
        PlanCommands::Create => {
            controller.create_plan().await?;
            println!("Plan created successfully");
            Ok(())
        }
        PlanCommands::Run => {
            let result = controller.run_plan().await?;
            match result {
                SchedulerResult::Successful => println!("Plan completed successfully"),
                SchedulerResult::Stopped => println!("Plan stopped"),
                SchedulerResult::Failed { failed_tasks } => {
                    println!("Plan failed; {} task(s) failed:", failed_tasks.len());
                    for task in failed_tasks {
                        println!("  {task}");
                    }
                }
            }
            Ok(())
        }
        PlanCommands::Stop => {
            controller.stop_plan().await?;
            println!("Plan stopping");
            Ok(())
        }
        PlanCommands::Remove => {
            controller.remove_plan().await?;
            println!("Plan removed");
            Ok(())
        }
        PlanCommands::Show => {
            let rendered = controller.show_plan().await?;
            print!("{rendered}");
            Ok(())
        }
    }
}

async fn save_and_close(
    model_path: &Path,
    model: &Arc<Mutex<convoy_core::model::ModelStore>>,
    db_pool: sqlx::SqlitePool,
) -> Result<(), ApiError> {
    {
        let model = model.lock().await;
        save_model(model_path, &model).map_err(ApiError::Internal)?;
    }
    db_pool.close().await;
    Ok(())
}
