//! CLI handlers for `convoy model` subcommands.
//!
//! The declarative model is described in a TOML document and synced into
//! the persisted model store; the store (with lifecycle states) lives in a
//! JSON file next to the database so state survives between invocations.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use convoy_core::model::ModelStore;

use crate::ModelCommands;

/// A declarative model document.
#[derive(Debug, Deserialize)]
pub struct ModelDoc {
    #[serde(default, rename = "item")]
    pub items: Vec<ItemDoc>,
}

#[derive(Debug, Deserialize)]
pub struct ItemDoc {
    pub path: String,
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Parse a model document from TOML.
pub fn parse_model_doc(contents: &str) -> Result<ModelDoc> {
    toml::from_str(contents).context("failed to parse model document")
}

/// Load the persisted model store, or an empty one if none exists yet.
pub fn load_model(path: &Path) -> Result<ModelStore> {
    if !path.exists() {
        return Ok(ModelStore::new());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read model store at {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse model store at {}", path.display()))
}

/// Persist the model store.
pub fn save_model(path: &Path, model: &ModelStore) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create model directory {}", dir.display()))?;
    }
    let contents = serde_json::to_string_pretty(model).context("failed to serialize model")?;
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write model store at {}", path.display()))?;
    Ok(())
}

/// Sync the store to match a declarative document: create missing items,
/// update changed ones, and mark items absent from the document for
/// removal.
pub fn sync_model(model: &mut ModelStore, doc: &ModelDoc) -> Result<SyncSummary> {
    let mut summary = SyncSummary::default();
    let desired: BTreeMap<&str, &ItemDoc> =
        doc.items.iter().map(|i| (i.path.as_str(), i)).collect();

    // Removals first: items in the store but not in the document.
    let existing: Vec<String> = model.items().map(|i| i.path.clone()).collect();
    for path in existing {
        if !desired.contains_key(path.as_str()) {
            model.remove_item(&path).map_err(anyhow::Error::new)?;
            summary.removed += 1;
        }
    }

    for item in &doc.items {
        match model.get(&item.path) {
            None => {
                model
                    .create_item(&item.path, &item.item_type, item.properties.clone())
                    .map_err(anyhow::Error::new)?;
                summary.created += 1;
            }
            Some(current) if current.properties != item.properties => {
                model
                    .update_item(&item.path, item.properties.clone())
                    .map_err(anyhow::Error::new)?;
                summary.updated += 1;
            }
            Some(_) => {}
        }
    }

    Ok(summary)
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
}

/// Dispatch a `ModelCommands` variant.
pub fn run_model_command(command: ModelCommands, model_path: &Path) -> Result<()> {
    match command {
        ModelCommands::Sync { file } => {
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read model document: {file}"))?;
            let doc = parse_model_doc(&contents)?;

            let mut model = load_model(model_path)?;
            let summary = sync_model(&mut model, &doc)?;
            save_model(model_path, &model)?;

            println!(
                "Model synced: {} created, {} updated, {} marked for removal",
                summary.created, summary.updated, summary.removed
            );
            Ok(())
        }
        ModelCommands::Show => {
            let model = load_model(model_path)?;
            for item in model.items() {
                let qualifier = if item.applied_properties_determinable {
                    ""
                } else {
                    " (deployment of properties indeterminable)"
                };
                println!("{}    {}    {}{}", item.state, item.item_type, item.path, qualifier);
            }
            Ok(())
        }
    }
}
