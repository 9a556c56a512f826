//! Manifest layer: the rendered-configuration surface between the engine
//! and the external configuration-application agents.
//!
//! Rendered configuration is modeled as an explicit, queryable per-node
//! fragment store keyed by `(node, fragment id)` rather than flat manifest
//! files, so a revert is a key restore instead of textual patching.

pub mod local;
pub mod store;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use local::LocalApplier;
pub use store::FragmentStore;

/// A rendered manifest fragment for one model item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// Stable key within the node's manifest; by convention the owning
    /// model item's path.
    pub id: String,
    pub content: serde_json::Value,
}

/// A pending change to a node's rendered manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FragmentChange {
    /// Add or replace a fragment.
    Put(Fragment),
    /// Remove a fragment by id (deconfiguration).
    Remove(String),
}

impl FragmentChange {
    /// The fragment id this change targets.
    pub fn fragment_id(&self) -> &str {
        match self {
            Self::Put(fragment) => &fragment.id,
            Self::Remove(id) => id,
        }
    }
}

/// Observation returned by polling a node's convergence agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// The agent is idle and the node's configuration matches the rendered
    /// manifest.
    Idle,
    /// The agent is still applying configuration.
    Applying,
    /// The agent did not respond.
    Unreachable,
}

/// The external configuration-application layer.
///
/// Real transports (remote agent buses) implement this trait outside the
/// engine; [`LocalApplier`] provides the in-process implementation backed
/// by a [`FragmentStore`].
#[async_trait]
pub trait ManifestApplier: Send + Sync {
    /// Stage a fragment change into the node's rendered manifest.
    async fn render(&self, node: &str, change: FragmentChange) -> Result<()>;

    /// Trigger application of the node's rendered manifest.
    async fn apply(&self, node: &str) -> Result<()>;

    /// Poll the node's convergence agent once.
    async fn poll(&self, node: &str) -> Result<PollStatus>;

    /// Restore the fragment to its last successfully-converged content,
    /// undoing a change staged by [`ManifestApplier::render`].
    async fn revert(&self, node: &str, fragment_id: &str) -> Result<()>;
}
