//! In-process manifest applier backed by a [`FragmentStore`].
//!
//! Used when no remote agent transport is configured: rendering mutates the
//! store directly and the node is considered converged as soon as the apply
//! is triggered. Remote transports implement [`ManifestApplier`] themselves.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use super::{FragmentChange, FragmentStore, ManifestApplier, PollStatus};

pub struct LocalApplier {
    store: Arc<FragmentStore>,
}

impl LocalApplier {
    pub fn new(store: Arc<FragmentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<FragmentStore> {
        &self.store
    }
}

#[async_trait]
impl ManifestApplier for LocalApplier {
    async fn render(&self, node: &str, change: FragmentChange) -> Result<()> {
        self.store.stage(node, &change);
        Ok(())
    }

    async fn apply(&self, _node: &str) -> Result<()> {
        Ok(())
    }

    async fn poll(&self, _node: &str) -> Result<PollStatus> {
        Ok(PollStatus::Idle)
    }

    async fn revert(&self, node: &str, fragment_id: &str) -> Result<()> {
        self.store.restore(node, fragment_id);
        Ok(())
    }
}
