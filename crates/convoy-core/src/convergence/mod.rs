//! Convergence monitor: drives a configuration task through render, apply,
//! and polling, bounded by the four convergence parameters.
//!
//! The parameters are read at service start from the daemon configuration
//! file and validated against their documented ranges; the service must not
//! start with an out-of-range value.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error};

use crate::manifest::{FragmentChange, ManifestApplier, PollStatus};

/// Extra time a phase is allowed beyond `puppet_phase_timeout` so tasks can
/// reach a clean terminal state before being failed.
pub const PHASE_CLEANUP_ALLOWANCE_SECS: u64 = 60;

/// The four convergence parameters from the daemon configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergeConfig {
    /// Wall-time budget per phase in seconds, [0, 604800]; 0 disables the
    /// phase timeout.
    pub puppet_phase_timeout: i64,
    /// Seconds between polls: 0 (poll back-to-back) or [60, 3600].
    pub puppet_poll_frequency: i64,
    /// Number of polls before giving up, [1, 1000].
    pub puppet_poll_count: i64,
    /// Per-poll remote-agent timeout in seconds, [300, 900].
    pub puppet_mco_timeout: i64,
}

impl Default for ConvergeConfig {
    fn default() -> Self {
        Self {
            puppet_phase_timeout: 43_200,
            puppet_poll_frequency: 60,
            puppet_poll_count: 480,
            puppet_mco_timeout: 900,
        }
    }
}

/// A convergence parameter outside its documented range.
///
/// The message shape is matched by operators and external tooling.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error(
    "Incorrect \"{param}\" value specified in {source_file}. \
     Valid \"{param}\" value is an integer{valid}"
)]
pub struct ConfigValidationError {
    pub param: &'static str,
    pub source_file: String,
    pub valid: &'static str,
}

impl ConvergeConfig {
    /// Validate every parameter against its documented range.
    ///
    /// `source` names the configuration file for the error message.
    pub fn validate(&self, source: &str) -> Result<(), ConfigValidationError> {
        let fail = |param: &'static str, valid: &'static str| ConfigValidationError {
            param,
            source_file: source.to_owned(),
            valid,
        };

        if !(0..=604_800).contains(&self.puppet_phase_timeout) {
            return Err(fail(
                "puppet_phase_timeout",
                " within a range [0, 604800]",
            ));
        }
        if self.puppet_poll_frequency != 0
            && !(60..=3_600).contains(&self.puppet_poll_frequency)
        {
            return Err(fail("puppet_poll_frequency", ": 0 or [60, 3600]"));
        }
        if !(1..=1_000).contains(&self.puppet_poll_count) {
            return Err(fail("puppet_poll_count", " within a range [1, 1000]"));
        }
        if !(300..=900).contains(&self.puppet_mco_timeout) {
            return Err(fail("puppet_mco_timeout", " within a range [300, 900]"));
        }
        Ok(())
    }

    /// Wall-time budget for one phase, including the cleanup allowance.
    /// `None` when the phase timeout is disabled.
    pub fn phase_deadline(&self) -> Option<Duration> {
        if self.puppet_phase_timeout == 0 {
            None
        } else {
            Some(Duration::from_secs(
                self.puppet_phase_timeout as u64 + PHASE_CLEANUP_ALLOWANCE_SECS,
            ))
        }
    }
}

/// Why a configuration task failed to converge.
#[derive(Debug, Error)]
pub enum ConvergeError {
    #[error("failed to render manifest fragment: {0}")]
    Render(#[source] anyhow::Error),

    #[error("failed to trigger apply: {0}")]
    Apply(#[source] anyhow::Error),

    /// `puppet_poll_count` polls elapsed without an idle observation.
    #[error("maximum poll count reached after {observations} polls")]
    PollExhausted { observations: i64 },
}

impl ConvergeError {
    /// True when application was triggered but no terminal observation
    /// arrived, leaving the item's on-node state unknown.
    pub fn outcome_indeterminable(&self) -> bool {
        matches!(self, Self::PollExhausted { .. })
    }
}

/// Drive one configuration task: render the fragment, trigger apply, and
/// poll until the node reports idle or the poll budget is exhausted.
///
/// Every non-idle observation (still applying, unreachable, or a poll that
/// outran `puppet_mco_timeout`) counts against `puppet_poll_count`, so a
/// task that never converges produces exactly `puppet_poll_count` of them.
/// Rollback is the caller's responsibility.
pub async fn run_config_task(
    applier: &dyn ManifestApplier,
    config: &ConvergeConfig,
    node: &str,
    change: FragmentChange,
) -> Result<(), ConvergeError> {
    applier
        .render(node, change)
        .await
        .map_err(ConvergeError::Render)?;

    applier.apply(node).await.map_err(ConvergeError::Apply)?;

    let mco_timeout = Duration::from_secs(config.puppet_mco_timeout.max(0) as u64);
    let poll_interval = Duration::from_secs(config.puppet_poll_frequency.max(0) as u64);

    let mut observations = 0;
    for attempt in 1..=config.puppet_poll_count {
        let status = tokio::time::timeout(mco_timeout, applier.poll(node)).await;
        match status {
            Ok(Ok(PollStatus::Idle)) => return Ok(()),
            Ok(Ok(_)) | Ok(Err(_)) | Err(_) => {
                observations += 1;
                debug!(node = %node, poll = attempt, "puppet not applying");
            }
        }
        if attempt < config.puppet_poll_count && !poll_interval.is_zero() {
            tokio::time::sleep(poll_interval).await;
        }
    }

    error!(
        node = %node,
        "Maximum poll count reached. Puppet not applying configuration. \
         Failing running tasks"
    );
    Err(ConvergeError::PollExhausted { observations })
}
