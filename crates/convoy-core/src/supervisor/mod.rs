//! Process supervisor for the control-plane service.
//!
//! Replaces PID/lock-file sentinels with an explicit component: service
//! state lives in memory and "start requested while already starting" is a
//! compare-and-swap on a `starting` flag rather than a filesystem check.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use thiserror::Error;

/// Observable service state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Stopped,
    Starting,
    Running,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("Service is already starting")]
    AlreadyStarting,

    #[error("Service is already running")]
    AlreadyRunning,

    #[error("Service is not running")]
    NotRunning,

    #[error("Service startup failed: {0}")]
    StartupFailed(String),
}

/// Supervises the service lifecycle: `status`, `start`, `stop`, `restart`.
#[derive(Debug, Default)]
pub struct ServiceSupervisor {
    /// Startup barrier: set for the duration of one `start` attempt.
    starting: AtomicBool,
    status: Mutex<Option<ServiceStatus>>,
}

impl ServiceSupervisor {
    pub fn new() -> Self {
        Self {
            starting: AtomicBool::new(false),
            status: Mutex::new(Some(ServiceStatus::Stopped)),
        }
    }

    pub fn status(&self) -> ServiceStatus {
        if self.starting.load(Ordering::SeqCst) {
            return ServiceStatus::Starting;
        }
        self.status
            .lock()
            .expect("status lock poisoned")
            .unwrap_or(ServiceStatus::Stopped)
    }

    /// Start the service, running `init` behind the startup barrier.
    ///
    /// A concurrent `start` while another is in flight loses the
    /// compare-and-swap and is rejected; a start while running is rejected
    /// without touching the barrier.
    pub async fn start<F, Fut>(&self, init: F) -> Result<(), SupervisorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), String>>,
    {
        if self.status() == ServiceStatus::Running {
            return Err(SupervisorError::AlreadyRunning);
        }

        if self
            .starting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SupervisorError::AlreadyStarting);
        }

        let result = init().await;

        let mut status = self.status.lock().expect("status lock poisoned");
        match result {
            Ok(()) => {
                *status = Some(ServiceStatus::Running);
                drop(status);
                self.starting.store(false, Ordering::SeqCst);
                tracing::info!("service started");
                Ok(())
            }
            Err(message) => {
                *status = Some(ServiceStatus::Stopped);
                drop(status);
                self.starting.store(false, Ordering::SeqCst);
                tracing::error!(error = %message, "service startup failed");
                Err(SupervisorError::StartupFailed(message))
            }
        }
    }

    pub fn stop(&self) -> Result<(), SupervisorError> {
        let mut status = self.status.lock().expect("status lock poisoned");
        if *status != Some(ServiceStatus::Running) {
            return Err(SupervisorError::NotRunning);
        }
        *status = Some(ServiceStatus::Stopped);
        tracing::info!("service stopped");
        Ok(())
    }

    /// Stop (if running) and start again.
    pub async fn restart<F, Fut>(&self, init: F) -> Result<(), SupervisorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), String>>,
    {
        let _ = self.stop();
        self.start(init).await
    }
}
