//! # Daemon Management
//!
//! Lifecycle handling for the background tasks of the monitor:
//!
//! - Continuous data acquisition from the device
//! - System health monitoring (heartbeat)
//!
//! Each service runs as an independent Tokio task. The `Daemon` structure
//! tracks the task handles and shares one `running` flag with all of them;
//! clearing the flag asks every task to terminate, `join()` then waits for
//! them with a timeout.

use anyhow::Result;
use log::{debug, error, info, warn};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;

use crate::acquisition::Monitor;
use crate::config::Config;

/// Represents a daemon task manager that coordinates background services
///
/// # Fields
///
/// * `tasks` - Collection of handles to running tasks for management and cleanup
/// * `running` - Atomic flag shared between tasks to coordinate shutdown
pub struct Daemon {
    tasks: Vec<JoinHandle<Result<()>>>,
    running: Arc<AtomicBool>,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    /// Create a new daemon instance
    ///
    /// Initializes a new daemon manager with an empty task list and the
    /// running flag set to `true`.
    pub fn new() -> Self {
        Daemon {
            tasks: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Launch all configured tasks based on configuration
    ///
    /// Starts the acquisition monitor when `config.acquisition.enabled` is
    /// `true` and always starts the heartbeat task. Each service runs as a
    /// separate asynchronous task.
    pub async fn launch(&mut self, config: &Config) -> Result<()> {
        if config.acquisition.enabled {
            self.start_monitor(config)?;
        } else {
            info!("Acquisition is disabled in configuration");
        }

        // Start heartbeat task for monitoring
        self.start_heartbeat()?;

        Ok(())
    }

    /// Get the shared running flag
    ///
    /// Tasks outside the daemon (such as the main shutdown loop) can watch
    /// this flag to notice when the monitor has finished on its own.
    pub fn get_running(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Start the continuous acquisition monitor task
    fn start_monitor(&mut self, config: &Config) -> Result<()> {
        info!("Starting acquisition monitor task");

        let monitor = Monitor::new(config, self.running.clone());
        let task = tokio::spawn(async move {
            monitor.run().await?;
            Ok(())
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Start a heartbeat task that logs system status periodically
    ///
    /// Emits a heartbeat log message about once a minute so an operator can
    /// tell the daemon is still alive. Runs until the `running` flag is
    /// cleared.
    fn start_heartbeat(&mut self) -> Result<()> {
        info!("Starting heartbeat monitor");

        let running = self.running.clone();
        let task = tokio::spawn(async move {
            // short sleeps keep shutdown prompt, the message stays at one per minute
            let mut ticks: u64 = 0;
            while running.load(Ordering::SeqCst) {
                if ticks % 60 == 0 {
                    debug!("Daemon heartbeat: running");
                }
                ticks += 1;
                time::sleep(Duration::from_secs(1)).await;
            }
            Ok(())
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Stop all running tasks gracefully
    ///
    /// Signals all spawned tasks to terminate by setting the shared `running`
    /// flag to `false`. This method only signals the tasks to stop; call
    /// `join()` afterwards to wait for them.
    pub fn shutdown(&self) {
        info!("Shutting down daemon tasks");
        self.running.store(false, Ordering::SeqCst);
        // Tasks should check the running flag and terminate gracefully
    }

    /// Wait for all tasks to complete
    ///
    /// Consumes the daemon and waits for the spawned tasks to finish. Task
    /// failures and panics are logged but do not fail the join, so every
    /// task gets its chance to wind down.
    pub async fn join(self) -> Result<()> {
        for task in self.tasks {
            match tokio::time::timeout(Duration::from_secs(5), task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => {
                    error!("Task ended with error: {:#}", e);
                }
                Ok(Err(e)) => {
                    error!("Task panicked: {}", e);
                }
                Err(_) => {
                    // Task didn't complete within timeout
                    warn!("Task did not complete within timeout period, may be hung");
                }
            }
        }
        Ok(())
    }
}
