//! # Daemon Module
//!
//! Background-task management for the monitor application. The daemon owns
//! the continuous acquisition task and a heartbeat task and coordinates
//! their graceful shutdown through a shared flag.
//!
//! ## Components
//!
//! * **Launch Daemon**: starting, monitoring and gracefully shutting down
//!   the background tasks
//!
//! ## Usage
//!
//! ```no_run
//! use rust_s7_monitor::{config::Config, daemon::Daemon};
//!
//! async fn run() -> anyhow::Result<()> {
//!     let config = Config::from_file("config.yaml")?;
//!
//!     let mut daemon = Daemon::new();
//!     daemon.launch(&config).await?;
//!
//!     // Wait for shutdown signal (e.g. Ctrl+C)
//!     tokio::signal::ctrl_c().await?;
//!
//!     daemon.shutdown();
//!     daemon.join().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod launch_daemon;

pub use launch_daemon::Daemon;
