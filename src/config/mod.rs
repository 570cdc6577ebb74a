// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-s7-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration management for the S7 monitor
//!
//! This module provides functionality for loading, validating, and applying
//! configuration settings for the monitor. The configuration is backed by a
//! YAML file and validated against a JSON schema for robustness.
//!
//! ## Configuration Structure
//!
//! The configuration is organized as a nested structure with sections:
//! - `plc`: Address, rack, slot and timeouts for the target device
//! - `acquisition`: Data block, points, polling interval and retry policy
//! - `recording`: Optional CSV recording of polled values
//!
//! ## Usage
//!
//! ```no_run
//! use rust_s7_monitor::config::Config;
//! use std::path::Path;
//!
//! // Load config from file, creates a default if not found
//! let mut config = Config::from_file(Path::new("config.yaml")).unwrap();
//!
//! // Apply command line overrides if needed
//! config.apply_args(
//!     Some("192.168.1.50".to_string()), // Device address
//!     None,                             // Rack
//!     Some(2),                          // Slot
//!     Some(5),                          // Data block
//!     Some(124),                        // Offset of the first point
//!     Some(500),                        // Poll interval in ms
//!     None,                             // Duration in seconds
//!     None,                             // CSV recording path
//! ).unwrap();
//!
//! // Access configuration values
//! println!("Device address: {}", config.plc.address);
//! ```

pub mod acquisition;
pub mod plc;
pub mod recording;
pub mod utils;

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};

// Re-export all types for public API
pub use acquisition::{AcquisitionConfig, PointConfig};
pub use plc::PlcConfig;
pub use recording::RecordingConfig;
pub use utils::{is_valid_ip_address, output_config_schema};

/// Root configuration structure for the monitor.
///
/// This structure serves as the main container for all configuration
/// sections. It is deserialized from and serialized to YAML using the serde
/// framework and validated against a JSON schema before deserialization.
///
/// # Default Values
///
/// Each section uses default values when not explicitly specified in the
/// configuration file, allowing for minimal configuration when custom
/// settings are not required.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Settings for the connection to the target device.
    ///
    /// These settings identify the CPU on the network and control the
    /// timeouts applied when talking to it. If not specified in the
    /// configuration file, default values are used.
    #[serde(default)]
    pub plc: PlcConfig,

    /// Settings for the polling loop.
    ///
    /// This section controls which data block values are polled, how often,
    /// and how failures and implausible values are handled. If not
    /// specified, default values will be used.
    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    /// Settings for the CSV recording of polled values.
    ///
    /// Recording is disabled by default; when enabled, each successful poll
    /// appends one row to the configured file.
    #[serde(default)]
    pub recording: RecordingConfig,
}

impl Config {
    /// Helper method to create a sample config file when validation fails
    fn create_sample_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        debug!("Creating sample configuration file at {:?}", path);
        let sample_path = path.with_extension("sample.yaml");

        // Create parent directories if they don't exist
        if let Some(parent) = sample_path.parent() {
            if !parent.exists() {
                debug!("Creating parent directory: {:?}", parent);
                std::fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "Failed to create parent directory for sample config at {:?}",
                        parent
                    )
                })?;
            }
        }

        let sample_config = Self::default();
        sample_config
            .save_to_file(&sample_path)
            .with_context(|| format!("Failed to save sample config to {:?}", sample_path))?;

        error!(
            "Sample configuration file created at {:?}\nPlease edit and rename it",
            sample_path
        );
        Ok(())
    }

    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(
                "Configuration file not found at {:?}, creating default",
                path
            );
            let default_config = Self::default();
            default_config.save_to_file(path)?;
            return Ok(default_config);
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;

        // First step: convert YAML to a generic Value
        let yaml_value: serde_yml::Value = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML configuration from {:?}", path))?;

        // Convert to JSON Value for validation
        let json_value = serde_json::to_value(&yaml_value).with_context(|| {
            format!("Failed to convert YAML to JSON for validation: {:?}", path)
        })?;

        // Load and validate with the schema
        let schema_str = include_str!("../../resources/config.schema.json");
        let schema: serde_json::Value = serde_json::from_str(schema_str).with_context(|| {
            debug!("JSON schema string: {}", schema_str);
            "Failed to parse JSON schema"
        })?;

        // Create the validator
        let validator = jsonschema::draft202012::options()
            .should_validate_formats(true)
            .build(&schema)?;

        // Validate before deserializing to Config
        debug!("Validating {} configuration against schema", path.display());
        if let Err(error) = validator.validate(&json_value) {
            error!("Configuration validation error before deserialization");
            // We generate a config.sample.yaml file with the default values
            // for the user to edit
            Self::create_sample_config(path)?;
            anyhow::bail!("Configuration validation failed: {}", error);
        }

        // Now that YAML has been validated, deserialize to Config
        debug!("Schema validation passed, deserializing into Config structure");
        let config: Config = match serde_yml::from_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                error!("Configuration deserialization error: {}", err);
                // Generate a sample config file just like we do for schema
                // validation failures
                match Self::create_sample_config(path) {
                    Ok(_) => debug!("Successfully created sample config"),
                    Err(e) => error!("Failed to create sample config: {}", e),
                }

                // Return the original error enhanced with context
                return Err(anyhow::anyhow!(
                    "Failed to deserialize configuration from {}: {}",
                    path.display(),
                    err
                ));
            }
        };

        // Perform additional specific validations
        if let Err(err) = utils::validate_specific_rules(&config) {
            error!("Configuration specific validation error: {}", err);
            // Generate a sample config file
            Self::create_sample_config(path)?;
            return Err(err);
        }

        Ok(config)
    }

    /// Save the configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;

        let mut file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create config file at {:?}", path.as_ref()))?;

        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Apply command line arguments to override configuration values.
    ///
    /// Only values that are explicitly provided override the existing
    /// configuration. The offset override moves the first configured point,
    /// matching the common single-encoder setup; providing a CSV path turns
    /// recording on for this run.
    ///
    /// Overrides never pass through the schema validation done on loading,
    /// so the specific rules are re-checked after applying them; an
    /// override that breaks them is rejected.
    ///
    /// # Parameters
    ///
    /// * `ip` - Network address of the target device
    /// * `rack` - Rack number of the CPU
    /// * `slot` - Slot number of the CPU
    /// * `db` - Data block number to poll
    /// * `offset` - Byte offset of the first configured point
    /// * `interval_ms` - Poll interval in milliseconds
    /// * `duration_s` - Stop monitoring after this many seconds
    /// * `csv` - Path of the CSV file to record to
    ///
    /// # Example
    ///
    /// ```no_run
    /// use rust_s7_monitor::config::Config;
    /// let mut config = Config::from_file("config.yaml").unwrap();
    /// config.apply_args(
    ///     Some("192.168.1.50".to_string()), // Device address
    ///     None,                             // Rack
    ///     Some(2),                          // Slot
    ///     Some(5),                          // Data block
    ///     Some(124),                        // Offset of the first point
    ///     Some(500),                        // Poll interval in ms
    ///     Some(60),                         // Duration in seconds
    ///     None,                             // CSV recording path
    /// ).unwrap();
    /// ```
    #[allow(clippy::too_many_arguments)]
    pub fn apply_args(
        &mut self,
        ip: Option<String>,
        rack: Option<u16>,
        slot: Option<u16>,
        db: Option<u16>,
        offset: Option<u32>,
        interval_ms: Option<u64>,
        duration_s: Option<u64>,
        csv: Option<PathBuf>,
    ) -> Result<()> {
        // Only override if command-line arguments are provided
        if let Some(ip) = ip {
            debug!("Overriding device address from command line: {}", ip);
            self.plc.address = ip;
        }

        if let Some(rack) = rack {
            debug!("Overriding rack from command line: {}", rack);
            self.plc.rack = rack;
        }

        if let Some(slot) = slot {
            debug!("Overriding slot from command line: {}", slot);
            self.plc.slot = slot;
        }

        if let Some(db) = db {
            debug!("Overriding data block from command line: {}", db);
            self.acquisition.db_number = db;
        }

        if let Some(offset) = offset {
            debug!(
                "Overriding first point offset from command line: {}",
                offset
            );
            if let Some(point) = self.acquisition.points.first_mut() {
                point.offset = offset;
            }
        }

        if let Some(interval) = interval_ms {
            debug!("Overriding poll interval from command line: {}ms", interval);
            self.acquisition.interval_ms = interval;
        }

        if let Some(duration) = duration_s {
            debug!("Overriding duration from command line: {}s", duration);
            self.acquisition.duration_s = Some(duration);
        }

        if let Some(csv) = csv {
            debug!("Recording to CSV file from command line: {:?}", csv);
            self.recording.enabled = true;
            self.recording.path = csv.to_string_lossy().to_string();
        }

        utils::validate_specific_rules(self)
    }
}
