// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-s7-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Data acquisition configuration
//!
//! This module defines which values are polled from the data block and how
//! the polling loop behaves: interval, retry policy, plausibility range,
//! change detection and history depth.

use serde::{Deserialize, Serialize};

use crate::values::ValueKind;

/// One named value inside the polled data block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointConfig {
    /// Name used in log lines and CSV headers
    pub name: String,

    /// Byte offset inside the data block
    pub offset: u32,

    /// Bit index for bool points (0-7), ignored for other types
    #[serde(default)]
    pub bit: u8,

    /// S7 data type stored at the offset
    #[serde(rename = "type")]
    pub kind: ValueKind,

    /// Engineering unit shown next to the value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl PointConfig {
    /// Bytes this point occupies inside the data block
    pub fn size(&self) -> usize {
        self.kind.size()
    }

    /// Byte offset just past the point, saturating at `u32::MAX`
    pub fn end(&self) -> u32 {
        self.offset.saturating_add(self.size() as u32)
    }
}

/// Configuration for the polling loop.
///
/// The defaults describe the hydraulic unit this tool was written against:
/// the right hand encoder position as a Real at byte 124 of DB 5, polled
/// once per second.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Flag to enable or disable the monitor task in daemon mode.
    ///
    /// When disabled the daemon only runs its heartbeat, which is useful
    /// when commissioning the connection settings.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Data block number holding the points
    #[serde(default = "default_db_number")]
    pub db_number: u16,

    /// Time interval in milliseconds between polls.
    ///
    /// Lower values follow the position more closely but add load on the
    /// device's communication processor. Must be greater than zero.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Attempts for one logical read before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay in milliseconds between attempts
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Stop monitoring after this many seconds; unset means run until
    /// stopped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_s: Option<u64>,

    /// Lower plausibility bound; values below it are logged as suspect
    #[serde(default = "default_range_min")]
    pub range_min: Option<f64>,

    /// Upper plausibility bound
    #[serde(default = "default_range_max")]
    pub range_max: Option<f64>,

    /// Minimum difference from the previous value that counts as a change
    #[serde(default = "default_change_threshold")]
    pub change_threshold: f64,

    /// Samples kept per point for the windowed statistics
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Values to poll each tick
    #[serde(default = "default_points")]
    pub points: Vec<PointConfig>,
}

fn default_enabled() -> bool {
    true
}

fn default_db_number() -> u16 {
    5
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_range_min() -> Option<f64> {
    Some(-1000.0)
}

fn default_range_max() -> Option<f64> {
    Some(1000.0)
}

fn default_change_threshold() -> f64 {
    1.0
}

fn default_history_capacity() -> usize {
    1000
}

fn default_points() -> Vec<PointConfig> {
    vec![PointConfig {
        name: "right_encoder".to_string(),
        offset: 124,
        bit: 0,
        kind: ValueKind::Real,
        unit: Some("mm".to_string()),
    }]
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            db_number: default_db_number(),
            interval_ms: default_interval_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            duration_s: None,
            range_min: default_range_min(),
            range_max: default_range_max(),
            change_threshold: default_change_threshold(),
            history_capacity: default_history_capacity(),
            points: default_points(),
        }
    }
}
