// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-s7-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! CSV recording configuration

use serde::{Deserialize, Serialize};

/// Configuration for the append-only CSV record of polled values.
///
/// When enabled the monitor appends one row per successful poll, with an
/// RFC 3339 timestamp followed by the points in configuration order. The
/// header row is written only when the file is new or empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Flag to enable or disable CSV recording
    #[serde(default)]
    pub enabled: bool,

    /// File the monitor appends to
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_path() -> String {
    "encoder_data.csv".to_string()
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: false, // Disabled by default, opt in per run
            path: default_path(),
        }
    }
}
