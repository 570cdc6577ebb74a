// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-s7-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! This module provides utility functions for working with configuration
//! settings, including validation and schema management.

use anyhow::{Context, Result};
use log::debug;
use std::collections::HashSet;

use crate::s7::frame::ADDRESS_LIMIT;
use crate::values::ValueKind;

use super::Config;

/// Output the embedded JSON schema to the console.
///
/// This function is called when the `--show-config-schema` flag is provided
/// on the command line. It outputs the full JSON schema for the configuration
/// to stdout, formatted for readability.
///
/// # Example
///
/// ```bash
/// ./rust_s7_monitor --show-config-schema > config_schema.json
/// ```
pub fn output_config_schema() -> Result<()> {
    // Load the schema from the embedded string
    let schema_str = include_str!("../../resources/config.schema.json");

    // Parse the schema to a JSON Value to pretty-format it
    let schema: serde_json::Value =
        serde_json::from_str(schema_str).context("Failed to parse JSON schema")?;

    // Pretty-print the schema
    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;

    // Output to stdout
    println!("{}", formatted_schema);

    Ok(())
}

/// Check if a string is a valid IP address
///
/// Validates that a string represents a valid IPv4 or IPv6 address,
/// or is one of the special values like "localhost" or "0.0.0.0".
///
/// # Arguments
///
/// * `addr` - The address string to validate
///
/// # Returns
///
/// `true` if the address is valid, `false` otherwise
pub fn is_valid_ip_address(addr: &str) -> bool {
    if addr.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }

    // Special cases
    matches!(addr, "localhost" | "::" | "::0" | "0.0.0.0")
}

/// Validates the configuration against rules the JSON schema cannot express.
///
/// The schema checks shapes and ranges of single fields; this function
/// checks relations across fields, such as point descriptors that only make
/// sense together or a plausibility range that is empty.
///
/// # Arguments
///
/// * `config` - The configuration object to validate
///
/// # Returns
///
/// * `Ok(())` if all validations pass
/// * `Err(anyhow::Error)` with descriptive message if any validation fails
///
/// # Validation Rules
///
/// This function validates:
///
/// - **Port Range**: Ensures the device port is within a valid range (1-65534)
/// - **Rack and Slot**: Bounds of real stations (rack 0-7, slot 0-31)
/// - **IP Address Format**: Checks if the provided address is a valid IP address or hostname-like value
/// - **Polling Parameters**: Data block number, interval, retry count and history capacity must be usable
/// - **Points**: At least one point, unique names, bit indexes only on bool points, offsets inside the addressable range
/// - **Plausibility Range**: When both bounds are set, the range must not be empty
///
/// The same checks also appear in the JSON schema where it can express
/// them; running them here holds command line overrides, which never pass
/// through the schema, to the same bounds.
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");

    // Check value ranges for certain fields
    if config.plc.port < 1 || config.plc.port > 65534 {
        anyhow::bail!("Invalid port number: {}", config.plc.port);
    }
    if config.plc.rack > 7 {
        anyhow::bail!("Invalid rack number: {}", config.plc.rack);
    }
    if config.plc.slot > 31 {
        anyhow::bail!("Invalid slot number: {}", config.plc.slot);
    }

    // Check if the address is in a valid format
    if !is_valid_ip_address(&config.plc.address) {
        debug!(
            "Potentially invalid address format: {}",
            config.plc.address
        );
        // Just issue a warning but don't block, hostnames are allowed
    }

    if config.acquisition.db_number == 0 {
        anyhow::bail!("Data block number must be greater than zero");
    }
    if config.acquisition.interval_ms == 0 {
        anyhow::bail!("Poll interval must be greater than zero");
    }
    if config.acquisition.max_retries == 0 {
        anyhow::bail!("At least one read attempt is required");
    }
    if config.acquisition.history_capacity == 0 {
        anyhow::bail!("History capacity must be greater than zero");
    }
    if config.acquisition.change_threshold < 0.0 {
        anyhow::bail!(
            "Change threshold cannot be negative: {}",
            config.acquisition.change_threshold
        );
    }

    if config.acquisition.points.is_empty() {
        anyhow::bail!("At least one point must be configured");
    }
    let mut names = HashSet::new();
    for point in &config.acquisition.points {
        if !names.insert(point.name.as_str()) {
            anyhow::bail!("Duplicate point name: {}", point.name);
        }
        if point.bit > 7 {
            anyhow::bail!(
                "Point {} has bit index {} (expected 0-7)",
                point.name,
                point.bit
            );
        }
        if point.bit != 0 && point.kind != ValueKind::Bool {
            anyhow::bail!("Point {} has a bit index but is not a bool", point.name);
        }
        // the wire carries item addresses as a 24 bit bit address
        if point.end() > ADDRESS_LIMIT {
            anyhow::bail!(
                "Point {} at offset {} lies past the addressable data block range",
                point.name,
                point.offset
            );
        }
    }

    if let (Some(min), Some(max)) = (config.acquisition.range_min, config.acquisition.range_max) {
        if min >= max {
            anyhow::bail!("Plausibility range is empty: {} >= {}", min, max);
        }
    }

    if config.recording.enabled && config.recording.path.is_empty() {
        anyhow::bail!("Recording is enabled but no path is configured");
    }

    Ok(())
}
