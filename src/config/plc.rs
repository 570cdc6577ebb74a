// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-s7-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! PLC connection configuration
//!
//! This module defines the structure describing how to reach the target
//! device: network address, rack and slot, and the timeouts applied to the
//! connection and to individual requests.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::s7::ConnectOptions;

/// Configuration for the connection to the target device.
///
/// Rack and slot identify the CPU inside the station and determine the
/// TSAP used during connection setup. Compact S7-1200/1500 units sit in
/// rack 0, slot 1; classic S7-300 CPUs usually in rack 0, slot 2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlcConfig {
    /// IP address or hostname of the device.
    ///
    /// Can be an IPv4/IPv6 address or a hostname. Default is "192.168.0.1".
    #[serde(default = "default_address")]
    pub address: String,

    /// Rack number of the CPU (0 on most stations)
    #[serde(default)]
    pub rack: u16,

    /// Slot number of the CPU
    #[serde(default = "default_slot")]
    pub slot: u16,

    /// ISO-on-TCP port. 102 unless a gateway remaps it.
    #[serde(default = "default_port")]
    pub port: u16,

    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Timeout in milliseconds applied to each request on the session
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_address() -> String {
    "192.168.0.1".to_string()
}

fn default_slot() -> u16 {
    1
}

fn default_port() -> u16 {
    102
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_request_timeout_ms() -> u64 {
    2000
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            rack: 0,
            slot: default_slot(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl PlcConfig {
    /// Client options for this configuration
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            address: self.address.clone(),
            port: self.port,
            rack: self.rack,
            slot: self.slot,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}
