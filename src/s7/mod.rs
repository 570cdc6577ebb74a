// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-s7-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! S7 communication for the monitor
//!
//! This module speaks the PUT/GET subset of the S7 protocol over ISO-on-TCP:
//! session setup, data block reads and writes, and the SZL diagnostics the
//! probe mode relies on.
//!
//! ## Components
//!
//! * [`frame`] - TPKT, COTP and S7 PDU encoding and parsing
//! * [`client`] - the connection owning client used by every mode
//! * [`server`] - an in-memory responder used by `plc_sim` and the tests

pub mod client;
pub mod error;
pub mod frame;
pub mod server;

pub use client::{ConnectOptions, CpuState, S7Client};
pub use error::{Error, ReturnCode};
pub use server::{PlcSimulator, S7Server};
