//! Rust S7 monitor library
//!
//! This library provides connectivity to Siemens S7 controllers over
//! ISO-on-TCP and continuous monitoring of data block variables, such as
//! hydraulic encoder positions.

pub mod acquisition;
pub mod config;
pub mod daemon;
pub mod s7;
pub mod values;
