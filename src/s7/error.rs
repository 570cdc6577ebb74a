// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-s7-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Error types for the S7 transport and client

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Per-item return codes carried in read and write answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    Success,
    HardwareFault,
    AccessDenied,
    OutOfRange,
    NotSupported,
    SizeMismatch,
    ObjectMissing,
    Other(u8),
}

impl ReturnCode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0xFF => ReturnCode::Success,
            0x01 => ReturnCode::HardwareFault,
            0x03 => ReturnCode::AccessDenied,
            0x05 => ReturnCode::OutOfRange,
            0x06 => ReturnCode::NotSupported,
            0x07 => ReturnCode::SizeMismatch,
            0x0A => ReturnCode::ObjectMissing,
            other => ReturnCode::Other(other),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            ReturnCode::Success => 0xFF,
            ReturnCode::HardwareFault => 0x01,
            ReturnCode::AccessDenied => 0x03,
            ReturnCode::OutOfRange => 0x05,
            ReturnCode::NotSupported => 0x06,
            ReturnCode::SizeMismatch => 0x07,
            ReturnCode::ObjectMissing => 0x0A,
            ReturnCode::Other(code) => *code,
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnCode::Success => write!(f, "success"),
            ReturnCode::HardwareFault => write!(f, "hardware fault"),
            ReturnCode::AccessDenied => write!(f, "access denied"),
            ReturnCode::OutOfRange => write!(f, "address out of range"),
            ReturnCode::NotSupported => write!(f, "data type not supported"),
            ReturnCode::SizeMismatch => write!(f, "data type size mismatch"),
            ReturnCode::ObjectMissing => write!(f, "data block does not exist"),
            ReturnCode::Other(code) => write!(f, "return code {:#04x}", code),
        }
    }
}

/// Errors surfaced by the client and the responder
#[derive(Error, Debug)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection rejected by the device (COTP reason {reason:#04x})")]
    ConnectionRefused { reason: u8 },

    #[error("not connected")]
    NotConnected,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("request failed with error class {class:#04x} code {code:#04x}: {}", class_meaning(*class))]
    Job { class: u8, code: u8 },

    #[error("item rejected: {0}")]
    ReturnCode(ReturnCode),

    #[error("request of {requested} bytes exceeds the {available} byte PDU budget")]
    TooLarge { requested: usize, available: usize },

    #[error("span of {len} bytes at byte {start} exceeds the addressable data block range")]
    AddressOverflow { start: u32, len: usize },
}

fn class_meaning(class: u8) -> &'static str {
    match class {
        0x00 => "no error",
        0x81 => "application relationship error",
        0x82 => "object definition error",
        0x83 => "no resources available",
        0x84 => "error in the service processing",
        0x85 => "supplies error",
        0x87 => "access error",
        _ => "unknown error class",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_return_code_round_trip() {
        for raw in [0xFFu8, 0x01, 0x03, 0x05, 0x06, 0x07, 0x0A, 0x42] {
            assert_eq!(ReturnCode::from_u8(raw).as_u8(), raw);
        }
    }

    #[test]
    fn test_job_error_names_the_class() {
        let error = Error::Job {
            class: 0x84,
            code: 0x04,
        };
        let text = error.to_string();
        assert!(text.contains("0x84"));
        assert!(text.contains("service processing"));
    }
}
