// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-s7-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Typed access into data block byte images
//!
//! S7 data blocks are flat byte arrays. This module maps point descriptors
//! (a byte offset and an S7 type) onto those arrays and converts between the
//! big-endian wire layout and Rust values. All multi-byte types are stored
//! big-endian on the device, so a Real holding 10.0 is the byte sequence
//! `41 20 00 00`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors produced when decoding, encoding or parsing values
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("offset {offset} with size {size} does not fit in a {len} byte buffer")]
    OutOfBounds {
        offset: usize,
        size: usize,
        len: usize,
    },

    #[error("bit index {0} is out of range (expected 0-7)")]
    InvalidBit(u8),

    #[error("cannot parse {input:?} as {kind}")]
    Parse { kind: ValueKind, input: String },
}

/// Primitive S7 data types supported by point descriptors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Bool,
    Byte,
    Word,
    DWord,
    Int,
    DInt,
    Real,
    LReal,
}

impl ValueKind {
    /// Number of data block bytes occupied by this type
    pub fn size(&self) -> usize {
        match self {
            ValueKind::Bool => 1,
            ValueKind::Byte => 1,
            ValueKind::Word => 2,
            ValueKind::DWord => 4,
            ValueKind::Int => 2,
            ValueKind::DInt => 4,
            ValueKind::Real => 4,
            ValueKind::LReal => 8,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Bool => "bool",
            ValueKind::Byte => "byte",
            ValueKind::Word => "word",
            ValueKind::DWord => "dword",
            ValueKind::Int => "int",
            ValueKind::DInt => "dint",
            ValueKind::Real => "real",
            ValueKind::LReal => "lreal",
        };
        f.write_str(name)
    }
}

/// A decoded data block value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Bool(bool),
    Byte(u8),
    Word(u16),
    DWord(u32),
    Int(i16),
    DInt(i32),
    Real(f32),
    LReal(f64),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Byte(_) => ValueKind::Byte,
            Value::Word(_) => ValueKind::Word,
            Value::DWord(_) => ValueKind::DWord,
            Value::Int(_) => ValueKind::Int,
            Value::DInt(_) => ValueKind::DInt,
            Value::Real(_) => ValueKind::Real,
            Value::LReal(_) => ValueKind::LReal,
        }
    }

    /// Numeric view used by statistics, change detection and range checks
    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Byte(v) => f64::from(*v),
            Value::Word(v) => f64::from(*v),
            Value::DWord(v) => f64::from(*v),
            Value::Int(v) => f64::from(*v),
            Value::DInt(v) => f64::from(*v),
            Value::Real(v) => f64::from(*v),
            Value::LReal(v) => *v,
        }
    }

    /// Big-endian wire bytes for a write request.
    ///
    /// A bool becomes a whole byte holding 0 or 1; writes are byte granular.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Value::Bool(b) => vec![u8::from(*b)],
            Value::Byte(v) => vec![*v],
            Value::Word(v) => v.to_be_bytes().to_vec(),
            Value::DWord(v) => v.to_be_bytes().to_vec(),
            Value::Int(v) => v.to_be_bytes().to_vec(),
            Value::DInt(v) => v.to_be_bytes().to_vec(),
            Value::Real(v) => v.to_be_bytes().to_vec(),
            Value::LReal(v) => v.to_be_bytes().to_vec(),
        }
    }

    /// Parse a command line literal into a typed value
    pub fn parse_as(kind: ValueKind, input: &str) -> Result<Self, DecodeError> {
        let parse_err = || DecodeError::Parse {
            kind,
            input: input.to_string(),
        };
        let value = match kind {
            ValueKind::Bool => match input {
                "0" | "false" => Value::Bool(false),
                "1" | "true" => Value::Bool(true),
                _ => return Err(parse_err()),
            },
            ValueKind::Byte => Value::Byte(input.parse().map_err(|_| parse_err())?),
            ValueKind::Word => Value::Word(input.parse().map_err(|_| parse_err())?),
            ValueKind::DWord => Value::DWord(input.parse().map_err(|_| parse_err())?),
            ValueKind::Int => Value::Int(input.parse().map_err(|_| parse_err())?),
            ValueKind::DInt => Value::DInt(input.parse().map_err(|_| parse_err())?),
            ValueKind::Real => Value::Real(input.parse().map_err(|_| parse_err())?),
            ValueKind::LReal => Value::LReal(input.parse().map_err(|_| parse_err())?),
        };
        Ok(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Byte(v) => write!(f, "{}", v),
            Value::Word(v) => write!(f, "{}", v),
            Value::DWord(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::DInt(v) => write!(f, "{}", v),
            Value::Real(v) => write!(f, "{:.3}", v),
            Value::LReal(v) => write!(f, "{:.3}", v),
        }
    }
}

/// Decode one value of `kind` at byte `offset` in a data block image.
///
/// `bit` selects the bit for bool points and must be 0 for every other kind
/// of point. Bounds are checked against the buffer, never assumed from
/// configuration.
pub fn decode(kind: ValueKind, buf: &[u8], offset: usize, bit: u8) -> Result<Value, DecodeError> {
    let size = kind.size();
    let end = offset.checked_add(size).ok_or(DecodeError::OutOfBounds {
        offset,
        size,
        len: buf.len(),
    })?;
    if end > buf.len() {
        return Err(DecodeError::OutOfBounds {
            offset,
            size,
            len: buf.len(),
        });
    }
    let value = match kind {
        ValueKind::Bool => {
            if bit > 7 {
                return Err(DecodeError::InvalidBit(bit));
            }
            Value::Bool((buf[offset] >> bit) & 0x01 == 1)
        }
        ValueKind::Byte => Value::Byte(buf[offset]),
        ValueKind::Word => Value::Word(u16::from_be_bytes(array_at(buf, offset))),
        ValueKind::DWord => Value::DWord(u32::from_be_bytes(array_at(buf, offset))),
        ValueKind::Int => Value::Int(i16::from_be_bytes(array_at(buf, offset))),
        ValueKind::DInt => Value::DInt(i32::from_be_bytes(array_at(buf, offset))),
        ValueKind::Real => Value::Real(f32::from_be_bytes(array_at(buf, offset))),
        ValueKind::LReal => Value::LReal(f64::from_be_bytes(array_at(buf, offset))),
    };
    Ok(value)
}

// Caller has checked that offset + N is inside buf.
fn array_at<const N: usize>(buf: &[u8], offset: usize) -> [u8; N] {
    let mut bytes = [0u8; N];
    bytes.copy_from_slice(&buf[offset..offset + N]);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_real_big_endian() {
        // 10.0 as an IEEE 754 single, big-endian as stored on the device
        let buf = [0x41, 0x20, 0x00, 0x00];
        assert_eq!(decode(ValueKind::Real, &buf, 0, 0), Ok(Value::Real(10.0)));
    }

    #[test]
    fn test_decode_real_at_offset() {
        let mut buf = vec![0u8; 128];
        buf[124..128].copy_from_slice(&[0x43, 0x6D, 0x00, 0x00]); // 237.0
        assert_eq!(
            decode(ValueKind::Real, &buf, 124, 0),
            Ok(Value::Real(237.0))
        );
    }

    #[test]
    fn test_decode_lreal_big_endian() {
        // 10.0 as an IEEE 754 double, big-endian as stored on the device
        let buf = [0x40, 0x24, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(decode(ValueKind::LReal, &buf, 0, 0), Ok(Value::LReal(10.0)));
        assert_eq!(Value::LReal(10.0).to_string(), "10.000");
    }

    #[test]
    fn test_lreal_round_trip() {
        let value = Value::parse_as(ValueKind::LReal, "-1234.5678").unwrap();
        assert_eq!(value, Value::LReal(-1234.5678));
        let bytes = value.encode();
        assert_eq!(bytes, (-1234.5678f64).to_be_bytes());
        assert_eq!(decode(ValueKind::LReal, &bytes, 0, 0), Ok(value));
    }

    #[test]
    fn test_decode_signed_integers() {
        let buf = [0xFF, 0xFE, 0xFF, 0xFF, 0xFF, 0xF6];
        assert_eq!(decode(ValueKind::Int, &buf, 0, 0), Ok(Value::Int(-2)));
        assert_eq!(decode(ValueKind::DInt, &buf, 2, 0), Ok(Value::DInt(-10)));
    }

    #[test]
    fn test_decode_bool_bits() {
        let buf = [0b0000_0101];
        assert_eq!(decode(ValueKind::Bool, &buf, 0, 0), Ok(Value::Bool(true)));
        assert_eq!(decode(ValueKind::Bool, &buf, 0, 1), Ok(Value::Bool(false)));
        assert_eq!(decode(ValueKind::Bool, &buf, 0, 2), Ok(Value::Bool(true)));
        assert_eq!(
            decode(ValueKind::Bool, &buf, 0, 8),
            Err(DecodeError::InvalidBit(8))
        );
    }

    #[test]
    fn test_decode_out_of_bounds() {
        let buf = [0u8; 4];
        assert!(matches!(
            decode(ValueKind::Real, &buf, 2, 0),
            Err(DecodeError::OutOfBounds { offset: 2, size: 4, len: 4 })
        ));
        assert!(decode(ValueKind::Byte, &buf, 4, 0).is_err());
    }

    #[test]
    fn test_encode_matches_decode() {
        let value = Value::Real(42.5);
        let bytes = value.encode();
        assert_eq!(bytes, 42.5f32.to_be_bytes());
        assert_eq!(decode(ValueKind::Real, &bytes, 0, 0), Ok(value));
    }

    #[test]
    fn test_parse_literals() {
        assert_eq!(
            Value::parse_as(ValueKind::Real, "123.5"),
            Ok(Value::Real(123.5))
        );
        assert_eq!(Value::parse_as(ValueKind::Int, "-42"), Ok(Value::Int(-42)));
        assert_eq!(
            Value::parse_as(ValueKind::Bool, "true"),
            Ok(Value::Bool(true))
        );
        assert!(Value::parse_as(ValueKind::Word, "-1").is_err());
        assert!(Value::parse_as(ValueKind::Real, "ten").is_err());
    }
}
