//! The configuration codec seam and a schema-less protobuf implementation of it.
//!
//! GP2040-CE stores its config as a protobuf `Config` message. Nothing in the
//! image handling needs to understand its fields, so the rest of the crate
//! only talks to [`ConfigCodec`]. [`WireCodec`] is the codec shipped with the
//! tools: it keeps the raw wire-format fields, which is enough to show a
//! config, move it between JSON and binary, and edit the board version,
//! without compiling the GP2040-CE `.proto` files.

use std::fmt::Write as _;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigParseError {
    #[error("config is truncated at byte {0}")]
    Truncated(usize),
    #[error("varint at byte {0} is too long")]
    VarintOverflow(usize),
    #[error("unsupported wire type {wire_type} for field {field} at byte {offset}")]
    UnsupportedWireType {
        field: u64,
        wire_type: u8,
        offset: usize,
    },
    #[error("invalid field number {0}")]
    InvalidFieldNumber(u64),
    #[error("invalid JSON config: {0}")]
    Json(String),
}

/// Parse and serialize a structured config to and from its storage form.
pub trait ConfigCodec {
    type Config;

    fn parse(&self, bytes: &[u8]) -> Result<Self::Config, ConfigParseError>;

    fn parse_json(&self, json: &str) -> Result<Self::Config, ConfigParseError>;

    fn serialize(&self, config: &Self::Config) -> Vec<u8>;

    fn new_empty(&self) -> Self::Config;

    /// The `boardVersion` of the config, if it has one.
    fn board_version<'a>(&self, config: &'a Self::Config) -> Option<&'a str>;

    /// Human readable form of the config.
    fn to_text(&self, config: &Self::Config) -> String;

    fn to_json(&self, config: &Self::Config) -> Result<String, ConfigParseError>;
}

/// Field number of `boardVersion` in the GP2040-CE `Config` message.
pub const BOARD_VERSION_FIELD: u32 = 1;

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireValue {
    Varint(u64),
    Fixed64(u64),
    Fixed32(u32),
    /// Length-delimited field holding printable UTF-8
    String(String),
    /// Any other length-delimited field: bytes or a nested message
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireField {
    pub number: u32,
    pub value: WireValue,
}

/// A protobuf message as the ordered list of its wire-format fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireConfig {
    pub fields: Vec<WireField>,
}

impl WireConfig {
    pub fn board_version(&self) -> Option<&str> {
        self.fields.iter().find_map(|field| match &field.value {
            WireValue::String(s) if field.number == BOARD_VERSION_FIELD => Some(s.as_str()),
            _ => None,
        })
    }

    /// Replaces the board version, or adds it in front if there is none.
    pub fn set_board_version(&mut self, version: &str) {
        let value = WireValue::String(version.to_string());
        match self
            .fields
            .iter_mut()
            .find(|field| field.number == BOARD_VERSION_FIELD)
        {
            Some(field) => field.value = value,
            None => self.fields.insert(
                0,
                WireField {
                    number: BOARD_VERSION_FIELD,
                    value,
                },
            ),
        }
    }
}

fn read_varint(bytes: &[u8], pos: &mut usize) -> Result<u64, ConfigParseError> {
    let start = *pos;
    let mut value: u64 = 0;
    for shift in (0..64).step_by(7) {
        let byte = *bytes.get(*pos).ok_or(ConfigParseError::Truncated(*pos))?;
        *pos += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(ConfigParseError::VarintOverflow(start))
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn take<'a>(bytes: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], ConfigParseError> {
    let end = pos
        .checked_add(len)
        .filter(|end| *end <= bytes.len())
        .ok_or(ConfigParseError::Truncated(bytes.len()))?;
    let slice = &bytes[*pos..end];
    *pos = end;
    Ok(slice)
}

fn is_printable(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| !c.is_control())
}

fn parse_message(bytes: &[u8]) -> Result<WireConfig, ConfigParseError> {
    let mut fields = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let offset = pos;
        let key = read_varint(bytes, &mut pos)?;
        let number = key >> 3;
        let wire_type = (key & 0x7) as u8;
        let number = u32::try_from(number)
            .ok()
            .filter(|n| *n != 0 && *n < (1 << 29))
            .ok_or(ConfigParseError::InvalidFieldNumber(number))?;

        let value = match wire_type {
            WIRE_VARINT => WireValue::Varint(read_varint(bytes, &mut pos)?),
            WIRE_FIXED64 => {
                let mut word = [0; 8];
                word.copy_from_slice(take(bytes, &mut pos, 8)?);
                WireValue::Fixed64(u64::from_le_bytes(word))
            }
            WIRE_FIXED32 => {
                let mut word = [0; 4];
                word.copy_from_slice(take(bytes, &mut pos, 4)?);
                WireValue::Fixed32(u32::from_le_bytes(word))
            }
            WIRE_LEN => {
                let len = read_varint(bytes, &mut pos)?;
                let len = usize::try_from(len).map_err(|_| ConfigParseError::Truncated(pos))?;
                let data = take(bytes, &mut pos, len)?;
                let empty_version = data.is_empty() && number == BOARD_VERSION_FIELD;
                match std::str::from_utf8(data) {
                    Ok(s) if empty_version || is_printable(s) => WireValue::String(s.to_string()),
                    _ => WireValue::Bytes(data.to_vec()),
                }
            }
            // groups (3, 4) are long deprecated and never used by GP2040-CE
            _ => {
                return Err(ConfigParseError::UnsupportedWireType {
                    field: u64::from(number),
                    wire_type,
                    offset,
                });
            }
        };

        fields.push(WireField { number, value });
    }

    Ok(WireConfig { fields })
}

fn serialize_message(config: &WireConfig) -> Vec<u8> {
    let mut out = Vec::new();
    for field in &config.fields {
        let key = |wire_type: u8| (u64::from(field.number) << 3) | u64::from(wire_type);
        match &field.value {
            WireValue::Varint(v) => {
                write_varint(&mut out, key(WIRE_VARINT));
                write_varint(&mut out, *v);
            }
            WireValue::Fixed64(v) => {
                write_varint(&mut out, key(WIRE_FIXED64));
                out.extend_from_slice(&v.to_le_bytes());
            }
            WireValue::Fixed32(v) => {
                write_varint(&mut out, key(WIRE_FIXED32));
                out.extend_from_slice(&v.to_le_bytes());
            }
            WireValue::String(s) => {
                write_varint(&mut out, key(WIRE_LEN));
                write_varint(&mut out, s.len() as u64);
                out.extend_from_slice(s.as_bytes());
            }
            WireValue::Bytes(b) => {
                write_varint(&mut out, key(WIRE_LEN));
                write_varint(&mut out, b.len() as u64);
                out.extend_from_slice(b);
            }
        }
    }
    out
}

fn write_text(out: &mut String, config: &WireConfig, depth: usize) {
    let indent = "  ".repeat(depth);
    for field in &config.fields {
        let _ = match &field.value {
            WireValue::Varint(v) => writeln!(out, "{indent}{}: {v}", field.number),
            WireValue::Fixed64(v) => writeln!(out, "{indent}{}: {v:#018x}", field.number),
            WireValue::Fixed32(v) => writeln!(out, "{indent}{}: {v:#010x}", field.number),
            WireValue::String(s) => writeln!(out, "{indent}{}: {s:?}", field.number),
            WireValue::Bytes(b) => match parse_message(b) {
                Ok(nested) if !nested.fields.is_empty() => {
                    let _ = writeln!(out, "{indent}{} {{", field.number);
                    write_text(out, &nested, depth + 1);
                    writeln!(out, "{indent}}}")
                }
                _ => writeln!(out, "{indent}{}: {b:02x?}", field.number),
            },
        };
    }
}

/// Schema-less codec for protobuf-encoded GP2040-CE configs.
#[derive(Debug, Clone, Copy, Default)]
pub struct WireCodec;

impl ConfigCodec for WireCodec {
    type Config = WireConfig;

    fn parse(&self, bytes: &[u8]) -> Result<WireConfig, ConfigParseError> {
        let config = parse_message(bytes)?;
        debug!("parsed {} top level config fields", config.fields.len());
        Ok(config)
    }

    fn parse_json(&self, json: &str) -> Result<WireConfig, ConfigParseError> {
        let config: WireConfig =
            serde_json::from_str(json).map_err(|e| ConfigParseError::Json(e.to_string()))?;
        if let Some(field) = config
            .fields
            .iter()
            .find(|field| field.number == 0 || field.number >= (1 << 29))
        {
            return Err(ConfigParseError::InvalidFieldNumber(u64::from(field.number)));
        }
        Ok(config)
    }

    fn serialize(&self, config: &WireConfig) -> Vec<u8> {
        serialize_message(config)
    }

    fn new_empty(&self) -> WireConfig {
        WireConfig::default()
    }

    fn board_version<'a>(&self, config: &'a WireConfig) -> Option<&'a str> {
        config.board_version()
    }

    fn to_text(&self, config: &WireConfig) -> String {
        let mut out = String::new();
        write_text(&mut out, config, 0);
        out
    }

    fn to_json(&self, config: &WireConfig) -> Result<String, ConfigParseError> {
        serde_json::to_string_pretty(config).map_err(|e| ConfigParseError::Json(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // boardVersion "v0.7.5", a nested message { 1: 3, 2: true } and a fixed32
    const SAMPLE: &[u8] = &[
        0x0a, 0x06, b'v', b'0', b'.', b'7', b'.', b'5', // 1: "v0.7.5"
        0x12, 0x04, 0x08, 0x03, 0x10, 0x01, // 2 { 1: 3, 2: 1 }
        0x1d, 0x78, 0x56, 0x34, 0x12, // 3: 0x12345678
        0xa0, 0x01, 0xac, 0x02, // 20: 300
    ];

    #[test]
    fn parse_and_serialize_round_trip() {
        let config = WireCodec.parse(SAMPLE).unwrap();
        assert_eq!(config.fields.len(), 4);
        assert_eq!(WireCodec.board_version(&config), Some("v0.7.5"));
        assert_eq!(config.fields[3].value, WireValue::Varint(300));
        assert_eq!(WireCodec.serialize(&config), SAMPLE);
    }

    #[test]
    fn json_round_trip() {
        let config = WireCodec.parse(SAMPLE).unwrap();
        let json = WireCodec.to_json(&config).unwrap();
        assert!(json.contains("\"string\": \"v0.7.5\""));
        assert_eq!(WireCodec.parse_json(&json).unwrap(), config);
    }

    #[test]
    fn text_shows_nested_messages() {
        let config = WireCodec.parse(SAMPLE).unwrap();
        let text = WireCodec.to_text(&config);
        assert!(text.starts_with("1: \"v0.7.5\"\n"));
        assert!(text.contains("2 {\n  1: 3\n  2: 1\n}\n"));
    }

    #[test]
    fn set_board_version() {
        let mut config = WireCodec.parse(SAMPLE).unwrap();
        config.set_board_version("v0.7.5-COOL");
        let config = WireCodec.parse(&WireCodec.serialize(&config)).unwrap();
        assert_eq!(config.board_version(), Some("v0.7.5-COOL"));
        assert_eq!(config.fields.len(), 4);

        let mut empty = WireCodec.new_empty();
        assert_eq!(empty.board_version(), None);
        empty.set_board_version("v1.0.0");
        assert_eq!(WireCodec.serialize(&empty), b"\x0a\x06v1.0.0");
    }

    #[test]
    fn empty_board_version() {
        let mut config = WireCodec.new_empty();
        config.set_board_version("");
        let bytes = WireCodec.serialize(&config);
        assert_eq!(bytes, b"\x0a\x00");

        let config = WireCodec.parse(&bytes).unwrap();
        assert_eq!(config.board_version(), Some(""));
        // other empty fields stay raw bytes
        let config = WireCodec.parse(b"\x12\x00").unwrap();
        assert_eq!(config.fields[0].value, WireValue::Bytes(Vec::new()));
    }

    #[test]
    fn truncated() {
        assert_eq!(
            WireCodec.parse(&SAMPLE[..5]),
            Err(ConfigParseError::Truncated(SAMPLE[..5].len()))
        );
    }

    #[test]
    fn groups_are_rejected() {
        assert!(matches!(
            WireCodec.parse(&[0x0b, 0x0c]),
            Err(ConfigParseError::UnsupportedWireType { field: 1, wire_type: 3, .. })
        ));
    }

    #[test]
    fn bad_json() {
        assert!(matches!(
            WireCodec.parse_json("{\"fields\": 3}"),
            Err(ConfigParseError::Json(_))
        ));
        assert_eq!(
            WireCodec.parse_json("{\"fields\": [{\"number\": 0, \"value\": {\"varint\": 1}}]}"),
            Err(ConfigParseError::InvalidFieldNumber(0))
        );
    }
}
