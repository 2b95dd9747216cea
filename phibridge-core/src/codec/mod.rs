//! Payload codecs.
//!
//! A [`Codec`] turns a [`Record`] into the bytes handed to a module's
//! `build_<kind>` export and turns the bytes returned by `parse_<kind>` back
//! into a record. The codec is chosen once per bridge from a
//! [`PayloadFormat`] and a [`TextTransport`]:
//!
//! | Format | Transport | Codec | Text-safe |
//! |:-------|:----------|:------|:----------|
//! | `msgpack` | `raw` | [`MessagePackCodec`] | no |
//! | `json` | `raw` | [`JsonCodec`] | yes |
//! | any | `base64` | [`Base64Transport`] | yes |
//!
//! Text-safe codecs never emit a `0x00` byte, so their payloads survive
//! null-terminated framing.

mod json;
mod msgpack;
mod text;

pub use json::JsonCodec;
pub use msgpack::MessagePackCodec;
pub use text::Base64Transport;

use crate::error::Result;
use crate::value::Record;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Converts structured records to and from payload bytes.
pub trait Codec: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Encode a record into payload bytes.
    fn encode(&self, record: &Record) -> Result<Vec<u8>>;

    /// Decode payload bytes into a record.
    fn decode(&self, bytes: &[u8]) -> Result<Record>;

    /// Whether encoded payloads are guaranteed free of `0x00` bytes.
    fn is_text_safe(&self) -> bool;
}

impl<C: Codec + ?Sized> Codec for Box<C> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn encode(&self, record: &Record) -> Result<Vec<u8>> {
        (**self).encode(record)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Record> {
        (**self).decode(bytes)
    }

    fn is_text_safe(&self) -> bool {
        (**self).is_text_safe()
    }
}

/// Structured serialization format understood by the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// MessagePack with named fields.
    #[default]
    #[serde(alias = "messagepack")]
    Msgpack,
    /// UTF-8 JSON text.
    Json,
}

/// Re-encoding applied on top of the payload format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextTransport {
    /// Payload bytes cross the boundary unchanged.
    #[default]
    Raw,
    /// Payload bytes are base64 text.
    Base64,
}

impl fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Msgpack => write!(f, "msgpack"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl FromStr for PayloadFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "msgpack" | "messagepack" => Ok(Self::Msgpack),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown payload format '{}'", other)),
        }
    }
}

impl fmt::Display for TextTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw => write!(f, "raw"),
            Self::Base64 => write!(f, "base64"),
        }
    }
}

/// Build the codec for a format and transport pair.
pub fn codec_for(format: PayloadFormat, transport: TextTransport) -> Box<dyn Codec> {
    match (format, transport) {
        (PayloadFormat::Msgpack, TextTransport::Raw) => Box::new(MessagePackCodec),
        (PayloadFormat::Json, TextTransport::Raw) => Box::new(JsonCodec),
        (PayloadFormat::Msgpack, TextTransport::Base64) => {
            Box::new(Base64Transport::new(MessagePackCodec))
        }
        (PayloadFormat::Json, TextTransport::Base64) => Box::new(Base64Transport::new(JsonCodec)),
    }
}
