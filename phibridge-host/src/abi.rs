//! Module ABI description.
//!
//! Codec modules have shipped with several incompatible calling conventions.
//! An [`AbiConfig`] pins down the one in effect for a module build; it is
//! chosen once when the bridge is created and never negotiated at call time.
//!
//! Two payloads cross the boundary: the opaque raw bytes (input of
//! `parse_<kind>`, output of `build_<kind>`) and the encoded record (the
//! other way round). `raw_transport` governs the first, `format` and
//! `transport` the second.
//!
//! | Preset | Params | Returns | Free | Record | Raw bytes |
//! |:-------|:-------|:--------|:-----|:-------|:----------|
//! | `packed` (default) | `(ptr, len)` | `(size, ptr)` | `free(ptr, size)` | MessagePack | as is |
//! | `json_sized` | `(ptr, len)` | `(size, ptr)` | `free(ptr, size)` | JSON | as is |
//! | `base64_cstring` | `(ptr)` | `ptr` to C string | `free(ptr, size)` | base64 MessagePack | base64 |
//! | `json_cstring` | `(ptr)` | `ptr` to C string | `free(ptr, size)` | JSON | base64 |
//! | `legacy_cstring` | `(ptr)` | `ptr` to C string | `free_str(ptr)` | JSON, never freed | base64 |

use phibridge_core::codec::{PayloadFormat, TextTransport};
use phibridge_core::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Parameters accepted by `parse_<kind>` / `build_<kind>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamShape {
    /// `(ptr, len)`: the length is passed explicitly.
    #[default]
    PtrLen,
    /// `(ptr)`: the input is a null-terminated string.
    Ptr,
}

/// Result shape of `parse_<kind>` / `build_<kind>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnShape {
    /// A `(size, ptr)` pair; the size is authoritative.
    #[default]
    SizePtr,
    /// A single pointer to a null-terminated byte string.
    NullTerminated,
}

/// Signature of the module's free primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreeShape {
    /// `free(ptr, size)`: the size used at allocation time is required.
    #[default]
    Sized,
    /// `free(ptr)`: the module recovers the size itself.
    Unsized,
}

/// Who frees the buffer returned by a codec export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputOwnership {
    /// The host frees the output after copying it out.
    #[default]
    Caller,
    /// The host never frees the output. Leaks module memory on every call.
    Module,
}

/// The parameter/return pair a codec export is bound with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSignature {
    /// Parameter shape.
    pub params: ParamShape,
    /// Return shape.
    pub returns: ReturnShape,
}

/// Complete description of a module build's calling convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbiConfig {
    /// Parameter shape of codec exports.
    pub params: ParamShape,
    /// Return shape of codec exports.
    pub returns: ReturnShape,
    /// Signature of the free primitive.
    pub free: FreeShape,
    /// Structured payload format.
    pub format: PayloadFormat,
    /// Text re-encoding applied to encoded records.
    pub transport: TextTransport,
    /// Text re-encoding applied to the opaque raw bytes.
    pub raw_transport: TextTransport,
    /// Ownership of returned buffers.
    pub output: OutputOwnership,
    /// Name of the allocator export.
    pub malloc_export: String,
    /// Name of the free export.
    pub free_export: String,
}

impl Default for AbiConfig {
    fn default() -> Self {
        Self::packed()
    }
}

impl AbiConfig {
    /// Current convention: sized in, sized out, MessagePack payloads.
    pub fn packed() -> Self {
        Self {
            params: ParamShape::PtrLen,
            returns: ReturnShape::SizePtr,
            free: FreeShape::Sized,
            format: PayloadFormat::Msgpack,
            transport: TextTransport::Raw,
            raw_transport: TextTransport::Raw,
            output: OutputOwnership::Caller,
            malloc_export: "malloc".to_string(),
            free_export: "free".to_string(),
        }
    }

    /// Sized in, sized out, JSON payloads.
    pub fn json_sized() -> Self {
        Self {
            format: PayloadFormat::Json,
            ..Self::packed()
        }
    }

    /// C strings in and out, everything carried as base64 text.
    pub fn base64_cstring() -> Self {
        Self {
            params: ParamShape::Ptr,
            returns: ReturnShape::NullTerminated,
            transport: TextTransport::Base64,
            raw_transport: TextTransport::Base64,
            ..Self::packed()
        }
    }

    /// C strings in and out, JSON records, base64 raw bytes.
    pub fn json_cstring() -> Self {
        Self {
            params: ParamShape::Ptr,
            returns: ReturnShape::NullTerminated,
            format: PayloadFormat::Json,
            raw_transport: TextTransport::Base64,
            ..Self::packed()
        }
    }

    /// The first module build: C strings, `free_str(ptr)`, and outputs the
    /// host never frees.
    pub fn legacy_cstring() -> Self {
        Self {
            free: FreeShape::Unsized,
            output: OutputOwnership::Module,
            free_export: "free_str".to_string(),
            ..Self::json_cstring()
        }
    }

    /// Look up a preset by name.
    pub fn preset(name: &str) -> Result<Self> {
        match name.to_lowercase().replace('-', "_").as_str() {
            "packed" | "msgpack" => Ok(Self::packed()),
            "json_sized" => Ok(Self::json_sized()),
            "base64_cstring" => Ok(Self::base64_cstring()),
            "json_cstring" => Ok(Self::json_cstring()),
            "legacy_cstring" => Ok(Self::legacy_cstring()),
            other => Err(BridgeError::Config {
                key: "abi".to_string(),
                cause: format!("unknown ABI preset '{}'", other),
            }),
        }
    }

    /// Set the payload format.
    pub fn with_format(mut self, format: PayloadFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the text transport.
    pub fn with_transport(mut self, transport: TextTransport) -> Self {
        self.transport = transport;
        self
    }

    /// Set the raw bytes transport.
    pub fn with_raw_transport(mut self, transport: TextTransport) -> Self {
        self.raw_transport = transport;
        self
    }

    /// Set the output ownership rule.
    pub fn with_output(mut self, output: OutputOwnership) -> Self {
        self.output = output;
        self
    }

    /// Set the allocator export names.
    pub fn with_allocator(mut self, malloc: impl Into<String>, free: impl Into<String>) -> Self {
        self.malloc_export = malloc.into();
        self.free_export = free.into();
        self
    }

    /// Signature used to bind codec exports.
    pub fn signature(&self) -> CallSignature {
        CallSignature {
            params: self.params,
            returns: self.returns,
        }
    }

    /// Whether payloads go through null-terminated framing in either direction.
    pub fn uses_terminators(&self) -> bool {
        self.params == ParamShape::Ptr || self.returns == ReturnShape::NullTerminated
    }

    /// Whether neither payload can ever contain a `0x00` byte.
    pub fn is_text_safe(&self) -> bool {
        let records = self.transport.is_text_safe() || self.format == PayloadFormat::Json;
        records && self.raw_transport.is_text_safe()
    }

    /// Check the configuration for contradictions.
    ///
    /// Raw binary payloads cannot be framed with a terminator: the first
    /// `0x00` inside the payload would end it early. Such combinations are
    /// rejected instead of silently truncating data.
    pub fn validate(&self) -> Result<()> {
        if self.uses_terminators() && !self.is_text_safe() {
            return Err(BridgeError::InvalidAbi {
                cause: format!(
                    "{} records over {} transport with {} raw bytes may contain 0x00 \
                     and cannot be null-terminated",
                    self.format, self.transport, self.raw_transport
                ),
            });
        }
        if self.malloc_export.is_empty() || self.free_export.is_empty() {
            return Err(BridgeError::InvalidAbi {
                cause: "allocator export names must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

impl FromStr for AbiConfig {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::preset(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_packed() {
        let abi = AbiConfig::default();
        assert_eq!(abi, AbiConfig::packed());
        assert_eq!(abi.params, ParamShape::PtrLen);
        assert_eq!(abi.returns, ReturnShape::SizePtr);
        assert_eq!(abi.output, OutputOwnership::Caller);
        assert!(abi.validate().is_ok());
    }

    #[test]
    fn every_preset_validates() {
        for name in [
            "packed",
            "json_sized",
            "base64_cstring",
            "json_cstring",
            "legacy-cstring",
        ] {
            let abi = AbiConfig::preset(name).unwrap();
            assert!(abi.validate().is_ok(), "preset {} failed validation", name);
        }
    }

    #[test]
    fn legacy_preset_leaks_output() {
        let abi = AbiConfig::legacy_cstring();
        assert_eq!(abi.output, OutputOwnership::Module);
        assert_eq!(abi.free, FreeShape::Unsized);
        assert_eq!(abi.free_export, "free_str");
    }

    #[test]
    fn raw_binary_over_terminators_is_rejected() {
        let abi = AbiConfig::json_cstring().with_format(PayloadFormat::Msgpack);
        let err = abi.validate().unwrap_err();
        assert_eq!(err.code(), "B202");

        let abi = AbiConfig {
            returns: ReturnShape::NullTerminated,
            ..AbiConfig::packed()
        };
        assert!(abi.validate().is_err());

        let abi = abi.with_transport(TextTransport::Base64);
        assert!(abi.validate().is_err());

        let abi = abi.with_raw_transport(TextTransport::Base64);
        assert!(abi.validate().is_ok());
    }

    #[test]
    fn deserializes_with_defaults() {
        let abi: AbiConfig = serde_json::from_str(
            r#"{"params": "ptr", "returns": "null_terminated", "format": "json", "raw_transport": "base64"}"#,
        )
        .unwrap();
        assert_eq!(abi, AbiConfig::json_cstring());
    }

    #[test]
    fn empty_allocator_names_are_rejected() {
        let abi = AbiConfig::packed().with_allocator("", "free");
        assert!(abi.validate().is_err());
    }

    #[test]
    fn unknown_preset() {
        let err = "wasm64".parse::<AbiConfig>().unwrap_err();
        assert!(err.is_config_error());
    }
}
