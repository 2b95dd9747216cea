//! Base64 text transport for null-terminated channels.

use super::{Codec, TextTransport};
use crate::error::{BridgeError, Result};
use crate::value::Record;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

impl TextTransport {
    /// Put opaque bytes into their transported form.
    pub fn wrap(self, bytes: &[u8]) -> Vec<u8> {
        match self {
            Self::Raw => bytes.to_vec(),
            Self::Base64 => STANDARD.encode(bytes).into_bytes(),
        }
    }

    /// Recover opaque bytes from their transported form.
    pub fn unwrap(self, bytes: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Raw => Ok(bytes.to_vec()),
            Self::Base64 => STANDARD
                .decode(bytes)
                .map_err(|e| BridgeError::decode(format!("invalid base64 payload: {}", e))),
        }
    }

    /// Whether transported bytes are guaranteed free of `0x00`.
    pub fn is_text_safe(self) -> bool {
        self == Self::Base64
    }
}

/// Wraps another codec and re-encodes its payload as base64 text.
///
/// The wrapped payload may contain any byte; the transported form is plain
/// ASCII and therefore safe to frame with a `0x00` terminator.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Transport<C> {
    inner: C,
}

impl<C: Codec> Base64Transport<C> {
    /// Wrap a codec.
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

impl<C: Codec> Codec for Base64Transport<C> {
    fn name(&self) -> &'static str {
        match self.inner.name() {
            "msgpack" => "base64+msgpack",
            "json" => "base64+json",
            _ => "base64",
        }
    }

    fn encode(&self, record: &Record) -> Result<Vec<u8>> {
        let payload = self.inner.encode(record)?;
        Ok(TextTransport::Base64.wrap(&payload))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Record> {
        let payload = TextTransport::Base64.unwrap(bytes)?;
        self.inner.decode(&payload)
    }

    fn is_text_safe(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MessagePackCodec;
    use crate::value::{Value, record};

    #[test]
    fn binary_fields_survive_text_transport() {
        let codec = Base64Transport::new(MessagePackCodec);
        let rec = record([("blob", Value::Bytes(vec![0x00, 0x00, 0xff]))]);
        let bytes = codec.encode(&rec).unwrap();
        assert!(bytes.iter().all(u8::is_ascii));
        assert!(!bytes.contains(&0));
        assert_eq!(codec.decode(&bytes).unwrap(), rec);
    }

    #[test]
    fn raw_transport_is_identity() {
        assert_eq!(TextTransport::Raw.wrap(b"\x00\x01"), b"\x00\x01");
        assert_eq!(TextTransport::Raw.unwrap(b"\x00").unwrap(), b"\x00");
        assert!(!TextTransport::Raw.is_text_safe());
    }

    #[test]
    fn base64_transport_of_opaque_bytes() {
        let wrapped = TextTransport::Base64.wrap(&[0x00, 0xff, 0x10]);
        assert_eq!(wrapped, b"AP8Q");
        assert_eq!(
            TextTransport::Base64.unwrap(&wrapped).unwrap(),
            vec![0x00, 0xff, 0x10]
        );
    }

    #[test]
    fn rejects_invalid_base64() {
        let codec = Base64Transport::new(MessagePackCodec);
        let err = codec.decode(b"!!not base64!!").unwrap_err();
        assert_eq!(err.code(), "B003");
    }
}
