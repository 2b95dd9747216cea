//! Prelude for convenient imports.

pub use crate::codec::{
    Base64Transport, Codec, JsonCodec, MessagePackCodec, PayloadFormat, TextTransport, codec_for,
};
pub use crate::error::{BridgeError, Result};
pub use crate::value::{Record, Value, record};
