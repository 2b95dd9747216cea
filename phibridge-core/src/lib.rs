//! phibridge core library
//!
//! This crate provides the host-independent half of phibridge: the
//! structured record model, the payload codecs and the error taxonomy
//! shared by every bridge component.
//!
//! # Key Components
//!
//! - **Value / Record**: the decoded form of a module payload
//! - **Codec**: pluggable record <-> bytes conversion (MessagePack, JSON,
//!   base64 text transport)
//! - **BridgeError**: typed failures with stable error codes
//!
//! # Example
//!
//! ```
//! use phibridge_core::prelude::*;
//!
//! let codec = MessagePackCodec;
//! let user = record([("id", Value::from(1)), ("name", Value::from("a"))]);
//! let bytes = codec.encode(&user)?;
//! assert_eq!(codec.decode(&bytes)?, user);
//! # Ok::<(), BridgeError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod prelude;
pub mod value;

pub use codec::{Codec, PayloadFormat, TextTransport};
pub use error::{BridgeError, Result};
pub use value::{Record, Value};
