//! phibridge host - call marshalling for WASM codec modules.
//!
//! This crate drives a WebAssembly module that exports `parse_<kind>` and
//! `build_<kind>` functions over its own allocator:
//! - Wasmtime runtime with module caching, fuel and memory limits
//! - Bounds-checked access to module linear memory
//! - Buffer lifecycle over the module's `malloc` / `free`
//! - One request/response exchange per call, for every known ABI variant
//! - Lazy, cached binding of codec exports
//! - Structured logging setup
//!
//! # Example
//!
//! ```no_run
//! use phibridge_host::prelude::*;
//! use std::path::Path;
//!
//! let config = BridgeConfig::from_env()?;
//! let runtime = WasmRuntime::new(config.runtime.clone())?;
//! let mut bridge = Bridge::from_file(&runtime, Path::new("phi_save_codec.wasm"), &config)?;
//!
//! let user = bridge.decode_user(&std::fs::read("user.bin").unwrap_or_default())?;
//! let rebuilt = bridge.encode_user(&user)?;
//! # let _ = rebuilt;
//! # Ok::<(), BridgeError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod abi;
pub mod bridge;
pub mod buffer;
pub mod config;
pub mod guest;
pub mod instance;
pub mod marshal;
pub mod memory;
pub mod observability;
pub mod registry;
pub mod runtime;
pub mod testing;

pub use bridge::{Bridge, KNOWN_KINDS, SharedBridge};
pub use phibridge_core::{BridgeError, Record, Result, Value};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::abi::{AbiConfig, FreeShape, OutputOwnership, ParamShape, ReturnShape};
    pub use crate::bridge::{Bridge, KNOWN_KINDS, SharedBridge};
    pub use crate::buffer::BufferStats;
    pub use crate::config::BridgeConfig;
    pub use crate::guest::GuestModule;
    pub use crate::instance::{WasmExport, WasmGuest};
    pub use crate::registry::Direction;
    pub use crate::runtime::{RuntimeConfig, WasmRuntime};
    pub use phibridge_core::prelude::*;
}
