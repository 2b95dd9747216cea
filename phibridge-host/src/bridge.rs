//! Typed decode/encode calls against a codec module.
//!
//! A [`Bridge`] owns one module instance together with the export cache and
//! the buffer bookkeeping for it. `decode(kind, bytes)` sends opaque bytes to
//! `parse_<kind>` and decodes the answer into a [`Record`];
//! `encode(kind, record)` encodes the record, sends it to `build_<kind>` and
//! returns the bytes the module built.

use crate::abi::{AbiConfig, OutputOwnership};
use crate::buffer::BufferStats;
use crate::guest::GuestModule;
use crate::marshal::CallMarshaller;
use crate::registry::{Direction, FunctionRegistry, ResolvedFunction};
use parking_lot::Mutex;
use phibridge_core::codec::{Codec, codec_for};
use phibridge_core::error::{BridgeError, Result};
use phibridge_core::value::Record;
use std::sync::Arc;

/// Record kinds exported by the save codec module.
pub const KNOWN_KINDS: [&str; 5] = ["user", "summary", "game_record", "game_progress", "game_key"];

/// A bound codec module.
pub struct Bridge<M: GuestModule> {
    module: M,
    abi: AbiConfig,
    codec: Box<dyn Codec>,
    registry: FunctionRegistry<M::Export>,
    marshaller: CallMarshaller,
    poisoned: bool,
}

impl<M: GuestModule> Bridge<M> {
    /// Bind a module with the codec implied by `abi`.
    pub fn new(module: M, abi: AbiConfig) -> Result<Self> {
        abi.validate()?;
        let codec = codec_for(abi.format, abi.transport);
        Self::with_codec(module, abi, codec)
    }

    /// Bind a module with a custom record codec.
    ///
    /// The codec replaces the one `abi.format` / `abi.transport` would pick.
    /// Under null-terminated framing it must be text-safe.
    pub fn with_codec(module: M, abi: AbiConfig, codec: Box<dyn Codec>) -> Result<Self> {
        if abi.uses_terminators() && !(codec.is_text_safe() && abi.raw_transport.is_text_safe()) {
            return Err(BridgeError::InvalidAbi {
                cause: format!(
                    "{} codec with {} raw bytes cannot be null-terminated",
                    codec.name(),
                    abi.raw_transport
                ),
            });
        }
        if abi.malloc_export.is_empty() || abi.free_export.is_empty() {
            return Err(BridgeError::InvalidAbi {
                cause: "allocator export names must not be empty".to_string(),
            });
        }

        if abi.output == OutputOwnership::Module {
            tracing::warn!(
                free_export = %abi.free_export,
                "Module keeps ownership of call outputs; every call leaks its output buffer"
            );
        }
        tracing::debug!(
            codec = codec.name(),
            params = ?abi.params,
            returns = ?abi.returns,
            "Bridge bound"
        );

        Ok(Self {
            registry: FunctionRegistry::new(abi.signature()),
            marshaller: CallMarshaller::new(&abi),
            module,
            abi,
            codec,
            poisoned: false,
        })
    }

    /// Decode the raw bytes of `kind` into a record via `parse_<kind>`.
    pub fn decode(&mut self, kind: &str, raw: &[u8]) -> Result<Record> {
        let request = self.abi.raw_transport.wrap(raw);
        let response = self.exchange(kind, Direction::Decode, &request)?;
        self.codec.decode(&response)
    }

    /// Encode a record of `kind` into raw bytes via `build_<kind>`.
    pub fn encode(&mut self, kind: &str, record: &Record) -> Result<Vec<u8>> {
        let request = self.codec.encode(record)?;
        let response = self.exchange(kind, Direction::Encode, &request)?;
        self.abi.raw_transport.unwrap(&response)
    }

    /// Bind the export for `(kind, direction)` without calling it.
    pub fn resolve(&mut self, kind: &str, direction: Direction) -> Result<&ResolvedFunction<M::Export>> {
        self.ensure_usable()?;
        self.registry.resolve(&mut self.module, kind, direction)
    }

    /// Bind both directions of every kind in `kinds`.
    ///
    /// Stops at the first kind the module does not export.
    pub fn preload<I, S>(&mut self, kinds: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for kind in kinds {
            let kind = kind.as_ref();
            self.resolve(kind, Direction::Decode)?;
            self.resolve(kind, Direction::Encode)?;
        }
        Ok(())
    }

    /// Number of exports bound so far.
    pub fn resolved_count(&self) -> usize {
        self.registry.len()
    }

    /// Buffer counters accumulated over the bridge's lifetime.
    pub fn buffer_stats(&self) -> BufferStats {
        self.marshaller.buffer_stats()
    }

    /// Check if a trap has made the instance unusable.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Get the module.
    pub fn module(&self) -> &M {
        &self.module
    }

    /// Get the module mutably.
    pub fn module_mut(&mut self) -> &mut M {
        &mut self.module
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.poisoned {
            Err(BridgeError::Poisoned)
        } else {
            Ok(())
        }
    }

    fn exchange(&mut self, kind: &str, direction: Direction, request: &[u8]) -> Result<Vec<u8>> {
        self.ensure_usable()?;
        let span = tracing::debug_span!("exchange", kind, %direction);
        let _enter = span.enter();

        let resolved = self.registry.resolve(&mut self.module, kind, direction)?;
        let result = self
            .marshaller
            .invoke(&mut self.module, &resolved.name, &resolved.export, request);

        if let Err(e) = &result {
            if e.is_fatal() {
                tracing::error!(kind, %direction, error = %e, "Module trapped; bridge poisoned");
                self.poisoned = true;
            }
        }
        result
    }
}

macro_rules! kind_methods {
    ($($kind:literal => $decode:ident, $encode:ident;)*) => {
        impl<M: GuestModule> Bridge<M> {
            $(
                #[doc = concat!("Decode a `", $kind, "` payload via `parse_", $kind, "`.")]
                pub fn $decode(&mut self, raw: &[u8]) -> Result<Record> {
                    self.decode($kind, raw)
                }

                #[doc = concat!("Encode a `", $kind, "` record via `build_", $kind, "`.")]
                pub fn $encode(&mut self, record: &Record) -> Result<Vec<u8>> {
                    self.encode($kind, record)
                }
            )*
        }
    };
}

kind_methods! {
    "user" => decode_user, encode_user;
    "summary" => decode_summary, encode_summary;
    "game_record" => decode_game_record, encode_game_record;
    "game_progress" => decode_game_progress, encode_game_progress;
    "game_key" => decode_game_key, encode_game_key;
}

/// A bridge shared between threads, one exchange at a time.
pub struct SharedBridge<M: GuestModule> {
    inner: Arc<Mutex<Bridge<M>>>,
}

impl<M: GuestModule> Clone for SharedBridge<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: GuestModule> SharedBridge<M> {
    /// Share a bridge.
    pub fn new(bridge: Bridge<M>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(bridge)),
        }
    }

    /// See [`Bridge::decode`].
    pub fn decode(&self, kind: &str, raw: &[u8]) -> Result<Record> {
        self.inner.lock().decode(kind, raw)
    }

    /// See [`Bridge::encode`].
    pub fn encode(&self, kind: &str, record: &Record) -> Result<Vec<u8>> {
        self.inner.lock().encode(kind, record)
    }

    /// Run `f` with exclusive access to the bridge.
    pub fn with<T>(&self, f: impl FnOnce(&mut Bridge<M>) -> T) -> T {
        f(&mut self.inner.lock())
    }

    /// Check if the shared instance is poisoned.
    pub fn is_poisoned(&self) -> bool {
        self.inner.lock().is_poisoned()
    }
}

impl<M: GuestModule> From<Bridge<M>> for SharedBridge<M> {
    fn from(bridge: Bridge<M>) -> Self {
        Self::new(bridge)
    }
}
