//! In-process stand-in for a codec module.
//!
//! [`StubModule`] implements [`GuestModule`] over a plain byte vector with a
//! bump allocator. It counts allocator and export-table traffic and records
//! allocator misuse (double frees, size mismatches, frees of unknown
//! pointers) instead of corrupting itself, so tests can assert on buffer
//! balance and lazy binding.
//!
//! # Example
//!
//! ```
//! use phibridge_host::prelude::*;
//! use phibridge_host::testing::StubModule;
//!
//! let module = StubModule::new().with_echo("parse_user");
//! let mut bridge = Bridge::new(module, AbiConfig::packed())?;
//! let _ = bridge.decode("user", b"\x80");
//! assert!(bridge.module().violations().is_empty());
//! # Ok::<(), BridgeError>(())
//! ```

use crate::abi::{CallSignature, ParamShape, ReturnShape};
use crate::guest::{CallArgs, GuestModule, RawReturn};
use crate::memory::{LinearMemory, LinearMemoryMut};
use phibridge_core::error::{BridgeError, Result};
use std::collections::{HashMap, HashSet};

/// Default stub memory size (one WASM page).
pub const STUB_MEMORY_SIZE: usize = 64 * 1024;

/// First offset handed out by the stub allocator.
const HEAP_BASE: u32 = 16;

/// What a stub export answers with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubReply {
    /// Return these bytes in a freshly allocated buffer.
    Bytes(Vec<u8>),
    /// Return the null pointer sentinel.
    Fail,
    /// Return a non-null pointer with size `0` (sized convention only).
    ZeroSize,
}

/// Handler invoked with the input an export received.
pub type StubHandler = Box<dyn FnMut(&[u8]) -> StubReply + Send>;

/// A bound stub export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubExport {
    /// Export name.
    pub name: String,
    /// Signature the export was bound with.
    pub signature: CallSignature,
}

/// Traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StubCounters {
    /// Calls to `malloc`, including ones made for outputs.
    pub mallocs: u64,
    /// Calls to `free`.
    pub frees: u64,
    /// Export table lookups.
    pub lookups: u64,
    /// Codec export invocations.
    pub calls: u64,
}

/// A counting, in-memory codec module.
pub struct StubModule {
    memory: Vec<u8>,
    next: u32,
    live: HashMap<u32, u32>,
    exports: HashMap<String, StubHandler>,
    traps: HashSet<String>,
    fail_allocations: bool,
    counters: StubCounters,
    lookups_by_name: HashMap<String, u64>,
    violations: Vec<String>,
    last_input: Option<Vec<u8>>,
}

impl Default for StubModule {
    fn default() -> Self {
        Self::new()
    }
}

impl StubModule {
    /// Create a stub with no exports and one page of memory.
    pub fn new() -> Self {
        Self::with_memory_size(STUB_MEMORY_SIZE)
    }

    /// Create a stub with `size` bytes of memory.
    pub fn with_memory_size(size: usize) -> Self {
        Self {
            memory: vec![0; size],
            next: HEAP_BASE,
            live: HashMap::new(),
            exports: HashMap::new(),
            traps: HashSet::new(),
            fail_allocations: false,
            counters: StubCounters::default(),
            lookups_by_name: HashMap::new(),
            violations: Vec::new(),
            last_input: None,
        }
    }

    /// Add an export driven by a handler.
    pub fn with_export(
        mut self,
        name: impl Into<String>,
        handler: impl FnMut(&[u8]) -> StubReply + Send + 'static,
    ) -> Self {
        self.exports.insert(name.into(), Box::new(handler));
        self
    }

    /// Add an export that always answers with `reply`.
    pub fn with_reply(self, name: impl Into<String>, reply: StubReply) -> Self {
        self.with_export(name, move |_| reply.clone())
    }

    /// Add an export that answers with the fixed `bytes`.
    pub fn with_fixed(self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.with_reply(name, StubReply::Bytes(bytes.into()))
    }

    /// Add an export that returns its input unchanged.
    pub fn with_echo(self, name: impl Into<String>) -> Self {
        self.with_export(name, |input| StubReply::Bytes(input.to_vec()))
    }

    /// Make an export trap when called.
    pub fn with_trap(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.traps.insert(name.clone());
        self.exports
            .entry(name)
            .or_insert_with(|| Box::new(|_: &[u8]| StubReply::Fail));
        self
    }

    /// Make `malloc` return the null sentinel.
    pub fn fail_allocations(&mut self, fail: bool) {
        self.fail_allocations = fail;
    }

    /// Get the traffic counters.
    pub fn counters(&self) -> StubCounters {
        self.counters
    }

    /// Number of export table lookups for `name`.
    pub fn lookups_of(&self, name: &str) -> u64 {
        self.lookups_by_name.get(name).copied().unwrap_or(0)
    }

    /// Number of allocations not yet freed.
    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }

    /// Allocator misuse observed so far.
    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    /// The input most recently passed to a codec export.
    pub fn last_input(&self) -> Option<&[u8]> {
        self.last_input.as_deref()
    }

    fn allocate(&mut self, size: u32) -> u32 {
        self.counters.mallocs += 1;
        if self.fail_allocations || size == 0 {
            return 0;
        }
        // 8-byte alignment, like the module's own allocator.
        let offset = self.next;
        let end = offset as usize + size as usize;
        if end > self.memory.len() {
            return 0;
        }
        self.next = ((end as u32) + 7) & !7;
        self.live.insert(offset, size);
        offset
    }

    fn read_input(&self, args: CallArgs) -> Result<Vec<u8>> {
        let memory = LinearMemory::new(&self.memory);
        match args {
            CallArgs::PtrLen { ptr: 0, .. } | CallArgs::Ptr(0) => Ok(Vec::new()),
            CallArgs::PtrLen { ptr, len } => memory.read(ptr, len),
            CallArgs::Ptr(ptr) => memory.read_terminated(ptr),
        }
    }

    fn place_output(&mut self, bytes: &[u8], returns: ReturnShape) -> Result<RawReturn> {
        let terminated = returns == ReturnShape::NullTerminated;
        let size = (bytes.len() + usize::from(terminated)) as u32;
        let ptr = self.allocate(size);
        if ptr != 0 {
            let mut memory = LinearMemoryMut::new(&mut self.memory);
            memory.write(ptr, bytes)?;
            if terminated {
                memory.write(ptr + bytes.len() as u32, &[0])?;
            }
        }
        Ok(match returns {
            ReturnShape::SizePtr if ptr == 0 => RawReturn::SizePtr { size: 0, ptr: 0 },
            ReturnShape::SizePtr => RawReturn::SizePtr { size, ptr },
            ReturnShape::NullTerminated => RawReturn::Pointer(ptr),
        })
    }
}

impl GuestModule for StubModule {
    type Export = StubExport;

    fn resolve_export(
        &mut self,
        name: &str,
        signature: CallSignature,
    ) -> Result<Option<StubExport>> {
        self.counters.lookups += 1;
        *self.lookups_by_name.entry(name.to_string()).or_default() += 1;
        Ok(self.exports.contains_key(name).then(|| StubExport {
            name: name.to_string(),
            signature,
        }))
    }

    fn malloc(&mut self, size: u32) -> Result<u32> {
        Ok(self.allocate(size))
    }

    fn free(&mut self, ptr: u32, size: u32) -> Result<()> {
        self.counters.frees += 1;
        match self.live.remove(&ptr) {
            Some(allocated) if allocated == size => {}
            Some(allocated) => self.violations.push(format!(
                "free({}, {}) of a {}-byte allocation",
                ptr, size, allocated
            )),
            None => self
                .violations
                .push(format!("free({}, {}) of an unknown or freed pointer", ptr, size)),
        }
        Ok(())
    }

    fn call(&mut self, function: &str, export: &StubExport, args: CallArgs) -> Result<RawReturn> {
        self.counters.calls += 1;
        if self.traps.contains(&export.name) {
            return Err(BridgeError::Trap {
                function: function.to_string(),
                cause: "wasm trap: wasm `unreachable` instruction executed".to_string(),
            });
        }
        match (args, export.signature.params) {
            (CallArgs::PtrLen { .. }, ParamShape::PtrLen) | (CallArgs::Ptr(_), ParamShape::Ptr) => {}
            _ => {
                return Err(BridgeError::Trap {
                    function: function.to_string(),
                    cause: "signature mismatch".to_string(),
                });
            }
        }

        let input = self.read_input(args)?;
        let handler = self
            .exports
            .get_mut(&export.name)
            .ok_or_else(|| BridgeError::Trap {
                function: function.to_string(),
                cause: "export vanished".to_string(),
            })?;
        let reply = handler(&input);
        self.last_input = Some(input);

        let returns = export.signature.returns;
        match reply {
            StubReply::Bytes(bytes) => self.place_output(&bytes, returns),
            StubReply::Fail => Ok(match returns {
                ReturnShape::SizePtr => RawReturn::SizePtr { size: 0, ptr: 0 },
                ReturnShape::NullTerminated => RawReturn::Pointer(0),
            }),
            StubReply::ZeroSize => Ok(RawReturn::SizePtr {
                size: 0,
                ptr: HEAP_BASE,
            }),
        }
    }

    fn memory(&self) -> &[u8] {
        &self.memory
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::AbiConfig;

    #[test]
    fn allocator_is_aligned_and_tracked() {
        let mut module = StubModule::new();
        let a = module.malloc(3).unwrap();
        let b = module.malloc(5).unwrap();
        assert_eq!(a, HEAP_BASE);
        assert_eq!(b % 8, 0);
        assert!(b > a);
        assert_eq!(module.live_allocations(), 2);
    }

    #[test]
    fn records_free_misuse() {
        let mut module = StubModule::new();
        let ptr = module.malloc(8).unwrap();
        module.free(ptr, 4).unwrap();
        module.free(ptr, 8).unwrap();
        assert_eq!(module.violations().len(), 2);
    }

    #[test]
    fn exhausted_memory_returns_sentinel() {
        let mut module = StubModule::with_memory_size(64);
        assert_eq!(module.malloc(128).unwrap(), 0);
        assert_eq!(module.malloc(0).unwrap(), 0);
    }

    #[test]
    fn lookups_are_counted_per_name() {
        let mut module = StubModule::new().with_echo("parse_user");
        let signature = AbiConfig::packed().signature();
        assert!(module.resolve_export("parse_user", signature).unwrap().is_some());
        assert!(module.resolve_export("parse_nope", signature).unwrap().is_none());
        assert_eq!(module.counters().lookups, 2);
        assert_eq!(module.lookups_of("parse_user"), 1);
    }
}
