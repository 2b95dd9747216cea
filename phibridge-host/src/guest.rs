//! The seam between the call protocol and a concrete module instance.
//!
//! The marshaller, buffer manager and registry only ever talk to a module
//! through [`GuestModule`]. The production implementation is
//! [`WasmGuest`](crate::instance::WasmGuest); tests use
//! [`StubModule`](crate::testing::StubModule).

use crate::abi::CallSignature;
use phibridge_core::error::Result;

/// Arguments passed to a codec export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallArgs {
    /// Pointer and explicit length.
    PtrLen {
        /// Offset of the input buffer.
        ptr: u32,
        /// Payload length in bytes.
        len: u32,
    },
    /// Pointer to a null-terminated input.
    Ptr(u32),
}

/// Raw result of a codec export, before sentinel interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawReturn {
    /// Pointer to a null-terminated byte string.
    Pointer(u32),
    /// Explicit `(size, ptr)` pair.
    SizePtr {
        /// Response length in bytes.
        size: u32,
        /// Offset of the response buffer.
        ptr: u32,
    },
}

/// A live module instance seen from the host.
///
/// Implementations own the instance, its export table and its linear
/// memory. Methods take `&mut self`: a module instance serves one exchange
/// at a time.
pub trait GuestModule {
    /// A bound codec export. Cloning yields the same callable.
    type Export: Clone;

    /// Look up an export and bind it with the given signature.
    ///
    /// Returns `Ok(None)` when the export table has no such name, and an
    /// error when the export exists with an incompatible type.
    fn resolve_export(&mut self, name: &str, signature: CallSignature)
    -> Result<Option<Self::Export>>;

    /// Call the module allocator. `0` means allocation failed.
    fn malloc(&mut self, size: u32) -> Result<u32>;

    /// Call the module's free primitive.
    fn free(&mut self, ptr: u32, size: u32) -> Result<()>;

    /// Invoke a bound codec export.
    fn call(&mut self, function: &str, export: &Self::Export, args: CallArgs)
    -> Result<RawReturn>;

    /// Current contents of linear memory.
    fn memory(&self) -> &[u8];

    /// Mutable view of linear memory.
    fn memory_mut(&mut self) -> &mut [u8];
}
