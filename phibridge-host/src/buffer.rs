//! Buffer lifecycle inside module memory.
//!
//! Every buffer the host allocates through the module's `malloc` is freed
//! through the module's free primitive with the exact size it was allocated
//! with. [`BufferManager::with_acquired`] scopes an allocation to a closure
//! so that every exit path, including errors, releases it.

use crate::guest::GuestModule;
use crate::memory::{GuestPtr, LinearMemoryMut};
use phibridge_core::error::{BridgeError, Result};

/// Allocation counters for one bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Handles produced by `acquire`.
    pub acquired: u64,
    /// Module-allocated output handles taken over by the host.
    pub adopted: u64,
    /// Handles passed to `release`.
    pub released: u64,
}

impl BufferStats {
    /// Handles acquired or adopted but not yet released.
    pub fn outstanding(&self) -> u64 {
        (self.acquired + self.adopted).saturating_sub(self.released)
    }

    /// Check that every owned handle has been released exactly once.
    pub fn is_balanced(&self) -> bool {
        self.acquired + self.adopted == self.released
    }
}

/// Wraps the module allocator into owned `(pointer, size)` handles.
#[derive(Debug, Default)]
pub struct BufferManager {
    stats: BufferStats,
}

impl BufferManager {
    /// Create a new manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the allocation counters.
    pub fn stats(&self) -> BufferStats {
        self.stats
    }

    /// Allocate a module buffer and copy `payload` into it.
    ///
    /// With `terminated`, one extra byte is allocated for a trailing `0x00`
    /// and the handle's size includes it. An empty, unterminated payload is
    /// not allocated; the null handle is returned instead.
    pub fn acquire<M: GuestModule>(
        &mut self,
        module: &mut M,
        payload: &[u8],
        terminated: bool,
    ) -> Result<GuestPtr> {
        if terminated && payload.contains(&0) {
            return Err(BridgeError::encode(
                "payload contains 0x00 and cannot be passed as a null-terminated string",
            ));
        }

        let size = payload.len() + usize::from(terminated);
        if size == 0 {
            self.stats.acquired += 1;
            return Ok(GuestPtr::null());
        }
        let size = u32::try_from(size).map_err(|_| BridgeError::AllocationFailure {
            requested: size as u64,
        })?;

        let offset = module.malloc(size)?;
        if offset == 0 {
            return Err(BridgeError::AllocationFailure {
                requested: size.into(),
            });
        }
        let handle = GuestPtr::new(offset, size);
        tracing::trace!(offset, size, "Acquired module buffer");

        let mut memory = LinearMemoryMut::new(module.memory_mut());
        let written = memory.write(offset, payload).and_then(|()| {
            if terminated {
                memory.write(offset + payload.len() as u32, &[0])
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            module.free(handle.offset, handle.size)?;
            return Err(e);
        }

        self.stats.acquired += 1;
        Ok(handle)
    }

    /// Record that the host now owns a buffer the module allocated.
    pub fn adopt(&mut self, handle: GuestPtr) -> GuestPtr {
        self.stats.adopted += 1;
        handle
    }

    /// Free a handle. Releasing the null handle is a no-op.
    pub fn release<M: GuestModule>(&mut self, module: &mut M, handle: GuestPtr) -> Result<()> {
        self.stats.released += 1;
        if handle.is_null() {
            return Ok(());
        }
        tracing::trace!(
            offset = handle.offset,
            size = handle.size,
            "Releasing module buffer"
        );
        module.free(handle.offset, handle.size)
    }

    /// Acquire a buffer for `payload`, run `f`, then release the buffer.
    ///
    /// The buffer is released whether `f` succeeds or fails. When `f` fails
    /// with a fatal error (a trap) the instance is no longer called and the
    /// buffer is left to be discarded with it.
    pub fn with_acquired<M, T, F>(
        &mut self,
        module: &mut M,
        payload: &[u8],
        terminated: bool,
        f: F,
    ) -> Result<T>
    where
        M: GuestModule,
        F: FnOnce(&mut M, &mut Self, GuestPtr) -> Result<T>,
    {
        let handle = self.acquire(module, payload, terminated)?;
        let result = f(module, self, handle);
        match result {
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                self.release(module, handle)?;
                Err(e)
            }
            Ok(value) => {
                self.release(module, handle)?;
                Ok(value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubModule;

    #[test]
    fn acquire_writes_payload() {
        let mut module = StubModule::new();
        let mut buffers = BufferManager::new();
        let handle = buffers.acquire(&mut module, b"payload", false).unwrap();

        assert!(!handle.is_null());
        assert_eq!(handle.size, 7);
        assert_eq!(
            &module.memory()[handle.offset as usize..handle.end() as usize],
            b"payload"
        );

        buffers.release(&mut module, handle).unwrap();
        assert!(buffers.stats().is_balanced());
        assert_eq!(module.live_allocations(), 0);
        assert!(module.violations().is_empty());
    }

    #[test]
    fn terminated_acquire_adds_nul() {
        let mut module = StubModule::new();
        let mut buffers = BufferManager::new();
        let handle = buffers.acquire(&mut module, b"abc", true).unwrap();
        assert_eq!(handle.size, 4);
        assert_eq!(
            &module.memory()[handle.offset as usize..handle.end() as usize],
            b"abc\0"
        );
        buffers.release(&mut module, handle).unwrap();
        assert!(module.violations().is_empty());
    }

    #[test]
    fn terminated_acquire_rejects_embedded_nul() {
        let mut module = StubModule::new();
        let mut buffers = BufferManager::new();
        let err = buffers.acquire(&mut module, b"a\0b", true).unwrap_err();
        assert_eq!(err.code(), "B004");
        assert_eq!(module.counters().mallocs, 0);
    }

    #[test]
    fn empty_payload_yields_null_handle() {
        let mut module = StubModule::new();
        let mut buffers = BufferManager::new();
        let handle = buffers.acquire(&mut module, b"", false).unwrap();
        assert!(handle.is_null());
        assert_eq!(module.counters().mallocs, 0);

        buffers.release(&mut module, handle).unwrap();
        assert_eq!(module.counters().frees, 0);
        assert!(buffers.stats().is_balanced());
    }

    #[test]
    fn allocator_sentinel_is_allocation_failure() {
        let mut module = StubModule::new();
        module.fail_allocations(true);
        let mut buffers = BufferManager::new();
        let err = buffers.acquire(&mut module, b"abc", false).unwrap_err();
        assert_eq!(err, BridgeError::AllocationFailure { requested: 3 });
        assert_eq!(buffers.stats(), BufferStats::default());
    }

    #[test]
    fn with_acquired_releases_on_error() {
        let mut module = StubModule::new();
        let mut buffers = BufferManager::new();
        let result: Result<()> = buffers.with_acquired(&mut module, b"abc", false, |_, _, _| {
            Err(BridgeError::CallFailed {
                function: "parse_user".to_string(),
            })
        });
        assert!(result.is_err());
        assert!(buffers.stats().is_balanced());
        assert_eq!(module.live_allocations(), 0);
    }

    #[test]
    fn with_acquired_skips_release_after_trap() {
        let mut module = StubModule::new();
        let mut buffers = BufferManager::new();
        let result: Result<()> = buffers.with_acquired(&mut module, b"abc", false, |_, _, _| {
            Err(BridgeError::Trap {
                function: "parse_user".to_string(),
                cause: "unreachable".to_string(),
            })
        });
        assert!(result.unwrap_err().is_fatal());
        assert_eq!(module.counters().frees, 0);
        assert_eq!(buffers.stats().outstanding(), 1);
    }
}
