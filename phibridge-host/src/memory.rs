//! Linear memory access.
//!
//! Module memory is addressed through bounds-described views over the
//! instance's current memory. Offsets and lengths come from the module's
//! allocator or from sizes the module reported, and are validated against
//! the memory capacity before any copy is made.

use phibridge_core::error::{BridgeError, Result};

/// A buffer handle inside module linear memory.
///
/// A zero offset is the module's "absent/failed" sentinel regardless of
/// size and is never dereferenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestPtr {
    /// Offset within linear memory.
    pub offset: u32,
    /// Size of the allocation in bytes.
    pub size: u32,
}

impl GuestPtr {
    /// Create a new handle.
    pub const fn new(offset: u32, size: u32) -> Self {
        Self { offset, size }
    }

    /// Create the null handle.
    pub const fn null() -> Self {
        Self { offset: 0, size: 0 }
    }

    /// Check if this is the null sentinel.
    pub const fn is_null(&self) -> bool {
        self.offset == 0
    }

    /// Get the end offset (offset + size), widened so it cannot overflow.
    pub const fn end(&self) -> u64 {
        self.offset as u64 + self.size as u64
    }
}

/// Read-only view of linear memory.
#[derive(Debug, Clone, Copy)]
pub struct LinearMemory<'a> {
    data: &'a [u8],
}

impl<'a> LinearMemory<'a> {
    /// Wrap the current memory contents.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Size of linear memory in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Copy `size` bytes starting at `offset`.
    pub fn read(&self, offset: u32, size: u32) -> Result<Vec<u8>> {
        let ptr = GuestPtr::new(offset, size);
        if ptr.is_null() {
            return Err(access_error(ptr, "null pointer"));
        }
        self.data
            .get(offset as usize..ptr.end() as usize)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| access_error(ptr, self.out_of_bounds()))
    }

    /// Copy the bytes a handle refers to.
    pub fn read_ptr(&self, ptr: GuestPtr) -> Result<Vec<u8>> {
        self.read(ptr.offset, ptr.size)
    }

    /// Length of the null-terminated string at `offset`, terminator excluded.
    ///
    /// Scans up to the end of memory; a string without a terminator is an
    /// access error.
    pub fn terminated_len(&self, offset: u32) -> Result<u32> {
        let ptr = GuestPtr::new(offset, 0);
        if ptr.is_null() {
            return Err(access_error(ptr, "null pointer"));
        }
        let tail = self
            .data
            .get(offset as usize..)
            .ok_or_else(|| access_error(ptr, self.out_of_bounds()))?;
        let len = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| access_error(ptr, "string is not null-terminated"))?;
        Ok(len as u32)
    }

    /// Copy the null-terminated string at `offset`, terminator excluded.
    pub fn read_terminated(&self, offset: u32) -> Result<Vec<u8>> {
        let len = self.terminated_len(offset)?;
        if len == 0 {
            return Ok(Vec::new());
        }
        self.read(offset, len)
    }

    fn out_of_bounds(&self) -> String {
        format!("outside linear memory of {} bytes", self.data.len())
    }
}

/// Writable view of linear memory.
#[derive(Debug)]
pub struct LinearMemoryMut<'a> {
    data: &'a mut [u8],
}

impl<'a> LinearMemoryMut<'a> {
    /// Wrap the current memory contents.
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    /// Copy `bytes` into memory starting at `offset`.
    pub fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<()> {
        let ptr = GuestPtr::new(offset, bytes.len() as u32);
        if ptr.is_null() {
            return Err(access_error(ptr, "null pointer"));
        }
        let capacity = self.data.len();
        let dest = self
            .data
            .get_mut(offset as usize..offset as usize + bytes.len())
            .ok_or_else(|| {
                access_error(
                    ptr,
                    format!("outside linear memory of {} bytes", capacity),
                )
            })?;
        dest.copy_from_slice(bytes);
        Ok(())
    }
}

fn access_error(ptr: GuestPtr, cause: impl Into<String>) -> BridgeError {
    BridgeError::MemoryAccess {
        offset: ptr.offset.into(),
        size: ptr.size.into(),
        cause: cause.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_ptr_basic() {
        let ptr = GuestPtr::new(100, 50);
        assert_eq!(ptr.offset, 100);
        assert_eq!(ptr.size, 50);
        assert_eq!(ptr.end(), 150);
        assert!(!ptr.is_null());
    }

    #[test]
    fn guest_ptr_null_ignores_size() {
        assert!(GuestPtr::null().is_null());
        assert!(GuestPtr::new(0, 12).is_null());
    }

    #[test]
    fn end_does_not_overflow() {
        let ptr = GuestPtr::new(u32::MAX, u32::MAX);
        assert_eq!(ptr.end(), 2 * u32::MAX as u64);
    }

    #[test]
    fn read_and_write_in_bounds() {
        let mut data = vec![0u8; 64];
        LinearMemoryMut::new(&mut data).write(8, b"hello").unwrap();
        let mem = LinearMemory::new(&data);
        assert_eq!(mem.read(8, 5).unwrap(), b"hello");
        assert_eq!(mem.read_ptr(GuestPtr::new(9, 2)).unwrap(), b"el");
    }

    #[test]
    fn refuses_null_pointer() {
        let data = vec![0u8; 16];
        let err = LinearMemory::new(&data).read(0, 4).unwrap_err();
        assert_eq!(err.code(), "B101");
        assert!(err.to_string().contains("null pointer"));

        let mut data = vec![0u8; 16];
        assert!(LinearMemoryMut::new(&mut data).write(0, b"x").is_err());
    }

    #[test]
    fn refuses_out_of_bounds() {
        let data = vec![0u8; 16];
        let mem = LinearMemory::new(&data);
        assert!(mem.read(12, 8).is_err());
        assert!(mem.read(u32::MAX, u32::MAX).is_err());

        let mut data = vec![0u8; 16];
        assert!(LinearMemoryMut::new(&mut data).write(14, b"abc").is_err());
    }

    #[test]
    fn terminated_read_stops_at_first_nul() {
        let mut data = vec![0xaau8; 32];
        data[4..11].copy_from_slice(b"ab\0cd\0\0");
        let mem = LinearMemory::new(&data);
        assert_eq!(mem.terminated_len(4).unwrap(), 2);
        assert_eq!(mem.read_terminated(4).unwrap(), b"ab");
        assert_eq!(mem.read_terminated(6).unwrap(), b"");
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let data = vec![0x41u8; 16];
        let err = LinearMemory::new(&data).read_terminated(4).unwrap_err();
        assert!(err.to_string().contains("not null-terminated"));
    }
}
