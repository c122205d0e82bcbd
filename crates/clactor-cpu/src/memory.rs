//! Device memory of the emulated device.
//!
//! Allocations are backed by `u64` words so every scalar type up to eight
//! bytes can be viewed in place.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use clactor_core::backend::MemAccess;
use clactor_core::status::Status;

pub(crate) struct CpuMemory {
    words: Mutex<Vec<u64>>,
    size: usize,
    access: MemAccess,
}

impl CpuMemory {
    fn new(size: usize, access: MemAccess) -> Self {
        Self {
            words: Mutex::new(vec![0; size.div_ceil(8)]),
            size,
            access,
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn access(&self) -> MemAccess {
        self.access
    }

    /// Copy `data` to the start of the allocation.
    pub(crate) fn write(&self, data: &[u8]) -> Result<(), Status> {
        if data.len() > self.size {
            return Err(Status::INVALID_VALUE);
        }
        let mut words = self.words.lock();
        bytemuck::cast_slice_mut::<u64, u8>(&mut words)[..data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Copy the first `len` bytes out.
    pub(crate) fn read(&self, len: usize) -> Result<Vec<u8>, Status> {
        if len > self.size {
            return Err(Status::INVALID_VALUE);
        }
        let words = self.words.lock();
        Ok(bytemuck::cast_slice::<u64, u8>(&words)[..len].to_vec())
    }

    /// Copy of the backing words.
    pub(crate) fn snapshot(&self) -> Vec<u64> {
        self.words.lock().clone()
    }

    /// Replace the backing words.
    pub(crate) fn store(&self, words: Vec<u64>) {
        let mut current = self.words.lock();
        if words.len() == current.len() {
            *current = words;
        }
    }
}

/// A buffer on the emulated device.
pub struct CpuBuffer {
    memory: Arc<CpuMemory>,
}

impl CpuBuffer {
    pub(crate) fn new(size: usize, access: MemAccess) -> Self {
        Self {
            memory: Arc::new(CpuMemory::new(size, access)),
        }
    }

    pub(crate) fn memory(&self) -> &Arc<CpuMemory> {
        &self.memory
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.memory.size
    }

    /// Device access mode.
    pub fn access(&self) -> MemAccess {
        self.memory.access
    }
}

impl fmt::Debug for CpuBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuBuffer")
            .field("size", &self.memory.size)
            .field("access", &self.memory.access)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let buffer = CpuBuffer::new(12, MemAccess::ReadWrite);
        assert_eq!(buffer.size(), 12);
        buffer.memory().write(&[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(buffer.memory().read(6).unwrap(), vec![1, 2, 3, 4, 5, 0]);
    }

    #[test]
    fn test_bounds() {
        let buffer = CpuBuffer::new(4, MemAccess::ReadOnly);
        assert_eq!(buffer.memory().write(&[0; 5]), Err(Status::INVALID_VALUE));
        assert_eq!(buffer.memory().read(5), Err(Status::INVALID_VALUE));
    }

    #[test]
    fn test_snapshot_store() {
        let buffer = CpuBuffer::new(8, MemAccess::WriteOnly);
        let mut words = buffer.memory().snapshot();
        words[0] = u64::from_le_bytes([9, 8, 7, 6, 5, 4, 3, 2]);
        buffer.memory().store(words);
        assert_eq!(buffer.memory().read(2).unwrap(), vec![9, 8]);
    }
}
