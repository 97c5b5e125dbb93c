use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::backend::{DeviceMemory, StatusResult};
use crate::status::Status;

/// Allocation counters shared by every context of a host backend.
#[derive(Debug, Default)]
pub struct LiveAllocations {
    buffers: AtomicUsize,
    bytes: AtomicUsize,
}

impl LiveAllocations {
    /// Device regions currently alive.
    pub fn buffers(&self) -> usize {
        self.buffers.load(Ordering::Acquire)
    }

    /// Bytes held by device regions currently alive.
    pub fn bytes(&self) -> usize {
        self.bytes.load(Ordering::Acquire)
    }
}

/// Global memory of one context, bounded by its smallest device.
#[derive(Debug)]
pub(crate) struct MemoryPool {
    capacity: u64,
    max_alloc: u64,
    used: AtomicU64,
    live: Arc<LiveAllocations>,
}

impl MemoryPool {
    pub(crate) fn new(capacity: u64, max_alloc: u64, live: Arc<LiveAllocations>) -> Self {
        Self { capacity, max_alloc, used: AtomicU64::new(0), live }
    }

    fn reserve(&self, size: u64) -> StatusResult<()> {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(size).filter(|&total| total <= self.capacity)
            })
            .map(|_| ())
            .map_err(|_| Status::MEM_OBJECT_ALLOCATION_FAILURE)
    }

    fn release(&self, size: u64) {
        self.used.fetch_sub(size, Ordering::AcqRel);
    }

    pub(crate) fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct Allocation {
    data: Mutex<Box<[u8]>>,
    pool: Arc<MemoryPool>,
}

impl Drop for Allocation {
    fn drop(&mut self) {
        let size = self.data.get_mut().len();
        self.pool.release(size as u64);
        self.pool.live.buffers.fetch_sub(1, Ordering::AcqRel);
        self.pool.live.bytes.fetch_sub(size, Ordering::AcqRel);
        tracing::trace!(memory.size = size, "released host device region");
    }
}

/// Device region of the host backend, backed by host RAM.
///
/// Cloning shares the region; it is released when the last handle drops.
#[derive(Debug, Clone)]
pub struct HostMemory {
    inner: Arc<Allocation>,
}

impl HostMemory {
    pub(crate) fn allocate(pool: &Arc<MemoryPool>, size: usize) -> StatusResult<Self> {
        if size == 0 || size as u64 > pool.max_alloc {
            return Err(Status::INVALID_BUFFER_SIZE);
        }
        pool.reserve(size as u64)?;

        pool.live.buffers.fetch_add(1, Ordering::AcqRel);
        pool.live.bytes.fetch_add(size, Ordering::AcqRel);
        tracing::trace!(memory.size = size, pool.used = pool.used(), "allocated host device region");

        let data = Mutex::new(vec![0u8; size].into_boxed_slice());
        Ok(Self { inner: Arc::new(Allocation { data, pool: Arc::clone(pool) }) })
    }

    /// Snapshot of the device-side bytes.
    pub fn contents(&self) -> Vec<u8> {
        self.inner.data.lock().to_vec()
    }

    /// Whether both handles refer to the same region.
    pub fn same_region(&self, other: &HostMemory) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn in_bounds(&self, offset: usize, len: usize) -> bool {
        offset.checked_add(len).is_some_and(|end| end <= self.size())
    }

    /// # Safety
    ///
    /// `src` must be valid for reads of `len` bytes; the range must be in bounds.
    pub(crate) unsafe fn write_from(&self, offset: usize, len: usize, src: *const u8) {
        let mut data = self.inner.data.lock();
        // SAFETY: forwarded from the caller.
        let src = unsafe { std::slice::from_raw_parts(src, len) };
        data[offset..offset + len].copy_from_slice(src);
    }

    /// # Safety
    ///
    /// `dst` must be valid for writes of `len` bytes; the range must be in bounds.
    pub(crate) unsafe fn read_into(&self, offset: usize, len: usize, dst: *mut u8) {
        let data = self.inner.data.lock();
        // SAFETY: forwarded from the caller.
        let dst = unsafe { std::slice::from_raw_parts_mut(dst, len) };
        dst.copy_from_slice(&data[offset..offset + len]);
    }
}

impl DeviceMemory for HostMemory {
    fn size(&self) -> usize {
        self.inner.data.lock().len()
    }
}
