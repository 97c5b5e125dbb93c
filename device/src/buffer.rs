use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::rc::Rc;

use snafu::OptionExt;
use tracing::{debug, trace};

use crate::backend::{Backend, CommandQueue, ComputeContext, DeviceMemory};
use crate::error::{DetachedSnafu, OutOfBoundsSnafu, Result, StatusResultExt};

/// Ownership state of a buffer's host region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostRegion {
    /// Allocated and freed by the buffer.
    Owned,
    /// Supplied by the caller, who keeps ownership.
    Borrowed,
    /// Moved from; holds neither a host region nor a device handle.
    Detached,
}

enum Host {
    Owned(NonNull<u8>),
    Borrowed(NonNull<u8>),
    Detached,
}

impl Host {
    fn zeroed(size: usize) -> Self {
        Self::from_box(vec![0u8; size].into_boxed_slice())
    }

    fn from_box(data: Box<[u8]>) -> Self {
        let raw = Box::into_raw(data) as *mut u8;
        // Box pointers are never null, even for empty slices.
        match NonNull::new(raw) {
            Some(ptr) => Host::Owned(ptr),
            None => Host::Detached,
        }
    }

    fn ptr(&self) -> Option<NonNull<u8>> {
        match self {
            Host::Owned(ptr) | Host::Borrowed(ptr) => Some(*ptr),
            Host::Detached => None,
        }
    }

    fn region(&self) -> HostRegion {
        match self {
            Host::Owned(_) => HostRegion::Owned,
            Host::Borrowed(_) => HostRegion::Borrowed,
            Host::Detached => HostRegion::Detached,
        }
    }
}

/// Device memory region paired with a host region of the same size.
///
/// The host region is either owned (allocated zeroed, freed on drop) or
/// borrowed from the caller. Uploads copy host to device, downloads copy
/// device to host; both are queued without waiting.
///
/// Cloning deep-copies an owned host region and shares a borrowed one. The
/// device handle is reference counted and shared between clones. Use
/// [`Buffer::take`] to move the contents out and leave a detached buffer
/// behind.
///
/// This type is `!Send + !Sync`: host regions may be caller memory with no
/// thread-safety guarantees.
pub struct Buffer<B: Backend> {
    host: Host,
    memory: Option<B::Memory>,
    size: usize,
    _not_send_sync: PhantomData<Rc<()>>,
}

impl<B: Backend> Buffer<B> {
    /// Allocate `size` bytes on the device and an owned, zeroed host region.
    pub fn new(context: &B::Context, size: usize) -> Result<Self> {
        let memory = context.create_buffer(size).api("clCreateBuffer")?;
        debug!(buffer.size = size, "allocated buffer with owned host region");
        Ok(Self { host: Host::zeroed(size), memory: Some(memory), size, _not_send_sync: PhantomData })
    }

    /// Allocate `size` bytes on the device over a caller-supplied host region.
    ///
    /// A null `ptr` allocates an owned region instead, as [`Buffer::new`] does.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must be valid for reads and writes of `size` bytes for
    /// as long as this buffer or any clone of it is alive.
    pub unsafe fn from_host_ptr(context: &B::Context, size: usize, ptr: *mut u8) -> Result<Self> {
        let Some(ptr) = NonNull::new(ptr) else {
            return Self::new(context, size);
        };

        let memory = context.create_buffer(size).api("clCreateBuffer")?;
        debug!(buffer.size = size, "allocated buffer over borrowed host region");
        Ok(Self { host: Host::Borrowed(ptr), memory: Some(memory), size, _not_send_sync: PhantomData })
    }

    /// A buffer with no host region and no device handle.
    pub fn detached() -> Self {
        Self { host: Host::Detached, memory: None, size: 0, _not_send_sync: PhantomData }
    }

    /// Move the host region and device handle out, leaving `self` detached.
    pub fn take(&mut self) -> Self {
        std::mem::replace(self, Self::detached())
    }

    /// Enqueue a copy of the whole host region to the device.
    ///
    /// # Safety
    ///
    /// The host region must stay valid and unmodified until `queue` has
    /// finished the copy.
    pub unsafe fn upload(&self, queue: &B::Queue) -> Result<()> {
        unsafe { self.upload_range(queue, 0, 0) }
    }

    /// Enqueue a copy of `size` bytes at `offset` from host to device.
    ///
    /// A `size` of zero copies from `offset` to the end of the buffer.
    ///
    /// # Safety
    ///
    /// Same as [`Buffer::upload`].
    pub unsafe fn upload_range(&self, queue: &B::Queue, offset: usize, size: usize) -> Result<()> {
        let (memory, host) = self.endpoints()?;
        let len = self.resolve_range(offset, size)?;
        if len == 0 {
            trace!(buffer.offset = offset, "empty upload skipped");
            return Ok(());
        }

        trace!(buffer.offset = offset, buffer.len = len, "enqueue upload");
        // SAFETY: range checked above; the caller keeps the host region alive.
        unsafe { queue.enqueue_write(memory, offset, len, host.as_ptr().add(offset)) }.api("clEnqueueWriteBuffer")
    }

    /// Enqueue a copy of the whole device region back to the host region.
    ///
    /// # Safety
    ///
    /// The host region must stay valid and must not be read or written until
    /// `queue` has finished the copy.
    pub unsafe fn download(&self, queue: &B::Queue) -> Result<()> {
        unsafe { self.download_range(queue, 0, 0) }
    }

    /// Enqueue a copy of `size` bytes at `offset` from device to host.
    ///
    /// A `size` of zero copies from `offset` to the end of the buffer.
    ///
    /// # Safety
    ///
    /// Same as [`Buffer::download`].
    pub unsafe fn download_range(&self, queue: &B::Queue, offset: usize, size: usize) -> Result<()> {
        let (memory, host) = self.endpoints()?;
        let len = self.resolve_range(offset, size)?;
        if len == 0 {
            trace!(buffer.offset = offset, "empty download skipped");
            return Ok(());
        }

        trace!(buffer.offset = offset, buffer.len = len, "enqueue download");
        // SAFETY: range checked above; the caller keeps the host region alive and untouched.
        unsafe { queue.enqueue_read(memory, offset, len, host.as_ptr().add(offset)) }.api("clEnqueueReadBuffer")
    }

    fn endpoints(&self) -> Result<(&B::Memory, NonNull<u8>)> {
        let memory = self.memory.as_ref().context(DetachedSnafu)?;
        let host = self.host.ptr().context(DetachedSnafu)?;
        Ok((memory, host))
    }

    fn resolve_range(&self, offset: usize, size: usize) -> Result<usize> {
        let buffer_size = self.size;
        let len = if size == 0 { buffer_size.saturating_sub(offset) } else { size };
        snafu::ensure!(
            offset <= buffer_size && offset.checked_add(len).is_some_and(|end| end <= buffer_size),
            OutOfBoundsSnafu { offset, size, buffer_size }
        );
        Ok(len)
    }

    /// Device memory handle, `None` once detached.
    pub fn device_handle(&self) -> Option<&B::Memory> {
        self.memory.as_ref()
    }

    /// Start of the host region, null once detached.
    pub fn host_ptr(&self) -> *mut u8 {
        self.host.ptr().map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    /// Owned host region as a slice.
    ///
    /// `None` for borrowed and detached regions. Borrowed regions are shared
    /// with clones and the caller, so reach them through [`Buffer::host_ptr`].
    pub fn host_slice(&self) -> Option<&[u8]> {
        let Host::Owned(ptr) = self.host else { return None };
        // SAFETY: owned regions are `size` bytes and unique to this buffer.
        Some(unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.size) })
    }

    /// Owned host region as a mutable slice; `None` unless owned.
    pub fn host_slice_mut(&mut self) -> Option<&mut [u8]> {
        let Host::Owned(ptr) = self.host else { return None };
        // SAFETY: see `host_slice`; `&mut self` makes the borrow exclusive.
        Some(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.size) })
    }

    /// Size in bytes of both regions.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn region(&self) -> HostRegion {
        self.host.region()
    }

    pub fn owns_host(&self) -> bool {
        matches!(self.host, Host::Owned(_))
    }

    pub fn is_borrowed(&self) -> bool {
        matches!(self.host, Host::Borrowed(_))
    }

    pub fn is_detached(&self) -> bool {
        matches!(self.host, Host::Detached)
    }
}

impl<B: Backend> Clone for Buffer<B> {
    fn clone(&self) -> Self {
        let host = match &self.host {
            Host::Owned(_) => {
                let copy = self.host_slice().map(Box::<[u8]>::from).unwrap_or_default();
                trace!(buffer.size = self.size, "copied owned host region");
                Host::from_box(copy)
            }
            Host::Borrowed(ptr) => Host::Borrowed(*ptr),
            Host::Detached => Host::Detached,
        };
        Self { host, memory: self.memory.clone(), size: self.size, _not_send_sync: PhantomData }
    }
}

impl<B: Backend> Drop for Buffer<B> {
    fn drop(&mut self) {
        if let Host::Owned(ptr) = self.host {
            // SAFETY: produced by `Host::from_box` with exactly `size` bytes.
            drop(unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(ptr.as_ptr(), self.size)) });
        }
    }
}

impl<B: Backend> fmt::Debug for Buffer<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("region", &self.region())
            .field("size", &self.size)
            .field("device_size", &self.memory.as_ref().map(DeviceMemory::size))
            .finish()
    }
}
