//! Compute API abstraction.
//!
//! The catalog, program builder and buffer are written against these traits
//! rather than a concrete driver, so discovery can be injected in tests and
//! several APIs can coexist:
//! - **host**: in-process reference backend (always available)
//! - **opencl**: ICD-backed OpenCL via `opencl3` (feature `opencl`)
//!
//! Every call reports failure as a raw [`Status`]; callers lift it into
//! [`crate::Error::Api`].

use std::fmt;

use crate::status::Status;

/// Result of a raw backend call.
pub type StatusResult<T> = std::result::Result<T, Status>;

/// Class of device a context is created for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// GPU-class devices (default).
    #[default]
    Gpu,
    Cpu,
    Accelerator,
    /// Every device the platform exposes.
    All,
}

impl DeviceKind {
    /// Whether a device of class `other` belongs to this class.
    pub fn includes(self, other: DeviceKind) -> bool {
        self == DeviceKind::All || self == other
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Gpu => write!(f, "gpu"),
            DeviceKind::Cpu => write!(f, "cpu"),
            DeviceKind::Accelerator => write!(f, "accelerator"),
            DeviceKind::All => write!(f, "all"),
        }
    }
}

/// Diagnostic metadata of a platform. Immutable once queried.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlatformInfo {
    pub name: String,
    pub vendor: String,
    pub version: String,
}

/// Diagnostic metadata of a device. Read-only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: String,
    pub kind: DeviceKind,
    /// Total global memory in bytes.
    pub global_mem_bytes: u64,
    /// Largest single allocation in bytes.
    pub max_alloc_bytes: u64,
    pub compute_units: u32,
}

impl DeviceInfo {
    /// Global memory in MiB, as shown in diagnostic listings.
    pub fn global_mem_mib(&self) -> u64 {
        self.global_mem_bytes / (1024 * 1024)
    }
}

/// Outcome of the most recent build on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildStatus {
    /// No build has been attempted.
    None,
    Error,
    Success,
    InProgress,
}

/// Driver entry point: enumerates platforms and names the handle types.
pub trait Backend: Sized + fmt::Debug + 'static {
    type Platform: ComputePlatform<Self>;
    type Context: ComputeContext<Self>;
    type Device: ComputeDevice;
    type Queue: CommandQueue<Self>;
    type Memory: DeviceMemory;
    type Program: DeviceProgram<Self>;

    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Enumerate every platform the driver exposes.
    fn platforms(&self) -> StatusResult<Vec<Self::Platform>>;
}

/// One vendor's compute driver.
pub trait ComputePlatform<B: Backend>: Clone + fmt::Debug {
    fn info(&self) -> StatusResult<PlatformInfo>;

    /// Create a context bound to this platform covering all its devices of `kind`.
    fn create_context(&self, kind: DeviceKind) -> StatusResult<B::Context>;
}

/// A platform bound to the device(s) it was created with.
///
/// Handles are reference counted; cloning shares the same context.
pub trait ComputeContext<B: Backend>: Clone + fmt::Debug {
    fn devices(&self) -> StatusResult<Vec<B::Device>>;

    /// Create an in-order command queue for `device`.
    fn create_queue(&self, device: &B::Device) -> StatusResult<B::Queue>;

    /// Allocate a read-write device region of `size` bytes.
    fn create_buffer(&self, size: usize) -> StatusResult<B::Memory>;

    /// Create an unbuilt program object from source text.
    fn create_program(&self, source: &str) -> StatusResult<B::Program>;
}

pub trait ComputeDevice: Clone + fmt::Debug {
    fn info(&self) -> StatusResult<DeviceInfo>;
}

/// Reference-counted handle to a device memory region.
pub trait DeviceMemory: Clone + fmt::Debug {
    fn size(&self) -> usize;
}

/// Ordered channel of asynchronous operations on one device.
///
/// Operations on the same queue execute in submission order; nothing is
/// guaranteed across queues.
pub trait CommandQueue<B: Backend>: fmt::Debug {
    /// Enqueue a non-blocking copy of `len` bytes from `src` into `memory` at `offset`.
    ///
    /// # Safety
    ///
    /// `src` must be valid for reads of `len` bytes until the queue has
    /// finished this operation (see [`CommandQueue::finish`]).
    unsafe fn enqueue_write(&self, memory: &B::Memory, offset: usize, len: usize, src: *const u8)
    -> StatusResult<()>;

    /// Enqueue a non-blocking copy of `len` bytes from `memory` at `offset` into `dst`.
    ///
    /// # Safety
    ///
    /// `dst` must be valid for writes of `len` bytes and must not be accessed
    /// by the host until the queue has finished this operation.
    unsafe fn enqueue_read(&self, memory: &B::Memory, offset: usize, len: usize, dst: *mut u8) -> StatusResult<()>;

    /// Submit all enqueued operations to the device without waiting.
    fn flush(&self) -> StatusResult<()>;

    /// Block until every enqueued operation has completed.
    fn finish(&self) -> StatusResult<()>;
}

/// Device program object: unbuilt until [`DeviceProgram::build`] succeeds.
pub trait DeviceProgram<B: Backend>: fmt::Debug {
    /// Compile for every device of the owning context.
    ///
    /// A compiler rejection reports [`Status::BUILD_PROGRAM_FAILURE`].
    fn build(&mut self, options: &str) -> StatusResult<()>;

    fn build_status(&self, device: &B::Device) -> StatusResult<BuildStatus>;

    fn build_log(&self, device: &B::Device) -> StatusResult<String>;

    /// Kernel entry points of a built program.
    fn kernel_names(&self) -> StatusResult<Vec<String>>;
}
