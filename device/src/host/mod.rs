//! In-process reference backend.
//!
//! Platforms and devices are declared up front, so any driver topology can be
//! modelled without hardware:
//!
//! ```ignore
//! let backend = HostBackend::builder()
//!     .platforms(vec![
//!         HostPlatformSpec::builder()
//!             .name("NVIDIA CUDA")
//!             .devices(vec![HostDeviceSpec::builder().name("RTX 4090").build()])
//!             .build(),
//!     ])
//!     .build();
//! ```
//!
//! Device memory is host RAM bounded by the declared global memory. Queues
//! defer transfers until flushed. Programs go through a small OpenCL C front
//! end that validates sources and reports clang-style build logs.

mod compiler;
mod memory;
mod queue;

use std::sync::Arc;

use bon::bon;

pub use memory::{HostMemory, LiveAllocations};
pub use queue::HostQueue;

use self::compiler::CompileError;
use self::memory::MemoryPool;
use crate::backend::{
    Backend, BuildStatus, ComputeContext, ComputeDevice, ComputePlatform, DeviceInfo, DeviceKind, DeviceProgram,
    PlatformInfo, StatusResult,
};
use crate::status::Status;

/// Declared device of a host platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDeviceSpec {
    pub name: String,
    pub vendor: String,
    pub kind: DeviceKind,
    pub global_mem_bytes: u64,
    pub max_alloc_bytes: u64,
    pub compute_units: u32,
}

#[bon]
impl HostDeviceSpec {
    /// Declare a device. `max_alloc_bytes` defaults to a quarter of global memory.
    #[builder]
    pub fn new(
        #[builder(into)] name: String,
        #[builder(into, default)] vendor: String,
        #[builder(default = DeviceKind::Gpu)] kind: DeviceKind,
        #[builder(default = 1 << 30)] global_mem_bytes: u64,
        max_alloc_bytes: Option<u64>,
        #[builder(default = 1)] compute_units: u32,
    ) -> Self {
        let max_alloc_bytes = max_alloc_bytes.unwrap_or(global_mem_bytes / 4);
        Self { name, vendor, kind, global_mem_bytes, max_alloc_bytes, compute_units }
    }
}

/// Declared platform of a host backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPlatformSpec {
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub devices: Vec<HostDeviceSpec>,
    /// Status returned by context creation instead of a context.
    pub context_failure: Option<Status>,
    /// Status returned by program build-info and kernel-name queries.
    pub program_info_failure: Option<Status>,
}

#[bon]
impl HostPlatformSpec {
    #[builder]
    pub fn new(
        #[builder(into)] name: String,
        #[builder(into, default)] vendor: String,
        #[builder(into, default = "OpenCL 1.2 host".to_string())] version: String,
        #[builder(default)] devices: Vec<HostDeviceSpec>,
        context_failure: Option<Status>,
        program_info_failure: Option<Status>,
    ) -> Self {
        Self { name, vendor, version, devices, context_failure, program_info_failure }
    }
}

/// Reference backend whose devices live in host memory.
#[derive(Debug, Clone)]
pub struct HostBackend {
    platforms: Arc<[HostPlatformSpec]>,
    enumeration_failure: Option<Status>,
    live: Arc<LiveAllocations>,
}

#[bon]
impl HostBackend {
    #[builder]
    pub fn new(#[builder(default)] platforms: Vec<HostPlatformSpec>, enumeration_failure: Option<Status>) -> Self {
        Self { platforms: platforms.into(), enumeration_failure, live: Arc::new(LiveAllocations::default()) }
    }

    /// Device regions allocated through this backend and not yet released.
    pub fn live_allocations(&self) -> &LiveAllocations {
        &self.live
    }
}

impl Backend for HostBackend {
    type Platform = HostPlatform;
    type Context = HostContext;
    type Device = HostDevice;
    type Queue = HostQueue;
    type Memory = HostMemory;
    type Program = HostProgram;

    fn name(&self) -> &str {
        "host"
    }

    fn platforms(&self) -> StatusResult<Vec<HostPlatform>> {
        if let Some(status) = self.enumeration_failure {
            return Err(status);
        }
        Ok((0..self.platforms.len())
            .map(|index| HostPlatform { specs: Arc::clone(&self.platforms), index, live: Arc::clone(&self.live) })
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct HostPlatform {
    specs: Arc<[HostPlatformSpec]>,
    index: usize,
    live: Arc<LiveAllocations>,
}

impl HostPlatform {
    fn spec(&self) -> &HostPlatformSpec {
        &self.specs[self.index]
    }
}

impl ComputePlatform<HostBackend> for HostPlatform {
    fn info(&self) -> StatusResult<PlatformInfo> {
        let spec = self.spec();
        Ok(PlatformInfo { name: spec.name.clone(), vendor: spec.vendor.clone(), version: spec.version.clone() })
    }

    fn create_context(&self, kind: DeviceKind) -> StatusResult<HostContext> {
        let spec = self.spec();
        if let Some(status) = spec.context_failure {
            return Err(status);
        }

        let devices: Vec<HostDevice> = spec
            .devices
            .iter()
            .filter(|d| kind.includes(d.kind))
            .map(|d| HostDevice { spec: Arc::new(d.clone()) })
            .collect();
        if devices.is_empty() {
            return Err(Status::DEVICE_NOT_FOUND);
        }

        let capacity = devices.iter().map(|d| d.spec.global_mem_bytes).min().unwrap_or_default();
        let max_alloc = devices.iter().map(|d| d.spec.max_alloc_bytes).min().unwrap_or_default();
        let pool = Arc::new(MemoryPool::new(capacity, max_alloc, Arc::clone(&self.live)));

        let program_info_failure = spec.program_info_failure;
        Ok(HostContext { inner: Arc::new(ContextInner { devices, pool, program_info_failure }) })
    }
}

#[derive(Debug)]
struct ContextInner {
    devices: Vec<HostDevice>,
    pool: Arc<MemoryPool>,
    program_info_failure: Option<Status>,
}

#[derive(Debug, Clone)]
pub struct HostContext {
    inner: Arc<ContextInner>,
}

impl HostContext {
    /// Bytes currently allocated from this context's global memory.
    pub fn used_bytes(&self) -> u64 {
        self.inner.pool.used()
    }
}

impl ComputeContext<HostBackend> for HostContext {
    fn devices(&self) -> StatusResult<Vec<HostDevice>> {
        Ok(self.inner.devices.clone())
    }

    fn create_queue(&self, device: &HostDevice) -> StatusResult<HostQueue> {
        if !self.inner.devices.iter().any(|d| d.same_device(device)) {
            return Err(Status::INVALID_DEVICE);
        }
        Ok(HostQueue::new(device.spec.name.clone()))
    }

    fn create_buffer(&self, size: usize) -> StatusResult<HostMemory> {
        HostMemory::allocate(&self.inner.pool, size)
    }

    fn create_program(&self, source: &str) -> StatusResult<HostProgram> {
        Ok(HostProgram {
            context: self.clone(),
            source: source.to_string(),
            status: BuildStatus::None,
            log: String::new(),
            kernels: Vec::new(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct HostDevice {
    spec: Arc<HostDeviceSpec>,
}

impl HostDevice {
    fn same_device(&self, other: &HostDevice) -> bool {
        Arc::ptr_eq(&self.spec, &other.spec)
    }
}

impl ComputeDevice for HostDevice {
    fn info(&self) -> StatusResult<DeviceInfo> {
        let spec = &self.spec;
        Ok(DeviceInfo {
            name: spec.name.clone(),
            vendor: spec.vendor.clone(),
            kind: spec.kind,
            global_mem_bytes: spec.global_mem_bytes,
            max_alloc_bytes: spec.max_alloc_bytes,
            compute_units: spec.compute_units,
        })
    }
}

/// Program object of the host backend.
#[derive(Debug)]
pub struct HostProgram {
    context: HostContext,
    source: String,
    status: BuildStatus,
    log: String,
    kernels: Vec<String>,
}

impl HostProgram {
    pub fn source(&self) -> &str {
        &self.source
    }

    fn check_device(&self, device: &HostDevice) -> StatusResult<()> {
        self.check_info()?;
        if self.context.inner.devices.iter().any(|d| d.same_device(device)) { Ok(()) } else { Err(Status::INVALID_DEVICE) }
    }

    fn check_info(&self) -> StatusResult<()> {
        self.context.inner.program_info_failure.map_or(Ok(()), Err)
    }
}

impl DeviceProgram<HostBackend> for HostProgram {
    fn build(&mut self, options: &str) -> StatusResult<()> {
        match compiler::compile(&self.source, options) {
            Ok(compiled) => {
                self.status = BuildStatus::Success;
                self.log.clear();
                self.kernels = compiled.kernels;
                Ok(())
            }
            Err(CompileError::InvalidOptions(option)) => {
                tracing::debug!(option = %option, "rejected build option");
                self.status = BuildStatus::None;
                Err(Status::INVALID_BUILD_OPTIONS)
            }
            Err(CompileError::Rejected(log)) => {
                self.status = BuildStatus::Error;
                self.log = log;
                self.kernels.clear();
                Err(Status::BUILD_PROGRAM_FAILURE)
            }
        }
    }

    fn build_status(&self, device: &HostDevice) -> StatusResult<BuildStatus> {
        self.check_device(device)?;
        Ok(self.status)
    }

    fn build_log(&self, device: &HostDevice) -> StatusResult<String> {
        self.check_device(device)?;
        Ok(self.log.clone())
    }

    fn kernel_names(&self) -> StatusResult<Vec<String>> {
        self.check_info()?;
        if self.status != BuildStatus::Success {
            return Err(Status::INVALID_PROGRAM_EXECUTABLE);
        }
        Ok(self.kernels.clone())
    }
}
