//! OpenCL backend over the ICD loader, via `opencl3`.

use std::fmt;
use std::ptr;
use std::sync::Arc;

use opencl3::command_queue::CommandQueue as ClQueue;
use opencl3::context::Context;
use opencl3::device::{CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU, CL_DEVICE_TYPE_GPU, Device};
use opencl3::error_codes::ClError;
use opencl3::memory::{Buffer as ClBuffer, CL_MEM_READ_WRITE};
use opencl3::platform::{Platform, get_platforms};
use opencl3::program::Program;
use opencl3::types::{CL_NON_BLOCKING, cl_device_id, cl_device_type};
use parking_lot::Mutex;

use crate::backend::{
    Backend, BuildStatus, CommandQueue, ComputeContext, ComputeDevice, ComputePlatform, DeviceInfo, DeviceKind,
    DeviceMemory, DeviceProgram, PlatformInfo, StatusResult,
};
use crate::status::Status;

const CL_BUILD_SUCCESS: i32 = 0;
const CL_BUILD_NONE: i32 = -1;
const CL_BUILD_ERROR: i32 = -2;

fn status(error: ClError) -> Status {
    Status(error.0)
}

fn device_type(kind: DeviceKind) -> cl_device_type {
    match kind {
        DeviceKind::Gpu => CL_DEVICE_TYPE_GPU,
        DeviceKind::Cpu => CL_DEVICE_TYPE_CPU,
        DeviceKind::Accelerator => CL_DEVICE_TYPE_ACCELERATOR,
        DeviceKind::All => CL_DEVICE_TYPE_ALL,
    }
}

fn device_kind(ty: cl_device_type) -> DeviceKind {
    if ty & CL_DEVICE_TYPE_GPU != 0 {
        DeviceKind::Gpu
    } else if ty & CL_DEVICE_TYPE_CPU != 0 {
        DeviceKind::Cpu
    } else if ty & CL_DEVICE_TYPE_ACCELERATOR != 0 {
        DeviceKind::Accelerator
    } else {
        DeviceKind::All
    }
}

/// Installed OpenCL drivers.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenClBackend;

impl Backend for OpenClBackend {
    type Platform = OpenClPlatform;
    type Context = OpenClContext;
    type Device = OpenClDevice;
    type Queue = OpenClQueue;
    type Memory = OpenClMemory;
    type Program = OpenClProgram;

    fn name(&self) -> &str {
        "opencl"
    }

    fn platforms(&self) -> StatusResult<Vec<OpenClPlatform>> {
        Ok(get_platforms().map_err(status)?.into_iter().map(|platform| OpenClPlatform { platform }).collect())
    }
}

#[derive(Debug, Clone)]
pub struct OpenClPlatform {
    platform: Platform,
}

impl ComputePlatform<OpenClBackend> for OpenClPlatform {
    fn info(&self) -> StatusResult<PlatformInfo> {
        Ok(PlatformInfo {
            name: self.platform.name().map_err(status)?,
            vendor: self.platform.vendor().map_err(status)?,
            version: self.platform.version().map_err(status)?,
        })
    }

    fn create_context(&self, kind: DeviceKind) -> StatusResult<OpenClContext> {
        let ids = self.platform.get_devices(device_type(kind)).map_err(status)?;
        let context = Context::from_devices(&ids, &[], None, ptr::null_mut()).map_err(status)?;
        Ok(OpenClContext { context: Arc::new(context) })
    }
}

#[derive(Clone)]
pub struct OpenClContext {
    context: Arc<Context>,
}

impl fmt::Debug for OpenClContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenClContext").field("devices", &self.context.devices().len()).finish()
    }
}

impl ComputeContext<OpenClBackend> for OpenClContext {
    fn devices(&self) -> StatusResult<Vec<OpenClDevice>> {
        Ok(self.context.devices().iter().map(|&id| OpenClDevice { id }).collect())
    }

    fn create_queue(&self, device: &OpenClDevice) -> StatusResult<OpenClQueue> {
        // SAFETY: `device.id` belongs to this context.
        let queue = unsafe { ClQueue::create_with_properties(&self.context, device.id, 0, 0) }.map_err(status)?;
        Ok(OpenClQueue { queue })
    }

    fn create_buffer(&self, size: usize) -> StatusResult<OpenClMemory> {
        // SAFETY: no host pointer is passed; the driver owns the allocation.
        let buffer = unsafe { ClBuffer::<u8>::create(&self.context, CL_MEM_READ_WRITE, size, ptr::null_mut()) }
            .map_err(status)?;
        Ok(OpenClMemory { buffer: Arc::new(Mutex::new(buffer)), size })
    }

    fn create_program(&self, source: &str) -> StatusResult<OpenClProgram> {
        let program = Program::create_from_source(&self.context, source).map_err(status)?;
        Ok(OpenClProgram { program, devices: self.context.devices().to_vec() })
    }
}

#[derive(Debug, Clone)]
pub struct OpenClDevice {
    id: cl_device_id,
}

impl ComputeDevice for OpenClDevice {
    fn info(&self) -> StatusResult<DeviceInfo> {
        let device = Device::new(self.id);
        Ok(DeviceInfo {
            name: device.name().map_err(status)?,
            vendor: device.vendor().map_err(status)?,
            kind: device_kind(device.dev_type().map_err(status)?),
            global_mem_bytes: device.global_mem_size().map_err(status)?,
            max_alloc_bytes: device.max_mem_alloc_size().map_err(status)?,
            compute_units: device.max_compute_units().map_err(status)?,
        })
    }
}

/// Reference-counted `cl_mem`; clones share the region.
#[derive(Clone)]
pub struct OpenClMemory {
    buffer: Arc<Mutex<ClBuffer<u8>>>,
    size: usize,
}

impl fmt::Debug for OpenClMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenClMemory").field("size", &self.size).finish()
    }
}

impl DeviceMemory for OpenClMemory {
    fn size(&self) -> usize {
        self.size
    }
}

pub struct OpenClQueue {
    queue: ClQueue,
}

impl fmt::Debug for OpenClQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenClQueue").finish_non_exhaustive()
    }
}

impl CommandQueue<OpenClBackend> for OpenClQueue {
    unsafe fn enqueue_write(
        &self,
        memory: &OpenClMemory,
        offset: usize,
        len: usize,
        src: *const u8,
    ) -> StatusResult<()> {
        let mut buffer = memory.buffer.lock();
        // SAFETY: the caller keeps `src` valid for `len` bytes until the queue finishes.
        unsafe {
            let src = std::slice::from_raw_parts(src, len);
            self.queue.enqueue_write_buffer(&mut buffer, CL_NON_BLOCKING, offset, src, &[])
        }
        .map(drop)
        .map_err(status)
    }

    unsafe fn enqueue_read(&self, memory: &OpenClMemory, offset: usize, len: usize, dst: *mut u8) -> StatusResult<()> {
        let buffer = memory.buffer.lock();
        // SAFETY: the caller keeps `dst` valid and untouched until the queue finishes.
        unsafe {
            let dst = std::slice::from_raw_parts_mut(dst, len);
            self.queue.enqueue_read_buffer(&buffer, CL_NON_BLOCKING, offset, dst, &[])
        }
        .map(drop)
        .map_err(status)
    }

    fn flush(&self) -> StatusResult<()> {
        self.queue.flush().map_err(status)
    }

    fn finish(&self) -> StatusResult<()> {
        self.queue.finish().map_err(status)
    }
}

pub struct OpenClProgram {
    program: Program,
    devices: Vec<cl_device_id>,
}

impl fmt::Debug for OpenClProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenClProgram").field("devices", &self.devices.len()).finish()
    }
}

impl DeviceProgram<OpenClBackend> for OpenClProgram {
    fn build(&mut self, options: &str) -> StatusResult<()> {
        self.program.build(&self.devices, options).map_err(status)
    }

    fn build_status(&self, device: &OpenClDevice) -> StatusResult<BuildStatus> {
        Ok(match self.program.get_build_status(device.id).map_err(status)? {
            CL_BUILD_SUCCESS => BuildStatus::Success,
            CL_BUILD_NONE => BuildStatus::None,
            CL_BUILD_ERROR => BuildStatus::Error,
            _ => BuildStatus::InProgress,
        })
    }

    fn build_log(&self, device: &OpenClDevice) -> StatusResult<String> {
        self.program.get_build_log(device.id).map_err(status)
    }

    fn kernel_names(&self) -> StatusResult<Vec<String>> {
        Ok(self.program.kernel_names().split(';').filter(|name| !name.is_empty()).map(str::to_string).collect())
    }
}
