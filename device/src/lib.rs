//! Device resource layer of the lumen ray tracer.
//!
//! Discovers compute platforms and devices, builds one execution target per
//! usable device, compiles OpenCL C programs for a target and moves data
//! between host memory and device buffers.
//!
//! # Backends
//!
//! Everything is generic over [`Backend`]:
//! - [`host::HostBackend`]: in-process reference backend with a declared
//!   topology, used by the test suite
//! - `opencl::OpenClBackend`: installed OpenCL drivers (feature `opencl`)
//!
//! # Flow
//!
//! ```ignore
//! let catalog = lumen_device::discover(&OpenClBackend, &CatalogConfig::from_env()?)?;
//! let target = catalog.current();
//!
//! let mut programs = ProgramBuilder::new();
//! programs.load(target, "kernels/trace.cl", &BuildOptions::new().include_dir("kernels"))?;
//!
//! let buffer = Buffer::new(target.context(), 1 << 20)?;
//! unsafe { buffer.upload(target.queue())? };
//! target.finish()?;
//! ```

pub mod backend;
pub mod buffer;
pub mod catalog;
pub mod config;
pub mod error;
pub mod host;
#[cfg(feature = "opencl")]
pub mod opencl;
pub mod program;
pub mod selection;
pub mod status;

#[cfg(test)]
pub mod test;

pub use backend::{
    Backend, BuildStatus, CommandQueue, ComputeContext, ComputeDevice, ComputePlatform, DeviceInfo, DeviceKind,
    DeviceMemory, DeviceProgram, PlatformInfo,
};
pub use buffer::{Buffer, HostRegion};
pub use catalog::{Catalog, ExecutionTarget, PlatformRecord, RetainedContext, discover};
pub use config::CatalogConfig;
pub use error::{Error, Result};
pub use program::{BuildOptions, Program, ProgramBuilder, ProgramState};
pub use selection::{SelectionPolicy, VendorAllowList};
pub use status::Status;
