//! Platform/device discovery and the execution target set.
//!
//! [`discover`] runs once at startup: it enumerates platforms, creates a
//! context per platform, keeps the contexts the selection policy accepts,
//! and creates one in-order queue per device of every kept context. Each
//! (context, device, queue) triple becomes an [`ExecutionTarget`].
//!
//! Any API failure aborts discovery; a catalog is never partially built.

use std::fmt;

use snafu::ensure;
use tracing::{debug, info};

use crate::backend::{Backend, CommandQueue, ComputeContext, ComputeDevice, ComputePlatform, DeviceInfo, PlatformInfo};
use crate::config::CatalogConfig;
use crate::error::{NoDevicesSnafu, NoPlatformsSnafu, Result, StatusResultExt, TargetIndexSnafu};

/// One enumerated platform and whether its context was kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformRecord {
    pub index: usize,
    pub info: PlatformInfo,
    pub retained: bool,
}

/// A context kept after selection, with the devices it was created with.
#[derive(Debug)]
pub struct RetainedContext<B: Backend> {
    platform: PlatformInfo,
    context: B::Context,
    devices: Vec<DeviceInfo>,
}

impl<B: Backend> RetainedContext<B> {
    pub fn platform(&self) -> &PlatformInfo {
        &self.platform
    }

    pub fn context(&self) -> &B::Context {
        &self.context
    }

    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }
}

/// One device ready for work: its context, device handle and command queue.
#[derive(Debug)]
pub struct ExecutionTarget<B: Backend> {
    index: usize,
    context_index: usize,
    platform: PlatformInfo,
    context: B::Context,
    device: B::Device,
    device_info: DeviceInfo,
    queue: B::Queue,
}

impl<B: Backend> ExecutionTarget<B> {
    /// Position of this target in the catalog.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Position of this target's context among the retained contexts.
    pub fn context_index(&self) -> usize {
        self.context_index
    }

    pub fn platform(&self) -> &PlatformInfo {
        &self.platform
    }

    pub fn context(&self) -> &B::Context {
        &self.context
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    pub fn queue(&self) -> &B::Queue {
        &self.queue
    }

    /// Block until every operation enqueued on this target's queue has completed.
    pub fn finish(&self) -> Result<()> {
        self.queue.finish().api("clFinish")
    }
}

/// Everything discovery found: platforms, retained contexts and execution targets.
#[derive(Debug)]
pub struct Catalog<B: Backend> {
    platforms: Vec<PlatformRecord>,
    contexts: Vec<RetainedContext<B>>,
    targets: Vec<ExecutionTarget<B>>,
    current: usize,
}

/// Enumerate platforms and devices of `backend` and build the execution targets.
///
/// # Errors
///
/// - [`crate::Error::Api`] if any enumeration, context or queue call fails
/// - [`crate::Error::NoPlatforms`] if the driver exposes no platform
/// - [`crate::Error::NoDevices`] if no device survives selection
/// - [`crate::Error::TargetIndex`] if `config.device_index` is out of range
#[tracing::instrument(skip_all, fields(backend = backend.name(), device_kind = %config.device_kind))]
pub fn discover<B: Backend>(backend: &B, config: &CatalogConfig) -> Result<Catalog<B>> {
    let platforms = backend.platforms().api("clGetPlatformIDs")?;
    ensure!(!platforms.is_empty(), NoPlatformsSnafu);

    let mut records = Vec::with_capacity(platforms.len());
    let mut kept = Vec::new();
    for (index, platform) in platforms.iter().enumerate() {
        let info = platform.info().api("clGetPlatformInfo")?;
        info!(platform.index = index, platform.name = %info.name, platform.version = %info.version, "found platform");

        // Context creation failure is fatal even for platforms the policy would drop.
        let context = platform.create_context(config.device_kind).api("clCreateContextFromType")?;

        let retained = config.policy.accepts(&info);
        if retained {
            kept.push((info.clone(), context));
        } else {
            debug!(platform.index = index, platform.name = %info.name, "platform rejected by selection policy");
        }
        records.push(PlatformRecord { index, info, retained });
    }

    let mut contexts = Vec::with_capacity(kept.len());
    let mut targets = Vec::new();
    for (context_index, (platform, context)) in kept.into_iter().enumerate() {
        let devices = context.devices().api("clGetContextInfo")?;
        let mut device_infos = Vec::with_capacity(devices.len());

        for device in devices {
            let queue = context.create_queue(&device).api("clCreateCommandQueue")?;
            let device_info = device.info().api("clGetDeviceInfo")?;
            info!(
                device.index = targets.len(),
                device.name = %device_info.name,
                device.mem_mib = device_info.global_mem_mib(),
                "device ready"
            );

            device_infos.push(device_info.clone());
            targets.push(ExecutionTarget {
                index: targets.len(),
                context_index,
                platform: platform.clone(),
                context: context.clone(),
                device,
                device_info,
                queue,
            });
        }

        contexts.push(RetainedContext { platform, context, devices: device_infos });
    }

    ensure!(!targets.is_empty(), NoDevicesSnafu { platforms: records.len() });
    ensure!(config.device_index < targets.len(), TargetIndexSnafu { index: config.device_index, count: targets.len() });

    Ok(Catalog { platforms: records, contexts, targets, current: config.device_index })
}

impl<B: Backend> Catalog<B> {
    /// Every enumerated platform, retained or not, in enumeration order.
    pub fn platforms(&self) -> &[PlatformRecord] {
        &self.platforms
    }

    /// Names of the platforms whose context was kept.
    pub fn retained_platform_names(&self) -> Vec<&str> {
        self.contexts.iter().map(|c| c.platform.name.as_str()).collect()
    }

    pub fn contexts(&self) -> &[RetainedContext<B>] {
        &self.contexts
    }

    pub fn targets(&self) -> &[ExecutionTarget<B>] {
        &self.targets
    }

    pub fn target(&self, index: usize) -> Result<&ExecutionTarget<B>> {
        self.targets.get(index).ok_or_else(|| TargetIndexSnafu { index, count: self.targets.len() }.build())
    }

    /// Make `index` the current execution target.
    pub fn select(&mut self, index: usize) -> Result<()> {
        ensure!(index < self.targets.len(), TargetIndexSnafu { index, count: self.targets.len() });
        debug!(from = self.current, to = index, "current execution target changed");
        self.current = index;
        Ok(())
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> &ExecutionTarget<B> {
        // Discovery and `select` keep `current` in range.
        &self.targets[self.current]
    }

    pub fn current_context(&self) -> &B::Context {
        self.current().context()
    }

    pub fn current_device(&self) -> &B::Device {
        self.current().device()
    }

    pub fn current_queue(&self) -> &B::Queue {
        self.current().queue()
    }
}

impl<B: Backend> fmt::Display for Catalog<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for record in &self.platforms {
            writeln!(f, "Platform #{} | {} | {}", record.index, record.info.name, record.info.version)?;
        }
        for target in &self.targets {
            writeln!(f, "Device #{} | {} | {}MB", target.index, target.device_info.name, target.device_info.global_mem_mib())?;
        }
        Ok(())
    }
}
