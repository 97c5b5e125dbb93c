//! Host backend topologies shared by the unit and property tests.

use crate::catalog::{Catalog, discover};
use crate::config::CatalogConfig;
use crate::host::{HostBackend, HostDeviceSpec, HostPlatformSpec};

pub const NVIDIA: &str = "NVIDIA CUDA";
pub const AMD: &str = "AMD Accelerated Parallel Processing";
pub const INTEL: &str = "Intel(R) OpenCL";

/// GPU with 256 MiB of global memory and a 64 MiB allocation limit.
pub fn gpu(name: &str) -> HostDeviceSpec {
    HostDeviceSpec::builder().name(name).global_mem_bytes(256 << 20).compute_units(8).build()
}

pub fn platform(name: &str, devices: &[&str]) -> HostPlatformSpec {
    HostPlatformSpec::builder().name(name).devices(devices.iter().map(|d| gpu(d)).collect()).build()
}

/// NVIDIA with two GPUs, AMD with one, Intel with one.
pub fn mixed_backend() -> HostBackend {
    HostBackend::builder()
        .platforms(vec![
            platform(NVIDIA, &["GeForce RTX 4090", "GeForce RTX 3060"]),
            platform(AMD, &["Radeon RX 7900 XTX"]),
            platform(INTEL, &["Intel(R) Arc(TM) A770"]),
        ])
        .build()
}

pub fn single_gpu_backend() -> HostBackend {
    HostBackend::builder().platforms(vec![platform(NVIDIA, &["GeForce RTX 4090"])]).build()
}

/// One GPU with 4 KiB of global memory and a 2 KiB allocation limit.
pub fn tiny_backend() -> HostBackend {
    let device = HostDeviceSpec::builder().name("Tiny").global_mem_bytes(4096).max_alloc_bytes(2048).build();
    HostBackend::builder()
        .platforms(vec![HostPlatformSpec::builder().name(AMD).devices(vec![device]).build()])
        .build()
}

pub fn catalog(backend: &HostBackend) -> Catalog<HostBackend> {
    discover(backend, &CatalogConfig::default()).unwrap()
}
