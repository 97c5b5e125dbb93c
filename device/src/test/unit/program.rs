use std::path::Path;

use crate::error::Error;
use test_case::test_case;

use crate::host::{HostBackend, HostPlatformSpec};
use crate::program::{BuildOptions, ProgramBuilder, ProgramState};
use crate::status::Status;
use crate::test::helpers::{AMD, NVIDIA, catalog, gpu, platform, single_gpu_backend};

const TRACE_KERNEL: &str = r#"
#include "camera.h"

__kernel void trace(__global float4* out, const uint width) {
    const uint x = get_global_id(0);
    out[x] = (float4)(MAX_DEPTH, 0.0f, 0.0f, 1.0f);
}

__kernel void accumulate(__global float4* acc, __global const float4* sample) {
    acc[get_global_id(0)] += sample[get_global_id(0)];
}
"#;

const BROKEN_KERNEL: &str = "__kernel void trace(__global float4* out) {\n    out[0] = (float4)(1.0f;\n";

fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_load_success() {
    let catalog = catalog(&single_gpu_backend());
    let dir = tempfile::tempdir().unwrap();
    let include = dir.path().join("include");
    std::fs::create_dir(&include).unwrap();
    write(&include, "camera.h", "#ifndef CAMERA_H\n#define CAMERA_H\ntypedef struct { float3 origin; } Camera;\n#endif\n");
    let path = write(dir.path(), "trace.cl", TRACE_KERNEL);

    let options = BuildOptions::new().include_dir(&include).define("MAX_DEPTH=8");
    let mut programs = ProgramBuilder::<HostBackend>::new();
    let program = programs.load(catalog.current(), &path, &options).unwrap();

    assert!(program.is_built());
    assert_eq!(program.state(), ProgramState::Built);
    assert_eq!(program.build_log(), None);
    assert_eq!(program.kernel_names(), ["trace", "accumulate"]);
    assert_eq!(program.options(), format!("-I{} -DMAX_DEPTH=8", include.display()));
    assert_eq!(program.path(), path);
    assert!(program.handle().source().contains("__kernel void trace"));

    assert_eq!(programs.len(), 1);
    assert!(programs.program(&path).is_some());
}

#[test]
fn test_load_build_failure_keeps_program_registered() {
    let catalog = catalog(&single_gpu_backend());
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "broken.cl", BROKEN_KERNEL);

    let mut programs = ProgramBuilder::<HostBackend>::new();
    let err = programs.load(catalog.current(), &path, &BuildOptions::new()).unwrap_err();

    let Error::BuildFailed { path: failed, log } = &err else {
        panic!("expected build failure, got {err}");
    };
    assert_eq!(failed, &path);
    assert!(log.contains("<program source>:2:"), "{log}");
    assert!(log.contains("error: expected ')'"), "{log}");
    assert!(err.to_string().contains(log.as_str()));

    let program = programs.program(&path).unwrap();
    assert_eq!(program.state(), ProgramState::BuildFailed);
    assert_eq!(program.build_log(), Some(log.as_str()));
    assert!(program.kernel_names().is_empty());
}

#[test]
fn test_missing_include_dir_fails_build() {
    let catalog = catalog(&single_gpu_backend());
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "trace.cl", TRACE_KERNEL);

    let mut programs = ProgramBuilder::<HostBackend>::new();
    let err = programs.load(catalog.current(), &path, &BuildOptions::new()).unwrap_err();
    assert!(matches!(&err, Error::BuildFailed { log, .. } if log.contains("'camera.h' file not found")), "{err}");
}

#[test]
fn test_reload_overwrites_registered_program() {
    let catalog = catalog(&single_gpu_backend());
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "kernel.cl", BROKEN_KERNEL);

    let mut programs = ProgramBuilder::<HostBackend>::new();
    assert!(programs.load(catalog.current(), &path, &BuildOptions::new()).is_err());

    write(dir.path(), "kernel.cl", "__kernel void shade(__global int* px) { px[0] = 1; }\n");
    let program = programs.load(catalog.current(), &path, &BuildOptions::new()).unwrap();
    assert!(program.is_built());

    assert_eq!(programs.len(), 1);
    assert_eq!(programs.iter().next().unwrap().kernel_names(), ["shade"]);
}

#[test]
fn test_definitions_reach_preprocessor() {
    let catalog = catalog(&single_gpu_backend());
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "guarded.cl",
        "#ifndef SAMPLES\n#error SAMPLES must be defined\n#endif\n__kernel void sample(__global float* out) {}\n",
    );

    let mut programs = ProgramBuilder::<HostBackend>::new();
    let err = programs.load(catalog.current(), &path, &BuildOptions::new()).unwrap_err();
    assert!(matches!(&err, Error::BuildFailed { log, .. } if log.contains("error: SAMPLES must be defined")));

    let program = programs.load(catalog.current(), &path, &BuildOptions::new().define("SAMPLES=16")).unwrap();
    assert_eq!(program.kernel_names(), ["sample"]);
}

#[test]
fn test_unreadable_source() {
    let catalog = catalog(&single_gpu_backend());
    let dir = tempfile::tempdir().unwrap();

    let mut programs = ProgramBuilder::<HostBackend>::new();
    let err = programs.load(catalog.current(), dir.path().join("absent.cl"), &BuildOptions::new()).unwrap_err();
    assert!(matches!(err, Error::ReadSource { .. }));
    assert!(programs.is_empty());
}

#[test]
fn test_invalid_option_is_api_error() {
    let catalog = catalog(&single_gpu_backend());
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "k.cl", "__kernel void k() {}\n");

    let mut programs = ProgramBuilder::<HostBackend>::new();
    let err = programs.load(catalog.current(), &path, &BuildOptions::new().define("1BAD")).unwrap_err();
    assert_eq!(err.status(), Some(Status::INVALID_BUILD_OPTIONS));
    assert!(programs.program(&path).is_none());
}

/// NVIDIA answers program queries; AMD fails every build-info and kernel-name query.
fn failing_info_backend() -> HostBackend {
    HostBackend::builder()
        .platforms(vec![
            platform(NVIDIA, &["GeForce RTX 4090"]),
            HostPlatformSpec::builder()
                .name(AMD)
                .devices(vec![gpu("Radeon RX 7900 XTX")])
                .program_info_failure(Status::OUT_OF_RESOURCES)
                .build(),
        ])
        .build()
}

#[test_case("__kernel void k() {}\n", "clGetProgramInfo"; "kernel names")]
#[test_case(BROKEN_KERNEL, "clGetProgramBuildInfo"; "build status")]
fn test_failed_info_query_drops_stale_entry(source: &str, operation: &str) {
    let backend = failing_info_backend();
    let catalog = catalog(&backend);
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "k.cl", "__kernel void stale() {}\n");

    let mut programs = ProgramBuilder::<HostBackend>::new();
    programs.load(catalog.target(0).unwrap(), &path, &BuildOptions::new()).unwrap();
    assert_eq!(programs.len(), 1);

    write(dir.path(), "k.cl", source);
    let err = programs.load(catalog.target(1).unwrap(), &path, &BuildOptions::new()).unwrap_err();
    assert!(matches!(&err, Error::Api { operation: op, status: Status::OUT_OF_RESOURCES, .. } if *op == operation), "{err}");
    assert!(programs.program(&path).is_none());
    assert!(programs.is_empty());
}

#[test_case(BuildOptions::new().include_dir("My Kernels"), "-IMy Kernels"; "include dir")]
#[test_case(BuildOptions::new().define("TITLE=a b"), "-DTITLE=a b"; "definition")]
fn test_whitespace_in_option_is_rejected(options: BuildOptions, token: &str) {
    let catalog = catalog(&single_gpu_backend());
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "k.cl", "__kernel void k() {}\n");

    let mut programs = ProgramBuilder::<HostBackend>::new();
    let err = programs.load(catalog.current(), &path, &options).unwrap_err();
    assert!(matches!(&err, Error::InvalidBuildOption { option } if option == token), "{err}");
    assert!(programs.is_empty());
}

#[test]
fn test_comments_and_expressions_build() {
    let catalog = catalog(&single_gpu_backend());
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "shade.cl",
        "/*\n# Shading kernels\n*/\n#if MAX_DEPTH > 4 && defined(USE_BVH)\n__kernel void deep(__global float* out) {}\n#else\n__kernel void shallow(__global float* out) {}\n#endif\n",
    );

    let mut programs = ProgramBuilder::<HostBackend>::new();
    let options = BuildOptions::new().define("MAX_DEPTH=8").define("USE_BVH");
    let program = programs.load(catalog.current(), &path, &options).unwrap();
    assert_eq!(program.build_log(), None);
    assert_eq!(program.kernel_names(), ["deep"]);

    let program = programs.load(catalog.current(), &path, &BuildOptions::new().define("MAX_DEPTH=2")).unwrap();
    assert_eq!(program.kernel_names(), ["shallow"]);
}
