use test_case::test_case;

use crate::buffer::{Buffer, HostRegion};
use crate::error::Error;
use crate::host::HostBackend;
use crate::status::Status;
use crate::test::helpers::{catalog, single_gpu_backend, tiny_backend};
use crate::{CommandQueue, DeviceMemory};

fn pattern(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

#[test_case(1; "one byte")]
#[test_case(64; "cache line")]
#[test_case(1 << 20; "one mebibyte")]
fn test_round_trip(size: usize) {
    let catalog = catalog(&single_gpu_backend());
    let target = catalog.current();
    let mut buffer = Buffer::<HostBackend>::new(target.context(), size).unwrap();

    let expected = pattern(size);
    buffer.host_slice_mut().unwrap().copy_from_slice(&expected);
    unsafe { buffer.upload(target.queue()).unwrap() };
    target.finish().unwrap();
    assert_eq!(buffer.device_handle().unwrap().contents(), expected);

    buffer.host_slice_mut().unwrap().fill(0);
    unsafe { buffer.download(target.queue()).unwrap() };
    target.finish().unwrap();
    assert_eq!(buffer.host_slice().unwrap(), expected.as_slice());
}

#[test]
fn test_transfers_are_deferred_until_finish() {
    let catalog = catalog(&single_gpu_backend());
    let target = catalog.current();
    let mut buffer = Buffer::<HostBackend>::new(target.context(), 16).unwrap();

    buffer.host_slice_mut().unwrap().fill(7);
    unsafe { buffer.upload(target.queue()).unwrap() };
    assert_eq!(target.queue().pending(), 1);
    assert_eq!(buffer.device_handle().unwrap().contents(), vec![0; 16]);

    target.finish().unwrap();
    assert_eq!(target.queue().pending(), 0);
    assert_eq!(buffer.device_handle().unwrap().contents(), vec![7; 16]);
}

#[test]
fn test_new_buffer_owns_zeroed_host_region() {
    let catalog = catalog(&single_gpu_backend());
    let buffer = Buffer::<HostBackend>::new(catalog.current_context(), 32).unwrap();

    assert_eq!(buffer.region(), HostRegion::Owned);
    assert!(buffer.owns_host() && !buffer.is_borrowed() && !buffer.is_detached());
    assert_eq!(buffer.size(), 32);
    assert_eq!(buffer.device_handle().unwrap().size(), 32);
    assert!(buffer.host_slice().unwrap().iter().all(|&b| b == 0));
}

#[test]
fn test_borrowed_host_region() {
    let catalog = catalog(&single_gpu_backend());
    let target = catalog.current();
    let mut host = vec![0u8; 8];
    let ptr = host.as_mut_ptr();

    let buffer = unsafe { Buffer::<HostBackend>::from_host_ptr(target.context(), 8, ptr) }.unwrap();
    assert!(buffer.is_borrowed() && !buffer.owns_host());
    assert_eq!(buffer.host_ptr(), ptr);

    let device = buffer.device_handle().unwrap().clone();
    let source = [9u8; 8];
    unsafe { target.queue().enqueue_write(&device, 0, 8, source.as_ptr()).unwrap() };
    unsafe { buffer.download(target.queue()).unwrap() };
    target.finish().unwrap();
    drop(buffer);

    assert_eq!(host, [9u8; 8]);
}

#[test]
fn test_null_host_pointer_allocates_owned_region() {
    let catalog = catalog(&single_gpu_backend());
    let buffer =
        unsafe { Buffer::<HostBackend>::from_host_ptr(catalog.current_context(), 8, std::ptr::null_mut()) }.unwrap();
    assert!(buffer.owns_host());
    assert!(!buffer.host_ptr().is_null());
}

#[test]
fn test_clone_of_owned_buffer_is_independent() {
    let catalog = catalog(&single_gpu_backend());
    let mut original = Buffer::<HostBackend>::new(catalog.current_context(), 4).unwrap();
    original.host_slice_mut().unwrap().copy_from_slice(&[1, 2, 3, 4]);

    let mut copy = original.clone();
    assert!(copy.owns_host());
    assert_ne!(copy.host_ptr(), original.host_ptr());
    assert_eq!(copy.host_slice(), original.host_slice());

    copy.host_slice_mut().unwrap()[0] = 42;
    assert_eq!(original.host_slice().unwrap(), [1, 2, 3, 4]);

    let (a, b) = (original.device_handle().unwrap(), copy.device_handle().unwrap());
    assert!(a.same_region(b));
}

#[test]
fn test_clone_of_borrowed_buffer_shares_host_region() {
    let catalog = catalog(&single_gpu_backend());
    let mut host = vec![5u8; 16];
    let buffer =
        unsafe { Buffer::<HostBackend>::from_host_ptr(catalog.current_context(), 16, host.as_mut_ptr()) }.unwrap();

    let copy = buffer.clone();
    assert!(copy.is_borrowed());
    assert_eq!(copy.host_ptr(), buffer.host_ptr());
    assert_eq!(copy.size(), 16);
}

#[test]
fn test_borrowed_region_has_no_slice_view() {
    let catalog = catalog(&single_gpu_backend());
    let mut host = vec![5u8; 16];
    let mut buffer =
        unsafe { Buffer::<HostBackend>::from_host_ptr(catalog.current_context(), 16, host.as_mut_ptr()) }.unwrap();
    let mut copy = buffer.clone();

    assert!(buffer.host_slice().is_none());
    assert!(buffer.host_slice_mut().is_none());
    assert!(copy.host_slice_mut().is_none());

    unsafe { *copy.host_ptr() = 99 };
    drop((buffer, copy));
    assert_eq!(host[0], 99);
}

#[test]
fn test_take_moves_and_detaches() {
    let backend = single_gpu_backend();
    let catalog = catalog(&backend);
    let target = catalog.current();
    let mut source = Buffer::<HostBackend>::new(target.context(), 64).unwrap();
    let ptr = source.host_ptr();

    let moved = source.take();
    assert_eq!(moved.host_ptr(), ptr);
    assert_eq!(moved.size(), 64);
    assert!(moved.owns_host());

    assert_eq!(source.region(), HostRegion::Detached);
    assert!(source.host_ptr().is_null());
    assert!(source.device_handle().is_none());
    assert!(source.host_slice().is_none());
    assert_eq!(source.size(), 0);
    assert!(matches!(unsafe { source.upload(target.queue()) }, Err(Error::Detached)));
    assert!(matches!(unsafe { source.download(target.queue()) }, Err(Error::Detached)));

    drop(source);
    assert_eq!(backend.live_allocations().buffers(), 1);
    drop(moved);
    assert_eq!(backend.live_allocations().buffers(), 0);
}

#[test]
fn test_detached_buffer_holds_nothing() {
    let buffer = Buffer::<HostBackend>::detached();
    assert!(buffer.is_detached());
    assert!(buffer.device_handle().is_none());
    assert_eq!(format!("{buffer:?}"), "Buffer { region: Detached, size: 0, device_size: None }");
}

#[test]
fn test_create_destroy_cycles_release_everything() {
    let backend = single_gpu_backend();
    let catalog = catalog(&backend);
    let context = catalog.current_context();

    for _ in 0..500 {
        let buffer = Buffer::<HostBackend>::new(context, 4096).unwrap();
        let copy = buffer.clone();
        let mut other = copy.clone();
        let _moved = other.take();
    }

    assert_eq!(backend.live_allocations().buffers(), 0);
    assert_eq!(backend.live_allocations().bytes(), 0);
    assert_eq!(context.used_bytes(), 0);
}

#[test]
fn test_partial_ranges() {
    let catalog = catalog(&single_gpu_backend());
    let target = catalog.current();
    let mut buffer = Buffer::<HostBackend>::new(target.context(), 8).unwrap();
    buffer.host_slice_mut().unwrap().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);

    unsafe { buffer.upload_range(target.queue(), 2, 3).unwrap() };
    unsafe { buffer.upload_range(target.queue(), 6, 0).unwrap() };
    target.finish().unwrap();
    assert_eq!(buffer.device_handle().unwrap().contents(), [0, 0, 3, 4, 5, 0, 7, 8]);

    buffer.host_slice_mut().unwrap().fill(0);
    unsafe { buffer.download_range(target.queue(), 4, 0).unwrap() };
    target.finish().unwrap();
    assert_eq!(buffer.host_slice().unwrap(), [0, 0, 0, 0, 5, 0, 7, 8]);
}

#[test_case(60, 8; "overruns end")]
#[test_case(65, 0; "offset past end")]
#[test_case(usize::MAX, 2; "overflowing range")]
fn test_out_of_bounds_range(offset: usize, size: usize) {
    let catalog = catalog(&single_gpu_backend());
    let target = catalog.current();
    let buffer = Buffer::<HostBackend>::new(target.context(), 64).unwrap();

    let err = unsafe { buffer.upload_range(target.queue(), offset, size) }.unwrap_err();
    assert!(matches!(err, Error::OutOfBounds { buffer_size: 64, .. }), "{err}");
    assert!(unsafe { buffer.download_range(target.queue(), offset, size) }.is_err());
    assert_eq!(target.queue().pending(), 0);
}

#[test]
fn test_empty_tail_range_is_a_no_op() {
    let catalog = catalog(&single_gpu_backend());
    let target = catalog.current();
    let buffer = Buffer::<HostBackend>::new(target.context(), 64).unwrap();

    unsafe { buffer.upload_range(target.queue(), 64, 0).unwrap() };
    assert_eq!(target.queue().pending(), 0);
}

#[test]
fn test_allocation_failures() {
    let backend = tiny_backend();
    let catalog = catalog(&backend);
    let context = catalog.current_context();

    let err = Buffer::<HostBackend>::new(context, 0).unwrap_err();
    assert_eq!(err.status(), Some(Status::INVALID_BUFFER_SIZE));

    let err = Buffer::<HostBackend>::new(context, 4096).unwrap_err();
    assert_eq!(err.status(), Some(Status::INVALID_BUFFER_SIZE));

    let _a = Buffer::<HostBackend>::new(context, 2048).unwrap();
    let _b = Buffer::<HostBackend>::new(context, 2048).unwrap();
    let err = Buffer::<HostBackend>::new(context, 1).unwrap_err();
    assert_eq!(err.status(), Some(Status::MEM_OBJECT_ALLOCATION_FAILURE));
    assert!(err.to_string().starts_with("clCreateBuffer failed: CL_MEM_OBJECT_ALLOCATION_FAILURE (-4)"), "{err}");

    assert_eq!(backend.live_allocations().bytes(), 4096);
}
