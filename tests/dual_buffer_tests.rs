//! DualBuffer behaviour across the emulation backends

mod common;

use common::{device_bytes, emulated_backend, failing_backend, filled, TrackedBackend, THREAD_BACKEND};
use memforge::{BackendKind, DualBuffer, ErrorCategory, HostMemory, MemError, GUARD_BYTES};

#[test]
fn allocate_zero_on_empty_buffer() {
    let mut buf = DualBuffer::with_backend(THREAD_BACKEND.clone());
    buf.allocate(0).unwrap();
    assert_eq!(buf.size(), 0);
    assert!(buf.is_empty());
    assert_eq!(buf.capacity(), 0);
}

#[test]
fn fill_then_read_back() -> anyhow::Result<()> {
    let mut buf = DualBuffer::with_backend(THREAD_BACKEND.clone());
    buf.allocate(100)?;
    buf.fill(0xAA)?;
    buf.device_to_host()?;

    let host = buf.host_slice()?;
    assert_eq!(host.len(), 100);
    assert_eq!(host[50], 0xAA);
    assert!(host.iter().all(|&b| b == 0xAA));
    Ok(())
}

#[test]
fn host_device_round_trip() -> anyhow::Result<()> {
    let mut buf = DualBuffer::with_backend(THREAD_BACKEND.clone());
    buf.allocate(256)?;

    let pattern: Vec<u8> = (0..256).map(|i| (i * 7 % 251) as u8).collect();
    buf.host_slice_mut()?.copy_from_slice(&pattern);
    buf.host_to_device()?;

    buf.host_slice_mut()?.fill(0);
    buf.device_to_host()?;
    assert_eq!(buf.host_slice()?, pattern.as_slice());
    assert!(buf.is_host_synced());
    Ok(())
}

#[test]
fn resize_grows_and_keeps_prefix() -> anyhow::Result<()> {
    let mut buf = filled(&THREAD_BACKEND, 40, 0x11)?;
    let old_ptr = buf.device_ptr();

    buf.resize(90)?;
    assert_eq!(buf.size(), 90);
    assert_eq!(buf.capacity(), 90 + GUARD_BYTES);
    assert_ne!(buf.device_ptr(), old_ptr);

    let bytes = device_bytes(&mut buf)?;
    assert!(bytes[..40].iter().all(|&b| b == 0x11));

    // The host mirror existed before the resize, so it keeps its prefix too
    buf.fill(0x22)?;
    buf.resize(200)?;
    assert!(buf.host_slice()?[..90].iter().all(|&b| b == 0x22));
    Ok(())
}

#[test]
fn resize_never_shrinks() -> anyhow::Result<()> {
    let mut buf = filled(&THREAD_BACKEND, 64, 0x33)?;
    let ptr = buf.device_ptr();
    buf.resize(10)?;
    buf.resize(64)?;
    assert_eq!(buf.size(), 64);
    assert_eq!(buf.device_ptr(), ptr);
    Ok(())
}

#[test]
fn resize_on_empty_is_allocate() -> anyhow::Result<()> {
    let mut resized = DualBuffer::with_backend(THREAD_BACKEND.clone());
    resized.resize(50)?;

    let mut allocated = DualBuffer::with_backend(THREAD_BACKEND.clone());
    allocated.allocate(50)?;

    assert_eq!(resized.size(), allocated.size());
    assert_eq!(resized.capacity(), allocated.capacity());
    assert_eq!(resized.has_host(), allocated.has_host());
    Ok(())
}

#[test]
fn resize_failure_leaves_buffer_intact() -> anyhow::Result<()> {
    let (backend, driver) = failing_backend(2);
    let mut buf = DualBuffer::with_backend(backend);
    buf.allocate(32)?;
    buf.fill(0x5C)?;
    buf.device_to_host()?;
    assert_eq!(driver.live_allocations(), 2);

    let device = buf.device_ptr();
    let host = buf.host_ptr()?;

    // No budget for the new device allocation
    let err = buf.resize(64).unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(buf.size(), 32);
    assert_eq!(buf.device_ptr(), device);
    assert_eq!(buf.host_ptr()?, host);
    assert_eq!(driver.live_allocations(), 2);

    // New device allocation succeeds, the host mirror does not
    driver.refill(1);
    assert!(buf.resize(64).is_err());
    assert_eq!(buf.size(), 32);
    assert_eq!(buf.device_ptr(), device);
    assert_eq!(driver.live_allocations(), 2);

    assert_eq!(device_bytes(&mut buf)?, vec![0x5C; 32]);
    Ok(())
}

#[test]
fn oversized_requests_fail_without_touching_the_buffer() -> anyhow::Result<()> {
    let tracked = TrackedBackend::new(BackendKind::Fibers, 1);

    let mut empty = tracked.buffer();
    for size in [usize::MAX, usize::MAX - GUARD_BYTES / 2] {
        let err = empty.allocate(size).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, MemError::AllocationFailed { .. }));
        assert_eq!(empty.size(), 0);
        assert!(!empty.has_device());
    }
    assert!(empty.resize(usize::MAX).unwrap_err().is_fatal());
    assert_eq!(empty.size(), 0);

    let mut buf = tracked.buffer();
    buf.allocate(16)?;
    buf.fill(0x3C)?;
    buf.host_slice()?;
    let err = buf.resize(usize::MAX).unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(buf.size(), 16);
    assert_eq!(device_bytes(&mut buf)?, vec![0x3C; 16]);

    drop(buf);
    drop(empty);
    tracked.assert_no_leak();
    Ok(())
}

#[test]
fn swap_twice_is_identity() -> anyhow::Result<()> {
    let mut a = filled(&THREAD_BACKEND, 16, 0x01)?;
    let mut b = filled(&THREAD_BACKEND, 48, 0x02)?;
    a.inc_ref();
    let (a_ptr, b_ptr) = (a.device_ptr(), b.device_ptr());

    a.swap(&mut b);
    assert_eq!(a.size(), 48);
    assert_eq!(b.size(), 16);
    assert_eq!(a.device_ptr(), b_ptr);
    assert_eq!(b.ref_count(), 1);
    assert_eq!(a.ref_count(), 0);

    a.swap(&mut b);
    assert_eq!(a.size(), 16);
    assert_eq!(a.device_ptr(), a_ptr);
    assert_eq!(b.device_ptr(), b_ptr);
    assert_eq!(a.ref_count(), 1);
    assert_eq!(device_bytes(&mut a)?, vec![0x01; 16]);
    Ok(())
}

#[test]
fn copy_from_larger_source_is_rejected() -> anyhow::Result<()> {
    let mut small = filled(&THREAD_BACKEND, 8, 0x44)?;
    let mut large = filled(&THREAD_BACKEND, 9, 0x55)?;

    let err = small.copy(&mut large).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Misuse);
    assert!(matches!(
        err,
        MemError::CapacityExceeded {
            source_size: 9,
            capacity: 8,
            ..
        }
    ));
    assert_eq!(small.size(), 8);
    assert_eq!(device_bytes(&mut small)?, vec![0x44; 8]);
    Ok(())
}

#[test]
fn copy_between_dual_buffers_stays_on_device() -> anyhow::Result<()> {
    let mut dst = filled(&THREAD_BACKEND, 32, 0x00)?;
    let mut src = DualBuffer::with_backend(THREAD_BACKEND.clone());
    src.allocate(16)?;
    src.fill(0x77)?;
    // Poison the source host mirror; a device-side copy never reads it
    src.host_slice_mut()?.fill(0xEE);

    dst.copy(&mut src)?;
    let bytes = device_bytes(&mut dst)?;
    assert!(bytes[..16].iter().all(|&b| b == 0x77));
    assert!(bytes[16..].iter().all(|&b| b == 0x00));
    Ok(())
}

#[test]
fn copy_across_backends_goes_through_host() -> anyhow::Result<()> {
    let fibers = emulated_backend(BackendKind::Fibers);
    let mut dst = filled(&THREAD_BACKEND, 8, 0x00)?;
    let mut src = DualBuffer::with_backend(fibers);
    src.allocate(4)?;
    src.host_slice_mut()?.copy_from_slice(&[1, 2, 3, 4]);

    dst.copy(&mut src)?;
    assert_eq!(device_bytes(&mut dst)?, vec![1, 2, 3, 4, 0, 0, 0, 0]);
    Ok(())
}

#[test]
fn copy_from_host_memory() -> anyhow::Result<()> {
    let mut dst = filled(&THREAD_BACKEND, 5, 0xFF)?;
    let mut src = HostMemory::from(&b"memf"[..]);
    dst.copy(&mut src)?;
    assert_eq!(device_bytes(&mut dst)?, b"memf\xFF".to_vec());
    Ok(())
}

#[test]
fn device_to_device_range() -> anyhow::Result<()> {
    let mut a = filled(&THREAD_BACKEND, 64, 0x01)?;
    let b = filled(&THREAD_BACKEND, 64, 0x02)?;

    a.device_to_device(&b, 0, 32, 0)?;
    let bytes = device_bytes(&mut a)?;
    assert!(bytes[..32].iter().all(|&x| x == 0x02));
    assert!(bytes[32..].iter().all(|&x| x == 0x01));

    a.device_to_device(&b, 10, 20, 54)?;
    assert!(device_bytes(&mut a)?[54..].iter().all(|&x| x == 0x02));
    Ok(())
}

#[test]
fn device_to_device_checks_bounds_and_backend() -> anyhow::Result<()> {
    let mut a = filled(&THREAD_BACKEND, 16, 0x01)?;
    let b = filled(&THREAD_BACKEND, 16, 0x02)?;
    let other = filled(&emulated_backend(BackendKind::Fibers), 16, 0x03)?;

    assert!(matches!(
        a.device_to_device(&b, 0, 17, 0),
        Err(MemError::RangeOutOfBounds { .. })
    ));
    assert!(matches!(
        a.device_to_device(&b, 8, 16, 9),
        Err(MemError::RangeOutOfBounds { size: 16, .. })
    ));
    assert!(matches!(
        a.device_to_device(&other, 0, 4, 0),
        Err(MemError::BackendMismatch {
            source_kind: BackendKind::Fibers,
            dest_kind: BackendKind::CpuThreads,
            ..
        })
    ));
    assert_eq!(device_bytes(&mut a)?, vec![0x01; 16]);
    Ok(())
}

#[test]
fn misuse_reports_caller_location() {
    let mut buf = DualBuffer::with_backend(THREAD_BACKEND.clone());
    buf.allocate(8).unwrap();
    let line = line!() + 1;
    let err = buf.allocate(9).unwrap_err();
    match err {
        MemError::SizeMismatch { location, .. } => {
            assert!(location.file().ends_with("dual_buffer_tests.rs"));
            assert_eq!(location.line(), line);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn buffers_release_everything() -> anyhow::Result<()> {
    let tracked = TrackedBackend::new(BackendKind::CpuThreads, 1);
    {
        let mut a = tracked.buffer();
        a.allocate(128)?;
        a.host_slice()?;
        a.resize(256)?;

        let mut b = tracked.buffer();
        b.allocate(64)?;
        a.swap(&mut b);

        b.destroy()?;
        assert!(!b.has_device());
    }
    tracked.assert_no_leak();
    Ok(())
}
