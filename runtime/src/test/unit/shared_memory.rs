use test_case::test_case;
use volley_device::{DriverCall, FunctionAttribute, SimDeviceProps, StreamHandle};

use crate::test::helpers::Harness;
use crate::{DispatchConfig, Error, KernelCall, LaunchGrid};

const OPT_IN: i32 = 99 * 1024;
const FOOTPRINT: i32 = 2048;

fn harness() -> Harness {
    let props =
        SimDeviceProps { max_shared_memory_per_block_optin: OPT_IN, static_shared_memory: FOOTPRINT, ..Default::default() };
    Harness::with(props, DispatchConfig::default())
}

fn dynamic_attribute_calls(h: &Harness) -> Vec<i32> {
    h.sim
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            DriverCall::SetFunctionAttribute { attribute: FunctionAttribute::MaxDynamicSharedSizeBytes, value, .. } => {
                Some(value)
            }
            _ => None,
        })
        .collect()
}

#[test_case(0; "none")]
#[test_case(16 * 1024; "small")]
#[test_case(49152; "exactly the static limit")]
fn test_static_requests_skip_configuration(shared: u32) {
    let h = Harness::new();
    let call = KernelCall::new(h.kernel("softmax_kernel", 4, shared), LaunchGrid::linear(1), vec![]);

    unsafe { call.launch(StreamHandle::NULL, &[]) }.unwrap();

    assert!(dynamic_attribute_calls(&h).is_empty());
    assert_eq!(h.sim.count("cuFuncSetCacheConfig"), 0);
    assert_eq!(h.sim.count("cuDeviceGetAttribute"), 0);
    assert_eq!(h.sim.launches().len(), 1);
}

#[test_case(49153; "just above the static limit")]
#[test_case(64 * 1024; "64k")]
#[test_case((OPT_IN - FOOTPRINT) as u32; "largest launchable request")]
fn test_large_requests_configure_once(shared: u32) {
    let h = harness();
    let call = KernelCall::new(h.kernel("softmax_kernel", 4, shared), LaunchGrid::linear(1), vec![]);

    for _ in 0..3 {
        unsafe { call.launch(StreamHandle::NULL, &[]) }.unwrap();
    }

    assert_eq!(dynamic_attribute_calls(&h), vec![OPT_IN - FOOTPRINT]);
    assert_eq!(h.sim.count("cuFuncSetCacheConfig"), 1);
    assert_eq!(h.sim.count("cuDeviceGetAttribute"), 1);
    let launches = h.sim.launches();
    assert_eq!(launches.len(), 3);
    assert!(launches.iter().all(|l| l.dims.shared_mem_bytes == shared));
}

#[test]
fn test_request_above_opt_in_fails_without_launch() {
    let h = harness();
    let requested = OPT_IN as u32 + 1;
    let call = KernelCall::new(h.kernel("softmax_kernel", 4, requested), LaunchGrid::linear(1), vec![]);

    let err = unsafe { call.launch(StreamHandle::NULL, &[]) }.unwrap_err();

    assert!(matches!(err, Error::SharedMemoryExceeded { requested: r, available: OPT_IN } if r == requested));
    assert_eq!(
        err.to_string(),
        format!("Shared memory requested ({requested} bytes) exceeds device resources ({OPT_IN} bytes).")
    );
    assert!(h.sim.launches().is_empty());
    assert!(dynamic_attribute_calls(&h).is_empty());
}

#[test]
fn test_failed_configuration_is_retried() {
    let h = harness();
    let call = KernelCall::new(h.kernel("softmax_kernel", 4, 64 * 1024), LaunchGrid::linear(1), vec![]);
    h.sim.fail_on("cuFuncSetAttribute", "CUDA_ERROR_INVALID_VALUE");

    assert!(unsafe { call.launch(StreamHandle::NULL, &[]) }.is_err());
    assert!(h.sim.launches().is_empty());

    h.sim.clear_failures();
    unsafe { call.launch(StreamHandle::NULL, &[]) }.unwrap();
    assert_eq!(dynamic_attribute_calls(&h).len(), 2);
}

#[test]
fn test_configuration_is_per_function() {
    let h = harness();
    let a = KernelCall::new(h.kernel("softmax_kernel", 4, 64 * 1024), LaunchGrid::linear(1), vec![]);
    let b = KernelCall::new(h.kernel("matmul_64x64", 4, 64 * 1024), LaunchGrid::linear(1), vec![]);

    unsafe {
        a.launch(StreamHandle::NULL, &[]).unwrap();
        b.launch(StreamHandle::NULL, &[]).unwrap();
        a.launch(StreamHandle::NULL, &[]).unwrap();
    }

    assert_eq!(dynamic_attribute_calls(&h).len(), 2);
}

#[test]
fn test_configured_static_limit() {
    let config = DispatchConfig::builder().static_shared_memory_limit(16 * 1024).build();
    let h = Harness::with(SimDeviceProps::default(), config);
    let call = KernelCall::new(h.kernel("softmax_kernel", 4, 32 * 1024), LaunchGrid::linear(1), vec![]);

    unsafe { call.launch(StreamHandle::NULL, &[]) }.unwrap();

    assert_eq!(dynamic_attribute_calls(&h).len(), 1);
}

#[test]
fn test_ensure_capacity_marks_function() {
    let h = harness();
    let kernel = h.kernel("softmax_kernel", 4, 0);
    let function = kernel.prepare(StreamHandle::NULL).unwrap();
    let driver = h.sim.as_ref();

    crate::shared_memory::ensure_capacity(driver, &function, 1024, 49152).unwrap();
    assert!(!function.is_shared_memory_configured());

    crate::shared_memory::ensure_capacity(driver, &function, 60_000, 49152).unwrap();
    assert!(function.is_shared_memory_configured());
    crate::shared_memory::ensure_capacity(driver, &function, 60_000, 49152).unwrap();
    assert_eq!(dynamic_attribute_calls(&h).len(), 1);
}
