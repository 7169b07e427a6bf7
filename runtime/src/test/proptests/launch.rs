use proptest::prelude::*;
use volley_device::{DevicePtr, SimDeviceProps, StreamHandle};
use volley_dtype::test::proptests::generators::dtype_and_value;

use crate::test::helpers::Harness;
use crate::{
    DispatchConfig, Error, KernelCall, LaunchGrid, Parameter, create_buffer_parameter, create_scalar_parameter,
    iterations_for_budget,
};

const OPT_IN: i32 = 99 * 1024;
const FOOTPRINT: i32 = 1024;

fn large_shared_harness() -> Harness {
    let props =
        SimDeviceProps { max_shared_memory_per_block_optin: OPT_IN, static_shared_memory: FOOTPRINT, ..Default::default() };
    Harness::with(props, DispatchConfig::default())
}

fn two_buffer_call(h: &Harness) -> KernelCall {
    let parameters = vec![create_buffer_parameter(0, true), create_buffer_parameter(0, true)];
    KernelCall::new(h.kernel("add_kernel", 4, 0), LaunchGrid::linear(1), parameters)
}

proptest! {
    #[test]
    fn misaligned_buffers_never_reach_the_driver(address in any::<u64>().prop_filter("misaligned", |a| a % 16 != 0)) {
        let h = Harness::new();
        let call = two_buffer_call(&h);

        let err = unsafe { call.launch(StreamHandle::NULL, &[DevicePtr(0x100), DevicePtr(address)]) }.unwrap_err();

        let is_expected = matches!(err, Error::MisalignedBuffer { index: 1, address: a } if a == address);
        prop_assert!(is_expected);
        prop_assert!(h.sim.calls().is_empty());
    }

    #[test]
    fn aligned_buffers_are_passed_through(a in 0u64..1 << 40, b in 0u64..1 << 40) {
        let h = Harness::new();
        let call = two_buffer_call(&h);

        unsafe { call.launch(StreamHandle::NULL, &[DevicePtr(a * 16), DevicePtr(b * 16)]) }.unwrap();

        prop_assert_eq!(&h.sim.launches()[0].args, &vec![a * 16, b * 16]);
    }

    #[test]
    fn block_width_is_warps_times_warp_size(num_warps in 1u32..=32) {
        let h = Harness::new();
        let kernel = h.kernel("add_kernel", num_warps, 0);

        unsafe { kernel.launch(StreamHandle::NULL, LaunchGrid::linear(1), &mut []) }.unwrap();

        prop_assert_eq!(h.sim.launches()[0].dims.block, [num_warps * 32, 1, 1]);
    }

    #[test]
    fn dynamic_shared_memory_is_configured_above_the_static_limit(shared in 0u32..=(OPT_IN - FOOTPRINT) as u32) {
        // Without the opt-in the function only gets the static limit minus its own footprint.
        prop_assume!(shared <= (48 * 1024 - FOOTPRINT) as u32 || shared > 48 * 1024);
        let h = large_shared_harness();
        let call = KernelCall::new(h.kernel("softmax_kernel", 4, shared), LaunchGrid::linear(1), vec![]);

        unsafe { call.launch(StreamHandle::NULL, &[]) }.unwrap();

        let expected = usize::from(shared > 48 * 1024);
        prop_assert_eq!(h.sim.count("cuFuncSetAttribute"), expected);
        prop_assert_eq!(h.sim.launches()[0].dims.shared_mem_bytes, shared);
    }

    #[test]
    fn requests_beyond_opt_in_are_rejected(shared in (OPT_IN as u32 + 1)..=4 * OPT_IN as u32) {
        let h = large_shared_harness();
        let call = KernelCall::new(h.kernel("softmax_kernel", 4, shared), LaunchGrid::linear(1), vec![]);

        let err = unsafe { call.launch(StreamHandle::NULL, &[]) }.unwrap_err();

        prop_assert!(
            matches!(err, Error::SharedMemoryExceeded { requested, available: OPT_IN } if requested == shared),
            "unexpected error: {}",
            err
        );
        prop_assert!(h.sim.launches().is_empty());
    }

    #[test]
    fn autotune_iterations_stay_in_bounds(best in any::<f32>(), budget in 0.0f32..1000.0, max in 0u32..1000) {
        let iterations = iterations_for_budget(best, budget, max);
        prop_assert!(iterations >= 1);
        prop_assert!(iterations <= max.max(1));
    }

    #[test]
    fn scalar_parameters_hold_the_encoded_payload((dtype, value) in dtype_and_value()) {
        let parameter = create_scalar_parameter(value, dtype.tag()).unwrap();
        prop_assert_eq!(parameter, Parameter::Scalar(dtype.encode(value).unwrap()));
    }
}
