use volley_device::{ContextHandle, DevicePtr, DriverCall, StreamHandle};

use crate::test::helpers::Harness;
use crate::{
    AutotuneBudget, AutotuneCandidate, AutotunedKernelCall, Error, InputOutputAlias, KernelCall, KernelLaunch,
    LaunchGrid, Parameter, create_buffer_parameter,
};

const MATMULS: [(&str, f32); 3] = [("matmul_64x64", 0.5), ("matmul_128x32", 0.25), ("matmul_32x128", 0.75)];

fn matmul_candidates(h: &Harness) -> Vec<AutotuneCandidate> {
    MATMULS
        .iter()
        .map(|&(entry, ms)| {
            h.sim.set_kernel_time(entry, ms);
            let parameters = vec![create_buffer_parameter(0, true), create_buffer_parameter(0, true)];
            AutotuneCandidate::new(KernelCall::new(h.kernel(entry, 4, 0), LaunchGrid::linear(8), parameters), entry)
        })
        .collect()
}

fn launched_entries(h: &Harness) -> Vec<String> {
    h.sim.launches().into_iter().map(|l| l.entry).collect()
}

const BUFFERS: [DevicePtr; 2] = [DevicePtr(0x1000), DevicePtr(0x2000)];

#[test]
fn test_kernel_call_buffer_count() {
    let h = Harness::new();
    let parameters = vec![create_buffer_parameter(0, false), Parameter::scalar(1u32), create_buffer_parameter(4, true)];
    let call = KernelCall::new(h.kernel("add_kernel", 4, 0), [1, 1, 1], parameters);
    assert_eq!(call.buffer_count(), 2);
    assert_eq!(call.name(), "add_kernel");
}

#[test]
fn test_autotune_selects_fastest_once() {
    let h = Harness::new();
    let call = AutotunedKernelCall::new("matmul", matmul_candidates(&h), vec![]).unwrap();
    assert_eq!(call.selected(), None);

    unsafe { call.launch(StreamHandle::NULL, &BUFFERS) }.unwrap();
    assert_eq!(call.selected(), Some(1));

    // First pass: warm-up + 1 timed launch each. Budget 10ms / best 0.25ms = 40 iterations.
    let after_tuning = h.sim.launches().len();
    assert_eq!(after_tuning, 3 * 2 + 3 * (1 + 40) + 1);
    assert_eq!(launched_entries(&h).last().map(String::as_str), Some("matmul_128x32"));

    unsafe {
        call.launch(StreamHandle::NULL, &BUFFERS).unwrap();
        call.launch(StreamHandle::NULL, &BUFFERS).unwrap();
    }
    let entries = launched_entries(&h);
    assert_eq!(entries.len(), after_tuning + 2);
    assert!(entries[after_tuning..].iter().all(|e| e == "matmul_128x32"));
    assert_eq!(h.sim.count("cuEventCreate"), 12);
    assert_eq!(h.sim.count("cuEventDestroy"), 12);
}

#[test]
fn test_autotune_events_use_stream_context() {
    let h = Harness::new();
    let stream = StreamHandle(0x9);
    h.sim.bind_stream(stream, ContextHandle(0xc));
    let call = AutotunedKernelCall::new("matmul", matmul_candidates(&h), vec![]).unwrap();

    unsafe { call.launch(stream, &BUFFERS) }.unwrap();

    let event_contexts: Vec<_> = h
        .sim
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            DriverCall::CreateEvent { context } | DriverCall::DestroyEvent { context, .. } => Some(context),
            _ => None,
        })
        .collect();
    assert_eq!(event_contexts.len(), 24);
    assert!(event_contexts.iter().all(|&c| c == ContextHandle(0xc)));
}

#[test]
fn test_autotune_iterations_respect_budget() {
    let h = Harness::new();
    let budget = AutotuneBudget { budget_ms: 1.0, max_iterations: 3 };
    let call = AutotunedKernelCall::new("matmul", matmul_candidates(&h), vec![]).unwrap().with_budget(budget);

    unsafe { call.launch(StreamHandle::NULL, &BUFFERS) }.unwrap();

    // 1.0 / 0.25 = 4 iterations, clamped to 3.
    assert_eq!(h.sim.launches().len(), 3 * 2 + 3 * (1 + 3) + 1);
}

#[test]
fn test_single_candidate_skips_benchmark() {
    let h = Harness::new();
    let candidates = matmul_candidates(&h).into_iter().take(1).collect();
    let call = AutotunedKernelCall::new("matmul", candidates, vec![]).unwrap();

    unsafe { call.launch(StreamHandle::NULL, &BUFFERS) }.unwrap();

    assert_eq!(call.selected(), Some(0));
    assert_eq!(h.sim.launches().len(), 1);
    assert_eq!(h.sim.count("cuEventCreate"), 0);
}

#[test]
fn test_aliased_inputs_are_restored() {
    let h = Harness::new();
    let shared = DevicePtr(0x3000);
    let original = vec![1u8, 2, 3, 4, 5, 6, 7, 8];
    h.sim.write_memory(shared, &original);
    for (entry, _) in MATMULS {
        h.sim.on_launch(entry, |memory, launch| memory.fill(DevicePtr(launch.args[1]), 0xee, 8));
    }

    let aliases = vec![InputOutputAlias { input: 0, output: 1, bytes: 8 }];
    let call = AutotunedKernelCall::new("matmul", matmul_candidates(&h), aliases).unwrap();
    unsafe { call.launch(StreamHandle::NULL, &[shared, shared]) }.unwrap();

    let calls = h.sim.calls();
    let first_launch = calls.iter().position(|c| matches!(c, DriverCall::Launch(_))).unwrap();
    let save = calls.iter().position(|c| matches!(c, DriverCall::MemcpyDtoH { bytes: 8, .. })).unwrap();
    let restore = calls.iter().position(|c| matches!(c, DriverCall::MemcpyHtoD { bytes: 8, .. })).unwrap();
    let last_launch = calls.iter().rposition(|c| matches!(c, DriverCall::Launch(_))).unwrap();
    assert!(save < first_launch);
    assert!(restore < last_launch);
    assert!(matches!(calls[restore + 1], DriverCall::SynchronizeStream { .. }));

    // The final (real) launch writes the output again; the restore happened before it.
    assert_eq!(h.sim.read_memory(shared, 8), vec![0xee; 8]);
}

#[test]
fn test_aliased_input_contents_survive_tuning() {
    let h = Harness::new();
    let shared = DevicePtr(0x3000);
    h.sim.write_memory(shared, &[9; 8]);
    h.sim.on_launch("matmul_64x64", |memory, launch| memory.fill(DevicePtr(launch.args[1]), 0, 8));

    let aliases = vec![InputOutputAlias { input: 0, output: 1, bytes: 8 }];
    let call = AutotunedKernelCall::new("matmul", matmul_candidates(&h), aliases).unwrap();
    unsafe { call.launch(StreamHandle::NULL, &[shared, shared]) }.unwrap();

    // matmul_64x64 clobbers the buffer during tuning but is not selected.
    assert_eq!(call.selected(), Some(1));
    assert_eq!(h.sim.read_memory(shared, 8), vec![9; 8]);
}

#[test]
fn test_distinct_alias_buffers_are_not_saved() {
    let h = Harness::new();
    let aliases = vec![InputOutputAlias { input: 0, output: 1, bytes: 8 }];
    let call = AutotunedKernelCall::new("matmul", matmul_candidates(&h), aliases).unwrap();

    unsafe { call.launch(StreamHandle::NULL, &BUFFERS) }.unwrap();

    assert_eq!(h.sim.count("cuMemcpyDtoHAsync"), 0);
    assert_eq!(h.sim.count("cuMemcpyHtoDAsync"), 0);
}

#[test]
fn test_failed_autotune_is_retried() {
    let h = Harness::new();
    let call = AutotunedKernelCall::new("matmul", matmul_candidates(&h), vec![]).unwrap();
    h.sim.fail_on("cuEventElapsedTime", "CUDA_ERROR_NOT_READY");

    assert!(unsafe { call.launch(StreamHandle::NULL, &BUFFERS) }.is_err());
    assert_eq!(call.selected(), None);
    assert_eq!(h.sim.count("cuEventCreate"), h.sim.count("cuEventDestroy"), "events are released on failure");

    h.sim.clear_failures();
    unsafe { call.launch(StreamHandle::NULL, &BUFFERS) }.unwrap();
    assert_eq!(call.selected(), Some(1));
}

#[test]
fn test_autotune_rejects_empty_configs() {
    let err = AutotunedKernelCall::new("empty", vec![], vec![]).unwrap_err();
    assert!(matches!(err, Error::EmptyAutotune { ref name } if name == "empty"));
}

#[test]
fn test_autotune_rejects_mismatched_buffers() {
    let h = Harness::new();
    let mut candidates = matmul_candidates(&h);
    candidates.push(AutotuneCandidate::new(
        KernelCall::new(h.kernel("add_kernel", 4, 0), LaunchGrid::linear(1), vec![create_buffer_parameter(0, false)]),
        "odd one out",
    ));

    let err = AutotunedKernelCall::new("matmul", candidates, vec![]).unwrap_err();
    assert!(matches!(err, Error::AutotuneBufferMismatch { index: 3, expected: 2, actual: 1, .. }));
}

#[test]
fn test_autotune_rejects_out_of_range_alias() {
    let h = Harness::new();
    let aliases = vec![InputOutputAlias { input: 0, output: 2, bytes: 8 }];
    let err = AutotunedKernelCall::new("matmul", matmul_candidates(&h), aliases).unwrap_err();
    assert!(matches!(err, Error::InvalidAlias { output: 2, buffers: 2, .. }));
}

#[test]
fn test_autotuned_buffer_count_checked_before_tuning() {
    let h = Harness::new();
    let call = AutotunedKernelCall::new("matmul", matmul_candidates(&h), vec![]).unwrap();
    let err = unsafe { call.launch(StreamHandle::NULL, &BUFFERS[..1]) }.unwrap_err();
    assert!(matches!(err, Error::BufferCountMismatch { expected: 2, actual: 1 }));
    assert!(h.sim.calls().is_empty());
}

#[test]
fn test_kernel_launch_dispatch() {
    let h = Harness::new();
    let single: KernelLaunch = KernelCall::new(
        h.kernel("add_kernel", 4, 0),
        LaunchGrid::linear(1),
        vec![create_buffer_parameter(0, false)],
    )
    .into();
    let tuned: KernelLaunch = AutotunedKernelCall::new("matmul", matmul_candidates(&h), vec![]).unwrap().into();

    assert_eq!(single.name(), "add_kernel");
    assert_eq!(single.buffer_count(), 1);
    assert_eq!(tuned.name(), "matmul");
    assert_eq!(tuned.buffer_count(), 2);

    unsafe {
        single.launch(StreamHandle::NULL, &BUFFERS[..1]).unwrap();
        tuned.launch(StreamHandle::NULL, &BUFFERS).unwrap();
    }
    assert_eq!(launched_entries(&h).first().map(String::as_str), Some("add_kernel"));
}
