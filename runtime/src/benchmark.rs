//! Event-timed kernel benchmarking for autotuning.
//!
//! Timing uses device events recorded on the launch stream, so it measures
//! device execution rather than host enqueue time.

use snafu::ResultExt;
use tracing::warn;
use volley_device::{ContextHandle, DevicePtr, Driver, EventHandle, StreamHandle};

use crate::call::KernelCall;
use crate::error::{DeviceSnafu, Result};

/// Result of benchmarking one kernel call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BenchmarkResult {
    /// Number of timed launches.
    pub iterations: u32,
    /// Device time of all timed launches together.
    pub total_ms: f32,
}

impl BenchmarkResult {
    pub fn mean_ms(&self) -> f32 {
        self.total_ms / self.iterations.max(1) as f32
    }
}

/// Start/stop event pair in one context, destroyed on drop.
struct EventPair<'a> {
    driver: &'a dyn Driver,
    context: ContextHandle,
    start: EventHandle,
    stop: EventHandle,
}

impl<'a> EventPair<'a> {
    fn new(driver: &'a dyn Driver, context: ContextHandle) -> Result<Self> {
        let start = driver.create_event(context).context(DeviceSnafu)?;
        let stop = match driver.create_event(context) {
            Ok(stop) => stop,
            Err(source) => {
                if let Err(error) = driver.destroy_event(context, start) {
                    warn!(%error, "failed to destroy benchmark event");
                }
                return Err(source).context(DeviceSnafu);
            }
        };
        Ok(Self { driver, context, start, stop })
    }
}

impl Drop for EventPair<'_> {
    fn drop(&mut self) {
        for event in [self.start, self.stop] {
            if let Err(error) = self.driver.destroy_event(self.context, event) {
                warn!(%error, "failed to destroy benchmark event");
            }
        }
    }
}

/// Time `iterations` launches of `call` after one untimed warm-up launch.
///
/// # Safety
///
/// `buffers` must satisfy [`KernelCall::launch`] for every launch; the kernel
/// runs `iterations + 1` times on the same buffers.
pub unsafe fn benchmark_call(
    call: &KernelCall,
    stream: StreamHandle,
    buffers: &[DevicePtr],
    iterations: u32,
) -> Result<BenchmarkResult> {
    let driver = call.kernel().driver().as_ref();
    // Events must live in the stream's context, which need not be current.
    let context = driver.stream_context(stream).context(DeviceSnafu)?;
    let events = EventPair::new(driver, context)?;

    unsafe { call.launch(stream, buffers)? };

    driver.record_event(events.start, stream).context(DeviceSnafu)?;
    for _ in 0..iterations {
        unsafe { call.launch(stream, buffers)? };
    }
    driver.record_event(events.stop, stream).context(DeviceSnafu)?;
    driver.synchronize_event(events.stop).context(DeviceSnafu)?;

    let total_ms = driver.event_elapsed_ms(events.start, events.stop).context(DeviceSnafu)?;
    Ok(BenchmarkResult { iterations, total_ms })
}

/// Iterations that fit `budget_ms` given the best single-launch time, clamped
/// to `1..=max_iterations`.
pub fn iterations_for_budget(best_ms: f32, budget_ms: f32, max_iterations: u32) -> u32 {
    let max_iterations = max_iterations.max(1);
    if best_ms.is_nan() || best_ms <= 0.0 {
        return max_iterations;
    }
    ((budget_ms / best_ms) as u32).clamp(1, max_iterations)
}
