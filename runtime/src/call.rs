//! Kernel calls: a kernel bound to a grid and a parameter list.
//!
//! [`KernelLaunch`] is what the dispatcher stores and launches. It is either
//! a single [`KernelCall`] or an [`AutotunedKernelCall`] that picks the fastest
//! of several candidate calls the first time it runs.

use std::sync::Arc;

use parking_lot::Mutex;
use snafu::{ResultExt, ensure};
use tracing::{debug, trace};
use volley_device::{DevicePtr, StreamHandle};

use crate::benchmark::{self, BenchmarkResult};
use crate::config::{AUTOTUNE_BUDGET_MS, AUTOTUNE_MAX_ITERATIONS, DispatchConfig};
use crate::error::{
    AutotuneBufferMismatchSnafu, BufferCountMismatchSnafu, DeviceSnafu, EmptyAutotuneSnafu, InvalidAliasSnafu,
    Result,
};
use crate::kernel::{Kernel, LaunchGrid};
use crate::params::{ArgumentPack, Parameter};

/// One kernel launch with fixed grid and parameters.
#[derive(Debug, Clone)]
pub struct KernelCall {
    kernel: Arc<Kernel>,
    grid: LaunchGrid,
    parameters: Vec<Parameter>,
}

impl KernelCall {
    pub fn new(kernel: Arc<Kernel>, grid: impl Into<LaunchGrid>, parameters: Vec<Parameter>) -> Self {
        Self { kernel, grid: grid.into(), parameters }
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    pub fn grid(&self) -> LaunchGrid {
        self.grid
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn name(&self) -> &str {
        self.kernel.name()
    }

    /// Number of device buffers expected at launch.
    pub fn buffer_count(&self) -> usize {
        self.parameters.iter().filter(|p| p.is_buffer()).count()
    }

    /// Launch on `stream` with `buffers` bound to the buffer parameters in order.
    ///
    /// Nothing is enqueued if the buffers do not match the parameters or the
    /// kernel cannot be resolved and configured.
    ///
    /// # Safety
    ///
    /// Every buffer must be device memory valid for the kernel's accesses and
    /// for its parameter's zero-fill.
    pub unsafe fn launch(&self, stream: StreamHandle, buffers: &[DevicePtr]) -> Result<()> {
        let mut pack = ArgumentPack::new(&self.parameters, buffers)?;
        let function = self.kernel.prepare(stream)?;
        unsafe {
            pack.zero_fill(self.kernel.driver().as_ref(), stream)?;
            self.kernel.launch_prepared(&function, stream, self.grid, pack.as_mut_ptrs())
        }
    }
}

/// An input buffer that the kernel also writes as an output.
///
/// Benchmarking runs the kernel repeatedly, so aliased inputs are saved before
/// autotuning and restored afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputOutputAlias {
    pub input: usize,
    pub output: usize,
    pub bytes: usize,
}

/// Limits of the repeated autotune pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutotuneBudget {
    pub budget_ms: f32,
    pub max_iterations: u32,
}

impl Default for AutotuneBudget {
    fn default() -> Self {
        Self { budget_ms: AUTOTUNE_BUDGET_MS, max_iterations: AUTOTUNE_MAX_ITERATIONS }
    }
}

impl From<&DispatchConfig> for AutotuneBudget {
    fn from(config: &DispatchConfig) -> Self {
        Self { budget_ms: config.autotune_budget_ms, max_iterations: config.autotune_max_iterations }
    }
}

/// Candidate configuration of an autotuned call.
#[derive(Debug, Clone)]
pub struct AutotuneCandidate {
    pub call: KernelCall,
    pub description: String,
}

impl AutotuneCandidate {
    pub fn new(call: KernelCall, description: impl Into<String>) -> Self {
        Self { call, description: description.into() }
    }
}

/// A set of interchangeable kernel calls, of which the fastest is launched.
#[derive(Debug)]
pub struct AutotunedKernelCall {
    name: String,
    candidates: Vec<AutotuneCandidate>,
    aliases: Vec<InputOutputAlias>,
    budget: AutotuneBudget,
    selected: Mutex<Option<usize>>,
}

impl AutotunedKernelCall {
    /// All candidates must take the same buffers; aliases index into them.
    pub fn new(name: impl Into<String>, candidates: Vec<AutotuneCandidate>, aliases: Vec<InputOutputAlias>) -> Result<Self> {
        let name = name.into();
        let Some(first) = candidates.first() else {
            return EmptyAutotuneSnafu { name }.fail();
        };

        let expected = first.call.buffer_count();
        for (index, candidate) in candidates.iter().enumerate() {
            let actual = candidate.call.buffer_count();
            ensure!(actual == expected, AutotuneBufferMismatchSnafu { name: name.clone(), index, expected, actual });
        }
        for alias in &aliases {
            ensure!(
                alias.input < expected && alias.output < expected,
                InvalidAliasSnafu { name: name.clone(), input: alias.input, output: alias.output, buffers: expected }
            );
        }

        Ok(Self { name, candidates, aliases, budget: AutotuneBudget::default(), selected: Mutex::new(None) })
    }

    pub fn with_budget(mut self, budget: AutotuneBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn candidates(&self) -> &[AutotuneCandidate] {
        &self.candidates
    }

    pub fn aliases(&self) -> &[InputOutputAlias] {
        &self.aliases
    }

    pub fn budget(&self) -> AutotuneBudget {
        self.budget
    }

    pub fn buffer_count(&self) -> usize {
        self.candidates[0].call.buffer_count()
    }

    /// Index of the chosen candidate, once autotuning has succeeded.
    pub fn selected(&self) -> Option<usize> {
        *self.selected.lock()
    }

    /// Launch the fastest candidate, autotuning first if none was chosen yet.
    ///
    /// A failed autotune is not remembered; the next launch retries it.
    ///
    /// # Safety
    ///
    /// Same requirements as [`KernelCall::launch`]. The first launch may run
    /// every candidate several times on `buffers`.
    pub unsafe fn launch(&self, stream: StreamHandle, buffers: &[DevicePtr]) -> Result<()> {
        let expected = self.buffer_count();
        ensure!(buffers.len() == expected, BufferCountMismatchSnafu { expected, actual: buffers.len() });

        let index = {
            let mut selected = self.selected.lock();
            match *selected {
                Some(index) => index,
                None => {
                    let index = unsafe { self.autotune(stream, buffers)? };
                    *selected = Some(index);
                    index
                }
            }
        };

        unsafe { self.candidates[index].call.launch(stream, buffers) }
    }

    #[tracing::instrument(skip_all, fields(name = %self.name, candidates = self.candidates.len()))]
    unsafe fn autotune(&self, stream: StreamHandle, buffers: &[DevicePtr]) -> Result<usize> {
        if self.candidates.len() == 1 {
            return Ok(0);
        }

        let driver = self.candidates[0].call.kernel().driver().as_ref();

        let mut saved = Vec::new();
        for alias in &self.aliases {
            let (input, output) = (buffers[alias.input], buffers[alias.output]);
            if input != output {
                continue;
            }
            let mut host = vec![0u8; alias.bytes];
            unsafe { driver.memcpy_dtoh_async(&mut host, input, stream) }.context(DeviceSnafu)?;
            saved.push((input, host));
        }
        if !saved.is_empty() {
            driver.synchronize_stream(stream).context(DeviceSnafu)?;
        }

        let outcome = unsafe { self.select_fastest(stream, buffers) };

        let mut restored = Ok(());
        for (ptr, host) in &saved {
            restored = unsafe { driver.memcpy_htod_async(*ptr, host, stream) }.context(DeviceSnafu);
            if restored.is_err() {
                break;
            }
        }
        let synchronized = driver.synchronize_stream(stream).context(DeviceSnafu);

        let (index, result) = outcome?;
        restored?;
        synchronized?;

        debug!(
            name = %self.name,
            config = %self.candidates[index].description,
            iterations = result.iterations,
            mean_ms = result.mean_ms(),
            "autotune selected configuration"
        );
        Ok(index)
    }

    unsafe fn select_fastest(&self, stream: StreamHandle, buffers: &[DevicePtr]) -> Result<(usize, BenchmarkResult)> {
        let mut best_ms = f32::INFINITY;
        for candidate in &self.candidates {
            let result = unsafe { benchmark::benchmark_call(&candidate.call, stream, buffers, 1)? };
            trace!(config = %candidate.description, time_ms = result.total_ms, "autotune candidate timed");
            best_ms = best_ms.min(result.total_ms);
        }

        let iterations = benchmark::iterations_for_budget(best_ms, self.budget.budget_ms, self.budget.max_iterations);

        let mut fastest: Option<(usize, BenchmarkResult)> = None;
        for (index, candidate) in self.candidates.iter().enumerate() {
            let result = unsafe { benchmark::benchmark_call(&candidate.call, stream, buffers, iterations)? };
            trace!(config = %candidate.description, time_ms = result.total_ms, iterations, "autotune timing");
            if fastest.is_none_or(|(_, best)| result.total_ms < best.total_ms) {
                fastest = Some((index, result));
            }
        }

        // Candidates are non-empty, so at least one timing was taken.
        Ok(fastest.unwrap_or((0, BenchmarkResult { iterations, total_ms: best_ms })))
    }
}

/// A launchable call as stored by the dispatcher.
#[derive(Debug)]
pub enum KernelLaunch {
    Single(KernelCall),
    Autotuned(AutotunedKernelCall),
}

impl KernelLaunch {
    pub fn name(&self) -> &str {
        match self {
            Self::Single(call) => call.name(),
            Self::Autotuned(call) => call.name(),
        }
    }

    pub fn buffer_count(&self) -> usize {
        match self {
            Self::Single(call) => call.buffer_count(),
            Self::Autotuned(call) => call.buffer_count(),
        }
    }

    /// # Safety
    ///
    /// Same requirements as [`KernelCall::launch`].
    pub unsafe fn launch(&self, stream: StreamHandle, buffers: &[DevicePtr]) -> Result<()> {
        match self {
            Self::Single(call) => unsafe { call.launch(stream, buffers) },
            Self::Autotuned(call) => unsafe { call.launch(stream, buffers) },
        }
    }
}

impl From<KernelCall> for KernelLaunch {
    fn from(call: KernelCall) -> Self {
        Self::Single(call)
    }
}

impl From<AutotunedKernelCall> for KernelLaunch {
    fn from(call: AutotunedKernelCall) -> Self {
        Self::Autotuned(call)
    }
}
