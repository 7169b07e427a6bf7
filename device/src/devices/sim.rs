//! Host-only simulated driver.
//!
//! `SimDriver` behaves like a single well-behaved GPU without touching any
//! hardware: module loads, entry point lookups, attribute queries and launches
//! are validated the way the native driver validates them, and every call is
//! appended to a log that tests can inspect. Device memory is a sparse byte
//! map, kernel execution time is a per-entry constant, and any call can be made
//! to fail by its native name.

use std::collections::{BTreeMap, HashMap};
use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use snafu::ensure;

use crate::driver::*;
use crate::error::{DriverSnafu, InvalidEntryNameSnafu, Result};

const CUDA_ERROR_INVALID_VALUE: &str = "CUDA_ERROR_INVALID_VALUE";
const CUDA_ERROR_INVALID_HANDLE: &str = "CUDA_ERROR_INVALID_HANDLE";
const CUDA_ERROR_INVALID_CONTEXT: &str = "CUDA_ERROR_INVALID_CONTEXT";
const CUDA_ERROR_INVALID_IMAGE: &str = "CUDA_ERROR_INVALID_IMAGE";
const CUDA_ERROR_NOT_FOUND: &str = "CUDA_ERROR_NOT_FOUND";
const CUDA_ERROR_NOT_READY: &str = "CUDA_ERROR_NOT_READY";

/// Context reported for streams that were never bound explicitly.
pub const DEFAULT_CONTEXT: ContextHandle = ContextHandle(0x1);

/// Simulated device properties.
#[derive(Debug, Clone, PartialEq)]
pub struct SimDeviceProps {
    pub compute_capability: (i32, i32),
    pub max_shared_memory_per_block: i32,
    pub max_shared_memory_per_block_optin: i32,
    /// Static shared-memory footprint reported for every function.
    pub static_shared_memory: i32,
    pub threads_per_warp: u32,
    pub max_threads_per_block: u32,
    /// Execution time of entry points without an explicit time.
    pub default_kernel_time_ms: f32,
}

impl Default for SimDeviceProps {
    fn default() -> Self {
        Self {
            compute_capability: (8, 0),
            max_shared_memory_per_block: 48 * 1024,
            max_shared_memory_per_block_optin: 163 * 1024,
            static_shared_memory: 0,
            threads_per_warp: 32,
            max_threads_per_block: 1024,
            default_kernel_time_ms: 0.01,
        }
    }
}

/// A launch as observed by the simulated device.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRecord {
    pub function: FunctionHandle,
    pub entry: String,
    pub dims: LaunchDims,
    pub stream: StreamHandle,
    /// Contents of each parameter slot.
    pub args: Vec<u64>,
}

/// One entry of the simulated driver's call log.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    StreamContext { stream: StreamHandle },
    ContextDevice { context: ContextHandle },
    LoadModule { context: ContextHandle, bytes: usize },
    UnloadModule { context: ContextHandle, module: ModuleHandle },
    ModuleFunction { module: ModuleHandle, name: String },
    DeviceAttribute { device: DeviceId, attribute: DeviceAttribute },
    FunctionAttribute { function: FunctionHandle, attribute: FunctionAttribute },
    SetFunctionAttribute { function: FunctionHandle, attribute: FunctionAttribute, value: i32 },
    SetCachePreference { function: FunctionHandle, preference: CachePreference },
    MemsetD8 { ptr: DevicePtr, value: u8, bytes: usize, stream: StreamHandle },
    MemcpyDtoH { src: DevicePtr, bytes: usize, stream: StreamHandle },
    MemcpyHtoD { dst: DevicePtr, bytes: usize, stream: StreamHandle },
    SynchronizeStream { stream: StreamHandle },
    CreateEvent { context: ContextHandle },
    RecordEvent { event: EventHandle, stream: StreamHandle },
    SynchronizeEvent { event: EventHandle },
    EventElapsed { start: EventHandle, end: EventHandle },
    DestroyEvent { context: ContextHandle, event: EventHandle },
    Launch(LaunchRecord),
}

impl DriverCall {
    /// Native API name of this call; also the key used by [`SimDriver::fail_on`].
    pub fn name(&self) -> &'static str {
        match self {
            Self::StreamContext { .. } => "cuStreamGetCtx",
            Self::ContextDevice { .. } => "cuCtxGetDevice",
            Self::LoadModule { .. } => "cuModuleLoadData",
            Self::UnloadModule { .. } => "cuModuleUnload",
            Self::ModuleFunction { .. } => "cuModuleGetFunction",
            Self::DeviceAttribute { .. } => "cuDeviceGetAttribute",
            Self::FunctionAttribute { .. } => "cuFuncGetAttribute",
            Self::SetFunctionAttribute { .. } => "cuFuncSetAttribute",
            Self::SetCachePreference { .. } => "cuFuncSetCacheConfig",
            Self::MemsetD8 { .. } => "cuMemsetD8Async",
            Self::MemcpyDtoH { .. } => "cuMemcpyDtoHAsync",
            Self::MemcpyHtoD { .. } => "cuMemcpyHtoDAsync",
            Self::SynchronizeStream { .. } => "cuStreamSynchronize",
            Self::CreateEvent { .. } => "cuEventCreate",
            Self::RecordEvent { .. } => "cuEventRecord",
            Self::SynchronizeEvent { .. } => "cuEventSynchronize",
            Self::EventElapsed { .. } => "cuEventElapsedTime",
            Self::DestroyEvent { .. } => "cuEventDestroy",
            Self::Launch(_) => "cuLaunchKernel",
        }
    }

    /// Whether the call enqueues work on a stream or mutates device state.
    pub fn is_device_work(&self) -> bool {
        matches!(
            self,
            Self::LoadModule { .. }
                | Self::UnloadModule { .. }
                | Self::SetFunctionAttribute { .. }
                | Self::SetCachePreference { .. }
                | Self::MemsetD8 { .. }
                | Self::MemcpyDtoH { .. }
                | Self::MemcpyHtoD { .. }
                | Self::Launch(_)
        )
    }
}

/// Sparse simulated device memory. Unwritten bytes read as zero.
#[derive(Debug, Default)]
pub struct SimMemory {
    bytes: BTreeMap<u64, u8>,
}

impl SimMemory {
    pub fn read(&self, ptr: DevicePtr, len: usize) -> Vec<u8> {
        (0..len as u64).map(|i| self.bytes.get(&(ptr.0 + i)).copied().unwrap_or(0)).collect()
    }

    pub fn write(&mut self, ptr: DevicePtr, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            self.bytes.insert(ptr.0 + i as u64, *byte);
        }
    }

    pub fn fill(&mut self, ptr: DevicePtr, value: u8, len: usize) {
        for i in 0..len as u64 {
            self.bytes.insert(ptr.0 + i, value);
        }
    }
}

/// Side effect of a simulated kernel on device memory.
pub type LaunchEffect = Arc<dyn Fn(&mut SimMemory, &LaunchRecord) + Send + Sync>;

struct SimModule {
    context: ContextHandle,
    image: Vec<u8>,
}

struct SimEvent {
    context: ContextHandle,
    /// Simulated clock value captured when the event was recorded.
    recorded: Option<f64>,
}

struct SimFunction {
    module: ModuleHandle,
    entry: String,
    max_dynamic_shared: i32,
}

#[derive(Default)]
struct SimState {
    calls: Vec<DriverCall>,
    next_handle: usize,
    streams: HashMap<StreamHandle, ContextHandle>,
    contexts: HashMap<ContextHandle, DeviceId>,
    modules: HashMap<ModuleHandle, SimModule>,
    functions: HashMap<FunctionHandle, SimFunction>,
    events: HashMap<EventHandle, SimEvent>,
    clock_ms: f64,
    kernel_times: HashMap<String, f32>,
    effects: HashMap<String, LaunchEffect>,
    failures: HashMap<&'static str, String>,
    memory: SimMemory,
}

impl SimState {
    fn handle(&mut self) -> usize {
        self.next_handle += 1;
        0x1000 + self.next_handle
    }

    /// Log `call` and apply any injected failure for it.
    #[track_caller]
    fn enter(&mut self, call: DriverCall) -> Result<()> {
        let name = call.name();
        self.calls.push(call);
        match self.failures.get(name) {
            Some(message) => DriverSnafu { call: name, message: message.clone() }.fail(),
            None => Ok(()),
        }
    }
}

/// Simulated single-device driver.
pub struct SimDriver {
    props: SimDeviceProps,
    state: Mutex<SimState>,
}

impl fmt::Debug for SimDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimDriver").field("props", &self.props).finish_non_exhaustive()
    }
}

impl Default for SimDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDriver {
    pub fn new() -> Self {
        Self::with_props(SimDeviceProps::default())
    }

    pub fn with_props(props: SimDeviceProps) -> Self {
        Self { props, state: Mutex::new(SimState::default()) }
    }

    pub fn props(&self) -> &SimDeviceProps {
        &self.props
    }

    /// Report `context` as the owner of `stream`.
    pub fn bind_stream(&self, stream: StreamHandle, context: ContextHandle) {
        self.state.lock().streams.insert(stream, context);
    }

    /// Report `device` as the device of `context`.
    pub fn bind_context(&self, context: ContextHandle, device: DeviceId) {
        self.state.lock().contexts.insert(context, device);
    }

    pub fn set_kernel_time(&self, entry: &str, ms: f32) {
        self.state.lock().kernel_times.insert(entry.to_string(), ms);
    }

    /// Run `effect` against device memory whenever `entry` is launched.
    pub fn on_launch(&self, entry: &str, effect: impl Fn(&mut SimMemory, &LaunchRecord) + Send + Sync + 'static) {
        self.state.lock().effects.insert(entry.to_string(), Arc::new(effect));
    }

    /// Make every subsequent call named `call` fail with `message`.
    pub fn fail_on(&self, call: &'static str, message: impl Into<String>) {
        self.state.lock().failures.insert(call, message.into());
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Snapshot of the call log.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Number of logged calls with the given native name.
    pub fn count(&self, call: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| c.name() == call).count()
    }

    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                DriverCall::Launch(record) => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn live_modules(&self) -> usize {
        self.state.lock().modules.len()
    }

    pub fn live_modules_in(&self, context: ContextHandle) -> usize {
        self.state.lock().modules.values().filter(|m| m.context == context).count()
    }

    pub fn write_memory(&self, ptr: DevicePtr, data: &[u8]) {
        self.state.lock().memory.write(ptr, data);
    }

    pub fn read_memory(&self, ptr: DevicePtr, len: usize) -> Vec<u8> {
        self.state.lock().memory.read(ptr, len)
    }

}

impl Driver for SimDriver {
    fn name(&self) -> &str {
        "sim"
    }

    fn threads_per_warp(&self) -> u32 {
        self.props.threads_per_warp
    }

    fn stream_context(&self, stream: StreamHandle) -> Result<ContextHandle> {
        let mut state = self.state.lock();
        state.enter(DriverCall::StreamContext { stream })?;
        Ok(state.streams.get(&stream).copied().unwrap_or(DEFAULT_CONTEXT))
    }

    fn context_device(&self, context: ContextHandle) -> Result<DeviceId> {
        let mut state = self.state.lock();
        state.enter(DriverCall::ContextDevice { context })?;
        Ok(state.contexts.get(&context).copied().unwrap_or(DeviceId(0)))
    }

    fn load_module(&self, context: ContextHandle, image: &[u8]) -> Result<ModuleHandle> {
        let mut state = self.state.lock();
        state.enter(DriverCall::LoadModule { context, bytes: image.len() })?;
        ensure!(
            !image.is_empty(),
            DriverSnafu { call: "cuModuleLoadData", message: CUDA_ERROR_INVALID_IMAGE }
        );

        let module = ModuleHandle(state.handle());
        state.modules.insert(module, SimModule { context, image: image.to_vec() });
        Ok(module)
    }

    fn unload_module(&self, context: ContextHandle, module: ModuleHandle) -> Result<()> {
        let mut state = self.state.lock();
        state.enter(DriverCall::UnloadModule { context, module })?;
        let Some(owner) = state.modules.get(&module).map(|m| m.context) else {
            return DriverSnafu { call: "cuModuleUnload", message: CUDA_ERROR_INVALID_HANDLE }.fail();
        };
        ensure!(owner == context, DriverSnafu { call: "cuModuleUnload", message: CUDA_ERROR_INVALID_CONTEXT });
        state.modules.remove(&module);
        state.functions.retain(|_, f| f.module != module);
        Ok(())
    }

    fn module_function(&self, module: ModuleHandle, name: &str) -> Result<FunctionHandle> {
        ensure!(!name.contains('\0'), InvalidEntryNameSnafu { name });

        let mut state = self.state.lock();
        state.enter(DriverCall::ModuleFunction { module, name: name.to_string() })?;
        let found = match state.modules.get(&module) {
            Some(m) => m.image.windows(name.len().max(1)).any(|w| w == name.as_bytes()),
            None => return DriverSnafu { call: "cuModuleGetFunction", message: CUDA_ERROR_INVALID_HANDLE }.fail(),
        };
        ensure!(found && !name.is_empty(), DriverSnafu { call: "cuModuleGetFunction", message: CUDA_ERROR_NOT_FOUND });

        let function = FunctionHandle(state.handle());
        let max_dynamic_shared = self.props.max_shared_memory_per_block - self.props.static_shared_memory;
        state.functions.insert(function, SimFunction { module, entry: name.to_string(), max_dynamic_shared });
        Ok(function)
    }

    fn device_attribute(&self, device: DeviceId, attribute: DeviceAttribute) -> Result<i32> {
        self.state.lock().enter(DriverCall::DeviceAttribute { device, attribute })?;
        let value = match attribute {
            DeviceAttribute::ComputeCapabilityMajor => self.props.compute_capability.0,
            DeviceAttribute::ComputeCapabilityMinor => self.props.compute_capability.1,
            DeviceAttribute::MaxSharedMemoryPerBlock => self.props.max_shared_memory_per_block,
            DeviceAttribute::MaxSharedMemoryPerBlockOptin => self.props.max_shared_memory_per_block_optin,
            DeviceAttribute::WarpSize => self.props.threads_per_warp as i32,
        };
        Ok(value)
    }

    fn function_attribute(&self, function: FunctionHandle, attribute: FunctionAttribute) -> Result<i32> {
        let mut state = self.state.lock();
        state.enter(DriverCall::FunctionAttribute { function, attribute })?;
        let Some(f) = state.functions.get(&function) else {
            return DriverSnafu { call: "cuFuncGetAttribute", message: CUDA_ERROR_INVALID_HANDLE }.fail();
        };
        Ok(match attribute {
            FunctionAttribute::SharedSizeBytes => self.props.static_shared_memory,
            FunctionAttribute::MaxDynamicSharedSizeBytes => f.max_dynamic_shared,
        })
    }

    fn set_function_attribute(&self, function: FunctionHandle, attribute: FunctionAttribute, value: i32) -> Result<()> {
        let mut state = self.state.lock();
        state.enter(DriverCall::SetFunctionAttribute { function, attribute, value })?;
        let limit = self.props.max_shared_memory_per_block_optin - self.props.static_shared_memory;
        let Some(f) = state.functions.get_mut(&function) else {
            return DriverSnafu { call: "cuFuncSetAttribute", message: CUDA_ERROR_INVALID_HANDLE }.fail();
        };
        match attribute {
            FunctionAttribute::MaxDynamicSharedSizeBytes if (0..=limit).contains(&value) => {
                f.max_dynamic_shared = value;
                Ok(())
            }
            _ => DriverSnafu { call: "cuFuncSetAttribute", message: CUDA_ERROR_INVALID_VALUE }.fail(),
        }
    }

    fn set_cache_preference(&self, function: FunctionHandle, preference: CachePreference) -> Result<()> {
        let mut state = self.state.lock();
        state.enter(DriverCall::SetCachePreference { function, preference })?;
        ensure!(
            state.functions.contains_key(&function),
            DriverSnafu { call: "cuFuncSetCacheConfig", message: CUDA_ERROR_INVALID_HANDLE }
        );
        Ok(())
    }

    unsafe fn memset_d8_async(&self, ptr: DevicePtr, value: u8, bytes: usize, stream: StreamHandle) -> Result<()> {
        let mut state = self.state.lock();
        state.enter(DriverCall::MemsetD8 { ptr, value, bytes, stream })?;
        state.memory.fill(ptr, value, bytes);
        Ok(())
    }

    unsafe fn memcpy_dtoh_async(&self, dst: &mut [u8], src: DevicePtr, stream: StreamHandle) -> Result<()> {
        let mut state = self.state.lock();
        state.enter(DriverCall::MemcpyDtoH { src, bytes: dst.len(), stream })?;
        dst.copy_from_slice(&state.memory.read(src, dst.len()));
        Ok(())
    }

    unsafe fn memcpy_htod_async(&self, dst: DevicePtr, src: &[u8], stream: StreamHandle) -> Result<()> {
        let mut state = self.state.lock();
        state.enter(DriverCall::MemcpyHtoD { dst, bytes: src.len(), stream })?;
        state.memory.write(dst, src);
        Ok(())
    }

    fn synchronize_stream(&self, stream: StreamHandle) -> Result<()> {
        self.state.lock().enter(DriverCall::SynchronizeStream { stream })
    }

    fn create_event(&self, context: ContextHandle) -> Result<EventHandle> {
        let mut state = self.state.lock();
        state.enter(DriverCall::CreateEvent { context })?;
        let event = EventHandle(state.handle());
        state.events.insert(event, SimEvent { context, recorded: None });
        Ok(event)
    }

    fn record_event(&self, event: EventHandle, stream: StreamHandle) -> Result<()> {
        let mut state = self.state.lock();
        state.enter(DriverCall::RecordEvent { event, stream })?;
        let clock = state.clock_ms;
        match state.events.get_mut(&event) {
            Some(slot) => {
                slot.recorded = Some(clock);
                Ok(())
            }
            None => DriverSnafu { call: "cuEventRecord", message: CUDA_ERROR_INVALID_HANDLE }.fail(),
        }
    }

    fn synchronize_event(&self, event: EventHandle) -> Result<()> {
        let mut state = self.state.lock();
        state.enter(DriverCall::SynchronizeEvent { event })?;
        ensure!(
            state.events.contains_key(&event),
            DriverSnafu { call: "cuEventSynchronize", message: CUDA_ERROR_INVALID_HANDLE }
        );
        Ok(())
    }

    fn event_elapsed_ms(&self, start: EventHandle, end: EventHandle) -> Result<f32> {
        let mut state = self.state.lock();
        state.enter(DriverCall::EventElapsed { start, end })?;
        match (state.events.get(&start).map(|e| e.recorded), state.events.get(&end).map(|e| e.recorded)) {
            (Some(Some(start)), Some(Some(end))) => Ok((end - start) as f32),
            (Some(_), Some(_)) => DriverSnafu { call: "cuEventElapsedTime", message: CUDA_ERROR_NOT_READY }.fail(),
            _ => DriverSnafu { call: "cuEventElapsedTime", message: CUDA_ERROR_INVALID_HANDLE }.fail(),
        }
    }

    fn destroy_event(&self, context: ContextHandle, event: EventHandle) -> Result<()> {
        let mut state = self.state.lock();
        state.enter(DriverCall::DestroyEvent { context, event })?;
        let Some(owner) = state.events.get(&event).map(|e| e.context) else {
            return DriverSnafu { call: "cuEventDestroy", message: CUDA_ERROR_INVALID_HANDLE }.fail();
        };
        ensure!(owner == context, DriverSnafu { call: "cuEventDestroy", message: CUDA_ERROR_INVALID_CONTEXT });
        state.events.remove(&event);
        Ok(())
    }

    unsafe fn launch_kernel(
        &self,
        function: FunctionHandle,
        dims: LaunchDims,
        stream: StreamHandle,
        params: &mut [*mut c_void],
    ) -> Result<()> {
        // SAFETY: the caller guarantees every parameter points to a live 64-bit slot.
        let args = params.iter().map(|p| unsafe { std::ptr::read_unaligned(*p as *const u64) }).collect();

        let mut state = self.state.lock();
        let entry = state.functions.get(&function).map(|f| f.entry.clone()).unwrap_or_default();
        let record = LaunchRecord { function, entry: entry.clone(), dims, stream, args };
        state.enter(DriverCall::Launch(record.clone()))?;

        let Some(max_dynamic_shared) = state.functions.get(&function).map(|f| f.max_dynamic_shared) else {
            return DriverSnafu { call: "cuLaunchKernel", message: CUDA_ERROR_INVALID_HANDLE }.fail();
        };
        let threads: u32 = dims.block.iter().product();
        ensure!(
            threads > 0 && threads <= self.props.max_threads_per_block && dims.grid.iter().all(|&g| g > 0),
            DriverSnafu { call: "cuLaunchKernel", message: CUDA_ERROR_INVALID_VALUE }
        );
        ensure!(
            dims.shared_mem_bytes as i64 <= max_dynamic_shared as i64,
            DriverSnafu { call: "cuLaunchKernel", message: CUDA_ERROR_INVALID_VALUE }
        );

        let time = state.kernel_times.get(&entry).copied().unwrap_or(self.props.default_kernel_time_ms);
        state.clock_ms += time as f64;
        if let Some(effect) = state.effects.get(&entry).cloned() {
            effect(&mut state.memory, &record);
        }
        Ok(())
    }
}
