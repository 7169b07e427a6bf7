//! CUDA driver API backend.
//!
//! Thin wrapper over `cudarc::driver::sys`. Calls that operate on "the
//! current context" (module load and unload, device lookup, event creation and
//! destruction) push the target context for their duration so the dispatcher
//! never has to manage thread-bound state.

use std::ffi::{CString, c_void};
use std::mem::MaybeUninit;
use std::ptr;

use cudarc::driver::sys;
use snafu::OptionExt;
use tracing::{trace, warn};

use crate::driver::*;
use crate::error::{DriverSnafu, InvalidEntryNameSnafu, Result};

/// Run a driver call and map a non-success status to `Error::Driver`.
macro_rules! cu {
    ($call:ident($($arg:expr),* $(,)?)) => {
        // SAFETY: arguments are valid handles or out-pointers owned by the caller.
        unsafe { sys::$call($($arg),*) }
            .result()
            .map_err(|e| DriverSnafu { call: stringify!($call), message: e.to_string() }.build())
    };
}

#[derive(Debug)]
pub struct CudaDriver {
    _initialized: (),
}

impl CudaDriver {
    /// Initialize the driver API. Contexts and streams are owned by the caller.
    pub fn new() -> Result<Self> {
        cu!(cuInit(0))?;
        Ok(Self { _initialized: () })
    }

    fn with_context<T>(&self, context: ContextHandle, f: impl FnOnce() -> Result<T>) -> Result<T> {
        cu!(cuCtxPushCurrent_v2(context.0 as sys::CUcontext))?;
        let result = f();
        let mut popped: sys::CUcontext = ptr::null_mut();
        if let Err(e) = cu!(cuCtxPopCurrent_v2(&mut popped)) {
            warn!(error = %e, "failed to restore previous CUDA context");
            result?;
            return Err(e);
        }
        result
    }
}

fn stream(stream: StreamHandle) -> sys::CUstream {
    stream.0 as sys::CUstream
}

fn function(function: FunctionHandle) -> sys::CUfunction {
    function.0 as sys::CUfunction
}

fn event(event: EventHandle) -> sys::CUevent {
    event.0 as sys::CUevent
}

fn device_attribute(attribute: DeviceAttribute) -> sys::CUdevice_attribute {
    use sys::CUdevice_attribute::*;
    match attribute {
        DeviceAttribute::ComputeCapabilityMajor => CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR,
        DeviceAttribute::ComputeCapabilityMinor => CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR,
        DeviceAttribute::MaxSharedMemoryPerBlock => CU_DEVICE_ATTRIBUTE_MAX_SHARED_MEMORY_PER_BLOCK,
        DeviceAttribute::MaxSharedMemoryPerBlockOptin => CU_DEVICE_ATTRIBUTE_MAX_SHARED_MEMORY_PER_BLOCK_OPTIN,
        DeviceAttribute::WarpSize => CU_DEVICE_ATTRIBUTE_WARP_SIZE,
    }
}

fn function_attribute(attribute: FunctionAttribute) -> sys::CUfunction_attribute {
    use sys::CUfunction_attribute::*;
    match attribute {
        FunctionAttribute::SharedSizeBytes => CU_FUNC_ATTRIBUTE_SHARED_SIZE_BYTES,
        FunctionAttribute::MaxDynamicSharedSizeBytes => CU_FUNC_ATTRIBUTE_MAX_DYNAMIC_SHARED_SIZE_BYTES,
    }
}

fn cache_preference(preference: CachePreference) -> sys::CUfunc_cache {
    use sys::CUfunc_cache::*;
    match preference {
        CachePreference::None => CU_FUNC_CACHE_PREFER_NONE,
        CachePreference::PreferShared => CU_FUNC_CACHE_PREFER_SHARED,
        CachePreference::PreferL1 => CU_FUNC_CACHE_PREFER_L1,
        CachePreference::PreferEqual => CU_FUNC_CACHE_PREFER_EQUAL,
    }
}

impl Driver for CudaDriver {
    fn name(&self) -> &str {
        "cuda"
    }

    fn threads_per_warp(&self) -> u32 {
        32
    }

    fn stream_context(&self, s: StreamHandle) -> Result<ContextHandle> {
        let mut context: sys::CUcontext = ptr::null_mut();
        cu!(cuStreamGetCtx(stream(s), &mut context))?;
        Ok(ContextHandle(context as usize))
    }

    fn context_device(&self, context: ContextHandle) -> Result<DeviceId> {
        self.with_context(context, || {
            let mut device: sys::CUdevice = 0;
            cu!(cuCtxGetDevice(&mut device))?;
            Ok(DeviceId(device))
        })
    }

    fn load_module(&self, context: ContextHandle, image: &[u8]) -> Result<ModuleHandle> {
        // PTX images must be NUL-terminated; cubin and fatbin images ignore the extra byte.
        let mut data = Vec::with_capacity(image.len() + 1);
        data.extend_from_slice(image);
        data.push(0);

        self.with_context(context, || {
            let mut module = MaybeUninit::<sys::CUmodule>::uninit();
            cu!(cuModuleLoadData(module.as_mut_ptr(), data.as_ptr() as *const c_void))?;
            // SAFETY: initialized by cuModuleLoadData on success.
            let module = unsafe { module.assume_init() };
            trace!(bytes = image.len(), "loaded CUDA module");
            Ok(ModuleHandle(module as usize))
        })
    }

    fn unload_module(&self, context: ContextHandle, module: ModuleHandle) -> Result<()> {
        self.with_context(context, || cu!(cuModuleUnload(module.0 as sys::CUmodule)))
    }

    fn module_function(&self, module: ModuleHandle, name: &str) -> Result<FunctionHandle> {
        let entry = CString::new(name).ok().context(InvalidEntryNameSnafu { name })?;
        let mut function = MaybeUninit::<sys::CUfunction>::uninit();
        cu!(cuModuleGetFunction(function.as_mut_ptr(), module.0 as sys::CUmodule, entry.as_ptr()))?;
        // SAFETY: initialized by cuModuleGetFunction on success.
        Ok(FunctionHandle(unsafe { function.assume_init() } as usize))
    }

    fn device_attribute(&self, device: DeviceId, attribute: DeviceAttribute) -> Result<i32> {
        let mut value = 0;
        cu!(cuDeviceGetAttribute(&mut value, device_attribute(attribute), device.0))?;
        Ok(value)
    }

    fn function_attribute(&self, f: FunctionHandle, attribute: FunctionAttribute) -> Result<i32> {
        let mut value = 0;
        cu!(cuFuncGetAttribute(&mut value, function_attribute(attribute), function(f)))?;
        Ok(value)
    }

    fn set_function_attribute(&self, f: FunctionHandle, attribute: FunctionAttribute, value: i32) -> Result<()> {
        cu!(cuFuncSetAttribute(function(f), function_attribute(attribute), value))
    }

    fn set_cache_preference(&self, f: FunctionHandle, preference: CachePreference) -> Result<()> {
        cu!(cuFuncSetCacheConfig(function(f), cache_preference(preference)))
    }

    unsafe fn memset_d8_async(&self, ptr: DevicePtr, value: u8, bytes: usize, s: StreamHandle) -> Result<()> {
        cu!(cuMemsetD8Async(ptr.0, value, bytes, stream(s)))
    }

    unsafe fn memcpy_dtoh_async(&self, dst: &mut [u8], src: DevicePtr, s: StreamHandle) -> Result<()> {
        cu!(cuMemcpyDtoHAsync_v2(dst.as_mut_ptr() as *mut c_void, src.0, dst.len(), stream(s)))
    }

    unsafe fn memcpy_htod_async(&self, dst: DevicePtr, src: &[u8], s: StreamHandle) -> Result<()> {
        cu!(cuMemcpyHtoDAsync_v2(dst.0, src.as_ptr() as *const c_void, src.len(), stream(s)))
    }

    fn synchronize_stream(&self, s: StreamHandle) -> Result<()> {
        cu!(cuStreamSynchronize(stream(s)))
    }

    fn create_event(&self, context: ContextHandle) -> Result<EventHandle> {
        self.with_context(context, || {
            let mut e: sys::CUevent = ptr::null_mut();
            cu!(cuEventCreate(&mut e, sys::CUevent_flags::CU_EVENT_DEFAULT as u32))?;
            Ok(EventHandle(e as usize))
        })
    }

    fn record_event(&self, e: EventHandle, s: StreamHandle) -> Result<()> {
        cu!(cuEventRecord(event(e), stream(s)))
    }

    fn synchronize_event(&self, e: EventHandle) -> Result<()> {
        cu!(cuEventSynchronize(event(e)))
    }

    fn event_elapsed_ms(&self, start: EventHandle, end: EventHandle) -> Result<f32> {
        let mut ms = 0.0f32;
        cu!(cuEventElapsedTime(&mut ms, event(start), event(end)))?;
        Ok(ms)
    }

    fn destroy_event(&self, context: ContextHandle, e: EventHandle) -> Result<()> {
        self.with_context(context, || cu!(cuEventDestroy_v2(event(e))))
    }

    unsafe fn launch_kernel(
        &self,
        f: FunctionHandle,
        dims: LaunchDims,
        s: StreamHandle,
        params: &mut [*mut c_void],
    ) -> Result<()> {
        let LaunchDims { grid, block, shared_mem_bytes } = dims;
        cu!(cuLaunchKernel(
            function(f),
            grid[0],
            grid[1],
            grid[2],
            block[0],
            block[1],
            block[2],
            shared_mem_bytes,
            stream(s),
            params.as_mut_ptr(),
            ptr::null_mut(),
        ))
    }
}
