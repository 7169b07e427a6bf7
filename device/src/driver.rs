//! Native driver surface.
//!
//! The dispatcher never talks to a vendor API directly. Everything it needs
//! from the device (context lookup, module loading, attribute queries, async
//! memory operations, events and the launch primitive itself) goes through
//! the [`Driver`] trait so that the CUDA backend and the simulated backend are
//! interchangeable.

use std::ffi::c_void;
use std::fmt;

use crate::error::Result;

macro_rules! native_handle {
    ($($(#[$meta:meta])* $name:ident($repr:ty);)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            #[repr(transparent)]
            pub struct $name(pub $repr);
        )*
    };
}

native_handle! {
    /// Native stream (`CUstream`), carried as its address.
    StreamHandle(usize);
    /// Native execution context (`CUcontext`).
    ContextHandle(usize);
    /// Loaded device-code module (`CUmodule`).
    ModuleHandle(usize);
    /// Entry point inside a loaded module (`CUfunction`).
    FunctionHandle(usize);
    /// Timing event (`CUevent`).
    EventHandle(usize);
    /// Ordinal of a physical device.
    DeviceId(i32);
    /// Device memory address.
    DevicePtr(u64);
}

impl StreamHandle {
    /// The legacy default stream.
    pub const NULL: Self = Self(0);

    pub fn from_raw(stream: *mut c_void) -> Self {
        Self(stream as usize)
    }

    pub fn as_raw(self) -> *mut c_void {
        self.0 as *mut c_void
    }
}

impl DevicePtr {
    pub fn from_raw(ptr: *mut c_void) -> Self {
        Self(ptr as usize as u64)
    }

    pub const fn is_aligned_to(self, align: u64) -> bool {
        self.0 % align == 0
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Device properties queried by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum DeviceAttribute {
    ComputeCapabilityMajor,
    ComputeCapabilityMinor,
    /// Static per-block shared-memory limit.
    MaxSharedMemoryPerBlock,
    /// Per-block shared-memory limit reachable through the dynamic opt-in.
    MaxSharedMemoryPerBlockOptin,
    WarpSize,
}

/// Per-function attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum FunctionAttribute {
    /// Statically allocated shared memory of the function.
    SharedSizeBytes,
    /// Upper bound on dynamic shared memory a launch may request.
    MaxDynamicSharedSizeBytes,
}

/// L1 / shared-memory carveout preference of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display)]
pub enum CachePreference {
    #[default]
    None,
    PreferShared,
    PreferL1,
    PreferEqual,
}

/// Launch geometry of a native kernel launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LaunchDims {
    pub grid: [u32; 3],
    pub block: [u32; 3],
    pub shared_mem_bytes: u32,
}

/// Device driver used by the dispatcher.
///
/// All asynchronous operations are enqueued on the given stream and ordered by
/// it; nothing here blocks unless its name says so (`synchronize_*`).
pub trait Driver: Send + Sync + fmt::Debug {
    /// Backend name for diagnostics.
    fn name(&self) -> &str;

    /// Native warp width: 32 on CUDA devices, 64 on ROCm-class devices.
    fn threads_per_warp(&self) -> u32;

    /// Context a stream was created in.
    fn stream_context(&self, stream: StreamHandle) -> Result<ContextHandle>;

    /// Device backing a context.
    fn context_device(&self, context: ContextHandle) -> Result<DeviceId>;

    /// Load a compiled image (cubin, fatbin or PTX) into `context`.
    fn load_module(&self, context: ContextHandle, image: &[u8]) -> Result<ModuleHandle>;

    /// Unload a module from the context it was loaded into.
    fn unload_module(&self, context: ContextHandle, module: ModuleHandle) -> Result<()>;

    /// Look up a named entry point.
    fn module_function(&self, module: ModuleHandle, name: &str) -> Result<FunctionHandle>;

    fn device_attribute(&self, device: DeviceId, attribute: DeviceAttribute) -> Result<i32>;

    fn function_attribute(&self, function: FunctionHandle, attribute: FunctionAttribute) -> Result<i32>;

    fn set_function_attribute(&self, function: FunctionHandle, attribute: FunctionAttribute, value: i32) -> Result<()>;

    fn set_cache_preference(&self, function: FunctionHandle, preference: CachePreference) -> Result<()>;

    /// Enqueue a byte fill of `bytes` bytes at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr..ptr + bytes` must be device memory valid for writes until the
    /// operation completes on `stream`.
    unsafe fn memset_d8_async(&self, ptr: DevicePtr, value: u8, bytes: usize, stream: StreamHandle) -> Result<()>;

    /// Enqueue a device-to-host copy of `dst.len()` bytes.
    ///
    /// # Safety
    ///
    /// `src` must be readable for `dst.len()` bytes, and `dst` must stay alive
    /// and untouched until `stream` is synchronized.
    unsafe fn memcpy_dtoh_async(&self, dst: &mut [u8], src: DevicePtr, stream: StreamHandle) -> Result<()>;

    /// Enqueue a host-to-device copy of `src.len()` bytes.
    ///
    /// # Safety
    ///
    /// `dst` must be writable for `src.len()` bytes, and `src` must stay alive
    /// until `stream` is synchronized.
    unsafe fn memcpy_htod_async(&self, dst: DevicePtr, src: &[u8], stream: StreamHandle) -> Result<()>;

    fn synchronize_stream(&self, stream: StreamHandle) -> Result<()>;

    /// Create a timing event owned by `context`.
    fn create_event(&self, context: ContextHandle) -> Result<EventHandle>;

    fn record_event(&self, event: EventHandle, stream: StreamHandle) -> Result<()>;

    fn synchronize_event(&self, event: EventHandle) -> Result<()>;

    /// Milliseconds between two recorded, completed events.
    fn event_elapsed_ms(&self, start: EventHandle, end: EventHandle) -> Result<f32>;

    fn destroy_event(&self, context: ContextHandle, event: EventHandle) -> Result<()>;

    /// Enqueue a kernel launch.
    ///
    /// # Safety
    ///
    /// `params` must hold one pointer per kernel parameter, each pointing to
    /// a live 64-bit slot holding that parameter's value, and every device
    /// address reachable through them must be valid for the kernel's accesses.
    unsafe fn launch_kernel(
        &self,
        function: FunctionHandle,
        dims: LaunchDims,
        stream: StreamHandle,
        params: &mut [*mut c_void],
    ) -> Result<()>;

    /// Compute capability as `major * 10 + minor`.
    fn compute_capability(&self, device: DeviceId) -> Result<i32> {
        let major = self.device_attribute(device, DeviceAttribute::ComputeCapabilityMajor)?;
        let minor = self.device_attribute(device, DeviceAttribute::ComputeCapabilityMinor)?;
        Ok(major * 10 + minor)
    }
}
