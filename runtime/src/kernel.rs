//! Compiled kernels and their launch geometry.

use std::ffi::c_void;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use snafu::ResultExt;
use tracing::trace;
use volley_device::{Driver, LaunchDims, StreamHandle};

use crate::config::DispatchConfig;
use crate::error::{BlockDimOverflowSnafu, DeviceSnafu, Result};
use crate::module_cache::{ModuleCache, ResolvedFunction};
use crate::shared_memory;

static NEXT_IMAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`KernelImage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(u64);

impl ImageId {
    fn next() -> Self {
        Self(NEXT_IMAGE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// A compiled device binary and the entry point to launch from it.
#[derive(Debug)]
pub struct KernelImage {
    id: ImageId,
    binary: Vec<u8>,
    entry: String,
    num_warps: u32,
    shared_mem_bytes: u32,
}

impl KernelImage {
    /// `binary` is a cubin, fatbin or PTX image; blocks are `num_warps` warps
    /// wide and request `shared_mem_bytes` of shared memory.
    pub fn new(binary: impl Into<Vec<u8>>, entry: impl Into<String>, num_warps: u32, shared_mem_bytes: u32) -> Self {
        Self { id: ImageId::next(), binary: binary.into(), entry: entry.into(), num_warps, shared_mem_bytes }
    }

    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn binary(&self) -> &[u8] {
        &self.binary
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn num_warps(&self) -> u32 {
        self.num_warps
    }

    pub fn shared_mem_bytes(&self) -> u32 {
        self.shared_mem_bytes
    }
}

/// Number of blocks along each grid axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LaunchGrid {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl LaunchGrid {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    pub const fn linear(x: u32) -> Self {
        Self { x, y: 1, z: 1 }
    }

    pub const fn dims(&self) -> [u32; 3] {
        [self.x, self.y, self.z]
    }
}

impl From<[u32; 3]> for LaunchGrid {
    fn from([x, y, z]: [u32; 3]) -> Self {
        Self { x, y, z }
    }
}

/// Immutable, shareable handle to a launchable kernel.
#[derive(Debug)]
pub struct Kernel {
    image: KernelImage,
    cache: Arc<ModuleCache>,
    threads_per_warp: u32,
    static_shared_memory_limit: u32,
}

impl Kernel {
    pub fn new(image: KernelImage, cache: Arc<ModuleCache>, config: &DispatchConfig) -> Self {
        let threads_per_warp = config.threads_per_warp.unwrap_or_else(|| cache.driver().threads_per_warp());
        Self {
            threads_per_warp,
            image,
            cache,
            static_shared_memory_limit: config.static_shared_memory_limit,
        }
    }

    pub fn image(&self) -> &KernelImage {
        &self.image
    }

    pub fn name(&self) -> &str {
        self.image.entry()
    }

    /// Threads per block: `num_warps` warps of the configured width.
    pub fn block_dim_x(&self) -> Result<u32> {
        match self.image.num_warps.checked_mul(self.threads_per_warp) {
            Some(threads) => Ok(threads),
            None => BlockDimOverflowSnafu {
                kernel: self.name(),
                num_warps: self.image.num_warps,
                threads_per_warp: self.threads_per_warp,
            }
            .fail(),
        }
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        self.cache.driver()
    }

    /// Resolve the function for `stream`'s context and apply its shared-memory
    /// configuration, without launching.
    pub fn prepare(&self, stream: StreamHandle) -> Result<Arc<ResolvedFunction>> {
        self.block_dim_x()?;
        let context = self.driver().stream_context(stream).context(DeviceSnafu)?;
        let function = self.cache.resolve(&self.image, context)?;
        if self.image.shared_mem_bytes > self.static_shared_memory_limit {
            shared_memory::ensure_capacity(
                self.driver().as_ref(),
                &function,
                self.image.shared_mem_bytes,
                self.static_shared_memory_limit,
            )?;
        }
        Ok(function)
    }

    /// Launch a function obtained from [`Kernel::prepare`].
    ///
    /// # Safety
    ///
    /// `argv` must hold one pointer per kernel parameter, each to a live
    /// 64-bit slot, and all device addresses in those slots must be valid for
    /// the kernel.
    pub unsafe fn launch_prepared(
        &self,
        function: &ResolvedFunction,
        stream: StreamHandle,
        grid: LaunchGrid,
        argv: &mut [*mut c_void],
    ) -> Result<()> {
        let block = self.block_dim_x()?;
        let dims = LaunchDims { grid: grid.dims(), block: [block, 1, 1], shared_mem_bytes: self.image.shared_mem_bytes };
        trace!(kernel = self.name(), grid = ?dims.grid, block, shared = dims.shared_mem_bytes, "launch");
        unsafe { self.driver().launch_kernel(function.handle(), dims, stream, argv) }.context(DeviceSnafu)
    }

    /// Resolve, configure and launch on `stream`.
    ///
    /// # Safety
    ///
    /// Same requirements as [`Kernel::launch_prepared`].
    pub unsafe fn launch(&self, stream: StreamHandle, grid: LaunchGrid, argv: &mut [*mut c_void]) -> Result<()> {
        let function = self.prepare(stream)?;
        unsafe { self.launch_prepared(&function, stream, grid, argv) }
    }
}
