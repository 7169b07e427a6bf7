//! The dispatcher: one object owning the driver, the module cache, the call
//! registry and the configuration.

use std::ffi::c_void;
use std::sync::{Arc, OnceLock};

use snafu::{OptionExt, ResultExt};
use tracing::trace;
use volley_device::{DeviceId, DevicePtr, Driver, StreamHandle};

use crate::call::{AutotuneBudget, KernelLaunch};
use crate::config::DispatchConfig;
use crate::error::{AlreadyInstalledSnafu, DeviceSnafu, NotInstalledSnafu, Result};
use crate::kernel::{Kernel, KernelImage};
use crate::module_cache::ModuleCache;
use crate::registry::{CallRegistry, CallToken};

static GLOBAL: OnceLock<Dispatcher> = OnceLock::new();

#[derive(Debug)]
pub struct Dispatcher {
    driver: Arc<dyn Driver>,
    cache: Arc<ModuleCache>,
    registry: CallRegistry,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(driver: Arc<dyn Driver>, config: DispatchConfig) -> Self {
        let cache = Arc::new(ModuleCache::open(Arc::clone(&driver)));
        Self { driver, cache, registry: CallRegistry::new(), config }
    }

    /// Dispatcher on the driver and configuration selected by the environment.
    pub fn from_env() -> Result<Self> {
        let driver = volley_device::driver_from_env().context(DeviceSnafu)?;
        Ok(Self::new(driver, DispatchConfig::from_env()))
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn cache(&self) -> &Arc<ModuleCache> {
        &self.cache
    }

    pub fn registry(&self) -> &CallRegistry {
        &self.registry
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Kernel handle whose modules live in this dispatcher's cache.
    pub fn kernel(&self, image: KernelImage) -> Arc<Kernel> {
        Arc::new(Kernel::new(image, Arc::clone(&self.cache), &self.config))
    }

    /// Register a call; autotuned calls take this dispatcher's autotune budget.
    pub fn register(&self, call: impl Into<KernelLaunch>) -> CallToken {
        let call = match call.into() {
            KernelLaunch::Autotuned(call) => KernelLaunch::Autotuned(call.with_budget(AutotuneBudget::from(&self.config))),
            single => single,
        };
        self.registry.register(call)
    }

    pub fn unregister(&self, token: CallToken) -> Option<Arc<KernelLaunch>> {
        self.registry.remove(token)
    }

    /// Launch the call identified by `descriptor`.
    ///
    /// # Safety
    ///
    /// `buffers` must satisfy the registered call's launch requirements.
    pub unsafe fn launch(&self, stream: StreamHandle, buffers: &[DevicePtr], descriptor: &[u8]) -> Result<()> {
        let token = CallToken::from_descriptor(descriptor)?;
        let call = self.registry.get(token)?;
        trace!(%token, name = call.name(), "dispatch");
        unsafe { call.launch(stream, buffers) }
    }

    /// Like [`Dispatcher::launch`], reading the buffer addresses from a raw array.
    ///
    /// # Safety
    ///
    /// `buffers` must point to at least as many addresses as the call has
    /// buffer parameters, and those addresses must satisfy its launch
    /// requirements.
    pub unsafe fn launch_raw(&self, stream: StreamHandle, buffers: *const *mut c_void, descriptor: &[u8]) -> Result<()> {
        let token = CallToken::from_descriptor(descriptor)?;
        let call = self.registry.get(token)?;
        let count = call.buffer_count();
        let buffers: Vec<DevicePtr> = if count == 0 || buffers.is_null() {
            Vec::new()
        } else {
            // SAFETY: the caller provides `count` readable addresses.
            unsafe { std::slice::from_raw_parts(buffers, count) }.iter().map(|&p| DevicePtr::from_raw(p)).collect()
        };
        trace!(%token, name = call.name(), "dispatch");
        unsafe { call.launch(stream, &buffers) }
    }

    pub fn compute_capability(&self, device: DeviceId) -> Result<i32> {
        self.driver.compute_capability(device).context(DeviceSnafu)
    }

    /// Drop every registered call and unload every module.
    pub fn shutdown(&self) -> Result<()> {
        self.registry.clear();
        self.cache.shutdown()
    }

    /// Publish this dispatcher as the one used by the launch entry point.
    pub fn install(self) -> Result<&'static Dispatcher> {
        GLOBAL.set(self).ok().context(AlreadyInstalledSnafu)?;
        Self::global()
    }

    pub fn global() -> Result<&'static Dispatcher> {
        GLOBAL.get().context(NotInstalledSnafu)
    }
}
