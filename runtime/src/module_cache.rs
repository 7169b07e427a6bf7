//! Per-context cache of loaded device modules.
//!
//! Maps (image ID, execution context) pairs to resolved entry points. A
//! kernel image is loaded into a module at most once per context; every later
//! launch on that context reuses the resolved function.
//!
//! # Thread Safety
//!
//! Lookups take a shared read lock. Resolution of a missing entry takes the
//! write lock for the whole load-and-lookup sequence and re-checks the map
//! first, so concurrent first launches load the module exactly once.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use snafu::{ResultExt, ensure};
use tracing::{debug, warn};
use volley_device::{ContextHandle, DeviceId, Driver, FunctionHandle, ModuleHandle};

use crate::error::{CacheClosedSnafu, DeviceSnafu, Result};
use crate::kernel::{ImageId, KernelImage};

/// Entry point resolved in one execution context.
#[derive(Debug)]
pub struct ResolvedFunction {
    handle: FunctionHandle,
    module: ModuleHandle,
    context: ContextHandle,
    device: DeviceId,
    shared_memory_configured: AtomicBool,
}

impl ResolvedFunction {
    pub fn handle(&self) -> FunctionHandle {
        self.handle
    }

    pub fn module(&self) -> ModuleHandle {
        self.module
    }

    pub fn context(&self) -> ContextHandle {
        self.context
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Whether the dynamic shared-memory attributes were already applied.
    pub fn is_shared_memory_configured(&self) -> bool {
        self.shared_memory_configured.load(Ordering::Acquire)
    }

    pub(crate) fn mark_shared_memory_configured(&self) {
        self.shared_memory_configured.store(true, Ordering::Release);
    }
}

type ModuleKey = (ImageId, ContextHandle);

#[derive(Default)]
struct CacheState {
    functions: HashMap<ModuleKey, Arc<ResolvedFunction>>,
    closed: bool,
}

/// Owner of every module loaded on behalf of a dispatcher.
pub struct ModuleCache {
    driver: Arc<dyn Driver>,
    state: RwLock<CacheState>,
}

impl std::fmt::Debug for ModuleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCache").field("driver", &self.driver.name()).field("modules", &self.len()).finish()
    }
}

impl ModuleCache {
    pub fn open(driver: Arc<dyn Driver>) -> Self {
        Self { driver, state: RwLock::new(CacheState::default()) }
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// Get the entry point of `image` in `context`, loading it on first use.
    ///
    /// A failed load or lookup is reported and not cached; the next call
    /// tries again from scratch.
    #[tracing::instrument(skip_all, fields(entry = image.entry(), context = context.0))]
    pub fn resolve(&self, image: &KernelImage, context: ContextHandle) -> Result<Arc<ResolvedFunction>> {
        let key = (image.id(), context);

        {
            let state = self.state.read();
            ensure!(!state.closed, CacheClosedSnafu);
            if let Some(function) = state.functions.get(&key) {
                return Ok(Arc::clone(function));
            }
        }

        let mut state = self.state.write();
        ensure!(!state.closed, CacheClosedSnafu);
        if let Some(function) = state.functions.get(&key) {
            return Ok(Arc::clone(function));
        }

        let function = Arc::new(self.load(image, context)?);
        state.functions.insert(key, Arc::clone(&function));
        Ok(function)
    }

    fn load(&self, image: &KernelImage, context: ContextHandle) -> Result<ResolvedFunction> {
        let module = self.driver.load_module(context, image.binary()).context(DeviceSnafu)?;

        let resolved = self
            .driver
            .module_function(module, image.entry())
            .and_then(|handle| Ok((handle, self.driver.context_device(context)?)));

        let (handle, device) = match resolved {
            Ok(resolved) => resolved,
            Err(source) => {
                if let Err(error) = self.driver.unload_module(context, module) {
                    warn!(%error, "failed to unload module after failed entry point lookup");
                }
                return Err(source).context(DeviceSnafu);
            }
        };

        debug!(entry = image.entry(), bytes = image.binary().len(), device = device.0, "module loaded");
        Ok(ResolvedFunction { handle, module, context, device, shared_memory_configured: AtomicBool::new(false) })
    }

    /// Number of resolved (image, context) pairs.
    pub fn len(&self) -> usize {
        self.state.read().functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    /// Unload every module and close the cache.
    ///
    /// All unloads are attempted; the first failure is returned afterwards.
    /// Calling this on a closed cache does nothing.
    pub fn shutdown(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.closed {
            return Ok(());
        }
        state.closed = true;

        let mut first_error = None;
        for (_, function) in state.functions.drain() {
            if let Err(error) = self.driver.unload_module(function.context, function.module) {
                warn!(%error, module = function.module.0, "failed to unload module");
                first_error.get_or_insert(error);
            }
        }

        match first_error {
            Some(source) => Err(source).context(DeviceSnafu),
            None => Ok(()),
        }
    }
}

impl Drop for ModuleCache {
    fn drop(&mut self) {
        if let Err(error) = self.shutdown() {
            warn!(%error, "module cache shutdown failed");
        }
    }
}
