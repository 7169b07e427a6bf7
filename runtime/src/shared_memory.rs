//! Dynamic shared-memory opt-in.
//!
//! Blocks may use up to the static limit (48 KiB) of shared memory without any
//! setup. Larger requests need the function's dynamic shared-memory attribute
//! raised towards the device's opt-in maximum before the first launch.

use snafu::{ResultExt, ensure};
use tracing::debug;
use volley_device::{CachePreference, DeviceAttribute, Driver, FunctionAttribute};

use crate::error::{DeviceSnafu, Result, SharedMemoryExceededSnafu};
use crate::module_cache::ResolvedFunction;

/// Make `function` launchable with `requested` bytes of shared memory.
///
/// Queries and attribute updates happen at most once per function; later
/// calls return immediately.
pub fn ensure_capacity(driver: &dyn Driver, function: &ResolvedFunction, requested: u32, static_limit: u32) -> Result<()> {
    if requested <= static_limit || function.is_shared_memory_configured() {
        return Ok(());
    }

    let available =
        driver.device_attribute(function.device(), DeviceAttribute::MaxSharedMemoryPerBlockOptin).context(DeviceSnafu)?;
    ensure!(i64::from(requested) <= i64::from(available), SharedMemoryExceededSnafu { requested, available });

    if i64::from(available) > i64::from(static_limit) {
        let handle = function.handle();
        driver.set_cache_preference(handle, CachePreference::PreferShared).context(DeviceSnafu)?;
        let footprint = driver.function_attribute(handle, FunctionAttribute::SharedSizeBytes).context(DeviceSnafu)?;
        let dynamic = available - footprint;
        driver
            .set_function_attribute(handle, FunctionAttribute::MaxDynamicSharedSizeBytes, dynamic)
            .context(DeviceSnafu)?;
        debug!(requested, available, footprint, dynamic, "configured dynamic shared memory");
    }

    function.mark_shared_memory_configured();
    Ok(())
}
