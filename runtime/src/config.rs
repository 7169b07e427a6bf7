//! Dispatcher configuration.
//!
//! Typed configuration with a bon builder and environment variable fallbacks.

use bon::bon;

/// Shared memory a block may use without opting in to the dynamic carveout.
pub const STATIC_SHARED_MEMORY_LIMIT: u32 = 48 * 1024;

/// Wall-clock budget for the repeated autotune pass.
pub const AUTOTUNE_BUDGET_MS: f32 = 10.0;

/// Upper bound on timed iterations per autotune candidate.
pub const AUTOTUNE_MAX_ITERATIONS: u32 = 100;

/// Configuration shared by every kernel a dispatcher launches.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    /// Requests at or below this many bytes never touch function attributes.
    pub static_shared_memory_limit: u32,
    /// Overrides the driver's native warp width when set.
    pub threads_per_warp: Option<u32>,
    pub autotune_budget_ms: f32,
    pub autotune_max_iterations: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            static_shared_memory_limit: STATIC_SHARED_MEMORY_LIMIT,
            threads_per_warp: None,
            autotune_budget_ms: AUTOTUNE_BUDGET_MS,
            autotune_max_iterations: AUTOTUNE_MAX_ITERATIONS,
        }
    }
}

#[bon]
impl DispatchConfig {
    /// Create a dispatch configuration with builder pattern.
    #[builder]
    pub fn new(
        #[builder(default = STATIC_SHARED_MEMORY_LIMIT)] static_shared_memory_limit: u32,
        threads_per_warp: Option<u32>,
        #[builder(default = AUTOTUNE_BUDGET_MS)] autotune_budget_ms: f32,
        #[builder(default = AUTOTUNE_MAX_ITERATIONS)] autotune_max_iterations: u32,
    ) -> Self {
        Self { static_shared_memory_limit, threads_per_warp, autotune_budget_ms, autotune_max_iterations }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `VOLLEY_STATIC_SMEM_LIMIT` - Static shared-memory limit in bytes (default: 49152)
    /// * `VOLLEY_THREADS_PER_WARP` - Warp width override (default: driver's native width)
    /// * `VOLLEY_AUTOTUNE_BUDGET_MS` - Autotune time budget in milliseconds (default: 10)
    /// * `VOLLEY_AUTOTUNE_MAX_ITERS` - Max timed iterations per candidate (default: 100)
    pub fn from_env() -> Self {
        let static_shared_memory_limit = std::env::var("VOLLEY_STATIC_SMEM_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(STATIC_SHARED_MEMORY_LIMIT);
        let threads_per_warp =
            std::env::var("VOLLEY_THREADS_PER_WARP").ok().and_then(|s| s.parse().ok()).filter(|&w: &u32| w > 0);
        let autotune_budget_ms = std::env::var("VOLLEY_AUTOTUNE_BUDGET_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&ms: &f32| ms > 0.0)
            .unwrap_or(AUTOTUNE_BUDGET_MS);
        let autotune_max_iterations = std::env::var("VOLLEY_AUTOTUNE_MAX_ITERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&n: &u32| n > 0)
            .unwrap_or(AUTOTUNE_MAX_ITERATIONS);

        Self { static_shared_memory_limit, threads_per_warp, autotune_budget_ms, autotune_max_iterations }
    }
}
