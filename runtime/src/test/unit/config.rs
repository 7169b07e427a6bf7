use crate::DispatchConfig;
use crate::config::{AUTOTUNE_BUDGET_MS, AUTOTUNE_MAX_ITERATIONS, STATIC_SHARED_MEMORY_LIMIT};

#[test]
fn test_builder_defaults_match_default() {
    let built = DispatchConfig::builder().build();
    assert_eq!(built, DispatchConfig::default());
    assert_eq!(built.static_shared_memory_limit, 49152);
    assert_eq!(built.threads_per_warp, None);
    assert_eq!(built.autotune_budget_ms, AUTOTUNE_BUDGET_MS);
    assert_eq!(built.autotune_max_iterations, AUTOTUNE_MAX_ITERATIONS);
}

#[test]
fn test_builder_overrides() {
    let config = DispatchConfig::builder()
        .static_shared_memory_limit(32 * 1024)
        .threads_per_warp(64)
        .autotune_budget_ms(2.5)
        .autotune_max_iterations(7)
        .build();

    assert_eq!(config.static_shared_memory_limit, 32 * 1024);
    assert_eq!(config.threads_per_warp, Some(64));
    assert_eq!(config.autotune_budget_ms, 2.5);
    assert_eq!(config.autotune_max_iterations, 7);
}

#[test]
fn test_optional_warp_width() {
    let unset = DispatchConfig::builder().maybe_threads_per_warp(None).build();
    assert_eq!(unset.threads_per_warp, None);
    assert_eq!(unset.static_shared_memory_limit, STATIC_SHARED_MEMORY_LIMIT);
}
