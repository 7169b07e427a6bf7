//! Kernel-launch dispatcher for precompiled GPU kernels.
//!
//! A host runtime registers kernel calls ahead of time and later triggers
//! them through an opaque 8-byte descriptor, passing a stream and the device
//! buffer addresses.
//!
//! # Launch path
//!
//! [`ffi::volley_launch_kernel`] decodes the descriptor into a
//! [`CallToken`], the [`Dispatcher`] looks the call up in its
//! [`CallRegistry`], the call builds its argument slots ([`ArgumentPack`])
//! and the [`Kernel`] resolves its function through the [`ModuleCache`],
//! opts in to extra shared memory if needed, and launches.
//!
//! # Autotuning
//!
//! An [`AutotunedKernelCall`] benchmarks its candidate calls with device
//! events on first launch and keeps launching the fastest.

pub mod benchmark;
pub mod call;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod ffi;
pub mod kernel;
pub mod module_cache;
pub mod params;
pub mod registry;
pub mod shared_memory;


pub use benchmark::{BenchmarkResult, benchmark_call, iterations_for_budget};
pub use call::{AutotuneBudget, AutotuneCandidate, AutotunedKernelCall, InputOutputAlias, KernelCall, KernelLaunch};
pub use config::DispatchConfig;
pub use dispatcher::Dispatcher;
pub use error::*;
pub use ffi::{LaunchFn, SetFailureFn, custom_call_target, volley_launch_kernel, volley_set_status_callback};
pub use kernel::{ImageId, Kernel, KernelImage, LaunchGrid};
pub use module_cache::{ModuleCache, ResolvedFunction};
pub use params::{ArgumentPack, BufferParameter, Parameter, create_buffer_parameter, create_scalar_parameter};
pub use registry::{CallRegistry, CallToken};
