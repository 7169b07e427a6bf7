//! Error types for kernel dispatch.

use snafu::Snafu;

/// Result type for dispatch operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur while resolving, configuring or launching a kernel.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Native driver call failed.
    #[snafu(display("{source}"))]
    Device { source: volley_device::Error },

    /// Scalar parameter could not be encoded.
    #[snafu(display("{source}"))]
    DType { source: volley_dtype::Error },

    /// Kernel requests more shared memory than the device can provide.
    #[snafu(display("Shared memory requested ({requested} bytes) exceeds device resources ({available} bytes)."))]
    SharedMemoryExceeded { requested: u32, available: i32 },

    /// `num_warps * threads_per_warp` does not fit a block dimension.
    #[snafu(display("Kernel {kernel}: {num_warps} warps of {threads_per_warp} threads overflow the block dimension."))]
    BlockDimOverflow { kernel: String, num_warps: u32, threads_per_warp: u32 },

    #[snafu(display("Parameter {index} ({address:#x}) is not divisible by 16."))]
    MisalignedBuffer { index: usize, address: u64 },

    #[snafu(display("Kernel call expects {expected} buffers, got {actual}."))]
    BufferCountMismatch { expected: usize, actual: usize },

    /// Opaque call descriptor does not decode to a call token.
    #[snafu(display("Invalid kernel call descriptor of {len} bytes."))]
    InvalidDescriptor { len: usize },

    #[snafu(display("No kernel call registered for token {token}."))]
    UnknownCall { token: u64 },

    /// Module cache was shut down.
    #[snafu(display("Module cache is closed."))]
    CacheClosed,

    #[snafu(display("Autotuned kernel call {name} has no configurations."))]
    EmptyAutotune { name: String },

    /// Autotune candidates disagree on their buffer signature.
    #[snafu(display("Autotuned kernel call {name}: configuration {index} expects {actual} buffers, not {expected}."))]
    AutotuneBufferMismatch { name: String, index: usize, expected: usize, actual: usize },

    /// Input/output alias refers to a buffer outside the call signature.
    #[snafu(display("Autotuned kernel call {name}: alias ({input}, {output}) is out of range for {buffers} buffers."))]
    InvalidAlias { name: String, input: usize, output: usize, buffers: usize },

    #[snafu(display("No dispatcher installed."))]
    NotInstalled,

    #[snafu(display("A dispatcher is already installed."))]
    AlreadyInstalled,
}
