//! Device driver surface for the volley kernel-launch dispatcher.
//!
//! [`Driver`] is the narrow set of native operations the dispatcher needs.
//! Two backends implement it: [`SimDriver`], a host-only simulation used by
//! tests and GPU-less hosts, and `CudaDriver` behind the `cuda` feature.

pub mod devices;
pub mod driver;
pub mod error;
pub mod registry;


#[cfg(feature = "cuda")]
pub use devices::cuda::CudaDriver;
pub use devices::sim::{DriverCall, LaunchRecord, SimDeviceProps, SimDriver, SimMemory};
pub use driver::{
    CachePreference, ContextHandle, DeviceAttribute, DeviceId, DevicePtr, Driver, EventHandle, FunctionAttribute,
    FunctionHandle, LaunchDims, ModuleHandle, StreamHandle,
};
pub use error::{Error, Result};
pub use registry::{DriverKind, DriverRegistry, driver_from_env, registry};
