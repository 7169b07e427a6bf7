use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;

use crate::driver::Driver;
use crate::error::{Error, InvalidDriverSnafu, Result};

/// Environment variable selecting the process-wide driver.
pub const DRIVER_ENV: &str = "VOLLEY_DRIVER";

/// Available driver backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum DriverKind {
    #[strum(to_string = "sim")]
    Sim,
    #[strum(to_string = "cuda")]
    Cuda,
}

impl DriverKind {
    /// Parse a driver name.
    ///
    /// Examples:
    /// - "sim" -> DriverKind::Sim
    /// - "CUDA" -> DriverKind::Cuda
    /// - "gpu" -> DriverKind::Cuda
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sim" | "simulated" => Ok(Self::Sim),
            "cuda" | "gpu" => Ok(Self::Cuda),
            _ => InvalidDriverSnafu { driver: s }.fail(),
        }
    }

    /// Driver named by `VOLLEY_DRIVER`, falling back to CUDA when compiled in
    /// and to the simulated driver otherwise.
    pub fn from_env() -> Result<Self> {
        match std::env::var(DRIVER_ENV) {
            Ok(name) => Self::parse(&name),
            Err(_) if cfg!(feature = "cuda") => Ok(Self::Cuda),
            Err(_) => Ok(Self::Sim),
        }
    }
}

impl FromStr for DriverKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Process-wide driver instances, one per backend.
pub struct DriverRegistry {
    drivers: RwLock<HashMap<DriverKind, Arc<dyn Driver>>>,
}

impl DriverRegistry {
    fn new() -> Self {
        Self { drivers: RwLock::new(HashMap::new()) }
    }

    /// Get or create the driver for `kind`.
    pub fn get(&self, kind: DriverKind) -> Result<Arc<dyn Driver>> {
        if let Some(driver) = self.drivers.read().get(&kind) {
            return Ok(Arc::clone(driver));
        }

        let mut drivers = self.drivers.write();
        if let Some(driver) = drivers.get(&kind) {
            return Ok(Arc::clone(driver));
        }

        let driver = create_driver(kind)?;
        tracing::debug!(driver = driver.name(), "driver initialized");
        drivers.insert(kind, Arc::clone(&driver));
        Ok(driver)
    }

    /// Get a driver by name.
    pub fn get_by_name(&self, name: &str) -> Result<Arc<dyn Driver>> {
        self.get(DriverKind::parse(name)?)
    }
}

fn create_driver(kind: DriverKind) -> Result<Arc<dyn Driver>> {
    match kind {
        DriverKind::Sim => Ok(Arc::new(crate::SimDriver::new())),
        #[cfg(feature = "cuda")]
        DriverKind::Cuda => Ok(Arc::new(crate::CudaDriver::new()?)),
        #[cfg(not(feature = "cuda"))]
        DriverKind::Cuda => crate::error::DriverUnavailableSnafu { driver: "cuda", feature: "cuda" }.fail(),
    }
}

static REGISTRY: LazyLock<DriverRegistry> = LazyLock::new(DriverRegistry::new);

/// Get the global driver registry.
pub fn registry() -> &'static DriverRegistry {
    &REGISTRY
}

/// Driver selected by the environment.
pub fn driver_from_env() -> Result<Arc<dyn Driver>> {
    registry().get(DriverKind::from_env()?)
}
