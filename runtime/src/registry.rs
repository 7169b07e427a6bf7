//! Token registry for launchable calls.
//!
//! The calling runtime only carries an opaque byte string per custom call.
//! Calls are registered here and identified by a [`CallToken`] whose 8-byte
//! little-endian encoding is that byte string.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use snafu::OptionExt;
use tracing::debug;

use crate::call::KernelLaunch;
use crate::error::{InvalidDescriptorSnafu, Result, UnknownCallSnafu};

/// Non-zero identifier of a registered call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallToken(NonZeroU64);

impl CallToken {
    pub const DESCRIPTOR_LEN: usize = 8;

    pub fn new(value: u64) -> Option<Self> {
        NonZeroU64::new(value).map(Self)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// Opaque descriptor handed to the calling runtime.
    pub fn descriptor(self) -> [u8; Self::DESCRIPTOR_LEN] {
        self.0.get().to_le_bytes()
    }

    pub fn from_descriptor(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; Self::DESCRIPTOR_LEN] = bytes.try_into().ok().context(InvalidDescriptorSnafu { len: bytes.len() })?;
        Self::new(u64::from_le_bytes(raw)).context(InvalidDescriptorSnafu { len: bytes.len() })
    }
}

impl fmt::Display for CallToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owns every registered call until it is removed.
#[derive(Debug)]
pub struct CallRegistry {
    calls: RwLock<HashMap<CallToken, Arc<KernelLaunch>>>,
    next: AtomicU64,
}

impl Default for CallRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CallRegistry {
    pub fn new() -> Self {
        Self { calls: RwLock::new(HashMap::new()), next: AtomicU64::new(0) }
    }

    pub fn register(&self, call: impl Into<KernelLaunch>) -> CallToken {
        let call = call.into();
        let token = CallToken(NonZeroU64::MIN.saturating_add(self.next.fetch_add(1, Ordering::Relaxed)));
        debug!(%token, name = call.name(), buffers = call.buffer_count(), "registered kernel call");
        self.calls.write().insert(token, Arc::new(call));
        token
    }

    pub fn get(&self, token: CallToken) -> Result<Arc<KernelLaunch>> {
        self.calls.read().get(&token).cloned().context(UnknownCallSnafu { token: token.get() })
    }

    pub fn remove(&self, token: CallToken) -> Option<Arc<KernelLaunch>> {
        self.calls.write().remove(&token)
    }

    pub fn len(&self) -> usize {
        self.calls.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.calls.write().clear();
    }
}
