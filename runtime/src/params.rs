//! Kernel parameters and the flat argument array.
//!
//! Every parameter, buffer or scalar, occupies one 64-bit slot. The launch
//! ABI receives an array with the address of each slot.

use std::ffi::c_void;

use snafu::{ResultExt, ensure};
use tracing::trace;
use volley_device::{DevicePtr, Driver, StreamHandle};
use volley_dtype::{HasDType, ScalarValue};

use crate::error::{BufferCountMismatchSnafu, DTypeSnafu, DeviceSnafu, MisalignedBufferSnafu, Result};

/// Device buffer parameter whose address is supplied at launch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferParameter {
    /// Bytes zero-filled at the buffer's start before the kernel runs.
    pub bytes_to_zero: usize,
    pub ptr_must_be_divisible_by_16: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parameter {
    Buffer(BufferParameter),
    /// Encoded scalar payload.
    Scalar(u64),
}

impl Parameter {
    /// Scalar parameter from a native value; its dtype follows the Rust type.
    pub fn scalar<T: HasDType>(value: T) -> Self {
        Self::Scalar(value.to_payload())
    }

    pub fn is_buffer(&self) -> bool {
        matches!(self, Self::Buffer(_))
    }
}

pub fn create_buffer_parameter(bytes_to_zero: usize, ptr_must_be_divisible_by_16: bool) -> Parameter {
    Parameter::Buffer(BufferParameter { bytes_to_zero, ptr_must_be_divisible_by_16 })
}

/// Scalar parameter from a value and a kernel-signature dtype tag.
pub fn create_scalar_parameter(value: impl Into<ScalarValue>, dtype: &str) -> Result<Parameter> {
    volley_dtype::encode(value, dtype).map(Parameter::Scalar).context(DTypeSnafu)
}

/// Argument slots of one launch.
#[derive(Debug)]
pub struct ArgumentPack {
    slots: Box<[u64]>,
    pointers: Vec<*mut c_void>,
    zero_fills: Vec<(DevicePtr, usize)>,
}

impl ArgumentPack {
    /// Bind `buffers`, in order, to the buffer parameters and fill the slots.
    ///
    /// Fails before producing anything if the buffer count is wrong or a
    /// buffer that must be 16-byte aligned is not.
    pub fn new(parameters: &[Parameter], buffers: &[DevicePtr]) -> Result<Self> {
        let expected = parameters.iter().filter(|p| p.is_buffer()).count();
        ensure!(expected == buffers.len(), BufferCountMismatchSnafu { expected, actual: buffers.len() });

        let mut buffers = buffers.iter().copied();
        let mut slots = Vec::with_capacity(parameters.len());
        let mut zero_fills = Vec::new();
        for (index, parameter) in parameters.iter().enumerate() {
            match parameter {
                Parameter::Buffer(buffer) => {
                    let Some(ptr) = buffers.next() else {
                        return BufferCountMismatchSnafu { expected, actual: index }.fail();
                    };
                    ensure!(
                        !buffer.ptr_must_be_divisible_by_16 || ptr.is_aligned_to(16),
                        MisalignedBufferSnafu { index, address: ptr.0 }
                    );
                    if buffer.bytes_to_zero > 0 {
                        zero_fills.push((ptr, buffer.bytes_to_zero));
                    }
                    slots.push(ptr.0);
                }
                Parameter::Scalar(bits) => slots.push(*bits),
            }
        }

        Ok(Self { slots: slots.into_boxed_slice(), pointers: Vec::new(), zero_fills })
    }

    /// Build the pack and enqueue its zero-fills on `stream`.
    ///
    /// # Safety
    ///
    /// Each zero-filled buffer must be valid device memory of at least
    /// `bytes_to_zero` bytes.
    pub unsafe fn marshal(
        driver: &dyn Driver,
        stream: StreamHandle,
        parameters: &[Parameter],
        buffers: &[DevicePtr],
    ) -> Result<Self> {
        let pack = Self::new(parameters, buffers)?;
        unsafe { pack.zero_fill(driver, stream)? };
        Ok(pack)
    }

    /// Enqueue the zero-fills, ordered before anything launched later on `stream`.
    ///
    /// # Safety
    ///
    /// Same requirements as [`ArgumentPack::marshal`].
    pub unsafe fn zero_fill(&self, driver: &dyn Driver, stream: StreamHandle) -> Result<()> {
        for &(ptr, bytes) in &self.zero_fills {
            trace!(%ptr, bytes, "zero-fill");
            unsafe { driver.memset_d8_async(ptr, 0, bytes, stream) }.context(DeviceSnafu)?;
        }
        Ok(())
    }

    pub fn slots(&self) -> &[u64] {
        &self.slots
    }

    pub fn zero_fills(&self) -> &[(DevicePtr, usize)] {
        &self.zero_fills
    }

    /// Argument array for the launch primitive. Valid while `self` is borrowed.
    pub fn as_mut_ptrs(&mut self) -> &mut [*mut c_void] {
        self.pointers = self.slots.iter_mut().map(|slot| slot as *mut u64 as *mut c_void).collect();
        &mut self.pointers
    }
}
