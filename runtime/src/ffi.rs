//! C entry point registered with the calling runtime as a custom-call target.
//!
//! The runtime passes an opaque status object alongside every launch. Failures
//! are written into it through a callback the host registers once with
//! [`volley_set_status_callback`], mirroring `XlaCustomCallStatusSetFailure`.

use std::ffi::{c_char, c_void};

use parking_lot::RwLock;
use tracing::{error, warn};
use volley_device::StreamHandle;

use crate::dispatcher::Dispatcher;
use crate::registry::CallToken;

/// Records a failure on the host's status object.
///
/// `message` points to `len` bytes of UTF-8 that are only valid for the
/// duration of the call; it is not NUL-terminated.
pub type SetFailureFn = unsafe extern "C" fn(status: *mut c_void, message: *const c_char, len: usize);

/// Signature of [`volley_launch_kernel`].
pub type LaunchFn = unsafe extern "C" fn(*mut c_void, *const *mut c_void, *const c_char, usize, *mut c_void);

static SET_FAILURE: RwLock<Option<SetFailureFn>> = RwLock::new(None);

/// Install (or clear, with null) the callback that reports launch failures.
#[unsafe(no_mangle)]
pub extern "C" fn volley_set_status_callback(callback: Option<SetFailureFn>) {
    *SET_FAILURE.write() = callback;
}

/// Launch the registered call named by the 8-byte `opaque` descriptor.
///
/// Aborts the process if `opaque_len` is not 8. Every other failure is
/// reported through the status callback and leaves `status` untouched on
/// success.
///
/// # Safety
///
/// `opaque` must point to `opaque_len` readable bytes, `buffers` to the call's
/// buffer addresses, and `status` must be null or valid for the registered
/// status callback.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn volley_launch_kernel(
    stream: *mut c_void,
    buffers: *const *mut c_void,
    opaque: *const c_char,
    opaque_len: usize,
    status: *mut c_void,
) {
    assert_eq!(opaque_len, CallToken::DESCRIPTOR_LEN, "kernel call descriptor must be {} bytes", CallToken::DESCRIPTOR_LEN);
    let descriptor = unsafe { std::slice::from_raw_parts(opaque.cast::<u8>(), opaque_len) };

    let result = Dispatcher::global()
        .and_then(|dispatcher| unsafe { dispatcher.launch_raw(StreamHandle::from_raw(stream), buffers, descriptor) });

    if let Err(e) = result {
        let message = e.to_string();
        error!(%message, "kernel launch failed");
        unsafe { report_failure(status, &message) };
    }
}

unsafe fn report_failure(status: *mut c_void, message: &str) {
    if status.is_null() {
        return;
    }
    let Some(set_failure) = *SET_FAILURE.read() else {
        warn!("no status callback registered, launch failure not reported to the caller");
        return;
    };
    unsafe { set_failure(status, message.as_ptr().cast(), message.len()) };
}

/// The entry point as a registrable function pointer.
pub fn custom_call_target() -> LaunchFn {
    volley_launch_kernel
}
