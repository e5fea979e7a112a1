//! Error types and the native error boundary.

use crate::handle::Handle;
use crate::resource;
use crate::runtime::Runtime;
use crate::types::IncompleteReason;
use std::ffi::CStr;
use std::io;
use std::ptr;
use std::sync::Arc;
use tessera_sys::{capi_return_t, tessera_ctx_t, tessera_error_t, TESSERA_OK, TESSERA_OOM};
use thiserror::Error;

/// Result type for layer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the safe layer.
#[derive(Debug, Error)]
pub enum Error {
    /// The engine refused to allocate a resource.
    #[error("failed to allocate {kind}: {message}")]
    Allocation {
        /// Resource kind.
        kind: &'static str,
        /// Engine message.
        message: String,
    },

    /// A native call returned a non-zero status.
    #[error("native error (status {code}): {message}")]
    Native {
        /// Status code returned by the call.
        code: capi_return_t,
        /// Message taken from the engine's error object.
        message: String,
    },

    /// Text or buffer could not be converted for the engine.
    #[error("marshal error: {message}")]
    Marshal {
        /// Description of the problem.
        message: String,
    },

    /// A buffer does not match the declared shape of its field.
    #[error("schema mismatch on field '{field}': expected {expected}, got {actual}")]
    SchemaMismatch {
        /// Field name.
        field: String,
        /// What the schema declares.
        expected: String,
        /// What the caller supplied.
        actual: String,
    },

    /// The layer was used in a way its state does not allow.
    #[error("invalid usage: {message}")]
    Usage {
        /// Description of the misuse.
        message: String,
    },

    /// The handle was already released.
    #[error("{kind} handle already released")]
    Released {
        /// Resource kind.
        kind: &'static str,
    },

    /// The engine reported a failed query.
    #[error("query failed: {message}")]
    QueryFailed {
        /// Engine message, if any.
        message: String,
    },

    /// The query kept returning no cells without asking for bigger buffers.
    #[error("query stalled for {rounds} consecutive rounds (reason: {reason})")]
    Stalled {
        /// Consecutive rounds without progress.
        rounds: u32,
        /// Last incomplete reason reported.
        reason: IncompleteReason,
    },

    /// The query went too many rounds without delivering a cell.
    #[error("query delivered no cells in {rounds} rounds")]
    RoundLimit {
        /// Rounds submitted without delivering a cell.
        rounds: u32,
    },

    /// The native library is unavailable or not initialized.
    #[error("runtime error: {message}")]
    Runtime {
        /// Description of the problem.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Creates a usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Creates a marshal error.
    pub fn marshal(message: impl Into<String>) -> Self {
        Self::Marshal {
            message: message.into(),
        }
    }

    /// Creates a runtime error.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    /// Returns the native status code, if this error came from the engine.
    pub fn native_code(&self) -> Option<capi_return_t> {
        match self {
            Self::Native { code, .. } => Some(*code),
            _ => None,
        }
    }
}

const UNKNOWN: &str = "unknown native error";

/// Converts the status of a context-bound call into a `Result`.
///
/// A zero status consults nothing. Otherwise the context's last error is
/// fetched, its message copied and the error object freed.
pub(crate) fn check_ctx(
    runtime: &Arc<Runtime>,
    ctx: *mut tessera_ctx_t,
    rc: capi_return_t,
) -> Result<()> {
    if rc == TESSERA_OK {
        return Ok(());
    }
    let mut err: *mut tessera_error_t = ptr::null_mut();
    // SAFETY: ctx is held alive by the caller's guard.
    let got = unsafe { (runtime.api().tessera_ctx_get_last_error)(ctx, &mut err) };
    let message = if got == TESSERA_OK && !err.is_null() {
        take_message(runtime, err)
    } else {
        fallback_message(rc)
    };
    Err(Error::Native { code: rc, message })
}

/// Converts the status of a call that reports errors through an
/// out-parameter (the config family). The context is never consulted.
pub(crate) fn check_out_param(
    runtime: &Arc<Runtime>,
    rc: capi_return_t,
    err: *mut tessera_error_t,
) -> Result<()> {
    if rc == TESSERA_OK {
        if !err.is_null() {
            let _ = take_message(runtime, err);
        }
        return Ok(());
    }
    let message = if err.is_null() {
        fallback_message(rc)
    } else {
        take_message(runtime, err)
    };
    Err(Error::Native { code: rc, message })
}

/// Reads the message of an error object the engine handed over and frees it.
pub(crate) fn take_message(runtime: &Arc<Runtime>, err: *mut tessera_error_t) -> String {
    match Handle::<resource::Error>::adopt(runtime, (), err, true) {
        Ok(handle) => {
            let message = read_message(&handle).unwrap_or_else(|| UNKNOWN.to_owned());
            handle.release();
            message
        }
        Err(_) => UNKNOWN.to_owned(),
    }
}

pub(crate) fn read_message(handle: &Handle<resource::Error>) -> Option<String> {
    let guard = handle.acquire().ok()?;
    let mut msg = ptr::null();
    // SAFETY: the error object is alive while the guard is held.
    let rc = unsafe { (guard.api().tessera_error_message)(guard.as_ptr(), &mut msg) };
    if rc != TESSERA_OK || msg.is_null() {
        return None;
    }
    // SAFETY: the engine returns a null-terminated string owned by the error object.
    Some(unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned())
}

fn fallback_message(rc: capi_return_t) -> String {
    if rc == TESSERA_OOM {
        "out of memory".to_owned()
    } else {
        UNKNOWN.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::SchemaMismatch {
            field: "a1".into(),
            expected: "INT32 (4 bytes)".into(),
            actual: "8 bytes".into(),
        };
        assert_eq!(
            err.to_string(),
            "schema mismatch on field 'a1': expected INT32 (4 bytes), got 8 bytes"
        );

        let err = Error::Released { kind: "query" };
        assert_eq!(err.to_string(), "query handle already released");
    }

    #[test]
    fn native_code() {
        let err = Error::Native {
            code: -1,
            message: "boom".into(),
        };
        assert_eq!(err.native_code(), Some(-1));
        assert_eq!(Error::usage("x").native_code(), None);
    }

    #[test]
    fn stalled_mentions_reason() {
        let err = Error::Stalled {
            rounds: 3,
            reason: IncompleteReason::MemoryBudget,
        };
        assert!(err.to_string().contains("memory budget"));
    }

    #[test]
    fn oom_fallback() {
        assert_eq!(fallback_message(TESSERA_OOM), "out of memory");
        assert_eq!(fallback_message(-1), UNKNOWN);
    }
}
