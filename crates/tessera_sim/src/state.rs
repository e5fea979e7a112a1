//! Process-wide engine state and the plumbing shared by every entry point.

use crate::error::{SimError, SimResult};
use crate::model::{ContextObj, ErrorObj};
use crate::registry::{Kind, Registry};
use crate::storage::Storage;
use parking_lot::{const_mutex, Mutex};
use std::ffi::{c_char, CStr, CString};
use tessera_sys::{capi_return_t, tessera_ctx_t, tessera_error_t, TESSERA_ERR, TESSERA_OK, TESSERA_OOM};
use tracing::debug;

/// Context setting naming an object kind whose allocation fails.
pub(crate) const FAIL_ALLOC: &str = "sim.fail_alloc";
/// Context setting: read submissions that stall on the memory budget before
/// any data is returned.
pub(crate) const STALL_ROUNDS: &str = "sim.memory_budget_stall_rounds";

pub(crate) struct Sim {
    pub(crate) objects: Registry,
    pub(crate) storage: Storage,
}

impl Sim {
    const fn new() -> Self {
        Self {
            objects: Registry::new(),
            storage: Storage::new(),
        }
    }

    /// Registers `value` under `ctx`, unless the context asks for this kind
    /// of allocation to fail.
    pub(crate) fn alloc<T: Kind>(&mut self, ctx: usize, value: T, parents: &[usize]) -> SimResult<usize> {
        let fail = self.objects.get::<ContextObj>(ctx)?.setting(FAIL_ALLOC) == Some(T::NAME);
        if fail {
            return Err(SimError::AllocFailed(T::NAME));
        }
        let mut all = Vec::with_capacity(parents.len() + 1);
        all.push(ctx);
        all.extend_from_slice(parents);
        Ok(self.objects.insert(value, &all))
    }
}

pub(crate) static SIM: Mutex<Sim> = const_mutex(Sim::new());

/// The registry id a pointer stands for.
pub(crate) fn id<T>(ptr: *const T, what: &'static str) -> SimResult<usize> {
    if ptr.is_null() {
        return Err(SimError::Null(what));
    }
    Ok(ptr as usize)
}

/// Writes the pointer form of `id` to `out`.
///
/// # Safety
///
/// `out` must be null or writable.
pub(crate) unsafe fn put<T>(out: *mut *mut T, id: usize) -> SimResult<()> {
    if out.is_null() {
        return Err(SimError::Null("output"));
    }
    *out = id as *mut T;
    Ok(())
}

/// Writes `value` to a plain out-parameter.
///
/// # Safety
///
/// `out` must be null or writable.
pub(crate) unsafe fn write<T>(out: *mut T, value: T) -> SimResult<()> {
    if out.is_null() {
        return Err(SimError::Null("output"));
    }
    *out = value;
    Ok(())
}

/// Reads a NUL-terminated UTF-8 argument.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string.
pub(crate) unsafe fn text(ptr: *const c_char, what: &'static str) -> SimResult<String> {
    if ptr.is_null() {
        return Err(SimError::Null(what));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map(str::to_owned)
        .map_err(|_| SimError::invalid(format!("{what} is not valid UTF-8")))
}

/// Like [`text`], with null meaning "absent".
pub(crate) unsafe fn optional_text(ptr: *const c_char, what: &'static str) -> SimResult<Option<String>> {
    if ptr.is_null() {
        return Ok(None);
    }
    text(ptr, what).map(Some)
}

fn code(err: &SimError) -> capi_return_t {
    match err {
        SimError::AllocFailed(_) => TESSERA_OOM,
        _ => TESSERA_ERR,
    }
}

/// Runs `f` for a call made under `ctx`. A failure is recorded as the
/// context's last error.
pub(crate) fn ctx_call(
    ctx: *mut tessera_ctx_t,
    f: impl FnOnce(&mut Sim, usize) -> SimResult<()>,
) -> capi_return_t {
    let mut sim = SIM.lock();
    let ctx = match id(ctx, "context").and_then(|ctx| sim.objects.get::<ContextObj>(ctx).map(|_| ctx)) {
        Ok(ctx) => ctx,
        Err(err) => {
            debug!(%err, "call with unusable context");
            return TESSERA_ERR;
        }
    };
    match f(&mut sim, ctx) {
        Ok(()) => TESSERA_OK,
        Err(err) => {
            debug!(%err, "call failed");
            let rc = code(&err);
            if let Ok(context) = sim.objects.get_mut::<ContextObj>(ctx) {
                context.last_error = Some(err.to_string());
            }
            rc
        }
    }
}

/// Runs `f` for a call that reports failures through an error
/// out-parameter instead of a context.
///
/// # Safety
///
/// `error` must be null or writable.
pub(crate) unsafe fn out_param_call(
    error: *mut *mut tessera_error_t,
    f: impl FnOnce(&mut Sim) -> SimResult<()>,
) -> capi_return_t {
    let mut sim = SIM.lock();
    let outcome = f(&mut sim);
    if !error.is_null() {
        *error = std::ptr::null_mut();
    }
    match outcome {
        Ok(()) => TESSERA_OK,
        Err(err) => {
            debug!(%err, "call failed");
            if !error.is_null() {
                let message = CString::new(err.to_string().replace('\0', " ")).unwrap_or_default();
                *error = sim.objects.insert(ErrorObj { message }, &[]) as *mut tessera_error_t;
            }
            code(&err)
        }
    }
}

/// Frees the object `*slot` names and nulls the slot.
///
/// # Safety
///
/// `slot` must be null or writable.
pub(crate) unsafe fn free_slot<T>(slot: *mut *mut T) {
    if slot.is_null() || (*slot).is_null() {
        return;
    }
    SIM.lock().objects.free(*slot as usize);
    *slot = std::ptr::null_mut();
}

/// Borrows `len` caller bytes at `ptr`.
///
/// # Safety
///
/// `ptr` must be null or valid for `len` bytes for the returned lifetime.
pub(crate) unsafe fn raw_bytes<'a>(ptr: *const std::ffi::c_void, len: u64, what: &'static str) -> SimResult<&'a [u8]> {
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err(SimError::Null(what));
    }
    Ok(std::slice::from_raw_parts(ptr.cast::<u8>(), len as usize))
}
