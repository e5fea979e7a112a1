//! Errors, configs and contexts.

use crate::error::SimError;
use crate::model::{ConfigObj, ContextObj, ErrorObj};
use crate::state::{ctx_call, free_slot, id, out_param_call, put, text, write, FAIL_ALLOC, SIM, STALL_ROUNDS};
use std::ffi::{c_char, CString};
use std::ptr;
use tessera_sys::*;
use tracing::debug;

/// Returns the message of an error object.
///
/// # Arguments
///
/// * `err` - The error object
/// * `msg` - Output pointer for the message, valid until `err` is freed
///
/// # Safety
///
/// - `err` must come from this engine
/// - `msg` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_error_message(err: *mut tessera_error_t, msg: *mut *const c_char) -> capi_return_t {
    let mut sim = SIM.lock();
    let outcome = id(err, "error")
        .and_then(|err| sim.objects.get::<ErrorObj>(err).map(|e| e.message.as_ptr()))
        .and_then(|message| write(msg, message));
    match outcome {
        Ok(()) => TESSERA_OK,
        Err(err) => {
            debug!(%err, "error_message failed");
            TESSERA_ERR
        }
    }
}

/// Frees an error object and nulls `*err`.
///
/// # Safety
///
/// `err` must be null or a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_error_free(err: *mut *mut tessera_error_t) {
    free_slot(err);
}

/// Allocates an empty config.
///
/// # Arguments
///
/// * `config` - Output pointer for the config
/// * `error` - Output pointer for an error object, set on failure
///
/// # Returns
///
/// `TESSERA_OK` on success, an error code otherwise.
///
/// # Safety
///
/// Both pointers must be valid.
#[no_mangle]
pub unsafe extern "C" fn tessera_config_alloc(
    config: *mut *mut tessera_config_t,
    error: *mut *mut tessera_error_t,
) -> capi_return_t {
    out_param_call(error, |sim| {
        let id = sim.objects.insert(ConfigObj::default(), &[]);
        put(config, id)
    })
}

/// Frees a config and nulls `*config`.
///
/// # Safety
///
/// `config` must be null or a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_config_free(config: *mut *mut tessera_config_t) {
    free_slot(config);
}

fn validate_setting(param: &str, value: &str) -> Result<(), SimError> {
    if param == STALL_ROUNDS && value.parse::<u32>().is_err() {
        return Err(SimError::invalid(format!(
            "{STALL_ROUNDS} must be a non-negative integer, got '{value}'"
        )));
    }
    Ok(())
}

/// Sets `param` to `value`.
///
/// # Safety
///
/// - `param` and `value` must be valid null-terminated strings
/// - `error` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_config_set(
    config: *mut tessera_config_t,
    param: *const c_char,
    value: *const c_char,
    error: *mut *mut tessera_error_t,
) -> capi_return_t {
    out_param_call(error, |sim| {
        let param = text(param, "parameter")?;
        let value = text(value, "value")?;
        validate_setting(&param, &value)?;
        let value = CString::new(value).map_err(|_| SimError::invalid("value contains a NUL byte"))?;
        sim.objects
            .get_mut::<ConfigObj>(id(config, "config")?)?
            .settings
            .insert(param, value);
        Ok(())
    })
}

/// Looks up `param`; `*value` is null when it is not set.
///
/// The returned string is owned by the config.
///
/// # Safety
///
/// All pointers must be valid.
#[no_mangle]
pub unsafe extern "C" fn tessera_config_get(
    config: *mut tessera_config_t,
    param: *const c_char,
    value: *mut *const c_char,
    error: *mut *mut tessera_error_t,
) -> capi_return_t {
    out_param_call(error, |sim| {
        let param = text(param, "parameter")?;
        let config = sim.objects.get::<ConfigObj>(id(config, "config")?)?;
        let found = config.settings.get(&param).map_or(ptr::null(), |v| v.as_ptr());
        write(value, found)
    })
}

/// Removes `param`. Removing an unset parameter is not an error.
///
/// # Safety
///
/// All pointers must be valid.
#[no_mangle]
pub unsafe extern "C" fn tessera_config_unset(
    config: *mut tessera_config_t,
    param: *const c_char,
    error: *mut *mut tessera_error_t,
) -> capi_return_t {
    out_param_call(error, |sim| {
        let param = text(param, "parameter")?;
        sim.objects
            .get_mut::<ConfigObj>(id(config, "config")?)?
            .settings
            .remove(&param);
        Ok(())
    })
}

/// Allocates a context, copying the settings of `config` if one is given.
///
/// # Arguments
///
/// * `config` - Optional config; may be null
/// * `ctx` - Output pointer for the context
///
/// # Safety
///
/// `ctx` must be a valid pointer; `config` must be null or come from this engine.
#[no_mangle]
pub unsafe extern "C" fn tessera_ctx_alloc(config: *mut tessera_config_t, ctx: *mut *mut tessera_ctx_t) -> capi_return_t {
    let mut sim = SIM.lock();
    let outcome = (|| {
        let (settings, parents) = if config.is_null() {
            (Default::default(), Vec::new())
        } else {
            let config_id = config as usize;
            let settings = sim.objects.get::<ConfigObj>(config_id)?.settings.clone();
            (settings, vec![config_id])
        };
        let context = ContextObj {
            settings,
            last_error: None,
        };
        if context.setting(FAIL_ALLOC) == Some("context") {
            return Err(SimError::AllocFailed("context"));
        }
        let id = sim.objects.insert(context, &parents);
        put(ctx, id)
    })();
    match outcome {
        Ok(()) => TESSERA_OK,
        Err(err) => {
            debug!(%err, "ctx_alloc failed");
            TESSERA_ERR
        }
    }
}

/// Frees a context and nulls `*ctx`.
///
/// # Safety
///
/// `ctx` must be null or a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_ctx_free(ctx: *mut *mut tessera_ctx_t) {
    free_slot(ctx);
}

/// Returns a new error object holding the last failure recorded on `ctx`,
/// or null if nothing failed yet. The record itself is kept.
///
/// # Safety
///
/// `err` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_ctx_get_last_error(ctx: *mut tessera_ctx_t, err: *mut *mut tessera_error_t) -> capi_return_t {
    ctx_call(ctx, |sim, ctx| {
        let last = sim.objects.get::<ContextObj>(ctx)?.last_error.clone();
        let Some(message) = last else {
            return write(err, ptr::null_mut());
        };
        let message = CString::new(message.replace('\0', " ")).unwrap_or_default();
        let id = sim.objects.insert(ErrorObj { message }, &[ctx]);
        put(err, id)
    })
}

/// Returns a new config holding the settings of `ctx`.
///
/// # Safety
///
/// `config` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_ctx_get_config(ctx: *mut tessera_ctx_t, config: *mut *mut tessera_config_t) -> capi_return_t {
    ctx_call(ctx, |sim, ctx| {
        let settings = sim.objects.get::<ContextObj>(ctx)?.settings.clone();
        let id = sim.objects.insert(ConfigObj { settings }, &[]);
        put(config, id)
    })
}

/// Cancels outstanding asynchronous work. Submissions finish promptly in
/// this engine, so there is never anything to cancel.
///
/// # Safety
///
/// `ctx` must come from this engine.
#[no_mangle]
pub unsafe extern "C" fn tessera_ctx_cancel_tasks(ctx: *mut tessera_ctx_t) -> capi_return_t {
    ctx_call(ctx, |_, _| Ok(()))
}
