//! Engine configuration.
//!
//! Config calls report errors through an out-parameter error object rather
//! than through a context.

use crate::error::{check_out_param, Error, Result};
use crate::handle::Handle;
use crate::marshal::{text_from_ptr, CText};
use crate::resource;
use crate::runtime::{self, Runtime};
use serde_json::Value;
use std::collections::BTreeMap;
use std::ptr;
use std::sync::Arc;

/// A set of engine settings.
#[derive(Debug, Clone)]
pub struct Config {
    handle: Handle<resource::Config>,
}

impl Config {
    /// Creates an empty config in the process-wide runtime.
    pub fn new() -> Result<Self> {
        Self::in_runtime(&runtime::current()?)
    }

    /// Creates an empty config in `runtime`.
    pub fn in_runtime(runtime: &Arc<Runtime>) -> Result<Self> {
        let handle = Handle::<resource::Config>::create(runtime, (), |_, out| {
            let mut err = ptr::null_mut();
            // SAFETY: out and err are valid out-parameters.
            let rc = unsafe { (runtime.api().tessera_config_alloc)(out, &mut err) };
            check_out_param(runtime, rc, err)
        })?;
        Ok(Self { handle })
    }

    /// Creates a config from a flat JSON object.
    ///
    /// Values may be strings, numbers or booleans; they are passed to the
    /// engine as their text.
    pub fn from_json(runtime: &Arc<Runtime>, json: &str) -> Result<Self> {
        let settings: BTreeMap<String, Value> = serde_json::from_str(json)
            .map_err(|e| Error::marshal(format!("invalid config JSON: {e}")))?;
        let config = Self::in_runtime(runtime)?;
        for (key, value) in settings {
            let text = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(Error::marshal(format!(
                        "config value for '{key}' must be a scalar, got {other}"
                    )))
                }
            };
            config.set(&key, &text)?;
        }
        Ok(config)
    }

    pub(crate) fn from_handle(handle: Handle<resource::Config>) -> Self {
        Self { handle }
    }

    /// Sets `param` to `value`.
    pub fn set(&self, param: &str, value: &str) -> Result<()> {
        let param = CText::ascii(param)?;
        let value = CText::utf8(value)?;
        let guard = self.handle.acquire()?;
        let mut err = ptr::null_mut();
        // SAFETY: the config is held by the guard and both strings outlive the call.
        let rc = unsafe {
            (guard.api().tessera_config_set)(guard.as_ptr(), param.as_ptr(), value.as_ptr(), &mut err)
        };
        check_out_param(guard.runtime(), rc, err)
    }

    /// Returns the value of `param`, or `None` when it is not set.
    pub fn get(&self, param: &str) -> Result<Option<String>> {
        let param = CText::ascii(param)?;
        let guard = self.handle.acquire()?;
        let mut value = ptr::null();
        let mut err = ptr::null_mut();
        // SAFETY: see `set`.
        let rc = unsafe {
            (guard.api().tessera_config_get)(guard.as_ptr(), param.as_ptr(), &mut value, &mut err)
        };
        check_out_param(guard.runtime(), rc, err)?;
        if value.is_null() {
            return Ok(None);
        }
        // SAFETY: the value is owned by the config, which the guard keeps alive.
        unsafe { text_from_ptr(value) }.map(Some)
    }

    /// Removes `param`.
    pub fn unset(&self, param: &str) -> Result<()> {
        let param = CText::ascii(param)?;
        let guard = self.handle.acquire()?;
        let mut err = ptr::null_mut();
        // SAFETY: see `set`.
        let rc = unsafe { (guard.api().tessera_config_unset)(guard.as_ptr(), param.as_ptr(), &mut err) };
        check_out_param(guard.runtime(), rc, err)
    }

    /// The underlying handle.
    pub fn handle(&self) -> &Handle<resource::Config> {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::runtime;

    #[test]
    fn set_get_unset() {
        let config = Config::in_runtime(&runtime()).unwrap();
        assert_eq!(config.get("sm.tile_cache_size").unwrap(), None);

        config.set("sm.tile_cache_size", "1024").unwrap();
        assert_eq!(config.get("sm.tile_cache_size").unwrap().as_deref(), Some("1024"));

        config.unset("sm.tile_cache_size").unwrap();
        assert_eq!(config.get("sm.tile_cache_size").unwrap(), None);
    }

    #[test]
    fn errors_come_from_out_parameter() {
        let config = Config::in_runtime(&runtime()).unwrap();
        let err = config.set("sim.memory_budget_stall_rounds", "many").unwrap_err();
        match err {
            Error::Native { code, message } => {
                assert_eq!(code, tessera_sys::TESSERA_ERR);
                assert!(message.contains("sim.memory_budget_stall_rounds"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn non_ascii_key_is_marshal_error() {
        let config = Config::in_runtime(&runtime()).unwrap();
        assert!(matches!(config.set("größe", "1"), Err(Error::Marshal { .. })));
    }

    #[test]
    fn from_json() {
        let config = Config::from_json(
            &runtime(),
            r#"{"sm.compute_concurrency_level": 4, "vfs.verbose": true, "rest.server": "local"}"#,
        )
        .unwrap();
        assert_eq!(config.get("sm.compute_concurrency_level").unwrap().as_deref(), Some("4"));
        assert_eq!(config.get("vfs.verbose").unwrap().as_deref(), Some("true"));
        assert_eq!(config.get("rest.server").unwrap().as_deref(), Some("local"));

        let err = Config::from_json(&runtime(), r#"{"nested": {"a": 1}}"#).unwrap_err();
        assert!(matches!(err, Error::Marshal { .. }));
    }
}
