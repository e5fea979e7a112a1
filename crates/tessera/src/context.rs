//! The engine context, root of the ownership tree.

use crate::config::Config;
use crate::error::{check_ctx, read_message, Result};
use crate::handle::{Guard, Handle, OwnedGuard};
use crate::resource;
use crate::runtime::{self, Runtime};
use std::ptr;
use std::sync::Arc;
use tessera_sys::{capi_return_t, TESSERA_OK};

/// Engine context.
///
/// Every other resource except configs and errors is created under a
/// context and keeps it alive.
#[derive(Debug, Clone)]
pub struct Context {
    handle: Handle<resource::Context>,
}

impl Context {
    /// Creates a context with default settings in the process-wide runtime.
    pub fn new() -> Result<Self> {
        Self::in_runtime(&runtime::current()?)
    }

    /// Creates a context with default settings in `runtime`.
    pub fn in_runtime(runtime: &Arc<Runtime>) -> Result<Self> {
        let handle = Handle::<resource::Context>::create(runtime, None, |_, out| {
            // SAFETY: a null config selects the defaults.
            let rc = unsafe { (runtime.api().tessera_ctx_alloc)(ptr::null_mut(), out) };
            alloc_status(rc)
        })?;
        Ok(Self { handle })
    }

    /// Creates a context from `config`; the context keeps the config alive.
    pub fn with_config(config: &Config) -> Result<Self> {
        let parent = config.handle().acquire_owned()?;
        let runtime = Arc::clone(parent.runtime());
        let handle = Handle::<resource::Context>::create(&runtime, Some(parent), |parent, out| {
            let config = parent.as_ref().map_or(ptr::null_mut(), OwnedGuard::as_ptr);
            // SAFETY: the config is held by the parent guard.
            let rc = unsafe { (runtime.api().tessera_ctx_alloc)(config, out) };
            alloc_status(rc)
        })?;
        Ok(Self { handle })
    }

    /// Returns a copy of the settings in effect.
    pub fn config(&self) -> Result<Config> {
        let ctx = self.guard()?;
        let mut raw = ptr::null_mut();
        // SAFETY: ctx is held by the guard.
        ctx.check(unsafe { (ctx.api().tessera_ctx_get_config)(ctx.as_ptr(), &mut raw) })?;
        let handle = Handle::adopt(ctx.runtime(), (), raw, true)?;
        Ok(Config::from_handle(handle))
    }

    /// Returns the last error recorded on this context, if any.
    pub fn last_error(&self) -> Result<Option<NativeError>> {
        let ctx = self.guard()?;
        let mut raw = ptr::null_mut();
        // SAFETY: ctx is held by the guard.
        ctx.check(unsafe { (ctx.api().tessera_ctx_get_last_error)(ctx.as_ptr(), &mut raw) })?;
        if raw.is_null() {
            return Ok(None);
        }
        let handle = Handle::adopt(ctx.runtime(), (), raw, true)?;
        Ok(Some(NativeError { handle }))
    }

    /// Asks the engine to cancel every running task of this context.
    pub fn cancel_tasks(&self) -> Result<()> {
        let ctx = self.guard()?;
        // SAFETY: ctx is held by the guard.
        ctx.check(unsafe { (ctx.api().tessera_ctx_cancel_tasks)(ctx.as_ptr()) })
    }

    /// Runtime the context lives in.
    pub fn runtime(&self) -> &Arc<Runtime> {
        self.handle.runtime()
    }

    /// The underlying handle.
    pub fn handle(&self) -> &Handle<resource::Context> {
        &self.handle
    }

    pub(crate) fn guard(&self) -> Result<Guard<'_, resource::Context>> {
        self.handle.acquire()
    }

    pub(crate) fn owned(&self) -> Result<OwnedGuard<resource::Context>> {
        self.handle.acquire_owned()
    }
}

fn alloc_status(rc: capi_return_t) -> Result<()> {
    if rc == TESSERA_OK {
        Ok(())
    } else {
        Err(crate::Error::Allocation {
            kind: "context",
            message: format!("engine returned status {rc}"),
        })
    }
}

impl Guard<'_, resource::Context> {
    /// Converts the status of a call made under this context.
    pub fn check(&self, rc: capi_return_t) -> Result<()> {
        check_ctx(self.runtime(), self.as_ptr(), rc)
    }
}

impl OwnedGuard<resource::Context> {
    /// Converts the status of a call made under this context.
    pub fn check(&self, rc: capi_return_t) -> Result<()> {
        check_ctx(self.runtime(), self.as_ptr(), rc)
    }
}

/// An error object taken from a context.
#[derive(Debug)]
pub struct NativeError {
    handle: Handle<resource::Error>,
}

impl NativeError {
    /// The error message.
    pub fn message(&self) -> String {
        read_message(&self.handle).unwrap_or_default()
    }

    /// The underlying handle.
    pub fn handle(&self) -> &Handle<resource::Error> {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::runtime;
    use crate::Error;

    #[test]
    fn context_keeps_config_alive() {
        let config = Config::in_runtime(&runtime()).unwrap();
        config.set("sm.tile_cache_size", "64").unwrap();
        let config_ptr = config.handle().acquire().unwrap().as_ptr() as usize;

        let ctx = Context::with_config(&config).unwrap();
        config.handle().release();
        assert!(tessera_sim::is_live(config_ptr));

        let copy = ctx.config().unwrap();
        assert_eq!(copy.get("sm.tile_cache_size").unwrap().as_deref(), Some("64"));

        let ctx_ptr = ctx.handle().acquire().unwrap().as_ptr() as usize;
        drop(ctx);
        assert_eq!(tessera_sim::free_count(ctx_ptr), 1);
        assert_eq!(tessera_sim::free_count(config_ptr), 1);
        assert!(tessera_sim::freed_before(ctx_ptr, config_ptr));
    }

    #[test]
    fn last_error_after_failure() {
        let ctx = Context::in_runtime(&runtime()).unwrap();
        assert!(ctx.last_error().unwrap().is_none());

        let err = crate::Array::new(&ctx, "sim://missing-array-for-last-error")
            .and_then(|a| a.open(crate::QueryType::Read))
            .unwrap_err();
        assert!(matches!(err, Error::Native { .. }));

        let last = ctx.last_error().unwrap().expect("error recorded");
        assert!(last.message().contains("does not exist"), "{}", last.message());
    }

    #[test]
    fn cancel_tasks() {
        let ctx = Context::in_runtime(&runtime()).unwrap();
        ctx.cancel_tasks().unwrap();
    }

    #[test]
    fn released_context_refuses_use() {
        let ctx = Context::in_runtime(&runtime()).unwrap();
        ctx.handle().release();
        assert!(matches!(ctx.cancel_tasks(), Err(Error::Released { kind: "context" })));
    }
}
