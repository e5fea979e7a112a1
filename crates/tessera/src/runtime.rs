//! Process-wide resolution of the engine library.
//!
//! Nothing is loaded implicitly. A process calls [`init`] (or
//! [`init_from_env`]) once; resource constructors that are not given a
//! runtime explicitly use [`current`]. Every handle keeps its own reference
//! to the runtime it was created in, so [`shutdown`] never invalidates live
//! handles; the library is unloaded when the last of them drops.

use crate::error::{Error, Result};
use libloading::Library;
use parking_lot::Mutex;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tessera_sys::Api;
use tracing::debug;

/// Environment variable naming the engine library for [`init_from_env`].
pub const LIBRARY_PATH_ENV: &str = "TESSERA_LIBRARY_PATH";

static CURRENT: Mutex<Option<Arc<Runtime>>> = parking_lot::const_mutex(None);

/// A resolved engine: its entry points and the library that provides them.
pub struct Runtime {
    api: Api,
    origin: String,
    // Dropped last; `api` points into it.
    _lib: Option<Library>,
}

impl Runtime {
    /// Opens the dynamic library at `path` and resolves every entry point.
    pub fn load(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let path = path.as_ref();
        // SAFETY: the library is trusted to be a build of the engine; the
        // table is stored next to the library and never outlives it.
        let (lib, api) = unsafe { tessera_sys::open_library(path) }
            .map_err(|e| Error::runtime(e.to_string()))?;
        debug!(path = %path.display(), "loaded native engine");
        Ok(Arc::new(Self {
            api,
            origin: path.display().to_string(),
            _lib: Some(lib),
        }))
    }

    /// Wraps an already-resolved table, e.g. an engine linked into the process.
    pub fn from_api(api: Api) -> Arc<Self> {
        Arc::new(Self {
            api,
            origin: "in-process".to_owned(),
            _lib: None,
        })
    }

    /// Entry points.
    pub fn api(&self) -> &Api {
        &self.api
    }

    /// Where the entry points came from.
    pub fn origin(&self) -> &str {
        &self.origin
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// Installs `runtime` as the process-wide runtime.
///
/// Fails if one is already installed; call [`shutdown`] first to replace it.
pub fn init(runtime: Arc<Runtime>) -> Result<()> {
    let mut current = CURRENT.lock();
    if let Some(existing) = current.as_ref() {
        return Err(Error::runtime(format!(
            "already initialized from {}",
            existing.origin()
        )));
    }
    debug!(origin = runtime.origin(), "runtime initialized");
    *current = Some(runtime);
    Ok(())
}

/// Loads the library named by `TESSERA_LIBRARY_PATH` and installs it.
pub fn init_from_env() -> Result<Arc<Runtime>> {
    let path = std::env::var_os(LIBRARY_PATH_ENV)
        .ok_or_else(|| Error::runtime(format!("{LIBRARY_PATH_ENV} is not set")))?;
    let runtime = Runtime::load(path)?;
    init(Arc::clone(&runtime))?;
    Ok(runtime)
}

/// Returns the installed runtime.
pub fn current() -> Result<Arc<Runtime>> {
    CURRENT
        .lock()
        .clone()
        .ok_or_else(|| Error::runtime("not initialized"))
}

/// Uninstalls the process-wide runtime and returns it.
pub fn shutdown() -> Option<Arc<Runtime>> {
    let previous = CURRENT.lock().take();
    if previous.is_some() {
        debug!("runtime shut down");
    }
    previous
}
