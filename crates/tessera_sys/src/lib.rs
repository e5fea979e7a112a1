//! # Tessera sys
//!
//! Raw C surface of the Tessera array engine.
//!
//! This crate provides:
//! - `#[repr(C)]` opaque resource types and the status/enum constants
//! - [`Api`], the table of `extern "C"` entry points
//! - [`open_library`], resolving that table from a dynamic library
//!
//! Nothing here is safe to call directly; the `tessera` crate wraps it.

pub mod api;
pub mod types;

pub use api::Api;
pub use types::*;

use libloading::Library;
use std::ffi::OsStr;
use thiserror::Error;

/// Errors raised while resolving the engine library.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The dynamic library could not be opened.
    #[error("failed to open native library '{path}': {source}")]
    Open {
        /// Path that was tried.
        path: String,
        /// Loader error.
        #[source]
        source: libloading::Error,
    },

    /// A required entry point is not exported by the library.
    #[error("missing native symbol '{symbol}': {source}")]
    MissingSymbol {
        /// Name of the symbol.
        symbol: &'static str,
        /// Loader error.
        #[source]
        source: libloading::Error,
    },
}

/// Opens the engine library at `path` and resolves every entry point.
///
/// # Safety
///
/// Loading a library runs its initialization routines. The library must be a
/// build of the engine matching the signatures of [`Api`]. The returned table
/// must not be used after the returned [`Library`] is dropped.
pub unsafe fn open_library(path: impl AsRef<OsStr>) -> Result<(Library, Api), LoadError> {
    let path = path.as_ref();
    let lib = Library::new(path).map_err(|source| LoadError::Open {
        path: path.to_string_lossy().into_owned(),
        source,
    })?;
    let api = Api::load(&lib)?;
    Ok((lib, api))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_missing_library_reports_path() {
        let err = unsafe { open_library("/nonexistent/libtessera.so") }.unwrap_err();
        match &err {
            LoadError::Open { path, .. } => assert_eq!(path, "/nonexistent/libtessera.so"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("libtessera.so"));
    }

    #[test]
    fn status_constants() {
        assert_eq!(TESSERA_OK, 0);
        assert_eq!(TESSERA_ERR, -1);
        assert_eq!(TESSERA_OOM, -2);
    }
}
