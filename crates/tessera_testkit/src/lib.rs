//! # Tessera Testkit
//!
//! Test utilities for the Tessera safe layer.
//!
//! This crate provides:
//! - Fixtures that create arrays in the in-process engine
//! - Property-based generators for variable-length and nullable cells
//! - Stress helpers that churn handles from several threads
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tessera_testkit::prelude::*;
//!
//! #[test]
//! fn reads_back() {
//!     let array = TestArray::var_sized(Some(3));
//!     array.write_var(&[(1, vec![1], None)]);
//!     let query = array.read_query();
//!     // ...
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;

use tracing_subscriber::EnvFilter;

/// Installs a test subscriber filtered by `RUST_LOG` (default `warn`).
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
