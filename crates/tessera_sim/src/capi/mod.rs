//! Exported C entry points.
//!
//! Every pointer handed out is a registry id, never an address. Calls made
//! under a context record their failure on it; the config family reports
//! through an error out-parameter instead.

pub mod array;
pub mod config;
pub mod query;
pub mod schema;
pub mod vfs;
