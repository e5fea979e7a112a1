//! # Tessera
//!
//! Safe Rust layer over the C surface of the Tessera array engine.
//!
//! This crate provides:
//! - [`Handle`], single ownership of every native resource with children
//!   released before their parents
//! - [`Guard`]s that keep a handle alive across a native call
//! - typed wrappers for contexts, schemas, arrays, queries, groups and the VFS
//! - a per-query buffer [`Registry`] and the [`IncompleteDriver`] that grows
//!   buffers until a read completes
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tessera::prelude::*;
//!
//! tessera::runtime::init_from_env()?;
//! let ctx = Context::new()?;
//! let array = Array::new(&ctx, "mem://points")?;
//! array.open(QueryType::Read)?;
//!
//! let query = Query::new(&array, QueryType::Read)?;
//! query.set_data_buffer("a", vec![0i32; 1024])?;
//! IncompleteDriver::new(&query).run(|batch| {
//!     println!("{} cells", batch.cell_count());
//!     Ok(())
//! })?;
//! ```

pub mod array;
pub mod attribute;
pub mod buffers;
pub mod channel;
pub mod condition;
pub mod config;
pub mod context;
pub mod datatype;
pub mod domain;
pub mod driver;
pub mod enumeration;
pub mod error;
pub mod filter;
pub mod fragment_info;
pub mod group;
pub mod handle;
pub mod marshal;
pub mod query;
pub mod resource;
pub mod runtime;
pub mod schema;
pub mod subarray;
pub mod types;
pub mod vfs;

pub use array::Array;
pub use attribute::Attribute;
pub use buffers::{Batch, BufferPart, FieldResult, FieldSpec, Registry, ResultCounts};
pub use channel::{ChannelOperation, QueryChannel, QueryField};
pub use condition::QueryCondition;
pub use config::Config;
pub use context::{Context, NativeError};
pub use datatype::{CellValNum, Datatype, Element};
pub use domain::{Dimension, Domain};
pub use driver::{DriveSummary, DriverOptions, Doubling, IncompleteDriver, Progress, Resize, ResizePolicy};
pub use enumeration::Enumeration;
pub use error::{Error, Result};
pub use filter::{Filter, FilterList};
pub use fragment_info::FragmentInfo;
pub use group::Group;
pub use handle::{Guard, Handle, OwnedGuard};
pub use query::{Query, ResultSize};
pub use runtime::Runtime;
pub use schema::{ArraySchema, ArraySchemaEvolution};
pub use subarray::Subarray;
pub use types::{
    AggregateOp, ArrayType, CombinationOp, ConditionOp, FilterOption, FilterType, IncompleteReason, Layout,
    QueryStatus, QueryType, VfsMode,
};
pub use vfs::{Vfs, VfsFile};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        Array, ArraySchema, ArrayType, Attribute, Batch, BufferPart, CellValNum, Config, Context, Datatype,
        Dimension, Domain, Error, IncompleteDriver, IncompleteReason, Layout, Progress, Query, QueryCondition,
        QueryStatus, QueryType, Result, Subarray,
    };
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, OnceLock};

    pub(crate) fn runtime() -> Arc<Runtime> {
        static RUNTIME: OnceLock<Arc<Runtime>> = OnceLock::new();
        Arc::clone(RUNTIME.get_or_init(|| Runtime::from_api(tessera_sim::api())))
    }

    pub(crate) fn ctx() -> Context {
        Context::in_runtime(&runtime()).unwrap()
    }

    pub(crate) fn unique_uri(prefix: &str) -> String {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        format!("sim://{prefix}-{}", NEXT.fetch_add(1, Ordering::Relaxed))
    }

    fn rows_domain(ctx: &Context) -> Domain {
        let domain = Domain::new(ctx).unwrap();
        domain
            .add_dimension(&Dimension::new(ctx, "rows", [1i32, 2000], 10).unwrap())
            .unwrap();
        domain
    }

    /// Sparse: dimension `rows` (i32, 1..=2000) and attribute `a` (i32).
    pub(crate) fn int_schema(ctx: &Context) -> ArraySchema {
        let schema = ArraySchema::new(ctx, ArrayType::Sparse).unwrap();
        schema.set_domain(&rows_domain(ctx)).unwrap();
        schema
            .add_attribute(&Attribute::new(ctx, "a", Datatype::Int32).unwrap())
            .unwrap();
        schema
    }

    pub(crate) fn create_int_array(ctx: &Context, uri: &str) {
        Array::create(ctx, uri, &int_schema(ctx)).unwrap();
    }

    /// Sparse: `rows`, var-sized `a1` (i32) and nullable `n` (i32).
    pub(crate) fn create_var_array(ctx: &Context, uri: &str) {
        let schema = ArraySchema::new(ctx, ArrayType::Sparse).unwrap();
        schema.set_domain(&rows_domain(ctx)).unwrap();
        let a1 = Attribute::new(ctx, "a1", Datatype::Int32).unwrap();
        a1.set_var_sized().unwrap();
        schema.add_attribute(&a1).unwrap();
        let n = Attribute::new(ctx, "n", Datatype::Int32).unwrap();
        n.set_nullable(true).unwrap();
        schema.add_attribute(&n).unwrap();
        Array::create(ctx, uri, &schema).unwrap();
    }

    pub(crate) fn open(ctx: &Context, uri: &str, query_type: QueryType) -> Array {
        let array = Array::new(ctx, uri).unwrap();
        array.open(query_type).unwrap();
        array
    }

    pub(crate) fn write_int_cells(ctx: &Context, uri: &str, rows: &[i32], values: &[i32]) {
        let array = open(ctx, uri, QueryType::Write);
        let query = Query::new(&array, QueryType::Write).unwrap();
        query.set_data_buffer("rows", rows.to_vec()).unwrap();
        query.set_data_buffer("a", values.to_vec()).unwrap();
        assert_eq!(query.submit().unwrap(), QueryStatus::Completed);
        array.close().unwrap();
    }

    pub(crate) fn write_var_cells(ctx: &Context, uri: &str, cells: &[(i32, Vec<i32>, Option<i32>)]) {
        let mut rows = Vec::new();
        let mut data = Vec::new();
        let mut offsets = Vec::new();
        let mut n = Vec::new();
        let mut validity = Vec::new();
        for (row, values, nullable) in cells {
            rows.push(*row);
            offsets.push((data.len() * std::mem::size_of::<i32>()) as u64);
            data.extend_from_slice(values);
            n.push(nullable.unwrap_or(0));
            validity.push(u8::from(nullable.is_some()));
        }

        let array = open(ctx, uri, QueryType::Write);
        let query = Query::new(&array, QueryType::Write).unwrap();
        query.set_data_buffer("rows", rows).unwrap();
        query.set_data_buffer("a1", data).unwrap();
        query.set_offsets_buffer("a1", offsets).unwrap();
        query.set_data_buffer("n", n).unwrap();
        query.set_validity_buffer("n", validity).unwrap();
        assert_eq!(query.submit().unwrap(), QueryStatus::Completed);
        array.close().unwrap();
    }
}
