//! Test fixtures backed by the in-process engine.
//!
//! Every fixture runs against [`tessera_sim`], so tests need no native
//! library and can observe the engine's allocation ledger.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tempfile::TempDir;
use tessera::{
    Array, ArraySchema, ArrayType, Attribute, Config, Context, Datatype, Dimension, Domain, Query, QueryStatus,
    QueryType, Runtime, Vfs,
};

/// One cell of a variable-length fixture: row coordinate, the values of the
/// var-sized attribute `a1`, and the nullable attribute `n`.
pub type VarCell = (i32, Vec<i32>, Option<i32>);

/// Upper bound of the `rows` dimension in every fixture schema.
pub const MAX_ROW: i32 = 10_000;

/// Runtime bound to the in-process engine, shared by every fixture.
pub fn sim_runtime() -> Arc<Runtime> {
    static RUNTIME: OnceLock<Arc<Runtime>> = OnceLock::new();
    Arc::clone(RUNTIME.get_or_init(|| Runtime::from_api(tessera_sim::api())))
}

/// A context with default settings.
pub fn sim_context() -> Context {
    Context::in_runtime(&sim_runtime()).expect("Failed to allocate context")
}

/// A context created from a config holding `settings`.
pub fn sim_context_with(settings: &[(&str, &str)]) -> Context {
    let config = Config::in_runtime(&sim_runtime()).expect("Failed to allocate config");
    for (param, value) in settings {
        config.set(param, value).expect("Failed to set config parameter");
    }
    Context::with_config(&config).expect("Failed to allocate context")
}

/// A URI no other test uses.
pub fn unique_uri(prefix: &str) -> String {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    format!("sim://{prefix}-{}", NEXT.fetch_add(1, Ordering::Relaxed))
}

/// Address of the native object behind a handle, as the engine ledger keys it.
#[macro_export]
macro_rules! native_addr {
    ($wrapper:expr) => {
        $wrapper
            .handle()
            .acquire()
            .expect("handle already released")
            .as_ptr() as usize
    };
}

fn rows_domain(ctx: &Context) -> Domain {
    let domain = Domain::new(ctx).expect("Failed to allocate domain");
    let rows = Dimension::new(ctx, "rows", [1i32, MAX_ROW], 100).expect("Failed to allocate dimension");
    domain.add_dimension(&rows).expect("Failed to add dimension");
    domain
}

/// A sparse array created in the in-process engine.
#[derive(Debug)]
pub struct TestArray {
    ctx: Context,
    uri: String,
}

impl TestArray {
    /// Dimension `rows` (i32) and attribute `a` (i32).
    pub fn int(capacity: Option<u64>) -> Self {
        Self::int_in(sim_context(), capacity)
    }

    /// Like [`int`](Self::int), in an existing context.
    pub fn int_in(ctx: Context, capacity: Option<u64>) -> Self {
        let schema = ArraySchema::new(&ctx, ArrayType::Sparse).expect("Failed to allocate schema");
        schema.set_domain(&rows_domain(&ctx)).expect("Failed to set domain");
        let a = Attribute::new(&ctx, "a", Datatype::Int32).expect("Failed to allocate attribute");
        schema.add_attribute(&a).expect("Failed to add attribute");
        Self::create(ctx, "int", &schema, capacity)
    }

    /// Dimension `rows`, var-sized attribute `a1` (i32) and nullable
    /// attribute `n` (i32). A capacity groups that many cells per tile.
    pub fn var_sized(capacity: Option<u64>) -> Self {
        let ctx = sim_context();
        let schema = ArraySchema::new(&ctx, ArrayType::Sparse).expect("Failed to allocate schema");
        schema.set_domain(&rows_domain(&ctx)).expect("Failed to set domain");
        let a1 = Attribute::new(&ctx, "a1", Datatype::Int32).expect("Failed to allocate attribute");
        a1.set_var_sized().expect("Failed to make attribute var-sized");
        schema.add_attribute(&a1).expect("Failed to add attribute");
        let n = Attribute::new(&ctx, "n", Datatype::Int32).expect("Failed to allocate attribute");
        n.set_nullable(true).expect("Failed to make attribute nullable");
        schema.add_attribute(&n).expect("Failed to add attribute");
        Self::create(ctx, "var", &schema, capacity)
    }

    fn create(ctx: Context, prefix: &str, schema: &ArraySchema, capacity: Option<u64>) -> Self {
        if let Some(capacity) = capacity {
            schema.set_capacity(capacity).expect("Failed to set capacity");
        }
        let uri = unique_uri(prefix);
        Array::create(&ctx, &uri, schema).expect("Failed to create array");
        Self { ctx, uri }
    }

    /// Context the array was created in.
    pub fn ctx(&self) -> &Context {
        &self.ctx
    }

    /// Array URI.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Opens the array for `query_type`.
    pub fn open(&self, query_type: QueryType) -> Array {
        let array = Array::new(&self.ctx, &self.uri).expect("Failed to allocate array");
        array.open(query_type).expect("Failed to open array");
        array
    }

    /// A read query on a freshly opened array. The query keeps the array
    /// alive.
    pub fn read_query(&self) -> Query {
        let array = self.open(QueryType::Read);
        Query::new(&array, QueryType::Read).expect("Failed to allocate query")
    }

    /// Writes `values` of attribute `a` at `rows`.
    pub fn write_int(&self, rows: &[i32], values: &[i32]) {
        let array = self.open(QueryType::Write);
        let query = Query::new(&array, QueryType::Write).expect("Failed to allocate query");
        query.set_data_buffer("rows", rows.to_vec()).expect("Failed to bind rows");
        query.set_data_buffer("a", values.to_vec()).expect("Failed to bind a");
        assert_eq!(query.submit().expect("Failed to submit write"), QueryStatus::Completed);
        array.close().expect("Failed to close array");
    }

    /// Writes `cells` of a [`var_sized`](Self::var_sized) array.
    pub fn write_var(&self, cells: &[VarCell]) {
        let mut rows = Vec::with_capacity(cells.len());
        let mut data = Vec::new();
        let mut offsets = Vec::with_capacity(cells.len());
        let mut n = Vec::with_capacity(cells.len());
        let mut validity = Vec::with_capacity(cells.len());
        for (row, values, nullable) in cells {
            rows.push(*row);
            offsets.push((data.len() * std::mem::size_of::<i32>()) as u64);
            data.extend_from_slice(values);
            n.push(nullable.unwrap_or_default());
            validity.push(u8::from(nullable.is_some()));
        }

        let array = self.open(QueryType::Write);
        let query = Query::new(&array, QueryType::Write).expect("Failed to allocate query");
        query.set_data_buffer("rows", rows).expect("Failed to bind rows");
        query.set_data_buffer("a1", data).expect("Failed to bind a1");
        query.set_offsets_buffer("a1", offsets).expect("Failed to bind a1 offsets");
        query.set_data_buffer("n", n).expect("Failed to bind n");
        query.set_validity_buffer("n", validity).expect("Failed to bind n validity");
        assert_eq!(query.submit().expect("Failed to submit write"), QueryStatus::Completed);
        array.close().expect("Failed to close array");
    }
}

/// A temporary directory with a VFS pointed at it.
pub struct TestDir {
    dir: TempDir,
    vfs: Vfs,
}

impl TestDir {
    /// Creates the directory and a VFS in a fresh context.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let vfs = Vfs::new(&sim_context(), None).expect("Failed to allocate vfs");
        Self { dir, vfs }
    }

    /// The VFS.
    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    /// Directory path.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// URI of `name` inside the directory.
    pub fn uri(&self, name: &str) -> String {
        format!("file://{}", self.file(name).display())
    }

    /// Path of `name` inside the directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `f` with a fresh [`TestDir`].
pub fn with_temp_dir<F, R>(f: F) -> R
where
    F: FnOnce(&TestDir) -> R,
{
    let dir = TestDir::new();
    f(&dir)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// The three-cell array used across the buffer tests: `a1` holds `{1}`,
    /// `{2, 2}` and `{3, 3, 3}`; `n` is null on the middle cell. All three
    /// cells share one tile.
    pub fn one_two_three() -> TestArray {
        let array = TestArray::var_sized(Some(3));
        array.write_var(&[(1, vec![1], Some(10)), (2, vec![2, 2], None), (3, vec![3, 3, 3], Some(30))]);
        array
    }

    /// An int array holding `a = row` for every row in `1..=count`.
    pub fn counted(count: i32) -> TestArray {
        let array = TestArray::int(None);
        let rows: Vec<i32> = (1..=count).collect();
        array.write_int(&rows, &rows);
        array
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera::VfsMode;

    #[test]
    fn uris_are_unique() {
        assert_ne!(unique_uri("x"), unique_uri("x"));
    }

    #[test]
    fn int_array_round_trip() {
        let array = scenarios::counted(5);
        let query = array.read_query();
        query.set_data_buffer("a", vec![0i32; 8]).unwrap();
        assert_eq!(query.submit().unwrap(), QueryStatus::Completed);
        assert_eq!(query.result("a").unwrap().data::<i32>().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn context_settings_are_applied() {
        let ctx = sim_context_with(&[("custom.key", "v")]);
        assert_eq!(ctx.config().unwrap().get("custom.key").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn temp_dir_files() {
        with_temp_dir(|dir| {
            let uri = dir.uri("blob");
            let file = dir.vfs().open(&uri, VfsMode::Write).unwrap();
            file.write_all(b"abc").unwrap();
            file.close().unwrap();
            assert!(dir.file("blob").exists());
            assert_eq!(dir.vfs().file_size(&uri).unwrap(), 3);
        });
    }
}
