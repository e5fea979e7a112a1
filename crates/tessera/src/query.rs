//! Read and write queries.
//!
//! A [`Query`] owns its field buffers through the registry attached to its
//! handle. Buffers bound here stay at a fixed address until the query is
//! freed or the buffer is rebound, so the engine can fill them across
//! submissions.

use crate::array::Array;
use crate::buffers::{self, Batch, Binding, BufferPart, FieldResult, FieldSpec, Registry, ResultCounts};
use crate::channel::{QueryChannel, QueryField};
use crate::condition::QueryCondition;
use crate::context::Context;
use crate::datatype::{Datatype, Element};
use crate::driver::{Resize, ResizePolicy};
use crate::error::{Error, Result};
use crate::handle::{Guard, Handle, OwnedGuard};
use crate::marshal::{CText, Pinned, Region};
use crate::resource;
use crate::subarray::Subarray;
use crate::types::{IncompleteReason, Layout, QueryStatus, QueryType};
use std::ffi::c_void;
use tessera_sys::{capi_return_t, tessera_query_status_details_t, TESSERA_OK};
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Layer-side state of a query, attached to its handle.
#[derive(Debug)]
pub struct QueryState {
    registry: Registry,
    last_status: QueryStatus,
    in_flight: bool,
}

impl Default for QueryState {
    fn default() -> Self {
        Self {
            registry: Registry::default(),
            last_status: QueryStatus::Uninitialized,
            in_flight: false,
        }
    }
}

impl QueryState {
    /// Bound buffers.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Status observed after the last submission.
    pub fn last_status(&self) -> QueryStatus {
        self.last_status
    }

    /// Returns true while a submission has not returned or called back.
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Refuses buffer access while the engine may be writing the buffers.
    fn settled(&self) -> Result<()> {
        if self.in_flight {
            return Err(Error::usage("query has a submission in flight"));
        }
        Ok(())
    }
}

/// Bytes a complete read of one field needs in each buffer part.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultSize {
    /// Data bytes.
    pub data_bytes: u64,
    /// Offsets bytes; `None` for fixed-length fields.
    pub offsets_bytes: Option<u64>,
    /// Validity bytes; `None` for fields that are not nullable.
    pub validity_bytes: Option<u64>,
}

impl ResultSize {
    /// Data elements of `datatype`.
    pub fn data_elements(&self, datatype: Datatype) -> u64 {
        self.data_bytes / datatype.size().max(1) as u64
    }

    /// Offsets.
    pub fn offsets(&self) -> u64 {
        self.offsets_bytes.map_or(0, |bytes| bytes / 8)
    }

    /// Validity bytes, one per cell.
    pub fn validity(&self) -> u64 {
        self.validity_bytes.unwrap_or(0)
    }
}

/// A read or write query on an open array.
#[derive(Debug, Clone)]
pub struct Query {
    ctx: Context,
    array: Array,
    query_type: QueryType,
    handle: Handle<resource::Query>,
}

impl Query {
    /// Creates a query of `query_type` on `array`, which must be open in the
    /// same direction.
    pub fn new(array: &Array, query_type: QueryType) -> Result<Self> {
        let ctx = array.context().clone();
        let handle = Handle::<resource::Query>::create(ctx.runtime(), array.handle().acquire_owned()?, |array, out| {
            let ctx = ctx.guard()?;
            // SAFETY: ctx and array are held by their guards.
            ctx.check(unsafe {
                (ctx.api().tessera_query_alloc)(ctx.as_ptr(), array.as_ptr(), query_type.to_raw(), out)
            })
        })?;
        Ok(Self {
            ctx,
            array: array.clone(),
            query_type,
            handle,
        })
    }

    /// Sets the cell order.
    pub fn set_layout(&self, layout: Layout) -> Result<()> {
        let ctx = self.ctx.guard()?;
        let query = self.handle.acquire()?;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe { (ctx.api().tessera_query_set_layout)(ctx.as_ptr(), query.as_ptr(), layout.to_raw()) })
    }

    /// Cell order.
    pub fn layout(&self) -> Result<Layout> {
        let ctx = self.ctx.guard()?;
        let query = self.handle.acquire()?;
        let mut raw = 0;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe { (ctx.api().tessera_query_get_layout)(ctx.as_ptr(), query.as_ptr(), &mut raw) })?;
        Layout::try_from(raw)
    }

    /// Restricts the query to `subarray` (copied).
    pub fn set_subarray(&self, subarray: &Subarray) -> Result<()> {
        let ctx = self.ctx.guard()?;
        let query = self.handle.acquire()?;
        let subarray = subarray.handle().acquire()?;
        // SAFETY: all three handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_query_set_subarray)(ctx.as_ptr(), query.as_ptr(), subarray.as_ptr())
        })
    }

    /// Filters cells with `condition` (copied).
    pub fn set_condition(&self, condition: &QueryCondition) -> Result<()> {
        let ctx = self.ctx.guard()?;
        let query = self.handle.acquire()?;
        let condition = condition.handle().acquire()?;
        // SAFETY: all three handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_query_set_condition)(ctx.as_ptr(), query.as_ptr(), condition.as_ptr())
        })
    }

    /// Binds the data buffer of `name`.
    ///
    /// The element width of `T` must equal the size of the field's datatype.
    /// On reads the buffer's length is its capacity; on writes its contents
    /// are the cells to write.
    pub fn set_data_buffer<T: Element>(&self, name: &str, data: Vec<T>) -> Result<()> {
        let elements = data.len();
        self.bind(name, BufferPart::Data, Box::new(Pinned::new(data)), elements)
    }

    /// Binds the offsets buffer of a variable-length field.
    pub fn set_offsets_buffer(&self, name: &str, offsets: Vec<u64>) -> Result<()> {
        let elements = offsets.len();
        self.bind(name, BufferPart::Offsets, Box::new(Pinned::new(offsets)), elements)
    }

    /// Binds the validity buffer of a nullable field.
    pub fn set_validity_buffer(&self, name: &str, validity: Vec<u8>) -> Result<()> {
        let elements = validity.len();
        self.bind(name, BufferPart::Validity, Box::new(Pinned::new(validity)), elements)
    }

    fn bind(&self, name: &str, part: BufferPart, region: Box<dyn Region>, elements: usize) -> Result<()> {
        let spec = self.field_spec(name)?;
        buffers::validate(name, &spec, part, region.element_size(), elements, self.query_type)?;
        let c_name = CText::ascii(name)?;

        let ctx = self.ctx.guard()?;
        let query = self.handle.acquire()?;
        let mut state = query.attached();
        state.settled()?;
        let mut binding = Binding::new(region);
        attach(&ctx, &query, &c_name, part, &mut binding)?;
        let previous = state.registry.install(&c_name, spec, part, binding);
        drop(state);
        trace!(field = name, %part, rebound = previous.is_some(), "bound query buffer");
        // The engine now points at the new binding.
        drop(previous);
        Ok(())
    }

    /// Declared shape of `name`, looked up once per query.
    pub fn field_spec(&self, name: &str) -> Result<FieldSpec> {
        if let Some(spec) = self.handle.acquire()?.attached().registry.cached_spec(name) {
            return Ok(spec);
        }
        let spec = self.field(name)?.spec()?;
        self.handle.acquire()?.attached().registry.cache_spec(name, spec);
        Ok(spec)
    }

    /// Submits the query and blocks until the engine returns.
    ///
    /// Submitting after the query reached `Completed` or `Failed` is a usage
    /// error.
    pub fn submit(&self) -> Result<QueryStatus> {
        let ctx = self.ctx.guard()?;
        let query = self.handle.acquire()?;
        self.prepare(&query)?;
        // SAFETY: both handles are held by their guards; every bound buffer is
        // owned by the registry and stays pinned during the call.
        let rc = unsafe { (ctx.api().tessera_query_submit)(ctx.as_ptr(), query.as_ptr()) };
        query.attached().in_flight = false;
        finish(&ctx, &query, rc)
    }

    /// Submits the query without blocking the calling thread.
    ///
    /// Owned guards on the query and its context travel with the callback
    /// payload, so neither is freed before the engine reports completion.
    /// Until then the query refuses to bind, grow or read its buffers, even
    /// if the returned future is dropped.
    pub async fn submit_async(&self) -> Result<QueryStatus> {
        let (tx, rx) = oneshot::channel();
        {
            let ctx = self.ctx.guard()?;
            let query = self.handle.acquire()?;
            let payload = Box::new(AsyncPayload {
                done: tx,
                query: self.handle.acquire_owned()?,
                ctx: self.ctx.owned()?,
            });
            self.prepare(&query)?;
            let data = Box::into_raw(payload).cast::<c_void>();
            // SAFETY: both handles are held by their guards; the payload is
            // reclaimed exactly once, by the callback or below on failure.
            let rc = unsafe {
                (ctx.api().tessera_query_submit_async)(ctx.as_ptr(), query.as_ptr(), Some(on_complete), data)
            };
            if rc != TESSERA_OK {
                // SAFETY: the engine refused the submission and never calls back.
                drop(unsafe { Box::from_raw(data.cast::<AsyncPayload>()) });
                query.attached().in_flight = false;
                return finish(&ctx, &query, rc);
            }
        }
        rx.await
            .map_err(|_| Error::runtime("engine dropped the completion callback"))?;
        let ctx = self.ctx.guard()?;
        let query = self.handle.acquire()?;
        finish(&ctx, &query, TESSERA_OK)
    }

    /// Checks the query can run and marks it in flight.
    fn prepare(&self, query: &Guard<'_, resource::Query>) -> Result<()> {
        let mut state = query.attached();
        state.settled()?;
        if state.last_status.is_terminal() {
            return Err(Error::usage(format!(
                "query is already {}; create a new query to run again",
                state.last_status
            )));
        }
        if self.query_type == QueryType::Read {
            state.registry.reset_sizes();
        }
        state.in_flight = true;
        Ok(())
    }

    /// Current status.
    pub fn status(&self) -> Result<QueryStatus> {
        let ctx = self.ctx.guard()?;
        let query = self.handle.acquire()?;
        read_status(&ctx, &query)
    }

    /// Why the last submission stopped early.
    pub fn status_details(&self) -> Result<IncompleteReason> {
        let ctx = self.ctx.guard()?;
        let query = self.handle.acquire()?;
        let mut details = tessera_query_status_details_t::default();
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_query_get_status_details)(ctx.as_ptr(), query.as_ptr(), &mut details)
        })?;
        IncompleteReason::try_from(details.incomplete_reason)
    }

    /// Direction, as reported by the engine.
    pub fn query_type(&self) -> Result<QueryType> {
        let ctx = self.ctx.guard()?;
        let query = self.handle.acquire()?;
        let mut raw = 0;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe { (ctx.api().tessera_query_get_type)(ctx.as_ptr(), query.as_ptr(), &mut raw) })?;
        QueryType::try_from(raw)
    }

    /// Estimated bytes a complete read of `name` needs, covering cells already
    /// delivered. Only read queries estimate.
    pub fn est_result_size(&self, name: &str) -> Result<ResultSize> {
        let spec = self.field_spec(name)?;
        let c_name = CText::ascii(name)?;
        let ctx = self.ctx.guard()?;
        let query = self.handle.acquire()?;
        let (mut data, mut offsets, mut validity) = (0u64, 0u64, 0u64);
        // SAFETY: both handles are held by their guards; the sizes are locals.
        ctx.check(unsafe {
            (ctx.api().tessera_query_get_est_result_size)(
                ctx.as_ptr(),
                query.as_ptr(),
                c_name.as_ptr(),
                &mut data,
                &mut offsets,
                &mut validity,
            )
        })?;
        Ok(ResultSize {
            data_bytes: data,
            offsets_bytes: spec.is_var().then_some(offsets),
            validity_bytes: spec.nullable.then_some(validity),
        })
    }

    /// Returns true if the last submission produced any cell.
    pub fn has_results(&self) -> Result<bool> {
        let ctx = self.ctx.guard()?;
        let query = self.handle.acquire()?;
        let mut has = 0;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe { (ctx.api().tessera_query_has_results)(ctx.as_ptr(), query.as_ptr(), &mut has) })?;
        Ok(has != 0)
    }

    /// Flushes a global-order write.
    pub fn finalize(&self) -> Result<()> {
        let ctx = self.ctx.guard()?;
        let query = self.handle.acquire()?;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe { (ctx.api().tessera_query_finalize)(ctx.as_ptr(), query.as_ptr()) })
    }

    /// The field called `name`: an attribute, a dimension or an aggregate
    /// output.
    pub fn field(&self, name: &str) -> Result<QueryField> {
        QueryField::new(self, name)
    }

    /// The channel covering every cell of the query.
    pub fn default_channel(&self) -> Result<QueryChannel> {
        QueryChannel::default_of(self)
    }

    /// Results of `name` from the last submission.
    pub fn result(&self, name: &str) -> Result<FieldResult> {
        let query = self.handle.acquire()?;
        let state = query.attached();
        state.settled()?;
        state
            .registry
            .field(name)
            .ok_or_else(|| Error::usage(format!("no buffer bound for field '{name}'")))?
            .snapshot()
    }

    /// Results of every bound field from the last submission.
    pub fn results(&self) -> Result<Batch> {
        let query = self.handle.acquire()?;
        let state = query.attached();
        state.settled()?;
        state.registry.snapshot()
    }

    /// Element counts of `name` from the last submission.
    pub fn result_counts(&self, name: &str) -> Result<ResultCounts> {
        let query = self.handle.acquire()?;
        let state = query.attached();
        state.settled()?;
        state
            .registry
            .field(name)
            .map(|field| field.counts())
            .ok_or_else(|| Error::usage(format!("no buffer bound for field '{name}'")))
    }

    /// Replaces every bound buffer of a read query with a larger one.
    ///
    /// `policy` picks the new byte size of each part; a proposal that does not
    /// grow the buffer by at least one element is raised to that. Each new
    /// buffer is bound before the old one is dropped.
    pub fn grow_buffers<P: ResizePolicy + ?Sized>(&self, policy: &mut P) -> Result<Vec<Resize>> {
        if self.query_type != QueryType::Read {
            return Err(Error::usage("only read queries can grow their buffers"));
        }
        let ctx = self.ctx.guard()?;
        let query = self.handle.acquire()?;
        let plan: Vec<(CText, FieldSpec, BufferPart, usize, Binding)> = {
            let state = query.attached();
            state.settled()?;
            state
                .registry
                .fields()
                .flat_map(|field| {
                    field.bindings().map(|(part, binding)| {
                        let from = binding.capacity();
                        let proposed = policy.grow(field.name(), part, from);
                        let to = proposed.max(from + binding.element_size());
                        (field.c_name().clone(), *field.spec(), part, from, binding.grown(to))
                    })
                    .collect::<Vec<_>>()
                })
                .collect()
        };

        let mut resized = Vec::with_capacity(plan.len());
        for (name, spec, part, from, mut binding) in plan {
            let mut state = query.attached();
            state.settled()?;
            attach(&ctx, &query, &name, part, &mut binding)?;
            let to = binding.capacity();
            let previous = state.registry.install(&name, spec, part, binding);
            drop(state);
            drop(previous);
            debug!(field = name.as_str(), %part, from, to, "grew query buffer");
            resized.push(Resize {
                field: name.as_str().to_owned(),
                part,
                from,
                to,
            });
        }
        Ok(resized)
    }

    /// Direction given at creation.
    pub fn kind(&self) -> QueryType {
        self.query_type
    }

    /// Array the query runs on.
    pub fn array(&self) -> &Array {
        &self.array
    }

    /// Context of the query.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// The underlying handle.
    pub fn handle(&self) -> &Handle<resource::Query> {
        &self.handle
    }
}

/// Hands one binding's pointers to the engine.
fn attach(
    ctx: &Guard<'_, resource::Context>,
    query: &Guard<'_, resource::Query>,
    name: &CText,
    part: BufferPart,
    binding: &mut Binding,
) -> Result<()> {
    let (data, size) = binding.raw_parts();
    let api = ctx.api();
    // SAFETY: ctx and query are held by their guards; the binding's region and
    // size cell are heap-pinned and outlive their registration.
    let rc = unsafe {
        match part {
            BufferPart::Data => {
                (api.tessera_query_set_data_buffer)(ctx.as_ptr(), query.as_ptr(), name.as_ptr(), data, size)
            }
            BufferPart::Offsets => (api.tessera_query_set_offsets_buffer)(
                ctx.as_ptr(),
                query.as_ptr(),
                name.as_ptr(),
                data.cast::<u64>(),
                size,
            ),
            BufferPart::Validity => (api.tessera_query_set_validity_buffer)(
                ctx.as_ptr(),
                query.as_ptr(),
                name.as_ptr(),
                data.cast::<u8>(),
                size,
            ),
        }
    };
    ctx.check(rc)
}

fn read_status(ctx: &Guard<'_, resource::Context>, query: &Guard<'_, resource::Query>) -> Result<QueryStatus> {
    let mut raw = 0;
    // SAFETY: both handles are held by their guards.
    ctx.check(unsafe { (ctx.api().tessera_query_get_status)(ctx.as_ptr(), query.as_ptr(), &mut raw) })?;
    QueryStatus::try_from(raw)
}

/// Records the status after a submission and converts its return code.
fn finish(
    ctx: &Guard<'_, resource::Context>,
    query: &Guard<'_, resource::Query>,
    rc: capi_return_t,
) -> Result<QueryStatus> {
    let submitted = ctx.check(rc);
    let status = read_status(ctx, query);
    if let Ok(status) = status {
        query.attached().last_status = status;
        trace!(%status, "query submitted");
    }
    submitted?;
    status
}

struct AsyncPayload {
    done: oneshot::Sender<()>,
    query: OwnedGuard<resource::Query>,
    ctx: OwnedGuard<resource::Context>,
}

unsafe extern "C" fn on_complete(data: *mut c_void) {
    if data.is_null() {
        return;
    }
    let payload = Box::from_raw(data.cast::<AsyncPayload>());
    let AsyncPayload { done, query, ctx } = *payload;
    query.attached().in_flight = false;
    drop(query);
    drop(ctx);
    // The receiver is gone if the future was dropped.
    let _ = done.send(());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{create_int_array, create_var_array, ctx, open, unique_uri, write_int_cells, write_var_cells};
    use crate::types::{ConditionOp, Layout};
    use std::future::Future;

    #[test]
    fn write_then_read_everything() {
        let ctx = ctx();
        let uri = unique_uri("query-roundtrip");
        create_int_array(&ctx, &uri);
        write_int_cells(&ctx, &uri, &[3, 1, 2], &[30, 10, 20]);

        let array = open(&ctx, &uri, QueryType::Read);
        let query = Query::new(&array, QueryType::Read).unwrap();
        query.set_layout(Layout::RowMajor).unwrap();
        assert_eq!(query.layout().unwrap(), Layout::RowMajor);
        query.set_data_buffer("rows", vec![0i32; 8]).unwrap();
        query.set_data_buffer("a", vec![0i32; 8]).unwrap();

        assert_eq!(query.submit().unwrap(), QueryStatus::Completed);
        assert_eq!(query.status().unwrap(), QueryStatus::Completed);
        assert!(query.has_results().unwrap());
        assert_eq!(query.query_type().unwrap(), QueryType::Read);
        assert_eq!(query.result("rows").unwrap().data::<i32>().unwrap(), vec![1, 2, 3]);
        assert_eq!(query.result("a").unwrap().data::<i32>().unwrap(), vec![10, 20, 30]);
        assert_eq!(query.result_counts("a").unwrap().data_elements, 3);
        assert_eq!(query.results().unwrap().cell_count(), 3);
    }

    #[test]
    fn buffer_shape_is_checked_against_the_schema() {
        let ctx = ctx();
        let uri = unique_uri("query-shape");
        create_var_array(&ctx, &uri);
        let array = open(&ctx, &uri, QueryType::Read);
        let query = Query::new(&array, QueryType::Read).unwrap();

        assert!(matches!(
            query.set_data_buffer("rows", vec![0i64; 4]),
            Err(Error::SchemaMismatch { .. })
        ));
        assert!(matches!(
            query.set_offsets_buffer("rows", vec![0u64; 4]),
            Err(Error::Usage { .. })
        ));
        assert!(matches!(
            query.set_validity_buffer("a1", vec![0u8; 4]),
            Err(Error::Usage { .. })
        ));
        assert!(matches!(
            query.set_data_buffer::<i32>("a1", Vec::new()),
            Err(Error::Usage { .. })
        ));
        assert!(query.set_data_buffer("nope", vec![0i32; 4]).is_err());

        query.set_offsets_buffer("a1", vec![0u64; 4]).unwrap();
        query.set_validity_buffer("n", vec![0u8; 4]).unwrap();
        assert_eq!(query.field_spec("a1").unwrap().cell_val_num, crate::CellValNum::Var);
    }

    #[test]
    fn resubmitting_a_completed_query_is_misuse() {
        let ctx = ctx();
        let uri = unique_uri("query-resubmit");
        create_int_array(&ctx, &uri);
        write_int_cells(&ctx, &uri, &[1], &[1]);
        let array = open(&ctx, &uri, QueryType::Read);
        let query = Query::new(&array, QueryType::Read).unwrap();
        query.set_data_buffer("a", vec![0i32; 4]).unwrap();
        assert_eq!(query.submit().unwrap(), QueryStatus::Completed);
        assert!(matches!(query.submit(), Err(Error::Usage { .. })));
    }

    #[test]
    fn small_buffers_return_incomplete_rounds() {
        let ctx = ctx();
        let uri = unique_uri("query-incomplete");
        create_int_array(&ctx, &uri);
        write_int_cells(&ctx, &uri, &[1, 2, 3, 4, 5], &[1, 2, 3, 4, 5]);
        let array = open(&ctx, &uri, QueryType::Read);
        let query = Query::new(&array, QueryType::Read).unwrap();
        query.set_data_buffer("a", vec![0i32; 2]).unwrap();

        let mut seen = Vec::new();
        loop {
            let status = query.submit().unwrap();
            seen.extend(query.result("a").unwrap().data::<i32>().unwrap());
            if status == QueryStatus::Completed {
                break;
            }
            assert_eq!(status, QueryStatus::Incomplete);
            assert_eq!(query.status_details().unwrap(), IncompleteReason::UserBufferSize);
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn missing_offsets_fail_at_submission() {
        let ctx = ctx();
        let uri = unique_uri("query-missing-offsets");
        create_var_array(&ctx, &uri);
        write_var_cells(&ctx, &uri, &[(1, vec![1], Some(1))]);
        let array = open(&ctx, &uri, QueryType::Read);
        let query = Query::new(&array, QueryType::Read).unwrap();
        query.set_data_buffer("a1", vec![0i32; 8]).unwrap();

        let err = query.submit().unwrap_err();
        assert!(matches!(err, Error::Native { .. }));
        assert!(err.to_string().contains("offsets"));
        assert_eq!(query.status().unwrap(), QueryStatus::Failed);
    }

    #[test]
    fn condition_and_subarray_filter_cells() {
        let ctx = ctx();
        let uri = unique_uri("query-filter");
        create_int_array(&ctx, &uri);
        write_int_cells(&ctx, &uri, &[1, 2, 3, 4, 5, 6], &[10, 20, 30, 40, 50, 60]);
        let array = open(&ctx, &uri, QueryType::Read);

        let subarray = Subarray::new(&array).unwrap();
        subarray.add_range(0, 2i32, 5).unwrap();
        let condition = QueryCondition::new(&ctx, "a", 30i32, ConditionOp::Ge).unwrap();

        let query = Query::new(&array, QueryType::Read).unwrap();
        query.set_subarray(&subarray).unwrap();
        query.set_condition(&condition).unwrap();
        query.set_data_buffer("rows", vec![0i32; 8]).unwrap();
        query.submit().unwrap();
        assert_eq!(query.result("rows").unwrap().data::<i32>().unwrap(), vec![3, 4, 5]);
    }

    #[test]
    fn grow_buffers_rebinds_larger_regions() {
        let ctx = ctx();
        let uri = unique_uri("query-grow");
        create_var_array(&ctx, &uri);
        let array = open(&ctx, &uri, QueryType::Read);
        let query = Query::new(&array, QueryType::Read).unwrap();
        query.set_data_buffer("a1", vec![0i32; 1]).unwrap();
        query.set_offsets_buffer("a1", vec![0u64; 1]).unwrap();

        let mut zero = |_: &str, _: BufferPart, _: usize| -> usize { 0 };
        let resized = query.grow_buffers(&mut zero).unwrap();
        assert_eq!(resized.len(), 2);
        let data = resized.iter().find(|r| r.part == BufferPart::Data).unwrap();
        assert_eq!((data.from, data.to), (4, 8));

        let resized = query.grow_buffers(&mut crate::Doubling).unwrap();
        let offsets = resized.iter().find(|r| r.part == BufferPart::Offsets).unwrap();
        assert_eq!((offsets.from, offsets.to), (16, 32));
    }

    #[test]
    fn write_queries_do_not_grow() {
        let ctx = ctx();
        let uri = unique_uri("query-grow-write");
        create_int_array(&ctx, &uri);
        let array = open(&ctx, &uri, QueryType::Write);
        let query = Query::new(&array, QueryType::Write).unwrap();
        assert!(matches!(
            query.grow_buffers(&mut crate::Doubling),
            Err(Error::Usage { .. })
        ));
    }

    #[test]
    fn query_keeps_array_and_buffers_alive() {
        let ctx = ctx();
        let uri = unique_uri("query-parent");
        create_int_array(&ctx, &uri);
        let array = open(&ctx, &uri, QueryType::Read);
        let array_ptr = array.handle().acquire().unwrap().as_ptr() as usize;
        let query = Query::new(&array, QueryType::Read).unwrap();
        query.set_data_buffer("a", vec![0i32; 4]).unwrap();
        let query_ptr = query.handle().acquire().unwrap().as_ptr() as usize;

        drop(array);
        assert!(tessera_sim::is_live(array_ptr));
        drop(query);
        assert!(tessera_sim::freed_before(query_ptr, array_ptr));
        assert!(tessera_sim::violations_for(query_ptr).is_empty());
    }

    #[tokio::test]
    async fn async_submission() {
        let ctx = ctx();
        let uri = unique_uri("query-async");
        create_int_array(&ctx, &uri);
        write_int_cells(&ctx, &uri, &[1, 2], &[7, 8]);
        let array = open(&ctx, &uri, QueryType::Read);
        let query = Query::new(&array, QueryType::Read).unwrap();
        query.set_data_buffer("a", vec![0i32; 4]).unwrap();

        assert_eq!(query.submit_async().await.unwrap(), QueryStatus::Completed);
        assert_eq!(query.result("a").unwrap().data::<i32>().unwrap(), vec![7, 8]);
        assert_eq!(query.handle().outstanding_guards(), 0);
    }

    struct Deferred {
        ctx: usize,
        query: usize,
        callback: tessera_sys::tessera_query_callback_t,
        data: usize,
    }

    static DEFERRED: parking_lot::Mutex<Option<Deferred>> = parking_lot::const_mutex(None);

    unsafe extern "C" fn submit_later(
        ctx: *mut tessera_sys::tessera_ctx_t,
        query: *mut tessera_sys::tessera_query_t,
        callback: tessera_sys::tessera_query_callback_t,
        data: *mut c_void,
    ) -> capi_return_t {
        *DEFERRED.lock() = Some(Deferred {
            ctx: ctx as usize,
            query: query as usize,
            callback,
            data: data as usize,
        });
        TESSERA_OK
    }

    /// Runs the parked submission and fires its callback.
    fn complete_deferred() {
        let deferred = DEFERRED.lock().take().unwrap();
        let api = tessera_sim::api();
        let rc = unsafe {
            (api.tessera_query_submit)(
                deferred.ctx as *mut tessera_sys::tessera_ctx_t,
                deferred.query as *mut tessera_sys::tessera_query_t,
            )
        };
        assert_eq!(rc, TESSERA_OK);
        unsafe { (deferred.callback.unwrap())(deferred.data as *mut c_void) };
    }

    #[tokio::test]
    async fn buffers_are_locked_while_in_flight() {
        let plain = ctx();
        let uri = unique_uri("query-in-flight");
        create_int_array(&plain, &uri);
        write_int_cells(&plain, &uri, &[1, 2], &[7, 8]);

        let mut api = tessera_sim::api();
        api.tessera_query_submit_async = submit_later;
        let ctx = Context::in_runtime(&crate::Runtime::from_api(api)).unwrap();
        let array = open(&ctx, &uri, QueryType::Read);
        let query = Query::new(&array, QueryType::Read).unwrap();
        query.set_data_buffer("a", vec![0i32; 4]).unwrap();

        let mut pending = Box::pin(query.submit_async());
        let first = std::future::poll_fn(|cx| std::task::Poll::Ready(pending.as_mut().poll(cx))).await;
        assert!(first.is_pending());
        assert!(query.handle().acquire().unwrap().attached().in_flight());

        let usage = |r: Result<()>| matches!(r, Err(Error::Usage { .. }));
        assert!(usage(query.set_data_buffer("a", vec![0i32; 8])));
        assert!(usage(query.results().map(drop)));
        assert!(usage(query.result("a").map(drop)));
        assert!(usage(query.result_counts("a").map(drop)));
        assert!(usage(query.grow_buffers(&mut crate::Doubling).map(drop)));
        assert!(usage(query.submit().map(drop)));

        complete_deferred();
        assert_eq!(pending.await.unwrap(), QueryStatus::Completed);
        assert_eq!(query.result("a").unwrap().data::<i32>().unwrap(), vec![7, 8]);
        assert_eq!(query.handle().outstanding_guards(), 0);
    }

    #[test]
    fn estimates_cover_every_selected_cell() {
        let ctx = ctx();
        let uri = unique_uri("query-estimate");
        create_var_array(&ctx, &uri);
        write_var_cells(&ctx, &uri, &[(1, vec![1], Some(1)), (2, vec![2, 2], None), (3, vec![], Some(3))]);
        let array = open(&ctx, &uri, QueryType::Read);
        let query = Query::new(&array, QueryType::Read).unwrap();

        let a1 = query.est_result_size("a1").unwrap();
        assert_eq!(a1.data_bytes, 12);
        assert_eq!(a1.offsets_bytes, Some(24));
        assert_eq!(a1.validity_bytes, None);
        assert_eq!((a1.data_elements(Datatype::Int32), a1.offsets()), (3, 3));

        let n = query.est_result_size("n").unwrap();
        assert_eq!(n, ResultSize { data_bytes: 12, offsets_bytes: None, validity_bytes: Some(3) });
        assert_eq!(n.validity(), 3);

        // Buffers sized from the estimate complete in one submission.
        query.set_data_buffer("a1", vec![0i32; a1.data_elements(Datatype::Int32) as usize]).unwrap();
        query.set_offsets_buffer("a1", vec![0u64; a1.offsets() as usize]).unwrap();
        query.set_data_buffer("n", vec![0i32; n.data_elements(Datatype::Int32) as usize]).unwrap();
        query.set_validity_buffer("n", vec![0u8; n.validity() as usize]).unwrap();
        assert_eq!(query.submit().unwrap(), QueryStatus::Completed);
        assert_eq!(query.est_result_size("n").unwrap(), n);
    }

    #[test]
    fn estimates_follow_the_subarray() {
        let ctx = ctx();
        let uri = unique_uri("query-estimate-subarray");
        create_int_array(&ctx, &uri);
        write_int_cells(&ctx, &uri, &[1, 2, 3, 4], &[1, 2, 3, 4]);
        let array = open(&ctx, &uri, QueryType::Read);
        let subarray = Subarray::new(&array).unwrap();
        subarray.add_range(0, 2i32, 3).unwrap();
        let query = Query::new(&array, QueryType::Read).unwrap();
        query.set_subarray(&subarray).unwrap();

        assert_eq!(query.est_result_size("a").unwrap().data_bytes, 8);
        assert_eq!(query.est_result_size("rows").unwrap().offsets_bytes, None);
        assert!(query.est_result_size("nope").is_err());
    }

    #[test]
    fn write_queries_do_not_estimate() {
        let ctx = ctx();
        let uri = unique_uri("query-estimate-write");
        create_int_array(&ctx, &uri);
        let array = open(&ctx, &uri, QueryType::Write);
        let query = Query::new(&array, QueryType::Write).unwrap();
        assert!(matches!(query.est_result_size("a"), Err(Error::Native { .. })));
    }

    #[test]
    fn results_of_unbound_field() {
        let ctx = ctx();
        let uri = unique_uri("query-unbound");
        create_int_array(&ctx, &uri);
        let array = open(&ctx, &uri, QueryType::Read);
        let query = Query::new(&array, QueryType::Read).unwrap();
        assert!(matches!(query.result("a"), Err(Error::Usage { .. })));
        assert!(query.results().unwrap().is_empty());
    }
}
