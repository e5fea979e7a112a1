//! Query fields, result channels and aggregate operations.
//!
//! All three kinds are bound to both the context and the query they came
//! from and are freed through the context.

use crate::buffers::FieldSpec;
use crate::context::Context;
use crate::datatype::{CellValNum, Datatype};
use crate::error::Result;
use crate::handle::Handle;
use crate::marshal::CText;
use crate::query::Query;
use crate::resource;
use crate::types::AggregateOp;
use std::ptr;

/// A field of a query: attribute, dimension or aggregate output.
#[derive(Debug, Clone)]
pub struct QueryField {
    ctx: Context,
    query: Query,
    name: String,
    handle: Handle<resource::QueryField>,
}

impl QueryField {
    pub(crate) fn new(query: &Query, name: &str) -> Result<Self> {
        let c_name = CText::ascii(name)?;
        let ctx = query.context().clone();
        let parent = (ctx.owned()?, query.handle().acquire_owned()?);
        let handle = Handle::<resource::QueryField>::create(ctx.runtime(), parent, |(ctx, query), out| {
            // SAFETY: ctx and query are held by the parent guards.
            ctx.check(unsafe {
                (ctx.api().tessera_query_get_field)(ctx.as_ptr(), query.as_ptr(), c_name.as_ptr(), out)
            })
        })?;
        Ok(Self {
            ctx,
            query: query.clone(),
            name: name.to_owned(),
            handle,
        })
    }

    /// Field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Element datatype.
    pub fn datatype(&self) -> Result<Datatype> {
        let ctx = self.ctx.guard()?;
        let field = self.handle.acquire()?;
        let mut raw = 0;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe { (ctx.api().tessera_field_datatype)(ctx.as_ptr(), field.as_ptr(), &mut raw) })?;
        Datatype::try_from(raw)
    }

    /// Values per cell.
    pub fn cell_val_num(&self) -> Result<CellValNum> {
        let ctx = self.ctx.guard()?;
        let field = self.handle.acquire()?;
        let mut raw = 0;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe { (ctx.api().tessera_field_cell_val_num)(ctx.as_ptr(), field.as_ptr(), &mut raw) })?;
        Ok(CellValNum::from_raw(raw))
    }

    /// Whether cells may be null.
    pub fn nullable(&self) -> Result<bool> {
        let ctx = self.ctx.guard()?;
        let field = self.handle.acquire()?;
        let mut raw = 0;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe { (ctx.api().tessera_field_nullable)(ctx.as_ptr(), field.as_ptr(), &mut raw) })?;
        Ok(raw != 0)
    }

    /// Declared shape.
    pub fn spec(&self) -> Result<FieldSpec> {
        Ok(FieldSpec {
            datatype: self.datatype()?,
            cell_val_num: self.cell_val_num()?,
            nullable: self.nullable()?,
        })
    }

    /// The channel this field belongs to.
    pub fn channel(&self) -> Result<QueryChannel> {
        let field = self.handle.acquire()?;
        let parent = (self.ctx.owned()?, self.query.handle().acquire_owned()?);
        let handle = Handle::<resource::QueryChannel>::create(self.ctx.runtime(), parent, |(ctx, _), out| {
            // SAFETY: ctx is held by the parent guard, the field by its guard.
            ctx.check(unsafe { (ctx.api().tessera_field_channel)(ctx.as_ptr(), field.as_ptr(), out) })
        })?;
        Ok(QueryChannel {
            ctx: self.ctx.clone(),
            query: self.query.clone(),
            handle,
        })
    }

    /// The underlying handle.
    pub fn handle(&self) -> &Handle<resource::QueryField> {
        &self.handle
    }
}

/// A stream of result cells on which aggregates can be computed.
#[derive(Debug, Clone)]
pub struct QueryChannel {
    ctx: Context,
    query: Query,
    handle: Handle<resource::QueryChannel>,
}

impl QueryChannel {
    pub(crate) fn default_of(query: &Query) -> Result<Self> {
        let ctx = query.context().clone();
        let parent = (ctx.owned()?, query.handle().acquire_owned()?);
        let handle = Handle::<resource::QueryChannel>::create(ctx.runtime(), parent, |(ctx, query), out| {
            // SAFETY: ctx and query are held by the parent guards.
            ctx.check(unsafe {
                (ctx.api().tessera_query_get_default_channel)(ctx.as_ptr(), query.as_ptr(), out)
            })
        })?;
        Ok(Self {
            ctx,
            query: query.clone(),
            handle,
        })
    }

    /// Computes `operation` into a new field called `output_field`.
    ///
    /// The output becomes a field of the query; bind a one-element data
    /// buffer to it before submitting.
    pub fn apply_aggregate(&self, output_field: &str, operation: &ChannelOperation) -> Result<()> {
        let output = CText::ascii(output_field)?;
        let ctx = self.ctx.guard()?;
        let channel = self.handle.acquire()?;
        let operation = operation.handle.acquire()?;
        // SAFETY: all three handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_channel_apply_aggregate)(
                ctx.as_ptr(),
                channel.as_ptr(),
                output.as_ptr(),
                operation.as_ptr(),
            )
        })
    }

    /// Counts cells into `output_field`.
    pub fn count(&self, output_field: &str) -> Result<()> {
        let op = ChannelOperation::new(&self.query, AggregateOp::Count, None)?;
        self.apply_aggregate(output_field, &op)
    }

    /// Sums `input_field` into `output_field`.
    pub fn sum(&self, output_field: &str, input_field: &str) -> Result<()> {
        let op = ChannelOperation::new(&self.query, AggregateOp::Sum, Some(input_field))?;
        self.apply_aggregate(output_field, &op)
    }

    /// The underlying handle.
    pub fn handle(&self) -> &Handle<resource::QueryChannel> {
        &self.handle
    }
}

/// An aggregate operator bound to an input field.
#[derive(Debug, Clone)]
pub struct ChannelOperation {
    handle: Handle<resource::ChannelOperation>,
}

impl ChannelOperation {
    /// Creates `op` over `input_field`; `Count` takes no input.
    pub fn new(query: &Query, op: AggregateOp, input_field: Option<&str>) -> Result<Self> {
        let input = input_field.map(CText::ascii).transpose()?;
        let ctx = query.context();
        let parent = (ctx.owned()?, query.handle().acquire_owned()?);
        let handle = Handle::<resource::ChannelOperation>::create(ctx.runtime(), parent, |(ctx, query), out| {
            let input = input.as_ref().map_or(ptr::null(), CText::as_ptr);
            // SAFETY: ctx and query are held by the parent guards.
            ctx.check(unsafe {
                (ctx.api().tessera_channel_operation_alloc)(ctx.as_ptr(), query.as_ptr(), op.to_raw(), input, out)
            })
        })?;
        Ok(Self { handle })
    }

    /// The underlying handle.
    pub fn handle(&self) -> &Handle<resource::ChannelOperation> {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{create_int_array, create_var_array, ctx, open, unique_uri, write_int_cells};
    use crate::types::{QueryStatus, QueryType};
    use crate::Error;

    #[test]
    fn field_shapes() {
        let ctx = ctx();
        let uri = unique_uri("channel-fields");
        create_var_array(&ctx, &uri);
        let array = open(&ctx, &uri, QueryType::Read);
        let query = Query::new(&array, QueryType::Read).unwrap();

        let rows = query.field("rows").unwrap();
        assert_eq!(rows.name(), "rows");
        assert_eq!(rows.datatype().unwrap(), Datatype::Int32);
        assert_eq!(rows.cell_val_num().unwrap(), CellValNum::SINGLE);
        assert!(!rows.nullable().unwrap());

        assert!(query.field("a1").unwrap().spec().unwrap().is_var());
        assert!(query.field("n").unwrap().nullable().unwrap());
        assert!(matches!(
            query.field("missing"),
            Err(Error::Allocation { kind: "query field", .. })
        ));
        rows.channel().unwrap();
    }

    #[test]
    fn count_and_sum() {
        let ctx = ctx();
        let uri = unique_uri("channel-aggregate");
        create_int_array(&ctx, &uri);
        write_int_cells(&ctx, &uri, &[1, 2, 3, 4], &[10, 20, 30, 40]);
        let array = open(&ctx, &uri, QueryType::Read);
        let query = Query::new(&array, QueryType::Read).unwrap();

        let channel = query.default_channel().unwrap();
        channel.count("n_cells").unwrap();
        channel.sum("total", "a").unwrap();
        let max = ChannelOperation::new(&query, AggregateOp::Max, Some("a")).unwrap();
        channel.apply_aggregate("largest", &max).unwrap();

        assert_eq!(query.field("total").unwrap().datatype().unwrap(), Datatype::Int64);
        query.set_data_buffer("n_cells", vec![0u64; 1]).unwrap();
        query.set_data_buffer("total", vec![0i64; 1]).unwrap();
        query.set_data_buffer("largest", vec![0i32; 1]).unwrap();

        assert_eq!(query.submit().unwrap(), QueryStatus::Completed);
        assert_eq!(query.result("n_cells").unwrap().data::<u64>().unwrap(), vec![4]);
        assert_eq!(query.result("total").unwrap().data::<i64>().unwrap(), vec![100]);
        assert_eq!(query.result("largest").unwrap().data::<i32>().unwrap(), vec![40]);
    }

    #[test]
    fn sum_needs_an_input() {
        let ctx = ctx();
        let uri = unique_uri("channel-sum-input");
        create_int_array(&ctx, &uri);
        let array = open(&ctx, &uri, QueryType::Read);
        let query = Query::new(&array, QueryType::Read).unwrap();
        assert!(ChannelOperation::new(&query, AggregateOp::Sum, None).is_err());
    }

    #[test]
    fn channel_objects_are_freed_before_the_query() {
        let ctx = ctx();
        let uri = unique_uri("channel-order");
        create_int_array(&ctx, &uri);
        let array = open(&ctx, &uri, QueryType::Read);
        let query = Query::new(&array, QueryType::Read).unwrap();
        let query_ptr = query.handle().acquire().unwrap().as_ptr() as usize;

        let channel = query.default_channel().unwrap();
        let channel_ptr = channel.handle().acquire().unwrap().as_ptr() as usize;
        drop(query);
        assert!(tessera_sim::is_live(query_ptr));
        drop(channel);
        assert!(tessera_sim::freed_before(channel_ptr, query_ptr));
    }
}
