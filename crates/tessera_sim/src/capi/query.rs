//! Queries, query fields, channels and aggregates.

use crate::engine::{AggregateDef, BufferPart, ChannelObj, ConditionObj, FieldObj, OperationObj, QueryObj, RawBuf, SubarrayDef};
use crate::error::{SimError, SimResult};
use crate::model::ContextObj;
use crate::registry::Kind;
use crate::state::{ctx_call, free_slot, id, optional_text, put, text, write, Sim, STALL_ROUNDS};
use crate::storage::ArrayObj;
use std::ffi::{c_char, c_void};
use std::thread;
use tessera_sys::*;
use tracing::{debug, warn};

/// Frees the object in `*slot` under `ctx` and nulls the slot.
unsafe fn free_under_ctx<T: Kind, P>(ctx: *mut tessera_ctx_t, slot: *mut *mut P) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        if slot.is_null() {
            return Err(SimError::Null(T::NAME));
        }
        if (*slot).is_null() {
            return Ok(());
        }
        sim.objects.get::<T>(*slot as usize)?;
        sim.objects.free(*slot as usize);
        *slot = std::ptr::null_mut();
        Ok(())
    })
}

fn query_mut(sim: &mut Sim, query: *mut tessera_query_t) -> SimResult<&mut QueryObj> {
    sim.objects.get_mut::<QueryObj>(id(query, "query")?)
}

/// Allocates a query on an open array.
///
/// # Arguments
///
/// * `ctx` - The context
/// * `array` - An array open in the same mode as `query_type`
/// * `query_type` - `TESSERA_READ` or `TESSERA_WRITE`
/// * `query` - Output pointer for the query
///
/// # Safety
///
/// `query` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_alloc(
    ctx: *mut tessera_ctx_t,
    array: *mut tessera_array_t,
    query_type: u32,
    query: *mut *mut tessera_query_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, ctx| {
        let stall_rounds = match sim.objects.get::<ContextObj>(ctx)?.setting(STALL_ROUNDS) {
            Some(raw) => raw
                .parse()
                .map_err(|_| SimError::invalid(format!("{STALL_ROUNDS} is not an integer: '{raw}'")))?,
            None => 0,
        };
        let array_id = id(array, "array")?;
        let obj = sim.objects.get::<ArrayObj>(array_id)?;
        let (mode, schema) = obj.opened()?;
        if mode != query_type {
            return Err(SimError::state(format!(
                "array '{}' is open in mode {mode}, not {query_type}",
                obj.uri
            )));
        }
        let def = QueryObj::new(obj.uri.clone(), query_type, schema.clone(), stall_rounds);
        let new = sim.alloc(ctx, def, &[array_id])?;
        put(query, new)
    })
}

/// Frees a query and nulls `*query`.
///
/// # Safety
///
/// `query` must be null or a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_free(query: *mut *mut tessera_query_t) {
    free_slot(query);
}

/// # Safety
///
/// Handles must come from this engine.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_set_layout(ctx: *mut tessera_ctx_t, query: *mut tessera_query_t, layout: u32) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        if layout > TESSERA_UNORDERED {
            return Err(SimError::invalid(format!("unknown layout {layout}")));
        }
        query_mut(sim, query)?.layout = layout;
        Ok(())
    })
}

/// # Safety
///
/// `layout` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_get_layout(ctx: *mut tessera_ctx_t, query: *mut tessera_query_t, layout: *mut u32) -> capi_return_t {
    ctx_call(ctx, |sim, _| write(layout, query_mut(sim, query)?.layout))
}

/// Restricts a read to the ranges of a copy of `subarray`.
///
/// # Safety
///
/// Handles must come from this engine.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_set_subarray(
    ctx: *mut tessera_ctx_t,
    query: *mut tessera_query_t,
    subarray: *mut tessera_subarray_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let def = sim.objects.get::<SubarrayDef>(id(subarray, "subarray")?)?.clone();
        let query = query_mut(sim, query)?;
        if def.dims.len() != query.schema.dims().len() {
            return Err(SimError::invalid("subarray does not match the array of the query"));
        }
        query.subarray = Some(def);
        Ok(())
    })
}

/// Filters a read by a copy of `cond`.
///
/// # Safety
///
/// Handles must come from this engine.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_set_condition(
    ctx: *mut tessera_ctx_t,
    query: *mut tessera_query_t,
    cond: *mut tessera_query_condition_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let condition = sim
            .objects
            .get::<ConditionObj>(id(cond, "query condition")?)?
            .condition
            .clone()
            .ok_or_else(|| SimError::state("query condition is not initialized"))?;
        let query = query_mut(sim, query)?;
        if query.query_type != TESSERA_READ {
            return Err(SimError::state("conditions only apply to read queries"));
        }
        query.condition = Some(condition);
        Ok(())
    })
}

unsafe fn bind<T>(
    ctx: *mut tessera_ctx_t,
    query: *mut tessera_query_t,
    name: *const c_char,
    part: BufferPart,
    buffer: *mut T,
    buffer_size: *mut u64,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let name = text(name, "field name")?;
        let buf = RawBuf::new(buffer, buffer_size)?;
        query_mut(sim, query)?.bind(&name, part, buf)
    })
}

/// Binds the data buffer of field `name`.
///
/// # Arguments
///
/// * `buffer` - Caller memory for the values
/// * `buffer_size` - In: bytes available (read) or provided (write). Out,
///   after a read submission: bytes filled
///
/// # Safety
///
/// Both pointers must stay valid and unmoved while the query can be submitted.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_set_data_buffer(
    ctx: *mut tessera_ctx_t,
    query: *mut tessera_query_t,
    name: *const c_char,
    buffer: *mut c_void,
    buffer_size: *mut u64,
) -> capi_return_t {
    bind(ctx, query, name, BufferPart::Data, buffer, buffer_size)
}

/// Binds the offsets buffer of variable-length field `name`. Offsets are
/// byte positions in the data buffer, starting at 0 on every submission.
///
/// # Safety
///
/// Both pointers must stay valid and unmoved while the query can be submitted.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_set_offsets_buffer(
    ctx: *mut tessera_ctx_t,
    query: *mut tessera_query_t,
    name: *const c_char,
    buffer: *mut u64,
    buffer_size: *mut u64,
) -> capi_return_t {
    bind(ctx, query, name, BufferPart::Offsets, buffer, buffer_size)
}

/// Binds the validity buffer of nullable field `name`: one byte per cell,
/// 1 for a value and 0 for null.
///
/// # Safety
///
/// Both pointers must stay valid and unmoved while the query can be submitted.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_set_validity_buffer(
    ctx: *mut tessera_ctx_t,
    query: *mut tessera_query_t,
    name: *const c_char,
    buffer: *mut u8,
    buffer_size: *mut u64,
) -> capi_return_t {
    bind(ctx, query, name, BufferPart::Validity, buffer, buffer_size)
}

fn submit(sim: &mut Sim, query: usize) -> SimResult<()> {
    let obj = sim.objects.get_mut::<QueryObj>(query)?;
    obj.submit(&mut sim.storage)
}

/// Submits the query and blocks until it finishes.
///
/// A read fills the bound buffers with as many results as fit and updates
/// their sizes; the status then tells whether more remain.
///
/// # Safety
///
/// Every bound buffer must still be valid.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_submit(ctx: *mut tessera_ctx_t, query: *mut tessera_query_t) -> capi_return_t {
    ctx_call(ctx, |sim, _| submit(sim, id(query, "query")?))
}

/// Submits the query on a background thread and calls `callback` with
/// `callback_data` once it finishes, successfully or not. A failure is
/// recorded on the context and the query status.
///
/// # Safety
///
/// `ctx`, `query`, the bound buffers and `callback_data` must stay valid
/// until the callback runs.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_submit_async(
    ctx: *mut tessera_ctx_t,
    query: *mut tessera_query_t,
    callback: tessera_query_callback_t,
    callback_data: *mut c_void,
) -> capi_return_t {
    let mut target = (0, 0);
    let rc = ctx_call(ctx, |sim, ctx| {
        let query = id(query, "query")?;
        sim.objects.get::<QueryObj>(query)?;
        target = (ctx, query);
        Ok(())
    });
    if rc != TESSERA_OK {
        return rc;
    }
    let data = callback_data as usize;
    let spawned = thread::Builder::new()
        .name("tessera-sim-submit".into())
        .spawn(move || {
            let (ctx, query) = target;
            let rc = ctx_call(ctx as *mut tessera_ctx_t, |sim, _| submit(sim, query));
            debug!(query, rc, "async submission finished");
            if let Some(callback) = callback {
                // SAFETY: the caller keeps `callback_data` valid until now.
                unsafe { callback(data as *mut c_void) };
            }
        });
    match spawned {
        Ok(_) => TESSERA_OK,
        Err(err) => {
            warn!(%err, "could not start submission thread");
            ctx_call(ctx, |_, _| Err(SimError::io("spawn submission thread", err)))
        }
    }
}

/// Finalizes the query. Nothing is buffered, so this only checks the handle.
///
/// # Safety
///
/// Handles must come from this engine.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_finalize(ctx: *mut tessera_ctx_t, query: *mut tessera_query_t) -> capi_return_t {
    ctx_call(ctx, |sim, _| query_mut(sim, query).map(|_| ()))
}

/// # Safety
///
/// `status` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_get_status(ctx: *mut tessera_ctx_t, query: *mut tessera_query_t, status: *mut u32) -> capi_return_t {
    ctx_call(ctx, |sim, _| write(status, query_mut(sim, query)?.status))
}

/// # Safety
///
/// `details` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_get_status_details(
    ctx: *mut tessera_ctx_t,
    query: *mut tessera_query_t,
    details: *mut tessera_query_status_details_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let incomplete_reason = query_mut(sim, query)?.reason;
        write(details, tessera_query_status_details_t { incomplete_reason })
    })
}

/// # Safety
///
/// `query_type` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_get_type(ctx: *mut tessera_ctx_t, query: *mut tessera_query_t, query_type: *mut u32) -> capi_return_t {
    ctx_call(ctx, |sim, _| write(query_type, query_mut(sim, query)?.query_type))
}

/// Sets `*has_results` to 1 if the last submission returned any cells.
///
/// # Safety
///
/// `has_results` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_has_results(
    ctx: *mut tessera_ctx_t,
    query: *mut tessera_query_t,
    has_results: *mut i32,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        write(has_results, i32::from(query_mut(sim, query)?.has_results))
    })
}

/// Writes the bytes a complete read of `name` needs: data, offsets and
/// validity. Offsets and validity are zero for fields without them.
///
/// # Safety
///
/// `name` must be a valid null-terminated string; the size pointers valid.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_get_est_result_size(
    ctx: *mut tessera_ctx_t,
    query: *mut tessera_query_t,
    name: *const c_char,
    size_data: *mut u64,
    size_offsets: *mut u64,
    size_validity: *mut u64,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let name = text(name, "field name")?;
        let obj = sim.objects.get::<QueryObj>(id(query, "query")?)?;
        let [data, offsets, validity] = obj.estimate(&name, &sim.storage)?;
        debug!(field = %name, data, offsets, validity, "estimated result size");
        write(size_data, data)?;
        write(size_offsets, offsets)?;
        write(size_validity, validity)
    })
}

/// Looks up a dimension, attribute or aggregate output of the query.
///
/// # Safety
///
/// `name` must be a valid null-terminated string; `field` a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_get_field(
    ctx: *mut tessera_ctx_t,
    query: *mut tessera_query_t,
    name: *const c_char,
    field: *mut *mut tessera_query_field_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, ctx| {
        let name = text(name, "field name")?;
        let query_id = id(query, "query")?;
        let shape = sim.objects.get::<QueryObj>(query_id)?.field_shape(&name)?;
        let new = sim.alloc(ctx, FieldObj { query: query_id, shape }, &[query_id])?;
        put(field, new)
    })
}

/// Frees a query field and nulls `*field`.
///
/// # Safety
///
/// `field` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_field_free(ctx: *mut tessera_ctx_t, field: *mut *mut tessera_query_field_t) -> capi_return_t {
    free_under_ctx::<FieldObj, _>(ctx, field)
}

/// # Safety
///
/// `datatype` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_field_datatype(ctx: *mut tessera_ctx_t, field: *mut tessera_query_field_t, datatype: *mut u32) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        write(datatype, sim.objects.get::<FieldObj>(id(field, "query field")?)?.shape.datatype)
    })
}

/// # Safety
///
/// `num` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_field_cell_val_num(ctx: *mut tessera_ctx_t, field: *mut tessera_query_field_t, num: *mut u32) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        write(num, sim.objects.get::<FieldObj>(id(field, "query field")?)?.shape.cell_val_num)
    })
}

/// # Safety
///
/// `nullable` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_field_nullable(ctx: *mut tessera_ctx_t, field: *mut tessera_query_field_t, nullable: *mut u8) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let shape = sim.objects.get::<FieldObj>(id(field, "query field")?)?.shape;
        write(nullable, u8::from(shape.nullable))
    })
}

/// Returns the channel the field belongs to.
///
/// # Safety
///
/// `channel` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_field_channel(
    ctx: *mut tessera_ctx_t,
    field: *mut tessera_query_field_t,
    channel: *mut *mut tessera_query_channel_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, ctx| {
        let query = sim.objects.get::<FieldObj>(id(field, "query field")?)?.query;
        let new = sim.alloc(ctx, ChannelObj { query }, &[query])?;
        put(channel, new)
    })
}

/// Returns the channel that spans every result of the query.
///
/// # Safety
///
/// `channel` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_get_default_channel(
    ctx: *mut tessera_ctx_t,
    query: *mut tessera_query_t,
    channel: *mut *mut tessera_query_channel_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, ctx| {
        let query = id(query, "query")?;
        sim.objects.get::<QueryObj>(query)?;
        let new = sim.alloc(ctx, ChannelObj { query }, &[query])?;
        put(channel, new)
    })
}

/// Frees a channel and nulls `*channel`.
///
/// # Safety
///
/// `channel` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_channel_free(ctx: *mut tessera_ctx_t, channel: *mut *mut tessera_query_channel_t) -> capi_return_t {
    free_under_ctx::<ChannelObj, _>(ctx, channel)
}

/// Allocates an aggregate operation.
///
/// # Arguments
///
/// * `operator` - One of the `TESSERA_AGGREGATE_*` constants
/// * `input_field` - Field to aggregate; null for `TESSERA_AGGREGATE_COUNT`
///
/// # Safety
///
/// `input_field` must be null or a valid null-terminated string.
#[no_mangle]
pub unsafe extern "C" fn tessera_channel_operation_alloc(
    ctx: *mut tessera_ctx_t,
    query: *mut tessera_query_t,
    operator: u32,
    input_field: *const c_char,
    operation: *mut *mut tessera_channel_operation_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, ctx| {
        let input = optional_text(input_field, "input field")?;
        let query_id = id(query, "query")?;
        let shape = sim
            .objects
            .get::<QueryObj>(query_id)?
            .aggregate_shape(operator, input.as_deref())?;
        let def = OperationObj {
            op: operator,
            input,
            shape,
        };
        let new = sim.alloc(ctx, def, &[query_id])?;
        put(operation, new)
    })
}

/// Frees an aggregate operation and nulls `*operation`.
///
/// # Safety
///
/// `operation` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_channel_operation_free(
    ctx: *mut tessera_ctx_t,
    operation: *mut *mut tessera_channel_operation_t,
) -> capi_return_t {
    free_under_ctx::<OperationObj, _>(ctx, operation)
}

/// Computes `operation` over the channel into a new query field called
/// `output_field`. Bind a data buffer for it to receive the value.
///
/// # Safety
///
/// `output_field` must be a valid null-terminated string.
#[no_mangle]
pub unsafe extern "C" fn tessera_channel_apply_aggregate(
    ctx: *mut tessera_ctx_t,
    channel: *mut tessera_query_channel_t,
    output_field: *const c_char,
    operation: *mut tessera_channel_operation_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let output = text(output_field, "output field")?;
        let query_id = sim.objects.get::<ChannelObj>(id(channel, "query channel")?)?.query;
        let op = sim.objects.get::<OperationObj>(id(operation, "channel operation")?)?;
        let def = AggregateDef {
            op: op.op,
            input: op.input.clone(),
            shape: op.shape,
        };
        let query = sim.objects.get_mut::<QueryObj>(query_id)?;
        if query.query_type != TESSERA_READ {
            return Err(SimError::state("aggregates only apply to read queries"));
        }
        if query.schema.field(&output).is_some() || query.aggregates.contains_key(&output) {
            return Err(SimError::invalid(format!("field '{output}' already exists on the query")));
        }
        query.aggregates.insert(output, def);
        Ok(())
    })
}
