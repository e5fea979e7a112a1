//! Arrays, subarrays, query conditions, groups and fragment info.

use crate::engine::{Condition, ConditionObj, SubarrayDef};
use crate::error::{SimError, SimResult};
use crate::model::{EvolutionDef, Scalar, SchemaDef};
use crate::state::{ctx_call, free_slot, id, optional_text, put, raw_bytes, text, write, Sim};
use crate::storage::{ArrayObj, FragmentInfoObj, GroupObj, Member};
use std::cmp::Ordering;
use std::ffi::{c_char, c_void};
use tessera_sys::*;
use tracing::debug;

fn query_type(raw: u32) -> SimResult<u32> {
    match raw {
        TESSERA_READ | TESSERA_WRITE => Ok(raw),
        other => Err(SimError::invalid(format!("unknown query type {other}"))),
    }
}

/// Allocates a closed array handle for `uri`. The array need not exist yet.
///
/// # Arguments
///
/// * `ctx` - The context
/// * `uri` - Array URI
/// * `array` - Output pointer for the array
///
/// # Safety
///
/// - `uri` must be a valid null-terminated UTF-8 string
/// - `array` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_array_alloc(
    ctx: *mut tessera_ctx_t,
    uri: *const c_char,
    array: *mut *mut tessera_array_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, ctx| {
        let uri = text(uri, "array uri")?;
        let new = sim.alloc(ctx, ArrayObj { uri, open: None }, &[])?;
        put(array, new)
    })
}

/// Frees an array handle and nulls `*array`.
///
/// # Safety
///
/// `array` must be null or a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_free(array: *mut *mut tessera_array_t) {
    free_slot(array);
}

/// Creates an empty array at `uri` with a copy of `schema`.
///
/// # Returns
///
/// `TESSERA_OK` on success; an error if the schema is invalid, dense, or the
/// URI is already taken.
///
/// # Safety
///
/// `uri` must be a valid null-terminated string.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_create(
    ctx: *mut tessera_ctx_t,
    uri: *const c_char,
    schema: *mut tessera_array_schema_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let uri = text(uri, "array uri")?;
        let schema = sim.objects.get::<SchemaDef>(id(schema, "array schema")?)?.clone();
        sim.storage.create_array(&uri, schema)?;
        debug!(%uri, "array created");
        Ok(())
    })
}

/// Opens the array for reading or writing, snapshotting its schema.
///
/// # Safety
///
/// Handles must come from this engine.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_open(ctx: *mut tessera_ctx_t, array: *mut tessera_array_t, query_type_raw: u32) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let mode = query_type(query_type_raw)?;
        let array_id = id(array, "array")?;
        let obj = sim.objects.get::<ArrayObj>(array_id)?;
        if obj.open.is_some() {
            return Err(SimError::state(format!("array '{}' is already open", obj.uri)));
        }
        let uri = obj.uri.clone();
        let schema = sim.storage.array(&uri)?.schema.clone();
        sim.objects.get_mut::<ArrayObj>(array_id)?.open = Some((mode, schema));
        Ok(())
    })
}

/// Closes the array. Closing a closed array does nothing.
///
/// # Safety
///
/// Handles must come from this engine.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_close(ctx: *mut tessera_ctx_t, array: *mut tessera_array_t) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        sim.objects.get_mut::<ArrayObj>(id(array, "array")?)?.open = None;
        Ok(())
    })
}

/// # Safety
///
/// `is_open` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_is_open(ctx: *mut tessera_ctx_t, array: *mut tessera_array_t, is_open: *mut i32) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let open = sim.objects.get::<ArrayObj>(id(array, "array")?)?.open.is_some();
        write(is_open, i32::from(open))
    })
}

/// Returns a new schema object copied from the open array.
///
/// # Safety
///
/// `schema` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_get_schema(
    ctx: *mut tessera_ctx_t,
    array: *mut tessera_array_t,
    schema: *mut *mut tessera_array_schema_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, ctx| {
        let copy = sim.objects.get::<ArrayObj>(id(array, "array")?)?.opened()?.1.clone();
        let new = sim.alloc(ctx, copy, &[])?;
        put(schema, new)
    })
}

/// Refreshes the schema of an array open for reading from storage.
///
/// # Safety
///
/// Handles must come from this engine.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_reopen(ctx: *mut tessera_ctx_t, array: *mut tessera_array_t) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let array_id = id(array, "array")?;
        let obj = sim.objects.get::<ArrayObj>(array_id)?;
        let mode = obj.opened()?.0;
        if mode != TESSERA_READ {
            return Err(SimError::state(format!("array '{}' is open for writing and cannot be reopened", obj.uri)));
        }
        let schema = sim.storage.array(&obj.uri)?.schema.clone();
        sim.objects.get_mut::<ArrayObj>(array_id)?.open = Some((mode, schema));
        Ok(())
    })
}

/// Writes the smallest and largest coordinate of dimension `name` over
/// every stored cell to `domain`, start first. With no cells `*is_empty` is
/// set to 1 and `domain` is left untouched.
///
/// # Safety
///
/// `name` must be a valid null-terminated string. `domain` must have room for
/// two values of the dimension's type; `is_empty` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_get_non_empty_domain_from_name(
    ctx: *mut tessera_ctx_t,
    array: *mut tessera_array_t,
    name: *const c_char,
    domain: *mut c_void,
    is_empty: *mut i32,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let name = text(name, "dimension name")?;
        let obj = sim.objects.get::<ArrayObj>(id(array, "array")?)?;
        let (_, schema) = obj.opened()?;
        let dim = schema
            .dims()
            .iter()
            .find(|d| d.name() == name)
            .ok_or_else(|| SimError::invalid(format!("array has no dimension named '{name}'")))?;
        let width = dim
            .shape()
            .cell_bytes()
            .filter(|w| *w > 0)
            .ok_or_else(|| SimError::invalid(format!("dimension '{name}' has variable-length coordinates")))?;

        let stored = sim.storage.array(&obj.uri)?;
        let mut bounds: Option<(&[u8], &[u8])> = None;
        for coord in stored.cells.iter().filter_map(|cell| cell.get(&name).and_then(Option::as_deref)) {
            let value = Scalar::decode(dim.datatype, coord);
            bounds = Some(match bounds {
                None => (coord, coord),
                Some((lo, hi)) => (
                    if value.order(&Scalar::decode(dim.datatype, lo)) == Ordering::Less { coord } else { lo },
                    if value.order(&Scalar::decode(dim.datatype, hi)) == Ordering::Greater { coord } else { hi },
                ),
            });
        }
        let Some((lo, hi)) = bounds else {
            return write(is_empty, 1);
        };
        if domain.is_null() {
            return Err(SimError::Null("domain"));
        }
        let out = domain.cast::<u8>();
        std::ptr::copy_nonoverlapping(lo.as_ptr(), out, width);
        std::ptr::copy_nonoverlapping(hi.as_ptr(), out.add(width), width);
        write(is_empty, 0)
    })
}

/// Applies `evolution` to the stored schema of the array at `uri`.
///
/// Cells already written get a default for every added attribute: null if
/// the attribute is nullable, otherwise zeros (or an empty value for
/// variable-length attributes). Handles opened before the call keep the
/// schema they were opened with.
///
/// # Safety
///
/// `uri` must be a valid null-terminated string.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_evolve(
    ctx: *mut tessera_ctx_t,
    uri: *const c_char,
    evolution: *mut tessera_array_schema_evolution_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let uri = text(uri, "array uri")?;
        let evolution = sim
            .objects
            .get::<EvolutionDef>(id(evolution, "array schema evolution")?)?
            .clone();
        evolve(sim, &uri, &evolution)
    })
}

fn evolve(sim: &mut Sim, uri: &str, evolution: &EvolutionDef) -> SimResult<()> {
    let stored = sim.storage.array_mut(uri)?;
    let mut schema = stored.schema.clone();
    evolution.apply(&mut schema)?;
    for cell in &mut stored.cells {
        for name in &evolution.drop {
            cell.remove(name);
        }
        for attr in &evolution.add {
            let shape = attr.shape();
            let default = if shape.nullable {
                None
            } else {
                Some(vec![0; shape.cell_bytes().unwrap_or(0)])
            };
            cell.insert(attr.name().to_owned(), default);
        }
    }
    stored.schema = schema;
    debug!(uri, added = evolution.add.len(), dropped = evolution.drop.len(), "schema evolved");
    Ok(())
}

/// Allocates a subarray over the dimensions of the open array. With no
/// ranges added, every dimension is selected whole.
///
/// # Safety
///
/// `subarray` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_subarray_alloc(
    ctx: *mut tessera_ctx_t,
    array: *mut tessera_array_t,
    subarray: *mut *mut tessera_subarray_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, ctx| {
        let array_id = id(array, "array")?;
        let def = SubarrayDef::for_schema(sim.objects.get::<ArrayObj>(array_id)?.opened()?.1);
        let new = sim.alloc(ctx, def, &[array_id])?;
        put(subarray, new)
    })
}

/// Frees a subarray and nulls `*subarray`.
///
/// # Safety
///
/// `subarray` must be null or a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_subarray_free(subarray: *mut *mut tessera_subarray_t) {
    free_slot(subarray);
}

/// Adds the inclusive range `[start, end]` on dimension `dim_idx`.
///
/// # Safety
///
/// `start` and `end` must each point to one coordinate of the dimension's
/// datatype.
#[no_mangle]
pub unsafe extern "C" fn tessera_subarray_add_range(
    ctx: *mut tessera_ctx_t,
    subarray: *mut tessera_subarray_t,
    dim_idx: u32,
    start: *const c_void,
    end: *const c_void,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let def = sim.objects.get_mut::<SubarrayDef>(id(subarray, "subarray")?)?;
        let size = def.coord_size(dim_idx)? as u64;
        let start = raw_bytes(start, size, "range start")?.to_vec();
        let end = raw_bytes(end, size, "range end")?.to_vec();
        def.add_range(dim_idx, start, end)
    })
}

/// # Safety
///
/// `range_num` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_subarray_get_range_num(
    ctx: *mut tessera_ctx_t,
    subarray: *mut tessera_subarray_t,
    dim_idx: u32,
    range_num: *mut u64,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let n = sim.objects.get::<SubarrayDef>(id(subarray, "subarray")?)?.range_num(dim_idx)?;
        write(range_num, n)
    })
}

/// Allocates an empty query condition; initialize it before use.
///
/// # Safety
///
/// `cond` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_condition_alloc(
    ctx: *mut tessera_ctx_t,
    cond: *mut *mut tessera_query_condition_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, ctx| {
        let new = sim.alloc(ctx, ConditionObj::default(), &[])?;
        put(cond, new)
    })
}

/// Frees a query condition and nulls `*cond`.
///
/// # Safety
///
/// `cond` must be null or a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_condition_free(cond: *mut *mut tessera_query_condition_t) {
    free_slot(cond);
}

/// Makes `cond` the comparison `field op value`.
///
/// # Arguments
///
/// * `field_name` - Attribute or dimension to compare
/// * `value`, `value_size` - Raw bytes of the value
/// * `op` - One of `TESSERA_LT` .. `TESSERA_NE`
///
/// # Safety
///
/// `value` must be valid for `value_size` bytes.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_condition_init(
    ctx: *mut tessera_ctx_t,
    cond: *mut tessera_query_condition_t,
    field_name: *const c_char,
    value: *const c_void,
    value_size: u64,
    op: u32,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let field = text(field_name, "field name")?;
        let value = raw_bytes(value, value_size, "condition value")?.to_vec();
        let condition = Condition::compare(field, value, op)?;
        sim.objects
            .get_mut::<ConditionObj>(id(cond, "query condition")?)?
            .condition = Some(condition);
        Ok(())
    })
}

fn initialized(sim: &mut Sim, cond: *mut tessera_query_condition_t) -> SimResult<Condition> {
    sim.objects
        .get::<ConditionObj>(id(cond, "query condition")?)?
        .condition
        .clone()
        .ok_or_else(|| SimError::state("query condition is not initialized"))
}

/// Combines two conditions into a new one with `TESSERA_AND` or
/// `TESSERA_OR`. `TESSERA_NOT` is rejected; use
/// [`tessera_query_condition_negate`].
///
/// # Safety
///
/// `combined` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_condition_combine(
    ctx: *mut tessera_ctx_t,
    left: *mut tessera_query_condition_t,
    right: *mut tessera_query_condition_t,
    op: u32,
    combined: *mut *mut tessera_query_condition_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, ctx| {
        let condition = Condition::combine(initialized(sim, left)?, initialized(sim, right)?, op)?;
        let new = sim.alloc(
            ctx,
            ConditionObj {
                condition: Some(condition),
            },
            &[],
        )?;
        put(combined, new)
    })
}

/// Returns a new condition that holds where `cond` does not.
///
/// # Safety
///
/// `negated` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_condition_negate(
    ctx: *mut tessera_ctx_t,
    cond: *mut tessera_query_condition_t,
    negated: *mut *mut tessera_query_condition_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, ctx| {
        let inner = initialized(sim, cond)?;
        let new = sim.alloc(
            ctx,
            ConditionObj {
                condition: Some(Condition::Not(Box::new(inner))),
            },
            &[],
        )?;
        put(negated, new)
    })
}

/// Creates an empty group at `uri`.
///
/// # Safety
///
/// `uri` must be a valid null-terminated string.
#[no_mangle]
pub unsafe extern "C" fn tessera_group_create(ctx: *mut tessera_ctx_t, uri: *const c_char) -> capi_return_t {
    ctx_call(ctx, |sim, _| sim.storage.create_group(&text(uri, "group uri")?))
}

/// Allocates a closed group handle for `uri`.
///
/// # Safety
///
/// `uri` must be a valid null-terminated string; `group` a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_group_alloc(
    ctx: *mut tessera_ctx_t,
    uri: *const c_char,
    group: *mut *mut tessera_group_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, ctx| {
        let obj = GroupObj {
            uri: text(uri, "group uri")?,
            mode: None,
            pending: Vec::new(),
        };
        let new = sim.alloc(ctx, obj, &[])?;
        put(group, new)
    })
}

/// Frees a group handle and nulls `*group`. Members added since the last
/// close are discarded.
///
/// # Safety
///
/// `group` must be null or a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_group_free(group: *mut *mut tessera_group_t) {
    free_slot(group);
}

/// # Safety
///
/// Handles must come from this engine.
#[no_mangle]
pub unsafe extern "C" fn tessera_group_open(ctx: *mut tessera_ctx_t, group: *mut tessera_group_t, query_type_raw: u32) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let mode = query_type(query_type_raw)?;
        let group_id = id(group, "group")?;
        let obj = sim.objects.get::<GroupObj>(group_id)?;
        if obj.mode.is_some() {
            return Err(SimError::state(format!("group '{}' is already open", obj.uri)));
        }
        let uri = obj.uri.clone();
        sim.storage.group(&uri)?;
        sim.objects.get_mut::<GroupObj>(group_id)?.mode = Some(mode);
        Ok(())
    })
}

/// Closes the group, persisting members added while open for writing.
///
/// # Safety
///
/// Handles must come from this engine.
#[no_mangle]
pub unsafe extern "C" fn tessera_group_close(ctx: *mut tessera_ctx_t, group: *mut tessera_group_t) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let obj = sim.objects.get_mut::<GroupObj>(id(group, "group")?)?;
        obj.mode = None;
        let pending = std::mem::take(&mut obj.pending);
        let uri = obj.uri.clone();
        if !pending.is_empty() {
            debug!(%uri, added = pending.len(), "group members persisted");
            sim.storage.group_mut(&uri)?.members.extend(pending);
        }
        Ok(())
    })
}

/// Adds a member to a group open for writing.
///
/// # Arguments
///
/// * `uri` - Member URI; resolved against the group URI when `relative` is non-zero
/// * `relative` - Whether `uri` is relative
/// * `name` - Optional member name; may be null
///
/// # Safety
///
/// `uri` must be a valid null-terminated string; `name` null or one.
#[no_mangle]
pub unsafe extern "C" fn tessera_group_add_member(
    ctx: *mut tessera_ctx_t,
    group: *mut tessera_group_t,
    uri: *const c_char,
    relative: u8,
    name: *const c_char,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let member = text(uri, "member uri")?;
        let name = optional_text(name, "member name")?;
        let obj = sim.objects.get_mut::<GroupObj>(id(group, "group")?)?;
        if obj.mode != Some(TESSERA_WRITE) {
            return Err(SimError::state(format!("group '{}' is not open for writing", obj.uri)));
        }
        let uri = if relative != 0 {
            format!("{}/{}", obj.uri.trim_end_matches('/'), member)
        } else {
            member
        };
        obj.pending.push(Member { uri, name });
        Ok(())
    })
}

/// Counts persisted members plus those added since the group was opened.
///
/// # Safety
///
/// `count` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_group_get_member_count(ctx: *mut tessera_ctx_t, group: *mut tessera_group_t, count: *mut u64) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let obj = sim.objects.get::<GroupObj>(id(group, "group")?)?;
        if obj.mode.is_none() {
            return Err(SimError::state(format!("group '{}' is not open", obj.uri)));
        }
        let (uri, pending) = (obj.uri.clone(), obj.pending.len());
        let stored = sim.storage.group(&uri)?;
        debug!(%uri, names = stored.members.iter().filter(|m| m.name.is_some()).count(), "member count");
        write(count, (stored.members.len() + pending) as u64)
    })
}

/// Allocates fragment info for the array at `array_uri`; call
/// [`tessera_fragment_info_load`] before reading it.
///
/// # Safety
///
/// `array_uri` must be a valid null-terminated string; `info` a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_fragment_info_alloc(
    ctx: *mut tessera_ctx_t,
    array_uri: *const c_char,
    info: *mut *mut tessera_fragment_info_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, ctx| {
        let obj = FragmentInfoObj {
            uri: text(array_uri, "array uri")?,
            loaded: None,
        };
        let new = sim.alloc(ctx, obj, &[])?;
        put(info, new)
    })
}

/// Frees fragment info and nulls `*info`.
///
/// # Safety
///
/// `info` must be null or a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_fragment_info_free(info: *mut *mut tessera_fragment_info_t) {
    free_slot(info);
}

/// Loads the fragment list of the array.
///
/// # Safety
///
/// Handles must come from this engine.
#[no_mangle]
pub unsafe extern "C" fn tessera_fragment_info_load(ctx: *mut tessera_ctx_t, info: *mut tessera_fragment_info_t) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let info_id = id(info, "fragment info")?;
        let uri = sim.objects.get::<FragmentInfoObj>(info_id)?.uri.clone();
        let fragments = sim.storage.array(&uri)?.fragments;
        sim.objects.get_mut::<FragmentInfoObj>(info_id)?.loaded = Some(fragments);
        Ok(())
    })
}

/// # Safety
///
/// `num` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_fragment_info_get_fragment_num(
    ctx: *mut tessera_ctx_t,
    info: *mut tessera_fragment_info_t,
    num: *mut u32,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let loaded = sim
            .objects
            .get::<FragmentInfoObj>(id(info, "fragment info")?)?
            .loaded
            .ok_or_else(|| SimError::state("fragment info is not loaded"))?;
        write(num, loaded)
    })
}
