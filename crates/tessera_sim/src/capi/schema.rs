//! Attributes, dimensions, domains, filters, enumerations, schemas and
//! schema evolution.

use crate::error::SimError;
use crate::model::{
    datatype_size, AttributeDef, DimensionDef, DomainDef, EnumerationDef, EvolutionDef, FilterDef, FilterListDef,
    SchemaDef,
};
use crate::state::{ctx_call, free_slot, id, put, raw_bytes, text, write};
use std::ffi::{c_char, c_int, c_void};
use tessera_sys::*;
use tracing::debug;

/// Allocates an attribute.
///
/// # Arguments
///
/// * `ctx` - The context
/// * `name` - Attribute name
/// * `datatype` - One of the `TESSERA_*` datatype constants
/// * `attr` - Output pointer for the attribute
///
/// # Safety
///
/// - `name` must be a valid null-terminated UTF-8 string
/// - `attr` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_attribute_alloc(
    ctx: *mut tessera_ctx_t,
    name: *const c_char,
    datatype: u32,
    attr: *mut *mut tessera_attribute_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, ctx| {
        let def = AttributeDef::new(&text(name, "attribute name")?, datatype)?;
        let id = sim.alloc(ctx, def, &[])?;
        put(attr, id)
    })
}

/// Frees an attribute and nulls `*attr`.
///
/// # Safety
///
/// `attr` must be null or a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_attribute_free(attr: *mut *mut tessera_attribute_t) {
    free_slot(attr);
}

/// Marks the attribute nullable (non-zero) or not.
///
/// # Safety
///
/// Handles must come from this engine.
#[no_mangle]
pub unsafe extern "C" fn tessera_attribute_set_nullable(
    ctx: *mut tessera_ctx_t,
    attr: *mut tessera_attribute_t,
    nullable: u8,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        sim.objects.get_mut::<AttributeDef>(id(attr, "attribute")?)?.nullable = nullable != 0;
        Ok(())
    })
}

/// Sets the number of values per cell; `TESSERA_VAR_NUM` for variable length.
///
/// # Safety
///
/// Handles must come from this engine.
#[no_mangle]
pub unsafe extern "C" fn tessera_attribute_set_cell_val_num(
    ctx: *mut tessera_ctx_t,
    attr: *mut tessera_attribute_t,
    num: u32,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        sim.objects
            .get_mut::<AttributeDef>(id(attr, "attribute")?)?
            .set_cell_val_num(num)
    })
}

/// Copies the filters of `filters` onto the attribute.
///
/// # Safety
///
/// Handles must come from this engine.
#[no_mangle]
pub unsafe extern "C" fn tessera_attribute_set_filter_list(
    ctx: *mut tessera_ctx_t,
    attr: *mut tessera_attribute_t,
    filters: *mut tessera_filter_list_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let list = sim
            .objects
            .get::<FilterListDef>(id(filters, "filter list")?)?
            .filters
            .clone();
        sim.objects.get_mut::<AttributeDef>(id(attr, "attribute")?)?.filters = list;
        Ok(())
    })
}

/// Ties the attribute to the schema enumeration called `name`.
///
/// # Safety
///
/// `name` must be a valid null-terminated string.
#[no_mangle]
pub unsafe extern "C" fn tessera_attribute_set_enumeration_name(
    ctx: *mut tessera_ctx_t,
    attr: *mut tessera_attribute_t,
    name: *const c_char,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let name = text(name, "enumeration name")?;
        sim.objects.get_mut::<AttributeDef>(id(attr, "attribute")?)?.enumeration = Some(name);
        Ok(())
    })
}

/// Returns the attribute name, owned by the attribute.
///
/// # Safety
///
/// `name` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_attribute_get_name(
    ctx: *mut tessera_ctx_t,
    attr: *mut tessera_attribute_t,
    name: *mut *const c_char,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let def = sim.objects.get::<AttributeDef>(id(attr, "attribute")?)?;
        write(name, def.name.as_ptr())
    })
}

/// # Safety
///
/// `datatype` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_attribute_get_type(
    ctx: *mut tessera_ctx_t,
    attr: *mut tessera_attribute_t,
    datatype: *mut u32,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        write(datatype, sim.objects.get::<AttributeDef>(id(attr, "attribute")?)?.datatype)
    })
}

/// # Safety
///
/// `nullable` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_attribute_get_nullable(
    ctx: *mut tessera_ctx_t,
    attr: *mut tessera_attribute_t,
    nullable: *mut u8,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let def = sim.objects.get::<AttributeDef>(id(attr, "attribute")?)?;
        write(nullable, u8::from(def.nullable))
    })
}

/// # Safety
///
/// `num` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_attribute_get_cell_val_num(
    ctx: *mut tessera_ctx_t,
    attr: *mut tessera_attribute_t,
    num: *mut u32,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        write(num, sim.objects.get::<AttributeDef>(id(attr, "attribute")?)?.cell_val_num)
    })
}

/// Allocates a dimension.
///
/// # Arguments
///
/// * `ctx` - The context
/// * `name` - Dimension name
/// * `datatype` - Coordinate datatype
/// * `domain` - Two coordinates `[low, high]`, or null for string dimensions
/// * `tile_extent` - One coordinate, or null for string dimensions
/// * `dim` - Output pointer for the dimension
///
/// # Safety
///
/// `domain` and `tile_extent` must be null or point to values of `datatype`.
#[no_mangle]
pub unsafe extern "C" fn tessera_dimension_alloc(
    ctx: *mut tessera_ctx_t,
    name: *const c_char,
    datatype: u32,
    domain: *const c_void,
    tile_extent: *const c_void,
    dim: *mut *mut tessera_dimension_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, ctx| {
        let name = text(name, "dimension name")?;
        let size = datatype_size(datatype)?;
        let bounds = if domain.is_null() {
            None
        } else {
            let raw = raw_bytes(domain, 2 * size as u64, "domain")?;
            Some((raw[..size].to_vec(), raw[size..].to_vec()))
        };
        if bounds.is_some() == tile_extent.is_null() {
            return Err(SimError::invalid(format!(
                "dimension '{name}' takes a domain and a tile extent together or neither"
            )));
        }
        let def = DimensionDef::new(&name, datatype, bounds)?;
        let id = sim.alloc(ctx, def, &[])?;
        put(dim, id)
    })
}

/// Frees a dimension and nulls `*dim`.
///
/// # Safety
///
/// `dim` must be null or a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_dimension_free(dim: *mut *mut tessera_dimension_t) {
    free_slot(dim);
}

/// Sets the number of values per coordinate. Only string dimensions accept
/// `TESSERA_VAR_NUM`.
///
/// # Safety
///
/// Handles must come from this engine.
#[no_mangle]
pub unsafe extern "C" fn tessera_dimension_set_cell_val_num(
    ctx: *mut tessera_ctx_t,
    dim: *mut tessera_dimension_t,
    num: u32,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        sim.objects
            .get_mut::<DimensionDef>(id(dim, "dimension")?)?
            .set_cell_val_num(num)
    })
}

/// Returns the dimension name, owned by the dimension.
///
/// # Safety
///
/// `name` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_dimension_get_name(
    ctx: *mut tessera_ctx_t,
    dim: *mut tessera_dimension_t,
    name: *mut *const c_char,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let def = sim.objects.get::<DimensionDef>(id(dim, "dimension")?)?;
        write(name, def.name.as_ptr())
    })
}

/// # Safety
///
/// `datatype` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_dimension_get_type(
    ctx: *mut tessera_ctx_t,
    dim: *mut tessera_dimension_t,
    datatype: *mut u32,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        write(datatype, sim.objects.get::<DimensionDef>(id(dim, "dimension")?)?.datatype)
    })
}

/// Allocates an empty domain.
///
/// # Safety
///
/// `domain` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_domain_alloc(ctx: *mut tessera_ctx_t, domain: *mut *mut tessera_domain_t) -> capi_return_t {
    ctx_call(ctx, |sim, ctx| {
        let id = sim.alloc(ctx, DomainDef::default(), &[])?;
        put(domain, id)
    })
}

/// Frees a domain and nulls `*domain`.
///
/// # Safety
///
/// `domain` must be null or a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_domain_free(domain: *mut *mut tessera_domain_t) {
    free_slot(domain);
}

/// Appends a copy of `dim`.
///
/// # Safety
///
/// Handles must come from this engine.
#[no_mangle]
pub unsafe extern "C" fn tessera_domain_add_dimension(
    ctx: *mut tessera_ctx_t,
    domain: *mut tessera_domain_t,
    dim: *mut tessera_dimension_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let def = sim.objects.get::<DimensionDef>(id(dim, "dimension")?)?.clone();
        sim.objects.get_mut::<DomainDef>(id(domain, "domain")?)?.add(def)
    })
}

/// # Safety
///
/// `ndim` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_domain_get_ndim(
    ctx: *mut tessera_ctx_t,
    domain: *mut tessera_domain_t,
    ndim: *mut u32,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let dims = sim.objects.get::<DomainDef>(id(domain, "domain")?)?.dims.len();
        write(ndim, dims as u32)
    })
}

/// Returns a new dimension object copied from the domain.
///
/// # Safety
///
/// `name` must be a valid null-terminated string; `dim` a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_domain_get_dimension_from_name(
    ctx: *mut tessera_ctx_t,
    domain: *mut tessera_domain_t,
    name: *const c_char,
    dim: *mut *mut tessera_dimension_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, ctx| {
        let name = text(name, "dimension name")?;
        let def = sim
            .objects
            .get::<DomainDef>(id(domain, "domain")?)?
            .dimension(&name)?
            .clone();
        let id = sim.alloc(ctx, def, &[])?;
        put(dim, id)
    })
}

/// Allocates a filter of `filter_type`.
///
/// # Safety
///
/// `filter` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_filter_alloc(
    ctx: *mut tessera_ctx_t,
    filter_type: u32,
    filter: *mut *mut tessera_filter_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, ctx| {
        let id = sim.alloc(ctx, FilterDef::new(filter_type)?, &[])?;
        put(filter, id)
    })
}

/// Frees a filter and nulls `*filter`.
///
/// # Safety
///
/// `filter` must be null or a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_filter_free(filter: *mut *mut tessera_filter_t) {
    free_slot(filter);
}

/// Sets a filter option.
///
/// # Arguments
///
/// * `option` - `TESSERA_COMPRESSION_LEVEL` (value is an `i32`) or
///   `TESSERA_BIT_WIDTH_MAX_WINDOW` (value is a `u32`)
/// * `value` - Pointer to the option value
///
/// # Safety
///
/// `value` must point to a value of the type the option takes.
#[no_mangle]
pub unsafe extern "C" fn tessera_filter_set_option(
    ctx: *mut tessera_ctx_t,
    filter: *mut tessera_filter_t,
    option: u32,
    value: *const c_void,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let def = sim.objects.get_mut::<FilterDef>(id(filter, "filter")?)?;
        def.accepts(option)?;
        if value.is_null() {
            return Err(SimError::Null("option value"));
        }
        let value = match option {
            TESSERA_COMPRESSION_LEVEL => i64::from(value.cast::<i32>().read_unaligned()),
            _ => i64::from(value.cast::<u32>().read_unaligned()),
        };
        def.options.insert(option, value);
        debug!(filter_type = def.filter_type, option, value, "filter option set");
        Ok(())
    })
}

/// # Safety
///
/// `filter_type` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_filter_get_type(
    ctx: *mut tessera_ctx_t,
    filter: *mut tessera_filter_t,
    filter_type: *mut u32,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        write(filter_type, sim.objects.get::<FilterDef>(id(filter, "filter")?)?.filter_type)
    })
}

/// Allocates an empty filter list.
///
/// # Safety
///
/// `list` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_filter_list_alloc(
    ctx: *mut tessera_ctx_t,
    list: *mut *mut tessera_filter_list_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, ctx| {
        let id = sim.alloc(ctx, FilterListDef::default(), &[])?;
        put(list, id)
    })
}

/// Frees a filter list and nulls `*list`.
///
/// # Safety
///
/// `list` must be null or a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_filter_list_free(list: *mut *mut tessera_filter_list_t) {
    free_slot(list);
}

/// Appends a copy of `filter`.
///
/// # Safety
///
/// Handles must come from this engine.
#[no_mangle]
pub unsafe extern "C" fn tessera_filter_list_add_filter(
    ctx: *mut tessera_ctx_t,
    list: *mut tessera_filter_list_t,
    filter: *mut tessera_filter_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let def = sim.objects.get::<FilterDef>(id(filter, "filter")?)?.clone();
        sim.objects
            .get_mut::<FilterListDef>(id(list, "filter list")?)?
            .filters
            .push(def);
        Ok(())
    })
}

/// # Safety
///
/// `n` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_filter_list_get_nfilters(
    ctx: *mut tessera_ctx_t,
    list: *mut tessera_filter_list_t,
    n: *mut u32,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let count = sim.objects.get::<FilterListDef>(id(list, "filter list")?)?.filters.len();
        write(n, count as u32)
    })
}

/// Allocates an enumeration, copying its values.
///
/// # Arguments
///
/// * `cell_val_num` - Values per element; `TESSERA_VAR_NUM` requires offsets
/// * `ordered` - Non-zero if the values are ordered
/// * `data`, `data_size` - The packed values
/// * `offsets`, `offsets_size` - Start offset of each value, in bytes; may be null
///
/// # Safety
///
/// `data` and `offsets` must be valid for the given sizes.
#[no_mangle]
pub unsafe extern "C" fn tessera_enumeration_alloc(
    ctx: *mut tessera_ctx_t,
    name: *const c_char,
    datatype: u32,
    cell_val_num: u32,
    ordered: c_int,
    data: *const c_void,
    data_size: u64,
    offsets: *const c_void,
    offsets_size: u64,
    enumeration: *mut *mut tessera_enumeration_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, ctx| {
        let name = text(name, "enumeration name")?;
        let data = raw_bytes(data, data_size, "enumeration data")?;
        let offsets: Option<Vec<u64>> = if offsets.is_null() {
            None
        } else {
            let raw = raw_bytes(offsets, offsets_size, "enumeration offsets")?;
            Some(
                raw.chunks_exact(8)
                    .map(|c| u64::from_ne_bytes(c.try_into().unwrap_or_default()))
                    .collect(),
            )
        };
        let def = EnumerationDef::new(&name, datatype, cell_val_num, ordered != 0, data, offsets.as_deref())?;
        debug!(
            name = def.name(),
            datatype = def.datatype,
            cell_val_num = def.cell_val_num,
            ordered = def.ordered,
            values = def.values.len(),
            "enumeration allocated"
        );
        let id = sim.alloc(ctx, def, &[])?;
        put(enumeration, id)
    })
}

/// Frees an enumeration and nulls `*enumeration`.
///
/// # Safety
///
/// `enumeration` must be null or a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_enumeration_free(enumeration: *mut *mut tessera_enumeration_t) {
    free_slot(enumeration);
}

/// Returns the enumeration name, owned by the enumeration.
///
/// # Safety
///
/// `name` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_enumeration_get_name(
    ctx: *mut tessera_ctx_t,
    enumeration: *mut tessera_enumeration_t,
    name: *mut *const c_char,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let def = sim.objects.get::<EnumerationDef>(id(enumeration, "enumeration")?)?;
        write(name, def.name.as_ptr())
    })
}

/// Allocates an empty schema for a dense or sparse array.
///
/// # Safety
///
/// `schema` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_alloc(
    ctx: *mut tessera_ctx_t,
    array_type: u32,
    schema: *mut *mut tessera_array_schema_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, ctx| {
        let id = sim.alloc(ctx, SchemaDef::new(array_type)?, &[])?;
        put(schema, id)
    })
}

/// Frees a schema and nulls `*schema`.
///
/// # Safety
///
/// `schema` must be null or a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_free(schema: *mut *mut tessera_array_schema_t) {
    free_slot(schema);
}

/// Replaces the schema domain with a copy of `domain`.
///
/// # Safety
///
/// Handles must come from this engine.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_set_domain(
    ctx: *mut tessera_ctx_t,
    schema: *mut tessera_array_schema_t,
    domain: *mut tessera_domain_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let def = sim.objects.get::<DomainDef>(id(domain, "domain")?)?.clone();
        sim.objects.get_mut::<SchemaDef>(id(schema, "array schema")?)?.domain = Some(def);
        Ok(())
    })
}

/// Appends a copy of `attr`.
///
/// # Safety
///
/// Handles must come from this engine.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_add_attribute(
    ctx: *mut tessera_ctx_t,
    schema: *mut tessera_array_schema_t,
    attr: *mut tessera_attribute_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let def = sim.objects.get::<AttributeDef>(id(attr, "attribute")?)?.clone();
        debug!(name = def.name(), filters = def.filters.len(), "attribute added to schema");
        sim.objects
            .get_mut::<SchemaDef>(id(schema, "array schema")?)?
            .add_attribute(def)
    })
}

/// Appends a copy of `enumeration`.
///
/// # Safety
///
/// Handles must come from this engine.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_add_enumeration(
    ctx: *mut tessera_ctx_t,
    schema: *mut tessera_array_schema_t,
    enumeration: *mut tessera_enumeration_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let def = sim.objects.get::<EnumerationDef>(id(enumeration, "enumeration")?)?.clone();
        sim.objects
            .get_mut::<SchemaDef>(id(schema, "array schema")?)?
            .add_enumeration(def)
    })
}

/// Sets the tile capacity, in cells.
///
/// # Safety
///
/// Handles must come from this engine.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_set_capacity(
    ctx: *mut tessera_ctx_t,
    schema: *mut tessera_array_schema_t,
    capacity: u64,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        sim.objects
            .get_mut::<SchemaDef>(id(schema, "array schema")?)?
            .set_capacity(capacity)
    })
}

/// Validates the schema.
///
/// # Safety
///
/// Handles must come from this engine.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_check(ctx: *mut tessera_ctx_t, schema: *mut tessera_array_schema_t) -> capi_return_t {
    ctx_call(ctx, |sim, _| sim.objects.get::<SchemaDef>(id(schema, "array schema")?)?.check())
}

/// Returns a new attribute object copied from the schema.
///
/// # Safety
///
/// `name` must be a valid null-terminated string; `attr` a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_get_attribute_from_name(
    ctx: *mut tessera_ctx_t,
    schema: *mut tessera_array_schema_t,
    name: *const c_char,
    attr: *mut *mut tessera_attribute_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, ctx| {
        let name = text(name, "attribute name")?;
        let def = sim
            .objects
            .get::<SchemaDef>(id(schema, "array schema")?)?
            .attribute(&name)
            .cloned()
            .ok_or_else(|| SimError::invalid(format!("schema has no attribute named '{name}'")))?;
        let id = sim.alloc(ctx, def, &[])?;
        put(attr, id)
    })
}

/// Returns a new domain object copied from the schema.
///
/// # Safety
///
/// `domain` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_get_domain(
    ctx: *mut tessera_ctx_t,
    schema: *mut tessera_array_schema_t,
    domain: *mut *mut tessera_domain_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, ctx| {
        let def = sim
            .objects
            .get::<SchemaDef>(id(schema, "array schema")?)?
            .domain
            .clone()
            .ok_or_else(|| SimError::state("schema has no domain"))?;
        let id = sim.alloc(ctx, def, &[])?;
        put(domain, id)
    })
}

/// Sets `*has` to 1 if the schema has an attribute called `name`, else 0.
///
/// # Safety
///
/// `name` must be a valid null-terminated string; `has` a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_has_attribute(
    ctx: *mut tessera_ctx_t,
    schema: *mut tessera_array_schema_t,
    name: *const c_char,
    has: *mut i32,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let name = text(name, "attribute name")?;
        let found = sim
            .objects
            .get::<SchemaDef>(id(schema, "array schema")?)?
            .attribute(&name)
            .is_some();
        write(has, i32::from(found))
    })
}

/// # Safety
///
/// `array_type` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_get_array_type(
    ctx: *mut tessera_ctx_t,
    schema: *mut tessera_array_schema_t,
    array_type: *mut u32,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        write(array_type, sim.objects.get::<SchemaDef>(id(schema, "array schema")?)?.array_type)
    })
}

/// Allocates an empty schema evolution.
///
/// # Safety
///
/// `evolution` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_evolution_alloc(
    ctx: *mut tessera_ctx_t,
    evolution: *mut *mut tessera_array_schema_evolution_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, ctx| {
        let id = sim.alloc(ctx, EvolutionDef::default(), &[])?;
        put(evolution, id)
    })
}

/// Frees a schema evolution and nulls `*evolution`.
///
/// # Safety
///
/// `evolution` must be null or a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_evolution_free(evolution: *mut *mut tessera_array_schema_evolution_t) {
    free_slot(evolution);
}

/// Queues the addition of a copy of `attr`.
///
/// # Safety
///
/// Handles must come from this engine.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_evolution_add_attribute(
    ctx: *mut tessera_ctx_t,
    evolution: *mut tessera_array_schema_evolution_t,
    attr: *mut tessera_attribute_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let def = sim.objects.get::<AttributeDef>(id(attr, "attribute")?)?.clone();
        sim.objects
            .get_mut::<EvolutionDef>(id(evolution, "array schema evolution")?)?
            .add
            .push(def);
        Ok(())
    })
}

/// Queues the removal of the attribute called `name`.
///
/// # Safety
///
/// `name` must be a valid null-terminated string.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_evolution_drop_attribute(
    ctx: *mut tessera_ctx_t,
    evolution: *mut tessera_array_schema_evolution_t,
    name: *const c_char,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let name = text(name, "attribute name")?;
        sim.objects
            .get_mut::<EvolutionDef>(id(evolution, "array schema evolution")?)?
            .drop
            .push(name);
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capi::config::{tessera_ctx_alloc, tessera_ctx_free};
    use std::ffi::CStr;
    use std::ptr;

    #[test]
    fn attribute_and_dimension() {
        unsafe {
            let mut ctx = ptr::null_mut();
            tessera_ctx_alloc(ptr::null_mut(), &mut ctx);

            let mut attr = ptr::null_mut();
            assert_eq!(tessera_attribute_alloc(ctx, c"a".as_ptr(), TESSERA_INT32, &mut attr), TESSERA_OK);
            assert_eq!(tessera_attribute_set_cell_val_num(ctx, attr, 0), TESSERA_ERR);
            tessera_attribute_set_nullable(ctx, attr, 1);
            let mut nullable = 0;
            tessera_attribute_get_nullable(ctx, attr, &mut nullable);
            assert_eq!(nullable, 1);
            let mut name = ptr::null();
            tessera_attribute_get_name(ctx, attr, &mut name);
            assert_eq!(CStr::from_ptr(name).to_str().unwrap(), "a");

            let bounds = [1i64, 10];
            let extent = 5i64;
            let mut dim = ptr::null_mut();
            let rc = tessera_dimension_alloc(
                ctx,
                c"d".as_ptr(),
                TESSERA_INT64,
                bounds.as_ptr().cast(),
                (&extent as *const i64).cast(),
                &mut dim,
            );
            assert_eq!(rc, TESSERA_OK);
            let mut missing = ptr::null_mut();
            let rc = tessera_dimension_alloc(ctx, c"e".as_ptr(), TESSERA_INT64, ptr::null(), ptr::null(), &mut missing);
            assert_eq!(rc, TESSERA_ERR);

            let mut domain = ptr::null_mut();
            tessera_domain_alloc(ctx, &mut domain);
            assert_eq!(tessera_domain_add_dimension(ctx, domain, dim), TESSERA_OK);
            assert_eq!(tessera_domain_add_dimension(ctx, domain, dim), TESSERA_ERR);
            let mut ndim = 0;
            tessera_domain_get_ndim(ctx, domain, &mut ndim);
            assert_eq!(ndim, 1);

            tessera_domain_free(&mut domain);
            tessera_dimension_free(&mut dim);
            tessera_attribute_free(&mut attr);
            tessera_ctx_free(&mut ctx);
        }
    }

    #[test]
    fn filter_options() {
        unsafe {
            let mut ctx = ptr::null_mut();
            tessera_ctx_alloc(ptr::null_mut(), &mut ctx);
            let mut zstd = ptr::null_mut();
            tessera_filter_alloc(ctx, TESSERA_FILTER_ZSTD, &mut zstd);
            let level = 7i32;
            let level_ptr = (&level as *const i32).cast();
            assert_eq!(tessera_filter_set_option(ctx, zstd, TESSERA_COMPRESSION_LEVEL, level_ptr), TESSERA_OK);
            assert_eq!(tessera_filter_set_option(ctx, zstd, TESSERA_BIT_WIDTH_MAX_WINDOW, level_ptr), TESSERA_ERR);

            let mut list = ptr::null_mut();
            tessera_filter_list_alloc(ctx, &mut list);
            tessera_filter_list_add_filter(ctx, list, zstd);
            let mut n = 0;
            tessera_filter_list_get_nfilters(ctx, list, &mut n);
            assert_eq!(n, 1);

            let mut bogus = ptr::null_mut();
            assert_eq!(tessera_filter_alloc(ctx, 99, &mut bogus), TESSERA_ERR);

            tessera_filter_list_free(&mut list);
            tessera_filter_free(&mut zstd);
            tessera_ctx_free(&mut ctx);
        }
    }
}
