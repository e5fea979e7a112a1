//! The table of engine entry points.
//!
//! [`Api`] is a plain struct of `extern "C"` function pointers. It is either
//! resolved from a dynamic library ([`Api::load`]) or filled in directly by an
//! in-process engine that exports the same surface.

#![allow(non_camel_case_types)]

use crate::types::*;
use crate::LoadError;
use libloading::Library;
use std::ffi::{c_char, c_int, c_void};
use std::fmt;

macro_rules! native_api {
    ($($(#[$meta:meta])* fn $name:ident($($arg:ident: $ty:ty),* $(,)?) $(-> $ret:ty)?;)*) => {
        /// Resolved engine entry points.
        ///
        /// Every field is an `unsafe extern "C"` function; the usual C rules
        /// apply (valid pointers, null-terminated strings, out-parameters
        /// writable).
        #[derive(Clone, Copy)]
        pub struct Api {
            $(
                $(#[$meta])*
                pub $name: unsafe extern "C" fn($($arg: $ty),*) $(-> $ret)?,
            )*
        }

        impl Api {
            /// Resolves every entry point from `lib`.
            ///
            /// # Safety
            ///
            /// `lib` must be a build of the engine whose exported symbols have the
            /// signatures declared here. The returned table is only valid while
            /// `lib` stays loaded.
            pub unsafe fn load(lib: &Library) -> Result<Self, LoadError> {
                Ok(Self {
                    $(
                        $name: *lib
                            .get::<unsafe extern "C" fn($($ty),*) $(-> $ret)?>(
                                concat!(stringify!($name), "\0").as_bytes(),
                            )
                            .map_err(|source| LoadError::MissingSymbol {
                                symbol: stringify!($name),
                                source,
                            })?,
                    )*
                })
            }

            /// Names of every entry point, in declaration order.
            pub const SYMBOLS: &'static [&'static str] = &[$(stringify!($name)),*];
        }
    };
}

native_api! {
    // ---- errors ----
    fn tessera_error_message(err: *mut tessera_error_t, msg: *mut *const c_char) -> capi_return_t;
    fn tessera_error_free(err: *mut *mut tessera_error_t);

    // ---- config (errors reported through the out-parameter) ----
    fn tessera_config_alloc(config: *mut *mut tessera_config_t, error: *mut *mut tessera_error_t) -> capi_return_t;
    fn tessera_config_free(config: *mut *mut tessera_config_t);
    fn tessera_config_set(
        config: *mut tessera_config_t,
        param: *const c_char,
        value: *const c_char,
        error: *mut *mut tessera_error_t,
    ) -> capi_return_t;
    fn tessera_config_get(
        config: *mut tessera_config_t,
        param: *const c_char,
        value: *mut *const c_char,
        error: *mut *mut tessera_error_t,
    ) -> capi_return_t;
    fn tessera_config_unset(
        config: *mut tessera_config_t,
        param: *const c_char,
        error: *mut *mut tessera_error_t,
    ) -> capi_return_t;

    // ---- context ----
    fn tessera_ctx_alloc(config: *mut tessera_config_t, ctx: *mut *mut tessera_ctx_t) -> capi_return_t;
    fn tessera_ctx_free(ctx: *mut *mut tessera_ctx_t);
    fn tessera_ctx_get_last_error(ctx: *mut tessera_ctx_t, err: *mut *mut tessera_error_t) -> capi_return_t;
    fn tessera_ctx_get_config(ctx: *mut tessera_ctx_t, config: *mut *mut tessera_config_t) -> capi_return_t;
    fn tessera_ctx_cancel_tasks(ctx: *mut tessera_ctx_t) -> capi_return_t;

    // ---- attribute ----
    fn tessera_attribute_alloc(
        ctx: *mut tessera_ctx_t,
        name: *const c_char,
        datatype: u32,
        attr: *mut *mut tessera_attribute_t,
    ) -> capi_return_t;
    fn tessera_attribute_free(attr: *mut *mut tessera_attribute_t);
    fn tessera_attribute_set_nullable(ctx: *mut tessera_ctx_t, attr: *mut tessera_attribute_t, nullable: u8) -> capi_return_t;
    fn tessera_attribute_set_cell_val_num(ctx: *mut tessera_ctx_t, attr: *mut tessera_attribute_t, num: u32) -> capi_return_t;
    fn tessera_attribute_set_filter_list(
        ctx: *mut tessera_ctx_t,
        attr: *mut tessera_attribute_t,
        filters: *mut tessera_filter_list_t,
    ) -> capi_return_t;
    fn tessera_attribute_set_enumeration_name(
        ctx: *mut tessera_ctx_t,
        attr: *mut tessera_attribute_t,
        name: *const c_char,
    ) -> capi_return_t;
    fn tessera_attribute_get_name(ctx: *mut tessera_ctx_t, attr: *mut tessera_attribute_t, name: *mut *const c_char) -> capi_return_t;
    fn tessera_attribute_get_type(ctx: *mut tessera_ctx_t, attr: *mut tessera_attribute_t, datatype: *mut u32) -> capi_return_t;
    fn tessera_attribute_get_nullable(ctx: *mut tessera_ctx_t, attr: *mut tessera_attribute_t, nullable: *mut u8) -> capi_return_t;
    fn tessera_attribute_get_cell_val_num(ctx: *mut tessera_ctx_t, attr: *mut tessera_attribute_t, num: *mut u32) -> capi_return_t;

    // ---- dimension ----
    fn tessera_dimension_alloc(
        ctx: *mut tessera_ctx_t,
        name: *const c_char,
        datatype: u32,
        domain: *const c_void,
        tile_extent: *const c_void,
        dim: *mut *mut tessera_dimension_t,
    ) -> capi_return_t;
    fn tessera_dimension_free(dim: *mut *mut tessera_dimension_t);
    fn tessera_dimension_set_cell_val_num(ctx: *mut tessera_ctx_t, dim: *mut tessera_dimension_t, num: u32) -> capi_return_t;
    fn tessera_dimension_get_name(ctx: *mut tessera_ctx_t, dim: *mut tessera_dimension_t, name: *mut *const c_char) -> capi_return_t;
    fn tessera_dimension_get_type(ctx: *mut tessera_ctx_t, dim: *mut tessera_dimension_t, datatype: *mut u32) -> capi_return_t;

    // ---- domain ----
    fn tessera_domain_alloc(ctx: *mut tessera_ctx_t, domain: *mut *mut tessera_domain_t) -> capi_return_t;
    fn tessera_domain_free(domain: *mut *mut tessera_domain_t);
    fn tessera_domain_add_dimension(ctx: *mut tessera_ctx_t, domain: *mut tessera_domain_t, dim: *mut tessera_dimension_t) -> capi_return_t;
    fn tessera_domain_get_ndim(ctx: *mut tessera_ctx_t, domain: *mut tessera_domain_t, ndim: *mut u32) -> capi_return_t;
    fn tessera_domain_get_dimension_from_name(
        ctx: *mut tessera_ctx_t,
        domain: *mut tessera_domain_t,
        name: *const c_char,
        dim: *mut *mut tessera_dimension_t,
    ) -> capi_return_t;

    // ---- filters ----
    fn tessera_filter_alloc(ctx: *mut tessera_ctx_t, filter_type: u32, filter: *mut *mut tessera_filter_t) -> capi_return_t;
    fn tessera_filter_free(filter: *mut *mut tessera_filter_t);
    fn tessera_filter_set_option(
        ctx: *mut tessera_ctx_t,
        filter: *mut tessera_filter_t,
        option: u32,
        value: *const c_void,
    ) -> capi_return_t;
    fn tessera_filter_get_type(ctx: *mut tessera_ctx_t, filter: *mut tessera_filter_t, filter_type: *mut u32) -> capi_return_t;
    fn tessera_filter_list_alloc(ctx: *mut tessera_ctx_t, list: *mut *mut tessera_filter_list_t) -> capi_return_t;
    fn tessera_filter_list_free(list: *mut *mut tessera_filter_list_t);
    fn tessera_filter_list_add_filter(
        ctx: *mut tessera_ctx_t,
        list: *mut tessera_filter_list_t,
        filter: *mut tessera_filter_t,
    ) -> capi_return_t;
    fn tessera_filter_list_get_nfilters(ctx: *mut tessera_ctx_t, list: *mut tessera_filter_list_t, n: *mut u32) -> capi_return_t;

    // ---- enumeration ----
    fn tessera_enumeration_alloc(
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
    ) -> capi_return_t;
    fn tessera_enumeration_free(enumeration: *mut *mut tessera_enumeration_t);
    fn tessera_enumeration_get_name(
        ctx: *mut tessera_ctx_t,
        enumeration: *mut tessera_enumeration_t,
        name: *mut *const c_char,
    ) -> capi_return_t;

    // ---- array schema ----
    fn tessera_array_schema_alloc(ctx: *mut tessera_ctx_t, array_type: u32, schema: *mut *mut tessera_array_schema_t) -> capi_return_t;
    fn tessera_array_schema_free(schema: *mut *mut tessera_array_schema_t);
    fn tessera_array_schema_set_domain(
        ctx: *mut tessera_ctx_t,
        schema: *mut tessera_array_schema_t,
        domain: *mut tessera_domain_t,
    ) -> capi_return_t;
    fn tessera_array_schema_add_attribute(
        ctx: *mut tessera_ctx_t,
        schema: *mut tessera_array_schema_t,
        attr: *mut tessera_attribute_t,
    ) -> capi_return_t;
    fn tessera_array_schema_add_enumeration(
        ctx: *mut tessera_ctx_t,
        schema: *mut tessera_array_schema_t,
        enumeration: *mut tessera_enumeration_t,
    ) -> capi_return_t;
    fn tessera_array_schema_set_capacity(ctx: *mut tessera_ctx_t, schema: *mut tessera_array_schema_t, capacity: u64) -> capi_return_t;
    fn tessera_array_schema_check(ctx: *mut tessera_ctx_t, schema: *mut tessera_array_schema_t) -> capi_return_t;
    fn tessera_array_schema_get_attribute_from_name(
        ctx: *mut tessera_ctx_t,
        schema: *mut tessera_array_schema_t,
        name: *const c_char,
        attr: *mut *mut tessera_attribute_t,
    ) -> capi_return_t;
    fn tessera_array_schema_get_domain(
        ctx: *mut tessera_ctx_t,
        schema: *mut tessera_array_schema_t,
        domain: *mut *mut tessera_domain_t,
    ) -> capi_return_t;
    fn tessera_array_schema_has_attribute(
        ctx: *mut tessera_ctx_t,
        schema: *mut tessera_array_schema_t,
        name: *const c_char,
        has: *mut i32,
    ) -> capi_return_t;
    fn tessera_array_schema_get_array_type(ctx: *mut tessera_ctx_t, schema: *mut tessera_array_schema_t, array_type: *mut u32) -> capi_return_t;

    // ---- array schema evolution ----
    fn tessera_array_schema_evolution_alloc(ctx: *mut tessera_ctx_t, evolution: *mut *mut tessera_array_schema_evolution_t) -> capi_return_t;
    fn tessera_array_schema_evolution_free(evolution: *mut *mut tessera_array_schema_evolution_t);
    fn tessera_array_schema_evolution_add_attribute(
        ctx: *mut tessera_ctx_t,
        evolution: *mut tessera_array_schema_evolution_t,
        attr: *mut tessera_attribute_t,
    ) -> capi_return_t;
    fn tessera_array_schema_evolution_drop_attribute(
        ctx: *mut tessera_ctx_t,
        evolution: *mut tessera_array_schema_evolution_t,
        name: *const c_char,
    ) -> capi_return_t;
    fn tessera_array_evolve(
        ctx: *mut tessera_ctx_t,
        uri: *const c_char,
        evolution: *mut tessera_array_schema_evolution_t,
    ) -> capi_return_t;

    // ---- array ----
    fn tessera_array_alloc(ctx: *mut tessera_ctx_t, uri: *const c_char, array: *mut *mut tessera_array_t) -> capi_return_t;
    fn tessera_array_free(array: *mut *mut tessera_array_t);
    fn tessera_array_create(ctx: *mut tessera_ctx_t, uri: *const c_char, schema: *mut tessera_array_schema_t) -> capi_return_t;
    fn tessera_array_open(ctx: *mut tessera_ctx_t, array: *mut tessera_array_t, query_type: u32) -> capi_return_t;
    fn tessera_array_close(ctx: *mut tessera_ctx_t, array: *mut tessera_array_t) -> capi_return_t;
    fn tessera_array_is_open(ctx: *mut tessera_ctx_t, array: *mut tessera_array_t, is_open: *mut i32) -> capi_return_t;
    fn tessera_array_get_schema(
        ctx: *mut tessera_ctx_t,
        array: *mut tessera_array_t,
        schema: *mut *mut tessera_array_schema_t,
    ) -> capi_return_t;
    fn tessera_array_reopen(ctx: *mut tessera_ctx_t, array: *mut tessera_array_t) -> capi_return_t;
    /// Writes `[start, end]` of dimension `name` to `domain`, unless the
    /// array holds no cells.
    fn tessera_array_get_non_empty_domain_from_name(
        ctx: *mut tessera_ctx_t,
        array: *mut tessera_array_t,
        name: *const c_char,
        domain: *mut c_void,
        is_empty: *mut i32,
    ) -> capi_return_t;

    // ---- subarray ----
    fn tessera_subarray_alloc(ctx: *mut tessera_ctx_t, array: *mut tessera_array_t, subarray: *mut *mut tessera_subarray_t) -> capi_return_t;
    fn tessera_subarray_free(subarray: *mut *mut tessera_subarray_t);
    fn tessera_subarray_add_range(
        ctx: *mut tessera_ctx_t,
        subarray: *mut tessera_subarray_t,
        dim_idx: u32,
        start: *const c_void,
        end: *const c_void,
    ) -> capi_return_t;
    fn tessera_subarray_get_range_num(
        ctx: *mut tessera_ctx_t,
        subarray: *mut tessera_subarray_t,
        dim_idx: u32,
        range_num: *mut u64,
    ) -> capi_return_t;

    // ---- query condition ----
    fn tessera_query_condition_alloc(ctx: *mut tessera_ctx_t, cond: *mut *mut tessera_query_condition_t) -> capi_return_t;
    fn tessera_query_condition_free(cond: *mut *mut tessera_query_condition_t);
    fn tessera_query_condition_init(
        ctx: *mut tessera_ctx_t,
        cond: *mut tessera_query_condition_t,
        field_name: *const c_char,
        value: *const c_void,
        value_size: u64,
        op: u32,
    ) -> capi_return_t;
    fn tessera_query_condition_combine(
        ctx: *mut tessera_ctx_t,
        left: *mut tessera_query_condition_t,
        right: *mut tessera_query_condition_t,
        op: u32,
        combined: *mut *mut tessera_query_condition_t,
    ) -> capi_return_t;
    fn tessera_query_condition_negate(
        ctx: *mut tessera_ctx_t,
        cond: *mut tessera_query_condition_t,
        negated: *mut *mut tessera_query_condition_t,
    ) -> capi_return_t;

    // ---- query ----
    fn tessera_query_alloc(
        ctx: *mut tessera_ctx_t,
        array: *mut tessera_array_t,
        query_type: u32,
        query: *mut *mut tessera_query_t,
    ) -> capi_return_t;
    fn tessera_query_free(query: *mut *mut tessera_query_t);
    fn tessera_query_set_layout(ctx: *mut tessera_ctx_t, query: *mut tessera_query_t, layout: u32) -> capi_return_t;
    fn tessera_query_get_layout(ctx: *mut tessera_ctx_t, query: *mut tessera_query_t, layout: *mut u32) -> capi_return_t;
    fn tessera_query_set_subarray(
        ctx: *mut tessera_ctx_t,
        query: *mut tessera_query_t,
        subarray: *mut tessera_subarray_t,
    ) -> capi_return_t;
    fn tessera_query_set_condition(
        ctx: *mut tessera_ctx_t,
        query: *mut tessera_query_t,
        cond: *mut tessera_query_condition_t,
    ) -> capi_return_t;
    fn tessera_query_set_data_buffer(
        ctx: *mut tessera_ctx_t,
        query: *mut tessera_query_t,
        name: *const c_char,
        buffer: *mut c_void,
        buffer_size: *mut u64,
    ) -> capi_return_t;
    fn tessera_query_set_offsets_buffer(
        ctx: *mut tessera_ctx_t,
        query: *mut tessera_query_t,
        name: *const c_char,
        buffer: *mut u64,
        buffer_size: *mut u64,
    ) -> capi_return_t;
    fn tessera_query_set_validity_buffer(
        ctx: *mut tessera_ctx_t,
        query: *mut tessera_query_t,
        name: *const c_char,
        buffer: *mut u8,
        buffer_size: *mut u64,
    ) -> capi_return_t;
    fn tessera_query_submit(ctx: *mut tessera_ctx_t, query: *mut tessera_query_t) -> capi_return_t;
    fn tessera_query_submit_async(
        ctx: *mut tessera_ctx_t,
        query: *mut tessera_query_t,
        callback: tessera_query_callback_t,
        callback_data: *mut c_void,
    ) -> capi_return_t;
    fn tessera_query_finalize(ctx: *mut tessera_ctx_t, query: *mut tessera_query_t) -> capi_return_t;
    fn tessera_query_get_status(ctx: *mut tessera_ctx_t, query: *mut tessera_query_t, status: *mut u32) -> capi_return_t;
    fn tessera_query_get_status_details(
        ctx: *mut tessera_ctx_t,
        query: *mut tessera_query_t,
        details: *mut tessera_query_status_details_t,
    ) -> capi_return_t;
    fn tessera_query_get_type(ctx: *mut tessera_ctx_t, query: *mut tessera_query_t, query_type: *mut u32) -> capi_return_t;
    fn tessera_query_has_results(ctx: *mut tessera_ctx_t, query: *mut tessera_query_t, has_results: *mut i32) -> capi_return_t;
    /// Bytes a complete read of `name` needs in each buffer part. Parts the
    /// field does not have are reported as zero.
    fn tessera_query_get_est_result_size(
        ctx: *mut tessera_ctx_t,
        query: *mut tessera_query_t,
        name: *const c_char,
        size_data: *mut u64,
        size_offsets: *mut u64,
        size_validity: *mut u64,
    ) -> capi_return_t;

    // ---- query fields, channels, aggregates ----
    fn tessera_query_get_field(
        ctx: *mut tessera_ctx_t,
        query: *mut tessera_query_t,
        name: *const c_char,
        field: *mut *mut tessera_query_field_t,
    ) -> capi_return_t;
    fn tessera_query_field_free(ctx: *mut tessera_ctx_t, field: *mut *mut tessera_query_field_t) -> capi_return_t;
    fn tessera_field_datatype(ctx: *mut tessera_ctx_t, field: *mut tessera_query_field_t, datatype: *mut u32) -> capi_return_t;
    fn tessera_field_cell_val_num(ctx: *mut tessera_ctx_t, field: *mut tessera_query_field_t, num: *mut u32) -> capi_return_t;
    fn tessera_field_nullable(ctx: *mut tessera_ctx_t, field: *mut tessera_query_field_t, nullable: *mut u8) -> capi_return_t;
    fn tessera_field_channel(
        ctx: *mut tessera_ctx_t,
        field: *mut tessera_query_field_t,
        channel: *mut *mut tessera_query_channel_t,
    ) -> capi_return_t;
    fn tessera_query_get_default_channel(
        ctx: *mut tessera_ctx_t,
        query: *mut tessera_query_t,
        channel: *mut *mut tessera_query_channel_t,
    ) -> capi_return_t;
    fn tessera_query_channel_free(ctx: *mut tessera_ctx_t, channel: *mut *mut tessera_query_channel_t) -> capi_return_t;
    fn tessera_channel_operation_alloc(
        ctx: *mut tessera_ctx_t,
        query: *mut tessera_query_t,
        operator: u32,
        input_field: *const c_char,
        operation: *mut *mut tessera_channel_operation_t,
    ) -> capi_return_t;
    fn tessera_channel_operation_free(ctx: *mut tessera_ctx_t, operation: *mut *mut tessera_channel_operation_t) -> capi_return_t;
    fn tessera_channel_apply_aggregate(
        ctx: *mut tessera_ctx_t,
        channel: *mut tessera_query_channel_t,
        output_field: *const c_char,
        operation: *mut tessera_channel_operation_t,
    ) -> capi_return_t;

    // ---- group ----
    fn tessera_group_create(ctx: *mut tessera_ctx_t, uri: *const c_char) -> capi_return_t;
    fn tessera_group_alloc(ctx: *mut tessera_ctx_t, uri: *const c_char, group: *mut *mut tessera_group_t) -> capi_return_t;
    fn tessera_group_free(group: *mut *mut tessera_group_t);
    fn tessera_group_open(ctx: *mut tessera_ctx_t, group: *mut tessera_group_t, query_type: u32) -> capi_return_t;
    fn tessera_group_close(ctx: *mut tessera_ctx_t, group: *mut tessera_group_t) -> capi_return_t;
    fn tessera_group_add_member(
        ctx: *mut tessera_ctx_t,
        group: *mut tessera_group_t,
        uri: *const c_char,
        relative: u8,
        name: *const c_char,
    ) -> capi_return_t;
    fn tessera_group_get_member_count(ctx: *mut tessera_ctx_t, group: *mut tessera_group_t, count: *mut u64) -> capi_return_t;

    // ---- fragment info ----
    fn tessera_fragment_info_alloc(
        ctx: *mut tessera_ctx_t,
        array_uri: *const c_char,
        info: *mut *mut tessera_fragment_info_t,
    ) -> capi_return_t;
    fn tessera_fragment_info_free(info: *mut *mut tessera_fragment_info_t);
    fn tessera_fragment_info_load(ctx: *mut tessera_ctx_t, info: *mut tessera_fragment_info_t) -> capi_return_t;
    fn tessera_fragment_info_get_fragment_num(ctx: *mut tessera_ctx_t, info: *mut tessera_fragment_info_t, num: *mut u32) -> capi_return_t;

    // ---- vfs ----
    fn tessera_vfs_alloc(ctx: *mut tessera_ctx_t, config: *mut tessera_config_t, vfs: *mut *mut tessera_vfs_t) -> capi_return_t;
    fn tessera_vfs_free(vfs: *mut *mut tessera_vfs_t);
    fn tessera_vfs_create_dir(ctx: *mut tessera_ctx_t, vfs: *mut tessera_vfs_t, uri: *const c_char) -> capi_return_t;
    fn tessera_vfs_is_dir(ctx: *mut tessera_ctx_t, vfs: *mut tessera_vfs_t, uri: *const c_char, is_dir: *mut i32) -> capi_return_t;
    fn tessera_vfs_is_file(ctx: *mut tessera_ctx_t, vfs: *mut tessera_vfs_t, uri: *const c_char, is_file: *mut i32) -> capi_return_t;
    fn tessera_vfs_file_size(ctx: *mut tessera_ctx_t, vfs: *mut tessera_vfs_t, uri: *const c_char, size: *mut u64) -> capi_return_t;
    fn tessera_vfs_remove_file(ctx: *mut tessera_ctx_t, vfs: *mut tessera_vfs_t, uri: *const c_char) -> capi_return_t;
    fn tessera_vfs_open(
        ctx: *mut tessera_ctx_t,
        vfs: *mut tessera_vfs_t,
        uri: *const c_char,
        mode: u32,
        fh: *mut *mut tessera_vfs_fh_t,
    ) -> capi_return_t;
    fn tessera_vfs_fh_free(fh: *mut *mut tessera_vfs_fh_t);
    fn tessera_vfs_read(
        ctx: *mut tessera_ctx_t,
        fh: *mut tessera_vfs_fh_t,
        offset: u64,
        buffer: *mut c_void,
        nbytes: u64,
    ) -> capi_return_t;
    fn tessera_vfs_write(
        ctx: *mut tessera_ctx_t,
        fh: *mut tessera_vfs_fh_t,
        buffer: *const c_void,
        nbytes: u64,
    ) -> capi_return_t;
    fn tessera_vfs_sync(ctx: *mut tessera_ctx_t, fh: *mut tessera_vfs_fh_t) -> capi_return_t;
    fn tessera_vfs_close(ctx: *mut tessera_ctx_t, fh: *mut tessera_vfs_fh_t) -> capi_return_t;
    fn tessera_vfs_fh_is_closed(ctx: *mut tessera_ctx_t, fh: *mut tessera_vfs_fh_t, is_closed: *mut i32) -> capi_return_t;
}

impl fmt::Debug for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Api")
            .field("symbols", &Self::SYMBOLS.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_names_are_unique() {
        let mut names = Api::SYMBOLS.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Api::SYMBOLS.len());
    }

    #[test]
    fn every_symbol_is_prefixed() {
        assert!(Api::SYMBOLS.iter().all(|s| s.starts_with("tessera_")));
    }
}
