//! An in-process engine behind the Tessera C surface.
//!
//! The engine keeps arrays and groups in memory and exports every entry point
//! of [`tessera_sys::Api`], both as `#[no_mangle]` symbols (so the crate can be
//! built as a shared library and loaded by path) and as a ready table through
//! [`api`].
//!
//! Beyond answering calls, it records how callers treat the objects it hands
//! out: how often each was freed, in which order, and any [`Violation`] of the
//! ownership rules. Tests of the safe layer assert on these through
//! [`free_count`], [`freed_before`], [`is_live`] and [`violations_for`].
//!
//! Two context settings steer it:
//!
//! - `sim.fail_alloc`: name of an object kind (`"array"`, `"query field"`,
//!   ...) whose allocations fail with `TESSERA_OOM`.
//! - `sim.memory_budget_stall_rounds`: number of read submissions that
//!   return no data with reason `TESSERA_REASON_MEMORY_BUDGET` before results
//!   start flowing.
//!
//! Only sparse arrays can be created.

pub mod capi;
mod engine;
mod error;
mod model;
mod registry;
mod state;
mod storage;
mod vfs;

pub use error::{SimError, SimResult};
pub use registry::Violation;

use capi::array::*;
use capi::config::*;
use capi::query::*;
use capi::schema::*;
use capi::vfs::*;
use state::SIM;
use tessera_sys::Api;

/// The entry point table of this engine.
pub fn api() -> Api {
    Api {
        tessera_error_message,
        tessera_error_free,
        tessera_config_alloc,
        tessera_config_free,
        tessera_config_set,
        tessera_config_get,
        tessera_config_unset,
        tessera_ctx_alloc,
        tessera_ctx_free,
        tessera_ctx_get_last_error,
        tessera_ctx_get_config,
        tessera_ctx_cancel_tasks,
        tessera_attribute_alloc,
        tessera_attribute_free,
        tessera_attribute_set_nullable,
        tessera_attribute_set_cell_val_num,
        tessera_attribute_set_filter_list,
        tessera_attribute_set_enumeration_name,
        tessera_attribute_get_name,
        tessera_attribute_get_type,
        tessera_attribute_get_nullable,
        tessera_attribute_get_cell_val_num,
        tessera_dimension_alloc,
        tessera_dimension_free,
        tessera_dimension_set_cell_val_num,
        tessera_dimension_get_name,
        tessera_dimension_get_type,
        tessera_domain_alloc,
        tessera_domain_free,
        tessera_domain_add_dimension,
        tessera_domain_get_ndim,
        tessera_domain_get_dimension_from_name,
        tessera_filter_alloc,
        tessera_filter_free,
        tessera_filter_set_option,
        tessera_filter_get_type,
        tessera_filter_list_alloc,
        tessera_filter_list_free,
        tessera_filter_list_add_filter,
        tessera_filter_list_get_nfilters,
        tessera_enumeration_alloc,
        tessera_enumeration_free,
        tessera_enumeration_get_name,
        tessera_array_schema_alloc,
        tessera_array_schema_free,
        tessera_array_schema_set_domain,
        tessera_array_schema_add_attribute,
        tessera_array_schema_add_enumeration,
        tessera_array_schema_set_capacity,
        tessera_array_schema_check,
        tessera_array_schema_get_attribute_from_name,
        tessera_array_schema_get_domain,
        tessera_array_schema_has_attribute,
        tessera_array_schema_get_array_type,
        tessera_array_schema_evolution_alloc,
        tessera_array_schema_evolution_free,
        tessera_array_schema_evolution_add_attribute,
        tessera_array_schema_evolution_drop_attribute,
        tessera_array_evolve,
        tessera_array_alloc,
        tessera_array_free,
        tessera_array_create,
        tessera_array_open,
        tessera_array_close,
        tessera_array_is_open,
        tessera_array_get_schema,
        tessera_array_reopen,
        tessera_array_get_non_empty_domain_from_name,
        tessera_subarray_alloc,
        tessera_subarray_free,
        tessera_subarray_add_range,
        tessera_subarray_get_range_num,
        tessera_query_condition_alloc,
        tessera_query_condition_free,
        tessera_query_condition_init,
        tessera_query_condition_combine,
        tessera_query_condition_negate,
        tessera_query_alloc,
        tessera_query_free,
        tessera_query_set_layout,
        tessera_query_get_layout,
        tessera_query_set_subarray,
        tessera_query_set_condition,
        tessera_query_set_data_buffer,
        tessera_query_set_offsets_buffer,
        tessera_query_set_validity_buffer,
        tessera_query_submit,
        tessera_query_submit_async,
        tessera_query_finalize,
        tessera_query_get_status,
        tessera_query_get_status_details,
        tessera_query_get_type,
        tessera_query_has_results,
        tessera_query_get_est_result_size,
        tessera_query_get_field,
        tessera_query_field_free,
        tessera_field_datatype,
        tessera_field_cell_val_num,
        tessera_field_nullable,
        tessera_field_channel,
        tessera_query_get_default_channel,
        tessera_query_channel_free,
        tessera_channel_operation_alloc,
        tessera_channel_operation_free,
        tessera_channel_apply_aggregate,
        tessera_group_create,
        tessera_group_alloc,
        tessera_group_free,
        tessera_group_open,
        tessera_group_close,
        tessera_group_add_member,
        tessera_group_get_member_count,
        tessera_fragment_info_alloc,
        tessera_fragment_info_free,
        tessera_fragment_info_load,
        tessera_fragment_info_get_fragment_num,
        tessera_vfs_alloc,
        tessera_vfs_free,
        tessera_vfs_create_dir,
        tessera_vfs_is_dir,
        tessera_vfs_is_file,
        tessera_vfs_file_size,
        tessera_vfs_remove_file,
        tessera_vfs_open,
        tessera_vfs_fh_free,
        tessera_vfs_read,
        tessera_vfs_write,
        tessera_vfs_sync,
        tessera_vfs_close,
        tessera_vfs_fh_is_closed,
    }
}

/// How many times the object behind `ptr` was freed.
pub fn free_count(ptr: usize) -> u32 {
    SIM.lock().objects.free_count(ptr)
}

/// Returns true if the object behind `ptr` was handed out and not yet freed.
pub fn is_live(ptr: usize) -> bool {
    SIM.lock().objects.is_live(ptr)
}

/// Ownership violations recorded against the object behind `ptr`.
pub fn violations_for(ptr: usize) -> Vec<Violation> {
    SIM.lock().objects.violations(ptr)
}

/// Returns true if both objects were freed and `first` went first.
pub fn freed_before(first: usize, second: usize) -> bool {
    SIM.lock().objects.freed_before(first, second)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    #[test]
    fn table_resolves_every_symbol() {
        let api = api();
        let mut config = ptr::null_mut();
        let mut err = ptr::null_mut();
        // SAFETY: both out-parameters are valid.
        let rc = unsafe { (api.tessera_config_alloc)(&mut config, &mut err) };
        assert_eq!(rc, tessera_sys::TESSERA_OK);
        assert!(is_live(config as usize));
        // SAFETY: config was allocated above.
        unsafe { (api.tessera_config_free)(&mut config) };
        assert!(config.is_null());
    }

    #[test]
    fn double_free_is_recorded() {
        let mut config = ptr::null_mut();
        // SAFETY: out-parameters are valid.
        unsafe { tessera_config_alloc(&mut config, ptr::null_mut()) };
        let addr = config as usize;
        let mut copy = config;
        // SAFETY: the second free is the behavior under test; the engine
        // detects it instead of touching freed memory.
        unsafe {
            tessera_config_free(&mut config);
            tessera_config_free(&mut copy);
        }
        assert_eq!(free_count(addr), 2);
        assert_eq!(violations_for(addr), vec![Violation::DoubleFree]);
    }
}
