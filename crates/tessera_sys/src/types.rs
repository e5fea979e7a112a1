//! Raw types and constants of the engine's C surface.
//!
//! Enumerations cross the boundary as plain `u32` values. The safe layer converts
//! them with `TryFrom`, so an unexpected value coming back from the engine is an
//! error rather than undefined behavior.

#![allow(non_camel_case_types)]

use std::ffi::c_void;

/// Status code returned by almost every entry point.
pub type capi_return_t = i32;

/// Success.
pub const TESSERA_OK: capi_return_t = 0;
/// Generic failure; details are available through the error channel of the call.
pub const TESSERA_ERR: capi_return_t = -1;
/// The engine ran out of memory.
pub const TESSERA_OOM: capi_return_t = -2;

/// Cell value number marking a variable-length field.
pub const TESSERA_VAR_NUM: u32 = u32::MAX;

macro_rules! opaque {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[repr(C)]
            pub struct $name {
                _private: [u8; 0],
            }
        )*
    };
}

opaque! {
    /// Engine configuration.
    tessera_config_t;
    /// Engine context; root of every other resource.
    tessera_ctx_t;
    /// Detailed error object.
    tessera_error_t;
    /// Array.
    tessera_array_t;
    /// Array schema.
    tessera_array_schema_t;
    /// Pending schema evolution.
    tessera_array_schema_evolution_t;
    /// Array domain.
    tessera_domain_t;
    /// Domain dimension.
    tessera_dimension_t;
    /// Array attribute.
    tessera_attribute_t;
    /// Single filter.
    tessera_filter_t;
    /// Ordered list of filters.
    tessera_filter_list_t;
    /// Enumeration of attribute values.
    tessera_enumeration_t;
    /// Group of arrays and groups.
    tessera_group_t;
    /// Subarray (set of ranges per dimension).
    tessera_subarray_t;
    /// Fragment metadata of an array.
    tessera_fragment_info_t;
    /// Query condition expression.
    tessera_query_condition_t;
    /// Read or write query.
    tessera_query_t;
    /// Virtual filesystem.
    tessera_vfs_t;
    /// Open VFS file.
    tessera_vfs_fh_t;
    /// Field (attribute, dimension or aggregate) of a query.
    tessera_query_field_t;
    /// Result channel of a query.
    tessera_query_channel_t;
    /// Aggregate operation applied on a channel.
    tessera_channel_operation_t;
}

/// Extra status information of a query.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct tessera_query_status_details_t {
    /// One of the `TESSERA_REASON_*` constants.
    pub incomplete_reason: u32,
}

/// Callback invoked by the engine when an asynchronous submission finishes.
pub type tessera_query_callback_t = Option<unsafe extern "C" fn(data: *mut c_void)>;

// Datatypes
pub const TESSERA_INT32: u32 = 0;
pub const TESSERA_INT64: u32 = 1;
pub const TESSERA_FLOAT32: u32 = 2;
pub const TESSERA_FLOAT64: u32 = 3;
pub const TESSERA_CHAR: u32 = 4;
pub const TESSERA_INT8: u32 = 5;
pub const TESSERA_UINT8: u32 = 6;
pub const TESSERA_INT16: u32 = 7;
pub const TESSERA_UINT16: u32 = 8;
pub const TESSERA_UINT32: u32 = 9;
pub const TESSERA_UINT64: u32 = 10;
pub const TESSERA_STRING_ASCII: u32 = 11;
pub const TESSERA_STRING_UTF8: u32 = 12;
pub const TESSERA_BLOB: u32 = 13;
pub const TESSERA_BOOL: u32 = 14;

// Query types
pub const TESSERA_READ: u32 = 0;
pub const TESSERA_WRITE: u32 = 1;

// Query status
pub const TESSERA_FAILED: u32 = 0;
pub const TESSERA_COMPLETED: u32 = 1;
pub const TESSERA_INPROGRESS: u32 = 2;
pub const TESSERA_INCOMPLETE: u32 = 3;
pub const TESSERA_UNINITIALIZED: u32 = 4;

// Incomplete reasons
pub const TESSERA_REASON_NONE: u32 = 0;
pub const TESSERA_REASON_USER_BUFFER_SIZE: u32 = 1;
pub const TESSERA_REASON_MEMORY_BUDGET: u32 = 2;

// Layouts
pub const TESSERA_ROW_MAJOR: u32 = 0;
pub const TESSERA_COL_MAJOR: u32 = 1;
pub const TESSERA_GLOBAL_ORDER: u32 = 2;
pub const TESSERA_UNORDERED: u32 = 3;

// Array types
pub const TESSERA_DENSE: u32 = 0;
pub const TESSERA_SPARSE: u32 = 1;

// Filter types
pub const TESSERA_FILTER_NONE: u32 = 0;
pub const TESSERA_FILTER_GZIP: u32 = 1;
pub const TESSERA_FILTER_ZSTD: u32 = 2;
pub const TESSERA_FILTER_LZ4: u32 = 3;
pub const TESSERA_FILTER_BIT_WIDTH_REDUCTION: u32 = 4;
pub const TESSERA_FILTER_DOUBLE_DELTA: u32 = 5;
pub const TESSERA_FILTER_CHECKSUM_MD5: u32 = 6;

// Filter options
pub const TESSERA_COMPRESSION_LEVEL: u32 = 0;
pub const TESSERA_BIT_WIDTH_MAX_WINDOW: u32 = 1;

// VFS modes
pub const TESSERA_VFS_READ: u32 = 0;
pub const TESSERA_VFS_WRITE: u32 = 1;
pub const TESSERA_VFS_APPEND: u32 = 2;

// Query condition operators
pub const TESSERA_LT: u32 = 0;
pub const TESSERA_LE: u32 = 1;
pub const TESSERA_GT: u32 = 2;
pub const TESSERA_GE: u32 = 3;
pub const TESSERA_EQ: u32 = 4;
pub const TESSERA_NE: u32 = 5;

// Query condition combination operators
pub const TESSERA_AND: u32 = 0;
pub const TESSERA_OR: u32 = 1;
pub const TESSERA_NOT: u32 = 2;

// Aggregate operators
pub const TESSERA_AGGREGATE_COUNT: u32 = 0;
pub const TESSERA_AGGREGATE_SUM: u32 = 1;
pub const TESSERA_AGGREGATE_MIN: u32 = 2;
pub const TESSERA_AGGREGATE_MAX: u32 = 3;
