//! Resource kinds and their native free functions.
//!
//! Each kind is an uninhabited marker type implementing [`Resource`]. The
//! declared `Parent` is what a handle of that kind keeps alive: owned guards
//! on the handles the engine requires to outlive it.

use crate::handle::OwnedGuard;
use crate::query::QueryState;
use tessera_sys::{self as sys, capi_return_t, Api, TESSERA_OK};

/// A kind of native resource.
pub trait Resource: Sized + Send + Sync + 'static {
    /// Opaque native type.
    type Raw;
    /// Handles that must outlive a resource of this kind.
    type Parent: Send + Sync + 'static;
    /// Layer-side state stored next to the pointer, dropped after the free.
    type Attached: Default + Send + 'static;

    /// Name used in errors and logs.
    const NAME: &'static str;

    /// Calls the engine's free function.
    ///
    /// # Safety
    ///
    /// `raw` must be a live pointer of this kind, not freed before, and
    /// `parent` must hold the handles it was created under.
    unsafe fn free(api: &Api, parent: &Self::Parent, raw: *mut Self::Raw) -> capi_return_t;
}

/// Parent link of kinds created directly under a context.
pub type CtxParent = OwnedGuard<Context>;

/// Parent link of kinds bound to both a context and a query.
pub type QueryParent = (OwnedGuard<Context>, OwnedGuard<Query>);

macro_rules! resource {
    (@kind $(#[$meta:meta])* $kind:ident: $raw:ty, $parent:ty, $attached:ty, $name:literal,
        |$api:ident, $p:pat_param, $r:ident| $body:block) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub enum $kind {}

        impl Resource for $kind {
            type Raw = $raw;
            type Parent = $parent;
            type Attached = $attached;

            const NAME: &'static str = $name;

            unsafe fn free($api: &Api, $p: &Self::Parent, $r: *mut Self::Raw) -> capi_return_t $body
        }
    };
    // free(ctx, ptr**) -> status
    ($(#[$meta:meta])* $kind:ident: $raw:ty, parent = QueryParent, name = $name:literal, ctx_free = $free:ident) => {
        resource!(@kind $(#[$meta])* $kind: $raw, QueryParent, (), $name, |api, parent, raw| {
            let mut raw = raw;
            (api.$free)(parent.0.as_ptr(), &mut raw)
        });
    };
    // free(ptr**) -> void
    ($(#[$meta:meta])* $kind:ident: $raw:ty, parent = $parent:ty, name = $name:literal, free = $free:ident) => {
        resource!(@kind $(#[$meta])* $kind: $raw, $parent, (), $name, |api, _parent, raw| {
            let mut raw = raw;
            (api.$free)(&mut raw);
            TESSERA_OK
        });
    };
}

resource!(
    /// Engine configuration.
    Config: sys::tessera_config_t, parent = (), name = "config", free = tessera_config_free
);
resource!(
    /// Error object handed out by the engine.
    Error: sys::tessera_error_t, parent = (), name = "error", free = tessera_error_free
);
resource!(
    /// Engine context; the root of every other resource.
    Context: sys::tessera_ctx_t, parent = Option<OwnedGuard<Config>>, name = "context", free = tessera_ctx_free
);
resource!(
    /// Array.
    Array: sys::tessera_array_t, parent = CtxParent, name = "array", free = tessera_array_free
);
resource!(
    /// Array schema.
    ArraySchema: sys::tessera_array_schema_t, parent = CtxParent, name = "array schema", free = tessera_array_schema_free
);
resource!(
    /// Array schema evolution.
    ArraySchemaEvolution: sys::tessera_array_schema_evolution_t, parent = CtxParent,
    name = "array schema evolution", free = tessera_array_schema_evolution_free
);
resource!(
    /// Domain.
    Domain: sys::tessera_domain_t, parent = CtxParent, name = "domain", free = tessera_domain_free
);
resource!(
    /// Dimension.
    Dimension: sys::tessera_dimension_t, parent = CtxParent, name = "dimension", free = tessera_dimension_free
);
resource!(
    /// Attribute.
    Attribute: sys::tessera_attribute_t, parent = CtxParent, name = "attribute", free = tessera_attribute_free
);
resource!(
    /// Filter.
    Filter: sys::tessera_filter_t, parent = CtxParent, name = "filter", free = tessera_filter_free
);
resource!(
    /// Filter list.
    FilterList: sys::tessera_filter_list_t, parent = CtxParent, name = "filter list", free = tessera_filter_list_free
);
resource!(
    /// Enumeration.
    Enumeration: sys::tessera_enumeration_t, parent = CtxParent, name = "enumeration", free = tessera_enumeration_free
);
resource!(
    /// Query condition.
    QueryCondition: sys::tessera_query_condition_t, parent = CtxParent, name = "query condition",
    free = tessera_query_condition_free
);
resource!(
    /// Group.
    Group: sys::tessera_group_t, parent = CtxParent, name = "group", free = tessera_group_free
);
resource!(
    /// Fragment info.
    FragmentInfo: sys::tessera_fragment_info_t, parent = CtxParent, name = "fragment info", free = tessera_fragment_info_free
);
resource!(
    /// Virtual filesystem.
    Vfs: sys::tessera_vfs_t, parent = CtxParent, name = "vfs", free = tessera_vfs_free
);
resource!(
    /// Open VFS file.
    VfsFile: sys::tessera_vfs_fh_t, parent = OwnedGuard<Vfs>, name = "vfs file", free = tessera_vfs_fh_free
);
resource!(
    /// Subarray.
    Subarray: sys::tessera_subarray_t, parent = OwnedGuard<Array>, name = "subarray", free = tessera_subarray_free
);
resource!(
    /// Field of a query.
    QueryField: sys::tessera_query_field_t, parent = QueryParent, name = "query field", ctx_free = tessera_query_field_free
);
resource!(
    /// Result channel of a query.
    QueryChannel: sys::tessera_query_channel_t, parent = QueryParent, name = "query channel",
    ctx_free = tessera_query_channel_free
);
resource!(
    /// Aggregate operation.
    ChannelOperation: sys::tessera_channel_operation_t, parent = QueryParent, name = "channel operation",
    ctx_free = tessera_channel_operation_free
);

/// Query. Carries its buffer registry as attached state, so the buffers are
/// dropped only after the native query is freed.
#[derive(Debug)]
pub enum Query {}

impl Resource for Query {
    type Raw = sys::tessera_query_t;
    type Parent = OwnedGuard<Array>;
    type Attached = QueryState;

    const NAME: &'static str = "query";

    unsafe fn free(api: &Api, _parent: &Self::Parent, raw: *mut Self::Raw) -> capi_return_t {
        let mut raw = raw;
        (api.tessera_query_free)(&mut raw);
        TESSERA_OK
    }
}
