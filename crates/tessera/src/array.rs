//! Arrays.

use crate::context::Context;
use crate::datatype::Element;
use crate::error::{Error, Result};
use crate::handle::{Guard, Handle};
use crate::marshal::CText;
use crate::resource;
use crate::schema::ArraySchema;
use crate::types::QueryType;
use std::ffi::c_void;
use std::ptr;

/// An array at a URI.
#[derive(Debug, Clone)]
pub struct Array {
    ctx: Context,
    handle: Handle<resource::Array>,
    uri: String,
}

impl Array {
    /// Creates the array at `uri` on storage with `schema`.
    pub fn create(ctx: &Context, uri: &str, schema: &ArraySchema) -> Result<()> {
        let c_uri = CText::utf8(uri)?;
        let guard = ctx.guard()?;
        let schema = schema.handle().acquire()?;
        // SAFETY: ctx and schema are held by their guards.
        guard.check(unsafe {
            (guard.api().tessera_array_create)(guard.as_ptr(), c_uri.as_ptr(), schema.as_ptr())
        })
    }

    /// Creates a handle on the array at `uri`. The array is not opened.
    pub fn new(ctx: &Context, uri: &str) -> Result<Self> {
        let c_uri = CText::utf8(uri)?;
        let handle = Handle::<resource::Array>::create(ctx.runtime(), ctx.owned()?, |ctx, out| {
            // SAFETY: ctx is held by the parent guard.
            ctx.check(unsafe { (ctx.api().tessera_array_alloc)(ctx.as_ptr(), c_uri.as_ptr(), out) })
        })?;
        Ok(Self {
            ctx: ctx.clone(),
            handle,
            uri: uri.to_owned(),
        })
    }

    /// Opens the array for reads or writes.
    pub fn open(&self, query_type: QueryType) -> Result<()> {
        let ctx = self.ctx.guard()?;
        let array = self.handle.acquire()?;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_array_open)(ctx.as_ptr(), array.as_ptr(), query_type.to_raw())
        })
    }

    /// Closes the array.
    pub fn close(&self) -> Result<()> {
        let ctx = self.ctx.guard()?;
        let array = self.handle.acquire()?;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe { (ctx.api().tessera_array_close)(ctx.as_ptr(), array.as_ptr()) })
    }

    /// Returns true while the array is open.
    pub fn is_open(&self) -> Result<bool> {
        let ctx = self.ctx.guard()?;
        let array = self.handle.acquire()?;
        let mut open = 0;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_array_is_open)(ctx.as_ptr(), array.as_ptr(), &mut open)
        })?;
        Ok(open != 0)
    }

    /// Returns the schema of the open array.
    pub fn schema(&self) -> Result<ArraySchema> {
        let ctx = self.ctx.guard()?;
        let array = self.handle.acquire()?;
        let mut raw = ptr::null_mut();
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_array_get_schema)(ctx.as_ptr(), array.as_ptr(), &mut raw)
        })?;
        let handle = Handle::adopt(ctx.runtime(), self.ctx.owned()?, raw, true)?;
        Ok(ArraySchema::from_handle(&self.ctx, handle))
    }

    /// Refreshes an array open for reading, picking up schema changes made
    /// since it was opened.
    pub fn reopen(&self) -> Result<()> {
        let ctx = self.ctx.guard()?;
        let array = self.handle.acquire()?;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe { (ctx.api().tessera_array_reopen)(ctx.as_ptr(), array.as_ptr()) })
    }

    /// Smallest and largest coordinate written on dimension `name`, or
    /// `None` while the array holds no cells.
    ///
    /// `T` must match the dimension's datatype.
    pub fn non_empty_domain<T: Element>(&self, name: &str) -> Result<Option<(T, T)>> {
        let datatype = self.schema()?.domain()?.dimension(name)?.datatype()?;
        if datatype != T::DATATYPE {
            return Err(Error::SchemaMismatch {
                field: name.to_owned(),
                expected: datatype.to_string(),
                actual: T::DATATYPE.to_string(),
            });
        }
        let c_name = CText::ascii(name)?;
        let ctx = self.ctx.guard()?;
        let array = self.handle.acquire()?;
        let mut bounds = [T::default(); 2];
        let mut is_empty = 0;
        // SAFETY: both handles are held by their guards; `bounds` holds two
        // values of the dimension's datatype.
        ctx.check(unsafe {
            (ctx.api().tessera_array_get_non_empty_domain_from_name)(
                ctx.as_ptr(),
                array.as_ptr(),
                c_name.as_ptr(),
                bounds.as_mut_ptr().cast::<c_void>(),
                &mut is_empty,
            )
        })?;
        Ok((is_empty == 0).then_some((bounds[0], bounds[1])))
    }

    /// URI of the array.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Context the array was created under.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// The underlying handle.
    pub fn handle(&self) -> &Handle<resource::Array> {
        &self.handle
    }

    pub(crate) fn guard(&self) -> Result<Guard<'_, resource::Array>> {
        self.handle.acquire()
    }
}
