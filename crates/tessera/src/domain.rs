//! Domains and dimensions.

use crate::context::Context;
use crate::datatype::{CellValNum, Datatype, Element};
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::marshal::{text_from_ptr, CText};
use crate::resource;
use std::ffi::c_void;
use std::ptr;

/// One axis of an array's coordinate space.
#[derive(Debug, Clone)]
pub struct Dimension {
    ctx: Context,
    handle: Handle<resource::Dimension>,
}

impl Dimension {
    /// Creates a dimension over the inclusive range `bounds` with tiles of
    /// `extent` cells.
    pub fn new<T: Element>(ctx: &Context, name: &str, bounds: [T; 2], extent: T) -> Result<Self> {
        if bounds[0] > bounds[1] {
            return Err(Error::usage(format!(
                "dimension '{name}' has lower bound {:?} above upper bound {:?}",
                bounds[0], bounds[1]
            )));
        }
        let name = CText::ascii(name)?;
        let handle = Handle::<resource::Dimension>::create(ctx.runtime(), ctx.owned()?, |ctx, out| {
            // SAFETY: ctx is held by the parent guard; bounds and extent
            // outlive the call.
            ctx.check(unsafe {
                (ctx.api().tessera_dimension_alloc)(
                    ctx.as_ptr(),
                    name.as_ptr(),
                    T::DATATYPE.to_raw(),
                    bounds.as_ptr().cast::<c_void>(),
                    (&extent as *const T).cast::<c_void>(),
                    out,
                )
            })
        })?;
        Ok(Self {
            ctx: ctx.clone(),
            handle,
        })
    }

    /// Creates a variable-length string dimension.
    pub fn new_string(ctx: &Context, name: &str) -> Result<Self> {
        let name = CText::ascii(name)?;
        let handle = Handle::<resource::Dimension>::create(ctx.runtime(), ctx.owned()?, |ctx, out| {
            // SAFETY: ctx is held by the parent guard; string dimensions take
            // no bounds or extent.
            ctx.check(unsafe {
                (ctx.api().tessera_dimension_alloc)(
                    ctx.as_ptr(),
                    name.as_ptr(),
                    Datatype::StringAscii.to_raw(),
                    ptr::null(),
                    ptr::null(),
                    out,
                )
            })
        })?;
        let dim = Self {
            ctx: ctx.clone(),
            handle,
        };
        dim.set_cell_val_num(CellValNum::Var)?;
        Ok(dim)
    }

    pub(crate) fn from_handle(ctx: &Context, handle: Handle<resource::Dimension>) -> Self {
        Self {
            ctx: ctx.clone(),
            handle,
        }
    }

    /// Sets the number of values per coordinate.
    pub fn set_cell_val_num(&self, num: CellValNum) -> Result<()> {
        let ctx = self.ctx.guard()?;
        let dim = self.handle.acquire()?;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_dimension_set_cell_val_num)(ctx.as_ptr(), dim.as_ptr(), num.to_raw())
        })
    }

    /// Name of the dimension.
    pub fn name(&self) -> Result<String> {
        let ctx = self.ctx.guard()?;
        let dim = self.handle.acquire()?;
        let mut name = ptr::null();
        // SAFETY: both handles are held by their guards; the name is copied
        // before they drop.
        unsafe {
            ctx.check((ctx.api().tessera_dimension_get_name)(ctx.as_ptr(), dim.as_ptr(), &mut name))?;
            text_from_ptr(name)
        }
    }

    /// Datatype of the coordinates.
    pub fn datatype(&self) -> Result<Datatype> {
        let ctx = self.ctx.guard()?;
        let dim = self.handle.acquire()?;
        let mut raw = 0;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe { (ctx.api().tessera_dimension_get_type)(ctx.as_ptr(), dim.as_ptr(), &mut raw) })?;
        Datatype::try_from(raw)
    }

    /// The underlying handle.
    pub fn handle(&self) -> &Handle<resource::Dimension> {
        &self.handle
    }
}

/// The coordinate space of an array.
#[derive(Debug, Clone)]
pub struct Domain {
    ctx: Context,
    handle: Handle<resource::Domain>,
}

impl Domain {
    /// Creates an empty domain.
    pub fn new(ctx: &Context) -> Result<Self> {
        let handle = Handle::<resource::Domain>::create(ctx.runtime(), ctx.owned()?, |ctx, out| {
            // SAFETY: ctx is held by the parent guard.
            ctx.check(unsafe { (ctx.api().tessera_domain_alloc)(ctx.as_ptr(), out) })
        })?;
        Ok(Self {
            ctx: ctx.clone(),
            handle,
        })
    }

    pub(crate) fn from_handle(ctx: &Context, handle: Handle<resource::Domain>) -> Self {
        Self {
            ctx: ctx.clone(),
            handle,
        }
    }

    /// Appends a copy of `dim`.
    pub fn add_dimension(&self, dim: &Dimension) -> Result<()> {
        let ctx = self.ctx.guard()?;
        let domain = self.handle.acquire()?;
        let dim = dim.handle().acquire()?;
        // SAFETY: all three handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_domain_add_dimension)(ctx.as_ptr(), domain.as_ptr(), dim.as_ptr())
        })
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> Result<u32> {
        let ctx = self.ctx.guard()?;
        let domain = self.handle.acquire()?;
        let mut n = 0;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe { (ctx.api().tessera_domain_get_ndim)(ctx.as_ptr(), domain.as_ptr(), &mut n) })?;
        Ok(n)
    }

    /// Returns a copy of the dimension called `name`.
    pub fn dimension(&self, name: &str) -> Result<Dimension> {
        let c_name = CText::ascii(name)?;
        let ctx = self.ctx.guard()?;
        let domain = self.handle.acquire()?;
        let mut raw = ptr::null_mut();
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_domain_get_dimension_from_name)(
                ctx.as_ptr(),
                domain.as_ptr(),
                c_name.as_ptr(),
                &mut raw,
            )
        })?;
        let handle = Handle::adopt(ctx.runtime(), self.ctx.owned()?, raw, true)?;
        Ok(Dimension::from_handle(&self.ctx, handle))
    }

    /// The underlying handle.
    pub fn handle(&self) -> &Handle<resource::Domain> {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ctx;

    #[test]
    fn domain_with_dimensions() {
        let ctx = ctx();
        let domain = Domain::new(&ctx).unwrap();
        domain
            .add_dimension(&Dimension::new(&ctx, "rows", [1i32, 4], 4).unwrap())
            .unwrap();
        domain
            .add_dimension(&Dimension::new(&ctx, "cols", [0u64, 1023], 64).unwrap())
            .unwrap();
        assert_eq!(domain.ndim().unwrap(), 2);

        let cols = domain.dimension("cols").unwrap();
        assert_eq!(cols.name().unwrap(), "cols");
        assert_eq!(cols.datatype().unwrap(), Datatype::UInt64);

        assert!(matches!(domain.dimension("depth"), Err(Error::Native { .. })));
    }

    #[test]
    fn inverted_bounds_rejected() {
        let ctx = ctx();
        assert!(matches!(
            Dimension::new(&ctx, "rows", [10i64, 1], 2),
            Err(Error::Usage { .. })
        ));
    }

    #[test]
    fn string_dimension() {
        let ctx = ctx();
        let dim = Dimension::new_string(&ctx, "key").unwrap();
        assert_eq!(dim.datatype().unwrap(), Datatype::StringAscii);
    }

    #[test]
    fn duplicate_dimension_rejected() {
        let ctx = ctx();
        let domain = Domain::new(&ctx).unwrap();
        let rows = Dimension::new(&ctx, "rows", [1i32, 4], 4).unwrap();
        domain.add_dimension(&rows).unwrap();
        assert!(domain.add_dimension(&rows).is_err());
    }
}
