//! Attributes.

use crate::context::Context;
use crate::datatype::{CellValNum, Datatype};
use crate::error::Result;
use crate::filter::FilterList;
use crate::handle::Handle;
use crate::marshal::{text_from_ptr, CText};
use crate::resource;
use std::ptr;

/// A named, typed value stored in every cell.
#[derive(Debug, Clone)]
pub struct Attribute {
    ctx: Context,
    handle: Handle<resource::Attribute>,
}

impl Attribute {
    /// Creates an attribute with one value per cell.
    pub fn new(ctx: &Context, name: &str, datatype: Datatype) -> Result<Self> {
        let name = CText::ascii(name)?;
        let handle = Handle::<resource::Attribute>::create(ctx.runtime(), ctx.owned()?, |ctx, out| {
            // SAFETY: ctx is held by the parent guard.
            ctx.check(unsafe {
                (ctx.api().tessera_attribute_alloc)(ctx.as_ptr(), name.as_ptr(), datatype.to_raw(), out)
            })
        })?;
        Ok(Self {
            ctx: ctx.clone(),
            handle,
        })
    }

    pub(crate) fn from_handle(ctx: &Context, handle: Handle<resource::Attribute>) -> Self {
        Self {
            ctx: ctx.clone(),
            handle,
        }
    }

    /// Allows null cells; reads and writes then need a validity buffer.
    pub fn set_nullable(&self, nullable: bool) -> Result<()> {
        let ctx = self.ctx.guard()?;
        let attr = self.handle.acquire()?;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_attribute_set_nullable)(ctx.as_ptr(), attr.as_ptr(), u8::from(nullable))
        })
    }

    /// Sets the number of values per cell.
    pub fn set_cell_val_num(&self, num: CellValNum) -> Result<()> {
        let ctx = self.ctx.guard()?;
        let attr = self.handle.acquire()?;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_attribute_set_cell_val_num)(ctx.as_ptr(), attr.as_ptr(), num.to_raw())
        })
    }

    /// Makes cells variable-length.
    pub fn set_var_sized(&self) -> Result<()> {
        self.set_cell_val_num(CellValNum::Var)
    }

    /// Sets the filter pipeline.
    pub fn set_filter_list(&self, filters: &FilterList) -> Result<()> {
        let ctx = self.ctx.guard()?;
        let attr = self.handle.acquire()?;
        let list = filters.handle().acquire()?;
        // SAFETY: all three handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_attribute_set_filter_list)(ctx.as_ptr(), attr.as_ptr(), list.as_ptr())
        })
    }

    /// Ties the attribute to a schema enumeration.
    pub fn set_enumeration_name(&self, name: &str) -> Result<()> {
        let name = CText::ascii(name)?;
        let ctx = self.ctx.guard()?;
        let attr = self.handle.acquire()?;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_attribute_set_enumeration_name)(ctx.as_ptr(), attr.as_ptr(), name.as_ptr())
        })
    }

    /// Name of the attribute.
    pub fn name(&self) -> Result<String> {
        let ctx = self.ctx.guard()?;
        let attr = self.handle.acquire()?;
        let mut name = ptr::null();
        // SAFETY: both handles are held by their guards; the name is owned by
        // the attribute and copied before the guard drops.
        unsafe {
            ctx.check((ctx.api().tessera_attribute_get_name)(ctx.as_ptr(), attr.as_ptr(), &mut name))?;
            text_from_ptr(name)
        }
    }

    /// Datatype of the attribute.
    pub fn datatype(&self) -> Result<Datatype> {
        let ctx = self.ctx.guard()?;
        let attr = self.handle.acquire()?;
        let mut raw = 0;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe { (ctx.api().tessera_attribute_get_type)(ctx.as_ptr(), attr.as_ptr(), &mut raw) })?;
        Datatype::try_from(raw)
    }

    /// Number of values per cell.
    pub fn cell_val_num(&self) -> Result<CellValNum> {
        let ctx = self.ctx.guard()?;
        let attr = self.handle.acquire()?;
        let mut raw = 0;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_attribute_get_cell_val_num)(ctx.as_ptr(), attr.as_ptr(), &mut raw)
        })?;
        Ok(CellValNum::from_raw(raw))
    }

    /// Whether the attribute accepts nulls.
    pub fn nullable(&self) -> Result<bool> {
        let ctx = self.ctx.guard()?;
        let attr = self.handle.acquire()?;
        let mut raw = 0;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_attribute_get_nullable)(ctx.as_ptr(), attr.as_ptr(), &mut raw)
        })?;
        Ok(raw != 0)
    }

    /// The underlying handle.
    pub fn handle(&self) -> &Handle<resource::Attribute> {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ctx;
    use crate::{Error, Filter, FilterType};

    #[test]
    fn properties() {
        let ctx = ctx();
        let attr = Attribute::new(&ctx, "a1", Datatype::Float64).unwrap();
        assert_eq!(attr.name().unwrap(), "a1");
        assert_eq!(attr.datatype().unwrap(), Datatype::Float64);
        assert_eq!(attr.cell_val_num().unwrap(), CellValNum::SINGLE);
        assert!(!attr.nullable().unwrap());

        attr.set_nullable(true).unwrap();
        attr.set_var_sized().unwrap();
        assert!(attr.nullable().unwrap());
        assert_eq!(attr.cell_val_num().unwrap(), CellValNum::Var);
    }

    #[test]
    fn filters() {
        let ctx = ctx();
        let attr = Attribute::new(&ctx, "a1", Datatype::Int32).unwrap();
        let list = FilterList::new(&ctx).unwrap();
        list.add_filter(&Filter::new(&ctx, FilterType::Zstd).unwrap()).unwrap();
        attr.set_filter_list(&list).unwrap();
    }

    #[test]
    fn zero_cell_val_num_rejected() {
        let ctx = ctx();
        let attr = Attribute::new(&ctx, "a1", Datatype::Int32).unwrap();
        let err = attr.set_cell_val_num(CellValNum::Fixed(0)).unwrap_err();
        assert!(matches!(err, Error::Native { .. }));
    }

    #[test]
    fn non_ascii_name_rejected() {
        let ctx = ctx();
        assert!(matches!(
            Attribute::new(&ctx, "größe", Datatype::Int32),
            Err(Error::Marshal { .. })
        ));
    }
}
