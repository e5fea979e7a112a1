//! Enumerations of attribute values.

use crate::context::Context;
use crate::datatype::{as_bytes, CellValNum, Datatype};
use crate::error::Result;
use crate::handle::Handle;
use crate::marshal::{text_from_ptr, CText};
use crate::resource;
use std::ffi::{c_int, c_void};
use std::ptr;

/// A named list of values an attribute can index into.
#[derive(Debug, Clone)]
pub struct Enumeration {
    ctx: Context,
    handle: Handle<resource::Enumeration>,
}

impl Enumeration {
    /// Creates an enumeration from raw value bytes.
    ///
    /// `offsets` is required for variable-length values and holds the byte
    /// offset of each value in `data`.
    pub fn new(
        ctx: &Context,
        name: &str,
        datatype: Datatype,
        cell_val_num: CellValNum,
        ordered: bool,
        data: &[u8],
        offsets: Option<&[u64]>,
    ) -> Result<Self> {
        let name = CText::ascii(name)?;
        let (offsets_ptr, offsets_size) = match offsets {
            Some(offsets) => (offsets.as_ptr().cast::<c_void>(), as_bytes(offsets).len() as u64),
            None => (ptr::null(), 0),
        };
        let handle = Handle::<resource::Enumeration>::create(ctx.runtime(), ctx.owned()?, |ctx, out| {
            // SAFETY: ctx is held by the parent guard; the engine copies data
            // and offsets before returning.
            ctx.check(unsafe {
                (ctx.api().tessera_enumeration_alloc)(
                    ctx.as_ptr(),
                    name.as_ptr(),
                    datatype.to_raw(),
                    cell_val_num.to_raw(),
                    c_int::from(ordered),
                    data.as_ptr().cast(),
                    data.len() as u64,
                    offsets_ptr,
                    offsets_size,
                    out,
                )
            })
        })?;
        Ok(Self {
            ctx: ctx.clone(),
            handle,
        })
    }

    /// Creates an enumeration of UTF-8 strings.
    pub fn from_strings(ctx: &Context, name: &str, values: &[&str], ordered: bool) -> Result<Self> {
        let mut data = Vec::new();
        let mut offsets = Vec::with_capacity(values.len());
        for value in values {
            offsets.push(data.len() as u64);
            data.extend_from_slice(value.as_bytes());
        }
        Self::new(
            ctx,
            name,
            Datatype::StringUtf8,
            CellValNum::Var,
            ordered,
            &data,
            Some(&offsets),
        )
    }

    /// Name of the enumeration.
    pub fn name(&self) -> Result<String> {
        let ctx = self.ctx.guard()?;
        let enumeration = self.handle.acquire()?;
        let mut name = ptr::null();
        // SAFETY: both handles are held by their guards; the name is copied
        // before they drop.
        unsafe {
            ctx.check((ctx.api().tessera_enumeration_get_name)(
                ctx.as_ptr(),
                enumeration.as_ptr(),
                &mut name,
            ))?;
            text_from_ptr(name)
        }
    }

    /// The underlying handle.
    pub fn handle(&self) -> &Handle<resource::Enumeration> {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ctx;
    use crate::Error;

    #[test]
    fn string_enumeration() {
        let ctx = ctx();
        let colors = Enumeration::from_strings(&ctx, "colors", &["red", "green", "blue"], false).unwrap();
        assert_eq!(colors.name().unwrap(), "colors");
    }

    #[test]
    fn fixed_enumeration() {
        let ctx = ctx();
        let levels = Enumeration::new(
            &ctx,
            "levels",
            Datatype::Int32,
            CellValNum::SINGLE,
            true,
            as_bytes(&[1i32, 2, 3]),
            None,
        )
        .unwrap();
        assert_eq!(levels.name().unwrap(), "levels");
    }

    #[test]
    fn var_values_need_offsets() {
        let ctx = ctx();
        let err = Enumeration::new(&ctx, "bad", Datatype::StringUtf8, CellValNum::Var, false, b"ab", None)
            .unwrap_err();
        assert!(matches!(err, Error::Allocation { kind: "enumeration", .. }));
    }
}
