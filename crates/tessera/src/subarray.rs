//! Subarrays: per-dimension ranges restricting a query.

use crate::array::Array;
use crate::context::Context;
use crate::datatype::Element;
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::resource;
use std::ffi::c_void;

/// A set of ranges per dimension.
#[derive(Debug, Clone)]
pub struct Subarray {
    ctx: Context,
    handle: Handle<resource::Subarray>,
}

impl Subarray {
    /// Creates a subarray covering the whole domain of `array`.
    pub fn new(array: &Array) -> Result<Self> {
        let ctx = array.context().clone();
        let parent = array.handle().acquire_owned()?;
        let handle = Handle::<resource::Subarray>::create(ctx.runtime(), parent, |array, out| {
            let ctx = ctx.guard()?;
            // SAFETY: ctx and array are held by their guards.
            ctx.check(unsafe { (ctx.api().tessera_subarray_alloc)(ctx.as_ptr(), array.as_ptr(), out) })
        })?;
        Ok(Self { ctx, handle })
    }

    /// Adds the inclusive range `[start, end]` on dimension `dim_idx`.
    pub fn add_range<T: Element>(&self, dim_idx: u32, start: T, end: T) -> Result<()> {
        if start > end {
            return Err(Error::usage(format!(
                "range start {start:?} is above end {end:?}"
            )));
        }
        let ctx = self.ctx.guard()?;
        let subarray = self.handle.acquire()?;
        // SAFETY: both handles are held by their guards; start and end outlive the call.
        ctx.check(unsafe {
            (ctx.api().tessera_subarray_add_range)(
                ctx.as_ptr(),
                subarray.as_ptr(),
                dim_idx,
                (&start as *const T).cast::<c_void>(),
                (&end as *const T).cast::<c_void>(),
            )
        })
    }

    /// Number of ranges on dimension `dim_idx`.
    pub fn range_num(&self, dim_idx: u32) -> Result<u64> {
        let ctx = self.ctx.guard()?;
        let subarray = self.handle.acquire()?;
        let mut n = 0;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_subarray_get_range_num)(ctx.as_ptr(), subarray.as_ptr(), dim_idx, &mut n)
        })?;
        Ok(n)
    }

    /// The underlying handle.
    pub fn handle(&self) -> &Handle<resource::Subarray> {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{create_int_array, ctx, unique_uri};
    use crate::QueryType;

    #[test]
    fn ranges() {
        let ctx = ctx();
        let uri = unique_uri("subarray");
        create_int_array(&ctx, &uri);
        let array = Array::new(&ctx, &uri).unwrap();
        array.open(QueryType::Read).unwrap();

        let subarray = Subarray::new(&array).unwrap();
        assert_eq!(subarray.range_num(0).unwrap(), 1);
        subarray.add_range(0, 1i32, 3).unwrap();
        subarray.add_range(0, 7i32, 9).unwrap();
        assert_eq!(subarray.range_num(0).unwrap(), 2);

        assert!(subarray.range_num(5).is_err());
        assert!(matches!(subarray.add_range(0, 5i32, 2), Err(Error::Usage { .. })));
    }

    #[test]
    fn subarray_keeps_array_alive() {
        let ctx = ctx();
        let uri = unique_uri("subarray-parent");
        create_int_array(&ctx, &uri);
        let array = Array::new(&ctx, &uri).unwrap();
        array.open(QueryType::Read).unwrap();
        let array_ptr = array.handle().acquire().unwrap().as_ptr() as usize;

        let subarray = Subarray::new(&array).unwrap();
        let sub_ptr = subarray.handle().acquire().unwrap().as_ptr() as usize;
        drop(array);
        assert!(tessera_sim::is_live(array_ptr));
        drop(subarray);
        assert!(tessera_sim::freed_before(sub_ptr, array_ptr));
    }
}
