//! Filters and filter pipelines.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::resource;
use crate::types::{FilterOption, FilterType};
use std::ffi::c_void;

/// A single filter stage.
#[derive(Debug, Clone)]
pub struct Filter {
    ctx: Context,
    handle: Handle<resource::Filter>,
}

impl Filter {
    /// Creates a filter of `filter_type`.
    pub fn new(ctx: &Context, filter_type: FilterType) -> Result<Self> {
        let handle = Handle::<resource::Filter>::create(ctx.runtime(), ctx.owned()?, |ctx, out| {
            // SAFETY: ctx is held by the parent guard.
            ctx.check(unsafe { (ctx.api().tessera_filter_alloc)(ctx.as_ptr(), filter_type.to_raw(), out) })
        })?;
        Ok(Self {
            ctx: ctx.clone(),
            handle,
        })
    }

    /// Sets an integer option.
    ///
    /// `CompressionLevel` takes an `i32`, `BitWidthMaxWindow` a non-negative
    /// value passed as `u32`.
    pub fn set_option(&self, option: FilterOption, value: i32) -> Result<()> {
        let ctx = self.ctx.guard()?;
        let filter = self.handle.acquire()?;
        let unsigned;
        let value_ptr: *const c_void = match option {
            FilterOption::CompressionLevel => (&value as *const i32).cast(),
            FilterOption::BitWidthMaxWindow => {
                unsigned = u32::try_from(value)
                    .map_err(|_| Error::usage(format!("{option} must not be negative")))?;
                (&unsigned as *const u32).cast()
            }
        };
        // SAFETY: both handles are held by their guards; the value outlives the call.
        ctx.check(unsafe {
            (ctx.api().tessera_filter_set_option)(ctx.as_ptr(), filter.as_ptr(), option.to_raw(), value_ptr)
        })
    }

    /// Kind of the filter.
    pub fn filter_type(&self) -> Result<FilterType> {
        let ctx = self.ctx.guard()?;
        let filter = self.handle.acquire()?;
        let mut raw = 0;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe { (ctx.api().tessera_filter_get_type)(ctx.as_ptr(), filter.as_ptr(), &mut raw) })?;
        FilterType::try_from(raw)
    }

    /// The underlying handle.
    pub fn handle(&self) -> &Handle<resource::Filter> {
        &self.handle
    }
}

/// An ordered pipeline of filters.
#[derive(Debug, Clone)]
pub struct FilterList {
    ctx: Context,
    handle: Handle<resource::FilterList>,
}

impl FilterList {
    /// Creates an empty pipeline.
    pub fn new(ctx: &Context) -> Result<Self> {
        let handle = Handle::<resource::FilterList>::create(ctx.runtime(), ctx.owned()?, |ctx, out| {
            // SAFETY: ctx is held by the parent guard.
            ctx.check(unsafe { (ctx.api().tessera_filter_list_alloc)(ctx.as_ptr(), out) })
        })?;
        Ok(Self {
            ctx: ctx.clone(),
            handle,
        })
    }

    /// Appends a copy of `filter`.
    pub fn add_filter(&self, filter: &Filter) -> Result<()> {
        let ctx = self.ctx.guard()?;
        let list = self.handle.acquire()?;
        let filter = filter.handle().acquire()?;
        // SAFETY: all three handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_filter_list_add_filter)(ctx.as_ptr(), list.as_ptr(), filter.as_ptr())
        })
    }

    /// Number of filters.
    pub fn nfilters(&self) -> Result<u32> {
        let ctx = self.ctx.guard()?;
        let list = self.handle.acquire()?;
        let mut n = 0;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe { (ctx.api().tessera_filter_list_get_nfilters)(ctx.as_ptr(), list.as_ptr(), &mut n) })?;
        Ok(n)
    }

    /// The underlying handle.
    pub fn handle(&self) -> &Handle<resource::FilterList> {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ctx;

    #[test]
    fn pipeline() {
        let ctx = ctx();
        let list = FilterList::new(&ctx).unwrap();
        assert_eq!(list.nfilters().unwrap(), 0);

        let gzip = Filter::new(&ctx, FilterType::Gzip).unwrap();
        gzip.set_option(FilterOption::CompressionLevel, 9).unwrap();
        let bwr = Filter::new(&ctx, FilterType::BitWidthReduction).unwrap();
        bwr.set_option(FilterOption::BitWidthMaxWindow, 256).unwrap();

        list.add_filter(&bwr).unwrap();
        list.add_filter(&gzip).unwrap();
        assert_eq!(list.nfilters().unwrap(), 2);
        assert_eq!(gzip.filter_type().unwrap(), FilterType::Gzip);
    }

    #[test]
    fn option_not_supported_by_filter() {
        let ctx = ctx();
        let md5 = Filter::new(&ctx, FilterType::ChecksumMd5).unwrap();
        let err = md5.set_option(FilterOption::CompressionLevel, 3).unwrap_err();
        assert!(matches!(err, Error::Native { .. }));
    }

    #[test]
    fn negative_window_is_usage_error() {
        let ctx = ctx();
        let bwr = Filter::new(&ctx, FilterType::BitWidthReduction).unwrap();
        assert!(matches!(
            bwr.set_option(FilterOption::BitWidthMaxWindow, -1),
            Err(Error::Usage { .. })
        ));
    }
}
