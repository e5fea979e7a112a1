//! Fragment metadata of an array.

use crate::context::Context;
use crate::error::Result;
use crate::handle::Handle;
use crate::marshal::CText;
use crate::resource;

/// Fragment metadata of the array at a URI.
#[derive(Debug, Clone)]
pub struct FragmentInfo {
    ctx: Context,
    handle: Handle<resource::FragmentInfo>,
}

impl FragmentInfo {
    /// Creates fragment info for `uri`. Call [`load`](Self::load) before
    /// reading it.
    pub fn new(ctx: &Context, uri: &str) -> Result<Self> {
        let uri = CText::utf8(uri)?;
        let handle = Handle::<resource::FragmentInfo>::create(ctx.runtime(), ctx.owned()?, |ctx, out| {
            // SAFETY: ctx is held by the parent guard.
            ctx.check(unsafe { (ctx.api().tessera_fragment_info_alloc)(ctx.as_ptr(), uri.as_ptr(), out) })
        })?;
        Ok(Self {
            ctx: ctx.clone(),
            handle,
        })
    }

    /// Reads the fragment metadata from storage.
    pub fn load(&self) -> Result<()> {
        let ctx = self.ctx.guard()?;
        let info = self.handle.acquire()?;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe { (ctx.api().tessera_fragment_info_load)(ctx.as_ptr(), info.as_ptr()) })
    }

    /// Number of fragments, one per completed write.
    pub fn fragment_num(&self) -> Result<u32> {
        let ctx = self.ctx.guard()?;
        let info = self.handle.acquire()?;
        let mut num = 0;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_fragment_info_get_fragment_num)(ctx.as_ptr(), info.as_ptr(), &mut num)
        })?;
        Ok(num)
    }

    /// The underlying handle.
    pub fn handle(&self) -> &Handle<resource::FragmentInfo> {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{create_int_array, ctx, unique_uri, write_int_cells};

    #[test]
    fn one_fragment_per_write() {
        let ctx = ctx();
        let uri = unique_uri("fragments");
        create_int_array(&ctx, &uri);
        write_int_cells(&ctx, &uri, &[1], &[1]);
        write_int_cells(&ctx, &uri, &[2, 3], &[2, 3]);

        let info = FragmentInfo::new(&ctx, &uri).unwrap();
        info.load().unwrap();
        assert_eq!(info.fragment_num().unwrap(), 2);
    }

    #[test]
    fn reading_before_load_fails() {
        let ctx = ctx();
        let uri = unique_uri("fragments-unloaded");
        create_int_array(&ctx, &uri);
        let info = FragmentInfo::new(&ctx, &uri).unwrap();
        assert!(info.fragment_num().is_err());
    }

    #[test]
    fn missing_array() {
        let ctx = ctx();
        let info = FragmentInfo::new(&ctx, &unique_uri("fragments-missing")).unwrap();
        assert!(info.load().is_err());
    }
}
