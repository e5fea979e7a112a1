//! Groups of arrays and other groups.

use crate::context::Context;
use crate::error::Result;
use crate::handle::Handle;
use crate::marshal::CText;
use crate::resource;
use crate::types::QueryType;

/// A named collection of array and group URIs.
#[derive(Debug, Clone)]
pub struct Group {
    ctx: Context,
    handle: Handle<resource::Group>,
}

impl Group {
    /// Creates an empty group at `uri` on storage.
    pub fn create(ctx: &Context, uri: &str) -> Result<()> {
        let uri = CText::utf8(uri)?;
        let guard = ctx.guard()?;
        // SAFETY: ctx is held by the guard.
        guard.check(unsafe { (guard.api().tessera_group_create)(guard.as_ptr(), uri.as_ptr()) })
    }

    /// Creates a handle on the group at `uri`. The group is not opened.
    pub fn new(ctx: &Context, uri: &str) -> Result<Self> {
        let uri = CText::utf8(uri)?;
        let handle = Handle::<resource::Group>::create(ctx.runtime(), ctx.owned()?, |ctx, out| {
            // SAFETY: ctx is held by the parent guard.
            ctx.check(unsafe { (ctx.api().tessera_group_alloc)(ctx.as_ptr(), uri.as_ptr(), out) })
        })?;
        Ok(Self {
            ctx: ctx.clone(),
            handle,
        })
    }

    /// Opens the group for reading or for adding members.
    pub fn open(&self, query_type: QueryType) -> Result<()> {
        let ctx = self.ctx.guard()?;
        let group = self.handle.acquire()?;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe { (ctx.api().tessera_group_open)(ctx.as_ptr(), group.as_ptr(), query_type.to_raw()) })
    }

    /// Closes the group, persisting added members.
    pub fn close(&self) -> Result<()> {
        let ctx = self.ctx.guard()?;
        let group = self.handle.acquire()?;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe { (ctx.api().tessera_group_close)(ctx.as_ptr(), group.as_ptr()) })
    }

    /// Adds the array or group at `uri` under `name`.
    ///
    /// A relative `uri` is resolved against the group's own URI.
    pub fn add_member(&self, uri: &str, relative: bool, name: Option<&str>) -> Result<()> {
        let uri = CText::utf8(uri)?;
        let name = name.map(CText::ascii).transpose()?;
        let ctx = self.ctx.guard()?;
        let group = self.handle.acquire()?;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_group_add_member)(
                ctx.as_ptr(),
                group.as_ptr(),
                uri.as_ptr(),
                u8::from(relative),
                name.as_ref().map_or(std::ptr::null(), CText::as_ptr),
            )
        })
    }

    /// Number of members.
    pub fn member_count(&self) -> Result<u64> {
        let ctx = self.ctx.guard()?;
        let group = self.handle.acquire()?;
        let mut count = 0;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe { (ctx.api().tessera_group_get_member_count)(ctx.as_ptr(), group.as_ptr(), &mut count) })?;
        Ok(count)
    }

    /// The underlying handle.
    pub fn handle(&self) -> &Handle<resource::Group> {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{create_int_array, ctx, unique_uri};

    #[test]
    fn members_persist_across_opens() {
        let ctx = ctx();
        let uri = unique_uri("group");
        let member = unique_uri("group-member");
        create_int_array(&ctx, &member);
        Group::create(&ctx, &uri).unwrap();

        let group = Group::new(&ctx, &uri).unwrap();
        group.open(QueryType::Write).unwrap();
        group.add_member(&member, false, Some("ints")).unwrap();
        group.close().unwrap();

        let group = Group::new(&ctx, &uri).unwrap();
        group.open(QueryType::Read).unwrap();
        assert_eq!(group.member_count().unwrap(), 1);
    }

    #[test]
    fn adding_to_a_read_group_fails() {
        let ctx = ctx();
        let uri = unique_uri("group-read");
        Group::create(&ctx, &uri).unwrap();
        let group = Group::new(&ctx, &uri).unwrap();
        group.open(QueryType::Read).unwrap();
        assert!(group.add_member("sim://elsewhere", false, None).is_err());
    }

    #[test]
    fn opening_a_missing_group_fails() {
        let ctx = ctx();
        let group = Group::new(&ctx, &unique_uri("group-missing")).unwrap();
        assert!(group.open(QueryType::Read).is_err());
    }
}
