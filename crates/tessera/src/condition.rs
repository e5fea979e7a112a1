//! Query conditions.

use crate::context::Context;
use crate::datatype::{as_bytes, Element};
use crate::error::Result;
use crate::handle::Handle;
use crate::marshal::CText;
use crate::resource;
use crate::types::{CombinationOp, ConditionOp};
use std::ptr;

/// A filter on cell values evaluated by the engine.
#[derive(Debug, Clone)]
pub struct QueryCondition {
    ctx: Context,
    handle: Handle<resource::QueryCondition>,
}

impl QueryCondition {
    /// `field <op> value` on a numeric field.
    pub fn new<T: Element>(ctx: &Context, field: &str, value: T, op: ConditionOp) -> Result<Self> {
        Self::with_bytes(ctx, field, as_bytes(std::slice::from_ref(&value)), op)
    }

    /// `field <op> value` on a string field.
    pub fn new_str(ctx: &Context, field: &str, value: &str, op: ConditionOp) -> Result<Self> {
        Self::with_bytes(ctx, field, value.as_bytes(), op)
    }

    fn with_bytes(ctx: &Context, field: &str, value: &[u8], op: ConditionOp) -> Result<Self> {
        let field = CText::ascii(field)?;
        let cond = Self::alloc(ctx)?;
        {
            let guard = ctx.guard()?;
            let raw = cond.handle.acquire()?;
            // SAFETY: both handles are held by their guards; the engine copies
            // the value.
            guard.check(unsafe {
                (guard.api().tessera_query_condition_init)(
                    guard.as_ptr(),
                    raw.as_ptr(),
                    field.as_ptr(),
                    value.as_ptr().cast(),
                    value.len() as u64,
                    op.to_raw(),
                )
            })?;
        }
        Ok(cond)
    }

    fn alloc(ctx: &Context) -> Result<Self> {
        let handle = Handle::<resource::QueryCondition>::create(ctx.runtime(), ctx.owned()?, |ctx, out| {
            // SAFETY: ctx is held by the parent guard.
            ctx.check(unsafe { (ctx.api().tessera_query_condition_alloc)(ctx.as_ptr(), out) })
        })?;
        Ok(Self {
            ctx: ctx.clone(),
            handle,
        })
    }

    /// Combines with `other` into a new condition.
    pub fn combine(&self, other: &Self, op: CombinationOp) -> Result<Self> {
        let left = self.handle.acquire()?;
        let right = other.handle.acquire()?;
        let handle = Handle::<resource::QueryCondition>::create(self.ctx.runtime(), self.ctx.owned()?, |ctx, out| {
            // SAFETY: ctx and both operands are held by their guards.
            ctx.check(unsafe {
                (ctx.api().tessera_query_condition_combine)(
                    ctx.as_ptr(),
                    left.as_ptr(),
                    right.as_ptr(),
                    op.to_raw(),
                    out,
                )
            })
        })?;
        Ok(Self {
            ctx: self.ctx.clone(),
            handle,
        })
    }

    /// Negates into a new condition.
    pub fn negate(&self) -> Result<Self> {
        let inner = self.handle.acquire()?;
        let mut raw = ptr::null_mut();
        {
            let ctx = self.ctx.guard()?;
            // SAFETY: ctx and the operand are held by their guards.
            ctx.check(unsafe {
                (ctx.api().tessera_query_condition_negate)(ctx.as_ptr(), inner.as_ptr(), &mut raw)
            })?;
        }
        let handle = Handle::adopt(self.ctx.runtime(), self.ctx.owned()?, raw, true)?;
        Ok(Self {
            ctx: self.ctx.clone(),
            handle,
        })
    }

    /// The underlying handle.
    pub fn handle(&self) -> &Handle<resource::QueryCondition> {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ctx;
    use crate::Error;

    #[test]
    fn combine_and_negate() {
        let ctx = ctx();
        let low = QueryCondition::new(&ctx, "a", 10i32, ConditionOp::Ge).unwrap();
        let high = QueryCondition::new(&ctx, "a", 20i32, ConditionOp::Lt).unwrap();
        let both = low.combine(&high, CombinationOp::And).unwrap();
        let outside = both.negate().unwrap();
        assert!(!outside.handle().ptr_eq(both.handle()));
    }

    #[test]
    fn not_is_not_a_binary_combination() {
        let ctx = ctx();
        let a = QueryCondition::new(&ctx, "a", 1i32, ConditionOp::Eq).unwrap();
        let b = QueryCondition::new(&ctx, "a", 2i32, ConditionOp::Eq).unwrap();
        let err = a.combine(&b, CombinationOp::Not).unwrap_err();
        assert!(matches!(err, Error::Allocation { kind: "query condition", .. }));
    }
}
