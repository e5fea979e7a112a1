//! Array schemas and schema evolution.

use crate::attribute::Attribute;
use crate::context::Context;
use crate::domain::Domain;
use crate::enumeration::Enumeration;
use crate::error::Result;
use crate::handle::Handle;
use crate::marshal::CText;
use crate::resource;
use crate::types::ArrayType;
use std::ptr;

/// Description of an array: its domain and attributes.
#[derive(Debug, Clone)]
pub struct ArraySchema {
    ctx: Context,
    handle: Handle<resource::ArraySchema>,
}

impl ArraySchema {
    /// Creates an empty schema.
    pub fn new(ctx: &Context, array_type: ArrayType) -> Result<Self> {
        let handle = Handle::<resource::ArraySchema>::create(ctx.runtime(), ctx.owned()?, |ctx, out| {
            // SAFETY: ctx is held by the parent guard.
            ctx.check(unsafe { (ctx.api().tessera_array_schema_alloc)(ctx.as_ptr(), array_type.to_raw(), out) })
        })?;
        Ok(Self {
            ctx: ctx.clone(),
            handle,
        })
    }

    pub(crate) fn from_handle(ctx: &Context, handle: Handle<resource::ArraySchema>) -> Self {
        Self {
            ctx: ctx.clone(),
            handle,
        }
    }

    /// Sets the domain (copied).
    pub fn set_domain(&self, domain: &Domain) -> Result<()> {
        let ctx = self.ctx.guard()?;
        let schema = self.handle.acquire()?;
        let domain = domain.handle().acquire()?;
        // SAFETY: all three handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_array_schema_set_domain)(ctx.as_ptr(), schema.as_ptr(), domain.as_ptr())
        })
    }

    /// Appends an attribute (copied).
    pub fn add_attribute(&self, attr: &Attribute) -> Result<()> {
        let ctx = self.ctx.guard()?;
        let schema = self.handle.acquire()?;
        let attr = attr.handle().acquire()?;
        // SAFETY: all three handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_array_schema_add_attribute)(ctx.as_ptr(), schema.as_ptr(), attr.as_ptr())
        })
    }

    /// Adds an enumeration (copied) that attributes may refer to by name.
    pub fn add_enumeration(&self, enumeration: &Enumeration) -> Result<()> {
        let ctx = self.ctx.guard()?;
        let schema = self.handle.acquire()?;
        let enumeration = enumeration.handle().acquire()?;
        // SAFETY: all three handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_array_schema_add_enumeration)(ctx.as_ptr(), schema.as_ptr(), enumeration.as_ptr())
        })
    }

    /// Sets the tile capacity of sparse fragments.
    pub fn set_capacity(&self, capacity: u64) -> Result<()> {
        let ctx = self.ctx.guard()?;
        let schema = self.handle.acquire()?;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_array_schema_set_capacity)(ctx.as_ptr(), schema.as_ptr(), capacity)
        })
    }

    /// Validates the schema.
    pub fn check(&self) -> Result<()> {
        let ctx = self.ctx.guard()?;
        let schema = self.handle.acquire()?;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe { (ctx.api().tessera_array_schema_check)(ctx.as_ptr(), schema.as_ptr()) })
    }

    /// Returns a copy of the attribute called `name`.
    pub fn attribute(&self, name: &str) -> Result<Attribute> {
        let c_name = CText::ascii(name)?;
        let ctx = self.ctx.guard()?;
        let schema = self.handle.acquire()?;
        let mut raw = ptr::null_mut();
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_array_schema_get_attribute_from_name)(
                ctx.as_ptr(),
                schema.as_ptr(),
                c_name.as_ptr(),
                &mut raw,
            )
        })?;
        let handle = Handle::adopt(ctx.runtime(), self.ctx.owned()?, raw, true)?;
        Ok(Attribute::from_handle(&self.ctx, handle))
    }

    /// Returns a copy of the domain.
    pub fn domain(&self) -> Result<Domain> {
        let ctx = self.ctx.guard()?;
        let schema = self.handle.acquire()?;
        let mut raw = ptr::null_mut();
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_array_schema_get_domain)(ctx.as_ptr(), schema.as_ptr(), &mut raw)
        })?;
        let handle = Handle::adopt(ctx.runtime(), self.ctx.owned()?, raw, true)?;
        Ok(Domain::from_handle(&self.ctx, handle))
    }

    /// Returns true if the schema has an attribute called `name`.
    pub fn has_attribute(&self, name: &str) -> Result<bool> {
        let c_name = CText::ascii(name)?;
        let ctx = self.ctx.guard()?;
        let schema = self.handle.acquire()?;
        let mut has = 0;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_array_schema_has_attribute)(ctx.as_ptr(), schema.as_ptr(), c_name.as_ptr(), &mut has)
        })?;
        Ok(has != 0)
    }

    /// Array kind.
    pub fn array_type(&self) -> Result<ArrayType> {
        let ctx = self.ctx.guard()?;
        let schema = self.handle.acquire()?;
        let mut raw = 0;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_array_schema_get_array_type)(ctx.as_ptr(), schema.as_ptr(), &mut raw)
        })?;
        ArrayType::try_from(raw)
    }

    /// The underlying handle.
    pub fn handle(&self) -> &Handle<resource::ArraySchema> {
        &self.handle
    }
}

/// A set of changes applied to the schema of an existing array.
#[derive(Debug, Clone)]
pub struct ArraySchemaEvolution {
    ctx: Context,
    handle: Handle<resource::ArraySchemaEvolution>,
}

impl ArraySchemaEvolution {
    /// Creates an empty evolution.
    pub fn new(ctx: &Context) -> Result<Self> {
        let handle = Handle::<resource::ArraySchemaEvolution>::create(ctx.runtime(), ctx.owned()?, |ctx, out| {
            // SAFETY: ctx is held by the parent guard.
            ctx.check(unsafe { (ctx.api().tessera_array_schema_evolution_alloc)(ctx.as_ptr(), out) })
        })?;
        Ok(Self {
            ctx: ctx.clone(),
            handle,
        })
    }

    /// Adds an attribute (copied).
    pub fn add_attribute(&self, attr: &Attribute) -> Result<()> {
        let ctx = self.ctx.guard()?;
        let evolution = self.handle.acquire()?;
        let attr = attr.handle().acquire()?;
        // SAFETY: all three handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_array_schema_evolution_add_attribute)(ctx.as_ptr(), evolution.as_ptr(), attr.as_ptr())
        })
    }

    /// Drops the attribute called `name`.
    pub fn drop_attribute(&self, name: &str) -> Result<()> {
        let name = CText::ascii(name)?;
        let ctx = self.ctx.guard()?;
        let evolution = self.handle.acquire()?;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_array_schema_evolution_drop_attribute)(ctx.as_ptr(), evolution.as_ptr(), name.as_ptr())
        })
    }

    /// Applies the changes to the array at `uri`.
    pub fn evolve(&self, uri: &str) -> Result<()> {
        let uri = CText::utf8(uri)?;
        let ctx = self.ctx.guard()?;
        let evolution = self.handle.acquire()?;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe { (ctx.api().tessera_array_evolve)(ctx.as_ptr(), uri.as_ptr(), evolution.as_ptr()) })
    }

    /// The underlying handle.
    pub fn handle(&self) -> &Handle<resource::ArraySchemaEvolution> {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::Datatype;
    use crate::domain::Dimension;
    use crate::test_support::{create_int_array, ctx, int_schema, unique_uri};
    use crate::{Array, Error, QueryType};

    #[test]
    fn build_and_check() {
        let ctx = ctx();
        let schema = int_schema(&ctx);
        schema.set_capacity(1000).unwrap();
        schema.check().unwrap();
        assert_eq!(schema.array_type().unwrap(), ArrayType::Sparse);
        assert!(schema.has_attribute("a").unwrap());
        assert!(!schema.has_attribute("b").unwrap());
        assert_eq!(schema.attribute("a").unwrap().datatype().unwrap(), Datatype::Int32);
        assert_eq!(schema.domain().unwrap().ndim().unwrap(), 1);
    }

    #[test]
    fn check_without_domain_fails() {
        let ctx = ctx();
        let schema = ArraySchema::new(&ctx, ArrayType::Sparse).unwrap();
        schema
            .add_attribute(&Attribute::new(&ctx, "a", Datatype::Int32).unwrap())
            .unwrap();
        assert!(matches!(schema.check(), Err(Error::Native { .. })));
    }

    #[test]
    fn attribute_name_clashing_with_dimension() {
        let ctx = ctx();
        let schema = int_schema(&ctx);
        schema
            .add_attribute(&Attribute::new(&ctx, "rows", Datatype::Int32).unwrap())
            .unwrap();
        assert!(schema.check().is_err());
    }

    #[test]
    fn enumeration_reference() {
        let ctx = ctx();
        let schema = int_schema(&ctx);
        let color = Attribute::new(&ctx, "color", Datatype::UInt8).unwrap();
        color.set_enumeration_name("colors").unwrap();
        schema.add_attribute(&color).unwrap();
        assert!(schema.check().is_err());

        schema
            .add_enumeration(&Enumeration::from_strings(&ctx, "colors", &["red", "blue"], false).unwrap())
            .unwrap();
        schema.check().unwrap();
    }

    #[test]
    fn evolve_adds_and_drops_attributes() {
        let ctx = ctx();
        let uri = unique_uri("schema-evolve");
        create_int_array(&ctx, &uri);

        let evolution = ArraySchemaEvolution::new(&ctx).unwrap();
        evolution
            .add_attribute(&Attribute::new(&ctx, "b", Datatype::Float64).unwrap())
            .unwrap();
        evolution.drop_attribute("a").unwrap();
        evolution.evolve(&uri).unwrap();

        let array = Array::new(&ctx, &uri).unwrap();
        array.open(QueryType::Read).unwrap();
        let schema = array.schema().unwrap();
        assert!(schema.has_attribute("b").unwrap());
        assert!(!schema.has_attribute("a").unwrap());
    }

    #[test]
    fn evolve_missing_attribute_fails() {
        let ctx = ctx();
        let uri = unique_uri("schema-evolve-missing");
        create_int_array(&ctx, &uri);
        let evolution = ArraySchemaEvolution::new(&ctx).unwrap();
        evolution.drop_attribute("nope").unwrap();
        assert!(evolution.evolve(&uri).is_err());
    }

    #[test]
    fn dense_schema_is_rejected_on_create() {
        let ctx = ctx();
        let schema = ArraySchema::new(&ctx, ArrayType::Dense).unwrap();
        let domain = crate::Domain::new(&ctx).unwrap();
        domain
            .add_dimension(&Dimension::new(&ctx, "rows", [1i32, 4], 4).unwrap())
            .unwrap();
        schema.set_domain(&domain).unwrap();
        schema
            .add_attribute(&Attribute::new(&ctx, "a", Datatype::Int32).unwrap())
            .unwrap();
        schema.check().unwrap();
        assert!(Array::create(&ctx, &unique_uri("dense"), &schema).is_err());
    }
}
