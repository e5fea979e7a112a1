//! In-memory storage of arrays and groups, keyed by URI.

use crate::error::{SimError, SimResult};
use crate::model::SchemaDef;
use std::collections::BTreeMap;
use tessera_sys::TESSERA_SPARSE;

/// Values of one cell by field name; `None` is a null.
pub(crate) type Cell = BTreeMap<String, Option<Vec<u8>>>;

#[derive(Debug)]
pub(crate) struct StoredArray {
    pub(crate) schema: SchemaDef,
    pub(crate) cells: Vec<Cell>,
    pub(crate) fragments: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct Member {
    pub(crate) uri: String,
    pub(crate) name: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct StoredGroup {
    pub(crate) members: Vec<Member>,
}

#[derive(Debug)]
pub(crate) struct Storage {
    arrays: BTreeMap<String, StoredArray>,
    groups: BTreeMap<String, StoredGroup>,
}

impl Storage {
    pub(crate) const fn new() -> Self {
        Self {
            arrays: BTreeMap::new(),
            groups: BTreeMap::new(),
        }
    }

    fn taken(&self, uri: &str) -> bool {
        self.arrays.contains_key(uri) || self.groups.contains_key(uri)
    }

    pub(crate) fn create_array(&mut self, uri: &str, schema: SchemaDef) -> SimResult<()> {
        schema.check()?;
        if schema.array_type != TESSERA_SPARSE {
            return Err(SimError::invalid("only sparse arrays are supported"));
        }
        if self.taken(uri) {
            return Err(SimError::invalid(format!("'{uri}' already exists")));
        }
        self.arrays.insert(
            uri.to_owned(),
            StoredArray {
                schema,
                cells: Vec::new(),
                fragments: 0,
            },
        );
        Ok(())
    }

    pub(crate) fn array(&self, uri: &str) -> SimResult<&StoredArray> {
        self.arrays
            .get(uri)
            .ok_or_else(|| SimError::invalid(format!("array '{uri}' does not exist")))
    }

    pub(crate) fn array_mut(&mut self, uri: &str) -> SimResult<&mut StoredArray> {
        self.arrays
            .get_mut(uri)
            .ok_or_else(|| SimError::invalid(format!("array '{uri}' does not exist")))
    }

    pub(crate) fn create_group(&mut self, uri: &str) -> SimResult<()> {
        if self.taken(uri) {
            return Err(SimError::invalid(format!("'{uri}' already exists")));
        }
        self.groups.insert(uri.to_owned(), StoredGroup::default());
        Ok(())
    }

    pub(crate) fn group(&self, uri: &str) -> SimResult<&StoredGroup> {
        self.groups
            .get(uri)
            .ok_or_else(|| SimError::invalid(format!("group '{uri}' does not exist")))
    }

    pub(crate) fn group_mut(&mut self, uri: &str) -> SimResult<&mut StoredGroup> {
        self.groups
            .get_mut(uri)
            .ok_or_else(|| SimError::invalid(format!("group '{uri}' does not exist")))
    }
}

/// An array handle: a URI and, once opened, its mode and schema.
#[derive(Debug)]
pub(crate) struct ArrayObj {
    pub(crate) uri: String,
    pub(crate) open: Option<(u32, SchemaDef)>,
}

impl ArrayObj {
    pub(crate) fn opened(&self) -> SimResult<(u32, &SchemaDef)> {
        self.open
            .as_ref()
            .map(|(mode, schema)| (*mode, schema))
            .ok_or_else(|| SimError::state(format!("array '{}' is not open", self.uri)))
    }
}

#[derive(Debug)]
pub(crate) struct GroupObj {
    pub(crate) uri: String,
    pub(crate) mode: Option<u32>,
    pub(crate) pending: Vec<Member>,
}

#[derive(Debug)]
pub(crate) struct FragmentInfoObj {
    pub(crate) uri: String,
    pub(crate) loaded: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttributeDef, DimensionDef, DomainDef};
    use tessera_sys::{TESSERA_DENSE, TESSERA_INT32};

    fn schema(array_type: u32) -> SchemaDef {
        let mut schema = SchemaDef::new(array_type).unwrap();
        let mut domain = DomainDef::default();
        domain
            .add(DimensionDef::new("d", TESSERA_INT32, Some((vec![1, 0, 0, 0], vec![9, 0, 0, 0]))).unwrap())
            .unwrap();
        schema.domain = Some(domain);
        schema.add_attribute(AttributeDef::new("a", TESSERA_INT32).unwrap()).unwrap();
        schema
    }

    #[test]
    fn arrays() {
        let mut storage = Storage::new();
        storage.create_array("sim://a", schema(TESSERA_SPARSE)).unwrap();
        assert!(storage.create_array("sim://a", schema(TESSERA_SPARSE)).is_err());
        let err = storage.create_array("sim://d", schema(TESSERA_DENSE)).unwrap_err();
        assert!(err.to_string().contains("only sparse"));
        let err = storage.array("sim://missing").unwrap_err();
        assert_eq!(err.to_string(), "array 'sim://missing' does not exist");
    }

    #[test]
    fn groups_and_arrays_share_uris() {
        let mut storage = Storage::new();
        storage.create_group("sim://g").unwrap();
        assert!(storage.create_array("sim://g", schema(TESSERA_SPARSE)).is_err());
        assert!(storage.group("sim://g").unwrap().members.is_empty());
    }
}
