//! Per-query field buffer registry and result views.
//!
//! Every field bound on a query has a [`FieldBuffers`] entry holding up to
//! three [`Binding`]s (data, offsets, validity). A binding owns a pinned
//! region and the byte-size cell the engine reads before a submission and
//! overwrites with the number of bytes it produced.

use crate::datatype::{decode, CellValNum, Datatype, Element};
use crate::error::{Error, Result};
use crate::marshal::{CText, Region, SizeCell};
use crate::types::QueryType;
use std::collections::{BTreeMap, HashMap};
use std::ffi::c_void;
use std::fmt;

/// Declared shape of a query field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Element datatype.
    pub datatype: Datatype,
    /// Values per cell.
    pub cell_val_num: CellValNum,
    /// Whether cells may be null.
    pub nullable: bool,
}

impl FieldSpec {
    /// Returns true for variable-length fields.
    pub const fn is_var(&self) -> bool {
        self.cell_val_num.is_var()
    }

    /// Bytes per cell of a fixed-length field.
    pub const fn cell_bytes(&self) -> Option<usize> {
        match self.cell_val_num {
            CellValNum::Fixed(n) => Some(self.datatype.size() * n as usize),
            CellValNum::Var => None,
        }
    }
}

/// One of the three buffers a field can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BufferPart {
    /// Cell values.
    Data,
    /// Byte offsets of variable-length cells.
    Offsets,
    /// Null bytemap.
    Validity,
}

impl BufferPart {
    /// All parts, in binding order.
    pub const ALL: [Self; 3] = [Self::Data, Self::Offsets, Self::Validity];
}

impl fmt::Display for BufferPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Data => "data",
            Self::Offsets => "offsets",
            Self::Validity => "validity",
        })
    }
}

/// Checks a buffer against the declared shape of its field.
pub(crate) fn validate(
    field: &str,
    spec: &FieldSpec,
    part: BufferPart,
    element_size: usize,
    elements: usize,
    query_type: QueryType,
) -> Result<()> {
    match part {
        BufferPart::Data => {
            if element_size != spec.datatype.size() {
                return Err(Error::SchemaMismatch {
                    field: field.to_owned(),
                    expected: format!("{} ({} bytes)", spec.datatype, spec.datatype.size()),
                    actual: format!("{element_size} bytes"),
                });
            }
        }
        BufferPart::Offsets => {
            if !spec.is_var() {
                return Err(Error::usage(format!(
                    "field '{field}' has fixed-length cells and takes no offsets buffer"
                )));
            }
        }
        BufferPart::Validity => {
            if !spec.nullable {
                return Err(Error::usage(format!(
                    "field '{field}' is not nullable and takes no validity buffer"
                )));
            }
        }
    }
    if query_type == QueryType::Read && elements == 0 {
        return Err(Error::usage(format!(
            "empty {part} buffer for field '{field}' on a read query"
        )));
    }
    Ok(())
}

/// A pinned region bound to the engine with its size cell.
pub struct Binding {
    region: Box<dyn Region>,
    size: SizeCell,
}

impl Binding {
    pub(crate) fn new(region: Box<dyn Region>) -> Self {
        let size = SizeCell::new(region.byte_len() as u64);
        Self { region, size }
    }

    /// Capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.region.byte_len()
    }

    /// Bytes currently reported by the size cell, capped at the capacity.
    pub fn filled(&self) -> usize {
        usize::try_from(self.size.get()).map_or(self.capacity(), |n| n.min(self.capacity()))
    }

    /// The reported bytes.
    pub fn filled_bytes(&self) -> &[u8] {
        &self.region.as_bytes()[..self.filled()]
    }

    /// Size of one element.
    pub fn element_size(&self) -> usize {
        self.region.element_size()
    }

    /// Restores the size cell to the full capacity before a read submission.
    pub(crate) fn reset(&self) {
        self.size.set(self.capacity() as u64);
    }

    /// Pointers handed to the engine.
    pub(crate) fn raw_parts(&mut self) -> (*mut c_void, *mut u64) {
        (self.region.as_mut_ptr(), self.size.as_mut_ptr())
    }

    /// A zeroed binding of the same element type with at least `bytes` bytes.
    pub(crate) fn grown(&self, bytes: usize) -> Self {
        Self::new(self.region.grown(bytes))
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("capacity", &self.capacity())
            .field("filled", &self.size.get())
            .finish()
    }
}

/// Buffers bound for one field.
#[derive(Debug)]
pub struct FieldBuffers {
    name: CText,
    spec: FieldSpec,
    data: Option<Binding>,
    offsets: Option<Binding>,
    validity: Option<Binding>,
}

impl FieldBuffers {
    fn new(name: CText, spec: FieldSpec) -> Self {
        Self {
            name,
            spec,
            data: None,
            offsets: None,
            validity: None,
        }
    }

    /// Field name.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub(crate) fn c_name(&self) -> &CText {
        &self.name
    }

    /// Declared shape.
    pub fn spec(&self) -> &FieldSpec {
        &self.spec
    }

    /// The binding of `part`, if any.
    pub fn part(&self, part: BufferPart) -> Option<&Binding> {
        match part {
            BufferPart::Data => self.data.as_ref(),
            BufferPart::Offsets => self.offsets.as_ref(),
            BufferPart::Validity => self.validity.as_ref(),
        }
    }

    fn slot(&mut self, part: BufferPart) -> &mut Option<Binding> {
        match part {
            BufferPart::Data => &mut self.data,
            BufferPart::Offsets => &mut self.offsets,
            BufferPart::Validity => &mut self.validity,
        }
    }

    /// Bound parts with their bindings.
    pub fn bindings(&self) -> impl Iterator<Item = (BufferPart, &Binding)> {
        BufferPart::ALL
            .into_iter()
            .filter_map(move |part| self.part(part).map(|b| (part, b)))
    }

    /// Element counts of the last submission.
    pub fn counts(&self) -> ResultCounts {
        let data_bytes = self.data.as_ref().map_or(0, Binding::filled) as u64;
        ResultCounts {
            data_bytes,
            data_elements: data_bytes / self.spec.datatype.size() as u64,
            offsets: self.offsets.as_ref().map_or(0, |b| b.filled() / 8) as u64,
            validity: self.validity.as_ref().map_or(0, Binding::filled) as u64,
        }
    }

    /// Copies the results of the last submission.
    pub fn snapshot(&self) -> Result<FieldResult> {
        let offsets = match &self.offsets {
            Some(b) => Some(decode::<u64>(b.filled_bytes())?),
            None => None,
        };
        Ok(FieldResult {
            name: self.name().to_owned(),
            spec: self.spec,
            data: self.data.as_ref().map(|b| b.filled_bytes().to_vec()).unwrap_or_default(),
            offsets,
            validity: self.validity.as_ref().map(|b| b.filled_bytes().to_vec()),
        })
    }
}

/// All bindings of one query, keyed by field name.
#[derive(Debug, Default)]
pub struct Registry {
    fields: BTreeMap<String, FieldBuffers>,
    specs: HashMap<String, FieldSpec>,
}

impl Registry {
    /// Buffers of `name`, if any part is bound.
    pub fn field(&self, name: &str) -> Option<&FieldBuffers> {
        self.fields.get(name)
    }

    /// Every bound field, ordered by name.
    pub fn fields(&self) -> impl Iterator<Item = &FieldBuffers> {
        self.fields.values()
    }

    /// Number of bound fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true when nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub(crate) fn cached_spec(&self, name: &str) -> Option<FieldSpec> {
        self.specs.get(name).copied()
    }

    pub(crate) fn cache_spec(&mut self, name: &str, spec: FieldSpec) {
        self.specs.insert(name.to_owned(), spec);
    }

    /// Stores `binding` for `part` of `name`, returning the one it replaces.
    pub(crate) fn install(
        &mut self,
        name: &CText,
        spec: FieldSpec,
        part: BufferPart,
        binding: Binding,
    ) -> Option<Binding> {
        self.fields
            .entry(name.as_str().to_owned())
            .or_insert_with(|| FieldBuffers::new(name.clone(), spec))
            .slot(part)
            .replace(binding)
    }

    pub(crate) fn reset_sizes(&self) {
        for field in self.fields.values() {
            for (_, binding) in field.bindings() {
                binding.reset();
            }
        }
    }

    /// Copies the results of the last submission for every field.
    pub fn snapshot(&self) -> Result<Batch> {
        let mut fields = BTreeMap::new();
        for field in self.fields.values() {
            fields.insert(field.name().to_owned(), field.snapshot()?);
        }
        Ok(Batch { fields })
    }
}

/// Element counts produced for one field by the last submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultCounts {
    /// Data elements.
    pub data_elements: u64,
    /// Data bytes.
    pub data_bytes: u64,
    /// Offsets, one per variable-length cell.
    pub offsets: u64,
    /// Validity bytes, one per cell.
    pub validity: u64,
}

/// Results of one field, copied out of its buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldResult {
    name: String,
    spec: FieldSpec,
    data: Vec<u8>,
    offsets: Option<Vec<u64>>,
    validity: Option<Vec<u8>>,
}

impl FieldResult {
    /// Field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared shape.
    pub fn spec(&self) -> &FieldSpec {
        &self.spec
    }

    /// Number of cells.
    pub fn cell_count(&self) -> usize {
        if let Some(offsets) = &self.offsets {
            return offsets.len();
        }
        if let Some(validity) = &self.validity {
            return validity.len();
        }
        match self.spec.cell_bytes() {
            Some(bytes) if bytes > 0 => self.data.len() / bytes,
            _ => 0,
        }
    }

    /// Returns true when no cell was produced.
    pub fn is_empty(&self) -> bool {
        self.cell_count() == 0
    }

    /// Raw data bytes.
    pub fn data_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Data decoded as `T`; the width of `T` must match the field.
    pub fn data<T: Element>(&self) -> Result<Vec<T>> {
        let size = std::mem::size_of::<T>();
        if size != self.spec.datatype.size() {
            return Err(Error::SchemaMismatch {
                field: self.name.clone(),
                expected: format!("{} ({} bytes)", self.spec.datatype, self.spec.datatype.size()),
                actual: format!("{size} bytes"),
            });
        }
        decode(&self.data)
    }

    /// Byte offsets, for variable-length fields.
    pub fn offsets(&self) -> Option<&[u64]> {
        self.offsets.as_deref()
    }

    /// Validity bytes, for nullable fields.
    pub fn validity(&self) -> Option<&[u8]> {
        self.validity.as_deref()
    }

    /// Whether cell `index` is non-null. Non-nullable fields are never null.
    pub fn is_valid(&self, index: usize) -> bool {
        self.validity
            .as_ref()
            .map_or(true, |v| v.get(index).is_some_and(|b| *b != 0))
    }

    /// Bytes of each cell.
    ///
    /// For variable-length fields cell `i` spans `offsets[i]..offsets[i + 1]`
    /// and the last cell ends at the total data length.
    pub fn cell_bytes(&self) -> Result<Vec<&[u8]>> {
        match &self.offsets {
            Some(offsets) => {
                let total = self.data.len() as u64;
                let mut cells = Vec::with_capacity(offsets.len());
                for (i, &start) in offsets.iter().enumerate() {
                    let end = offsets.get(i + 1).copied().unwrap_or(total);
                    if start > end || end > total {
                        return Err(Error::marshal(format!(
                            "field '{}': offset {start} of cell {i} is out of order or past {total} data bytes",
                            self.name
                        )));
                    }
                    cells.push(&self.data[start as usize..end as usize]);
                }
                Ok(cells)
            }
            None => {
                let width = self.spec.cell_bytes().filter(|w| *w > 0).ok_or_else(|| {
                    Error::usage(format!("field '{}' has no offsets buffer", self.name))
                })?;
                Ok(self.data.chunks_exact(width).collect())
            }
        }
    }

    /// Variable-length cells decoded as `T`.
    pub fn var_cells<T: Element>(&self) -> Result<Vec<Vec<T>>> {
        if std::mem::size_of::<T>() != self.spec.datatype.size() {
            return Err(Error::SchemaMismatch {
                field: self.name.clone(),
                expected: format!("{} ({} bytes)", self.spec.datatype, self.spec.datatype.size()),
                actual: format!("{} bytes", std::mem::size_of::<T>()),
            });
        }
        self.cell_bytes()?.into_iter().map(decode).collect()
    }

    /// Cells decoded as UTF-8 strings.
    pub fn strings(&self) -> Result<Vec<String>> {
        self.cell_bytes()?
            .into_iter()
            .map(|bytes| {
                String::from_utf8(bytes.to_vec())
                    .map_err(|e| Error::marshal(format!("field '{}': {e}", self.name)))
            })
            .collect()
    }

    /// Element counts.
    pub fn counts(&self) -> ResultCounts {
        ResultCounts {
            data_elements: (self.data.len() / self.spec.datatype.size()) as u64,
            data_bytes: self.data.len() as u64,
            offsets: self.offsets.as_ref().map_or(0, Vec::len) as u64,
            validity: self.validity.as_ref().map_or(0, Vec::len) as u64,
        }
    }
}

/// Results of one submission for every bound field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    fields: BTreeMap<String, FieldResult>,
}

impl Batch {
    /// Results of `name`.
    pub fn field(&self, name: &str) -> Option<&FieldResult> {
        self.fields.get(name)
    }

    /// Every field, ordered by name.
    pub fn fields(&self) -> impl Iterator<Item = &FieldResult> {
        self.fields.values()
    }

    /// Largest cell count among the fields.
    pub fn cell_count(&self) -> usize {
        self.fields.values().map(FieldResult::cell_count).max().unwrap_or(0)
    }

    /// Returns true when every field produced zero cells.
    pub fn is_empty(&self) -> bool {
        self.cell_count() == 0
    }

    /// Consumes the batch.
    pub fn into_fields(self) -> BTreeMap<String, FieldResult> {
        self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::as_bytes;
    use crate::marshal::Pinned;

    fn var_spec() -> FieldSpec {
        FieldSpec {
            datatype: Datatype::Int32,
            cell_val_num: CellValNum::Var,
            nullable: false,
        }
    }

    fn result(data: &[i32], offsets: Option<Vec<u64>>, validity: Option<Vec<u8>>, spec: FieldSpec) -> FieldResult {
        FieldResult {
            name: "a1".into(),
            spec,
            data: as_bytes(data).to_vec(),
            offsets,
            validity,
        }
    }

    #[test]
    fn validate_rules() {
        let fixed = FieldSpec {
            datatype: Datatype::Int32,
            cell_val_num: CellValNum::SINGLE,
            nullable: false,
        };
        assert!(validate("a", &fixed, BufferPart::Data, 4, 1, QueryType::Read).is_ok());
        assert!(matches!(
            validate("a", &fixed, BufferPart::Data, 8, 1, QueryType::Read),
            Err(Error::SchemaMismatch { .. })
        ));
        assert!(matches!(
            validate("a", &fixed, BufferPart::Offsets, 8, 1, QueryType::Read),
            Err(Error::Usage { .. })
        ));
        assert!(matches!(
            validate("a", &fixed, BufferPart::Validity, 1, 1, QueryType::Read),
            Err(Error::Usage { .. })
        ));
        assert!(matches!(
            validate("a", &fixed, BufferPart::Data, 4, 0, QueryType::Read),
            Err(Error::Usage { .. })
        ));
        assert!(validate("a", &fixed, BufferPart::Data, 4, 0, QueryType::Write).is_ok());
        assert!(validate("a", &var_spec(), BufferPart::Offsets, 8, 1, QueryType::Read).is_ok());
    }

    #[test]
    fn var_cells_last_cell_runs_to_end() {
        let r = result(&[1, 2, 2, 3, 3, 3], Some(vec![0, 4, 12]), None, var_spec());
        assert_eq!(r.cell_count(), 3);
        assert_eq!(
            r.var_cells::<i32>().unwrap(),
            vec![vec![1], vec![2, 2], vec![3, 3, 3]]
        );
    }

    #[test]
    fn out_of_order_offsets_rejected() {
        let r = result(&[1, 2], Some(vec![4, 0]), None, var_spec());
        assert!(matches!(r.var_cells::<i32>(), Err(Error::Marshal { .. })));
    }

    #[test]
    fn validity_and_counts() {
        let spec = FieldSpec {
            datatype: Datatype::Int32,
            cell_val_num: CellValNum::SINGLE,
            nullable: true,
        };
        let r = result(&[7, 0, 9], None, Some(vec![1, 0, 1]), spec);
        assert_eq!(r.cell_count(), 3);
        assert!(r.is_valid(0));
        assert!(!r.is_valid(1));
        assert_eq!(
            r.counts(),
            ResultCounts {
                data_elements: 3,
                data_bytes: 12,
                offsets: 0,
                validity: 3
            }
        );
        assert!(matches!(r.data::<i64>(), Err(Error::SchemaMismatch { .. })));
    }

    #[test]
    fn strings() {
        let spec = FieldSpec {
            datatype: Datatype::StringUtf8,
            cell_val_num: CellValNum::Var,
            nullable: false,
        };
        let r = FieldResult {
            name: "s".into(),
            spec,
            data: b"abxyz".to_vec(),
            offsets: Some(vec![0, 2]),
            validity: None,
        };
        assert_eq!(r.strings().unwrap(), vec!["ab".to_owned(), "xyz".to_owned()]);
    }

    #[test]
    fn registry_rebinding_replaces_previous() {
        let mut registry = Registry::default();
        let name = CText::ascii("a1").unwrap();
        let spec = var_spec();

        let first = Binding::new(Box::new(Pinned::new(vec![0i32; 2])));
        assert!(registry.install(&name, spec, BufferPart::Data, first).is_none());
        let second = Binding::new(Box::new(Pinned::new(vec![0i32; 4])));
        let previous = registry.install(&name, spec, BufferPart::Data, second).unwrap();
        assert_eq!(previous.capacity(), 8);

        assert_eq!(registry.len(), 1);
        let field = registry.field("a1").unwrap();
        assert_eq!(field.part(BufferPart::Data).unwrap().capacity(), 16);
        assert!(field.part(BufferPart::Offsets).is_none());
    }

    #[test]
    fn reset_restores_capacity() {
        let mut registry = Registry::default();
        let name = CText::ascii("a1").unwrap();
        let mut binding = Binding::new(Box::new(Pinned::new(vec![0u64; 4])));
        let (_, size) = binding.raw_parts();
        unsafe { *size = 8 };
        assert_eq!(binding.filled(), 8);
        registry.install(&name, var_spec(), BufferPart::Offsets, binding);

        registry.reset_sizes();
        let field = registry.field("a1").unwrap();
        assert_eq!(field.part(BufferPart::Offsets).unwrap().filled(), 32);
    }
}
