//! Schema objects and value decoding.

use crate::error::{SimError, SimResult};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ffi::CString;
use tessera_sys::*;

/// Settings of a config or context.
pub(crate) type Settings = BTreeMap<String, CString>;

#[derive(Debug, Clone, Default)]
pub(crate) struct ConfigObj {
    pub(crate) settings: Settings,
}

#[derive(Debug)]
pub(crate) struct ErrorObj {
    pub(crate) message: CString,
}

#[derive(Debug)]
pub(crate) struct ContextObj {
    pub(crate) settings: Settings,
    pub(crate) last_error: Option<String>,
}

impl ContextObj {
    pub(crate) fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(|v| v.to_str().ok())
    }
}

/// Size in bytes of one element of `datatype`.
pub(crate) fn datatype_size(datatype: u32) -> SimResult<usize> {
    Ok(match datatype {
        TESSERA_INT64 | TESSERA_UINT64 | TESSERA_FLOAT64 => 8,
        TESSERA_INT32 | TESSERA_UINT32 | TESSERA_FLOAT32 => 4,
        TESSERA_INT16 | TESSERA_UINT16 => 2,
        TESSERA_CHAR | TESSERA_INT8 | TESSERA_UINT8 | TESSERA_STRING_ASCII | TESSERA_STRING_UTF8
        | TESSERA_BLOB | TESSERA_BOOL => 1,
        other => return Err(SimError::invalid(format!("unknown datatype {other}"))),
    })
}

pub(crate) fn is_string(datatype: u32) -> bool {
    matches!(datatype, TESSERA_CHAR | TESSERA_STRING_ASCII | TESSERA_STRING_UTF8)
}

/// A decoded value, ordered the way the engine compares cells.
#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub(crate) enum Scalar {
    Int(i128),
    Float(f64),
    Bytes(Vec<u8>),
}

impl Scalar {
    pub(crate) fn decode(datatype: u32, bytes: &[u8]) -> Self {
        macro_rules! num {
            ($ty:ty, $variant:ident, $conv:ty) => {
                match <[u8; std::mem::size_of::<$ty>()]>::try_from(bytes) {
                    Ok(raw) => Scalar::$variant(<$ty>::from_ne_bytes(raw) as $conv),
                    Err(_) => Scalar::Bytes(bytes.to_vec()),
                }
            };
        }
        match datatype {
            TESSERA_INT8 => num!(i8, Int, i128),
            TESSERA_UINT8 | TESSERA_BOOL => num!(u8, Int, i128),
            TESSERA_INT16 => num!(i16, Int, i128),
            TESSERA_UINT16 => num!(u16, Int, i128),
            TESSERA_INT32 => num!(i32, Int, i128),
            TESSERA_UINT32 => num!(u32, Int, i128),
            TESSERA_INT64 => num!(i64, Int, i128),
            TESSERA_UINT64 => num!(u64, Int, i128),
            TESSERA_FLOAT32 => num!(f32, Float, f64),
            TESSERA_FLOAT64 => num!(f64, Float, f64),
            _ => Scalar::Bytes(bytes.to_vec()),
        }
    }

    pub(crate) fn order(&self, other: &Self) -> Ordering {
        self.partial_cmp(other).unwrap_or(Ordering::Equal)
    }
}

/// Shape of a field as the engine sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FieldShape {
    pub(crate) datatype: u32,
    pub(crate) cell_val_num: u32,
    pub(crate) nullable: bool,
}

impl FieldShape {
    pub(crate) fn is_var(&self) -> bool {
        self.cell_val_num == TESSERA_VAR_NUM
    }

    /// Bytes per cell of a fixed-length field.
    pub(crate) fn cell_bytes(&self) -> Option<usize> {
        if self.is_var() {
            return None;
        }
        datatype_size(self.datatype)
            .ok()
            .map(|size| size * self.cell_val_num as usize)
    }
}

fn c_name(name: &str) -> SimResult<CString> {
    CString::new(name).map_err(|_| SimError::invalid(format!("name '{}' contains a NUL byte", name.escape_debug())))
}

fn as_str(name: &CString) -> &str {
    name.to_str().unwrap_or_default()
}

#[derive(Debug, Clone)]
pub(crate) struct AttributeDef {
    pub(crate) name: CString,
    pub(crate) datatype: u32,
    pub(crate) cell_val_num: u32,
    pub(crate) nullable: bool,
    pub(crate) filters: Vec<FilterDef>,
    pub(crate) enumeration: Option<String>,
}

impl AttributeDef {
    pub(crate) fn new(name: &str, datatype: u32) -> SimResult<Self> {
        datatype_size(datatype)?;
        Ok(Self {
            name: c_name(name)?,
            datatype,
            cell_val_num: 1,
            nullable: false,
            filters: Vec::new(),
            enumeration: None,
        })
    }

    pub(crate) fn name(&self) -> &str {
        as_str(&self.name)
    }

    pub(crate) fn set_cell_val_num(&mut self, num: u32) -> SimResult<()> {
        if num == 0 {
            return Err(SimError::invalid(format!(
                "attribute '{}': cell_val_num must be at least 1",
                self.name()
            )));
        }
        self.cell_val_num = num;
        Ok(())
    }

    pub(crate) fn shape(&self) -> FieldShape {
        FieldShape {
            datatype: self.datatype,
            cell_val_num: self.cell_val_num,
            nullable: self.nullable,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct DimensionDef {
    pub(crate) name: CString,
    pub(crate) datatype: u32,
    pub(crate) cell_val_num: u32,
    /// Inclusive bounds; `None` for string dimensions.
    pub(crate) bounds: Option<(Vec<u8>, Vec<u8>)>,
}

impl DimensionDef {
    pub(crate) fn new(name: &str, datatype: u32, bounds: Option<(Vec<u8>, Vec<u8>)>) -> SimResult<Self> {
        datatype_size(datatype)?;
        match &bounds {
            None if !is_string(datatype) => {
                return Err(SimError::invalid(format!(
                    "dimension '{name}' needs a domain and a tile extent"
                )))
            }
            Some(_) if is_string(datatype) => {
                return Err(SimError::invalid(format!(
                    "string dimension '{name}' takes no domain or tile extent"
                )))
            }
            Some((lo, hi)) => {
                if Scalar::decode(datatype, lo).order(&Scalar::decode(datatype, hi)) == Ordering::Greater {
                    return Err(SimError::invalid(format!(
                        "dimension '{name}' has its lower bound above its upper bound"
                    )));
                }
            }
            None => {}
        }
        Ok(Self {
            name: c_name(name)?,
            datatype,
            cell_val_num: 1,
            bounds,
        })
    }

    pub(crate) fn name(&self) -> &str {
        as_str(&self.name)
    }

    pub(crate) fn set_cell_val_num(&mut self, num: u32) -> SimResult<()> {
        let valid = if is_string(self.datatype) {
            num == TESSERA_VAR_NUM || num == 1
        } else {
            num == 1
        };
        if !valid {
            return Err(SimError::invalid(format!(
                "dimension '{}' does not accept cell_val_num {num}",
                self.name()
            )));
        }
        self.cell_val_num = num;
        Ok(())
    }

    pub(crate) fn shape(&self) -> FieldShape {
        FieldShape {
            datatype: self.datatype,
            cell_val_num: self.cell_val_num,
            nullable: false,
        }
    }

    /// Returns true if `coord` lies within the bounds.
    pub(crate) fn contains(&self, coord: &[u8]) -> bool {
        match &self.bounds {
            Some((lo, hi)) => {
                let value = Scalar::decode(self.datatype, coord);
                value.order(&Scalar::decode(self.datatype, lo)) != Ordering::Less
                    && value.order(&Scalar::decode(self.datatype, hi)) != Ordering::Greater
            }
            None => true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct DomainDef {
    pub(crate) dims: Vec<DimensionDef>,
}

impl DomainDef {
    pub(crate) fn add(&mut self, dim: DimensionDef) -> SimResult<()> {
        if self.dims.iter().any(|d| d.name == dim.name) {
            return Err(SimError::invalid(format!(
                "domain already has a dimension named '{}'",
                dim.name()
            )));
        }
        self.dims.push(dim);
        Ok(())
    }

    pub(crate) fn dimension(&self, name: &str) -> SimResult<&DimensionDef> {
        self.dims
            .iter()
            .find(|d| d.name() == name)
            .ok_or_else(|| SimError::invalid(format!("domain has no dimension named '{name}'")))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FilterDef {
    pub(crate) filter_type: u32,
    pub(crate) options: BTreeMap<u32, i64>,
}

impl FilterDef {
    pub(crate) fn new(filter_type: u32) -> SimResult<Self> {
        if filter_type > TESSERA_FILTER_CHECKSUM_MD5 {
            return Err(SimError::invalid(format!("unknown filter type {filter_type}")));
        }
        Ok(Self {
            filter_type,
            options: BTreeMap::new(),
        })
    }

    /// Checks that this filter takes `option`.
    pub(crate) fn accepts(&self, option: u32) -> SimResult<()> {
        let ok = match option {
            TESSERA_COMPRESSION_LEVEL => matches!(
                self.filter_type,
                TESSERA_FILTER_GZIP | TESSERA_FILTER_ZSTD | TESSERA_FILTER_LZ4
            ),
            TESSERA_BIT_WIDTH_MAX_WINDOW => self.filter_type == TESSERA_FILTER_BIT_WIDTH_REDUCTION,
            other => return Err(SimError::invalid(format!("unknown filter option {other}"))),
        };
        if ok {
            Ok(())
        } else {
            Err(SimError::invalid(format!(
                "filter type {} does not take option {option}",
                self.filter_type
            )))
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FilterListDef {
    pub(crate) filters: Vec<FilterDef>,
}

#[derive(Debug, Clone)]
pub(crate) struct EnumerationDef {
    pub(crate) name: CString,
    pub(crate) datatype: u32,
    pub(crate) cell_val_num: u32,
    pub(crate) ordered: bool,
    pub(crate) values: Vec<Vec<u8>>,
}

impl EnumerationDef {
    /// Splits `data` into values, by `offsets` for variable-length values
    /// or by the fixed value width otherwise.
    pub(crate) fn new(
        name: &str,
        datatype: u32,
        cell_val_num: u32,
        ordered: bool,
        data: &[u8],
        offsets: Option<&[u64]>,
    ) -> SimResult<Self> {
        let width = datatype_size(datatype)?;
        if cell_val_num == 0 {
            return Err(SimError::invalid(format!("enumeration '{name}': cell_val_num must be at least 1")));
        }
        let values = if cell_val_num == TESSERA_VAR_NUM {
            let offsets = offsets.ok_or_else(|| {
                SimError::invalid(format!("enumeration '{name}' has variable-length values and needs offsets"))
            })?;
            let mut values = Vec::with_capacity(offsets.len());
            for (i, &start) in offsets.iter().enumerate() {
                let end = offsets.get(i + 1).copied().unwrap_or(data.len() as u64);
                if start > end || end > data.len() as u64 {
                    return Err(SimError::invalid(format!("enumeration '{name}': offset {i} is out of range")));
                }
                values.push(data[start as usize..end as usize].to_vec());
            }
            values
        } else {
            let value_bytes = width * cell_val_num as usize;
            if data.len() % value_bytes != 0 {
                return Err(SimError::invalid(format!(
                    "enumeration '{name}': {} bytes is not a whole number of values",
                    data.len()
                )));
            }
            data.chunks_exact(value_bytes).map(<[u8]>::to_vec).collect()
        };
        Ok(Self {
            name: c_name(name)?,
            datatype,
            cell_val_num,
            ordered,
            values,
        })
    }

    pub(crate) fn name(&self) -> &str {
        as_str(&self.name)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SchemaDef {
    pub(crate) array_type: u32,
    pub(crate) domain: Option<DomainDef>,
    pub(crate) attributes: Vec<AttributeDef>,
    pub(crate) enumerations: Vec<EnumerationDef>,
    pub(crate) capacity: Option<u64>,
}

impl SchemaDef {
    pub(crate) fn new(array_type: u32) -> SimResult<Self> {
        if array_type != TESSERA_DENSE && array_type != TESSERA_SPARSE {
            return Err(SimError::invalid(format!("unknown array type {array_type}")));
        }
        Ok(Self {
            array_type,
            domain: None,
            attributes: Vec::new(),
            enumerations: Vec::new(),
            capacity: None,
        })
    }

    pub(crate) fn add_attribute(&mut self, attr: AttributeDef) -> SimResult<()> {
        if self.attribute(attr.name()).is_some() {
            return Err(SimError::invalid(format!(
                "schema already has an attribute named '{}'",
                attr.name()
            )));
        }
        self.attributes.push(attr);
        Ok(())
    }

    pub(crate) fn add_enumeration(&mut self, enumeration: EnumerationDef) -> SimResult<()> {
        if self.enumerations.iter().any(|e| e.name == enumeration.name) {
            return Err(SimError::invalid(format!(
                "schema already has an enumeration named '{}'",
                enumeration.name()
            )));
        }
        self.enumerations.push(enumeration);
        Ok(())
    }

    pub(crate) fn set_capacity(&mut self, capacity: u64) -> SimResult<()> {
        if capacity == 0 {
            return Err(SimError::invalid("schema capacity must be at least 1"));
        }
        self.capacity = Some(capacity);
        Ok(())
    }

    pub(crate) fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name() == name)
    }

    pub(crate) fn dims(&self) -> &[DimensionDef] {
        self.domain.as_ref().map_or(&[], |d| d.dims.as_slice())
    }

    /// Shape of the dimension or attribute called `name`.
    pub(crate) fn field(&self, name: &str) -> Option<FieldShape> {
        self.dims()
            .iter()
            .find(|d| d.name() == name)
            .map(DimensionDef::shape)
            .or_else(|| self.attribute(name).map(AttributeDef::shape))
    }

    /// Every field, dimensions first.
    pub(crate) fn fields(&self) -> Vec<(String, FieldShape)> {
        self.dims()
            .iter()
            .map(|d| (d.name().to_owned(), d.shape()))
            .chain(self.attributes.iter().map(|a| (a.name().to_owned(), a.shape())))
            .collect()
    }

    pub(crate) fn check(&self) -> SimResult<()> {
        let dims = self.dims();
        if dims.is_empty() {
            return Err(SimError::invalid("schema has no domain or a domain without dimensions"));
        }
        if let Some(attr) = self.attributes.iter().find(|a| dims.iter().any(|d| d.name == a.name)) {
            return Err(SimError::invalid(format!(
                "attribute '{}' has the same name as a dimension",
                attr.name()
            )));
        }
        for attr in &self.attributes {
            if let Some(name) = &attr.enumeration {
                if !self.enumerations.iter().any(|e| e.name() == name) {
                    return Err(SimError::invalid(format!(
                        "attribute '{}' refers to missing enumeration '{name}'",
                        attr.name()
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct EvolutionDef {
    pub(crate) add: Vec<AttributeDef>,
    pub(crate) drop: Vec<String>,
}

impl EvolutionDef {
    /// Applies drops, then additions.
    pub(crate) fn apply(&self, schema: &mut SchemaDef) -> SimResult<()> {
        for name in &self.drop {
            let before = schema.attributes.len();
            schema.attributes.retain(|a| a.name() != name);
            if schema.attributes.len() == before {
                return Err(SimError::invalid(format!("cannot drop missing attribute '{name}'")));
            }
        }
        for attr in &self.add {
            schema.add_attribute(attr.clone())?;
        }
        schema.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_dim(name: &str, lo: i32, hi: i32) -> DimensionDef {
        DimensionDef::new(name, TESSERA_INT32, Some((lo.to_ne_bytes().to_vec(), hi.to_ne_bytes().to_vec()))).unwrap()
    }

    #[test]
    fn scalar_ordering() {
        let a = Scalar::decode(TESSERA_INT32, &(-5i32).to_ne_bytes());
        let b = Scalar::decode(TESSERA_INT32, &3i32.to_ne_bytes());
        assert_eq!(a.order(&b), Ordering::Less);
        let s = Scalar::decode(TESSERA_STRING_ASCII, b"abc");
        assert_eq!(s, Scalar::Bytes(b"abc".to_vec()));
    }

    #[test]
    fn dimension_rules() {
        assert!(DimensionDef::new("d", TESSERA_INT32, None).is_err());
        assert!(DimensionDef::new("s", TESSERA_STRING_ASCII, None).is_ok());
        let dim = int_dim("rows", 1, 10);
        assert!(dim.contains(&5i32.to_ne_bytes()));
        assert!(!dim.contains(&11i32.to_ne_bytes()));
        assert!(DimensionDef::new("d", TESSERA_INT32, Some((9i32.to_ne_bytes().to_vec(), 1i32.to_ne_bytes().to_vec())))
            .is_err());
    }

    #[test]
    fn schema_check() {
        let mut schema = SchemaDef::new(TESSERA_SPARSE).unwrap();
        assert!(schema.check().is_err());
        let mut domain = DomainDef::default();
        domain.add(int_dim("rows", 1, 10)).unwrap();
        assert!(domain.add(int_dim("rows", 1, 10)).is_err());
        schema.domain = Some(domain);
        schema.add_attribute(AttributeDef::new("a", TESSERA_INT32).unwrap()).unwrap();
        assert!(schema.add_attribute(AttributeDef::new("a", TESSERA_INT64).unwrap()).is_err());
        schema.check().unwrap();
        assert_eq!(schema.fields().len(), 2);
        assert_eq!(schema.field("rows").unwrap().cell_bytes(), Some(4));
    }

    #[test]
    fn evolution() {
        let mut schema = SchemaDef::new(TESSERA_SPARSE).unwrap();
        let mut domain = DomainDef::default();
        domain.add(int_dim("rows", 1, 10)).unwrap();
        schema.domain = Some(domain);
        schema.add_attribute(AttributeDef::new("a", TESSERA_INT32).unwrap()).unwrap();

        let evolution = EvolutionDef {
            add: vec![AttributeDef::new("b", TESSERA_FLOAT64).unwrap()],
            drop: vec!["a".into()],
        };
        evolution.apply(&mut schema).unwrap();
        assert!(schema.attribute("a").is_none());
        assert!(schema.attribute("b").is_some());

        let missing = EvolutionDef {
            add: Vec::new(),
            drop: vec!["zzz".into()],
        };
        assert!(missing.apply(&mut schema).is_err());
    }

    #[test]
    fn enumeration_values() {
        let e = EnumerationDef::new("c", TESSERA_STRING_UTF8, TESSERA_VAR_NUM, false, b"redblue", Some(&[0, 3])).unwrap();
        assert_eq!(e.values, vec![b"red".to_vec(), b"blue".to_vec()]);
        assert!(EnumerationDef::new("c", TESSERA_STRING_UTF8, TESSERA_VAR_NUM, false, b"ab", None).is_err());
        let fixed = EnumerationDef::new("l", TESSERA_INT32, 1, true, &[0u8; 12], None).unwrap();
        assert_eq!(fixed.values.len(), 3);
    }
}
