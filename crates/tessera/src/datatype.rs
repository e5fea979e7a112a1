//! Cell datatypes and the Rust element types that match them.

use crate::error::{Error, Result};
use crate::types::raw_enum;
use std::fmt;
use tessera_sys as sys;

raw_enum! {
    /// Datatype of a dimension or attribute.
    Datatype {
        /// `i32`
        Int32 = sys::TESSERA_INT32 => "INT32",
        /// `i64`
        Int64 = sys::TESSERA_INT64 => "INT64",
        /// `f32`
        Float32 = sys::TESSERA_FLOAT32 => "FLOAT32",
        /// `f64`
        Float64 = sys::TESSERA_FLOAT64 => "FLOAT64",
        /// Single byte character.
        Char = sys::TESSERA_CHAR => "CHAR",
        /// `i8`
        Int8 = sys::TESSERA_INT8 => "INT8",
        /// `u8`
        UInt8 = sys::TESSERA_UINT8 => "UINT8",
        /// `i16`
        Int16 = sys::TESSERA_INT16 => "INT16",
        /// `u16`
        UInt16 = sys::TESSERA_UINT16 => "UINT16",
        /// `u32`
        UInt32 = sys::TESSERA_UINT32 => "UINT32",
        /// `u64`
        UInt64 = sys::TESSERA_UINT64 => "UINT64",
        /// ASCII string bytes.
        StringAscii = sys::TESSERA_STRING_ASCII => "STRING_ASCII",
        /// UTF-8 string bytes.
        StringUtf8 = sys::TESSERA_STRING_UTF8 => "STRING_UTF8",
        /// Opaque bytes.
        Blob = sys::TESSERA_BLOB => "BLOB",
        /// Boolean stored as one byte.
        Bool = sys::TESSERA_BOOL => "BOOL",
    }
}

impl Datatype {
    /// Size of one element in bytes.
    pub const fn size(self) -> usize {
        match self {
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int16 | Self::UInt16 => 2,
            Self::Char
            | Self::Int8
            | Self::UInt8
            | Self::StringAscii
            | Self::StringUtf8
            | Self::Blob
            | Self::Bool => 1,
        }
    }

    /// Returns true for the string datatypes.
    pub const fn is_string(self) -> bool {
        matches!(self, Self::Char | Self::StringAscii | Self::StringUtf8)
    }
}

/// A plain numeric type that can live in a native buffer.
///
/// Implemented for the primitive integers and floats. Every bit pattern of
/// an implementor is a valid value, so buffers filled by the engine can be
/// read back without validation.
pub trait Element: Copy + Default + PartialOrd + fmt::Debug + Send + Sync + 'static {
    /// Datatype with the same layout.
    const DATATYPE: Datatype;
}

macro_rules! element {
    ($($ty:ty => $dt:ident),* $(,)?) => {
        $(impl Element for $ty {
            const DATATYPE: Datatype = Datatype::$dt;
        })*
    };
}

element! {
    i8 => Int8,
    u8 => UInt8,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
}

/// Decodes a native-order byte slice into elements.
///
/// The slice does not need to be aligned for `T`.
pub fn decode<T: Element>(bytes: &[u8]) -> Result<Vec<T>> {
    let size = std::mem::size_of::<T>();
    if bytes.len() % size != 0 {
        return Err(Error::marshal(format!(
            "{} bytes is not a whole number of {}-byte elements",
            bytes.len(),
            size
        )));
    }
    Ok(bytes
        .chunks_exact(size)
        // SAFETY: each chunk holds exactly size_of::<T>() bytes and every bit
        // pattern is a valid T.
        .map(|chunk| unsafe { std::ptr::read_unaligned(chunk.as_ptr().cast::<T>()) })
        .collect())
}

/// Views elements as their native-order bytes.
pub fn as_bytes<T: Element>(values: &[T]) -> &[u8] {
    // SAFETY: T is a plain numeric type without padding.
    unsafe { std::slice::from_raw_parts(values.as_ptr().cast::<u8>(), std::mem::size_of_val(values)) }
}

/// Number of values per cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellValNum {
    /// Every cell holds this many values.
    Fixed(u32),
    /// Cells have variable length and need an offsets buffer.
    Var,
}

impl CellValNum {
    /// Single value per cell.
    pub const SINGLE: Self = Self::Fixed(1);

    /// Converts from the engine's representation.
    pub const fn from_raw(raw: u32) -> Self {
        if raw == sys::TESSERA_VAR_NUM {
            Self::Var
        } else {
            Self::Fixed(raw)
        }
    }

    /// Converts to the engine's representation.
    pub const fn to_raw(self) -> u32 {
        match self {
            Self::Fixed(n) => n,
            Self::Var => sys::TESSERA_VAR_NUM,
        }
    }

    /// Returns true for variable-length cells.
    pub const fn is_var(self) -> bool {
        matches!(self, Self::Var)
    }
}

impl fmt::Display for CellValNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(n) => write!(f, "{n}"),
            Self::Var => f.write_str("var"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_sizes_match_datatypes() {
        fn check<T: Element>() {
            assert_eq!(std::mem::size_of::<T>(), T::DATATYPE.size());
        }
        check::<i8>();
        check::<u16>();
        check::<i32>();
        check::<u64>();
        check::<f32>();
        check::<f64>();
    }

    #[test]
    fn decode_unaligned() {
        let mut bytes = vec![0xAAu8];
        bytes.extend_from_slice(as_bytes(&[1i32, -2, 3]));
        let values = decode::<i32>(&bytes[1..]).unwrap();
        assert_eq!(values, vec![1, -2, 3]);
    }

    #[test]
    fn decode_rejects_partial_element() {
        assert!(decode::<u64>(&[0u8; 12]).is_err());
    }

    #[test]
    fn cell_val_num_raw() {
        assert_eq!(CellValNum::from_raw(u32::MAX), CellValNum::Var);
        assert_eq!(CellValNum::from_raw(3), CellValNum::Fixed(3));
        assert_eq!(CellValNum::Var.to_raw(), sys::TESSERA_VAR_NUM);
        assert_eq!(CellValNum::Var.to_string(), "var");
    }

    #[test]
    fn string_types() {
        assert!(Datatype::StringUtf8.is_string());
        assert!(!Datatype::Blob.is_string());
        assert_eq!(Datatype::StringAscii.size(), 1);
    }
}
