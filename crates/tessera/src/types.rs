//! Enumerations crossing the native boundary.

use crate::error::{Error, Result};
use std::fmt;
use tessera_sys as sys;

macro_rules! raw_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($(#[$vmeta:meta])* $variant:ident = $raw:path => $label:literal,)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant,)*
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),*];

            /// Raw value passed to the engine.
            pub const fn to_raw(self) -> u32 {
                match self {
                    $(Self::$variant => $raw,)*
                }
            }
        }

        impl TryFrom<u32> for $name {
            type Error = Error;

            fn try_from(raw: u32) -> Result<Self> {
                match raw {
                    $($raw => Ok(Self::$variant),)*
                    other => Err(Error::marshal(format!(
                        concat!("unknown ", stringify!($name), " value {}"),
                        other
                    ))),
                }
            }
        }

        impl From<$name> for u32 {
            fn from(value: $name) -> u32 {
                value.to_raw()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(match self {
                    $(Self::$variant => $label,)*
                })
            }
        }
    };
}

pub(crate) use raw_enum;

raw_enum! {
    /// Direction of a query, also used when opening arrays and groups.
    QueryType {
        /// Read.
        Read = sys::TESSERA_READ => "read",
        /// Write.
        Write = sys::TESSERA_WRITE => "write",
    }
}

raw_enum! {
    /// Status of a query.
    QueryStatus {
        /// The engine gave up on the query.
        Failed = sys::TESSERA_FAILED => "failed",
        /// All results were delivered.
        Completed = sys::TESSERA_COMPLETED => "completed",
        /// Submitted and still running.
        InProgress = sys::TESSERA_INPROGRESS => "in progress",
        /// Some results remain; resubmit to continue.
        Incomplete = sys::TESSERA_INCOMPLETE => "incomplete",
        /// Never submitted.
        Uninitialized = sys::TESSERA_UNINITIALIZED => "uninitialized",
    }
}

impl QueryStatus {
    /// Returns true for `Completed` and `Failed`.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

raw_enum! {
    /// Why a query stopped before completing.
    IncompleteReason {
        /// Not incomplete.
        None = sys::TESSERA_REASON_NONE => "none",
        /// The bound buffers are too small for the next cell.
        UserBufferSize = sys::TESSERA_REASON_USER_BUFFER_SIZE => "user buffer size",
        /// The engine ran into its own memory budget.
        MemoryBudget = sys::TESSERA_REASON_MEMORY_BUDGET => "memory budget",
    }
}

raw_enum! {
    /// Cell order of a query.
    Layout {
        /// Row-major.
        RowMajor = sys::TESSERA_ROW_MAJOR => "row-major",
        /// Column-major.
        ColMajor = sys::TESSERA_COL_MAJOR => "col-major",
        /// Storage order.
        GlobalOrder = sys::TESSERA_GLOBAL_ORDER => "global-order",
        /// No particular order.
        Unordered = sys::TESSERA_UNORDERED => "unordered",
    }
}

raw_enum! {
    /// Array kind.
    ArrayType {
        /// Every cell of the domain exists.
        Dense = sys::TESSERA_DENSE => "dense",
        /// Only written cells exist.
        Sparse = sys::TESSERA_SPARSE => "sparse",
    }
}

raw_enum! {
    /// Filter kind.
    FilterType {
        /// Pass-through.
        None = sys::TESSERA_FILTER_NONE => "none",
        /// Gzip compression.
        Gzip = sys::TESSERA_FILTER_GZIP => "gzip",
        /// Zstandard compression.
        Zstd = sys::TESSERA_FILTER_ZSTD => "zstd",
        /// LZ4 compression.
        Lz4 = sys::TESSERA_FILTER_LZ4 => "lz4",
        /// Bit width reduction.
        BitWidthReduction = sys::TESSERA_FILTER_BIT_WIDTH_REDUCTION => "bit width reduction",
        /// Double delta encoding.
        DoubleDelta = sys::TESSERA_FILTER_DOUBLE_DELTA => "double delta",
        /// MD5 checksum.
        ChecksumMd5 = sys::TESSERA_FILTER_CHECKSUM_MD5 => "md5 checksum",
    }
}

raw_enum! {
    /// Filter option.
    FilterOption {
        /// Compression level (`i32`).
        CompressionLevel = sys::TESSERA_COMPRESSION_LEVEL => "compression level",
        /// Maximum window of bit width reduction (`u32`).
        BitWidthMaxWindow = sys::TESSERA_BIT_WIDTH_MAX_WINDOW => "bit width max window",
    }
}

raw_enum! {
    /// Open mode of a VFS file.
    VfsMode {
        /// Read.
        Read = sys::TESSERA_VFS_READ => "read",
        /// Truncate and write.
        Write = sys::TESSERA_VFS_WRITE => "write",
        /// Append.
        Append = sys::TESSERA_VFS_APPEND => "append",
    }
}

raw_enum! {
    /// Comparison of a query condition.
    ConditionOp {
        /// `<`
        Lt = sys::TESSERA_LT => "<",
        /// `<=`
        Le = sys::TESSERA_LE => "<=",
        /// `>`
        Gt = sys::TESSERA_GT => ">",
        /// `>=`
        Ge = sys::TESSERA_GE => ">=",
        /// `==`
        Eq = sys::TESSERA_EQ => "==",
        /// `!=`
        Ne = sys::TESSERA_NE => "!=",
    }
}

raw_enum! {
    /// Combination of two query conditions.
    CombinationOp {
        /// Both hold.
        And = sys::TESSERA_AND => "and",
        /// Either holds.
        Or = sys::TESSERA_OR => "or",
        /// Negation.
        Not = sys::TESSERA_NOT => "not",
    }
}

raw_enum! {
    /// Aggregate computed on a query channel.
    AggregateOp {
        /// Number of cells.
        Count = sys::TESSERA_AGGREGATE_COUNT => "count",
        /// Sum of a numeric field.
        Sum = sys::TESSERA_AGGREGATE_SUM => "sum",
        /// Minimum of a numeric field.
        Min = sys::TESSERA_AGGREGATE_MIN => "min",
        /// Maximum of a numeric field.
        Max = sys::TESSERA_AGGREGATE_MAX => "max",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_values_round_trip() {
        for status in QueryStatus::ALL {
            assert_eq!(QueryStatus::try_from(status.to_raw()).unwrap(), *status);
        }
        for op in AggregateOp::ALL {
            assert_eq!(AggregateOp::try_from(u32::from(*op)).unwrap(), *op);
        }
    }

    #[test]
    fn unknown_value_is_marshal_error() {
        let err = QueryStatus::try_from(99).unwrap_err();
        assert!(matches!(err, Error::Marshal { .. }));
        assert!(err.to_string().contains("QueryStatus"));
    }

    #[test]
    fn terminal_statuses() {
        assert!(QueryStatus::Completed.is_terminal());
        assert!(QueryStatus::Failed.is_terminal());
        assert!(!QueryStatus::Incomplete.is_terminal());
        assert!(!QueryStatus::Uninitialized.is_terminal());
    }

    #[test]
    fn reason_display() {
        assert_eq!(IncompleteReason::UserBufferSize.to_string(), "user buffer size");
    }
}
