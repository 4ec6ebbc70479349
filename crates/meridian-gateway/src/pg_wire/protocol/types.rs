//! PostgreSQL type OID and width mappings.
//!
//! Maps the internal columnar type system to PostgreSQL wire protocol type
//! identifiers. The mapping is total: every internal code has a defined
//! output, with TEXT as the universal fallback — it never errors.
//!
//! PostgreSQL OIDs: https://github.com/postgres/postgres/blob/master/src/include/catalog/pg_type.dat

use meridian_common::proto::{ColumnDescriptor, TypeCode};

/// A column as described on the wire: type OID plus fixed width (-1 for
/// variable-length types).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireColumn {
    pub oid: u32,
    pub width: i16,
}

/// Map an internal column descriptor to its wire representation.
///
/// Arrays map through a parallel table keyed by the element type; an array
/// with no (or unknown) element type falls back to the text-array OID.
/// Structured types (struct, map) use the generic text representation.
pub fn map_type(desc: &ColumnDescriptor) -> WireColumn {
    let code = TypeCode::try_from(desc.type_code).unwrap_or(TypeCode::Unspecified);
    match code {
        TypeCode::Array => {
            let element =
                TypeCode::try_from(desc.array_element_type_code).unwrap_or(TypeCode::Unspecified);
            WireColumn {
                oid: array_oid(element),
                width: -1,
            }
        }
        _ => scalar_wire_column(code),
    }
}

fn scalar_wire_column(code: TypeCode) -> WireColumn {
    match code {
        TypeCode::Bool => WireColumn { oid: 16, width: 1 },
        // No native 1-byte integer on the wire; promoted to INT2 like the
        // unsigned small integers below are promoted for value range.
        TypeCode::Int8 => WireColumn { oid: 21, width: 2 },
        TypeCode::Int16 => WireColumn { oid: 21, width: 2 },
        TypeCode::Int32 => WireColumn { oid: 23, width: 4 },
        TypeCode::Int64 => WireColumn { oid: 20, width: 8 },
        TypeCode::Int128 => WireColumn { oid: 1700, width: -1 },
        TypeCode::Uint8 => WireColumn { oid: 21, width: 2 },
        TypeCode::Uint16 => WireColumn { oid: 23, width: 4 },
        TypeCode::Uint32 => WireColumn { oid: 20, width: 8 },
        TypeCode::Uint64 => WireColumn { oid: 1700, width: -1 },
        TypeCode::Uint128 => WireColumn { oid: 1700, width: -1 },
        TypeCode::Float32 => WireColumn { oid: 700, width: 4 },
        TypeCode::Float64 => WireColumn { oid: 701, width: 8 },
        TypeCode::Decimal => WireColumn { oid: 1700, width: -1 },
        TypeCode::Timestamp => WireColumn { oid: 1114, width: 8 },
        TypeCode::Date => WireColumn { oid: 1082, width: 4 },
        TypeCode::Time => WireColumn { oid: 1083, width: 8 },
        TypeCode::Interval => WireColumn { oid: 1186, width: 16 },
        TypeCode::String => WireColumn { oid: 25, width: -1 },
        TypeCode::Bytes => WireColumn { oid: 17, width: -1 },
        TypeCode::Json => WireColumn { oid: 114, width: -1 },
        TypeCode::Uuid => WireColumn { oid: 2950, width: 16 },
        // Structured types have no wire equivalent; rendered as text.
        TypeCode::Struct | TypeCode::Map => WireColumn { oid: 25, width: -1 },
        // Bare ARRAY without the descriptor path (handled in map_type).
        TypeCode::Array => WireColumn { oid: 1009, width: -1 },
        TypeCode::Unspecified => WireColumn { oid: 25, width: -1 },
    }
}

/// Array OID for a given element type. Unknown elements fall back to the
/// text-array OID.
fn array_oid(element: TypeCode) -> u32 {
    match element {
        TypeCode::Bool => 1000,
        TypeCode::Int8 | TypeCode::Int16 | TypeCode::Uint8 => 1005,
        TypeCode::Int32 | TypeCode::Uint16 => 1007,
        TypeCode::Int64 | TypeCode::Uint32 => 1016,
        TypeCode::Int128 | TypeCode::Uint64 | TypeCode::Uint128 | TypeCode::Decimal => 1231,
        TypeCode::Float32 => 1021,
        TypeCode::Float64 => 1022,
        TypeCode::Timestamp => 1115,
        TypeCode::Date => 1182,
        TypeCode::Time => 1183,
        TypeCode::Bytes => 1001,
        TypeCode::Json => 199,
        TypeCode::Uuid => 2951,
        _ => 1009,
    }
}

/// PostgreSQL type name for catalog introspection answers
/// (information_schema.columns and friends).
pub fn pg_type_name(code: TypeCode) -> &'static str {
    match code {
        TypeCode::Bool => "boolean",
        TypeCode::Int8 | TypeCode::Int16 | TypeCode::Uint8 => "smallint",
        TypeCode::Int32 | TypeCode::Uint16 => "integer",
        TypeCode::Int64 | TypeCode::Uint32 => "bigint",
        TypeCode::Int128 | TypeCode::Uint64 | TypeCode::Uint128 | TypeCode::Decimal => "numeric",
        TypeCode::Float32 => "real",
        TypeCode::Float64 => "double precision",
        TypeCode::Timestamp => "timestamp without time zone",
        TypeCode::Date => "date",
        TypeCode::Time => "time without time zone",
        TypeCode::Interval => "interval",
        TypeCode::Bytes => "bytea",
        TypeCode::Json => "json",
        TypeCode::Uuid => "uuid",
        TypeCode::Array => "ARRAY",
        _ => "text",
    }
}
