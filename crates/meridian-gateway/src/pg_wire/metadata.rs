//! Catalog introspection dialect for the PostgreSQL bridge.
//!
//! Metadata queries are answered from the tenant's registered catalog
//! snapshot with fully materialized row sets — no SQL engine is involved.
//! The dialect is deliberately narrow: the catalog tables SQL clients
//! actually probe, SHOW variables, and a handful of no-FROM expressions.
//! WHERE filters are not evaluated; answers are conservative full sets.

use meridian_common::proto::{ColumnDescriptor, TypeCode};
use meridian_common::{GatewayError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::runtime::{CatalogSnapshot, CellValue};

use super::protocol::types::pg_type_name;

/// Version banner reported for `SELECT version()`.
pub const VERSION_BANNER: &str =
    "PostgreSQL 16.3 (Meridian) on x86_64-unknown-linux-gnu, 64-bit";

static SHOW_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)^SHOW\s+(.+)$").unwrap());
static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(pg_catalog\.)?version\(\)").unwrap());
static SELECT_INT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^SELECT\s+(\d+)$").unwrap());
static CURRENT_SCHEMA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)current_schema(\(\))?").unwrap());
static CURRENT_DATABASE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)current_database\(\)").unwrap());

/// A fully materialized metadata result.
#[derive(Debug, Clone)]
pub struct MetadataResult {
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Vec<CellValue>>,
}

impl MetadataResult {
    fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    fn single_text(column: &str, value: String) -> Self {
        Self {
            columns: vec![text_col(column)],
            rows: vec![vec![CellValue::String(value)]],
        }
    }
}

fn text_col(name: &str) -> ColumnDescriptor {
    ColumnDescriptor {
        name: name.to_string(),
        type_code: TypeCode::String as i32,
        array_element_type_code: TypeCode::Unspecified as i32,
        nullable: false,
    }
}

fn int_col(name: &str) -> ColumnDescriptor {
    ColumnDescriptor {
        name: name.to_string(),
        type_code: TypeCode::Int32 as i32,
        array_element_type_code: TypeCode::Unspecified as i32,
        nullable: false,
    }
}

/// Resolve a metadata query against the tenant's catalog snapshot.
pub fn resolve_metadata(
    sql: &str,
    instance_id: &str,
    catalog: &CatalogSnapshot,
) -> Result<MetadataResult> {
    let trimmed = sql.trim().trim_end_matches(';').trim();

    if trimmed == "-- ping" {
        return Ok(MetadataResult::empty());
    }

    if let Some(captures) = SHOW_RE.captures(trimmed) {
        let variable = captures.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        return Ok(MetadataResult::single_text(
            &show_variable_name(variable),
            show_variable_value(variable),
        ));
    }

    if VERSION_RE.is_match(trimmed) {
        return Ok(MetadataResult::single_text(
            "version",
            VERSION_BANNER.to_string(),
        ));
    }

    if let Some(captures) = SELECT_INT_RE.captures(trimmed) {
        let value: i64 = captures
            .get(1)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0);
        return Ok(MetadataResult {
            columns: vec![int_col("?column?")],
            rows: vec![vec![CellValue::Int(value)]],
        });
    }

    // Catalog tables are checked before the expression shortcuts below so a
    // query like `SELECT current_schema FROM pg_namespace` lists schemas.
    if trimmed.contains("pg_namespace") {
        return Ok(schema_listing(catalog));
    }
    if trimmed.contains("pg_matviews") {
        return Ok(MetadataResult {
            columns: vec![
                text_col("schemaname"),
                text_col("matviewname"),
                text_col("definition"),
            ],
            rows: Vec::new(),
        });
    }
    if trimmed.contains("pg_tables")
        || trimmed.contains("pg_class")
        || trimmed.contains("information_schema.tables")
    {
        return Ok(table_listing(catalog));
    }
    if trimmed.contains("pg_attribute") || trimmed.contains("information_schema.columns") {
        return Ok(column_listing(catalog));
    }
    if trimmed.contains("pg_database") {
        return Ok(MetadataResult {
            columns: vec![text_col("datname")],
            rows: vec![vec![CellValue::String(instance_id.to_string())]],
        });
    }
    if trimmed.contains("pg_settings") || trimmed.contains("pg_roles") {
        return Ok(MetadataResult {
            columns: vec![text_col("name")],
            rows: Vec::new(),
        });
    }

    if CURRENT_SCHEMA_RE.is_match(trimmed) {
        return Ok(MetadataResult::single_text(
            "current_schema",
            "public".to_string(),
        ));
    }
    if CURRENT_DATABASE_RE.is_match(trimmed) {
        return Ok(MetadataResult::single_text(
            "current_database",
            instance_id.to_string(),
        ));
    }

    Err(GatewayError::Unsupported(format!(
        "unsupported metadata query: {}",
        trimmed.chars().take(120).collect::<String>()
    )))
}

fn schema_listing(catalog: &CatalogSnapshot) -> MetadataResult {
    MetadataResult {
        columns: vec![text_col("nspname")],
        rows: catalog
            .schemas
            .iter()
            .map(|schema| vec![CellValue::String(schema.clone())])
            .collect(),
    }
}

fn table_listing(catalog: &CatalogSnapshot) -> MetadataResult {
    MetadataResult {
        columns: vec![text_col("schemaname"), text_col("tablename")],
        rows: catalog
            .tables
            .iter()
            .map(|table| {
                vec![
                    CellValue::String("public".to_string()),
                    CellValue::String(table.name.clone()),
                ]
            })
            .collect(),
    }
}

fn column_listing(catalog: &CatalogSnapshot) -> MetadataResult {
    let mut rows = Vec::new();
    for table in &catalog.tables {
        for column in &table.columns {
            let code = TypeCode::try_from(column.type_code).unwrap_or(TypeCode::Unspecified);
            rows.push(vec![
                CellValue::String(table.name.clone()),
                CellValue::String(column.name.clone()),
                CellValue::String(pg_type_name(code).to_string()),
                CellValue::String(if column.nullable { "YES" } else { "NO" }.to_string()),
            ]);
        }
    }
    MetadataResult {
        columns: vec![
            text_col("table_name"),
            text_col("column_name"),
            text_col("data_type"),
            text_col("is_nullable"),
        ],
        rows,
    }
}

/// Client-facing name of a SHOW variable.
fn show_variable_name(variable: &str) -> String {
    match variable.to_lowercase().as_str() {
        "transaction isolation level" => "transaction_isolation".to_string(),
        other => other.to_string(),
    }
}

/// Value of a SHOW variable.
fn show_variable_value(variable: &str) -> String {
    match variable.to_lowercase().as_str() {
        "standard_conforming_string" | "standard_conforming_strings" => "on".to_string(),
        "transaction isolation level" => "read committed".to_string(),
        "timezone" => "Etc/UTC".to_string(),
        _ => "tbd".to_string(),
    }
}
