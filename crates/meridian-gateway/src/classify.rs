//! Query classification for the PostgreSQL bridge.
//!
//! Decides whether an incoming query targets catalog/introspection tables
//! (served by the metadata resolution path) or project data (routed through
//! the generic resolver). This is a deliberate substring heuristic, not a
//! parser; its false positives and negatives are documented and pinned by
//! the tests below rather than "fixed".

/// Classification of a raw query string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryClassification {
    /// Targets protocol-level catalog/introspection tables.
    Metadata,
    /// Targets project data.
    Data,
}

/// Catalog-table markers matched case-sensitively. SQL clients emit these
/// identifiers in lowercase, so the case-sensitive match is intentional.
const CATALOG_MARKERS: &[&str] = &[
    "pg_catalog",
    "information_schema",
    "pg_namespace",
    "pg_class",
    "pg_attribute",
    "pg_type",
    "pg_tables",
    "pg_matviews",
    "pg_roles",
    "pg_settings",
    "pg_database",
];

/// Classify a query as metadata or data.
///
/// A query is `Metadata` if it mentions any catalog marker (case-sensitive
/// substring), or if it has no `FROM` clause at all (case-insensitive
/// substring). Everything else is `Data`.
pub fn classify(sql: &str) -> QueryClassification {
    for marker in CATALOG_MARKERS {
        if sql.contains(marker) {
            return QueryClassification::Metadata;
        }
    }

    if !sql.to_lowercase().contains("from") {
        return QueryClassification::Metadata;
    }

    QueryClassification::Data
}
