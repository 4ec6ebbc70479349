//! Error classification for the PostgreSQL bridge.
//!
//! Maps raw collaborator error messages onto PostgreSQL SQLSTATE codes so
//! SQL clients can react programmatically, with optional hints for humans.

/// PostgreSQL SQLSTATE error codes.
/// See: https://www.postgresql.org/docs/current/errcodes-appendix.html
pub mod sqlstate {
    pub const CONNECTION_FAILURE: &str = "08006";
    pub const FEATURE_NOT_SUPPORTED: &str = "0A000";
    pub const INVALID_AUTHORIZATION: &str = "28000";
    pub const INVALID_CATALOG_NAME: &str = "3D000";
    pub const SYNTAX_ERROR: &str = "42601";
    pub const UNDEFINED_TABLE: &str = "42P01";
    pub const UNDEFINED_COLUMN: &str = "42703";
    pub const OUT_OF_MEMORY: &str = "53200";
    pub const QUERY_CANCELED: &str = "57014";
    pub const INTERNAL_ERROR: &str = "XX000";
}

/// A classified error ready to be written as a wire ErrorResponse.
#[derive(Debug, Clone)]
pub struct ClassifiedError {
    pub sqlstate: &'static str,
    pub message: String,
    pub hint: Option<String>,
}

impl ClassifiedError {
    pub fn new(sqlstate: &'static str, message: impl Into<String>) -> Self {
        Self {
            sqlstate,
            message: message.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Classify a raw resolver/engine error message into a SQLSTATE-coded error.
pub fn classify_error(raw: &str) -> ClassifiedError {
    let lower = raw.to_lowercase();
    let message = core_message(raw);

    if lower.contains("syntax error")
        || lower.contains("parser error")
        || lower.contains("parse error")
    {
        return ClassifiedError::new(sqlstate::SYNTAX_ERROR, message)
            .with_hint("Check SQL syntax. Use single quotes for strings, double quotes for identifiers.");
    }

    if lower.contains("does not exist") || lower.contains("not found") {
        if lower.contains("column") {
            return ClassifiedError::new(sqlstate::UNDEFINED_COLUMN, message)
                .with_hint("Verify the column name against the table schema.");
        }
        if lower.contains("table") || lower.contains("relation") || lower.contains("instance") {
            return ClassifiedError::new(sqlstate::UNDEFINED_TABLE, message)
                .with_hint("Verify the table name and schema.");
        }
    }

    if lower.contains("timeout") || lower.contains("timed out") || lower.contains("cancelled") {
        return ClassifiedError::new(sqlstate::QUERY_CANCELED, message)
            .with_hint("Add a LIMIT clause or use more selective filters.");
    }

    if lower.contains("out of memory") || lower.contains("memory limit") {
        return ClassifiedError::new(sqlstate::OUT_OF_MEMORY, message)
            .with_hint("Reduce the result size with LIMIT or tighter WHERE filters.");
    }

    if lower.contains("permission denied")
        || lower.contains("unauthorized")
        || lower.contains("forbidden")
    {
        return ClassifiedError::new(
            sqlstate::INVALID_AUTHORIZATION,
            "Authorization failed for this instance",
        );
    }

    if lower.contains("connection")
        || lower.contains("broken pipe")
        || lower.contains("unavailable")
    {
        return ClassifiedError::new(sqlstate::CONNECTION_FAILURE, message)
            .with_hint("Retry the query. If the issue persists, the backend may be overloaded.");
    }

    ClassifiedError::new(sqlstate::INTERNAL_ERROR, message)
}

/// Strip known prefixes and cap the length for client display.
fn core_message(raw: &str) -> String {
    let mut msg = raw.trim().to_string();

    for prefix in ["Query execution failed:", "QUERY_FAILED:"] {
        if let Some(pos) = msg.find(prefix) {
            msg = msg[pos + prefix.len()..].trim().to_string();
        }
    }

    if msg.len() > 500 {
        let mut end = 497;
        while !msg.is_char_boundary(end) {
            end -= 1;
        }
        msg = format!("{}...", &msg[..end]);
    }

    msg
}
