//! PostgreSQL bridge configuration (environment-driven).

use meridian_common::config::{env_or_default, env_parse_or_default};

#[derive(Debug, Clone)]
pub struct PgServerConfig {
    /// TCP keepalive time in seconds (detects dead connections)
    pub tcp_keepalive_secs: u64,
    /// Timeout for resolving one data query, in seconds
    pub query_timeout_secs: u64,
    /// Logical data source name analytic SQL is resolved against
    pub analytic_source: String,
    /// Value reported as server_version to clients
    pub server_version: String,
}

impl Default for PgServerConfig {
    fn default() -> Self {
        Self {
            tcp_keepalive_secs: env_parse_or_default("MERIDIAN_PG_TCP_KEEPALIVE_SECS", 10),
            query_timeout_secs: env_parse_or_default("MERIDIAN_PG_QUERY_TIMEOUT_SECS", 600),
            analytic_source: env_or_default("MERIDIAN_PG_ANALYTIC_SOURCE", "metrics"),
            server_version: env_or_default("MERIDIAN_PG_SERVER_VERSION", "16.3 (Meridian)"),
        }
    }
}
