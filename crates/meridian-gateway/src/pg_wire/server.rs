//! PostgreSQL wire protocol server.
//!
//! Lets off-the-shelf SQL clients (psql, DBeaver, BI tools) query an
//! instance over the PostgreSQL protocol. The per-connection `database`
//! startup parameter names the tenant. Each session handles one simple
//! query at a time: classify, resolve through the metadata path or the
//! generic resolver, emit columns, stream rows, complete.
//!
//! Connection handlers are generic over the stream so sessions run over a
//! duplex pipe in tests. TLS termination is not handled here; SSLRequest is
//! declined and clients fall back to cleartext.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use meridian_common::proto::sub_query::Kind;
use meridian_common::proto::{AnalyticSqlRequest, SubQuery};
use meridian_common::GatewayError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::classify::{classify, QueryClassification};
use crate::errors::{classify_error, sqlstate, ClassifiedError};
use crate::marshal::cell_to_text;
use crate::metrics;
use crate::runtime::{CatalogSnapshot, Claims, CellValue, Cursor, Permission, Runtime};

use super::config::PgServerConfig;
use super::metadata::{resolve_metadata, MetadataResult};
use super::protocol::messages::{
    write_authentication_ok, write_backend_key_data, write_command_complete, write_data_row,
    write_empty_query_response, write_error, write_parameter_status, write_ready_for_query,
    write_row_description,
};
use super::protocol::types::{map_type, WireColumn};
use super::protocol::{codes, TRANSACTION_STATUS_IDLE};

pub struct PgServer {
    addr: SocketAddr,
    runtime: Arc<Runtime>,
    config: Arc<PgServerConfig>,
}

impl PgServer {
    pub fn new(port: u16, runtime: Arc<Runtime>) -> Self {
        let addr: SocketAddr = format!("0.0.0.0:{}", port)
            .parse()
            .expect("invalid port number for SocketAddr");
        Self {
            addr,
            runtime,
            config: Arc::new(PgServerConfig::default()),
        }
    }

    pub fn with_config(mut self, config: PgServerConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// Accept loop; one task per connection.
    pub async fn start(&self) -> anyhow::Result<()> {
        info!("Starting PostgreSQL wire protocol server on {}", self.addr);
        let listener = TcpListener::bind(&self.addr).await?;

        loop {
            let (socket, peer_addr) = listener.accept().await?;
            debug!("New PostgreSQL connection from {}", peer_addr);
            configure_tcp_keepalive(&socket, self.config.tcp_keepalive_secs);

            let runtime = self.runtime.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                metrics::connection_opened("pgwire");
                let mut socket = socket;
                if let Err(err) = handle_session(&mut socket, &runtime, &config).await {
                    let message = err.to_string();
                    if message.contains("early eof") || message.contains("connection reset") {
                        debug!("client disconnected: {}", message);
                    } else {
                        warn!("error handling PostgreSQL connection: {}", message);
                    }
                }
                metrics::connection_closed("pgwire");
            });
        }
    }
}

/// Configure TCP keepalive for faster dead-connection detection. Clients
/// behind NATs or on Windows may disconnect without a FIN.
fn configure_tcp_keepalive(stream: &tokio::net::TcpStream, keepalive_secs: u64) {
    use socket2::SockRef;

    if let Err(err) = stream.set_nodelay(true) {
        warn!("failed to set TCP_NODELAY: {}", err);
    }

    let socket = SockRef::from(stream);
    if let Err(err) = socket.set_keepalive(true) {
        warn!("failed to enable TCP keepalive: {}", err);
        return;
    }

    let keepalive = socket2::TcpKeepalive::new()
        .with_time(Duration::from_secs(keepalive_secs))
        .with_interval(Duration::from_secs(keepalive_secs / 2 + 1));
    if let Err(err) = socket.set_tcp_keepalive(&keepalive) {
        warn!("failed to configure TCP keepalive timing: {}", err);
    }
}

/// Run one client session from startup to termination.
pub(crate) async fn handle_session<S>(
    socket: &mut S,
    runtime: &Runtime,
    config: &PgServerConfig,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let params = match read_startup(socket).await? {
        Some(params) => params,
        // CancelRequest connections close without a response.
        None => return Ok(()),
    };

    // The database parameter carries the tenant identifier.
    let instance_id = params
        .get("database")
        .filter(|v| !v.is_empty())
        .or_else(|| params.get("user"))
        .cloned()
        .unwrap_or_default();

    if instance_id.is_empty() {
        write_error(
            socket,
            &ClassifiedError::new(
                sqlstate::INVALID_CATALOG_NAME,
                "no database (tenant) specified in startup parameters",
            ),
        )
        .await?;
        return Ok(());
    }

    let catalog = match runtime.catalog(&instance_id) {
        Ok(catalog) => catalog,
        Err(_) => {
            write_error(
                socket,
                &ClassifiedError::new(
                    sqlstate::INVALID_CATALOG_NAME,
                    format!("database {:?} does not exist", instance_id),
                ),
            )
            .await?;
            return Ok(());
        }
    };

    if !runtime.can_instance(&instance_id, Permission::ReadOlap) {
        write_error(
            socket,
            &ClassifiedError::new(
                sqlstate::INVALID_AUTHORIZATION,
                format!("not authorized to query instance {:?}", instance_id),
            ),
        )
        .await?;
        return Ok(());
    }

    info!(instance_id = %instance_id, "PostgreSQL client connected");

    write_authentication_ok(socket).await?;
    write_parameter_status(socket, "server_version", &config.server_version).await?;
    write_parameter_status(socket, "client_encoding", "UTF8").await?;
    write_parameter_status(socket, "server_encoding", "UTF8").await?;
    write_parameter_status(socket, "DateStyle", "ISO, MDY").await?;
    write_parameter_status(socket, "TimeZone", "UTC").await?;
    write_parameter_status(socket, "integer_datetimes", "on").await?;
    write_parameter_status(socket, "standard_conforming_strings", "on").await?;

    let pid = std::process::id();
    let secret = pid.wrapping_mul(1103515245).wrapping_add(12345);
    write_backend_key_data(socket, pid, secret).await?;
    write_ready_for_query(socket, TRANSACTION_STATUS_IDLE).await?;
    socket.flush().await?;

    loop {
        let mut msg_type = [0u8; 1];
        if socket.read_exact(&mut msg_type).await.is_err() {
            debug!("client disconnected");
            break;
        }

        match msg_type[0] {
            b'X' => {
                debug!("client sent Terminate");
                break;
            }
            b'Q' => {
                let body = read_message_body(socket).await?;
                let query = String::from_utf8_lossy(&body)
                    .trim_end_matches('\0')
                    .trim()
                    .to_string();
                debug!(query = %query.chars().take(120).collect::<String>(), "received query");

                handle_query(socket, &query, &instance_id, &catalog, runtime, config).await?;
                write_ready_for_query(socket, TRANSACTION_STATUS_IDLE).await?;
                socket.flush().await?;
            }
            b'S' => {
                // Sync outside the extended protocol; just report readiness.
                let _ = read_message_body(socket).await?;
                write_ready_for_query(socket, TRANSACTION_STATUS_IDLE).await?;
                socket.flush().await?;
            }
            other => {
                let _ = read_message_body(socket).await?;
                write_error(
                    socket,
                    &ClassifiedError::new(
                        sqlstate::FEATURE_NOT_SUPPORTED,
                        format!(
                            "protocol message {:?} is not supported; use the simple query protocol",
                            other as char
                        ),
                    ),
                )
                .await?;
                write_ready_for_query(socket, TRANSACTION_STATUS_IDLE).await?;
                socket.flush().await?;
            }
        }
    }

    Ok(())
}

/// Read the startup message, declining SSL/GSSAPI negotiation. Returns the
/// startup parameters, or `None` for a CancelRequest.
async fn read_startup<S>(socket: &mut S) -> anyhow::Result<Option<HashMap<String, String>>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let mut len_buf = [0u8; 4];
        socket.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf) as usize;

        if !(8..=10_000).contains(&len) {
            anyhow::bail!("invalid startup message length: {}", len);
        }

        let mut body = vec![0u8; len - 4];
        socket.read_exact(&mut body).await?;

        let code = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
        match code {
            codes::SSL_REQUEST | codes::GSSENC_REQUEST => {
                // No TLS termination at this layer; the client retries
                // without encryption.
                socket.write_all(&[b'N']).await?;
                socket.flush().await?;
                continue;
            }
            codes::CANCEL_REQUEST => {
                debug!("CancelRequest received, closing");
                return Ok(None);
            }
            _ => return Ok(Some(parse_startup_params(&body))),
        }
    }
}

/// Parse null-separated key/value startup parameters (after the 4-byte
/// protocol version).
fn parse_startup_params(body: &[u8]) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut parts = body[4.min(body.len())..]
        .split(|&b| b == 0)
        .map(|part| String::from_utf8_lossy(part).into_owned());

    while let (Some(key), Some(value)) = (parts.next(), parts.next()) {
        if key.is_empty() {
            break;
        }
        params.insert(key, value);
    }
    params
}

/// Read a length-prefixed message body (length includes itself).
async fn read_message_body<S>(socket: &mut S) -> anyhow::Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    socket.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len < 4 || len > 16 * 1024 * 1024 {
        anyhow::bail!("invalid message length: {}", len);
    }
    let mut body = vec![0u8; len - 4];
    socket.read_exact(&mut body).await?;
    Ok(body)
}

/// Handle one simple query: intercept session commands, classify, resolve,
/// and stream the result. Resolution errors become ErrorResponses; transport
/// write failures abort the statement but leave the session to the caller.
async fn handle_query<S>(
    socket: &mut S,
    sql: &str,
    instance_id: &str,
    catalog: &CatalogSnapshot,
    runtime: &Runtime,
    config: &PgServerConfig,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let sql = sql.trim().trim_end_matches(';').trim();
    if sql.is_empty() {
        write_empty_query_response(socket).await?;
        return Ok(());
    }

    if let Some(tag) = intercept_session_command(sql) {
        write_command_complete(socket, tag).await?;
        return Ok(());
    }

    match classify(sql) {
        QueryClassification::Metadata => {
            match resolve_metadata(sql, instance_id, catalog) {
                Ok(result) => {
                    if let Err(err) = write_metadata_result(socket, &result).await {
                        warn!(error = %err, "transport write failed, aborting statement");
                    }
                }
                Err(err) => {
                    write_error(socket, &error_to_classified(&err)).await?;
                }
            }
        }
        QueryClassification::Data => {
            run_data_query(socket, sql, instance_id, runtime, config).await?;
        }
    }

    Ok(())
}

/// Commands that only affect session state are acknowledged locally without
/// touching a collaborator.
fn intercept_session_command(sql: &str) -> Option<&'static str> {
    let upper = sql.to_uppercase();
    let upper = upper.trim();

    if upper.starts_with("SET ") {
        return Some("SET");
    }
    if upper.starts_with("RESET ") {
        return Some("RESET");
    }
    if upper == "BEGIN" || upper.starts_with("BEGIN ") || upper.starts_with("START TRANSACTION") {
        return Some("BEGIN");
    }
    if upper == "COMMIT" || upper == "END" {
        return Some("COMMIT");
    }
    if upper == "ROLLBACK" || upper.starts_with("ROLLBACK ") {
        return Some("ROLLBACK");
    }
    if upper.starts_with("DISCARD") {
        return Some("DISCARD ALL");
    }
    None
}

async fn write_metadata_result<S>(socket: &mut S, result: &MetadataResult) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    if result.rows.is_empty() {
        return write_empty_query_response(socket).await;
    }

    let columns: Vec<(String, WireColumn)> = result
        .columns
        .iter()
        .map(|column| (column.name.clone(), map_type(column)))
        .collect();
    write_row_description(socket, &columns).await?;

    for row in &result.rows {
        let cells: Vec<Option<String>> = row.iter().map(cell_to_text).collect();
        write_data_row(socket, &cells).await?;
    }

    write_command_complete(socket, &format!("SELECT {}", result.rows.len())).await
}

/// Resolve analytic SQL through the generic resolver and stream the rows.
async fn run_data_query<S>(
    socket: &mut S,
    sql: &str,
    instance_id: &str,
    runtime: &Runtime,
    config: &PgServerConfig,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let resolver = match runtime.resolver(instance_id) {
        Ok(resolver) => resolver,
        Err(err) => {
            write_error(socket, &error_to_classified(&err)).await?;
            return Ok(());
        }
    };

    let query = SubQuery {
        kind: Some(Kind::AnalyticSqlRequest(AnalyticSqlRequest {
            sql: sql.to_string(),
            source: config.analytic_source.clone(),
        })),
    };

    let resolved = tokio::time::timeout(
        Duration::from_secs(config.query_timeout_secs),
        resolver.resolve(instance_id, &query, &Claims::default()),
    )
    .await;

    let mut cursor: Box<dyn Cursor> = match resolved {
        Ok(Ok(cursor)) => cursor,
        Ok(Err(err)) => {
            metrics::record_query("pgwire", "failed", 0.0);
            write_error(socket, &error_to_classified(&err)).await?;
            return Ok(());
        }
        Err(_) => {
            metrics::record_query("pgwire", "timeout", config.query_timeout_secs as f64);
            write_error(
                socket,
                &ClassifiedError::new(
                    sqlstate::QUERY_CANCELED,
                    format!("query timed out after {} s", config.query_timeout_secs),
                ),
            )
            .await?;
            return Ok(());
        }
    };

    // Peek the first row so an empty result gets its distinct marker and
    // resolution errors abort before any column data is written.
    let first = match cursor.try_next().await {
        Ok(first) => first,
        Err(err) => {
            metrics::record_query("pgwire", "failed", 0.0);
            write_error(socket, &error_to_classified(&err)).await?;
            return Ok(());
        }
    };

    let Some(first) = first else {
        metrics::record_query("pgwire", "success", 0.0);
        write_empty_query_response(socket).await?;
        return Ok(());
    };

    let columns: Vec<(String, WireColumn)> = cursor
        .schema()
        .iter()
        .map(|column| (column.name.clone(), map_type(column)))
        .collect();

    if let Err(err) = stream_rows(socket, &columns, first, cursor.as_mut()).await {
        warn!(error = %err, "aborting statement mid-stream");
    }

    Ok(())
}

/// Write the column list, then rows one at a time, then the completion tag.
/// Cursor errors after the first row surface as an ErrorResponse; transport
/// errors propagate to the caller for logging.
async fn stream_rows<S>(
    socket: &mut S,
    columns: &[(String, WireColumn)],
    first: Vec<CellValue>,
    cursor: &mut dyn Cursor,
) -> anyhow::Result<()>
where
    S: AsyncWrite + Unpin,
{
    write_row_description(socket, columns).await?;

    let mut row_count: usize = 0;
    let mut pending = Some(first);
    loop {
        let row = match pending.take() {
            Some(row) => row,
            None => match cursor.try_next().await {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(err) => {
                    metrics::record_query("pgwire", "failed", 0.0);
                    write_error(socket, &error_to_classified(&err)).await?;
                    return Ok(());
                }
            },
        };

        let cells: Vec<Option<String>> = row.iter().map(cell_to_text).collect();
        write_data_row(socket, &cells).await?;
        row_count += 1;
    }

    metrics::record_query("pgwire", "success", 0.0);
    write_command_complete(socket, &format!("SELECT {}", row_count)).await?;
    Ok(())
}

fn error_to_classified(err: &GatewayError) -> ClassifiedError {
    match err {
        GatewayError::Unsupported(message) => {
            ClassifiedError::new(sqlstate::FEATURE_NOT_SUPPORTED, message.clone())
        }
        GatewayError::NotFound(message) => {
            ClassifiedError::new(sqlstate::UNDEFINED_TABLE, message.clone())
        }
        GatewayError::PermissionDenied(message) => {
            ClassifiedError::new(sqlstate::INVALID_AUTHORIZATION, message.clone())
        }
        other => classify_error(&other.to_string()),
    }
}
