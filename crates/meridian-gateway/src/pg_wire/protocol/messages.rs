//! PostgreSQL wire protocol message builders.
//!
//! Functions for constructing and sending backend messages. All writers are
//! generic over the stream so sessions can run over TCP or an in-memory
//! duplex pipe in tests.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::errors::ClassifiedError;

use super::types::WireColumn;

/// Send AuthenticationOk
pub async fn write_authentication_ok<S>(socket: &mut S) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    socket.write_all(&[b'R', 0, 0, 0, 8, 0, 0, 0, 0]).await
}

/// Send ParameterStatus
pub async fn write_parameter_status<S>(
    socket: &mut S,
    name: &str,
    value: &str,
) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut msg = Vec::new();
    msg.push(b'S');
    msg.extend_from_slice(&[0, 0, 0, 0]); // length placeholder
    msg.extend_from_slice(name.as_bytes());
    msg.push(0);
    msg.extend_from_slice(value.as_bytes());
    msg.push(0);
    patch_length(&mut msg);
    socket.write_all(&msg).await
}

/// Send BackendKeyData
pub async fn write_backend_key_data<S>(socket: &mut S, pid: u32, secret: u32) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut msg = vec![b'K', 0, 0, 0, 12];
    msg.extend_from_slice(&pid.to_be_bytes());
    msg.extend_from_slice(&secret.to_be_bytes());
    socket.write_all(&msg).await
}

/// Send ReadyForQuery with transaction status ('I' = idle)
pub async fn write_ready_for_query<S>(socket: &mut S, status: u8) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    socket.write_all(&[b'Z', 0, 0, 0, 5, status]).await
}

/// Send RowDescription for the given named wire columns
pub async fn write_row_description<S>(
    socket: &mut S,
    columns: &[(String, WireColumn)],
) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut msg = Vec::new();
    msg.push(b'T');
    msg.extend_from_slice(&[0, 0, 0, 0]); // length placeholder
    msg.extend_from_slice(&(columns.len() as i16).to_be_bytes());

    for (name, wire) in columns {
        msg.extend_from_slice(name.as_bytes());
        msg.push(0);
        msg.extend_from_slice(&0u32.to_be_bytes()); // table OID
        msg.extend_from_slice(&0i16.to_be_bytes()); // column attr number
        msg.extend_from_slice(&wire.oid.to_be_bytes());
        msg.extend_from_slice(&wire.width.to_be_bytes());
        msg.extend_from_slice(&(-1i32).to_be_bytes()); // type modifier
        msg.extend_from_slice(&0i16.to_be_bytes()); // format code (text)
    }

    patch_length(&mut msg);
    socket.write_all(&msg).await
}

/// Send a single DataRow. `None` cells encode SQL NULL.
pub async fn write_data_row<S>(socket: &mut S, cells: &[Option<String>]) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut msg = Vec::with_capacity(16 + cells.len() * 16);
    msg.push(b'D');
    msg.extend_from_slice(&[0, 0, 0, 0]); // length placeholder
    msg.extend_from_slice(&(cells.len() as i16).to_be_bytes());

    for cell in cells {
        match cell {
            None => msg.extend_from_slice(&(-1i32).to_be_bytes()),
            Some(value) => {
                // The text format must not carry embedded NUL bytes.
                if value.contains('\0') {
                    let sanitized: String = value.chars().filter(|&c| c != '\0').collect();
                    msg.extend_from_slice(&(sanitized.len() as i32).to_be_bytes());
                    msg.extend_from_slice(sanitized.as_bytes());
                } else {
                    msg.extend_from_slice(&(value.len() as i32).to_be_bytes());
                    msg.extend_from_slice(value.as_bytes());
                }
            }
        }
    }

    patch_length(&mut msg);
    socket.write_all(&msg).await
}

/// Send CommandComplete with the given tag
pub async fn write_command_complete<S>(socket: &mut S, tag: &str) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut msg = Vec::new();
    msg.push(b'C');
    msg.extend_from_slice(&[0, 0, 0, 0]);
    msg.extend_from_slice(tag.as_bytes());
    msg.push(0);
    patch_length(&mut msg);
    socket.write_all(&msg).await
}

/// Send EmptyQueryResponse — the distinct wire-level signal for an empty
/// result, written instead of zero rows plus a completion marker.
pub async fn write_empty_query_response<S>(socket: &mut S) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    socket.write_all(&[b'I', 0, 0, 0, 4]).await
}

/// Send ErrorResponse from a classified error
pub async fn write_error<S>(socket: &mut S, error: &ClassifiedError) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut msg = Vec::new();
    msg.push(b'E');
    msg.extend_from_slice(&[0, 0, 0, 0]);

    // Severity (localized and non-localized)
    msg.push(b'S');
    msg.extend_from_slice(b"ERROR");
    msg.push(0);
    msg.push(b'V');
    msg.extend_from_slice(b"ERROR");
    msg.push(0);

    // SQLSTATE
    msg.push(b'C');
    msg.extend_from_slice(error.sqlstate.as_bytes());
    msg.push(0);

    // Primary message
    msg.push(b'M');
    msg.extend_from_slice(error.message.as_bytes());
    msg.push(0);

    if let Some(ref hint) = error.hint {
        msg.push(b'H');
        msg.extend_from_slice(hint.as_bytes());
        msg.push(0);
    }

    msg.push(0); // field terminator
    patch_length(&mut msg);
    socket.write_all(&msg).await
}

/// Fill in the 4-byte big-endian length at offset 1 (everything after the
/// message type byte).
fn patch_length(msg: &mut [u8]) {
    let len = (msg.len() - 1) as u32;
    msg[1..5].copy_from_slice(&len.to_be_bytes());
}
