//! Length-prefixed JSON framing for the tool-call socket.
//!
//! Every message on the wire is a 4-byte big-endian length prefix followed by
//! that many bytes of UTF-8 JSON. Both directions (parent and bridge) share
//! this codec; it knows nothing about what the JSON means.

use crate::error::{Error, IpcErrorKind, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Per-payload cap: 10 MiB.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Size of the big-endian length prefix, in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Filename prefix for the session's Unix-domain socket.
pub const SOCKET_FILE_PREFIX: &str = "claudecode_ipc_";

/// Filename suffix for the session's Unix-domain socket.
pub const SOCKET_FILE_SUFFIX: &str = ".sock";

/// Filename prefix for the session's tool-schema file.
pub const SCHEMA_FILE_PREFIX: &str = "claudecode_ipc_schema_";

/// Owner-only file mode applied to both the socket and schema files.
pub const SOCKET_PERMISSIONS: u32 = 0o600;

/// Serialize `message` and write it as a length-prefixed frame.
///
/// Rejects the payload before writing anything if its encoded size exceeds
/// [`MAX_MESSAGE_SIZE`].
pub async fn send_message<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(message)?;
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(Error::ipc(
            IpcErrorKind::Size,
            format!(
                "message of {} bytes exceeds {} byte cap",
                payload.len(),
                MAX_MESSAGE_SIZE
            ),
        ));
    }

    let prefix = (payload.len() as u32).to_be_bytes();
    writer.write_all(&prefix).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame and deserialize it as `T`.
///
/// Distinguishes three failure modes: an incomplete length prefix, a
/// declared length over [`MAX_MESSAGE_SIZE`] (checked before the payload is
/// read), and an incomplete payload. Invalid JSON or non-UTF-8 bytes surface
/// as a JSON error.
pub async fn receive_message<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    reader.read_exact(&mut prefix).await.map_err(|e| {
        Error::ipc(
            IpcErrorKind::Message,
            format!("incomplete length prefix: {e}"),
        )
    })?;

    let declared_len = u32::from_be_bytes(prefix) as usize;
    if declared_len > MAX_MESSAGE_SIZE {
        return Err(Error::ipc(
            IpcErrorKind::Size,
            format!(
                "declared message length {declared_len} exceeds {MAX_MESSAGE_SIZE} byte cap"
            ),
        ));
    }

    let mut payload = vec![0u8; declared_len];
    reader.read_exact(&mut payload).await.map_err(|e| {
        Error::ipc(
            IpcErrorKind::Message,
            format!("incomplete payload (wanted {declared_len} bytes): {e}"),
        )
    })?;

    serde_json::from_slice(&payload).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::io::Cursor;

    #[tokio::test]
    async fn round_trips_a_small_message() {
        let mut buf = Vec::new();
        let msg = json!({"method": "call_tool", "params": {"name": "add", "arguments": {"a": 1}}});
        send_message(&mut buf, &msg).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: Value = receive_message(&mut cursor).await.unwrap();
        assert_eq!(decoded, msg);
    }

    #[tokio::test]
    async fn send_rejects_oversize_payload() {
        let mut buf = Vec::new();
        let huge = json!({"text": "x".repeat(MAX_MESSAGE_SIZE + 1)});
        let err = send_message(&mut buf, &huge).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Ipc {
                kind: IpcErrorKind::Size,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn receive_fails_on_truncated_prefix() {
        let mut cursor = Cursor::new(vec![0u8, 1u8]);
        let err = receive_message::<_, Value>(&mut cursor).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Ipc {
                kind: IpcErrorKind::Message,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn receive_rejects_oversize_declared_length_before_reading_payload() {
        let prefix = ((MAX_MESSAGE_SIZE as u32) + 1).to_be_bytes();
        let mut cursor = Cursor::new(prefix.to_vec());
        let err = receive_message::<_, Value>(&mut cursor).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Ipc {
                kind: IpcErrorKind::Size,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn receive_fails_on_truncated_payload() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&10u32.to_be_bytes());
        buf.extend_from_slice(b"short");
        let mut cursor = Cursor::new(buf);
        let err = receive_message::<_, Value>(&mut cursor).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Ipc {
                kind: IpcErrorKind::Message,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn receive_fails_on_invalid_json() {
        let mut buf = Vec::new();
        let payload = b"not json";
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(payload);
        let mut cursor = Cursor::new(buf);
        let err = receive_message::<_, Value>(&mut cursor).await.unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }
}
