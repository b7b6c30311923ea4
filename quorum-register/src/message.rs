//! Replica RPC messages and their JSON-line framing.

use std::io;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::register::VersionedValue;
use crate::view::View;

const LINE_ENDINGS: &[char] = &['\n', '\r'];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Read,
    Write { value: VersionedValue },
    GetCurrentView,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Value { value: VersionedValue },
    Ack { value: VersionedValue },
    View { view: View },
    Error { message: String },
}

/// Reads the next request or response from a replica connection.
///
/// Blank lines between messages are skipped. `Ok(None)` means the peer hung
/// up cleanly; a line that is not a valid message is `InvalidData`, which the
/// server answers and the client reports as an application error rather than
/// a dead replica.
pub async fn read_message<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.is_empty() {
            continue;
        }

        let parsed = serde_json::from_str(trimmed).map_err(to_io_error)?;
        return Ok(Some(parsed));
    }
}

/// Sends one request or response as a single JSON line and flushes it.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut encoded = serde_json::to_vec(message).map_err(to_io_error)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_request_crosses_a_pipe() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = tokio::io::BufReader::new(reader);
        let request = Request::Write {
            value: VersionedValue::new("hello", 3),
        };

        write_message(&mut writer, &request)
            .await
            .expect("write message");
        let parsed = read_message::<_, Request>(&mut reader)
            .await
            .expect("read message")
            .expect("expected message");

        assert_eq!(request, parsed);
    }

    #[test]
    fn requests_use_tagged_snake_case() {
        let encoded = serde_json::to_string(&Request::GetCurrentView).unwrap();
        assert_eq!(encoded, r#"{"type":"get_current_view"}"#);

        let decoded: Response =
            serde_json::from_str(r#"{"type":"value","value":{"value":null,"timestamp":0}}"#)
                .unwrap();
        assert_eq!(
            decoded,
            Response::Value {
                value: VersionedValue::default()
            }
        );
    }

    #[tokio::test]
    async fn blank_lines_are_skipped_and_eof_is_none() {
        let input: &[u8] = b"\n\r\n{\"type\":\"read\"}\n";
        let mut reader = tokio::io::BufReader::new(input);

        let first = read_message::<_, Request>(&mut reader).await.unwrap();
        assert_eq!(first, Some(Request::Read));
        let second = read_message::<_, Request>(&mut reader).await.unwrap();
        assert_eq!(second, None);
    }

    #[tokio::test]
    async fn garbage_is_invalid_data() {
        let input: &[u8] = b"not json\n";
        let mut reader = tokio::io::BufReader::new(input);
        let err = read_message::<_, Request>(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
