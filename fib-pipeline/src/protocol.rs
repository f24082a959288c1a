use std::{collections::BTreeMap, io};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::model::SubmissionRecord;

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Requests a pipeline process sends to the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreRequest {
    /// Overwrite one field of the values hash.
    Set { field: String, value: String },
    /// Read the whole values hash.
    GetAll,
    Append { number: u32 },
    ReadLog,
    Publish { topic: String, payload: String },
    /// Turn this connection into a subscriber. Answered with `Ok`, after
    /// which only `Event` messages follow.
    Subscribe { topic: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreResponse {
    Ok,
    Values { entries: BTreeMap<String, String> },
    Log { records: Vec<SubmissionRecord> },
    Published { receivers: usize },
    Event { topic: String, payload: String },
    Error { message: String },
}

pub async fn read_message<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    // Line-oriented framing keeps the store usable from netcat.
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

    #[test]
    fn requests_use_snake_case_tags() {
        let encoded = serde_json::to_string(&StoreRequest::Set {
            field: "10".into(),
            value: "pending".into(),
        })
        .expect("encode");
        assert_eq!(encoded, r#"{"type":"set","field":"10","value":"pending"}"#);

        let decoded: StoreRequest =
            serde_json::from_str(r#"{"type":"read_log"}"#).expect("decode");
        assert_eq!(decoded, StoreRequest::ReadLog);
    }

    #[tokio::test]
    async fn reader_skips_blank_lines_and_reports_eof() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = tokio::io::BufReader::new(reader);

        writer.write_all(b"\r\n\n").await.expect("write blanks");
        write_message(&mut writer, &StoreResponse::Published { receivers: 2 })
            .await
            .expect("write message");
        drop(writer);

        let parsed = read_message::<_, StoreResponse>(&mut reader)
            .await
            .expect("read message");
        assert_eq!(parsed, Some(StoreResponse::Published { receivers: 2 }));

        let eof = read_message::<_, StoreResponse>(&mut reader)
            .await
            .expect("read eof");
        assert_eq!(eof, None);
    }

    #[tokio::test]
    async fn garbage_is_invalid_data() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let mut reader = tokio::io::BufReader::new(reader);
        writer.write_all(b"not json\n").await.expect("write");

        let err = read_message::<_, StoreRequest>(&mut reader)
            .await
            .expect_err("garbage should not parse");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
