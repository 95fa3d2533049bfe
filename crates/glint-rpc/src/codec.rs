//! Header-delimited message framing.
//!
//! One frame on the wire is:
//!
//! ```text
//! Content-Length: <N>\r\n
//! Content-Type: application/vscode-jsonrpc; charset=utf8\r\n
//! \r\n
//! <N bytes of UTF-8 JSON>
//! ```
//!
//! There is no trailing delimiter; the next frame's headers start
//! immediately after the body.

use crate::error::TransportError;
use crate::message::Message;
use serde_json::Value;
use std::io::ErrorKind;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

const CONTENT_LENGTH: &str = "Content-Length:";
const CONTENT_TYPE: &str = "application/vscode-jsonrpc; charset=utf8";

/// Serialize a message into a complete frame.
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, TransportError> {
    let body = serde_json::to_vec(message)?;
    let header = format!(
        "Content-Length: {}\r\nContent-Type: {}\r\n\r\n",
        body.len(),
        CONTENT_TYPE
    );

    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Read one frame and JSON-decode its body.
///
/// Returns `Ok(None)` on a clean end of stream, including EOF in the middle
/// of headers or body: the peer hanging up mid-frame is a shutdown, not a
/// protocol fault. A frame with a valid header but an unparsable body
/// returns `Err(TransportError::Json)` with the body bytes already
/// consumed, so the stream stays aligned for the next frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Value>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }

        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }

        if let Some(value) = line.strip_prefix(CONTENT_LENGTH) {
            let value = value.trim();
            content_length = Some(
                value
                    .parse()
                    .map_err(|_| TransportError::InvalidContentLength(value.to_string()))?,
            );
        }
        // Other headers are consumed and ignored for forward compatibility.
    }

    let content_length = content_length.ok_or(TransportError::MissingContentLength)?;

    let mut body = vec![0u8; content_length];
    match reader.read_exact(&mut body).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    Ok(Some(serde_json::from_slice(&body)?))
}
