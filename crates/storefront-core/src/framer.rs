use serde_json::Value;
use tracing::trace;

use crate::{
    error::ProtocolError,
    protocol::{ClientRequest, ServerMessage},
};

/// Newline-delimited JSON framer for the inbound byte stream.
///
/// Chunks may split lines anywhere; incomplete trailing data stays buffered
/// until its newline arrives. Empty and undecodable lines are dropped.
#[derive(Debug, Default, Clone)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes received but not yet terminated by a newline.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Feed one chunk and return every complete message it finished, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ServerMessage> {
        self.buffer.extend_from_slice(chunk);

        let mut messages = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            match decode_line(&line[..newline]) {
                Ok(Some(message)) => messages.push(message),
                Ok(None) => {}
                Err(err) => {
                    trace!(error = %err, line_len = newline, "dropping undecodable line");
                }
            }
        }
        messages
    }
}

/// Decode a single line (without its terminator). Blank lines yield `None`.
pub fn decode_line(line: &[u8]) -> Result<Option<ServerMessage>, ProtocolError> {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_slice(trimmed).map_err(ProtocolError::Decode)?;
    ServerMessage::from_value(value).map(Some)
}

/// Encode a request as compact JSON terminated by `\n`.
pub fn encode_request(request: &ClientRequest) -> Result<Vec<u8>, ProtocolError> {
    let mut bytes = serde_json::to_vec(request).map_err(ProtocolError::Encode)?;
    bytes.push(b'\n');
    Ok(bytes)
}
