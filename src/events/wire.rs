//! # JSON-lines codec for the worker process boundary.
//!
//! One message per line, no embedded newlines (serde_json never emits them in
//! compact mode). The gateway writes [`Command`](super::Command)s to the child's
//! stdin and reads [`WorkerMessage`](super::WorkerMessage)s from its stdout.

use serde::{Serialize, de::DeserializeOwned};

use crate::error::WireError;

/// Encodes `msg` as a single newline-terminated line.
pub fn encode_line<T: Serialize>(msg: &T) -> Result<String, WireError> {
    let mut line = serde_json::to_string(msg)?;
    line.push('\n');
    Ok(line)
}

/// Decodes one line (trailing whitespace tolerated).
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, WireError> {
    Ok(serde_json::from_str(line.trim_end())?)
}
