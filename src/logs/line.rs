use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One line of process output, stamped when the reader loop received it.
///
/// Serializes as `{"time": "<rfc3339>", "message": "<text>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// Receive time.
    pub time: DateTime<Utc>,
    /// Line text without the trailing newline.
    pub message: Arc<str>,
}

impl LogLine {
    /// Stamps `message` with the current time.
    pub fn now(message: impl Into<Arc<str>>) -> Self {
        Self {
            time: Utc::now(),
            message: message.into(),
        }
    }

    /// Decodes a raw output chunk: lossy UTF-8, trailing `\n` / `\r\n` removed.
    pub fn from_raw(raw: &[u8]) -> Self {
        let text = String::from_utf8_lossy(raw);
        let text = text.trim_end_matches(['\n', '\r']);
        Self::now(text)
    }
}
