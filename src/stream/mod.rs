//! MJPEG acquisition: HTTP connection, frame splitting, latency guard.

pub mod parser;
pub mod reader;

pub use parser::{parse_boundary, MjpegParser, ParserStats, StreamFormat, EOI, SOI};
pub use reader::{pump, PumpOptions, ReaderStats, ReaderStatsSnapshot, StreamEnd, StreamReader};

use serde::Serialize;

/// Connection state reported to whoever shows the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StreamStatus {
    Idle,
    Connecting { url: String },
    Streaming { format: String },
    Reconnecting { reason: String, delay_ms: u64 },
    Stopped,
}
