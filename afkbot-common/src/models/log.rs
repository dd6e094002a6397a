// File: afkbot-common/src/models/log.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::platform::Platform;

/// One line in a topic's log buffer. `seq` is assigned by the bus and
/// is strictly increasing and gapless within its topic.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LogEntry {
    pub topic: Platform,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// What a live log subscription yields: either a real entry or a
/// keep-alive emitted after ~25s of silence so half-open consumers can
/// be detected.
#[derive(Debug, Clone, PartialEq)]
pub enum LogFrame {
    Entry(LogEntry),
    KeepAlive,
}

/// Catch-up result for non-streaming consumers. A consumer that then
/// attaches to the live feed must discard entries with `seq` it has
/// already seen; snapshot and attach are not atomic.
#[derive(Debug, Serialize, Clone)]
pub struct LogSnapshot {
    pub entries: Vec<LogEntry>,
    pub last_seq: Option<u64>,
}
