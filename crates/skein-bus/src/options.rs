use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compression::Compression;

/// Per-socket tuning options
///
/// Timeouts and the linger period are in milliseconds; a negative value means
/// "wait forever". High-water marks of zero mean "unbounded".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketOptions {
    /// How long a client's cleanup waits for an outstanding reply
    pub linger_ms: i64,
    /// Capacity of a service server's request queue
    pub backlog: usize,
    pub read_timeout_ms: i64,
    pub write_timeout_ms: i64,
    /// Fail instead of queueing when no peer is present
    pub immediate: bool,
    /// Keep only the most recent pending message
    pub conflate: bool,
    /// Maximum number of messages a subscriber keeps pending
    pub read_hwm: usize,
    /// Maximum number of messages a publisher lets queue on its topic
    pub write_hwm: usize,
    pub compression: Compression,
    /// Compression level, 0-9, or -1 for the algorithm default
    pub compression_level: i32,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            linger_ms: 5000,
            backlog: 100,
            read_timeout_ms: -1,
            write_timeout_ms: -1,
            immediate: false,
            conflate: false,
            read_hwm: 1000,
            write_hwm: 1000,
            compression: Compression::None,
            compression_level: -1,
        }
    }
}

impl SocketOptions {
    pub fn read_timeout(&self) -> Option<Duration> {
        millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        millis(self.write_timeout_ms)
    }

    pub fn linger(&self) -> Option<Duration> {
        millis(self.linger_ms)
    }
}

fn millis(value: i64) -> Option<Duration> {
    u64::try_from(value).ok().map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_timeout_means_forever() {
        let options = SocketOptions::default();
        assert_eq!(options.read_timeout(), None);
        assert_eq!(options.write_timeout(), None);
        assert_eq!(options.linger(), Some(Duration::from_millis(5000)));
    }
}
