//! Live timing snapshot model.
//! One snapshot is a complete, time-stamped read of the race from the timing provider.
//! Lap and sector times stay in the provider's own string formatting; `laptime` converts
//! them only when a delta has to be computed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state reported alongside a snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    #[default]
    Connecting,
    Connected,
    Disconnected,
    Timeout,
    Error,
    NoData,
}

impl Status {
    /// Maps a provider status string onto a `Status`. Unknown values become `Error`.
    pub fn from_provider(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "connecting" | "init" => Status::Connecting,
            "connected" | "ok" | "live" | "running" => Status::Connected,
            "disconnected" | "closed" => Status::Disconnected,
            "timeout" | "timed_out" => Status::Timeout,
            "no_data" | "nodata" | "empty" | "" => Status::NoData,
            _ => Status::Error,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Status::Connecting => "CONNECTING",
            Status::Connected => "CONNECTED",
            Status::Disconnected => "DISCONNECTED",
            Status::Timeout => "TIMEOUT",
            Status::Error => "ERROR",
            Status::NoData => "NO_DATA",
        };
        f.write_str(label)
    }
}

/// One row of the live timing table.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverRow {
    pub position: u32,
    pub kart: String,
    pub name: String,
    /// Sector times of the current lap, in circuit order.
    pub sectors: Vec<String>,
    pub last_lap: String,
    pub best_lap: String,
    pub gap: String,
    pub laps: String,
}

/// Race-control message shown next to the table.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub time: String,
    pub text: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveSnapshot {
    pub status: Status,
    /// Unix time in milliseconds.
    pub timestamp: i64,
    pub drivers: Vec<DriverRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<Vec<Comment>>,
}

impl LiveSnapshot {
    /// Snapshot with no rows, used when the provider answers without timing data.
    pub fn empty(status: Status, timestamp: i64) -> Self {
        Self {
            status,
            timestamp,
            drivers: Vec::new(),
            comments: None,
        }
    }

    pub fn leader(&self) -> Option<&DriverRow> {
        self.drivers.iter().min_by_key(|row| row.position)
    }
}
