//! Snapshot sources.
//! The poller only sees `SnapshotSource`; the HTTP provider (`provider` module) and the
//! in-memory `MockSource` below are interchangeable apart from latency.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::laptime::format_time;
use crate::snapshot::{Comment, DriverRow, LiveSnapshot, Status};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("timing provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("timing provider returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("could not parse timing payload: {0}")]
    Parse(String),
    #[error("{0}")]
    Unavailable(String),
}

#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    async fn fetch(&self) -> Result<LiveSnapshot, SourceError>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

// *************** Mock source ***************

const MOCK_NAMES: [&str; 8] = [
    "A. Moreau", "L. Bianchi", "K. Novak", "S. Okafor", "J. Lindqvist", "M. Duarte", "R. Tanaka",
    "E. Walsh",
];
const MOCK_SECTOR_BASE_MS: [u32; 3] = [18_500, 21_200, 16_800];

struct MockKart {
    kart: String,
    name: String,
    pace_ms: u32,
    laps: u32,
    total_ms: u64,
    sectors: Vec<u32>,
    best_ms: Option<u32>,
}

struct MockState {
    rng: StdRng,
    karts: Vec<MockKart>,
    ticks: u64,
}

/// Generates a plausible evolving race entirely in memory. Every fetch completes one lap
/// for each kart.
pub struct MockSource {
    state: Mutex<MockState>,
}

impl MockSource {
    pub fn new(seed: u64, karts: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let karts = (0..karts)
            .map(|idx| MockKart {
                kart: (idx + 1).to_string(),
                name: MOCK_NAMES[idx % MOCK_NAMES.len()].to_string(),
                pace_ms: rng.gen_range(0..900),
                laps: 0,
                total_ms: 0,
                sectors: Vec::new(),
                best_ms: None,
            })
            .collect();
        Self {
            state: Mutex::new(MockState {
                rng,
                karts,
                ticks: 0,
            }),
        }
    }

    fn next_snapshot(&self) -> LiveSnapshot {
        let mut state = self.state.lock();
        let MockState { rng, karts, ticks } = &mut *state;
        *ticks += 1;

        for kart in karts.iter_mut() {
            kart.sectors = MOCK_SECTOR_BASE_MS
                .iter()
                .map(|base| base + kart.pace_ms / 3 + rng.gen_range(0..600))
                .collect();
            let lap: u32 = kart.sectors.iter().sum();
            kart.laps += 1;
            kart.total_ms += u64::from(lap);
            kart.best_ms = Some(kart.best_ms.map_or(lap, |b| b.min(lap)));
        }

        let mut order: Vec<&MockKart> = karts.iter().collect();
        order.sort_by_key(|k| k.total_ms);
        let leader_ms = order.first().map_or(0, |k| k.total_ms);

        let drivers = order
            .iter()
            .enumerate()
            .map(|(idx, k)| DriverRow {
                position: idx as u32 + 1,
                kart: k.kart.clone(),
                name: k.name.clone(),
                sectors: k.sectors.iter().map(|&s| format_time(s)).collect(),
                last_lap: format_time(k.sectors.iter().sum()),
                best_lap: k.best_ms.map(format_time).unwrap_or_default(),
                gap: if idx == 0 {
                    String::new()
                } else {
                    format_time((k.total_ms - leader_ms) as u32)
                },
                laps: k.laps.to_string(),
            })
            .collect();

        let comments = (*ticks % 10 == 0).then(|| {
            vec![Comment {
                time: Utc::now().format("%H:%M:%S").to_string(),
                text: format!("Lap {} completed", ticks),
            }]
        });

        LiveSnapshot {
            status: Status::Connected,
            timestamp: Utc::now().timestamp_millis(),
            drivers,
            comments,
        }
    }
}

#[async_trait]
impl SnapshotSource for MockSource {
    async fn fetch(&self) -> Result<LiveSnapshot, SourceError> {
        Ok(self.next_snapshot())
    }

    fn describe(&self) -> String {
        format!("mock ({} karts)", self.state.lock().karts.len())
    }
}
