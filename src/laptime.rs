//! Lap and sector time arithmetic.
//! Provider times arrive as strings like `1:02.345`, `32.456` or `32,456`.
//! They are only parsed here, for sector diffing; the table keeps the original text.

use serde::Serialize;

use crate::snapshot::LiveSnapshot;

/// Parses a provider time string into milliseconds. Returns `None` for blanks, markers
/// such as `-` or `PIT`, and times too large to fit in a `u32`.
pub fn parse_time(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let (minutes, rest) = match raw.split_once(':') {
        Some((m, s)) => (m.parse::<u32>().ok()?, s),
        None => (0, raw),
    };

    let rest = rest.replace(',', ".");
    let (secs, frac) = match rest.split_once('.') {
        Some((s, f)) => (s, f),
        None => (rest.as_str(), ""),
    };
    let secs: u32 = secs.parse().ok()?;
    if minutes > 0 && secs >= 60 {
        return None;
    }
    if !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    // Pad or truncate the fraction to milliseconds
    let millis = frac
        .chars()
        .chain(std::iter::repeat('0'))
        .take(3)
        .collect::<String>()
        .parse::<u32>()
        .ok()?;

    // Absurd provider values are treated like markers rather than wrapped
    minutes
        .checked_mul(60_000)?
        .checked_add(secs.checked_mul(1000)?)?
        .checked_add(millis)
}

/// Formats milliseconds as `m:ss.fff`, or `s.fff` under a minute.
pub fn format_time(millis: u32) -> String {
    let minutes = millis / 60_000;
    let secs = (millis % 60_000) / 1000;
    let frac = millis % 1000;
    if minutes > 0 {
        format!("{}:{:02}.{:03}", minutes, secs, frac)
    } else {
        format!("{}.{:03}", secs, frac)
    }
}

/// Formats a signed delta, e.g. `+0.123` or `-1.050`.
pub fn format_delta(delta_ms: i64) -> String {
    let sign = if delta_ms < 0 { '-' } else { '+' };
    let abs = delta_ms.unsigned_abs();
    format!("{}{}.{:03}", sign, abs / 1000, abs % 1000)
}

/// Per-driver gaps to the fastest current sector time in the field.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SectorDeltas {
    pub kart: String,
    pub name: String,
    /// `None` where the driver (or the whole field) has no time for that sector.
    pub deltas_ms: Vec<Option<i64>>,
    /// Sum of this driver's sector times when every sector is present and the sum fits.
    pub ideal_lap_ms: Option<u32>,
}

/// Fastest time for each sector index across all rows.
pub fn best_sectors(snapshot: &LiveSnapshot) -> Vec<Option<u32>> {
    let width = snapshot.drivers.iter().map(|d| d.sectors.len()).max().unwrap_or(0);
    let mut best = vec![None; width];
    for row in &snapshot.drivers {
        for (idx, raw) in row.sectors.iter().enumerate() {
            if let Some(ms) = parse_time(raw) {
                best[idx] = Some(best[idx].map_or(ms, |b: u32| b.min(ms)));
            }
        }
    }
    best
}

pub fn sector_deltas(snapshot: &LiveSnapshot) -> Vec<SectorDeltas> {
    let best = best_sectors(snapshot);
    snapshot
        .drivers
        .iter()
        .map(|row| {
            let parsed: Vec<Option<u32>> = (0..best.len())
                .map(|idx| row.sectors.get(idx).and_then(|s| parse_time(s)))
                .collect();
            let deltas_ms = parsed
                .iter()
                .zip(&best)
                .map(|(time, best)| match (time, best) {
                    (Some(t), Some(b)) => Some(i64::from(*t) - i64::from(*b)),
                    _ => None,
                })
                .collect();
            let ideal_lap_ms = if parsed.is_empty() {
                None
            } else {
                parsed
                    .iter()
                    .try_fold(0u32, |acc, time| acc.checked_add((*time)?))
            };
            SectorDeltas {
                kart: row.kart.clone(),
                name: row.name.clone(),
                deltas_ms,
                ideal_lap_ms,
            }
        })
        .collect()
}
