//! Dashboard records kept in the key-value store: race history, saved drivers and the
//! order of dashboard panels.

use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

use crate::snapshot::{DriverRow, LiveSnapshot};
use crate::store::{KvStore, StoreError, load_json, save_json};

pub const RACE_HISTORY_KEY: &str = "race_history";
pub const SAVED_DRIVERS_KEY: &str = "saved_drivers";
pub const LAYOUT_ORDER_KEY: &str = "layout_order";

/// Oldest races are dropped past this many entries.
pub const MAX_HISTORY: usize = 50;

pub const DEFAULT_LAYOUT: [&str; 5] = ["leaderboard", "sectors", "ballast", "comments", "history"];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RaceRecord {
    pub id: String,
    pub circuit: String,
    /// Unix time in milliseconds, taken from the snapshot.
    pub recorded_at: i64,
    #[serde(default)]
    pub label: Option<String>,
    pub drivers: Vec<DriverRow>,
}

impl RaceRecord {
    pub fn from_snapshot(circuit: &str, snapshot: &LiveSnapshot, label: Option<String>) -> Self {
        Self {
            id: format!("{}-{}", circuit, snapshot.timestamp),
            circuit: circuit.to_string(),
            recorded_at: snapshot.timestamp,
            label,
            drivers: snapshot.drivers.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedDriver {
    pub name: String,
    /// Driver weight in kg, fed to the ballast calculator.
    pub weight: f64,
    #[serde(default)]
    pub kart: Option<String>,
}

#[derive(Debug, Error)]
pub enum RecordsError {
    /// The caller sent something the dashboard refuses to store.
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, RecordsError>;

fn invalid<T>(message: String) -> Result<T> {
    Err(RecordsError::Invalid(message))
}

/// Keeps the last entry for each id, in the order those entries appear, and trims the
/// oldest races past `MAX_HISTORY`.
fn normalize_history(races: &[RaceRecord]) -> Vec<RaceRecord> {
    let mut seen = HashSet::new();
    let mut kept: Vec<RaceRecord> = races
        .iter()
        .rev()
        .filter(|race| seen.insert(race.id.as_str()))
        .cloned()
        .collect();
    kept.truncate(MAX_HISTORY);
    kept.reverse();
    kept
}

pub struct Dashboard {
    store: Arc<dyn KvStore>,
}

impl Dashboard {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub fn history(&self) -> Vec<RaceRecord> {
        load_json(self.store.as_ref(), RACE_HISTORY_KEY)
    }

    /// Stores `races` as the whole history, deduplicated by id and capped like
    /// `record_race`. Returns what was stored.
    pub fn replace_history(&self, races: &[RaceRecord]) -> Result<Vec<RaceRecord>> {
        let races = normalize_history(races);
        save_json(self.store.as_ref(), RACE_HISTORY_KEY, &races)?;
        Ok(races)
    }

    /// Appends a race, replacing an existing entry with the same id and trimming to
    /// `MAX_HISTORY`.
    pub fn record_race(&self, race: RaceRecord) -> Result<Vec<RaceRecord>> {
        let mut races = self.history();
        races.retain(|r| r.id != race.id);
        info!("Recording race {} ({} drivers)", race.id, race.drivers.len());
        races.push(race);
        self.replace_history(&races)
    }

    pub fn clear_history(&self) -> Result<()> {
        self.store.remove(RACE_HISTORY_KEY)?;
        Ok(())
    }

    pub fn drivers(&self) -> Vec<SavedDriver> {
        load_json(self.store.as_ref(), SAVED_DRIVERS_KEY)
    }

    pub fn replace_drivers(&self, drivers: &[SavedDriver]) -> Result<()> {
        for driver in drivers {
            if driver.name.trim().is_empty() {
                return invalid("Saved driver name must not be empty".to_string());
            }
            if !driver.weight.is_finite() || driver.weight < 0.0 {
                return invalid(format!(
                    "Invalid weight {} for driver {}",
                    driver.weight, driver.name
                ));
            }
        }
        save_json(self.store.as_ref(), SAVED_DRIVERS_KEY, drivers)?;
        Ok(())
    }

    /// Panel order; the built-in order when nothing (or an empty list) is stored.
    pub fn layout(&self) -> Vec<String> {
        let stored: Vec<String> = load_json(self.store.as_ref(), LAYOUT_ORDER_KEY);
        if stored.is_empty() {
            DEFAULT_LAYOUT.iter().map(|p| p.to_string()).collect()
        } else {
            stored
        }
    }

    pub fn replace_layout(&self, order: &[String]) -> Result<()> {
        let mut seen = HashSet::new();
        for panel in order {
            if !seen.insert(panel.as_str()) {
                return invalid(format!("Panel {} appears twice in layout", panel));
            }
        }
        save_json(self.store.as_ref(), LAYOUT_ORDER_KEY, order)?;
        Ok(())
    }

    /// Moves the panel at `from` to index `to` (a drag-and-drop reorder) and persists it.
    pub fn move_panel(&self, from: usize, to: usize) -> Result<Vec<String>> {
        let mut order = self.layout();
        if from >= order.len() || to >= order.len() {
            return invalid(format!(
                "Panel move {} -> {} out of range for {} panels",
                from,
                to,
                order.len()
            ));
        }
        let panel = order.remove(from);
        order.insert(to, panel);
        self.replace_layout(&order)?;
        Ok(order)
    }
}
