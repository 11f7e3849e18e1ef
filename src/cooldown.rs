//! Per-user generation cooldowns.
//!
//! Stored as user id → last successful generation, in fractional seconds
//! since the Unix epoch. Entries are overwritten, never removed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::persistence::{JsonFile, StoreError};

/// Last-use timestamps keyed by user id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cooldowns {
    last_use: BTreeMap<String, f64>,
}

impl Cooldowns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load for an update. Fails on a file that exists but isn't a
    /// cooldown document, so it is never overwritten.
    pub fn try_load(file: &JsonFile) -> Result<Self, StoreError> {
        file.try_load()
    }

    pub fn save(&self, file: &JsonFile) -> Result<(), StoreError> {
        file.save(self)
    }

    /// Time `user` still has to wait, or `None` if they may generate now.
    /// Never reports more than `window`, even if the clock went backwards.
    pub fn remaining(&self, user: &str, now: f64, window: Duration) -> Option<Duration> {
        let last = *self.last_use.get(user)?;
        let window_secs = window.as_secs_f64();
        let elapsed = now - last;
        if elapsed >= window_secs {
            return None;
        }
        Some(Duration::from_secs_f64(window_secs - elapsed.max(0.0)))
    }

    /// Record a successful generation by `user` at `now`.
    pub fn stamp(&mut self, user: &str, now: f64) {
        self.last_use.insert(user.to_string(), now);
    }

    pub fn last_use(&self, user: &str) -> Option<f64> {
        self.last_use.get(user).copied()
    }

    pub fn len(&self) -> usize {
        self.last_use.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_use.is_empty()
    }
}

/// Fractional seconds since the Unix epoch.
pub fn epoch_secs(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

/// Render a wait as `{minutes}m {seconds}s`, truncating fractions.
pub fn format_remaining(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    format!("{}m {}s", secs / 60, secs % 60)
}
