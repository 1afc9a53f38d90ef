use crate::error::EngineError;
use crate::position::{Tempo, TimeSignature, TimeSignatureMap};
use crate::transport::TransportSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

pub const GRAPH_PROFILE_ENV: &str = "CADENZA_GRAPH_PROFILE";
pub const THREADS_ENV: &str = "CADENZA_THREADS";
const MAX_DEFAULT_THREADS: usize = 16;

pub fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let s = v.trim().to_ascii_lowercase();
            s == "1" || s == "true" || s == "yes" || s == "on"
        })
        .unwrap_or(false)
}

fn env_usize(key: &str) -> Option<usize> {
    let value = std::env::var(key).ok()?;
    match value.trim().parse::<usize>() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a number", key, value);
            None
        }
    }
}

/// Engine settings, read from TOML. Every field has a default so a partial
/// file is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    /// Worker count. `None` picks one per core.
    pub max_threads: Option<usize>,
    /// SCHED_FIFO priority for graph workers. `None` leaves them at the
    /// default policy.
    pub realtime_priority: Option<i32>,
    pub bpm: f64,
    pub beats_per_bar: u32,
    pub beat_unit: u32,
    pub drop_unconnected_hw: bool,
    pub transport: TransportSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            block_size: 256,
            max_threads: None,
            realtime_priority: None,
            bpm: 120.0,
            beats_per_bar: 4,
            beat_unit: 4,
            drop_unconnected_hw: true,
            transport: TransportSettings::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, EngineError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// `CADENZA_THREADS` wins over the file, which wins over the core count.
    pub fn worker_threads(&self) -> usize {
        env_usize(THREADS_ENV)
            .or(self.max_threads)
            .unwrap_or_else(|| num_cpus::get().min(MAX_DEFAULT_THREADS))
            .max(1)
    }

    pub fn tempo(&self) -> Tempo {
        Tempo::new(self.bpm, self.sample_rate)
    }

    pub fn time_signatures(&self) -> TimeSignatureMap {
        TimeSignatureMap::new(TimeSignature::new(self.beats_per_bar, self.beat_unit))
    }
}
