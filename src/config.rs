use crate::error::{TResult, TrackerError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ─── ECG measurement ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EcgConfig {
    /// Length of one measurement window
    pub duration_ms: u64,
    /// Progress report interval
    pub tick_ms: u64,
    /// No progress is reported before this
    pub warmup_ms: u64,
}

impl Default for EcgConfig {
    fn default() -> Self {
        EcgConfig {
            duration_ms: 30_000,
            tick_ms: 1_000,
            warmup_ms: 2_000,
        }
    }
}

impl EcgConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }
}

// ─── Tracker session ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub ecg: EcgConfig,
    /// Where CSV exports and session summaries are written
    pub output_dir: PathBuf,
    /// Interval between simulated batches
    pub feed_interval_ms: u64,
    /// Samples per simulated batch
    pub batch_size: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            ecg: EcgConfig::default(),
            output_dir: PathBuf::from("health_tracker_sessions"),
            feed_interval_ms: 200,
            batch_size: 25,
        }
    }
}

impl TrackerConfig {
    pub fn load(path: &Path) -> TResult<Self> {
        let json = fs::read_to_string(path)
            .map_err(|e| TrackerError::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_json(&json)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_json(json: &str) -> TResult<Self> {
        let config: TrackerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TResult<()> {
        if self.ecg.tick_ms == 0 {
            return Err(TrackerError::Config("ecg.tick_ms must be positive".into()));
        }
        if self.ecg.duration_ms < self.ecg.tick_ms {
            return Err(TrackerError::Config(
                "ecg.duration_ms must be at least one tick".into(),
            ));
        }
        if self.ecg.warmup_ms >= self.ecg.duration_ms {
            return Err(TrackerError::Config(
                "ecg.warmup_ms must be shorter than the measurement".into(),
            ));
        }
        if self.feed_interval_ms == 0 || self.batch_size == 0 {
            return Err(TrackerError::Config(
                "feed_interval_ms and batch_size must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn feed_interval(&self) -> Duration {
        Duration::from_millis(self.feed_interval_ms)
    }
}
