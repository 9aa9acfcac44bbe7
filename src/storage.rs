use crate::error::{TResult, TrackerError};
use crate::reading::{PpgReading, SensorReading};
use crate::vendor::{HealthTrackerType, TrackerErrorKind};
use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const PPG_CSV_HEADER: &str = "Timestamp,Status,PPG_Green,PPG_IR,PPG_Red";

/// One row per sample index; shorter channels are zero-filled
pub fn write_ppg_csv<W: Write>(out: &mut W, readings: &[PpgReading]) -> std::io::Result<usize> {
    writeln!(out, "{}", PPG_CSV_HEADER)?;
    let mut rows = 0;
    for reading in readings {
        let at = |channel: &[i32], i: usize| channel.get(i).copied().unwrap_or(0);
        for i in 0..reading.max_len() {
            writeln!(
                out,
                "{},{},{},{},{}",
                reading.timestamp,
                reading.status,
                at(&reading.green, i),
                at(&reading.ir, i),
                at(&reading.red, i)
            )?;
            rows += 1;
        }
    }
    Ok(rows)
}

/// Accumulates PPG readings until they are written out as CSV
pub struct PpgDataSaver {
    dir: PathBuf,
    readings: Vec<PpgReading>,
}

impl PpgDataSaver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        PpgDataSaver {
            dir: dir.into(),
            readings: Vec::new(),
        }
    }

    pub fn add_ppg_data(&mut self, reading: PpgReading) {
        self.readings.push(reading);
        log::debug!("PPG data added, {} readings buffered", self.readings.len());
    }

    pub fn data_count(&self) -> usize {
        self.readings.len()
    }

    pub fn clear(&mut self) {
        self.readings.clear();
        log::info!("PPG data cleared");
    }

    /// Write `ppg_data_<yyyyMMdd_HHmmss>.csv` and clear the buffer.
    ///
    /// `Ok(None)` when nothing was buffered. The buffer is kept on error.
    pub fn save_to_file(&mut self) -> TResult<Option<PathBuf>> {
        if self.readings.is_empty() {
            log::warn!("No PPG data to save");
            return Ok(None);
        }

        fs::create_dir_all(&self.dir)?;
        let name = format!("ppg_data_{}.csv", Local::now().format("%Y%m%d_%H%M%S"));
        let path = self.dir.join(name);

        let mut out = BufWriter::new(File::create(&path)?);
        let rows = write_ppg_csv(&mut out, &self.readings)?;
        out.flush()?;

        log::info!(
            "PPG data saved to {} ({} readings, {} rows)",
            path.display(),
            self.readings.len(),
            rows
        );
        self.readings.clear();
        Ok(Some(path))
    }
}

/// Per-run summary written next to the CSV export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub start_time: String,
    pub tracker: HealthTrackerType,
    pub readings: u64,
    pub errors: Vec<TrackerErrorKind>,
    pub last_reading: Option<SensorReading>,
    pub ppg_file: Option<PathBuf>,
}

impl SessionSummary {
    pub fn new(tracker: HealthTrackerType) -> Self {
        let now = Utc::now();
        SessionSummary {
            session_id: format!("session_{}", now.timestamp_millis()),
            start_time: now.to_rfc3339(),
            tracker,
            readings: 0,
            errors: Vec::new(),
            last_reading: None,
            ppg_file: None,
        }
    }

    pub fn record(&mut self, reading: &SensorReading) {
        self.readings += 1;
        self.last_reading = Some(reading.clone());
    }

    pub fn record_error(&mut self, error: TrackerErrorKind) {
        self.errors.push(error);
    }

    pub fn to_json(&self) -> TResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| TrackerError::Storage(format!("Failed to serialize summary: {}", e)))
    }

    /// Write `<session_id>.json` into `dir`
    pub fn save(&self, dir: &Path) -> TResult<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.json", self.session_id));
        fs::write(&path, self.to_json()?)?;
        log::info!("Session summary saved to {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::SpO2Reading;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "health_tracker_{}_{}_{}",
            name,
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_csv_rows_are_zero_filled() {
        let reading = PpgReading {
            green: vec![1, 2, 3],
            ir: vec![10],
            red: vec![],
            timestamp: 42,
            status: 1,
        };
        let mut out = Vec::new();
        let rows = write_ppg_csv(&mut out, &[reading, PpgReading::empty(43)]).unwrap();

        assert_eq!(rows, 3);
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![PPG_CSV_HEADER, "42,1,1,10,0", "42,1,2,0,0", "42,1,3,0,0"]
        );
    }

    #[test]
    fn test_save_writes_and_clears() {
        let dir = scratch_dir("ppg");
        let mut saver = PpgDataSaver::new(&dir);
        assert_eq!(saver.save_to_file().unwrap(), None);

        saver.add_ppg_data(PpgReading {
            green: vec![5],
            ir: vec![6],
            red: vec![7],
            timestamp: 1,
            status: 0,
        });
        assert_eq!(saver.data_count(), 1);

        let path = saver.save_to_file().unwrap().unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("ppg_data_") && name.ends_with(".csv"));
        assert_eq!(name.len(), "ppg_data_20240101_120000.csv".len());
        assert_eq!(saver.data_count(), 0);

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, format!("{}\n1,0,5,6,7\n", PPG_CSV_HEADER));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_summary_json() {
        let dir = scratch_dir("summary");
        let mut summary = SessionSummary::new(HealthTrackerType::Spo2OnDemand);
        summary.record(&SensorReading::SpO2(SpO2Reading { status: 2, spo2: 97 }));
        summary.record_error(TrackerErrorKind::PermissionError);

        let path = summary.save(&dir).unwrap();
        let back: SessionSummary = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(back.readings, 1);
        assert_eq!(back.tracker, HealthTrackerType::Spo2OnDemand);
        assert_eq!(back.errors, vec![TrackerErrorKind::PermissionError]);
        assert_eq!(back.last_reading, summary.last_reading);
        let _ = fs::remove_dir_all(&dir);
    }
}
