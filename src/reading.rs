use crate::vendor::HealthTrackerType;
use serde::{Deserialize, Serialize};

/// Averaged ECG batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EcgReading {
    pub average_millivolts: f32,
    /// Electrode had no skin contact; the average is not meaningful
    pub lead_off: bool,
    pub sample_count: usize,
}

impl EcgReading {
    pub fn is_valid(&self) -> bool {
        !self.lead_off && self.sample_count > 0
    }
}

/// PPG channels for one batch, one entry per sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PpgReading {
    pub green: Vec<i32>,
    pub ir: Vec<i32>,
    pub red: Vec<i32>,
    pub timestamp: i64,
    pub status: i32,
}

impl PpgReading {
    pub fn empty(timestamp: i64) -> Self {
        Self {
            green: Vec::new(),
            ir: Vec::new(),
            red: Vec::new(),
            timestamp,
            status: 0,
        }
    }

    /// Length of the longest channel
    pub fn max_len(&self) -> usize {
        self.green.len().max(self.ir.len()).max(self.red.len())
    }

    pub fn is_empty(&self) -> bool {
        self.max_len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkinTemperatureReading {
    pub status: i32,
    pub ambient_celsius: f32,
    pub wrist_celsius: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpO2Reading {
    pub status: i32,
    pub spo2: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartRateReading {
    pub status: i32,
    pub heart_rate: i32,
    /// Latest inter-beat interval in ms
    pub ibi: i32,
    /// 0 good, 1 bad
    pub ibi_quality: i32,
}

impl HeartRateReading {
    pub const IBI_QUALITY_SHIFT: u32 = 15;
    pub const IBI_MASK: i32 = 0x7FFF;

    /// Quality bit packed above the interval
    pub fn hr_ibi(&self) -> i32 {
        (self.ibi_quality << Self::IBI_QUALITY_SHIFT) | (self.ibi & Self::IBI_MASK)
    }
}

/// One reading per delivered batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sensor", rename_all = "snake_case")]
pub enum SensorReading {
    Ecg(EcgReading),
    Ppg(PpgReading),
    SkinTemperature(SkinTemperatureReading),
    #[serde(rename = "spo2")]
    SpO2(SpO2Reading),
    HeartRate(HeartRateReading),
}

impl SensorReading {
    pub fn tracker_type(&self) -> HealthTrackerType {
        match self {
            SensorReading::Ecg(_) => HealthTrackerType::EcgOnDemand,
            SensorReading::Ppg(_) => HealthTrackerType::PpgContinuous,
            SensorReading::SkinTemperature(_) => HealthTrackerType::SkinTemperatureOnDemand,
            SensorReading::SpO2(_) => HealthTrackerType::Spo2OnDemand,
            SensorReading::HeartRate(_) => HealthTrackerType::HeartRateContinuous,
        }
    }

    pub fn as_ecg(&self) -> Option<&EcgReading> {
        match self {
            SensorReading::Ecg(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_ppg(&self) -> Option<&PpgReading> {
        match self {
            SensorReading::Ppg(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_skin_temperature(&self) -> Option<&SkinTemperatureReading> {
        match self {
            SensorReading::SkinTemperature(r) => Some(r),
            _ => None,
        }
    }
}

/// Progress of a timed ECG measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EcgProgress {
    LeadOff { seconds_left: u64 },
    Measuring { seconds_left: u64, average_millivolts: f32 },
    Completed { average_millivolts: f32 },
    Failed,
}

impl EcgProgress {
    pub fn is_final(&self) -> bool {
        matches!(self, EcgProgress::Completed { .. } | EcgProgress::Failed)
    }
}
