use super::BatchParser;
use crate::reading::{SensorReading, SpO2Reading};
use crate::vendor::{status, DataPoint, HealthTrackerType, ValueKey};

/// On-demand SpO2; the value is only meaningful once the status says completed
#[derive(Debug, Default)]
pub struct SpO2Parser;

impl BatchParser for SpO2Parser {
    const TRACKER_TYPE: HealthTrackerType = HealthTrackerType::Spo2OnDemand;
    const TAG: &'static str = "spo2";

    fn parse(&self, points: &[DataPoint]) -> SensorReading {
        let Some(point) = points.last() else {
            return SensorReading::SpO2(SpO2Reading {
                status: status::SPO2_CALCULATING,
                spo2: 0,
            });
        };

        let status = point.int(ValueKey::SpO2Status).unwrap_or_else(|e| {
            log::warn!(target: Self::TAG, "{}", e);
            status::SPO2_CALCULATING
        });
        let spo2 = if status == status::SPO2_MEASUREMENT_COMPLETED {
            point.int(ValueKey::SpO2).unwrap_or_else(|e| {
                log::warn!(target: Self::TAG, "{}", e);
                0
            })
        } else {
            if status == status::SPO2_DEVICE_MOVING || status == status::SPO2_LOW_SIGNAL {
                log::debug!(target: Self::TAG, "Measurement interrupted, status {}", status);
            }
            0
        };

        SensorReading::SpO2(SpO2Reading { status, spo2 })
    }
}
