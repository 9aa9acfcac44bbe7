use super::BatchParser;
use crate::reading::{PpgReading, SensorReading};
use crate::vendor::{ChannelValue, DataPoint, HealthTrackerType, ValueKey};

const CURRENT_LAYOUT: [ValueKey; 3] = [ValueKey::PpgGreen, ValueKey::PpgIr, ValueKey::PpgRed];

/// Multi-channel PPG. Falls back to the legacy green-only layout, then
/// to empty channels.
#[derive(Debug, Default)]
pub struct PpgParser;

impl PpgParser {
    /// Reading for one data point. Never fails.
    pub fn parse_point(&self, point: &DataPoint) -> PpgReading {
        if CURRENT_LAYOUT.iter().any(|key| point.contains(*key)) {
            let channel = |key| ChannelValue::parse(key, point.value(key)).flatten();
            return PpgReading {
                green: channel(ValueKey::PpgGreen),
                ir: channel(ValueKey::PpgIr),
                red: channel(ValueKey::PpgRed),
                timestamp: point.timestamp,
                status: 0,
            };
        }

        if point.contains(ValueKey::LegacyPpgGreen) && point.contains(ValueKey::LegacyPpgStatus) {
            let green =
                ChannelValue::parse(ValueKey::LegacyPpgGreen, point.value(ValueKey::LegacyPpgGreen));
            match point.int(ValueKey::LegacyPpgStatus) {
                Ok(status) => {
                    return PpgReading {
                        green: green.flatten(),
                        ir: Vec::new(),
                        red: Vec::new(),
                        timestamp: point.timestamp,
                        status,
                    }
                }
                Err(e) => log::warn!(target: Self::TAG, "Legacy layout unusable: {}", e),
            }
        } else {
            log::debug!(target: Self::TAG, "No PPG channels at {}", point.timestamp);
        }

        PpgReading::empty(point.timestamp)
    }
}

impl BatchParser for PpgParser {
    const TRACKER_TYPE: HealthTrackerType = HealthTrackerType::PpgContinuous;
    const TAG: &'static str = "ppg";

    fn parse(&self, points: &[DataPoint]) -> SensorReading {
        let mut batch: Option<PpgReading> = None;
        for point in points {
            let reading = self.parse_point(point);
            match batch.as_mut() {
                None => batch = Some(reading),
                Some(acc) => {
                    acc.green.extend(reading.green);
                    acc.ir.extend(reading.ir);
                    acc.red.extend(reading.red);
                }
            }
        }
        SensorReading::Ppg(batch.unwrap_or_else(|| PpgReading::empty(0)))
    }
}
