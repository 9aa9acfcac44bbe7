use super::{BatchParser, SensorListener};
use crate::reading::{SensorReading, SkinTemperatureReading};
use crate::vendor::{status, DataPoint, HealthTrackerType, ValueKey};

#[derive(Debug, Default)]
pub struct SkinTemperatureParser;

impl SkinTemperatureParser {
    pub fn parse_point(&self, point: &DataPoint) -> SkinTemperatureReading {
        let status = match point.int(ValueKey::SkinTemperatureStatus) {
            Ok(status) => status,
            Err(e) => {
                log::warn!(target: Self::TAG, "{}", e);
                status::SKIN_TEMPERATURE_INVALID_MEASUREMENT
            }
        };

        let mut reading = SkinTemperatureReading {
            status,
            ambient_celsius: 0.0,
            wrist_celsius: 0.0,
        };
        if status != status::SKIN_TEMPERATURE_SUCCESSFUL_MEASUREMENT {
            return reading;
        }

        match (
            point.float(ValueKey::AmbientTemperature),
            point.float(ValueKey::ObjectTemperature),
        ) {
            (Ok(ambient), Ok(wrist)) => {
                reading.ambient_celsius = ambient;
                reading.wrist_celsius = wrist;
            }
            (Err(e), _) | (_, Err(e)) => {
                log::warn!(target: Self::TAG, "Incomplete measurement: {}", e);
            }
        }
        reading
    }
}

impl BatchParser for SkinTemperatureParser {
    const TRACKER_TYPE: HealthTrackerType = HealthTrackerType::SkinTemperatureOnDemand;
    const TAG: &'static str = "skin_temperature";

    fn parse(&self, points: &[DataPoint]) -> SensorReading {
        let reading = match points.last() {
            Some(point) => self.parse_point(point),
            None => SkinTemperatureReading {
                status: status::SKIN_TEMPERATURE_INVALID_MEASUREMENT,
                ambient_celsius: 0.0,
                wrist_celsius: 0.0,
            },
        };
        SensorReading::SkinTemperature(reading)
    }
}

impl SensorListener<SkinTemperatureParser> {
    /// Deliver the reading for a single data point
    pub fn update_skin_temperature(&self, point: &DataPoint) -> SensorReading {
        let reading = SensorReading::SkinTemperature(self.parser().parse_point(point));
        self.shared.subject.notify_reading(&reading);
        reading
    }
}
