use super::BatchParser;
use crate::reading::{HeartRateReading, SensorReading};
use crate::vendor::{status, DataPoint, HealthTrackerType, ValueKey};

/// Continuous heart rate with the latest inter-beat interval
#[derive(Debug, Default)]
pub struct HeartRateParser;

impl HeartRateParser {
    fn last_of(point: &DataPoint, key: ValueKey) -> Option<i32> {
        point.int_list(key).ok().and_then(|list| list.last().copied())
    }
}

impl BatchParser for HeartRateParser {
    const TRACKER_TYPE: HealthTrackerType = HealthTrackerType::HeartRateContinuous;
    const TAG: &'static str = "heart_rate";

    fn parse(&self, points: &[DataPoint]) -> SensorReading {
        let Some(point) = points.last() else {
            return SensorReading::HeartRate(HeartRateReading {
                status: status::HR_STATUS_NONE,
                heart_rate: 0,
                ibi: 0,
                ibi_quality: 1,
            });
        };

        let status = point.int(ValueKey::HeartRateStatus).unwrap_or(status::HR_STATUS_NONE);
        let heart_rate = point.int(ValueKey::HeartRate).unwrap_or_else(|e| {
            log::warn!(target: Self::TAG, "{}", e);
            0
        });

        SensorReading::HeartRate(HeartRateReading {
            status,
            heart_rate,
            ibi: Self::last_of(point, ValueKey::IbiList).unwrap_or(0),
            ibi_quality: Self::last_of(point, ValueKey::IbiStatusList).unwrap_or(1),
        })
    }
}
