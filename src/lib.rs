// Wearable health tracker core
// Connection lifecycle, per-sensor listeners and reading fan-out over a
// health tracking service

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod listener;
pub mod reading;
pub mod storage;
pub mod subject;
pub mod vendor;

#[cfg(test)]
mod testing;

pub use config::{EcgConfig, TrackerConfig};
pub use connection::{
    ConnectionErrorKind, ConnectionEvent, ConnectionObserver, ConnectionState, TrackerCapability,
    TrackerConnection,
};
pub use error::{TResult, TrackerError};
pub use handler::{Handler, Looper};
pub use listener::{
    BatchParser, EcgListener, EcgMeasurement, HeartRateListener, ListenerState, PpgListener,
    SensorListener, SkinTemperatureListener, SpO2Listener,
};
pub use reading::{
    EcgProgress, EcgReading, HeartRateReading, PpgReading, SensorReading, SkinTemperatureReading,
    SpO2Reading,
};
pub use storage::{PpgDataSaver, SessionSummary};
pub use subject::{ObserverId, TrackerDataSubject, TrackerObserver};
pub use vendor::{HealthTrackerType, TrackerErrorKind};
