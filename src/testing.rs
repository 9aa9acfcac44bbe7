//! Shared fixtures for unit tests.

use crate::connection::{ConnectionEvent, ConnectionState, TrackerConnection};
use crate::reading::{EcgProgress, SensorReading};
use crate::subject::TrackerObserver;
use crate::vendor::sim::SimulatedService;
use crate::vendor::TrackerErrorKind;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub const WAIT: Duration = Duration::from_secs(2);

#[derive(Default)]
pub struct RecordingObserver {
    readings: Mutex<Vec<SensorReading>>,
    errors: Mutex<Vec<TrackerErrorKind>>,
    progress: Mutex<Vec<EcgProgress>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn readings(&self) -> Vec<SensorReading> {
        self.readings.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<TrackerErrorKind> {
        self.errors.lock().unwrap().clone()
    }

    pub fn progress(&self) -> Vec<EcgProgress> {
        self.progress.lock().unwrap().clone()
    }
}

impl TrackerObserver for RecordingObserver {
    fn on_reading(&self, reading: &SensorReading) {
        self.readings.lock().unwrap().push(reading.clone());
    }

    fn on_tracker_error(&self, error: TrackerErrorKind) {
        self.errors.lock().unwrap().push(error);
    }

    fn on_ecg_progress(&self, progress: &EcgProgress) {
        self.progress.lock().unwrap().push(progress.clone());
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Connection to `service` that has already reached `Connected`
pub fn connected(service: Arc<SimulatedService>) -> TrackerConnection {
    let connection = TrackerConnection::new(service, Arc::new(|_: &ConnectionEvent| {}));
    connection.connect().unwrap();
    assert!(wait_until(WAIT, || connection.state() == ConnectionState::Connected));
    connection
}
