//! Per-sensor listeners.
//!
//! A `SensorListener` registers an event sink on one vendor tracker,
//! hops every event onto its looper handler, parses data batches with
//! the sensor's `BatchParser` and hands the reading to the subject.

pub mod ecg;
mod heart_rate;
mod ppg;
mod skin_temperature;
mod spo2;

pub use ecg::{EcgMeasurement, EcgParser, EcgWindow};
pub use heart_rate::HeartRateParser;
pub use ppg::PpgParser;
pub use skin_temperature::SkinTemperatureParser;
pub use spo2::SpO2Parser;

use crate::connection::TrackerConnection;
use crate::error::TResult;
use crate::handler::{Handler, Looper};
use crate::reading::SensorReading;
use crate::subject::TrackerDataSubject;
use crate::vendor::{DataPoint, EventSink, HealthTracker, HealthTrackerType, TrackerEvent};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub type EcgListener = SensorListener<EcgParser>;
pub type PpgListener = SensorListener<PpgParser>;
pub type SkinTemperatureListener = SensorListener<SkinTemperatureParser>;
pub type SpO2Listener = SensorListener<SpO2Parser>;
pub type HeartRateListener = SensorListener<HeartRateParser>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ListenerState {
    Idle,
    Registered,
    Receiving,
    Unregistered,
}

/// Turns one raw batch into a reading. Must not panic on malformed input.
pub trait BatchParser: Send + Sync + 'static {
    const TRACKER_TYPE: HealthTrackerType;
    /// Log target
    const TAG: &'static str;

    /// Called with a non-empty batch
    fn parse(&self, points: &[DataPoint]) -> SensorReading;
}

struct ListenerShared<P: BatchParser> {
    parser: P,
    tracker: Arc<dyn HealthTracker>,
    subject: Arc<TrackerDataSubject>,
    handler: Handler,
    running: AtomicBool,
    /// Bumped on every start and stop; events carry the value current at registration
    registration: AtomicU64,
    state: Mutex<ListenerState>,
    batches: AtomicU64,
}

impl<P: BatchParser> ListenerShared<P> {
    fn state(&self) -> MutexGuard<'_, ListenerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, token: u64) -> bool {
        self.running.load(Ordering::SeqCst) && self.registration.load(Ordering::SeqCst) == token
    }

    fn handle_event(&self, token: u64, event: TrackerEvent) {
        if !self.is_current(token) {
            log::debug!(target: P::TAG, "Dropping event from stale registration {}", token);
            return;
        }

        match event {
            TrackerEvent::DataBatch(points) => {
                {
                    let mut state = self.state();
                    if *state == ListenerState::Registered {
                        *state = ListenerState::Receiving;
                    }
                }
                self.process(&points);
            }
            TrackerEvent::FlushCompleted => {
                log::debug!(target: P::TAG, "Flush completed");
            }
            TrackerEvent::Error(kind) => {
                log::error!(target: P::TAG, "Tracker reported {:?}", kind);
                self.subject.notify_error(kind);
            }
        }
    }

    fn process(&self, points: &[DataPoint]) -> Option<SensorReading> {
        if points.is_empty() {
            log::debug!(target: P::TAG, "Ignoring empty batch");
            return None;
        }
        let reading = self.parser.parse(points);
        self.batches.fetch_add(1, Ordering::Relaxed);
        log::trace!(target: P::TAG, "{} points -> {:?}", points.len(), reading);
        self.subject.notify_reading(&reading);
        Some(reading)
    }
}

pub struct SensorListener<P: BatchParser> {
    shared: Arc<ListenerShared<P>>,
}

impl<P: BatchParser> SensorListener<P> {
    pub fn new(
        parser: P,
        tracker: Arc<dyn HealthTracker>,
        subject: Arc<TrackerDataSubject>,
        looper: &Looper,
    ) -> Self {
        SensorListener {
            shared: Arc::new(ListenerShared {
                parser,
                tracker,
                subject,
                handler: looper.handler(),
                running: AtomicBool::new(false),
                registration: AtomicU64::new(0),
                state: Mutex::new(ListenerState::Idle),
                batches: AtomicU64::new(0),
            }),
        }
    }

    /// Listener bound to the connection's tracker for `P::TRACKER_TYPE`
    pub fn attach(
        connection: &TrackerConnection,
        subject: Arc<TrackerDataSubject>,
        looper: &Looper,
    ) -> TResult<Self>
    where
        P: Default,
    {
        let tracker = connection.tracker(P::TRACKER_TYPE)?;
        Ok(Self::new(P::default(), tracker, subject, looper))
    }

    /// Register with the tracker. Returns false if already running.
    pub fn start(&self) -> bool {
        let shared = &self.shared;
        if shared
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::debug!(target: P::TAG, "Already started");
            return false;
        }

        let token = shared.registration.fetch_add(1, Ordering::SeqCst) + 1;
        *shared.state() = ListenerState::Registered;

        let weak = Arc::downgrade(shared);
        let handler = shared.handler.clone();
        let sink = EventSink::new(move |event| {
            let weak = weak.clone();
            handler.post(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.handle_event(token, event);
                }
            });
        });

        let weak = Arc::downgrade(shared);
        shared.handler.post(move || {
            if let Some(shared) = weak.upgrade() {
                if shared.is_current(token) {
                    shared.tracker.set_event_listener(sink);
                }
            }
        });

        log::info!(target: P::TAG, "Listener started");
        true
    }

    /// Unregister and cancel pending work. Safe in any state.
    ///
    /// Off the looper thread nothing reaches the subject after this returns.
    pub fn stop(&self) {
        let shared = &self.shared;
        let was_running = shared.running.swap(false, Ordering::SeqCst);
        shared.registration.fetch_add(1, Ordering::SeqCst);
        shared.handler.remove_callbacks_and_messages();
        if was_running {
            shared.tracker.unset_event_listener();
            log::info!(target: P::TAG, "Listener stopped");
        }
        *shared.state() = ListenerState::Unregistered;
    }

    /// Parse `points` and deliver the reading. `None` for an empty batch.
    pub fn process(&self, points: &[DataPoint]) -> Option<SensorReading> {
        self.shared.process(points)
    }

    /// Ask the tracker to deliver buffered data
    pub fn flush(&self) {
        if self.is_running() {
            self.shared.tracker.flush();
        }
    }

    /// Block until events already queued for this listener are handled
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.shared.handler.flush(timeout)
    }

    /// Run `task` on this listener's handler. Dropped by a later `stop()`.
    pub(crate) fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.handler.post(task)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ListenerState {
        *self.shared.state()
    }

    pub fn batches_received(&self) -> u64 {
        self.shared.batches.load(Ordering::Relaxed)
    }

    pub fn parser(&self) -> &P {
        &self.shared.parser
    }

    pub fn tracker_type(&self) -> HealthTrackerType {
        P::TRACKER_TYPE
    }
}

impl<P: BatchParser> Drop for SensorListener<P> {
    fn drop(&mut self) {
        self.stop();
    }
}
