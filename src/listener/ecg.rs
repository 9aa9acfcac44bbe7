//! ECG batch averaging and the timed measurement built on top of it.

use super::{BatchParser, EcgListener};
use crate::config::EcgConfig;
use crate::error::{TResult, TrackerError};
use crate::reading::{EcgProgress, EcgReading, SensorReading};
use crate::subject::TrackerDataSubject;
use crate::vendor::{status, DataPoint, HealthTrackerType, ValueKey};
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Accumulated state of the current measurement window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EcgWindow {
    /// Latest batch was lead-off, or no batch has arrived yet
    pub lead_off: bool,
    pub sample_count: usize,
    pub valid_batches: usize,
    /// Mean of every valid sample in the window
    pub running_average: f32,
}

#[derive(Debug)]
struct WindowState {
    lead_off: bool,
    sample_count: usize,
    valid_batches: usize,
    millivolt_sum: f64,
}

impl WindowState {
    fn new() -> Self {
        WindowState {
            lead_off: true,
            sample_count: 0,
            valid_batches: 0,
            millivolt_sum: 0.0,
        }
    }
}

#[derive(Debug)]
pub struct EcgParser {
    window: Mutex<WindowState>,
}

impl Default for EcgParser {
    fn default() -> Self {
        EcgParser {
            window: Mutex::new(WindowState::new()),
        }
    }
}

impl EcgParser {
    fn window(&self) -> MutexGuard<'_, WindowState> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reset(&self) {
        *self.window() = WindowState::new();
    }

    pub fn snapshot(&self) -> EcgWindow {
        let w = self.window();
        let running_average = if w.sample_count > 0 {
            (w.millivolt_sum / w.sample_count as f64) as f32
        } else {
            0.0
        };
        EcgWindow {
            lead_off: w.lead_off,
            sample_count: w.sample_count,
            valid_batches: w.valid_batches,
            running_average,
        }
    }
}

impl BatchParser for EcgParser {
    const TRACKER_TYPE: HealthTrackerType = HealthTrackerType::EcgOnDemand;
    const TAG: &'static str = "ecg";

    fn parse(&self, points: &[DataPoint]) -> SensorReading {
        let lead_off = points
            .iter()
            .any(|p| matches!(p.int(ValueKey::EcgLeadOff), Ok(status::LEAD_OFF_NO_CONTACT)));

        if lead_off {
            log::debug!(target: Self::TAG, "Lead off in batch of {}", points.len());
            self.window().lead_off = true;
            return SensorReading::Ecg(EcgReading {
                average_millivolts: 0.0,
                lead_off: true,
                sample_count: 0,
            });
        }

        let mut sum = 0.0f64;
        let mut count = 0usize;
        for point in points {
            match point.float(ValueKey::EcgMv) {
                Ok(mv) => {
                    sum += mv as f64;
                    count += 1;
                }
                Err(e) => log::warn!(target: Self::TAG, "Skipping sample at {}: {}", point.timestamp, e),
            }
        }

        if count == 0 {
            return SensorReading::Ecg(EcgReading {
                average_millivolts: 0.0,
                lead_off: false,
                sample_count: 0,
            });
        }

        {
            let mut window = self.window();
            window.lead_off = false;
            window.sample_count += count;
            window.valid_batches += 1;
            window.millivolt_sum += sum;
        }

        SensorReading::Ecg(EcgReading {
            average_millivolts: (sum / count as f64) as f32,
            lead_off: false,
            sample_count: count,
        })
    }
}

struct Countdown {
    cancel: Sender<()>,
    join: JoinHandle<()>,
}

impl Countdown {
    /// The countdown thread never waits on the looper
    fn finish(self) {
        let _ = self.cancel.send(());
        if self.join.thread().id() != thread::current().id() {
            let _ = self.join.join();
        }
    }
}

/// Report the result of run `epoch` unless it was cancelled or superseded.
/// Runs on the listener's looper, serialized with observer callbacks.
fn complete_measurement(
    listener: &EcgListener,
    subject: &TrackerDataSubject,
    run: &AtomicU64,
    measuring: &AtomicBool,
    epoch: u64,
) {
    if run.load(Ordering::SeqCst) != epoch
        || measuring
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
    {
        return;
    }

    listener.stop();
    let window = listener.parser().snapshot();
    let result = if window.valid_batches > 0 {
        log::info!(
            target: "ecg",
            "Measurement complete: {:.3} mV over {} samples",
            window.running_average,
            window.sample_count
        );
        EcgProgress::Completed {
            average_millivolts: window.running_average,
        }
    } else {
        log::warn!(target: "ecg", "Measurement failed: no contact during window");
        EcgProgress::Failed
    };
    subject.notify_ecg_progress(&result);
}

/// Timed ECG measurement: progress every tick, one final result.
///
/// Progress is reported from the countdown thread. The final result is
/// posted to the listener's looper so that it cannot race a `cancel()`
/// issued from an observer.
pub struct EcgMeasurement {
    listener: Arc<EcgListener>,
    subject: Arc<TrackerDataSubject>,
    config: EcgConfig,
    measuring: Arc<AtomicBool>,
    /// Bumped by every start and cancel
    run: Arc<AtomicU64>,
    countdown: Mutex<Option<Countdown>>,
}

impl EcgMeasurement {
    pub fn new(listener: Arc<EcgListener>, subject: Arc<TrackerDataSubject>, config: EcgConfig) -> Self {
        EcgMeasurement {
            listener,
            subject,
            config,
            measuring: Arc::new(AtomicBool::new(false)),
            run: Arc::new(AtomicU64::new(0)),
            countdown: Mutex::new(None),
        }
    }

    /// Returns false if a measurement is already running
    pub fn start(&self) -> TResult<bool> {
        if self
            .measuring
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(false);
        }
        let epoch = self.run.fetch_add(1, Ordering::SeqCst) + 1;

        // A previous countdown has already posted its result; reap it
        let previous = self.countdown().take();
        if let Some(previous) = previous {
            previous.finish();
        }

        self.listener.parser().reset();
        self.listener.start();

        let (cancel_tx, cancel_rx) = channel::bounded::<()>(1);
        let listener = Arc::clone(&self.listener);
        let subject = Arc::clone(&self.subject);
        let measuring = Arc::clone(&self.measuring);
        let run = Arc::clone(&self.run);
        let config = self.config;

        let spawned = thread::Builder::new()
            .name("ecg-countdown".to_string())
            .spawn(move || {
                let started = Instant::now();
                loop {
                    match cancel_rx.recv_timeout(config.tick()) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                            log::debug!(target: "ecg", "Countdown stopped");
                            return;
                        }
                    }

                    let elapsed = started.elapsed();
                    if elapsed >= config.duration() {
                        break;
                    }
                    if elapsed < config.warmup() {
                        continue;
                    }

                    let seconds_left = (config.duration() - elapsed).as_secs_f64().ceil() as u64;
                    let window = listener.parser().snapshot();
                    let progress = if window.lead_off || window.valid_batches == 0 {
                        EcgProgress::LeadOff { seconds_left }
                    } else {
                        EcgProgress::Measuring {
                            seconds_left,
                            average_millivolts: window.running_average,
                        }
                    };
                    subject.notify_ecg_progress(&progress);
                }

                let posted = {
                    let (target, subject, run, measuring) = (
                        Arc::clone(&listener),
                        Arc::clone(&subject),
                        Arc::clone(&run),
                        Arc::clone(&measuring),
                    );
                    listener.post(move || {
                        complete_measurement(&target, &subject, &run, &measuring, epoch)
                    })
                };
                if !posted {
                    log::debug!(target: "ecg", "Looper gone, completing on countdown thread");
                    complete_measurement(&listener, &subject, &run, &measuring, epoch);
                }
            });

        match spawned {
            Ok(join) => {
                *self.countdown() = Some(Countdown {
                    cancel: cancel_tx,
                    join,
                });
                log::info!(target: "ecg", "Measurement started ({} ms)", self.config.duration_ms);
                Ok(true)
            }
            Err(e) => {
                self.measuring.store(false, Ordering::SeqCst);
                self.listener.stop();
                Err(TrackerError::Internal(format!("Failed to spawn ECG countdown: {}", e)))
            }
        }
    }

    /// Stop without reporting a result. Safe when not measuring and from
    /// any thread, observer callbacks included.
    pub fn cancel(&self) {
        self.run.fetch_add(1, Ordering::SeqCst);
        let was_measuring = self.measuring.swap(false, Ordering::SeqCst);
        let countdown = self.countdown().take();
        if let Some(countdown) = countdown {
            countdown.finish();
        }
        // Drops a result still queued on the looper
        self.listener.stop();
        if was_measuring {
            log::info!(target: "ecg", "Measurement cancelled");
        }
    }

    pub fn is_measuring(&self) -> bool {
        self.measuring.load(Ordering::SeqCst)
    }

    pub fn listener(&self) -> &Arc<EcgListener> {
        &self.listener
    }

    fn countdown(&self) -> MutexGuard<'_, Option<Countdown>> {
        self.countdown.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for EcgMeasurement {
    fn drop(&mut self) {
        self.cancel();
    }
}
