use crate::reading::{EcgProgress, SensorReading};
use crate::vendor::TrackerErrorKind;
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

thread_local! {
    /// Deliveries in progress on this thread
    static DELIVERING: Cell<usize> = const { Cell::new(0) };
}

/// Subscriber to tracker output. Callbacks run on the looper thread
/// (readings, errors) or the ECG countdown thread (progress).
pub trait TrackerObserver: Send + Sync {
    fn on_reading(&self, reading: &SensorReading);

    fn on_tracker_error(&self, error: TrackerErrorKind) {
        let _ = error;
    }

    fn on_ecg_progress(&self, progress: &EcgProgress) {
        let _ = progress;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

struct EntryState {
    active: bool,
    in_flight: usize,
}

struct Entry {
    id: ObserverId,
    observer: Arc<dyn TrackerObserver>,
    state: Mutex<EntryState>,
    idle: Condvar,
}

impl Entry {
    fn state(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark a delivery as started; false once the entry is removed
    fn enter(&self) -> bool {
        let mut state = self.state();
        if state.active {
            state.in_flight += 1;
        }
        state.active
    }

    fn deactivate_and_wait(&self) {
        let mut state = self.state();
        state.active = false;
        if DELIVERING.with(Cell::get) > 0 {
            return;
        }
        while state.in_flight > 0 {
            state = self.idle.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Ends one delivery, also on unwind
struct InFlight<'a>(&'a Entry);

impl<'a> InFlight<'a> {
    fn new(entry: &'a Entry) -> Self {
        DELIVERING.with(|d| d.set(d.get() + 1));
        InFlight(entry)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        DELIVERING.with(|d| d.set(d.get() - 1));
        let mut state = self.0.state();
        state.in_flight -= 1;
        if state.in_flight == 0 {
            self.0.idle.notify_all();
        }
    }
}

/// Observer registry fanning readings and errors out to subscribers.
///
/// Notification walks a snapshot taken under the lock, so observers may
/// add or remove subscribers from inside a callback. An entry removed
/// after the snapshot was taken is skipped, and a removal waits for
/// deliveries to that entry already running on other threads.
pub struct TrackerDataSubject {
    observers: Mutex<Vec<Arc<Entry>>>,
    next_id: AtomicU64,
}

impl TrackerDataSubject {
    pub fn new() -> Self {
        TrackerDataSubject {
            observers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn TrackerObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries().push(Arc::new(Entry {
            id,
            observer,
            state: Mutex::new(EntryState {
                active: true,
                in_flight: 0,
            }),
            idle: Condvar::new(),
        }));
        id
    }

    /// Returns false if `id` was not registered.
    ///
    /// Once this returns the observer receives nothing more. Called from a
    /// callback, it does not wait for deliveries running on other threads.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let removed = {
            let mut entries = self.entries();
            entries
                .iter()
                .position(|e| e.id == id)
                .map(|index| entries.remove(index))
        };
        match removed {
            Some(entry) => {
                entry.deactivate_and_wait();
                true
            }
            None => false,
        }
    }

    pub fn observer_count(&self) -> usize {
        self.entries().len()
    }

    pub fn notify_reading(&self, reading: &SensorReading) {
        self.for_each(|observer| observer.on_reading(reading));
    }

    pub fn notify_error(&self, error: TrackerErrorKind) {
        self.for_each(|observer| observer.on_tracker_error(error));
    }

    pub fn notify_ecg_progress(&self, progress: &EcgProgress) {
        self.for_each(|observer| observer.on_ecg_progress(progress));
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Arc<Entry>>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn for_each<F>(&self, deliver: F)
    where
        F: Fn(&dyn TrackerObserver),
    {
        let snapshot: Vec<Arc<Entry>> = self.entries().clone();
        for entry in snapshot {
            if entry.enter() {
                let _in_flight = InFlight::new(&entry);
                deliver(entry.observer.as_ref());
            }
        }
    }
}

impl Default for TrackerDataSubject {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::SkinTemperatureReading;
    use crate::testing::{RecordingObserver, WAIT};
    use crossbeam::channel::{self, Receiver, Sender};
    use std::sync::atomic::AtomicUsize;
    use std::sync::OnceLock;
    use std::thread;
    use std::time::Duration;

    fn reading() -> SensorReading {
        SensorReading::SkinTemperature(SkinTemperatureReading {
            status: 0,
            ambient_celsius: 30.0,
            wrist_celsius: 32.0,
        })
    }

    #[test]
    fn test_notify_reaches_every_observer_once() {
        let subject = TrackerDataSubject::new();
        let observers: Vec<_> = (0..5).map(|_| RecordingObserver::new()).collect();
        for observer in &observers {
            subject.add_observer(observer.clone());
        }

        subject.notify_reading(&reading());
        subject.notify_error(TrackerErrorKind::PermissionError);

        for observer in &observers {
            assert_eq!(observer.readings().len(), 1);
            assert_eq!(observer.errors(), vec![TrackerErrorKind::PermissionError]);
        }
    }

    #[test]
    fn test_removed_observer_is_not_notified() {
        let subject = TrackerDataSubject::new();
        let kept = RecordingObserver::new();
        let removed = RecordingObserver::new();
        subject.add_observer(kept.clone());
        let id = subject.add_observer(removed.clone());

        assert!(subject.remove_observer(id));
        assert!(!subject.remove_observer(id));
        subject.notify_reading(&reading());

        assert_eq!(kept.readings().len(), 1);
        assert!(removed.readings().is_empty());
        assert_eq!(subject.observer_count(), 1);
    }

    /// Removes another observer from inside its own callback
    struct Remover {
        subject: Arc<TrackerDataSubject>,
        victim: OnceLock<ObserverId>,
    }

    impl TrackerObserver for Remover {
        fn on_reading(&self, _reading: &SensorReading) {
            if let Some(id) = self.victim.get() {
                self.subject.remove_observer(*id);
            }
            // Re-entrant add must not deadlock either
            self.subject.add_observer(RecordingObserver::new());
        }
    }

    #[test]
    fn test_removal_during_notification() {
        let subject = Arc::new(TrackerDataSubject::new());
        let remover = Arc::new(Remover {
            subject: Arc::clone(&subject),
            victim: OnceLock::new(),
        });
        subject.add_observer(remover.clone());
        let victim = RecordingObserver::new();
        let victim_id = subject.add_observer(victim.clone());
        remover.victim.set(victim_id).unwrap();

        subject.notify_reading(&reading());

        // Victim sits after the remover in the snapshot and was removed first
        assert!(victim.readings().is_empty());
        assert_eq!(subject.observer_count(), 2);
    }

    #[test]
    fn test_concurrent_add_remove_and_notify() {
        let subject = Arc::new(TrackerDataSubject::new());
        let stable = RecordingObserver::new();
        subject.add_observer(stable.clone());

        let churn = {
            let subject = Arc::clone(&subject);
            thread::spawn(move || {
                for _ in 0..200 {
                    let id = subject.add_observer(RecordingObserver::new());
                    subject.remove_observer(id);
                }
            })
        };
        for _ in 0..200 {
            subject.notify_reading(&reading());
        }
        churn.join().unwrap();

        assert_eq!(stable.readings().len(), 200);
        assert_eq!(subject.observer_count(), 1);
    }

    /// Holds the delivering thread until released
    struct Gate {
        entered: Sender<()>,
        release: Receiver<()>,
        calls: AtomicUsize,
    }

    impl TrackerObserver for Gate {
        fn on_reading(&self, _reading: &SensorReading) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.entered.send(());
            let _ = self.release.recv_timeout(WAIT);
        }
    }

    #[test]
    fn test_remove_waits_for_running_delivery() {
        let subject = Arc::new(TrackerDataSubject::new());
        let (entered_tx, entered_rx) = channel::unbounded();
        let (release_tx, release_rx) = channel::unbounded();
        let gate = Arc::new(Gate {
            entered: entered_tx,
            release: release_rx,
            calls: AtomicUsize::new(0),
        });
        let id = subject.add_observer(gate.clone());

        let notifier = {
            let subject = Arc::clone(&subject);
            thread::spawn(move || subject.notify_reading(&reading()))
        };
        assert!(entered_rx.recv_timeout(WAIT).is_ok());

        let (removed_tx, removed_rx) = channel::unbounded();
        let remover = {
            let subject = Arc::clone(&subject);
            thread::spawn(move || {
                let removed = subject.remove_observer(id);
                let _ = removed_tx.send(removed);
            })
        };
        assert!(removed_rx.recv_timeout(Duration::from_millis(100)).is_err());

        release_tx.send(()).unwrap();
        assert_eq!(removed_rx.recv_timeout(WAIT), Ok(true));
        notifier.join().unwrap();
        remover.join().unwrap();

        subject.notify_reading(&reading());
        assert_eq!(gate.calls.load(Ordering::SeqCst), 1);
    }
}
