//! Connection lifecycle towards the tracking service.
//!
//! `TrackerConnection` is the context object a consumer owns for as long
//! as it needs trackers. Dropping it disconnects.

use crate::error::{TResult, TrackerError};
use crate::vendor::{
    error_code, ConnectionFailure, ConnectionListener, HealthTracker, HealthTrackerType,
    HealthTrackingService,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Tracker types the connected service supports. Fixed for one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerCapability {
    supported: BTreeSet<HealthTrackerType>,
}

impl TrackerCapability {
    pub fn new<I>(types: I) -> Self
    where
        I: IntoIterator<Item = HealthTrackerType>,
    {
        Self {
            supported: types.into_iter().collect(),
        }
    }

    pub fn supports(&self, tracker_type: HealthTrackerType) -> bool {
        self.supported.contains(&tracker_type)
    }

    pub fn supported(&self) -> impl Iterator<Item = HealthTrackerType> + '_ {
        self.supported.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.supported.is_empty()
    }
}

/// Classification of a failed connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionErrorKind {
    Permission,
    Policy,
    PlatformTooOld,
    PackageMissing,
    Unknown,
}

impl ConnectionErrorKind {
    pub fn from_code(code: i32) -> Self {
        match code {
            error_code::PACKAGE_NOT_INSTALLED => ConnectionErrorKind::PackageMissing,
            error_code::OLD_PLATFORM_VERSION => ConnectionErrorKind::PlatformTooOld,
            error_code::PERMISSION_ERROR => ConnectionErrorKind::Permission,
            error_code::SDK_POLICY_ERROR => ConnectionErrorKind::Policy,
            _ => ConnectionErrorKind::Unknown,
        }
    }

    pub fn to_error(self, message: Option<&str>) -> TrackerError {
        match self {
            ConnectionErrorKind::Permission => TrackerError::PermissionDenied,
            ConnectionErrorKind::Policy => TrackerError::PolicyViolation,
            ConnectionErrorKind::PlatformTooOld => TrackerError::PlatformUnsupported,
            ConnectionErrorKind::PackageMissing => TrackerError::PackageMissing,
            ConnectionErrorKind::Unknown => {
                TrackerError::ConnectionFailed(message.unwrap_or("unknown error").to_string())
            }
        }
    }
}

/// Reported once per state transition
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected {
        capability: TrackerCapability,
    },
    Failed {
        error: ConnectionErrorKind,
        /// The platform offers the user a fix (install or update)
        resolvable: bool,
        message: Option<String>,
    },
    Disconnected,
}

pub trait ConnectionObserver: Send + Sync {
    fn on_connection_result(&self, event: &ConnectionEvent);
}

impl<F> ConnectionObserver for F
where
    F: Fn(&ConnectionEvent) + Send + Sync,
{
    fn on_connection_result(&self, event: &ConnectionEvent) {
        self(event)
    }
}

struct Snapshot {
    state: ConnectionState,
    capability: Option<TrackerCapability>,
    last_error: Option<TrackerError>,
}

struct ConnectionInner {
    service: Arc<dyn HealthTrackingService>,
    observer: Arc<dyn ConnectionObserver>,
    snapshot: Mutex<Snapshot>,
}

impl ConnectionInner {
    fn snapshot(&self) -> MutexGuard<'_, Snapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConnectionListener for ConnectionInner {
    fn on_connection_success(&self) {
        let capability = {
            let mut snap = self.snapshot();
            if snap.state != ConnectionState::Connecting {
                log::warn!("Ignoring connection success in state {:?}", snap.state);
                return;
            }
            let capability =
                TrackerCapability::new(self.service.tracking_capability().unwrap_or_default());
            snap.state = ConnectionState::Connected;
            snap.capability = Some(capability.clone());
            snap.last_error = None;
            capability
        };

        log::info!(
            "Connected to health tracking service ({} tracker types)",
            capability.supported().count()
        );
        self.observer
            .on_connection_result(&ConnectionEvent::Connected { capability });
    }

    fn on_connection_ended(&self) {
        {
            let mut snap = self.snapshot();
            if snap.state != ConnectionState::Connected {
                log::debug!("Connection ended in state {:?}", snap.state);
                return;
            }
            snap.state = ConnectionState::Disconnected;
            snap.capability = None;
        }
        log::info!("Disconnected");
        self.observer
            .on_connection_result(&ConnectionEvent::Disconnected);
    }

    fn on_connection_failed(&self, failure: ConnectionFailure) {
        let error = ConnectionErrorKind::from_code(failure.code);
        {
            let mut snap = self.snapshot();
            if snap.state != ConnectionState::Connecting {
                log::warn!("Ignoring connection failure in state {:?}", snap.state);
                return;
            }
            snap.state = ConnectionState::Failed;
            snap.capability = None;
            snap.last_error = Some(error.to_error(failure.message.as_deref()));
        }

        log::error!(
            "Could not connect to health tracking service: {:?} (code {}) {}",
            error,
            failure.code,
            failure.message.as_deref().unwrap_or("")
        );
        self.observer.on_connection_result(&ConnectionEvent::Failed {
            error,
            resolvable: failure.has_resolution,
            message: failure.message,
        });
    }
}

pub struct TrackerConnection {
    inner: Arc<ConnectionInner>,
}

impl TrackerConnection {
    pub fn new(
        service: Arc<dyn HealthTrackingService>,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Self {
        TrackerConnection {
            inner: Arc::new(ConnectionInner {
                service,
                observer,
                snapshot: Mutex::new(Snapshot {
                    state: ConnectionState::Disconnected,
                    capability: None,
                    last_error: None,
                }),
            }),
        }
    }

    /// Start connecting; the outcome is reported to the observer.
    ///
    /// Allowed from `Disconnected` and `Failed` (explicit retry).
    pub fn connect(&self) -> TResult<()> {
        {
            let mut snap = self.inner.snapshot();
            match snap.state {
                ConnectionState::Connecting | ConnectionState::Connected => {
                    return Err(TrackerError::AlreadyConnected)
                }
                ConnectionState::Disconnected | ConnectionState::Failed => {
                    snap.state = ConnectionState::Connecting;
                    snap.last_error = None;
                }
            }
        }

        log::info!("Connecting to health tracking service");
        let listener: Arc<dyn ConnectionListener> = self.inner.clone();
        self.inner.service.connect_service(listener);
        Ok(())
    }

    /// Idempotent; safe from any state
    pub fn disconnect(&self) {
        let was_active = {
            let mut snap = self.inner.snapshot();
            let active = matches!(
                snap.state,
                ConnectionState::Connecting | ConnectionState::Connected
            );
            snap.state = ConnectionState::Disconnected;
            snap.capability = None;
            active
        };

        if was_active {
            self.inner.service.disconnect_service();
            log::info!("Disconnected from health tracking service");
            self.inner
                .observer
                .on_connection_result(&ConnectionEvent::Disconnected);
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.snapshot().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn capability(&self) -> Option<TrackerCapability> {
        self.inner.snapshot().capability.clone()
    }

    /// False whenever no capability snapshot is available
    pub fn is_capable(&self, tracker_type: HealthTrackerType) -> bool {
        self.inner
            .snapshot()
            .capability
            .as_ref()
            .map(|c| c.supports(tracker_type))
            .unwrap_or(false)
    }

    pub fn last_error(&self) -> Option<TrackerError> {
        self.inner.snapshot().last_error.clone()
    }

    pub fn tracker(&self, tracker_type: HealthTrackerType) -> TResult<Arc<dyn HealthTracker>> {
        if !self.is_connected() {
            return Err(TrackerError::NotConnected);
        }
        if !self.is_capable(tracker_type) {
            return Err(TrackerError::Unsupported(tracker_type));
        }
        self.inner.service.health_tracker(tracker_type)
    }
}

impl Drop for TrackerConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{connected, WAIT};
    use crate::vendor::sim::{ConnectOutcome, SimulatedService};
    use crossbeam::channel::{self, Receiver};
    use std::time::Duration;

    fn observed(
        service: Arc<SimulatedService>,
    ) -> (TrackerConnection, Receiver<ConnectionEvent>) {
        let (tx, rx) = channel::unbounded();
        let connection = TrackerConnection::new(
            service,
            Arc::new(move |event: &ConnectionEvent| {
                let _ = tx.send(event.clone());
            }),
        );
        (connection, rx)
    }

    #[test]
    fn test_connect_reports_capability_once() {
        let service = Arc::new(SimulatedService::new(&[
            HealthTrackerType::EcgOnDemand,
            HealthTrackerType::SkinTemperatureOnDemand,
        ]));
        let (connection, rx) = observed(service.clone());

        assert!(!connection.is_capable(HealthTrackerType::EcgOnDemand));
        connection.connect().unwrap();

        match rx.recv_timeout(WAIT).unwrap() {
            ConnectionEvent::Connected { capability } => {
                assert!(capability.supports(HealthTrackerType::EcgOnDemand));
                assert!(!capability.supports(HealthTrackerType::PpgContinuous));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(connection.state(), ConnectionState::Connected);
        assert!(connection.is_capable(HealthTrackerType::SkinTemperatureOnDemand));
        assert!(!connection.is_capable(HealthTrackerType::Spo2OnDemand));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(service.connect_calls(), 1);
    }

    #[test]
    fn test_connect_twice_is_rejected() {
        let service = Arc::new(SimulatedService::with_all_trackers());
        let connection = connected(service.clone());
        assert_eq!(connection.connect(), Err(TrackerError::AlreadyConnected));
        assert_eq!(service.connect_calls(), 1);
    }

    #[test]
    fn test_failure_is_classified_and_retryable() {
        let failure = ConnectionFailure::new(error_code::OLD_PLATFORM_VERSION)
            .with_message("platform 1.0")
            .resolvable();
        let service = Arc::new(SimulatedService::failing(failure));
        let (connection, rx) = observed(service.clone());

        connection.connect().unwrap();
        match rx.recv_timeout(WAIT).unwrap() {
            ConnectionEvent::Failed {
                error,
                resolvable,
                message,
            } => {
                assert_eq!(error, ConnectionErrorKind::PlatformTooOld);
                assert!(resolvable);
                assert_eq!(message.as_deref(), Some("platform 1.0"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(connection.state(), ConnectionState::Failed);
        assert_eq!(connection.last_error(), Some(TrackerError::PlatformUnsupported));
        assert!(!connection.is_capable(HealthTrackerType::EcgOnDemand));

        // No automatic reconnect; an explicit retry goes back to the service
        service.set_outcome(ConnectOutcome::Succeed);
        connection.connect().unwrap();
        assert!(matches!(
            rx.recv_timeout(WAIT).unwrap(),
            ConnectionEvent::Connected { .. }
        ));
        assert_eq!(service.connect_calls(), 2);
        assert_eq!(connection.last_error(), None);
    }

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            ConnectionErrorKind::from_code(error_code::PACKAGE_NOT_INSTALLED),
            ConnectionErrorKind::PackageMissing
        );
        assert_eq!(
            ConnectionErrorKind::from_code(error_code::PERMISSION_ERROR),
            ConnectionErrorKind::Permission
        );
        assert_eq!(
            ConnectionErrorKind::from_code(error_code::SDK_POLICY_ERROR),
            ConnectionErrorKind::Policy
        );
        assert_eq!(ConnectionErrorKind::from_code(99), ConnectionErrorKind::Unknown);
        assert_eq!(
            ConnectionErrorKind::Unknown.to_error(Some("boom")),
            TrackerError::ConnectionFailed("boom".to_string())
        );
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let service = Arc::new(SimulatedService::with_all_trackers());
        let (connection, rx) = observed(service.clone());

        connection.disconnect();
        assert_eq!(service.disconnect_calls(), 0);

        connection.connect().unwrap();
        assert!(matches!(
            rx.recv_timeout(WAIT).unwrap(),
            ConnectionEvent::Connected { .. }
        ));

        connection.disconnect();
        connection.disconnect();
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), ConnectionEvent::Disconnected);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(service.disconnect_calls(), 1);
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(connection.capability().is_none());
    }

    #[test]
    fn test_missing_capability_means_not_capable() {
        let service = Arc::new(SimulatedService::with_all_trackers().without_capability());
        let connection = connected(service);
        assert!(connection.capability().unwrap().is_empty());
        assert!(!connection.is_capable(HealthTrackerType::EcgOnDemand));
        assert_eq!(
            connection.tracker(HealthTrackerType::EcgOnDemand).err(),
            Some(TrackerError::Unsupported(HealthTrackerType::EcgOnDemand))
        );
    }

    #[test]
    fn test_tracker_requires_connection() {
        let service = Arc::new(SimulatedService::with_all_trackers());
        let (connection, _rx) = observed(service.clone());
        assert_eq!(
            connection.tracker(HealthTrackerType::PpgContinuous).err(),
            Some(TrackerError::NotConnected)
        );

        let connection = connected(service);
        let tracker = connection.tracker(HealthTrackerType::PpgContinuous).unwrap();
        assert_eq!(tracker.tracker_type(), HealthTrackerType::PpgContinuous);
    }

    #[test]
    fn test_drop_disconnects() {
        let service = Arc::new(SimulatedService::with_all_trackers());
        let connection = connected(service.clone());
        drop(connection);
        assert_eq!(service.disconnect_calls(), 1);
    }

    #[test]
    fn test_vendor_ended_connection() {
        let service = Arc::new(SimulatedService::with_all_trackers());
        let (connection, rx) = observed(service);
        connection.connect().unwrap();
        assert!(matches!(
            rx.recv_timeout(WAIT).unwrap(),
            ConnectionEvent::Connected { .. }
        ));

        connection.inner.on_connection_ended();
        connection.inner.on_connection_ended();
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), ConnectionEvent::Disconnected);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }
}
