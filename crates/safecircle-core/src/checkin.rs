use crate::clock::{Clock, SystemClock};
use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::incident::IncidentStore;
use crate::location::LocationProvider;
use crate::types::{CreateIncidentRequest, Incident, IncidentId, IncidentType, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Entry point used when a check-in expires. Same path as a manual SOS press.
pub trait IncidentCreator: Send + Sync {
    fn create_incident(&self, request: CreateIncidentRequest) -> Result<Incident>;
}

impl IncidentCreator for IncidentStore {
    fn create_incident(&self, request: CreateIncidentRequest) -> Result<Incident> {
        self.create(request)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CheckInState {
    Idle,
    Running,
    CheckedIn,
    Cancelled,
    Expired,
}

impl CheckInState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CheckInState::CheckedIn | CheckInState::Cancelled | CheckInState::Expired
        )
    }
}

/// Read-only view of a check-in session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInSession {
    pub owner: UserId,
    pub state: CheckInState,
    pub destination: String,
    pub duration_seconds: u64,
    pub remaining_seconds: u64,
    pub emergency_type_on_timeout: IncidentType,
    pub started_at: Option<DateTime<Utc>>,
    /// Set while running with less than the configured warning window left.
    pub warning: bool,
    /// Incident raised on expiry, once created.
    pub incident_id: Option<IncidentId>,
}

/// Result of `check_in` / `cancel`. `Superseded` means the session had already
/// finished (typically expired first) and nothing changed.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Applied(CheckInSession),
    Superseded(CheckInSession),
}

impl Resolution {
    pub fn session(&self) -> &CheckInSession {
        match self {
            Resolution::Applied(s) | Resolution::Superseded(s) => s,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, Resolution::Applied(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No session has been started.
    Idle,
    Running(CheckInSession),
    /// This tick expired the session and the auto-alert incident was created.
    Expired {
        session: CheckInSession,
        incident: Incident,
    },
    /// The session had already reached a terminal state; nothing fired.
    Finished(CheckInSession),
}

struct Session {
    serial: u64,
    destination: String,
    duration_secs: u64,
    remaining: Duration,
    state: CheckInState,
    emergency_type: IncidentType,
    started_at: DateTime<Utc>,
    last_observed: DateTime<Utc>,
    incident_id: Option<IncidentId>,
}

/// Auto-alert awaiting a successful create. `in_flight` is set while a
/// delivery attempt is outstanding so no second attempt can start.
struct PendingAlert {
    serial: u64,
    request: CreateIncidentRequest,
    in_flight: bool,
}

#[derive(Default)]
struct TimerInner {
    current: Option<Session>,
    previous: Option<CheckInSession>,
    pending_alert: Option<PendingAlert>,
    next_serial: u64,
}

/// Cancelable countdown for one user. On expiry it raises an incident through
/// the injected [`IncidentCreator`] exactly once.
///
/// Ticks are driven from outside with the elapsed interval, so the timer stays
/// correct under scheduling jitter and tests can inject synthetic time.
pub struct CheckInTimer {
    owner: UserId,
    inner: Mutex<TimerInner>,
    location: Arc<dyn LocationProvider>,
    creator: Arc<dyn IncidentCreator>,
    clock: Arc<dyn Clock>,
    config: CoreConfig,
}

impl CheckInTimer {
    pub fn new(
        owner: UserId,
        location: Arc<dyn LocationProvider>,
        creator: Arc<dyn IncidentCreator>,
    ) -> Self {
        Self::with_clock(owner, location, creator, Arc::new(SystemClock), CoreConfig::default())
    }

    pub fn with_clock(
        owner: UserId,
        location: Arc<dyn LocationProvider>,
        creator: Arc<dyn IncidentCreator>,
        clock: Arc<dyn Clock>,
        config: CoreConfig,
    ) -> Self {
        Self {
            owner,
            inner: Mutex::new(TimerInner::default()),
            location,
            creator,
            clock,
            config,
        }
    }

    pub fn owner(&self) -> &UserId {
        &self.owner
    }

    /// Starts a fresh session. A session still running is cancelled first.
    pub fn start(
        &self,
        destination: &str,
        duration_seconds: i64,
        emergency_type: IncidentType,
    ) -> Result<CheckInSession> {
        let destination = destination.trim();
        if destination.is_empty() {
            return Err(CoreError::validation("destination is required"));
        }
        if duration_seconds <= 0 {
            return Err(CoreError::validation(format!(
                "duration must be positive, got {}",
                duration_seconds
            )));
        }
        let duration_secs = duration_seconds as u64;
        let now = self.clock.now();

        let mut inner = self.lock();
        if let Some(mut old) = inner.current.take() {
            if old.state == CheckInState::Running {
                old.state = CheckInState::Cancelled;
                info!(
                    "Check-in for {} to '{}' cancelled by a new session",
                    self.owner, old.destination
                );
            }
            inner.previous = Some(self.snapshot_of(&old));
        }

        inner.next_serial += 1;
        let session = Session {
            serial: inner.next_serial,
            destination: destination.to_string(),
            duration_secs,
            remaining: Duration::from_secs(duration_secs),
            state: CheckInState::Running,
            emergency_type,
            started_at: now,
            last_observed: now,
            incident_id: None,
        };
        let snapshot = self.snapshot_of(&session);
        inner.current = Some(session);

        info!(
            "Check-in started for {}: '{}' in {}s",
            self.owner, destination, duration_secs
        );
        Ok(snapshot)
    }

    /// Advances the countdown by `elapsed`.
    pub fn tick(&self, elapsed: Duration) -> Result<TickOutcome> {
        self.advance(|_, _| elapsed)
    }

    /// Advances the countdown by the wall-clock time since the last observation.
    pub fn poll(&self) -> Result<TickOutcome> {
        self.advance(|session, now| {
            (now - session.last_observed)
                .to_std()
                .unwrap_or(Duration::ZERO)
        })
    }

    pub fn extend(&self, extra_seconds: u64) -> Result<CheckInSession> {
        if extra_seconds == 0 {
            return Err(CoreError::validation("extension must be positive"));
        }
        let mut inner = self.lock();
        let session = match inner.current.as_mut() {
            Some(s) if s.state == CheckInState::Running => s,
            Some(s) => {
                return Err(CoreError::invalid_state(format!(
                    "cannot extend a {:?} check-in",
                    s.state
                )))
            }
            None => return Err(CoreError::invalid_state("no check-in session")),
        };
        session.remaining = session
            .remaining
            .checked_add(Duration::from_secs(extra_seconds))
            .ok_or_else(|| CoreError::validation("extension too large"))?;
        debug!("Check-in for {} extended by {}s", self.owner, extra_seconds);
        Ok(self.snapshot_of(session))
    }

    pub fn extend_default(&self) -> Result<CheckInSession> {
        self.extend(self.config.checkin_extension_secs)
    }

    pub fn check_in(&self) -> Result<Resolution> {
        self.finish(CheckInState::CheckedIn)
    }

    pub fn cancel(&self) -> Result<Resolution> {
        self.finish(CheckInState::Cancelled)
    }

    pub fn session(&self) -> CheckInSession {
        let inner = self.lock();
        match inner.current.as_ref() {
            Some(s) => self.snapshot_of(s),
            None => self.idle_snapshot(),
        }
    }

    /// The session replaced by the most recent `start`, in its terminal state.
    pub fn previous_session(&self) -> Option<CheckInSession> {
        self.lock().previous.clone()
    }

    pub fn has_pending_alert(&self) -> bool {
        self.lock().pending_alert.is_some()
    }

    /// Re-submits an auto-alert whose creation failed at expiry. Returns
    /// `Ok(None)` when nothing is pending or a delivery is already under way.
    pub fn retry_alert(&self) -> Result<Option<Incident>> {
        let (serial, request) = {
            let mut inner = self.lock();
            match inner.pending_alert.as_mut() {
                Some(pending) if !pending.in_flight => {
                    pending.in_flight = true;
                    (pending.serial, pending.request.clone())
                }
                Some(_) => {
                    debug!("Auto-alert for {} already being delivered", self.owner);
                    return Ok(None);
                }
                None => return Ok(None),
            }
        };
        self.deliver_alert(serial, request).map(Some)
    }

    /// Drops all session state, e.g. on logout. A pending alert is kept.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.current = None;
        inner.previous = None;
    }

    fn advance(
        &self,
        elapsed: impl FnOnce(&Session, DateTime<Utc>) -> Duration,
    ) -> Result<TickOutcome> {
        let now = self.clock.now();
        let (serial, request, snapshot) = {
            let mut inner = self.lock();
            let session = match inner.current.as_mut() {
                None => return Ok(TickOutcome::Idle),
                Some(s) => s,
            };
            if session.state.is_terminal() {
                return Ok(TickOutcome::Finished(self.snapshot_of(session)));
            }

            let step = elapsed(session, now);
            session.remaining = session.remaining.saturating_sub(step);
            if now > session.last_observed {
                session.last_observed = now;
            }
            if !session.remaining.is_zero() {
                return Ok(TickOutcome::Running(self.snapshot_of(session)));
            }

            session.state = CheckInState::Expired;
            let serial = session.serial;
            let emergency_type = session.emergency_type;
            let destination = session.destination.clone();
            let snapshot = self.snapshot_of(session);
            let request = self.alert_request(emergency_type, &destination);
            inner.pending_alert = Some(PendingAlert {
                serial,
                request: request.clone(),
                in_flight: true,
            });
            (serial, request, snapshot)
        };

        warn!(
            "Check-in for {} to '{}' expired, raising {} alert",
            self.owner, snapshot.destination, snapshot.emergency_type_on_timeout
        );
        let incident = self.deliver_alert(serial, request)?;
        let mut session = snapshot;
        session.incident_id = Some(incident.id.clone());
        Ok(TickOutcome::Expired { session, incident })
    }

    fn deliver_alert(&self, serial: u64, request: CreateIncidentRequest) -> Result<Incident> {
        match self.creator.create_incident(request) {
            Ok(incident) => {
                let mut inner = self.lock();
                if matches!(&inner.pending_alert, Some(p) if p.serial == serial) {
                    inner.pending_alert = None;
                }
                if let Some(current) = inner.current.as_mut().filter(|c| c.serial == serial) {
                    current.incident_id = Some(incident.id.clone());
                }
                info!("Auto-alert {} raised for {}", incident.id, self.owner);
                Ok(incident)
            }
            Err(e) => {
                if let Some(pending) = self
                    .lock()
                    .pending_alert
                    .as_mut()
                    .filter(|p| p.serial == serial)
                {
                    pending.in_flight = false;
                }
                error!("Auto-alert for {} failed, kept for retry: {}", self.owner, e);
                Err(match e {
                    CoreError::Backend(_) => e,
                    other => CoreError::backend(other.to_string()),
                })
            }
        }
    }

    fn alert_request(&self, emergency_type: IncidentType, destination: &str) -> CreateIncidentRequest {
        let location = match self.location.current_location() {
            Some(loc) => loc,
            None => {
                warn!(
                    "No location for {}, using fallback for auto-alert",
                    self.owner
                );
                self.config.fallback_location
            }
        };
        CreateIncidentRequest::new(emergency_type, self.owner.clone(), location).with_description(
            format!("{} (destination: {})", self.config.auto_alert_description, destination),
        )
    }

    fn finish(&self, target: CheckInState) -> Result<Resolution> {
        let mut inner = self.lock();
        let session = inner
            .current
            .as_mut()
            .ok_or_else(|| CoreError::invalid_state("no check-in session"))?;
        if session.state.is_terminal() {
            debug!(
                "Check-in for {} already {:?}, ignoring {:?}",
                self.owner, session.state, target
            );
            return Ok(Resolution::Superseded(self.snapshot_of(session)));
        }
        session.state = target;
        if target == CheckInState::CheckedIn {
            session.remaining = Duration::ZERO;
        }
        info!("Check-in for {} -> {:?}", self.owner, target);
        Ok(Resolution::Applied(self.snapshot_of(session)))
    }

    fn snapshot_of(&self, session: &Session) -> CheckInSession {
        let remaining_seconds = ceil_secs(session.remaining);
        CheckInSession {
            owner: self.owner.clone(),
            state: session.state,
            destination: session.destination.clone(),
            duration_seconds: session.duration_secs,
            remaining_seconds,
            emergency_type_on_timeout: session.emergency_type,
            started_at: Some(session.started_at),
            warning: session.state == CheckInState::Running
                && remaining_seconds < self.config.checkin_warning_secs,
            incident_id: session.incident_id.clone(),
        }
    }

    fn idle_snapshot(&self) -> CheckInSession {
        CheckInSession {
            owner: self.owner.clone(),
            state: CheckInState::Idle,
            destination: String::new(),
            duration_seconds: 0,
            remaining_seconds: 0,
            emergency_type_on_timeout: IncidentType::Other,
            started_at: None,
            warning: false,
            incident_id: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TimerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::location::FixedLocation;
    use crate::types::Coordinate;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

    struct CountingCreator {
        store: IncidentStore,
        calls: AtomicUsize,
        fail: AtomicBool,
        delay_ms: AtomicU64,
    }

    impl CountingCreator {
        fn new() -> Self {
            Self {
                store: IncidentStore::new(),
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                delay_ms: AtomicU64::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl IncidentCreator for CountingCreator {
        fn create_incident(&self, request: CreateIncidentRequest) -> Result<Incident> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = self.delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                std::thread::sleep(Duration::from_millis(delay));
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(CoreError::backend("backend unavailable"));
            }
            self.store.create(request)
        }
    }

    fn here() -> Coordinate {
        Coordinate::new(37.7749, -122.4194).unwrap()
    }

    fn timer() -> (CheckInTimer, Arc<CountingCreator>, Arc<ManualClock>) {
        let creator = Arc::new(CountingCreator::new());
        let clock = Arc::new(ManualClock::default());
        let timer = CheckInTimer::with_clock(
            UserId::from("walker"),
            Arc::new(FixedLocation::at(here())),
            creator.clone(),
            clock.clone(),
            CoreConfig::default(),
        );
        (timer, creator, clock)
    }

    #[test]
    fn test_idle_before_start() {
        let (timer, _, _) = timer();
        assert_eq!(timer.session().state, CheckInState::Idle);
        assert_eq!(timer.tick(Duration::from_secs(5)).unwrap(), TickOutcome::Idle);
        assert!(timer.check_in().unwrap_err().is_invalid_state());
        assert!(timer.extend(60).unwrap_err().is_invalid_state());
    }

    #[test]
    fn test_start_validation() {
        let (timer, _, _) = timer();
        assert!(timer
            .start("", 300, IncidentType::Medical)
            .unwrap_err()
            .is_validation());
        assert!(timer
            .start("   ", 300, IncidentType::Medical)
            .unwrap_err()
            .is_validation());
        assert!(timer
            .start("Library", 0, IncidentType::Medical)
            .unwrap_err()
            .is_validation());
        assert!(timer
            .start("Library", -5, IncidentType::Medical)
            .unwrap_err()
            .is_validation());
        assert_eq!(timer.session().state, CheckInState::Idle);
    }

    #[test]
    fn test_expiry_fires_exactly_once() {
        let (timer, creator, _) = timer();
        let started = timer.start("Library parking lot", 300, IncidentType::Medical).unwrap();
        assert_eq!(started.state, CheckInState::Running);
        assert_eq!(started.remaining_seconds, 300);

        match timer.tick(Duration::from_secs(300)).unwrap() {
            TickOutcome::Expired { session, incident } => {
                assert_eq!(session.state, CheckInState::Expired);
                assert_eq!(session.remaining_seconds, 0);
                assert_eq!(session.incident_id, Some(incident.id.clone()));
                assert_eq!(incident.incident_type, IncidentType::Medical);
                assert_eq!(incident.victim, UserId::from("walker"));
                assert_eq!(incident.location, here());
                assert!(incident
                    .description
                    .as_deref()
                    .unwrap_or_default()
                    .starts_with("Auto-alert: check-in missed"));
            }
            other => panic!("expected expiry, got {:?}", other),
        }
        assert_eq!(creator.calls(), 1);

        assert!(matches!(
            timer.tick(Duration::from_secs(1)).unwrap(),
            TickOutcome::Finished(_)
        ));
        assert!(matches!(
            timer.tick(Duration::from_secs(300)).unwrap(),
            TickOutcome::Finished(_)
        ));
        assert_eq!(creator.calls(), 1);
        assert_eq!(creator.store.list_active().len(), 1);
    }

    #[test]
    fn test_irregular_ticks_accumulate() {
        let (timer, creator, _) = timer();
        timer.start("Dorm", 3, IncidentType::Other).unwrap();

        let outcome = timer.tick(Duration::from_millis(1500)).unwrap();
        match outcome {
            TickOutcome::Running(s) => assert_eq!(s.remaining_seconds, 2),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            timer.tick(Duration::from_millis(1400)).unwrap(),
            TickOutcome::Running(_)
        ));
        assert!(matches!(
            timer.tick(Duration::from_millis(100)).unwrap(),
            TickOutcome::Expired { .. }
        ));
        assert_eq!(creator.calls(), 1);
    }

    #[test]
    fn test_poll_uses_clock() {
        let (timer, creator, clock) = timer();
        timer.start("Gym", 60, IncidentType::Accident).unwrap();

        clock.advance(Duration::from_secs(45));
        match timer.poll().unwrap() {
            TickOutcome::Running(s) => {
                assert_eq!(s.remaining_seconds, 15);
                assert!(s.warning);
            }
            other => panic!("unexpected {:?}", other),
        }

        // Polling twice without time passing changes nothing.
        match timer.poll().unwrap() {
            TickOutcome::Running(s) => assert_eq!(s.remaining_seconds, 15),
            other => panic!("unexpected {:?}", other),
        }

        clock.advance(Duration::from_secs(20));
        assert!(matches!(timer.poll().unwrap(), TickOutcome::Expired { .. }));
        assert_eq!(creator.calls(), 1);
    }

    #[test]
    fn test_check_in_suppresses_expiry() {
        let (timer, creator, _) = timer();
        timer.start("Library", 300, IncidentType::Medical).unwrap();
        timer.tick(Duration::from_secs(100)).unwrap();

        let resolution = timer.check_in().unwrap();
        assert!(resolution.was_applied());
        assert_eq!(resolution.session().state, CheckInState::CheckedIn);
        assert_eq!(resolution.session().remaining_seconds, 0);

        assert!(matches!(
            timer.tick(Duration::from_secs(1000)).unwrap(),
            TickOutcome::Finished(_)
        ));
        assert_eq!(creator.calls(), 0);
    }

    #[test]
    fn test_check_in_after_expiry_is_noop() {
        let (timer, creator, _) = timer();
        timer.start("Library", 10, IncidentType::Assault).unwrap();
        timer.tick(Duration::from_secs(10)).unwrap();

        let resolution = timer.check_in().unwrap();
        assert!(!resolution.was_applied());
        assert_eq!(resolution.session().state, CheckInState::Expired);
        let resolution = timer.cancel().unwrap();
        assert!(!resolution.was_applied());
        assert_eq!(creator.calls(), 1);
    }

    #[test]
    fn test_extend_only_while_running() {
        let (timer, _, _) = timer();
        timer.start("Library", 60, IncidentType::Medical).unwrap();
        let extended = timer.extend_default().unwrap();
        assert_eq!(extended.remaining_seconds, 660);
        assert_eq!(extended.duration_seconds, 60);
        assert!(timer.extend(0).unwrap_err().is_validation());

        timer.cancel().unwrap();
        assert!(timer.extend(60).unwrap_err().is_invalid_state());
    }

    #[test]
    fn test_extend_overflow_rejected() {
        let (timer, _, _) = timer();
        timer.start("Library", 60, IncidentType::Medical).unwrap();
        assert!(timer.extend(u64::MAX).unwrap_err().is_validation());

        let session = timer.session();
        assert_eq!(session.state, CheckInState::Running);
        assert_eq!(session.remaining_seconds, 60);
    }

    #[test]
    fn test_warning_window() {
        let (timer, _, _) = timer();
        let session = timer.start("Library", 600, IncidentType::Medical).unwrap();
        assert!(!session.warning);
        match timer.tick(Duration::from_secs(481)).unwrap() {
            TickOutcome::Running(s) => assert!(s.warning),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_restart_cancels_running_session() {
        let (timer, creator, _) = timer();
        timer.start("Library", 300, IncidentType::Medical).unwrap();
        let fresh = timer.start("Dorm", 120, IncidentType::Other).unwrap();

        assert_eq!(fresh.destination, "Dorm");
        assert_eq!(fresh.state, CheckInState::Running);
        let previous = timer.previous_session().unwrap();
        assert_eq!(previous.destination, "Library");
        assert_eq!(previous.state, CheckInState::Cancelled);

        timer.tick(Duration::from_secs(120)).unwrap();
        assert_eq!(creator.calls(), 1);
        let incident = creator.store.list_active().remove(0);
        assert_eq!(incident.incident_type, IncidentType::Other);
    }

    #[test]
    fn test_fallback_location_when_unknown() {
        let creator = Arc::new(CountingCreator::new());
        let timer = CheckInTimer::with_clock(
            UserId::from("walker"),
            Arc::new(FixedLocation::unknown()),
            creator.clone(),
            Arc::new(ManualClock::default()),
            CoreConfig::default(),
        );
        timer.start("Quad", 5, IncidentType::Other).unwrap();
        match timer.tick(Duration::from_secs(5)).unwrap() {
            TickOutcome::Expired { incident, .. } => {
                assert_eq!(incident.location, CoreConfig::default().fallback_location);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_failed_alert_is_retained_for_retry() {
        let (timer, creator, _) = timer();
        creator.fail.store(true, Ordering::SeqCst);
        timer.start("Library", 5, IncidentType::Medical).unwrap();

        let err = timer.tick(Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, CoreError::Backend(_)));
        assert_eq!(timer.session().state, CheckInState::Expired);
        assert!(timer.has_pending_alert());

        // Further ticks never re-fire on their own.
        timer.tick(Duration::from_secs(5)).unwrap();
        assert_eq!(creator.calls(), 1);

        creator.fail.store(false, Ordering::SeqCst);
        let incident = timer.retry_alert().unwrap().unwrap();
        assert!(!timer.has_pending_alert());
        assert_eq!(timer.session().incident_id, Some(incident.id));
        assert_eq!(timer.retry_alert().unwrap(), None);
        assert_eq!(creator.calls(), 2);
    }

    #[test]
    fn test_retry_while_delivering_does_not_refire() {
        let (timer, creator, _) = timer();
        let timer = Arc::new(timer);
        creator.delay_ms.store(200, Ordering::SeqCst);
        timer.start("Library", 5, IncidentType::Medical).unwrap();

        let ticker = {
            let timer = timer.clone();
            std::thread::spawn(move || timer.tick(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(50));
        assert!(timer.has_pending_alert());
        assert_eq!(timer.retry_alert().unwrap(), None);

        let tick = ticker.join().unwrap().unwrap();
        assert!(matches!(tick, TickOutcome::Expired { .. }));
        assert_eq!(creator.calls(), 1);
        assert_eq!(creator.store.list_active().len(), 1);
        assert!(!timer.has_pending_alert());
        assert_eq!(timer.retry_alert().unwrap(), None);
    }

    #[test]
    fn test_clear_keeps_pending_alert() {
        let (timer, creator, _) = timer();
        creator.fail.store(true, Ordering::SeqCst);
        timer.start("Library", 5, IncidentType::Medical).unwrap();
        assert!(timer.tick(Duration::from_secs(5)).is_err());

        timer.clear();
        assert_eq!(timer.session().state, CheckInState::Idle);
        assert!(timer.previous_session().is_none());
        assert!(timer.has_pending_alert());

        creator.fail.store(false, Ordering::SeqCst);
        assert!(timer.retry_alert().unwrap().is_some());
        assert!(!timer.has_pending_alert());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!CheckInState::Idle.is_terminal());
        assert!(!CheckInState::Running.is_terminal());
        assert!(CheckInState::CheckedIn.is_terminal());
        assert!(CheckInState::Cancelled.is_terminal());
        assert!(CheckInState::Expired.is_terminal());
    }

    #[test]
    fn test_check_in_races_expiry() {
        for _ in 0..200 {
            let (timer, creator, _) = timer();
            let timer = Arc::new(timer);
            timer.start("Library", 300, IncidentType::Medical).unwrap();

            let ticker = {
                let timer = timer.clone();
                std::thread::spawn(move || timer.tick(Duration::from_secs(300)))
            };
            let checker = {
                let timer = timer.clone();
                std::thread::spawn(move || timer.check_in())
            };

            let tick = ticker.join().unwrap().unwrap();
            let resolution = checker.join().unwrap().unwrap();

            match timer.session().state {
                CheckInState::CheckedIn => {
                    assert!(resolution.was_applied());
                    assert!(matches!(tick, TickOutcome::Finished(_)));
                    assert_eq!(creator.calls(), 0);
                }
                CheckInState::Expired => {
                    assert!(!resolution.was_applied());
                    assert!(matches!(tick, TickOutcome::Expired { .. }));
                    assert_eq!(creator.calls(), 1);
                }
                other => panic!("unexpected final state {:?}", other),
            }
        }
    }
}
