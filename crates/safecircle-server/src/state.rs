use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics_exporter_prometheus::PrometheusHandle;
use safecircle_core::{
    Backend, CheckInTimer, Clock, Coordinate, CoreConfig, CoreError, CreateIncidentRequest,
    HelperStatus, HelperView, Incident, IncidentCreator, IncidentId, IncidentPatch,
    LocationProvider, MemoryBackend, Notification, NotificationEvent, NotificationRouter,
    Recipient, RecipientPolicy, ResponseCoordinator, ServiceTag, SystemClock, TickOutcome, UserDirectory,
    UserId,
};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Per-user inbox cap; older entries are dropped first.
pub const INBOX_CAPACITY: usize = 200;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxEntry {
    pub timestamp: DateTime<Utc>,
    pub notification: Notification,
}

/// Creates incidents and fans every incident event out to user inboxes.
///
/// Manual SOS requests and expired check-ins both go through
/// [`Dispatcher::raise_incident`].
#[derive(Clone)]
pub struct Dispatcher {
    pub backend: MemoryBackend,
    router: NotificationRouter,
    inboxes: Arc<DashMap<UserId, VecDeque<InboxEntry>>>,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(backend: MemoryBackend, router: NotificationRouter, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            router,
            inboxes: Arc::new(DashMap::new()),
            clock,
        }
    }

    pub fn users(&self) -> &UserDirectory {
        &self.backend.users
    }

    pub fn raise_incident(
        &self,
        request: CreateIncidentRequest,
        services: &[ServiceTag],
    ) -> safecircle_core::Result<Incident> {
        let mut incident = self.backend.create_incident(request)?;
        for service in services {
            incident = self.backend.update_incident(
                &incident.id,
                IncidentPatch::NotifyService { service: *service },
            )?;
        }
        crate::metrics::record_incident_created(incident.incident_type);
        self.refresh_active_gauge();
        self.publish(NotificationEvent::NewIncident {
            incident: incident.clone(),
        });
        Ok(incident)
    }

    /// Routes the event and appends the result to each recipient's inbox.
    pub fn publish(&self, event: NotificationEvent) -> Vec<Notification> {
        let subject = match &event {
            NotificationEvent::BadgeUnlocked { user, .. } => user.clone(),
            NotificationEvent::NewIncident { incident }
            | NotificationEvent::HelperJoined { incident, .. }
            | NotificationEvent::HelperArrived { incident, .. }
            | NotificationEvent::ChatMessage { incident, .. } => incident.victim.clone(),
        };
        let policy = RecipientPolicy::from_directory(self.users(), &subject);
        let notifications = self.router.route(&event, &policy);

        let now = self.clock.now();
        for notification in &notifications {
            let user = match &notification.recipient {
                Recipient::User(user) => user,
                Recipient::Contact(contact) => {
                    // No SMS gateway; the text is logged for the operator.
                    info!(
                        "SOS to {} ({}): {}",
                        contact.name,
                        contact.reachable_phone().unwrap_or("no phone"),
                        notification.summary
                    );
                    continue;
                }
            };
            let mut inbox = self.inboxes.entry(user.clone()).or_default();
            inbox.push_back(InboxEntry {
                timestamp: now,
                notification: notification.clone(),
            });
            while inbox.len() > INBOX_CAPACITY {
                inbox.pop_front();
            }
        }

        if !notifications.is_empty() {
            crate::metrics::record_notifications(event.severity(), notifications.len());
        }
        debug!(
            "{:?} event delivered to {} recipients",
            event.kind(),
            notifications.len()
        );
        notifications
    }

    /// Most recent entries first.
    pub fn inbox(&self, user: &UserId, limit: usize) -> Vec<InboxEntry> {
        self.inboxes
            .get(user)
            .map(|inbox| inbox.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn refresh_active_gauge(&self) {
        crate::metrics::update_active_incidents(self.backend.incidents.active_count());
    }
}

impl IncidentCreator for Dispatcher {
    fn create_incident(&self, request: CreateIncidentRequest) -> safecircle_core::Result<Incident> {
        self.raise_incident(request, &[])
    }
}

/// Device location of one user, read from the directory at expiry time.
struct DirectoryLocation {
    users: UserDirectory,
    user: UserId,
}

impl LocationProvider for DirectoryLocation {
    fn current_location(&self) -> Option<Coordinate> {
        self.users.get(&self.user).ok().and_then(|u| u.location)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub active_incidents: usize,
    pub total_incidents: usize,
    pub users: usize,
    pub running_checkins: usize,
    pub uptime_seconds: u64,
}

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub coordinator: ResponseCoordinator,
    pub checkins: Arc<DashMap<UserId, Arc<CheckInTimer>>>,
    pub config: CoreConfig,
    pub clock: Arc<dyn Clock>,
    pub start_time: Instant,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: CoreConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CoreConfig, clock: Arc<dyn Clock>) -> Self {
        let backend = MemoryBackend::new(
            safecircle_core::IncidentStore::with_clock(clock.clone()),
            UserDirectory::new(),
        );
        let coordinator = ResponseCoordinator::new(
            backend.incidents.clone(),
            Arc::new(backend.users.clone()),
            &config,
        );
        let dispatcher = Dispatcher::new(
            backend,
            NotificationRouter::from_config(&config),
            clock.clone(),
        );
        Self {
            dispatcher,
            coordinator,
            checkins: Arc::new(DashMap::new()),
            config,
            clock,
            start_time: Instant::now(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn backend(&self) -> &MemoryBackend {
        &self.dispatcher.backend
    }

    pub fn join(&self, id: &IncidentId, helper: &UserId) -> safecircle_core::Result<Incident> {
        self.dispatcher.users().get(helper)?;
        let update = self.coordinator.join(id, helper)?;
        if let Some(event) = update.event {
            crate::metrics::record_helper_joined();
            self.dispatcher.publish(event);
        }
        Ok(update.incident)
    }

    pub fn arrive(&self, id: &IncidentId, helper: &UserId) -> safecircle_core::Result<Incident> {
        let update = self.coordinator.mark_arrived(id, helper)?;
        if let Some(event) = update.event {
            crate::metrics::record_helper_arrived();
            self.dispatcher.publish(event);
        }
        Ok(update.incident)
    }

    pub fn leave(&self, id: &IncidentId, helper: &UserId) -> safecircle_core::Result<Incident> {
        self.coordinator.leave(id, helper)
    }

    pub fn chat(
        &self,
        id: &IncidentId,
        sender: &UserId,
        text: &str,
    ) -> safecircle_core::Result<Incident> {
        let message = self
            .backend()
            .incidents
            .append_chat_message(id, sender, text)?;
        let incident = self.backend().get_incident(id)?;
        self.dispatcher.publish(NotificationEvent::ChatMessage {
            incident: incident.clone(),
            message,
        });
        Ok(incident)
    }

    pub fn resolve(&self, id: &IncidentId) -> safecircle_core::Result<Incident> {
        let incident = self.backend().update_incident(id, IncidentPatch::Resolve)?;
        crate::metrics::record_incident_resolved();
        self.dispatcher.refresh_active_gauge();
        Ok(incident)
    }

    pub fn notify_service(
        &self,
        id: &IncidentId,
        service: ServiceTag,
    ) -> safecircle_core::Result<Incident> {
        self.backend()
            .update_incident(id, IncidentPatch::NotifyService { service })
    }

    pub fn view(
        &self,
        id: &IncidentId,
        helper: &UserId,
        at: Option<Coordinate>,
    ) -> safecircle_core::Result<HelperView> {
        match at {
            Some(location) => self.coordinator.view_from(id, helper, location),
            None => self.coordinator.view(id, helper),
        }
    }

    pub fn roster(&self, id: &IncidentId) -> safecircle_core::Result<Vec<HelperStatus>> {
        self.coordinator.roster(id)
    }

    pub fn award_badge(
        &self,
        user: &UserId,
        badge: &str,
        points: u32,
    ) -> safecircle_core::Result<Vec<Notification>> {
        self.dispatcher.users().get(user)?;
        let badge = badge.trim();
        if badge.is_empty() {
            return Err(CoreError::validation("badge name is required"));
        }
        Ok(self.dispatcher.publish(NotificationEvent::BadgeUnlocked {
            user: user.clone(),
            badge: badge.to_string(),
            points,
        }))
    }

    /// Timer for `user`, created on first use. Unknown users are rejected.
    pub fn checkin_timer(&self, user: &UserId) -> safecircle_core::Result<Arc<CheckInTimer>> {
        self.dispatcher.users().get(user)?;
        let timer = self
            .checkins
            .entry(user.clone())
            .or_insert_with(|| {
                Arc::new(CheckInTimer::with_clock(
                    user.clone(),
                    Arc::new(DirectoryLocation {
                        users: self.dispatcher.users().clone(),
                        user: user.clone(),
                    }),
                    Arc::new(self.dispatcher.clone()),
                    self.clock.clone(),
                    self.config.clone(),
                ))
            })
            .clone();
        Ok(timer)
    }

    /// Forgets the user's check-in sessions on logout. An undelivered
    /// auto-alert stays queued and is still retried by the ticker.
    pub fn sign_out(&self, user: &UserId) -> safecircle_core::Result<()> {
        self.dispatcher.users().get(user)?;
        if let Some(timer) = self.checkins.get(user).map(|e| e.value().clone()) {
            timer.clear();
        }
        info!("{} signed out", user);
        Ok(())
    }

    /// Advances every timer by wall-clock time and re-sends alerts that failed
    /// earlier. Returns the incidents raised during this pass.
    pub fn tick_checkins(&self) -> Vec<Incident> {
        let timers: Vec<Arc<CheckInTimer>> =
            self.checkins.iter().map(|e| e.value().clone()).collect();
        let mut raised = Vec::new();

        for timer in timers {
            if timer.has_pending_alert() {
                match timer.retry_alert() {
                    Ok(Some(incident)) => {
                        info!("Delivered pending auto-alert {} for {}", incident.id, timer.owner());
                        raised.push(incident);
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Auto-alert retry for {} failed: {}", timer.owner(), e),
                }
            }

            match timer.poll() {
                Ok(TickOutcome::Expired { incident, .. }) => {
                    crate::metrics::record_checkin_expired();
                    raised.push(incident);
                }
                Ok(_) => {}
                Err(e) => {
                    crate::metrics::record_checkin_expired();
                    error!("Check-in for {} expired but alert failed: {}", timer.owner(), e);
                }
            }
        }
        raised
    }

    pub fn running_checkins(&self) -> usize {
        self.checkins
            .iter()
            .filter(|e| e.value().session().state == safecircle_core::CheckInState::Running)
            .count()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn health(&self) -> HealthReport {
        let incidents = &self.backend().incidents;
        HealthReport {
            status: "ok",
            active_incidents: incidents.active_count(),
            total_incidents: incidents.list_all().len(),
            users: self.dispatcher.users().len(),
            running_checkins: self.running_checkins(),
            uptime_seconds: self.uptime_seconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safecircle_core::{CheckInState, EmergencyContact, IncidentType, ManualClock, User};
    use std::time::Duration;

    fn campus() -> Coordinate {
        Coordinate::new(37.7749, -122.4194).unwrap()
    }

    fn state_with_users() -> (AppState, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let state = AppState::with_clock(CoreConfig::default(), clock.clone());
        let users = state.dispatcher.users();
        users.upsert(
            User::new("victim", "Vic")
                .with_trusted_circle(vec![UserId::from("friend")])
                .with_location(campus()),
        );
        users.upsert(User::new("friend", "Fran").with_location(Coordinate::new(37.80, -122.45).unwrap()));
        users.upsert(User::new("near", "Nia").with_location(Coordinate::new(37.7752, -122.4194).unwrap()));
        (state, clock)
    }

    #[test]
    fn test_raise_incident_fills_inboxes() {
        let (state, _) = state_with_users();
        let incident = state
            .dispatcher
            .raise_incident(
                CreateIncidentRequest::new(IncidentType::Medical, UserId::from("victim"), campus()),
                &[ServiceTag::CampusSecurity],
            )
            .unwrap();

        assert_eq!(incident.emergency_services_notified, vec![ServiceTag::CampusSecurity]);
        assert_eq!(state.dispatcher.inbox(&UserId::from("friend"), 10).len(), 1);
        assert_eq!(state.dispatcher.inbox(&UserId::from("near"), 10).len(), 1);
        assert!(state.dispatcher.inbox(&UserId::from("victim"), 10).is_empty());
    }

    #[test]
    fn test_join_twice_notifies_once() {
        let (state, _) = state_with_users();
        let incident = state
            .dispatcher
            .raise_incident(
                CreateIncidentRequest::new(IncidentType::Medical, UserId::from("victim"), campus()),
                &[],
            )
            .unwrap();

        state.join(&incident.id, &UserId::from("near")).unwrap();
        state.join(&incident.id, &UserId::from("near")).unwrap();

        let victim_inbox = state.dispatcher.inbox(&UserId::from("victim"), 10);
        assert_eq!(victim_inbox.len(), 1);
        assert!(victim_inbox[0].notification.summary.contains("Nia"));
    }

    #[test]
    fn test_join_unknown_helper_rejected() {
        let (state, _) = state_with_users();
        let incident = state
            .dispatcher
            .raise_incident(
                CreateIncidentRequest::new(IncidentType::Other, UserId::from("victim"), campus()),
                &[],
            )
            .unwrap();
        let err = state.join(&incident.id, &UserId::from("ghost")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_inbox_is_capped() {
        let (state, _) = state_with_users();
        for i in 0..(INBOX_CAPACITY + 5) {
            state
                .award_badge(&UserId::from("near"), &format!("badge-{}", i), 10)
                .unwrap();
        }
        let inbox = state.dispatcher.inbox(&UserId::from("near"), usize::MAX);
        assert_eq!(inbox.len(), INBOX_CAPACITY);
        assert!(inbox[0].notification.summary.contains(&format!("badge-{}", INBOX_CAPACITY + 4)));
    }

    #[test]
    fn test_expired_checkin_raises_incident_once() {
        let (state, clock) = state_with_users();
        let timer = state.checkin_timer(&UserId::from("victim")).unwrap();
        timer.start("Library", 60, IncidentType::Assault).unwrap();

        clock.advance(Duration::from_secs(30));
        assert!(state.tick_checkins().is_empty());

        clock.advance(Duration::from_secs(31));
        let raised = state.tick_checkins();
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].incident_type, IncidentType::Assault);
        assert_eq!(raised[0].location, campus());

        clock.advance(Duration::from_secs(60));
        assert!(state.tick_checkins().is_empty());
        assert_eq!(timer.session().state, CheckInState::Expired);
        assert_eq!(state.backend().incidents.active_count(), 1);
        assert_eq!(state.dispatcher.inbox(&UserId::from("friend"), 10).len(), 1);
    }

    #[test]
    fn test_checkin_for_unknown_user() {
        let (state, _) = state_with_users();
        assert!(matches!(
            state.checkin_timer(&UserId::from("ghost")),
            Err(e) if e.is_not_found()
        ));
    }

    #[test]
    fn test_resolve_updates_health() {
        let (state, _) = state_with_users();
        let incident = state
            .dispatcher
            .raise_incident(
                CreateIncidentRequest::new(IncidentType::Accident, UserId::from("victim"), campus()),
                &[],
            )
            .unwrap();
        assert_eq!(state.health().active_incidents, 1);
        state.resolve(&incident.id).unwrap();
        assert_eq!(state.health().active_incidents, 0);
        assert!(state.resolve(&incident.id).unwrap_err().is_invalid_state());
    }

    #[test]
    fn test_contacts_alerted_without_inbox() {
        let (state, _) = state_with_users();
        let users = state.dispatcher.users();
        let victim = users.get(&UserId::from("victim")).unwrap();
        users.upsert(victim.with_emergency_contacts(vec![EmergencyContact::new(
            "Mom",
            "Mother",
            "+1 555-1234",
        )]));

        let incident = state
            .dispatcher
            .raise_incident(
                CreateIncidentRequest::new(IncidentType::Medical, UserId::from("victim"), campus()),
                &[],
            )
            .unwrap();
        let sent = state.dispatcher.publish(NotificationEvent::NewIncident { incident });
        let contacts: Vec<&Notification> = sent
            .iter()
            .filter(|n| n.recipient.as_user().is_none())
            .collect();
        assert_eq!(contacts.len(), 1);
        assert!(contacts[0].summary.starts_with("SOS ALERT! Vic needs help."));

        // Only app users get inbox entries.
        assert_eq!(state.dispatcher.inboxes.len(), 2);
    }

    #[test]
    fn test_sign_out_clears_checkin() {
        let (state, clock) = state_with_users();
        let victim = UserId::from("victim");
        let timer = state.checkin_timer(&victim).unwrap();
        timer.start("Library", 60, IncidentType::Other).unwrap();

        state.sign_out(&victim).unwrap();
        assert_eq!(timer.session().state, CheckInState::Idle);
        assert_eq!(timer.previous_session(), None);

        clock.advance(Duration::from_secs(120));
        assert!(state.tick_checkins().is_empty());
        assert_eq!(state.backend().incidents.active_count(), 0);

        assert!(state.sign_out(&UserId::from("ghost")).unwrap_err().is_not_found());
    }
}
