use crate::clock::{Clock, SystemClock};
use crate::error::{CoreError, Result};
use crate::types::{
    ChatMessage, CreateIncidentRequest, Incident, IncidentId, IncidentStatus, IncidentType,
    ServiceTag, UserId,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A single mutation routed through [`IncidentStore::apply_patch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum IncidentPatch {
    AddHelper { user: UserId },
    RemoveHelper { user: UserId },
    MarkArrived { user: UserId },
    AppendChat { sender: UserId, message: String },
    NotifyService { service: ServiceTag },
    Resolve,
}

/// Registry of incidents keyed by id and the only place their state changes.
///
/// Each public operation runs while holding the map entry for that incident,
/// so mutations of one incident are serialized and either apply fully or not
/// at all. Different incidents never contend beyond shard granularity.
#[derive(Clone)]
pub struct IncidentStore {
    incidents: Arc<DashMap<IncidentId, Incident>>,
    clock: Arc<dyn Clock>,
    next_seq: Arc<AtomicU64>,
}

impl IncidentStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            incidents: Arc::new(DashMap::new()),
            clock,
            next_seq: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn create(&self, request: CreateIncidentRequest) -> Result<Incident> {
        let incident_type: IncidentType = request.incident_type.parse()?;
        let location = request
            .location
            .ok_or_else(|| CoreError::validation("incident location is required"))?;
        location.validate()?;
        if request.victim.as_str().trim().is_empty() {
            return Err(CoreError::validation("incident victim is required"));
        }

        let now = self.clock.now();
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let id = IncidentId(format!("incident_{}_{}", now.timestamp_millis(), seq));
        let description = request
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        let incident = Incident {
            id: id.clone(),
            incident_type,
            victim: request.victim,
            location,
            description,
            created_at: now,
            status: IncidentStatus::Active,
            responding_helpers: Vec::new(),
            arrived_helpers: Vec::new(),
            emergency_services_notified: Vec::new(),
            chat_messages: Vec::new(),
        };

        self.incidents.insert(id, incident.clone());
        info!(
            "Incident created: {} - {} for {}",
            incident.id, incident.incident_type, incident.victim
        );
        Ok(incident)
    }

    /// Adds an existing incident document, e.g. seed data. Its invariants are checked.
    pub fn import(&self, incident: Incident) -> Result<Incident> {
        incident.location.validate()?;
        for (field, helpers) in [
            ("responding", &incident.responding_helpers),
            ("arrived", &incident.arrived_helpers),
        ] {
            if let Some(dup) = first_duplicate(helpers) {
                return Err(CoreError::validation(format!(
                    "{} helper {} listed twice",
                    field, dup
                )));
            }
        }
        if let Some(stray) = incident
            .arrived_helpers
            .iter()
            .find(|u| !incident.responding_helpers.contains(u))
        {
            return Err(CoreError::validation(format!(
                "arrived helper {} is not responding",
                stray
            )));
        }
        if incident
            .chat_messages
            .windows(2)
            .any(|w| w[1].timestamp < w[0].timestamp)
        {
            return Err(CoreError::validation("chat messages out of order"));
        }
        if self.incidents.contains_key(&incident.id) {
            return Err(CoreError::invalid_state(format!(
                "incident {} already exists",
                incident.id
            )));
        }
        self.incidents.insert(incident.id.clone(), incident.clone());
        Ok(incident)
    }

    pub fn get(&self, id: &IncidentId) -> Result<Incident> {
        self.incidents
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| CoreError::not_found(format!("incident {}", id)))
    }

    /// Active incidents, newest first.
    pub fn list_active(&self) -> Vec<Incident> {
        let mut active: Vec<Incident> = self
            .incidents
            .iter()
            .filter(|e| e.value().is_active())
            .map(|e| e.value().clone())
            .collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        active
    }

    /// Every incident regardless of status, newest first.
    pub fn list_all(&self) -> Vec<Incident> {
        let mut all: Vec<Incident> = self.incidents.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    pub fn active_count(&self) -> usize {
        self.incidents.iter().filter(|e| e.value().is_active()).count()
    }

    /// Idempotent. A resolved incident is no longer joinable and reports `NotFound`.
    pub fn add_responding_helper(&self, id: &IncidentId, user: &UserId) -> Result<Incident> {
        self.add_responding_helper_tracked(id, user).map(|(incident, _)| incident)
    }

    /// As [`Self::add_responding_helper`], also reporting whether the helper was newly added.
    pub fn add_responding_helper_tracked(
        &self,
        id: &IncidentId,
        user: &UserId,
    ) -> Result<(Incident, bool)> {
        self.mutate(id, |incident| {
            if !incident.is_active() {
                return Err(CoreError::not_found(format!(
                    "active incident {}",
                    incident.id
                )));
            }
            let added = !incident.is_responding(user);
            if added {
                incident.responding_helpers.push(user.clone());
                info!("{} responding to {}", user, incident.id);
            } else {
                debug!("{} already responding to {}", user, incident.id);
            }
            Ok((incident.clone(), added))
        })
    }

    /// Idempotent withdrawal. A helper who already arrived cannot withdraw.
    pub fn remove_responding_helper(&self, id: &IncidentId, user: &UserId) -> Result<Incident> {
        self.mutate(id, |incident| {
            ensure_active(incident, "withdraw helper")?;
            if incident.has_arrived(user) {
                return Err(CoreError::invalid_state(format!(
                    "{} already arrived at {}",
                    user, incident.id
                )));
            }
            incident.responding_helpers.retain(|u| u != user);
            Ok(incident.clone())
        })
    }

    pub fn mark_arrived(&self, id: &IncidentId, user: &UserId) -> Result<Incident> {
        self.mark_arrived_tracked(id, user).map(|(incident, _)| incident)
    }

    /// As [`Self::mark_arrived`], also reporting whether the arrival is new.
    pub fn mark_arrived_tracked(&self, id: &IncidentId, user: &UserId) -> Result<(Incident, bool)> {
        self.mutate(id, |incident| {
            ensure_active(incident, "mark arrived")?;
            if !incident.is_responding(user) {
                return Err(CoreError::invalid_state(format!(
                    "{} is not responding to {}",
                    user, incident.id
                )));
            }
            let added = !incident.has_arrived(user);
            if added {
                incident.arrived_helpers.push(user.clone());
                info!("{} arrived at {}", user, incident.id);
            } else {
                debug!("{} already arrived at {}", user, incident.id);
            }
            Ok((incident.clone(), added))
        })
    }

    pub fn append_chat_message(
        &self,
        id: &IncidentId,
        sender: &UserId,
        text: &str,
    ) -> Result<ChatMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CoreError::validation("chat message is empty"));
        }
        let now = self.clock.now();
        self.mutate(id, |incident| {
            ensure_active(incident, "append chat message")?;
            // Timestamps never go backwards even if the clock does.
            let timestamp = match incident.last_message() {
                Some(last) if last.timestamp > now => last.timestamp,
                _ => now,
            };
            let message = ChatMessage {
                id: format!("msg_{}_{}", incident.chat_messages.len() + 1, timestamp.timestamp_millis()),
                sender: sender.clone(),
                message: text.to_string(),
                timestamp,
            };
            incident.chat_messages.push(message.clone());
            Ok(message)
        })
    }

    /// Not idempotent: resolving an already resolved incident is `InvalidState`.
    pub fn resolve(&self, id: &IncidentId) -> Result<Incident> {
        self.mutate(id, |incident| {
            ensure_active(incident, "resolve")?;
            incident.status = IncidentStatus::Resolved;
            info!("Incident resolved: {}", incident.id);
            Ok(incident.clone())
        })
    }

    pub fn notify_service(&self, id: &IncidentId, service: ServiceTag) -> Result<Incident> {
        self.mutate(id, |incident| {
            ensure_active(incident, "notify service")?;
            if !incident.emergency_services_notified.contains(&service) {
                incident.emergency_services_notified.push(service);
                info!("{} notified for {}", service.as_str(), incident.id);
            }
            Ok(incident.clone())
        })
    }

    pub fn apply_patch(&self, id: &IncidentId, patch: IncidentPatch) -> Result<Incident> {
        match patch {
            IncidentPatch::AddHelper { user } => self.add_responding_helper(id, &user),
            IncidentPatch::RemoveHelper { user } => self.remove_responding_helper(id, &user),
            IncidentPatch::MarkArrived { user } => self.mark_arrived(id, &user),
            IncidentPatch::AppendChat { sender, message } => {
                self.append_chat_message(id, &sender, &message)?;
                self.get(id)
            }
            IncidentPatch::NotifyService { service } => self.notify_service(id, service),
            IncidentPatch::Resolve => self.resolve(id),
        }
    }

    fn mutate<T>(
        &self,
        id: &IncidentId,
        f: impl FnOnce(&mut Incident) -> Result<T>,
    ) -> Result<T> {
        let mut entry = self
            .incidents
            .get_mut(id)
            .ok_or_else(|| CoreError::not_found(format!("incident {}", id)))?;
        let result = f(entry.value_mut());
        if let Err(e) = &result {
            warn!("Rejected change to {}: {}", id, e);
        }
        result
    }
}

fn first_duplicate(users: &[UserId]) -> Option<&UserId> {
    users
        .iter()
        .enumerate()
        .find(|(i, u)| users[..*i].contains(*u))
        .map(|(_, u)| u)
}

impl Default for IncidentStore {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_active(incident: &Incident, action: &str) -> Result<()> {
    if incident.is_active() {
        Ok(())
    } else {
        Err(CoreError::invalid_state(format!(
            "cannot {}: incident {} is resolved",
            action, incident.id
        )))
    }
}
