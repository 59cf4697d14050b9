use crate::config::CoreConfig;
use crate::geo::distance_meters;
use crate::types::{ChatMessage, Coordinate, Incident, IncidentId, UserId};
use crate::users::{AlertPreferences, EmergencyContact, UserDirectory};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const CHAT_SUMMARY_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    NewIncident {
        incident: Incident,
    },
    HelperJoined {
        incident: Incident,
        helper: UserId,
    },
    HelperArrived {
        incident: Incident,
        helper: UserId,
    },
    ChatMessage {
        incident: Incident,
        message: ChatMessage,
    },
    BadgeUnlocked {
        user: UserId,
        badge: String,
        points: u32,
    },
}

impl NotificationEvent {
    pub fn kind(&self) -> NotificationKind {
        match self {
            NotificationEvent::NewIncident { .. } => NotificationKind::NewIncident,
            NotificationEvent::HelperJoined { .. } => NotificationKind::HelperJoined,
            NotificationEvent::HelperArrived { .. } => NotificationKind::HelperArrived,
            NotificationEvent::ChatMessage { .. } => NotificationKind::ChatMessage,
            NotificationEvent::BadgeUnlocked { .. } => NotificationKind::BadgeUnlocked,
        }
    }

    pub fn severity(&self) -> Severity {
        match self.kind() {
            NotificationKind::NewIncident => Severity::High,
            NotificationKind::HelperArrived => Severity::Medium,
            NotificationKind::HelperJoined
            | NotificationKind::ChatMessage
            | NotificationKind::BadgeUnlocked => Severity::Low,
        }
    }

    pub fn incident_id(&self) -> Option<&IncidentId> {
        match self {
            NotificationEvent::NewIncident { incident }
            | NotificationEvent::HelperJoined { incident, .. }
            | NotificationEvent::HelperArrived { incident, .. }
            | NotificationEvent::ChatMessage { incident, .. } => Some(&incident.id),
            NotificationEvent::BadgeUnlocked { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationKind {
    NewIncident,
    HelperJoined,
    HelperArrived,
    ChatMessage,
    BadgeUnlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// An app user's inbox, or an outside emergency contact reached by phone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Recipient {
    User(UserId),
    Contact(EmergencyContact),
}

impl Recipient {
    pub fn as_user(&self) -> Option<&UserId> {
        match self {
            Recipient::User(id) => Some(id),
            Recipient::Contact(_) => None,
        }
    }
}

/// Who gets told what. Delivery (toast, push, SMS) is someone else's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub recipient: Recipient,
    pub summary: String,
    pub severity: Severity,
    pub kind: NotificationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<IncidentId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HelperCandidate {
    pub user: UserId,
    pub location: Option<Coordinate>,
    pub preferences: AlertPreferences,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecipientPolicy {
    /// Always notified of the victim's incidents.
    pub trusted_circle: Vec<UserId>,
    /// Potential nearby helpers, with their last known location.
    pub candidates: Vec<HelperCandidate>,
    pub display_names: HashMap<UserId, String>,
    /// The victim's outside contacts. Only those with a phone are alerted.
    pub emergency_contacts: Vec<EmergencyContact>,
}

impl RecipientPolicy {
    /// Builds the policy for incidents of `victim` from the user directory.
    pub fn from_directory(directory: &UserDirectory, victim: &UserId) -> Self {
        let users = directory.list();
        let trusted_circle = directory.trusted_circle(victim);
        let emergency_contacts = directory.emergency_contacts(victim);
        let candidates = users
            .iter()
            .map(|u| HelperCandidate {
                user: u.id.clone(),
                location: u.location,
                preferences: u.preferences.clone(),
            })
            .collect();
        let display_names = users
            .into_iter()
            .map(|u| (u.id, u.name))
            .collect();
        Self {
            trusted_circle,
            candidates,
            display_names,
            emergency_contacts,
        }
    }

    fn name_of(&self, user: &UserId) -> String {
        self.display_names
            .get(user)
            .cloned()
            .unwrap_or_else(|| user.to_string())
    }
}

/// Stateless fan-out from incident events to per-recipient notifications.
#[derive(Debug, Clone)]
pub struct NotificationRouter {
    alert_radius_m: f64,
}

impl NotificationRouter {
    pub fn new(alert_radius_m: f64) -> Self {
        Self { alert_radius_m }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(config.alert_radius_m)
    }

    pub fn route(&self, event: &NotificationEvent, policy: &RecipientPolicy) -> Vec<Notification> {
        let severity = event.severity();
        let kind = event.kind();
        let incident_id = event.incident_id().cloned();
        let make = |recipient: UserId, summary: String| Notification {
            recipient: Recipient::User(recipient),
            summary,
            severity,
            kind,
            incident_id: incident_id.clone(),
        };

        match event {
            NotificationEvent::NewIncident { incident } => {
                let mut out: Vec<Notification> = self
                    .new_incident_recipients(incident, policy)
                    .into_iter()
                    .map(|(recipient, summary)| make(recipient, summary))
                    .collect();
                out.extend(
                    sos_contacts(incident, policy)
                        .into_iter()
                        .map(|(contact, summary)| Notification {
                            recipient: Recipient::Contact(contact),
                            summary,
                            severity,
                            kind,
                            incident_id: incident_id.clone(),
                        }),
                );
                out
            }
            NotificationEvent::HelperJoined { incident, helper } => {
                let summary = format!("{} is responding", policy.name_of(helper));
                incident_party(incident, helper)
                    .into_iter()
                    .map(|r| make(r, summary.clone()))
                    .collect()
            }
            NotificationEvent::HelperArrived { incident, helper } => {
                let summary = format!("{} has arrived", policy.name_of(helper));
                incident_party(incident, helper)
                    .into_iter()
                    .map(|r| make(r, summary.clone()))
                    .collect()
            }
            NotificationEvent::ChatMessage { incident, message } => {
                let summary = format!(
                    "{}: {}",
                    policy.name_of(&message.sender),
                    truncate_chars(&message.message, CHAT_SUMMARY_CHARS)
                );
                incident_party(incident, &message.sender)
                    .into_iter()
                    .map(|r| make(r, summary.clone()))
                    .collect()
            }
            NotificationEvent::BadgeUnlocked {
                user,
                badge,
                points,
            } => vec![make(
                user.clone(),
                format!("Badge unlocked: {} (+{} points)", badge, points),
            )],
        }
    }

    /// Trusted circle first, then helpers in range ordered by distance.
    fn new_incident_recipients(
        &self,
        incident: &Incident,
        policy: &RecipientPolicy,
    ) -> Vec<(UserId, String)> {
        let victim_name = policy.name_of(&incident.victim);
        let mut recipients: Vec<(UserId, String)> = Vec::new();

        for member in &policy.trusted_circle {
            if member == &incident.victim || recipients.iter().any(|(r, _)| r == member) {
                continue;
            }
            recipients.push((
                member.clone(),
                format!(
                    "{} Emergency: {} in your trusted circle needs help",
                    incident.incident_type, victim_name
                ),
            ));
        }

        let mut nearby: Vec<(f64, &HelperCandidate)> = policy
            .candidates
            .iter()
            .filter(|c| c.user != incident.victim)
            .filter(|c| c.preferences.wants(incident.incident_type))
            .filter_map(|c| {
                let location = c.location?;
                let distance = distance_meters(&location, &incident.location);
                let radius = c.preferences.alert_radius.unwrap_or(self.alert_radius_m);
                (distance <= radius).then_some((distance, c))
            })
            .collect();
        nearby.sort_by(|a, b| a.0.total_cmp(&b.0));

        for (distance, candidate) in nearby {
            if recipients.iter().any(|(r, _)| r == &candidate.user) {
                continue;
            }
            recipients.push((
                candidate.user.clone(),
                format!(
                    "{} Emergency: {}m away - {} needs help",
                    incident.incident_type,
                    distance.round() as u64,
                    victim_name
                ),
            ));
        }

        recipients
    }
}

impl Default for NotificationRouter {
    fn default() -> Self {
        Self::from_config(&CoreConfig::default())
    }
}

/// SOS text for each of the victim's contacts that has a phone, one per number.
fn sos_contacts(
    incident: &Incident,
    policy: &RecipientPolicy,
) -> Vec<(EmergencyContact, String)> {
    let summary = format!(
        "SOS ALERT! {} needs help. Type: {}. Location: https://www.google.com/maps?q={},{}",
        policy.name_of(&incident.victim),
        incident.incident_type,
        incident.location.lat,
        incident.location.lng
    );
    let mut seen: Vec<&str> = Vec::new();
    let mut out = Vec::new();
    for contact in &policy.emergency_contacts {
        let Some(phone) = contact.reachable_phone() else {
            continue;
        };
        if seen.contains(&phone) {
            continue;
        }
        seen.push(phone);
        out.push((contact.clone(), summary.clone()));
    }
    out
}

/// Victim plus responding helpers, minus whoever caused the event.
fn incident_party(incident: &Incident, actor: &UserId) -> Vec<UserId> {
    let mut party: Vec<UserId> = Vec::with_capacity(incident.responding_helpers.len() + 1);
    for user in std::iter::once(&incident.victim).chain(incident.responding_helpers.iter()) {
        if user != actor && !party.contains(user) {
            party.push(user.clone());
        }
    }
    party
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
        cut.push('…');
        cut
    }
}
