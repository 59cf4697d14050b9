use crate::error::{CoreError, Result};
use crate::location::HelperLocator;
use crate::types::{Coordinate, IncidentType, UserId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiveAlerts {
    pub medical: bool,
    pub assault: bool,
    pub accident: bool,
    pub other: bool,
}

impl Default for ReceiveAlerts {
    fn default() -> Self {
        Self {
            medical: true,
            assault: true,
            accident: true,
            other: true,
        }
    }
}

impl ReceiveAlerts {
    pub fn accepts(&self, incident_type: IncidentType) -> bool {
        match incident_type {
            IncidentType::Medical => self.medical,
            IncidentType::Assault => self.assault,
            IncidentType::Accident => self.accident,
            IncidentType::Other => self.other,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertPreferences {
    pub receive_alerts: ReceiveAlerts,
    /// Overrides the router's default alert radius for this user.
    pub alert_radius: Option<f64>,
    pub silent_mode: bool,
}

impl AlertPreferences {
    /// Whether this user wants nearby-incident alerts of the given type at all.
    pub fn wants(&self, incident_type: IncidentType) -> bool {
        !self.silent_mode && self.receive_alerts.accepts(incident_type)
    }
}

/// Someone outside the app who is told when the user raises an SOS.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyContact {
    pub name: String,
    #[serde(default)]
    pub relationship: String,
    #[serde(default)]
    pub phone: Option<String>,
}

impl EmergencyContact {
    pub fn new(
        name: impl Into<String>,
        relationship: impl Into<String>,
        phone: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            relationship: relationship.into(),
            phone: Some(phone.into()),
        }
    }

    /// The phone number, if one is set and not blank.
    pub fn reachable_phone(&self) -> Option<&str> {
        self.phone.as_deref().map(str::trim).filter(|p| !p.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub trusted_circle: Vec<UserId>,
    #[serde(default)]
    pub location: Option<Coordinate>,
    #[serde(default)]
    pub preferences: AlertPreferences,
    #[serde(default)]
    pub emergency_contacts: Vec<EmergencyContact>,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            name: name.into(),
            trusted_circle: Vec::new(),
            location: None,
            preferences: AlertPreferences::default(),
            emergency_contacts: Vec::new(),
        }
    }

    pub fn with_trusted_circle(mut self, circle: Vec<UserId>) -> Self {
        self.trusted_circle = circle;
        self
    }

    pub fn with_location(mut self, location: Coordinate) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_preferences(mut self, preferences: AlertPreferences) -> Self {
        self.preferences = preferences;
        self
    }

    pub fn with_emergency_contacts(mut self, contacts: Vec<EmergencyContact>) -> Self {
        self.emergency_contacts = contacts;
        self
    }
}

/// Registry of known users and their last reported locations.
#[derive(Clone, Default)]
pub struct UserDirectory {
    users: Arc<DashMap<UserId, User>>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let directory = Self::new();
        for user in users {
            directory.upsert(user);
        }
        directory
    }

    pub fn upsert(&self, user: User) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn get(&self, id: &UserId) -> Result<User> {
        self.users
            .get(id)
            .map(|u| u.value().clone())
            .ok_or_else(|| CoreError::not_found(format!("user {}", id)))
    }

    /// All users, ordered by id so listings are stable.
    pub fn list(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.iter().map(|e| e.value().clone()).collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        users
    }

    pub fn update_location(&self, id: &UserId, location: Coordinate) -> Result<()> {
        location.validate()?;
        let mut user = self
            .users
            .get_mut(id)
            .ok_or_else(|| CoreError::not_found(format!("user {}", id)))?;
        user.location = Some(location);
        debug!("Location updated for {}: {}, {}", id, location.lat, location.lng);
        Ok(())
    }

    pub fn trusted_circle(&self, id: &UserId) -> Vec<UserId> {
        self.users
            .get(id)
            .map(|u| u.trusted_circle.clone())
            .unwrap_or_default()
    }

    pub fn emergency_contacts(&self, id: &UserId) -> Vec<EmergencyContact> {
        self.users
            .get(id)
            .map(|u| u.emergency_contacts.clone())
            .unwrap_or_default()
    }

    pub fn display_name(&self, id: &UserId) -> String {
        self.users
            .get(id)
            .map(|u| u.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl HelperLocator for UserDirectory {
    fn last_known_location(&self, user: &UserId) -> Option<Coordinate> {
        self.users.get(user).and_then(|u| u.location)
    }
}
