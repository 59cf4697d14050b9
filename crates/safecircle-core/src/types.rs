use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncidentId(pub String);

impl IncidentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IncidentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IncidentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A point on the globe. `accuracy` is the reported radius in meters, if any.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

impl Coordinate {
    /// Validated constructor: both components finite, lat in [-90, 90], lng in [-180, 180].
    pub fn new(lat: f64, lng: f64) -> Result<Self> {
        let coord = Self {
            lat,
            lng,
            accuracy: None,
        };
        coord.validate()?;
        Ok(coord)
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.lat.is_finite() || !self.lng.is_finite() {
            return Err(CoreError::validation("coordinate must be finite"));
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(CoreError::validation(format!(
                "latitude {} out of range",
                self.lat
            )));
        }
        if !(-180.0..=180.0).contains(&self.lng) {
            return Err(CoreError::validation(format!(
                "longitude {} out of range",
                self.lng
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IncidentType {
    Medical,
    Assault,
    Accident,
    Other,
}

impl IncidentType {
    pub const ALL: [IncidentType; 4] = [
        IncidentType::Medical,
        IncidentType::Assault,
        IncidentType::Accident,
        IncidentType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentType::Medical => "Medical",
            IncidentType::Assault => "Assault",
            IncidentType::Accident => "Accident",
            IncidentType::Other => "Other",
        }
    }
}

impl fmt::Display for IncidentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncidentType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        IncidentType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CoreError::validation(format!("unknown incident type '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Active,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceTag {
    CampusSecurity,
    Police,
    Ambulance,
}

impl ServiceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceTag::CampusSecurity => "CampusSecurity",
            ServiceTag::Police => "Police",
            ServiceTag::Ambulance => "Ambulance",
        }
    }
}

impl FromStr for ServiceTag {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "CampusSecurity" | "campus_security" | "campus-security" => {
                Ok(ServiceTag::CampusSecurity)
            }
            "Police" | "police" => Ok(ServiceTag::Police),
            "Ambulance" | "ambulance" => Ok(ServiceTag::Ambulance),
            other => Err(CoreError::validation(format!(
                "unknown emergency service '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub sender: UserId,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// One emergency. Field names match the storage documents of the mock API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: IncidentId,
    #[serde(rename = "type")]
    pub incident_type: IncidentType,
    pub victim: UserId,
    pub location: Coordinate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
    pub status: IncidentStatus,
    #[serde(default)]
    pub responding_helpers: Vec<UserId>,
    #[serde(default)]
    pub arrived_helpers: Vec<UserId>,
    #[serde(default)]
    pub emergency_services_notified: Vec<ServiceTag>,
    #[serde(default)]
    pub chat_messages: Vec<ChatMessage>,
}

impl Incident {
    pub fn is_active(&self) -> bool {
        self.status == IncidentStatus::Active
    }

    pub fn is_responding(&self, user: &UserId) -> bool {
        self.responding_helpers.contains(user)
    }

    pub fn has_arrived(&self, user: &UserId) -> bool {
        self.arrived_helpers.contains(user)
    }

    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.chat_messages.last()
    }
}

/// Input to incident creation. `incident_type` stays a raw string so that an
/// unrecognised value surfaces as a validation error instead of a decode failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIncidentRequest {
    #[serde(rename = "type")]
    pub incident_type: String,
    pub victim: UserId,
    #[serde(default)]
    pub location: Option<Coordinate>,
    #[serde(default)]
    pub description: Option<String>,
}

impl CreateIncidentRequest {
    pub fn new(incident_type: IncidentType, victim: UserId, location: Coordinate) -> Self {
        Self {
            incident_type: incident_type.as_str().to_string(),
            victim,
            location: Some(location),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
