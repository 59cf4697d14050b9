use crate::types::Coordinate;
use serde::{Deserialize, Serialize};

/// Tunables shared by the core components.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Radius within which nearby helpers are alerted to a new incident.
    pub alert_radius_m: f64,
    /// Assumed helper walking speed used for ETAs.
    pub walking_speed_m_per_min: f64,
    /// A running check-in below this many seconds is flagged as a warning.
    pub checkin_warning_secs: u64,
    /// Seconds added by a default check-in extension.
    pub checkin_extension_secs: u64,
    /// Used when no device location is available at auto-alert time.
    pub fallback_location: Coordinate,
    /// Description attached to incidents raised by an expired check-in.
    pub auto_alert_description: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            alert_radius_m: 1000.0,
            walking_speed_m_per_min: 80.0,
            checkin_warning_secs: 120,
            checkin_extension_secs: 10 * 60,
            fallback_location: Coordinate {
                lat: 37.7749,
                lng: -122.4194,
                accuracy: None,
            },
            auto_alert_description: "Auto-alert: check-in missed".to_string(),
        }
    }
}
