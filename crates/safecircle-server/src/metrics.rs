use metrics::{counter, gauge};
use safecircle_core::{IncidentType, Severity};

pub fn record_incident_created(incident_type: IncidentType) {
    counter!("incidents_created_total", "type" => incident_type.as_str()).increment(1);
}

pub fn record_incident_resolved() {
    counter!("incidents_resolved_total").increment(1);
}

pub fn record_helper_joined() {
    counter!("helpers_joined_total").increment(1);
}

pub fn record_helper_arrived() {
    counter!("helpers_arrived_total").increment(1);
}

pub fn record_checkin_started() {
    counter!("checkin_started_total").increment(1);
}

pub fn record_checkin_expired() {
    counter!("checkin_expired_total").increment(1);
}

pub fn record_notifications(severity: Severity, count: usize) {
    counter!("notifications_total", "severity" => severity.as_str()).increment(count as u64);
}

pub fn update_active_incidents(count: usize) {
    gauge!("active_incidents").set(count as f64);
}
