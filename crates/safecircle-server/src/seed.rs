use chrono::{DateTime, Duration, Utc};
use safecircle_core::{
    AlertPreferences, ChatMessage, Coordinate, EmergencyContact, Incident, IncidentId,
    IncidentStatus, IncidentType, ReceiveAlerts, Result, ServiceTag, User, UserId,
};
use tracing::info;

use crate::state::AppState;

struct SeedUser {
    id: &'static str,
    name: &'static str,
    circle: &'static [&'static str],
    lat: f64,
    lng: f64,
    radius: f64,
    accident_alerts: bool,
    /// (name, relationship, phone)
    contacts: &'static [(&'static str, &'static str, &'static str)],
}

const USERS: &[SeedUser] = &[
    SeedUser {
        id: "user1",
        name: "Sarah Johnson",
        circle: &["user2", "user3", "user4"],
        lat: 37.7751,
        lng: -122.4196,
        radius: 1000.0,
        accident_alerts: true,
        contacts: &[
            ("Emergency Contact", "Primary", "+91 9675852627"),
            ("Mom", "Mother", "+1 555-1234"),
        ],
    },
    SeedUser {
        id: "user2",
        name: "Mike Chen",
        circle: &["user1", "user5"],
        lat: 37.7762,
        lng: -122.4178,
        radius: 1500.0,
        accident_alerts: true,
        contacts: &[("Emily Chen", "Sister", "+1 555-2234")],
    },
    SeedUser {
        id: "user3",
        name: "Emma Wilson",
        circle: &["user1", "user2"],
        lat: 37.7737,
        lng: -122.4203,
        radius: 800.0,
        accident_alerts: false,
        contacts: &[("Mom", "Mother", "+1 555-3234")],
    },
    SeedUser {
        id: "user4",
        name: "James Rodriguez",
        circle: &["user1", "user5"],
        lat: 37.7771,
        lng: -122.4215,
        radius: 2000.0,
        accident_alerts: true,
        contacts: &[("Maria Rodriguez", "Mother", "+1 555-4234")],
    },
    SeedUser {
        id: "user5",
        name: "Lily Park",
        circle: &["user2", "user4"],
        lat: 37.7758,
        lng: -122.4186,
        radius: 1500.0,
        accident_alerts: true,
        contacts: &[("David Park", "Father", "+1 555-5234")],
    },
];

fn ids(raw: &[&str]) -> Vec<UserId> {
    raw.iter().map(|id| UserId::from(*id)).collect()
}

fn message(id: &str, sender: &str, text: &str, at: DateTime<Utc>) -> ChatMessage {
    ChatMessage {
        id: id.to_string(),
        sender: UserId::from(sender),
        message: text.to_string(),
        timestamp: at,
    }
}

fn seed_users() -> Result<Vec<User>> {
    USERS
        .iter()
        .map(|u| {
            let preferences = AlertPreferences {
                receive_alerts: ReceiveAlerts {
                    accident: u.accident_alerts,
                    ..ReceiveAlerts::default()
                },
                alert_radius: Some(u.radius),
                silent_mode: false,
            };
            Ok(User::new(u.id, u.name)
                .with_trusted_circle(ids(u.circle))
                .with_location(Coordinate::new(u.lat, u.lng)?)
                .with_preferences(preferences)
                .with_emergency_contacts(
                    u.contacts
                        .iter()
                        .map(|(name, relationship, phone)| {
                            EmergencyContact::new(*name, *relationship, *phone)
                        })
                        .collect(),
                ))
        })
        .collect()
}

fn seed_incidents(now: DateTime<Utc>) -> Result<Vec<Incident>> {
    let ago = |secs: i64| now - Duration::seconds(secs);
    Ok(vec![
        Incident {
            id: IncidentId::from("incident1"),
            incident_type: IncidentType::Medical,
            victim: UserId::from("user1"),
            location: Coordinate::new(37.7749, -122.4194)?,
            description: Some("Feeling dizzy and disoriented".to_string()),
            created_at: ago(180),
            status: IncidentStatus::Active,
            responding_helpers: ids(&["user2", "user4", "user5"]),
            arrived_helpers: Vec::new(),
            emergency_services_notified: vec![ServiceTag::CampusSecurity, ServiceTag::Ambulance],
            chat_messages: vec![
                message("msg1", "user2", "I'm 2 minutes away with first aid kit", ago(120)),
                message("msg2", "user1", "I'm at the library near the entrance", ago(90)),
                message("msg3", "user4", "Campus security has been notified", ago(60)),
            ],
        },
        Incident {
            id: IncidentId::from("incident2"),
            incident_type: IncidentType::Assault,
            victim: UserId::from("user3"),
            location: Coordinate::new(37.7739, -122.4200)?,
            description: Some("Feeling unsafe, someone following me".to_string()),
            created_at: ago(300),
            status: IncidentStatus::Active,
            responding_helpers: ids(&["user4"]),
            arrived_helpers: Vec::new(),
            emergency_services_notified: vec![ServiceTag::CampusSecurity, ServiceTag::Police],
            chat_messages: vec![
                message("msg4", "user4", "On my way, stay in well-lit area", ago(180)),
                message(
                    "msg5",
                    "user3",
                    "I'm near the campus store, moving towards the lot entrance",
                    ago(120),
                ),
            ],
        },
        Incident {
            id: IncidentId::from("incident3"),
            incident_type: IncidentType::Accident,
            victim: UserId::from("user2"),
            location: Coordinate::new(37.7759, -122.4184)?,
            description: Some("Twisted ankle during basketball".to_string()),
            created_at: ago(480),
            status: IncidentStatus::Active,
            responding_helpers: ids(&["user5"]),
            arrived_helpers: ids(&["user5"]),
            emergency_services_notified: vec![ServiceTag::CampusSecurity],
            chat_messages: vec![message(
                "msg6",
                "user5",
                "I'm here with ice pack and compression wrap",
                ago(60),
            )],
        },
    ])
}

/// Loads the demo campus: five users and three active incidents.
pub fn load(state: &AppState) -> Result<()> {
    let users = seed_users()?;
    let user_count = users.len();
    for user in users {
        state.dispatcher.users().upsert(user);
    }

    let incidents = seed_incidents(state.clock.now())?;
    let incident_count = incidents.len();
    for incident in incidents {
        state.backend().incidents.import(incident)?;
    }
    state.dispatcher.refresh_active_gauge();

    info!(
        "Seeded {} users and {} incidents",
        user_count, incident_count
    );
    Ok(())
}
