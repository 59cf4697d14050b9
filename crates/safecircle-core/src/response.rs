use crate::config::CoreConfig;
use crate::error::Result;
use crate::geo::{bearing_degrees, distance_meters, eta_minutes};
use crate::incident::IncidentStore;
use crate::location::HelperLocator;
use crate::notify::NotificationEvent;
use crate::types::{Coordinate, Incident, IncidentId, IncidentStatus, IncidentType, UserId};
use serde::Serialize;
use std::sync::Arc;

/// What one helper sees about one incident right now.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HelperView {
    pub incident_id: IncidentId,
    pub incident_type: IncidentType,
    pub status: IncidentStatus,
    pub location: Coordinate,
    /// `None` when the helper's location is unknown.
    pub distance_m: Option<f64>,
    pub eta_minutes: Option<u32>,
    pub bearing_degrees: Option<f64>,
    pub responding: bool,
    pub arrived: bool,
    pub responding_count: usize,
    pub arrived_count: usize,
}

/// One row of the victim's "helpers responding" list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HelperStatus {
    pub user: UserId,
    pub distance_m: Option<f64>,
    pub eta_minutes: Option<u32>,
    pub arrived: bool,
}

/// Outcome of a helper action. `event` is `None` when the action was redundant,
/// so nobody gets notified twice.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseUpdate {
    pub incident: Incident,
    pub event: Option<NotificationEvent>,
}

/// Helper-side operations on one incident. Distances and ETAs are recomputed on
/// every call from the latest known helper location.
#[derive(Clone)]
pub struct ResponseCoordinator {
    store: IncidentStore,
    locator: Arc<dyn HelperLocator>,
    walking_speed_m_per_min: f64,
}

impl ResponseCoordinator {
    pub fn new(store: IncidentStore, locator: Arc<dyn HelperLocator>, config: &CoreConfig) -> Self {
        Self {
            store,
            locator,
            walking_speed_m_per_min: config.walking_speed_m_per_min,
        }
    }

    pub fn join(&self, incident_id: &IncidentId, helper: &UserId) -> Result<ResponseUpdate> {
        let (incident, added) = self.store.add_responding_helper_tracked(incident_id, helper)?;
        let event = added.then(|| NotificationEvent::HelperJoined {
            incident: incident.clone(),
            helper: helper.clone(),
        });
        Ok(ResponseUpdate { incident, event })
    }

    pub fn mark_arrived(&self, incident_id: &IncidentId, helper: &UserId) -> Result<ResponseUpdate> {
        let (incident, added) = self.store.mark_arrived_tracked(incident_id, helper)?;
        let event = added.then(|| NotificationEvent::HelperArrived {
            incident: incident.clone(),
            helper: helper.clone(),
        });
        Ok(ResponseUpdate { incident, event })
    }

    pub fn leave(&self, incident_id: &IncidentId, helper: &UserId) -> Result<Incident> {
        self.store.remove_responding_helper(incident_id, helper)
    }

    /// View using the helper's last known location.
    pub fn view(&self, incident_id: &IncidentId, helper: &UserId) -> Result<HelperView> {
        let incident = self.store.get(incident_id)?;
        let location = self.locator.last_known_location(helper);
        Ok(self.build_view(&incident, helper, location))
    }

    /// View using a location the helper just reported.
    pub fn view_from(
        &self,
        incident_id: &IncidentId,
        helper: &UserId,
        location: Coordinate,
    ) -> Result<HelperView> {
        location.validate()?;
        let incident = self.store.get(incident_id)?;
        Ok(self.build_view(&incident, helper, Some(location)))
    }

    /// Responding helpers in join order with fresh distances.
    pub fn roster(&self, incident_id: &IncidentId) -> Result<Vec<HelperStatus>> {
        let incident = self.store.get(incident_id)?;
        Ok(incident
            .responding_helpers
            .iter()
            .map(|user| {
                let distance = self
                    .locator
                    .last_known_location(user)
                    .map(|loc| distance_meters(&loc, &incident.location));
                HelperStatus {
                    user: user.clone(),
                    distance_m: distance,
                    eta_minutes: distance.map(|d| eta_minutes(d, self.walking_speed_m_per_min)),
                    arrived: incident.has_arrived(user),
                }
            })
            .collect())
    }

    fn build_view(
        &self,
        incident: &Incident,
        helper: &UserId,
        location: Option<Coordinate>,
    ) -> HelperView {
        let distance = location.map(|loc| distance_meters(&loc, &incident.location));
        HelperView {
            incident_id: incident.id.clone(),
            incident_type: incident.incident_type,
            status: incident.status,
            location: incident.location,
            distance_m: distance,
            eta_minutes: distance.map(|d| eta_minutes(d, self.walking_speed_m_per_min)),
            bearing_degrees: location.map(|loc| bearing_degrees(&loc, &incident.location)),
            responding: incident.is_responding(helper),
            arrived: incident.has_arrived(helper),
            responding_count: incident.responding_helpers.len(),
            arrived_count: incident.arrived_helpers.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CreateIncidentRequest;
    use crate::users::{User, UserDirectory};

    fn coord(lat: f64, lng: f64) -> Coordinate {
        Coordinate::new(lat, lng).unwrap()
    }

    fn setup() -> (ResponseCoordinator, UserDirectory, Incident) {
        let store = IncidentStore::new();
        let directory = UserDirectory::with_users([
            User::new("victim", "Sarah"),
            User::new("mike", "Mike").with_location(coord(37.7849, -122.4294)),
            User::new("emma", "Emma"),
        ]);
        let incident = store
            .create(CreateIncidentRequest::new(
                IncidentType::Medical,
                UserId::from("victim"),
                coord(37.7749, -122.4194),
            ))
            .unwrap();
        let coordinator =
            ResponseCoordinator::new(store, Arc::new(directory.clone()), &CoreConfig::default());
        (coordinator, directory, incident)
    }

    #[test]
    fn test_join_emits_event_once() {
        let (coordinator, _, incident) = setup();
        let mike = UserId::from("mike");

        let first = coordinator.join(&incident.id, &mike).unwrap();
        assert!(matches!(
            first.event,
            Some(NotificationEvent::HelperJoined { .. })
        ));
        let second = coordinator.join(&incident.id, &mike).unwrap();
        assert_eq!(second.event, None);
        assert_eq!(second.incident.responding_helpers, vec![mike]);
    }

    #[test]
    fn test_arrive_requires_join() {
        let (coordinator, _, incident) = setup();
        let emma = UserId::from("emma");
        assert!(coordinator
            .mark_arrived(&incident.id, &emma)
            .unwrap_err()
            .is_invalid_state());

        coordinator.join(&incident.id, &emma).unwrap();
        let update = coordinator.mark_arrived(&incident.id, &emma).unwrap();
        assert!(matches!(
            update.event,
            Some(NotificationEvent::HelperArrived { .. })
        ));
        assert_eq!(coordinator.mark_arrived(&incident.id, &emma).unwrap().event, None);
    }

    #[test]
    fn test_view_recomputes_with_location_changes() {
        let (coordinator, directory, incident) = setup();
        let mike = UserId::from("mike");
        coordinator.join(&incident.id, &mike).unwrap();

        let before = coordinator.view(&incident.id, &mike).unwrap();
        let d = before.distance_m.unwrap();
        assert!(d > 1300.0 && d < 1500.0);
        assert_eq!(before.eta_minutes, Some((d / 80.0).ceil() as u32));
        assert!(before.responding);
        assert!(!before.arrived);
        // Helper is north-west of the incident, so heads south-east.
        let bearing = before.bearing_degrees.unwrap();
        assert!(bearing > 90.0 && bearing < 180.0);

        directory
            .update_location(&mike, coord(37.7749, -122.4194))
            .unwrap();
        let after = coordinator.view(&incident.id, &mike).unwrap();
        assert_eq!(after.distance_m, Some(0.0));
        assert_eq!(after.eta_minutes, Some(0));
    }

    #[test]
    fn test_view_without_location() {
        let (coordinator, _, incident) = setup();
        let view = coordinator.view(&incident.id, &UserId::from("emma")).unwrap();
        assert_eq!(view.distance_m, None);
        assert_eq!(view.eta_minutes, None);
        assert!(!view.responding);

        let explicit = coordinator
            .view_from(&incident.id, &UserId::from("emma"), coord(37.7757, -122.4194))
            .unwrap();
        assert_eq!(explicit.eta_minutes, Some(2));
    }

    #[test]
    fn test_roster_and_leave() {
        let (coordinator, _, incident) = setup();
        let mike = UserId::from("mike");
        let emma = UserId::from("emma");
        coordinator.join(&incident.id, &mike).unwrap();
        coordinator.join(&incident.id, &emma).unwrap();
        coordinator.mark_arrived(&incident.id, &mike).unwrap();

        let roster = coordinator.roster(&incident.id).unwrap();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].user, mike);
        assert!(roster[0].arrived);
        assert!(roster[0].distance_m.is_some());
        assert_eq!(roster[1].distance_m, None);

        let after = coordinator.leave(&incident.id, &emma).unwrap();
        assert_eq!(after.responding_helpers, vec![mike.clone()]);
        assert!(coordinator.leave(&incident.id, &mike).unwrap_err().is_invalid_state());
    }

    #[test]
    fn test_unknown_incident() {
        let (coordinator, _, _) = setup();
        let missing = IncidentId::from("missing");
        assert!(coordinator
            .view(&missing, &UserId::from("mike"))
            .unwrap_err()
            .is_not_found());
        assert!(coordinator
            .join(&missing, &UserId::from("mike"))
            .unwrap_err()
            .is_not_found());
    }
}
