use crate::error::Result;
use crate::incident::{IncidentPatch, IncidentStore};
use crate::types::{Coordinate, CreateIncidentRequest, Incident, IncidentId, UserId};
use crate::users::{User, UserDirectory};

/// Request/response data collaborator the core reads from and writes to.
///
/// Implementations may be remote; retries belong to the implementation.
pub trait Backend: Send + Sync {
    fn create_incident(&self, request: CreateIncidentRequest) -> Result<Incident>;
    fn get_incident(&self, id: &IncidentId) -> Result<Incident>;
    fn list_incidents(&self) -> Result<Vec<Incident>>;
    fn update_incident(&self, id: &IncidentId, patch: IncidentPatch) -> Result<Incident>;
    fn list_users(&self) -> Result<Vec<User>>;
    fn update_user_location(&self, id: &UserId, location: Coordinate) -> Result<()>;
}

/// In-process backend: incidents and users held in memory.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    pub incidents: IncidentStore,
    pub users: UserDirectory,
}

impl MemoryBackend {
    pub fn new(incidents: IncidentStore, users: UserDirectory) -> Self {
        Self { incidents, users }
    }
}

impl Backend for MemoryBackend {
    fn create_incident(&self, request: CreateIncidentRequest) -> Result<Incident> {
        self.incidents.create(request)
    }

    fn get_incident(&self, id: &IncidentId) -> Result<Incident> {
        self.incidents.get(id)
    }

    fn list_incidents(&self) -> Result<Vec<Incident>> {
        Ok(self.incidents.list_all())
    }

    fn update_incident(&self, id: &IncidentId, patch: IncidentPatch) -> Result<Incident> {
        self.incidents.apply_patch(id, patch)
    }

    fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.users.list())
    }

    fn update_user_location(&self, id: &UserId, location: Coordinate) -> Result<()> {
        self.users.update_location(id, location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IncidentType, ServiceTag};

    #[test]
    fn test_memory_backend_round_trip() {
        let backend = MemoryBackend::new(
            IncidentStore::new(),
            UserDirectory::with_users([User::new("user1", "Sarah")]),
        );
        let here = Coordinate::new(37.7749, -122.4194).unwrap();

        let created = backend
            .create_incident(CreateIncidentRequest::new(
                IncidentType::Accident,
                UserId::from("user1"),
                here,
            ))
            .unwrap();
        assert_eq!(backend.get_incident(&created.id).unwrap(), created);
        assert_eq!(backend.list_incidents().unwrap().len(), 1);

        let updated = backend
            .update_incident(
                &created.id,
                IncidentPatch::NotifyService {
                    service: ServiceTag::Police,
                },
            )
            .unwrap();
        assert_eq!(updated.emergency_services_notified, vec![ServiceTag::Police]);

        backend
            .update_user_location(&UserId::from("user1"), here)
            .unwrap();
        assert_eq!(backend.list_users().unwrap()[0].location, Some(here));
        assert!(backend
            .update_user_location(&UserId::from("nobody"), here)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_patch_wire_format() {
        let patch: IncidentPatch =
            serde_json::from_str(r#"{"op":"markArrived","user":"user42"}"#).unwrap();
        assert_eq!(
            patch,
            IncidentPatch::MarkArrived {
                user: UserId::from("user42")
            }
        );
        let resolve: IncidentPatch = serde_json::from_str(r#"{"op":"resolve"}"#).unwrap();
        assert_eq!(resolve, IncidentPatch::Resolve);
    }
}
