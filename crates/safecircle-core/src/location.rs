use crate::types::{Coordinate, UserId};
use std::sync::RwLock;

/// The device location of the user who owns a check-in session.
pub trait LocationProvider: Send + Sync {
    fn current_location(&self) -> Option<Coordinate>;
}

/// Last reported location of any user, used to place helpers relative to incidents.
pub trait HelperLocator: Send + Sync {
    fn last_known_location(&self, user: &UserId) -> Option<Coordinate>;
}

/// Location provider backed by a settable value.
#[derive(Debug, Default)]
pub struct FixedLocation {
    location: RwLock<Option<Coordinate>>,
}

impl FixedLocation {
    pub fn at(location: Coordinate) -> Self {
        Self {
            location: RwLock::new(Some(location)),
        }
    }

    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn set(&self, location: Option<Coordinate>) {
        *self.location.write().unwrap_or_else(|e| e.into_inner()) = location;
    }
}

impl LocationProvider for FixedLocation {
    fn current_location(&self) -> Option<Coordinate> {
        *self.location.read().unwrap_or_else(|e| e.into_inner())
    }
}
