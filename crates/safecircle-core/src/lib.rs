pub mod backend;
pub mod checkin;
pub mod clock;
pub mod config;
pub mod error;
pub mod geo;
pub mod incident;
pub mod location;
pub mod notify;
pub mod response;
pub mod types;
pub mod users;

pub use backend::*;
pub use checkin::*;
pub use clock::*;
pub use config::*;
pub use error::*;
pub use geo::*;
pub use incident::*;
pub use location::*;
pub use notify::*;
pub use response::*;
pub use types::*;
pub use users::*;
