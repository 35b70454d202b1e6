pub mod geo;
pub mod models;
pub mod outcomes;

pub use geo::{BoundingBox, GeoPoint};
pub use models::*;
pub use outcomes::*;
