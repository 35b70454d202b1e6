/// Geographic helpers for discovery (WGS84)
use serde::{Deserialize, Serialize};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude (-90 to 90)
    pub latitude: f64,
    /// Longitude (-180 to 180)
    pub longitude: f64,
}

/// Latitude/longitude rectangle enclosing a search circle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl GeoPoint {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn checked(latitude: f64, longitude: f64) -> Result<Self, String> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err("Invalid latitude: must be between -90 and 90".to_string());
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err("Invalid longitude: must be between -180 and 180".to_string());
        }
        Ok(Self::new(latitude, longitude))
    }

    /// Great-circle distance using the Haversine formula (meters)
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        let lat1_rad = self.latitude.to_radians();
        let lat2_rad = other.latitude.to_radians();
        let delta_lat = (other.latitude - self.latitude).to_radians();
        let delta_lon = (other.longitude - self.longitude).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_M * c
    }

    /// Rectangle that contains every point within `radius_m`.
    ///
    /// Used only as a coarse storage prefilter. Near the poles or across the
    /// antimeridian the longitude range opens to the full circle.
    pub fn bounding_box(&self, radius_m: f64) -> BoundingBox {
        let angular = radius_m / EARTH_RADIUS_M;
        let delta_lat = angular.to_degrees();
        let min_latitude = (self.latitude - delta_lat).max(-90.0);
        let max_latitude = (self.latitude + delta_lat).min(90.0);

        let cos_lat = self.latitude.to_radians().cos();
        let (min_longitude, max_longitude) = if cos_lat.abs() < 1e-6
            || min_latitude <= -90.0
            || max_latitude >= 90.0
        {
            (-180.0, 180.0)
        } else {
            let delta_lon = (angular / cos_lat).to_degrees();
            let min = self.longitude - delta_lon;
            let max = self.longitude + delta_lon;
            if min < -180.0 || max > 180.0 {
                (-180.0, 180.0)
            } else {
                (min, max)
            }
        };

        BoundingBox {
            min_latitude,
            max_latitude,
            min_longitude,
            max_longitude,
        }
    }
}

impl BoundingBox {
    pub fn contains(&self, point: &GeoPoint) -> bool {
        (self.min_latitude..=self.max_latitude).contains(&point.latitude)
            && (self.min_longitude..=self.max_longitude).contains(&point.longitude)
    }
}
