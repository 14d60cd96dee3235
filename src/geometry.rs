//! Projection helpers shared by the tessellation and the map matcher.

use geo::{Distance, Haversine, Point};

const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Web Mercator latitude limit.
const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Projects WGS84 degrees to Web Mercator (EPSG:3857) meters.
pub fn to_mercator(lng: f64, lat: f64) -> [f64; 2] {
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let x = EARTH_RADIUS_M * lng.to_radians();
    let y = EARTH_RADIUS_M * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    [x, y]
}

/// Inverse of [`to_mercator`].
pub fn from_mercator(x: f64, y: f64) -> (f64, f64) {
    let lng = (x / EARTH_RADIUS_M).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS_M).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    (lng, lat)
}

/// Great-circle distance in meters.
pub fn haversine_m(lng1: f64, lat1: f64, lng2: f64, lat2: f64) -> f64 {
    Haversine.distance(Point::new(lng1, lat1), Point::new(lng2, lat2))
}
