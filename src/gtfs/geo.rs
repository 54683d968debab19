//! Great-circle helpers for the stop radius search.

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Haversine distance in meters between two WGS84 coordinates in degrees.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat_arc = (lat1 - lat2).to_radians();
    let lon_arc = (lon1 - lon2).to_radians();
    let lat_h = (lat_arc * 0.5).sin().powi(2);
    let lon_h = (lon_arc * 0.5).sin().powi(2);
    let cos_product = lat1.to_radians().cos() * lat2.to_radians().cos();
    EARTH_RADIUS_METERS * 2.0 * (lat_h + cos_product * lon_h).sqrt().asin()
}

/// Latitude/longitude window that fully contains a circle around a point.
#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

/// Over-approximating bounding box around `(lat, lon)` with `radius_meters`
/// of margin, used as a prefilter ahead of the exact haversine check.
pub fn bounding_box(lat: f64, lon: f64, radius_meters: f64) -> BoundingBox {
    let lat_delta = (radius_meters / EARTH_RADIUS_METERS).to_degrees();
    // Longitude degrees shrink with latitude; keep the divisor away from
    // zero so the window stays finite near the poles.
    let lon_scale = lat.to_radians().cos().abs().max(1e-6);
    let lon_delta = lat_delta / lon_scale;
    BoundingBox {
        lat_min: lat - lat_delta,
        lat_max: lat + lat_delta,
        lon_min: lon - lon_delta,
        lon_max: lon + lon_delta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_zero_for_identical_points() {
        assert_eq!(haversine_distance(52.379, 4.9, 52.379, 4.9), 0.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let there = haversine_distance(52.3791, 4.9003, 51.9244, 4.4690);
        let back = haversine_distance(51.9244, 4.4690, 52.3791, 4.9003);
        assert!((there - back).abs() < 1e-9);
    }

    #[test]
    fn amsterdam_rotterdam_is_about_58_km() {
        let distance = haversine_distance(52.3791, 4.9003, 51.9244, 4.4690);
        assert!(
            (57_000.0..60_000.0).contains(&distance),
            "got {distance} meters"
        );
    }

    #[test]
    fn adjacent_stops_are_about_130_meters_apart() {
        let distance = haversine_distance(52.380, 4.640, 52.381, 4.641);
        assert!(distance > 100.0, "got {distance} meters");
        assert!(distance < 200.0, "got {distance} meters");
    }

    #[test]
    fn bounding_box_contains_the_radius_circle() {
        let center_lat = 52.380;
        let center_lon = 4.640;
        let bounds = bounding_box(center_lat, center_lon, 500.0);
        // Points 500 m due north/south/east/west must fall inside the window.
        let lat_step = (500.0 / EARTH_RADIUS_METERS).to_degrees();
        assert!(bounds.lat_min <= center_lat - lat_step);
        assert!(bounds.lat_max >= center_lat + lat_step);
        // At Dutch latitudes the longitude window must be wider than the
        // latitude window.
        assert!((bounds.lon_max - bounds.lon_min) > (bounds.lat_max - bounds.lat_min));
        let east_edge = haversine_distance(center_lat, center_lon, center_lat, bounds.lon_max);
        assert!((east_edge - 500.0).abs() < 0.01, "got {east_edge} meters");
    }
}
