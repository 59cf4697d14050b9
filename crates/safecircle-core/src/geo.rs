use crate::types::Coordinate;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine great-circle distance in meters.
pub fn distance_meters(a: &Coordinate, b: &Coordinate) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_phi = (b.lat - a.lat).to_radians();
    let d_lambda = (b.lng - a.lng).to_radians();

    let h = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Rounding can push h slightly outside [0, 1] near antipodes.
    let h = h.clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

/// Initial bearing from `a` towards `b`, in degrees clockwise from north, [0, 360).
pub fn bearing_degrees(a: &Coordinate, b: &Coordinate) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_lambda = (b.lng - a.lng).to_radians();

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();
    let bearing = y.atan2(x).to_degrees();

    let normalized = (bearing + 360.0) % 360.0;
    if normalized >= 360.0 {
        0.0
    } else {
        normalized
    }
}

/// Walking ETA in whole minutes, rounded up. Zero distance is zero minutes.
pub fn eta_minutes(distance_m: f64, speed_m_per_min: f64) -> u32 {
    if distance_m <= 0.0 || !distance_m.is_finite() || speed_m_per_min <= 0.0 {
        return 0;
    }
    (distance_m / speed_m_per_min).ceil() as u32
}
