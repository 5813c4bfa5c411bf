use uom::si::f64::{Length, Time, Velocity};
use uom::si::length::meter;
use uom::si::time::second;
use uom::si::velocity::{kilometer_per_hour, meter_per_second};

/// Lowest speed used when turning a distance into a traversal time. Keeps
/// stationary samples from blowing up the integration.
pub const SPEED_FLOOR_KMH: f64 = 1.0;

pub fn kmh_to_mps(speed_kmh: f64) -> f64 {
    Velocity::new::<kilometer_per_hour>(speed_kmh).get::<meter_per_second>()
}

/// Distance covered in `dt_s` seconds at a constant `speed_kmh`.
pub fn distance_travelled(speed_kmh: f64, dt_s: f64) -> f64 {
    let speed = Velocity::new::<kilometer_per_hour>(speed_kmh.max(0.0));
    let length: Length = speed * Time::new::<second>(dt_s);
    length.get::<meter>()
}

/// Time needed to cover `length_m` at `speed_kmh`, with the speed clamped to
/// [`SPEED_FLOOR_KMH`].
pub fn traversal_time(length_m: f64, speed_kmh: f64) -> f64 {
    let speed = Velocity::new::<kilometer_per_hour>(speed_kmh.max(SPEED_FLOOR_KMH));
    let time: Time = Length::new::<meter>(length_m) / speed;
    time.get::<second>()
}

/// Traversal time of a segment between two samples, using the mean of the
/// speeds recorded at both ends.
///
/// Every distance-to-time conversion in the crate (lap deltas, zone and
/// sector times, braking time fraction) goes through this function so the
/// numbers reconcile with each other.
pub fn segment_time(length_m: f64, start_speed_kmh: f64, end_speed_kmh: f64) -> f64 {
    traversal_time(length_m, (start_speed_kmh + end_speed_kmh) / 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kmh_to_mps() {
        assert!((kmh_to_mps(36.0) - 10.0).abs() < 1e-9);
        assert_eq!(kmh_to_mps(0.0), 0.0);
    }

    #[test]
    fn test_traversal_time() {
        // 100 m at 36 km/h (10 m/s)
        assert!((traversal_time(100.0, 36.0) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_traversal_time_uses_speed_floor() {
        let stopped = traversal_time(10.0, 0.0);
        let floor = traversal_time(10.0, SPEED_FLOOR_KMH);
        assert_eq!(stopped, floor);
        assert!(stopped.is_finite());
    }

    #[test]
    fn test_distance_travelled() {
        assert!((distance_travelled(72.0, 0.5) - 10.0).abs() < 1e-9);
        assert_eq!(distance_travelled(-10.0, 1.0), 0.0);
    }

    #[test]
    fn test_segment_time_uses_mean_speed() {
        let t = segment_time(50.0, 30.0, 42.0);
        assert!((t - traversal_time(50.0, 36.0)).abs() < 1e-12);
    }
}
