use pika_storage::Resolution;

/// Minimum points a resolution must be able to produce over a range before
/// the planner may pick it.
const MIN_POINTS: i64 = 60;
/// Ranges at or under two hours always read the 1m series.
const SHORT_RANGE_MS: i64 = 2 * 3600 * 1000;

/// Picks the coarsest resolution whose buckets cover `to - from` with at
/// least [`MIN_POINTS`] points. Raw samples are never served to callers.
pub fn choose_resolution(from_ms: i64, to_ms: i64) -> Resolution {
    let span = (to_ms - from_ms).max(0);
    if span <= SHORT_RANGE_MS {
        return Resolution::OneMinute;
    }
    for resolution in [Resolution::OneHour, Resolution::FiveMinutes] {
        if span / resolution.millis() >= MIN_POINTS {
            return resolution;
        }
    }
    Resolution::OneMinute
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: i64 = 3600 * 1000;

    #[test]
    fn short_ranges_use_one_minute() {
        assert_eq!(choose_resolution(0, 30 * 60 * 1000), Resolution::OneMinute);
        assert_eq!(choose_resolution(0, 2 * HOUR), Resolution::OneMinute);
    }

    #[test]
    fn medium_ranges_use_five_minutes() {
        // 6h / 5m = 72 points; 6h / 1h = 6 points, too few.
        assert_eq!(choose_resolution(0, 6 * HOUR), Resolution::FiveMinutes);
        assert_eq!(choose_resolution(0, 24 * HOUR), Resolution::FiveMinutes);
    }

    #[test]
    fn long_ranges_use_one_hour() {
        // 60h / 1h = exactly 60 points.
        assert_eq!(choose_resolution(0, 60 * HOUR), Resolution::OneHour);
        assert_eq!(choose_resolution(0, 30 * 24 * HOUR), Resolution::OneHour);
    }

    #[test]
    fn boundary_just_under_sixty_hourly_points() {
        assert_eq!(choose_resolution(0, 59 * HOUR), Resolution::FiveMinutes);
    }
}
