//! Common time helpers for shot_core.

/// Number of milliseconds in one second.
pub const MILLIS_PER_SEC: u64 = 1_000;

/// Convert a millisecond span to seconds.
#[inline]
pub fn ms_to_s(ms: u64) -> f64 {
    ms as f64 / MILLIS_PER_SEC as f64
}

/// Clamp a timer period to at least 1 ms so a repeating timer can never spin.
#[inline]
pub fn period_ms(ms: u64) -> u64 {
    ms.max(1)
}

/// Least-squares slope (units per second) over `(ms, value)` points.
///
/// Returns 0.0 when fewer than two points are given or the time spread is degenerate.
pub fn lslr_slope_per_s(points: &[(u64, f32)]) -> f32 {
    let n = points.len();
    if n < 2 {
        return 0.0;
    }
    let t0 = points[0].0;
    let (mut sum_t, mut sum_w, mut sum_tw, mut sum_tt) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
    for &(ms, w) in points {
        let t = ms_to_s(ms.saturating_sub(t0));
        let w = f64::from(w);
        sum_t += t;
        sum_w += w;
        sum_tw += t * w;
        sum_tt += t * t;
    }
    let n = n as f64;
    let denom = n * sum_tt - sum_t * sum_t;
    if denom <= 1e-12 {
        return 0.0;
    }
    ((n * sum_tw - sum_t * sum_w) / denom) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slope_of_a_line() {
        let pts = [(0, 1.0), (500, 2.0), (1000, 3.0)];
        assert!((lslr_slope_per_s(&pts) - 2.0).abs() < 1e-5);
    }

    #[test]
    fn degenerate_inputs_give_zero() {
        assert_eq!(lslr_slope_per_s(&[]), 0.0);
        assert_eq!(lslr_slope_per_s(&[(10, 4.0)]), 0.0);
        assert_eq!(lslr_slope_per_s(&[(10, 4.0), (10, 8.0)]), 0.0);
    }

    #[test]
    fn period_never_zero() {
        assert_eq!(period_ms(0), 1);
        assert_eq!(period_ms(50), 50);
    }
}
