//! Helpers over cumulative effect timelines (`[GlucoseEffect]`).
//!
//! A timeline is well formed when its times strictly increase. Sampling
//! between points interpolates linearly; sampling outside the timeline
//! clamps to the nearest end.

use chrono::{DateTime, TimeDelta, Utc};
use glucoloop_traits::GlucoseEffect;
use glucoloop_traits::sample::minutes;

/// Times strictly increase.
pub fn is_well_formed(effects: &[GlucoseEffect]) -> bool {
    effects.windows(2).all(|w| w[1].time > w[0].time)
}

/// Value at `at`, linearly interpolated and clamped to the ends.
pub fn value_at(effects: &[GlucoseEffect], at: DateTime<Utc>) -> Option<f64> {
    let first = effects.first()?;
    let last = effects.last()?;
    if at <= first.time {
        return Some(first.quantity);
    }
    if at >= last.time {
        return Some(last.quantity);
    }
    let idx = effects.partition_point(|e| e.time <= at);
    // first.time < at < last.time, so 1 <= idx < len
    let (a, b) = (effects[idx - 1], effects[idx]);
    let span = minutes(b.time - a.time);
    if span <= 0.0 {
        return Some(b.quantity);
    }
    let frac = minutes(at - a.time) / span;
    Some(a.quantity + (b.quantity - a.quantity) * frac)
}

/// Change of the effect between two instants; zero for an empty timeline.
pub fn change_between(effects: &[GlucoseEffect], from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    match (value_at(effects, from), value_at(effects, to)) {
        (Some(a), Some(b)) => b - a,
        _ => 0.0,
    }
}

/// Round down to a multiple of `delta` since the Unix epoch.
pub fn floor_to(at: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    let step = delta.num_milliseconds().max(1);
    let ms = at.timestamp_millis();
    let floored = ms - ms.rem_euclid(step);
    DateTime::<Utc>::from_timestamp_millis(floored).unwrap_or(at)
}

/// Round up to a multiple of `delta` since the Unix epoch.
pub fn ceil_to(at: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    let floored = floor_to(at, delta);
    if floored == at { at } else { floored + delta }
}

/// Aligned grid covering `[start, end]`.
pub fn grid(start: DateTime<Utc>, end: DateTime<Utc>, delta: TimeDelta) -> Vec<DateTime<Utc>> {
    let mut out = Vec::new();
    if delta <= TimeDelta::zero() {
        return out;
    }
    let mut t = floor_to(start, delta);
    let end = ceil_to(end, delta);
    while t <= end {
        out.push(t);
        t += delta;
    }
    out
}

/// Linearly decaying velocity effect.
///
/// Starts at 0 at `start`; with `n = duration / delta` steps, step `k`
/// (1-based) adds `rate * delta * (1 - (k - 1) / n)`. `rate` is mg/dL/min.
pub fn decay_effect(
    start: DateTime<Utc>,
    rate: f64,
    duration: TimeDelta,
    delta: TimeDelta,
) -> Vec<GlucoseEffect> {
    let step_ms = delta.num_milliseconds();
    if step_ms <= 0 || duration <= TimeDelta::zero() {
        return vec![GlucoseEffect::new(start, 0.0)];
    }
    let n = (duration.num_milliseconds() / step_ms).max(1);
    let dt = minutes(delta);
    let mut out = Vec::with_capacity(n as usize + 1);
    out.push(GlucoseEffect::new(start, 0.0));
    let mut value = 0.0;
    for k in 1..=n {
        value += rate * dt * (1.0 - (k - 1) as f64 / n as f64);
        out.push(GlucoseEffect::new(start + TimeDelta::milliseconds(step_ms * k), value));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(min: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::hours(1000) + TimeDelta::minutes(min)
    }

    #[test]
    fn interpolates_and_clamps() {
        let e = vec![GlucoseEffect::new(t(0), 0.0), GlucoseEffect::new(t(10), 10.0)];
        assert_eq!(value_at(&e, t(-5)), Some(0.0));
        assert_eq!(value_at(&e, t(5)), Some(5.0));
        assert_eq!(value_at(&e, t(20)), Some(10.0));
        assert_eq!(value_at(&[], t(0)), None);
        assert_eq!(change_between(&e, t(2), t(8)), 6.0);
    }

    #[test]
    fn rounding_to_grid() {
        let d = TimeDelta::minutes(5);
        let at = t(7) + TimeDelta::seconds(30);
        assert_eq!(floor_to(at, d), t(5));
        assert_eq!(ceil_to(at, d), t(10));
        assert_eq!(ceil_to(t(10), d), t(10));
        assert_eq!(grid(t(1), t(9), d), vec![t(0), t(5), t(10)]);
    }

    #[test]
    fn decay_effect_sums_linear_steps() {
        // n = 4 steps of 5 min at 2 mg/dL/min: 10 * (1 + 0.75 + 0.5 + 0.25)
        let e = decay_effect(t(0), 2.0, TimeDelta::minutes(20), TimeDelta::minutes(5));
        assert_eq!(e.len(), 5);
        assert_eq!(e[0].quantity, 0.0);
        assert!((e[1].quantity - 10.0).abs() < 1e-12);
        assert!((e[4].quantity - 25.0).abs() < 1e-12);
        assert!(is_well_formed(&e));
    }
}
