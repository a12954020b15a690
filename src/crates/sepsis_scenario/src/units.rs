//! Simulated-time helpers. The scheduler counts in minutes; the engine wire
//! format counts in seconds.

/// Tolerance used when comparing accumulated simulated minutes.
pub const TIME_TOLERANCE_MIN: f64 = 1e-6;

pub const fn hours(n_hours: f64) -> f64 {
    n_hours * 60.
}

/// Convert seconds into minutes.
pub const fn seconds(n_seconds: f64) -> f64 {
    n_seconds / 60.
}

/// Convert minutes into seconds.
pub const fn to_seconds(n_minutes: f64) -> f64 {
    n_minutes * 60.
}
