use chrono::{DateTime, Utc};

/// Recency weight in (0, 1]
///
/// Articles younger than `tau_days` get the full weight; older ones decay
/// exponentially with time constant `tau_days`.
pub fn recency_boost(published_at: DateTime<Utc>, now: DateTime<Utc>, tau_days: f64) -> f32 {
    let age_days = (now - published_at).num_days() as f64;
    let excess = (age_days - tau_days).max(0.0);
    (-excess / tau_days).exp() as f32
}
