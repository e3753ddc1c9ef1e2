//! Normalized power and the guarded arithmetic used across the analytics
//!
//! Every ratio in the crate goes through [`ratio`] or [`pct_of_ftp`] so a
//! zero or missing denominator becomes `None` instead of `NaN`/`inf`, and
//! [`finite`] is the last stop before a value reaches an output structure.

use crate::rolling::rolling_means;
use crate::series::SampleSeries;

/// Real-time length of the normalized power smoothing window
pub const NP_WINDOW_SEC: f64 = 30.0;

/// `Some(x)` only for finite values
pub fn finite(x: f64) -> Option<f64> {
    x.is_finite().then_some(x)
}

/// Guarded division: `None` unless the denominator is strictly positive
pub fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator > 0.0 {
        finite(numerator / denominator)
    } else {
        None
    }
}

/// Arithmetic mean, `None` for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    ratio(values.iter().sum(), values.len() as f64)
}

/// Watts expressed as a percentage of FTP
pub fn pct_of_ftp(watts: f64, ftp: Option<f64>) -> Option<f64> {
    ftp.and_then(|f| ratio(watts * 100.0, f))
}

/// Watts per kilogram of body weight
pub fn watts_per_kg(watts: f64, weight_kg: Option<f64>) -> Option<f64> {
    weight_kg.and_then(|w| ratio(watts, w))
}

/// Round to `decimals` places, dropping non-finite values
pub fn round_to(x: f64, decimals: i32) -> Option<f64> {
    let factor = 10f64.powi(decimals);
    finite((x * factor).round() / factor)
}

/// Training Stress Score: `hours x (NP / FTP)^2 x 100`
pub fn training_stress_score(
    duration_sec: f64,
    normalized_power: f64,
    ftp: Option<f64>,
) -> Option<f64> {
    let intensity = ftp.and_then(|f| ratio(normalized_power, f))?;
    if duration_sec <= 0.0 {
        return None;
    }
    finite(duration_sec / 3600.0 * intensity * intensity * 100.0)
}

/// Normalized Power of a power trace.
///
/// Every full rolling mean of `window` samples is raised to the 4th power,
/// averaged, and the 4th root taken. `None` when fewer than `window`
/// samples are available.
pub fn normalized_power(power: &[f64], window: usize) -> Option<f64> {
    let means = rolling_means(power, window);
    if means.is_empty() {
        return None;
    }
    let mean_fourth = means.iter().map(|m| m.powi(4)).sum::<f64>() / means.len() as f64;
    finite(mean_fourth.powf(0.25))
}

/// Normalized Power over the valid power samples of a series
pub fn series_normalized_power(series: &SampleSeries) -> Option<f64> {
    normalized_power(&series.power_valid(), series.window_samples(NP_WINDOW_SEC))
}

/// Valid power readings of `series` within the index range `[start, end)`
pub fn valid_power_in(series: &SampleSeries, start: usize, end: usize) -> Vec<f64> {
    series.samples()[start..end]
        .iter()
        .filter_map(|s| s.power.filter(|p| p.is_finite()))
        .collect()
}

/// Valid heart-rate readings of `series` within the index range `[start, end)`
pub fn valid_heart_rate_in(series: &SampleSeries, start: usize, end: usize) -> Vec<f64> {
    series.samples()[start..end]
        .iter()
        .filter_map(|s| s.heart_rate.filter(|hr| hr.is_finite() && *hr > 0.0))
        .collect()
}
