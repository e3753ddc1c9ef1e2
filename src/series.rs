//! Sample series normalization
//!
//! Raw samples arrive in whatever order the ingestion collaborator produced
//! them. Everything downstream works on a [`SampleSeries`]: timestamps sorted
//! and an effective sample rate resolved once, so that durations in seconds
//! can be turned into window lengths in samples.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{Activity, Sample};

/// How the effective sample rate of a series was determined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RateSource {
    /// Rate stated in the activity metadata
    Stated,
    /// Derived from the first and last timestamps
    TimestampSpan,
    /// Derived from sample count over activity duration
    SampleCount,
    /// Nothing usable, 1 Hz assumed
    Assumed,
}

/// Ordered samples of one activity with a resolved sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSeries {
    samples: Vec<Sample>,
    sample_rate_hz: f64,
    rate_source: RateSource,
}

impl SampleSeries {
    /// Sort `samples` by timestamp and infer the effective sample rate.
    ///
    /// Returns `None` when no sample with a finite timestamp remains.
    pub fn normalize(
        mut samples: Vec<Sample>,
        stated_rate_hz: Option<f64>,
        duration_sec: f64,
    ) -> Option<Self> {
        samples.retain(|s| s.t.is_finite());
        if samples.is_empty() {
            return None;
        }
        samples.sort_by(|a, b| a.t.total_cmp(&b.t));

        let n = samples.len();
        let span = samples[n - 1].t - samples[0].t;

        let (sample_rate_hz, rate_source) = match stated_rate_hz {
            Some(rate) if rate.is_finite() && rate > 0.0 => (rate, RateSource::Stated),
            _ if n > 1 && span > 0.0 => ((n - 1) as f64 / span, RateSource::TimestampSpan),
            _ if duration_sec.is_finite() && duration_sec > 0.0 => {
                (n as f64 / duration_sec, RateSource::SampleCount)
            }
            _ => (1.0, RateSource::Assumed),
        };

        debug!(
            samples = n,
            rate_hz = sample_rate_hz,
            source = ?rate_source,
            "Normalized sample series"
        );

        Some(Self {
            samples,
            sample_rate_hz,
            rate_source,
        })
    }

    /// Normalize the samples of an activity, consuming a copy of them
    pub fn from_activity(activity: &Activity) -> Option<Self> {
        Self::normalize(
            activity.samples.clone(),
            activity.meta.sample_rate_hz,
            activity.meta.duration_sec,
        )
    }

    /// Build a series over already-ordered samples at a known rate
    pub fn from_ordered(samples: Vec<Sample>, sample_rate_hz: f64) -> Option<Self> {
        Self::normalize(samples, Some(sample_rate_hz), 0.0)
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }

    pub fn rate_source(&self) -> RateSource {
        self.rate_source
    }

    /// Seconds covered by one sample
    pub fn sample_period(&self) -> f64 {
        1.0 / self.sample_rate_hz
    }

    /// Timestamp of the first sample
    pub fn start_t(&self) -> f64 {
        self.samples[0].t
    }

    /// Time between first and last sample plus one sample period
    pub fn span_sec(&self) -> f64 {
        self.samples[self.samples.len() - 1].t - self.start_t() + self.sample_period()
    }

    /// Window length in samples for a duration in seconds (at least 1)
    pub fn window_samples(&self, seconds: f64) -> usize {
        ((seconds * self.sample_rate_hz).round() as usize).max(1)
    }

    /// Timestamp of sample `index`, relative to the first sample
    pub fn relative_t(&self, index: usize) -> f64 {
        self.samples[index].t - self.start_t()
    }

    /// Power channel with gaps filled by zero watts so indices stay aligned with time
    pub fn power_filled(&self) -> Vec<f64> {
        self.samples
            .iter()
            .map(|s| s.power.filter(|p| p.is_finite()).unwrap_or(0.0))
            .collect()
    }

    /// Only the valid power readings, in order
    pub fn power_valid(&self) -> Vec<f64> {
        self.samples
            .iter()
            .filter_map(|s| s.power.filter(|p| p.is_finite()))
            .collect()
    }

    /// Index range `[start, end)` of samples whose relative time lies in `[from_sec, to_sec)`
    pub fn index_range(&self, from_sec: f64, to_sec: f64) -> (usize, usize) {
        let start = self
            .samples
            .partition_point(|s| s.t - self.start_t() < from_sec);
        let end = self
            .samples
            .partition_point(|s| s.t - self.start_t() < to_sec);
        (start, end.max(start))
    }
}
