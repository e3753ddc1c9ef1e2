//! Rolling window primitives shared by every duration-based frontier
//!
//! All searches run on prefix sums so each window average is O(1) and a full
//! scan of a series is O(N) per window length.

/// Best-average window found by a search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowBest {
    /// Arithmetic mean of the winning window
    pub average: f64,
    /// Index of the first sample in the winning window
    pub start: usize,
}

/// Prefix sums `P[i] = v[0] + ... + v[i-1]`, with `P[0] = 0`
pub fn prefix_sums(values: &[f64]) -> Vec<f64> {
    let mut sums = Vec::with_capacity(values.len() + 1);
    let mut acc = 0.0;
    sums.push(acc);
    for v in values {
        acc += v;
        sums.push(acc);
    }
    sums
}

/// Highest-average contiguous window of `window` samples.
///
/// Ties keep the earliest start. Returns `None` when `window` is zero or
/// longer than the series. The true maximum is reported even when it is
/// zero or negative.
pub fn best_window(values: &[f64], window: usize) -> Option<WindowBest> {
    best_window_where(values, window, |_| true)
}

/// [`best_window`] restricted to start indices accepted by `allowed`
pub fn best_window_where<F>(values: &[f64], window: usize, allowed: F) -> Option<WindowBest>
where
    F: Fn(usize) -> bool,
{
    if window == 0 || window > values.len() {
        return None;
    }
    let sums = prefix_sums(values);
    best_window_in_prefix(&sums, window, 0, values.len(), allowed)
}

/// Search windows lying entirely inside `[from, to)` using precomputed prefix sums.
///
/// Lets callers run many window lengths over one prefix array without
/// rebuilding it.
pub fn best_window_in_prefix<F>(
    sums: &[f64],
    window: usize,
    from: usize,
    to: usize,
    allowed: F,
) -> Option<WindowBest>
where
    F: Fn(usize) -> bool,
{
    let len = sums.len().saturating_sub(1);
    let to = to.min(len);
    if window == 0 || from >= to || window > to - from {
        return None;
    }

    let mut best: Option<WindowBest> = None;
    for start in from..=(to - window) {
        if !allowed(start) {
            continue;
        }
        let average = (sums[start + window] - sums[start]) / window as f64;
        match best {
            Some(b) if average <= b.average => {}
            _ => best = Some(WindowBest { average, start }),
        }
    }
    best
}

/// Mean of every full window of `window` samples, in start order
pub fn rolling_means(values: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || window > values.len() {
        return Vec::new();
    }
    let mut means = Vec::with_capacity(values.len() - window + 1);
    let mut sum: f64 = values[..window].iter().sum();
    means.push(sum / window as f64);
    for i in window..values.len() {
        sum += values[i] - values[i - window];
        means.push(sum / window as f64);
    }
    means
}

/// Trailing mean aligned to each sample: element `i` averages
/// `values[i + 1 - window ..= i]`, or everything available near the start.
pub fn trailing_means(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for i in 0..values.len() {
        sum += values[i];
        if i >= window {
            sum -= values[i - window];
        }
        let count = (i + 1).min(window);
        out.push(sum / count as f64);
    }
    out
}

/// Energy in joules accumulated strictly before each index.
///
/// Element `i` is the work done by samples `0..i`, each lasting
/// `sample_period` seconds; the vector has one trailing element for the
/// whole series. Negative readings contribute nothing.
pub fn cumulative_energy_before(power: &[f64], sample_period: f64) -> Vec<f64> {
    let mut energy = Vec::with_capacity(power.len() + 1);
    let mut acc = 0.0;
    energy.push(acc);
    for p in power {
        acc += p.max(0.0) * sample_period;
        energy.push(acc);
    }
    energy
}
