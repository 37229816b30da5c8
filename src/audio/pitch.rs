//! Autocorrelation pitch detection

/// Correlations within this fraction of the strongest peak count as
/// candidates; the shortest candidate lag wins, which keeps sub-harmonics
/// (2x, 3x the period) from being reported as the fundamental.
const CANDIDATE_RATIO: f32 = 0.9;

/// Normalized autocorrelation of `buffer` at `lag`:
/// `(1 / (L - lag)) * sum(x[i] * x[i + lag])`.
pub fn autocorrelation(buffer: &[f32], lag: usize) -> f32 {
    let len = buffer.len();
    if lag >= len {
        return 0.0;
    }
    let sum: f32 = buffer[..len - lag]
        .iter()
        .zip(&buffer[lag..])
        .map(|(a, b)| a * b)
        .sum();
    sum / (len - lag) as f32
}

/// Fundamental-frequency estimator over a fixed lag range.
///
/// Cost is O(L * lags) per call, the dominant cost of a real-time hop.
pub struct PitchDetector {
    sample_rate: f32,
    min_lag: usize,
    max_lag: usize,
    /// Correlations for lags `min_lag - 1 ..= hi`, reused between calls
    correlation: Vec<f32>,
}

impl PitchDetector {
    /// `max_lag` is exclusive and further capped at half the analysed buffer.
    pub fn new(sample_rate: u32, min_lag: usize, max_lag: usize) -> Self {
        let min_lag = min_lag.max(1);
        Self {
            sample_rate: sample_rate as f32,
            min_lag,
            max_lag,
            correlation: Vec::with_capacity(max_lag.saturating_sub(min_lag) + 2),
        }
    }

    pub fn lag_range(&self) -> (usize, usize) {
        (self.min_lag, self.max_lag)
    }

    /// Detected pitch in Hz, or 0 when the buffer has no usable periodicity.
    pub fn detect(&mut self, buffer: &[f32]) -> f32 {
        let hi = self.max_lag.min(buffer.len() / 2);
        if self.min_lag >= hi {
            return 0.0;
        }

        let base = self.min_lag - 1;
        self.correlation.clear();
        self.correlation
            .extend((base..=hi).map(|lag| autocorrelation(buffer, lag)));
        let r = |lag: usize| self.correlation[lag - base];
        // Neighbours of every searched lag are evaluated, so both ends count
        let is_peak = |lag: usize| r(lag) > r(lag - 1) && r(lag) >= r(lag + 1);

        let strongest = (self.min_lag..hi)
            .filter(|&lag| is_peak(lag))
            .map(r)
            .fold(0.0f32, f32::max);

        if strongest > 0.0 && strongest.is_finite() {
            let threshold = strongest * CANDIDATE_RATIO;
            let lag = (self.min_lag..hi)
                .find(|&lag| is_peak(lag) && r(lag) >= threshold)
                .unwrap_or(self.min_lag);
            return self.to_hz(refine(r(lag - 1), r(lag), r(lag + 1), lag, self.min_lag, hi));
        }

        // A period just past the search bound leaves the top lag still rising
        let top = hi - 1;
        let global = (self.min_lag..hi).map(r).fold(0.0f32, f32::max);
        if top > self.min_lag
            && global.is_finite()
            && r(top) > r(top - 1)
            && r(top) > 0.0
            && r(top) >= global * CANDIDATE_RATIO
        {
            return self.to_hz(top as f32);
        }

        0.0
    }

    fn to_hz(&self, lag: f32) -> f32 {
        let pitch = self.sample_rate / lag;
        if pitch.is_finite() && pitch > 0.0 {
            pitch
        } else {
            0.0
        }
    }
}

/// Parabolic interpolation around a local maximum at `lag`, kept inside `[min_lag, hi)`.
fn refine(prev: f32, center: f32, next: f32, lag: usize, min_lag: usize, hi: usize) -> f32 {
    let denom = prev - 2.0 * center + next;
    let offset = if denom.abs() > f32::EPSILON {
        (0.5 * (prev - next) / denom).clamp(-0.5, 0.5)
    } else {
        0.0
    };
    (lag as f32 + offset).clamp(min_lag as f32, (hi - 1) as f32)
}
