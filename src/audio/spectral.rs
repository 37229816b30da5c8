//! Spectral shape descriptors over a byte-valued spectrum (fallback path)

use serde::{Deserialize, Serialize};

/// Bins at or below this amplitude are never reported as peaks
pub const PEAK_FLOOR: u8 = 100;

/// Maximum number of peaks kept per snapshot
pub const MAX_PEAKS: usize = 10;

/// Midpoint of the byte range used for zero-crossing counting
pub const BYTE_MIDPOINT: u8 = 128;

/// A strict local maximum of the spectrum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peak {
    pub bin_index: usize,
    pub amplitude: u8,
}

/// Features published by the fallback path on every analysis tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpectralSnapshot {
    /// Byte spectrum (0-255), N/2 bins
    pub bins: Vec<u8>,

    /// Band averages normalized to 0-1
    pub bass: f32,
    pub mid: f32,
    pub treble: f32,

    /// Sum of squares normalized to 0-1
    pub energy: f32,

    /// Mean bin value normalized to 0-1
    pub average: f32,

    /// Center of mass, in bin index units
    pub spectral_centroid: f32,

    /// Fraction of the spectrum below the rolloff point (0-1)
    pub spectral_rolloff: f32,

    pub zero_crossing_rate: f32,

    pub peaks: Vec<Peak>,

    /// Per-session snapshot counter
    pub sequence: u64,
}

/// Order in which detected peaks are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeakOrder {
    /// First peaks found scanning from bin 0
    #[default]
    ScanOrder,
    /// Loudest peaks first
    Amplitude,
}

/// Derives [`SpectralSnapshot`]s from byte spectra.
#[derive(Debug, Clone)]
pub struct SpectralFeatureEngine {
    rolloff_threshold: f32,
    peak_order: PeakOrder,
}

impl SpectralFeatureEngine {
    pub fn new(rolloff_threshold: f32, peak_order: PeakOrder) -> Self {
        Self {
            rolloff_threshold,
            peak_order,
        }
    }

    pub fn extract(&self, data: &[u8], sequence: u64) -> SpectralSnapshot {
        let (bass, mid, treble) = band_energies(data);
        let len = data.len().max(1) as f32;
        let sum: f32 = data.iter().map(|&v| v as f32).sum();
        let sum_squares: f32 = data.iter().map(|&v| (v as f32) * (v as f32)).sum();

        SpectralSnapshot {
            bins: data.to_vec(),
            bass,
            mid,
            treble,
            energy: sum_squares / (len * 255.0 * 255.0),
            average: sum / len / 255.0,
            spectral_centroid: spectral_centroid(data),
            spectral_rolloff: spectral_rolloff(data, self.rolloff_threshold),
            zero_crossing_rate: zero_crossing_rate(data),
            peaks: find_peaks(data, self.peak_order),
            sequence,
        }
    }
}

/// Average of bass `[0, n/10)`, mid `[n/10, 4n/10)` and treble `[4n/10, n)`, each over 255.
pub fn band_energies(data: &[u8]) -> (f32, f32, f32) {
    let n = data.len();
    let bass_end = n / 10;
    let mid_end = n * 4 / 10;

    (
        band_average(&data[..bass_end]),
        band_average(&data[bass_end..mid_end]),
        band_average(&data[mid_end..]),
    )
}

fn band_average(band: &[u8]) -> f32 {
    if band.is_empty() {
        return 0.0;
    }
    let sum: u32 = band.iter().map(|&v| v as u32).sum();
    sum as f32 / band.len() as f32 / 255.0
}

/// `sum(i * d[i]) / sum(d[i])`, or 0 for an empty spectrum.
pub fn spectral_centroid(data: &[u8]) -> f32 {
    let mut numerator = 0.0f64;
    let mut denominator = 0.0f64;
    for (i, &v) in data.iter().enumerate() {
        numerator += i as f64 * v as f64;
        denominator += v as f64;
    }
    if denominator > 0.0 {
        (numerator / denominator) as f32
    } else {
        0.0
    }
}

/// Smallest `i / n` where the cumulative sum reaches `threshold` of the total; 1 if never reached.
pub fn spectral_rolloff(data: &[u8], threshold: f32) -> f32 {
    let total: u64 = data.iter().map(|&v| v as u64).sum();
    let target = total as f64 * threshold as f64;

    let mut cumulative = 0u64;
    for (i, &v) in data.iter().enumerate() {
        cumulative += v as u64;
        if cumulative as f64 >= target {
            return i as f32 / data.len() as f32;
        }
    }
    1.0
}

/// Fraction of neighbouring bins that straddle the byte midpoint.
pub fn zero_crossing_rate(data: &[u8]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    let crossings = data
        .windows(2)
        .filter(|pair| (pair[0] >= BYTE_MIDPOINT) != (pair[1] >= BYTE_MIDPOINT))
        .count();
    crossings as f32 / data.len() as f32
}

/// Strict local maxima above [`PEAK_FLOOR`], at most [`MAX_PEAKS`].
pub fn find_peaks(data: &[u8], order: PeakOrder) -> Vec<Peak> {
    let candidates = data.windows(3).enumerate().filter_map(|(i, w)| {
        (w[1] > w[0] && w[1] > w[2] && w[1] > PEAK_FLOOR).then_some(Peak {
            bin_index: i + 1,
            amplitude: w[1],
        })
    });

    match order {
        PeakOrder::ScanOrder => candidates.take(MAX_PEAKS).collect(),
        PeakOrder::Amplitude => {
            let mut peaks: Vec<Peak> = candidates.collect();
            // stable sort keeps scan order among equal amplitudes
            peaks.sort_by(|a, b| b.amplitude.cmp(&a.amplitude));
            peaks.truncate(MAX_PEAKS);
            peaks
        }
    }
}
