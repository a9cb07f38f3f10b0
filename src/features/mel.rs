// Triangular mel filterbank over FFT magnitude bins
// Built once per (sample rate, frame size, band count) and shared via a process-wide cache

use crate::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

type FilterBankKey = (u32, usize, usize);

static FILTER_BANK_CACHE: OnceLock<Mutex<HashMap<FilterBankKey, Arc<MelFilterBank>>>> =
    OnceLock::new();

/// Immutable set of triangular weighting vectors, one per mel band
///
/// Bands span 0 Hz to Nyquist with centers evenly spaced on the mel scale.
/// Weights are stored band-major: band `m` occupies
/// `weights[m * bin_count .. (m + 1) * bin_count]`.
#[derive(Debug, Clone, PartialEq)]
pub struct MelFilterBank {
    sample_rate: u32,
    frame_size: usize,
    band_count: usize,
    bin_count: usize,
    weights: Vec<f32>,
}

impl MelFilterBank {
    /// Compute a filterbank for `frame_size`-point FFT frames
    pub fn new(sample_rate: u32, frame_size: usize, band_count: usize) -> Self {
        let bin_count = frame_size / 2 + 1;
        let mut weights = vec![0.0f32; band_count * bin_count];

        let mel_min = Self::hz_to_mel(0.0);
        let mel_max = Self::hz_to_mel(sample_rate as f64 / 2.0);
        let step = (mel_max - mel_min) / (band_count + 1) as f64;

        // Band edges as FFT bin indices: band m rises over [edges[m-1], edges[m])
        // and falls over [edges[m], edges[m+1])
        let edges: Vec<usize> = (0..band_count + 2)
            .map(|i| {
                let hz = Self::mel_to_hz(mel_min + step * i as f64);
                ((frame_size + 1) as f64 * hz / sample_rate as f64).floor() as usize
            })
            .collect();

        for m in 1..=band_count {
            let (left, center, right) = (edges[m - 1], edges[m], edges[m + 1]);
            let band = &mut weights[(m - 1) * bin_count..m * bin_count];

            for k in left..center.min(bin_count) {
                band[k] = (k - left) as f32 / (center - left) as f32;
            }
            for k in center..right.min(bin_count) {
                band[k] = (right - k) as f32 / (right - center) as f32;
            }
        }

        Self {
            sample_rate,
            frame_size,
            band_count,
            bin_count,
            weights,
        }
    }

    /// Shared filterbank for the given parameters, computed on first use
    pub fn cached(sample_rate: u32, frame_size: usize, band_count: usize) -> Arc<Self> {
        let cache = FILTER_BANK_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
        let mut guard = cache.lock();
        guard
            .entry((sample_rate, frame_size, band_count))
            .or_insert_with(|| {
                debug!(
                    "[features] Building mel filterbank: {}Hz, frame={}, bands={}",
                    sample_rate, frame_size, band_count
                );
                Arc::new(Self::new(sample_rate, frame_size, band_count))
            })
            .clone()
    }

    /// Convert frequency in Hz to mels
    pub fn hz_to_mel(hz: f64) -> f64 {
        2595.0 * (1.0 + hz / 700.0).log10()
    }

    /// Convert mels back to Hz
    pub fn mel_to_hz(mel: f64) -> f64 {
        700.0 * (10f64.powf(mel / 2595.0) - 1.0)
    }

    /// All weights, band-major
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Weights of one band over the magnitude bins
    pub fn band(&self, band: usize) -> &[f32] {
        &self.weights[band * self.bin_count..(band + 1) * self.bin_count]
    }

    /// Project a magnitude spectrum onto the bands, writing one sum per band
    ///
    /// `magnitudes` must hold `bin_count()` values and `out` `band_count()`.
    pub fn apply(&self, magnitudes: &[f32], out: &mut [f32]) {
        for (band, slot) in out.iter_mut().enumerate().take(self.band_count) {
            *slot = self
                .band(band)
                .iter()
                .zip(magnitudes)
                .map(|(w, m)| w * m)
                .sum();
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn band_count(&self) -> usize {
        self.band_count
    }

    /// Number of magnitude bins (`frame_size / 2 + 1`)
    pub fn bin_count(&self) -> usize {
        self.bin_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mel_scale_round_trip() {
        for hz in [0.0, 100.0, 700.0, 4000.0, 8000.0] {
            let back = MelFilterBank::mel_to_hz(MelFilterBank::hz_to_mel(hz));
            assert!((back - hz).abs() < 1e-6, "{} -> {}", hz, back);
        }
    }

    #[test]
    fn test_hz_to_mel_reference_point() {
        // 1000 Hz is ~1000 mel on this scale
        let mel = MelFilterBank::hz_to_mel(1000.0);
        assert!((mel - 1000.0).abs() < 1.0);
    }

    #[test]
    fn test_shape() {
        let bank = MelFilterBank::new(16000, 512, 16);
        assert_eq!(bank.bin_count(), 257);
        assert_eq!(bank.band_count(), 16);
        assert_eq!(bank.weights().len(), 16 * 257);
    }

    #[test]
    fn test_construction_is_deterministic() {
        let a = MelFilterBank::new(16000, 512, 16);
        let b = MelFilterBank::new(16000, 512, 16);
        assert_eq!(a, b);
        assert_eq!(a.weights(), b.weights());
    }

    #[test]
    fn test_cached_returns_shared_instance() {
        let a = MelFilterBank::cached(16000, 512, 16);
        let b = MelFilterBank::cached(16000, 512, 16);
        assert!(Arc::ptr_eq(&a, &b));

        let other = MelFilterBank::cached(16000, 512, 8);
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(other.band_count(), 8);
    }

    #[test]
    fn test_weights_are_triangular_and_bounded() {
        let bank = MelFilterBank::new(16000, 512, 16);
        for m in 0..16 {
            let band = bank.band(m);
            assert!(band.iter().all(|&w| (0.0..=1.0).contains(&w)));
            // Every band has at least one nonzero weight
            assert!(band.iter().any(|&w| w > 0.0), "band {} is empty", m);

            // Rises to a single peak then falls
            let peak = band
                .iter()
                .enumerate()
                .fold(0, |best, (i, &w)| if w > band[best] { i } else { best });
            assert!(band[..=peak].windows(2).all(|w| w[0] <= w[1]));
            assert!(band[peak..].windows(2).all(|w| w[0] >= w[1]));
        }
    }

    #[test]
    fn test_band_centers_increase() {
        let bank = MelFilterBank::new(16000, 512, 16);
        let first_nonzero = |m: usize| bank.band(m).iter().position(|&w| w > 0.0);
        let starts: Vec<_> = (0..16).map(first_nonzero).collect();
        assert!(starts.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_apply_sums_weighted_magnitudes() {
        let bank = MelFilterBank::new(16000, 512, 16);
        let ones = vec![1.0; bank.bin_count()];
        let mut out = vec![0.0; 16];
        bank.apply(&ones, &mut out);

        for m in 0..16 {
            let expected: f32 = bank.band(m).iter().sum();
            assert_eq!(out[m], expected);
        }

        let zeros = vec![0.0; bank.bin_count()];
        bank.apply(&zeros, &mut out);
        assert!(out.iter().all(|&v| v == 0.0));
    }
}
