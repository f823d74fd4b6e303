//! Read-only spectrum view of the capture stream for level meters and
//! visualizers. Never feeds anything back into the audio path.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::{Arc, Mutex, PoisonError};

pub const FFT_SIZE: usize = 2048;

pub struct SpectrumTap {
    sample_rate: u32,
    fft: Arc<dyn Fft<f32>>,
    latest: Mutex<Vec<(f32, f32)>>,
}

impl SpectrumTap {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            fft: FftPlanner::new().plan_fft_forward(FFT_SIZE),
            latest: Mutex::new(Vec::new()),
        }
    }

    /// Replace the held spectrum with one computed from the head of `block`.
    pub fn feed(&self, block: &[f32]) {
        let spectrum = self.analyze(block);
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = spectrum;
    }

    /// `(frequency, magnitude)` pairs up to Nyquist.
    pub fn analyze(&self, samples: &[f32]) -> Vec<(f32, f32)> {
        let mut input: Vec<Complex<f32>> = samples
            .iter()
            .take(FFT_SIZE)
            .map(|&s| Complex::new(s, 0.0))
            .collect();
        input.resize(FFT_SIZE, Complex::new(0.0, 0.0));

        self.fft.process(&mut input);

        let freq_resolution = self.sample_rate as f32 / FFT_SIZE as f32;

        input
            .iter()
            .take(FFT_SIZE / 2)
            .enumerate()
            .map(|(i, c)| (i as f32 * freq_resolution, c.norm() / FFT_SIZE as f32))
            .collect()
    }

    pub fn snapshot(&self) -> Vec<(f32, f32)> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Strongest bin of the held spectrum, ignoring DC.
    pub fn peak(&self) -> Option<(f32, f32)> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .skip(1)
            .copied()
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }
}
