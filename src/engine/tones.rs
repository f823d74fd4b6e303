use crate::{Config, NUM_TONES};
use std::f32::consts::PI;

/// Resolution of the wake-up onset search, in samples.
const ONSET_STEP: usize = 48;

fn tone_table(config: &Config) -> Vec<f32> {
    let base_freq = config.mode.base_frequency();
    let step = config.mode.frequency_step();
    (0..NUM_TONES).map(|i| base_freq + (i as f32) * step).collect()
}

pub struct MFSKModulator {
    config: Config,
    frequencies: Vec<f32>,
}

impl MFSKModulator {
    pub fn new(config: Config) -> Self {
        let frequencies = tone_table(&config);
        Self { config, frequencies }
    }

    pub fn generate_tone(&self, frequency: f32, num_samples: usize) -> Vec<f32> {
        let sample_rate = self.config.sample_rate as f32;
        let fade_samples = ((sample_rate * 0.005) as usize).min(num_samples / 2).max(1);

        (0..num_samples)
            .map(|i| {
                let t = i as f32 / sample_rate;
                let sample = (2.0 * PI * frequency * t).sin() * self.config.volume;

                let fade = if i < fade_samples {
                    i as f32 / fade_samples as f32
                } else if i > num_samples - fade_samples {
                    (num_samples - i) as f32 / fade_samples as f32
                } else {
                    1.0
                };

                sample * fade
            })
            .collect()
    }

    pub fn generate_wake_up_tone(&self) -> Vec<f32> {
        self.generate_tone(self.config.mode.wake_frequency(), self.config.wake_samples())
    }

    /// Wake-up tone, short silence, two symbols per byte (high nibble first),
    /// closing wake-up tone.
    pub fn modulate(&self, data: &[u8]) -> Vec<f32> {
        let symbol_samples = self.config.symbol_samples();
        let mut samples = Vec::with_capacity(
            2 * self.config.wake_samples() + self.config.gap_samples() + data.len() * 2 * symbol_samples,
        );

        samples.extend(self.generate_wake_up_tone());
        samples.extend(std::iter::repeat(0.0f32).take(self.config.gap_samples()));

        for byte in data {
            let high = self.frequencies[usize::from(byte >> 4)];
            let low = self.frequencies[usize::from(byte & 0x0F)];

            samples.extend(self.generate_tone(high, symbol_samples));
            samples.extend(self.generate_tone(low, symbol_samples));
        }

        samples.extend(self.generate_wake_up_tone());

        samples
    }
}

pub struct MFSKDemodulator {
    config: Config,
    frequencies: Vec<f32>,
}

impl MFSKDemodulator {
    pub fn new(config: Config) -> Self {
        let frequencies = tone_table(&config);
        Self { config, frequencies }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn goertzel(&self, samples: &[f32], target_freq: f32) -> f32 {
        let n = samples.len();
        if n == 0 {
            return 0.0;
        }
        let k = (target_freq * n as f32 / self.config.sample_rate as f32).round();
        let omega = 2.0 * PI * k / n as f32;
        let coeff = 2.0 * omega.cos();

        let mut s1 = 0.0f32;
        let mut s2 = 0.0f32;

        for &sample in samples {
            let s0 = sample + coeff * s1 - s2;
            s2 = s1;
            s1 = s0;
        }

        let power = s1 * s1 + s2 * s2 - s1 * s2 * coeff;
        power.max(0.0).sqrt()
    }

    fn strongest_data_magnitude(&self, window: &[f32]) -> f32 {
        self.frequencies
            .iter()
            .map(|&f| self.goertzel(window, f))
            .fold(0.0f32, f32::max)
    }

    /// True when the wake-up tone dominates every data tone in `window`.
    pub fn is_wake_window(&self, window: &[f32]) -> bool {
        let wake_mag = self.goertzel(window, self.config.mode.wake_frequency());
        wake_mag > 0.01 && wake_mag > self.strongest_data_magnitude(window) * 1.5
    }

    /// Length of the window used to look for the wake-up tone.
    pub fn wake_window(&self) -> usize {
        self.config.wake_samples() / 2
    }

    /// Start of the first window in `samples` where the wake-up tone
    /// dominates. Lies at or before the tone's onset, by less than a window.
    pub fn find_wake_candidate(&self, samples: &[f32]) -> Option<usize> {
        let window_size = self.wake_window();
        let step = (window_size / 4).max(1);

        (0..samples.len().saturating_sub(window_size))
            .step_by(step)
            .find(|&i| self.is_wake_window(&samples[i..i + window_size]))
    }

    /// Narrow a candidate down to the tone onset. Returns `None` until two
    /// windows past the candidate are buffered.
    pub fn refine_onset(&self, samples: &[f32], candidate: usize) -> Option<usize> {
        let window_size = self.wake_window();
        if candidate + 2 * window_size > samples.len() {
            return None;
        }

        let wake = self.config.mode.wake_frequency();
        let magnitudes: Vec<(usize, f32)> = (candidate..=candidate + window_size)
            .step_by(ONSET_STEP)
            .map(|j| (j, self.goertzel(&samples[j..j + window_size], wake)))
            .collect();

        // The magnitude plateaus once the window lies inside the tone.
        let peak = magnitudes.iter().map(|&(_, m)| m).fold(0.0f32, f32::max);
        magnitudes
            .into_iter()
            .find(|&(_, m)| m >= peak * 0.9)
            .map(|(j, _)| j)
    }

    /// Position just past the first wake-up tone found in `samples`.
    pub fn detect_wake_up(&self, samples: &[f32]) -> Option<usize> {
        let candidate = self.find_wake_candidate(samples)?;
        let onset = self.refine_onset(samples, candidate)?;
        Some(onset + self.config.wake_samples())
    }

    pub fn detect_symbol(&self, samples: &[f32]) -> u8 {
        let mut max_magnitude = 0.0f32;
        let mut detected_index = 0u8;

        for (i, &freq) in self.frequencies.iter().enumerate() {
            let magnitude = self.goertzel(samples, freq);
            if magnitude > max_magnitude {
                max_magnitude = magnitude;
                detected_index = i as u8;
            }
        }

        detected_index
    }

    /// Rebuild bytes from consecutive symbol windows; a trailing odd nibble
    /// is dropped.
    pub fn read_bytes(&self, samples: &[f32]) -> Vec<u8> {
        let symbol_samples = self.config.symbol_samples();
        let nibbles: Vec<u8> = samples
            .chunks_exact(symbol_samples)
            .map(|window| self.detect_symbol(window))
            .collect();

        nibbles
            .chunks_exact(2)
            .map(|pair| (pair[0] << 4) | (pair[1] & 0x0F))
            .collect()
    }
}
