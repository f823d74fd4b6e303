pub mod audio;
pub mod bitmap;
pub mod engine;
pub mod error;
pub mod frame;
pub mod modem;
pub mod receive;
pub mod tap;
pub mod transmit;

#[cfg(target_arch = "wasm32")]
pub mod wasm;

pub use audio::*;
pub use bitmap::*;
pub use engine::MfskEngine;
pub use error::*;
pub use frame::*;
pub use modem::*;
pub use receive::*;
pub use tap::SpectrumTap;
pub use transmit::*;

pub const SAMPLE_RATE: u32 = 48000;
pub const CAPTURE_BLOCK_SIZE: usize = 4096;
pub const DEFAULT_VOLUME: u8 = 10;
pub const NUM_TONES: usize = 16;
pub const WAKE_UP_DURATION_MS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransmissionMode {
    Audible,
    Ultrasonic,
}

impl TransmissionMode {
    pub fn base_frequency(&self) -> f32 {
        match self {
            TransmissionMode::Audible => 1000.0,
            TransmissionMode::Ultrasonic => 17000.0,
        }
    }

    pub fn frequency_step(&self) -> f32 {
        match self {
            TransmissionMode::Audible => 100.0,
            TransmissionMode::Ultrasonic => 150.0,
        }
    }

    /// Marker tone sent before and after the data symbols. Kept outside the
    /// data band of its mode.
    pub fn wake_frequency(&self) -> f32 {
        match self {
            TransmissionMode::Audible => 18500.0,
            TransmissionMode::Ultrasonic => 16400.0,
        }
    }
}

/// Modem engine profile selector carried alongside every transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolId(pub u8);

impl ProtocolId {
    pub const AUDIBLE_NORMAL: ProtocolId = ProtocolId(0);
    pub const AUDIBLE_FAST: ProtocolId = ProtocolId(1);
    pub const AUDIBLE_FASTEST: ProtocolId = ProtocolId(2);
    pub const ULTRASOUND_NORMAL: ProtocolId = ProtocolId(3);
    pub const ULTRASOUND_FAST: ProtocolId = ProtocolId(4);
    pub const ULTRASOUND_FASTEST: ProtocolId = ProtocolId(5);

    pub const DEFAULT: ProtocolId = ProtocolId::AUDIBLE_FAST;

    /// Tone band and symbol duration in milliseconds, or `None` for ids the
    /// reference engine does not know.
    pub fn profile(self) -> Option<(TransmissionMode, u32)> {
        match self.0 {
            0 => Some((TransmissionMode::Audible, 50)),
            1 => Some((TransmissionMode::Audible, 30)),
            2 => Some((TransmissionMode::Audible, 20)),
            3 => Some((TransmissionMode::Ultrasonic, 50)),
            4 => Some((TransmissionMode::Ultrasonic, 30)),
            5 => Some((TransmissionMode::Ultrasonic, 20)),
            _ => None,
        }
    }

    pub fn tone_config(self, sample_rate: u32, volume: u8) -> Result<Config> {
        let (mode, symbol_duration_ms) = self
            .profile()
            .ok_or(SonicLinkError::UnsupportedProtocol(self.0))?;

        Ok(Config {
            mode,
            symbol_duration_ms,
            sample_rate,
            volume: f32::from(volume.min(100)) / 100.0,
        })
    }
}

impl Default for ProtocolId {
    fn default() -> Self {
        ProtocolId::DEFAULT
    }
}

impl std::fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tone layout used by the reference modem for one protocol profile.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: TransmissionMode,
    pub symbol_duration_ms: u32,
    pub sample_rate: u32,
    pub volume: f32,
}

impl Config {
    pub fn symbol_samples(&self) -> usize {
        (self.sample_rate as f32 * self.symbol_duration_ms as f32 / 1000.0) as usize
    }

    pub fn wake_samples(&self) -> usize {
        (self.sample_rate as f32 * WAKE_UP_DURATION_MS as f32 / 1000.0) as usize
    }

    /// Silence between the leading wake-up tone and the first symbol.
    pub fn gap_samples(&self) -> usize {
        (self.sample_rate as f32 * 0.02) as usize
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: TransmissionMode::Audible,
            symbol_duration_ms: 50,
            sample_rate: SAMPLE_RATE,
            volume: 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_profiles() {
        let config = ProtocolId::ULTRASOUND_FAST.tone_config(SAMPLE_RATE, 40).unwrap();
        assert_eq!(config.mode, TransmissionMode::Ultrasonic);
        assert_eq!(config.symbol_samples(), 1440);
        assert!((config.volume - 0.4).abs() < f32::EPSILON);

        assert!(matches!(
            ProtocolId(9).tone_config(SAMPLE_RATE, 10),
            Err(SonicLinkError::UnsupportedProtocol(9))
        ));
    }

    #[test]
    fn test_volume_is_clamped() {
        let config = ProtocolId::DEFAULT.tone_config(SAMPLE_RATE, 250).unwrap();
        assert_eq!(config.volume, 1.0);
    }

    #[test]
    fn test_wake_tone_outside_data_band() {
        for mode in [TransmissionMode::Audible, TransmissionMode::Ultrasonic] {
            let low = mode.base_frequency();
            let high = low + (NUM_TONES as f32 - 1.0) * mode.frequency_step();
            let wake = mode.wake_frequency();
            assert!(wake < low || wake > high);
        }
    }
}
