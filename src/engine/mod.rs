//! Reference [`ModemEngine`]: 16-tone MFSK framed by wake-up tones.
//!
//! Decoding is incremental. Capture blocks accumulate until a leading
//! wake-up tone is found, symbols are then scanned a window at a time, and
//! the message is surfaced on the block that contains the closing tone.

pub mod packet;
pub mod tones;

use crate::error::{Result, SonicLinkError};
use crate::modem::{EngineParams, InstanceId, ModemEngine};
use crate::{Config, ProtocolId};
use tones::{MFSKDemodulator, MFSKModulator};

#[derive(Clone, Copy)]
enum RxState {
    Searching,
    Receiving { data_start: usize, cursor: usize },
}

struct Instance {
    params: EngineParams,
    demodulator: MFSKDemodulator,
    buffer: Vec<f32>,
    state: RxState,
    /// Samples of a closing tone still to arrive and be discarded.
    skip: usize,
    max_data_samples: usize,
}

impl Instance {
    fn new(params: &EngineParams) -> Result<Self> {
        let rx: Config = params.rx_protocol.tone_config(params.sample_rate_in, 100)?;
        let max_symbols = 2 * (packet::MAX_PACKET_PAYLOAD + packet::HEADER_SIZE + packet::TRAILER_SIZE);
        let max_data_samples = max_symbols * rx.symbol_samples();

        Ok(Self {
            params: params.clone(),
            demodulator: MFSKDemodulator::new(rx),
            buffer: Vec::with_capacity(params.samples_per_block * 4),
            state: RxState::Searching,
            skip: 0,
            max_data_samples,
        })
    }

    fn push(&mut self, block: &[f32]) -> Option<String> {
        let skipped = self.skip.min(block.len());
        self.skip -= skipped;
        self.buffer.extend_from_slice(&block[skipped..]);

        if let RxState::Searching = self.state {
            let Some(candidate) = self.demodulator.find_wake_candidate(&self.buffer) else {
                // A tone may begin in the unscanned tail.
                let keep = self.demodulator.wake_window().min(self.buffer.len());
                self.buffer.drain(..self.buffer.len() - keep);
                return None;
            };

            let Some(onset) = self.demodulator.refine_onset(&self.buffer, candidate) else {
                self.buffer.drain(..candidate);
                return None;
            };

            let config = self.demodulator.config();
            let data_start = onset + config.wake_samples() + config.gap_samples();
            log::debug!("Wake-up tone at {}, data starts at {}", onset, data_start);
            self.state = RxState::Receiving {
                data_start,
                cursor: data_start,
            };
        }

        let RxState::Receiving { data_start, mut cursor } = self.state else {
            return None;
        };

        let symbol_samples = self.demodulator.config().symbol_samples();
        while cursor + symbol_samples <= self.buffer.len() {
            if self.demodulator.is_wake_window(&self.buffer[cursor..cursor + symbol_samples]) {
                return self.finish(data_start, cursor);
            }
            cursor += symbol_samples;

            if cursor - data_start > self.max_data_samples {
                log::debug!("No closing tone within the longest packet, resetting");
                self.reset();
                return None;
            }
        }

        self.state = RxState::Receiving { data_start, cursor };
        None
    }

    fn finish(&mut self, data_start: usize, trailer_start: usize) -> Option<String> {
        let data = self.demodulator.read_bytes(&self.buffer[data_start..trailer_start]);

        // The onset estimate can run early, so one scan window past the
        // nominal end is discarded too. Otherwise the tail of the closing tone
        // reads as the start of another message.
        let trailer_end =
            trailer_start + self.demodulator.config().wake_samples() + self.demodulator.wake_window();
        if trailer_end > self.buffer.len() {
            self.skip = trailer_end - self.buffer.len();
            self.buffer.clear();
        } else {
            self.buffer.drain(..trailer_end);
        }
        self.state = RxState::Searching;

        match packet::open(&data) {
            Ok(message) => Some(message),
            Err(e) => {
                log::debug!("Discarding {} demodulated bytes: {}", data.len(), e);
                None
            }
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.state = RxState::Searching;
        self.skip = 0;
    }
}

#[derive(Default)]
pub struct MfskEngine {
    instances: Vec<Option<Instance>>,
}

impl MfskEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn instance(&mut self, id: InstanceId) -> Result<&mut Instance> {
        self.instances
            .get_mut(id as usize)
            .and_then(Option::as_mut)
            .ok_or(SonicLinkError::UnknownInstance(id))
    }
}

impl ModemEngine for MfskEngine {
    fn init(&mut self, params: &EngineParams) -> Result<InstanceId> {
        let instance = Instance::new(params)?;
        self.instances.push(Some(instance));
        Ok((self.instances.len() - 1) as InstanceId)
    }

    fn encode(
        &mut self,
        instance: InstanceId,
        payload: &str,
        protocol: ProtocolId,
        volume: u8,
    ) -> Result<Vec<f32>> {
        let sample_rate = self.instance(instance)?.params.sample_rate_out;
        let config = protocol.tone_config(sample_rate, volume)?;

        let data = packet::seal(payload)?;
        let samples = MFSKModulator::new(config).modulate(&data);
        log::debug!(
            "Encoded {} payload bytes into {} packet bytes, {} samples",
            payload.len(),
            data.len(),
            samples.len()
        );

        Ok(samples)
    }

    fn decode(&mut self, instance: InstanceId, block: &[f32]) -> Result<Option<String>> {
        Ok(self.instance(instance)?.push(block))
    }

    fn free(&mut self, instance: InstanceId) {
        if let Some(slot) = self.instances.get_mut(instance as usize) {
            *slot = None;
        }
    }
}
