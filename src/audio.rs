//! Audio I/O seams and their cpal implementations.

use crate::error::{Result, SonicLinkError};
use crate::tap::SpectrumTap;
use crate::{CAPTURE_BLOCK_SIZE, SAMPLE_RATE};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, StreamConfig};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

/// Invoked once when playback ends, successfully or not.
pub type PlaybackDone = Box<dyn FnOnce(Result<()>) + Send + 'static>;

/// Receives fixed-size capture blocks on the audio thread.
pub type BlockCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

pub trait PlaybackSink: Send + Sync {
    /// Start playing `samples`. `done` fires when the device has drained them.
    /// If this returns an error, `done` is never called.
    fn play(&self, samples: Vec<f32>, sample_rate: u32, done: PlaybackDone) -> Result<()>;
}

/// Microphone capture settings. Host-side processing degrades the acoustic
/// signal, so all three flags default to off.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConstraints {
    pub echo_cancellation: bool,
    pub auto_gain_control: bool,
    pub noise_suppression: bool,
    pub sample_rate: u32,
    pub block_size: usize,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: false,
            auto_gain_control: false,
            noise_suppression: false,
            sample_rate: SAMPLE_RATE,
            block_size: CAPTURE_BLOCK_SIZE,
        }
    }
}

pub trait CaptureDevice: Send + Sync {
    fn open(&self, constraints: &CaptureConstraints, on_block: BlockCallback) -> Result<Box<dyn CaptureStream>>;
}

pub trait CaptureStream {
    /// Stop delivering blocks and release the device.
    fn close(&mut self) -> Result<()>;
}

/// Regroups arbitrarily sized device buffers into blocks of a fixed size.
pub struct BlockAssembler {
    block_size: usize,
    pending: Vec<f32>,
}

impl BlockAssembler {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            pending: Vec::with_capacity(block_size.max(1)),
        }
    }

    pub fn push(&mut self, mut samples: &[f32], mut emit: impl FnMut(&[f32])) {
        while !samples.is_empty() {
            let take = (self.block_size - self.pending.len()).min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.pending.len() == self.block_size {
                emit(&self.pending);
                self.pending.clear();
            }
        }
    }
}

fn mono_config(sample_rate: u32) -> StreamConfig {
    StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    }
}

/// Speaker output through the default cpal device.
#[derive(Default)]
pub struct CpalOutput {
    tap: Option<Arc<SpectrumTap>>,
}

impl CpalOutput {
    pub fn new() -> Result<Self> {
        cpal::default_host()
            .default_output_device()
            .ok_or_else(|| SonicLinkError::AudioDevice("No output device found".into()))?;
        Ok(Self::default())
    }

    /// Mirror every buffer handed to the device into `tap`.
    pub fn with_tap(mut self, tap: Arc<SpectrumTap>) -> Self {
        self.tap = Some(tap);
        self
    }
}

impl PlaybackSink for CpalOutput {
    fn play(&self, samples: Vec<f32>, sample_rate: u32, done: PlaybackDone) -> Result<()> {
        let (started_tx, started_rx) = mpsc::sync_channel::<Result<()>>(1);
        let tap = self.tap.clone();

        // cpal streams are not Send on every platform, so the stream lives
        // and dies on its own thread.
        thread::spawn(move || {
            let (finished_tx, finished_rx) = mpsc::sync_channel::<Result<()>>(1);
            let feed = OutputFeed::new(samples, finished_tx.clone(), tap);
            let stream = match open_output(feed, sample_rate, finished_tx) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = started_tx.send(Err(e));
                    return;
                }
            };
            let _ = started_tx.send(Ok(()));

            let outcome = wait_for_drain(&finished_rx);
            drop(stream);
            done(outcome);
        });

        started_rx
            .recv()
            .map_err(|_| SonicLinkError::AudioDevice("Playback thread exited".into()))?
    }
}

/// Source side of an output stream. Signals `finished` once every sample has
/// been handed to the device.
struct OutputFeed {
    samples: Vec<f32>,
    position: usize,
    finished: Option<mpsc::SyncSender<Result<()>>>,
    tap: Option<Arc<SpectrumTap>>,
}

impl OutputFeed {
    fn new(samples: Vec<f32>, finished: mpsc::SyncSender<Result<()>>, tap: Option<Arc<SpectrumTap>>) -> Self {
        Self {
            samples,
            position: 0,
            finished: Some(finished),
            tap,
        }
    }

    fn fill(&mut self, data: &mut [f32]) {
        for sample in data.iter_mut() {
            *sample = self.samples.get(self.position).copied().unwrap_or(0.0);
            self.position += 1;
        }
        if let Some(tap) = &self.tap {
            tap.feed(data);
        }
        if self.position >= self.samples.len() {
            if let Some(finished) = self.finished.take() {
                let _ = finished.try_send(Ok(()));
            }
        }
    }
}

fn report_stream_error(finished: &mpsc::SyncSender<Result<()>>, err: cpal::StreamError) {
    log::error!("Audio output error: {}", err);
    let _ = finished.try_send(Err(SonicLinkError::AudioDevice(err.to_string())));
}

/// Block until the feed drains or the stream reports an error.
fn wait_for_drain(finished: &mpsc::Receiver<Result<()>>) -> Result<()> {
    match finished.recv() {
        Ok(Ok(())) => {
            thread::sleep(Duration::from_millis(100));
            Ok(())
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(SonicLinkError::AudioDevice("Output stream ended early".into())),
    }
}

fn open_output(
    mut feed: OutputFeed,
    sample_rate: u32,
    finished: mpsc::SyncSender<Result<()>>,
) -> Result<cpal::Stream> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| SonicLinkError::AudioDevice("No output device found".into()))?;

    let stream = device
        .build_output_stream(
            &mono_config(sample_rate),
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| feed.fill(data),
            move |err| report_stream_error(&finished, err),
            None,
        )
        .map_err(|e| SonicLinkError::AudioDevice(e.to_string()))?;

    stream
        .play()
        .map_err(|e| SonicLinkError::AudioDevice(e.to_string()))?;

    Ok(stream)
}

pub struct CpalCapture;

impl CpalCapture {
    pub fn new() -> Result<Self> {
        default_input()?;
        Ok(Self)
    }
}

fn default_input() -> Result<Device> {
    cpal::default_host()
        .default_input_device()
        .ok_or_else(|| SonicLinkError::MicrophoneUnavailable("No input device found".into()))
}

impl CaptureDevice for CpalCapture {
    fn open(&self, constraints: &CaptureConstraints, mut on_block: BlockCallback) -> Result<Box<dyn CaptureStream>> {
        if constraints.echo_cancellation || constraints.auto_gain_control || constraints.noise_suppression {
            return Err(SonicLinkError::AudioDevice(
                "cpal capture does not provide host-side signal processing".into(),
            ));
        }

        let device = default_input()?;
        let mut assembler = BlockAssembler::new(constraints.block_size);
        let stream = device
            .build_input_stream(
                &mono_config(constraints.sample_rate),
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    assembler.push(data, |block| on_block(block));
                },
                |err| log::error!("Audio input error: {}", err),
                None,
            )
            .map_err(|e| SonicLinkError::MicrophoneUnavailable(e.to_string()))?;

        stream
            .play()
            .map_err(|e| SonicLinkError::MicrophoneUnavailable(e.to_string()))?;

        Ok(Box::new(CpalCaptureStream { stream: Some(stream) }))
    }
}

struct CpalCaptureStream {
    stream: Option<cpal::Stream>,
}

impl CaptureStream for CpalCaptureStream {
    fn close(&mut self) -> Result<()> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        let paused = stream
            .pause()
            .map_err(|e| SonicLinkError::AudioDevice(e.to_string()));
        drop(stream);
        paused
    }
}

impl Drop for CpalCaptureStream {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

pub fn list_audio_devices() -> Vec<String> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    if let Ok(output_devices) = host.output_devices() {
        devices.extend(
            output_devices
                .filter_map(|device| device.name().ok())
                .map(|name| format!("Output: {}", name)),
        );
    }

    if let Ok(input_devices) = host.input_devices() {
        devices.extend(
            input_devices
                .filter_map(|device| device.name().ok())
                .map(|name| format!("Input: {}", name)),
        );
    }

    devices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembler_emits_fixed_blocks() {
        let mut assembler = BlockAssembler::new(4);
        let mut blocks: Vec<Vec<f32>> = Vec::new();

        assembler.push(&[1.0, 2.0, 3.0], |b| blocks.push(b.to_vec()));
        assert!(blocks.is_empty());

        assembler.push(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0], |b| blocks.push(b.to_vec()));
        assert_eq!(blocks, vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]);

        assembler.push(&[10.0, 11.0, 12.0], |b| blocks.push(b.to_vec()));
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[2], vec![9.0, 10.0, 11.0, 12.0]);
    }

    #[test]
    fn test_feed_signals_once_drained() {
        let (tx, rx) = mpsc::sync_channel(1);
        let mut feed = OutputFeed::new(vec![0.5; 6], tx, None);

        let mut buffer = [1.0f32; 4];
        feed.fill(&mut buffer);
        assert_eq!(buffer, [0.5; 4]);
        assert!(rx.try_recv().is_err());

        feed.fill(&mut buffer);
        assert_eq!(buffer, [0.5, 0.5, 0.0, 0.0]);
        assert!(matches!(rx.try_recv(), Ok(Ok(()))));

        feed.fill(&mut buffer);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stream_error_completes_playback() {
        let (tx, rx) = mpsc::sync_channel(1);
        let _feed = OutputFeed::new(vec![0.5; 48000], tx.clone(), None);

        report_stream_error(&tx, cpal::StreamError::DeviceNotAvailable);
        assert!(matches!(wait_for_drain(&rx), Err(SonicLinkError::AudioDevice(_))));
    }

    #[test]
    fn test_feed_mirrors_into_tap() {
        let (tx, _rx) = mpsc::sync_channel(1);
        let tap = Arc::new(SpectrumTap::new(SAMPLE_RATE));
        let mut feed = OutputFeed::new(vec![0.25; 512], tx, Some(Arc::clone(&tap)));

        assert!(tap.snapshot().is_empty());
        feed.fill(&mut [0.0f32; 256]);
        assert!(!tap.snapshot().is_empty());
    }

    #[test]
    fn test_default_constraints_disable_processing() {
        let constraints = CaptureConstraints::default();
        assert!(!constraints.echo_cancellation);
        assert!(!constraints.auto_gain_control);
        assert!(!constraints.noise_suppression);
        assert_eq!(constraints.sample_rate, 48000);
        assert_eq!(constraints.block_size, 4096);
    }
}
