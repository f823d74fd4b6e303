//! Microphone-driven reception.
//!
//! Each capture block goes to the modem; completed messages are decoded into
//! [`Frame`]s and handed to the listener in arrival order. A block that lands
//! after `stop()` (or after a later `start()`) is dropped by a generation
//! check, so a listener never hears from a reception it no longer owns.

use crate::audio::{BlockCallback, CaptureConstraints, CaptureDevice, CaptureStream};
use crate::error::Result;
use crate::frame::{decode_frame, Frame};
use crate::modem::ModemSession;
use crate::tap::SpectrumTap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub type Listener = Arc<dyn Fn(Frame) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Idle,
    Listening,
}

#[derive(Default)]
struct Liveness {
    listening: AtomicBool,
    generation: AtomicU64,
}

impl Liveness {
    fn is_current(&self, generation: u64) -> bool {
        self.listening.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }
}

pub struct Receiver {
    session: ModemSession,
    device: Arc<dyn CaptureDevice>,
    constraints: CaptureConstraints,
    listener: Listener,
    tap: Option<Arc<SpectrumTap>>,
    liveness: Arc<Liveness>,
    stream: Option<Box<dyn CaptureStream>>,
}

impl Receiver {
    pub fn new(session: ModemSession, device: Arc<dyn CaptureDevice>, listener: Listener) -> Self {
        let constraints = CaptureConstraints {
            sample_rate: session.params().sample_rate_in,
            block_size: session.params().samples_per_block,
            ..Default::default()
        };

        Self {
            session,
            device,
            constraints,
            listener,
            tap: None,
            liveness: Arc::new(Liveness::default()),
            stream: None,
        }
    }

    /// Mirror every capture block into `tap`.
    pub fn with_tap(mut self, tap: Arc<SpectrumTap>) -> Self {
        self.tap = Some(tap);
        self
    }

    pub fn state(&self) -> ReceiverState {
        if self.liveness.listening.load(Ordering::SeqCst) {
            ReceiverState::Listening
        } else {
            ReceiverState::Idle
        }
    }

    pub fn is_listening(&self) -> bool {
        self.state() == ReceiverState::Listening
    }

    /// Open the microphone and begin decoding. Does nothing when already
    /// listening. On failure the receiver stays idle with nothing held open.
    pub fn start(&mut self) -> Result<()> {
        if self.is_listening() {
            return Ok(());
        }

        let modem = self.session.acquire()?;

        let generation = self.liveness.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let liveness = Arc::clone(&self.liveness);
        let listener = Arc::clone(&self.listener);
        let tap = self.tap.clone();

        let on_block: BlockCallback = Box::new(move |block: &[f32]| {
            if !liveness.is_current(generation) {
                return;
            }
            if let Some(tap) = &tap {
                tap.feed(block);
            }

            let Some(message) = modem.decode(block) else {
                return;
            };

            let frame = decode_frame(&message);
            if liveness.is_current(generation) {
                log::info!("Received {} frame", frame.kind());
                listener(frame);
            } else {
                log::debug!("Discarding {} frame decoded after stop", frame.kind());
            }
        });

        self.liveness.listening.store(true, Ordering::SeqCst);
        match self.device.open(&self.constraints, on_block) {
            Ok(stream) => {
                self.stream = Some(stream);
                log::info!("Listening at {} Hz", self.constraints.sample_rate);
                Ok(())
            }
            Err(e) => {
                self.liveness.listening.store(false, Ordering::SeqCst);
                log::warn!("Microphone capture could not start: {}", e);
                Err(e)
            }
        }
    }

    /// Release the capture stream and return to idle. Safe to call at any
    /// time, any number of times.
    pub fn stop(&mut self) {
        self.liveness.listening.store(false, Ordering::SeqCst);
        self.liveness.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close() {
                log::debug!("Ignoring capture teardown error: {}", e);
            }
            log::info!("Stopped listening");
        }
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SonicLinkError;
    use crate::modem::{EngineParams, InstanceId, ModemEngine};
    use crate::ProtocolId;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Any block whose first sample is 1.0 completes a message.
    struct MarkerEngine;

    impl ModemEngine for MarkerEngine {
        fn init(&mut self, _params: &EngineParams) -> Result<InstanceId> {
            Ok(1)
        }

        fn encode(&mut self, _: InstanceId, _: &str, _: ProtocolId, _: u8) -> Result<Vec<f32>> {
            Ok(Vec::new())
        }

        fn decode(&mut self, _: InstanceId, block: &[f32]) -> Result<Option<String>> {
            Ok(match block.first() {
                Some(&v) if v == 1.0 => Some("TXT:HELLO".into()),
                Some(&v) if v == 2.0 => Some("IMG:%%%".into()),
                _ => None,
            })
        }
    }

    #[derive(Default)]
    struct FakeMic {
        deny: bool,
        callback: Mutex<Option<BlockCallback>>,
        opened: AtomicUsize,
        closed: Arc<AtomicUsize>,
        last_constraints: Mutex<Option<CaptureConstraints>>,
    }

    impl FakeMic {
        fn deliver(&self, first: f32) {
            if let Some(callback) = self.callback.lock().unwrap().as_mut() {
                callback(&[first, 0.0, 0.0, 0.0]);
            }
        }
    }

    struct FakeStream {
        closed: Arc<AtomicUsize>,
    }

    impl CaptureStream for FakeStream {
        fn close(&mut self) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Err(SonicLinkError::AudioDevice("already detached".into()))
        }
    }

    impl CaptureDevice for FakeMic {
        fn open(&self, constraints: &CaptureConstraints, on_block: BlockCallback) -> Result<Box<dyn CaptureStream>> {
            if self.deny {
                return Err(SonicLinkError::MicrophoneUnavailable("permission denied".into()));
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            *self.last_constraints.lock().unwrap() = Some(constraints.clone());
            *self.callback.lock().unwrap() = Some(on_block);
            Ok(Box::new(FakeStream {
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    fn receiver(mic: Arc<FakeMic>) -> (Receiver, Arc<Mutex<Vec<Frame>>>) {
        let heard = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&heard);
        let session = ModemSession::new(Box::new(MarkerEngine), EngineParams::default());
        let rx = Receiver::new(session, mic, Arc::new(move |frame: Frame| sink.lock().unwrap().push(frame)));
        (rx, heard)
    }

    #[test]
    fn test_delivers_frames_in_order() {
        let mic = Arc::new(FakeMic::default());
        let (mut rx, heard) = receiver(Arc::clone(&mic));

        rx.start().unwrap();
        assert_eq!(rx.state(), ReceiverState::Listening);

        mic.deliver(0.0);
        mic.deliver(1.0);
        mic.deliver(2.0);

        let heard = heard.lock().unwrap();
        assert_eq!(heard.len(), 2);
        assert_eq!(heard[0], Frame::text("HELLO"));
        assert_eq!(heard[1], Frame::Corrupt("%%%".into()));
    }

    #[test]
    fn test_capture_constraints() {
        let mic = Arc::new(FakeMic::default());
        let (mut rx, _) = receiver(Arc::clone(&mic));
        rx.start().unwrap();

        let constraints = mic.last_constraints.lock().unwrap().clone().unwrap();
        assert_eq!(constraints, CaptureConstraints::default());
    }

    #[test]
    fn test_start_twice_opens_once() {
        let mic = Arc::new(FakeMic::default());
        let (mut rx, _) = receiver(Arc::clone(&mic));

        rx.start().unwrap();
        rx.start().unwrap();
        assert_eq!(mic.opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_denied_microphone_stays_idle() {
        let mic = Arc::new(FakeMic {
            deny: true,
            ..Default::default()
        });
        let (mut rx, _) = receiver(Arc::clone(&mic));

        assert!(matches!(rx.start(), Err(SonicLinkError::MicrophoneUnavailable(_))));
        assert_eq!(rx.state(), ReceiverState::Idle);
        assert_eq!(mic.opened.load(Ordering::SeqCst), 0);
        assert!(mic.callback.lock().unwrap().is_none());

        rx.stop();
        assert_eq!(mic.closed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mic = Arc::new(FakeMic::default());
        let (mut rx, _) = receiver(Arc::clone(&mic));

        rx.start().unwrap();
        rx.stop();
        rx.stop();

        assert_eq!(rx.state(), ReceiverState::Idle);
        assert_eq!(mic.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stale_block_is_discarded() {
        let mic = Arc::new(FakeMic::default());
        let (mut rx, heard) = receiver(Arc::clone(&mic));

        rx.start().unwrap();
        rx.stop();
        mic.deliver(1.0);
        assert!(heard.lock().unwrap().is_empty());

        rx.start().unwrap();
        mic.deliver(1.0);
        assert_eq!(heard.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_drop_releases_capture() {
        let mic = Arc::new(FakeMic::default());
        let (mut rx, _) = receiver(Arc::clone(&mic));
        rx.start().unwrap();
        drop(rx);
        assert_eq!(mic.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tap_sees_blocks() {
        let mic = Arc::new(FakeMic::default());
        let (rx, _) = receiver(Arc::clone(&mic));
        let tap = Arc::new(SpectrumTap::new(crate::SAMPLE_RATE));
        let mut rx = rx.with_tap(Arc::clone(&tap));

        rx.start().unwrap();
        mic.deliver(0.0);
        assert!(!tap.snapshot().is_empty());
    }
}
