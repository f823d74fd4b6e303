use crate::audio::PlaybackSink;
use crate::error::{Result, SonicLinkError};
use crate::modem::ModemSession;
use crate::{ProtocolId, DEFAULT_VOLUME};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

/// One send request.
#[derive(Debug, Clone, PartialEq)]
pub struct Transmission {
    pub payload: String,
    pub protocol: ProtocolId,
    pub volume: u8,
}

impl Transmission {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            protocol: ProtocolId::DEFAULT,
            volume: DEFAULT_VOLUME,
        }
    }

    pub fn with_protocol(mut self, protocol: ProtocolId) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_volume(mut self, volume: u8) -> Self {
        self.volume = volume;
        self
    }
}

/// Completion of a started playback.
pub struct Playback {
    done: mpsc::Receiver<Result<()>>,
    samples: usize,
}

impl Playback {
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Block until the sink reports the end of playback.
    pub fn wait(self) -> Result<()> {
        self.done
            .recv()
            .map_err(|_| SonicLinkError::AudioDevice("Playback dropped without completing".into()))?
    }
}

/// Plays one framed payload at a time through a [`PlaybackSink`].
pub struct Transmitter {
    session: ModemSession,
    sink: Arc<dyn PlaybackSink>,
    busy: Arc<AtomicBool>,
}

impl Transmitter {
    pub fn new(session: ModemSession, sink: Arc<dyn PlaybackSink>) -> Self {
        Self {
            session,
            sink,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_transmitting(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Encode and start playing `transmission`.
    ///
    /// Fails with [`SonicLinkError::TransmitBusy`] while a previous playback
    /// is still running; there is no queue.
    pub fn transmit(&self, transmission: &Transmission) -> Result<Playback> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(SonicLinkError::TransmitBusy);
        }

        let started = self.start(transmission);
        if let Err(e) = &started {
            log::warn!("Transmission aborted: {}", e);
            self.busy.store(false, Ordering::SeqCst);
        }
        started
    }

    fn start(&self, transmission: &Transmission) -> Result<Playback> {
        let modem = self.session.acquire()?;

        let waveform = modem
            .encode(&transmission.payload, transmission.protocol, transmission.volume)
            .ok_or(SonicLinkError::EncodeFailed)?;
        let samples = waveform.len();

        log::info!(
            "Transmitting {} bytes as {} samples (protocol {}, volume {})",
            transmission.payload.len(),
            samples,
            transmission.protocol,
            transmission.volume
        );

        let (tx, rx) = mpsc::channel();
        let busy = Arc::clone(&self.busy);
        self.sink.play(
            waveform,
            self.session.params().sample_rate_out,
            Box::new(move |outcome| {
                busy.store(false, Ordering::SeqCst);
                match &outcome {
                    Ok(()) => log::info!("Transmission complete"),
                    Err(e) => log::warn!("Playback failed: {}", e),
                }
                let _ = tx.send(outcome);
            }),
        )?;

        Ok(Playback { done: rx, samples })
    }
}
