//! Lifecycle of the shared modem engine instance.
//!
//! A [`ModemSession`] owns the engine and the one instance handle both
//! pipelines use. The first caller of [`ModemSession::acquire`] runs the
//! engine's `init`; callers arriving while that is in flight wait on a
//! condition variable instead of issuing a second `init`.

use crate::error::{Result, SonicLinkError};
use crate::{ProtocolId, CAPTURE_BLOCK_SIZE, SAMPLE_RATE};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

pub type InstanceId = u32;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineParams {
    pub sample_rate_in: u32,
    pub sample_rate_out: u32,
    pub samples_per_block: usize,
    /// Profile the decoder listens for.
    pub rx_protocol: ProtocolId,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            sample_rate_in: SAMPLE_RATE,
            sample_rate_out: SAMPLE_RATE,
            samples_per_block: CAPTURE_BLOCK_SIZE,
            rx_protocol: ProtocolId::DEFAULT,
        }
    }
}

/// Acoustic modem capability consumed by the session.
pub trait ModemEngine: Send {
    fn init(&mut self, params: &EngineParams) -> Result<InstanceId>;

    fn encode(
        &mut self,
        instance: InstanceId,
        payload: &str,
        protocol: ProtocolId,
        volume: u8,
    ) -> Result<Vec<f32>>;

    /// Feed one capture block. Returns a message when one completes on this
    /// block; must not block waiting for more audio.
    fn decode(&mut self, instance: InstanceId, block: &[f32]) -> Result<Option<String>>;

    fn free(&mut self, _instance: InstanceId) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready { instance: InstanceId },
}

struct SessionInner {
    state: Mutex<SessionState>,
    resolved: Condvar,
    engine: Mutex<Box<dyn ModemEngine>>,
    params: EngineParams,
}

impl SessionInner {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_engine(&self) -> MutexGuard<'_, Box<dyn ModemEngine>> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ready_instance(&self) -> Option<InstanceId> {
        match *self.lock_state() {
            SessionState::Ready { instance } => Some(instance),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct ModemSession {
    inner: Arc<SessionInner>,
}

impl ModemSession {
    pub fn new(engine: Box<dyn ModemEngine>, params: EngineParams) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                state: Mutex::new(SessionState::Uninitialized),
                resolved: Condvar::new(),
                engine: Mutex::new(engine),
                params,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.inner.lock_state()
    }

    pub fn params(&self) -> &EngineParams {
        &self.inner.params
    }

    /// Return a handle to the ready engine, initializing it on first use.
    ///
    /// If another caller's initialization fails while this one waits, the
    /// waiter gets [`SonicLinkError::SessionUnavailable`] and may retry.
    pub fn acquire(&self) -> Result<ModemHandle> {
        let mut state = self.inner.lock_state();
        loop {
            match *state {
                SessionState::Ready { .. } => return Ok(self.handle()),
                SessionState::Uninitialized => break,
                SessionState::Initializing => {
                    log::debug!("Waiting for modem engine initialization");
                    state = self
                        .inner
                        .resolved
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                    if *state == SessionState::Uninitialized {
                        return Err(SonicLinkError::SessionUnavailable);
                    }
                }
            }
        }

        *state = SessionState::Initializing;
        drop(state);

        log::info!("Initializing modem engine");
        let result = self.inner.lock_engine().init(&self.inner.params);

        let mut state = self.inner.lock_state();
        let outcome = match result {
            Ok(instance) => {
                log::info!("Modem engine ready, instance {}", instance);
                *state = SessionState::Ready { instance };
                Ok(self.handle())
            }
            Err(e) => {
                log::error!("Modem engine initialization failed: {}", e);
                *state = SessionState::Uninitialized;
                Err(SonicLinkError::EngineInit(e.to_string()))
            }
        };
        self.inner.resolved.notify_all();
        outcome
    }

    /// Release the engine instance. Has no effect unless the session is ready.
    pub fn shutdown(&self) {
        let mut state = self.inner.lock_state();
        if let SessionState::Ready { instance } = *state {
            self.inner.lock_engine().free(instance);
            *state = SessionState::Uninitialized;
            log::info!("Modem engine instance {} released", instance);
        }
    }

    fn handle(&self) -> ModemHandle {
        ModemHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Encode/decode access to a ready session.
///
/// Failures are reported as `None`; callers treat that as nothing to send or
/// nothing decoded yet.
#[derive(Clone)]
pub struct ModemHandle {
    inner: Arc<SessionInner>,
}

impl ModemHandle {
    pub fn encode(&self, payload: &str, protocol: ProtocolId, volume: u8) -> Option<Vec<f32>> {
        let Some(instance) = self.inner.ready_instance() else {
            log::error!("Modem engine not ready");
            return None;
        };

        match self.inner.lock_engine().encode(instance, payload, protocol, volume) {
            Ok(samples) if samples.is_empty() => {
                log::warn!("Modem engine returned an empty waveform");
                None
            }
            Ok(samples) => Some(samples),
            Err(e) => {
                log::error!("Encoding error: {}", e);
                None
            }
        }
    }

    pub fn decode(&self, block: &[f32]) -> Option<String> {
        let instance = self.inner.ready_instance()?;

        match self.inner.lock_engine().decode(instance, block) {
            Ok(message) => message,
            Err(e) => {
                log::debug!("Decode error: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    struct CountingEngine {
        inits: Arc<AtomicUsize>,
        fail_first: usize,
        delay: Duration,
    }

    impl CountingEngine {
        fn new(inits: Arc<AtomicUsize>) -> Self {
            Self {
                inits,
                fail_first: 0,
                delay: Duration::ZERO,
            }
        }
    }

    impl ModemEngine for CountingEngine {
        fn init(&mut self, _params: &EngineParams) -> Result<InstanceId> {
            let n = self.inits.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            if n < self.fail_first {
                return Err(SonicLinkError::AudioDevice("engine load failed".into()));
            }
            Ok(7)
        }

        fn encode(&mut self, instance: InstanceId, payload: &str, _: ProtocolId, _: u8) -> Result<Vec<f32>> {
            assert_eq!(instance, 7);
            if payload == "boom" {
                return Err(SonicLinkError::Encoding("boom".into()));
            }
            Ok(payload.bytes().map(f32::from).collect())
        }

        fn decode(&mut self, _instance: InstanceId, block: &[f32]) -> Result<Option<String>> {
            match block.first() {
                Some(&v) if v > 0.5 => Ok(Some("TXT:hi".into())),
                Some(&v) if v < -0.5 => Err(SonicLinkError::Decoding("garbled".into())),
                _ => Ok(None),
            }
        }
    }

    #[test]
    fn test_concurrent_acquire_initializes_once() {
        let inits = Arc::new(AtomicUsize::new(0));
        let mut engine = CountingEngine::new(Arc::clone(&inits));
        engine.delay = Duration::from_millis(50);
        let session = ModemSession::new(Box::new(engine), EngineParams::default());

        let barrier = Arc::new(Barrier::new(8));
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let session = session.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    session.acquire().is_ok()
                })
            })
            .collect();

        for worker in workers {
            assert!(worker.join().unwrap());
        }
        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), SessionState::Ready { instance: 7 });
    }

    #[test]
    fn test_failed_init_reverts_and_retries() {
        let inits = Arc::new(AtomicUsize::new(0));
        let mut engine = CountingEngine::new(Arc::clone(&inits));
        engine.fail_first = 1;
        let session = ModemSession::new(Box::new(engine), EngineParams::default());

        assert!(matches!(session.acquire(), Err(SonicLinkError::EngineInit(_))));
        assert_eq!(session.state(), SessionState::Uninitialized);

        assert!(session.acquire().is_ok());
        assert_eq!(inits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_waiters_observe_failure() {
        let inits = Arc::new(AtomicUsize::new(0));
        let mut engine = CountingEngine::new(Arc::clone(&inits));
        engine.fail_first = usize::MAX;
        engine.delay = Duration::from_millis(30);
        let session = ModemSession::new(Box::new(engine), EngineParams::default());

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let session = session.clone();
                thread::spawn(move || session.acquire().is_err())
            })
            .collect();

        for worker in workers {
            assert!(worker.join().unwrap());
        }
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[test]
    fn test_handle_maps_failures_to_none() {
        let session = ModemSession::new(
            Box::new(CountingEngine::new(Arc::new(AtomicUsize::new(0)))),
            EngineParams::default(),
        );
        let modem = session.acquire().unwrap();

        assert_eq!(modem.encode("AB", ProtocolId::DEFAULT, 10), Some(vec![65.0, 66.0]));
        assert_eq!(modem.encode("", ProtocolId::DEFAULT, 10), None);
        assert_eq!(modem.encode("boom", ProtocolId::DEFAULT, 10), None);

        assert_eq!(modem.decode(&[0.0; 4]), None);
        assert_eq!(modem.decode(&[-1.0; 4]), None);
        assert_eq!(modem.decode(&[1.0; 4]).as_deref(), Some("TXT:hi"));
    }

    #[test]
    fn test_handle_after_shutdown_is_inert() {
        let session = ModemSession::new(
            Box::new(CountingEngine::new(Arc::new(AtomicUsize::new(0)))),
            EngineParams::default(),
        );
        let modem = session.acquire().unwrap();
        session.shutdown();

        assert_eq!(session.state(), SessionState::Uninitialized);
        assert_eq!(modem.encode("AB", ProtocolId::DEFAULT, 10), None);
        assert_eq!(modem.decode(&[1.0; 4]), None);

        session.shutdown();
        assert_eq!(session.state(), SessionState::Uninitialized);
    }
}
