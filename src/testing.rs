//! Test-Doubles für Kanal und Medien-Engine

use crate::call_engine::{
    EngineError, EngineEvents, MediaEngine, MediaEngineFactory, NegotiationError, TransportError,
};
use crate::signaling::{
    Command, CommandStream, IceCandidate, InboundFanout, SdpKind, SessionDescription,
    SignalingChannel,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// RECORDING CHANNEL
// ============================================================================

/// Kanal, der alles Gesendete mitschreibt
pub(crate) struct RecordingChannel {
    sent: Mutex<Vec<Command>>,
    inbound: InboundFanout,
}

impl RecordingChannel {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            inbound: InboundFanout::new(),
        })
    }

    pub(crate) fn sent(&self) -> Vec<Command> {
        self.sent.lock().clone()
    }

    pub(crate) fn take_sent(&self) -> Vec<Command> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub(crate) fn push_inbound(&self, command: Command) {
        self.inbound.dispatch(command);
    }
}

impl SignalingChannel for RecordingChannel {
    fn send(&self, command: Command) {
        self.sent.lock().push(command);
    }

    fn receive(&self) -> CommandStream {
        self.inbound.subscribe()
    }
}

// ============================================================================
// FAKE MEDIA ENGINE
// ============================================================================

#[derive(Default)]
pub(crate) struct EngineStats {
    created: AtomicUsize,
    closed: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
    remote_descriptions: Mutex<Vec<SessionDescription>>,
    candidates: Mutex<Vec<IceCandidate>>,
}

impl EngineStats {
    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub(crate) fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub(crate) fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub(crate) fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.remote_descriptions.lock().clone()
    }

    pub(crate) fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().clone()
    }
}

/// Factory für Engines, die nur mitzählen und mitschreiben
#[derive(Default)]
pub(crate) struct FakeEngineFactory {
    pub(crate) stats: Arc<EngineStats>,
    fail_creation: AtomicBool,
    reject_remote: AtomicBool,
    reject_candidates: AtomicBool,
}

impl FakeEngineFactory {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn fail_creation(&self) {
        self.fail_creation.store(true, Ordering::SeqCst);
    }

    pub(crate) fn reject_remote_descriptions(&self) {
        self.reject_remote.store(true, Ordering::SeqCst);
    }

    pub(crate) fn reject_candidates(&self) {
        self.reject_candidates.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaEngineFactory for FakeEngineFactory {
    async fn create(&self, events: EngineEvents) -> Result<Box<dyn MediaEngine>, EngineError> {
        // echte Engines suspendieren hier
        tokio::task::yield_now().await;

        if self.fail_creation.load(Ordering::SeqCst) {
            return Err(EngineError::WebRTC("no camera".to_string()));
        }

        self.stats.created.fetch_add(1, Ordering::SeqCst);
        let live = self.stats.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_live.fetch_max(live, Ordering::SeqCst);

        Ok(Box::new(FakeEngine {
            generation: events.generation(),
            stats: Arc::clone(&self.stats),
            reject_remote: self.reject_remote.load(Ordering::SeqCst),
            reject_candidates: self.reject_candidates.load(Ordering::SeqCst),
            closed: AtomicBool::new(false),
        }))
    }
}

struct FakeEngine {
    generation: u64,
    stats: Arc<EngineStats>,
    reject_remote: bool,
    reject_candidates: bool,
    closed: AtomicBool,
}

#[async_trait]
impl MediaEngine for FakeEngine {
    async fn create_local_description(
        &self,
        kind: SdpKind,
    ) -> Result<SessionDescription, NegotiationError> {
        tokio::task::yield_now().await;
        Ok(SessionDescription {
            kind,
            sdp: format!("local-{}-{}", kind, self.generation),
        })
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        if self.reject_remote {
            return Err(NegotiationError::InvalidDescription(
                "unparseable sdp".to_string(),
            ));
        }
        self.stats.remote_descriptions.lock().push(description);
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        if self.reject_candidates {
            return Err(TransportError::Rejected("no remote description".to_string()));
        }
        self.stats.candidates.lock().push(candidate);
        Ok(())
    }

    async fn close(&self) {
        assert!(
            !self.closed.swap(true, Ordering::SeqCst),
            "engine {} closed twice",
            self.generation
        );
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
        self.stats.live.fetch_sub(1, Ordering::SeqCst);
    }
}
