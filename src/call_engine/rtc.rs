//! WebRTC Media Engine
//!
//! Eine [`WebRtcEngine`] kapselt genau eine `RTCPeerConnection`. Die Factory
//! hängt bei der Erzeugung die lokalen Tracks an und leitet die Callbacks der
//! Peer Connection als Generation-markierte Benachrichtigungen weiter.

use super::engine::{
    EngineError, EngineEvents, MediaEngine, MediaEngineFactory, NegotiationError, TransportError,
    TransportState,
};
use crate::signaling::{IceCandidate, SdpKind, SessionDescription};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine as RtcMediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Opus läuft mit 48kHz
const AUDIO_CLOCK_RATE: u32 = 48000;

/// RTP-Takt für Video
const VIDEO_CLOCK_RATE: u32 = 90000;

// ============================================================================
// LOCAL MEDIA
// ============================================================================

/// Handle auf die lokal aufgenommenen Tracks
///
/// Das Befüllen der Tracks mit Samples übernimmt die Aufnahme (Kamera/Mikrofon)
/// außerhalb dieses Crates; hier werden sie nur an jede neue Engine gehängt.
#[derive(Clone, Default)]
pub struct LocalMedia {
    audio: Option<Arc<TrackLocalStaticSample>>,
    video: Option<Arc<TrackLocalStaticSample>>,
}

impl LocalMedia {
    /// Erstellt ein Audio- und ein Video-Track im selben Stream
    pub fn audio_video() -> Self {
        let stream_id = format!("stranger-call-{}", Uuid::new_v4());

        let audio = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: AUDIO_CLOCK_RATE,
                channels: 2,
                ..Default::default()
            },
            "audio".to_string(),
            stream_id.clone(),
        ));

        let video = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: VIDEO_CLOCK_RATE,
                ..Default::default()
            },
            "video".to_string(),
            stream_id,
        ));

        Self {
            audio: Some(audio),
            video: Some(video),
        }
    }

    pub fn audio(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.audio.clone()
    }

    pub fn video(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.video.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }

    fn tracks(&self) -> Vec<Arc<dyn TrackLocal + Send + Sync>> {
        self.audio
            .iter()
            .chain(self.video.iter())
            .map(|track| Arc::clone(track) as Arc<dyn TrackLocal + Send + Sync>)
            .collect()
    }
}

impl std::fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMedia")
            .field("audio", &self.audio.is_some())
            .field("video", &self.video.is_some())
            .finish()
    }
}

// ============================================================================
// FACTORY
// ============================================================================

/// Erzeugt für jeden Paarungsversuch eine neue Peer Connection
#[derive(Debug, Clone)]
pub struct WebRtcEngineFactory {
    ice_servers: Vec<RTCIceServer>,
    local_media: LocalMedia,
}

impl WebRtcEngineFactory {
    pub fn new(ice_urls: &[String], local_media: LocalMedia) -> Self {
        let ice_servers = if ice_urls.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: ice_urls.to_vec(),
                ..Default::default()
            }]
        };

        Self {
            ice_servers,
            local_media,
        }
    }

    async fn new_peer_connection(&self) -> Result<Arc<RTCPeerConnection>, EngineError> {
        let mut media_engine = RtcMediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| EngineError::WebRTC(e.to_string()))?;

        // Interceptors für RTCP, NACK etc.
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| EngineError::WebRTC(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let pc = api
            .new_peer_connection(config)
            .await
            .map_err(|e| EngineError::WebRTC(e.to_string()))?;

        Ok(Arc::new(pc))
    }
}

#[async_trait]
impl MediaEngineFactory for WebRtcEngineFactory {
    async fn create(&self, events: EngineEvents) -> Result<Box<dyn MediaEngine>, EngineError> {
        let pc = self.new_peer_connection().await?;

        for track in self.local_media.tracks() {
            if let Err(e) = pc.add_track(track).await {
                let _ = pc.close().await;
                return Err(EngineError::WebRTC(e.to_string()));
            }
        }

        let remote_tracks = Arc::new(Mutex::new(Vec::new()));
        register_handlers(&pc, &events, &remote_tracks);

        tracing::debug!(
            generation = events.generation(),
            "Peer connection created"
        );

        Ok(Box::new(WebRtcEngine {
            pc,
            remote_tracks,
            has_local_media: !self.local_media.is_empty(),
        }))
    }
}

/// Verdrahtet die Callbacks der Peer Connection mit dem Rückkanal
fn register_handlers(
    pc: &Arc<RTCPeerConnection>,
    events: &EngineEvents,
    remote_tracks: &Arc<Mutex<Vec<Arc<TrackRemote>>>>,
) {
    let events_clone = events.clone();
    pc.on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
        tracing::info!("ICE connection state: {:?}", s);

        let state = match s {
            RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
                Some(TransportState::Connected)
            }
            RTCIceConnectionState::Disconnected => Some(TransportState::Disconnected),
            RTCIceConnectionState::Failed => Some(TransportState::Failed),
            RTCIceConnectionState::Closed => Some(TransportState::Closed),
            _ => None,
        };

        if let Some(state) = state {
            events_clone.transport_state_changed(state);
        }

        Box::pin(async {})
    }));

    let events_clone = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        if let Some(c) = candidate {
            match c.to_json().map(|init| serde_json::to_value(&init)) {
                Ok(Ok(json)) => events_clone.local_candidate(IceCandidate(json)),
                Ok(Err(e)) => tracing::warn!("Failed to encode local ICE candidate: {}", e),
                Err(e) => tracing::warn!("Failed to serialize local ICE candidate: {}", e),
            }
        }
        Box::pin(async {})
    }));

    let events_clone = events.clone();
    let tracks = Arc::clone(remote_tracks);
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            tracing::info!("Received remote track: {:?}", track.kind());
            tracks.lock().push(track);
            events_clone.remote_media_attached();
            Box::pin(async {})
        },
    ));
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct WebRtcEngine {
    pc: Arc<RTCPeerConnection>,
    remote_tracks: Arc<Mutex<Vec<Arc<TrackRemote>>>>,
    has_local_media: bool,
}

#[async_trait]
impl MediaEngine for WebRtcEngine {
    async fn create_local_description(
        &self,
        kind: SdpKind,
    ) -> Result<SessionDescription, NegotiationError> {
        if !self.has_local_media {
            return Err(NegotiationError::NoLocalMedia);
        }

        let description = match kind {
            SdpKind::Offer => self.pc.create_offer(None).await,
            SdpKind::Answer => self.pc.create_answer(None).await,
        }
        .map_err(|e| NegotiationError::WebRTC(e.to_string()))?;

        self.pc
            .set_local_description(description.clone())
            .await
            .map_err(|e| NegotiationError::WebRTC(e.to_string()))?;

        Ok(SessionDescription {
            kind,
            sdp: description.sdp,
        })
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let remote = match description.kind {
            SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
        }
        .map_err(|e| NegotiationError::InvalidDescription(e.to_string()))?;

        self.pc
            .set_remote_description(remote)
            .await
            .map_err(|e| NegotiationError::InvalidDescription(e.to_string()))
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        let init: RTCIceCandidateInit = serde_json::from_value(candidate.0)
            .map_err(|e| TransportError::InvalidCandidate(e.to_string()))?;

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }

    async fn close(&self) {
        let detached = std::mem::take(&mut *self.remote_tracks.lock());
        tracing::debug!("Detached {} remote tracks", detached.len());
        drop(detached);

        if let Err(e) = self.pc.close().await {
            tracing::warn!("Failed to close peer connection: {}", e);
        }
    }
}

impl std::fmt::Debug for WebRtcEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcEngine")
            .field("connection_state", &self.pc.connection_state())
            .field("remote_tracks", &self.remote_tracks.lock().len())
            .finish()
    }
}
