//! Konsolen-Client: `start`, `next`, `stop` und `quit` über stdin

use anyhow::Context;
use std::sync::Arc;
use stranger_call::call_engine::{CallSession, LocalMedia, SessionEvent, WebRtcEngineFactory};
use stranger_call::config::Settings;
use stranger_call::signaling::WsSignalingChannel;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stranger_call::init_logging();

    let settings = Settings::from_env().context("Failed to load settings")?;
    tracing::info!("Starting stranger-call...");

    let mut channel = WsSignalingChannel::new(settings.signaling_url.clone());
    channel
        .connect()
        .await
        .context("Failed to connect to signaling server")?;

    let channel = Arc::new(channel);
    let factory = WebRtcEngineFactory::new(&settings.ice_servers, LocalMedia::audio_video());
    let (session, handle) = CallSession::new(channel.clone(), Arc::new(factory));
    let session_task = tokio::spawn(session.run());

    let mut events = handle.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::StateChanged(state)) => tracing::info!("State: {:?}", state),
                Ok(SessionEvent::PeerAssigned(peer_id)) => tracing::info!("Partner: {}", peer_id),
                Ok(SessionEvent::ParticipantCount(count)) => {
                    tracing::info!("{} users online", count)
                }
                Ok(SessionEvent::RemoteMediaAttached) => tracing::info!("Remote media ready"),
                Ok(SessionEvent::RemoteMediaDetached) => tracing::info!("Remote media detached"),
                Ok(SessionEvent::EngineFailed(e)) => tracing::error!("Media engine failed: {}", e),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Missed {} session events", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    tracing::info!("Commands: start | next | stop | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let result = match line.trim() {
            "start" => handle.start_call(),
            "next" => handle.next_call(),
            "stop" => handle.stop_call(),
            "quit" => break,
            "" => continue,
            other => {
                tracing::warn!("Unknown command: {}", other);
                continue;
            }
        };
        result.context("Call session stopped")?;
    }

    // Partner noch informieren, dann Session auslaufen lassen
    let _ = handle.stop_call();
    drop(handle);
    session_task.await.context("Call session task failed")?;
    channel.close().await;

    Ok(())
}
