use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use watchparty_common::ClientMessage;

use crate::media::PeerEventReceiver;
use crate::negotiation::NegotiationError;
use crate::session::ParticipantSession;
use crate::signaling::SignalingClient;
use crate::types::SessionCommand;

async fn apply_command(
    session: &mut ParticipantSession,
    command: SessionCommand,
) -> Result<Vec<ClientMessage>, NegotiationError> {
    match command {
        SessionCommand::CreateRoom { name } => Ok(session.create_room(name)),
        SessionCommand::JoinRoom { room_id, name } => Ok(session.join_room(room_id, name)),
        SessionCommand::StartScreenShare { video, mixed_audio } => {
            session.start_screen_share(video, mixed_audio).await
        }
        SessionCommand::StopScreenShare => session.stop_screen_share().await,
        SessionCommand::LocalTrackEnded(id) => session.local_track_ended(&id).await,
        SessionCommand::Leave => Ok(Vec::new()),
    }
}

/// Drive `session` against the gateway at `url` until the user leaves,
/// the command channel closes, or the gateway hangs up.
///
/// Failures on a single message are logged and the loop keeps going. The
/// peer connection is released before the session is handed back.
pub async fn run_session(
    url: &str,
    mut session: ParticipantSession,
    mut commands: mpsc::Receiver<SessionCommand>,
    mut events: PeerEventReceiver,
) -> Result<ParticipantSession> {
    let (mut signal_tx, mut signal_rx) = SignalingClient::connect(url).await?.split();
    info!("connected to signaling gateway: {}", url);

    'session: loop {
        let outgoing = tokio::select! {
            incoming = signal_rx.recv() => match incoming {
                Ok(Some(msg)) => {
                    debug!(event = msg.event_name(), "signal received");
                    session.handle_server_message(msg).await
                }
                Ok(None) => {
                    info!("signaling connection closed");
                    break 'session;
                }
                Err(e) => {
                    warn!("signaling connection failed: {}", e);
                    break 'session;
                }
            },

            Some((role, event)) = events.recv() => session.handle_peer_event(role, event).await,

            command = commands.recv() => match command {
                None | Some(SessionCommand::Leave) => {
                    info!("leaving session");
                    break 'session;
                }
                Some(command) => apply_command(&mut session, command).await,
            },
        };

        match outgoing {
            Ok(messages) => {
                for msg in messages {
                    debug!(event = msg.event_name(), "signal sent");
                    if let Err(e) = signal_tx.send(&msg).await {
                        warn!("failed to send {}: {}", msg.event_name(), e);
                        break 'session;
                    }
                }
            }
            Err(e) => warn!("negotiation step failed: {}", e),
        }
    }

    session.close().await;
    if let Err(e) = signal_tx.close().await {
        debug!("signaling close failed: {}", e);
    }
    Ok(session)
}
