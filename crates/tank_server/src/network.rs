//! TCP transport.
//!
//! Each connection gets a reader task and a writer task. Readers decode
//! frames and push [`NetEvent`]s to the game loop; they never touch game
//! state. Writers forward direct frames from the session's outbox and tick
//! updates from the shared broadcast channel. A writer that falls behind the
//! broadcast channel skips to the latest full snapshot.

use std::sync::Arc;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, info_span, warn, Instrument};

use tank_core::components::SessionId;
use tank_core::sync::WorldSnapshot;

use crate::error::Result;
use crate::protocol::{decode, encode_frame, read_frame, write_frame, ClientMessage, Frame, ServerMessage, MAX_CLIENT_FRAME};

/// What the network tells the game loop.
#[derive(Debug)]
pub enum NetEvent {
    /// A connection opened; direct messages for it go to `outbox`.
    Connected {
        /// Assigned session id.
        session: SessionId,
        /// Direct message channel to the session's writer.
        outbox: mpsc::Sender<Frame>,
    },
    /// A decoded client message.
    Message {
        /// Sender.
        session: SessionId,
        /// Message.
        message: ClientMessage,
    },
    /// The connection closed.
    Disconnected {
        /// Session that went away.
        session: SessionId,
    },
}

/// Channels shared by every connection.
#[derive(Debug, Clone)]
pub struct NetChannels {
    /// Reader-to-game-loop events.
    pub events: mpsc::Sender<NetEvent>,
    /// Encoded tick updates for every writer.
    pub updates: broadcast::Sender<Frame>,
    /// Latest full state, for writers that fell behind.
    pub latest: watch::Receiver<Arc<WorldSnapshot>>,
    /// Capacity of each session's direct outbox.
    pub outbox_capacity: usize,
}

/// Accept connections until the listener fails.
pub async fn accept_loop(listener: TcpListener, channels: NetChannels) -> Result<()> {
    let mut next_session: SessionId = 1;
    loop {
        let (stream, addr) = listener.accept().await?;
        let session = next_session;
        next_session += 1;
        info!(session, %addr, "Client connected");
        let span = info_span!("conn", session);
        tokio::spawn(handle_connection(stream, session, channels.clone()).instrument(span));
    }
}

async fn handle_connection(stream: TcpStream, session: SessionId, channels: NetChannels) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!(error = %e, "Failed to set TCP_NODELAY");
    }
    let (reader, writer) = stream.into_split();
    let (outbox_tx, outbox_rx) = mpsc::channel(channels.outbox_capacity.max(1));

    // Subscribe before announcing so no update after the join is missed.
    let updates = channels.updates.subscribe();
    if channels
        .events
        .send(NetEvent::Connected {
            session,
            outbox: outbox_tx,
        })
        .await
        .is_err()
    {
        debug!("Game loop gone, dropping connection");
        return;
    }

    tokio::spawn(write_loop(writer, outbox_rx, updates, channels.latest.clone()).instrument(tracing::Span::current()));
    read_loop(reader, session, &channels.events).await;

    let _ = channels.events.send(NetEvent::Disconnected { session }).await;
    info!("Client disconnected");
}

async fn read_loop(mut reader: OwnedReadHalf, session: SessionId, events: &mpsc::Sender<NetEvent>) {
    loop {
        let payload = match read_frame(&mut reader, MAX_CLIENT_FRAME).await {
            Ok(Some(payload)) => payload,
            Ok(None) => return,
            Err(e) => {
                if e.is_fatal_for_session() {
                    warn!(error = %e, "Closing session");
                } else {
                    debug!(error = %e, "Read failed");
                }
                return;
            }
        };
        let message = match decode::<ClientMessage>(&payload) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, len = payload.len(), "Dropping malformed frame");
                continue;
            }
        };
        if events.send(NetEvent::Message { session, message }).await.is_err() {
            return;
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbox: mpsc::Receiver<Frame>,
    mut updates: broadcast::Receiver<Frame>,
    latest: watch::Receiver<Arc<WorldSnapshot>>,
) {
    loop {
        let frame = tokio::select! {
            biased;
            direct = outbox.recv() => match direct {
                Some(frame) => frame,
                // The game loop dropped the outbox: the session is over.
                None => break,
            },
            update = updates.recv() => match update {
                Ok(frame) => frame,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Client lagged, resending full snapshot");
                    let snapshot = WorldSnapshot::clone(&latest.borrow());
                    match encode_frame(&ServerMessage::Snapshot(snapshot)) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(error = %e, "Failed to encode recovery snapshot");
                            continue;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };
        if let Err(e) = write_frame(&mut writer, &frame).await {
            debug!(error = %e, "Write failed");
            break;
        }
    }
}
