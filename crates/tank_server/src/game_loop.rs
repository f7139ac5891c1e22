//! The single task that owns the simulation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use tank_core::clock::SimulationClock;
use tank_core::components::SessionId;
use tank_core::sync::WorldSnapshot;

use crate::network::NetEvent;
use crate::protocol::{encode_frame, Frame};
use crate::sync::{Outgoing, SyncServer};

/// Game loop state: the server plus the open outboxes.
#[derive(Debug)]
pub struct GameLoop {
    server: SyncServer,
    clock: SimulationClock,
    events: mpsc::Receiver<NetEvent>,
    updates: broadcast::Sender<Frame>,
    latest: watch::Sender<Arc<WorldSnapshot>>,
    outboxes: BTreeMap<SessionId, mpsc::Sender<Frame>>,
}

impl GameLoop {
    /// Assemble a loop around `server`.
    #[must_use]
    pub fn new(
        server: SyncServer,
        tick_rate: u32,
        max_catch_up_ticks: u32,
        events: mpsc::Receiver<NetEvent>,
        updates: broadcast::Sender<Frame>,
        latest: watch::Sender<Arc<WorldSnapshot>>,
    ) -> Self {
        Self {
            server,
            clock: SimulationClock::new(tick_rate).with_max_backlog(max_catch_up_ticks),
            events,
            updates,
            latest,
            outboxes: BTreeMap::new(),
        }
    }

    /// Run until every network sender is gone.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.clock.step());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = Instant::now();

        loop {
            interval.tick().await;
            if !self.drain_events() {
                info!("Network closed, stopping game loop");
                return;
            }

            let now = Instant::now();
            let elapsed = now - last;
            last = now;

            let mut out = Vec::new();
            let server = &mut self.server;
            let ran = self.clock.advance(elapsed, |dt| out.extend(server.tick(dt)));
            self.dispatch(out);
            if ran > 0 {
                self.latest.send_replace(Arc::new(self.server.latest().clone()));
            }
        }
    }

    /// Handle every queued network event. Returns false once the network is gone.
    fn drain_events(&mut self) -> bool {
        loop {
            let event = match self.events.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            };
            let out = match event {
                NetEvent::Connected { session, outbox } => {
                    self.outboxes.insert(session, outbox);
                    continue;
                }
                NetEvent::Message { session, message } => self.server.handle_message(session, message),
                NetEvent::Disconnected { session } => {
                    self.outboxes.remove(&session);
                    self.server.disconnect(session);
                    continue;
                }
            };
            self.dispatch(out);
        }
    }

    fn dispatch(&mut self, out: Vec<Outgoing>) {
        for item in out {
            match item {
                Outgoing::To(session, message) => {
                    let Some(outbox) = self.outboxes.get(&session) else {
                        continue;
                    };
                    let frame = match encode_frame(&message) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(session, error = %e, "Failed to encode message");
                            continue;
                        }
                    };
                    match outbox.try_send(frame) {
                        Ok(()) | Err(TrySendError::Closed(_)) => {}
                        Err(TrySendError::Full(_)) => warn!(session, "Outbox full, dropping message"),
                    }
                }
                Outgoing::Broadcast(message) => match encode_frame(&message) {
                    // No receivers just means nobody is connected.
                    Ok(frame) => {
                        let _ = self.updates.send(frame);
                    }
                    Err(e) => warn!(error = %e, "Failed to encode broadcast"),
                },
                Outgoing::Disconnect(session) => {
                    debug!(session, "Closing session");
                    self.outboxes.remove(&session);
                }
            }
        }
    }
}
