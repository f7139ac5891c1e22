//! Session bookkeeping and state synchronisation.
//!
//! [`SyncServer`] owns the simulation and everything the server knows about
//! connected sessions. It is transport-agnostic: callers feed it client
//! messages and tick it, and it answers with [`Outgoing`] messages for the
//! network layer to deliver.
//!
//! Joins, leaves, inputs and commands take effect at the next tick boundary,
//! in that order, before the simulation steps. After every tick the world is
//! captured and diffed against the previous capture; the delta and the
//! tick's events go to every session.

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, info, warn};

use tank_core::components::{EntityId, SessionId, Team};
use tank_core::events::CommandOutcome;
use tank_core::input::{InputQueue, PlayerCommand};
use tank_core::math::Fixed;
use tank_core::simulation::Simulation;
use tank_core::sync::WorldSnapshot;

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::protocol::{input_from_wire, ChatRelay, ChatScope, ClientMessage, ServerMessage, MAX_CHAT_CHARS};

/// A message the network layer must deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    /// To one session.
    To(SessionId, ServerMessage),
    /// To every connected session.
    Broadcast(ServerMessage),
    /// Close the session's connection once its queued messages are sent.
    Disconnect(SessionId),
}

#[derive(Debug)]
struct Session {
    name: String,
    tank: EntityId,
    team: Team,
    inputs: InputQueue,
    commands: VecDeque<PlayerCommand>,
}

/// Authoritative game state plus the sessions playing in it.
#[derive(Debug)]
pub struct SyncServer {
    sim: Simulation,
    sessions: BTreeMap<SessionId, Session>,
    pending_joins: Vec<(SessionId, String)>,
    pending_leaves: Vec<SessionId>,
    previous: WorldSnapshot,
    max_players: usize,
    keyframe_interval: u64,
    input_buffer: usize,
}

impl SyncServer {
    /// Wrap a simulation.
    #[must_use]
    pub fn new(sim: Simulation, config: &ServerConfig) -> Self {
        let previous = WorldSnapshot::capture(&sim);
        Self {
            sim,
            sessions: BTreeMap::new(),
            pending_joins: Vec::new(),
            pending_leaves: Vec::new(),
            previous,
            max_players: config.max_players,
            keyframe_interval: config.keyframe_interval,
            input_buffer: config.input_buffer,
        }
    }

    /// The simulation.
    #[must_use]
    pub fn simulation(&self) -> &Simulation {
        &self.sim
    }

    /// State as of the last completed tick.
    #[must_use]
    pub fn latest(&self) -> &WorldSnapshot {
        &self.previous
    }

    /// Number of joined sessions.
    #[must_use]
    pub fn player_count(&self) -> usize {
        self.sessions.len()
    }

    /// Tank driven by `session`.
    pub fn session_tank(&self, session: SessionId) -> Result<EntityId> {
        self.sessions
            .get(&session)
            .map(|s| s.tank)
            .ok_or(ServerError::UnknownSession(session))
    }

    /// Fixed step length in seconds.
    #[must_use]
    pub fn fixed_step(&self) -> Fixed {
        self.sim.fixed_step()
    }

    /// React to a message from `session`.
    pub fn handle_message(&mut self, session: SessionId, message: ClientMessage) -> Vec<Outgoing> {
        match message {
            ClientMessage::Join { name } => self.request_join(session, name),
            ClientMessage::Input {
                turn_rate,
                up,
                fire,
                tick,
            } => {
                let Some(state) = self.sessions.get_mut(&session) else {
                    return not_joined(session);
                };
                state.inputs.push(input_from_wire(turn_rate, up, fire, tick));
                Vec::new()
            }
            ClientMessage::Chat { message, is_all_chat } => self.relay_chat(session, message, is_all_chat),
            other => {
                let Some(state) = self.sessions.get_mut(&session) else {
                    return not_joined(session);
                };
                if let Some(command) = other.command() {
                    state.commands.push_back(command);
                }
                Vec::new()
            }
        }
    }

    fn request_join(&mut self, session: SessionId, name: String) -> Vec<Outgoing> {
        let already = self.sessions.contains_key(&session) || self.pending_joins.iter().any(|(s, _)| *s == session);
        if already {
            return vec![advise(session, "Already joined")];
        }
        if self.sessions.len() + self.pending_joins.len() >= self.max_players {
            info!(session, max = self.max_players, "Join refused, server full");
            return vec![
                Outgoing::To(
                    session,
                    ServerMessage::Rejected {
                        reason: "Server is full".to_string(),
                    },
                ),
                Outgoing::Disconnect(session),
            ];
        }
        self.pending_joins.push((session, name));
        Vec::new()
    }

    /// Note that `session`'s connection went away.
    pub fn disconnect(&mut self, session: SessionId) {
        self.pending_joins.retain(|(s, _)| *s != session);
        if self.sessions.contains_key(&session) {
            self.pending_leaves.push(session);
        }
    }

    fn relay_chat(&self, session: SessionId, message: String, is_all_chat: bool) -> Vec<Outgoing> {
        let Some(sender) = self.sessions.get(&session) else {
            return not_joined(session);
        };
        let message = message.trim().to_string();
        let chars = message.chars().count();
        if chars == 0 || chars > MAX_CHAT_CHARS {
            return vec![advise(session, "Chat messages must be 1 to 100 characters")];
        }
        let relay = ChatRelay {
            message,
            sender: sender.name.clone(),
            team: sender.team,
            scope: if is_all_chat { ChatScope::All } else { ChatScope::Team },
        };
        if is_all_chat {
            return vec![Outgoing::Broadcast(ServerMessage::Chat(relay))];
        }
        self.sessions
            .iter()
            .filter(|(_, s)| s.team == sender.team)
            .map(|(id, _)| Outgoing::To(*id, ServerMessage::Chat(relay.clone())))
            .collect()
    }

    /// Apply queued session changes, step the simulation once and produce
    /// the messages for this tick.
    pub fn tick(&mut self, dt: Fixed) -> Vec<Outgoing> {
        let mut out = Vec::new();

        for session in std::mem::take(&mut self.pending_leaves) {
            let Some(state) = self.sessions.remove(&session) else {
                continue;
            };
            if let Err(e) = self.sim.leave(state.tank) {
                warn!(session, tank = state.tank, error = %e, "Leaving tank was already gone");
            }
            info!(session, name = %state.name, "Player left");
        }

        let mut joined = Vec::new();
        for (session, name) in std::mem::take(&mut self.pending_joins) {
            let tank = self.sim.join(session);
            let team = self.sim.tank(tank).map_or(Team::Neutral, |t| t.team);
            info!(session, tank, ?team, name = %name, "Player joined");
            self.sessions.insert(
                session,
                Session {
                    name,
                    tank,
                    team,
                    inputs: InputQueue::new(self.input_buffer),
                    commands: VecDeque::new(),
                },
            );
            out.push(Outgoing::To(
                session,
                ServerMessage::Welcome {
                    session,
                    tank,
                    team,
                    tick: self.sim.current_tick(),
                },
            ));
            joined.push(session);
        }

        for (&session, state) in &mut self.sessions {
            if let Some(input) = state.inputs.drain_latest() {
                if let Err(e) = self.sim.set_input(state.tank, input) {
                    warn!(session, error = %e, "Input for missing tank");
                }
            }
            while let Some(command) = state.commands.pop_front() {
                match self.sim.apply_command(state.tank, command) {
                    Ok(CommandOutcome::Accepted) => {}
                    Ok(CommandOutcome::Rejected(reason)) => {
                        debug!(session, ?reason, "Command rejected");
                        out.push(advise(session, &reason.to_string()));
                    }
                    Err(e) => warn!(session, error = %e, "Command for missing tank"),
                }
            }
        }

        let events = self.sim.tick(dt);
        let snapshot = WorldSnapshot::capture(&self.sim);
        let delta = self.previous.diff(&snapshot);

        out.push(Outgoing::Broadcast(ServerMessage::Update {
            delta,
            events: events.events,
        }));
        if self.keyframe_interval > 0 && snapshot.tick % self.keyframe_interval == 0 {
            debug!(tick = snapshot.tick, "Broadcasting keyframe");
            out.push(Outgoing::Broadcast(ServerMessage::Snapshot(snapshot.clone())));
        }
        for session in joined {
            out.push(Outgoing::To(session, ServerMessage::Snapshot(snapshot.clone())));
        }

        self.previous = snapshot;
        out
    }
}

fn advise(session: SessionId, message: &str) -> Outgoing {
    Outgoing::To(
        session,
        ServerMessage::Advisory {
            message: message.to_string(),
        },
    )
}

fn not_joined(session: SessionId) -> Vec<Outgoing> {
    vec![advise(session, "Join the game first")]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tank_core::build_queue::BuildKind;
    use tank_core::sync::SnapshotMirror;
    use tank_core::tilemap::TileCoord;
    use tank_test_utils::fixtures::{arena_sim, open_sim};

    fn server_with(sim: Simulation, max_players: usize) -> SyncServer {
        let config = ServerConfig {
            max_players,
            keyframe_interval: 0,
            ..ServerConfig::default()
        };
        SyncServer::new(sim, &config)
    }

    fn step(server: &mut SyncServer) -> Vec<Outgoing> {
        let dt = server.fixed_step();
        server.tick(dt)
    }

    fn join(server: &mut SyncServer, session: SessionId, name: &str) -> Vec<Outgoing> {
        assert!(server
            .handle_message(session, ClientMessage::Join { name: name.to_string() })
            .is_empty());
        step(server)
    }

    fn to(out: &[Outgoing], session: SessionId) -> Vec<&ServerMessage> {
        out.iter()
            .filter_map(|o| match o {
                Outgoing::To(s, m) if *s == session => Some(m),
                _ => None,
            })
            .collect()
    }

    fn advisories(out: &[Outgoing], session: SessionId) -> usize {
        to(out, session)
            .iter()
            .filter(|m| matches!(m, ServerMessage::Advisory { .. }))
            .count()
    }

    fn update(out: &[Outgoing]) -> &ServerMessage {
        out.iter()
            .find_map(|o| match o {
                Outgoing::Broadcast(m @ ServerMessage::Update { .. }) => Some(m),
                _ => None,
            })
            .expect("every tick broadcasts an update")
    }

    #[test]
    fn test_join_sends_welcome_then_snapshot() {
        let mut server = server_with(arena_sim(), 4);
        let out = join(&mut server, 7, "ada");

        let direct = to(&out, 7);
        assert_eq!(direct.len(), 2);
        let ServerMessage::Welcome { session, tank, .. } = direct[0] else {
            panic!("expected welcome, got {:?}", direct[0]);
        };
        assert_eq!(*session, 7);
        assert_eq!(server.session_tank(7).unwrap(), *tank);
        let ServerMessage::Snapshot(snapshot) = direct[1] else {
            panic!("expected snapshot, got {:?}", direct[1]);
        };
        assert!(snapshot.tanks.contains_key(tank));
        assert_eq!(snapshot, server.latest());
        assert!(matches!(update(&out), ServerMessage::Update { .. }));
    }

    #[test]
    fn test_full_server_rejects_and_disconnects() {
        let mut server = server_with(arena_sim(), 1);
        join(&mut server, 1, "first");
        let out = server.handle_message(2, ClientMessage::Join { name: "second".into() });
        assert!(matches!(to(&out, 2)[0], ServerMessage::Rejected { .. }));
        assert!(out.contains(&Outgoing::Disconnect(2)));
        assert_eq!(server.player_count(), 1);
    }

    #[test]
    fn test_messages_before_join_are_advised() {
        let mut server = server_with(arena_sim(), 4);
        let out = server.handle_message(
            3,
            ClientMessage::Input {
                turn_rate: 0.0,
                up: true,
                fire: false,
                tick: 0,
            },
        );
        assert_eq!(advisories(&out, 3), 1);
        assert!(server.session_tank(3).is_err());
    }

    #[test]
    fn test_latest_input_wins() {
        let mut server = server_with(open_sim(20, 20), 4);
        join(&mut server, 1, "ada");
        let tank = server.session_tank(1).unwrap();

        for (up, tick) in [(true, 1), (false, 2), (true, 3)] {
            server.handle_message(
                1,
                ClientMessage::Input {
                    turn_rate: 0.0,
                    up,
                    fire: false,
                    tick,
                },
            );
        }
        step(&mut server);
        let input = server.simulation().tank(tank).unwrap().input;
        assert!(input.up);
        assert_eq!(input.tick, 3);
    }

    #[test]
    fn test_rejected_command_is_advised() {
        let mut server = server_with(open_sim(20, 20), 4);
        join(&mut server, 1, "ada");
        server.handle_message(1, ClientMessage::BuildPillbox);
        server.handle_message(
            1,
            ClientMessage::Build {
                tiles: vec![TileCoord::new(0, 0)],
                kind: BuildKind::Road,
            },
        );
        let out = step(&mut server);
        assert_eq!(advisories(&out, 1), 2);
    }

    #[test]
    fn test_team_chat_stays_on_team() {
        let mut server = server_with(arena_sim(), 4);
        server.handle_message(1, ClientMessage::Join { name: "red".into() });
        server.handle_message(2, ClientMessage::Join { name: "blue".into() });
        server.handle_message(3, ClientMessage::Join { name: "red2".into() });
        step(&mut server);

        let out = server.handle_message(
            1,
            ClientMessage::Chat {
                message: "push left".into(),
                is_all_chat: false,
            },
        );
        assert_eq!(to(&out, 1).len(), 1);
        assert_eq!(to(&out, 3).len(), 1);
        assert!(to(&out, 2).is_empty());
        let ServerMessage::Chat(relay) = to(&out, 3)[0] else {
            panic!("expected chat");
        };
        assert_eq!(relay.sender, "red");
        assert_eq!(relay.scope, ChatScope::Team);

        let out = server.handle_message(
            2,
            ClientMessage::Chat {
                message: "gg".into(),
                is_all_chat: true,
            },
        );
        assert!(matches!(&out[..], [Outgoing::Broadcast(ServerMessage::Chat(_))]));
    }

    #[test]
    fn test_chat_length_is_checked() {
        let mut server = server_with(arena_sim(), 4);
        join(&mut server, 1, "ada");
        for message in [String::new(), "   ".to_string(), "x".repeat(101)] {
            let out = server.handle_message(1, ClientMessage::Chat { message, is_all_chat: true });
            assert_eq!(advisories(&out, 1), 1);
        }
        let out = server.handle_message(
            1,
            ClientMessage::Chat {
                message: "x".repeat(100),
                is_all_chat: true,
            },
        );
        assert_eq!(advisories(&out, 1), 0);
    }

    #[test]
    fn test_disconnect_removes_tank_next_tick() {
        let mut server = server_with(arena_sim(), 4);
        join(&mut server, 1, "ada");
        let tank = server.session_tank(1).unwrap();

        server.disconnect(1);
        let out = step(&mut server);
        let ServerMessage::Update { delta, .. } = update(&out) else {
            unreachable!()
        };
        assert_eq!(delta.tanks.removed, vec![tank]);
        assert_eq!(server.player_count(), 0);
        assert!(server.simulation().tank(tank).is_none());
    }

    #[test]
    fn test_mirror_follows_updates() {
        let mut server = server_with(arena_sim(), 4);
        let out = join(&mut server, 1, "ada");
        let ServerMessage::Snapshot(first) = to(&out, 1)[1].clone() else {
            panic!("expected snapshot");
        };
        let mut mirror = SnapshotMirror::new();
        mirror.load(first);
        server.handle_message(
            1,
            ClientMessage::Input {
                turn_rate: 0.3,
                up: true,
                fire: true,
                tick: 0,
            },
        );

        for _ in 0..120 {
            let out = step(&mut server);
            if let ServerMessage::Update { delta, .. } = update(&out) {
                assert!(mirror.apply(delta).unwrap());
            }
        }
        assert_eq!(mirror.snapshot().unwrap(), server.latest());
    }

    #[test]
    fn test_late_joiner_skips_the_update_it_already_has() {
        let mut server = server_with(arena_sim(), 4);
        join(&mut server, 1, "ada");
        step(&mut server);

        server.handle_message(2, ClientMessage::Join { name: "bob".into() });
        let out = step(&mut server);
        let ServerMessage::Snapshot(snapshot) = to(&out, 2)[1].clone() else {
            panic!("expected snapshot");
        };
        let mut mirror = SnapshotMirror::new();
        mirror.load(snapshot);
        let ServerMessage::Update { delta, .. } = update(&out) else {
            unreachable!()
        };
        assert!(!mirror.apply(delta).unwrap());

        let out = step(&mut server);
        let ServerMessage::Update { delta, .. } = update(&out) else {
            unreachable!()
        };
        assert!(mirror.apply(delta).unwrap());
    }

    #[test]
    fn test_keyframes_follow_interval() {
        let config = ServerConfig {
            keyframe_interval: 5,
            ..ServerConfig::default()
        };
        let mut server = SyncServer::new(arena_sim(), &config);
        let mut keyframes = 0;
        for _ in 0..20 {
            let out = step(&mut server);
            keyframes += out
                .iter()
                .filter(|o| matches!(o, Outgoing::Broadcast(ServerMessage::Snapshot(_))))
                .count();
        }
        assert_eq!(keyframes, 4);
    }

    #[test]
    fn test_duplicate_join_is_ignored() {
        let mut server = server_with(arena_sim(), 4);
        join(&mut server, 1, "ada");
        let out = server.handle_message(1, ClientMessage::Join { name: "ada".into() });
        assert_eq!(advisories(&out, 1), 1);
        assert_eq!(server.player_count(), 1);
    }
}
