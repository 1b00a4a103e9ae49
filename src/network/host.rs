//! Host Loop
//!
//! The authoritative peer. Owns the [`MatchRunner`], applies buffered
//! input, runs the tick and broadcasts the result: one full INIT to start,
//! then a DELTA against the last *sent* snapshot whenever something changed
//! and the minimum broadcast interval has elapsed.
//!
//! Powerup events go out twice: immediately as POWERUP EVENT messages and
//! bundled into the next non-empty DELTA.

use std::collections::BTreeMap;

use tracing::{debug, info, trace, warn};

use crate::game::input::InputState;
use crate::game::snapshot::{capture_state, CoarseDiffer, Differ, PowerupSnapshot, Snapshot};
use crate::game::state::{MatchPhase, MatchState, PeerId, TankId};
use crate::game::tick::{ArenaSimulation, MatchRunner, Simulation, TickResult};
use crate::network::protocol::{
    ChatLine, DeltaMessage, InitMessage, Message, PeerInfo, TankConfig,
};
use crate::network::relay::InputSink;
use crate::network::router::RoleHandler;
use crate::network::session::{Role, Session};

/// Default minimum spacing between broadcasts.
pub const DEFAULT_BROADCAST_INTERVAL_MS: u64 = 50;

/// Authoritative state plus broadcast bookkeeping.
pub struct HostLoop<S: Simulation = ArenaSimulation, D: Differ = CoarseDiffer> {
    runner: MatchRunner<S>,
    differ: D,

    /// Snapshot the last INIT/DELTA was built from
    last_sent: Option<Snapshot>,

    /// Sequence number of the last broadcast
    seq: u32,

    last_broadcast_ms: u64,
    min_broadcast_interval_ms: u64,

    /// TANK CONFIG per peer, consumed at match start
    configs: BTreeMap<PeerId, TankConfig>,

    /// Latest input per tank since the last tick
    input_buffer: BTreeMap<TankId, InputState>,
}

impl HostLoop {
    /// Host with the default simulation and differ.
    pub fn new(state: MatchState, min_broadcast_interval_ms: u64) -> Self {
        Self::with_parts(MatchRunner::new(state), CoarseDiffer, min_broadcast_interval_ms)
    }
}

impl<S: Simulation, D: Differ> HostLoop<S, D> {
    /// Host with custom collaborators.
    pub fn with_parts(runner: MatchRunner<S>, differ: D, min_broadcast_interval_ms: u64) -> Self {
        Self {
            runner,
            differ,
            last_sent: None,
            seq: 0,
            last_broadcast_ms: 0,
            min_broadcast_interval_ms,
            configs: BTreeMap::new(),
            input_buffer: BTreeMap::new(),
        }
    }

    /// Canonical state.
    pub fn state(&self) -> &MatchState {
        &self.runner.state
    }

    /// The match runner.
    pub fn runner(&self) -> &MatchRunner<S> {
        &self.runner
    }

    /// The match runner, mutably.
    pub fn runner_mut(&mut self) -> &mut MatchRunner<S> {
        &mut self.runner
    }

    /// Sequence number of the last broadcast.
    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// Registered TANK CONFIGs.
    pub fn configs(&self) -> impl Iterator<Item = &TankConfig> {
        self.configs.values()
    }

    // =========================================================================
    // Input
    // =========================================================================

    /// Queue input for `tank`; the latest value wins and is applied at the
    /// start of the next tick.
    pub fn buffer_input(&mut self, tank: TankId, input: InputState) {
        self.input_buffer.insert(tank, input);
    }

    fn apply_buffered_input(&mut self) {
        for (id, input) in std::mem::take(&mut self.input_buffer) {
            match self.runner.state.tank_mut(&id) {
                Some(tank) => tank.input = input,
                None => trace!(tank = %id, "Input for unknown tank"),
            }
        }
    }

    // =========================================================================
    // Match lifecycle
    // =========================================================================

    /// Register a peer's tank configuration, replacing any earlier one.
    ///
    /// During play the tanks are created right away and everyone gets a
    /// fresh INIT on the next broadcast.
    pub fn register_config(&mut self, config: TankConfig) {
        debug!(owner = %config.owner, tanks = config.entries.len(), "Tank config registered");
        let owner = config.owner.clone();
        self.configs.insert(owner.clone(), config);
        if matches!(self.runner.state.phase, MatchPhase::Playing) && self.instantiate(&owner) > 0 {
            self.last_sent = None;
        }
    }

    /// Create tanks for every registered config and start play.
    pub fn start_match(&mut self, now_ms: u64, session: &Session) -> usize {
        let owners: Vec<PeerId> = self.configs.keys().cloned().collect();
        let created: usize = owners.iter().map(|owner| self.instantiate(owner)).sum();

        self.runner.start(now_ms);
        self.last_sent = None;
        self.broadcast(now_ms, session);
        info!(tanks = created, peers = owners.len(), "Match setup complete");
        created
    }

    fn instantiate(&mut self, owner: &PeerId) -> usize {
        if !self.runner.state.tanks_of(owner).is_empty() {
            return 0;
        }
        let Some(config) = self.configs.get(owner) else {
            return 0;
        };
        for entry in &config.entries {
            self.runner.state.add_tank(owner, &entry.colour);
        }
        config.entries.len()
    }

    // =========================================================================
    // Tick & broadcast
    // =========================================================================

    /// Apply input, run due timers and the simulation, then broadcast.
    pub fn tick(&mut self, now_ms: u64, session: &Session) -> TickResult {
        self.apply_buffered_input();
        let result = self.runner.step(now_ms);

        for id in &result.spawned {
            if let Some(powerup) = self.runner.state.powerups.get(id) {
                session.broadcast(&Message::Spawn(PowerupSnapshot::capture(powerup)));
            }
        }
        self.flush_events(session);
        self.broadcast(now_ms, session);
        result
    }

    fn flush_events(&mut self, session: &Session) {
        for event in self.runner.bus.drain_immediate() {
            session.broadcast(&Message::PowerupEvent(event));
        }
    }

    /// Send INIT if nothing was sent yet, otherwise a rate-limited DELTA.
    ///
    /// Returns true when something was broadcast.
    pub fn broadcast(&mut self, now_ms: u64, session: &Session) -> bool {
        let current = capture_state(&self.runner.state);

        let Some(previous) = self.last_sent.as_ref() else {
            self.seq = self.seq.wrapping_add(1);
            let init = self.init_message(&current);
            session.broadcast(&Message::Init(init));
            self.runner.bus.clear_for_init();
            self.finish_broadcast(current, now_ms);
            return true;
        };

        let elapsed = now_ms.saturating_sub(self.last_broadcast_ms);
        if elapsed < self.min_broadcast_interval_ms {
            debug!(elapsed_ms = elapsed, "Broadcast rate limited");
            return false;
        }

        let Some(mut delta) = self.differ.diff(previous, &current) else {
            return false;
        };
        delta.events = self.runner.bus.take_for_delta();
        self.seq = self.seq.wrapping_add(1);
        session.broadcast(&Message::Delta(DeltaMessage::from_delta(self.seq, delta)));
        self.finish_broadcast(current, now_ms);
        true
    }

    fn finish_broadcast(&mut self, sent: Snapshot, now_ms: u64) {
        self.last_sent = Some(sent);
        self.last_broadcast_ms = now_ms;
    }

    fn init_message(&self, snapshot: &Snapshot) -> InitMessage {
        let state = &self.runner.state;
        let layout = state.layout.to_blob().unwrap_or_else(|e| {
            warn!(error = %e, "Wall layout not encodable, sending empty blob");
            Vec::new()
        });
        InitMessage::from_snapshot(self.seq, state.settings.clone(), layout, snapshot)
    }

    // =========================================================================
    // Peer handling
    // =========================================================================

    fn handle_input(&mut self, from: &PeerId, tank_id: TankId, input: InputState) {
        match self.runner.state.tank(&tank_id) {
            Some(tank) if &tank.owner == from => self.buffer_input(tank_id, input),
            Some(_) => warn!(peer = %from, tank = %tank_id, "Rejected input for foreign tank"),
            None => trace!(peer = %from, tank = %tank_id, "Input for unknown tank"),
        }
    }

    fn handle_nick(&mut self, from: &PeerId, nickname: String, session: &mut Session) {
        let first = session.nickname_of(from).is_none();
        session.set_nickname(from.clone(), nickname.clone());

        session.broadcast_except(&Message::Nick(PeerInfo::new(from.clone(), nickname.clone())), from);
        session.broadcast(&Message::Players(session.roster()));

        if first {
            let text = format!("{nickname} joined");
            session.broadcast_except(&Message::notice(text.clone()), from);
            session.push_notice(ChatLine::new(None, text));
        }
    }

    fn handle_chat(&mut self, from: &PeerId, line: ChatLine, session: &mut Session) {
        let nickname = session.nickname_of(from).map(str::to_string).or(line.nickname);
        let line = ChatLine::new(nickname, line.text);
        session.broadcast_except(&Message::Chat(line.clone()), from);
        session.push_notice(line);
    }
}

impl<S: Simulation, D: Differ> RoleHandler for HostLoop<S, D> {
    fn role(&self) -> Role {
        Role::Host
    }

    fn on_open(&mut self, peer: &PeerId, session: &mut Session) {
        let snapshot = match &self.last_sent {
            Some(sent) => sent.clone(),
            None => capture_state(&self.runner.state),
        };
        let init = self.init_message(&snapshot);
        if let Err(e) = session.send_to(peer, &Message::Init(init)) {
            warn!(error = %e, "INIT not sent to newcomer");
        }
        if let Err(e) = session.send_to(peer, &Message::Players(session.roster())) {
            debug!(error = %e, "PLAYERS not sent to newcomer");
        }
    }

    fn on_message(&mut self, from: &PeerId, message: Message, session: &mut Session) {
        match message {
            Message::Input { tank_id, input } => self.handle_input(from, tank_id, input),
            Message::Nick(info) => self.handle_nick(from, info.nickname, session),
            Message::Chat(line) => self.handle_chat(from, line, session),
            Message::TankConfig(config) => {
                // Owner is the connection, not the claim
                self.register_config(TankConfig { owner: from.clone(), entries: config.entries });
            }
            other => trace!(peer = %from, kind = other.kind().name(), "Ignored on host"),
        }
    }

    fn on_close(&mut self, peer: &PeerId, nickname: Option<String>, session: &mut Session) {
        for tank in self.runner.state.tanks_of(peer) {
            self.input_buffer.remove(&tank);
            self.runner.remove_tank(&tank);
        }
        self.configs.remove(peer);
        self.flush_events(session);

        let name = nickname.unwrap_or_else(|| peer.to_string());
        let text = format!("{name} left");
        session.broadcast(&Message::Players(session.roster()));
        session.broadcast(&Message::notice(text.clone()));
        session.push_notice(ChatLine::new(None, text));
    }
}

impl<S: Simulation, D: Differ> InputSink for HostLoop<S, D> {
    fn submit(&mut self, tank: &TankId, input: InputState, _session: &Session) -> bool {
        if self.runner.state.tank(tank).is_none() {
            return false;
        }
        self.buffer_input(tank.clone(), input);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec2::Vec2;
    use crate::game::input::Action;
    use crate::game::map::WallLayout;
    use crate::game::state::GameSettings;
    use crate::network::codec::{hydrate, Hydrated, Payload, WireFormat};
    use crate::network::protocol::TankConfigEntry;
    use crate::network::router::Router;
    use crate::network::session::ChannelLink;
    use tokio::sync::mpsc;

    fn quiet_settings() -> GameSettings {
        GameSettings { powerup_interval_ms: 600_000, ..GameSettings::default() }
    }

    fn host_with_observer() -> (HostLoop, Session, mpsc::UnboundedReceiver<Payload>) {
        let state = MatchState::new(quiet_settings(), WallLayout::open(10, 8), 7);
        let host = HostLoop::new(state, 0);
        let mut session = Session::new(Role::Host, PeerId::new("host"), "host", WireFormat::Text);
        let (link, rx) = ChannelLink::pair(PeerId::new("obs"));
        session.attach(PeerId::new("obs"), Box::new(link)).unwrap();
        (host, session, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Payload>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(payload) = rx.try_recv() {
            if let Hydrated::Ready(m) = hydrate(payload) {
                out.push(m);
            }
        }
        out
    }

    fn entry(colour: &str) -> TankConfigEntry {
        TankConfigEntry {
            panel_id: "p1".into(),
            colour: colour.into(),
            keys: ["w", "d", "s", "a", "q", "e"].map(String::from),
        }
    }

    #[test]
    fn test_first_broadcast_is_init_then_silence() {
        let (mut host, session, mut rx) = host_with_observer();
        host.runner_mut().state.add_tank_at(&PeerId::new("host"), "red", Vec2::new(10.0, 10.0), 0.0);
        host.runner_mut().start(0);

        host.tick(16, &session);
        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0], Message::Init(ref init) if init.tanks.len() == 1));

        host.tick(32, &session);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_movement_sends_single_record_delta() {
        let (mut host, session, mut rx) = host_with_observer();
        let id = host.runner_mut().state.add_tank_at(&PeerId::new("host"), "red", Vec2::new(10.0, 10.0), 0.0);
        host.runner_mut().start(0);
        host.tick(16, &session);
        drain(&mut rx);

        host.runner_mut().state.tank_mut(&id).unwrap().position = Vec2::new(13.0, 10.0);
        host.broadcast(100, &session);

        let sent = drain(&mut rx);
        match &sent[..] {
            [Message::Delta(delta)] => {
                assert_eq!(delta.tanks.len(), 1);
                assert_eq!((delta.tanks[0].x, delta.tanks[0].y), (13, 10));
                assert_eq!(delta.seq, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!host.broadcast(200, &session));
    }

    #[test]
    fn test_rate_limit_holds_delta() {
        let (_, session, mut rx) = host_with_observer();
        let state = MatchState::new(quiet_settings(), WallLayout::open(10, 8), 7);
        let mut host = HostLoop::new(state, 100);
        let id = host.runner_mut().state.add_tank_at(&PeerId::new("host"), "red", Vec2::new(10.0, 10.0), 0.0);
        host.broadcast(0, &session);
        drain(&mut rx);

        host.runner_mut().state.tank_mut(&id).unwrap().position = Vec2::new(20.0, 10.0);
        assert!(!host.broadcast(50, &session));
        assert!(host.broadcast(100, &session));
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn test_input_only_for_own_tanks() {
        let (mut host, mut session, _rx) = host_with_observer();
        let own = host.runner_mut().state.add_tank(&PeerId::new("obs"), "blue");
        let foreign = host.runner_mut().state.add_tank(&PeerId::new("host"), "red");
        let mut pressed = InputState::default();
        pressed.set(Action::Up, true);

        host.on_message(&PeerId::new("obs"), Message::Input { tank_id: own.clone(), input: pressed }, &mut session);
        host.on_message(&PeerId::new("obs"), Message::Input { tank_id: foreign.clone(), input: pressed }, &mut session);
        host.apply_buffered_input();

        assert!(host.state().tank(&own).unwrap().input.is_set(Action::Up));
        assert!(host.state().tank(&foreign).unwrap().input.is_idle());
    }

    #[test]
    fn test_start_match_builds_tanks_from_configs() {
        let (mut host, mut session, mut rx) = host_with_observer();
        host.register_config(TankConfig { owner: PeerId::new("host"), entries: vec![entry("red")] });
        host.on_message(
            &PeerId::new("obs"),
            Message::TankConfig(TankConfig { owner: PeerId::new("spoof"), entries: vec![entry("blue"), entry("green")] }),
            &mut session,
        );

        assert_eq!(host.start_match(0, &session), 3);
        assert_eq!(host.state().tanks_of(&PeerId::new("obs")).len(), 2);
        assert!(host.state().tanks_of(&PeerId::new("spoof")).is_empty());
        assert!(matches!(drain(&mut rx).last(), Some(Message::Init(init)) if init.tanks.len() == 3));
    }

    #[test]
    fn test_nick_rebroadcast_and_players() {
        let (mut host, mut session, mut rx) = host_with_observer();
        let (link, mut rx_b) = ChannelLink::pair(PeerId::new("b"));
        session.attach(PeerId::new("b"), Box::new(link)).unwrap();

        host.on_message(&PeerId::new("obs"), Message::Nick(PeerInfo::new(PeerId::new("obs"), "olga")), &mut session);

        let to_sender = drain(&mut rx);
        assert!(to_sender.iter().all(|m| !matches!(m, Message::Nick(_))));
        assert!(to_sender.iter().any(|m| matches!(m, Message::Players(p) if p.len() == 2)));

        let to_other = drain(&mut rx_b);
        assert!(to_other.contains(&Message::Nick(PeerInfo::new(PeerId::new("obs"), "olga"))));
        assert!(to_other.contains(&Message::notice("olga joined")));
    }

    #[test]
    fn test_close_removes_tanks_and_notifies() {
        let (host, mut session, _rx) = host_with_observer();
        let mut router = Router::new(host);
        let (link, mut rx_b) = ChannelLink::pair(PeerId::new("b"));
        session.attach(PeerId::new("b"), Box::new(link)).unwrap();
        session.set_nickname(PeerId::new("obs"), "olga");
        router.handler_mut().runner_mut().state.add_tank(&PeerId::new("obs"), "blue");

        router.on_close(&PeerId::new("obs"), &mut session);

        assert!(router.handler().state().tanks.is_empty());
        let sent = drain(&mut rx_b);
        assert!(sent.contains(&Message::notice("olga left")));
        assert!(sent.iter().any(|m| matches!(m, Message::Players(p) if p.len() == 1)));
    }

    #[test]
    fn test_newcomer_gets_init() {
        let (mut host, mut session, mut rx) = host_with_observer();
        host.runner_mut().state.add_tank(&PeerId::new("host"), "red");
        host.on_open(&PeerId::new("obs"), &mut session);

        let sent = drain(&mut rx);
        assert!(matches!(sent.first(), Some(Message::Init(init)) if init.tanks.len() == 1));
        assert!(matches!(sent.get(1), Some(Message::Players(_))));
    }

    #[test]
    fn test_pickup_event_sent_immediately_and_in_delta() {
        let (mut host, session, mut rx) = host_with_observer();
        let id = host.runner_mut().state.add_tank_at(&PeerId::new("host"), "red", Vec2::new(100.0, 100.0), 0.0);
        host.runner_mut().start(0);
        host.tick(16, &session);
        drain(&mut rx);

        let pid = host.runner_mut().state.spawn_powerup(crate::game::powerup::PowerupKind::Laser, Vec2::new(100.0, 100.0));
        host.tick(32, &session);

        let sent = drain(&mut rx);
        assert!(sent.iter().any(|m| matches!(m, Message::PowerupEvent(e) if e.powerup_id == pid && e.tank_id == id)));
        assert!(sent.iter().any(|m| matches!(m, Message::Delta(d) if d.events.len() == 1)));
    }

    #[test]
    fn test_rejoined_peer_steers_its_tank() {
        use crate::network::relay::KeyBindings;

        let (host, mut session, _rx) = host_with_observer();
        let mut router = Router::new(host);
        let obs = PeerId::new("obs");
        let config = TankConfig { owner: obs.clone(), entries: vec![entry("blue")] };
        router.handler_mut().on_message(&obs, Message::TankConfig(config.clone()), &mut session);
        router.handler_mut().start_match(0, &session);

        router.on_close(&obs, &mut session);
        let (link, _rx_again) = ChannelLink::pair(obs.clone());
        session.attach(obs.clone(), Box::new(link)).unwrap();
        router.on_open(&obs, &mut session);
        router.handler_mut().on_message(&obs, Message::TankConfig(config.clone()), &mut session);

        let Some((target, Action::Up)) = KeyBindings::from_config(&config).lookup("w").cloned() else {
            panic!("w should drive forward");
        };
        assert_eq!(router.handler().state().tanks_of(&obs), vec![target.clone()]);

        let mut pressed = InputState::default();
        pressed.set(Action::Up, true);
        router.handler_mut().on_message(&obs, Message::Input { tank_id: target.clone(), input: pressed }, &mut session);
        router.handler_mut().apply_buffered_input();
        assert!(router.handler().state().tank(&target).unwrap().input.is_set(Action::Up));
    }

    #[test]
    fn test_chat_relayed_to_everyone_but_sender() {
        let (mut host, mut session, mut rx_a) = host_with_observer();
        let (link_b, mut rx_b) = ChannelLink::pair(PeerId::new("b"));
        let (link_c, mut rx_c) = ChannelLink::pair(PeerId::new("c"));
        session.attach(PeerId::new("b"), Box::new(link_b)).unwrap();
        session.attach(PeerId::new("c"), Box::new(link_c)).unwrap();
        session.set_nickname(PeerId::new("obs"), "olga");

        let line = ChatLine::new(Some("spoofed".into()), "gg");
        host.on_message(&PeerId::new("obs"), Message::Chat(line), &mut session);

        let expected = Message::Chat(ChatLine::new(Some("olga".into()), "gg"));
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b), vec![expected.clone()]);
        assert_eq!(drain(&mut rx_c), vec![expected.clone()]);
        assert_eq!(session.drain_notices(), vec![ChatLine::new(Some("olga".into()), "gg")]);
    }
}
