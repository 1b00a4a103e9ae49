//! End-to-end sync scenarios
//!
//! A host and an observer wired through in-memory links, driven with an
//! explicit clock.

use std::f32::consts::FRAC_PI_2;

use tokio::sync::mpsc;

use tank_arena::core::vec2::Vec2;
use tank_arena::game::events::PowerupStatus;
use tank_arena::game::map::WallLayout;
use tank_arena::game::powerup::{FireStrategy, MovementStrategy, PowerupKind};
use tank_arena::game::snapshot::{capture_state, CoarseDiffer, Differ};
use tank_arena::game::state::{GameSettings, MatchState, PeerId, TankId};
use tank_arena::network::binary::BinaryCodec;
use tank_arena::network::codec::{binary_to_text, Payload, WireFormat};
use tank_arena::network::host::HostLoop;
use tank_arena::network::observer::ObserverProjector;
use tank_arena::network::protocol::{ChatLine, Message, TankConfig, TankConfigEntry};
use tank_arena::network::relay::{InputRelay, KeyBindings, RemoteHost};
use tank_arena::network::router::Router;
use tank_arena::network::session::{ChannelLink, Role, Session};

const HOST: &str = "host";
const OBS: &str = "obs";

struct Harness {
    host: Router<HostLoop>,
    host_session: Session,
    host_inbox: mpsc::UnboundedReceiver<Payload>,
    observer: Router<ObserverProjector>,
    obs_session: Session,
    obs_inbox: mpsc::UnboundedReceiver<Payload>,
    /// Raw frames the observer received, in order
    received: Vec<String>,
}

fn settings() -> GameSettings {
    GameSettings {
        move_speed: 3.0,
        powerup_interval_ms: 600_000,
        ..GameSettings::default()
    }
}

fn entry(colour: &str, keys: [&str; 6]) -> TankConfigEntry {
    TankConfigEntry {
        panel_id: format!("panel-{colour}"),
        colour: colour.into(),
        keys: keys.map(String::from),
    }
}

fn obs_config() -> TankConfig {
    TankConfig {
        owner: PeerId::new(OBS),
        entries: vec![entry("blue", ["w", "d", "s", "a", "q", "e"])],
    }
}

impl Harness {
    fn new(host_format: WireFormat) -> Self {
        let state = MatchState::new(settings(), WallLayout::open(10, 8), 42);
        let host = Router::new(HostLoop::new(state, 0));
        let observer = Router::new(ObserverProjector::new(Some(obs_config())));

        let mut host_session = Session::new(Role::Host, PeerId::new(HOST), "hal", host_format);
        let mut obs_session = Session::new(Role::Observer, PeerId::new(OBS), "olga", WireFormat::Text);
        let (to_obs, obs_inbox) = ChannelLink::pair(PeerId::new(OBS));
        let (to_host, host_inbox) = ChannelLink::pair(PeerId::new(HOST));
        host_session.attach(PeerId::new(OBS), Box::new(to_obs)).unwrap();
        obs_session.attach(PeerId::new(HOST), Box::new(to_host)).unwrap();

        Self {
            host,
            host_session,
            host_inbox,
            observer,
            obs_session,
            obs_inbox,
            received: Vec::new(),
        }
    }

    fn connect(&mut self) {
        self.host.on_open(&PeerId::new(OBS), &mut self.host_session);
        self.observer.on_open(&PeerId::new(HOST), &mut self.obs_session);
        self.pump(0);
    }

    fn add_host_tank(&mut self, x: f32, y: f32, rotation: f32) -> TankId {
        self.host
            .handler_mut()
            .runner_mut()
            .state
            .add_tank_at(&PeerId::new(HOST), "red", Vec2::new(x, y), rotation)
    }

    /// Deliver everything queued in both directions.
    fn pump(&mut self, now_ms: u64) {
        loop {
            let mut moved = false;
            while let Ok(payload) = self.host_inbox.try_recv() {
                moved = true;
                self.host.on_data(&PeerId::new(OBS), payload, &mut self.host_session, now_ms);
            }
            while let Ok(payload) = self.obs_inbox.try_recv() {
                moved = true;
                match &payload {
                    Payload::Text(text) => self.received.push(text.clone()),
                    Payload::Bytes(bytes) => self.received.push(binary_to_text(bytes).unwrap_or_default()),
                    Payload::Blob(_) => {}
                }
                self.observer.on_data(&PeerId::new(HOST), payload, &mut self.obs_session, now_ms);
            }
            if !moved {
                break;
            }
        }
    }

    fn tick(&mut self, now_ms: u64) {
        self.host.handler_mut().tick(now_ms, &self.host_session);
        self.pump(now_ms);
    }

    fn take_received(&mut self) -> Vec<String> {
        std::mem::take(&mut self.received)
    }
}

fn delta_frames(frames: &[String]) -> Vec<&String> {
    frames.iter().filter(|f| f.starts_with("D,")).collect()
}

#[test]
fn test_init_projects_two_tanks() {
    let mut h = Harness::new(WireFormat::Text);
    h.add_host_tank(10.0, 10.0, 0.0);
    h.add_host_tank(50.0, 50.0, 0.0);
    h.connect();

    let projection = h.observer.handler().projection().expect("INIT applied");
    assert_eq!(projection.tanks.len(), 2);
    let coords: Vec<(i16, i16, u32)> = projection.tanks.values().map(|t| (t.x, t.y, t.score)).collect();
    assert_eq!(coords, vec![(10, 10, 0), (50, 50, 0)]);
    assert!(h.observer.handler().is_spectating());
}

#[test]
fn test_handshake_registers_observer() {
    let mut h = Harness::new(WireFormat::Text);
    h.connect();

    assert_eq!(h.host_session.nickname_of(&PeerId::new(OBS)), Some("olga"));
    assert_eq!(h.obs_session.nickname_of(&PeerId::new(HOST)), Some("hal"));
    assert_eq!(h.host.handler().configs().count(), 1);

    h.host.handler_mut().start_match(0, &h.host_session);
    h.pump(0);
    assert_eq!(h.host.handler().state().tanks_of(&PeerId::new(OBS)), vec![TankId::from("obs-0")]);
    assert!(h.observer.handler().projection().unwrap().tanks.contains_key(&TankId::from("obs-0")));
}

#[test]
fn test_single_move_yields_single_record_then_silence() {
    let mut h = Harness::new(WireFormat::Text);
    let id = h.add_host_tank(10.0, 10.0, FRAC_PI_2);
    h.connect();
    h.host.handler_mut().runner_mut().start(0);
    h.tick(16);
    h.take_received();

    let host_config = TankConfig {
        owner: PeerId::new(HOST),
        entries: vec![entry("red", ["ArrowUp", "ArrowRight", "ArrowDown", "ArrowLeft", "m", "n"])],
    };
    let mut relay = InputRelay::new(KeyBindings::from_config(&host_config));
    assert!(relay.relay("ArrowUp", true, h.host.handler_mut(), &h.host_session));
    h.tick(32);
    relay.relay("ArrowUp", false, h.host.handler_mut(), &h.host_session);

    let frames = h.take_received();
    let deltas = delta_frames(&frames);
    assert_eq!(deltas.len(), 1);
    let fields: Vec<&str> = deltas[0].split(',').collect();
    assert_eq!(fields[2], format!("{id}|13|10|1.5707|0|1"));

    h.tick(48);
    assert!(h.take_received().is_empty());

    let projection = h.observer.handler().projection().unwrap();
    assert_eq!((projection.tanks[&id].x, projection.tanks[&id].y), (13, 10));
}

#[test]
fn test_diff_identity_and_single_change() {
    let mut state = MatchState::new(settings(), WallLayout::open(10, 8), 1);
    let a = state.add_tank_at(&PeerId::new(HOST), "red", Vec2::new(10.0, 10.0), 0.0);
    state.add_tank_at(&PeerId::new(HOST), "green", Vec2::new(50.0, 50.0), 0.0);
    let before = capture_state(&state);
    assert_eq!(CoarseDiffer.diff(&before, &before), None);

    state.tank_mut(&a).unwrap().position = Vec2::new(11.0, 10.0);
    let delta = CoarseDiffer.diff(&before, &capture_state(&state)).unwrap();
    assert_eq!(delta.tanks.len(), 1);
    assert_eq!(delta.tanks[0].id, a);
    assert!(delta.removed.is_empty());
    assert_eq!(delta.powerups, None);
}

#[test]
fn test_powerup_exclusivity() {
    let mut h = Harness::new(WireFormat::Text);
    let id = h.add_host_tank(100.0, 100.0, 0.0);
    let other = h.add_host_tank(300.0, 300.0, 0.0);
    h.connect();

    let runner = h.host.handler_mut().runner_mut();
    runner.start(0);
    runner.activate_powerup(&id, 1, PowerupKind::Freeze, 0);
    assert_eq!(runner.state.tank(&other).unwrap().strategies.movement(), MovementStrategy::Frozen);

    runner.activate_powerup(&id, 2, PowerupKind::SpeedBoost, 1_000);
    let tank = runner.state.tank(&id).unwrap();
    assert_eq!(tank.powerup_kinds(), vec![PowerupKind::SpeedBoost]);
    assert_eq!(tank.strategies.movement(), MovementStrategy::Boosted);
    assert_eq!(runner.state.tank(&other).unwrap().strategies.movement(), MovementStrategy::Normal);

    // Freeze's expiry was cancelled; only SpeedBoost's timer remains
    runner.step(10_500);
    assert_eq!(runner.state.tank(&id).unwrap().powerup_kinds(), vec![PowerupKind::SpeedBoost]);
    runner.step(11_000);
    assert!(runner.state.tank(&id).unwrap().powerup_kinds().is_empty());
    assert_eq!(runner.state.tank(&id).unwrap().strategies.movement(), MovementStrategy::Normal);
}

#[test]
fn test_triple_shot_expires_after_ten_seconds() {
    let mut h = Harness::new(WireFormat::Binary);
    let id = h.add_host_tank(100.0, 100.0, 0.0);
    h.connect();
    h.host.handler_mut().runner_mut().start(0);
    h.tick(0);

    let pid = h
        .host
        .handler_mut()
        .runner_mut()
        .state
        .spawn_powerup(PowerupKind::TripleShot, Vec2::new(100.0, 100.0));
    h.tick(16);
    assert_eq!(
        h.host.handler().state().tank(&id).unwrap().strategies.fire(),
        FireStrategy::Triple
    );
    let activate = format!("E,TripleShot,0,0,{id},{pid}");
    assert!(h.received.contains(&activate));

    h.tick(10_015);
    assert_eq!(
        h.host.handler().state().tank(&id).unwrap().strategies.fire(),
        FireStrategy::Triple
    );
    h.tick(10_016);
    assert_eq!(
        h.host.handler().state().tank(&id).unwrap().strategies.fire(),
        FireStrategy::Single
    );

    let events = h.observer.handler_mut().drain_events();
    let statuses: Vec<PowerupStatus> = events.iter().filter(|e| e.powerup_id == pid).map(|e| e.status).collect();
    assert_eq!(statuses.first(), Some(&PowerupStatus::Activate));
    assert_eq!(statuses.last(), Some(&PowerupStatus::Deactivate));
    assert!(h.observer.handler().projection().unwrap().tanks[&id].powerups.is_empty());
}

#[test]
fn test_duplicate_delta_is_idempotent() {
    let mut h = Harness::new(WireFormat::Text);
    let id = h.add_host_tank(10.0, 10.0, 0.0);
    h.connect();
    h.host.handler_mut().runner_mut().start(0);
    h.tick(16);
    h.take_received();

    h.host.handler_mut().runner_mut().state.tank_mut(&id).unwrap().position = Vec2::new(40.0, 10.0);
    h.tick(32);
    let frames = h.take_received();
    let delta = delta_frames(&frames)[0].clone();
    let once = h.observer.handler().projection().unwrap().clone();

    h.observer.on_data(&PeerId::new(HOST), Payload::Text(delta), &mut h.obs_session, 40);
    assert_eq!(h.observer.handler().projection().unwrap(), &once);
}

#[test]
fn test_binary_host_drives_text_observer() {
    let mut h = Harness::new(WireFormat::Binary);
    let id = h.add_host_tank(10.0, 10.0, 0.0);
    h.connect();
    h.host.handler_mut().runner_mut().start(0);
    h.tick(16);

    h.host.handler_mut().runner_mut().state.tank_mut(&id).unwrap().score = 7;
    h.tick(32);
    assert_eq!(h.observer.handler().projection().unwrap().tanks[&id].score, 7);
}

#[test]
fn test_observer_input_reaches_host() {
    let mut h = Harness::new(WireFormat::Text);
    h.connect();
    h.host.handler_mut().start_match(0, &h.host_session);
    h.pump(0);

    let mut relay = InputRelay::new(KeyBindings::from_config(&obs_config()));
    let mut sink = RemoteHost::new(PeerId::new(HOST));
    assert!(relay.relay("w", true, &mut sink, &h.obs_session));
    h.pump(10);
    h.tick(16);

    let tank = h.host.handler().state().tank(&TankId::from("obs-0")).unwrap();
    assert!(tank.input.drive() > 0.0);
}

#[test]
fn test_blob_payload_dispatched_later() {
    let mut h = Harness::new(WireFormat::Text);
    h.connect();

    let bytes = BinaryCodec.encode_bytes(&Message::notice("from a blob"));
    h.observer.on_data(
        &PeerId::new(HOST),
        Payload::blob(async move { Some(bytes) }),
        &mut h.obs_session,
        0,
    );
    h.obs_session.drain_notices();
    assert_eq!(h.observer.poll_deferred(&mut h.obs_session, 0), 1);
    assert_eq!(h.obs_session.drain_notices().len(), 1);
}

#[test]
fn test_binary_ping_pong_transcode() {
    let ping = BinaryCodec.encode_bytes(&Message::Ping { timestamp: 123_456 });
    let pong = BinaryCodec.encode_bytes(&Message::Pong { timestamp: 123_456 });
    assert_eq!(binary_to_text(&ping).unwrap(), "Q,123456");
    assert_eq!(binary_to_text(&pong).unwrap(), "q,123456");
}

#[test]
fn test_observer_leaving_removes_its_tanks() {
    let mut h = Harness::new(WireFormat::Text);
    h.connect();
    h.host.handler_mut().start_match(0, &h.host_session);
    h.pump(0);
    assert_eq!(h.host.handler().state().tanks.len(), 1);

    h.host.on_close(&PeerId::new(OBS), &mut h.host_session);
    assert!(h.host.handler().state().tanks.is_empty());
    assert!(h.host_session.roster().iter().all(|p| p.peer_id != PeerId::new(OBS)));
}

#[test]
fn test_chat_reaches_other_observers_only() {
    let mut h = Harness::new(WireFormat::Text);
    let (to_third, mut third_inbox) = ChannelLink::pair(PeerId::new("third"));
    h.host_session.attach(PeerId::new("third"), Box::new(to_third)).unwrap();
    h.connect();
    h.take_received();
    while third_inbox.try_recv().is_ok() {}

    let line = ChatLine::new(None, "good game");
    h.obs_session.send_to(&PeerId::new(HOST), &Message::Chat(line)).unwrap();
    h.pump(5);

    assert!(h.take_received().iter().all(|frame| !frame.starts_with("C,")));
    match third_inbox.try_recv() {
        Ok(Payload::Text(frame)) => assert_eq!(frame, "C,olga,good game"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(third_inbox.try_recv().is_err());
    let host_lines = h.host_session.drain_notices();
    assert_eq!(host_lines.last(), Some(&ChatLine::new(Some("olga".into()), "good game")));
}

#[test]
fn test_rejoining_observer_keeps_control() {
    let mut h = Harness::new(WireFormat::Text);
    h.connect();
    h.host.handler_mut().start_match(0, &h.host_session);
    h.pump(0);

    h.host.on_close(&PeerId::new(OBS), &mut h.host_session);
    h.observer.on_close(&PeerId::new(HOST), &mut h.obs_session);
    let (to_obs, obs_inbox) = ChannelLink::pair(PeerId::new(OBS));
    let (to_host, host_inbox) = ChannelLink::pair(PeerId::new(HOST));
    h.host_session.attach(PeerId::new(OBS), Box::new(to_obs)).unwrap();
    h.obs_session.attach(PeerId::new(HOST), Box::new(to_host)).unwrap();
    h.obs_inbox = obs_inbox;
    h.host_inbox = host_inbox;
    h.connect();

    let mut relay = InputRelay::new(KeyBindings::from_config(&obs_config()));
    let mut sink = RemoteHost::new(PeerId::new(HOST));
    assert!(relay.relay("w", true, &mut sink, &h.obs_session));
    h.pump(10);
    h.tick(16);

    let tank = h.host.handler().state().tank(&TankId::from("obs-0")).unwrap();
    assert!(tank.input.drive() > 0.0);
}
