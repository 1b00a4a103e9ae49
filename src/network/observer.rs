//! Observer Projection
//!
//! A display-only peer never simulates. It rebuilds a [`Projection`] from
//! each INIT and merges DELTAs into it; the projection is whatever the
//! renderer draws.

use std::collections::BTreeMap;

use tracing::{debug, info, trace, warn};

use crate::core::vec2::Vec2;
use crate::game::collision::bullet_hits_tank;
use crate::game::events::{PowerupEvent, PowerupStatus};
use crate::game::map::WallLayout;
use crate::game::snapshot::{BulletSnapshot, PowerupSnapshot, TankSnapshot};
use crate::game::state::{GameSettings, PeerId, TankId};
use crate::network::protocol::{DeltaMessage, InitMessage, Message, PeerInfo, TankConfig};
use crate::network::router::RoleHandler;
use crate::network::session::{Role, Session};

/// Locally reconstructed approximation of host state.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// Sequence number of the last applied INIT/DELTA
    pub seq: u32,
    /// Match rules from INIT
    pub settings: GameSettings,
    /// Decoded wall grid
    pub layout: WallLayout,
    /// Tanks by id
    pub tanks: BTreeMap<TankId, TankSnapshot>,
    /// Bullets from the last DELTA
    pub bullets: Vec<BulletSnapshot>,
    /// Board powerups
    pub powerups: Vec<PowerupSnapshot>,
}

impl Projection {
    /// Build from an INIT.
    pub fn from_init(init: InitMessage) -> Self {
        let layout = match WallLayout::from_blob(&init.layout) {
            Ok(layout) => layout,
            Err(e) => {
                warn!(error = %e, "Undecodable wall layout, drawing without walls");
                WallLayout::default()
            }
        };
        Self {
            seq: init.seq,
            settings: init.settings,
            layout,
            tanks: init.tanks.into_iter().map(|t| (t.id.clone(), t)).collect(),
            bullets: Vec::new(),
            powerups: init.powerups,
        }
    }

    /// Merge a DELTA. Returns false for a stale one.
    pub fn apply_delta(&mut self, delta: &DeltaMessage) -> bool {
        if delta.seq <= self.seq {
            return false;
        }
        for update in &delta.tanks {
            match self.tanks.get_mut(&update.id) {
                Some(tank) => {
                    tank.x = update.x;
                    tank.y = update.y;
                    tank.rotation = update.rotation;
                    tank.score = update.score;
                    tank.alive = update.alive;
                    tank.powerups = update.powerups.clone();
                }
                None => debug!(tank = %update.id, "Update for unknown tank"),
            }
        }
        for id in &delta.removed {
            self.tanks.remove(id);
        }
        self.bullets = delta.bullets.clone();
        if let Some(powerups) = &delta.powerups {
            self.powerups = powerups.clone();
        }
        for event in &delta.events {
            self.apply_event(event);
        }
        self.seq = delta.seq;
        true
    }

    /// Reflect a powerup event on the holder.
    pub fn apply_event(&mut self, event: &PowerupEvent) {
        let Some(tank) = self.tanks.get_mut(&event.tank_id) else {
            return;
        };
        match event.status {
            PowerupStatus::Activate => tank.powerups = vec![event.kind],
            PowerupStatus::Deactivate => tank.powerups.retain(|k| *k != event.kind),
        }
    }

    /// Add or replace one board powerup.
    pub fn apply_spawn(&mut self, powerup: PowerupSnapshot) {
        match self.powerups.iter_mut().find(|p| p.id == powerup.id) {
            Some(existing) => *existing = powerup,
            None => {
                self.powerups.push(powerup);
                self.powerups.sort_by_key(|p| p.id);
            }
        }
    }

    /// Bullets overlapping live tanks in the received data.
    pub fn suspected_hits(&self) -> Vec<SuspectedHit> {
        let mut hits = Vec::new();
        for (index, bullet) in self.bullets.iter().enumerate() {
            let position = Vec2::from_wire(bullet.x, bullet.y);
            for tank in self.tanks.values().filter(|t| t.alive) {
                if bullet_hits_tank(position, bullet.radius, Vec2::from_wire(tank.x, tank.y), tank.width, tank.height) {
                    hits.push(SuspectedHit { bullet: index, tank: tank.id.clone() });
                }
            }
        }
        hits
    }
}

/// A bullet the observer believes is touching a tank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspectedHit {
    /// Index into `Projection::bullets`
    pub bullet: usize,
    /// Tank it overlaps
    pub tank: TankId,
}

/// Observer role: projection plus the handshake it sends on connect.
#[derive(Debug, Default)]
pub struct ObserverProjector {
    projection: Option<Projection>,
    spectating: bool,
    local_config: Option<TankConfig>,
    events: Vec<PowerupEvent>,
}

impl ObserverProjector {
    /// Observer announcing `local_config` to the host on connect.
    pub fn new(local_config: Option<TankConfig>) -> Self {
        Self { local_config, ..Self::default() }
    }

    /// Current projection, once an INIT arrived.
    pub fn projection(&self) -> Option<&Projection> {
        self.projection.as_ref()
    }

    /// Whether an INIT switched the UI into spectator mode.
    pub fn is_spectating(&self) -> bool {
        self.spectating
    }

    /// Powerup events received since the last call, for effects and sound.
    pub fn drain_events(&mut self) -> Vec<PowerupEvent> {
        std::mem::take(&mut self.events)
    }

    /// See [`Projection::suspected_hits`].
    pub fn suspected_hits(&self) -> Vec<SuspectedHit> {
        self.projection.as_ref().map(Projection::suspected_hits).unwrap_or_default()
    }

    fn apply_init(&mut self, init: InitMessage) {
        let projection = Projection::from_init(init);
        info!(seq = projection.seq, tanks = projection.tanks.len(), "Projection rebuilt from INIT");
        self.projection = Some(projection);
        self.spectating = true;
    }

    fn apply_delta(&mut self, delta: DeltaMessage) {
        let Some(projection) = self.projection.as_mut() else {
            debug!(seq = delta.seq, "DELTA before INIT");
            return;
        };
        if !projection.apply_delta(&delta) {
            debug!(seq = delta.seq, last = projection.seq, "Stale DELTA dropped");
            return;
        }
        self.events.extend(delta.events);
    }
}

impl RoleHandler for ObserverProjector {
    fn role(&self) -> Role {
        Role::Observer
    }

    fn on_open(&mut self, peer: &PeerId, session: &mut Session) {
        let nick = PeerInfo::new(session.local_peer().clone(), session.nickname());
        if let Err(e) = session.send_to(peer, &Message::Nick(nick)) {
            warn!(error = %e, "NICK not sent");
        }
        if let Some(config) = &self.local_config {
            if let Err(e) = session.send_to(peer, &Message::TankConfig(config.clone())) {
                warn!(error = %e, "TANK CONFIG not sent");
            }
        }
    }

    fn on_message(&mut self, from: &PeerId, message: Message, session: &mut Session) {
        match message {
            Message::Init(init) => self.apply_init(init),
            Message::Delta(delta) => self.apply_delta(delta),
            Message::PowerupEvent(event) => {
                if let Some(projection) = self.projection.as_mut() {
                    projection.apply_event(&event);
                }
                self.events.push(event);
            }
            Message::Spawn(powerup) => {
                if let Some(projection) = self.projection.as_mut() {
                    projection.apply_spawn(powerup);
                }
            }
            Message::Players(players) => session.replace_roster(players),
            Message::Nick(info) => {
                session.set_nickname(info.peer_id, info.nickname);
            }
            Message::Chat(line) | Message::Notify(line) => session.push_notice(line),
            other => trace!(peer = %from, kind = other.kind().name(), "Ignored on observer"),
        }
    }

    fn on_close(&mut self, peer: &PeerId, _nickname: Option<String>, _session: &mut Session) {
        info!(peer = %peer, "Host connection closed");
        self.spectating = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::powerup::PowerupKind;
    use crate::game::snapshot::TankUpdate;
    use crate::network::codec::WireFormat;

    fn tank(id: &str, x: i16, y: i16) -> TankSnapshot {
        TankSnapshot {
            id: TankId::from(id),
            owner: PeerId::new("host"),
            x,
            y,
            rotation: 0.0,
            width: 20,
            height: 26,
            colour: "red".into(),
            score: 0,
            alive: true,
            powerups: Vec::new(),
            bullets: Vec::new(),
        }
    }

    fn init() -> InitMessage {
        InitMessage {
            seq: 1,
            settings: GameSettings::default(),
            layout: WallLayout::open(10, 8).to_blob().unwrap(),
            powerups: Vec::new(),
            tanks: vec![tank("host-0", 10, 10), tank("host-1", 50, 50)],
        }
    }

    fn delta(seq: u32) -> DeltaMessage {
        DeltaMessage {
            seq,
            tanks: vec![TankUpdate {
                id: TankId::from("host-0"),
                x: 13,
                y: 10,
                rotation: 0.5,
                score: 1,
                alive: true,
                powerups: vec![PowerupKind::Ghost],
            }],
            removed: vec![TankId::from("host-1")],
            bullets: vec![BulletSnapshot { x: 1, y: 2, vx: 1.0, vy: 0.0, colour: "red".into(), radius: 3.0 }],
            powerups: None,
            events: Vec::new(),
        }
    }

    fn session() -> Session {
        Session::new(Role::Observer, PeerId::new("me"), "me", WireFormat::Text)
    }

    #[test]
    fn test_init_replaces_projection() {
        let mut observer = ObserverProjector::default();
        let mut session = session();
        observer.on_message(&PeerId::new("host"), Message::Init(init()), &mut session);

        let projection = observer.projection().unwrap();
        assert_eq!(projection.tanks.len(), 2);
        assert_eq!((projection.tanks[&TankId::from("host-1")].x, projection.tanks[&TankId::from("host-1")].y), (50, 50));
        assert_eq!(projection.layout.width(), 10);
        assert!(observer.is_spectating());
    }

    #[test]
    fn test_bad_layout_is_fail_soft() {
        let mut bad = init();
        bad.layout = vec![0xff];
        let projection = Projection::from_init(bad);
        assert_eq!(projection.layout, WallLayout::default());
        assert_eq!(projection.tanks.len(), 2);
    }

    #[test]
    fn test_delta_merges_and_is_idempotent() {
        let mut once = Projection::from_init(init());
        assert!(once.apply_delta(&delta(2)));
        let tank = &once.tanks[&TankId::from("host-0")];
        assert_eq!((tank.x, tank.y, tank.score), (13, 10, 1));
        assert_eq!(tank.colour, "red");
        assert_eq!(tank.powerups, vec![PowerupKind::Ghost]);
        assert!(!once.tanks.contains_key(&TankId::from("host-1")));
        assert_eq!(once.bullets.len(), 1);

        let mut twice = once.clone();
        assert!(!twice.apply_delta(&delta(2)));
        assert_eq!(twice, once);
    }

    #[test]
    fn test_stale_delta_dropped() {
        let mut projection = Projection::from_init(init());
        assert!(projection.apply_delta(&delta(3)));
        assert!(!projection.apply_delta(&delta(2)));
        assert_eq!(projection.seq, 3);
    }

    #[test]
    fn test_delta_before_init_ignored() {
        let mut observer = ObserverProjector::default();
        observer.on_message(&PeerId::new("host"), Message::Delta(delta(2)), &mut session());
        assert!(observer.projection().is_none());
    }

    #[test]
    fn test_powerup_event_applied() {
        let mut observer = ObserverProjector::default();
        let mut session = session();
        observer.on_message(&PeerId::new("host"), Message::Init(init()), &mut session);

        let event = PowerupEvent::activate(PowerupKind::TripleShot, TankId::from("host-0"), 5);
        observer.on_message(&PeerId::new("host"), Message::PowerupEvent(event.clone()), &mut session);
        assert_eq!(observer.projection().unwrap().tanks[&TankId::from("host-0")].powerups, vec![PowerupKind::TripleShot]);

        let event = PowerupEvent::deactivate(PowerupKind::TripleShot, TankId::from("host-0"), 5);
        observer.on_message(&PeerId::new("host"), Message::PowerupEvent(event), &mut session);
        assert!(observer.projection().unwrap().tanks[&TankId::from("host-0")].powerups.is_empty());
        assert_eq!(observer.drain_events().len(), 2);
    }

    #[test]
    fn test_spawn_adds_powerup() {
        let mut projection = Projection::from_init(init());
        let powerup = PowerupSnapshot {
            id: 4,
            kind: PowerupKind::Laser,
            x: 30,
            y: 40,
            size: 24,
            icon: PowerupKind::Laser.icon().into(),
            colour: PowerupKind::Laser.colour().into(),
        };
        projection.apply_spawn(powerup.clone());
        projection.apply_spawn(powerup);
        assert_eq!(projection.powerups.len(), 1);
    }

    #[test]
    fn test_suspected_hits() {
        let mut projection = Projection::from_init(init());
        projection.bullets = vec![
            BulletSnapshot { x: 12, y: 10, vx: 0.0, vy: 0.0, colour: "red".into(), radius: 3.0 },
            BulletSnapshot { x: 300, y: 300, vx: 0.0, vy: 0.0, colour: "red".into(), radius: 3.0 },
        ];
        assert_eq!(projection.suspected_hits(), vec![SuspectedHit { bullet: 0, tank: TankId::from("host-0") }]);
    }

    #[test]
    fn test_chat_and_roster() {
        let mut observer = ObserverProjector::default();
        let mut session = session();
        observer.on_message(
            &PeerId::new("host"),
            Message::Players(vec![PeerInfo::new(PeerId::new("host"), "hal")]),
            &mut session,
        );
        observer.on_message(&PeerId::new("host"), Message::notice("hal joined"), &mut session);

        assert_eq!(session.nickname_of(&PeerId::new("host")), Some("hal"));
        assert_eq!(session.drain_notices().len(), 1);
    }
}
