//! Protocol Messages
//!
//! One canonical in-memory form for every message exchanged between host
//! and observers. The text and binary codecs both encode this type; the
//! router only ever dispatches on it.

use serde::{Serialize, Deserialize};

use crate::game::events::PowerupEvent;
use crate::game::input::InputState;
use crate::game::snapshot::{
    BulletSnapshot, PowerupSnapshot, Snapshot, SnapshotDelta, TankSnapshot, TankUpdate,
};
use crate::game::state::{GameSettings, PeerId, TankId};

// =============================================================================
// MESSAGE KINDS
// =============================================================================

/// Discriminator shared by both codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Full state for a joining observer
    Init,
    /// Changes since the last sent snapshot
    Delta,
    /// Observer control intents
    Input,
    /// Latency probe
    Ping,
    /// Latency probe echo
    Pong,
    /// Full roster
    Players,
    /// One roster entry
    Nick,
    /// Chat line
    Chat,
    /// System notice
    Notify,
    /// Powerup activate/deactivate
    PowerupEvent,
    /// Board powerup placed
    Spawn,
    /// A peer's locally configured tanks
    TankConfig,
}

impl MessageKind {
    /// All kinds.
    pub const ALL: [MessageKind; 12] = [
        MessageKind::Init,
        MessageKind::Delta,
        MessageKind::Input,
        MessageKind::Ping,
        MessageKind::Pong,
        MessageKind::Players,
        MessageKind::Nick,
        MessageKind::Chat,
        MessageKind::Notify,
        MessageKind::PowerupEvent,
        MessageKind::Spawn,
        MessageKind::TankConfig,
    ];

    /// Leading character in the text form.
    pub const fn text_tag(self) -> char {
        match self {
            MessageKind::Init => 'I',
            MessageKind::Delta => 'D',
            MessageKind::Input => 'K',
            MessageKind::Ping => 'Q',
            MessageKind::Pong => 'q',
            MessageKind::Players => 'P',
            MessageKind::Nick => 'N',
            MessageKind::Chat => 'C',
            MessageKind::Notify => 'M',
            MessageKind::PowerupEvent => 'E',
            MessageKind::Spawn => 'S',
            MessageKind::TankConfig => 'T',
        }
    }

    /// Leading byte in the binary form.
    pub const fn binary_tag(self) -> u8 {
        match self {
            MessageKind::Init => 1,
            MessageKind::Delta => 2,
            MessageKind::Input => 3,
            MessageKind::Ping => 4,
            MessageKind::Pong => 5,
            MessageKind::Players => 6,
            MessageKind::Nick => 7,
            MessageKind::Chat => 8,
            MessageKind::Notify => 9,
            MessageKind::PowerupEvent => 10,
            MessageKind::Spawn => 11,
            MessageKind::TankConfig => 12,
        }
    }

    /// Parse a text tag.
    pub fn from_text_tag(tag: char) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.text_tag() == tag)
    }

    /// Parse a binary tag.
    pub fn from_binary_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.binary_tag() == tag)
    }

    /// Name for logs.
    pub const fn name(self) -> &'static str {
        match self {
            MessageKind::Init => "INIT",
            MessageKind::Delta => "DELTA",
            MessageKind::Input => "INPUT",
            MessageKind::Ping => "PING",
            MessageKind::Pong => "PONG",
            MessageKind::Players => "PLAYERS",
            MessageKind::Nick => "NICK",
            MessageKind::Chat => "CHAT",
            MessageKind::Notify => "NOTIFY",
            MessageKind::PowerupEvent => "POWERUP_EVENT",
            MessageKind::Spawn => "SPAWN",
            MessageKind::TankConfig => "TANK_CONFIG",
        }
    }
}

// =============================================================================
// MESSAGES
// =============================================================================

/// Every message of the sync protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Full state.
    Init(InitMessage),
    /// Incremental state.
    Delta(DeltaMessage),
    /// Control intents for one tank.
    Input { tank_id: TankId, input: InputState },
    /// Latency probe, echoed verbatim.
    Ping { timestamp: u32 },
    /// Echo of a PING.
    Pong { timestamp: u32 },
    /// Full roster.
    Players(Vec<PeerInfo>),
    /// One roster entry, rebroadcast by the host.
    Nick(PeerInfo),
    /// Chat line.
    Chat(ChatLine),
    /// System notice.
    Notify(ChatLine),
    /// Standalone powerup event.
    PowerupEvent(PowerupEvent),
    /// Board powerup announced outside the DELTA cadence.
    Spawn(PowerupSnapshot),
    /// A peer's locally configured tanks.
    TankConfig(TankConfig),
}

impl Message {
    /// Discriminator.
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Init(_) => MessageKind::Init,
            Message::Delta(_) => MessageKind::Delta,
            Message::Input { .. } => MessageKind::Input,
            Message::Ping { .. } => MessageKind::Ping,
            Message::Pong { .. } => MessageKind::Pong,
            Message::Players(_) => MessageKind::Players,
            Message::Nick(_) => MessageKind::Nick,
            Message::Chat(_) => MessageKind::Chat,
            Message::Notify(_) => MessageKind::Notify,
            Message::PowerupEvent(_) => MessageKind::PowerupEvent,
            Message::Spawn(_) => MessageKind::Spawn,
            Message::TankConfig(_) => MessageKind::TankConfig,
        }
    }

    /// System notice without a nickname.
    pub fn notice(text: impl Into<String>) -> Self {
        Message::Notify(ChatLine::new(None, text))
    }
}

/// Full state sent to a (re)joining observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitMessage {
    /// Broadcast sequence number
    pub seq: u32,
    /// Match rules
    pub settings: GameSettings,
    /// Opaque wall layout blob
    pub layout: Vec<u8>,
    /// Board powerups
    pub powerups: Vec<PowerupSnapshot>,
    /// Every tank
    pub tanks: Vec<TankSnapshot>,
}

impl InitMessage {
    /// Build from a snapshot.
    pub fn from_snapshot(seq: u32, settings: GameSettings, layout: Vec<u8>, snapshot: &Snapshot) -> Self {
        Self {
            seq,
            settings,
            layout,
            powerups: snapshot.powerups.clone(),
            tanks: snapshot
                .tanks
                .values()
                .map(|t| TankSnapshot { bullets: Vec::new(), ..t.clone() })
                .collect(),
        }
    }
}

/// Changes since the previous broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaMessage {
    /// Broadcast sequence number
    pub seq: u32,
    /// Changed tanks
    pub tanks: Vec<TankUpdate>,
    /// Tanks gone
    pub removed: Vec<TankId>,
    /// Every bullet in flight
    pub bullets: Vec<BulletSnapshot>,
    /// Full board list; `None` means unchanged
    pub powerups: Option<Vec<PowerupSnapshot>>,
    /// Bundled powerup events
    pub events: Vec<PowerupEvent>,
}

impl DeltaMessage {
    /// Build from a computed delta.
    pub fn from_delta(seq: u32, delta: SnapshotDelta) -> Self {
        Self {
            seq,
            tanks: delta.tanks,
            removed: delta.removed,
            bullets: delta.bullets,
            powerups: delta.powerups,
            events: delta.events,
        }
    }
}

/// One roster entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Peer id
    pub peer_id: PeerId,
    /// Display name
    pub nickname: String,
}

impl PeerInfo {
    /// Create a roster entry.
    pub fn new(peer_id: PeerId, nickname: impl Into<String>) -> Self {
        Self { peer_id, nickname: nickname.into() }
    }
}

/// Chat or notice line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLine {
    /// Sender nickname; `None` for system lines
    pub nickname: Option<String>,
    /// Free text
    pub text: String,
}

impl ChatLine {
    /// Create a line. An empty nickname is the same as none.
    pub fn new(nickname: Option<String>, text: impl Into<String>) -> Self {
        Self {
            nickname: nickname.filter(|n| !n.is_empty()),
            text: text.into(),
        }
    }
}

/// A peer's tank configuration, consumed by the host at match start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TankConfig {
    /// Owning peer
    pub owner: PeerId,
    /// One entry per locally configured tank
    pub entries: Vec<TankConfigEntry>,
}

/// One locally configured tank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TankConfigEntry {
    /// Settings panel the tank was configured in
    pub panel_id: String,
    /// Body colour
    pub colour: String,
    /// Key names for up, right, down, left, fire, special
    pub keys: [String; 6],
}
