//! Snapshots and Coarse Diffing
//!
//! `capture_state` freezes the replicated view of a [`MatchState`] at wire
//! precision. A [`Differ`] compares two snapshots; [`CoarseDiffer`] marks a
//! whole tank changed when any field differs and resends the whole board
//! powerup list when any powerup was added, removed or moved.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

use crate::game::events::PowerupEvent;
use crate::game::powerup::PowerupKind;
use crate::game::state::{BulletState, MatchState, PeerId, PowerupState, TankId, TankState};

// =============================================================================
// RECORDS
// =============================================================================

/// Full replicated record of one tank, as carried by INIT.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TankSnapshot {
    /// Tank id
    pub id: TankId,
    /// Owning peer
    pub owner: PeerId,
    /// Centre x
    pub x: i16,
    /// Centre y
    pub y: i16,
    /// Radians
    pub rotation: f32,
    /// Body width
    pub width: u16,
    /// Body height
    pub height: u16,
    /// Body colour
    pub colour: String,
    /// Kills
    pub score: u32,
    /// Alive flag
    pub alive: bool,
    /// Held powerups (at most one)
    pub powerups: Vec<PowerupKind>,
    /// Bullets in flight; compared, but shipped flattened
    #[serde(skip)]
    pub bullets: Vec<BulletSnapshot>,
}

impl TankSnapshot {
    /// Capture a tank.
    pub fn capture(tank: &TankState) -> Self {
        let (x, y) = tank.position.to_wire();
        Self {
            id: tank.id.clone(),
            owner: tank.owner.clone(),
            x,
            y,
            rotation: tank.rotation,
            width: tank.width,
            height: tank.height,
            colour: tank.colour.clone(),
            score: tank.score,
            alive: tank.alive,
            powerups: tank.powerup_kinds(),
            bullets: tank.bullets.iter().map(BulletSnapshot::capture).collect(),
        }
    }

    /// The subset carried by DELTA.
    pub fn update(&self) -> TankUpdate {
        TankUpdate {
            id: self.id.clone(),
            x: self.x,
            y: self.y,
            rotation: self.rotation,
            score: self.score,
            alive: self.alive,
            powerups: self.powerups.clone(),
        }
    }
}

/// Per-tank fields a DELTA carries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TankUpdate {
    /// Tank id
    pub id: TankId,
    /// Centre x
    pub x: i16,
    /// Centre y
    pub y: i16,
    /// Radians
    pub rotation: f32,
    /// Kills
    pub score: u32,
    /// Alive flag
    pub alive: bool,
    /// Held powerups, redundant with POWERUP EVENT
    pub powerups: Vec<PowerupKind>,
}

/// A bullet at wire precision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BulletSnapshot {
    /// Position x
    pub x: i16,
    /// Position y
    pub y: i16,
    /// Velocity x
    pub vx: f32,
    /// Velocity y
    pub vy: f32,
    /// Colour
    pub colour: String,
    /// Radius
    pub radius: f32,
}

impl BulletSnapshot {
    /// Capture a bullet.
    pub fn capture(bullet: &BulletState) -> Self {
        let (x, y) = bullet.position.to_wire();
        Self {
            x,
            y,
            vx: bullet.velocity.x,
            vy: bullet.velocity.y,
            colour: bullet.colour.clone(),
            radius: bullet.radius,
        }
    }
}

/// A board powerup at wire precision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PowerupSnapshot {
    /// Powerup id
    pub id: u32,
    /// Variant
    pub kind: PowerupKind,
    /// Centre x
    pub x: i16,
    /// Centre y
    pub y: i16,
    /// Side length
    pub size: u16,
    /// Icon reference
    pub icon: String,
    /// Colour
    pub colour: String,
}

impl PowerupSnapshot {
    /// Capture a board powerup.
    pub fn capture(powerup: &PowerupState) -> Self {
        let (x, y) = powerup.position.to_wire();
        Self {
            id: powerup.id,
            kind: powerup.kind,
            x,
            y,
            size: powerup.size,
            icon: powerup.icon.clone(),
            colour: powerup.colour.clone(),
        }
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Point-in-time capture of all replicated state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    /// Tanks by id
    pub tanks: BTreeMap<TankId, TankSnapshot>,
    /// Board powerups sorted by id
    pub powerups: Vec<PowerupSnapshot>,
}

impl Snapshot {
    /// Every bullet, flattened in tank order.
    pub fn bullets(&self) -> Vec<BulletSnapshot> {
        self.tanks.values().flat_map(|t| t.bullets.iter().cloned()).collect()
    }
}

/// Capture the replicated view of `state`.
pub fn capture_state(state: &MatchState) -> Snapshot {
    Snapshot {
        tanks: state
            .tanks
            .iter()
            .map(|(id, tank)| (id.clone(), TankSnapshot::capture(tank)))
            .collect(),
        // BTreeMap iteration is already sorted by id
        powerups: state.powerups.values().map(PowerupSnapshot::capture).collect(),
    }
}

// =============================================================================
// DIFFING
// =============================================================================

/// What changed between two snapshots.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SnapshotDelta {
    /// Tanks with any changed field
    pub tanks: Vec<TankUpdate>,
    /// Tanks gone since the previous snapshot
    pub removed: Vec<TankId>,
    /// Every bullet in the current snapshot
    pub bullets: Vec<BulletSnapshot>,
    /// Full board list, only when it changed
    pub powerups: Option<Vec<PowerupSnapshot>>,
    /// Bundled powerup events, filled by the host
    pub events: Vec<PowerupEvent>,
}

/// Change detection between two snapshots.
pub trait Differ {
    /// `None` when nothing replicated changed.
    fn diff(&self, prev: &Snapshot, curr: &Snapshot) -> Option<SnapshotDelta>;
}

/// Whole-tank and whole-list diffing.
#[derive(Clone, Copy, Debug, Default)]
pub struct CoarseDiffer;

impl Differ for CoarseDiffer {
    fn diff(&self, prev: &Snapshot, curr: &Snapshot) -> Option<SnapshotDelta> {
        let tanks: Vec<TankUpdate> = curr
            .tanks
            .iter()
            .filter(|(id, tank)| prev.tanks.get(*id) != Some(*tank))
            .map(|(_, tank)| tank.update())
            .collect();

        let removed: Vec<TankId> = prev
            .tanks
            .keys()
            .filter(|id| !curr.tanks.contains_key(*id))
            .cloned()
            .collect();

        let powerups = (prev.powerups != curr.powerups).then(|| curr.powerups.clone());

        if tanks.is_empty() && removed.is_empty() && powerups.is_none() {
            return None;
        }

        Some(SnapshotDelta {
            tanks,
            removed,
            bullets: curr.bullets(),
            powerups,
            events: Vec::new(),
        })
    }
}
