//! Game State Definitions
//!
//! Canonical records owned by the host: tanks, board powerups and bullets.
//! Uses BTreeMap so snapshots and broadcasts iterate in a stable order.

use std::collections::BTreeMap;
use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::rng::SpawnRng;
use crate::core::timer::TimerHandle;
use crate::core::vec2::Vec2;
use crate::game::input::InputState;
use crate::game::map::WallLayout;
use crate::game::powerup::{PowerupKind, StrategyTable, TargetScope};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Side of one maze cell in arena pixels.
pub const CELL_SIZE: f32 = 64.0;

/// Default tank body width.
pub const TANK_WIDTH: u16 = 20;

/// Default tank body height.
pub const TANK_HEIGHT: u16 = 26;

/// Radius of a regular bullet.
pub const BULLET_RADIUS: f32 = 3.0;

/// Radius of a laser bullet.
pub const LASER_RADIUS: f32 = 2.0;

/// Side of a board powerup.
pub const POWERUP_SIZE: u16 = 24;

/// How long a board powerup stays before despawning.
pub const POWERUP_LIFETIME_MS: u64 = 15_000;

/// Countdown before a destroyed tank returns.
pub const RESPAWN_DELAY_MS: u64 = 3_000;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Transport-level peer identifier.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Borrow as str.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Session-unique tank identifier, `"<peer>-<n>"`.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TankId(pub String);

impl TankId {
    /// The `index`-th tank configured by `owner`.
    pub fn for_peer(owner: &PeerId, index: u32) -> Self {
        Self(format!("{}-{}", owner.0, index))
    }

    /// Borrow as str.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TankId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TankId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// GAME SETTINGS
// =============================================================================

/// Match rules shared with every observer in INIT.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameSettings {
    /// Maze columns
    pub grid_width: u16,
    /// Maze rows
    pub grid_height: u16,
    /// Wall thickness in pixels
    pub wall_thickness: u16,
    /// Pixels per tick
    pub move_speed: f32,
    /// Radians per tick
    pub rotation_speed: f32,
    /// Bullet pixels per tick
    pub bullet_speed: f32,
    /// Bullets alive per tank
    pub bullet_limit: u8,
    /// Bounces before a bullet expires
    pub bounce_limit: u8,
    /// Powerup generator period
    pub powerup_interval_ms: u32,
    /// Board powerups at once
    pub powerup_limit: u8,
    /// Active powerup duration
    pub powerup_duration_ms: u32,
    /// Whether bullets hurt tanks of the same owner
    pub friendly_fire: bool,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            grid_width: 10,
            grid_height: 8,
            wall_thickness: 4,
            move_speed: 2.5,
            rotation_speed: 0.06,
            bullet_speed: 4.0,
            bullet_limit: 5,
            bounce_limit: 4,
            powerup_interval_ms: 8_000,
            powerup_limit: 3,
            powerup_duration_ms: 10_000,
            friendly_fire: false,
        }
    }
}

impl GameSettings {
    /// Arena extent in pixels.
    pub fn arena_size(&self) -> Vec2 {
        Vec2::new(
            self.grid_width as f32 * CELL_SIZE,
            self.grid_height as f32 * CELL_SIZE,
        )
    }
}

// =============================================================================
// BULLET STATE
// =============================================================================

/// A bullet in flight, owned by the tank that fired it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BulletState {
    /// Current position
    pub position: Vec2,
    /// Pixels per tick
    pub velocity: Vec2,
    /// Inherited from the firing tank
    pub colour: String,
    /// Hit radius
    pub radius: f32,
    /// Bounces so far
    pub bounces: u8,
    /// Bounces allowed before expiry
    pub max_bounces: u8,
    /// Tick the bullet was fired on
    pub created_tick: u64,
}

// =============================================================================
// ACTIVE POWERUP
// =============================================================================

/// The effect a tank currently holds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivePowerup {
    /// Board powerup it came from
    pub powerup_id: u32,
    /// Variant
    pub kind: PowerupKind,
    /// Tanks whose strategy tables carry the effect
    pub targets: Vec<TankId>,
    /// Scheduled deactivation
    #[serde(skip)]
    pub expiry: Option<TimerHandle>,
}

impl ActivePowerup {
    /// Icon reference shown next to the tank.
    pub fn icon(&self) -> &'static str {
        self.kind.icon()
    }

    /// Replicated form of the held powerup.
    pub fn snapshot(&self) -> PowerupKind {
        self.kind
    }
}

// =============================================================================
// TANK STATE
// =============================================================================

/// State of a single tank.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TankState {
    /// Session-unique id
    pub id: TankId,

    /// Peer that configured this tank
    pub owner: PeerId,

    /// Centre in arena pixels
    pub position: Vec2,

    /// Radians, 0 = facing up
    pub rotation: f32,

    /// Body colour
    pub colour: String,

    /// Body width
    pub width: u16,

    /// Body height
    pub height: u16,

    /// Kills
    pub score: u32,

    /// Destroyed tanks wait for respawn
    pub alive: bool,

    /// At most one held effect
    pub active_powerup: Option<ActivePowerup>,

    /// Fire / wall / movement capabilities
    pub strategies: StrategyTable,

    /// Bullets in flight
    pub bullets: Vec<BulletState>,

    // =========================================================================
    // Input
    // =========================================================================

    /// Latest coalesced input
    pub input: InputState,

    /// Fire was held last tick (firing is edge-triggered)
    pub fire_latched: bool,

    /// Special was held last tick
    pub special_latched: bool,
}

impl TankState {
    /// Create a new tank.
    pub fn new(id: TankId, owner: PeerId, colour: impl Into<String>, position: Vec2, rotation: f32) -> Self {
        Self {
            id,
            owner,
            position,
            rotation,
            colour: colour.into(),
            width: TANK_WIDTH,
            height: TANK_HEIGHT,
            score: 0,
            alive: true,
            active_powerup: None,
            strategies: StrategyTable::new(),
            bullets: Vec::new(),
            input: InputState::new(),
            fire_latched: false,
            special_latched: false,
        }
    }

    /// Unit vector the barrel points at.
    #[inline]
    pub fn facing(&self) -> Vec2 {
        Vec2::from_rotation(self.rotation)
    }

    /// Collision radius approximating the body.
    #[inline]
    pub fn radius(&self) -> f32 {
        self.width.max(self.height) as f32 / 2.0
    }

    /// Kinds held, for replication.
    pub fn powerup_kinds(&self) -> Vec<PowerupKind> {
        self.active_powerup.iter().map(ActivePowerup::snapshot).collect()
    }
}

// =============================================================================
// POWERUP STATE
// =============================================================================

/// A powerup lying on the board.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PowerupState {
    /// Monotonic id
    pub id: u32,
    /// Variant
    pub kind: PowerupKind,
    /// Centre in arena pixels
    pub position: Vec2,
    /// Side length
    pub size: u16,
    /// Icon reference
    pub icon: String,
    /// Board colour
    pub colour: String,
    /// First claimer wins
    pub claimed: bool,
    /// Scheduled despawn
    #[serde(skip)]
    pub despawn: Option<TimerHandle>,
}

impl PowerupState {
    /// Create a board powerup with the variant's default look.
    pub fn new(id: u32, kind: PowerupKind, position: Vec2) -> Self {
        Self {
            id,
            kind,
            position,
            size: POWERUP_SIZE,
            icon: kind.icon().to_string(),
            colour: kind.colour().to_string(),
            claimed: false,
            despawn: None,
        }
    }
}

// =============================================================================
// MATCH PHASE
// =============================================================================

/// Current phase of the match.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchPhase {
    /// Collecting tank configs
    #[default]
    Waiting,
    /// Active gameplay
    Playing,
}

// =============================================================================
// MATCH STATE
// =============================================================================

/// Complete canonical state of a match.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchState {
    /// Current tick
    pub tick: u64,

    /// Current match phase
    pub phase: MatchPhase,

    /// Rules
    pub settings: GameSettings,

    /// Static maze, shipped as a blob in INIT
    pub layout: WallLayout,

    /// Spawn RNG
    #[serde(skip)]
    pub rng: SpawnRng,

    /// All tanks
    pub tanks: BTreeMap<TankId, TankState>,

    /// Board powerups
    pub powerups: BTreeMap<u32, PowerupState>,

    /// Next powerup ID (monotonic counter)
    pub next_powerup_id: u32,

    /// Next tank index per owner
    next_tank_index: BTreeMap<PeerId, u32>,
}

impl MatchState {
    /// Create a new match state.
    pub fn new(settings: GameSettings, layout: WallLayout, rng_seed: u64) -> Self {
        Self {
            tick: 0,
            phase: MatchPhase::Waiting,
            settings,
            layout,
            rng: SpawnRng::new(rng_seed),
            tanks: BTreeMap::new(),
            powerups: BTreeMap::new(),
            next_powerup_id: 0,
            next_tank_index: BTreeMap::new(),
        }
    }

    /// Arena extent in pixels.
    pub fn arena_size(&self) -> Vec2 {
        self.settings.arena_size()
    }

    /// Add a tank for `owner` at a random position.
    pub fn add_tank(&mut self, owner: &PeerId, colour: &str) -> TankId {
        let position = self.rng.random_position(self.arena_size(), CELL_SIZE / 2.0);
        let rotation = self.rng.random_rotation();
        self.add_tank_at(owner, colour, position, rotation)
    }

    /// Add a tank for `owner` at a fixed position.
    pub fn add_tank_at(&mut self, owner: &PeerId, colour: &str, position: Vec2, rotation: f32) -> TankId {
        let index = self.next_tank_index.entry(owner.clone()).or_insert(0);
        let id = TankId::for_peer(owner, *index);
        *index += 1;

        let tank = TankState::new(id.clone(), owner.clone(), colour, position, rotation);
        self.tanks.insert(id.clone(), tank);
        id
    }

    /// Get a tank by ID.
    pub fn tank(&self, id: &TankId) -> Option<&TankState> {
        self.tanks.get(id)
    }

    /// Get a tank mutably by ID.
    pub fn tank_mut(&mut self, id: &TankId) -> Option<&mut TankState> {
        self.tanks.get_mut(id)
    }

    /// Ids of every tank owned by `owner`.
    pub fn tanks_of(&self, owner: &PeerId) -> Vec<TankId> {
        self.tanks
            .values()
            .filter(|t| &t.owner == owner)
            .map(|t| t.id.clone())
            .collect()
    }

    /// Remove a tank, releasing whatever it holds.
    ///
    /// Returns the released powerup so the caller can cancel its expiry.
    pub fn remove_tank(&mut self, id: &TankId) -> Option<(TankState, Option<ActivePowerup>)> {
        let released = self.release_powerup(id);
        let tank = self.tanks.remove(id)?;
        if self.tanks.values().all(|t| t.owner != tank.owner) {
            // Next tanks for this owner line up with its config entries again
            self.next_tank_index.remove(&tank.owner);
        }
        Some((tank, released))
    }

    /// Place a new powerup on the board.
    pub fn spawn_powerup(&mut self, kind: PowerupKind, position: Vec2) -> u32 {
        let id = self.next_powerup_id;
        self.next_powerup_id += 1;
        self.powerups.insert(id, PowerupState::new(id, kind, position));
        id
    }

    /// Claim a board powerup. Only the first claim succeeds.
    pub fn claim_powerup(&mut self, id: u32) -> Option<PowerupState> {
        let powerup = self.powerups.get_mut(&id)?;
        if powerup.claimed {
            return None;
        }
        powerup.claimed = true;
        self.powerups.remove(&id)
    }

    /// Apply `kind` to `holder`, replacing any powerup it already holds.
    ///
    /// Returns the replaced powerup (already undone) so the caller can
    /// cancel its expiry timer.
    pub fn grant_powerup(&mut self, holder: &TankId, powerup_id: u32, kind: PowerupKind) -> Option<ActivePowerup> {
        if !self.tanks.contains_key(holder) {
            return None;
        }
        let replaced = self.release_powerup(holder);

        let targets: Vec<TankId> = match kind.scope() {
            TargetScope::Entity => vec![holder.clone()],
            TargetScope::Global => self.tanks.keys().filter(|id| *id != holder).cloned().collect(),
        };
        for target in &targets {
            if let Some(tank) = self.tanks.get_mut(target) {
                kind.effect(powerup_id, &mut tank.strategies);
            }
        }

        if let Some(tank) = self.tanks.get_mut(holder) {
            tank.active_powerup = Some(ActivePowerup {
                powerup_id,
                kind,
                targets,
                expiry: None,
            });
        }
        replaced
    }

    /// Undo and remove the powerup `holder` carries.
    pub fn release_powerup(&mut self, holder: &TankId) -> Option<ActivePowerup> {
        let active = self.tanks.get_mut(holder)?.active_powerup.take()?;
        for target in &active.targets {
            if let Some(tank) = self.tanks.get_mut(target) {
                active.kind.undo(active.powerup_id, &mut tank.strategies);
            }
        }
        Some(active)
    }

    /// Bring a destroyed tank back at a random position, score kept.
    pub fn respawn_tank(&mut self, id: &TankId) -> bool {
        let position = self.rng.random_position(self.arena_size(), CELL_SIZE / 2.0);
        let rotation = self.rng.random_rotation();
        match self.tanks.get_mut(id) {
            Some(tank) => {
                tank.position = position;
                tank.rotation = rotation;
                tank.alive = true;
                tank.input = InputState::new();
                true
            }
            None => false,
        }
    }

    /// Bullets currently in flight across all tanks.
    pub fn bullet_count(&self) -> usize {
        self.tanks.values().map(|t| t.bullets.len()).sum()
    }
}

// =============================================================================
// TESTS
// =============================================================================
