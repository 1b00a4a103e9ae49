//! Powerup Variants and Tank Capabilities
//!
//! A tank's behaviour-defining capabilities (how it fires, how it resolves
//! walls, how it moves) live in a [`StrategyTable`]. A powerup effect swaps
//! one capability for a named strategy and records the one it replaced;
//! `undo` restores that recorded strategy, never a hardcoded default.
//!
//! Overrides are kept in application order per tank. Reverting an override
//! that is no longer on top hands its recorded prior to the override above
//! it, so effects from different sources unwind correctly in any order.

use serde::{Serialize, Deserialize};

/// Board/active powerup variants (closed set).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PowerupKind {
    /// Fires a three-bullet spread
    TripleShot = 0,
    /// Fires one fast, thin bullet that does not bounce
    Laser = 1,
    /// Drives through the arena edge and reappears opposite
    Ghost = 2,
    /// Faster movement
    SpeedBoost = 3,
    /// Freezes every other tank in place
    Freeze = 4,
}

impl PowerupKind {
    /// All variants in wire order.
    pub const ALL: [PowerupKind; 5] = [
        PowerupKind::TripleShot,
        PowerupKind::Laser,
        PowerupKind::Ghost,
        PowerupKind::SpeedBoost,
        PowerupKind::Freeze,
    ];

    /// Get from wire index.
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// Display / text-wire name.
    pub fn name(self) -> &'static str {
        match self {
            PowerupKind::TripleShot => "TripleShot",
            PowerupKind::Laser => "Laser",
            PowerupKind::Ghost => "Ghost",
            PowerupKind::SpeedBoost => "SpeedBoost",
            PowerupKind::Freeze => "Freeze",
        }
    }

    /// Parse a text-wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Default icon reference.
    pub fn icon(self) -> &'static str {
        match self {
            PowerupKind::TripleShot => "powerups/triple_shot.png",
            PowerupKind::Laser => "powerups/laser.png",
            PowerupKind::Ghost => "powerups/ghost.png",
            PowerupKind::SpeedBoost => "powerups/speed.png",
            PowerupKind::Freeze => "powerups/freeze.png",
        }
    }

    /// Default board colour.
    pub fn colour(self) -> &'static str {
        match self {
            PowerupKind::TripleShot => "#e8a33d",
            PowerupKind::Laser => "#e53935",
            PowerupKind::Ghost => "#9e9e9e",
            PowerupKind::SpeedBoost => "#43a047",
            PowerupKind::Freeze => "#4fc3f7",
        }
    }

    /// Who the effect applies to.
    pub fn scope(self) -> TargetScope {
        match self {
            PowerupKind::Freeze => TargetScope::Global,
            _ => TargetScope::Entity,
        }
    }

    /// The capability this variant installs on each target.
    pub fn capability(self) -> Capability {
        match self {
            PowerupKind::TripleShot => Capability::Fire(FireStrategy::Triple),
            PowerupKind::Laser => Capability::Fire(FireStrategy::Laser),
            PowerupKind::Ghost => Capability::Wall(WallStrategy::PassThrough),
            PowerupKind::SpeedBoost => Capability::Movement(MovementStrategy::Boosted),
            PowerupKind::Freeze => Capability::Movement(MovementStrategy::Frozen),
        }
    }

    /// Apply this variant's effect to one target's strategy table.
    pub fn effect(self, powerup_id: u32, table: &mut StrategyTable) {
        table.apply(powerup_id, self.capability());
    }

    /// Undo the effect previously applied with the same `powerup_id`.
    pub fn undo(self, powerup_id: u32, table: &mut StrategyTable) -> bool {
        table.revert(powerup_id)
    }
}

/// Whether an effect targets its holder or every other tank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TargetScope {
    /// Only the tank that picked it up
    Entity = 0,
    /// Every other tank in the arena
    Global = 1,
}

impl TargetScope {
    /// Get from wire index.
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(TargetScope::Entity),
            1 => Some(TargetScope::Global),
            _ => None,
        }
    }
}

// =============================================================================
// STRATEGIES
// =============================================================================

/// How a tank fires.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FireStrategy {
    /// One bullet straight ahead
    #[default]
    Single,
    /// Three bullets in a spread
    Triple,
    /// One fast non-bouncing bullet
    Laser,
}

/// How a tank resolves the arena edge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WallStrategy {
    /// Stopped by the edge
    #[default]
    Solid,
    /// Wraps to the opposite edge
    PassThrough,
}

/// How fast a tank moves.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementStrategy {
    /// Configured move speed
    #[default]
    Normal,
    /// 1.5x move and rotation speed
    Boosted,
    /// Cannot move or rotate
    Frozen,
}

impl MovementStrategy {
    /// Multiplier applied to move and rotation speed.
    pub fn speed_factor(self) -> f32 {
        match self {
            MovementStrategy::Normal => 1.0,
            MovementStrategy::Boosted => 1.5,
            MovementStrategy::Frozen => 0.0,
        }
    }
}

/// One capability slot with its selected strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Fire slot
    Fire(FireStrategy),
    /// Wall slot
    Wall(WallStrategy),
    /// Movement slot
    Movement(MovementStrategy),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    Fire,
    Wall,
    Movement,
}

impl Capability {
    fn slot(self) -> Slot {
        match self {
            Capability::Fire(_) => Slot::Fire,
            Capability::Wall(_) => Slot::Wall,
            Capability::Movement(_) => Slot::Movement,
        }
    }
}

/// Current strategy per slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Strategies {
    /// Fire slot
    pub fire: FireStrategy,
    /// Wall slot
    pub wall: WallStrategy,
    /// Movement slot
    pub movement: MovementStrategy,
}

impl Strategies {
    fn get(&self, slot: Slot) -> Capability {
        match slot {
            Slot::Fire => Capability::Fire(self.fire),
            Slot::Wall => Capability::Wall(self.wall),
            Slot::Movement => Capability::Movement(self.movement),
        }
    }

    fn set(&mut self, capability: Capability) {
        match capability {
            Capability::Fire(s) => self.fire = s,
            Capability::Wall(s) => self.wall = s,
            Capability::Movement(s) => self.movement = s,
        }
    }
}

/// An applied override and the capability it replaced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyOverride {
    /// Source powerup
    pub powerup_id: u32,
    /// Capability in the slot before this override
    pub prior: Capability,
}

/// A tank's capability table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyTable {
    current: Strategies,
    overrides: Vec<StrategyOverride>,
}

impl StrategyTable {
    /// Table with every slot at its default strategy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current strategies.
    pub fn current(&self) -> Strategies {
        self.current
    }

    /// Current fire strategy.
    pub fn fire(&self) -> FireStrategy {
        self.current.fire
    }

    /// Current wall strategy.
    pub fn wall(&self) -> WallStrategy {
        self.current.wall
    }

    /// Current movement strategy.
    pub fn movement(&self) -> MovementStrategy {
        self.current.movement
    }

    /// Number of live overrides.
    pub fn override_count(&self) -> usize {
        self.overrides.len()
    }

    /// Swap in `capability`, remembering what it replaced.
    pub fn apply(&mut self, powerup_id: u32, capability: Capability) {
        let prior = self.current.get(capability.slot());
        self.overrides.push(StrategyOverride { powerup_id, prior });
        self.current.set(capability);
    }

    /// Revert every override installed by `powerup_id`.
    ///
    /// Returns false if that powerup had nothing installed here.
    pub fn revert(&mut self, powerup_id: u32) -> bool {
        let mut reverted = false;
        while let Some(index) = self.overrides.iter().rposition(|o| o.powerup_id == powerup_id) {
            let removed = self.overrides.remove(index);
            let slot = removed.prior.slot();

            match self.overrides[index..].iter_mut().find(|o| o.prior.slot() == slot) {
                // Something newer sits on top: it must unwind to our prior
                Some(above) => above.prior = removed.prior,
                None => self.current.set(removed.prior),
            }
            reverted = true;
        }
        reverted
    }

    /// Drop every override and return to defaults.
    pub fn reset(&mut self) {
        self.overrides.clear();
        self.current = Strategies::default();
    }
}
