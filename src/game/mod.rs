//! Game Logic Module
//!
//! Canonical arena state and everything the host does to it.
//!
//! ## Module Structure
//!
//! - `input`: Packed per-tank control intents
//! - `state`: Match state, tanks, bullets, board powerups
//! - `powerup`: Powerup variants and the strategy table they swap
//! - `events`: Powerup activate/deactivate events and their bus
//! - `snapshot`: Snapshot capture and coarse diffing
//! - `tick`: Simulation collaborator and the host-side match runner
//! - `collision`: Hit and pickup overlap tests
//! - `spawner`: Timed board powerup generator
//! - `map`: Static maze wall layout

pub mod input;
pub mod state;
pub mod powerup;
pub mod events;
pub mod snapshot;
pub mod tick;
pub mod collision;
pub mod spawner;
pub mod map;

// Re-export key types
pub use input::{Action, InputState};
pub use state::{GameSettings, MatchPhase, MatchState, PeerId, TankId, TankState, PowerupState, BulletState};
pub use powerup::{PowerupKind, TargetScope, Strategies, StrategyTable};
pub use events::{PowerupBus, PowerupEvent, PowerupStatus};
pub use snapshot::{capture_state, CoarseDiffer, Differ, Snapshot, SnapshotDelta};
pub use tick::{ArenaSimulation, MatchRunner, Simulation, TickResult, TimerEvent};
pub use map::WallLayout;
