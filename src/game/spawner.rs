//! Powerup Spawning
//!
//! Timed generator for board powerups, bounded by the board capacity.

use crate::core::rng::SpawnRng;
use crate::game::powerup::PowerupKind;
use crate::game::state::{MatchPhase, MatchState, CELL_SIZE};

/// Place one random powerup if the board has room.
///
/// Returns the new powerup id, or `None` when the board is full or the
/// match is not running.
pub fn maybe_spawn_powerup(state: &mut MatchState) -> Option<u32> {
    if !matches!(state.phase, MatchPhase::Playing) {
        return None;
    }

    let on_board = state.powerups.values().filter(|p| !p.claimed).count();
    if on_board >= state.settings.powerup_limit as usize {
        return None;
    }

    let kind = random_powerup_kind(&mut state.rng);
    let position = state.rng.random_position(state.arena_size(), CELL_SIZE / 2.0);
    Some(state.spawn_powerup(kind, position))
}

/// Get a random powerup kind with weighted distribution.
fn random_powerup_kind(rng: &mut SpawnRng) -> PowerupKind {
    // TripleShot 30%, Laser 25%, SpeedBoost 20%, Ghost 15%, Freeze 10%
    let roll = rng.next_int(100);

    if roll < 30 {
        PowerupKind::TripleShot
    } else if roll < 55 {
        PowerupKind::Laser
    } else if roll < 75 {
        PowerupKind::SpeedBoost
    } else if roll < 90 {
        PowerupKind::Ghost
    } else {
        PowerupKind::Freeze
    }
}
