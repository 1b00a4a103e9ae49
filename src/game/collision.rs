//! Collision Detection
//!
//! Circle approximations for bullet hits and powerup pickups, plus arena
//! edge handling. Shared by the host simulation and by observers that
//! double-check received state.

use crate::core::vec2::Vec2;
use crate::game::state::{MatchState, TankId};

/// Check if two circles overlap.
#[inline]
pub fn circles_overlap(pos_a: Vec2, radius_a: f32, pos_b: Vec2, radius_b: f32) -> bool {
    let combined = radius_a + radius_b;
    pos_a.distance_squared(pos_b) <= combined * combined
}

/// Whether a bullet touches a tank body of `width` x `height`.
#[inline]
pub fn bullet_hits_tank(bullet: Vec2, bullet_radius: f32, tank: Vec2, width: u16, height: u16) -> bool {
    circles_overlap(bullet, bullet_radius, tank, width.max(height) as f32 / 2.0)
}

/// A tank touching a board powerup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pickup {
    /// Tank that touched it
    pub tank: TankId,
    /// Board powerup id
    pub powerup_id: u32,
}

/// Every live tank touching an unclaimed powerup, in id order.
pub fn check_pickups(state: &MatchState) -> Vec<Pickup> {
    let mut pickups = Vec::new();
    for tank in state.tanks.values().filter(|t| t.alive) {
        for powerup in state.powerups.values().filter(|p| !p.claimed) {
            if circles_overlap(tank.position, tank.radius(), powerup.position, powerup.size as f32 / 2.0) {
                pickups.push(Pickup { tank: tank.id.clone(), powerup_id: powerup.id });
            }
        }
    }
    pickups
}

/// Reflect a moving point off the arena edges.
///
/// Returns the corrected position and velocity and whether it bounced.
pub fn bounce_off_edges(position: Vec2, velocity: Vec2, arena: Vec2) -> (Vec2, Vec2, bool) {
    let mut pos = position;
    let mut vel = velocity;
    let mut bounced = false;

    if pos.x < 0.0 || pos.x > arena.x {
        pos.x = pos.x.clamp(0.0, arena.x);
        vel.x = -vel.x;
        bounced = true;
    }
    if pos.y < 0.0 || pos.y > arena.y {
        pos.y = pos.y.clamp(0.0, arena.y);
        vel.y = -vel.y;
        bounced = true;
    }
    (pos, vel, bounced)
}
