//! Core primitives.
//!
//! Arena vector math, the host's spawn RNG, and the cancellable timer queue
//! shared by the powerup generator, powerup expiry and respawn countdowns.

pub mod vec2;
pub mod rng;
pub mod timer;

// Re-export core types
pub use vec2::Vec2;
pub use rng::SpawnRng;
pub use timer::{TimerHandle, TimerQueue};
