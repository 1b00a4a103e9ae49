//! Input State
//!
//! Six boolean control intents per tank, packed into one byte for the wire.

use serde::{Serialize, Deserialize};

/// A single control intent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Action {
    /// Drive forward
    Up = 0,
    /// Rotate clockwise
    Right = 1,
    /// Drive backward
    Down = 2,
    /// Rotate counter-clockwise
    Left = 3,
    /// Fire through the current fire strategy
    Fire = 4,
    /// Drop the active powerup early
    Special = 5,
}

impl Action {
    /// All actions in wire bit order.
    pub const ALL: [Action; 6] = [
        Action::Up,
        Action::Right,
        Action::Down,
        Action::Left,
        Action::Fire,
        Action::Special,
    ];

    /// Bit mask of this action inside `InputState::flags`.
    #[inline]
    pub const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Coalesced input state for one tank.
///
/// Bit layout (LSB first): up, right, down, left, fire, special.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputState {
    /// Packed action flags
    pub flags: u8,
}

impl InputState {
    /// Mask of the six defined bits.
    pub const MASK: u8 = 0b0011_1111;

    /// Idle input.
    pub const fn new() -> Self {
        Self { flags: 0 }
    }

    /// Build from wire flags; undefined bits are discarded.
    pub const fn from_flags(flags: u8) -> Self {
        Self { flags: flags & Self::MASK }
    }

    /// Whether `action` is held.
    #[inline]
    pub fn is_set(&self, action: Action) -> bool {
        self.flags & action.bit() != 0
    }

    /// Set or clear `action`. Returns true if the state changed.
    #[inline]
    pub fn set(&mut self, action: Action, pressed: bool) -> bool {
        let before = self.flags;
        if pressed {
            self.flags |= action.bit();
        } else {
            self.flags &= !action.bit();
        }
        before != self.flags
    }

    /// No action held.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.flags == 0
    }

    /// Forward/backward drive: +1, 0 or -1.
    #[inline]
    pub fn drive(&self) -> f32 {
        match (self.is_set(Action::Up), self.is_set(Action::Down)) {
            (true, false) => 1.0,
            (false, true) => -1.0,
            _ => 0.0,
        }
    }

    /// Rotation direction: +1 clockwise, -1 counter-clockwise.
    #[inline]
    pub fn turn(&self) -> f32 {
        match (self.is_set(Action::Right), self.is_set(Action::Left)) {
            (true, false) => 1.0,
            (false, true) => -1.0,
            _ => 0.0,
        }
    }
}
