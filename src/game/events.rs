//! Powerup Events
//!
//! Activate/deactivate notifications for a tank and powerup identity.
//! Each event travels twice: at once as a standalone POWERUP EVENT, and
//! again bundled into the next DELTA the host actually sends.

use serde::{Serialize, Deserialize};

use crate::game::powerup::{PowerupKind, TargetScope};
use crate::game::state::TankId;

/// Activation status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PowerupStatus {
    /// Effect applied
    Activate = 0,
    /// Effect undone
    Deactivate = 1,
}

impl PowerupStatus {
    /// Get from wire index.
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(PowerupStatus::Activate),
            1 => Some(PowerupStatus::Deactivate),
            _ => None,
        }
    }
}

/// A transient powerup notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerupEvent {
    /// Applied or undone
    pub status: PowerupStatus,
    /// Variant
    pub kind: PowerupKind,
    /// Holder only, or everyone else
    pub scope: TargetScope,
    /// Holder
    pub tank_id: TankId,
    /// Board powerup the effect came from
    pub powerup_id: u32,
}

impl PowerupEvent {
    /// Activation of `kind` on `tank_id`.
    pub fn activate(kind: PowerupKind, tank_id: TankId, powerup_id: u32) -> Self {
        Self {
            status: PowerupStatus::Activate,
            kind,
            scope: kind.scope(),
            tank_id,
            powerup_id,
        }
    }

    /// Deactivation of `kind` on `tank_id`.
    pub fn deactivate(kind: PowerupKind, tank_id: TankId, powerup_id: u32) -> Self {
        Self {
            status: PowerupStatus::Deactivate,
            ..Self::activate(kind, tank_id, powerup_id)
        }
    }
}

/// Host-side event queues.
#[derive(Clone, Debug, Default)]
pub struct PowerupBus {
    immediate: Vec<PowerupEvent>,
    next_delta: Vec<PowerupEvent>,
}

impl PowerupBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event for immediate broadcast and for the next DELTA.
    pub fn publish(&mut self, event: PowerupEvent) {
        self.next_delta.push(event.clone());
        self.immediate.push(event);
    }

    /// Events still waiting for their standalone broadcast.
    pub fn drain_immediate(&mut self) -> Vec<PowerupEvent> {
        std::mem::take(&mut self.immediate)
    }

    /// Events to bundle into the DELTA being sent now.
    pub fn take_for_delta(&mut self) -> Vec<PowerupEvent> {
        std::mem::take(&mut self.next_delta)
    }

    /// An INIT carries the full state; pending bundle copies are obsolete.
    pub fn clear_for_init(&mut self) {
        self.next_delta.clear();
    }

    /// Events queued for the next DELTA.
    pub fn pending_delta(&self) -> usize {
        self.next_delta.len()
    }
}
