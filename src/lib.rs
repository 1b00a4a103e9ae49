//! # Tank Arena Sync
//!
//! Host-authoritative state synchronization for a real-time multiplayer
//! tank arena.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TANK ARENA SYNC                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                                │
//! │  ├── vec2.rs     - 2D vector, wire rounding                  │
//! │  ├── rng.rs      - Seeded spawn RNG                          │
//! │  └── timer.rs    - Cancellable timer queue                   │
//! │                                                              │
//! │  game/           - Canonical state (host only mutates)       │
//! │  ├── state.rs    - Match, tank, bullet, powerup records      │
//! │  ├── powerup.rs  - Powerup variants and strategy table       │
//! │  ├── events.rs   - Powerup event bus                         │
//! │  ├── snapshot.rs - Capture and coarse diffing                │
//! │  ├── tick.rs     - Simulation and match runner               │
//! │  ├── collision.rs- Overlap tests                             │
//! │  ├── spawner.rs  - Timed powerup generator                   │
//! │  ├── input.rs    - Packed control intents                    │
//! │  └── map.rs      - Opaque wall layout                        │
//! │                                                              │
//! │  network/        - Sync protocol                             │
//! │  ├── protocol.rs - Message set                               │
//! │  ├── text.rs     - Delimited text codec                      │
//! │  ├── binary.rs   - Fixed-width binary codec                  │
//! │  ├── codec.rs    - WireCodec trait, hydrate                  │
//! │  ├── session.rs  - Peers, links, roster                      │
//! │  ├── router.rs   - Role dispatch                             │
//! │  ├── host.rs     - Host loop and broadcast                   │
//! │  ├── observer.rs - Observer projection                       │
//! │  ├── relay.rs    - Key events to INPUT                       │
//! │  └── server.rs   - WebSocket bridge                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority
//!
//! One peer hosts. It alone mutates [`MatchState`]; every other peer holds
//! a [`network::observer::Projection`] rebuilt from INIT and merged from
//! DELTA. Observers send only INPUT, chat and their handshake.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::vec2::Vec2;
pub use game::state::{GameSettings, MatchState, PeerId, TankId};
pub use network::codec::{Payload, WireFormat};
pub use network::protocol::Message;
pub use network::session::{Role, Session};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
