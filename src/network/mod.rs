//! Network Layer
//!
//! Everything between canonical state and the sockets: the message set and
//! its two codecs, the peer session, the role router with its host and
//! observer handlers, the input relay and the WebSocket bridge.

pub mod protocol;
pub mod codec;
pub mod text;
pub mod binary;
pub mod session;
pub mod router;
pub mod host;
pub mod observer;
pub mod relay;
pub mod server;

pub use protocol::{ChatLine, DeltaMessage, InitMessage, Message, MessageKind, PeerInfo, TankConfig, TankConfigEntry};
pub use codec::{binary_to_text, hydrate, text_to_binary, CodecError, Hydrated, Payload, WireCodec, WireFormat};
pub use text::TextCodec;
pub use binary::BinaryCodec;
pub use session::{ChannelLink, Link, Role, Session, SessionError};
pub use router::{RoleHandler, Router};
pub use host::HostLoop;
pub use observer::{ObserverProjector, Projection, SuspectedHit};
pub use relay::{InputRelay, InputSink, KeyBindings, RemoteHost};
pub use server::{ServerConfig, ServerError, TransportEvent, TransportServer};
