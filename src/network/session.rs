//! Peer Session
//!
//! One explicitly constructed object per match holding everything that is
//! about peers rather than about the arena: local identity and role, the
//! roster, the outbound link per connected peer, measured round trips and
//! the chat/notice lines waiting for the UI. Created at match setup and
//! passed by reference to the router, host and observer.

use std::collections::BTreeMap;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::game::state::PeerId;
use crate::network::codec::{Payload, WireFormat};
use crate::network::protocol::{ChatLine, Message, PeerInfo};

/// Which side of the star topology this peer is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Holds canonical state and relays
    Host,
    /// Holds a read-only projection
    Observer,
}

/// Link-level failures. The peer is purged on its close event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No link for this peer.
    #[error("Peer {0} is not connected")]
    NotConnected(PeerId),

    /// A live link already answers to this id.
    #[error("Peer {0} is already connected")]
    AlreadyConnected(PeerId),

    /// The link's receiving side is gone.
    #[error("Link to {0} is closed")]
    LinkClosed(PeerId),

    /// Blob payloads are inbound only.
    #[error("Cannot send a blob payload")]
    UnsendablePayload,
}

/// Outbound half of one connection.
pub trait Link: Send {
    /// Queue a frame. Must not block.
    fn send(&self, payload: Payload) -> Result<(), SessionError>;
}

/// Link backed by an unbounded channel; the socket writer (or a test)
/// drains the receiving end.
#[derive(Debug, Clone)]
pub struct ChannelLink {
    peer: PeerId,
    tx: mpsc::UnboundedSender<Payload>,
}

impl ChannelLink {
    /// Create a link and the receiver it feeds.
    pub fn pair(peer: PeerId) -> (Self, mpsc::UnboundedReceiver<Payload>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { peer, tx }, rx)
    }
}

impl Link for ChannelLink {
    fn send(&self, payload: Payload) -> Result<(), SessionError> {
        self.tx
            .send(payload)
            .map_err(|_| SessionError::LinkClosed(self.peer.clone()))
    }
}

/// Session state for one match.
pub struct Session {
    role: Role,
    local_peer: PeerId,
    format: WireFormat,

    /// Nicknames, including the local peer
    roster: BTreeMap<PeerId, String>,

    /// Outbound links
    links: BTreeMap<PeerId, Box<dyn Link>>,

    /// Last measured round trip per peer
    rtt_ms: BTreeMap<PeerId, u32>,

    /// Chat and notice lines for the UI
    notices: Vec<ChatLine>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.role)
            .field("local_peer", &self.local_peer)
            .field("format", &self.format)
            .field("roster", &self.roster)
            .field("links", &self.links.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Session {
    /// Create a session.
    pub fn new(role: Role, local_peer: PeerId, nickname: impl Into<String>, format: WireFormat) -> Self {
        let mut roster = BTreeMap::new();
        roster.insert(local_peer.clone(), nickname.into());
        Self {
            role,
            local_peer,
            format,
            roster,
            links: BTreeMap::new(),
            rtt_ms: BTreeMap::new(),
            notices: Vec::new(),
        }
    }

    /// Local role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Local peer id.
    pub fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }

    /// Local nickname.
    pub fn nickname(&self) -> &str {
        self.roster.get(&self.local_peer).map(String::as_str).unwrap_or_default()
    }

    /// Outbound wire format.
    pub fn format(&self) -> WireFormat {
        self.format
    }

    // =========================================================================
    // Connections
    // =========================================================================

    /// Register the outbound link of a newly opened connection.
    ///
    /// Refuses an id that already has a link; the existing connection keeps it.
    pub fn attach(&mut self, peer: PeerId, link: Box<dyn Link>) -> Result<(), SessionError> {
        if self.links.contains_key(&peer) {
            warn!(peer = %peer, "Duplicate connection refused");
            return Err(SessionError::AlreadyConnected(peer));
        }
        info!(peer = %peer, "Peer connected");
        self.links.insert(peer, link);
        Ok(())
    }

    /// Forget everything about a peer. Returns its nickname if it had one.
    pub fn purge(&mut self, peer: &PeerId) -> Option<String> {
        self.links.remove(peer);
        self.rtt_ms.remove(peer);
        let nickname = self.roster.remove(peer);
        info!(peer = %peer, "Peer disconnected");
        nickname
    }

    /// Whether a link exists for `peer`.
    pub fn is_connected(&self, peer: &PeerId) -> bool {
        self.links.contains_key(peer)
    }

    /// Connected peers.
    pub fn peers(&self) -> impl Iterator<Item = &PeerId> {
        self.links.keys()
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.links.len()
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Encode in the session's wire format.
    pub fn encode(&self, message: &Message) -> Payload {
        self.format.codec().encode(message)
    }

    /// Send to one peer.
    pub fn send_to(&self, peer: &PeerId, message: &Message) -> Result<(), SessionError> {
        let link = self
            .links
            .get(peer)
            .ok_or_else(|| SessionError::NotConnected(peer.clone()))?;
        link.send(self.encode(message))
    }

    /// Send to every connection. Returns how many links accepted it.
    pub fn broadcast(&self, message: &Message) -> usize {
        self.fan_out(message, None)
    }

    /// Send to every connection except `sender`.
    pub fn broadcast_except(&self, message: &Message, sender: &PeerId) -> usize {
        self.fan_out(message, Some(sender))
    }

    fn fan_out(&self, message: &Message, except: Option<&PeerId>) -> usize {
        if self.links.is_empty() {
            return 0;
        }
        let payload = self.encode(message);
        let mut sent = 0;
        for (peer, link) in &self.links {
            if Some(peer) == except {
                continue;
            }
            let Some(frame) = payload.try_clone() else {
                warn!("{}", SessionError::UnsendablePayload);
                return sent;
            };
            match link.send(frame) {
                Ok(()) => sent += 1,
                // Fail-soft: the close event will purge the peer
                Err(e) => warn!(error = %e, "Dropped outbound {}", message.kind().name()),
            }
        }
        debug!(kind = message.kind().name(), sent, "Broadcast");
        sent
    }

    // =========================================================================
    // Roster
    // =========================================================================

    /// Set a peer's nickname. Returns true if it changed.
    pub fn set_nickname(&mut self, peer: PeerId, nickname: impl Into<String>) -> bool {
        let nickname = nickname.into();
        match self.roster.insert(peer, nickname.clone()) {
            Some(previous) => previous != nickname,
            None => true,
        }
    }

    /// Nickname of a peer.
    pub fn nickname_of(&self, peer: &PeerId) -> Option<&str> {
        self.roster.get(peer).map(String::as_str)
    }

    /// Roster as wire records.
    pub fn roster(&self) -> Vec<PeerInfo> {
        self.roster
            .iter()
            .map(|(peer, nick)| PeerInfo::new(peer.clone(), nick.clone()))
            .collect()
    }

    /// Replace the roster wholesale (observer receiving PLAYERS).
    pub fn replace_roster(&mut self, players: Vec<PeerInfo>) {
        let local = self.nickname().to_string();
        self.roster = players.into_iter().map(|p| (p.peer_id, p.nickname)).collect();
        self.roster.entry(self.local_peer.clone()).or_insert(local);
    }

    // =========================================================================
    // Latency & UI lines
    // =========================================================================

    /// Record a round trip measured from a PONG.
    pub fn record_rtt(&mut self, peer: &PeerId, rtt_ms: u32) {
        self.rtt_ms.insert(peer.clone(), rtt_ms);
    }

    /// Last round trip to `peer`.
    pub fn rtt(&self, peer: &PeerId) -> Option<u32> {
        self.rtt_ms.get(peer).copied()
    }

    /// Queue a line for the UI.
    pub fn push_notice(&mut self, line: ChatLine) {
        self.notices.push(line);
    }

    /// Take queued UI lines.
    pub fn drain_notices(&mut self) -> Vec<ChatLine> {
        std::mem::take(&mut self.notices)
    }
}
