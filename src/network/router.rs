//! Protocol Router
//!
//! Connection events come in as open/data/close per peer. Data is hydrated
//! into a [`Message`] and handed to the role handler (host or observer).
//! PING/PONG are answered here for both roles.
//!
//! Blob payloads resolve later; their bytes re-enter dispatch from
//! [`Router::poll_deferred`] with no ordering guarantee relative to the
//! messages that arrived in between.

use std::future::Future;
use std::pin::Pin;

use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::FutureExt;
use tracing::debug;

use crate::game::state::PeerId;
use crate::network::codec::{hydrate, Hydrated, Payload};
use crate::network::protocol::Message;
use crate::network::session::{Role, Session};

/// Role-specific message handling.
pub trait RoleHandler {
    /// Role this handler implements.
    fn role(&self) -> Role;

    /// A connection opened.
    fn on_open(&mut self, peer: &PeerId, session: &mut Session);

    /// A decoded message arrived. PING and PONG never reach here.
    fn on_message(&mut self, from: &PeerId, message: Message, session: &mut Session);

    /// A connection closed. The session has already dropped the link.
    fn on_close(&mut self, peer: &PeerId, nickname: Option<String>, session: &mut Session);
}

type PendingBlob = Pin<Box<dyn Future<Output = (PeerId, Option<Vec<u8>>)> + Send>>;

/// Dispatches connection events to a role handler.
pub struct Router<H: RoleHandler> {
    handler: H,
    pending: FuturesUnordered<PendingBlob>,
}

impl<H: RoleHandler> Router<H> {
    /// Wrap a role handler.
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            pending: FuturesUnordered::new(),
        }
    }

    /// The role handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// The role handler, mutably.
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Blob payloads still waiting for their bytes.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// A connection opened.
    pub fn on_open(&mut self, peer: &PeerId, session: &mut Session) {
        self.handler.on_open(peer, session);
    }

    /// A payload arrived on `peer`'s connection.
    pub fn on_data(&mut self, peer: &PeerId, payload: Payload, session: &mut Session, now_ms: u64) {
        match hydrate(payload) {
            Hydrated::Ready(message) => self.dispatch(peer, message, session, now_ms),
            Hydrated::Deferred(future) => {
                let peer = peer.clone();
                self.pending.push(Box::pin(future.map(move |bytes| (peer, bytes))));
            }
            Hydrated::Dropped(e) => debug!(peer = %peer, error = %e, "Dropped undecodable payload"),
        }
    }

    /// A connection closed.
    pub fn on_close(&mut self, peer: &PeerId, session: &mut Session) {
        let nickname = session.purge(peer);
        self.handler.on_close(peer, nickname, session);
    }

    /// Dispatch every blob whose bytes have resolved. Returns how many.
    pub fn poll_deferred(&mut self, session: &mut Session, now_ms: u64) -> usize {
        let mut resolved = 0;
        while let Some(Some((peer, bytes))) = self.pending.next().now_or_never() {
            resolved += 1;
            self.redispatch(&peer, bytes, session, now_ms);
        }
        resolved
    }

    /// Wait for the next blob to resolve and dispatch it.
    ///
    /// Returns immediately when nothing is pending.
    pub async fn next_deferred(&mut self, session: &mut Session, now_ms: u64) -> bool {
        match self.pending.next().await {
            Some((peer, bytes)) => {
                self.redispatch(&peer, bytes, session, now_ms);
                true
            }
            None => false,
        }
    }

    fn redispatch(&mut self, peer: &PeerId, bytes: Option<Vec<u8>>, session: &mut Session, now_ms: u64) {
        if !session.is_connected(peer) {
            debug!(peer = %peer, "Blob resolved after disconnect");
            return;
        }
        match bytes {
            Some(bytes) => self.on_data(peer, Payload::Bytes(bytes), session, now_ms),
            None => debug!(peer = %peer, "Blob source failed"),
        }
    }

    /// Send a latency probe to every connection.
    pub fn ping_all(&self, session: &Session, now_ms: u64) -> usize {
        session.broadcast(&Message::Ping { timestamp: wire_timestamp(now_ms) })
    }

    fn dispatch(&mut self, from: &PeerId, message: Message, session: &mut Session, now_ms: u64) {
        #[cfg(feature = "debug-tracing")]
        tracing::trace!(peer = %from, kind = message.kind().name(), role = ?self.handler.role(), "Dispatch");

        match message {
            Message::Ping { timestamp } => {
                if let Err(e) = session.send_to(from, &Message::Pong { timestamp }) {
                    debug!(error = %e, "PONG not sent");
                }
            }
            Message::Pong { timestamp } => {
                let rtt = wire_timestamp(now_ms).wrapping_sub(timestamp);
                session.record_rtt(from, rtt);
                debug!(peer = %from, rtt_ms = rtt, "Round trip");
            }
            other => self.handler.on_message(from, other, session),
        }
    }
}

/// Millisecond clock truncated to the 32-bit wire timestamp.
pub fn wire_timestamp(now_ms: u64) -> u32 {
    now_ms as u32
}
