//! WebSocket Transport Bridge
//!
//! Moves frames between sockets and the single task that owns the session.
//! Every connection becomes an ordered stream of [`TransportEvent`]s:
//! one `Open` carrying the outbound link, any number of `Data`, one `Close`.
//! Nothing here decodes or interprets payloads.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_hdr_async, connect_async, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};

use crate::game::state::PeerId;
use crate::network::codec::Payload;
use crate::network::session::ChannelLink;

/// Peer id the observer side uses for its host connection.
pub const HOST_PEER: &str = "host";

/// Longest peer id accepted from a connect URL.
const MAX_PEER_ID_LEN: usize = 64;

/// One connection-level event, in order per connection.
#[derive(Debug)]
pub enum TransportEvent {
    /// Connection ready; attach `link` to the session.
    Open {
        /// Id unique among live connections
        peer: PeerId,
        /// Outbound half
        link: ChannelLink,
    },
    /// Inbound frame.
    Data {
        /// Sending connection
        peer: PeerId,
        /// Undecoded frame
        payload: Payload,
    },
    /// Connection gone.
    Close {
        /// Closed connection
        peer: PeerId,
    },
}

/// Connection-level failures, shown to the user as a status line.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Another match already uses this address.
    #[error("Room {0} is already taken")]
    AddressInUse(SocketAddr),

    /// Failed to bind.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// Could not reach the host.
    #[error("Host {url} is unreachable: {source}")]
    Unreachable {
        /// URL as given
        url: String,
        /// Handshake failure
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address; doubles as the room name.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent observers.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 16,
        }
    }
}

/// Bind the host's listener.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::AddrInUse => ServerError::AddressInUse(addr),
        _ => ServerError::BindFailed(e),
    })
}

/// Host-side acceptor feeding transport events to the session task.
pub struct TransportServer {
    config: ServerConfig,
    events: mpsc::UnboundedSender<TransportEvent>,
    connections: Arc<AtomicUsize>,
    /// Peer ids held by live connections or reserved by the host
    live_peers: Arc<RwLock<BTreeSet<PeerId>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl TransportServer {
    /// Create an acceptor.
    pub fn new(config: ServerConfig, events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            events,
            connections: Arc::new(AtomicUsize::new(0)),
            live_peers: Arc::new(RwLock::new(BTreeSet::new())),
            shutdown_tx,
        }
    }

    /// Keep `peer` from being claimed by any connection.
    pub async fn reserve(&self, peer: &PeerId) {
        self.live_peers.write().await.insert(peer.clone());
    }

    /// Accept connections until shutdown.
    #[instrument(skip(self, listener))]
    pub async fn run(&self, listener: TcpListener) -> Result<(), ServerError> {
        info!("Listening on {}", listener.local_addr()?);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.connections.load(Ordering::Relaxed) >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => error!("Accept error: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }
        Ok(())
    }

    fn handle_connection<S>(&self, stream: S, addr: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let events = self.events.clone();
        let connections = self.connections.clone();
        let live_peers = self.live_peers.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut requested: Option<String> = None;
            let handshake = accept_hdr_async(stream, |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                requested = request.uri().query().and_then(peer_from_query);
                Ok(response)
            });
            let ws = match handshake.await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };
            let peer = claim_peer(&live_peers, requested).await;
            info!(peer = %peer, "New connection from {}", addr);

            connections.fetch_add(1, Ordering::Relaxed);
            let interrupted = tokio::select! {
                _ = pump(ws, peer.clone(), events.clone()) => false,
                _ = shutdown_rx.recv() => true,
            };
            if interrupted {
                debug!("Connection {} closed by shutdown", addr);
                let _ = events.send(TransportEvent::Close { peer: peer.clone() });
            }
            // Released only after Close is queued, so a reuse opens after it
            live_peers.write().await.remove(&peer);
            connections.fetch_sub(1, Ordering::Relaxed);
        });
    }

    /// Stop accepting and drop every connection.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

/// Observer side: connect to a host and feed its frames as transport
/// events under [`HOST_PEER`]. `local_peer` travels in the URL so the host
/// files this connection under the observer's own id.
pub async fn connect(
    url: &str,
    local_peer: &PeerId,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> Result<tokio::task::JoinHandle<()>, ServerError> {
    let separator = if url.contains('?') { '&' } else { '?' };
    let full_url = format!("{url}{separator}peer={local_peer}");
    let (ws, _) = connect_async(full_url.as_str())
        .await
        .map_err(|source| ServerError::Unreachable { url: url.to_string(), source })?;
    info!("Connected to {}", url);
    Ok(tokio::spawn(pump(ws, PeerId::new(HOST_PEER), events)))
}

/// Take the requested id if no live connection holds it, else a fresh one.
async fn claim_peer(live_peers: &RwLock<BTreeSet<PeerId>>, requested: Option<String>) -> PeerId {
    let mut live = live_peers.write().await;
    let peer = match requested.map(PeerId::new) {
        Some(peer) if !live.contains(&peer) => peer,
        Some(taken) => {
            warn!(requested = %taken, "Peer id already connected, assigning a new one");
            PeerId::generate()
        }
        None => PeerId::generate(),
    };
    live.insert(peer.clone());
    peer
}

fn peer_from_query(query: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "peer")
        .map(|(_, value)| value.to_string())
        .filter(|id| !id.is_empty() && id.len() <= MAX_PEER_ID_LEN && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'))
}

/// Shuttle frames for one socket until either side closes.
async fn pump<S>(ws: WebSocketStream<S>, peer: PeerId, events: mpsc::UnboundedSender<TransportEvent>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_sender, mut ws_receiver) = ws.split();
    let (link, mut outbound) = ChannelLink::pair(peer.clone());
    if events.send(TransportEvent::Open { peer: peer.clone(), link }).is_err() {
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some(payload) = outbound.recv().await {
            let frame = match payload {
                Payload::Text(text) => WsMessage::Text(text),
                Payload::Bytes(bytes) => WsMessage::Binary(bytes),
                Payload::Blob(_) => continue,
            };
            if ws_sender.send(frame).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    while let Some(frame) = ws_receiver.next().await {
        let payload = match frame {
            Ok(WsMessage::Text(text)) => Payload::Text(text),
            Ok(WsMessage::Binary(bytes)) => Payload::Bytes(bytes),
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(peer = %peer, "WebSocket error: {}", e);
                break;
            }
        };
        if events.send(TransportEvent::Data { peer: peer.clone(), payload }).is_err() {
            break;
        }
    }

    writer.abort();
    let _ = events.send(TransportEvent::Close { peer });
}
