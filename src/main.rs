//! Tank Arena Sync
//!
//! `tank-arena host`              open a room and run the authoritative loop
//! `tank-arena join <url> [nick]` spectate a room and log the projection
//! `tank-arena demo`              host and observer in one process, no sockets

use std::time::Instant;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};

use tank_arena::config::HostConfig;
use tank_arena::game::map::WallLayout;
use tank_arena::game::state::{MatchState, PeerId};
use tank_arena::network::codec::WireFormat;
use tank_arena::network::host::HostLoop;
use tank_arena::network::observer::ObserverProjector;
use tank_arena::network::protocol::{TankConfig, TankConfigEntry};
use tank_arena::network::router::{RoleHandler, Router};
use tank_arena::network::server::{self, ServerConfig, TransportEvent, TransportServer};
use tank_arena::network::session::{ChannelLink, Role, Session};
use tank_arena::VERSION;

/// Milliseconds between latency probes.
const PING_INTERVAL_MS: u64 = 2_000;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load .env locally; safe to ignore when not present.
    let _ = dotenvy::dotenv();
    init_tracing();
    info!("Tank Arena Sync v{}", VERSION);

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("host") => run_host().await,
        Some("join") => {
            let Some(url) = args.get(1) else {
                bail!("usage: tank-arena join <url> [nickname]");
            };
            let nickname = args.get(2).cloned().unwrap_or_else(|| "observer".to_string());
            run_join(url, &nickname).await
        }
        Some("demo") | None => run_demo(),
        Some(other) => bail!("unknown mode {other:?}; expected host, join or demo"),
    }
}

fn local_config(owner: &PeerId, colour: &str) -> TankConfig {
    TankConfig {
        owner: owner.clone(),
        entries: vec![TankConfigEntry {
            panel_id: "panel-1".into(),
            colour: colour.into(),
            keys: ["ArrowUp", "ArrowRight", "ArrowDown", "ArrowLeft", "m", "n"].map(String::from),
        }],
    }
}

fn match_state(config: &HostConfig, seed: u64) -> MatchState {
    let layout = WallLayout::open(config.settings.grid_width, config.settings.grid_height);
    MatchState::new(config.settings.clone(), layout, seed)
}

fn handle_event<H: RoleHandler>(router: &mut Router<H>, session: &mut Session, event: TransportEvent, now_ms: u64) {
    match event {
        TransportEvent::Open { peer, link } => match session.attach(peer.clone(), Box::new(link)) {
            Ok(()) => router.on_open(&peer, session),
            Err(e) => warn!(error = %e, "Connection ignored"),
        },
        TransportEvent::Data { peer, payload } => router.on_data(&peer, payload, session, now_ms),
        TransportEvent::Close { peer } => router.on_close(&peer, session),
    }
}

fn elapsed_ms(clock: Instant) -> u64 {
    u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn log_notices(session: &mut Session) {
    for line in session.drain_notices() {
        match line.nickname {
            Some(nick) => info!("<{}> {}", nick, line.text),
            None => info!("* {}", line.text),
        }
    }
}

async fn run_host() -> Result<()> {
    let config = HostConfig::from_env().context("Invalid configuration")?;
    let listener = server::bind(config.bind_addr)
        .await
        .with_context(|| format!("Cannot open room {}", config.bind_addr))?;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let transport = TransportServer::new(
        ServerConfig { bind_addr: config.bind_addr, max_connections: config.max_connections },
        events_tx,
    );

    let local = PeerId::generate();
    let mut session = Session::new(Role::Host, local.clone(), "host", config.wire_format);
    transport.reserve(&local).await;
    let seed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default();
    let mut host = HostLoop::new(match_state(&config, seed), config.broadcast_interval_ms);
    host.register_config(local_config(&local, "#d33"));

    let clock = Instant::now();
    host.start_match(0, &session);
    let mut router = Router::new(host);
    let mut ticker = tokio::time::interval(config.tick_interval());
    let mut last_ping = 0;

    let accept = transport.run(listener);
    tokio::pin!(accept);

    loop {
        tokio::select! {
            result = &mut accept => {
                result.context("Room closed")?;
                break;
            }
            _ = ticker.tick() => {
                let now = elapsed_ms(clock);
                router.poll_deferred(&mut session, now);
                router.handler_mut().tick(now, &session);
                if now.saturating_sub(last_ping) >= PING_INTERVAL_MS {
                    router.ping_all(&session, now);
                    last_ping = now;
                }
                log_notices(&mut session);
            }
            Some(event) = events_rx.recv() => {
                let now = elapsed_ms(clock);
                handle_event(&mut router, &mut session, event, now);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                transport.shutdown();
                break;
            }
        }
    }
    Ok(())
}

async fn run_join(url: &str, nickname: &str) -> Result<()> {
    let local = PeerId::generate();
    let format = std::env::var("TANK_WIRE_FORMAT")
        .ok()
        .map(|v| v.parse::<WireFormat>())
        .transpose()
        .map_err(anyhow::Error::msg)?
        .unwrap_or_default();
    let mut session = Session::new(Role::Observer, local.clone(), nickname, format);

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    server::connect(url, &local, events_tx)
        .await
        .with_context(|| format!("Cannot join {url}"))?;

    let mut router = Router::new(ObserverProjector::new(Some(local_config(&local, "#33d"))));
    let clock = Instant::now();
    let mut status = tokio::time::interval(std::time::Duration::from_millis(PING_INTERVAL_MS));

    loop {
        tokio::select! {
            Some(event) = events_rx.recv() => {
                let now = elapsed_ms(clock);
                let closed = matches!(event, TransportEvent::Close { .. });
                handle_event(&mut router, &mut session, event, now);
                log_notices(&mut session);
                if closed {
                    warn!("Host left");
                    break;
                }
            }
            _ = status.tick() => {
                let now = elapsed_ms(clock);
                router.poll_deferred(&mut session, now);
                router.ping_all(&session, now);
                if let Some(projection) = router.handler().projection() {
                    info!(
                        seq = projection.seq,
                        tanks = projection.tanks.len(),
                        bullets = projection.bullets.len(),
                        powerups = projection.powerups.len(),
                        rtt_ms = ?session.rtt(&PeerId::new(server::HOST_PEER)),
                        "Projection"
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

/// Host and observer wired through in-memory links.
fn run_demo() -> Result<()> {
    info!("=== Starting Demo Match ===");
    let config = HostConfig::default();
    let host_peer = PeerId::new("host");
    let obs_peer = PeerId::new("obs");

    let mut host_session = Session::new(Role::Host, host_peer.clone(), "host", WireFormat::Binary);
    let mut obs_session = Session::new(Role::Observer, obs_peer.clone(), "obs", WireFormat::Text);
    let (to_obs, mut obs_inbox) = ChannelLink::pair(obs_peer.clone());
    let (to_host, mut host_inbox) = ChannelLink::pair(PeerId::new(server::HOST_PEER));
    host_session.attach(obs_peer.clone(), Box::new(to_obs))?;
    obs_session.attach(PeerId::new(server::HOST_PEER), Box::new(to_host))?;

    let mut host = HostLoop::new(match_state(&config, 12345), config.broadcast_interval_ms);
    host.register_config(local_config(&host_peer, "#d33"));
    let mut host = Router::new(host);
    let mut observer = Router::new(ObserverProjector::new(Some(local_config(&obs_peer, "#33d"))));

    host.on_open(&obs_peer, &mut host_session);
    observer.on_open(&PeerId::new(server::HOST_PEER), &mut obs_session);

    let tick_ms = 1000 / config.tick_rate.max(1) as u64;
    let ticks = 10 * config.tick_rate as u64;
    let mut messages = 0usize;
    let mut bytes = 0usize;

    for t in 0..=ticks {
        let now = t * tick_ms;
        while let Ok(payload) = host_inbox.try_recv() {
            host.on_data(&obs_peer, payload, &mut host_session, now);
        }
        if t == 1 {
            host.handler_mut().start_match(now, &host_session);
        }
        host.handler_mut().tick(now, &host_session);

        while let Ok(payload) = obs_inbox.try_recv() {
            messages += 1;
            bytes += payload.len().unwrap_or(0);
            observer.on_data(&PeerId::new(server::HOST_PEER), payload, &mut obs_session, now);
        }
    }

    let Some(projection) = observer.handler().projection() else {
        bail!("observer never received INIT");
    };
    info!(
        messages,
        bytes,
        seq = projection.seq,
        tanks = projection.tanks.len(),
        host_tanks = host.handler().state().tanks.len(),
        "Demo complete"
    );
    for tank in projection.tanks.values() {
        info!("Tank {} at ({}, {}) score {}", tank.id, tank.x, tank.y, tank.score);
    }
    Ok(())
}
