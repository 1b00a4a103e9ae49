//! Input Relay
//!
//! Turns local key events into per-tank [`InputState`] and forwards each
//! change to an [`InputSink`]: the host applies it directly, an observer
//! sends an INPUT message to the host.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::game::input::{Action, InputState};
use crate::game::state::{PeerId, TankId};
use crate::network::protocol::{Message, TankConfig};
use crate::network::session::Session;

/// Receives coalesced input for a tank.
pub trait InputSink {
    /// Deliver the new input for `tank`. Returns false if it went nowhere.
    fn submit(&mut self, tank: &TankId, input: InputState, session: &Session) -> bool;
}

/// Observer-side sink: sends INPUT to the host connection.
#[derive(Debug, Clone)]
pub struct RemoteHost {
    host: PeerId,
}

impl RemoteHost {
    /// Sink forwarding to `host`.
    pub fn new(host: PeerId) -> Self {
        Self { host }
    }
}

impl InputSink for RemoteHost {
    fn submit(&mut self, tank: &TankId, input: InputState, session: &Session) -> bool {
        let message = Message::Input { tank_id: tank.clone(), input };
        match session.send_to(&self.host, &message) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "INPUT not sent");
                false
            }
        }
    }
}

/// Key name to (tank, action) lookup.
#[derive(Debug, Clone, Default)]
pub struct KeyBindings {
    keys: BTreeMap<String, (TankId, Action)>,
}

impl KeyBindings {
    /// Bindings for a peer's configured tanks. Tank ids follow the host's
    /// `"<peer>-<n>"` assignment in entry order. A key bound twice keeps
    /// its first binding.
    pub fn from_config(config: &TankConfig) -> Self {
        let mut keys = BTreeMap::new();
        for (index, entry) in config.entries.iter().enumerate() {
            let tank = TankId::for_peer(&config.owner, index as u32);
            for (key, action) in entry.keys.iter().zip(Action::ALL) {
                if key.is_empty() {
                    continue;
                }
                if keys.contains_key(key) {
                    debug!(key = %key, "Key already bound");
                    continue;
                }
                keys.insert(key.clone(), (tank.clone(), action));
            }
        }
        Self { keys }
    }

    /// What `key` controls.
    pub fn lookup(&self, key: &str) -> Option<&(TankId, Action)> {
        self.keys.get(key)
    }

    /// Number of bound keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Coalesces key events into per-tank input.
#[derive(Debug, Clone, Default)]
pub struct InputRelay {
    bindings: KeyBindings,
    inputs: BTreeMap<TankId, InputState>,
}

impl InputRelay {
    /// Relay for the given bindings.
    pub fn new(bindings: KeyBindings) -> Self {
        Self { bindings, inputs: BTreeMap::new() }
    }

    /// Current input of a local tank.
    pub fn input(&self, tank: &TankId) -> InputState {
        self.inputs.get(tank).copied().unwrap_or_default()
    }

    /// Record a key press or release.
    ///
    /// Returns the tank and its new input when the event changed anything.
    pub fn key_event(&mut self, key: &str, pressed: bool) -> Option<(TankId, InputState)> {
        let (tank, action) = self.bindings.lookup(key)?;
        let input = self.inputs.entry(tank.clone()).or_default();
        input.set(*action, pressed).then(|| (tank.clone(), *input))
    }

    /// Record a key event and forward any change to `sink`.
    pub fn relay(&mut self, key: &str, pressed: bool, sink: &mut dyn InputSink, session: &Session) -> bool {
        match self.key_event(key, pressed) {
            Some((tank, input)) => sink.submit(&tank, input, session),
            None => false,
        }
    }

    /// Release every key, e.g. when the window loses focus.
    pub fn release_all(&mut self, sink: &mut dyn InputSink, session: &Session) {
        for (tank, input) in self.inputs.iter_mut() {
            if !input.is_idle() {
                *input = InputState::default();
                sink.submit(tank, *input, session);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::codec::{hydrate, Hydrated, WireFormat};
    use crate::network::protocol::TankConfigEntry;
    use crate::network::session::{ChannelLink, Role};

    fn config() -> TankConfig {
        TankConfig {
            owner: PeerId::new("obs"),
            entries: vec![
                TankConfigEntry {
                    panel_id: "p1".into(),
                    colour: "blue".into(),
                    keys: ["ArrowUp", "ArrowRight", "ArrowDown", "ArrowLeft", "m", "n"].map(String::from),
                },
                TankConfigEntry {
                    panel_id: "p2".into(),
                    colour: "green".into(),
                    keys: ["w", "d", "s", "a", "q", "m"].map(String::from),
                },
            ],
        }
    }

    #[test]
    fn test_bindings_follow_entry_order() {
        let bindings = KeyBindings::from_config(&config());
        assert_eq!(bindings.lookup("w"), Some(&(TankId::from("obs-1"), Action::Up)));
        assert_eq!(bindings.lookup("n"), Some(&(TankId::from("obs-0"), Action::Special)));
        // "m" stays with the first tank
        assert_eq!(bindings.lookup("m"), Some(&(TankId::from("obs-0"), Action::Fire)));
        assert_eq!(bindings.len(), 11);
    }

    #[test]
    fn test_key_events_coalesce() {
        let mut relay = InputRelay::new(KeyBindings::from_config(&config()));
        let (tank, input) = relay.key_event("ArrowUp", true).unwrap();
        assert_eq!(tank, TankId::from("obs-0"));
        assert!(input.is_set(Action::Up));

        // Repeat press is not a change
        assert_eq!(relay.key_event("ArrowUp", true), None);
        assert_eq!(relay.key_event("unbound", true), None);

        let (_, input) = relay.key_event("m", true).unwrap();
        assert_eq!(input.flags, Action::Up.bit() | Action::Fire.bit());
    }

    #[test]
    fn test_remote_host_sends_input() {
        let mut session = Session::new(Role::Observer, PeerId::new("obs"), "o", WireFormat::Binary);
        let (link, mut rx) = ChannelLink::pair(PeerId::new("host"));
        session.attach(PeerId::new("host"), Box::new(link)).unwrap();

        let mut relay = InputRelay::new(KeyBindings::from_config(&config()));
        let mut sink = RemoteHost::new(PeerId::new("host"));
        assert!(relay.relay("a", true, &mut sink, &session));

        match hydrate(rx.try_recv().unwrap()) {
            Hydrated::Ready(Message::Input { tank_id, input }) => {
                assert_eq!(tank_id, TankId::from("obs-1"));
                assert!(input.is_set(Action::Left));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_release_all() {
        let mut session = Session::new(Role::Observer, PeerId::new("obs"), "o", WireFormat::Text);
        let (link, mut rx) = ChannelLink::pair(PeerId::new("host"));
        session.attach(PeerId::new("host"), Box::new(link)).unwrap();
        let mut relay = InputRelay::new(KeyBindings::from_config(&config()));
        let mut sink = RemoteHost::new(PeerId::new("host"));

        relay.relay("w", true, &mut sink, &session);
        relay.release_all(&mut sink, &session);

        assert!(relay.input(&TankId::from("obs-1")).is_idle());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
