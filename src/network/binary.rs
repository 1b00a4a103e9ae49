//! Binary Codec
//!
//! Compact fixed-width form. One tag byte, then fields in wire order:
//! identifiers carry a `u8` length prefix and free text a `u16` one,
//! coordinates are `i16`, fractional values `f32`, all little-endian.
//! Lists carry a `u16` count (held powerup kinds a `u8` one). The INIT
//! layout blob carries a `u32` length.
//!
//! Nothing is rejected on encode: strings are clipped at a char boundary
//! and lists at their count width.

use super::codec::{CodecError, Payload, WireCodec, WireFormat};
use super::protocol::{
    ChatLine, DeltaMessage, InitMessage, Message, MessageKind, PeerInfo, TankConfig, TankConfigEntry,
};
use crate::game::events::{PowerupEvent, PowerupStatus};
use crate::game::input::InputState;
use crate::game::powerup::{PowerupKind, TargetScope};
use crate::game::snapshot::{BulletSnapshot, PowerupSnapshot, TankSnapshot, TankUpdate};
use crate::game::state::{GameSettings, PeerId, TankId};

/// Fixed-width binary codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl WireCodec for BinaryCodec {
    fn format(&self) -> WireFormat {
        WireFormat::Binary
    }

    fn encode(&self, message: &Message) -> Payload {
        Payload::Bytes(self.encode_bytes(message))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message, CodecError> {
        let (&tag, body) = bytes.split_first().ok_or(CodecError::Empty)?;
        let kind = MessageKind::from_binary_tag(tag).ok_or(CodecError::UnknownBinaryTag(tag))?;
        let mut r = Reader { inp: body, kind: kind.name() };

        let message = match kind {
            MessageKind::Init => Message::Init(read_init(&mut r)?),
            MessageKind::Delta => Message::Delta(read_delta(&mut r)?),
            MessageKind::Input => Message::Input {
                tank_id: TankId(r.id()?),
                input: InputState::from_flags(r.u8()?),
            },
            MessageKind::Ping => Message::Ping { timestamp: r.u32()? },
            MessageKind::Pong => Message::Pong { timestamp: r.u32()? },
            MessageKind::Players => Message::Players(r.list(read_peer)?),
            MessageKind::Nick => Message::Nick(read_peer(&mut r)?),
            MessageKind::Chat => Message::Chat(read_line(&mut r)?),
            MessageKind::Notify => Message::Notify(read_line(&mut r)?),
            MessageKind::PowerupEvent => Message::PowerupEvent(read_event(&mut r)?),
            MessageKind::Spawn => Message::Spawn(read_powerup(&mut r)?),
            MessageKind::TankConfig => Message::TankConfig(TankConfig {
                owner: PeerId(r.id()?),
                entries: r.list(read_config_entry)?,
            }),
        };

        if !r.inp.is_empty() {
            return Err(CodecError::TrailingBytes(r.inp.len()));
        }
        Ok(message)
    }
}

impl BinaryCodec {
    /// Encode into bytes.
    pub fn encode_bytes(&self, message: &Message) -> Vec<u8> {
        let mut w = Writer(vec![message.kind().binary_tag()]);
        match message {
            Message::Init(init) => write_init(&mut w, init),
            Message::Delta(delta) => write_delta(&mut w, delta),
            Message::Input { tank_id, input } => {
                w.id(tank_id.as_str());
                w.u8(input.flags);
            }
            Message::Ping { timestamp } | Message::Pong { timestamp } => w.u32(*timestamp),
            Message::Players(players) => w.list(players, write_peer),
            Message::Nick(peer) => write_peer(&mut w, peer),
            Message::Chat(line) | Message::Notify(line) => {
                w.id(line.nickname.as_deref().unwrap_or_default());
                w.text(&line.text);
            }
            Message::PowerupEvent(event) => write_event(&mut w, event),
            Message::Spawn(powerup) => write_powerup(&mut w, powerup),
            Message::TankConfig(config) => {
                w.id(config.owner.as_str());
                w.list(&config.entries, write_config_entry);
            }
        }
        w.0
    }
}

/// Longest prefix of `s` within `max` bytes ending on a char boundary.
fn clip(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// =============================================================================
// WRITER
// =============================================================================

struct Writer(Vec<u8>);

impl Writer {
    fn u8(&mut self, v: u8) {
        self.0.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    fn i16(&mut self, v: i16) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    fn f32(&mut self, v: f32) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    fn bool(&mut self, v: bool) {
        self.0.push(v as u8);
    }

    fn id(&mut self, s: &str) {
        let s = clip(s, u8::MAX as usize);
        self.u8(s.len() as u8);
        self.0.extend_from_slice(s.as_bytes());
    }

    fn text(&mut self, s: &str) {
        let s = clip(s, u16::MAX as usize);
        self.u16(s.len() as u16);
        self.0.extend_from_slice(s.as_bytes());
    }

    fn blob(&mut self, bytes: &[u8]) {
        let bytes = &bytes[..bytes.len().min(u32::MAX as usize)];
        self.u32(bytes.len() as u32);
        self.0.extend_from_slice(bytes);
    }

    fn list<T>(&mut self, items: &[T], write: impl Fn(&mut Writer, &T)) {
        let items = &items[..items.len().min(u16::MAX as usize)];
        self.u16(items.len() as u16);
        for item in items {
            write(self, item);
        }
    }

    fn kinds(&mut self, kinds: &[PowerupKind]) {
        let kinds = &kinds[..kinds.len().min(u8::MAX as usize)];
        self.u8(kinds.len() as u8);
        for kind in kinds {
            self.u8(*kind as u8);
        }
    }
}

// =============================================================================
// READER
// =============================================================================

struct Reader<'a> {
    inp: &'a [u8],
    kind: &'static str,
}

impl<'a> Reader<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        if self.inp.len() < N {
            return Err(CodecError::Truncated);
        }
        let (a, b) = self.inp.split_at(N);
        self.inp = b;
        let mut buf = [0u8; N];
        buf.copy_from_slice(a);
        Ok(buf)
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.inp.len() < len {
            return Err(CodecError::Truncated);
        }
        let (a, b) = self.inp.split_at(len);
        self.inp = b;
        Ok(a)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.take::<2>()?))
    }

    fn i16(&mut self) -> Result<i16, CodecError> {
        Ok(i16::from_le_bytes(self.take::<2>()?))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.take::<4>()?))
    }

    fn f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_le_bytes(self.take::<4>()?))
    }

    fn bool(&mut self, field: &'static str) -> Result<bool, CodecError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(self.invalid(field)),
        }
    }

    fn utf8(&mut self, len: usize) -> Result<String, CodecError> {
        let raw = self.bytes(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    fn id(&mut self) -> Result<String, CodecError> {
        let len = self.u8()? as usize;
        self.utf8(len)
    }

    fn text(&mut self) -> Result<String, CodecError> {
        let len = self.u16()? as usize;
        self.utf8(len)
    }

    fn blob(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.u32()? as usize;
        Ok(self.bytes(len)?.to_vec())
    }

    fn list<T>(&mut self, read: impl Fn(&mut Reader<'a>) -> Result<T, CodecError>) -> Result<Vec<T>, CodecError> {
        let count = self.u16()? as usize;
        // Every item is at least one byte; never trust the count for allocation
        let mut items = Vec::with_capacity(count.min(self.inp.len()));
        for _ in 0..count {
            items.push(read(self)?);
        }
        Ok(items)
    }

    fn powerup_kind(&mut self) -> Result<PowerupKind, CodecError> {
        let index = self.u8()?;
        PowerupKind::from_index(index).ok_or(self.invalid("powerup kind"))
    }

    fn kinds(&mut self) -> Result<Vec<PowerupKind>, CodecError> {
        let count = self.u8()?;
        (0..count).map(|_| self.powerup_kind()).collect()
    }

    fn invalid(&self, field: &'static str) -> CodecError {
        CodecError::InvalidField { kind: self.kind, field }
    }
}

// =============================================================================
// RECORDS
// =============================================================================

fn write_peer(w: &mut Writer, peer: &PeerInfo) {
    w.id(peer.peer_id.as_str());
    w.id(&peer.nickname);
}

fn read_peer(r: &mut Reader<'_>) -> Result<PeerInfo, CodecError> {
    Ok(PeerInfo::new(PeerId(r.id()?), r.id()?))
}

fn read_line(r: &mut Reader<'_>) -> Result<ChatLine, CodecError> {
    let nickname = r.id()?;
    Ok(ChatLine::new(Some(nickname), r.text()?))
}

fn write_powerup(w: &mut Writer, p: &PowerupSnapshot) {
    w.u32(p.id);
    w.u8(p.kind as u8);
    w.i16(p.x);
    w.i16(p.y);
    w.u16(p.size);
    w.id(&p.icon);
    w.id(&p.colour);
}

fn read_powerup(r: &mut Reader<'_>) -> Result<PowerupSnapshot, CodecError> {
    Ok(PowerupSnapshot {
        id: r.u32()?,
        kind: r.powerup_kind()?,
        x: r.i16()?,
        y: r.i16()?,
        size: r.u16()?,
        icon: r.id()?,
        colour: r.id()?,
    })
}

fn write_tank(w: &mut Writer, t: &TankSnapshot) {
    w.id(t.id.as_str());
    w.id(t.owner.as_str());
    w.i16(t.x);
    w.i16(t.y);
    w.f32(t.rotation);
    w.u16(t.width);
    w.u16(t.height);
    w.id(&t.colour);
    w.u32(t.score);
    w.bool(t.alive);
    w.kinds(&t.powerups);
}

fn read_tank(r: &mut Reader<'_>) -> Result<TankSnapshot, CodecError> {
    Ok(TankSnapshot {
        id: TankId(r.id()?),
        owner: PeerId(r.id()?),
        x: r.i16()?,
        y: r.i16()?,
        rotation: r.f32()?,
        width: r.u16()?,
        height: r.u16()?,
        colour: r.id()?,
        score: r.u32()?,
        alive: r.bool("alive")?,
        powerups: r.kinds()?,
        bullets: Vec::new(),
    })
}

fn write_update(w: &mut Writer, t: &TankUpdate) {
    w.id(t.id.as_str());
    w.i16(t.x);
    w.i16(t.y);
    w.f32(t.rotation);
    w.u32(t.score);
    w.bool(t.alive);
    w.kinds(&t.powerups);
}

fn read_update(r: &mut Reader<'_>) -> Result<TankUpdate, CodecError> {
    Ok(TankUpdate {
        id: TankId(r.id()?),
        x: r.i16()?,
        y: r.i16()?,
        rotation: r.f32()?,
        score: r.u32()?,
        alive: r.bool("alive")?,
        powerups: r.kinds()?,
    })
}

fn write_bullet(w: &mut Writer, b: &BulletSnapshot) {
    w.i16(b.x);
    w.i16(b.y);
    w.f32(b.vx);
    w.f32(b.vy);
    w.id(&b.colour);
    w.f32(b.radius);
}

fn read_bullet(r: &mut Reader<'_>) -> Result<BulletSnapshot, CodecError> {
    Ok(BulletSnapshot {
        x: r.i16()?,
        y: r.i16()?,
        vx: r.f32()?,
        vy: r.f32()?,
        colour: r.id()?,
        radius: r.f32()?,
    })
}

fn write_event(w: &mut Writer, e: &PowerupEvent) {
    w.u8(e.kind as u8);
    w.u8(e.status as u8);
    w.u8(e.scope as u8);
    w.id(e.tank_id.as_str());
    w.u32(e.powerup_id);
}

fn read_event(r: &mut Reader<'_>) -> Result<PowerupEvent, CodecError> {
    let kind = r.powerup_kind()?;
    let status = PowerupStatus::from_index(r.u8()?).ok_or(r.invalid("status"))?;
    let scope = TargetScope::from_index(r.u8()?).ok_or(r.invalid("scope"))?;
    Ok(PowerupEvent {
        status,
        kind,
        scope,
        tank_id: TankId(r.id()?),
        powerup_id: r.u32()?,
    })
}

fn write_config_entry(w: &mut Writer, e: &TankConfigEntry) {
    w.id(&e.panel_id);
    w.id(&e.colour);
    for key in &e.keys {
        w.id(key);
    }
}

fn read_config_entry(r: &mut Reader<'_>) -> Result<TankConfigEntry, CodecError> {
    Ok(TankConfigEntry {
        panel_id: r.id()?,
        colour: r.id()?,
        keys: [r.id()?, r.id()?, r.id()?, r.id()?, r.id()?, r.id()?],
    })
}

// =============================================================================
// INIT & DELTA
// =============================================================================

fn write_init(w: &mut Writer, init: &InitMessage) {
    let s = &init.settings;
    w.u32(init.seq);
    w.u16(s.grid_width);
    w.u16(s.grid_height);
    w.u16(s.wall_thickness);
    w.f32(s.move_speed);
    w.f32(s.rotation_speed);
    w.f32(s.bullet_speed);
    w.u8(s.bullet_limit);
    w.u8(s.bounce_limit);
    w.u32(s.powerup_interval_ms);
    w.u8(s.powerup_limit);
    w.u32(s.powerup_duration_ms);
    w.bool(s.friendly_fire);
    w.blob(&init.layout);
    w.list(&init.powerups, write_powerup);
    w.list(&init.tanks, write_tank);
}

fn read_init(r: &mut Reader<'_>) -> Result<InitMessage, CodecError> {
    let seq = r.u32()?;
    let settings = GameSettings {
        grid_width: r.u16()?,
        grid_height: r.u16()?,
        wall_thickness: r.u16()?,
        move_speed: r.f32()?,
        rotation_speed: r.f32()?,
        bullet_speed: r.f32()?,
        bullet_limit: r.u8()?,
        bounce_limit: r.u8()?,
        powerup_interval_ms: r.u32()?,
        powerup_limit: r.u8()?,
        powerup_duration_ms: r.u32()?,
        friendly_fire: r.bool("friendly fire")?,
    };
    Ok(InitMessage {
        seq,
        settings,
        layout: r.blob()?,
        powerups: r.list(read_powerup)?,
        tanks: r.list(read_tank)?,
    })
}

fn write_delta(w: &mut Writer, delta: &DeltaMessage) {
    w.u32(delta.seq);
    w.list(&delta.tanks, write_update);
    w.list(&delta.removed, |w, id| w.id(id.as_str()));
    w.list(&delta.bullets, write_bullet);
    match &delta.powerups {
        Some(powerups) => {
            w.u8(1);
            w.list(powerups, write_powerup);
        }
        None => w.u8(0),
    }
    w.list(&delta.events, write_event);
}

fn read_delta(r: &mut Reader<'_>) -> Result<DeltaMessage, CodecError> {
    Ok(DeltaMessage {
        seq: r.u32()?,
        tanks: r.list(read_update)?,
        removed: r.list(|r| r.id().map(TankId))?,
        bullets: r.list(read_bullet)?,
        powerups: match r.u8()? {
            0 => None,
            1 => Some(r.list(read_powerup)?),
            _ => return Err(r.invalid("powerups flag")),
        },
        events: r.list(read_event)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: &Message) -> Message {
        BinaryCodec.decode(&BinaryCodec.encode_bytes(message)).unwrap()
    }

    #[test]
    fn test_ping_layout() {
        let bytes = BinaryCodec.encode_bytes(&Message::Ping { timestamp: 123_456 });
        assert_eq!(bytes, vec![4, 0x40, 0xE2, 0x01, 0x00]);
    }

    #[test]
    fn test_input_layout() {
        let message = Message::Input { tank_id: TankId::from("p-0"), input: InputState::from_flags(0b10_0001) };
        let bytes = BinaryCodec.encode_bytes(&message);
        assert_eq!(bytes, vec![3, 3, b'p', b'-', b'0', 0b10_0001]);
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn test_long_identifier_clipped_on_char_boundary() {
        let nickname = "é".repeat(200); // 400 bytes
        let message = Message::Nick(PeerInfo::new(PeerId::new("p"), nickname));
        match roundtrip(&message) {
            Message::Nick(peer) => {
                assert_eq!(peer.nickname.len(), 254);
                assert!(peer.nickname.chars().all(|c| c == 'é'));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_chat_text_uses_wide_prefix() {
        let text = "x".repeat(1_000);
        let message = Message::Chat(ChatLine::new(Some("bob".into()), text));
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn test_delta_roundtrip() {
        let delta = Message::Delta(DeltaMessage {
            seq: 9,
            tanks: vec![TankUpdate {
                id: TankId::from("a-0"),
                x: -5,
                y: 300,
                rotation: 1.25,
                score: 3,
                alive: false,
                powerups: vec![PowerupKind::Ghost],
            }],
            removed: vec![TankId::from("b-1")],
            bullets: vec![BulletSnapshot { x: 1, y: 2, vx: 0.5, vy: -4.0, colour: "#fff".into(), radius: 3.0 }],
            powerups: Some(vec![]),
            events: vec![PowerupEvent::deactivate(PowerupKind::Ghost, TankId::from("a-0"), 4)],
        });
        assert_eq!(roundtrip(&delta), delta);
    }

    #[test]
    fn test_truncated_and_trailing_rejected() {
        assert_eq!(BinaryCodec.decode(&[]), Err(CodecError::Empty));
        assert_eq!(BinaryCodec.decode(&[4, 1, 2]), Err(CodecError::Truncated));
        assert_eq!(BinaryCodec.decode(&[4, 0, 0, 0, 0, 9]), Err(CodecError::TrailingBytes(1)));
        assert_eq!(BinaryCodec.decode(&[99]), Err(CodecError::UnknownBinaryTag(99)));
    }

    #[test]
    fn test_huge_list_count_does_not_allocate() {
        // PLAYERS claiming 65535 entries with no bytes behind it
        assert_eq!(BinaryCodec.decode(&[6, 0xFF, 0xFF]), Err(CodecError::Truncated));
    }
}
