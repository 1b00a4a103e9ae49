//! Text Codec
//!
//! Canonical delimited form. A message is its tag character followed by
//! `,`-joined fields; lists join items with `;` and record fields with `|`.
//! Held powerup kinds inside a tank record are joined with `+`.
//!
//! Strings are escaped with `%XX` for `%`, `,`, `;`, `|` and newline so no
//! delimiter can occur inside a field. Fractional values are truncated to
//! four decimals.

use std::str::FromStr;

use super::codec::{CodecError, Payload, WireCodec, WireFormat};
use super::protocol::{
    ChatLine, DeltaMessage, InitMessage, Message, MessageKind, PeerInfo, TankConfig, TankConfigEntry,
};
use crate::game::events::{PowerupEvent, PowerupStatus};
use crate::game::input::InputState;
use crate::game::powerup::{PowerupKind, TargetScope};
use crate::game::snapshot::{BulletSnapshot, PowerupSnapshot, TankSnapshot, TankUpdate};
use crate::game::state::{GameSettings, PeerId, TankId};

const FIELD: char = ',';
const ITEM: char = ';';
const RECORD: char = '|';
const KINDS: char = '+';

/// DELTA powerup field when the board list is unchanged.
const UNCHANGED: &str = "!";

/// Delimited text codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl WireCodec for TextCodec {
    fn format(&self) -> WireFormat {
        WireFormat::Text
    }

    fn encode(&self, message: &Message) -> Payload {
        Payload::Text(self.encode_string(message))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message, CodecError> {
        let text = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
        self.decode_str(text)
    }
}

impl TextCodec {
    /// Encode into the canonical string.
    pub fn encode_string(&self, message: &Message) -> String {
        let fields: Vec<String> = match message {
            Message::Init(init) => encode_init(init),
            Message::Delta(delta) => encode_delta(delta),
            Message::Input { tank_id, input } => vec![escape(tank_id.as_str()), input.flags.to_string()],
            Message::Ping { timestamp } | Message::Pong { timestamp } => vec![timestamp.to_string()],
            Message::Players(players) => vec![list(players, encode_peer)],
            Message::Nick(peer) => vec![escape(peer.peer_id.as_str()), escape(&peer.nickname)],
            Message::Chat(line) | Message::Notify(line) => vec![
                escape(line.nickname.as_deref().unwrap_or_default()),
                escape(&line.text),
            ],
            Message::PowerupEvent(event) => encode_event(event).split(RECORD).map(str::to_string).collect(),
            Message::Spawn(powerup) => encode_powerup(powerup).split(RECORD).map(str::to_string).collect(),
            Message::TankConfig(config) => vec![escape(config.owner.as_str()), list(&config.entries, encode_config_entry)],
        };

        let mut out = String::new();
        out.push(message.kind().text_tag());
        for field in fields {
            out.push(FIELD);
            out.push_str(&field);
        }
        out
    }

    /// Decode a canonical string.
    pub fn decode_str(&self, text: &str) -> Result<Message, CodecError> {
        let mut chars = text.chars();
        let tag = chars.next().ok_or(CodecError::Empty)?;
        let kind = MessageKind::from_text_tag(tag).ok_or(CodecError::UnknownTextTag(tag))?;
        let name = kind.name();
        let body = chars
            .as_str()
            .strip_prefix(FIELD)
            .ok_or(CodecError::InvalidField { kind: name, field: "separator" })?;

        match kind {
            MessageKind::Init => decode_init(body),
            MessageKind::Delta => decode_delta(body),
            MessageKind::Input => {
                let f = split_exact(body, FIELD, 2, name)?;
                Ok(Message::Input {
                    tank_id: TankId(unescape(f[0])?),
                    input: InputState::from_flags(number(f[1], name, "flags")?),
                })
            }
            MessageKind::Ping => {
                let f = split_exact(body, FIELD, 1, name)?;
                Ok(Message::Ping { timestamp: number(f[0], name, "timestamp")? })
            }
            MessageKind::Pong => {
                let f = split_exact(body, FIELD, 1, name)?;
                Ok(Message::Pong { timestamp: number(f[0], name, "timestamp")? })
            }
            MessageKind::Players => Ok(Message::Players(parse_list(body, decode_peer)?)),
            MessageKind::Nick => {
                let f = split_exact(body, FIELD, 2, name)?;
                Ok(Message::Nick(PeerInfo::new(PeerId(unescape(f[0])?), unescape(f[1])?)))
            }
            MessageKind::Chat => Ok(Message::Chat(decode_line(body, name)?)),
            MessageKind::Notify => Ok(Message::Notify(decode_line(body, name)?)),
            MessageKind::PowerupEvent => Ok(Message::PowerupEvent(decode_event_fields(
                &split_exact(body, FIELD, 5, name)?,
            )?)),
            MessageKind::Spawn => Ok(Message::Spawn(decode_powerup_fields(
                &split_exact(body, FIELD, 7, name)?,
            )?)),
            MessageKind::TankConfig => {
                let f = split_exact(body, FIELD, 2, name)?;
                Ok(Message::TankConfig(TankConfig {
                    owner: PeerId(unescape(f[0])?),
                    entries: parse_list(f[1], decode_config_entry)?,
                }))
            }
        }
    }
}

// =============================================================================
// ESCAPING & NUMBERS
// =============================================================================

/// Escape delimiter characters as `%XX`.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' | ',' | ';' | '|' | '\n' => out.push_str(&format!("%{:02X}", c as u32)),
            _ => out.push(c),
        }
    }
    out
}

/// Reverse [`escape`].
pub fn unescape(s: &str) -> Result<String, CodecError> {
    if !s.contains('%') {
        return Ok(s.to_string());
    }
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3).ok_or(CodecError::InvalidEscape)?;
            let hex = std::str::from_utf8(hex).map_err(|_| CodecError::InvalidEscape)?;
            let byte = u8::from_str_radix(hex, 16).map_err(|_| CodecError::InvalidEscape)?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| CodecError::InvalidUtf8)
}

fn ten_thousandths(value: f32) -> i64 {
    if !value.is_finite() {
        return 0;
    }
    let scaled = value as f64 * 10_000.0;
    // Absorb f32 representation error so parsing a printed value and
    // printing it again gives the same digits
    let slack = scaled.abs() * f32::EPSILON as f64 * 2.0 + 1e-6;
    (scaled + slack.copysign(scaled)).trunc() as i64
}

/// Truncate to four decimals.
pub fn truncate_fraction(value: f32) -> f32 {
    (ten_thousandths(value) as f64 / 10_000.0) as f32
}

/// Print a fractional value truncated to four decimals.
pub fn format_fraction(value: f32) -> String {
    let n = ten_thousandths(value);
    let sign = if n < 0 { "-" } else { "" };
    let abs = n.unsigned_abs();
    let (whole, frac) = (abs / 10_000, abs % 10_000);
    if frac == 0 {
        format!("{sign}{whole}")
    } else {
        let digits = format!("{frac:04}");
        format!("{sign}{whole}.{}", digits.trim_end_matches('0'))
    }
}

fn flag(value: bool) -> &'static str {
    if value { "1" } else { "0" }
}

fn list<T>(items: &[T], encode: impl Fn(&T) -> String) -> String {
    items.iter().map(encode).collect::<Vec<_>>().join(&ITEM.to_string())
}

fn kinds(items: &[PowerupKind]) -> String {
    items.iter().map(|k| k.name()).collect::<Vec<_>>().join(&KINDS.to_string())
}

fn split_exact<'a>(s: &'a str, sep: char, expected: usize, kind: &'static str) -> Result<Vec<&'a str>, CodecError> {
    let fields: Vec<&str> = s.split(sep).collect();
    if fields.len() != expected {
        return Err(CodecError::FieldCount { kind, expected, found: fields.len() });
    }
    Ok(fields)
}

fn number<T: FromStr>(s: &str, kind: &'static str, field: &'static str) -> Result<T, CodecError> {
    s.parse().map_err(|_| CodecError::InvalidField { kind, field })
}

fn boolean(s: &str, kind: &'static str, field: &'static str) -> Result<bool, CodecError> {
    match s {
        "1" => Ok(true),
        "0" => Ok(false),
        _ => Err(CodecError::InvalidField { kind, field }),
    }
}

fn powerup_kind(s: &str, kind: &'static str) -> Result<PowerupKind, CodecError> {
    PowerupKind::from_name(s).ok_or(CodecError::InvalidField { kind, field: "powerup kind" })
}

fn parse_list<T>(s: &str, decode: impl Fn(&str) -> Result<T, CodecError>) -> Result<Vec<T>, CodecError> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    s.split(ITEM).map(decode).collect()
}

fn parse_kinds(s: &str, kind: &'static str) -> Result<Vec<PowerupKind>, CodecError> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    s.split(KINDS).map(|k| powerup_kind(k, kind)).collect()
}

// =============================================================================
// RECORDS
// =============================================================================

fn encode_peer(peer: &PeerInfo) -> String {
    format!("{}{RECORD}{}", escape(peer.peer_id.as_str()), escape(&peer.nickname))
}

fn decode_peer(s: &str) -> Result<PeerInfo, CodecError> {
    let f = split_exact(s, RECORD, 2, "peer")?;
    Ok(PeerInfo::new(PeerId(unescape(f[0])?), unescape(f[1])?))
}

fn decode_line(body: &str, kind: &'static str) -> Result<ChatLine, CodecError> {
    let f = split_exact(body, FIELD, 2, kind)?;
    let nickname = unescape(f[0])?;
    Ok(ChatLine::new(Some(nickname), unescape(f[1])?))
}

fn encode_powerup(p: &PowerupSnapshot) -> String {
    [
        p.id.to_string(),
        p.kind.name().to_string(),
        p.x.to_string(),
        p.y.to_string(),
        p.size.to_string(),
        escape(&p.icon),
        escape(&p.colour),
    ]
    .join(&RECORD.to_string())
}

fn decode_powerup_fields(f: &[&str]) -> Result<PowerupSnapshot, CodecError> {
    const KIND: &str = "powerup";
    Ok(PowerupSnapshot {
        id: number(f[0], KIND, "id")?,
        kind: powerup_kind(f[1], KIND)?,
        x: number(f[2], KIND, "x")?,
        y: number(f[3], KIND, "y")?,
        size: number(f[4], KIND, "size")?,
        icon: unescape(f[5])?,
        colour: unescape(f[6])?,
    })
}

fn decode_powerup(s: &str) -> Result<PowerupSnapshot, CodecError> {
    decode_powerup_fields(&split_exact(s, RECORD, 7, "powerup")?)
}

fn encode_tank(t: &TankSnapshot) -> String {
    [
        escape(t.id.as_str()),
        escape(t.owner.as_str()),
        t.x.to_string(),
        t.y.to_string(),
        format_fraction(t.rotation),
        t.width.to_string(),
        t.height.to_string(),
        escape(&t.colour),
        t.score.to_string(),
        flag(t.alive).to_string(),
        kinds(&t.powerups),
    ]
    .join(&RECORD.to_string())
}

fn decode_tank(s: &str) -> Result<TankSnapshot, CodecError> {
    const KIND: &str = "tank";
    let f = split_exact(s, RECORD, 11, KIND)?;
    Ok(TankSnapshot {
        id: TankId(unescape(f[0])?),
        owner: PeerId(unescape(f[1])?),
        x: number(f[2], KIND, "x")?,
        y: number(f[3], KIND, "y")?,
        rotation: number(f[4], KIND, "rotation")?,
        width: number(f[5], KIND, "width")?,
        height: number(f[6], KIND, "height")?,
        colour: unescape(f[7])?,
        score: number(f[8], KIND, "score")?,
        alive: boolean(f[9], KIND, "alive")?,
        powerups: parse_kinds(f[10], KIND)?,
        bullets: Vec::new(),
    })
}

fn encode_update(t: &TankUpdate) -> String {
    let mut out = [
        escape(t.id.as_str()),
        t.x.to_string(),
        t.y.to_string(),
        format_fraction(t.rotation),
        t.score.to_string(),
        flag(t.alive).to_string(),
    ]
    .join(&RECORD.to_string());
    // Held powerups ride along only when there are any
    if !t.powerups.is_empty() {
        out.push(RECORD);
        out.push_str(&kinds(&t.powerups));
    }
    out
}

fn decode_update(s: &str) -> Result<TankUpdate, CodecError> {
    const KIND: &str = "tank update";
    let f: Vec<&str> = s.split(RECORD).collect();
    if f.len() != 6 && f.len() != 7 {
        return Err(CodecError::FieldCount { kind: KIND, expected: 6, found: f.len() });
    }
    Ok(TankUpdate {
        id: TankId(unescape(f[0])?),
        x: number(f[1], KIND, "x")?,
        y: number(f[2], KIND, "y")?,
        rotation: number(f[3], KIND, "rotation")?,
        score: number(f[4], KIND, "score")?,
        alive: boolean(f[5], KIND, "alive")?,
        powerups: match f.get(6) {
            Some(k) => parse_kinds(k, KIND)?,
            None => Vec::new(),
        },
    })
}

fn encode_bullet(b: &BulletSnapshot) -> String {
    [
        b.x.to_string(),
        b.y.to_string(),
        format_fraction(b.vx),
        format_fraction(b.vy),
        escape(&b.colour),
        format_fraction(b.radius),
    ]
    .join(&RECORD.to_string())
}

fn decode_bullet(s: &str) -> Result<BulletSnapshot, CodecError> {
    const KIND: &str = "bullet";
    let f = split_exact(s, RECORD, 6, KIND)?;
    Ok(BulletSnapshot {
        x: number(f[0], KIND, "x")?,
        y: number(f[1], KIND, "y")?,
        vx: number(f[2], KIND, "vx")?,
        vy: number(f[3], KIND, "vy")?,
        colour: unescape(f[4])?,
        radius: number(f[5], KIND, "radius")?,
    })
}

fn encode_event(e: &PowerupEvent) -> String {
    [
        e.kind.name().to_string(),
        (e.status as u8).to_string(),
        (e.scope as u8).to_string(),
        escape(e.tank_id.as_str()),
        e.powerup_id.to_string(),
    ]
    .join(&RECORD.to_string())
}

fn decode_event_fields(f: &[&str]) -> Result<PowerupEvent, CodecError> {
    const KIND: &str = "powerup event";
    let status = PowerupStatus::from_index(number(f[1], KIND, "status")?)
        .ok_or(CodecError::InvalidField { kind: KIND, field: "status" })?;
    let scope = TargetScope::from_index(number(f[2], KIND, "scope")?)
        .ok_or(CodecError::InvalidField { kind: KIND, field: "scope" })?;
    Ok(PowerupEvent {
        status,
        kind: powerup_kind(f[0], KIND)?,
        scope,
        tank_id: TankId(unescape(f[3])?),
        powerup_id: number(f[4], KIND, "powerup id")?,
    })
}

fn decode_event(s: &str) -> Result<PowerupEvent, CodecError> {
    decode_event_fields(&split_exact(s, RECORD, 5, "powerup event")?)
}

fn encode_config_entry(e: &TankConfigEntry) -> String {
    let mut parts = vec![escape(&e.panel_id), escape(&e.colour)];
    parts.extend(e.keys.iter().map(|k| escape(k)));
    parts.join(&RECORD.to_string())
}

fn decode_config_entry(s: &str) -> Result<TankConfigEntry, CodecError> {
    let f = split_exact(s, RECORD, 8, "tank config entry")?;
    Ok(TankConfigEntry {
        panel_id: unescape(f[0])?,
        colour: unescape(f[1])?,
        keys: [
            unescape(f[2])?,
            unescape(f[3])?,
            unescape(f[4])?,
            unescape(f[5])?,
            unescape(f[6])?,
            unescape(f[7])?,
        ],
    })
}

// =============================================================================
// INIT & DELTA
// =============================================================================

fn encode_init(init: &InitMessage) -> Vec<String> {
    let s = &init.settings;
    vec![
        init.seq.to_string(),
        s.grid_width.to_string(),
        s.grid_height.to_string(),
        s.wall_thickness.to_string(),
        format_fraction(s.move_speed),
        format_fraction(s.rotation_speed),
        format_fraction(s.bullet_speed),
        s.bullet_limit.to_string(),
        s.bounce_limit.to_string(),
        s.powerup_interval_ms.to_string(),
        s.powerup_limit.to_string(),
        s.powerup_duration_ms.to_string(),
        flag(s.friendly_fire).to_string(),
        hex::encode(&init.layout),
        list(&init.powerups, encode_powerup),
        list(&init.tanks, encode_tank),
    ]
}

fn decode_init(body: &str) -> Result<Message, CodecError> {
    const KIND: &str = "INIT";
    let f = split_exact(body, FIELD, 16, KIND)?;
    let settings = GameSettings {
        grid_width: number(f[1], KIND, "grid width")?,
        grid_height: number(f[2], KIND, "grid height")?,
        wall_thickness: number(f[3], KIND, "wall thickness")?,
        move_speed: number(f[4], KIND, "move speed")?,
        rotation_speed: number(f[5], KIND, "rotation speed")?,
        bullet_speed: number(f[6], KIND, "bullet speed")?,
        bullet_limit: number(f[7], KIND, "bullet limit")?,
        bounce_limit: number(f[8], KIND, "bounce limit")?,
        powerup_interval_ms: number(f[9], KIND, "powerup interval")?,
        powerup_limit: number(f[10], KIND, "powerup limit")?,
        powerup_duration_ms: number(f[11], KIND, "powerup duration")?,
        friendly_fire: boolean(f[12], KIND, "friendly fire")?,
    };
    Ok(Message::Init(InitMessage {
        seq: number(f[0], KIND, "seq")?,
        settings,
        layout: hex::decode(f[13]).map_err(|_| CodecError::InvalidField { kind: KIND, field: "layout" })?,
        powerups: parse_list(f[14], decode_powerup)?,
        tanks: parse_list(f[15], decode_tank)?,
    }))
}

fn encode_delta(delta: &DeltaMessage) -> Vec<String> {
    vec![
        delta.seq.to_string(),
        list(&delta.tanks, encode_update),
        list(&delta.removed, |id| escape(id.as_str())),
        list(&delta.bullets, encode_bullet),
        match &delta.powerups {
            Some(powerups) => list(powerups, encode_powerup),
            None => UNCHANGED.to_string(),
        },
        list(&delta.events, encode_event),
    ]
}

fn decode_delta(body: &str) -> Result<Message, CodecError> {
    const KIND: &str = "DELTA";
    let f = split_exact(body, FIELD, 6, KIND)?;
    Ok(Message::Delta(DeltaMessage {
        seq: number(f[0], KIND, "seq")?,
        tanks: parse_list(f[1], decode_update)?,
        removed: parse_list(f[2], |s| unescape(s).map(TankId))?,
        bullets: parse_list(f[3], decode_bullet)?,
        powerups: match f[4] {
            UNCHANGED => None,
            items => Some(parse_list(items, decode_powerup)?),
        },
        events: parse_list(f[5], decode_event)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: &Message) -> Message {
        let text = TextCodec.encode_string(message);
        TextCodec.decode_str(&text).unwrap()
    }

    #[test]
    fn test_ping_pong_text() {
        assert_eq!(TextCodec.encode_string(&Message::Ping { timestamp: 123_456 }), "Q,123456");
        assert_eq!(TextCodec.encode_string(&Message::Pong { timestamp: 123_456 }), "q,123456");
        assert_eq!(TextCodec.decode_str("q,42").unwrap(), Message::Pong { timestamp: 42 });
    }

    #[test]
    fn test_escape_roundtrip() {
        let nasty = "a,b;c|d%e\nf 100%";
        let escaped = escape(nasty);
        assert!(!escaped.contains([',', ';', '|', '\n']));
        assert_eq!(unescape(&escaped).unwrap(), nasty);
    }

    #[test]
    fn test_bad_escape_rejected() {
        assert_eq!(unescape("%4"), Err(CodecError::InvalidEscape));
        assert_eq!(unescape("%zz"), Err(CodecError::InvalidEscape));
    }

    #[test]
    fn test_fraction_truncates_to_four_decimals() {
        assert_eq!(format_fraction(1.570_796), "1.5707");
        assert_eq!(format_fraction(-0.123_456), "-0.1234");
        assert_eq!(format_fraction(2.5), "2.5");
        assert_eq!(format_fraction(0.0), "0");
        assert_eq!(format_fraction(f32::NAN), "0");
    }

    #[test]
    fn test_fraction_print_is_stable() {
        for v in [0.06_f32, 1.5707, 3.1415, -2.0001, 100.0999] {
            let printed = format_fraction(v);
            let reparsed: f32 = printed.parse().unwrap();
            assert_eq!(format_fraction(reparsed), printed);
        }
    }

    #[test]
    fn test_delta_record_layout() {
        let delta = DeltaMessage {
            seq: 2,
            tanks: vec![TankUpdate {
                id: TankId::from("host-0"),
                x: 13,
                y: 10,
                rotation: 0.0,
                score: 0,
                alive: true,
                powerups: vec![],
            }],
            removed: vec![],
            bullets: vec![],
            powerups: None,
            events: vec![],
        };
        let text = TextCodec.encode_string(&Message::Delta(delta.clone()));
        assert_eq!(text, "D,2,host-0|13|10|0|0|1,,,!,");
        assert_eq!(TextCodec.decode_str(&text).unwrap(), Message::Delta(delta));
    }

    #[test]
    fn test_delta_powerups_present_but_empty() {
        let delta = DeltaMessage {
            seq: 1,
            tanks: vec![],
            removed: vec![TankId::from("a-0")],
            bullets: vec![],
            powerups: Some(vec![]),
            events: vec![],
        };
        assert_eq!(roundtrip(&Message::Delta(delta.clone())), Message::Delta(delta));
    }

    #[test]
    fn test_chat_with_delimiters() {
        let chat = Message::Chat(ChatLine::new(Some("bo,b".into()), "gg; well|played\n100%"));
        assert_eq!(roundtrip(&chat), chat);

        let notice = Message::notice("alice left");
        assert_eq!(TextCodec.encode_string(&notice), "M,,alice left");
        assert_eq!(roundtrip(&notice), notice);
    }

    #[test]
    fn test_tank_config_roundtrip() {
        let config = Message::TankConfig(TankConfig {
            owner: PeerId::new("p1"),
            entries: vec![TankConfigEntry {
                panel_id: "panel-1".into(),
                colour: "#ff0000".into(),
                keys: ["w", "d", "s", "a", " ", "q"].map(String::from),
            }],
        });
        assert_eq!(roundtrip(&config), config);
    }

    #[test]
    fn test_event_and_spawn_roundtrip() {
        let event = Message::PowerupEvent(PowerupEvent::activate(PowerupKind::TripleShot, TankId::from("a-0"), 5));
        assert_eq!(TextCodec.encode_string(&event), "E,TripleShot,0,0,a-0,5");
        assert_eq!(roundtrip(&event), event);

        let spawn = Message::Spawn(PowerupSnapshot {
            id: 3,
            kind: PowerupKind::Freeze,
            x: 100,
            y: -20,
            size: 24,
            icon: "powerups/freeze.png".into(),
            colour: "#4fc3f7".into(),
        });
        assert_eq!(roundtrip(&spawn), spawn);
    }

    #[test]
    fn test_malformed_rejected() {
        assert_eq!(TextCodec.decode_str(""), Err(CodecError::Empty));
        assert_eq!(TextCodec.decode_str("Z,1"), Err(CodecError::UnknownTextTag('Z')));
        assert!(TextCodec.decode_str("Q,abc").is_err());
        assert!(TextCodec.decode_str("Q,1,2").is_err());
        assert!(TextCodec.decode_str("Q123").is_err());
        assert!(TextCodec.decode_str("D,1,x|1,,,!,").is_err());
        assert!(TextCodec.decode_str("I,1").is_err());
    }
}
