//! Lit-keyboard driver: per-key RGB over vendor exclusive messages.
//!
//! Every command is a vendor-prefixed exclusive message whose final payload
//! byte is a rolling checksum. The keyboard is optional peripheral hardware,
//! so nothing in here returns an error to the caller: a missing device is
//! logged and the call becomes a no-op.

use anyhow::{anyhow, bail, Result};
use log::{debug, info, warn};
use midir::{MidiOutput, MidiOutputConnection};

use crate::color::{color_for, ColorScheme};

const SYSEX_START: u8 = 0xF0;
const SYSEX_END: u8 = 0xF7;
/// Manufacturer prefix carried by every exclusive message.
const VENDOR_PREFIX: [u8; 4] = [0x00, 0x21, 0x10, 0x77];
const DEVICE_ID: u8 = 0x00;

/// Command-type bytes. Same framing and checksum for all of them.
const CMD_KEY_COLOR: u8 = 0x10;
const CMD_SCALE: u8 = 0x60;
const CMD_ROOT_KEY: u8 = 0x61;
const CMD_COLOR_MODE: u8 = 0x62;

/// Scales the device understands, in its own index order.
const SCALES: [&str; 8] = [
    "major",
    "minor",
    "harmonic minor",
    "dorian",
    "mixolydian",
    "lydian",
    "phrygian",
    "pentatonic",
];

/// Device-wide key illumination behavior.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyColorMode {
    /// Keys follow the selected scheme per note class.
    Pitch = 0,
    /// Only root keys lit, rest dim white.
    Root = 1,
    /// Single uniform color.
    Single = 2,
}

/// Rolling multiply-and-add checksum over the payload, modulo 128.
pub fn checksum(payload: &[u8]) -> u8 {
    payload
        .iter()
        .fold(0u8, |c, &b| c.wrapping_mul(3).wrapping_add(b) & 0x7F)
}

pub fn verify_checksum(payload: &[u8], sum: u8) -> bool {
    checksum(payload) == sum
}

/// Pack 8-bit RGB into the device's 5-byte layout: the channels form a
/// 24-bit word split into 7-bit groups, least significant first.
pub fn pack_color(r: u8, g: u8, b: u8) -> [u8; 5] {
    let word = u32::from(r) | u32::from(g) << 8 | u32::from(b) << 16;
    let mut out = [0u8; 5];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = ((word >> (7 * i)) & 0x7F) as u8;
    }
    out
}

/// Frame a payload as a complete exclusive message, checksum included.
fn exclusive(payload: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(payload.len() + 8);
    msg.push(SYSEX_START);
    msg.extend_from_slice(&VENDOR_PREFIX);
    msg.push(DEVICE_ID);
    msg.extend_from_slice(payload);
    msg.push(checksum(payload));
    msg.push(SYSEX_END);
    msg
}

fn key_color_payload(key: u8, r: u8, g: u8, b: u8) -> Vec<u8> {
    let mut payload = vec![CMD_KEY_COLOR, key];
    payload.extend_from_slice(&pack_color(r, g, b));
    payload
}

/// Map a scale name onto a device scale index; unknown names fall back to
/// the nearest of major or minor.
fn scale_index(name: &str) -> u8 {
    let name = name.to_lowercase();
    if let Some(i) = SCALES.iter().position(|s| *s == name) {
        return i as u8;
    }
    if name.contains("min") {
        1
    } else {
        0
    }
}

pub struct LitKeyboard {
    name_filter: String,
    conn: Option<MidiOutputConnection>,
    enabled: bool,
    /// Number of physically lit keys.
    key_count: u8,
    /// MIDI note of the leftmost key.
    base_note: u8,
}

impl LitKeyboard {
    pub fn new(name_filter: impl Into<String>, key_count: u8, base_note: u8) -> Self {
        Self {
            name_filter: name_filter.into(),
            conn: None,
            enabled: true,
            key_count,
            base_note,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn connect(&mut self) -> Result<()> {
        let midi_out = MidiOutput::new("notelight keys")?;
        let filter = self.name_filter.to_lowercase();
        let port = midi_out
            .ports()
            .into_iter()
            .find(|p| {
                midi_out
                    .port_name(p)
                    .map(|n| n.to_lowercase().contains(&filter))
                    .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("no lit keyboard matching '{}'", self.name_filter))?;
        let conn = midi_out
            .connect(&port, "notelight-keys")
            .map_err(|e| anyhow!("opening keyboard output: {e}"))?;
        self.conn = Some(conn);
        info!("lit keyboard '{}' connected", self.name_filter);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if self.conn.is_some() {
            self.clear_all_lights();
            self.conn = None;
            info!("lit keyboard '{}' disconnected", self.name_filter);
        }
    }

    /// Set one key's color. Out-of-range keys are a no-op.
    pub fn set_key_color(&mut self, key: u8, r: u8, g: u8, b: u8) {
        if key >= self.key_count {
            return;
        }
        self.send(&key_color_payload(key, r, g, b));
    }

    /// Light the key for a MIDI note, brightness derived from velocity.
    /// Notes outside the physical key range are ignored.
    pub fn light_up_note(&mut self, midi_note: u8, velocity: u8, scheme: ColorScheme) {
        let Some(key) = midi_note.checked_sub(self.base_note) else {
            return;
        };
        if key >= self.key_count {
            return;
        }
        let color = color_for(usize::from(midi_note) % 12, scheme)
            .scale(f64::from(velocity.min(127)) / 127.0);
        self.set_key_color(key, color.0, color.1, color.2);
    }

    pub fn note_off(&mut self, midi_note: u8) {
        if let Some(key) = midi_note.checked_sub(self.base_note) {
            self.set_key_color(key, 0, 0, 0);
        }
    }

    /// Select the lit scale by name; unsupported names snap to major/minor.
    pub fn set_scale(&mut self, name: &str) {
        self.send(&[CMD_SCALE, scale_index(name)]);
    }

    pub fn set_root_key(&mut self, note_class: u8) {
        self.send(&[CMD_ROOT_KEY, note_class % 12]);
    }

    pub fn set_color_mode(&mut self, mode: KeyColorMode) {
        self.send(&[CMD_COLOR_MODE, mode as u8]);
    }

    pub fn clear_all_lights(&mut self) {
        for key in 0..self.key_count {
            self.send(&key_color_payload(key, 0, 0, 0));
        }
    }

    /// All sends degrade silently: the keyboard is optional hardware and
    /// must never throw into caller code.
    fn send(&mut self, payload: &[u8]) {
        if !self.enabled {
            return;
        }
        let Some(conn) = self.conn.as_mut() else {
            debug!("lit keyboard not connected, dropping command {payload:02x?}");
            return;
        };
        let msg = exclusive(payload);
        if let Err(e) = conn.send(&msg) {
            warn!("keyboard exclusive send failed: {e}");
        }
    }
}

// Exposed so hosts can sanity-check captures from the device.
pub fn decode_exclusive(msg: &[u8]) -> Result<&[u8]> {
    if msg.len() < 8 || msg[0] != SYSEX_START || msg[msg.len() - 1] != SYSEX_END {
        bail!("not a complete exclusive message");
    }
    if msg[1..5] != VENDOR_PREFIX {
        bail!("unknown vendor prefix");
    }
    let payload = &msg[6..msg.len() - 2];
    let sum = msg[msg.len() - 2];
    if !verify_checksum(payload, sum) {
        bail!("checksum mismatch: expected {:#04x}, got {sum:#04x}", checksum(payload));
    }
    Ok(payload)
}
