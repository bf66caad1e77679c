//! Clip-launch grid controller driver.
//!
//! Bidirectional: button presses come in as note messages and are decoded to
//! logical (lane, step) coordinates; LED state goes out as note writes,
//! deduplicated and flushed in small batches so the hardware's message-rate
//! ceiling is respected. A wider logical pattern is paginated onto the
//! narrower physical grid.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use log::{debug, info, trace, warn};
use midir::{MidiIO, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};

use crate::color::{palette_for, ColorScheme, PaletteColor};
use crate::pattern::{ButtonEvent, PagingState, PlayheadState, StepPattern};

/// Vendor mode-switch message unlocking full per-pad LED addressing.
/// Sent exactly once per connection, before the first LED write.
const MODE_SWITCH: [u8; 9] = [0xF0, 0x47, 0x7F, 0x4F, 0x62, 0x00, 0x01, 0x01, 0xF7];

const NOTE_ON: u8 = 0x90;
const NOTE_OFF: u8 = 0x80;
const CONTROL_CHANGE: u8 = 0xB0;

/// Dedicated page navigation buttons, outside the main grid's note range.
const PAGE_LEFT_NOTE: u8 = 64;
const PAGE_RIGHT_NOTE: u8 = 65;
/// Scene/bank buttons doubling as page indicator LEDs.
const PAGE_INDICATOR_NOTES: [u8; 4] = [82, 83, 84, 85];

/// LED writes flushed per drain iteration, with a short pause in between.
const LED_BATCH: usize = 4;
const LED_BATCH_DELAY: Duration = Duration::from_millis(3);

/// Physical pad arrangement and how it maps onto note numbers.
#[derive(Clone, Copy, Debug)]
pub struct GridLayout {
    pub columns: usize,
    pub rows: usize,
    pub base_note: u8,
    /// 90° rotation: hardware rows become steps instead of lanes.
    pub rotated: bool,
}

impl Default for GridLayout {
    fn default() -> Self {
        Self { columns: 8, rows: 8, base_note: 0, rotated: false }
    }
}

impl GridLayout {
    /// How many logical steps one physical page shows.
    pub fn steps_per_page(&self) -> usize {
        if self.rotated {
            self.rows
        } else {
            self.columns
        }
    }

    pub fn lanes_shown(&self) -> usize {
        if self.rotated {
            self.columns
        } else {
            self.rows
        }
    }

    fn pad_count(&self) -> usize {
        self.columns * self.rows
    }
}

/// Decode a grid note into absolute logical coordinates for `page`.
pub fn hardware_to_logical(
    layout: &GridLayout,
    note: u8,
    page: usize,
) -> Option<(usize, usize)> {
    let idx = usize::from(note.checked_sub(layout.base_note)?);
    if idx >= layout.pad_count() {
        return None;
    }
    let row = idx / layout.columns;
    let col = idx % layout.columns;
    let (lane, step_in_page) = if layout.rotated { (col, row) } else { (row, col) };
    Some((lane, page * layout.steps_per_page() + step_in_page))
}

/// Inverse of [`hardware_to_logical`]: note number showing (lane, step), or
/// None when the step is not on `page` or the lane is off-grid.
pub fn logical_to_hardware(
    layout: &GridLayout,
    lane: usize,
    step: usize,
    page: usize,
) -> Option<u8> {
    let spp = layout.steps_per_page();
    if step / spp != page {
        return None;
    }
    let s = step % spp;
    let (row, col) = if layout.rotated { (s, lane) } else { (lane, s) };
    if row >= layout.rows || col >= layout.columns {
        return None;
    }
    let note = usize::from(layout.base_note) + row * layout.columns + col;
    // pads past the 7-bit MIDI note ceiling don't exist on any hardware
    u8::try_from(note).ok().filter(|n| *n <= 127)
}

/// Raw (status, data1, data2) classified by the top status nibble.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PadInput {
    Press { note: u8, velocity: u8 },
    Release { note: u8 },
    Control { controller: u8, value: u8 },
}

/// Malformed or unknown messages come back as None and are ignored upstream.
pub fn classify(msg: &[u8]) -> Option<PadInput> {
    if msg.len() < 3 {
        return None;
    }
    match msg[0] & 0xF0 {
        // zero-velocity note-on is the wire's spelling of a release
        NOTE_ON if msg[2] == 0 => Some(PadInput::Release { note: msg[1] }),
        NOTE_ON => Some(PadInput::Press { note: msg[1], velocity: msg[2] }),
        NOTE_OFF => Some(PadInput::Release { note: msg[1] }),
        CONTROL_CHANGE => Some(PadInput::Control { controller: msg[1], value: msg[2] }),
        _ => None,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

struct LedWrite {
    note: u8,
    color: u8,
}

pub struct GridController {
    name_filter: String,
    layout: GridLayout,
    state: ConnectionState,
    paging: Arc<Mutex<PagingState>>,
    events: Option<Receiver<ButtonEvent>>,
    input: Option<MidiInputConnection<()>>,
    led_tx: Option<Sender<LedWrite>>,
    drain: Option<thread::JoinHandle<()>>,
    /// Last color written per note, to skip redundant traffic.
    led_cache: HashMap<u8, u8>,
    was_playing: bool,
}

impl GridController {
    pub fn new(name_filter: impl Into<String>, layout: GridLayout) -> Self {
        Self {
            name_filter: name_filter.into(),
            layout,
            state: ConnectionState::Disconnected,
            paging: Arc::new(Mutex::new(PagingState::new(1))),
            events: None,
            input: None,
            led_tx: None,
            drain: None,
            led_cache: HashMap::new(),
            was_playing: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn layout(&self) -> GridLayout {
        self.layout
    }

    pub fn current_page(&self) -> usize {
        self.paging.lock().unwrap().current_page
    }

    /// Enumerate ports, match input and output by name substring, switch the
    /// device into addressable-LED mode and clear it. Fails without partial
    /// state if either port is missing.
    pub fn connect(&mut self) -> Result<()> {
        if self.state == ConnectionState::Connected {
            return Ok(());
        }
        self.state = ConnectionState::Connecting;
        match self.try_connect() {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                info!("grid controller '{}' connected", self.name_filter);
                Ok(())
            }
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    fn try_connect(&mut self) -> Result<()> {
        let midi_in = MidiInput::new("notelight grid in")?;
        let midi_out = MidiOutput::new("notelight grid out")?;

        let in_port = find_port(&midi_in, &self.name_filter);
        let out_port = find_port(&midi_out, &self.name_filter);
        let (in_port, out_port) = match (in_port, out_port) {
            (Some(i), Some(o)) => (i, o),
            (None, _) => bail!("no MIDI input port matching '{}'", self.name_filter),
            (_, None) => bail!("no MIDI output port matching '{}'", self.name_filter),
        };

        let mut out_conn = midi_out
            .connect(&out_port, "notelight-grid")
            .map_err(|e| anyhow!("opening grid output: {e}"))?;
        out_conn
            .send(&MODE_SWITCH)
            .map_err(|e| anyhow!("switching grid mode: {e}"))?;

        let (led_tx, led_rx) = mpsc::channel();
        let drain = thread::spawn(move || drain_leds(out_conn, led_rx));

        // start from a dark panel
        self.led_cache.clear();
        for note in self.all_notes() {
            let _ = led_tx.send(LedWrite { note, color: PaletteColor::OFF.id() });
        }

        let (ev_tx, ev_rx) = mpsc::channel();
        let layout = self.layout;
        let paging = Arc::clone(&self.paging);
        let in_conn = midi_in
            .connect(
                &in_port,
                "notelight-grid",
                move |_ts, msg, _| handle_message(msg, &layout, &paging, &ev_tx),
                (),
            )
            .map_err(|e| anyhow!("opening grid input: {e}"))?;

        self.led_tx = Some(led_tx);
        self.drain = Some(drain);
        self.input = Some(in_conn);
        self.events = Some(ev_rx);
        Ok(())
    }

    /// Button events decoded since the last call, in arrival order.
    pub fn recv(&self) -> impl Iterator<Item = ButtonEvent> + '_ {
        self.events.iter().flat_map(|rx| rx.try_iter())
    }

    /// Repaint the visible page plus the page indicator row. Writes are
    /// deduplicated against the cache and flushed by the drain loop.
    pub fn redraw(&mut self, pattern: &StepPattern, playhead: &PlayheadState, scheme: ColorScheme) {
        if self.state != ConnectionState::Connected {
            return;
        }
        let spp = self.layout.steps_per_page();
        let (page, pages) = {
            let mut paging = self.paging.lock().unwrap();
            paging.set_pages(pattern.steps().div_ceil(spp));
            // a playback state change ends any manual page override
            if playhead.is_playing != self.was_playing {
                paging.auto_advance = true;
            }
            if playhead.is_playing {
                paging.follow(playhead.current_step, spp);
            }
            (paging.current_page, paging.pages)
        };
        self.was_playing = playhead.is_playing;

        for lane in 0..self.layout.lanes_shown() {
            for s in 0..spp {
                let step = page * spp + s;
                let Some(note) = logical_to_hardware(&self.layout, lane, step, page) else {
                    continue;
                };
                let color = if playhead.is_playing && step == playhead.current_step {
                    PaletteColor::WHITE
                } else if pattern.get(lane, step) {
                    palette_for(lane, scheme)
                } else {
                    PaletteColor::OFF
                };
                self.write_led(note, color.id());
            }
        }

        for (i, &note) in PAGE_INDICATOR_NOTES.iter().enumerate() {
            let color = if i == page {
                PaletteColor::WHITE
            } else if i < pages {
                PaletteColor::DIM
            } else {
                PaletteColor::OFF
            };
            self.write_led(note, color.id());
        }
    }

    /// Stop all output and clear the panel. Queued LED writes are flushed
    /// before the drain loop exits.
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        for note in self.all_notes() {
            self.write_led(note, PaletteColor::OFF.id());
        }
        self.reset();
        info!("grid controller '{}' disconnected", self.name_filter);
    }

    fn reset(&mut self) {
        // dropping the sender lets the drain loop finish the queue and exit
        self.led_tx = None;
        if let Some(drain) = self.drain.take() {
            let _ = drain.join();
        }
        self.input = None;
        self.events = None;
        self.led_cache.clear();
        self.was_playing = false;
        self.state = ConnectionState::Disconnected;
    }

    fn all_notes(&self) -> Vec<u8> {
        let base = usize::from(self.layout.base_note);
        (0..self.layout.pad_count())
            .filter_map(|i| u8::try_from(base + i).ok().filter(|n| *n <= 127))
            .chain(PAGE_INDICATOR_NOTES)
            .chain([PAGE_LEFT_NOTE, PAGE_RIGHT_NOTE])
            .collect()
    }

    fn write_led(&mut self, note: u8, color: u8) {
        if self.led_cache.get(&note) == Some(&color) {
            return;
        }
        self.led_cache.insert(note, color);
        if let Some(tx) = &self.led_tx {
            let _ = tx.send(LedWrite { note, color });
        }
    }
}

impl Drop for GridController {
    fn drop(&mut self) {
        if self.state != ConnectionState::Disconnected {
            self.disconnect();
        }
    }
}

fn find_port<T: MidiIO>(io: &T, filter: &str) -> Option<T::Port> {
    let filter = filter.to_lowercase();
    io.ports().into_iter().find(|p| {
        io.port_name(p)
            .map(|name| name.to_lowercase().contains(&filter))
            .unwrap_or(false)
    })
}

/// Runs on the midir callback thread. Never blocks, never panics: malformed
/// input is logged and dropped.
fn handle_message(
    msg: &[u8],
    layout: &GridLayout,
    paging: &Mutex<PagingState>,
    tx: &Sender<ButtonEvent>,
) {
    let Some(input) = classify(msg) else {
        trace!("unrecognized grid message {msg:02x?}");
        return;
    };
    match input {
        PadInput::Press { note: PAGE_LEFT_NOTE, .. } => paging.lock().unwrap().page_left(),
        PadInput::Press { note: PAGE_RIGHT_NOTE, .. } => paging.lock().unwrap().page_right(),
        PadInput::Press { note, velocity } => {
            let page = paging.lock().unwrap().current_page;
            match hardware_to_logical(layout, note, page) {
                Some((lane, step)) => {
                    let _ = tx.send(ButtonEvent { lane, step, velocity });
                }
                None => trace!("note {note} outside the main grid"),
            }
        }
        PadInput::Release { .. } | PadInput::Control { .. } => {}
    }
}

/// Background LED flush loop: small batches, short yields, so the hardware
/// never sees more than a few messages back to back.
fn drain_leds(mut out: MidiOutputConnection, rx: Receiver<LedWrite>) {
    while let Ok(first) = rx.recv() {
        let mut batch = vec![first];
        while batch.len() < LED_BATCH {
            match rx.try_recv() {
                Ok(write) => batch.push(write),
                Err(_) => break,
            }
        }
        for write in batch {
            if let Err(e) = out.send(&[NOTE_ON, write.note, write.color]) {
                warn!("grid LED write failed: {e}");
            }
        }
        thread::sleep(LED_BATCH_DELAY);
    }
    debug!("grid LED drain loop stopped");
}
