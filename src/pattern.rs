//! Musical state consumed by the lighting pipeline: step patterns, the
//! playhead, per-strip device configuration, and grid paging.

use anyhow::{ensure, Result};

/// 2D boolean step matrix, lanes x steps. Always rectangular.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepPattern {
    lanes: usize,
    steps: usize,
    cells: Vec<bool>,
}

impl StepPattern {
    pub fn new(lanes: usize, steps: usize) -> Self {
        Self { lanes, steps, cells: vec![false; lanes * steps] }
    }

    /// Build from explicit rows, rejecting ragged input.
    pub fn from_rows(rows: &[Vec<bool>]) -> Result<Self> {
        let steps = rows.first().map_or(0, Vec::len);
        ensure!(
            rows.iter().all(|r| r.len() == steps),
            "pattern rows must all have the same length"
        );
        Ok(Self {
            lanes: rows.len(),
            steps,
            cells: rows.iter().flatten().copied().collect(),
        })
    }

    pub fn lanes(&self) -> usize {
        self.lanes
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Out-of-range lookups read as inactive, so short patterns simply
    /// render black past their end.
    pub fn get(&self, lane: usize, step: usize) -> bool {
        if lane >= self.lanes || step >= self.steps {
            return false;
        }
        self.cells[lane * self.steps + step]
    }

    pub fn set(&mut self, lane: usize, step: usize, on: bool) {
        if lane < self.lanes && step < self.steps {
            self.cells[lane * self.steps + step] = on;
        }
    }

    pub fn toggle(&mut self, lane: usize, step: usize) -> bool {
        let on = !self.get(lane, step);
        self.set(lane, step, on);
        on
    }
}

/// Where playback currently is. `beat_progress` is the fractional position
/// inside the current step, in `[0, 1)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlayheadState {
    pub current_step: usize,
    pub is_playing: bool,
    pub beat_progress: f64,
}

impl PlayheadState {
    pub fn stopped() -> Self {
        Self { current_step: 0, is_playing: false, beat_progress: 0.0 }
    }

    pub fn at(current_step: usize, beat_progress: f64) -> Self {
        Self { current_step, is_playing: true, beat_progress }
    }
}

/// Which wire protocol a strip is driven over. Chosen by configuration,
/// never auto-detected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Protocol {
    /// Frames forwarded to a local relay process over a persistent socket.
    #[default]
    Streaming,
    /// Frames POSTed straight to the device's own HTTP endpoint.
    Direct,
}

/// Which strip visualization to render.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FrameMode {
    /// Steps pinned to fixed positions, playhead sweeps across them.
    #[default]
    Static,
    /// Notes scroll toward a strike zone at pixel 0.
    Moving { smooth: bool },
}

/// Per-strip identity and tuning. Created once at device registration and
/// mutated only through the explicit setters.
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    /// Network address, e.g. `192.168.4.31` or `wled-desk.local`.
    pub address: String,
    pub led_count: usize,
    /// Which pattern lane this strip visualizes.
    pub lane: usize,
    pub protocol: Protocol,
    pub mode: FrameMode,
    /// Global brightness scalar in `[0, 1]`.
    pub brightness: f64,
    /// Update frequency in Hz.
    pub update_rate: f64,
}

pub const DEFAULT_UPDATE_RATE: f64 = 30.0;

impl DeviceConfig {
    pub fn new(address: impl Into<String>, led_count: usize) -> Self {
        Self {
            address: address.into(),
            led_count,
            lane: 0,
            protocol: Protocol::default(),
            mode: FrameMode::default(),
            brightness: 1.0,
            update_rate: DEFAULT_UPDATE_RATE,
        }
    }

    pub fn set_brightness(&mut self, brightness: f64) {
        self.brightness = brightness.clamp(0.0, 1.0);
    }

    pub fn set_update_rate(&mut self, hz: f64) {
        self.update_rate = hz.max(1.0);
    }
}

/// A button press decoded into logical sequencer coordinates. The decode is
/// deterministic and reversible under the same page/rotation state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ButtonEvent {
    pub lane: usize,
    pub step: usize,
    pub velocity: u8,
}

/// Maps a wide logical step range onto a narrower physical grid by dividing
/// it into pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PagingState {
    pub current_page: usize,
    /// When set, the page tracks the playhead during playback. Manual page
    /// buttons clear it until playback state flips again.
    pub auto_advance: bool,
    /// Total page count for the current pattern length.
    pub pages: usize,
}

impl PagingState {
    pub fn new(pages: usize) -> Self {
        Self { current_page: 0, auto_advance: true, pages: pages.max(1) }
    }

    pub fn set_pages(&mut self, pages: usize) {
        self.pages = pages.max(1);
        self.current_page = self.current_page.min(self.pages - 1);
    }

    /// Manual page move. Clamped at the ends, never wrapping, and disables
    /// auto-advance until playback re-enables it.
    pub fn page_left(&mut self) {
        self.current_page = self.current_page.saturating_sub(1);
        self.auto_advance = false;
    }

    pub fn page_right(&mut self) {
        self.current_page = (self.current_page + 1).min(self.pages - 1);
        self.auto_advance = false;
    }

    /// Snap to the page containing `step` when auto-advance is on.
    pub fn follow(&mut self, step: usize, steps_per_page: usize) {
        if self.auto_advance && steps_per_page > 0 {
            self.current_page = (step / steps_per_page).min(self.pages - 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ragged_rows_are_rejected() {
        let ok = StepPattern::from_rows(&[vec![true, false], vec![false, true]]);
        assert!(ok.is_ok());
        let bad = StepPattern::from_rows(&[vec![true, false], vec![false]]);
        assert!(bad.is_err());
    }

    #[test]
    fn out_of_range_cells_read_inactive() {
        let mut p = StepPattern::new(2, 8);
        p.set(1, 7, true);
        assert!(p.get(1, 7));
        assert!(!p.get(2, 0));
        assert!(!p.get(0, 8));
        // and out-of-range writes are dropped, not panics
        p.set(5, 5, true);
    }

    #[test]
    fn toggle_round_trips() {
        let mut p = StepPattern::new(1, 4);
        assert!(p.toggle(0, 2));
        assert!(p.get(0, 2));
        assert!(!p.toggle(0, 2));
        assert!(!p.get(0, 2));
    }

    #[test]
    fn paging_clamps_at_both_ends() {
        let mut paging = PagingState::new(2);
        paging.page_right();
        paging.page_right();
        assert_eq!(paging.current_page, 1);
        paging.page_left();
        paging.page_left();
        assert_eq!(paging.current_page, 0);
        assert!(!paging.auto_advance);
    }

    #[test]
    fn follow_only_moves_when_auto_advancing() {
        let mut paging = PagingState::new(2);
        paging.follow(12, 8);
        assert_eq!(paging.current_page, 1);

        paging.page_left();
        paging.follow(12, 8);
        assert_eq!(paging.current_page, 0);
    }

    #[test]
    fn brightness_setter_clamps() {
        let mut cfg = DeviceConfig::new("10.0.0.2", 60);
        cfg.set_brightness(1.5);
        assert_eq!(cfg.brightness, 1.0);
        cfg.set_brightness(-0.5);
        assert_eq!(cfg.brightness, 0.0);
    }
}
