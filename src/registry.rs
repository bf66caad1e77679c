//! Explicit device registry, owned by the application's composition root.
//!
//! There is deliberately no global device table and no "currently active
//! device" key: consumers receive a `&mut DeviceRegistry` (or a handle from
//! it) and nothing else. Created at session start, torn down at session end.

use log::info;

use crate::grid::GridController;
use crate::keys::LitKeyboard;
use crate::pattern::DeviceConfig;
use crate::transport::StripTransport;

/// Opaque handle to a registered strip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StripId(usize);

pub struct DeviceRegistry {
    strips: Vec<Option<StripTransport>>,
    grid: Option<GridController>,
    keyboard: Option<LitKeyboard>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self { strips: Vec::new(), grid: None, keyboard: None }
    }

    /// Register a strip and hand back its handle.
    pub fn add_strip(&mut self, cfg: DeviceConfig) -> StripId {
        info!("registered strip {} ({} leds)", cfg.address, cfg.led_count);
        self.strips.push(Some(StripTransport::new(cfg)));
        StripId(self.strips.len() - 1)
    }

    pub fn strip_mut(&mut self, id: StripId) -> Option<&mut StripTransport> {
        self.strips.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Stop output to a strip and drop its configuration.
    pub fn remove_strip(&mut self, id: StripId) {
        if let Some(slot) = self.strips.get_mut(id.0) {
            if let Some(mut strip) = slot.take() {
                strip.disconnect();
                info!("removed strip {}", strip.cfg.address);
            }
        }
    }

    pub fn strips_mut(&mut self) -> impl Iterator<Item = &mut StripTransport> {
        self.strips.iter_mut().filter_map(Option::as_mut)
    }

    pub fn set_grid(&mut self, grid: GridController) -> &mut GridController {
        self.grid = Some(grid);
        self.grid.as_mut().unwrap()
    }

    pub fn grid_mut(&mut self) -> Option<&mut GridController> {
        self.grid.as_mut()
    }

    pub fn set_keyboard(&mut self, keyboard: LitKeyboard) -> &mut LitKeyboard {
        self.keyboard = Some(keyboard);
        self.keyboard.as_mut().unwrap()
    }

    pub fn keyboard_mut(&mut self) -> Option<&mut LitKeyboard> {
        self.keyboard.as_mut()
    }

    /// Session teardown: every device goes dark, all drivers released.
    pub fn shutdown(&mut self) {
        for strip in self.strips_mut() {
            strip.disconnect();
        }
        self.strips.clear();
        if let Some(grid) = self.grid.as_mut() {
            grid.disconnect();
        }
        self.grid = None;
        if let Some(keyboard) = self.keyboard.as_mut() {
            keyboard.disconnect();
        }
        self.keyboard = None;
        info!("device registry shut down");
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
