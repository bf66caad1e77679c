//! Real-time lighting output for musical hardware.
//!
//! The host sequencer supplies musical state (step patterns, playhead,
//! colors, mute/solo flags); this crate turns it into light: pixel frames
//! for addressable strips, palette writes for a clip-launch grid, and
//! vendor exclusive messages for a per-key lit keyboard. Button presses on
//! the grid flow back out as logical step toggles.
//!
//! Everything is driven by the host's periodic tick; no call here blocks it.

pub mod color;
pub mod frame;
pub mod grid;
pub mod keys;
pub mod pattern;
pub mod registry;
pub mod relay;
pub mod transport;
pub mod wled;

pub use color::{color_for, palette_for, ColorScheme, PaletteColor, Rgb};
pub use frame::{generate_frame, PixelFrame};
pub use grid::{ConnectionState, GridController, GridLayout};
pub use keys::{KeyColorMode, LitKeyboard};
pub use pattern::{
    ButtonEvent, DeviceConfig, FrameMode, PagingState, PlayheadState, Protocol, StepPattern,
};
pub use registry::{DeviceRegistry, StripId};
pub use transport::StripTransport;
