//! Color and brightness model shared by every hardware target.
//!
//! All mappings in here are pure: the same logical note always renders the
//! same color family whether it ends up on a strip pixel, a grid pad, or a
//! keyboard key.

/// An 8-bit RGB triple, the unit of every pixel frame.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const OFF: Self = Self(0, 0, 0);
    pub const WHITE: Self = Self(255, 255, 255);

    pub const RED: Self = Self(255, 0, 0);
    pub const ORANGE: Self = Self(255, 64, 0);
    pub const AMBER: Self = Self(255, 128, 0);
    pub const YELLOW: Self = Self(255, 255, 0);
    pub const PEA: Self = Self(136, 255, 0);
    pub const LIME: Self = Self(0, 255, 0);
    pub const MINT: Self = Self(0, 255, 68);
    pub const TEAL: Self = Self(0, 255, 170);
    pub const CYAN: Self = Self(0, 204, 255);
    pub const BLUE: Self = Self(0, 0, 255);
    pub const VIOLET: Self = Self(136, 0, 255);
    pub const MAGENTA: Self = Self(255, 0, 255);
    pub const PINK: Self = Self(255, 97, 204);

    /// Hue in `0..1` (wrapping), saturation and value in `0..1`.
    pub fn hsv(h: f64, s: f64, v: f64) -> Self {
        let f = |n: f64| {
            let x = (((h + n).fract() * 6.0 - 3.0).abs() - 1.0).clamp(0.0, 1.0);
            v * (1.0 - s * (1.0 - x))
        };
        Self::from_f64(f(1.0), f(0.6666666), f(0.3333333))
    }

    pub fn from_f64(r: f64, g: f64, b: f64) -> Self {
        let byte = |x: f64| (x.clamp(0.0, 1.0) * 255.0).round() as u8;
        Self(byte(r), byte(g), byte(b))
    }

    /// Scale all channels by a brightness scalar, clamped to `[0, 1]` first.
    pub fn scale(self, a: f64) -> Self {
        let a = a.clamp(0.0, 1.0);
        let mul = |c: u8| (f64::from(c) * a).round() as u8;
        Self(mul(self.0), mul(self.1), mul(self.2))
    }

    pub fn is_off(self) -> bool {
        self == Self::OFF
    }
}

/// How note classes map onto hue. Closed set: the host UI offers exactly
/// these and nothing else.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ColorScheme {
    /// Hue walks the spectrum linearly with pitch class.
    #[default]
    Spectrum,
    /// Fixed per-note-class palette, adjacent semitones get contrasting hues.
    Chromatic,
    /// Hue ordered around the circle of fifths, so harmonically related
    /// notes sit next to each other.
    Fifths,
}

/// Fixed chromatic palette, one entry per note class starting at C.
const CHROMATIC: [Rgb; 12] = [
    Rgb::RED,
    Rgb::TEAL,
    Rgb::ORANGE,
    Rgb::CYAN,
    Rgb::YELLOW,
    Rgb::PEA,
    Rgb::VIOLET,
    Rgb::LIME,
    Rgb::MAGENTA,
    Rgb::MINT,
    Rgb::PINK,
    Rgb::BLUE,
];

/// Color for a note class or lane index under the given scheme.
///
/// Pure and deterministic: no device state, no time dependence.
pub fn color_for(index: usize, scheme: ColorScheme) -> Rgb {
    let class = index % 12;
    match scheme {
        ColorScheme::Spectrum => Rgb::hsv(class as f64 / 12.0, 1.0, 1.0),
        ColorScheme::Chromatic => CHROMATIC[class],
        ColorScheme::Fifths => Rgb::hsv((class * 7 % 12) as f64 / 12.0, 1.0, 1.0),
    }
}

/// Floor brightness for far-away notes in the moving visualization, so
/// upcoming steps never disappear entirely.
const APPROACH_FLOOR: f64 = 0.15;

/// Brightness for a note at normalized distance `d` from its trigger moment.
/// Monotonically rising as `d` falls, full brightness at zero distance.
pub fn approach_brightness(d: f64) -> f64 {
    let d = d.clamp(0.0, 1.0);
    APPROACH_FLOOR + (1.0 - APPROACH_FLOOR) * (1.0 - d) * (1.0 - d)
}

/// Quadratic ease-in/out over `0..1`.
pub fn ease_in_out(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        2.0 * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
    }
}

/// One of the small fixed set of colors a clip-launch grid can display.
/// The hardware addresses these by palette index, not by RGB.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PaletteColor(u8);

impl PaletteColor {
    pub const OFF: Self = Self(0);
    pub const DIM: Self = Self(1);
    pub const WHITE: Self = Self(3);
    pub const RED: Self = Self(5);
    pub const ORANGE: Self = Self(9);
    pub const YELLOW: Self = Self(13);
    pub const PEA: Self = Self(17);
    pub const GREEN: Self = Self(21);
    pub const MINT: Self = Self(25);
    pub const TEAL: Self = Self(33);
    pub const CYAN: Self = Self(37);
    pub const BLUE: Self = Self(45);
    pub const VIOLET: Self = Self(49);
    pub const MAGENTA: Self = Self(53);
    pub const PINK: Self = Self(57);

    pub fn id(self) -> u8 {
        self.0
    }
}

/// Palette entries by note class, matching the hue order of [`CHROMATIC`].
const PALETTE_BY_CLASS: [PaletteColor; 12] = [
    PaletteColor::RED,
    PaletteColor::TEAL,
    PaletteColor::ORANGE,
    PaletteColor::CYAN,
    PaletteColor::YELLOW,
    PaletteColor::PEA,
    PaletteColor::VIOLET,
    PaletteColor::GREEN,
    PaletteColor::MAGENTA,
    PaletteColor::MINT,
    PaletteColor::PINK,
    PaletteColor::BLUE,
];

/// Nearest displayable palette color for a note class under a scheme.
/// Grid LEDs can't take arbitrary RGB, so this is the grid-side analog of
/// [`color_for`].
pub fn palette_for(index: usize, scheme: ColorScheme) -> PaletteColor {
    let class = index % 12;
    match scheme {
        // Spectrum and chromatic quantize to the same 12 displayable hues.
        ColorScheme::Spectrum | ColorScheme::Chromatic => PALETTE_BY_CLASS[class],
        ColorScheme::Fifths => PALETTE_BY_CLASS[class * 7 % 12],
    }
}
