//! Color values, effect modes and presets.

use std::{fmt, str::FromStr};

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};

/// RGB color with channels clamped to `0..=255` at construction.
///
/// `Color` is a plain value type; it is copied wherever it is consumed.
///
/// # Example
///
/// ```
/// use led_commander::color::Color;
///
/// let c = Color::new(300, -4, 128);
/// assert_eq!(c.to_tuple(), (255, 0, 128));
/// assert_eq!(c.apply_brightness(0.5).to_tuple(), (127, 0, 64));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    /// Builds a color from possibly out-of-range channel values, clamping each one.
    pub fn new(r: i32, g: i32, b: i32) -> Self {
        Self {
            r: clamp_channel(r),
            g: clamp_channel(g),
            b: clamp_channel(b),
        }
    }

    /// Builds a color from channels that are already in range.
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Scales every channel by `factor`, which is itself clamped to `0.0..=1.0`.
    ///
    /// Channels are truncated towards zero after scaling.
    pub fn apply_brightness(self, factor: f32) -> Self {
        let factor = if factor.is_finite() {
            factor.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let scale = |c: u8| (f32::from(c) * factor) as i32;
        Self::new(scale(self.r), scale(self.g), scale(self.b))
    }

    /// Formats the color as `#RRGGBB`.
    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    /// Parses `#RRGGBB` or `RRGGBB`.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let digits = hex.trim().trim_start_matches('#');
        if digits.len() != 6 || !digits.is_ascii() {
            bail!("Invalid hex color: {hex}");
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&digits[range], 16)
                .map_err(|e| anyhow!("Failed to parse hex color {hex}: {e}"))
        };
        Ok(Self::rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }

    pub const fn to_tuple(self) -> (u8, u8, u8) {
        (self.r, self.g, self.b)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<(u8, u8, u8)> for Color {
    fn from((r, g, b): (u8, u8, u8)) -> Self {
        Self::rgb(r, g, b)
    }
}

/// Clamps an arbitrary integer into a color channel.
pub fn clamp_channel(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// Effect mode driving the output stream. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    #[default]
    Manual,
    Cpu,
    Breath,
    Rainbow,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Manual, Mode::Cpu, Mode::Breath, Mode::Rainbow];

    /// Canonical upper-case name, also used as the key into driver mode maps.
    pub const fn as_str(self) -> &'static str {
        match self {
            Mode::Manual => "MANUAL",
            Mode::Cpu => "CPU",
            Mode::Breath => "BREATH",
            Mode::Rainbow => "RAINBOW",
        }
    }

    pub(crate) const fn to_u8(self) -> u8 {
        match self {
            Mode::Manual => 0,
            Mode::Cpu => 1,
            Mode::Breath => 2,
            Mode::Rainbow => 3,
        }
    }

    pub(crate) const fn from_u8(value: u8) -> Self {
        match value {
            1 => Mode::Cpu,
            2 => Mode::Breath,
            3 => Mode::Rainbow,
            _ => Mode::Manual,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_uppercase();
        Mode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == wanted)
            .ok_or_else(|| anyhow!("Unknown mode '{s}', expected one of MANUAL, CPU, BREATH, RAINBOW"))
    }
}

/// Named color shortcut.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorPreset {
    pub name: String,
    pub color: Color,
    #[serde(default)]
    pub description: String,
}

impl ColorPreset {
    pub fn new(name: &str, color: Color, description: &str) -> Self {
        Self {
            name: name.to_string(),
            color,
            description: description.to_string(),
        }
    }

    /// Built-in palette offered before any user presets.
    pub fn default_presets() -> Vec<ColorPreset> {
        vec![
            ColorPreset::new("Red", Color::rgb(255, 0, 0), "Pure red"),
            ColorPreset::new("Green", Color::rgb(0, 255, 0), "Pure green"),
            ColorPreset::new("Blue", Color::rgb(0, 0, 255), "Pure blue"),
            ColorPreset::new("White", Color::WHITE, "Full brightness white"),
            ColorPreset::new("Cyan", Color::rgb(0, 255, 255), "Cyan"),
            ColorPreset::new("Magenta", Color::rgb(255, 0, 255), "Magenta"),
            ColorPreset::new("Yellow", Color::rgb(255, 255, 0), "Yellow"),
            ColorPreset::new("Purple", Color::rgb(128, 0, 128), "Dark purple"),
            ColorPreset::new("Orange", Color::rgb(255, 165, 0), "Orange"),
        ]
    }
}
