//! Control-plane intent shared between the bridge and the supervisor.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use crate::color::{Color, Mode};

/// Target state written by the control plane and read by the worker on its
/// own cadence.
///
/// Every field is an independent atomic with a single producer, so a reader
/// sees at worst one stale iteration and never a torn value.
#[derive(Debug)]
pub struct ControlIntent {
    color: AtomicU32,
    mode: AtomicU8,
    brightness: AtomicU32,
    speed: AtomicU8,
    disconnect_requested: AtomicBool,
}

impl ControlIntent {
    pub fn new(color: Color, mode: Mode, brightness: f32, speed: u8) -> Self {
        Self {
            color: AtomicU32::new(pack(color)),
            mode: AtomicU8::new(mode.to_u8()),
            brightness: AtomicU32::new(clamp_brightness(brightness).to_bits()),
            speed: AtomicU8::new(speed),
            disconnect_requested: AtomicBool::new(false),
        }
    }

    pub fn color(&self) -> Color {
        unpack(self.color.load(Ordering::Acquire))
    }

    pub fn set_color(&self, color: Color) {
        self.color.store(pack(color), Ordering::Release);
    }

    pub fn mode(&self) -> Mode {
        Mode::from_u8(self.mode.load(Ordering::Acquire))
    }

    /// Returns the previous mode.
    pub fn set_mode(&self, mode: Mode) -> Mode {
        Mode::from_u8(self.mode.swap(mode.to_u8(), Ordering::AcqRel))
    }

    /// Brightness factor in `0.0..=1.0`.
    pub fn brightness(&self) -> f32 {
        f32::from_bits(self.brightness.load(Ordering::Acquire))
    }

    /// Stores the clamped value and returns it.
    pub fn set_brightness(&self, brightness: f32) -> f32 {
        let value = clamp_brightness(brightness);
        self.brightness.store(value.to_bits(), Ordering::Release);
        value
    }

    pub fn speed(&self) -> u8 {
        self.speed.load(Ordering::Acquire)
    }

    /// Returns the previous speed.
    pub fn set_speed(&self, speed: u8) -> u8 {
        self.speed.swap(speed, Ordering::AcqRel)
    }

    pub fn request_disconnect(&self) {
        self.disconnect_requested.store(true, Ordering::Release);
    }

    pub fn disconnect_requested(&self) -> bool {
        self.disconnect_requested.load(Ordering::Acquire)
    }

    /// Clears the flag, returning whether it was set.
    pub fn take_disconnect_request(&self) -> bool {
        self.disconnect_requested.swap(false, Ordering::AcqRel)
    }
}

impl Default for ControlIntent {
    fn default() -> Self {
        Self::new(Color::WHITE, Mode::Manual, 1.0, crate::drivers::elk_bledom::DEFAULT_SPEED)
    }
}

fn clamp_brightness(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        1.0
    }
}

fn pack(c: Color) -> u32 {
    u32::from_be_bytes([0, c.r, c.g, c.b])
}

fn unpack(raw: u32) -> Color {
    let [_, r, g, b] = raw.to_be_bytes();
    Color::rgb(r, g, b)
}
