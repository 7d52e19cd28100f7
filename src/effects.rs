//! Per-mode color generators driven once per supervisor iteration.

use std::time::Duration;

use log::debug;
use tokio_util::sync::CancellationToken;

use crate::{
    color::{Color, Mode},
    drivers::LedDriver,
    intent::ControlIntent,
    status::{StatusCategory, StatusHub},
    telemetry::CpuSampler,
};

const BREATH_BASE: Color = Color::rgb(160, 32, 240);
const BREATH_FRAMES: u32 = 314;
const BREATH_FRAME: Duration = Duration::from_millis(20);
const RAINBOW_DWELL: Duration = Duration::from_millis(500);

pub const RAINBOW: [Color; 7] = [
    Color::rgb(255, 0, 0),
    Color::rgb(255, 127, 0),
    Color::rgb(255, 255, 0),
    Color::rgb(0, 255, 0),
    Color::rgb(0, 0, 255),
    Color::rgb(75, 0, 130),
    Color::rgb(148, 0, 211),
];

/// Everything one effect step reads or writes.
pub struct EffectContext<'a> {
    pub driver: &'a dyn LedDriver,
    pub intent: &'a ControlIntent,
    pub status: &'a StatusHub,
    pub cpu: &'a dyn CpuSampler,
    pub cancel: &'a CancellationToken,
}

impl EffectContext<'_> {
    /// Sends `color` scaled by the current brightness and records what
    /// reached the device.
    async fn send(&self, color: Color) -> bool {
        let out = color.apply_brightness(self.intent.brightness());
        let sent = self.driver.set_color(out.r.into(), out.g.into(), out.b.into()).await;
        if sent {
            self.status.patch(|s| s.color = out);
        } else {
            debug!("Failed to send color {out} via {}", self.driver.protocol_name());
        }
        sent
    }

    /// Sleeps unless cancelled first. Returns `false` on cancellation.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Waits up to `duration` in frame-sized slices, leaving early once
    /// `mode` is deselected or the session ends.
    async fn hold(&self, mode: Mode, duration: Duration) {
        let mut left = duration;
        while !left.is_zero() && self.still(mode) {
            let slice = left.min(BREATH_FRAME);
            if !self.pause(slice).await {
                break;
            }
            left -= slice;
        }
    }

    fn still(&self, mode: Mode) -> bool {
        self.intent.mode() == mode
            && !self.cancel.is_cancelled()
            && !self.intent.disconnect_requested()
    }
}

/// Runs the selected effect one step at a time.
///
/// MANUAL and CPU send a single frame per step. BREATH plays one full sine
/// period per step and RAINBOW advances one palette entry per step, so a mode
/// change is noticed after at most one animation frame.
#[derive(Debug, Default)]
pub struct EffectEngine {
    rainbow_index: usize,
}

impl EffectEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn step(&mut self, ctx: &EffectContext<'_>) {
        match ctx.intent.mode() {
            Mode::Manual => {
                ctx.send(ctx.intent.color()).await;
            }
            Mode::Cpu => cpu_step(ctx).await,
            Mode::Breath => breath_step(ctx).await,
            Mode::Rainbow => self.rainbow_step(ctx).await,
        }
    }

    async fn rainbow_step(&mut self, ctx: &EffectContext<'_>) {
        let color = RAINBOW[self.rainbow_index % RAINBOW.len()];
        self.rainbow_index = (self.rainbow_index + 1) % RAINBOW.len();
        ctx.send(color).await;
        ctx.hold(Mode::Rainbow, RAINBOW_DWELL).await;
    }
}

/// Hard threshold ramp, no interpolation.
pub fn cpu_color(usage: f32) -> Color {
    if usage < 40.0 {
        Color::rgb(0, 200, 255)
    } else if usage < 70.0 {
        Color::rgb(138, 43, 226)
    } else {
        Color::rgb(255, 0, 0)
    }
}

/// Breath envelope for frame `i`: `(sin(i / 50) + 1) / 2` over the purple base.
pub fn breath_color(i: u32) -> Color {
    let val = ((f64::from(i) / 50.0).sin() + 1.0) / 2.0;
    let scale = |c: u8| (f64::from(c) * val) as i32;
    Color::new(scale(BREATH_BASE.r), scale(BREATH_BASE.g), scale(BREATH_BASE.b))
}

async fn cpu_step(ctx: &EffectContext<'_>) {
    match ctx.cpu.cpu_usage() {
        Ok(usage) => {
            // Whole-percent changes only, the loop samples several times a second.
            let shown = ctx.status.snapshot().cpu_usage.map(f32::round);
            if shown == Some(usage.round()) {
                ctx.status.patch(|s| s.cpu_usage = Some(usage));
            } else {
                ctx.status
                    .update("CPU updated", StatusCategory::Info, |s| s.cpu_usage = Some(usage));
            }
            ctx.send(cpu_color(usage)).await;
        }
        Err(e) => debug!("CPU sample failed: {e:#}"),
    }
}

async fn breath_step(ctx: &EffectContext<'_>) {
    for i in 0..BREATH_FRAMES {
        if !ctx.still(Mode::Breath) {
            break;
        }
        ctx.send(breath_color(i)).await;
        if !ctx.pause(BREATH_FRAME).await {
            break;
        }
    }
}
