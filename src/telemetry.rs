//! CPU utilisation feed for the CPU effect.

use std::sync::{Mutex, PoisonError};

use anyhow::{Result, ensure};
use sysinfo::System;

/// Synchronous "current CPU utilisation in percent" source.
#[cfg_attr(test, mockall::automock)]
pub trait CpuSampler: Send + Sync {
    fn cpu_usage(&self) -> Result<f32>;
}

/// Global CPU usage via `sysinfo`.
///
/// The first sample after construction reads as 0%; usage is computed
/// between two consecutive refreshes.
pub struct SysinfoCpuSampler {
    system: Mutex<System>,
}

impl SysinfoCpuSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SysinfoCpuSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuSampler for SysinfoCpuSampler {
    fn cpu_usage(&self) -> Result<f32> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_cpu_usage();
        let usage = system.global_cpu_usage();
        ensure!(usage.is_finite(), "CPU usage sample is not a number");
        Ok(usage.clamp(0.0, 100.0))
    }
}
