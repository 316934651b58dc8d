//! RC charge-time measurement.

use super::{PinHandleManager, PinMode};
use crate::error::{ControlError, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Discharge, poll and timeout intervals for [`RcMeter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RcTiming {
    pub discharge_us: u64,
    pub poll_interval_us: u64,
    pub timeout_us: u64,
}

impl Default for RcTiming {
    fn default() -> Self {
        Self {
            discharge_us: 50_000,
            poll_interval_us: 1_000,
            timeout_us: 500_000,
        }
    }
}

/// Measures how long a capacitor takes to charge through the line.
#[derive(Debug, Clone, Copy, Default)]
pub struct RcMeter {
    timing: RcTiming,
}

impl RcMeter {
    pub fn new(timing: RcTiming) -> Self {
        Self { timing }
    }

    pub fn timing(&self) -> RcTiming {
        self.timing
    }

    /// Discharge `pin`, release it, and return the microseconds until it reads HIGH.
    pub fn measure(&self, pins: &mut PinHandleManager, pin: u32) -> Result<u64> {
        pins.set_low(pin)
            .with_context(|| format!("measure_rc: discharging pin {} failed", pin))?;
        thread::sleep(Duration::from_micros(self.timing.discharge_us));

        pins.ensure_pin_mode(pin, PinMode::InputHighZ)
            .with_context(|| format!("measure_rc: releasing pin {} failed", pin))?;

        let timeout = Duration::from_micros(self.timing.timeout_us);
        let poll = Duration::from_micros(self.timing.poll_interval_us);
        let start = Instant::now();
        while !pins.read_raw(pin).context("measure_rc: reading line failed")? {
            if start.elapsed() >= timeout {
                return Err(ControlError::timeout(format!(
                    "measure_rc: pin {} still LOW after {}µs",
                    pin, self.timing.timeout_us
                )));
            }
            thread::sleep(poll);
        }

        let elapsed = start.elapsed();
        debug!(pin, elapsed_us = elapsed.as_micros() as u64, "RC charge detected");
        info!("MeasRC pin {}: {:.2} ms", pin, elapsed.as_secs_f64() * 1e3);
        Ok(elapsed.as_micros() as u64)
    }
}
