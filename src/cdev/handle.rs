//! Single-owner line handle management.

use super::{GpioChip, LineHandle, PinMode};
use crate::error::{ControlError, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use tracing::{debug, error, info};

/// The one line handle a [`PinHandleManager`] currently owns.
struct PinHandle {
    pin: u32,
    mode: PinMode,
    line: Box<dyn LineHandle>,
}

/// Outcome of [`PinHandleManager::check_output_sanity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanityReport {
    pub pin: u32,
    pub passed: bool,
    pub reason: String,
}

/// Owns at most one open line handle on a GPIO chip.
///
/// Any request for a different pin or mode closes the current handle before
/// opening the new one.
pub struct PinHandleManager {
    chip: Rc<dyn GpioChip>,
    consumer: String,
    handle: Option<PinHandle>,
}

impl PinHandleManager {
    pub fn new(chip: Rc<dyn GpioChip>, consumer: impl Into<String>) -> Self {
        Self {
            chip,
            consumer: consumer.into(),
            handle: None,
        }
    }

    /// Pin and mode of the currently open handle, if any.
    pub fn owned(&self) -> Option<(u32, PinMode)> {
        self.handle.as_ref().map(|h| (h.pin, h.mode))
    }

    /// Make sure `pin` is open in `mode`; no-op when it already is.
    pub fn ensure_pin_mode(&mut self, pin: u32, mode: PinMode) -> Result<()> {
        if let Some(handle) = &self.handle {
            if handle.pin == pin && handle.mode == mode {
                return Ok(());
            }
        }

        if let Some(previous) = self.handle.take() {
            debug!(pin = previous.pin, mode = ?previous.mode, "closing line handle");
        }

        let line = self
            .chip
            .request_line(pin, mode, &self.consumer)
            .with_context(|| format!("ensure_pin_mode({}, {:?}) failed", pin, mode))?;
        info!("Line {} opened as {:?}", pin, mode);
        self.handle = Some(PinHandle { pin, mode, line });
        Ok(())
    }

    fn line(&self) -> Result<&dyn LineHandle> {
        self.handle
            .as_ref()
            .map(|h| h.line.as_ref())
            .ok_or_else(|| ControlError::state("no line handle is open"))
    }

    /// Drive `pin` to `high`, opening it as an output if needed.
    pub fn write(&mut self, pin: u32, high: bool) -> Result<()> {
        self.ensure_pin_mode(pin, PinMode::Output)?;
        self.line()?
            .set_value(high)
            .with_context(|| format!("writing {} to line {} failed", u8::from(high), pin))
    }

    pub fn set_high(&mut self, pin: u32) -> Result<()> {
        self.write(pin, true).map_err(|e| {
            error!("set_high({}) failed: {}", pin, e);
            e
        })
    }

    pub fn set_low(&mut self, pin: u32) -> Result<()> {
        self.write(pin, false).map_err(|e| {
            error!("set_low({}) failed: {}", pin, e);
            e
        })
    }

    /// Read `pin` as a high-impedance input.
    pub fn read_raw(&mut self, pin: u32) -> Result<bool> {
        self.read_with_mode(pin, PinMode::InputHighZ)
    }

    /// Read `pin` with the given input bias.
    pub fn read_with_mode(&mut self, pin: u32, mode: PinMode) -> Result<bool> {
        if mode.is_output() {
            return Err(ControlError::validation(
                "read_with_mode needs an input mode",
            ));
        }
        self.ensure_pin_mode(pin, mode)
            .with_context(|| format!("failed to configure pin {} as input", pin))?;
        self.line()?.get_value()
    }

    /// Close the handle if `pin` owns it.
    ///
    /// Releasing with nothing open succeeds. Asking to release a pin other
    /// than the owner is a [`ControlError::State`] and leaves the owner open.
    pub fn release_pin(&mut self, pin: u32) -> Result<()> {
        match &self.handle {
            None => Ok(()),
            Some(handle) if handle.pin != pin => {
                error!(
                    "release_pin: requested pin {} but currently own pin {}",
                    pin, handle.pin
                );
                Err(ControlError::state(format!(
                    "release_pin({}) refused: line handle is owned by pin {}",
                    pin, handle.pin
                )))
            }
            Some(_) => {
                self.handle = None;
                debug!(pin, "line handle released");
                Ok(())
            }
        }
    }

    /// Drive HIGH then LOW, reading back after each write.
    ///
    /// A line that does not follow the written level is reported through the
    /// returned [`SanityReport`], not as an error. Errors are reserved for
    /// handle or ioctl failures.
    pub fn check_output_sanity(&mut self, pin: u32) -> Result<SanityReport> {
        self.ensure_pin_mode(pin, PinMode::Output)
            .with_context(|| format!("ensure output for pin {} failed", pin))?;

        for (level, hint) in [
            (true, "line may not really be driven"),
            (false, "line may still be Hi-Z or overridden"),
        ] {
            let line = self.line()?;
            line.set_value(level).with_context(|| {
                format!("sanity check: SET {} failed on pin {}", level_name(level), pin)
            })?;
            let read = line.get_value().with_context(|| {
                format!(
                    "sanity check: GET after {} failed on pin {}",
                    level_name(level),
                    pin
                )
            })?;
            if read != level {
                return Ok(SanityReport {
                    pin,
                    passed: false,
                    reason: format!(
                        "wrote {} but read back {} on pin {} ({})",
                        level_name(level),
                        level_name(read),
                        pin,
                        hint
                    ),
                });
            }
        }

        Ok(SanityReport {
            pin,
            passed: true,
            reason: format!("Pin {} can be driven HIGH and LOW as GPIO output", pin),
        })
    }
}

fn level_name(high: bool) -> &'static str {
    if high {
        "HIGH"
    } else {
        "LOW"
    }
}
