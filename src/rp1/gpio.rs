//! GPIO bank 0, RIO and PAD register views.

use super::window::{Region, RegisterWindow};
use crate::error::{ControlError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Peripheral offset of the IO_BANK0 status/control array.
pub const GPIO_BASE: usize = 0xD_0000;
/// Peripheral offset of SYS_RIO0.
pub const RIO_BASE: usize = 0xE_0000;
/// Peripheral offset of PADS_BANK0.
pub const PAD_BASE: usize = 0xF_0000;

/// Lines in bank 0.
pub const BANK0_PINS: u32 = 28;

/// Function-select field of a GPIO control register.
pub const CTRL_FUNCSEL_MASK: u32 = 0x1F;

/// Alternate function numbers used by this crate.
pub const FUNC_PWM: u32 = 0;
pub const FUNC_PWM_ALT: u32 = 3;
pub const FUNC_RIO: u32 = 5;
pub const FUNC_NULL: u32 = 0x1F;

const RIO_OUT: usize = 0x0;
const RIO_OE: usize = 0x4;
const RIO_IN: usize = 0x8;
const RIO_IN_SYNC: usize = 0xC;
const RIO_XOR: usize = 0x1000;
const RIO_SET: usize = 0x2000;
const RIO_CLR: usize = 0x3000;

/// Reject pins outside bank 0.
pub fn check_pin(pin: u32) -> Result<()> {
    if pin >= BANK0_PINS {
        return Err(ControlError::validation(format!(
            "pin {} is outside bank 0 (0..{})",
            pin, BANK0_PINS
        )));
    }
    Ok(())
}

/// Per-pin status and control registers.
pub struct GpioView<'a> {
    regs: Region<'a>,
}

impl<'a> GpioView<'a> {
    pub fn new(window: &'a RegisterWindow) -> Self {
        Self {
            regs: window.region(GPIO_BASE, BANK0_PINS as usize * 8),
        }
    }

    pub fn status(&self, pin: u32) -> Result<u32> {
        check_pin(pin)?;
        self.regs.read(pin as usize * 8)
    }

    pub fn ctrl(&self, pin: u32) -> Result<u32> {
        check_pin(pin)?;
        self.regs.read(pin as usize * 8 + 4)
    }

    /// Current function select of `pin`.
    pub fn function(&self, pin: u32) -> Result<u32> {
        Ok(self.ctrl(pin)? & CTRL_FUNCSEL_MASK)
    }

    /// Replace the function-select bits, keeping the rest of the control register.
    pub fn set_function(&self, pin: u32, func: u32) -> Result<()> {
        check_pin(pin)?;
        let ctrl = self.regs.modify(pin as usize * 8 + 4, |v| {
            (v & !CTRL_FUNCSEL_MASK) | (func & CTRL_FUNCSEL_MASK)
        })?;
        debug!(pin, func, ctrl = format_args!("0x{:08x}", ctrl), "function select");
        Ok(())
    }
}

/// Registered IO block: output, output enable and input for all of bank 0.
///
/// Writes through the XOR, SET and CLR alias pages only affect the bits that
/// are set in the written mask.
pub struct RioView<'a> {
    regs: Region<'a>,
}

impl<'a> RioView<'a> {
    pub fn new(window: &'a RegisterWindow) -> Self {
        Self {
            regs: window.region(RIO_BASE, RIO_CLR + 0x10),
        }
    }

    pub fn out(&self) -> Result<u32> {
        self.regs.read(RIO_OUT)
    }

    pub fn output_enable(&self) -> Result<u32> {
        self.regs.read(RIO_OE)
    }

    pub fn input(&self) -> Result<u32> {
        self.regs.read(RIO_IN)
    }

    pub fn input_sync(&self) -> Result<u32> {
        self.regs.read(RIO_IN_SYNC)
    }

    pub fn set_out_mask(&self, mask: u32) -> Result<()> {
        self.regs.write(RIO_SET + RIO_OUT, mask)
    }

    pub fn clear_out_mask(&self, mask: u32) -> Result<()> {
        self.regs.write(RIO_CLR + RIO_OUT, mask)
    }

    pub fn xor_out_mask(&self, mask: u32) -> Result<()> {
        self.regs.write(RIO_XOR + RIO_OUT, mask)
    }

    /// Set the bits of `mask` in OUT to the matching bits of `value`.
    pub fn write_out_masked(&self, mask: u32, value: u32) -> Result<()> {
        let out = self.out()?;
        self.xor_out_mask((out ^ value) & mask)
    }

    /// Make the pins in `mask` outputs.
    pub fn set_output_mask(&self, mask: u32) -> Result<()> {
        self.regs.write(RIO_SET + RIO_OE, mask)
    }

    /// Make the pins in `mask` inputs.
    pub fn set_input_mask(&self, mask: u32) -> Result<()> {
        self.regs.write(RIO_CLR + RIO_OE, mask)
    }

    /// Set the bits of `mask` in OE to the matching bits of `value`.
    pub fn write_oe_masked(&self, mask: u32, value: u32) -> Result<()> {
        let oe = self.output_enable()?;
        self.regs.write(RIO_XOR + RIO_OE, (oe ^ value) & mask)
    }

    /// Drive one pin.
    pub fn write_pin(&self, pin: u32, high: bool) -> Result<()> {
        check_pin(pin)?;
        if high {
            self.set_out_mask(1 << pin)
        } else {
            self.clear_out_mask(1 << pin)
        }
    }

    /// Sample one pin's input.
    pub fn read_pin(&self, pin: u32) -> Result<bool> {
        check_pin(pin)?;
        Ok(self.input()? & (1 << pin) != 0)
    }
}

/// Pad pull resistor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pull {
    None,
    Up,
    Down,
}

/// Pad output slew rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Slew {
    Slow,
    Fast,
}

/// Pad output drive strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Drive {
    Ma2,
    Ma4,
    Ma8,
    Ma12,
}

impl Drive {
    fn bits(self) -> u32 {
        match self {
            Drive::Ma2 => 0,
            Drive::Ma4 => 1,
            Drive::Ma8 => 2,
            Drive::Ma12 => 3,
        }
    }

    fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            0 => Drive::Ma2,
            1 => Drive::Ma4,
            2 => Drive::Ma8,
            _ => Drive::Ma12,
        }
    }
}

pub const PAD_SLEW_FAST: u32 = 1 << 0;
pub const PAD_SCHMITT: u32 = 1 << 1;
pub const PAD_PULL_DOWN: u32 = 1 << 2;
pub const PAD_PULL_UP: u32 = 1 << 3;
pub const PAD_DRIVE_SHIFT: u32 = 4;
pub const PAD_DRIVE_MASK: u32 = 0x3 << PAD_DRIVE_SHIFT;
pub const PAD_INPUT_ENABLE: u32 = 1 << 6;
pub const PAD_OUTPUT_DISABLE: u32 = 1 << 7;

const PAD_PULL_MASK: u32 = PAD_PULL_UP | PAD_PULL_DOWN;

/// A complete pad register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PadConfig {
    pub pull: Pull,
    pub schmitt: bool,
    pub slew: Slew,
    pub drive: Drive,
    pub input_enable: bool,
    pub output_disable: bool,
}

impl Default for PadConfig {
    /// The reset value of a bank 0 pad.
    fn default() -> Self {
        Self {
            pull: Pull::Down,
            schmitt: true,
            slew: Slew::Slow,
            drive: Drive::Ma4,
            input_enable: true,
            output_disable: false,
        }
    }
}

impl PadConfig {
    /// Pad used for pins handed to PWM: no pull, 8mA, fast slew, output on.
    pub fn pwm() -> Self {
        Self {
            pull: Pull::None,
            schmitt: false,
            slew: Slew::Fast,
            drive: Drive::Ma8,
            input_enable: false,
            output_disable: false,
        }
    }

    /// Pad used for RIO pins: input and output both enabled.
    pub fn rio() -> Self {
        Self {
            pull: Pull::None,
            ..Self::default()
        }
    }

    pub fn with_pull(mut self, pull: Pull) -> Self {
        self.pull = pull;
        self
    }

    pub fn with_drive(mut self, drive: Drive) -> Self {
        self.drive = drive;
        self
    }

    pub fn with_slew(mut self, slew: Slew) -> Self {
        self.slew = slew;
        self
    }

    pub fn with_schmitt(mut self, schmitt: bool) -> Self {
        self.schmitt = schmitt;
        self
    }

    pub fn bits(&self) -> u32 {
        let mut v = self.drive.bits() << PAD_DRIVE_SHIFT;
        if self.slew == Slew::Fast {
            v |= PAD_SLEW_FAST;
        }
        if self.schmitt {
            v |= PAD_SCHMITT;
        }
        v |= match self.pull {
            Pull::None => 0,
            Pull::Up => PAD_PULL_UP,
            Pull::Down => PAD_PULL_DOWN,
        };
        if self.input_enable {
            v |= PAD_INPUT_ENABLE;
        }
        if self.output_disable {
            v |= PAD_OUTPUT_DISABLE;
        }
        v
    }

    /// Decode a raw pad value. Both pulls set reads as pull-up.
    pub fn from_bits(v: u32) -> Self {
        Self {
            pull: if v & PAD_PULL_UP != 0 {
                Pull::Up
            } else if v & PAD_PULL_DOWN != 0 {
                Pull::Down
            } else {
                Pull::None
            },
            schmitt: v & PAD_SCHMITT != 0,
            slew: if v & PAD_SLEW_FAST != 0 { Slew::Fast } else { Slew::Slow },
            drive: Drive::from_bits(v >> PAD_DRIVE_SHIFT),
            input_enable: v & PAD_INPUT_ENABLE != 0,
            output_disable: v & PAD_OUTPUT_DISABLE != 0,
        }
    }
}

/// Voltage select word followed by one pad register per pin.
pub struct PadView<'a> {
    regs: Region<'a>,
}

impl<'a> PadView<'a> {
    pub fn new(window: &'a RegisterWindow) -> Self {
        Self {
            regs: window.region(PAD_BASE, 4 + BANK0_PINS as usize * 4),
        }
    }

    fn offset(pin: u32) -> Result<usize> {
        check_pin(pin)?;
        Ok(4 + pin as usize * 4)
    }

    pub fn voltage_select(&self) -> Result<u32> {
        self.regs.read(0)
    }

    pub fn raw(&self, pin: u32) -> Result<u32> {
        self.regs.read(Self::offset(pin)?)
    }

    pub fn write_raw(&self, pin: u32, value: u32) -> Result<()> {
        self.regs.write(Self::offset(pin)?, value)
    }

    pub fn config(&self, pin: u32) -> Result<PadConfig> {
        self.raw(pin).map(PadConfig::from_bits)
    }

    pub fn set_config(&self, pin: u32, config: &PadConfig) -> Result<()> {
        self.write_raw(pin, config.bits())
    }

    fn update(&self, pin: u32, clear: u32, set: u32) -> Result<()> {
        let v = self.regs.modify(Self::offset(pin)?, |v| (v & !clear) | set)?;
        debug!(pin, pad = format_args!("0x{:02x}", v), "pad updated");
        Ok(())
    }

    pub fn set_pull(&self, pin: u32, pull: Pull) -> Result<()> {
        let set = match pull {
            Pull::None => 0,
            Pull::Up => PAD_PULL_UP,
            Pull::Down => PAD_PULL_DOWN,
        };
        self.update(pin, PAD_PULL_MASK, set)
    }

    pub fn set_schmitt(&self, pin: u32, enabled: bool) -> Result<()> {
        self.update(pin, PAD_SCHMITT, if enabled { PAD_SCHMITT } else { 0 })
    }

    pub fn set_slew(&self, pin: u32, slew: Slew) -> Result<()> {
        let set = if slew == Slew::Fast { PAD_SLEW_FAST } else { 0 };
        self.update(pin, PAD_SLEW_FAST, set)
    }

    pub fn set_drive(&self, pin: u32, drive: Drive) -> Result<()> {
        self.update(pin, PAD_DRIVE_MASK, drive.bits() << PAD_DRIVE_SHIFT)
    }

    pub fn pull(&self, pin: u32) -> Result<Pull> {
        self.config(pin).map(|c| c.pull)
    }

    pub fn schmitt(&self, pin: u32) -> Result<bool> {
        self.config(pin).map(|c| c.schmitt)
    }

    pub fn slew(&self, pin: u32) -> Result<Slew> {
        self.config(pin).map(|c| c.slew)
    }

    pub fn drive(&self, pin: u32) -> Result<Drive> {
        self.config(pin).map(|c| c.drive)
    }
}

/// Route `pin` to `func`: write the pad first, then the function select.
pub fn set_function(window: &RegisterWindow, pin: u32, func: u32, pad: &PadConfig) -> Result<()> {
    PadView::new(window).set_config(pin, pad)?;
    GpioView::new(window).set_function(pin, func)
}
