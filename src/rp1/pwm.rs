//! RP1 PWM blocks and their shared clock.
//!
//! Each block has a global control register, whose low bits enable the
//! channels and whose top bit latches pending channel settings, followed by
//! four channels of {ctrl, range, phase, duty}. Both blocks are clocked from
//! `CLK_PWM0` in the clocks block.

use super::gpio::{self, PadConfig, FUNC_PWM, FUNC_PWM_ALT};
use super::window::{Region, RegisterWindow};
use crate::error::{ControlError, Result};
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use tracing::{debug, error, info};

/// Peripheral offsets of PWM0 and PWM1.
pub const PWM_BASES: [usize; 2] = [0x9_8000, 0x9_C000];
/// Peripheral offset of the clocks block.
pub const CLOCKS_BASE: usize = 0x1_8000;
/// Offset of the `CLK_PWM0` registers inside the clocks block.
pub const CLK_PWM0: usize = 0x74;

const GLOBAL_CTRL: usize = 0x00;
const FIFO_CTRL: usize = 0x04;
const COMMON_RANGE: usize = 0x08;
const COMMON_DUTY: usize = 0x0C;
const DUTY_FIFO: usize = 0x10;
const CHANNEL_BASE: usize = 0x14;
const CHANNEL_STRIDE: usize = 0x10;
const BLOCK_LEN: usize = CHANNEL_BASE + 4 * CHANNEL_STRIDE;

const CHAN_CTRL: usize = 0x0;
const CHAN_RANGE: usize = 0x4;
const CHAN_PHASE: usize = 0x8;
const CHAN_DUTY: usize = 0xC;

const CLK_CTRL: usize = 0x0;
const CLK_DIV_INT: usize = 0x4;
const CLK_DIV_FRAC: usize = 0x8;
const CLK_SEL: usize = 0xC;

/// Global control bit latching channel updates at the next period boundary.
pub const GLOBAL_APPLY: u32 = 0x8000_0000;
/// Per-channel enable bit. Shares bit 0 with the mode field.
pub const CHANNEL_ENABLE: u32 = 0x1;
pub const CHANNEL_INVERT: u32 = 0x8;
pub const CHANNEL_MODE_MASK: u32 = 0x7;

/// Clock control value: enabled, sourced from the 50 MHz crystal.
pub const CLOCK_CTRL_INIT: u32 = 0x1100_0840;
pub const CLOCK_SEL_INIT: u32 = 1;

/// Output mode of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PwmMode {
    Zero = 0,
    TrailingEdge = 1,
    PhaseCorrect = 2,
    Pde = 3,
    MsbSerial = 4,
    Ppm = 5,
    LeadingEdge = 6,
    LsbSerial = 7,
}

impl PwmMode {
    pub fn bits(self) -> u32 {
        self as u32
    }

    pub fn from_bits(bits: u32) -> Self {
        match bits & CHANNEL_MODE_MASK {
            0 => PwmMode::Zero,
            1 => PwmMode::TrailingEdge,
            2 => PwmMode::PhaseCorrect,
            3 => PwmMode::Pde,
            4 => PwmMode::MsbSerial,
            5 => PwmMode::Ppm,
            6 => PwmMode::LeadingEdge,
            _ => PwmMode::LsbSerial,
        }
    }
}

/// PWM channel driving `pin`, if it has one.
pub fn channel_for(pin: u32) -> Option<usize> {
    match pin {
        12 => Some(0),
        13 => Some(1),
        14 | 18 => Some(2),
        15 | 19 => Some(3),
        _ => None,
    }
}

/// Alternate function routing `pin` to its PWM channel.
pub fn function_for(pin: u32) -> Option<u32> {
    match pin {
        12..=15 => Some(FUNC_PWM),
        18 | 19 => Some(FUNC_PWM_ALT),
        _ => None,
    }
}

fn channel(pin: u32) -> Result<usize> {
    channel_for(pin).ok_or_else(|| {
        ControlError::validation(format!("pin {} has no PWM channel", pin))
    })
}

/// PWM settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PwmConfig {
    /// Frequency of the PWM clock source before division
    pub clock_hz: u32,
    /// PWM block the engine drives (0 or 1)
    pub block: usize,
}

impl Default for PwmConfig {
    fn default() -> Self {
        Self {
            clock_hz: 50_000_000,
            block: 0,
        }
    }
}

/// Register contents of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRegs {
    pub ctrl: u32,
    pub range: u32,
    pub phase: u32,
    pub duty: u32,
}

/// Register contents of a block's global section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalRegs {
    pub ctrl: u32,
    pub fifo_ctrl: u32,
    pub common_range: u32,
    pub common_duty: u32,
    pub duty_fifo: u32,
}

/// Register contents of the PWM clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockRegs {
    pub ctrl: u32,
    pub div_int: u32,
    pub div_frac: u32,
    pub sel: u32,
}

/// Range and duty producing `freq` Hz at `duty_percent`, given the clock.
pub fn derive_range_duty(
    clock_hz: u32,
    div: u32,
    freq: u32,
    duty_percent: u32,
) -> Result<(u32, u32)> {
    if div == 0 {
        return Err(ControlError::validation("PWM clock divider is 0; call set_clock first"));
    }
    if freq == 0 {
        return Err(ControlError::validation("PWM frequency must be > 0"));
    }
    if duty_percent > 100 {
        return Err(ControlError::validation(format!(
            "duty cycle must be 0..=100% (got {}%)",
            duty_percent
        )));
    }
    let pwm_hz = clock_hz / div;
    let ticks = pwm_hz / freq;
    if ticks == 0 {
        return Err(ControlError::validation(format!(
            "{} Hz is above the {} Hz PWM clock",
            freq, pwm_hz
        )));
    }
    let range = ticks - 1;
    let duty = (u64::from(range) * u64::from(duty_percent) / 100) as u32;
    Ok((range, duty))
}

/// Drives one PWM block and the shared PWM clock.
pub struct PwmEngine {
    window: Rc<RegisterWindow>,
    config: PwmConfig,
}

impl PwmEngine {
    pub fn new(window: Rc<RegisterWindow>, config: PwmConfig) -> Result<Self> {
        if config.block >= PWM_BASES.len() {
            return Err(ControlError::validation(format!(
                "PWM block {} does not exist",
                config.block
            )));
        }
        Ok(Self { window, config })
    }

    pub fn config(&self) -> PwmConfig {
        self.config
    }

    fn block(&self, block: usize) -> Result<Region<'_>> {
        let base = PWM_BASES.get(block).copied().ok_or_else(|| {
            ControlError::validation(format!("PWM block {} does not exist", block))
        })?;
        Ok(self.window.region(base, BLOCK_LEN))
    }

    fn clock(&self) -> Region<'_> {
        self.window.region(CLOCKS_BASE + CLK_PWM0, 0x10)
    }

    fn chan(ch: usize, reg: usize) -> usize {
        CHANNEL_BASE + ch * CHANNEL_STRIDE + reg
    }

    fn apply(&self, regs: &Region<'_>) -> Result<()> {
        regs.modify(GLOBAL_CTRL, |v| v | GLOBAL_APPLY).map(|_| ())
    }

    fn fail<T>(op: &str, pin: u32, result: Result<T>) -> Result<T> {
        result.map_err(|e| {
            error!("{}({}) failed: {}", op, pin, e);
            e
        })
    }

    /// Enable the PWM clock and select its source.
    pub fn init_clock(&self) -> Result<()> {
        let clk = self.clock();
        clk.write(CLK_CTRL, CLOCK_CTRL_INIT)?;
        clk.write(CLK_SEL, CLOCK_SEL_INIT)?;
        debug!("PWM clock initialised");
        Ok(())
    }

    /// Write the clock divider integer and fraction.
    pub fn set_clock(&self, div: u32, frac: u32) -> Result<()> {
        let clk = self.clock();
        clk.write(CLK_DIV_INT, div)?;
        clk.write(CLK_DIV_FRAC, frac)?;
        info!("PWM clock divider {}.{}", div, frac);
        Ok(())
    }

    /// Route `pin` to its PWM alternate function with the PWM pad setup.
    pub fn map_pin(&self, pin: u32) -> Result<()> {
        let func = function_for(pin).ok_or_else(|| {
            ControlError::validation(format!("pin {} cannot be mapped to a PWM channel", pin))
        });
        Self::fail("map_pin", pin, func.and_then(|func| {
            gpio::set_function(&self.window, pin, func, &PadConfig::pwm())
        }))
    }

    /// Derive range and duty from the current divider and apply them.
    pub fn set_frequency_duty(&self, pin: u32, freq: u32, duty_percent: u32) -> Result<()> {
        let result = channel(pin).and_then(|_| {
            let div = self.clock().read(CLK_DIV_INT)?;
            let (range, duty) = derive_range_duty(self.config.clock_hz, div, freq, duty_percent)?;
            debug!(pin, freq, duty_percent, range, duty, "derived PWM timing");
            self.set_range_duty_phase(pin, range, duty, 0)
        });
        Self::fail("set_frequency_duty", pin, result)
    }

    /// Write range, duty and phase of the pin's channel, then latch them.
    pub fn set_range_duty_phase(&self, pin: u32, range: u32, duty: u32, phase: u32) -> Result<()> {
        let result = channel(pin).and_then(|ch| {
            let regs = self.block(self.config.block)?;
            regs.write(Self::chan(ch, CHAN_RANGE), range)?;
            regs.write(Self::chan(ch, CHAN_DUTY), duty)?;
            regs.write(Self::chan(ch, CHAN_PHASE), phase)?;
            self.apply(&regs)?;
            info!(
                "PWM pin {} (channel {}): range {}, duty {}, phase {}",
                pin, ch, range, duty, phase
            );
            Ok(())
        });
        Self::fail("set_range_duty_phase", pin, result)
    }

    /// Set the channel's bit in the global enable mask and its own enable bit.
    ///
    /// The enable bit is bit 0 of the channel control register, which is also
    /// the low bit of the mode field. Enabling an even mode therefore reads
    /// back as the next odd one (`PhaseCorrect` becomes `Pde`).
    pub fn enable(&self, pin: u32) -> Result<()> {
        let result = channel(pin).and_then(|ch| {
            let regs = self.block(self.config.block)?;
            regs.modify(GLOBAL_CTRL, |v| v | (1 << ch))?;
            regs.modify(Self::chan(ch, CHAN_CTRL), |v| v | CHANNEL_ENABLE)?;
            self.apply(&regs)?;
            info!("PWM channel {} enabled (pin {})", ch, pin);
            Ok(())
        });
        Self::fail("enable", pin, result)
    }

    /// Clear the channel's bit in the global enable mask and its own enable bit.
    ///
    /// Clearing the enable bit also clears bit 0 of the mode field, so an odd
    /// mode reads back as the even one below it.
    pub fn disable(&self, pin: u32) -> Result<()> {
        let result = channel(pin).and_then(|ch| {
            let regs = self.block(self.config.block)?;
            regs.modify(GLOBAL_CTRL, |v| v & !(1 << ch))?;
            regs.modify(Self::chan(ch, CHAN_CTRL), |v| v & !CHANNEL_ENABLE)?;
            self.apply(&regs)?;
            info!("PWM channel {} disabled (pin {})", ch, pin);
            Ok(())
        });
        Self::fail("disable", pin, result)
    }

    /// Change the channel's output mode.
    ///
    /// The channel is stopped, the clock initialised and the pin routed
    /// before the mode bits change. The channel stays disabled afterwards,
    /// though an odd mode leaves bit 0 set, which the hardware reads as the
    /// channel enable bit.
    pub fn set_mode(&self, pin: u32, mode: PwmMode) -> Result<()> {
        let result = channel(pin).and_then(|ch| {
            self.disable(pin)?;
            self.init_clock()?;
            self.map_pin(pin)?;
            let regs = self.block(self.config.block)?;
            regs.modify(Self::chan(ch, CHAN_CTRL), |v| {
                (v & !CHANNEL_MODE_MASK) | mode.bits()
            })?;
            self.apply(&regs)?;
            info!("PWM channel {} mode {:?}", ch, mode);
            Ok(())
        });
        Self::fail("set_mode", pin, result)
    }

    pub fn set_invert(&self, pin: u32) -> Result<()> {
        Self::fail("set_invert", pin, self.update_ctrl(pin, |v| v | CHANNEL_INVERT))
    }

    pub fn clr_invert(&self, pin: u32) -> Result<()> {
        Self::fail("clr_invert", pin, self.update_ctrl(pin, |v| v & !CHANNEL_INVERT))
    }

    fn update_ctrl(&self, pin: u32, f: impl FnOnce(u32) -> u32) -> Result<()> {
        let ch = channel(pin)?;
        let regs = self.block(self.config.block)?;
        regs.modify(Self::chan(ch, CHAN_CTRL), f)?;
        self.apply(&regs)
    }

    /// Registers of the pin's channel in `block`.
    pub fn channel_regs(&self, pin: u32, block: usize) -> Result<ChannelRegs> {
        let ch = channel(pin)?;
        let regs = self.block(block)?;
        Ok(ChannelRegs {
            ctrl: regs.read(Self::chan(ch, CHAN_CTRL))?,
            range: regs.read(Self::chan(ch, CHAN_RANGE))?,
            phase: regs.read(Self::chan(ch, CHAN_PHASE))?,
            duty: regs.read(Self::chan(ch, CHAN_DUTY))?,
        })
    }

    /// Global registers of `block`.
    pub fn global_regs(&self, block: usize) -> Result<GlobalRegs> {
        let regs = self.block(block)?;
        Ok(GlobalRegs {
            ctrl: regs.read(GLOBAL_CTRL)?,
            fifo_ctrl: regs.read(FIFO_CTRL)?,
            common_range: regs.read(COMMON_RANGE)?,
            common_duty: regs.read(COMMON_DUTY)?,
            duty_fifo: regs.read(DUTY_FIFO)?,
        })
    }

    pub fn clock_regs(&self) -> Result<ClockRegs> {
        let clk = self.clock();
        Ok(ClockRegs {
            ctrl: clk.read(CLK_CTRL)?,
            div_int: clk.read(CLK_DIV_INT)?,
            div_frac: clk.read(CLK_DIV_FRAC)?,
            sel: clk.read(CLK_SEL)?,
        })
    }
}
