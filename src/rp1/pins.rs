//! Pin control through the RIO block.

use super::gpio::{self, GpioView, PadConfig, RioView, FUNC_RIO};
use super::pwm::{PwmConfig, PwmEngine};
use super::window::RegisterWindow;
use crate::backend::PinBackend;
use crate::cdev::{PulseGenerator, PulseLine, PulseSpec};
use crate::config::ControlConfig;
use crate::error::{Result, ResultExt};
use std::rc::Rc;
use tracing::{debug, error};

/// Register-level pin backend.
///
/// Pins are switched to the RIO function on first use. Nothing here is
/// coordinated with the character-device backend.
pub struct Rp1Pins {
    window: Rc<RegisterWindow>,
    pulse: PulseGenerator,
}

impl Rp1Pins {
    pub fn new(window: Rc<RegisterWindow>, pulse: PulseGenerator) -> Self {
        Self { window, pulse }
    }

    /// Map the register window described by `config`.
    #[cfg(target_os = "linux")]
    pub fn open(config: &ControlConfig) -> Result<Self> {
        let window = RegisterWindow::map(&config.window)?;
        Ok(Self::new(Rc::new(window), PulseGenerator::new(config.pulse)))
    }

    #[cfg(not(target_os = "linux"))]
    pub fn open(_config: &ControlConfig) -> Result<Self> {
        Err(crate::error::ControlError::config_error(
            "the RP1 register backend is only available on Linux",
        ))
    }

    pub fn window(&self) -> &Rc<RegisterWindow> {
        &self.window
    }

    /// A PWM engine sharing this backend's window.
    pub fn pwm(&self, config: PwmConfig) -> Result<PwmEngine> {
        PwmEngine::new(Rc::clone(&self.window), config)
    }

    fn route_to_rio(&self, pin: u32) -> Result<()> {
        if GpioView::new(&self.window).function(pin)? != FUNC_RIO {
            gpio::set_function(&self.window, pin, FUNC_RIO, &PadConfig::rio())?;
            debug!(pin, "routed to RIO");
        }
        Ok(())
    }

    /// Route `pin` to RIO and enable its output driver.
    pub fn make_output(&self, pin: u32) -> Result<()> {
        self.route_to_rio(pin)?;
        RioView::new(&self.window).set_output_mask(1 << pin)
    }

    /// Route `pin` to RIO and disable its output driver.
    pub fn make_input(&self, pin: u32) -> Result<()> {
        self.route_to_rio(pin)?;
        RioView::new(&self.window).set_input_mask(1 << pin)
    }

    pub fn write(&self, pin: u32, high: bool) -> Result<()> {
        self.make_output(pin)?;
        RioView::new(&self.window).write_pin(pin, high)
    }

    pub fn read(&self, pin: u32) -> Result<bool> {
        self.make_input(pin)?;
        RioView::new(&self.window).read_pin(pin)
    }

    pub fn set_pulse(&self, pin: u32, spec: &PulseSpec) -> Result<()> {
        let result = self
            .pulse
            .effective_width(spec)
            .and_then(|_| self.make_output(pin))
            .and_then(|_| self.pulse.emit(&mut RioPulseLine { pins: self, pin }, spec))
            .with_context(|| format!("set_pulse({}) failed", pin));
        if let Err(e) = &result {
            error!("{}", e);
        }
        result
    }
}

struct RioPulseLine<'a> {
    pins: &'a Rp1Pins,
    pin: u32,
}

impl PulseLine for RioPulseLine<'_> {
    fn drive(&mut self, high: bool) -> Result<()> {
        RioView::new(&self.pins.window).write_pin(self.pin, high)
    }

    fn listen(&mut self) -> Result<()> {
        self.pins.make_input(self.pin)
    }
}

impl PinBackend for Rp1Pins {
    fn name(&self) -> &'static str {
        "rp1"
    }

    fn set_high(&mut self, pin: u32) -> Result<()> {
        Rp1Pins::write(self, pin, true)
            .with_context(|| format!("set_high({}) failed", pin))
    }

    fn set_low(&mut self, pin: u32) -> Result<()> {
        Rp1Pins::write(self, pin, false)
            .with_context(|| format!("set_low({}) failed", pin))
    }

    fn set_pulse(&mut self, pin: u32, spec: &PulseSpec) -> Result<()> {
        Rp1Pins::set_pulse(self, pin, spec)
    }

    fn read_input(&mut self, pin: u32) -> Result<bool> {
        self.read(pin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::rp1::gpio::{PadView, RIO_BASE};

    fn pins() -> (Rc<RegisterWindow>, Rp1Pins) {
        let window = Rc::new(RegisterWindow::in_memory(0x10_0000));
        let pins = Rp1Pins::new(Rc::clone(&window), PulseGenerator::default());
        (window, pins)
    }

    #[test]
    fn test_set_high_routes_and_enables_output() {
        let (window, mut pins) = pins();
        pins.set_high(17).unwrap();
        assert_eq!(GpioView::new(&window).function(17).unwrap(), FUNC_RIO);
        assert_eq!(PadView::new(&window).raw(17).unwrap(), PadConfig::rio().bits());
        assert_eq!(window.read(RIO_BASE + 0x2004).unwrap(), 1 << 17);
        assert_eq!(window.read(RIO_BASE + 0x2000).unwrap(), 1 << 17);
    }

    #[test]
    fn test_read_input_samples_in_register() {
        let (window, mut pins) = pins();
        window.write(RIO_BASE + 0x8, 1 << 6).unwrap();
        assert!(pins.read_input(6).unwrap());
        assert!(!pins.read_input(7).unwrap());
        assert_eq!(window.read(RIO_BASE + 0x3004).unwrap(), 1 << 7);
    }

    #[test]
    fn test_short_pulse_touches_nothing() {
        let (window, pins) = pins();
        let err = pins.set_pulse(4, &PulseSpec::positive(100)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(window.read(RIO_BASE + 0x2000).unwrap(), 0);
        assert_eq!(window.read(RIO_BASE + 0x3000).unwrap(), 0);
        assert_eq!(window.read(RIO_BASE + 0x2004).unwrap(), 0);
    }

    #[test]
    fn test_pin_outside_bank_rejected() {
        let (_window, mut pins) = pins();
        assert_eq!(pins.set_high(30).unwrap_err().kind(), ErrorKind::Validation);
    }
}
