//! The pin capability shared by both backends.

use crate::cdev::PulseSpec;
use crate::config::{BackendKind, ControlConfig};
use crate::error::Result;
use crate::rp1::Rp1Pins;
use tracing::info;

/// Basic pin operations available on every backend.
///
/// The character-device and register backends are not arbitrated against
/// each other; do not drive the same pin through both.
pub trait PinBackend {
    /// Short backend name for diagnostics.
    fn name(&self) -> &'static str;

    /// Drive `pin` HIGH as an output.
    fn set_high(&mut self, pin: u32) -> Result<()>;

    /// Drive `pin` LOW as an output.
    fn set_low(&mut self, pin: u32) -> Result<()>;

    /// Emit one calibrated pulse on `pin`.
    fn set_pulse(&mut self, pin: u32, spec: &PulseSpec) -> Result<()>;

    /// Read `pin` as a high-impedance input.
    fn read_input(&mut self, pin: u32) -> Result<bool>;

    /// Drive `pin` to `high`.
    fn write(&mut self, pin: u32, high: bool) -> Result<()> {
        if high {
            self.set_high(pin)
        } else {
            self.set_low(pin)
        }
    }
}

/// Build the backend selected by `config.backend`.
pub fn open_backend(config: &ControlConfig) -> Result<Box<dyn PinBackend>> {
    let backend: Box<dyn PinBackend> = match config.backend {
        BackendKind::CharDevice => open_char_device(config)?,
        BackendKind::Registers => Box::new(Rp1Pins::open(config)?),
    };
    info!("Using {} pin backend", backend.name());
    Ok(backend)
}

#[cfg(target_os = "linux")]
fn open_char_device(config: &ControlConfig) -> Result<Box<dyn PinBackend>> {
    Ok(Box::new(crate::cdev::CdevGpio::open(config)?))
}

#[cfg(not(target_os = "linux"))]
fn open_char_device(_config: &ControlConfig) -> Result<Box<dyn PinBackend>> {
    Err(crate::error::ControlError::config_error(
        "the GPIO character-device backend is only available on Linux",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdev::sim::SimulatedChip;
    use crate::cdev::CdevGpio;
    use std::rc::Rc;

    #[test]
    fn test_sim_backend_through_trait_object() {
        let chip = SimulatedChip::new();
        let mut backend: Box<dyn PinBackend> =
            Box::new(CdevGpio::new(Rc::new(chip.clone()), &ControlConfig::default()));
        backend.write(5, true).unwrap();
        backend.write(5, false).unwrap();
        backend.set_pulse(5, &PulseSpec::positive(200)).unwrap();
        assert_eq!(chip.writes(5), vec![true, false, false, true, false]);
        assert_eq!(backend.name(), "cdev");
    }

    #[test]
    fn test_missing_chip_fails() {
        let config = ControlConfig::default().with_chip_path("/nonexistent/gpiochip99");
        assert!(open_backend(&config).is_err());
    }
}
