//! Calibrated single-pulse generation.
//!
//! The generator only knows how to sequence levels and sleeps; the line it
//! drives is anything implementing [`PulseLine`], so the character-device and
//! register backends share one implementation.

use super::{PinHandleManager, PinMode};
use crate::error::{ControlError, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;
use tracing::{debug, error};

/// Level the line idles at before and after the pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Polarity {
    /// Idle LOW, pulse HIGH
    Positive,
    /// Idle HIGH, pulse LOW
    Negative,
}

/// One pulse request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseSpec {
    /// Requested pulse width in microseconds
    pub width_us: u32,
    /// Time spent at the idle level before the pulse
    pub lead_us: u32,
    /// Time held at the idle level after the pulse (negative polarity only)
    pub post_us: u32,
    pub polarity: Polarity,
    /// Switch the line to a high-impedance input once the pulse is done
    pub listen_after: bool,
}

impl PulseSpec {
    pub fn positive(width_us: u32) -> Self {
        Self {
            width_us,
            lead_us: 0,
            post_us: 0,
            polarity: Polarity::Positive,
            listen_after: false,
        }
    }

    pub fn negative(width_us: u32) -> Self {
        Self {
            polarity: Polarity::Negative,
            ..Self::positive(width_us)
        }
    }

    pub fn with_lead(mut self, lead_us: u32) -> Self {
        self.lead_us = lead_us;
        self
    }

    pub fn with_post(mut self, post_us: u32) -> Self {
        self.post_us = post_us;
        self
    }

    pub fn with_listen(mut self, listen_after: bool) -> Self {
        self.listen_after = listen_after;
        self
    }
}

/// Timing constants compensating for call overhead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseCalibration {
    /// Widths at or below this are rejected
    pub min_width_us: u32,
    /// Subtracted from the requested width before sleeping
    pub overhead_us: u32,
}

impl Default for PulseCalibration {
    fn default() -> Self {
        Self {
            min_width_us: 165,
            overhead_us: 160,
        }
    }
}

/// A line a pulse can be emitted on.
pub trait PulseLine {
    /// Drive the line to `high`.
    fn drive(&mut self, high: bool) -> Result<()>;

    /// Release the line to a high-impedance input.
    fn listen(&mut self) -> Result<()>;
}

/// Sequences a calibrated pulse on a [`PulseLine`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PulseGenerator {
    calibration: PulseCalibration,
}

impl PulseGenerator {
    pub fn new(calibration: PulseCalibration) -> Self {
        Self { calibration }
    }

    pub fn calibration(&self) -> PulseCalibration {
        self.calibration
    }

    /// Check `spec` and return the sleep needed to produce its width.
    pub fn effective_width(&self, spec: &PulseSpec) -> Result<Duration> {
        if spec.width_us <= self.calibration.min_width_us {
            return Err(ControlError::validation(format!(
                "pulse width must be > {}µs (got {}µs)",
                self.calibration.min_width_us, spec.width_us
            )));
        }
        let width = spec.width_us.saturating_sub(self.calibration.overhead_us);
        Ok(Duration::from_micros(u64::from(width)))
    }

    /// Emit `spec` on `line`.
    ///
    /// `spec` is validated before the line is touched. A failed write
    /// aborts the sequence; levels already written stay as they are.
    pub fn emit<L: PulseLine + ?Sized>(&self, line: &mut L, spec: &PulseSpec) -> Result<()> {
        let width = self.effective_width(spec)?;
        let (idle, active) = match spec.polarity {
            Polarity::Positive => (false, true),
            Polarity::Negative => (true, false),
        };
        debug!(?spec, sleep_us = width.as_micros() as u64, "emitting pulse");

        line.drive(idle).context("pulse aborted setting idle level")?;
        if spec.lead_us > 0 {
            thread::sleep(Duration::from_micros(u64::from(spec.lead_us)));
        }
        line.drive(active).context("pulse aborted starting pulse")?;
        thread::sleep(width);
        line.drive(idle).context("pulse aborted ending pulse")?;

        // Post time only applies to negative pulses.
        if spec.polarity == Polarity::Negative && spec.post_us > 0 {
            thread::sleep(Duration::from_micros(u64::from(spec.post_us)));
        }

        if spec.listen_after {
            line.listen().context("switching to listen mode after pulse failed")?;
        }
        Ok(())
    }
}

/// [`PulseLine`] adapter over a [`PinHandleManager`].
pub struct ManagedPulseLine<'a> {
    pins: &'a mut PinHandleManager,
    pin: u32,
}

impl<'a> ManagedPulseLine<'a> {
    pub fn new(pins: &'a mut PinHandleManager, pin: u32) -> Self {
        Self { pins, pin }
    }
}

impl PulseLine for ManagedPulseLine<'_> {
    fn drive(&mut self, high: bool) -> Result<()> {
        self.pins.write(self.pin, high)
    }

    fn listen(&mut self) -> Result<()> {
        self.pins.ensure_pin_mode(self.pin, PinMode::InputHighZ)
    }
}

impl PinHandleManager {
    /// Emit a pulse on `pin` through this manager's line handle.
    pub fn set_pulse(
        &mut self,
        generator: &PulseGenerator,
        pin: u32,
        spec: &PulseSpec,
    ) -> Result<()> {
        generator
            .emit(&mut ManagedPulseLine::new(self, pin), spec)
            .with_context(|| format!("set_pulse({}) failed", pin))
            .map_err(|e| {
                error!("{}", e);
                e
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::time::Instant;

    #[derive(Default)]
    struct RecordingLine {
        levels: Vec<bool>,
        listened: bool,
        fail_at: Option<usize>,
    }

    impl PulseLine for RecordingLine {
        fn drive(&mut self, high: bool) -> Result<()> {
            if self.fail_at == Some(self.levels.len()) {
                return Err(ControlError::resource("write failed"));
            }
            self.levels.push(high);
            Ok(())
        }

        fn listen(&mut self) -> Result<()> {
            self.listened = true;
            Ok(())
        }
    }

    #[test]
    fn test_short_width_rejected_before_any_write() {
        let generator = PulseGenerator::default();
        for spec in [PulseSpec::positive(165), PulseSpec::negative(100)] {
            let mut line = RecordingLine::default();
            let err = generator.emit(&mut line, &spec).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
            assert!(line.levels.is_empty());
        }
    }

    #[test]
    fn test_effective_width_subtracts_overhead() {
        let generator = PulseGenerator::default();
        let width = generator.effective_width(&PulseSpec::positive(1_000)).unwrap();
        assert_eq!(width, Duration::from_micros(840));
    }

    #[test]
    fn test_positive_sequence() {
        let mut line = RecordingLine::default();
        PulseGenerator::default()
            .emit(&mut line, &PulseSpec::positive(200).with_post(500))
            .unwrap();
        assert_eq!(line.levels, vec![false, true, false]);
        assert!(!line.listened);
    }

    #[test]
    fn test_negative_sequence_with_listen() {
        let mut line = RecordingLine::default();
        let spec = PulseSpec::negative(300).with_lead(100).with_listen(true);
        PulseGenerator::default().emit(&mut line, &spec).unwrap();
        assert_eq!(line.levels, vec![true, false, true]);
        assert!(line.listened);
    }

    #[test]
    fn test_write_failure_aborts_without_rollback() {
        let mut line = RecordingLine {
            fail_at: Some(2),
            ..Default::default()
        };
        let err = PulseGenerator::default()
            .emit(&mut line, &PulseSpec::positive(200).with_listen(true))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);
        assert_eq!(line.levels, vec![false, true]);
        assert!(!line.listened);
    }

    #[test]
    fn test_negative_post_time_holds_idle_level() {
        let mut line = RecordingLine::default();
        let started = Instant::now();
        PulseGenerator::default()
            .emit(&mut line, &PulseSpec::negative(200).with_post(3_000))
            .unwrap();
        assert_eq!(line.levels, vec![true, false, true]);
        assert!(started.elapsed() >= Duration::from_micros(3_000));
    }
}
