//! High-level controller over one GPIO chip.

use super::{
    EdgeWatcher, GpioChip, PinHandleManager, PinMode, PulseGenerator, PulseSpec, RcMeter,
    SanityReport, TimedEdge,
};
use crate::backend::PinBackend;
use crate::config::ControlConfig;
use crate::error::Result;
use crate::sensors::{Dht11, Dht11Reading, Dht11Settings};
use std::rc::Rc;
use std::time::Duration;

/// Pin, edge, pulse, RC and DHT11 operations sharing one chip.
///
/// The line-handle manager and the edge watcher each hold at most one kernel
/// handle; both are created lazily.
pub struct CdevGpio {
    pins: PinHandleManager,
    edges: EdgeWatcher,
    pulse: PulseGenerator,
    rc: RcMeter,
    dht11: Dht11Settings,
}

impl CdevGpio {
    /// Build a controller over an already opened chip.
    pub fn new(chip: Rc<dyn GpioChip>, config: &ControlConfig) -> Self {
        Self {
            pins: PinHandleManager::new(Rc::clone(&chip), config.consumer.clone()),
            edges: EdgeWatcher::new(chip, config.consumer.clone()),
            pulse: PulseGenerator::new(config.pulse),
            rc: RcMeter::new(config.rc),
            dht11: config.dht11,
        }
    }

    /// Open `config.chip_path` and build a controller over it.
    #[cfg(target_os = "linux")]
    pub fn open(config: &ControlConfig) -> Result<Self> {
        let chip = super::CdevChip::open(&config.chip_path)?;
        Ok(Self::new(Rc::new(chip), config))
    }

    pub fn pins(&mut self) -> &mut PinHandleManager {
        &mut self.pins
    }

    pub fn edges(&mut self) -> &mut EdgeWatcher {
        &mut self.edges
    }

    pub fn set_high(&mut self, pin: u32) -> Result<()> {
        self.pins.set_high(pin)
    }

    pub fn set_low(&mut self, pin: u32) -> Result<()> {
        self.pins.set_low(pin)
    }

    /// Read `pin` as a high-impedance input.
    pub fn read_raw(&mut self, pin: u32) -> Result<bool> {
        self.pins.read_raw(pin)
    }

    /// Read `pin` with the given input bias.
    pub fn read_with_mode(&mut self, pin: u32, mode: PinMode) -> Result<bool> {
        self.pins.read_with_mode(pin, mode)
    }

    pub fn set_pulse(&mut self, pin: u32, spec: &PulseSpec) -> Result<()> {
        self.pins.set_pulse(&self.pulse, pin, spec)
    }

    pub fn release_pin(&mut self, pin: u32) -> Result<()> {
        self.pins.release_pin(pin)
    }

    pub fn check_output_sanity(&mut self, pin: u32) -> Result<SanityReport> {
        self.pins.check_output_sanity(pin)
    }

    pub fn wait_next_edge(&mut self, timeout: Duration) -> Result<TimedEdge> {
        self.edges.wait_next_edge(timeout)
    }

    pub fn wait_edges_us(&mut self, max_edges: usize, total_timeout_us: u64) -> Result<Vec<u64>> {
        self.edges.wait_edges_us(max_edges, total_timeout_us)
    }

    pub fn collect_edges(&mut self, n: usize, total_timeout_us: u64) -> Result<Vec<u64>> {
        self.edges.collect_edges(n, total_timeout_us)
    }

    pub fn rising_edge_time(&mut self, pin: u32, timeout_us: u64) -> Result<u64> {
        self.edges.rising_edge_time(pin, timeout_us)
    }

    pub fn falling_edge_time(&mut self, pin: u32, timeout_us: u64) -> Result<u64> {
        self.edges.falling_edge_time(pin, timeout_us)
    }

    /// Charge time of an RC network on `pin`, in microseconds.
    pub fn measure_rc(&mut self, pin: u32) -> Result<u64> {
        self.rc.measure(&mut self.pins, pin)
    }

    /// Read a DHT11 sensor on `pin`.
    pub fn read_dht11(&mut self, pin: u32) -> Result<Dht11Reading> {
        Dht11::new(pin, self.dht11).read(&mut self.pins, &mut self.edges, &self.pulse)
    }
}

impl PinBackend for CdevGpio {
    fn name(&self) -> &'static str {
        "cdev"
    }

    fn set_high(&mut self, pin: u32) -> Result<()> {
        CdevGpio::set_high(self, pin)
    }

    fn set_low(&mut self, pin: u32) -> Result<()> {
        CdevGpio::set_low(self, pin)
    }

    fn set_pulse(&mut self, pin: u32, spec: &PulseSpec) -> Result<()> {
        CdevGpio::set_pulse(self, pin, spec)
    }

    fn read_input(&mut self, pin: u32) -> Result<bool> {
        self.read_raw(pin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdev::sim::SimulatedChip;
    use crate::cdev::RcTiming;
    use crate::cdev::{EdgeEvent, EdgeFlags};

    fn gpio(config: &ControlConfig) -> (SimulatedChip, CdevGpio) {
        let chip = SimulatedChip::new();
        let gpio = CdevGpio::new(Rc::new(chip.clone()), config);
        (chip, gpio)
    }

    #[test]
    fn test_pulse_with_listen_leaves_input_open() {
        let (chip, mut gpio) = gpio(&ControlConfig::default());
        gpio.set_pulse(12, &PulseSpec::negative(400).with_listen(true))
            .unwrap();
        assert_eq!(chip.writes(12), vec![true, false, true]);
        assert_eq!(gpio.pins().owned(), Some((12, PinMode::InputHighZ)));
    }

    #[test]
    fn test_measure_rc_tracks_charge_time() {
        let config = ControlConfig::default().with_rc(RcTiming {
            discharge_us: 1_000,
            ..RcTiming::default()
        });
        let (chip, mut gpio) = gpio(&config);
        chip.set_input_high_after(6, Duration::from_millis(10));
        let us = gpio.measure_rc(6).unwrap();
        assert!((9_000..=12_500).contains(&us), "measured {}µs", us);
    }

    #[test]
    fn test_edge_helpers_subscribe_single_kind() {
        let (chip, mut gpio) = gpio(&ControlConfig::default());
        chip.queue_events([EdgeEvent::falling(1), EdgeEvent::rising(2)]);
        gpio.rising_edge_time(7, 1_000).unwrap();
        assert_eq!(gpio.edges().subscription(), Some((7, EdgeFlags::Rising)));
        assert_eq!(chip.pending_events(), 0);
    }
}
