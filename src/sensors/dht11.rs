//! DHT11 temperature and humidity sensor.
//!
//! The host pulls the bus low to wake the sensor, then releases it. The sensor
//! answers with an acknowledgement and 40 data bits; each bit is a HIGH period
//! whose length encodes the value (about 26µs for `0`, about 70µs for `1`).
//! The frame is five bytes, MSB first: humidity integer and fraction,
//! temperature integer and fraction, then a checksum.

use crate::cdev::{EdgeFlags, EdgeKind, EdgeWatcher, PinHandleManager, PulseGenerator, PulseSpec};
use crate::error::{ControlError, ErrorKind, Result, ResultExt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Number of data bits in one frame.
pub const FRAME_BITS: usize = 40;

/// Timing parameters of the DHT11 exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dht11Settings {
    /// Width of the negative wake pulse
    pub wake_pulse_us: u32,
    /// Edges examined while looking for the acknowledgement
    pub ack_retries: u32,
    /// Bound on every single edge wait
    pub edge_timeout_us: u64,
    /// HIGH periods longer than this decode as `1`
    pub one_threshold_us: u64,
}

impl Default for Dht11Settings {
    fn default() -> Self {
        Self {
            wake_pulse_us: 20_000,
            ack_retries: 3,
            edge_timeout_us: 2_000,
            one_threshold_us: 50,
        }
    }
}

/// One validated frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dht11Reading {
    pub bytes: [u8; 5],
    pub taken_at: DateTime<Utc>,
}

impl Dht11Reading {
    /// Validate the checksum of a raw frame.
    pub fn from_frame(bytes: [u8; 5]) -> Result<Self> {
        let expected = checksum(&bytes);
        if expected != bytes[4] {
            return Err(ControlError::Checksum {
                expected,
                actual: bytes[4],
            });
        }
        Ok(Self {
            bytes,
            taken_at: Utc::now(),
        })
    }

    /// Relative humidity, integer percent.
    pub fn humidity(&self) -> u8 {
        self.bytes[0]
    }

    /// Temperature, integer degrees Celsius.
    ///
    /// The fractional bytes are kept in [`Dht11Reading::bytes`] but not
    /// folded into this value.
    pub fn temperature(&self) -> u8 {
        self.bytes[2]
    }
}

/// Low 8 bits of the sum of the first four bytes.
pub fn checksum(bytes: &[u8; 5]) -> u8 {
    bytes[..4].iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Pack 40 bits, MSB first, into five bytes.
pub fn pack_bits(bits: &[bool; FRAME_BITS]) -> [u8; 5] {
    let mut bytes = [0u8; 5];
    for (i, bit) in bits.iter().enumerate() {
        bytes[i / 8] = (bytes[i / 8] << 1) | u8::from(*bit);
    }
    bytes
}

/// Classify measured HIGH times into bits and validate the frame.
pub fn decode_high_times(
    high_us: &[u64; FRAME_BITS],
    one_threshold_us: u64,
) -> Result<Dht11Reading> {
    let mut bits = [false; FRAME_BITS];
    for (bit, high) in bits.iter_mut().zip(high_us) {
        *bit = *high > one_threshold_us;
    }
    Dht11Reading::from_frame(pack_bits(&bits))
}

/// DHT11 reader bound to one pin.
#[derive(Debug, Clone, Copy)]
pub struct Dht11 {
    pin: u32,
    settings: Dht11Settings,
}

impl Dht11 {
    pub fn new(pin: u32, settings: Dht11Settings) -> Self {
        Self { pin, settings }
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    /// Run one full exchange and return the validated reading.
    pub fn read(
        &self,
        pins: &mut PinHandleManager,
        edges: &mut EdgeWatcher,
        pulse: &PulseGenerator,
    ) -> Result<Dht11Reading> {
        let result = self.exchange(pins, edges, pulse);
        match &result {
            Ok(reading) => info!(
                "DHT11 pin {}: humidity {}%, temperature {}°C",
                self.pin,
                reading.humidity(),
                reading.temperature()
            ),
            Err(e) => error!("DHT11 read on pin {} failed: {}", self.pin, e),
        }
        result
    }

    fn exchange(
        &self,
        pins: &mut PinHandleManager,
        edges: &mut EdgeWatcher,
        pulse: &PulseGenerator,
    ) -> Result<Dht11Reading> {
        let pin = self.pin;
        pins.set_pulse(pulse, pin, &PulseSpec::negative(self.settings.wake_pulse_us))
            .context("DHT11 wake pulse failed")?;
        pins.release_pin(pin).context("DHT11 releasing the bus failed")?;
        edges
            .subscribe(pin, EdgeFlags::Both)
            .context("DHT11 edge subscription failed")?;

        let mut rise_ns = self.wait_ack(edges)?;
        let mut high_us = [0u64; FRAME_BITS];
        for (i, high) in high_us.iter_mut().enumerate() {
            let fall_ns = self.expect_edge(edges, EdgeKind::Falling, i)?;
            *high = fall_ns.saturating_sub(rise_ns) / 1_000;
            if i + 1 < FRAME_BITS {
                rise_ns = self.expect_edge(edges, EdgeKind::Rising, i + 1)?;
            }
        }
        debug!(?high_us, "DHT11 bit timings");

        decode_high_times(&high_us, self.settings.one_threshold_us)
    }

    /// Look for the acknowledgement rising edge, which also starts bit 0.
    fn wait_ack(&self, edges: &mut EdgeWatcher) -> Result<u64> {
        for attempt in 1..=self.settings.ack_retries {
            match edges.wait_next_edge(self.timeout()) {
                Ok(edge) if edge.event.kind == EdgeKind::Rising => {
                    debug!(attempt, "DHT11 acknowledged");
                    return Ok(edge.event.timestamp_ns);
                }
                Ok(edge) => {
                    debug!(
                        attempt,
                        kind = %edge.event.kind,
                        "discarding edge before acknowledgement"
                    );
                }
                Err(e) if e.kind() == ErrorKind::Timeout => {
                    warn!(attempt, "DHT11: missing first edge");
                }
                Err(e) => return Err(e),
            }
        }
        Err(ControlError::protocol(format!(
            "DHT11: no rising edge response after {} attempts",
            self.settings.ack_retries
        )))
    }

    fn expect_edge(&self, edges: &mut EdgeWatcher, kind: EdgeKind, bit: usize) -> Result<u64> {
        match edges.wait_next_edge(self.timeout()) {
            Ok(edge) if edge.event.kind == kind => Ok(edge.event.timestamp_ns),
            Ok(edge) => Err(ControlError::protocol(format!(
                "DHT11: expected {} edge for bit {}, got {} edge",
                kind, bit, edge.event.kind
            ))),
            Err(e) if e.kind() == ErrorKind::Timeout => Err(ControlError::protocol(format!(
                "DHT11: missing {} edge for bit {}",
                kind, bit
            ))),
            Err(e) => Err(e),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_micros(self.settings.edge_timeout_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdev::sim::SimulatedChip;
    use crate::cdev::EdgeEvent;
    use std::rc::Rc;

    /// Edge stream a sensor would produce for `bytes`, after a spurious falling edge.
    fn sensor_stream(bytes: [u8; 5]) -> Vec<EdgeEvent> {
        let mut events = vec![EdgeEvent::falling(1_000_000)];
        let mut t = 1_080_000;
        for byte in bytes {
            for shift in (0..8).rev() {
                let high_ns = if (byte >> shift) & 1 == 1 { 70_000 } else { 26_000 };
                events.push(EdgeEvent::rising(t));
                events.push(EdgeEvent::falling(t + high_ns));
                t += high_ns + 50_000;
            }
        }
        events
    }

    fn setup() -> (SimulatedChip, PinHandleManager, EdgeWatcher) {
        let chip = SimulatedChip::new();
        let shared: Rc<dyn crate::cdev::GpioChip> = Rc::new(chip.clone());
        let pins = PinHandleManager::new(Rc::clone(&shared), "test");
        let edges = EdgeWatcher::new(shared, "test");
        (chip, pins, edges)
    }

    fn fast_settings() -> Dht11Settings {
        Dht11Settings {
            wake_pulse_us: 1_000,
            ..Dht11Settings::default()
        }
    }

    #[test]
    fn test_pack_bits_msb_first() {
        let mut bits = [false; FRAME_BITS];
        bits[2] = true;
        bits[3] = true;
        bits[39] = true;
        assert_eq!(pack_bits(&bits), [0x30, 0, 0, 0, 0x01]);
    }

    #[test]
    fn test_checksum_wraps() {
        assert_eq!(checksum(&[0xFF, 0x02, 0, 0, 0]), 0x01);
    }

    #[test]
    fn test_read_decodes_stream() {
        let (chip, mut pins, mut edges) = setup();
        chip.queue_events(sensor_stream([0x32, 0x00, 0x18, 0x00, 0x4A]));
        let reading = Dht11::new(4, fast_settings())
            .read(&mut pins, &mut edges, &PulseGenerator::default())
            .unwrap();
        assert_eq!(reading.humidity(), 50);
        assert_eq!(reading.temperature(), 24);
        assert_eq!(chip.writes(4), vec![true, false, true]);
        assert!(chip.open_lines().is_empty());
        assert_eq!(chip.pending_events(), 0);
    }

    #[test]
    fn test_corrupted_checksum_rejected() {
        let (chip, mut pins, mut edges) = setup();
        chip.queue_events(sensor_stream([0x32, 0x00, 0x18, 0x00, 0x4B]));
        let err = Dht11::new(4, fast_settings())
            .read(&mut pins, &mut edges, &PulseGenerator::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Checksum);
    }

    #[test]
    fn test_missing_edge_is_protocol_error() {
        let (chip, mut pins, mut edges) = setup();
        let mut stream = sensor_stream([0x32, 0x00, 0x18, 0x00, 0x4A]);
        stream.truncate(30);
        chip.queue_events(stream);
        let err = Dht11::new(4, fast_settings())
            .read(&mut pins, &mut edges, &PulseGenerator::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_no_acknowledgement_is_protocol_error() {
        let (chip, mut pins, mut edges) = setup();
        chip.queue_events([EdgeEvent::falling(1), EdgeEvent::falling(2)]);
        let err = Dht11::new(4, fast_settings())
            .read(&mut pins, &mut edges, &PulseGenerator::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_reading_serializes() {
        let reading = Dht11Reading::from_frame([0x32, 0x00, 0x18, 0x00, 0x4A]).unwrap();
        let json = serde_json::to_string(&reading).unwrap();
        let back: Dht11Reading = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reading);
    }
}
