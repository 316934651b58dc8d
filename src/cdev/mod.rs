//! GPIO character-device backend.
//!
//! Lines are requested from a GPIO chip (`/dev/gpiochipN`) as kernel line
//! handles or edge-event handles. The chip itself sits behind the
//! [`GpioChip`] trait so the managers in this module can run against the
//! real kernel interface or against [`sim::SimulatedChip`].

pub mod edge;
pub mod handle;
pub mod pins;
pub mod pulse;
pub mod rc;
pub mod sim;
mod uapi;

#[cfg(target_os = "linux")]
mod chip;

#[cfg(target_os = "linux")]
pub use chip::{list_chips, CdevChip};

pub use edge::{EdgeWatcher, TimedEdge};
pub use handle::{PinHandleManager, SanityReport};
pub use pins::CdevGpio;
pub use pulse::{Polarity, PulseCalibration, PulseGenerator, PulseLine, PulseSpec};
pub use rc::{RcMeter, RcTiming};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Direction and bias a line handle is requested with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinMode {
    /// Driven output
    Output,
    /// Input with bias disabled (high impedance)
    InputHighZ,
    /// Input with the internal pull-up enabled
    InputPullUp,
    /// Input with the internal pull-down enabled
    InputPullDown,
}

impl PinMode {
    /// Kernel `GPIOHANDLE_REQUEST_*` flags for this mode.
    pub fn request_flags(self) -> u32 {
        match self {
            PinMode::Output => uapi::GPIOHANDLE_REQUEST_OUTPUT,
            PinMode::InputHighZ => {
                uapi::GPIOHANDLE_REQUEST_INPUT | uapi::GPIOHANDLE_REQUEST_BIAS_DISABLE
            }
            PinMode::InputPullUp => {
                uapi::GPIOHANDLE_REQUEST_INPUT | uapi::GPIOHANDLE_REQUEST_BIAS_PULL_UP
            }
            PinMode::InputPullDown => {
                uapi::GPIOHANDLE_REQUEST_INPUT | uapi::GPIOHANDLE_REQUEST_BIAS_PULL_DOWN
            }
        }
    }

    pub fn is_output(self) -> bool {
        matches!(self, PinMode::Output)
    }
}

/// Which transitions an edge subscription reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeFlags {
    Rising,
    Falling,
    Both,
}

impl EdgeFlags {
    /// Kernel `GPIOEVENT_REQUEST_*` flags.
    pub fn request_flags(self) -> u32 {
        match self {
            EdgeFlags::Rising => uapi::GPIOEVENT_REQUEST_RISING_EDGE,
            EdgeFlags::Falling => uapi::GPIOEVENT_REQUEST_FALLING_EDGE,
            EdgeFlags::Both => {
                uapi::GPIOEVENT_REQUEST_RISING_EDGE | uapi::GPIOEVENT_REQUEST_FALLING_EDGE
            }
        }
    }

    pub fn accepts(self, kind: EdgeKind) -> bool {
        match self {
            EdgeFlags::Rising => kind == EdgeKind::Rising,
            EdgeFlags::Falling => kind == EdgeKind::Falling,
            EdgeFlags::Both => true,
        }
    }
}

/// Direction of a single observed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    Rising,
    Falling,
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeKind::Rising => f.write_str("rising"),
            EdgeKind::Falling => f.write_str("falling"),
        }
    }
}

/// A kernel edge notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeEvent {
    pub kind: EdgeKind,
    /// Kernel timestamp on the monotonic clock, in nanoseconds
    pub timestamp_ns: u64,
}

impl EdgeEvent {
    pub fn rising(timestamp_ns: u64) -> Self {
        Self {
            kind: EdgeKind::Rising,
            timestamp_ns,
        }
    }

    pub fn falling(timestamp_ns: u64) -> Self {
        Self {
            kind: EdgeKind::Falling,
            timestamp_ns,
        }
    }
}

/// Information about one GPIO chip device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChipInfo {
    pub path: String,
    pub name: String,
    pub label: String,
    pub lines: u32,
}

/// A GPIO chip able to hand out line and event handles.
///
/// Handles are closed when dropped.
pub trait GpioChip {
    /// Request a single-line handle in the given mode.
    fn request_line(&self, pin: u32, mode: PinMode, consumer: &str) -> Result<Box<dyn LineHandle>>;

    /// Request an edge-event handle for one line.
    fn request_events(
        &self,
        pin: u32,
        edges: EdgeFlags,
        consumer: &str,
    ) -> Result<Box<dyn EdgeEventSource>>;
}

/// An open line handle.
pub trait LineHandle {
    fn get_value(&self) -> Result<bool>;
    fn set_value(&self, high: bool) -> Result<()>;
}

/// An open edge-event handle.
pub trait EdgeEventSource {
    /// Wait up to `timeout` for one event. `Ok(None)` means the wait expired.
    fn poll_event(&mut self, timeout: Duration) -> Result<Option<EdgeEvent>>;
}

/// Current `CLOCK_MONOTONIC` time in nanoseconds.
///
/// Kernel edge timestamps use the same clock, so differences between the two
/// are immune to wall-clock adjustment.
pub fn monotonic_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, writable timespec.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return 0;
    }
    (ts.tv_sec as u64) * 1_000_000_000 + ts.tv_nsec as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_mode_flags() {
        assert_eq!(PinMode::Output.request_flags(), 1 << 1);
        assert_eq!(PinMode::InputHighZ.request_flags(), (1 << 0) | (1 << 7));
        assert_eq!(PinMode::InputPullUp.request_flags(), (1 << 0) | (1 << 5));
        assert_eq!(PinMode::InputPullDown.request_flags(), (1 << 0) | (1 << 6));
    }

    #[test]
    fn test_edge_flags_accepts() {
        assert!(EdgeFlags::Both.accepts(EdgeKind::Rising));
        assert!(EdgeFlags::Both.accepts(EdgeKind::Falling));
        assert!(!EdgeFlags::Rising.accepts(EdgeKind::Falling));
        assert_eq!(EdgeFlags::Both.request_flags(), 0x3);
    }

    #[test]
    fn test_monotonic_clock_advances() {
        let a = monotonic_ns();
        std::thread::sleep(Duration::from_millis(1));
        let b = monotonic_ns();
        assert!(b > a);
    }
}
