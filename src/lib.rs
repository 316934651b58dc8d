//! # RP1 I/O - Raspberry Pi 5 Userland Hardware Control
//!
//! A blocking, single-threaded Rust crate for driving the Raspberry Pi 5's RP1
//! I/O controller from userland. Pins can be driven either through the kernel
//! GPIO character device or directly through the RP1's memory-mapped
//! registers.
//!
//! ## Features
//!
//! - **Pin control**: single-owner line handles with automatic mode changes
//! - **Edge timing**: bounded waits on kernel-timestamped edge events
//! - **Pulses**: calibrated positive and negative pulses with bus hand-off
//! - **RC timing**: capacitor charge-time measurement
//! - **DHT11**: temperature and humidity readout with checksum validation
//! - **Registers**: GPIO, RIO and PAD views plus hardware PWM over `/dev/mem`
//!   or `/dev/gpiomem0`
//! - **Simulation**: a scripted GPIO chip and heap-backed register windows for
//!   off-target testing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rp1_io::{open_backend, ControlConfig, ErrorLog, PulseSpec};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ControlConfig::default();
//!     let mut pins = open_backend(&config)?;
//!
//!     let mut errors = ErrorLog::new();
//!     if !errors.succeeded(pins.set_pulse(17, &PulseSpec::positive(500))) {
//!         for line in errors.entries() {
//!             eprintln!("{}", line);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod cdev;
pub mod config;
pub mod error;
pub mod logging;
pub mod rp1;
pub mod sensors;

// Re-export public API
pub use backend::{open_backend, PinBackend};
pub use cdev::{
    CdevGpio, EdgeEvent, EdgeFlags, EdgeKind, EdgeWatcher, PinHandleManager, PinMode, Polarity,
    PulseCalibration, PulseGenerator, PulseSpec, RcMeter, RcTiming, SanityReport,
};
pub use config::{BackendKind, ControlConfig};
pub use error::{ControlError, ErrorKind, ErrorLog, Result, LEVEL_SENTINEL, REGISTER_SENTINEL};
pub use logging::{init_logging, Verbosity};
pub use rp1::{PwmConfig, PwmEngine, PwmMode, RegisterWindow, Rp1Pins, WindowConfig};
pub use sensors::{Dht11, Dht11Reading, Dht11Settings};

#[cfg(target_os = "linux")]
pub use cdev::{list_chips, CdevChip};

/// The default GPIO chip device
pub const DEFAULT_CHIP_PATH: &str = "/dev/gpiochip0";

/// The default consumer label attached to requested lines
pub const DEFAULT_CONSUMER: &str = "rp1-io";
