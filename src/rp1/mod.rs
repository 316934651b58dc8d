//! Direct register access to the RP1 I/O controller.
//!
//! Everything here goes through one [`RegisterWindow`]. Typed views cover the
//! GPIO bank 0 control array, the RIO block, the pad registers and the PWM
//! blocks with their clock.

pub mod gpio;
pub mod pins;
pub mod pwm;
pub mod window;

pub use gpio::{set_function, Drive, GpioView, PadConfig, PadView, Pull, RioView, Slew};
pub use pins::Rp1Pins;
pub use pwm::{ChannelRegs, ClockRegs, GlobalRegs, PwmConfig, PwmEngine, PwmMode};
pub use window::{HeapMemory, Region, RegisterWindow, WindowConfig, WindowMemory};

#[cfg(target_os = "linux")]
pub use window::MappedMemory;
