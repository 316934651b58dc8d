//! Linux GPIO character-device ABI (v1), as declared in `linux/gpio.h`.

#![allow(dead_code)]

pub const GPIOHANDLES_MAX: usize = 64;

pub const GPIOHANDLE_REQUEST_INPUT: u32 = 1 << 0;
pub const GPIOHANDLE_REQUEST_OUTPUT: u32 = 1 << 1;
pub const GPIOHANDLE_REQUEST_ACTIVE_LOW: u32 = 1 << 2;
pub const GPIOHANDLE_REQUEST_OPEN_DRAIN: u32 = 1 << 3;
pub const GPIOHANDLE_REQUEST_OPEN_SOURCE: u32 = 1 << 4;
pub const GPIOHANDLE_REQUEST_BIAS_PULL_UP: u32 = 1 << 5;
pub const GPIOHANDLE_REQUEST_BIAS_PULL_DOWN: u32 = 1 << 6;
pub const GPIOHANDLE_REQUEST_BIAS_DISABLE: u32 = 1 << 7;

pub const GPIOEVENT_REQUEST_RISING_EDGE: u32 = 1 << 0;
pub const GPIOEVENT_REQUEST_FALLING_EDGE: u32 = 1 << 1;

pub const GPIOEVENT_EVENT_RISING_EDGE: u32 = 0x01;
pub const GPIOEVENT_EVENT_FALLING_EDGE: u32 = 0x02;

#[repr(C)]
pub struct GpioChipInfo {
    pub name: [libc::c_char; 32],
    pub label: [libc::c_char; 32],
    pub lines: u32,
}

#[repr(C)]
pub struct GpioHandleRequest {
    pub line_offsets: [u32; GPIOHANDLES_MAX],
    pub flags: u32,
    pub default_values: [u8; GPIOHANDLES_MAX],
    pub consumer_label: [libc::c_char; 32],
    pub lines: u32,
    pub fd: libc::c_int,
}

#[repr(C)]
pub struct GpioHandleData {
    pub values: [u8; GPIOHANDLES_MAX],
}

#[repr(C)]
pub struct GpioEventRequest {
    pub line_offset: u32,
    pub handle_flags: u32,
    pub event_flags: u32,
    pub consumer_label: [libc::c_char; 32],
    pub fd: libc::c_int,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct GpioEventData {
    pub timestamp: u64,
    pub id: u32,
}

const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;
const GPIO_IOC_MAGIC: u32 = 0xB4;

const fn ioc(dir: u32, nr: u32, size: usize) -> u32 {
    (dir << 30) | ((size as u32) << 16) | (GPIO_IOC_MAGIC << 8) | nr
}

pub const GPIO_GET_CHIPINFO_IOCTL: u32 = ioc(IOC_READ, 0x01, std::mem::size_of::<GpioChipInfo>());
pub const GPIO_GET_LINEHANDLE_IOCTL: u32 = ioc(
    IOC_READ | IOC_WRITE,
    0x03,
    std::mem::size_of::<GpioHandleRequest>(),
);
pub const GPIO_GET_LINEEVENT_IOCTL: u32 = ioc(
    IOC_READ | IOC_WRITE,
    0x04,
    std::mem::size_of::<GpioEventRequest>(),
);
pub const GPIOHANDLE_GET_LINE_VALUES_IOCTL: u32 = ioc(
    IOC_READ | IOC_WRITE,
    0x08,
    std::mem::size_of::<GpioHandleData>(),
);
pub const GPIOHANDLE_SET_LINE_VALUES_IOCTL: u32 = ioc(
    IOC_READ | IOC_WRITE,
    0x09,
    std::mem::size_of::<GpioHandleData>(),
);

/// Copy `label` into a fixed, NUL-terminated kernel label buffer.
pub fn fill_label(dst: &mut [libc::c_char; 32], label: &str) {
    for (slot, byte) in dst.iter_mut().zip(label.bytes().take(31)) {
        *slot = byte as libc::c_char;
    }
}

/// Read a NUL-terminated kernel label buffer.
pub fn read_label(src: &[libc::c_char; 32]) -> String {
    let bytes: Vec<u8> = src
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}
