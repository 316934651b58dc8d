//! Kernel-backed GPIO chip using the v1 character-device ioctls.

use super::uapi::{
    self, GpioChipInfo, GpioEventData, GpioEventRequest, GpioHandleData, GpioHandleRequest,
};
use super::{
    ChipInfo, EdgeEvent, EdgeEventSource, EdgeFlags, EdgeKind, GpioChip, LineHandle, PinMode,
};
use crate::error::{ControlError, Result};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// An open `/dev/gpiochipN` device.
pub struct CdevChip {
    file: File,
    path: PathBuf,
}

impl CdevChip {
    /// Open the chip device at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(&path)
            .map_err(|e| {
                ControlError::resource_io(format!("failed to open {}", path.display()), e)
            })?;
        info!("Opened GPIO chip {}", path.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Query name, label and line count of this chip.
    pub fn info(&self) -> Result<ChipInfo> {
        let mut raw = GpioChipInfo {
            name: [0; 32],
            label: [0; 32],
            lines: 0,
        };
        // SAFETY: `raw` matches the kernel's `struct gpiochip_info` layout.
        let rc = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                uapi::GPIO_GET_CHIPINFO_IOCTL as _,
                &mut raw,
            )
        };
        if rc < 0 {
            return Err(ControlError::resource_io(
                format!("GPIO_GET_CHIPINFO_IOCTL failed on {}", self.path.display()),
                std::io::Error::last_os_error(),
            ));
        }
        Ok(ChipInfo {
            path: self.path.display().to_string(),
            name: uapi::read_label(&raw.name),
            label: uapi::read_label(&raw.label),
            lines: raw.lines,
        })
    }
}

impl GpioChip for CdevChip {
    fn request_line(&self, pin: u32, mode: PinMode, consumer: &str) -> Result<Box<dyn LineHandle>> {
        let mut req = GpioHandleRequest {
            line_offsets: [0; uapi::GPIOHANDLES_MAX],
            flags: mode.request_flags(),
            default_values: [0; uapi::GPIOHANDLES_MAX],
            consumer_label: [0; 32],
            lines: 1,
            fd: -1,
        };
        req.line_offsets[0] = pin;
        uapi::fill_label(&mut req.consumer_label, consumer);

        // SAFETY: `req` matches the kernel's `struct gpiohandle_request` layout.
        let rc = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                uapi::GPIO_GET_LINEHANDLE_IOCTL as _,
                &mut req,
            )
        };
        if rc < 0 || req.fd < 0 {
            return Err(ControlError::resource_io(
                format!("GPIO_GET_LINEHANDLE_IOCTL failed for line {} ({:?})", pin, mode),
                std::io::Error::last_os_error(),
            ));
        }
        debug!(pin, ?mode, fd = req.fd, "line handle granted");
        // SAFETY: the kernel handed us a fresh descriptor we now own.
        let fd = unsafe { OwnedFd::from_raw_fd(req.fd) };
        Ok(Box::new(CdevLine { fd, pin }))
    }

    fn request_events(
        &self,
        pin: u32,
        edges: EdgeFlags,
        consumer: &str,
    ) -> Result<Box<dyn EdgeEventSource>> {
        let mut req = GpioEventRequest {
            line_offset: pin,
            handle_flags: uapi::GPIOHANDLE_REQUEST_INPUT,
            event_flags: edges.request_flags(),
            consumer_label: [0; 32],
            fd: -1,
        };
        uapi::fill_label(&mut req.consumer_label, consumer);

        // SAFETY: `req` matches the kernel's `struct gpioevent_request` layout.
        let rc = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                uapi::GPIO_GET_LINEEVENT_IOCTL as _,
                &mut req,
            )
        };
        if rc < 0 || req.fd < 0 {
            return Err(ControlError::resource_io(
                format!("GPIO_GET_LINEEVENT_IOCTL failed for line {} ({:?})", pin, edges),
                std::io::Error::last_os_error(),
            ));
        }
        debug!(pin, ?edges, fd = req.fd, "event handle granted");
        // SAFETY: the kernel handed us a fresh descriptor we now own.
        let fd = unsafe { OwnedFd::from_raw_fd(req.fd) };
        Ok(Box::new(CdevEvents { fd, pin }))
    }
}

struct CdevLine {
    fd: OwnedFd,
    pin: u32,
}

impl LineHandle for CdevLine {
    fn get_value(&self) -> Result<bool> {
        let mut data = GpioHandleData {
            values: [0; uapi::GPIOHANDLES_MAX],
        };
        // SAFETY: `data` matches `struct gpiohandle_data`.
        let rc = unsafe {
            libc::ioctl(
                self.fd.as_raw_fd(),
                uapi::GPIOHANDLE_GET_LINE_VALUES_IOCTL as _,
                &mut data,
            )
        };
        if rc < 0 {
            return Err(ControlError::resource_io(
                format!("GPIOHANDLE_GET_LINE_VALUES_IOCTL failed on line {}", self.pin),
                std::io::Error::last_os_error(),
            ));
        }
        Ok(data.values[0] != 0)
    }

    fn set_value(&self, high: bool) -> Result<()> {
        let mut data = GpioHandleData {
            values: [0; uapi::GPIOHANDLES_MAX],
        };
        data.values[0] = u8::from(high);
        // SAFETY: `data` matches `struct gpiohandle_data`.
        let rc = unsafe {
            libc::ioctl(
                self.fd.as_raw_fd(),
                uapi::GPIOHANDLE_SET_LINE_VALUES_IOCTL as _,
                &mut data,
            )
        };
        if rc < 0 {
            return Err(ControlError::resource_io(
                format!("GPIOHANDLE_SET_LINE_VALUES_IOCTL failed on line {}", self.pin),
                std::io::Error::last_os_error(),
            ));
        }
        Ok(())
    }
}

struct CdevEvents {
    fd: OwnedFd,
    pin: u32,
}

impl EdgeEventSource for CdevEvents {
    fn poll_event(&mut self, timeout: Duration) -> Result<Option<EdgeEvent>> {
        let mut pfd = libc::pollfd {
            fd: self.fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let ready = poll_until(timeout, |timeout_ms| {
            // SAFETY: one valid pollfd.
            let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
            if rc < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(rc > 0)
            }
        })
        .map_err(|e| ControlError::poll_io(format!("poll failed on line {}", self.pin), e))?;
        if !ready {
            return Ok(None);
        }
        if pfd.revents & libc::POLLIN == 0 {
            return Err(ControlError::poll(format!(
                "poll on line {} woke without POLLIN (revents 0x{:x})",
                self.pin, pfd.revents
            )));
        }

        let mut data = GpioEventData::default();
        let size = std::mem::size_of::<GpioEventData>();
        // SAFETY: reading at most `size` bytes into a plain-old-data struct.
        let read = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut data as *mut GpioEventData as *mut libc::c_void,
                size,
            )
        };
        if read < 0 {
            return Err(ControlError::poll_io(
                format!("reading edge event on line {} failed", self.pin),
                std::io::Error::last_os_error(),
            ));
        }
        if read as usize != size {
            return Err(ControlError::poll(format!(
                "short edge event read on line {} ({} of {} bytes)",
                self.pin, read, size
            )));
        }

        let kind = match data.id {
            uapi::GPIOEVENT_EVENT_RISING_EDGE => EdgeKind::Rising,
            uapi::GPIOEVENT_EVENT_FALLING_EDGE => EdgeKind::Falling,
            other => {
                return Err(ControlError::poll(format!(
                    "unknown edge event id {} on line {}",
                    other, self.pin
                )))
            }
        };
        Ok(Some(EdgeEvent {
            kind,
            timestamp_ns: data.timestamp,
        }))
    }
}

/// Call `poll_once` with the milliseconds left until `timeout` expires.
///
/// A wait cut short by a signal is retried with the remaining budget.
/// Returns whether the descriptor became ready.
fn poll_until(
    timeout: Duration,
    mut poll_once: impl FnMut(libc::c_int) -> io::Result<bool>,
) -> io::Result<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        // Round up so a sub-millisecond budget still waits.
        let timeout_ms =
            ((remaining.as_micros() + 999) / 1000).min(libc::c_int::MAX as u128) as libc::c_int;
        match poll_once(timeout_ms) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                debug!(remaining_ms = timeout_ms, "poll interrupted, retrying");
            }
            other => return other,
        }
    }
}

/// Enumerate every GPIO chip device under `/dev`.
pub fn list_chips() -> Result<Vec<ChipInfo>> {
    let entries = fs::read_dir("/dev")
        .map_err(|e| ControlError::resource_io("could not open /dev", e))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with("gpiochip"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    let mut chips = Vec::with_capacity(paths.len());
    for path in paths {
        match CdevChip::open(&path).and_then(|chip| chip.info()) {
            Ok(info) => chips.push(info),
            Err(e) => tracing::warn!("Skipping {}: {}", path.display(), e),
        }
    }
    Ok(chips)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupted_poll_is_retried() {
        let mut budgets = Vec::new();
        let ready = poll_until(Duration::from_millis(50), |timeout_ms| {
            budgets.push(timeout_ms);
            if budgets.len() == 1 {
                Err(io::Error::from_raw_os_error(libc::EINTR))
            } else {
                Ok(true)
            }
        })
        .unwrap();
        assert!(ready);
        assert_eq!(budgets.len(), 2);
        assert!(budgets[1] <= budgets[0] && budgets[0] <= 50);
    }

    #[test]
    fn test_other_poll_errors_propagate() {
        let mut calls = 0;
        let err = poll_until(Duration::from_millis(5), |_| {
            calls += 1;
            Err(io::Error::from_raw_os_error(libc::EBADF))
        })
        .unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_sub_millisecond_budget_rounds_up() {
        let mut seen = None;
        let ready = poll_until(Duration::from_micros(300), |timeout_ms| {
            seen = Some(timeout_ms);
            Ok(false)
        })
        .unwrap();
        assert!(!ready);
        assert_eq!(seen, Some(1));
    }
}
