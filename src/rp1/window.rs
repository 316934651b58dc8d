//! Bounds-checked access to the RP1 peripheral window.
//!
//! Register offsets throughout this crate are byte offsets from the RP1
//! peripheral base (BAR0). A [`RegisterWindow`] maps that address space,
//! either whole or in part, and checks every access against what is actually
//! mapped before touching memory.

use crate::error::{ControlError, Result};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use tracing::debug;

#[cfg(target_os = "linux")]
use tracing::{info, warn};

/// Where and how large the peripheral window is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Device exposing physical memory
    pub primary_path: String,
    /// Physical address of the RP1 peripheral base
    pub primary_base: u64,
    pub primary_size: usize,
    /// Device used when the primary mapping is refused
    pub fallback_path: String,
    pub fallback_size: usize,
    /// Peripheral offset the fallback mapping starts at
    pub fallback_offset: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            primary_path: "/dev/mem".to_string(),
            primary_base: 0x1f_0000_0000,
            primary_size: 0x40_0000,
            fallback_path: "/dev/gpiomem0".to_string(),
            fallback_size: 576 * 1024,
            fallback_offset: 0xD_0000,
        }
    }
}

/// Word-addressable memory backing a [`RegisterWindow`].
///
/// Offsets handed to `load`/`store` are always word aligned and inside
/// `len()`; the window checks them first.
pub trait WindowMemory {
    /// Size in bytes.
    fn len(&self) -> usize;
    fn load(&self, offset: usize) -> u32;
    fn store(&self, offset: usize, value: u32);
}

/// Plain heap memory, used for tests and dry runs.
pub struct HeapMemory {
    words: Vec<Cell<u32>>,
}

impl HeapMemory {
    pub fn new(size: usize) -> Self {
        Self {
            words: (0..size / 4).map(|_| Cell::new(0)).collect(),
        }
    }
}

impl WindowMemory for HeapMemory {
    fn len(&self) -> usize {
        self.words.len() * 4
    }

    fn load(&self, offset: usize) -> u32 {
        self.words[offset / 4].get()
    }

    fn store(&self, offset: usize, value: u32) {
        self.words[offset / 4].set(value)
    }
}

#[cfg(target_os = "linux")]
pub use mapped::MappedMemory;

#[cfg(target_os = "linux")]
mod mapped {
    use super::WindowMemory;
    use crate::error::{ControlError, Result};
    use std::fs::OpenOptions;
    use std::os::fd::AsRawFd;
    use std::os::unix::fs::OpenOptionsExt;
    use std::path::Path;
    use std::ptr::{self, NonNull};

    /// A shared `mmap` of a memory device.
    pub struct MappedMemory {
        base: NonNull<u32>,
        len: usize,
    }

    impl MappedMemory {
        /// Map `len` bytes of `path` starting at `offset`.
        pub fn open(path: impl AsRef<Path>, offset: u64, len: usize) -> Result<Self> {
            let path = path.as_ref();
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(libc::O_SYNC | libc::O_CLOEXEC)
                .open(path)
                .map_err(|e| {
                    ControlError::resource_io(format!("failed to open {}", path.display()), e)
                })?;
            let offset = libc::off_t::try_from(offset).map_err(|_| {
                ControlError::validation(format!("offset 0x{:x} does not fit off_t", offset))
            })?;

            // SAFETY: a fresh shared mapping; the fd may be closed afterwards.
            let map = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    file.as_raw_fd(),
                    offset,
                )
            };
            if map == libc::MAP_FAILED {
                return Err(ControlError::resource_io(
                    format!("mmap of {} (0x{:x} bytes) failed", path.display(), len),
                    std::io::Error::last_os_error(),
                ));
            }
            let base = NonNull::new(map as *mut u32)
                .ok_or_else(|| ControlError::resource("mmap returned a null mapping"))?;
            Ok(Self { base, len })
        }
    }

    impl WindowMemory for MappedMemory {
        fn len(&self) -> usize {
            self.len
        }

        fn load(&self, offset: usize) -> u32 {
            // SAFETY: the window checked `offset` is aligned and mapped.
            unsafe { ptr::read_volatile(self.base.as_ptr().add(offset / 4)) }
        }

        fn store(&self, offset: usize, value: u32) {
            // SAFETY: the window checked `offset` is aligned and mapped.
            unsafe { ptr::write_volatile(self.base.as_ptr().add(offset / 4), value) }
        }
    }

    impl Drop for MappedMemory {
        fn drop(&mut self) {
            // SAFETY: unmapping exactly what `open` mapped.
            unsafe {
                libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.len);
            }
        }
    }
}

/// The mapped RP1 peripheral address space.
pub struct RegisterWindow {
    memory: Box<dyn WindowMemory>,
    /// Peripheral offset of the first mapped byte
    base_offset: usize,
    source: String,
}

impl RegisterWindow {
    /// Wrap arbitrary memory that starts at peripheral offset `base_offset`.
    pub fn new(
        memory: Box<dyn WindowMemory>,
        base_offset: usize,
        source: impl Into<String>,
    ) -> Self {
        Self {
            memory,
            base_offset,
            source: source.into(),
        }
    }

    /// Map the primary window, or the fallback when the primary is refused.
    #[cfg(target_os = "linux")]
    pub fn map(config: &WindowConfig) -> Result<Self> {
        match MappedMemory::open(&config.primary_path, config.primary_base, config.primary_size) {
            Ok(memory) => {
                info!(
                    "Mapped {} at 0x{:x} (0x{:x} bytes)",
                    config.primary_path, config.primary_base, config.primary_size
                );
                return Ok(Self::new(Box::new(memory), 0, config.primary_path.clone()));
            }
            Err(e) => warn!("{}; falling back to {}", e, config.fallback_path),
        }

        let memory = MappedMemory::open(&config.fallback_path, 0, config.fallback_size)?;
        info!(
            "Mapped {} (0x{:x} bytes) at peripheral offset 0x{:x}",
            config.fallback_path, config.fallback_size, config.fallback_offset
        );
        Ok(Self::new(
            Box::new(memory),
            config.fallback_offset,
            config.fallback_path.clone(),
        ))
    }

    /// Heap-backed window covering peripheral offsets `0..size`.
    pub fn in_memory(size: usize) -> Self {
        Self::new(Box::new(HeapMemory::new(size)), 0, "memory")
    }

    /// Heap-backed window covering `base_offset..base_offset + size`, the
    /// shape of a fallback mapping.
    pub fn in_memory_rebased(base_offset: usize, size: usize) -> Self {
        Self::new(Box::new(HeapMemory::new(size)), base_offset, "memory")
    }

    pub fn base_offset(&self) -> usize {
        self.base_offset
    }

    /// Size of the mapped region in bytes.
    pub fn size(&self) -> usize {
        self.memory.len()
    }

    /// Device or description the window came from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the word at `offset` is mapped.
    pub fn contains(&self, offset: usize) -> bool {
        self.translate(offset).is_ok()
    }

    fn translate(&self, offset: usize) -> Result<usize> {
        if offset % 4 != 0 {
            return Err(ControlError::validation(format!(
                "register offset 0x{:x} is not word aligned",
                offset
            )));
        }
        match offset.checked_sub(self.base_offset) {
            Some(local) if local + 4 <= self.memory.len() => Ok(local),
            _ => Err(ControlError::resource(format!(
                "register offset 0x{:x} is outside the mapped window 0x{:x}..0x{:x} ({})",
                offset,
                self.base_offset,
                self.base_offset + self.memory.len(),
                self.source
            ))),
        }
    }

    /// Read the register at peripheral `offset`.
    pub fn read(&self, offset: usize) -> Result<u32> {
        let local = self.translate(offset)?;
        Ok(self.memory.load(local))
    }

    /// Write the register at peripheral `offset`.
    pub fn write(&self, offset: usize, value: u32) -> Result<()> {
        let local = self.translate(offset)?;
        debug!("write 0x{:08x} -> 0x{:05x}", value, offset);
        self.memory.store(local, value);
        Ok(())
    }

    /// Read-modify-write; returns the value written.
    pub fn modify(&self, offset: usize, f: impl FnOnce(u32) -> u32) -> Result<u32> {
        let local = self.translate(offset)?;
        let value = f(self.memory.load(local));
        debug!("modify 0x{:08x} -> 0x{:05x}", value, offset);
        self.memory.store(local, value);
        Ok(value)
    }

    /// A view of `len` bytes starting at peripheral offset `base`.
    pub fn region(&self, base: usize, len: usize) -> Region<'_> {
        Region {
            window: self,
            base,
            len,
        }
    }
}

/// A fixed block of registers inside a [`RegisterWindow`].
///
/// Offsets are relative to the block and checked against its length as well
/// as against the window.
#[derive(Clone, Copy)]
pub struct Region<'a> {
    window: &'a RegisterWindow,
    base: usize,
    len: usize,
}

impl Region<'_> {
    pub fn base(&self) -> usize {
        self.base
    }

    fn absolute(&self, offset: usize) -> Result<usize> {
        if offset + 4 > self.len {
            return Err(ControlError::validation(format!(
                "offset 0x{:x} is outside the 0x{:x}-byte block at 0x{:05x}",
                offset, self.len, self.base
            )));
        }
        Ok(self.base + offset)
    }

    pub fn read(&self, offset: usize) -> Result<u32> {
        self.window.read(self.absolute(offset)?)
    }

    pub fn write(&self, offset: usize, value: u32) -> Result<()> {
        self.window.write(self.absolute(offset)?, value)
    }

    pub fn modify(&self, offset: usize, f: impl FnOnce(u32) -> u32) -> Result<u32> {
        self.window.modify(self.absolute(offset)?, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_read_write_modify() {
        let window = RegisterWindow::in_memory(0x1000);
        window.write(0x10, 0xF0).unwrap();
        assert_eq!(window.modify(0x10, |v| v | 0x0F).unwrap(), 0xFF);
        assert_eq!(window.read(0x10).unwrap(), 0xFF);
    }

    #[test]
    fn test_out_of_bounds_and_misaligned() {
        let window = RegisterWindow::in_memory(0x100);
        assert_eq!(window.read(0x100).unwrap_err().kind(), ErrorKind::Resource);
        assert_eq!(window.write(0x0FE, 1).unwrap_err().kind(), ErrorKind::Validation);
        assert!(window.contains(0xFC));
    }

    #[test]
    fn test_rebased_window_rejects_lower_offsets() {
        let window = RegisterWindow::in_memory_rebased(0xD_0000, 576 * 1024);
        window.write(0xD_0004, 7).unwrap();
        assert_eq!(window.read(0xD_0004).unwrap(), 7);
        assert!(window.contains(0xF_0000));
        let err = window.read(0x9_8000).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);
        assert!(err.to_string().contains("outside the mapped window"));
    }

    #[test]
    fn test_region_bounds() {
        let window = RegisterWindow::in_memory(0x1000);
        let region = window.region(0x100, 0x10);
        region.write(0xC, 3).unwrap();
        assert_eq!(window.read(0x10C).unwrap(), 3);
        assert_eq!(region.read(0x10).unwrap_err().kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_window_config_default() {
        let config = WindowConfig::default();
        assert_eq!(config.primary_size, 4 * 1024 * 1024);
        assert_eq!(config.fallback_offset, 0xD0000);
    }

    #[cfg(target_os = "linux")]
    fn backing_file(tag: &str, size: usize) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("rp1-io-{}-{}", tag, std::process::id()));
        let file = std::fs::File::create(&path).unwrap();
        file.set_len(size as u64).unwrap();
        path
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_map_falls_back_and_rebases() {
        let fallback = backing_file("fallback", 576 * 1024);
        let config = WindowConfig {
            primary_path: "/nonexistent/rp1-io-mem".to_string(),
            fallback_path: fallback.display().to_string(),
            ..WindowConfig::default()
        };

        let window = RegisterWindow::map(&config).unwrap();
        assert_eq!(window.base_offset(), 0xD_0000);
        assert_eq!(window.size(), 576 * 1024);
        assert_eq!(window.source(), config.fallback_path);

        window.write(0xD_0004, 0x55).unwrap();
        assert_eq!(window.read(0xD_0004).unwrap(), 0x55);
        assert!(!window.contains(0x9_8000));
        assert!(!window.contains(0x1_8074));

        drop(window);
        std::fs::remove_file(&fallback).unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_map_prefers_primary() {
        let primary = backing_file("primary", 0x10_0000);
        let config = WindowConfig {
            primary_path: primary.display().to_string(),
            primary_base: 0,
            primary_size: 0x10_0000,
            fallback_path: "/nonexistent/rp1-io-gpiomem".to_string(),
            ..WindowConfig::default()
        };

        let window = RegisterWindow::map(&config).unwrap();
        assert_eq!(window.base_offset(), 0);
        assert!(window.contains(0x9_8000));

        drop(window);
        std::fs::remove_file(&primary).unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_map_fails_when_both_devices_missing() {
        let config = WindowConfig {
            primary_path: "/nonexistent/rp1-io-mem".to_string(),
            fallback_path: "/nonexistent/rp1-io-gpiomem".to_string(),
            ..WindowConfig::default()
        };
        let err = RegisterWindow::map(&config).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Resource);
    }
}
