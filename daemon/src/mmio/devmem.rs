// This file is part of fabricd, an application to reconfigure FPGA fabric and drive the IO processors inside it.
//
// Copyright 2025 Canonical Ltd.
//
// SPDX-License-Identifier: GPL-3.0-only
//
// fabricd is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License version 3, as published by the Free Software Foundation.
//
// fabricd is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranties of MERCHANTABILITY, SATISFACTORY QUALITY, or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with this program.  If not, see http://www.gnu.org/licenses/.

//! Physical memory mappings through `/dev/mem`.
//!
//! [`DevMemMapper`] opens the memory device (path taken from
//! [`config::devmem_path`](crate::config::devmem_path) unless given explicitly) and maps the
//! page-aligned range covering the requested physical address. Accesses are volatile and
//! go straight to the device.
//!
//! A volatile access through a misaligned pointer is undefined behaviour, so a half word or
//! word access at an offset that is not a multiple of its width is carried out as one byte
//! access per byte, lowest address first. Devices which only decode full-width accesses
//! will not see such an access as a single transaction.

use crate::config;
use crate::error::FabricError;
use crate::mmio::{MemoryMapper, MmioBacking, Width};
use log::{debug, trace};
use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::Arc;

/// A live `mmap` of physical memory.
#[derive(Debug)]
pub struct DevMem {
    ptr: *mut u8,
    length: usize,
    page_offset: usize,
}

// The mapping is only touched through volatile accesses and unmapped once on drop.
unsafe impl Send for DevMem {}
unsafe impl Sync for DevMem {}

fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as usize } else { 4096 }
}

impl DevMem {
    /// Map `length` bytes of physical memory at `base_address` from the device at `path`.
    ///
    /// # Returns: `Result<DevMem, FabricError>`
    /// * `Ok(DevMem)` - The mapping
    /// * `Err(FabricError::Mapping)` - The device could not be opened or mapped
    pub fn open(path: &Path, base_address: u64, length: usize) -> Result<DevMem, FabricError> {
        let mapping_err = |reason: String| FabricError::Mapping {
            base: base_address,
            length,
            reason,
        };
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| mapping_err(format!("cannot open {path:?}: {e}")))?;

        let page_offset = (base_address % page_size() as u64) as usize;
        let map_base = base_address - page_offset as u64;
        let map_length = length
            .checked_add(page_offset)
            .ok_or_else(|| mapping_err("length overflows the address space".into()))?;
        let map_offset = libc::off_t::try_from(map_base)
            .map_err(|_| mapping_err("address does not fit in off_t".into()))?;

        trace!("mmap {map_length:#x} bytes of {path:?} at {map_base:#x}");
        // SAFETY: a fresh shared mapping of an open file descriptor; the result is checked
        // against MAP_FAILED before use.
        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                map_length,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                map_offset,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(mapping_err(std::io::Error::last_os_error().to_string()));
        }
        debug!("Mapped {length:#x} bytes at physical address {base_address:#x}");
        Ok(DevMem {
            // SAFETY: page_offset < page size <= map_length.
            ptr: unsafe { (raw as *mut u8).add(page_offset) },
            length,
            page_offset,
        })
    }
}

impl Drop for DevMem {
    fn drop(&mut self) {
        // SAFETY: reverses the pointer adjustment made in `open` and unmaps the same length.
        unsafe {
            let base = self.ptr.sub(self.page_offset);
            libc::munmap(base as *mut libc::c_void, self.length + self.page_offset);
        }
    }
}

impl MmioBacking for DevMem {
    fn len(&self) -> usize {
        self.length
    }

    fn read(&self, offset: usize, width: Width) -> u32 {
        // SAFETY: the caller guarantees offset + width <= length. Wide accesses are only made
        // through pointers aligned to their width.
        unsafe {
            let at = self.ptr.add(offset);
            match width {
                Width::Byte => u32::from(ptr::read_volatile(at)),
                Width::Half if offset % 2 == 0 => u32::from(ptr::read_volatile(at as *const u16)),
                Width::Word if offset % 4 == 0 => ptr::read_volatile(at as *const u32),
                _ => {
                    let mut value = 0u32;
                    for i in 0..width.bytes() {
                        value |= u32::from(ptr::read_volatile(at.add(i))) << (8 * i);
                    }
                    value
                }
            }
        }
    }

    fn write(&self, offset: usize, width: Width, value: u32) {
        // SAFETY: as for `read`.
        unsafe {
            let at = self.ptr.add(offset);
            match width {
                Width::Byte => ptr::write_volatile(at, value as u8),
                Width::Half if offset % 2 == 0 => ptr::write_volatile(at as *mut u16, value as u16),
                Width::Word if offset % 4 == 0 => ptr::write_volatile(at as *mut u32, value),
                _ => {
                    for i in 0..width.bytes() {
                        ptr::write_volatile(at.add(i), (value >> (8 * i)) as u8);
                    }
                }
            }
        }
    }
}

/// Maps physical memory through a memory device file, `/dev/mem` by default.
#[derive(Debug, Clone)]
pub struct DevMemMapper {
    path: PathBuf,
}

impl DevMemMapper {
    pub fn new(path: impl Into<PathBuf>) -> DevMemMapper {
        DevMemMapper { path: path.into() }
    }

    /// A mapper over the configured memory device.
    pub fn from_config() -> Result<DevMemMapper, FabricError> {
        Ok(DevMemMapper::new(config::devmem_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MemoryMapper for DevMemMapper {
    fn map(&self, base_address: u64, length: usize) -> Result<Arc<dyn MmioBacking>, FabricError> {
        Ok(Arc::new(DevMem::open(&self.path, base_address, length)?))
    }
}
