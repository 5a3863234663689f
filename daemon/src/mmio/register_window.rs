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

//! Bounds-checked register windows.
//!
//! A [`RegisterWindow`] is the only way fabricd touches device memory. Each access is
//! validated against the window length before it reaches the backing, and windows handed
//! out by [`PlState`](crate::pl::PlState) additionally carry a [`PlToken`] which makes every
//! access fail with [`FabricError::Stale`] once the bitstream they were created for has
//! been replaced.
//!
//! Every access to a tokenized window holds the read side of the PL state's
//! [reconfiguration section](crate::pl::section) for its duration, so a download never
//! overlaps it. Use [`RegisterWindow::enter`] to hold the section across several accesses.
//!
//! Windows are not otherwise synchronized. Cloning a window, or opening a second window
//! over the same range, is legal; callers sharing a block between threads must serialize
//! their accesses themselves. The exception is [`RegisterWindow::update_u32`], which is
//! serialized across every window sharing an update lock.

use crate::error::FabricError;
use crate::mmio::{MemoryMapper, MmioBacking, Width};
use crate::pl::{FabricAccess, PlToken};
use log::trace;
use std::fmt;
use std::sync::{Arc, Mutex};

/// A typed view over `length` bytes of device memory starting at `base_address`.
#[derive(Clone)]
pub struct RegisterWindow {
    base_address: u64,
    length: usize,
    backing: Arc<dyn MmioBacking>,
    token: Option<PlToken>,
    update_lock: Option<Arc<Mutex<()>>>,
}

impl fmt::Debug for RegisterWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterWindow")
            .field("base_address", &format_args!("{:#x}", self.base_address))
            .field("length", &format_args!("{:#x}", self.length))
            .field("token", &self.token)
            .finish()
    }
}

impl RegisterWindow {
    /// Map a new window through `mapper`.
    ///
    /// The window is not tied to any bitstream. Use
    /// [`PlState::ip_window`](crate::pl::PlState::ip_window) for windows over IP blocks of
    /// the loaded design.
    ///
    /// # Returns: `Result<RegisterWindow, FabricError>`
    /// * `Ok(RegisterWindow)` - The mapped window
    /// * `Err(FabricError::Argument)` - `length` is zero
    /// * `Err(FabricError::Mapping)` - The mapper failed or returned a short backing
    pub fn new(
        mapper: &dyn MemoryMapper,
        base_address: u64,
        length: usize,
    ) -> Result<RegisterWindow, FabricError> {
        if length == 0 {
            return Err(FabricError::Argument(format!(
                "Cannot open an empty register window at {base_address:#x}"
            )));
        }
        let backing = mapper.map(base_address, length)?;
        if backing.len() < length {
            return Err(FabricError::Mapping {
                base: base_address,
                length,
                reason: format!("mapper returned only {:#x} bytes", backing.len()),
            });
        }
        trace!("Opened register window of {length:#x} bytes at {base_address:#x}");
        Ok(RegisterWindow::from_backing(base_address, backing))
    }

    /// Wrap an existing backing. The window covers the whole backing.
    pub fn from_backing(base_address: u64, backing: Arc<dyn MmioBacking>) -> RegisterWindow {
        RegisterWindow {
            base_address,
            length: backing.len(),
            backing,
            token: None,
            update_lock: None,
        }
    }

    pub(crate) fn with_token(mut self, token: PlToken) -> RegisterWindow {
        self.token = Some(token);
        self
    }

    /// Serialize [`update_u32`](RegisterWindow::update_u32) with every other window
    /// holding the same `lock`.
    pub fn with_update_lock(mut self, lock: Arc<Mutex<()>>) -> RegisterWindow {
        self.update_lock = Some(lock);
        self
    }

    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// `false` once the bitstream this window was opened against has been replaced.
    pub fn is_valid(&self) -> bool {
        self.token.as_ref().is_none_or(PlToken::is_current)
    }

    fn address(&self, offset: usize) -> u64 {
        self.base_address.wrapping_add(offset as u64)
    }

    fn bounds(&self, offset: usize, bytes: usize) -> Result<(), FabricError> {
        let in_range = offset
            .checked_add(bytes)
            .is_some_and(|end| end <= self.length);
        if !in_range {
            return Err(FabricError::OutOfRange {
                offset,
                width: bytes,
                length: self.length,
            });
        }
        Ok(())
    }

    /// Hold off reconfiguration until the returned access is dropped.
    ///
    /// Windows with no bitstream behind them hold nothing.
    ///
    /// # Returns: `Result<FabricAccess, FabricError>`
    /// * `Ok(FabricAccess)` - The window stays valid while the access lives
    /// * `Err(FabricError::Stale)` - The window outlived its bitstream
    pub fn enter(&self) -> Result<FabricAccess<'_>, FabricError> {
        let Some(token) = &self.token else {
            return Ok(FabricAccess::unguarded());
        };
        token.enter().ok_or_else(|| {
            FabricError::Stale(format!(
                "Register window at {:#x} was opened against bitstream generation {} which is \
                 no longer loaded",
                self.base_address,
                token.generation()
            ))
        })
    }

    /// Read `width` bytes at `offset`.
    ///
    /// # Returns: `Result<u32, FabricError>`
    /// * `Ok(u32)` - The value read, zero-extended
    /// * `Err(FabricError::OutOfRange)` - `offset + width` exceeds the window
    /// * `Err(FabricError::Stale)` - The window outlived its bitstream
    pub fn read(&self, offset: usize, width: Width) -> Result<u32, FabricError> {
        self.bounds(offset, width.bytes())?;
        let _access = self.enter()?;
        let value = self.backing.read(offset, width);
        trace!("read {width} {value:#x} from {:#x}", self.address(offset));
        Ok(value)
    }

    /// Write `value` as `width` bytes at `offset`.
    ///
    /// # Returns: `Result<(), FabricError>`
    /// * `Ok(())` - The write was issued
    /// * `Err(FabricError::OutOfRange)` - `offset + width` exceeds the window
    /// * `Err(FabricError::Argument)` - `value` does not fit in `width`
    /// * `Err(FabricError::Stale)` - The window outlived its bitstream
    pub fn write(&self, offset: usize, width: Width, value: u32) -> Result<(), FabricError> {
        self.bounds(offset, width.bytes())?;
        if value > width.max_value() {
            return Err(FabricError::Argument(format!(
                "{value:#x} does not fit in a {width} access"
            )));
        }
        let _access = self.enter()?;
        trace!("write {width} {value:#x} to {:#x}", self.address(offset));
        self.backing.write(offset, width, value);
        Ok(())
    }

    pub fn read_u32(&self, offset: usize) -> Result<u32, FabricError> {
        self.read(offset, Width::Word)
    }

    pub fn write_u32(&self, offset: usize, value: u32) -> Result<(), FabricError> {
        self.write(offset, Width::Word, value)
    }

    /// Replace the word at `offset` with `f` applied to it.
    ///
    /// The read and the write happen under the window's update lock, if it has one.
    ///
    /// # Returns: `Result<u32, FabricError>`
    /// * `Ok(u32)` - The value written
    /// * `Err(FabricError::OutOfRange)` - `offset + 4` exceeds the window
    /// * `Err(FabricError::Stale)` - The window outlived its bitstream
    pub fn update_u32<F>(&self, offset: usize, f: F) -> Result<u32, FabricError>
    where
        F: FnOnce(u32) -> u32,
    {
        self.bounds(offset, Width::Word.bytes())?;
        let _access = self.enter()?;
        let _update = self
            .update_lock
            .as_ref()
            .map(|lock| lock.lock().unwrap_or_else(|e| e.into_inner()));
        let old = self.backing.read(offset, Width::Word);
        let new = f(old);
        trace!("update {old:#x} -> {new:#x} at {:#x}", self.address(offset));
        self.backing.write(offset, Width::Word, new);
        Ok(new)
    }

    /// Read `len` bytes starting at `offset`, using word accesses where aligned.
    ///
    /// The whole range is validated before the first access.
    pub fn read_bytes(&self, offset: usize, len: usize) -> Result<Vec<u8>, FabricError> {
        self.bounds(offset, len)?;
        let _access = self.enter()?;
        let mut out = Vec::with_capacity(len);
        let mut pos = 0;
        while pos < len {
            let at = offset + pos;
            if at % 4 == 0 && len - pos >= 4 {
                out.extend_from_slice(&self.backing.read(at, Width::Word).to_le_bytes());
                pos += 4;
            } else {
                out.push(self.backing.read(at, Width::Byte) as u8);
                pos += 1;
            }
        }
        trace!("read {len} bytes from {:#x}", self.address(offset));
        Ok(out)
    }

    /// Write `bytes` starting at `offset`, using word accesses where aligned.
    ///
    /// The whole range is validated before the first access.
    pub fn write_bytes(&self, offset: usize, bytes: &[u8]) -> Result<(), FabricError> {
        self.bounds(offset, bytes.len())?;
        let _access = self.enter()?;
        trace!("write {} bytes to {:#x}", bytes.len(), self.address(offset));
        let mut pos = 0;
        while pos < bytes.len() {
            let at = offset + pos;
            if at % 4 == 0 && bytes.len() - pos >= 4 {
                let word = u32::from_le_bytes([
                    bytes[pos],
                    bytes[pos + 1],
                    bytes[pos + 2],
                    bytes[pos + 3],
                ]);
                self.backing.write(at, Width::Word, word);
                pos += 4;
            } else {
                self.backing.write(at, Width::Byte, u32::from(bytes[pos]));
                pos += 1;
            }
        }
        Ok(())
    }
}
