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

//! Memory-mapped access to fabric address space.
//!
//! Every read and write fabricd performs against the programmable logic goes through a
//! [`RegisterWindow`]: a bounds-checked view over a block of device memory. Where the bytes
//! actually live is abstracted twice:
//!
//! - [`MmioBacking`] - a mapped byte range that can be read and written at a given width.
//!   Backings do no bounds checking of their own; the window validates every access first.
//! - [`MemoryMapper`] - the capability handed in by the environment which turns a physical
//!   address and length into a backing. [`DevMemMapper`] maps `/dev/mem`, while
//!   [`SimulatedBus`] serves in-process memory for tests and dry runs.
//!
//! # Examples
//!
//! ```rust
//! # use fabricd::mmio::{RegisterWindow, SimulatedBus, SimulatedMemory, Width};
//! # use std::sync::Arc;
//! # fn example() -> Result<(), fabricd::error::FabricError> {
//! let bus = SimulatedBus::new();
//! bus.add_region(0x4000_0000, Arc::new(SimulatedMemory::new(0x1000)));
//!
//! let window = RegisterWindow::new(&bus, 0x4000_0000, 0x100)?;
//! window.write(0x10, Width::Word, 0xDEAD_BEEF)?;
//! assert_eq!(window.read(0x10, Width::Word)?, 0xDEAD_BEEF);
//! # Ok(())
//! # }
//! ```

pub mod devmem;
pub mod register_window;
pub mod simulated;

pub use devmem::{DevMem, DevMemMapper};
pub use register_window::RegisterWindow;
pub use simulated::{SimulatedBus, SimulatedMemory};

use crate::error::FabricError;
use std::fmt;
use std::sync::Arc;

/// Width of a single register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    Byte,
    Half,
    Word,
}

impl Width {
    /// Number of bytes covered by an access of this width.
    pub const fn bytes(self) -> usize {
        match self {
            Width::Byte => 1,
            Width::Half => 2,
            Width::Word => 4,
        }
    }

    /// Largest value representable at this width.
    pub const fn max_value(self) -> u32 {
        match self {
            Width::Byte => u8::MAX as u32,
            Width::Half => u16::MAX as u32,
            Width::Word => u32::MAX,
        }
    }

    pub fn from_bytes(bytes: usize) -> Result<Width, FabricError> {
        match bytes {
            1 => Ok(Width::Byte),
            2 => Ok(Width::Half),
            4 => Ok(Width::Word),
            other => Err(FabricError::Argument(format!(
                "{other} is not a supported access width, expected 1, 2 or 4 bytes"
            ))),
        }
    }
}

impl fmt::Display for Width {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-byte", self.bytes())
    }
}

/// A mapped range of device memory.
///
/// Implementations perform the access directly (no buffering or write coalescing). Offsets
/// are relative to the start of the range and are guaranteed by the caller to satisfy
/// `offset + width.bytes() <= self.len()`. Values are little-endian.
pub trait MmioBacking: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self, offset: usize, width: Width) -> u32;

    fn write(&self, offset: usize, width: Width, value: u32);
}

/// Capability which maps a physical address range into the process.
pub trait MemoryMapper: Send + Sync {
    /// Map `length` bytes starting at the physical address `base_address`.
    ///
    /// # Returns: `Result<Arc<dyn MmioBacking>, FabricError>`
    /// * `Ok(Arc<dyn MmioBacking>)` - A backing at least `length` bytes long
    /// * `Err(FabricError::Mapping)` - The range could not be mapped
    fn map(&self, base_address: u64, length: usize) -> Result<Arc<dyn MmioBacking>, FabricError>;
}
