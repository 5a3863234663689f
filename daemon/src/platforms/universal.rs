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

//! Universal platform for the standard Linux `fpga_manager` class.
//!
//! Works with any FPGA manager driver in the kernel without vendor extensions, and is the
//! fallback when a device's compatibility string matches no registered platform. It is
//! registered under the compatibility string `universal`.
//!
//! # Examples
//!
//! ```rust,no_run
//! # use fabricd::platforms::platform::platform_for_known_platform;
//! # fn example() -> Result<(), fabricd::error::FabricError> {
//! let platform = platform_for_known_platform("universal")?;
//! let state = platform.fpga("fpga0")?.state()?;
//! # Ok(())
//! # }
//! ```

use crate::error::FabricError;
use crate::platforms::platform::{Fpga, Platform};
use crate::platforms::universal_components::universal_fpga::UniversalFPGA;
use fabricd_macros::platform;
use log::trace;
use std::sync::OnceLock;

/// Generic platform; the [`UniversalFPGA`] is created on first use.
///
/// One instance serves a single device handle.
#[platform(compat_string = "universal")]
#[derive(Debug)]
pub struct UniversalPlatform {
    fpga: OnceLock<Result<UniversalFPGA, String>>,
}

impl Default for UniversalPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl UniversalPlatform {
    pub fn new() -> Self {
        trace!("creating new universal_platform");
        UniversalPlatform {
            fpga: OnceLock::new(),
        }
    }
}

impl Platform for UniversalPlatform {
    /// # Returns: `Result<&dyn Fpga, FabricError>`
    /// * `Ok(&dyn Fpga)` - The device
    /// * `Err(FabricError::Argument)` - This instance already serves another device
    /// * `Err(FabricError::Internal)` - The configured sysfs paths could not be read
    fn fpga(&self, device_handle: &str) -> Result<&dyn Fpga, FabricError> {
        // TODO: switch to OnceLock::get_or_try_init once stable:
        // https://github.com/rust-lang/rust/issues/109737
        let fpga = self
            .fpga
            .get_or_init(|| UniversalFPGA::new(device_handle).map_err(|e| e.to_string()))
            .as_ref()
            .map_err(|e| FabricError::Internal(e.clone()))?;
        if fpga.device_handle() != device_handle {
            return Err(FabricError::Argument(format!(
                "This platform instance drives {} and cannot be used for {device_handle}",
                fpga.device_handle()
            )));
        }
        Ok(fpga)
    }
}
