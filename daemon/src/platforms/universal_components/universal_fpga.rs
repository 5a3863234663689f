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

//! Universal FPGA device implementation.
//!
//! # A sysfs map of an fpga in the fpga_manager class
//!
//! ```text
//! /sys/class/fpga_manager/fpga0
//! ├── device -> ../../../firmware:zynqmp-firmware:pcap
//! ├── firmware
//! ├── flags
//! ├── name
//! ├── of_node -> ../../../../../../firmware/devicetree/base/firmware/zynqmp-firmware/pcap
//! ├── state
//! ├── status
//! └── subsystem -> ../../../../../../class/fpga_manager
//! ```
//!
//! Only these are used:
//! - `state` - Current FPGA state (operating, unknown, write error, etc.)
//! - `flags` - Programming flags, hexadecimal
//! - `firmware` - Writing a file name here starts a download. The name is resolved by the
//!   kernel firmware loader relative to its search path, which is redirected first: to the
//!   firmware source directory for images under it, otherwise to the image's directory.

use crate::config;
use crate::error::FabricError;
use crate::platforms::platform::Fpga;
use crate::system_io::{fs_read, fs_write};
use log::{info, trace, warn};
use std::path::{Component, Path, PathBuf};

/// Split `source_path` into a firmware search directory and the name to request from it.
///
/// With an empty `firmware_path` the image's parent directory is used. Otherwise the image
/// must live under `firmware_path`.
///
/// # Returns: `Result<(PathBuf, PathBuf), FabricError>`
/// * `Ok((prefix, suffix))` - The search directory and the relative name
/// * `Err(FabricError::Argument)` - `source_path` is not inside `firmware_path`, or the
///   relative name would be empty
pub(crate) fn make_firmware_pair(
    source_path: &Path,
    firmware_path: &Path,
) -> Result<(PathBuf, PathBuf), FabricError> {
    if firmware_path.as_os_str().is_empty() {
        let filename = source_path.file_name().ok_or_else(|| {
            FabricError::Argument(format!("{source_path:?} does not name a file."))
        })?;
        let parent = source_path.parent().ok_or_else(|| {
            FabricError::Argument(format!("{source_path:?} is missing a parent dir."))
        })?;
        return Ok((parent.to_path_buf(), PathBuf::from(filename)));
    }
    let Ok(suffix) = source_path.strip_prefix(firmware_path) else {
        return Err(FabricError::Argument(format!(
            "Could not find {source_path:?} inside {firmware_path:?}"
        )));
    };
    let cleaned_suffix = suffix
        .components()
        .skip_while(|c| matches!(c, Component::RootDir))
        .collect::<PathBuf>();
    if cleaned_suffix.as_os_str().is_empty() {
        return Err(FabricError::Argument(format!(
            "The resulting filename from stripping {firmware_path:?} from {source_path:?} \
            was empty. Cannot write empty string to fpga."
        )));
    }
    Ok((firmware_path.to_path_buf(), cleaned_suffix))
}

/// An FPGA driven through `<fpga_managers_dir>/<device_handle>/`.
#[derive(Debug)]
pub struct UniversalFPGA {
    device_handle: String,
    device_dir: PathBuf,
    search_path_control: PathBuf,
    firmware_source_dir: PathBuf,
}

impl UniversalFPGA {
    /// Create an instance using the configured sysfs locations.
    ///
    /// The device is not checked for existence here.
    pub(crate) fn new(device_handle: &str) -> Result<UniversalFPGA, FabricError> {
        Ok(UniversalFPGA::with_paths(
            device_handle,
            Path::new(&config::fpga_managers_dir()?),
            Path::new(&config::firmware_search_path_control()?),
            Path::new(&config::firmware_source_dir()?),
        ))
    }

    pub(crate) fn with_paths(
        device_handle: &str,
        fpga_managers_dir: &Path,
        search_path_control: &Path,
        firmware_source_dir: &Path,
    ) -> UniversalFPGA {
        UniversalFPGA {
            device_handle: device_handle.to_owned(),
            device_dir: fpga_managers_dir.join(device_handle),
            search_path_control: search_path_control.to_owned(),
            firmware_source_dir: firmware_source_dir.to_owned(),
        }
    }

    fn attribute(&self, name: &str) -> PathBuf {
        self.device_dir.join(name)
    }
}

impl Fpga for UniversalFPGA {
    fn device_handle(&self) -> &str {
        &self.device_handle
    }

    /// # Returns: `Result<String, FabricError>`
    /// * `Ok(String)` - Current state (newlines trimmed)
    /// * `Err(FabricError::IORead)` - Failed to read the state file
    fn state(&self) -> Result<String, FabricError> {
        let state_path = self.attribute("state");
        trace!("reading {state_path:?}");
        fs_read(&state_path).map(|s| s.trim_end_matches('\n').to_string())
    }

    /// Parses `flags` as hexadecimal, with or without a `0x` prefix.
    fn flags(&self) -> Result<u32, FabricError> {
        let contents = fs_read(&self.attribute("flags"))?;
        let trimmed = contents.trim().trim_start_matches("0x");
        u32::from_str_radix(trimmed, 16)
            .map_err(|_| FabricError::Flag(format!("Parsing flags {contents:?} failed")))
    }

    /// Write `flags` and read them back.
    ///
    /// # Returns: `Result<(), FabricError>`
    /// * `Ok(())` - Flags set and verified
    /// * `Err(FabricError::IOWrite)` - Failed to write the flags file
    /// * `Err(FabricError::Flag)` - Read-back value doesn't match the written value
    fn set_flags(&self, flags: u32) -> Result<(), FabricError> {
        let flag_path = self.attribute("flags");
        trace!("Writing 0x'{flags:X}' to '{flag_path:?}");
        fs_write(&flag_path, false, format!("0x{flags:X}"))?;

        match self.state()?.as_str() {
            "operating" => info!(
                "{}'s state is 'operating' after writing flags.",
                self.device_handle
            ),
            state => warn!(
                "{}'s state is '{state}' after writing flags.",
                self.device_handle
            ),
        }

        match self.flags() {
            Ok(returned_flags) if returned_flags == flags => Ok(()),
            Ok(returned_flags) => Err(FabricError::Flag(format!(
                "Setting {}'s flags to '{}' failed. Resulting flag was '{}'",
                self.device_handle, flags, returned_flags
            ))),
            Err(e) => Err(FabricError::Flag(format!(
                "Failed to read {}'s flags after setting to '{}': {}",
                self.device_handle, flags, e
            ))),
        }
    }

    /// Point the kernel firmware loader at the firmware source directory, or the image's own
    /// directory for images outside it, and request the image.
    ///
    /// # Returns: `Result<(), FabricError>`
    /// * `Ok(())` - The download was requested
    /// * `Err(FabricError::Argument)` - `bitstream_path` has no file name or parent
    /// * `Err(FabricError::IOWrite)` - Failed to write the search path or firmware file
    fn load_firmware(&self, bitstream_path: &Path) -> Result<(), FabricError> {
        let (prefix, suffix) = make_firmware_pair(bitstream_path, &self.firmware_source_dir)
            .or_else(|e| {
                trace!("{e}, requesting from the image's directory");
                make_firmware_pair(bitstream_path, Path::new(""))
            })?;
        trace!(
            "Writing firmware search path {prefix:?} to {:?}",
            self.search_path_control
        );
        fs_write(&self.search_path_control, false, prefix.to_string_lossy())?;
        fs_write(&self.attribute("firmware"), false, suffix.to_string_lossy())?;
        info!("Requested {suffix:?} from {prefix:?} on {}", self.device_handle);
        Ok(())
    }
}
