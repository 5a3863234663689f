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

//! DBus service exposing the PL state and overlay loading.
//!
//! - **Service Name**: [`SERVICE_NAME`]
//! - **Status Interface**: [`STATUS_PATH`] - Read-only operations
//! - **Control Interface**: [`CONTROL_PATH`] - Reconfiguration

pub mod control_interface;
pub mod status_interface;

use crate::config;
use crate::error::FabricError;
use std::path::Path;

pub static SERVICE_NAME: &str = "com.canonical.fabricd";

pub static STATUS_PATH: &str = "/com/canonical/fabricd/status";

pub static CONTROL_PATH: &str = "/com/canonical/fabricd/control";

/// Check that `device_handle` is a plausible sysfs name and that the device exists.
pub(crate) fn validate_device_handle(device_handle: &str) -> Result<(), FabricError> {
    if device_handle.is_empty() || !device_handle.is_ascii() || device_handle.contains('/') {
        return Err(FabricError::Argument(format!(
            "{device_handle:?} is an invalid name for an fpga device. \
            fpga names must be compliant with sysfs rules."
        )));
    }
    if !Path::new(&config::fpga_managers_dir()?)
        .join(device_handle)
        .exists()
    {
        return Err(FabricError::Argument(format!(
            "Device {device_handle} not found."
        )));
    }
    Ok(())
}
