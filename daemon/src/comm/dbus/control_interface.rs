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

use crate::comm::dbus::validate_device_handle;
use crate::error::FabricError;
use crate::overlay::{LoadOutcome, OverlayLoader};
use crate::pl::PlState;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use zbus::{fdo, interface};

pub struct ControlInterface {
    pl: Arc<PlState>,
}

impl ControlInterface {
    pub fn new(pl: Arc<PlState>) -> ControlInterface {
        ControlInterface { pl }
    }
}

#[interface(name = "com.canonical.fabricd.control")]
impl ControlInterface {
    /// Write the device's programming flags.
    ///
    /// Waits for downloads and register accesses in flight, so it runs on the blocking pool.
    async fn set_fpga_flags(
        &self,
        platform_string: &str,
        device_handle: &str,
        flags: u32,
    ) -> Result<String, fdo::Error> {
        info!("set_fpga_flags called with name: {device_handle} and flags: {flags}");
        validate_device_handle(device_handle)?;
        let pl = self.pl.clone();
        let platform_string = platform_string.to_owned();
        let handle = device_handle.to_owned();
        tokio::task::spawn_blocking(move || {
            OverlayLoader::from_config(pl, &platform_string, &handle)?.set_flags(flags)
        })
        .await
        .map_err(|e| FabricError::Internal(format!("Flag task failed: {e}")))??;
        Ok(format!("Flags set to 0x{flags:X} for {device_handle}"))
    }

    /// Download the overlay at `overlay_path` unless it is already loaded.
    ///
    /// The download blocks until the fabric reports done, so it runs on the blocking pool.
    async fn load_overlay(
        &self,
        platform_string: &str,
        device_handle: &str,
        overlay_path: &str,
    ) -> Result<String, fdo::Error> {
        info!("load_overlay called with name: {device_handle} and path: {overlay_path}");
        validate_device_handle(device_handle)?;
        let pl = self.pl.clone();
        let platform_string = platform_string.to_owned();
        let handle = device_handle.to_owned();
        let path = PathBuf::from(overlay_path);
        let outcome = tokio::task::spawn_blocking(move || {
            OverlayLoader::from_config(pl, &platform_string, &handle)?.load(&path)
        })
        .await
        .map_err(|e| FabricError::Internal(format!("Overlay load task failed: {e}")))??;
        Ok(match outcome {
            LoadOutcome::AlreadyLoaded => {
                format!("{overlay_path} is already loaded to {device_handle}")
            }
            LoadOutcome::Reconfigured => format!("{overlay_path} loaded to {device_handle}"),
        })
    }
}
