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
use crate::pl::{LoadedBitstream, PlState};
use crate::platforms::platform::{
    list_fpga_managers, platform_from_compat_or_device, read_compatible_string,
};
use log::{error, info};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use zbus::{fdo, interface};

pub struct StatusInterface {
    pl: Arc<PlState>,
}

impl StatusInterface {
    pub fn new(pl: Arc<PlState>) -> StatusInterface {
        StatusInterface { pl }
    }
}

#[interface(name = "com.canonical.fabricd.status")]
impl StatusInterface {
    async fn get_fpga_state(
        &self,
        platform_string: &str,
        device_handle: &str,
    ) -> Result<String, fdo::Error> {
        info!("get_fpga_state called with name: {device_handle}");
        validate_device_handle(device_handle)?;
        let platform = platform_from_compat_or_device(platform_string, device_handle)?;
        Ok(platform.fpga(device_handle)?.state()?)
    }

    async fn get_fpga_flags(
        &self,
        platform_string: &str,
        device_handle: &str,
    ) -> Result<String, fdo::Error> {
        info!("get_fpga_flags called with name: {device_handle}");
        validate_device_handle(device_handle)?;
        let platform = platform_from_compat_or_device(platform_string, device_handle)?;
        Ok(platform
            .fpga(device_handle)?
            .flags()
            .map(|flags| format!("0x{flags:X}"))?)
    }

    /// `none`, `unknown` or `<path> loaded at <seconds since epoch>`.
    async fn get_loaded_bitstream(&self) -> Result<String, fdo::Error> {
        info!("get_loaded_bitstream called");
        Ok(match self.pl.bitstream() {
            LoadedBitstream::Loaded { id, timestamp } => {
                let seconds = timestamp
                    .duration_since(UNIX_EPOCH)
                    .map_err(|e| FabricError::Internal(format!("Bad load timestamp: {e}")))?
                    .as_secs();
                format!("{id} loaded at {seconds}")
            }
            other => other.to_string(),
        })
    }

    async fn get_ip_names(&self) -> Result<String, fdo::Error> {
        info!("get_ip_names called");
        Ok(self.pl.ip_names().join("\n"))
    }

    /// Register reads wait for a reconfiguration in progress, so they run on the blocking pool.
    async fn get_ip_state(&self, name: &str) -> Result<String, fdo::Error> {
        info!("get_ip_state called with name: {name}");
        let pl = self.pl.clone();
        let name = name.to_owned();
        let state = tokio::task::spawn_blocking(move || pl.get_ip_state(&name))
            .await
            .map_err(|e| FabricError::Internal(format!("IP state task failed: {e}")))??;
        Ok(format!(
            "{}:0x{:08X}",
            state.tag.as_deref().unwrap_or("none"),
            state.value
        ))
    }

    async fn get_gpio_names(&self) -> Result<String, fdo::Error> {
        info!("get_gpio_names called");
        Ok(self.pl.gpio_names().join("\n"))
    }

    async fn get_gpio_state(&self, name: &str) -> Result<String, fdo::Error> {
        info!("get_gpio_state called with name: {name}");
        let pl = self.pl.clone();
        let name = name.to_owned();
        let state = tokio::task::spawn_blocking(move || pl.get_gpio_state(&name))
            .await
            .map_err(|e| FabricError::Internal(format!("GPIO state task failed: {e}")))??;
        Ok(format!(
            "bank=0x{:X} level={}",
            state.bank,
            u8::from(state.level)
        ))
    }

    async fn get_platform_types(&self) -> Result<String, fdo::Error> {
        info!("get_platform_types called");
        let mut ret_string = String::new();
        for device_handle in list_fpga_managers()? {
            if let Ok(compat_string) = read_compatible_string(&device_handle) {
                ret_string += format!("{device_handle}:{compat_string}\n").as_str();
            } else {
                error!("Failed to get string for {device_handle}");
                ret_string += format!("{device_handle}:\n").as_str();
            }
        }
        Ok(ret_string)
    }
}
