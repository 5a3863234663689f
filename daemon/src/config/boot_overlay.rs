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

//! Overlay loaded at daemon startup.

use crate::comm::dbus::validate_device_handle;
use crate::config::config_files::{BootOverlay, boot_overlay_from_file};
use crate::config::{USER_CONFIG_PATH, VENDOR_CONFIG_PATH};
use crate::error::FabricError;
use crate::overlay::{LoadOutcome, OverlayLoader};
use crate::pl::PlState;
use log::{info, trace};
use std::path::Path;
use std::sync::Arc;

/// The `[boot_overlay]` section with user keys winning over vendor keys.
pub fn boot_overlay() -> BootOverlay {
    let vendor_config =
        boot_overlay_from_file(Path::new(VENDOR_CONFIG_PATH)).unwrap_or_default();
    let user_config = boot_overlay_from_file(Path::new(USER_CONFIG_PATH)).unwrap_or_default();
    user_config.merge(vendor_config)
}

/// Load the configured boot overlay into `pl`, if one is configured.
///
/// # Returns: `Result<String, FabricError>`
/// * `Ok(String)` - A description of what was done, including when nothing was configured
/// * `Err(FabricError)` - The device handle was invalid or the load failed
pub fn load_defaults(pl: &Arc<PlState>) -> Result<String, FabricError> {
    let boot_overlay = boot_overlay();
    apply_boot_overlay(&boot_overlay, |device_handle| {
        validate_device_handle(device_handle)?;
        OverlayLoader::from_config(pl.clone(), "", device_handle)
    })
}

pub(crate) fn apply_boot_overlay<F>(
    boot_overlay: &BootOverlay,
    make_loader: F,
) -> Result<String, FabricError>
where
    F: FnOnce(&str) -> Result<OverlayLoader, FabricError>,
{
    let (Some(overlay_path), Some(device_handle)) = (
        boot_overlay.default_overlay.as_ref(),
        boot_overlay.default_device_handle.as_ref(),
    ) else {
        info!("Not enough information provided in order to load an overlay on startup");
        return Ok(String::from(
            "Not enough information provided in order to load an overlay on startup\n",
        ));
    };
    trace!("Default overlay provided. Attempting to load {overlay_path} to {device_handle}");

    let loader = make_loader(device_handle)?;
    if let Some(flags) = boot_overlay.default_fpga_flags {
        loader.set_flags(flags)?;
    }
    let message = match loader.load(Path::new(overlay_path))? {
        LoadOutcome::AlreadyLoaded => format!("{overlay_path} was already loaded to {device_handle}\n"),
        LoadOutcome::Reconfigured => format!("{overlay_path} loaded to {device_handle}\n"),
    };
    info!("{}", message.trim_end());
    Ok(message)
}
