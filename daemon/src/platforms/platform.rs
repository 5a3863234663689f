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

//! Reconfiguration platforms.
//!
//! The loader never writes to the fabric's reconfiguration interface directly. It asks a
//! [`Platform`] for the [`Fpga`] behind a device handle and drives that instead, so vendor
//! specific reconfiguration paths can be added without touching the loader.
//!
//! # Platform Discovery
//!
//! The platform for a device is found by:
//! 1. Reading the device's `<fpga_managers_dir>/<device>/of_node/compatible` string
//! 2. Matching it against the registered compatibility strings
//! 3. Falling back to the Universal platform if nothing matches
//!
//! # Platform Registration
//!
//! Platforms are declared with the `#[platform(compat_string = "...")]` macro, which
//! generates a `register_platform()` associated function. Registration happens once at
//! startup in [`register_platforms`](crate::platforms::register_platforms). A compatibility
//! string is a comma-separated list of components; a device matches a platform when every
//! component of the device's string appears in the platform's list.

use crate::config;
use crate::error::FabricError;
use crate::platforms::universal::UniversalPlatform;
use crate::system_io::{fs_read, fs_read_dir};
use log::{trace, warn};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, OnceLock};

type PlatformConstructor = fn() -> Box<dyn Platform>;

pub static PLATFORM_REGISTRY: OnceLock<Mutex<HashMap<&'static str, PlatformConstructor>>> =
    OnceLock::new();

/// A device which can be reconfigured with a bitstream.
pub trait Fpga: Send + Sync {
    /// The device handle, e.g. `fpga0`.
    fn device_handle(&self) -> &str;

    /// The device's reported state with trailing newlines removed. `operating` means a
    /// configuration image has been applied successfully.
    fn state(&self) -> Result<String, FabricError>;

    fn flags(&self) -> Result<u32, FabricError>;

    fn set_flags(&self, flags: u32) -> Result<(), FabricError>;

    /// Start downloading the image at the absolute path `bitstream_path`.
    ///
    /// Returns once the download has been requested. Completion is observed through
    /// [`state`](Fpga::state).
    fn load_firmware(&self, bitstream_path: &Path) -> Result<(), FabricError>;
}

pub trait Platform: Any + Send + Sync {
    /// Get the [`Fpga`] for `device_handle`.
    fn fpga(&self, device_handle: &str) -> Result<&dyn Fpga, FabricError>;
}

fn match_platform_string(platform_string: &str) -> Result<Box<dyn Platform>, FabricError> {
    let registry = PLATFORM_REGISTRY
        .get()
        .ok_or(FabricError::Internal(String::from(
            "couldn't get PLATFORM_REGISTRY",
        )))?
        .lock()
        .map_err(|_| FabricError::Internal(String::from("couldn't lock PLATFORM_REGISTRY")))?;

    for (compat_string, platform_constructor) in registry.iter() {
        let compat_set: HashSet<&str> = compat_string.split(',').collect();
        let compat_found = platform_string.split(',').all(|x| compat_set.contains(x));
        if compat_found {
            return Ok(platform_constructor());
        }
    }

    Err(FabricError::Argument(format!(
        "fabricd could not match {platform_string} to a known platform."
    )))
}

fn discover_platform(device_handle: &str) -> Result<Box<dyn Platform>, FabricError> {
    let compat_string = read_compatible_string(device_handle)?;
    trace!("Found compatibility string: '{compat_string}'");

    Ok(match_platform_string(&compat_string).unwrap_or_else(|_| {
        warn!("{compat_string} not supported. Defaulting to Universal platform.");
        Box::new(UniversalPlatform::new())
    }))
}

/// Read the device tree compatibility string of `device_handle`.
pub fn read_compatible_string(device_handle: &str) -> Result<String, FabricError> {
    let compat_path = Path::new(&config::fpga_managers_dir()?)
        .join(device_handle)
        .join("of_node/compatible");
    match fs_read(&compat_path) {
        Err(e) => Err(FabricError::Argument(format!(
            "Failed to read platform from {device_handle:?}: {e}"
        ))),
        // driver attributes are often NUL terminated
        Ok(s) => Ok(s.trim_end_matches('\0').to_string()),
    }
}

/// Use `platform_string` if given, otherwise discover the platform of `device_handle`.
pub fn platform_from_compat_or_device(
    platform_string: &str,
    device_handle: &str,
) -> Result<Box<dyn Platform>, FabricError> {
    match platform_string.is_empty() {
        true => discover_platform(device_handle),
        false => platform_for_known_platform(platform_string),
    }
}

pub fn platform_for_known_platform(
    platform_string: &str,
) -> Result<Box<dyn Platform>, FabricError> {
    match_platform_string(platform_string)
}

pub fn init_platform_registry() -> Mutex<HashMap<&'static str, PlatformConstructor>> {
    Mutex::new(HashMap::new())
}

pub fn register_platform(compatible: &'static str, constructor: PlatformConstructor) {
    let mut registry = PLATFORM_REGISTRY
        .get_or_init(init_platform_registry)
        .lock()
        .unwrap_or_else(|e| e.into_inner());
    trace!("Registering platform '{compatible}'");
    registry.insert(compatible, constructor);
}

/// Device handles of every FPGA manager on the system.
pub fn list_fpga_managers() -> Result<Vec<String>, FabricError> {
    fs_read_dir(Path::new(&config::fpga_managers_dir()?))
}
