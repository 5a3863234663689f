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

//! Process-wide system paths and timeouts.
//!
//! The configuration is loaded lazily on first access and kept for the life of the process.

use crate::clock::PollPolicy;
use crate::config::config_files::{
    SystemPaths, Timeouts, system_paths_from_file, timeouts_from_file,
};
use crate::config::{USER_CONFIG_PATH, VENDOR_CONFIG_PATH};
use crate::error::FabricError;
use log::{trace, warn};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::Duration;

pub static FPGA_MANAGERS_DIR: &str = "/sys/class/fpga_manager/";

pub static FIRMWARE_SOURCE_DIR: &str = "/lib/firmware/";

pub static FIRMWARE_SEARCH_PATH_CONTROL: &str = "/sys/module/firmware_class/parameters/path";

pub static DEVMEM_PATH: &str = "/dev/mem";

pub const MAILBOX_TIMEOUT_MS: u64 = 1000;

pub const CONFIGURATION_TIMEOUT_MS: u64 = 5000;

pub const CONFIGURATION_POLL_INTERVAL_MS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemConfig {
    pub(crate) fpga_managers_dir: String,
    pub(crate) firmware_source_dir: String,
    pub(crate) firmware_search_path_control: String,
    pub(crate) devmem_path: String,
    pub(crate) mailbox_timeout_ms: u64,
    pub(crate) configuration_timeout_ms: u64,
    pub(crate) configuration_poll_interval_ms: u64,
}

static CONFIG: OnceLock<Mutex<SystemConfig>> = OnceLock::new();

impl SystemConfig {
    pub(crate) fn from_parts(paths: SystemPaths, timeouts: Timeouts) -> SystemConfig {
        trace!("Creating SystemConfig from {paths:?} and {timeouts:?}");
        SystemConfig {
            fpga_managers_dir: paths.fpga_managers_dir.unwrap_or_else(|| {
                trace!("No fpga_managers_dir provided. Using hardcoded value.");
                FPGA_MANAGERS_DIR.to_string()
            }),
            firmware_source_dir: paths.firmware_source_dir.unwrap_or_else(|| {
                trace!("No firmware_source_dir provided. Using hardcoded value.");
                FIRMWARE_SOURCE_DIR.to_string()
            }),
            firmware_search_path_control: paths.firmware_search_path_control.unwrap_or_else(
                || {
                    trace!("No firmware_search_path_control provided. Using hardcoded value.");
                    FIRMWARE_SEARCH_PATH_CONTROL.to_string()
                },
            ),
            devmem_path: paths.devmem_path.unwrap_or_else(|| {
                trace!("No devmem_path provided. Using hardcoded value.");
                DEVMEM_PATH.to_string()
            }),
            mailbox_timeout_ms: timeouts.mailbox_timeout_ms.unwrap_or(MAILBOX_TIMEOUT_MS),
            configuration_timeout_ms: timeouts
                .configuration_timeout_ms
                .unwrap_or(CONFIGURATION_TIMEOUT_MS),
            configuration_poll_interval_ms: timeouts
                .configuration_poll_interval_ms
                .unwrap_or(CONFIGURATION_POLL_INTERVAL_MS),
        }
    }
}

fn init_system_config() -> Mutex<SystemConfig> {
    let vendor_path = Path::new(VENDOR_CONFIG_PATH);
    let user_path = Path::new(USER_CONFIG_PATH);
    let vendor_paths = system_paths_from_file(vendor_path).unwrap_or_else(|e| {
        warn!("Using hardcoded paths for vendor config because loading config failed: {e}");
        SystemPaths::default()
    });
    let user_paths = system_paths_from_file(user_path).unwrap_or_else(|e| {
        warn!("Using hardcoded paths for user config because loading config failed: {e}");
        SystemPaths::default()
    });
    let vendor_timeouts = timeouts_from_file(vendor_path).unwrap_or_else(|e| {
        trace!("No vendor timeouts: {e}");
        Timeouts::default()
    });
    let user_timeouts = timeouts_from_file(user_path).unwrap_or_else(|e| {
        trace!("No user timeouts: {e}");
        Timeouts::default()
    });
    trace!("Merging user_paths: {user_paths:?} with vendor_paths {vendor_paths:?}");
    let ret = SystemConfig::from_parts(
        user_paths.merge(vendor_paths),
        user_timeouts.merge(vendor_timeouts),
    );
    trace!("Resulting config: {ret:?}");
    Mutex::new(ret)
}

pub fn system_config() -> &'static Mutex<SystemConfig> {
    CONFIG.get_or_init(init_system_config)
}

pub fn system_config_guard() -> Result<MutexGuard<'static, SystemConfig>, FabricError> {
    system_config().lock().map_err(|e| {
        FabricError::Internal(format!("Failed when locking config for read access: {e}"))
    })
}

pub fn fpga_managers_dir() -> Result<String, FabricError> {
    Ok(system_config_guard()?.fpga_managers_dir.clone())
}

pub fn firmware_source_dir() -> Result<String, FabricError> {
    Ok(system_config_guard()?.firmware_source_dir.clone())
}

pub fn firmware_search_path_control() -> Result<String, FabricError> {
    Ok(system_config_guard()?.firmware_search_path_control.clone())
}

pub fn devmem_path() -> Result<String, FabricError> {
    Ok(system_config_guard()?.devmem_path.clone())
}

/// Busy-spin policy bounded by `mailbox_timeout_ms`.
pub fn mailbox_poll_policy() -> Result<PollPolicy, FabricError> {
    let config = system_config_guard()?;
    Ok(PollPolicy::spin(Duration::from_millis(
        config.mailbox_timeout_ms,
    )))
}

/// Policy used while waiting for the fabric to report configuration done.
pub fn configuration_poll_policy() -> Result<PollPolicy, FabricError> {
    let config = system_config_guard()?;
    Ok(PollPolicy::new(
        Duration::from_millis(config.configuration_timeout_ms),
        Duration::from_millis(config.configuration_poll_interval_ms),
    ))
}
