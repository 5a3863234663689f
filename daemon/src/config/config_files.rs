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

//! Deserialisation of the TOML configuration files.
//!
//! Every table and every key is optional. Sections are read independently so that a user
//! file containing only `[boot_overlay]` still leaves the vendor `[system_paths]` in
//! effect.

use crate::error::FabricError;
use crate::system_io::fs_read;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct TomlConfig {
    system_paths: Option<SystemPaths>,
    timeouts: Option<Timeouts>,
    boot_overlay: Option<BootOverlay>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct SystemPaths {
    pub(crate) fpga_managers_dir: Option<String>,
    pub(crate) firmware_source_dir: Option<String>,
    pub(crate) firmware_search_path_control: Option<String>,
    pub(crate) devmem_path: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct Timeouts {
    pub(crate) mailbox_timeout_ms: Option<u64>,
    pub(crate) configuration_timeout_ms: Option<u64>,
    pub(crate) configuration_poll_interval_ms: Option<u64>,
}

/// Overlay to load when the daemon starts.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct BootOverlay {
    pub default_device_handle: Option<String>,
    pub default_overlay: Option<String>,
    pub default_fpga_flags: Option<u32>,
}

impl SystemPaths {
    /// Keys set in `self` win, the rest are taken from `fallback`.
    pub(crate) fn merge(self, fallback: SystemPaths) -> SystemPaths {
        SystemPaths {
            fpga_managers_dir: self.fpga_managers_dir.or(fallback.fpga_managers_dir),
            firmware_source_dir: self.firmware_source_dir.or(fallback.firmware_source_dir),
            firmware_search_path_control: self
                .firmware_search_path_control
                .or(fallback.firmware_search_path_control),
            devmem_path: self.devmem_path.or(fallback.devmem_path),
        }
    }
}

impl Timeouts {
    pub(crate) fn merge(self, fallback: Timeouts) -> Timeouts {
        Timeouts {
            mailbox_timeout_ms: self.mailbox_timeout_ms.or(fallback.mailbox_timeout_ms),
            configuration_timeout_ms: self
                .configuration_timeout_ms
                .or(fallback.configuration_timeout_ms),
            configuration_poll_interval_ms: self
                .configuration_poll_interval_ms
                .or(fallback.configuration_poll_interval_ms),
        }
    }
}

impl BootOverlay {
    pub(crate) fn merge(self, fallback: BootOverlay) -> BootOverlay {
        BootOverlay {
            default_device_handle: self
                .default_device_handle
                .or(fallback.default_device_handle),
            default_overlay: self.default_overlay.or(fallback.default_overlay),
            default_fpga_flags: self.default_fpga_flags.or(fallback.default_fpga_flags),
        }
    }
}

pub(crate) fn toml_str_to_config(toml_string: &str) -> Result<TomlConfig, FabricError> {
    toml::from_str(toml_string).map_err(|e| FabricError::TomlDe {
        toml_string: toml_string.into(),
        e,
    })
}

fn config_from_file(file_path: &Path) -> Result<TomlConfig, FabricError> {
    if !file_path.is_file() {
        return Err(FabricError::Internal(format!(
            "Config file not found in {file_path:?}"
        )));
    }
    toml_str_to_config(&fs_read(file_path)?)
}

pub(crate) fn system_paths_from_file(file_path: &Path) -> Result<SystemPaths, FabricError> {
    config_from_file(file_path)?.system_paths.ok_or_else(|| {
        FabricError::Internal(format!(
            "{file_path:?} did not contain a `[system_paths]` section."
        ))
    })
}

pub(crate) fn timeouts_from_file(file_path: &Path) -> Result<Timeouts, FabricError> {
    config_from_file(file_path)?.timeouts.ok_or_else(|| {
        FabricError::Internal(format!(
            "{file_path:?} did not contain a `[timeouts]` section."
        ))
    })
}

pub fn boot_overlay_from_file(file_path: &Path) -> Result<BootOverlay, FabricError> {
    config_from_file(file_path)?.boot_overlay.ok_or_else(|| {
        FabricError::Internal(format!(
            "{file_path:?} did not contain a `[boot_overlay]` section."
        ))
    })
}
