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

//! Daemon configuration.
//!
//! Settings are read from two TOML files: the vendor file at [`VENDOR_CONFIG_PATH`] and the
//! user file at [`USER_CONFIG_PATH`]. Each key found in the user file wins over the vendor
//! file, and any key found in neither falls back to the hard-coded defaults in
//! [`system_config`].
//!
//! ```toml
//! [system_paths]
//! fpga_managers_dir = "/sys/class/fpga_manager/"
//! firmware_source_dir = "/lib/firmware/"
//! firmware_search_path_control = "/sys/module/firmware_class/parameters/path"
//! devmem_path = "/dev/mem"
//!
//! [timeouts]
//! mailbox_timeout_ms = 1000
//! configuration_timeout_ms = 5000
//! configuration_poll_interval_ms = 10
//!
//! [boot_overlay]
//! default_device_handle = "fpga0"
//! default_overlay = "/lib/firmware/overlays/base.bit"
//! default_fpga_flags = 0
//! ```

pub mod boot_overlay;
pub mod config_files;
pub mod system_config;

pub use system_config::{
    configuration_poll_policy, devmem_path, firmware_search_path_control, firmware_source_dir,
    fpga_managers_dir, mailbox_poll_policy,
};

pub static VENDOR_CONFIG_PATH: &str = "/usr/lib/fabricd/config.toml";

pub static USER_CONFIG_PATH: &str = "/etc/fabricd/config.toml";
