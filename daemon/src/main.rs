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

//! fabricd - system service for reconfiguring FPGA fabric.
//!
//! At startup the daemon:
//! 1. Registers all available platform implementations
//! 2. Creates the process-wide PL state over `/dev/mem`
//! 3. Loads the boot overlay, if one is configured
//! 4. Connects to the system DBus and advertises the service
//! 5. Waits indefinitely for incoming DBus requests
//!
//! # Environment Variables
//!
//! - `RUST_LOG` - Controls logging level (`trace`, `debug`, `info`, `warn`, `error`
//!   or `off`). Defaults to `info`
//!
//! # Examples
//!
//! ```bash
//! # Run with debug logging
//! RUST_LOG=debug fabricd
//! ```

use fabricd::comm::dbus::control_interface::ControlInterface;
use fabricd::comm::dbus::status_interface::StatusInterface;
use fabricd::comm::dbus::{CONTROL_PATH, SERVICE_NAME, STATUS_PATH};
use fabricd::config::boot_overlay::load_defaults;
use fabricd::mmio::DevMemMapper;
use fabricd::pl::PlState;
use fabricd::platforms::register_platforms;
use log::{info, warn};
use std::error::Error;
use std::future::pending;
use std::sync::Arc;
use zbus::connection;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    register_platforms();

    let pl = Arc::new(PlState::new(Arc::new(DevMemMapper::from_config()?)));

    let boot_pl = pl.clone();
    match tokio::task::spawn_blocking(move || load_defaults(&boot_pl)).await? {
        Ok(message) => info!("{}", message.trim_end()),
        Err(e) => warn!("Failed to load the boot overlay: {e}"),
    }

    let _conn = connection::Builder::system()?
        .name(SERVICE_NAME)?
        .serve_at(STATUS_PATH, StatusInterface::new(pl.clone()))?
        .serve_at(CONTROL_PATH, ControlInterface::new(pl))?
        .build()
        .await?;

    info!("Started {SERVICE_NAME} dbus service");
    pending::<()>().await;

    Ok(())
}
