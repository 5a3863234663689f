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


//! Fabric reconfiguration platforms. See [`platform`] for the traits and registry.

pub mod platform;
pub mod universal;
pub mod universal_components;

use crate::platforms::universal::UniversalPlatform;

/// Register every platform compiled into fabricd. Call once at startup.
pub fn register_platforms() {
    UniversalPlatform::register_platform();
}
