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

//! Overlay metadata descriptions.
//!
//! Every bitstream ships with a TOML description of the hardware it creates. The loader
//! parses only this file, never the bitstream internals. A description looks like:
//!
//! ```toml
//! [design]
//! name = "base"
//!
//! [ip.iop_pmoda]
//! base_address = 0x40000000
//! range = 0x10000
//!
//! [ip.btns_gpio]
//! base_address = 0x41210000
//! range = 0x10000
//! state = "buttons"
//!
//! [gpio]
//! base_address = 0x41200000
//!
//! [gpio.lines.led0]
//! index = 3
//! count = 4
//! ```
//!
//! `range` must be non-zero, GPIO `count` must lie in `1..=32` and `index` must be below
//! `count`. GPIO lines may only be declared when the `[gpio]` table names the bank's base
//! address.

use crate::error::FabricError;
use crate::system_io::fs_read;
use log::trace;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default length of the register window opened over a GPIO bank.
pub const GPIO_BANK_RANGE: usize = 0x10;

/// An IP block of the loaded design.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpBlock {
    pub base_address: u64,
    pub range: usize,
    /// Free-form designer tag, reported alongside live reads.
    pub state: Option<String>,
}

/// A named group of lines inside the design's GPIO bank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpioLine {
    /// The line's user index: its bit in the bank's data register.
    pub index: u32,
    pub count: u32,
    /// Program currently driving the line, if any.
    pub state: Option<String>,
}

/// The register block holding every GPIO line's level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpioBank {
    pub base_address: u64,
    pub range: usize,
}

pub type IpDict = BTreeMap<String, IpBlock>;
pub type GpioDict = BTreeMap<String, GpioLine>;

/// The parsed contents of an overlay's metadata file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlayDescription {
    pub design: Option<String>,
    pub ip_dict: IpDict,
    pub gpio_dict: GpioDict,
    pub gpio_bank: Option<GpioBank>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MetadataToml {
    design: Option<DesignToml>,
    #[serde(default)]
    ip: BTreeMap<String, IpToml>,
    gpio: Option<GpioToml>,
}

#[derive(Debug, Deserialize)]
struct DesignToml {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IpToml {
    base_address: u64,
    range: usize,
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GpioToml {
    base_address: Option<u64>,
    range: Option<usize>,
    #[serde(default)]
    lines: BTreeMap<String, GpioLineToml>,
}

#[derive(Debug, Deserialize)]
struct GpioLineToml {
    index: u32,
    count: u32,
}

impl OverlayDescription {
    /// Read and validate the description at `path`.
    ///
    /// # Returns: `Result<OverlayDescription, FabricError>`
    /// * `Ok(OverlayDescription)` - The validated description
    /// * `Err(FabricError::FileNotFound)` - `path` is not a file
    /// * `Err(FabricError::MalformedImage)` - The file is not a valid description
    pub fn from_file(path: &Path) -> Result<OverlayDescription, FabricError> {
        if !path.is_file() {
            return Err(FabricError::FileNotFound(path.to_owned()));
        }
        OverlayDescription::parse(&fs_read(path)?, path)
    }

    /// Parse a description. `source` is only used in error messages.
    pub fn parse(toml_string: &str, source: &Path) -> Result<OverlayDescription, FabricError> {
        let malformed = |reason: String| FabricError::MalformedImage {
            file: PathBuf::from(source),
            reason,
        };
        let raw: MetadataToml =
            toml::from_str(toml_string).map_err(|e| malformed(e.to_string()))?;
        trace!("Parsed metadata from {source:?}: {raw:?}");

        let mut ip_dict = IpDict::new();
        for (name, ip) in raw.ip {
            if ip.range == 0 {
                return Err(malformed(format!("IP block '{name}' has an empty range")));
            }
            ip_dict.insert(
                name,
                IpBlock {
                    base_address: ip.base_address,
                    range: ip.range,
                    state: ip.state,
                },
            );
        }

        let mut gpio_dict = GpioDict::new();
        let mut gpio_bank = None;
        if let Some(gpio) = raw.gpio {
            for (name, line) in gpio.lines {
                if !(1..=32).contains(&line.count) {
                    return Err(malformed(format!(
                        "GPIO line '{name}' has count {} outside 1..=32",
                        line.count
                    )));
                }
                if line.index >= line.count {
                    return Err(malformed(format!(
                        "GPIO line '{name}' has index {} but only {} lines",
                        line.index, line.count
                    )));
                }
                gpio_dict.insert(
                    name,
                    GpioLine {
                        index: line.index,
                        count: line.count,
                        state: None,
                    },
                );
            }
            match gpio.base_address {
                Some(base_address) => {
                    gpio_bank = Some(GpioBank {
                        base_address,
                        range: gpio.range.unwrap_or(GPIO_BANK_RANGE),
                    })
                }
                None if !gpio_dict.is_empty() => {
                    return Err(malformed(
                        "GPIO lines are declared but [gpio] has no base_address".into(),
                    ));
                }
                None => {}
            }
        }

        Ok(OverlayDescription {
            design: raw.design.and_then(|d| d.name),
            ip_dict,
            gpio_dict,
            gpio_bank,
        })
    }
}
