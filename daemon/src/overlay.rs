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

//! Overlays: a bitstream plus the metadata describing the hardware it creates.
//!
//! An overlay on disk is a pair of files in the same directory:
//!
//! ```text
//! /lib/firmware/overlays/base.bit     the configuration image
//! /lib/firmware/overlays/base.toml    its metadata description
//! ```
//!
//! The metadata file is named after the image's stem, which is its file name up to the first
//! `.`, so `design.bit.bin` pairs with `design.toml`. See [`crate::pl::metadata`] for the
//! description format.
//!
//! [`Overlay::open`] validates both files without touching hardware. The
//! [`OverlayLoader`] then downloads the image through a reconfiguration
//! [`Platform`](crate::platforms::platform::Platform) and publishes the metadata to the
//! [`PlState`](crate::pl::PlState).

pub mod bitstream;
pub mod loader;

pub use bitstream::{BitHeader, Bitstream, BitstreamFormat};
pub use loader::{LoadOutcome, OverlayLoader};

use crate::error::FabricError;
use crate::pl::{BitstreamId, OverlayDescription};
use log::trace;
use std::path::{Path, PathBuf};

/// Path of the metadata description accompanying the image at `bitstream_path`.
///
/// # Returns: `Result<PathBuf, FabricError>`
/// * `Ok(PathBuf)` - `<dir>/<stem>.toml`
/// * `Err(FabricError::Argument)` - `bitstream_path` has no usable file name
pub fn metadata_path(bitstream_path: &Path) -> Result<PathBuf, FabricError> {
    let stem = bitstream_path
        .file_name()
        .and_then(|f| f.to_str())
        .and_then(|f| f.split('.').next())
        .filter(|stem| !stem.is_empty())
        .ok_or_else(|| {
            FabricError::Argument(format!(
                "Cannot derive a metadata file name from {bitstream_path:?}"
            ))
        })?;
    Ok(bitstream_path.with_file_name(format!("{stem}.toml")))
}

/// A validated bitstream and its parsed description.
#[derive(Debug, Clone)]
pub struct Overlay {
    bitstream: Bitstream,
    description: OverlayDescription,
    metadata_path: PathBuf,
}

impl Overlay {
    /// Validate the image at `path` and its metadata description.
    ///
    /// # Returns: `Result<Overlay, FabricError>`
    /// * `Ok(Overlay)` - Both files are usable
    /// * `Err(FabricError::FileNotFound)` - The image or its description is missing
    /// * `Err(FabricError::MalformedImage)` - The image or its description is invalid
    pub fn open(path: &Path) -> Result<Overlay, FabricError> {
        let bitstream = Bitstream::open(path)?;
        let metadata_path = metadata_path(bitstream.path())?;
        trace!("Reading overlay metadata from {metadata_path:?}");
        let description = OverlayDescription::from_file(&metadata_path)?;
        Ok(Overlay {
            bitstream,
            description,
            metadata_path,
        })
    }

    pub fn id(&self) -> &BitstreamId {
        self.bitstream.id()
    }

    pub fn bitstream(&self) -> &Bitstream {
        &self.bitstream
    }

    pub fn description(&self) -> &OverlayDescription {
        &self.description
    }

    pub fn metadata_path(&self) -> &Path {
        &self.metadata_path
    }
}
