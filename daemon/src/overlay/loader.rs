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

//! Downloading overlays into the fabric.
//!
//! A download runs entirely inside the [`PlState`]'s reconfiguration section:
//!
//! 1. If the overlay is already loaded, return [`LoadOutcome::AlreadyLoaded`]. Nothing is
//!    written.
//! 2. Invalidate the PL state. Every outstanding register window goes stale and the state
//!    reads `Unknown`.
//! 3. Request the download from the platform's [`Fpga`].
//! 4. Poll [`Fpga::state`] until it reports `operating`, bounded by the loader's
//!    [`PollPolicy`]. On timeout, or when the device reports an error state, the state stays
//!    `Unknown`.
//! 5. Publish the overlay's metadata and the load timestamp.
//!
//! Relative overlay paths that do not exist from the working directory are looked up in the
//! loader's search directory, the configured firmware source directory by default.

use crate::clock::{Clock, PollPolicy, SystemClock, poll_until};
use crate::config;
use crate::error::FabricError;
use crate::overlay::Overlay;
use crate::pl::{LoadedBitstream, PlSnapshot, PlState};
use crate::platforms::platform::{Fpga, Platform, platform_from_compat_or_device};
use log::{debug, info, trace};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What a download did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The overlay was already loaded and the fabric was left alone.
    AlreadyLoaded,
    Reconfigured,
}

pub struct OverlayLoader {
    pl: Arc<PlState>,
    platform: Box<dyn Platform>,
    device_handle: String,
    policy: PollPolicy,
    clock: Arc<dyn Clock>,
    search_dir: Option<PathBuf>,
}

impl OverlayLoader {
    pub fn new(
        pl: Arc<PlState>,
        platform: Box<dyn Platform>,
        device_handle: &str,
        policy: PollPolicy,
        clock: Arc<dyn Clock>,
    ) -> OverlayLoader {
        OverlayLoader {
            pl,
            platform,
            device_handle: device_handle.to_owned(),
            policy,
            clock,
            search_dir: None,
        }
    }

    /// Look up relative overlay paths in `dir`.
    pub fn with_search_dir(mut self, dir: &Path) -> OverlayLoader {
        self.search_dir = Some(dir.to_owned());
        self
    }

    /// A loader for `device_handle` using the discovered platform, the configured
    /// configuration timeout and firmware source directory, and the wall clock.
    pub fn from_config(
        pl: Arc<PlState>,
        platform_string: &str,
        device_handle: &str,
    ) -> Result<OverlayLoader, FabricError> {
        Ok(OverlayLoader::new(
            pl,
            platform_from_compat_or_device(platform_string, device_handle)?,
            device_handle,
            config::configuration_poll_policy()?,
            Arc::new(SystemClock),
        )
        .with_search_dir(Path::new(&config::firmware_source_dir()?)))
    }

    pub fn pl(&self) -> &Arc<PlState> {
        &self.pl
    }

    pub fn device_handle(&self) -> &str {
        &self.device_handle
    }

    /// The device this loader downloads to.
    pub fn fpga(&self) -> Result<&dyn Fpga, FabricError> {
        self.platform.fpga(&self.device_handle)
    }

    fn matches(snapshot: &PlSnapshot, overlay: &Overlay) -> bool {
        matches!(snapshot.bitstream(), LoadedBitstream::Loaded { id, .. } if id == overlay.id())
    }

    /// `true` if `overlay` is the bitstream the PL state records as loaded.
    pub fn is_loaded(&self, overlay: &Overlay) -> bool {
        OverlayLoader::matches(&self.pl.snapshot(), overlay)
    }

    /// Download `overlay` unless it is already loaded.
    ///
    /// # Returns: `Result<LoadOutcome, FabricError>`
    /// * `Ok(LoadOutcome::AlreadyLoaded)` - Nothing was done
    /// * `Ok(LoadOutcome::Reconfigured)` - The overlay is now loaded
    /// * `Err(FabricError::ConfigurationTimeout)` - The fabric never reported done; the PL
    ///   state is `Unknown`
    /// * `Err(FabricError)` - The platform failed; the PL state is `Unknown` if the failure
    ///   happened after the download was requested
    pub fn download(&self, overlay: &Overlay) -> Result<LoadOutcome, FabricError> {
        self.reconfigure(overlay, false)
    }

    /// Download `overlay` even if it is already loaded.
    pub fn force_download(&self, overlay: &Overlay) -> Result<LoadOutcome, FabricError> {
        self.reconfigure(overlay, true)
    }

    /// `path` itself if it exists, otherwise `path` inside the search directory when it is
    /// relative and found there.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_relative() && !path.exists() {
            if let Some(found) = self
                .search_dir
                .as_ref()
                .map(|dir| dir.join(path))
                .filter(|candidate| candidate.is_file())
            {
                debug!("Found {path:?} as {found:?}");
                return found;
            }
        }
        path.to_owned()
    }

    /// Validate the overlay at `path` and [`download`](OverlayLoader::download) it.
    ///
    /// Missing or malformed files are reported before anything is written.
    pub fn load(&self, path: &Path) -> Result<LoadOutcome, FabricError> {
        let overlay = Overlay::open(&self.resolve(path))?;
        self.download(&overlay)
    }

    /// Write the device's programming flags.
    ///
    /// Waits for any download in progress and holds off register access until the flags
    /// are written.
    pub fn set_flags(&self, flags: u32) -> Result<(), FabricError> {
        let _reconfiguration = self.pl.begin_reconfiguration();
        self.fpga()?.set_flags(flags)?;
        info!("Set {}'s flags to {flags:#x}", self.device_handle);
        Ok(())
    }

    fn reconfigure(&self, overlay: &Overlay, force: bool) -> Result<LoadOutcome, FabricError> {
        let mut reconfiguration = self.pl.begin_reconfiguration();
        if !force && OverlayLoader::matches(&reconfiguration.current(), overlay) {
            info!("{} is already loaded, skipping download", overlay.id());
            return Ok(LoadOutcome::AlreadyLoaded);
        }
        let fpga = self.fpga()?;

        reconfiguration.invalidate();
        info!(
            "Downloading {} to {}",
            overlay.bitstream().path().display(),
            self.device_handle
        );
        fpga.load_firmware(overlay.bitstream().path())?;

        let done = poll_until(self.clock.as_ref(), self.policy, || {
            let state = fpga.state()?;
            trace!("{} reports '{state}'", self.device_handle);
            if state.ends_with("error") {
                return Err(FabricError::FPGAState(format!(
                    "{} reports '{state}' while downloading {}",
                    self.device_handle,
                    overlay.id()
                )));
            }
            Ok(state == "operating")
        })?;
        if !done {
            return Err(FabricError::ConfigurationTimeout(format!(
                "{} did not report 'operating' within {:?} of downloading {}",
                self.device_handle,
                self.policy.timeout,
                overlay.id()
            )));
        }

        reconfiguration.commit(overlay.id().clone(), overlay.description().clone());
        info!("{} loaded to {}", overlay.id(), self.device_handle);
        Ok(LoadOutcome::Reconfigured)
    }
}
