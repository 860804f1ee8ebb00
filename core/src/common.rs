// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Runtime settings and the error types of the public API surface.

use std::{error::Error, fmt};

use serde::{Deserialize, Serialize};

/// Emulation settings. All of these may be changed while running; the
/// front-end owns persistence.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Run as fast as the host allows.
    pub fast_forward: bool,
    /// Speed multiplier the front-end paces itself to.
    pub speed: f32,
    /// Model the cartridge prefetch buffer; turning this off makes every
    /// cart access pay full price.
    pub prefetch_buffer: bool,
    pub enable_frame_skipping: bool,
    /// Frames skipped between rendered ones.
    pub frame_skip_counter: u8,
    pub ppu: PpuSettings,
    pub apu: ApuSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PpuSettings {
    pub enable_bg_layers: [bool; 4],
    pub enable_oam: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApuSettings {
    pub enable_psg_channels: [bool; 4],
    pub enable_fifo_channels: [bool; 2],
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fast_forward: false,
            speed: 1.0,
            prefetch_buffer: true,
            enable_frame_skipping: false,
            frame_skip_counter: 0,
            ppu: PpuSettings {
                enable_bg_layers: [true; 4],
                enable_oam: true,
            },
            apu: ApuSettings {
                enable_psg_channels: [true; 4],
                enable_fifo_channels: [true; 2],
            },
        }
    }
}

/// Why a `Reset` was rejected. The console stays idle at power-on state.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LaunchError {
    /// The ROM is missing, too small to carry a header, or too large for
    /// the cartridge bus.
    BadRom,
    /// No BIOS image was provided and booting through it was requested.
    MissingBios,
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BadRom => write!(f, "ROM image is missing or has an invalid size"),
            Self::MissingBios => write!(f, "BIOS image required when not skipping boot"),
        }
    }
}

impl Error for LaunchError {}

/// Why a save state failed to load. The console may be left partially
/// reset; callers should follow up with a `Reset`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LoadStateError {
    /// The magic is missing. This also covers states from the deprecated
    /// unversioned format, which cannot be restored portably.
    BadMagic,
    UnsupportedVersion(u32),
    /// The state belongs to a different ROM.
    RomMismatch,
    /// The buffer ended in the middle of a structure.
    Truncated,
    /// A chunk's content did not decode (wrong fixed size, bad encoding,
    /// run-length overflow).
    BadChunk(&'static str),
    MissingChunk(&'static str),
    /// The scheduler header and the event array disagree.
    EventCountMismatch,
}

impl fmt::Display for LoadStateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "not a save state (bad magic)"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported save state version {v}"),
            Self::RomMismatch => write!(f, "save state was taken with a different ROM"),
            Self::Truncated => write!(f, "save state is truncated"),
            Self::BadChunk(name) => write!(f, "malformed {name} chunk"),
            Self::MissingChunk(name) => write!(f, "mandatory {name} chunk missing"),
            Self::EventCountMismatch => write!(f, "scheduler event count mismatch"),
        }
    }
}

impl Error for LoadStateError {}
