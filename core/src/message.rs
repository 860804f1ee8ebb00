// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! The front-end interface: the message inbox and the shared output region.
//!
//! Front-ends never touch emulator state directly. Commands travel through
//! a FIFO channel drained between instructions; results come back through
//! the [`SharedData`] block, which is the only memory both sides touch.

use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
    Arc, Mutex,
};

use crossbeam_channel::Sender;

use crate::{
    cart::{backup::BackupType, gpio::GpioDeviceType},
    common::Settings,
    input::Button,
    memory::PAGE_SIZE,
    Colour, SCREEN_HEIGHT, SCREEN_WIDTH,
};

/// Everything needed to boot a game.
pub struct LaunchConfig {
    pub rom: Vec<u8>,
    /// BIOS image; may be absent when `skip_bios` is set.
    pub bios: Option<Vec<u8>>,
    /// Start execution at the cartridge entry point instead of the BIOS.
    pub skip_bios: bool,
    /// Host mixing rate; kept for front-ends, the core does not mix.
    pub audio_frequency: u32,
    pub settings: Settings,
    pub backup_type: BackupType,
    pub gpio_device: GpioDeviceType,
}

/// Commands a front-end can send to the console.
pub enum Message {
    /// Power-cycle and bind a new launch configuration.
    Reset(Box<LaunchConfig>),
    /// Enter the running state.
    Run,
    /// Stop the emulation loop at the next safe point.
    Exit,
    /// A key changed state.
    Key { button: Button, pressed: bool },
    /// Restore a previously saved state.
    LoadState(Vec<u8>),
    /// Serialize the current state and send it back.
    SaveState(Sender<Vec<u8>>),
    /// Replace the runtime settings.
    UpdateSettings(Settings),
}

/// The published framebuffer slot. Readers that see `version` unchanged
/// across their copy know they did not tear.
pub struct SharedFramebuffer {
    pub data: Mutex<Box<[Colour]>>,
    pub version: AtomicU32,
    pub dirty: AtomicBool,
}

/// Backup storage bytes, shared so the front-end can persist them.
pub struct BackupBuffer {
    pub data: Mutex<Vec<u8>>,
    pub dirty: AtomicBool,
}

impl Default for BackupBuffer {
    fn default() -> Self {
        Self {
            data: Mutex::new(Vec::new()),
            dirty: AtomicBool::new(false),
        }
    }
}

impl BackupBuffer {
    /// Copy out the buffer for persistence if it changed, clearing the
    /// dirty flag.
    pub fn take_dirty(&self) -> Option<Vec<u8>> {
        if self.dirty.swap(false, Ordering::AcqRel) {
            Some(self.data.lock().unwrap().clone())
        } else {
            None
        }
    }
}

/// The block of state shared between the emulation thread and front-end
/// threads; everything else is exclusive to the emulation thread.
pub struct SharedData {
    pub framebuffer: SharedFramebuffer,
    /// Total frames emulated; front-ends reset this for FPS counting.
    pub frame_counter: AtomicU32,
    /// Pages materialized per lazily allocated RAM (EWRAM, IWRAM, VRAM),
    /// refreshed with every published frame. Diagnostics only.
    pub ram_pages: [AtomicUsize; 3],
    pub backup: Arc<BackupBuffer>,
}

impl Default for SharedData {
    fn default() -> Self {
        Self {
            framebuffer: SharedFramebuffer {
                data: Mutex::new(vec![0; SCREEN_WIDTH * SCREEN_HEIGHT].into_boxed_slice()),
                version: AtomicU32::new(0),
                dirty: AtomicBool::new(false),
            },
            frame_counter: AtomicU32::new(0),
            ram_pages: [AtomicUsize::new(0), AtomicUsize::new(0), AtomicUsize::new(0)],
            backup: Arc::new(BackupBuffer::default()),
        }
    }
}

impl SharedData {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Copy the most recent frame out, returning the version it carried.
    pub fn copy_frame(&self, dst: &mut [Colour]) -> u32 {
        let version = self.framebuffer.version.load(Ordering::Acquire);
        let data = self.framebuffer.data.lock().unwrap();
        dst.copy_from_slice(&data);
        version
    }

    /// Frames completed since the last call; the FPS counter primitive.
    pub fn take_frame_counter(&self) -> u32 {
        self.frame_counter.swap(0, Ordering::AcqRel)
    }

    /// Materialized EWRAM/IWRAM/VRAM sizes in KiB, as of the last
    /// published frame.
    pub fn ram_usage_kib(&self) -> [usize; 3] {
        let mut out = [0; 3];
        for (dst, pages) in out.iter_mut().zip(&self.ram_pages) {
            *dst = pages.load(Ordering::Relaxed) * PAGE_SIZE / 1024;
        }
        out
    }
}
