// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Emulator core for the Ember handheld.
//!
//! The crate is organized around a single [`Ember`] console struct that owns
//! every subsystem; most hardware behaviour is implemented as `impl Ember`
//! blocks spread over the subsystem modules, since almost everything on this
//! console can touch the bus and therefore the whole machine.
//!
//! Front-ends talk to the core exclusively through the message inbox and the
//! shared output region, both found in [`message`].

pub mod apu;
pub mod bits;
pub mod cart;
pub mod common;
pub mod console;
pub mod cpu;
pub mod dma;
pub mod input;
pub mod memory;
pub mod message;
pub mod ppu;
pub mod savestate;
pub mod scheduler;
pub mod timer;

mod addr;

pub use console::Ember;
pub use message::{LaunchConfig, Message, SharedData};

/// Width of the visible screen, in pixels.
pub const SCREEN_WIDTH: usize = 240;
/// Height of the visible screen, in pixels.
pub const SCREEN_HEIGHT: usize = 160;
/// Total scanline slots per frame, including vertical blank.
pub const SCREEN_REAL_HEIGHT: usize = 228;

/// The master clock, in cycles per second.
pub const CPU_CLOCK: u32 = 1 << 24;

/// A finished pixel in the console's native format: `0bbbbbgggggrrrrr`.
pub type Colour = u16;
