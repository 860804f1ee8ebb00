// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! The four-channel DMA engine.
//!
//! A channel whose start condition is met does not begin immediately: a
//! `DmaStart` event is scheduled a couple of cycles out, and the transfer
//! then runs to completion on the emulation thread. Triggers that arrive
//! while another transfer runs simply queue behind it in the scheduler.

use crate::{
    addr::VCOUNT,
    bits::{BitOps, Halves},
    console::Ember,
    cpu::{Cpu, Interrupt},
    memory::Access,
    scheduler::EventKind,
};

const SRC_MASK: [u32; 4] = [0x7FF_FFFF, 0xFFF_FFFF, 0xFFF_FFFF, 0xFFF_FFFF];
const DST_MASK: [u32; 4] = [0x7FF_FFFF, 0x7FF_FFFF, 0x7FF_FFFF, 0xFFF_FFFF];

/// No channel active.
const IDLE: u16 = 99;

/// Cycles between a met start condition and the first transfer.
const START_DELAY: i64 = 2;

/// Reason a DMA transfer attempt was initiated.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DmaReason {
    /// The control register was written.
    CtrlWrite,
    /// The PPU entered HBlank.
    HBlank,
    /// The PPU entered VBlank.
    VBlank,
    /// A FIFO sound channel is requesting new samples.
    Fifo,
    /// Video capture, serviced during lines 2..162.
    Special,
}

/// The DMA channels.
#[derive(Default)]
pub struct Dmas {
    /// Internal source registers.
    pub src: [u32; 4],
    /// Internal destination registers.
    pub dst: [u32; 4],
    /// Transfer value cache, shared between channels; drives open-bus
    /// reads from invalid source addresses.
    pub cache: u32,
    /// Currently running channel, or [`IDLE`].
    pub running: u16,
    /// Start reason of a scheduled but not yet begun transfer.
    pub pending: [Option<DmaReason>; 4],
}

impl Dmas {
    pub fn any_running(&self) -> bool {
        self.running != IDLE
    }

    /// Check all channels against a trigger.
    pub fn update_all(gg: &mut Ember, reason: DmaReason) {
        for idx in 0..4 {
            Self::update_one(gg, idx, reason);
        }
    }

    /// Check a single channel against a trigger, scheduling its start if
    /// the condition matches.
    pub fn update_one(gg: &mut Ember, idx: u16, reason: DmaReason) {
        let ctrl = gg[Self::base_addr(idx) + 0xA];
        if !ctrl.bit(15) || gg.dma.pending[idx as usize].is_some() {
            return;
        }

        let timing = ctrl.field(12, 2);
        let vid_capture =
            idx == 3 && timing == 3 && reason == DmaReason::Special;
        let on = match timing {
            0 => reason == DmaReason::CtrlWrite,
            1 => reason == DmaReason::VBlank,
            2 => reason == DmaReason::HBlank && gg[VCOUNT] < 160,
            _ => reason == DmaReason::Fifo || vid_capture,
        };
        if on {
            gg.dma.pending[idx as usize] = Some(reason);
            gg.scheduler
                .schedule(EventKind::DmaStart(idx as u8), START_DELAY);
        }
    }

    /// Update a channel after its control register was written.
    pub fn ctrl_write(gg: &mut Ember, idx: u16, new_ctrl: u16) {
        let base = Self::base_addr(idx);
        let old_ctrl = gg[base + 0xA];
        if !old_ctrl.bit(15) && new_ctrl.bit(15) {
            // 0 -> 1 on the enable bit reloads the internal registers.
            let src = u32::from_halves(gg[base], gg[base + 2]);
            let dst = u32::from_halves(gg[base + 4], gg[base + 6]);
            gg.dma.src[idx as usize] = src & SRC_MASK[idx as usize];
            gg.dma.dst[idx as usize] = dst & DST_MASK[idx as usize];
        }

        gg[base + 0xA] = new_ctrl & if idx == 3 { 0xFFE0 } else { 0xF7E0 };
        Self::update_one(gg, idx, DmaReason::CtrlWrite);
    }

    /// Scheduler event: a scheduled start fires.
    pub fn handle_start(gg: &mut Ember, idx: u8) {
        let idx = idx as u16;
        let Some(reason) = gg.dma.pending[idx as usize].take() else {
            return;
        };
        let base = Self::base_addr(idx);
        let ctrl = gg[base + 0xA];
        if !ctrl.bit(15) {
            // Disabled between trigger and start.
            return;
        }
        Self::run_transfer(gg, idx, base, ctrl, reason);
    }

    /// Is channel 3 armed for video capture? Latched by the PPU once per
    /// frame.
    pub fn video_capture_armed(gg: &mut Ember) -> bool {
        let ctrl = gg[Self::base_addr(3) + 0xA];
        ctrl.bit(15) && ctrl.field(12, 2) == 3
    }

    fn run_transfer(gg: &mut Ember, idx: u16, base: u32, ctrl: u16, reason: DmaReason) {
        let fifo = reason == DmaReason::Fifo;
        let vid_capture = reason == DmaReason::Special;
        let prev = gg.dma.running;
        gg.dma.running = idx;
        gg.memory.last_access_from_dma = true;

        let count = gg[base + 8];
        let count = match count {
            _ if fifo => 4,
            0 if idx == 3 => 0x1_0000,
            0 => 0x4000,
            _ => count as u32,
        };
        let src_mod = Self::get_step(ctrl.field(7, 2));

        let dst_raw = ctrl.field(5, 2);
        let dst_mod = match dst_raw {
            _ if fifo => 0,
            3 => {
                // Reload DST, then increment.
                let dst = u32::from_halves(gg[base + 4], gg[base + 6]);
                gg.dma.dst[idx as usize] = dst & DST_MASK[idx as usize];
                2
            }
            _ => Self::get_step(dst_raw),
        };

        let word_transfer = ctrl.bit(10);
        if fifo || word_transfer {
            Self::perform_transfer::<true>(gg, idx as usize, count, src_mod * 2, dst_mod * 2);
        } else {
            if idx == 3 && gg.cart.is_eeprom_at(gg.dma.dst[3]) {
                // The burst length tells a fresh EEPROM its address width.
                gg.cart.eeprom_dma_started(count);
            }
            Self::perform_transfer::<false>(gg, idx as usize, count, src_mod, dst_mod);
        }

        if !ctrl.bit(9) || ctrl.field(12, 2) == 0 || (vid_capture && gg[VCOUNT] == 161) {
            // Disable: repeat is off, it was an immediate transfer, or
            // video capture just finished its last line.
            gg[base + 0xA] = ctrl.with_bit(15, false);
        }
        if ctrl.bit(14) {
            Cpu::request_interrupt_idx(gg, Interrupt::Dma0 as u16 + idx);
        }

        gg.dma.running = prev;
        gg.memory.last_access_from_dma = prev != IDLE;
    }

    /// Perform a transfer. Reads from unmapped sources repeat the last
    /// transferred value.
    fn perform_transfer<const WORD: bool>(
        gg: &mut Ember,
        idx: usize,
        count: u32,
        src_mod: i32,
        dst_mod: i32,
    ) {
        if gg.dma.dst[idx] < 0x200_0000 {
            return;
        }

        let mut kind = Access::NonSeq;
        if gg.dma.src[idx] >= 0x200_0000 {
            // Align SRC/DST first.
            let align = if WORD { 3 } else { 1 };
            gg.dma.src[idx] &= !align;
            gg.dma.dst[idx] &= !align;

            for _ in 0..count {
                if WORD {
                    let value = gg.read_word(gg.dma.src[idx], kind);
                    gg.dma.cache = value;
                    gg.memory.dma_bus = value;
                    gg.write_word(gg.dma.dst[idx], value, kind);
                } else {
                    let value = gg.read_hword(gg.dma.src[idx], kind) as u16;
                    gg.dma.cache = u32::from_halves(value, value);
                    gg.memory.dma_bus = gg.dma.cache;
                    gg.write_hword(gg.dma.dst[idx], value, kind);
                }
                gg.dma.src[idx] = gg.dma.src[idx].wrapping_add_signed(src_mod);
                gg.dma.dst[idx] = gg.dma.dst[idx].wrapping_add_signed(dst_mod);
                // Only the first access is non-sequential.
                kind = Access::Seq;
            }
        } else {
            for _ in 0..count {
                if WORD {
                    gg.write_word(gg.dma.dst[idx], gg.dma.cache, kind);
                } else if gg.dma.dst[idx].bit(1) {
                    gg.write_hword(gg.dma.dst[idx], gg.dma.cache.hi(), kind);
                } else {
                    gg.write_hword(gg.dma.dst[idx], gg.dma.cache.lo(), kind);
                }
                gg.dma.src[idx] = gg.dma.src[idx].wrapping_add_signed(src_mod);
                gg.dma.dst[idx] = gg.dma.dst[idx].wrapping_add_signed(dst_mod);
                kind = Access::Seq;
            }
        }
        gg.add_i_cycles(2);
    }

    /// Step applied to SRC/DST after every unit; doubled for words.
    /// Increment-reload is handled separately.
    fn get_step(bits: u16) -> i32 {
        match bits {
            0 => 2,
            1 => -2,
            _ => 0,
        }
    }

    /// First register (SRC low) of a channel's block.
    fn base_addr(idx: u16) -> u32 {
        0xB0 + (idx as u32 * 0xC)
    }
}
