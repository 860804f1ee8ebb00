// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! The I/O register file and its side effects.
//!
//! Registers live in a flat half-word file; reads mostly come straight out
//! of it, writes go through [`Ember::set_mmio`] which applies the per-register
//! behaviour (acknowledge semantics, read-only bits, wait-state rebuilds,
//! subsystem kicks).

use std::ops::{Index, IndexMut};

use crate::{
    addr::*,
    apu::Apu,
    bits::{BitOps, Halves},
    console::Ember,
    cpu::Cpu,
    dma::Dmas,
    timer::Timers,
};

impl Ember {
    /// Read an I/O register. `addr` may be unaligned; the enclosing
    /// half-word is returned.
    pub(crate) fn get_mmio(&mut self, addr: u32) -> u16 {
        let a = addr & 0x3FE;
        match a {
            // Timer counters tick off the scheduler, not the file.
            TM0CNT_L => Timers::read_counter(self, 0),
            TM1CNT_L => Timers::read_counter(self, 1),
            TM2CNT_L => Timers::read_counter(self, 2),
            TM3CNT_L => Timers::read_counter(self, 3),

            _ => self[a],
        }
    }

    pub(crate) fn set_mmio(&mut self, addr: u32, value: u16) {
        let a = addr & 0x3FE;
        match a {
            // Interrupt control.
            IME => {
                self[IME] = value & 1;
                Cpu::check_if_interrupt(self);
            }
            IE => {
                self[IE] = value & 0x3FFF;
                Cpu::check_if_interrupt(self);
            }
            // Writing 1 bits acknowledges pending interrupts.
            IF => self[IF] &= !value,

            // PPU.
            DISPSTAT => self[DISPSTAT] = (self[DISPSTAT] & 0b111) | (value & !0b1100_0111),
            // Writes to the affine reference points take effect on the next
            // scanline.
            0x28..=0x2E | 0x38..=0x3E => {
                self[a] = value;
                self.ppu.reload_affine = true;
            }

            // Sound.
            SOUNDCNT_H => Apu::cnt_h_write(self, value),
            FIFO_A | 0xA2 => Apu::push_fifo(self, 0, value),
            FIFO_B | 0xA6 => Apu::push_fifo(self, 1, value),

            // Timers.
            TM0CNT_H => Timers::hi_write(self, 0, value),
            TM1CNT_H => Timers::hi_write(self, 1, value),
            TM2CNT_H => Timers::hi_write(self, 2, value),
            TM3CNT_H => Timers::hi_write(self, 3, value),
            TM0CNT_L => Timers::reload_write(self, 0, value),
            TM1CNT_L => Timers::reload_write(self, 1, value),
            TM2CNT_L => Timers::reload_write(self, 2, value),
            TM3CNT_L => Timers::reload_write(self, 3, value),

            // DMAs.
            DMA0CNT_H => Dmas::ctrl_write(self, 0, value),
            DMA1CNT_H => Dmas::ctrl_write(self, 1, value),
            DMA2CNT_H => Dmas::ctrl_write(self, 2, value),
            DMA3CNT_H => Dmas::ctrl_write(self, 3, value),

            // Wait-state control reshapes the bus tables.
            WAITCNT => {
                self[WAITCNT] = value & 0x7FFF;
                self.update_wait_times();
            }

            // RO registers.
            VCOUNT | KEYINPUT => (),

            _ => self[a] = value,
        }
    }

    /// 8-bit I/O writes modify one byte of the register; IF keeps its
    /// acknowledge semantics per byte lane.
    pub(crate) fn set_mmio_byte(&mut self, addr: u32, value: u8) {
        let a = addr & 0x3FF;
        match a {
            0x202 => self[IF] &= !(value as u16),
            0x203 => self[IF] &= !((value as u16) << 8),
            // HALTCNT; bit 7 selects stop mode, which we treat as halt.
            0x301 => Cpu::halt(self),
            _ if addr.bit(0) => {
                let cur = self.get_mmio(addr);
                self.set_mmio(addr, cur.with_hi(value))
            }
            _ => {
                let cur = self.get_mmio(addr);
                self.set_mmio(addr, cur.with_lo(value))
            }
        }
    }

    /// Rebuild the bus wait tables after WAITCNT or a settings change.
    pub(crate) fn update_wait_times(&mut self) {
        let waitcnt = self[WAITCNT];
        let allowed = self.settings.prefetch_buffer;
        self.memory.recalc_wait_tables(waitcnt, allowed);
    }
}

impl Index<u32> for Ember {
    type Output = u16;

    fn index(&self, addr: u32) -> &Self::Output {
        assert!(addr < 0x400);
        assert_eq!(addr & 1, 0);
        &self.memory.mmio[(addr >> 1) as usize]
    }
}

impl IndexMut<u32> for Ember {
    fn index_mut(&mut self, addr: u32) -> &mut Self::Output {
        assert!(addr < 0x400);
        assert_eq!(addr & 1, 0);
        &mut self.memory.mmio[(addr >> 1) as usize]
    }
}
