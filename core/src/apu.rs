// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! The audio unit, reduced to the parts the rest of the system interacts
//! with: the two sample FIFOs that timers drain and DMA refills, and the
//! control register plumbing. No mixing or output happens here.

use arrayvec::ArrayVec;

use crate::{
    addr::SOUNDCNT_H,
    bits::{BitOps, Halves},
    console::Ember,
    dma::{DmaReason, Dmas},
};

pub const FIFO_LEN: usize = 32;

#[derive(Default)]
pub struct Apu {
    pub fifo_a: ArrayVec<i8, FIFO_LEN>,
    pub fifo_b: ArrayVec<i8, FIFO_LEN>,
    /// Last sample popped per FIFO; what a mixer would consume.
    pub current: [i8; 2],
}

impl Apu {
    /// A write to the FIFO data registers pushes two samples.
    pub fn push_fifo(gg: &mut Ember, fifo: usize, value: u16) {
        let queue = if fifo == 0 {
            &mut gg.apu.fifo_a
        } else {
            &mut gg.apu.fifo_b
        };
        for byte in [value.lo(), value.hi()] {
            if queue.try_push(byte as i8).is_err() {
                break;
            }
        }
    }

    /// SOUNDCNT_H write; bits 11/15 reset the FIFOs and read back as 0.
    pub fn cnt_h_write(gg: &mut Ember, value: u16) {
        if value.bit(11) {
            gg.apu.fifo_a.clear();
        }
        if value.bit(15) {
            gg.apu.fifo_b.clear();
        }
        gg[SOUNDCNT_H] = value & !0x8800;
    }

    /// Timer 0 or 1 overflowed: FIFO channels clocked by it pop a sample
    /// and request a refill once they run low.
    pub fn timer_overflowed(gg: &mut Ember, timer: u8) {
        let cnt = gg[SOUNDCNT_H];
        for (fifo, select_bit, dma) in [(0usize, 10u32, 1u16), (1, 14, 2)] {
            if cnt.bit(select_bit) != (timer == 1) {
                continue;
            }
            let enabled = gg.settings.apu.enable_fifo_channels[fifo];
            let queue = if fifo == 0 {
                &mut gg.apu.fifo_a
            } else {
                &mut gg.apu.fifo_b
            };
            if let Some(sample) = queue.pop_at(0) {
                if enabled {
                    gg.apu.current[fifo] = sample;
                }
            }
            let len = if fifo == 0 {
                gg.apu.fifo_a.len()
            } else {
                gg.apu.fifo_b.len()
            };
            if len <= FIFO_LEN / 2 {
                Dmas::update_one(gg, dma, DmaReason::Fifo);
            }
        }
    }
}
