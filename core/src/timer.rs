// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! The four hardware timers.
//!
//! Running timers do not tick every cycle; their overflow moment is a
//! scheduled event and counter reads derive from the elapsed time. Cascading
//! timers are instead incremented by the overflow handler of their
//! predecessor.

use crate::{
    addr::TM0CNT_H,
    apu::Apu,
    bits::BitOps,
    console::Ember,
    cpu::{Cpu, Interrupt},
    scheduler::{EventHandle, EventKind},
};

/// Prescaler divider per control setting.
const DIVS: [u16; 4] = [1, 64, 256, 1024];

#[derive(Default)]
pub struct Timers {
    /// Reload values; TMxCNT_L reads return the live counter instead.
    pub reload: [u16; 4],
    /// Counter snapshot; live value for stopped and cascading timers,
    /// start value for scheduled ones.
    pub counters: [u16; 4],
    /// Cycle at which a scheduled timer started counting.
    pub start: [u64; 4],
    /// Overflow event handles of running, non-cascading timers.
    pub scheduled: [Option<EventHandle>; 4],
}

impl Timers {
    /// The current counter value.
    pub fn read_counter(gg: &mut Ember, idx: u16) -> u16 {
        let timers = &gg.timers;
        match timers.scheduled[idx as usize] {
            Some(_) => {
                let elapsed = gg.scheduler.now() - timers.start[idx as usize];
                let div = Self::divider(gg[Self::hi_addr(idx)]);
                timers.counters[idx as usize].wrapping_add((elapsed / div as u64) as u16)
            }
            None => timers.counters[idx as usize],
        }
    }

    /// A write to a reload register; takes effect on the next overflow or
    /// start, never on the live counter.
    pub fn reload_write(gg: &mut Ember, idx: u16, value: u16) {
        gg.timers.reload[idx as usize] = value;
    }

    /// A write to a control register.
    pub fn hi_write(gg: &mut Ember, idx: u16, new_ctrl: u16) {
        let addr = Self::hi_addr(idx);
        let old_ctrl = gg[addr];
        let was_on = old_ctrl.bit(7);
        let is_on = new_ctrl.bit(7);

        // Freeze the counter before the configuration changes.
        gg.timers.counters[idx as usize] = Self::read_counter(gg, idx);
        Self::cancel(gg, idx);

        gg[addr] = new_ctrl & 0xC7;
        if !is_on {
            return;
        }
        if !was_on {
            gg.timers.counters[idx as usize] = gg.timers.reload[idx as usize];
        }
        // Cascading timers tick from the previous timer's overflow.
        let cascade = new_ctrl.bit(2) && idx != 0;
        if !cascade {
            Self::schedule_overflow(gg, idx);
        }
    }

    /// Scheduler event: a timer overflowed.
    pub fn handle_overflow(gg: &mut Ember, idx: u8, late_by: u32) {
        let idx = idx as u16;
        gg.timers.scheduled[idx as usize] = None;
        Self::overflow(gg, idx);
        // Repeating behaviour is explicit so the period can follow reload
        // changes.
        if gg[Self::hi_addr(idx)].bit(7) {
            Self::schedule_overflow_late(gg, idx, late_by);
        }
    }

    fn overflow(gg: &mut Ember, idx: u16) {
        let ctrl = gg[Self::hi_addr(idx)];
        gg.timers.counters[idx as usize] = gg.timers.reload[idx as usize];

        if ctrl.bit(6) {
            Cpu::request_interrupt_idx(gg, Interrupt::Timer0 as u16 + idx);
        }
        // Timers 0 and 1 clock the audio FIFOs.
        if idx < 2 {
            Apu::timer_overflowed(gg, idx as u8);
        }

        // Tick a cascading successor.
        if idx < 3 {
            let next_ctrl = gg[Self::hi_addr(idx + 1)];
            if next_ctrl.bit(7) && next_ctrl.bit(2) {
                let next = idx + 1;
                let counter = gg.timers.counters[next as usize].wrapping_add(1);
                gg.timers.counters[next as usize] = counter;
                if counter == 0 {
                    Self::overflow(gg, next);
                }
            }
        }
    }

    fn schedule_overflow(gg: &mut Ember, idx: u16) {
        Self::schedule_overflow_late(gg, idx, 0);
    }

    fn schedule_overflow_late(gg: &mut Ember, idx: u16, late_by: u32) {
        let div = Self::divider(gg[Self::hi_addr(idx)]);
        let until = (0x1_0000 - gg.timers.counters[idx as usize] as u64) * div as u64;
        gg.timers.start[idx as usize] = gg.scheduler.now() - late_by as u64;
        let handle = gg.scheduler.schedule(
            EventKind::TimerOverflow(idx as u8),
            until as i64 - late_by as i64,
        );
        gg.timers.scheduled[idx as usize] = Some(handle);
    }

    fn cancel(gg: &mut Ember, idx: u16) {
        if let Some(handle) = gg.timers.scheduled[idx as usize].take() {
            gg.scheduler.cancel(handle);
        }
    }

    fn divider(ctrl: u16) -> u16 {
        DIVS[ctrl.field(0, 2) as usize]
    }

    fn hi_addr(idx: u16) -> u32 {
        TM0CNT_H + idx as u32 * 4
    }
}
