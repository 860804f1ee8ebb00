// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Cycle counter and event scheduler.
//!
//! Everything time-driven on this console (PPU phases, timer overflows, DMA
//! starts, delayed IRQ delivery, the RTC tick) is an event. The CPU charges
//! bus and idle cycles against the scheduler's monotonic counter; once per
//! instruction the console drains all events whose deadline has passed.
//!
//! Handlers are never invoked while the scheduler is borrowed: the console
//! pops one due event at a time with [`Scheduler::pop_due`] and dispatches it
//! afterwards, so a handler is free to schedule or cancel anything.

use std::{cmp::Reverse, collections::BinaryHeap};

use crate::{
    cart::gpio::Gpio,
    console::Ember,
    cpu::Cpu,
    dma::Dmas,
    ppu::Ppu,
    timer::Timers,
};

/// All scheduler events on the console.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EventKind {
    /// Start of the next scanline's draw period.
    HDraw,
    /// Start of the horizontal blank of the current scanline.
    HBlank,
    /// A timer overflow.
    TimerOverflow(u8),
    /// A DMA channel whose start condition was met begins its transfer.
    DmaStart(u8),
    /// A delayed IRQ becomes visible in the interrupt flags.
    RaiseIrq(u8),
    /// One second of RTC time has passed.
    RtcTick,
}

impl EventKind {
    /// Handle the event by delegating to the appropriate handler.
    pub fn dispatch(self, gg: &mut Ember, late_by: u32) {
        match self {
            Self::HDraw => Ppu::handle_hdraw(gg, late_by),
            Self::HBlank => Ppu::handle_hblank(gg, late_by),
            Self::TimerOverflow(idx) => Timers::handle_overflow(gg, idx, late_by),
            Self::DmaStart(idx) => Dmas::handle_start(gg, idx),
            Self::RaiseIrq(idx) => Cpu::handle_raised_irq(gg, idx),
            Self::RtcTick => Gpio::handle_rtc_tick(gg),
        }
    }

    /// Encode the event as a (tag, argument) pair for serialization.
    pub fn to_raw(self) -> (u32, u32) {
        match self {
            Self::HDraw => (0, 0),
            Self::HBlank => (1, 0),
            Self::TimerOverflow(idx) => (2, idx as u32),
            Self::DmaStart(idx) => (3, idx as u32),
            Self::RaiseIrq(idx) => (4, idx as u32),
            Self::RtcTick => (5, 0),
        }
    }

    /// Decode an event from its serialized (tag, argument) pair.
    pub fn from_raw(tag: u32, arg: u32) -> Option<Self> {
        Some(match tag {
            0 => Self::HDraw,
            1 => Self::HBlank,
            2 if arg < 4 => Self::TimerOverflow(arg as u8),
            3 if arg < 4 => Self::DmaStart(arg as u8),
            4 if arg < 14 => Self::RaiseIrq(arg as u8),
            5 => Self::RtcTick,
            _ => return None,
        })
    }
}

/// A scheduled event, stored in a stable slot so that handles stay valid
/// for the slot's entire lifetime (including across a save state).
#[derive(Debug, Copy, Clone)]
pub struct Event {
    pub kind: EventKind,
    /// Absolute cycle at which the event fires.
    pub at: u64,
    /// Reschedule period for repeating events.
    pub period: u64,
    pub repeat: bool,
    pub active: bool,
    /// Insertion stamp of the live heap entry; stale heap entries carry an
    /// older stamp and are dropped when popped. Not serialized.
    stamp: u64,
}

/// Opaque handle to a scheduled event, usable to cancel it.
/// Cancelling an already-fired event is a no-op.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct EventHandle(pub(crate) u32);

/// Heap entries are ordered by deadline first, insertion stamp second, so
/// that two events sharing a deadline fire in the order they were scheduled.
type HeapEntry = Reverse<(u64, u64, u32)>;

/// An event returned by [`Scheduler::pop_due`], ready to be dispatched.
pub struct DueEvent {
    pub kind: EventKind,
    /// How many cycles past its deadline the event is being dispatched.
    pub late_by: u32,
}

pub struct Scheduler {
    /// The monotonic cycle counter.
    now: u64,
    /// Stable event storage; a handle is an index into this.
    slots: Vec<Event>,
    /// Min-heap of (deadline, stamp, slot).
    heap: BinaryHeap<HeapEntry>,
    /// Monotonic insertion counter used for deadline tie-breaks.
    seq: u64,
}

impl Scheduler {
    /// Current time, in cycles. Never decreases.
    #[inline]
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Advance time by the given amount of cycles. Due events are not fired
    /// here; the console drains them through [`Self::pop_due`].
    #[inline]
    pub fn advance(&mut self, cycles: u32) {
        self.now += cycles as u64;
    }

    /// Schedule a one-shot event `delay` cycles from now. A zero or negative
    /// delay is allowed and fires at the next drain point.
    pub fn schedule(&mut self, kind: EventKind, delay: i64) -> EventHandle {
        self.insert(kind, delay, 0, false)
    }

    /// Schedule an event that reschedules itself every `period` cycles after
    /// first firing `delay` cycles from now.
    pub fn schedule_repeating(&mut self, kind: EventKind, delay: i64, period: u64) -> EventHandle {
        self.insert(kind, delay, period, true)
    }

    fn insert(&mut self, kind: EventKind, delay: i64, period: u64, repeat: bool) -> EventHandle {
        let at = self.now.saturating_add_signed(delay);
        let stamp = self.seq;
        self.seq += 1;

        let slot = self
            .slots
            .iter()
            .position(|e| !e.active)
            .unwrap_or_else(|| {
                self.slots.push(Event {
                    kind,
                    at: 0,
                    period: 0,
                    repeat: false,
                    active: false,
                    stamp: 0,
                });
                self.slots.len() - 1
            });
        self.slots[slot] = Event {
            kind,
            at,
            period,
            repeat,
            active: true,
            stamp,
        };
        self.heap.push(Reverse((at, stamp, slot as u32)));
        EventHandle(slot as u32)
    }

    /// Cancel the event behind the given handle. No-op if it already fired.
    pub fn cancel(&mut self, handle: EventHandle) {
        if let Some(event) = self.slots.get_mut(handle.0 as usize) {
            event.active = false;
        }
    }

    /// The deadline of the earliest pending event, or `u64::MAX` if none is
    /// scheduled. The CPU uses this to bound halt skips.
    pub fn next_event(&mut self) -> u64 {
        while let Some(&Reverse((at, stamp, slot))) = self.heap.peek() {
            let event = &self.slots[slot as usize];
            if event.active && event.stamp == stamp {
                return at;
            }
            self.heap.pop();
        }
        u64::MAX
    }

    /// Pop the earliest event whose deadline has passed, marking it inactive
    /// (or rescheduling it, if repeating). Returns `None` once no event is
    /// due, leaving the remaining heap untouched.
    pub fn pop_due(&mut self) -> Option<DueEvent> {
        loop {
            let &Reverse((at, stamp, slot)) = self.heap.peek()?;
            if at > self.now {
                return None;
            }
            self.heap.pop();

            let event = &mut self.slots[slot as usize];
            if !event.active || event.stamp != stamp {
                // Cancelled or superseded entry.
                continue;
            }

            let kind = event.kind;
            let late_by = (self.now - at) as u32;
            if event.repeat {
                event.at = at + event.period;
                event.stamp = self.seq;
                self.seq += 1;
                let entry = Reverse((event.at, event.stamp, slot));
                self.heap.push(entry);
            } else {
                event.active = false;
            }
            return Some(DueEvent { kind, late_by });
        }
    }

    /// The event slots, in handle order. Inactive slots are part of the
    /// serialized image so that handles survive a save state round-trip.
    pub fn events(&self) -> &[Event] {
        &self.slots
    }

    /// Replace the scheduler state wholesale; used by state loading.
    /// The heap is rebuilt from the active slots in handle order.
    pub fn restore(&mut self, now: u64, slots: Vec<Event>) {
        self.now = now;
        self.heap.clear();
        self.seq = 0;
        self.slots = slots;
        for (slot, event) in self.slots.iter_mut().enumerate() {
            event.stamp = self.seq;
            self.seq += 1;
            if event.active {
                self.heap.push(Reverse((event.at, event.stamp, slot as u32)));
            }
        }
    }

    /// Drop every pending event and reset time; used by console reset.
    pub fn clear(&mut self) {
        self.now = 0;
        self.seq = 0;
        self.slots.clear();
        self.heap.clear();
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            now: 0,
            slots: Vec::with_capacity(16),
            heap: BinaryHeap::with_capacity(16),
            seq: 0,
        }
    }
}

impl Event {
    /// A fresh slot rebuilt from a serialized image.
    pub fn from_parts(kind: EventKind, at: u64, period: u64, repeat: bool, active: bool) -> Self {
        Self {
            kind,
            at,
            period,
            repeat,
            active,
            stamp: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_deadline_order() {
        let mut sched = Scheduler::default();
        sched.schedule(EventKind::HBlank, 20);
        sched.schedule(EventKind::HDraw, 10);
        sched.advance(30);

        assert_eq!(sched.pop_due().unwrap().kind, EventKind::HDraw);
        assert_eq!(sched.pop_due().unwrap().kind, EventKind::HBlank);
        assert!(sched.pop_due().is_none());
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let mut sched = Scheduler::default();
        sched.schedule(EventKind::TimerOverflow(1), 8);
        sched.schedule(EventKind::TimerOverflow(0), 8);
        sched.advance(8);

        assert_eq!(
            sched.pop_due().unwrap().kind,
            EventKind::TimerOverflow(1)
        );
        assert_eq!(
            sched.pop_due().unwrap().kind,
            EventKind::TimerOverflow(0)
        );
    }

    #[test]
    fn cancelled_events_do_not_fire() {
        let mut sched = Scheduler::default();
        let handle = sched.schedule(EventKind::HDraw, 4);
        sched.cancel(handle);
        sched.advance(10);
        assert!(sched.pop_due().is_none());

        // Cancelling twice is a no-op.
        sched.cancel(handle);
    }

    #[test]
    fn repeating_events_reschedule() {
        let mut sched = Scheduler::default();
        sched.schedule_repeating(EventKind::RtcTick, 5, 5);
        sched.advance(16);

        let mut fired = 0;
        while let Some(event) = sched.pop_due() {
            assert_eq!(event.kind, EventKind::RtcTick);
            fired += 1;
        }
        assert_eq!(fired, 3);
        assert_eq!(sched.next_event(), 20);
    }

    #[test]
    fn zero_and_negative_delays_fire_at_drain() {
        let mut sched = Scheduler::default();
        sched.advance(100);
        sched.schedule(EventKind::HDraw, 0);
        sched.schedule(EventKind::HBlank, -20);
        assert!(sched.pop_due().is_some());
        assert!(sched.pop_due().is_some());
    }

    #[test]
    fn late_by_reports_missed_cycles() {
        let mut sched = Scheduler::default();
        sched.schedule(EventKind::HDraw, 10);
        sched.advance(14);
        assert_eq!(sched.pop_due().unwrap().late_by, 4);
    }

    #[test]
    fn restore_keeps_handle_slots() {
        let mut sched = Scheduler::default();
        let _a = sched.schedule(EventKind::HDraw, 10);
        let b = sched.schedule(EventKind::TimerOverflow(2), 20);

        let slots = sched.events().to_vec();
        let now = sched.now();

        let mut restored = Scheduler::default();
        restored.restore(now, slots);
        restored.cancel(b);
        restored.advance(50);

        assert_eq!(restored.pop_due().unwrap().kind, EventKind::HDraw);
        assert!(restored.pop_due().is_none());
    }
}
