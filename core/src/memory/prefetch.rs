// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! The cartridge prefetch buffer.
//!
//! The buffer is a FIFO of up to `capacity` completed sequential fetches on
//! the cartridge bus, modeled as a small state machine:
//!
//! - *idle*: `enabled` is false, every access pays full price.
//! - *warming*: `size == 0` and a fetch is in flight (`countdown` cycles
//!   left until it lands).
//! - *full*: `size == capacity`; the fetcher pauses until a slot frees up.
//! - *draining*: the CPU consumes slots faster than the fetcher fills them.
//!
//! Transitions happen on every cartridge access (see `Ember::charge`) and on
//! every cycle the CPU spends off the cartridge bus (`step`).

#[derive(Debug, Copy, Clone)]
pub struct Prefetch {
    /// Whether the buffer operates at all; mirrors WAITCNT bit 14 combined
    /// with the front-end setting.
    pub enabled: bool,
    /// The next address the fetcher will fetch from.
    pub head: u32,
    /// The next address the CPU is expected to request.
    pub tail: u32,
    /// Cycles until the in-flight fetch completes.
    pub countdown: u32,
    /// Cycles per sequential fetch on the current page.
    pub reload: u32,
    /// Bytes per fetched item: 2 in 16-bit mode, 4 in 32-bit mode.
    pub insn_len: u32,
    /// Completed items currently queued.
    pub size: u32,
    /// Slot count: 8 half-words in 16-bit mode, 4 words in 32-bit mode.
    pub capacity: u32,
}

impl Prefetch {
    /// Restart the buffer after a miss or non-sequential access: the fetcher
    /// begins fetching the item following `addr`.
    pub fn restart(&mut self, addr: u32, insn_len: u32, reload: u32) {
        self.insn_len = insn_len;
        self.capacity = if insn_len == 2 { 8 } else { 4 };
        self.reload = reload;
        self.countdown = reload;
        self.tail = addr + insn_len;
        self.head = self.tail;
        self.size = 0;
    }

    /// Consume the queued item at `tail`. Caller checked `size > 0`.
    pub fn take_ready(&mut self) {
        self.size -= 1;
        self.tail += self.insn_len;
    }

    /// Consume the in-flight fetch (`size == 0`, `tail` hit). Returns the
    /// remaining cycles the CPU must wait for it. The buffer restarts
    /// cleanly at the next address.
    pub fn take_in_flight(&mut self) -> u32 {
        let remaining = self.countdown;
        self.tail += self.insn_len;
        self.head = self.tail;
        self.countdown = self.reload;
        self.size = 0;
        remaining
    }

    /// Credit `cycles` of free cartridge bus time to the fetcher, completing
    /// as many fetches as fit until the buffer is full.
    pub fn step(&mut self, mut cycles: u32) {
        while cycles >= self.countdown && self.size < self.capacity {
            cycles -= self.countdown;
            self.head += self.insn_len;
            self.countdown = self.reload;
            self.size += 1;
        }

        if self.size < self.capacity {
            self.countdown -= cycles;
        }
    }
}

impl Default for Prefetch {
    fn default() -> Self {
        Self {
            enabled: false,
            head: 0,
            tail: 0,
            countdown: 1,
            reload: 1,
            insn_len: 2,
            size: 0,
            capacity: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_up_to_capacity() {
        let mut pf = Prefetch::default();
        pf.restart(0x0800_0000, 2, 3);

        pf.step(3 * 8 + 10);
        assert_eq!(pf.size, 8);
        assert_eq!(pf.head, 0x0800_0002 + 8 * 2);
    }

    #[test]
    fn partial_steps_accumulate() {
        let mut pf = Prefetch::default();
        pf.restart(0x0800_0000, 2, 3);

        pf.step(2);
        assert_eq!(pf.size, 0);
        assert_eq!(pf.countdown, 1);
        pf.step(1);
        assert_eq!(pf.size, 1);
        assert_eq!(pf.countdown, 3);
    }

    #[test]
    fn in_flight_consumption_restarts_cleanly() {
        let mut pf = Prefetch::default();
        pf.restart(0x0800_0000, 2, 3);
        pf.step(1);

        assert_eq!(pf.take_in_flight(), 2);
        assert_eq!(pf.size, 0);
        assert_eq!(pf.tail, 0x0800_0004);
        assert_eq!(pf.head, pf.tail);
        assert_eq!(pf.countdown, 3);
    }
}
