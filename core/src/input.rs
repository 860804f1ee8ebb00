// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Input handling. The input register is active-low; KEYCNT can raise the
//! joypad interrupt on a configured AND/OR key condition.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{
    addr::{KEYCNT, KEYINPUT},
    bits::BitOps,
    console::Ember,
    cpu::{Cpu, Interrupt},
};

bitflags! {
    /// The console's buttons, by KEYINPUT bit.
    #[derive(Deserialize, Serialize)]
    pub struct Button: u16 {
        const A = 1 << 0;
        const B = 1 << 1;
        const SELECT = 1 << 2;
        const START = 1 << 3;
        const RIGHT = 1 << 4;
        const LEFT = 1 << 5;
        const UP = 1 << 6;
        const DOWN = 1 << 7;
        const R = 1 << 8;
        const L = 1 << 9;
    }
}

impl Ember {
    pub fn set_button(&mut self, button: Button, pressed: bool) {
        let mut keys = self[KEYINPUT];
        // Pressed reads as 0.
        if pressed {
            keys &= !button.bits();
        } else {
            keys |= button.bits();
        }
        self[KEYINPUT] = keys & 0x3FF;
        self.check_keycnt();
    }

    pub(crate) fn check_keycnt(&mut self) {
        let cnt = self[KEYCNT];
        if !cnt.bit(14) {
            return;
        }

        let cond = cnt.field(0, 10);
        let held = !self[KEYINPUT] & 0x3FF;
        let fire = if cnt.bit(15) {
            // AND mode: all selected keys down.
            cond != 0 && held & cond == cond
        } else {
            held & cond != 0
        };
        if fire {
            Cpu::request_interrupt(self, Interrupt::Joypad);
        }
    }
}
