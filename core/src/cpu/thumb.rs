// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Decoder and executor for the compressed 16-bit instruction set.

use bitmatch::bitmatch;

use super::{alu, Cpu};
use crate::{
    bits::BitOps,
    console::Ember,
    memory::Access::{self, *},
};

impl Ember {
    #[bitmatch]
    pub fn execute_inst_thumb(&mut self, inst: u16) {
        #[bitmatch]
        match inst {
            // Add/subtract, register or 3-bit immediate.
            "0001_1ion_nnss_sddd" => {
                let operand = if i == 1 { n as u32 } else { self.cpu.low(n) };
                let value = if o == 1 {
                    self.cpu.sub(self.cpu.low(s), operand)
                } else {
                    self.cpu.add(self.cpu.low(s), operand)
                };
                self.cpu.low[d as usize] = value;
            }

            // Move shifted register.
            "000o_oiii_iiss_sddd" => {
                let (value, carry) =
                    self.cpu
                        .shift_imm(o as u32, self.cpu.low(s), i as u32);
                self.cpu.set_nzc(value, carry);
                self.cpu.low[d as usize] = value;
            }

            // Immediate operate.
            "001o_oddd_iiii_iiii" => {
                let rd = self.cpu.low(d);
                let imm = i as u32;
                match o {
                    0 => {
                        self.cpu.set_nz(imm);
                        self.cpu.low[d as usize] = imm;
                    }
                    1 => {
                        self.cpu.sub(rd, imm);
                    }
                    2 => self.cpu.low[d as usize] = self.cpu.add(rd, imm),
                    _ => self.cpu.low[d as usize] = self.cpu.sub(rd, imm),
                }
            }

            // Register ALU operations.
            "0100_00oo_ooss_sddd" => self.thumb_alu(o, s, d),

            // High-register operations and BX.
            "0100_0100_hlss_sddd" => {
                // ADD
                let rs = (l << 3) | s;
                let rd = (h << 3) | d;
                let value = self.cpu.reg(rd as u32).wrapping_add(self.cpu.reg(rs as u32));
                self.set_thumb_hi_reg(rd, value);
            }
            "0100_0101_hlss_sddd" => {
                // CMP
                let rs = (l << 3) | s;
                let rd = (h << 3) | d;
                self.cpu.sub(self.cpu.reg(rd as u32), self.cpu.reg(rs as u32));
            }
            "0100_0110_hlss_sddd" => {
                // MOV
                let rs = (l << 3) | s;
                let rd = (h << 3) | d;
                let value = self.cpu.reg(rs as u32);
                self.set_thumb_hi_reg(rd, value);
            }
            "0100_0111_?lss_s???" => {
                let rs = (l << 3) | s;
                let target = self.cpu.reg(rs as u32);
                self.set_pc_bx(target);
            }

            // PC-relative load.
            "0100_1ddd_iiii_iiii" => {
                let addr = (self.cpu.pc & !2).wrapping_add(i as u32 * 4);
                let value = self.read_word_ldrswp(addr, NonSeq);
                self.idle_nonseq();
                self.cpu.low[d as usize] = value;
            }

            // Load/store with register offset.
            "0101_oo0b_bbss_sddd" => {
                let addr = self.cpu.low(s).wrapping_add(self.cpu.low(b));
                match o {
                    0 => {
                        let value = self.cpu.low(d);
                        self.write_word(addr, value, NonSeq);
                        self.cpu.access_type = Access::NonSeq;
                    }
                    1 => {
                        let value = self.cpu.low(d);
                        self.write_byte(addr, value as u8, NonSeq);
                        self.cpu.access_type = Access::NonSeq;
                    }
                    2 => {
                        let value = self.read_word_ldrswp(addr, NonSeq);
                        self.idle_nonseq();
                        self.cpu.low[d as usize] = value;
                    }
                    _ => {
                        let value = self.read_byte(addr, NonSeq) as u32;
                        self.idle_nonseq();
                        self.cpu.low[d as usize] = value;
                    }
                }
            }

            // Load/store sign-extended byte/halfword.
            "0101_oo1b_bbss_sddd" => {
                let addr = self.cpu.low(s).wrapping_add(self.cpu.low(b));
                match o {
                    0 => {
                        let value = self.cpu.low(d);
                        self.write_hword(addr, value as u16, NonSeq);
                        self.cpu.access_type = Access::NonSeq;
                    }
                    1 => {
                        let value = self.read_byte(addr, NonSeq) as i8 as i32 as u32;
                        self.idle_nonseq();
                        self.cpu.low[d as usize] = value;
                    }
                    2 => {
                        let value = self.read_hword(addr, NonSeq);
                        self.idle_nonseq();
                        self.cpu.low[d as usize] = value;
                    }
                    _ => {
                        let value = self.read_hword_ldrsh(addr, NonSeq);
                        self.idle_nonseq();
                        self.cpu.low[d as usize] = value;
                    }
                }
            }

            // Load/store with 5-bit immediate offset, word/byte.
            "011b_liii_iiss_sddd" => {
                if b == 1 {
                    let addr = self.cpu.low(s).wrapping_add(i as u32);
                    if l == 1 {
                        let value = self.read_byte(addr, NonSeq) as u32;
                        self.idle_nonseq();
                        self.cpu.low[d as usize] = value;
                    } else {
                        let value = self.cpu.low(d);
                        self.write_byte(addr, value as u8, NonSeq);
                        self.cpu.access_type = Access::NonSeq;
                    }
                } else {
                    let addr = self.cpu.low(s).wrapping_add(i as u32 * 4);
                    if l == 1 {
                        let value = self.read_word_ldrswp(addr, NonSeq);
                        self.idle_nonseq();
                        self.cpu.low[d as usize] = value;
                    } else {
                        let value = self.cpu.low(d);
                        self.write_word(addr, value, NonSeq);
                        self.cpu.access_type = Access::NonSeq;
                    }
                }
            }

            // Load/store halfword with immediate offset.
            "1000_liii_iiss_sddd" => {
                let addr = self.cpu.low(s).wrapping_add(i as u32 * 2);
                if l == 1 {
                    let value = self.read_hword(addr, NonSeq);
                    self.idle_nonseq();
                    self.cpu.low[d as usize] = value;
                } else {
                    let value = self.cpu.low(d);
                    self.write_hword(addr, value as u16, NonSeq);
                    self.cpu.access_type = Access::NonSeq;
                }
            }

            // SP-relative load/store.
            "1001_lddd_iiii_iiii" => {
                let addr = self.cpu.reg(13).wrapping_add(i as u32 * 4);
                if l == 1 {
                    let value = self.read_word_ldrswp(addr, NonSeq);
                    self.idle_nonseq();
                    self.cpu.low[d as usize] = value;
                } else {
                    let value = self.cpu.low(d);
                    self.write_word(addr, value, NonSeq);
                    self.cpu.access_type = Access::NonSeq;
                }
            }

            // Load address.
            "1010_sddd_iiii_iiii" => {
                let base = if s == 1 {
                    self.cpu.reg(13)
                } else {
                    self.cpu.pc & !2
                };
                self.cpu.low[d as usize] = base.wrapping_add(i as u32 * 4);
            }

            // Adjust stack pointer.
            "1011_0000_siii_iiii" => {
                let sp = self.cpu.reg(13);
                let offs = i as u32 * 4;
                let value = if s == 1 {
                    sp.wrapping_sub(offs)
                } else {
                    sp.wrapping_add(offs)
                };
                self.cpu.set_reg(13, value);
            }

            // Push/pop.
            "1011_l10r_iiii_iiii" => self.push_pop(l == 1, r == 1, i as u8),

            // Multiple load/store (always increment-after, writeback).
            "1100_lbbb_iiii_iiii" => self.thumb_block(l == 1, b, i as u8),

            // Software interrupt; shares its prefix with the conditional
            // branches.
            "1101_1111_????_????" => Cpu::software_interrupt(self),

            // Conditional branch.
            "1101_cccc_iiii_iiii" => {
                if self.cpu.eval_condition(c) {
                    let offs = (i as i8 as i32) * 2;
                    self.set_pc(self.cpu.pc.wrapping_add_signed(offs));
                }
            }

            // Unconditional branch.
            "1110_0iii_iiii_iiii" => {
                let offs = (((i as i32) << 21) >> 21) * 2;
                self.set_pc(self.cpu.pc.wrapping_add_signed(offs));
            }

            // Long branch with link, both halves.
            "1111_0iii_iiii_iiii" => {
                let offs = ((i as i32) << 21) >> 21;
                let lr = self.cpu.pc.wrapping_add_signed(offs << 12);
                self.cpu.set_lr(lr);
            }
            "1111_1iii_iiii_iiii" => {
                let next = (self.cpu.pc - 2) | 1;
                let target = self.cpu.lr[self.cpu.mode().context()]
                    .wrapping_add((i as u32) << 1);
                self.cpu.set_lr(next);
                self.set_pc(target);
            }

            _ => Cpu::undefined_instruction(self),
        }
    }

    /// Register-register ALU operations (format 4).
    fn thumb_alu(&mut self, op: u16, s: u16, d: u16) {
        let rd = self.cpu.low(d);
        let rs = self.cpu.low(s);
        let value = match op {
            0x0 => {
                let v = rd & rs;
                self.cpu.set_nz(v);
                v
            }
            0x1 => {
                let v = rd ^ rs;
                self.cpu.set_nz(v);
                v
            }
            0x2 | 0x3 | 0x4 | 0x7 => {
                // Shifts by register; one internal cycle.
                let kind = match op {
                    0x2 => alu::LSL,
                    0x3 => alu::LSR,
                    0x4 => alu::ASR,
                    _ => alu::ROR,
                };
                let (v, carry) = self.cpu.shift_reg(kind, rd, rs & 0xFF);
                self.idle_nonseq();
                self.cpu.set_nzc(v, carry);
                v
            }
            0x5 => self.cpu.adc(rd, rs),
            0x6 => self.cpu.sbc(rd, rs),
            0x8 => {
                // TST
                self.cpu.set_nz(rd & rs);
                return;
            }
            0x9 => self.cpu.sub(0, rs),
            0xA => {
                // CMP
                self.cpu.sub(rd, rs);
                return;
            }
            0xB => {
                // CMN
                self.cpu.add(rd, rs);
                return;
            }
            0xC => {
                let v = rd | rs;
                self.cpu.set_nz(v);
                v
            }
            0xD => {
                let v = rd.wrapping_mul(rs);
                self.mul_wait_cycles(rs, true);
                self.cpu.set_nz(v);
                v
            }
            0xE => {
                let v = rd & !rs;
                self.cpu.set_nz(v);
                v
            }
            _ => {
                let v = !rs;
                self.cpu.set_nz(v);
                v
            }
        };
        self.cpu.low[d as usize] = value;
    }

    /// Writes from the high-register ops; r15 jumps.
    fn set_thumb_hi_reg(&mut self, idx: u16, value: u32) {
        if idx == 15 {
            self.set_pc(value);
        } else {
            self.cpu.set_reg(idx as u32, value);
        }
    }

    fn push_pop(&mut self, pop: bool, pc_lr: bool, rlist: u8) {
        let count = rlist.count_ones() + pc_lr as u32;
        if count == 0 {
            // Empty list behaves like the 32-bit set's quirk.
            self.on_empty_rlist(13, !pop, pop, !pop);
            return;
        }

        let mut kind = NonSeq;
        if pop {
            let mut addr = self.cpu.reg(13);
            for reg in 0..8u16 {
                if rlist.bit(reg as u32) {
                    let value = self.read_word(addr, kind);
                    self.cpu.low[reg as usize] = value;
                    addr = addr.wrapping_add(4);
                    kind = Seq;
                }
            }
            self.cpu.set_reg(13, addr + (pc_lr as u32) * 4);
            self.idle_nonseq();
            if pc_lr {
                let value = self.read_word(addr, kind);
                self.set_pc(value);
            }
        } else {
            let base = self.cpu.reg(13).wrapping_sub(count * 4);
            let mut addr = base;
            for reg in 0..8u16 {
                if rlist.bit(reg as u32) {
                    let value = self.cpu.low(reg);
                    self.write_word(addr, value, kind);
                    addr = addr.wrapping_add(4);
                    kind = Seq;
                }
            }
            if pc_lr {
                let lr = self.cpu.lr[self.cpu.mode().context()];
                self.write_word(addr, lr, kind);
            }
            self.cpu.set_reg(13, base);
            self.cpu.access_type = Access::NonSeq;
        }
    }

    fn thumb_block(&mut self, load: bool, base_reg: u16, rlist: u8) {
        if rlist == 0 {
            self.on_empty_rlist(base_reg as u32, !load, true, false);
            return;
        }

        let mut addr = self.cpu.low(base_reg);
        let mut kind = NonSeq;
        let mut base_written = false;
        for reg in 0..8u16 {
            if !rlist.bit(reg as u32) {
                continue;
            }
            if load {
                let value = self.read_word(addr, kind);
                self.cpu.low[reg as usize] = value;
                if reg == base_reg {
                    base_written = true;
                }
            } else {
                let value = self.cpu.low(reg);
                self.write_word(addr, value, kind);
            }
            addr = addr.wrapping_add(4);
            kind = Seq;
        }

        if load {
            self.idle_nonseq();
            if !base_written {
                self.cpu.low[base_reg as usize] = addr;
            }
        } else {
            self.cpu.low[base_reg as usize] = addr;
            self.cpu.access_type = Access::NonSeq;
        }
    }
}
