// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Decoder and executor for the 32-bit instruction set.

use bitmatch::bitmatch;

use super::{registers::Flag::*, Cpu};
use crate::{
    bits::BitOps,
    console::Ember,
    memory::Access::{self, *},
};

impl Ember {
    #[bitmatch]
    pub fn execute_inst_arm(&mut self, inst: u32) {
        if !self.cpu.eval_condition((inst >> 28) as u16) {
            return;
        }

        #[bitmatch]
        match inst {
            "????_0001_0010_1111_1111_1111_0001_mmmm" => {
                let target = self.cpu.reg(m);
                self.set_pc_bx(target);
            }

            "????_101l_oooo_oooo_oooo_oooo_oooo_oooo" => {
                if l == 1 {
                    let lr = self.cpu.pc - 4;
                    self.cpu.set_lr(lr);
                }
                // Sign-extend the 24-bit offset and scale it to words.
                let offset = ((o << 8) as i32) >> 6;
                self.set_pc(self.cpu.pc.wrapping_add_signed(offset));
            }

            // Multiply / multiply-accumulate.
            "????_0000_00as_dddd_nnnn_ffff_1001_mmmm" => {
                let mut result = self.cpu.reg(m).wrapping_mul(self.cpu.reg(f));
                self.mul_wait_cycles(self.cpu.reg(f), true);
                if a == 1 {
                    result = result.wrapping_add(self.cpu.reg(n));
                    self.add_i_cycles(1);
                }
                if s == 1 {
                    self.cpu.set_nz(result);
                }
                self.cpu.set_reg(d, result);
            }

            // Long multiply; `u` set means signed.
            "????_0000_1uas_hhhh_llll_ffff_1001_mmmm" => {
                let mut result = if u == 1 {
                    (self.cpu.reg(m) as i32 as i64).wrapping_mul(self.cpu.reg(f) as i32 as i64)
                        as u64
                } else {
                    (self.cpu.reg(m) as u64).wrapping_mul(self.cpu.reg(f) as u64)
                };
                self.mul_wait_cycles(self.cpu.reg(f), u == 1);
                self.add_i_cycles(1);
                if a == 1 {
                    let acc = ((self.cpu.reg(h) as u64) << 32) | self.cpu.reg(l) as u64;
                    result = result.wrapping_add(acc);
                    self.add_i_cycles(1);
                }
                if s == 1 {
                    self.cpu.set_flag(Zero, result == 0);
                    self.cpu.set_flag(Neg, result.bit(63));
                }
                self.cpu.set_reg(h, (result >> 32) as u32);
                self.cpu.set_reg(l, result as u32);
            }

            // SWP / SWPB.
            "????_0001_0b00_nnnn_dddd_0000_1001_mmmm" => {
                let addr = self.cpu.reg(n);
                let value = self.cpu.reg(m);
                if b == 1 {
                    let old = self.read_byte(addr, NonSeq);
                    self.write_byte(addr, value as u8, NonSeq);
                    self.cpu.set_reg(d, old as u32);
                } else {
                    let old = self.read_word_ldrswp(addr, NonSeq);
                    self.write_word(addr, value, NonSeq);
                    self.cpu.set_reg(d, old);
                }
                self.idle_nonseq();
            }

            // MRS.
            "????_0001_0s00_1111_dddd_0000_0000_0000" => {
                let psr = if s == 1 { self.cpu.spsr() } else { self.cpu.cpsr };
                self.cpu.set_reg(d, psr);
            }

            // MSR, register and immediate forms.
            "????_0001_0s10_ffff_1111_0000_0000_mmmm" => {
                self.msr(self.cpu.reg(m), f, s == 1);
            }
            "????_0011_0s10_ffff_1111_rrrr_iiii_iiii" => {
                let value = i.rotate_right(r * 2);
                self.msr(value, f, s == 1);
            }

            // Halfword and signed transfers, register and immediate offset.
            "????_000p_u0wl_nnnn_dddd_0000_1sh1_mmmm" => {
                let offset = self.cpu.reg(m);
                self.halfword_transfer(p, u, w, l, n, d, offset, s, h);
            }
            "????_000p_u1wl_nnnn_dddd_iiii_1sh1_jjjj" => {
                let offset = (i << 4) | j;
                self.halfword_transfer(p, u, w, l, n, d, offset, s, h);
            }

            // Data processing.
            "????_001o_ooos_nnnn_dddd_rrrr_iiii_iiii" => {
                let op2 = i.rotate_right(r * 2);
                let carry = if r != 0 {
                    op2.bit(31)
                } else {
                    self.cpu.flag(Carry)
                };
                let rn = self.cpu.reg(n);
                self.alu_dp(o, rn, d, op2, carry, s == 1);
            }
            "????_000o_ooos_nnnn_dddd_ffff_0tt1_mmmm" => {
                // Register-specified shift amount; r15 reads 4 ahead here.
                let amount = self.cpu.reg(f) & 0xFF;
                let rm = self.reg_pc4(m);
                let rn = self.reg_pc4(n);
                let (op2, carry) = self.cpu.shift_reg(t, rm, amount);
                self.idle_nonseq();
                self.alu_dp(o, rn, d, op2, carry, s == 1);
            }
            "????_000o_ooos_nnnn_dddd_iiii_itt0_mmmm" => {
                let (op2, carry) = self.cpu.shift_imm(t, self.cpu.reg(m), i);
                let rn = self.cpu.reg(n);
                self.alu_dp(o, rn, d, op2, carry, s == 1);
            }

            // Single data transfer.
            "????_010p_ubwl_nnnn_dddd_iiii_iiii_iiii" => {
                self.single_transfer(p, u, b, w, l, n, d, i);
            }
            "????_011p_ubwl_nnnn_dddd_iiii_itt0_mmmm" => {
                let (offset, _) = self.cpu.shift_imm(t, self.cpu.reg(m), i);
                self.single_transfer(p, u, b, w, l, n, d, offset);
            }

            // Block data transfer.
            "????_100p_uswl_nnnn_rrrr_rrrr_rrrr_rrrr" => {
                self.block_transfer(p == 1, u == 1, s == 1, w == 1, l == 1, n, r as u16);
            }

            "????_1111_????_????_????_????_????_????" => Cpu::software_interrupt(self),

            _ => Cpu::undefined_instruction(self),
        }
    }

    /// Register read with the +4 visible on r15 in register-shift forms.
    fn reg_pc4(&self, idx: u32) -> u32 {
        let value = self.cpu.reg(idx);
        if idx == 15 {
            value + 4
        } else {
            value
        }
    }

    fn msr(&mut self, value: u32, fields: u32, spsr: bool) {
        // Field mask bits: c, x, s, f from LSB.
        let mut mask = 0u32;
        for (bit, part) in [(0u32, 0xFFu32), (1, 0xFF00), (2, 0xFF_0000), (3, 0xFF00_0000)] {
            if fields.bit(bit) {
                mask |= part;
            }
        }
        if spsr {
            let old = self.cpu.spsr();
            self.cpu.set_spsr((old & !mask) | (value & mask));
            return;
        }

        // The control field is privileged; the T bit cannot be written.
        let mut mask = mask & !(1 << 5);
        if self.cpu.mode() == super::registers::Mode::User {
            mask &= 0xFF00_0000;
        }
        self.cpu.cpsr = (self.cpu.cpsr & !mask) | (value & mask);
        Cpu::check_if_interrupt(self);
    }

    fn alu_dp(&mut self, op: u32, rn: u32, rd: u32, op2: u32, shift_carry: bool, s: bool) {
        let cpu = &mut self.cpu;
        let result = match op {
            0x0 | 0x8 => {
                // AND / TST
                let value = rn & op2;
                if s {
                    cpu.set_nzc(value, shift_carry);
                }
                value
            }
            0x1 | 0x9 => {
                // EOR / TEQ
                let value = rn ^ op2;
                if s {
                    cpu.set_nzc(value, shift_carry);
                }
                value
            }
            0x2 | 0xA => {
                // SUB / CMP
                if s {
                    cpu.sub(rn, op2)
                } else {
                    rn.wrapping_sub(op2)
                }
            }
            0x3 => {
                // RSB
                if s {
                    cpu.sub(op2, rn)
                } else {
                    op2.wrapping_sub(rn)
                }
            }
            0x4 | 0xB => {
                // ADD / CMN
                if s {
                    cpu.add(rn, op2)
                } else {
                    rn.wrapping_add(op2)
                }
            }
            0x5 => {
                if s {
                    cpu.adc(rn, op2)
                } else {
                    rn.wrapping_add(op2).wrapping_add(cpu.flag(Carry) as u32)
                }
            }
            0x6 => {
                if s {
                    cpu.sbc(rn, op2)
                } else {
                    rn.wrapping_sub(op2)
                        .wrapping_sub(!cpu.flag(Carry) as u32)
                }
            }
            0x7 => {
                // RSC
                if s {
                    cpu.sbc(op2, rn)
                } else {
                    op2.wrapping_sub(rn)
                        .wrapping_sub(!cpu.flag(Carry) as u32)
                }
            }
            0xC => {
                let value = rn | op2;
                if s {
                    cpu.set_nzc(value, shift_carry);
                }
                value
            }
            0xD => {
                if s {
                    cpu.set_nzc(op2, shift_carry);
                }
                op2
            }
            0xE => {
                let value = rn & !op2;
                if s {
                    cpu.set_nzc(value, shift_carry);
                }
                value
            }
            _ => {
                let value = !op2;
                if s {
                    cpu.set_nzc(value, shift_carry);
                }
                value
            }
        };

        let is_test = (0x8..=0xB).contains(&op);
        if is_test {
            return;
        }
        if rd == 15 {
            if s {
                // Exception return: restore the banked PSR first.
                self.cpu.restore_cpsr();
            }
            self.set_pc(result);
        } else {
            self.cpu.set_reg(rd, result);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn single_transfer(&mut self, p: u32, u: u32, b: u32, w: u32, l: u32, n: u32, d: u32, offset: u32) {
        let base = self.cpu.reg(n);
        let offset_addr = if u == 1 {
            base.wrapping_add(offset)
        } else {
            base.wrapping_sub(offset)
        };
        let addr = if p == 1 { offset_addr } else { base };

        if l == 1 {
            let value = if b == 1 {
                self.read_byte(addr, NonSeq) as u32
            } else {
                self.read_word_ldrswp(addr, NonSeq)
            };
            self.idle_nonseq();
            self.writeback(p, w, n, d, offset_addr, true);
            if d == 15 {
                self.set_pc(value);
            } else {
                self.cpu.set_reg(d, value);
            }
        } else {
            // Stores see r15 one fetch further ahead.
            let value = self.reg_pc4(d);
            if b == 1 {
                self.write_byte(addr, value as u8, NonSeq);
            } else {
                self.write_word(addr, value, NonSeq);
            }
            self.cpu.access_type = Access::NonSeq;
            self.writeback(p, w, n, d, offset_addr, false);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn halfword_transfer(
        &mut self,
        p: u32,
        u: u32,
        w: u32,
        l: u32,
        n: u32,
        d: u32,
        offset: u32,
        s: u32,
        h: u32,
    ) {
        let base = self.cpu.reg(n);
        let offset_addr = if u == 1 {
            base.wrapping_add(offset)
        } else {
            base.wrapping_sub(offset)
        };
        let addr = if p == 1 { offset_addr } else { base };

        match (l, s, h) {
            // STRH
            (0, 0, 1) => {
                let value = self.reg_pc4(d);
                self.write_hword(addr, value as u16, NonSeq);
                self.cpu.access_type = Access::NonSeq;
                self.writeback(p, w, n, d, offset_addr, false);
            }
            // LDRH
            (1, 0, 1) => {
                let value = self.read_hword(addr, NonSeq);
                self.finish_load(p, w, n, d, offset_addr, value);
            }
            // LDRSB
            (1, 1, 0) => {
                let value = self.read_byte(addr, NonSeq) as i8 as i32 as u32;
                self.finish_load(p, w, n, d, offset_addr, value);
            }
            // LDRSH
            (1, 1, 1) => {
                let value = self.read_hword_ldrsh(addr, NonSeq);
                self.finish_load(p, w, n, d, offset_addr, value);
            }
            _ => Cpu::undefined_instruction(self),
        }
    }

    fn finish_load(&mut self, p: u32, w: u32, n: u32, d: u32, offset_addr: u32, value: u32) {
        self.idle_nonseq();
        self.writeback(p, w, n, d, offset_addr, true);
        if d == 15 {
            self.set_pc(value);
        } else {
            self.cpu.set_reg(d, value);
        }
    }

    /// Base writeback: post-indexed always, pre-indexed on request. A load
    /// into the base register wins over the writeback.
    fn writeback(&mut self, p: u32, w: u32, n: u32, d: u32, offset_addr: u32, load: bool) {
        let wb = p == 0 || w == 1;
        if wb && !(load && n == d) && n != 15 {
            self.cpu.set_reg(n, offset_addr);
        }
    }

    fn block_transfer(&mut self, p: bool, u: bool, s: bool, w: bool, l: bool, n: u32, rlist: u16) {
        if rlist == 0 {
            // Empty list: r15 transfers, base moves by 0x40.
            self.on_empty_rlist(n, !l, u, p);
            if l {
                return;
            }
            self.cpu.access_type = Access::NonSeq;
            return;
        }

        let base = self.cpu.reg(n);
        let count = rlist.count_ones();
        let total = count * 4;
        let low_addr = if u { base } else { base.wrapping_sub(total) };
        let bump = if p == u { 4 } else { 0 };
        let new_base = if u {
            base.wrapping_add(total)
        } else {
            base.wrapping_sub(total)
        };

        // User-bank transfer unless this is an exception return.
        let user_bank = s && !(l && rlist.bit(15));
        let first_reg = rlist.trailing_zeros();

        let mut kind = NonSeq;
        let mut addr = low_addr.wrapping_add(bump);
        let mut base_written = false;
        for reg in 0..16u32 {
            if !rlist.bit(reg) {
                continue;
            }

            if l {
                // Writeback happens before the loads; a loaded base wins.
                if w && !base_written {
                    self.cpu.set_reg(n, new_base);
                    base_written = true;
                }
                let value = self.read_word(addr, kind);
                if reg == 15 {
                    if s {
                        self.cpu.restore_cpsr();
                    }
                    self.set_pc(value);
                } else if user_bank {
                    self.cpu.set_user_reg(reg, value);
                } else {
                    self.cpu.set_reg(reg, value);
                }
            } else {
                let value = if reg == 15 {
                    self.cpu.pc + 4
                } else if reg == n && reg != first_reg {
                    // A stored base after the first slot sees the new value.
                    new_base
                } else if user_bank {
                    self.cpu.user_reg(reg)
                } else {
                    self.cpu.reg(reg)
                };
                self.write_word(addr, value, kind);
            }

            addr = addr.wrapping_add(4);
            kind = Seq;
        }

        if l {
            self.idle_nonseq();
            if w && !base_written && !rlist.bit(n) {
                self.cpu.set_reg(n, new_base);
            }
        } else {
            self.cpu.access_type = Access::NonSeq;
            if w {
                self.cpu.set_reg(n, new_base);
            }
        }
    }

    /// Called by the block transfers when the register list was empty,
    /// which transfers R15 and moves the base by 0x40.
    pub(super) fn on_empty_rlist(&mut self, rb: u32, str: bool, up: bool, before: bool) {
        let addr = self.cpu.reg(rb);
        let new = Self::mod_with_offs(addr, 0x40, up);
        self.cpu.set_reg(rb, new);

        if str {
            let addr = match (up, before) {
                (true, true) => addr + 4,
                (true, false) => addr,
                (false, true) => addr - 0x40,
                (false, false) => addr - 0x3C,
            };
            self.write_word(addr, self.cpu.pc + self.cpu.inst_size(), NonSeq);
        } else {
            let val = self.read_word(addr, NonSeq);
            self.set_pc(val);
        }
    }

    /// Modify a value with an offset, either adding or subtracting.
    pub(super) fn mod_with_offs(value: u32, offs: u32, up: bool) -> u32 {
        if up {
            value.wrapping_add(offs)
        } else {
            value.wrapping_sub(offs)
        }
    }

    pub(super) fn idle_nonseq(&mut self) {
        self.add_i_cycles(1);
        self.cpu.access_type = Access::NonSeq;
    }

    /// Booth multiplier timing: early-out per significant byte of the
    /// operand.
    pub(super) fn mul_wait_cycles(&mut self, mut value: u32, signed: bool) {
        self.idle_nonseq();
        let mut mask = 0xFFFF_FF00;
        loop {
            value &= mask;
            if value == 0 || (signed && value == mask) {
                break;
            }
            self.add_i_cycles(1);
            mask <<= 8;
        }
    }
}
