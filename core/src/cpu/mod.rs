// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! The CPU core.
//!
//! A 32-bit core with two instruction sets: the fixed 32-bit encoding and
//! the compressed 16-bit one. The pipeline is not modeled beyond a two-slot
//! fetch latch (needed for open-bus values) and refill timing on jumps; all
//! memory accesses run through the bus and credit their cycles to the
//! scheduler.

mod alu;
mod arm;
pub mod registers;
mod thumb;

use registers::{
    FiqReg,
    Flag::{FiqDisable, IrqDisable, Thumb},
    Mode, ModeReg,
};

use crate::{
    addr::{IE, IF, IME},
    bits::BitOps,
    console::Ember,
    memory::Access,
    scheduler::EventKind,
};

/// How many cycles an interrupt takes to become visible in IF.
const IRQ_DELAY: i64 = 3;

/// Represents the CPU of the console.
pub struct Cpu {
    pub low: [u32; 8],
    pub fiqs: [FiqReg; 5],
    pub sp: ModeReg,
    pub lr: ModeReg,
    pub pc: u32,
    pub cpsr: u32,
    pub spsr: ModeReg,

    /// The last two fetched opcodes; drives open-bus values.
    pub pipeline: [u32; 2],
    /// Access type of the next instruction fetch.
    pub access_type: Access,
    /// Waiting for an interrupt; the CPU skips to the next event.
    pub halted: bool,
}

impl Default for Cpu {
    fn default() -> Self {
        Self {
            low: [0; 8],
            fiqs: [FiqReg::default(); 5],
            sp: [0x0300_7F00, 0x0, 0x0300_7FE0, 0x0, 0x0300_7FA0, 0x0],
            lr: ModeReg::default(),
            pc: 0,
            cpsr: 0xD3,
            spsr: ModeReg::default(),
            pipeline: [0; 2],
            access_type: Access::NonSeq,
            halted: false,
        }
    }
}

impl Cpu {
    /// Execute the next instruction, charging all consumed cycles.
    pub fn exec_next_inst(gg: &mut Ember) {
        gg.cpu.inc_pc();

        let fetch_kind = gg.cpu.access_type;
        gg.cpu.access_type = Access::Seq;
        if gg.cpu.flag(Thumb) {
            let inst = gg.read_hword(gg.cpu.pc - 4, fetch_kind) as u16;
            gg.cpu.pipeline[0] = gg.cpu.pipeline[1];
            gg.cpu.pipeline[1] = inst as u32;
            gg.execute_inst_thumb(inst);
        } else {
            let inst = gg.read_word(gg.cpu.pc - 8, fetch_kind);
            gg.cpu.pipeline[0] = gg.cpu.pipeline[1];
            gg.cpu.pipeline[1] = inst;
            gg.execute_inst_arm(inst);
        }
    }

    /// Check if an interrupt needs to be handled and jump to the handler if
    /// so. Called on any event that might cause an interrupt to be raised.
    pub fn check_if_interrupt(gg: &mut Ember) {
        let pending = gg[IE] & gg[IF] != 0;
        // Halt ends on any enabled pending interrupt, even with IME off.
        gg.cpu.halted &= !pending;

        if pending && gg[IME] == 1 && !gg.cpu.flag(IrqDisable) {
            Self::exception_occurred(gg, Exception::Irq);
        }
    }

    /// Request an interrupt. It becomes visible in IF a few cycles later,
    /// through the scheduler.
    #[inline]
    pub fn request_interrupt(gg: &mut Ember, int: Interrupt) {
        Self::request_interrupt_idx(gg, int as u16);
    }

    /// Request an interrupt by index.
    #[inline]
    pub fn request_interrupt_idx(gg: &mut Ember, idx: u16) {
        gg.scheduler
            .schedule(EventKind::RaiseIrq(idx as u8), IRQ_DELAY);
    }

    /// Scheduler event: the raised interrupt reaches the flag register.
    pub fn handle_raised_irq(gg: &mut Ember, idx: u8) {
        gg[IF] = gg[IF].with_bit(idx as u32, true);
        Self::check_if_interrupt(gg);
    }

    /// Enter halt; the console skips to scheduled events until an enabled
    /// interrupt is pending.
    pub fn halt(gg: &mut Ember) {
        gg.cpu.halted = true;
    }

    /// An exception occurred, jump to the vector and switch modes.
    fn exception_occurred(gg: &mut Ember, kind: Exception) {
        let cpsr = gg.cpu.cpsr;
        let inst_size = gg.cpu.inst_size();
        // PC sits two fetches ahead; the hardware link values are relative
        // to the next instruction.
        let next_inst = gg.cpu.pc - inst_size;
        let lr = match kind {
            // The handler returns through `subs pc, lr, 4`.
            Exception::Irq => next_inst + 4,
            _ => next_inst,
        };

        gg.cpu.set_mode(kind.mode());
        gg.cpu.set_flag(Thumb, false);
        gg.cpu.set_flag(IrqDisable, true);
        if let Exception::Reset | Exception::Fiq = kind {
            gg.cpu.set_flag(FiqDisable, true);
        }

        gg.cpu.set_lr(lr);
        gg.cpu.set_spsr(cpsr);
        gg.set_pc(kind.vector());
    }

    /// A software interrupt instruction was executed.
    pub fn software_interrupt(gg: &mut Ember) {
        Self::exception_occurred(gg, Exception::Swi);
    }

    /// An instruction with no valid decoding was executed.
    pub fn undefined_instruction(gg: &mut Ember) {
        log::debug!(target: "core", "undefined instruction at {:#010X}", gg.cpu.pc);
        Self::exception_occurred(gg, Exception::Undefined);
    }

    #[inline]
    pub fn inc_pc(&mut self) {
        self.pc = self.pc.wrapping_add(self.inst_size());
    }

    #[inline]
    pub fn inst_size(&self) -> u32 {
        // 4 in 32-bit mode, 2 in 16-bit mode.
        4 - ((self.flag(Thumb) as u32) << 1)
    }
}

impl Ember {
    /// Set the PC and refill the pipeline, charging the refill fetches.
    pub(crate) fn set_pc(&mut self, value: u32) {
        let inst_size = self.cpu.inst_size();
        self.cpu.pc = value & !(inst_size - 1);
        if self.cpu.flag(Thumb) {
            self.cpu.pipeline[0] = self.read_hword(self.cpu.pc, Access::NonSeq);
            self.cpu.pipeline[1] = self.read_hword(self.cpu.pc + 2, Access::Seq);
        } else {
            self.cpu.pipeline[0] = self.read_word(self.cpu.pc, Access::NonSeq);
            self.cpu.pipeline[1] = self.read_word(self.cpu.pc + 4, Access::Seq);
        }
        self.cpu.access_type = Access::Seq;
        self.cpu.inc_pc();
    }

    /// Switch instruction sets if the jump target requests it, then jump.
    pub(crate) fn set_pc_bx(&mut self, value: u32) {
        self.cpu.set_flag(Thumb, value.bit(0));
        self.set_pc(value & !1);
    }
}

/// Possible interrupts, by IE/IF bit order.
#[repr(C)]
pub enum Interrupt {
    VBlank,
    HBlank,
    VCounter,
    Timer0,
    Timer1,
    Timer2,
    Timer3,
    Serial,
    Dma0,
    Dma1,
    Dma2,
    Dma3,
    Joypad,
    GamePak,
}

/// Possible exceptions. Only SWI, UND and IRQ ever occur on this console.
#[derive(Copy, Clone)]
pub enum Exception {
    Reset,
    Undefined,
    Swi,
    PrefetchAbort,
    DataAbort,
    AddressExceeded,
    Irq,
    Fiq,
}

impl Exception {
    /// Vector to set the PC to when this exception occurs.
    fn vector(self) -> u32 {
        self as u32 * 4
    }

    /// Mode to execute the exception in.
    fn mode(self) -> Mode {
        const MODE: [Mode; 8] = [
            Mode::Supervisor,
            Mode::Undefined,
            Mode::Supervisor,
            Mode::Abort,
            Mode::Abort,
            Mode::Supervisor,
            Mode::Irq,
            Mode::Fiq,
        ];
        MODE[self as usize]
    }
}

