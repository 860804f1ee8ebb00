// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Cartridge backup chips: SRAM, flash, serial EEPROM.

use serde::{Deserialize, Serialize};

use crate::bits::BitOps;

use FlashCmdStage::*;

// Both Macronix.
pub const FLASH64_ID: [u8; 2] = [0xC2, 0x1C];
pub const FLASH128_ID: [u8; 2] = [0xC2, 0x09];

/// Backup chip selection, as hinted by the front-end at launch.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum BackupType {
    None,
    Sram,
    Flash64,
    Flash128,
    Eeprom512,
    Eeprom8k,
}

/// The backup chip with its runtime state. The byte buffer itself lives in
/// the shared region so the front-end can persist it.
#[derive(Debug, Clone)]
pub enum SaveType {
    None,
    Sram,
    Eeprom(Eeprom),
    Flash64(FlashState),
    Flash128 { state: FlashState, bank: u8 },
}

impl Default for SaveType {
    fn default() -> Self {
        Self::None
    }
}

impl SaveType {
    pub fn backup_type(&self) -> BackupType {
        match self {
            Self::None => BackupType::None,
            Self::Sram => BackupType::Sram,
            Self::Flash64(_) => BackupType::Flash64,
            Self::Flash128 { .. } => BackupType::Flash128,
            Self::Eeprom(chip) if chip.size_bits == Some(6) => BackupType::Eeprom512,
            Self::Eeprom(_) => BackupType::Eeprom8k,
        }
    }
}

/// Flash command sequencer: `AA@5555, 55@2AAA, CMD@5555`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FlashCmdStage {
    FirstWritten,
    SecondWritten,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FlashMode {
    Regular,
    Write,
    Id,
    Erase,
    BankSelect,
}

#[derive(Debug, Copy, Clone)]
pub struct FlashState {
    pub command_stage: Option<FlashCmdStage>,
    pub mode: FlashMode,
}

impl Default for FlashState {
    fn default() -> Self {
        Self {
            command_stage: None,
            mode: FlashMode::Regular,
        }
    }
}

impl FlashState {
    pub fn in_id_mode(&self) -> bool {
        self.mode == FlashMode::Id
    }

    /// Feed a byte write into the sequencer. Returns true if the chip
    /// contents changed.
    pub fn write(
        &mut self,
        addr: usize,
        value: u8,
        ram: &mut [u8],
        bank: Option<&mut u8>,
    ) -> bool {
        let addr = addr & 0xFFFF;
        match (addr, value, self.command_stage) {
            (0x0, _, _) if self.mode == FlashMode::BankSelect => {
                self.mode = FlashMode::Regular;
                *bank.unwrap() = value & 1;
                false
            }

            (_, _, _) if self.mode == FlashMode::Write => {
                self.mode = FlashMode::Regular;
                if bank.map(|b| *b) == Some(1) {
                    ram[addr | 0x1_0000] = value;
                } else {
                    ram[addr] = value;
                }
                true
            }

            (0x5555, 0xAA, None) => {
                self.command_stage = Some(FirstWritten);
                false
            }
            (0x2AAA, 0x55, Some(FirstWritten)) => {
                self.command_stage = Some(SecondWritten);
                false
            }

            // Erase 4K sector; requires the erase mode to be armed.
            (_, 0x30, Some(SecondWritten)) => {
                let mut erased = false;
                if self.mode == FlashMode::Erase {
                    let base = if bank.map(|b| *b) == Some(1) {
                        (addr & 0xF000) | 0x1_0000
                    } else {
                        addr & 0xF000
                    };
                    ram[base..base + 0x1000].fill(0xFF);
                    erased = true;
                }
                self.mode = FlashMode::Regular;
                self.command_stage = None;
                erased
            }

            (0x5555, _, Some(SecondWritten)) => {
                self.command_stage = None;
                match value {
                    // Arm erase mode
                    0x80 => {
                        self.mode = FlashMode::Erase;
                        false
                    }
                    // Erase entire chip
                    0x10 => {
                        let erase = self.mode == FlashMode::Erase;
                        if erase {
                            ram.fill(0xFF);
                        }
                        self.mode = FlashMode::Regular;
                        erase
                    }

                    // Program byte
                    0xA0 => {
                        self.mode = FlashMode::Write;
                        false
                    }
                    // Bank select, only meaningful on 128K chips
                    0xB0 if bank.is_some() => {
                        self.mode = FlashMode::BankSelect;
                        false
                    }

                    // Enter / exit identification mode
                    0x90 => {
                        self.mode = FlashMode::Id;
                        false
                    }
                    0xF0 => {
                        self.mode = FlashMode::Regular;
                        false
                    }

                    _ => {
                        log::debug!(target: "cart", "unknown flash command {value:#04X}");
                        false
                    }
                }
            }

            _ => false,
        }
    }
}

/// EEPROM commands. The value is the payload length following the address:
/// 64 data bits for writes, none for reads.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EepromCmd {
    Idle,
    Read,
    Write,
}

/// A serial EEPROM, addressed through a window of the cartridge bus and
/// spoken to one bit at a time.
#[derive(Debug, Clone)]
pub struct Eeprom {
    /// Address width in bits; `None` until the first full-length write (or
    /// DMA burst) reveals the chip size.
    pub size_bits: Option<u32>,
    /// Mask/value pair selecting the chip's cartridge-bus window.
    pub window_mask: u32,
    pub window_base: u32,

    pub command: EepromCmd,
    pub recv_buffer: u128,
    pub recv_count: u32,
    pub send_buffer: u128,
    pub send_count: u32,
}

impl Eeprom {
    pub fn new(size_bits: Option<u32>, rom_len: usize) -> Self {
        // ROMs above 16 MiB leave only the top 256 bytes of the last
        // mirror for the chip; smaller ROMs expose the whole upper window.
        let (window_mask, window_base) = if rom_len > 16 * 1024 * 1024 {
            (0x0FFF_FF00, 0x0DFF_FF00)
        } else {
            (0x0F00_0000, 0x0D00_0000)
        };
        Self {
            size_bits,
            window_mask,
            window_base,
            command: EepromCmd::Idle,
            recv_buffer: 0,
            recv_count: 0,
            send_buffer: 0,
            send_count: 0,
        }
    }

    /// Bits in a complete command of the given kind, including the 2 opcode
    /// bits and the trailing terminator bit.
    fn cmd_len(&self, cmd: EepromCmd) -> u32 {
        let data = if cmd == EepromCmd::Write { 64 } else { 0 };
        2 + self.size_bits.unwrap_or(14) + data + 1
    }

    /// Read one bit out of the chip. Reads deliver 4 dummy zero bits, then
    /// the 64 data bits MSB-first; an idle chip reports ready (1).
    pub fn read(&mut self) -> u16 {
        if self.send_count == 0 {
            1
        } else {
            self.send_count -= 1;
            (self.send_buffer >> self.send_count) as u16 & 1
        }
    }

    /// Shift one bit into the chip. Returns true when a write command
    /// completed and changed `ram`.
    pub fn write(&mut self, value: u16, ram: &mut [u8]) -> bool {
        self.recv_buffer = (self.recv_buffer << 1) | (value & 1) as u128;
        self.recv_count += 1;

        if self.recv_count == 2 {
            self.command = match self.recv_buffer & 3 {
                0b11 => EepromCmd::Read,
                0b10 => EepromCmd::Write,
                _ => {
                    self.reset_rx();
                    EepromCmd::Idle
                }
            };
            return false;
        }

        if self.size_bits.is_none() || self.command == EepromCmd::Idle {
            // Width still unknown; bits accumulate until a DMA burst tells
            // us the stream length.
            return false;
        }

        if self.recv_count < self.cmd_len(self.command) {
            return false;
        }

        // Shift out the terminator bit.
        self.recv_buffer >>= 1;
        let size_bits = self.size_bits.unwrap();
        let dirty = match self.command {
            EepromCmd::Read => {
                let addr = (self.recv_buffer as u32).field(0, size_bits) & 0x3FF;
                // Addressing is in 64-bit units.
                let idx = (addr as usize) << 3;
                self.send_buffer = 0;
                for byte in ram.iter().skip(idx).take(8) {
                    self.send_buffer = (self.send_buffer << 8) | *byte as u128;
                }
                // 4 dummy bits precede the data.
                self.send_count = 68;
                false
            }
            EepromCmd::Write => {
                let mut data = self.recv_buffer as u64;
                let addr = ((self.recv_buffer >> 64) as u32).field(0, size_bits) & 0x3FF;
                let idx = (addr as usize) << 3;
                for byte in ram.iter_mut().skip(idx).take(8).rev() {
                    *byte = data as u8;
                    data >>= 8;
                }
                // Signal completion with ready bits.
                self.send_buffer = u128::MAX;
                self.send_count = 64;
                true
            }
            EepromCmd::Idle => false,
        };
        self.reset_rx();
        dirty
    }

    /// DMA 3 is about to burst `count` half-words at the chip. The first
    /// full-length write burst locks the address width: 73 bits for 512 B
    /// chips, 81 bits for 8 KiB ones (read setups, 9 and 17 bits, reveal it
    /// too).
    pub fn dma_started(&mut self, count: u32) {
        if self.size_bits.is_none() {
            self.size_bits = match count {
                9 | 73 => Some(6),
                17 | 81 => Some(14),
                _ => None,
            };
        }
        // A fresh burst always restarts the bit stream.
        self.reset_rx();
    }

    fn reset_rx(&mut self) {
        self.recv_buffer = 0;
        self.recv_count = 0;
        self.command = EepromCmd::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flash_cmd(state: &mut FlashState, ram: &mut [u8], cmd: u8) -> bool {
        state.write(0x5555, 0xAA, ram, None);
        state.write(0x2AAA, 0x55, ram, None);
        state.write(0x5555, cmd, ram, None)
    }

    #[test]
    fn flash_id_mode_round_trip() {
        let mut state = FlashState::default();
        let mut ram = vec![0xFF; 64 * 1024];

        flash_cmd(&mut state, &mut ram, 0x90);
        assert!(state.in_id_mode());
        flash_cmd(&mut state, &mut ram, 0xF0);
        assert!(!state.in_id_mode());
    }

    #[test]
    fn flash_program_byte() {
        let mut state = FlashState::default();
        let mut ram = vec![0xFF; 64 * 1024];

        flash_cmd(&mut state, &mut ram, 0xA0);
        assert!(state.write(0x1234, 0x5A, &mut ram, None));
        assert_eq!(ram[0x1234], 0x5A);
        // Write mode is one-shot.
        assert!(!state.write(0x1235, 0x5A, &mut ram, None));
    }

    #[test]
    fn flash_sector_erase_requires_armed_erase_mode() {
        let mut state = FlashState::default();
        let mut ram = vec![0x00; 64 * 1024];

        // Unarmed: no erase happens.
        state.write(0x5555, 0xAA, &mut ram, None);
        state.write(0x2AAA, 0x55, &mut ram, None);
        assert!(!state.write(0x3000, 0x30, &mut ram, None));
        assert_eq!(ram[0x3000], 0x00);

        flash_cmd(&mut state, &mut ram, 0x80);
        state.write(0x5555, 0xAA, &mut ram, None);
        state.write(0x2AAA, 0x55, &mut ram, None);
        assert!(state.write(0x3000, 0x30, &mut ram, None));
        assert_eq!(ram[0x3000], 0xFF);
        assert_eq!(ram[0x3FFF], 0xFF);
        assert_eq!(ram[0x4000], 0x00);
    }

    #[test]
    fn flash_bank_switch_on_128k() {
        let mut state = FlashState::default();
        let mut bank = 0u8;
        let mut ram = vec![0xFF; 128 * 1024];

        state.write(0x5555, 0xAA, &mut ram, Some(&mut bank));
        state.write(0x2AAA, 0x55, &mut ram, Some(&mut bank));
        state.write(0x5555, 0xB0, &mut ram, Some(&mut bank));
        state.write(0x0, 1, &mut ram, Some(&mut bank));
        assert_eq!(bank, 1);

        state.write(0x5555, 0xAA, &mut ram, Some(&mut bank));
        state.write(0x2AAA, 0x55, &mut ram, Some(&mut bank));
        state.write(0x5555, 0xA0, &mut ram, Some(&mut bank));
        state.write(0x42, 0x77, &mut ram, Some(&mut bank));
        assert_eq!(ram[0x1_0042], 0x77);
    }

    fn shift_bits(chip: &mut Eeprom, ram: &mut [u8], bits: &[u16]) {
        for bit in bits {
            chip.write(*bit, ram);
        }
    }

    fn write_cmd_bits(addr: u16, addr_width: u32, data: u64) -> Vec<u16> {
        let mut bits = vec![1, 0];
        for i in (0..addr_width).rev() {
            bits.push((addr >> i) & 1);
        }
        for i in (0..64).rev() {
            bits.push(((data >> i) & 1) as u16);
        }
        bits.push(0);
        bits
    }

    #[test]
    fn eeprom_width_locks_on_first_write_burst() {
        let mut chip = Eeprom::new(None, 4 * 1024 * 1024);
        let mut ram = vec![0xFF; 8 * 1024];

        // A 73-half-word burst is a 6-bit-address write.
        chip.dma_started(73);
        assert_eq!(chip.size_bits, Some(6));
        shift_bits(&mut chip, &mut ram, &write_cmd_bits(3, 6, 0x0123_4567_89AB_CDEF));
        assert_eq!(&ram[3 * 8..3 * 8 + 8], 0x0123_4567_89AB_CDEFu64.to_be_bytes().as_slice());

        // Wrong-width commands afterwards are ignored.
        chip.dma_started(81);
        assert_eq!(chip.size_bits, Some(6));
    }

    #[test]
    fn eeprom_read_has_four_dummy_bits() {
        let mut chip = Eeprom::new(Some(14), 4 * 1024 * 1024);
        let mut ram = vec![0x00; 8 * 1024];
        ram[8] = 0x80; // Block 1, MSB set

        chip.dma_started(17);
        let mut bits = vec![1, 1];
        for i in (0..14u32).rev() {
            bits.push(((1 >> i) & 1) as u16);
        }
        bits.push(0);
        shift_bits(&mut chip, &mut ram, &bits);

        let mut out = Vec::new();
        for _ in 0..68 {
            out.push(chip.read());
        }
        assert_eq!(&out[..4], &[0, 0, 0, 0]);
        assert_eq!(out[4], 1); // MSB of ram[8]
        assert!(out[5..].iter().all(|b| *b == 0));
        // Exhausted chip reports ready.
        assert_eq!(chip.read(), 1);
    }
}
