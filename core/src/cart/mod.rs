// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! The cartridge: ROM view, backup storage and the GPIO port.

pub mod backup;
pub mod gpio;

use std::sync::{atomic::Ordering, Arc};

use backup::{BackupType, Eeprom, FlashState, SaveType};
use gpio::{Gpio, GpioDeviceType};

use crate::{
    memory::KB,
    message::BackupBuffer,
};

/// GPIO registers sit inside the first ROM mirror.
const GPIO_REG_START: u32 = 0x0800_00C4;
const GPIO_REG_END: u32 = 0x0800_00C9;

#[derive(Default)]
pub struct Cartridge {
    pub rom: Vec<u8>,
    pub save_type: SaveType,
    pub gpio: Gpio,
    /// Backup bytes, shared with the front-end for persistence.
    pub backup: Arc<BackupBuffer>,
}

impl Cartridge {
    /// Bind a ROM and configure backup storage and the GPIO device from the
    /// launch hints. The backup buffer is sized for the chip and filled with
    /// the erased pattern where the persisted image is short.
    pub fn load(
        &mut self,
        rom: Vec<u8>,
        backup_type: BackupType,
        gpio_device: GpioDeviceType,
        backup: Arc<BackupBuffer>,
    ) {
        self.rom = rom;
        self.gpio = Gpio::new(gpio_device);
        self.backup = backup;

        let rom_len = self.rom.len();
        self.save_type = match backup_type {
            BackupType::None => SaveType::None,
            BackupType::Sram => SaveType::Sram,
            BackupType::Flash64 => SaveType::Flash64(FlashState::default()),
            BackupType::Flash128 => SaveType::Flash128 {
                state: FlashState::default(),
                bank: 0,
            },
            BackupType::Eeprom512 => SaveType::Eeprom(Eeprom::new(Some(6), rom_len)),
            BackupType::Eeprom8k => SaveType::Eeprom(Eeprom::new(Some(14), rom_len)),
        };

        let size = match &self.save_type {
            SaveType::None => 0,
            SaveType::Eeprom(_) => 8 * KB,
            SaveType::Sram => 32 * KB,
            SaveType::Flash64(_) => 64 * KB,
            SaveType::Flash128 { .. } => 128 * KB,
        };
        let mut data = self.backup.data.lock().unwrap();
        if data.len() < size {
            data.resize(size, 0xFF);
        }
    }

    /// Pick the backup chip by scanning the ROM for the library ID strings
    /// carts embed. Used by front-ends that have no game database.
    pub fn detect_backup(rom: &[u8]) -> BackupType {
        const PATTERNS: [(&[u8], BackupType); 5] = [
            (b"FLASH1M_V", BackupType::Flash128),
            (b"FLASH512_V", BackupType::Flash64),
            (b"FLASH_V", BackupType::Flash64),
            (b"SRAM_V", BackupType::Sram),
            (b"EEPROM_V", BackupType::Eeprom8k),
        ];
        for (pattern, ty) in PATTERNS {
            if rom.windows(pattern.len()).any(|w| w == pattern) {
                return ty;
            }
        }
        BackupType::None
    }

    /// The game title embedded in the header.
    pub fn title(&self) -> String {
        self.read_string(0x0A0, 12)
    }

    /// The 4-character game code embedded in the header.
    pub fn game_code(&self) -> String {
        self.read_string(0x0AC, 4)
    }

    /// The game code as a little-endian word; the save-state ROM
    /// fingerprint.
    pub fn rom_code(&self) -> u32 {
        if self.rom.len() >= 0xC0 {
            u32::from_le_bytes(self.rom[0xAC..0xB0].try_into().unwrap())
        } else {
            0
        }
    }

    fn read_string(&self, base: usize, max: usize) -> String {
        self.rom
            .iter()
            .skip(base)
            .take(max)
            .take_while(|b| **b != 0)
            .map(|b| *b as char)
            .collect()
    }

    /// Is this address inside the EEPROM's window of the cartridge bus?
    pub fn is_eeprom_at(&self, addr: u32) -> bool {
        match &self.save_type {
            SaveType::Eeprom(chip) => (addr & chip.window_mask) == chip.window_base,
            _ => false,
        }
    }

    pub fn eeprom_read(&mut self) -> u16 {
        match &mut self.save_type {
            SaveType::Eeprom(chip) => chip.read(),
            _ => 0,
        }
    }

    pub fn eeprom_write(&mut self, value: u16) {
        if let SaveType::Eeprom(chip) = &mut self.save_type {
            let mut data = self.backup.data.lock().unwrap();
            if chip.write(value, &mut data) {
                self.backup.dirty.store(true, Ordering::Release);
            }
        }
    }

    /// Called when DMA 3 begins a transfer into the EEPROM window; the
    /// burst length reveals the chip's address width on first use.
    pub fn eeprom_dma_started(&mut self, count: u32) {
        if let SaveType::Eeprom(chip) = &mut self.save_type {
            chip.dma_started(count);
        }
    }

    /// A byte read in the SRAM/flash window.
    pub fn backup_read(&self, offs: usize) -> u8 {
        let data = self.backup.data.lock().unwrap();
        match &self.save_type {
            SaveType::Flash64(state) if state.in_id_mode() => backup::FLASH64_ID[offs & 1],
            SaveType::Flash128 { state, .. } if state.in_id_mode() => {
                backup::FLASH128_ID[offs & 1]
            }

            SaveType::Flash128 { bank: 1, .. } => data[(offs & 0xFFFF) | 0x1_0000],
            SaveType::Flash64(_) | SaveType::Flash128 { .. } => data[offs & 0xFFFF],
            SaveType::Sram => data[offs & 0x7FFF],

            _ => 0xFF,
        }
    }

    /// A byte write in the SRAM/flash window.
    pub fn backup_write(&mut self, offs: usize, value: u8) {
        let mut data = self.backup.data.lock().unwrap();
        let written = match &mut self.save_type {
            SaveType::Flash64(state) => state.write(offs, value, &mut data, None),
            SaveType::Flash128 { state, bank } => state.write(offs, value, &mut data, Some(bank)),
            SaveType::Sram => {
                data[offs & 0x7FFF] = value;
                true
            }
            _ => false,
        };
        if written {
            self.backup.dirty.store(true, Ordering::Release);
        }
    }

    pub fn gpio_at(&self, addr: u32) -> bool {
        (GPIO_REG_START..=GPIO_REG_END).contains(&addr)
    }

    pub fn gpio_readable_at(&self, addr: u32) -> bool {
        self.gpio_at(addr) && self.gpio.readable()
    }

    pub fn gpio_read(&mut self, addr: u32) -> u16 {
        self.gpio.read(addr - GPIO_REG_START)
    }

    pub fn gpio_write(&mut self, addr: u32, value: u16) {
        if self.gpio_at(addr) {
            self.gpio.write(addr - GPIO_REG_START, value as u8);
        }
    }
}
