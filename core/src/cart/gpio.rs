// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! The cartridge GPIO port and the RTC device that usually hangs off it.
//!
//! The RTC keeps its own calendar instead of sampling host time: it is
//! seeded at reset and advanced by a once-per-second scheduler event, which
//! keeps the whole system deterministic and save-state friendly.

use serde::{Deserialize, Serialize};

use crate::{bits::BitOps, console::Ember};

/// Register offsets relative to the GPIO block.
const REG_DATA: u32 = 0x0; // 0x080000C4
const REG_DIRECTION: u32 = 0x2; // 0x080000C6
const REG_CONTROL: u32 = 0x4; // 0x080000C8

/// Devices the port can host.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum GpioDeviceType {
    None,
    Rtc,
}

#[derive(Debug, Clone)]
pub enum GpioDevice {
    None,
    Rtc(Rtc),
}

impl Default for GpioDevice {
    fn default() -> Self {
        Self::None
    }
}

#[derive(Debug, Clone, Default)]
pub struct Gpio {
    pub device: GpioDevice,
    /// Last value written to the data register, for the out pins.
    pub data: u8,
    /// Per-pin direction bits; 1 = driven by the console.
    pub direction: u8,
    /// Bit 0 makes the register block guest-readable.
    pub control: u8,
}

impl Gpio {
    pub fn new(device_type: GpioDeviceType) -> Self {
        Self {
            device: match device_type {
                GpioDeviceType::None => GpioDevice::None,
                GpioDeviceType::Rtc => GpioDevice::Rtc(Rtc::default()),
            },
            ..Self::default()
        }
    }

    pub fn device_type(&self) -> GpioDeviceType {
        match self.device {
            GpioDevice::None => GpioDeviceType::None,
            GpioDevice::Rtc(_) => GpioDeviceType::Rtc,
        }
    }

    pub fn readable(&self) -> bool {
        self.control.bit(0)
    }

    pub fn read(&mut self, offs: u32) -> u16 {
        match offs & !1 {
            REG_DATA => {
                // In pins are driven by the device, out pins read back the
                // latch.
                let device = match &mut self.device {
                    GpioDevice::Rtc(rtc) => rtc.pin_state(),
                    GpioDevice::None => 0,
                };
                ((device & !self.direction) | (self.data & self.direction)) as u16 & 0xF
            }
            REG_DIRECTION => self.direction as u16,
            REG_CONTROL => self.control as u16,
            _ => 0,
        }
    }

    pub fn write(&mut self, offs: u32, value: u8) {
        match offs & !1 {
            REG_DATA => {
                self.data = value & 0xF;
                let out = self.data & self.direction;
                if let GpioDevice::Rtc(rtc) = &mut self.device {
                    rtc.pins_written(out, self.direction);
                }
            }
            REG_DIRECTION => self.direction = value & 0xF,
            REG_CONTROL => self.control = value & 1,
            _ => (),
        }
    }

    /// Scheduler event: one emulated second has passed.
    pub fn handle_rtc_tick(gg: &mut Ember) {
        if let GpioDevice::Rtc(rtc) = &mut gg.cart.gpio.device {
            rtc.tick_second();
        }
    }
}

/// Serial RTC state machine. Pin 0 is the clock, pin 1 the data line,
/// pin 2 chip select.
#[derive(Debug, Clone)]
pub struct Rtc {
    pub control: u8,
    /// BCD calendar: year, month, day, weekday, hour, minute, second.
    pub datetime: [u8; 7],

    pub selected: bool,
    pub sck: bool,
    /// Bits shifted in, LSB-first per byte.
    pub in_buffer: u64,
    pub in_count: u8,
    /// Expected length of the current transfer in bits.
    pub in_expected: u8,
    pub command: u8,
    /// Bits queued for the guest to shift out.
    pub out_buffer: u64,
    pub out_count: u8,
    /// Data line level presented to the guest.
    pub sio_out: bool,
}

impl Default for Rtc {
    fn default() -> Self {
        Self {
            control: 0x40, // 24h mode
            // Power-on calendar: 2001-01-01, a Monday.
            datetime: [0x01, 0x01, 0x01, 0x01, 0x00, 0x00, 0x00],
            selected: false,
            sck: false,
            in_buffer: 0,
            in_count: 0,
            in_expected: 8,
            command: 0,
            out_buffer: 0,
            out_count: 0,
            sio_out: false,
        }
    }
}

impl Rtc {
    fn pin_state(&self) -> u8 {
        (self.sio_out as u8) << 1
    }

    fn pins_written(&mut self, pins: u8, direction: u8) {
        let cs = pins.bit(2);
        let sck = pins.bit(0);
        let sio = pins.bit(1);

        if !cs {
            self.selected = false;
            self.sck = sck;
            return;
        }
        if !self.selected {
            // Select edge starts a fresh command byte.
            self.selected = true;
            self.in_buffer = 0;
            self.in_count = 0;
            self.in_expected = 8;
            self.out_count = 0;
        }

        let rising = sck && !self.sck;
        self.sck = sck;
        if !rising {
            return;
        }

        if self.out_count > 0 {
            // Read transfer in progress; present the next bit, LSB-first.
            self.sio_out = self.out_buffer & 1 != 0;
            self.out_buffer >>= 1;
            self.out_count -= 1;
            return;
        }

        if direction.bit(1) {
            self.in_buffer |= (sio as u64) << self.in_count;
            self.in_count += 1;
        }
        if self.in_count < self.in_expected {
            return;
        }

        if self.in_expected == 8 {
            self.start_command(self.in_buffer as u8);
        } else {
            self.finish_write();
        }
    }

    fn start_command(&mut self, mut byte: u8) {
        // Commands arrive with 0110 in the low nibble; anything else is the
        // same byte in reversed bit order.
        if byte & 0xF != 0b0110 {
            byte = byte.reverse_bits();
        }
        self.command = byte;
        let reg = byte.field(4, 3);
        let read = byte.bit(7);

        let mut payload = [0u8; 7];
        let len = match reg {
            0 => {
                // Reset.
                *self = Self {
                    datetime: self.datetime,
                    ..Self::default()
                };
                return;
            }
            1 => {
                payload[0] = self.control;
                1
            }
            2 => {
                payload = self.datetime;
                7
            }
            3 => {
                payload[..3].copy_from_slice(&self.datetime[4..7]);
                3
            }
            _ => {
                log::debug!(target: "cart", "unknown RTC command {byte:#04X}");
                0
            }
        };

        if read {
            self.out_buffer = 0;
            for (i, byte) in payload[..len].iter().enumerate() {
                self.out_buffer |= (*byte as u64) << (i * 8);
            }
            self.out_count = (len * 8) as u8;
        } else if len > 0 {
            self.in_buffer = 0;
            self.in_count = 0;
            self.in_expected = (len * 8) as u8;
        }
    }

    fn finish_write(&mut self) {
        let reg = self.command.field(4, 3);
        let data = self.in_buffer;
        match reg {
            1 => self.control = data as u8 & 0x6A,
            2 => {
                for (i, slot) in self.datetime.iter_mut().enumerate() {
                    *slot = (data >> (i * 8)) as u8;
                }
            }
            3 => {
                for (i, slot) in self.datetime[4..7].iter_mut().enumerate() {
                    *slot = (data >> (i * 8)) as u8;
                }
            }
            _ => (),
        }
        self.in_count = 0;
        self.in_buffer = 0;
        self.in_expected = 8;
    }

    /// Advance the BCD calendar by one second.
    pub fn tick_second(&mut self) {
        fn bcd_inc(value: &mut u8, wrap: u8) -> bool {
            let mut v = (*value & 0xF) + ((*value >> 4) * 10) + 1;
            let wrapped = v >= wrap;
            if wrapped {
                v = 0;
            }
            *value = (v % 10) | ((v / 10) << 4);
            wrapped
        }

        let [year, month, day, weekday, hour, minute, second] = &mut self.datetime;
        if !bcd_inc(second, 60) {
            return;
        }
        if !bcd_inc(minute, 60) {
            return;
        }
        if !bcd_inc(hour, 24) {
            return;
        }
        *weekday = (*weekday + 1) % 7;
        // Simplified calendar; month lengths ignore leap years.
        const DAYS: [u8; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
        let month_idx = ((*month & 0xF) + (*month >> 4) * 10).clamp(1, 12) as usize - 1;
        let day_val = (*day & 0xF) + (*day >> 4) * 10;
        if day_val < DAYS[month_idx] {
            *day = (((day_val + 1) / 10) << 4) | ((day_val + 1) % 10);
            return;
        }
        *day = 0x01;
        if !bcd_inc(month, 13) {
            return;
        }
        *month = 0x01;
        bcd_inc(year, 100);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_carry_into_minutes() {
        let mut rtc = Rtc::default();
        rtc.datetime[6] = 0x59;
        rtc.datetime[5] = 0x09;
        rtc.tick_second();
        assert_eq!(rtc.datetime[6], 0x00);
        assert_eq!(rtc.datetime[5], 0x10);
    }

    #[test]
    fn month_rolls_over_at_end_of_year() {
        let mut rtc = Rtc::default();
        rtc.datetime = [0x04, 0x12, 0x31, 0x02, 0x23, 0x59, 0x59];
        rtc.tick_second();
        assert_eq!(&rtc.datetime[..3], &[0x05, 0x01, 0x01]);
    }
}
