// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Addresses of the I/O registers, given as offsets into the register file.

pub const DISPCNT: u32 = 0x00;
pub const GREENSWAP: u32 = 0x02;
pub const DISPSTAT: u32 = 0x04;
pub const VCOUNT: u32 = 0x06;
pub const BG0CNT: u32 = 0x08;
pub const BG2CNT: u32 = 0x0C;
pub const BG0HOFS: u32 = 0x10;
pub const BG0VOFS: u32 = 0x12;

pub const BG2PA: u32 = 0x20;
pub const BG2PB: u32 = 0x22;
pub const BG2PC: u32 = 0x24;
pub const BG2X_L: u32 = 0x28;
pub const BG2X_H: u32 = 0x2A;
pub const BG2Y_L: u32 = 0x2C;
pub const BG2Y_H: u32 = 0x2E;
pub const BG3PA: u32 = 0x30;
pub const BG3X_L: u32 = 0x38;
pub const BG3Y_H: u32 = 0x3E;

pub const WIN0H: u32 = 0x40;
pub const WIN1H: u32 = 0x42;
pub const WIN0V: u32 = 0x44;
pub const WIN1V: u32 = 0x46;
pub const WININ: u32 = 0x48;
pub const WINOUT: u32 = 0x4A;
pub const MOSAIC: u32 = 0x4C;
pub const BLDCNT: u32 = 0x50;
pub const BLDALPHA: u32 = 0x52;
pub const BLDY: u32 = 0x54;

pub const SOUNDCNT_H: u32 = 0x82;
pub const SOUNDBIAS: u32 = 0x88;
pub const FIFO_A: u32 = 0xA0;
pub const FIFO_B: u32 = 0xA4;

pub const DMA0SAD_L: u32 = 0xB0;
pub const DMA0CNT_H: u32 = 0xBA;
pub const DMA1CNT_H: u32 = 0xC6;
pub const DMA2CNT_H: u32 = 0xD2;
pub const DMA3CNT_H: u32 = 0xDE;

pub const TM0CNT_L: u32 = 0x100;
pub const TM0CNT_H: u32 = 0x102;
pub const TM1CNT_L: u32 = 0x104;
pub const TM1CNT_H: u32 = 0x106;
pub const TM2CNT_L: u32 = 0x108;
pub const TM2CNT_H: u32 = 0x10A;
pub const TM3CNT_L: u32 = 0x10C;
pub const TM3CNT_H: u32 = 0x10E;

pub const KEYINPUT: u32 = 0x130;
pub const KEYCNT: u32 = 0x132;

pub const IE: u32 = 0x200;
pub const IF: u32 = 0x202;
pub const WAITCNT: u32 = 0x204;
pub const IME: u32 = 0x208;
pub const POSTFLG: u32 = 0x300;
