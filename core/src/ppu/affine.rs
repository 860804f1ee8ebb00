// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Affine (rotation/scaling) and bitmap background rendering.

use super::{RichColour, Scanline};
use crate::{addr::*, console::Ember, bits::BitOps, SCREEN_WIDTH};

/// Render affine background `bg` (2 or 3) into `line.bg`.
///
/// The internal reference accumulators map screen space to texture space;
/// `pa`/`pc` step them per pixel, the per-line coefficients were already
/// applied at the end of the previous HBlank.
pub fn render(gg: &Ember, line: &mut Scanline, _y: usize, bg: usize) {
    line.top_idx = bg as u8;
    for pixel in &mut line.bg {
        pixel.visible = false;
    }

    let n = bg - 2;
    let cnt = gg[BG0CNT + bg as u32 * 2];
    let screen_base = cnt.field(8, 5) as usize * 0x800;
    let char_base = cnt.field(2, 2) as usize * 0x4000;
    let wraparound = cnt.bit(13);
    // 128, 256, 512 or 1024 pixels square.
    let size: i32 = 128 << cnt.field(14, 2);

    let base = BG2PA + n as u32 * 0x10;
    let pa = gg[base] as i16 as i32;
    let pc = gg[base + 4] as i16 as i32;

    let mut px = gg.ppu.ref_x[n];
    let mut py = gg.ppu.ref_y[n];

    for x in 0..SCREEN_WIDTH {
        let (mut tx, mut ty) = (px >> 8, py >> 8);
        px += pa;
        py += pc;

        if tx < 0 || tx >= size || ty < 0 || ty >= size {
            if !wraparound {
                continue;
            }
            tx = tx.rem_euclid(size);
            ty = ty.rem_euclid(size);
        }

        // Affine maps are always 8bpp with byte-sized tile numbers.
        let map_idx = (ty >> 3) as usize * (size >> 3) as usize + (tx >> 3) as usize;
        let number = gg.ppu.vram.read8(screen_base + map_idx) as usize;
        let palette_idx = gg
            .ppu
            .vram
            .read8(char_base + number * 64 + (ty & 7) as usize * 8 + (tx & 7) as usize);
        if palette_idx != 0 {
            line.bg[x] = gg.ppu.palette_colour(palette_idx as u32, bg as u8, false);
        }
    }
}

/// Render one line of a bitmap mode into `line.bg`. Mode 3 is full-screen
/// 16-bit colour, mode 4 full-screen paletted with frame select, mode 5 a
/// small 160x128 16-bit frame with frame select.
pub fn render_bitmap<const MODE: u16>(gg: &Ember, line: &mut Scanline, y: usize) {
    line.top_idx = 2;
    for pixel in &mut line.bg {
        pixel.visible = false;
    }

    let frame = if MODE != 3 && gg[DISPCNT].bit(4) {
        0xA000usize
    } else {
        0
    };

    match MODE {
        3 => {
            for x in 0..SCREEN_WIDTH {
                let raw = gg.ppu.vram.read16((y * SCREEN_WIDTH + x) * 2);
                line.bg[x] = RichColour::from_palette(raw, 2);
            }
        }
        4 => {
            for x in 0..SCREEN_WIDTH {
                let idx = gg.ppu.vram.read8(frame + y * SCREEN_WIDTH + x);
                if idx != 0 {
                    line.bg[x] = gg.ppu.palette_colour(idx as u32, 2, false);
                }
            }
        }
        _ => {
            if y >= 128 {
                return;
            }
            for x in 0..160 {
                let raw = gg.ppu.vram.read16(frame + (y * 160 + x) * 2);
                line.bg[x] = RichColour::from_palette(raw, 2);
            }
        }
    }
}
