// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Text (tiled) background rendering.

use super::Scanline;
use crate::{addr::*, console::Ember, bits::BitOps, SCREEN_WIDTH};

/// Render text background `bg` into `line.bg`.
///
/// The virtual map is 512x512 at most, wrapped to 9 bits; the size code
/// selects 1, 2 or 4 of the 32x32-entry screen blocks.
pub fn render(gg: &Ember, line: &mut Scanline, y: usize, bg: usize) {
    line.top_idx = bg as u8;

    let cnt = gg[BG0CNT + bg as u32 * 2];
    let mosaic = cnt.bit(6);
    let palette_256 = cnt.bit(7);
    let bg_size = cnt.field(14, 2) as u32;
    let screen_base = cnt.field(8, 5) as usize * 0x800;
    let char_base = cnt.field(2, 2) as usize * 0x4000;

    let hoff = gg[BG0HOFS + bg as u32 * 4] as u32;
    let voff = gg[BG0VOFS + bg as u32 * 4] as u32;

    // Screen-block offsets of the right/lower quadrants, in entries.
    let horz_blk: u32 = if bg_size & 1 != 0 { 1024 } else { 0 };
    let vert_blk: u32 = match bg_size {
        0b10 => 1024,
        0b11 => 2048,
        _ => 0,
    };

    // Mosaic extents (>= 1).
    let mos_h = gg[MOSAIC].field(0, 4) as u32 + 1;
    let mos_v = gg[MOSAIC].field(4, 4) as u32 + 1;

    // Y math happens once per scanline.
    let mut rel_y = y as u32;
    if mosaic {
        rel_y = (rel_y / mos_v) * mos_v;
    }
    rel_y = (rel_y + voff) & 0x1FF;

    let tile_y = (rel_y >> 3) & 31;
    let chr_y = rel_y & 7;
    let up_y = (rel_y >> 8) & 1;
    let row_base = tile_y * 32;

    // With mosaic on, resolve one pixel per block and splat it.
    let mut x = 0usize;
    while x < SCREEN_WIDTH {
        let run = if mosaic {
            ((x as u32 / mos_h) * mos_h + mos_h) as usize - x
        } else {
            1
        };
        let count = run.min(SCREEN_WIDTH - x);

        let mut rel_x = if mosaic {
            (x as u32 / mos_h) * mos_h
        } else {
            x as u32
        };
        rel_x = (rel_x + hoff) & 0x1FF;

        let tile_x = (rel_x >> 3) & 31;
        let chr_x0 = rel_x & 7;
        let up_x = (rel_x >> 8) & 1;

        let screen_idx = row_base + tile_x + up_x * horz_blk + up_y * vert_blk;
        let tile = gg
            .ppu
            .vram
            .read16(screen_base + screen_idx as usize * 2);
        let number = tile.field(0, 10) as usize;
        let hflip = tile.bit(10);
        let vflip = tile.bit(11);
        let palette = tile.field(12, 4) as u32;

        let chr_vy = if vflip { 7 - chr_y } else { chr_y };
        let chr_x = if hflip { 7 - chr_x0 } else { chr_x0 };

        let palette_idx = if palette_256 {
            // 8bpp: 64 bytes per tile.
            gg.ppu
                .vram
                .read8(char_base + number * 64 + chr_vy as usize * 8 + chr_x as usize)
                 as u32
        } else {
            // 4bpp: 32 bytes per tile, the entry picks the sub-palette.
            let packed = gg
                .ppu
                .vram
                .read8(char_base + number * 32 + chr_vy as usize * 4 + (chr_x >> 1) as usize);
            if chr_x & 1 != 0 {
                (packed >> 4) as u32
            } else {
                (packed & 0xF) as u32
            }
        };

        if palette_idx != 0 {
            let entry = if palette_256 {
                palette_idx
            } else {
                palette * 16 + palette_idx
            };
            let colour = gg.ppu.palette_colour(entry, bg as u8, false);
            for pixel in line.bg[x..x + count].iter_mut() {
                *pixel = colour;
            }
        } else {
            // Palette index 0 is transparent.
            for pixel in line.bg[x..x + count].iter_mut() {
                pixel.visible = false;
            }
        }

        x += count;
    }
}
