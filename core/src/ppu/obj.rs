// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Sprite evaluation and prerendering.
//!
//! All 128 OAM entries are evaluated against the current scanline and drawn
//! into one line buffer per priority; the composer interleaves those with
//! the background layers. Lower OAM indices win pixel conflicts, which falls
//! out of only writing where the buffer is still transparent.

use super::{Ppu, Scanline};
use crate::{
    addr::{DISPCNT, MOSAIC},
    bits::BitOps,
    console::Ember,
    SCREEN_HEIGHT, SCREEN_WIDTH,
};

/// (width, height) by shape and size code.
const SIZES: [[(i32, i32); 4]; 3] = [
    [(8, 8), (16, 16), (32, 32), (64, 64)],
    [(16, 8), (32, 8), (32, 16), (64, 32)],
    [(8, 16), (8, 32), (16, 32), (32, 64)],
];

/// Sprite GFX modes.
const MODE_SEMI_TRANSPARENT: u16 = 1;
const MODE_OBJ_WINDOW: u16 = 2;
const MODE_PROHIBITED: u16 = 3;

pub fn prerender(gg: &Ember, line: &mut Scanline, y: usize) {
    let dispcnt = gg[DISPCNT];
    if !dispcnt.bit(12) {
        return;
    }
    let mapping_1d = Ppu::obj_mapping_1d(dispcnt);
    let bitmap_mode = (dispcnt & 7) >= 3;

    for idx in 0..128 {
        let attr0 = gg.ppu.oam.read16(idx * 8);
        let attr1 = gg.ppu.oam.read16(idx * 8 + 2);
        let attr2 = gg.ppu.oam.read16(idx * 8 + 4);

        let affine = attr0.bit(8);
        if !affine && attr0.bit(9) {
            // Disabled.
            continue;
        }
        let gfx_mode = attr0.field(10, 2);
        if gfx_mode == MODE_PROHIBITED {
            continue;
        }

        let shape = (attr0.field(14, 2) as usize).min(2);
        let (width, height) = SIZES[shape][attr1.field(14, 2) as usize];
        // Double-size rendering area for affine sprites.
        let double = affine && attr0.bit(9);
        let (area_w, area_h) = if double {
            (width * 2, height * 2)
        } else {
            (width, height)
        };

        let mut sprite_y = attr0.field(0, 8) as u32 as i32;
        if sprite_y + area_h > 256 {
            sprite_y -= 256;
        }
        let mut sprite_x = attr1.field(0, 9) as u32 as i32;
        if sprite_x >= 256 {
            sprite_x -= 512;
        }

        let row = y as i32 - sprite_y;
        if row < 0 || row >= area_h || sprite_y >= SCREEN_HEIGHT as i32 {
            continue;
        }

        let mosaic = attr0.bit(12);
        let palette_256 = attr0.bit(13);
        let tile = attr2.field(0, 10) as usize;
        let priority = attr2.field(10, 2) as usize;
        let palette = attr2.field(12, 4) as u32;

        // In bitmap modes the lower tile range overlaps the framebuffer.
        if bitmap_mode && tile < 512 {
            continue;
        }

        let mos_h = gg[MOSAIC].field(8, 4) as u32 as i32 + 1;
        let mos_v = gg[MOSAIC].field(12, 4) as u32 as i32 + 1;
        let row = if mosaic { (row / mos_v) * mos_v } else { row };

        // Texture-space sampling setup. Non-affine sprites use a unit
        // matrix with optional flips.
        let (pa, pb, pc, pd) = if affine {
            let slot = attr1.field(9, 5) as usize * 32;
            (
                gg.ppu.oam.read16(slot + 6) as i16 as i32,
                gg.ppu.oam.read16(slot + 14) as i16 as i32,
                gg.ppu.oam.read16(slot + 22) as i16 as i32,
                gg.ppu.oam.read16(slot + 30) as i16 as i32,
            )
        } else {
            (0x100, 0, 0, 0x100)
        };
        let hflip = !affine && attr1.bit(12);
        let vflip = !affine && attr1.bit(13);

        for column in 0..area_w {
            let screen_x = sprite_x + column;
            if !(0..SCREEN_WIDTH as i32).contains(&screen_x) {
                continue;
            }
            let sample_col = if mosaic {
                ((screen_x / mos_h) * mos_h) - sprite_x
            } else {
                column
            };
            if !(0..area_w).contains(&sample_col) {
                continue;
            }

            // Rotate around the sprite's center.
            let local_x = sample_col - area_w / 2;
            let local_y = row - area_h / 2;
            let mut tex_x = (pa * local_x + pb * local_y) >> 8;
            let mut tex_y = (pc * local_x + pd * local_y) >> 8;
            tex_x += width / 2;
            tex_y += height / 2;
            if !(0..width).contains(&tex_x) || !(0..height).contains(&tex_y) {
                continue;
            }
            if hflip {
                tex_x = width - 1 - tex_x;
            }
            if vflip {
                tex_y = height - 1 - tex_y;
            }

            let palette_idx = sample_tile(
                gg,
                tile,
                palette_256,
                mapping_1d,
                width,
                tex_x as usize,
                tex_y as usize,
            );
            if palette_idx == 0 {
                continue;
            }

            let x = screen_x as usize;
            if gfx_mode == MODE_OBJ_WINDOW {
                line.obj_window[x] = true;
                continue;
            }
            if line.oam[priority][x].visible {
                continue;
            }

            let entry = if palette_256 {
                palette_idx as u32
            } else {
                palette * 16 + palette_idx as u32
            };
            let mut colour = gg.ppu.palette_colour(entry, 4, true);
            colour.force_blend = gfx_mode == MODE_SEMI_TRANSPARENT;
            line.oam[priority][x] = colour;
        }
    }
}

/// Fetch one texel of a sprite. Sprite tiles live in the upper 32 KiB of
/// VRAM; the mapping mode decides how multi-tile sprites are laid out.
fn sample_tile(
    gg: &Ember,
    tile: usize,
    palette_256: bool,
    mapping_1d: bool,
    width: i32,
    x: usize,
    y: usize,
) -> u8 {
    const OBJ_BASE: usize = 0x1_0000;

    let tile_x = x / 8;
    let tile_y = y / 8;
    let row_stride = if mapping_1d {
        (width as usize / 8) * if palette_256 { 2 } else { 1 }
    } else {
        32
    };

    let number = if palette_256 {
        (tile & !1) + tile_y * row_stride + tile_x * 2
    } else {
        tile + tile_y * row_stride + tile_x
    };
    // The tile counter wraps within the 1024-entry space.
    let number = number & 0x3FF;

    if palette_256 {
        gg.ppu
            .vram
            .read8(OBJ_BASE + number * 32 + (y & 7) * 8 + (x & 7))
    } else {
        let packed = gg
            .ppu
            .vram
            .read8(OBJ_BASE + number * 32 + (y & 7) * 4 + (x & 7) / 2);
        if x & 1 != 0 {
            packed >> 4
        } else {
            packed & 0xF
        }
    }
}
