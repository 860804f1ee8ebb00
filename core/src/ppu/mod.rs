// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! The display processor.
//!
//! The PPU steps in two scheduled events per line, `HDraw` and `HBlank`,
//! covering 228 lines (160 visible, 68 blanking). Every visible HBlank
//! composes one 240-pixel line: backgrounds and sprites are merged layer by
//! layer from priority 3 up to 0, through the window masks and the colour
//! effect unit, into the internal framebuffer. When VCOUNT reaches 160 the
//! finished frame is published to the shared region.

mod affine;
mod obj;
mod text;
mod window;

use std::{mem, sync::atomic::Ordering};

use crate::{
    addr::*,
    bits::{BitOps, Halves},
    console::Ember,
    cpu::{Cpu, Interrupt},
    dma::{DmaReason, Dmas},
    memory::{KB, MemRegion},
    scheduler::EventKind,
    Colour, SCREEN_HEIGHT, SCREEN_REAL_HEIGHT, SCREEN_WIDTH,
};

// DISPCNT
const FORCED_BLANK: u32 = 7;
const OBJ_MAPPING_1D: u32 = 6;
const WIN0_EN: u32 = 13;
const WIN1_EN: u32 = 14;
const WIN_OBJS: u32 = 15;

// DISPSTAT
const VBLANK: u32 = 0;
const HBLANK: u32 = 1;
const VCOUNT_EQ: u32 = 2;
const VBLANK_IRQ: u32 = 3;
const HBLANK_IRQ: u32 = 4;
const VCOUNT_IRQ: u32 = 5;

/// Cycles from the start of a scanline until HBlank.
pub const CYCLES_HDRAW: u64 = 1006;
/// Cycles per full scanline slot.
pub const CYCLES_SCANLINE: u64 = 1232;

/// Colour effect selected in BLDCNT.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Blend {
    Off,
    Alpha,
    Light,
    Dark,
}

impl Blend {
    fn from_bits(mode: u16) -> Self {
        match mode & 3 {
            0 => Self::Off,
            1 => Self::Alpha,
            2 => Self::Light,
            _ => Self::Dark,
        }
    }
}

/// A pixel on its way through the composer. `idx` tags the originating
/// layer: BG0-3 are 0-3, sprites are 4, the backdrop is 5.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct RichColour {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub idx: u8,
    pub visible: bool,
    pub force_blend: bool,
}

impl RichColour {
    fn from_palette(raw: u16, idx: u8) -> Self {
        Self {
            red: raw.field(0, 5) as u8,
            green: raw.field(5, 5) as u8,
            blue: raw.field(10, 5) as u8,
            idx,
            visible: true,
            force_blend: false,
        }
    }

    fn to_raw(self) -> Colour {
        (self.red as u16 & 0x1F)
            | ((self.green as u16 & 0x1F) << 5)
            | ((self.blue as u16 & 0x1F) << 10)
    }
}

/// Per-line workspace of the composer.
pub struct Scanline {
    /// The background layer currently being merged.
    pub bg: [RichColour; SCREEN_WIDTH],
    /// The previous layer at each pixel, fed to alpha blending.
    pub bot: [RichColour; SCREEN_WIDTH],
    /// The finished line.
    pub result: [RichColour; SCREEN_WIDTH],
    /// Prerendered sprites, one line per priority.
    pub oam: [[RichColour; SCREEN_WIDTH]; 4],
    /// Which layer [`merge_layer`] is currently merging (0-5).
    pub top_idx: u8,
    /// Per-pixel window option bits, valid while `windows_active`.
    pub win_opts: [u8; SCREEN_WIDTH],
    pub windows_active: bool,
    /// Pixels covered by the sprite window.
    pub obj_window: [bool; SCREEN_WIDTH],
}

impl Default for Scanline {
    fn default() -> Self {
        Self {
            bg: [RichColour::default(); SCREEN_WIDTH],
            bot: [RichColour::default(); SCREEN_WIDTH],
            result: [RichColour::default(); SCREEN_WIDTH],
            oam: [[RichColour::default(); SCREEN_WIDTH]; 4],
            top_idx: 0,
            win_opts: [0xFF; SCREEN_WIDTH],
            windows_active: false,
            obj_window: [false; SCREEN_WIDTH],
        }
    }
}

pub struct Ppu {
    pub palette: MemRegion,
    pub vram: MemRegion,
    pub oam: MemRegion,

    /// Internal affine reference accumulators for the two affine-capable
    /// backgrounds, in 20.8 fixed point.
    pub ref_x: [i32; 2],
    pub ref_y: [i32; 2],
    /// Reload the accumulators from the reference registers on the next
    /// HDraw; set at VBlank and on guest writes.
    pub reload_affine: bool,

    pub skip_current_frame: bool,
    pub frame_skip_ctr: u8,
    /// Latched once per frame; video capture DMA cannot change mid-frame.
    pub video_capture: bool,

    framebuffer: Box<[Colour]>,
    line: Box<Scanline>,
}

impl Default for Ppu {
    fn default() -> Self {
        Self {
            palette: MemRegion::new(KB),
            vram: MemRegion::new(96 * KB),
            oam: MemRegion::new(KB),
            ref_x: [0; 2],
            ref_y: [0; 2],
            reload_affine: true,
            skip_current_frame: false,
            frame_skip_ctr: 0,
            video_capture: false,
            framebuffer: vec![0; SCREEN_WIDTH * SCREEN_HEIGHT].into_boxed_slice(),
            line: Box::default(),
        }
    }
}

impl Ppu {
    /// Kick off the per-line event pair; called on console reset.
    pub fn schedule_events(gg: &mut Ember) {
        gg[VCOUNT] = (SCREEN_REAL_HEIGHT - 1) as u16;
        gg.scheduler
            .schedule_repeating(EventKind::HDraw, 0, CYCLES_SCANLINE);
        gg.scheduler
            .schedule_repeating(EventKind::HBlank, CYCLES_HDRAW as i64, CYCLES_SCANLINE);
    }

    /// Start of a scanline: advance VCOUNT, maintain the status bits, and
    /// run everything VBlank-timed.
    pub fn handle_hdraw(gg: &mut Ember, _late_by: u32) {
        let mut vcount = gg[VCOUNT] + 1;
        if vcount as usize >= SCREEN_REAL_HEIGHT {
            vcount = 0;
            Self::eval_frame_skip(gg);
        }
        gg[VCOUNT] = vcount;

        let lyc = gg[DISPSTAT].field(8, 8);
        gg[DISPSTAT] = gg[DISPSTAT]
            .with_bit(VCOUNT_EQ, vcount == lyc)
            .with_bit(
                VBLANK,
                (SCREEN_HEIGHT as u16..(SCREEN_REAL_HEIGHT - 1) as u16).contains(&vcount),
            )
            .with_bit(HBLANK, false);

        if vcount as usize == SCREEN_HEIGHT {
            Self::publish_frame(gg);
            if gg[DISPSTAT].bit(VBLANK_IRQ) {
                Cpu::request_interrupt(gg, Interrupt::VBlank);
            }
            Dmas::update_all(gg, DmaReason::VBlank);
            gg.ppu.reload_affine = true;
        }

        if gg.ppu.reload_affine {
            Self::reload_affine_refs(gg);
            gg.ppu.reload_affine = false;
        }

        if gg[DISPSTAT].bit(VCOUNT_EQ) && gg[DISPSTAT].bit(VCOUNT_IRQ) {
            Cpu::request_interrupt(gg, Interrupt::VCounter);
        }
    }

    /// Horizontal blank: compose and output the line if we are in the
    /// visible region, then run everything HBlank-timed.
    pub fn handle_hblank(gg: &mut Ember, _late_by: u32) {
        let vcount = gg[VCOUNT] as usize;
        if vcount < SCREEN_HEIGHT {
            if !gg.ppu.skip_current_frame {
                Self::render_line(gg, vcount);
            }
            Self::step_affine_refs(gg);
        }

        gg[DISPSTAT] = gg[DISPSTAT].with_bit(HBLANK, true);
        if gg[DISPSTAT].bit(HBLANK_IRQ) {
            Cpu::request_interrupt(gg, Interrupt::HBlank);
        }

        if vcount < SCREEN_HEIGHT {
            Dmas::update_all(gg, DmaReason::HBlank);
        }
        if gg.ppu.video_capture && (2..SCREEN_HEIGHT + 2).contains(&vcount) {
            Dmas::update_one(gg, 3, DmaReason::Special);
        }
        // Latched once per frame, two lines into the visible region.
        if vcount == SCREEN_HEIGHT + 2 {
            gg.ppu.video_capture = Dmas::video_capture_armed(gg);
        }
    }

    fn eval_frame_skip(gg: &mut Ember) {
        let settings = &gg.settings;
        if settings.enable_frame_skipping && settings.frame_skip_counter > 0 {
            gg.ppu.frame_skip_ctr =
                (gg.ppu.frame_skip_ctr + 1) % (settings.frame_skip_counter + 1);
            gg.ppu.skip_current_frame = gg.ppu.frame_skip_ctr != 0;
        } else {
            gg.ppu.skip_current_frame = false;
        }
    }

    /// Copy the finished frame into the shared region and let readers know.
    /// The RAM gauges ride along once per frame.
    fn publish_frame(gg: &mut Ember) {
        {
            let mut out = gg.shared.framebuffer.data.lock().unwrap();
            out.copy_from_slice(&gg.ppu.framebuffer);
        }
        let pages = [
            gg.memory.ewram.used_pages(),
            gg.memory.iwram.used_pages(),
            gg.ppu.vram.used_pages(),
        ];
        for (slot, count) in gg.shared.ram_pages.iter().zip(pages) {
            slot.store(count, Ordering::Relaxed);
        }
        gg.shared.framebuffer.dirty.store(true, Ordering::Release);
        gg.shared.framebuffer.version.fetch_add(1, Ordering::Release);
        gg.shared.frame_counter.fetch_add(1, Ordering::Release);
    }

    fn reload_affine_refs(gg: &mut Ember) {
        for bg in 0..2usize {
            let base = BG2X_L + bg as u32 * 0x10;
            let x = u32::from_halves(gg[base], gg[base + 2]);
            let y = u32::from_halves(gg[base + 4], gg[base + 6]);
            // 28-bit sign-extended 20.8 fixed point.
            gg.ppu.ref_x[bg] = ((x << 4) as i32) >> 4;
            gg.ppu.ref_y[bg] = ((y << 4) as i32) >> 4;
        }
    }

    /// Per-line coefficient step of the affine accumulators.
    fn step_affine_refs(gg: &mut Ember) {
        for bg in 0..2usize {
            let base = BG2PB + bg as u32 * 0x10;
            gg.ppu.ref_x[bg] += gg[base] as i16 as i32;
            gg.ppu.ref_y[bg] += gg[base + 4] as i16 as i32;
        }
    }

    fn render_line(gg: &mut Ember, y: usize) {
        let mut line = mem::take(&mut gg.ppu.line);
        Self::init_line(gg, &mut line);

        if !gg[DISPCNT].bit(FORCED_BLANK) {
            obj::prerender(gg, &mut line, y);
            window::build_masks(gg, &mut line, y);
            Self::render_layers(gg, &mut line, y);
        }

        let row = &mut gg.ppu.framebuffer[y * SCREEN_WIDTH..(y + 1) * SCREEN_WIDTH];
        for (dst, src) in row.iter_mut().zip(line.result.iter()) {
            *dst = src.to_raw();
        }
        gg.ppu.line = line;

        if let Some(sink) = &mut gg.video_sink {
            let row = &gg.ppu.framebuffer[y * SCREEN_WIDTH..(y + 1) * SCREEN_WIDTH];
            sink(y as u32, row);
        }
    }

    /// Reset the workspace to the backdrop. A light/dark colour effect is
    /// pre-applied here, since the merge loop never sees the backdrop as a
    /// top layer.
    fn init_line(gg: &Ember, line: &mut Scanline) {
        let backdrop = if gg[DISPCNT].bit(FORCED_BLANK) {
            RichColour::from_palette(0x7FFF, 5)
        } else {
            RichColour::from_palette(gg.ppu.palette.read16(0), 5)
        };

        line.windows_active = false;
        line.obj_window.fill(false);
        for layer in &mut line.oam {
            layer.fill(RichColour::default());
        }
        line.bot.fill(RichColour::default());
        line.result.fill(backdrop);

        let mode = Blend::from_bits(gg[BLDCNT].field(6, 2));
        if mode == Blend::Light || mode == Blend::Dark {
            line.top_idx = 5;
            line.bg = line.result;
            line.bot = line.result;
            Self::merge_layer(gg, line, None);
            line.top_idx = 0;
        }
    }

    /// Merge order: for each priority from 3 (lowest) to 0 (highest), each
    /// enabled background at that priority, then the sprites at it.
    fn render_layers(gg: &Ember, line: &mut Scanline, y: usize) {
        let mode = gg[DISPCNT] & 7;
        if mode > 5 {
            log::warn!(target: "ppu", "invalid video mode {mode}");
            return;
        }

        for prio in (0..4u16).rev() {
            for bg in (0..4usize).rev() {
                let enabled = gg[DISPCNT].bit(8 + bg as u32)
                    && gg.settings.ppu.enable_bg_layers[bg]
                    && gg[BG0CNT + bg as u32 * 2].field(0, 2) == prio
                    && bg_in_mode(mode, bg);
                if !enabled {
                    continue;
                }

                match (mode, bg) {
                    (0, _) | (1, 0) | (1, 1) => text::render(gg, line, y, bg),
                    (1, 2) | (2, _) => affine::render(gg, line, y, bg),
                    (3, 2) => affine::render_bitmap::<3>(gg, line, y),
                    (4, 2) => affine::render_bitmap::<4>(gg, line, y),
                    (5, 2) => affine::render_bitmap::<5>(gg, line, y),
                    _ => continue,
                }
                Self::merge_layer(gg, line, None);
            }

            if gg.settings.ppu.enable_oam {
                line.top_idx = 4;
                Self::merge_layer(gg, line, Some(prio as usize));
            }
        }
    }

    /// Merge the current top layer (`line.bg`, or a sprite priority line)
    /// into the result, applying windows and the colour effect.
    fn merge_layer(gg: &Ember, line: &mut Scanline, obj_prio: Option<usize>) {
        // Clamp the coefficients to [0..16].
        let eva = (gg[BLDALPHA].field(0, 5)).min(16) as u32;
        let evb = (gg[BLDALPHA].field(8, 5)).min(16) as u32;
        let evy = (gg[BLDY].field(0, 5)).min(16) as u32;

        let bldcnt = gg[BLDCNT];
        let base_mode = Blend::from_bits(bldcnt.field(6, 2));
        let top_idx = line.top_idx;

        let windows_any = top_idx <= 4
            && line.windows_active
            && (gg[DISPCNT].bit(WIN0_EN)
                || gg[DISPCNT].bit(WIN1_EN)
                || gg[DISPCNT].bit(WIN_OBJS));
        let top_enabled_global = bldcnt.bit(top_idx as u32);

        for x in 0..SCREEN_WIDTH {
            let topc = match obj_prio {
                Some(prio) => line.oam[prio][x],
                None => line.bg[x],
            };
            if !topc.visible {
                continue;
            }
            let botc = line.bot[x];

            let mut mode = base_mode;
            let mut blend_allowed = true;
            if windows_any {
                let opts = line.win_opts[x];
                // The window can hide the layer outright...
                if !opts.bit(top_idx as u32) {
                    continue;
                }
                // ...or just turn the colour effect off.
                if !opts.bit(5) {
                    mode = Blend::Off;
                    blend_allowed = false;
                }
            }

            let bot_enabled = bldcnt.bit(8 + botc.idx as u32);
            // A semi-transparent sprite forces alpha blending no matter
            // what BLDCNT selects.
            if blend_allowed && topc.force_blend && bot_enabled && botc.visible {
                mode = Blend::Alpha;
            }

            // Maintain the previous-layer chain for the next priority.
            line.bot[x] = topc;

            line.result[x] = match mode {
                Blend::Off => topc,
                Blend::Alpha => {
                    if !(top_enabled_global || topc.force_blend)
                        || !bot_enabled
                        || !botc.visible
                    {
                        topc
                    } else {
                        let channel = |top: u8, bot: u8| {
                            ((eva * top as u32 + evb * bot as u32) >> 4).min(31) as u8
                        };
                        RichColour {
                            red: channel(topc.red, botc.red),
                            green: channel(topc.green, botc.green),
                            blue: channel(topc.blue, botc.blue),
                            idx: top_idx,
                            visible: true,
                            force_blend: false,
                        }
                    }
                }
                Blend::Light if top_enabled_global => RichColour {
                    red: (topc.red as u32 + (((31 - topc.red as u32) * evy) >> 4)) as u8,
                    green: (topc.green as u32 + (((31 - topc.green as u32) * evy) >> 4)) as u8,
                    blue: (topc.blue as u32 + (((31 - topc.blue as u32) * evy) >> 4)) as u8,
                    ..topc
                },
                Blend::Dark if top_enabled_global => RichColour {
                    red: (topc.red as u32 - ((topc.red as u32 * evy) >> 4)) as u8,
                    green: (topc.green as u32 - ((topc.green as u32 * evy) >> 4)) as u8,
                    blue: (topc.blue as u32 - ((topc.blue as u32 * evy) >> 4)) as u8,
                    ..topc
                },
                _ => topc,
            };
        }
    }

    /// Read a 16-colour or 256-colour palette entry as a tagged pixel.
    fn palette_colour(&self, index: u32, layer: u8, obj: bool) -> RichColour {
        let base = if obj { 0x200 } else { 0 };
        RichColour::from_palette(self.palette.read16(base + (index as usize * 2)), layer)
    }

    /// Is 1D sprite tile mapping selected?
    fn obj_mapping_1d(dispcnt: u16) -> bool {
        dispcnt.bit(OBJ_MAPPING_1D)
    }
}

/// Which backgrounds exist in which video mode.
fn bg_in_mode(mode: u16, bg: usize) -> bool {
    match mode {
        0 => true,
        1 => bg <= 2,
        2 => bg >= 2,
        3..=5 => bg == 2,
        _ => false,
    }
}
