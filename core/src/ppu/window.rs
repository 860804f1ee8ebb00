// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Window masks.
//!
//! The two rectangular windows, the sprite window and the outside area each
//! carry a 6-bit option mask (BG0-3 and OBJ visibility, plus colour-effect
//! enable). The per-pixel winner is resolved once per scanline, window 0
//! taking precedence over window 1 over the sprite window.

use super::Scanline;
use crate::{addr::*, console::Ember, bits::BitOps, SCREEN_WIDTH};

pub fn build_masks(gg: &Ember, line: &mut Scanline, y: usize) {
    let dispcnt = gg[DISPCNT];
    line.windows_active = dispcnt.field(13, 3) != 0;
    if !line.windows_active {
        return;
    }

    // Everything starts as "outside".
    let outside = gg[WINOUT].field(0, 6) as u8;
    line.win_opts.fill(outside);

    if dispcnt.bit(15) {
        let opts = gg[WINOUT].field(8, 6) as u8;
        for x in 0..SCREEN_WIDTH {
            if line.obj_window[x] {
                line.win_opts[x] = opts;
            }
        }
    }

    // Window 1 first so window 0 wins overlaps.
    for win in [1u32, 0] {
        if !dispcnt.bit(13 + win) {
            continue;
        }
        let vert = gg[WIN0V + win * 2];
        if !span_contains(vert.field(8, 8) as usize, vert.field(0, 8) as usize, y, 228) {
            continue;
        }

        let opts = if win == 0 {
            gg[WININ].field(0, 6) as u8
        } else {
            gg[WININ].field(8, 6) as u8
        };
        let horiz = gg[WIN0H + win * 2];
        let (x1, x2) = (horiz.field(8, 8) as usize, horiz.field(0, 8) as usize);
        for x in 0..SCREEN_WIDTH {
            if span_contains(x1, x2, x, 240) {
                line.win_opts[x] = opts;
            }
        }
    }
}

/// Window spans are `start..end` with an exclusive end; `end < start`
/// wraps around the screen edge.
fn span_contains(start: usize, end: usize, value: usize, _max: usize) -> bool {
    if start <= end {
        (start..end).contains(&value)
    } else {
        value >= start || value < end
    }
}

#[cfg(test)]
mod tests {
    use super::span_contains;

    #[test]
    fn plain_spans() {
        assert!(span_contains(8, 16, 8, 240));
        assert!(span_contains(8, 16, 15, 240));
        assert!(!span_contains(8, 16, 16, 240));
    }

    #[test]
    fn wrapped_spans() {
        assert!(span_contains(200, 16, 8, 240));
        assert!(span_contains(200, 16, 220, 240));
        assert!(!span_contains(200, 16, 100, 240));
    }
}
