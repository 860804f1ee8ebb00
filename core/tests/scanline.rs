// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Composer tests, driven end to end through the scheduler: the console
//! runs a dummy ROM until the PPU publishes a frame, then the shared
//! framebuffer is inspected.

use std::sync::atomic::Ordering;

use ember_core::{
    cart::{backup::BackupType, gpio::GpioDeviceType},
    common::Settings,
    Ember, LaunchConfig, SharedData, SCREEN_WIDTH,
};

fn console() -> Ember {
    let (mut gg, _tx) = Ember::new(SharedData::new());
    // All-zero instructions never write anything; the CPU just burns
    // cycles while the PPU runs.
    gg.launch(LaunchConfig {
        rom: vec![0; 0x4000],
        bios: None,
        skip_bios: true,
        audio_frequency: 0,
        settings: Settings::default(),
        backup_type: BackupType::None,
        gpio_device: GpioDeviceType::None,
    })
    .unwrap();
    gg
}

fn run_one_frame(gg: &mut Ember) {
    let start = gg.shared.frame_counter.load(Ordering::Acquire);
    while gg.shared.frame_counter.load(Ordering::Acquire) == start {
        gg.advance();
    }
}

#[test]
fn text_background_pixel_lands_in_the_result() {
    let mut gg = console();

    // Mode 0, BG0 enabled at priority 0, char base 0, screen base block 8.
    gg.set_hword(0x0400_0000, 1 << 8);
    gg.set_hword(0x0400_0008, 8 << 8);

    // Tile map entry for x=120..128 of the first row: tile 1, palette
    // bank 2.
    gg.set_hword(0x0600_4000 + 15 * 2, (2 << 12) | 1);
    // Tile 1, first row: palette index 3 in the leftmost pixel.
    gg.set_hword(0x0600_0020, 0x0003);

    // Backdrop red, palette entry 2*16+3 green.
    gg.set_hword(0x0500_0000, 0x001F);
    gg.set_hword(0x0500_0000 + 35 * 2, 0x03E0);

    run_one_frame(&mut gg);

    let mut frame = vec![0u16; SCREEN_WIDTH * 160];
    gg.shared.copy_frame(&mut frame);
    assert_eq!(frame[120], 0x03E0);
    // Everything else on the line is transparent (palette index 0) and
    // must leave the backdrop untouched.
    assert_eq!(frame[0], 0x001F);
    assert_eq!(frame[119], 0x001F);
    assert_eq!(frame[121], 0x001F);
}

#[test]
fn forced_blank_renders_white() {
    let mut gg = console();
    gg.set_hword(0x0400_0000, 1 << 7);
    gg.set_hword(0x0500_0000, 0x001F);

    run_one_frame(&mut gg);

    let mut frame = vec![0u16; SCREEN_WIDTH * 160];
    gg.shared.copy_frame(&mut frame);
    assert!(frame.iter().all(|p| *p == 0x7FFF));
}

#[test]
fn frame_publication_bumps_the_version() {
    let mut gg = console();
    let before = gg.shared.framebuffer.version.load(Ordering::Acquire);
    run_one_frame(&mut gg);
    let after = gg.shared.framebuffer.version.load(Ordering::Acquire);
    assert!(after > before);
    assert!(gg.shared.framebuffer.dirty.load(Ordering::Acquire));
}

#[test]
fn brightness_increase_applies_to_enabled_layers() {
    let mut gg = console();

    // Backdrop-only frame with a light effect on the backdrop.
    gg.set_hword(0x0400_0000, 0);
    gg.set_hword(0x0500_0000, 0x0010); // r = 16
    gg.set_hword(0x0400_0050, (2 << 6) | (1 << 5)); // light, backdrop on top
    gg.set_hword(0x0400_0054, 8); // evy = 8

    run_one_frame(&mut gg);

    let mut frame = vec![0u16; SCREEN_WIDTH * 160];
    gg.shared.copy_frame(&mut frame);
    // 16 + ((31 - 16) * 8) >> 4 = 23.
    assert_eq!(frame[0] & 0x1F, 23);
}

#[test]
fn video_sink_sees_every_visible_line() {
    let mut gg = console();
    let (tx, rx) = crossbeam_channel::unbounded();
    gg.video_sink = Some(Box::new(move |y, pixels| {
        let _ = tx.send((y, pixels.len()));
    }));

    run_one_frame(&mut gg);

    let mut lines = 0;
    while let Ok((_, len)) = rx.try_recv() {
        assert_eq!(len, SCREEN_WIDTH);
        lines += 1;
    }
    assert_eq!(lines % 160, 0);
    assert!(lines > 0);
}
