// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Bus-level tests: wait-state accounting, the prefetch buffer, open-bus
//! patterns and the per-region write quirks.

use ember_core::{
    cart::{backup::BackupType, gpio::GpioDeviceType},
    common::Settings,
    memory::Access::{NonSeq, Seq},
    Ember, LaunchConfig, Message, SharedData,
};

fn console(rom: Vec<u8>) -> Ember {
    let (mut gg, _tx) = Ember::new(SharedData::new());
    gg.launch(LaunchConfig {
        rom,
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

fn flat_rom() -> Vec<u8> {
    (0..0x4000u32).map(|i| i as u8).collect()
}

#[test]
fn iwram_word_read_charges_one_cycle() {
    let mut gg = console(flat_rom());
    let before = gg.scheduler.now();
    gg.read_word(0x0300_0000, Seq);
    assert_eq!(gg.scheduler.now() - before, 1);
}

#[test]
fn ewram_costs_follow_the_bus_width() {
    let mut gg = console(flat_rom());
    let before = gg.scheduler.now();
    gg.read_hword(0x0200_0000, Seq);
    assert_eq!(gg.scheduler.now() - before, 3);

    let before = gg.scheduler.now();
    gg.read_word(0x0200_0000, Seq);
    assert_eq!(gg.scheduler.now() - before, 6);
}

#[test]
fn cart_sequential_chain_hits_the_prefetch_buffer() {
    let mut gg = console(flat_rom());
    // Default wait-states, prefetch on, 16-bit mode.
    gg.set_hword(0x0400_0204, 0x4000);
    gg.cpu.cpsr |= 1 << 5;

    let mut charges = Vec::new();
    let before = gg.scheduler.now();
    gg.read_hword(0x0800_0000, Seq);
    charges.push(gg.scheduler.now() - before);

    for i in 1..5u32 {
        // The cycles an instruction spends executing keep the fetcher fed.
        gg.add_i_cycles(3);
        let before = gg.scheduler.now();
        gg.read_hword(0x0800_0000 + i * 2, Seq);
        charges.push(gg.scheduler.now() - before);
    }

    assert_eq!(charges, [5, 1, 1, 1, 1]);
}

#[test]
fn prefetch_never_costs_more_than_nonsequential_access() {
    let mut gg = console(flat_rom());
    gg.set_hword(0x0400_0204, 0x4000);
    gg.cpu.cpsr |= 1 << 5;

    let before = gg.scheduler.now();
    for i in 0..64u32 {
        gg.read_hword(0x0800_0100 + i * 2, Seq);
    }
    let with_buffer = gg.scheduler.now() - before;
    // 64 first-access fetches would cost 5 cycles each.
    assert!(with_buffer <= 64 * 5);
}

#[test]
fn cart_boundary_crossing_forces_nonsequential_timing() {
    let mut gg = console(vec![0xFF; 0x40000]);
    let before = gg.scheduler.now();
    gg.read_hword(0x0802_0000, Seq);
    let boundary = gg.scheduler.now() - before;

    let before = gg.scheduler.now();
    gg.read_hword(0x0802_0002, Seq);
    let sequential = gg.scheduler.now() - before;

    assert_eq!(boundary, 5);
    assert_eq!(sequential, 3);
}

#[test]
fn identical_access_sequences_charge_identical_cycles() {
    let run = || {
        let mut gg = console(flat_rom());
        for _ in 0..3 {
            gg.read_word(0x0300_0000, NonSeq);
            gg.read_hword(0x0800_0010, Seq);
            gg.write_word(0x0200_0040, 0x1234_5678, NonSeq);
        }
        gg.scheduler.now()
    };
    assert_eq!(run(), run());
}

#[test]
fn palette_byte_write_fills_the_half_word() {
    let mut gg = console(flat_rom());
    gg.set_byte(0x0500_0100, 0x3F);
    assert_eq!(gg.get_hword(0x0500_0100), 0x3F3F);
}

#[test]
fn obj_vram_byte_write_is_dropped() {
    let mut gg = console(flat_rom());
    // Mode 0: the OBJ area starts at VRAM offset 0x10000.
    gg.set_hword(0x0400_0000, 0);
    gg.set_byte(0x0601_0000, 0xAB);
    assert_eq!(gg.get_hword(0x0601_0000), 0);

    // The background area duplicates the byte instead.
    gg.set_byte(0x0600_0001, 0xCD);
    assert_eq!(gg.get_hword(0x0600_0000), 0xCDCD);
}

#[test]
fn oam_byte_write_is_dropped() {
    let mut gg = console(flat_rom());
    gg.set_hword(0x0700_0010, 0x1234);
    gg.set_byte(0x0700_0010, 0xFF);
    assert_eq!(gg.get_hword(0x0700_0010), 0x1234);
}

#[test]
fn unpopulated_cart_reads_return_the_address_pattern() {
    let mut gg = console(flat_rom());
    // Way beyond the 16 KiB ROM.
    assert_eq!(gg.get_hword(0x0880_4000), (0x0880_4000u32 >> 1) as u16);
    let expect = ((0x0880_4000u32 >> 1) & 0xFFFF) | ((0x0880_4002u32 >> 1) << 16);
    assert_eq!(gg.get_word(0x0880_4000), expect);
}

#[test]
fn bios_reads_are_gated_on_pc() {
    let mut gg = console(flat_rom());
    // PC is in the cartridge after a skip-BIOS boot; BIOS reads return the
    // last value the (zero-filled) BIOS drove onto the bus.
    assert_eq!(gg.cpu.pc & 0xFF00_0000, 0x0800_0000);
    let outside = gg.get_word(0x0000_0000);
    assert_eq!(outside, gg.memory.bios_bus);
}

#[test]
fn exit_message_stops_the_loop() {
    let (mut gg, tx) = Ember::new(SharedData::new());
    tx.send(Message::Exit).unwrap();
    // Returns instead of blocking on the inbox.
    gg.run();
}
