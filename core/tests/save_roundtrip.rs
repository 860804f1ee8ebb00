// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Save-state tests: deterministic round trips and the load contract.

use ember_core::{
    cart::{backup::BackupType, gpio::GpioDeviceType},
    common::{LoadStateError, Settings},
    savestate, Ember, LaunchConfig, SharedData,
};

/// A ROM whose little program keeps mutating registers and memory, so
/// diverging executions are visible in the fingerprint.
fn test_rom() -> Vec<u8> {
    let mut rom = vec![0u8; 0x4000];
    let program: [u32; 6] = [
        0xE3A0_0001, // mov   r0, 1
        0xE3A0_1402, // mov   r1, 0x0200_0000
        0xE090_0000, // adds  r0, r0, r0
        0xE2A0_0003, // adc   r0, r0, 3
        0xE481_0004, // str   r0, [r1], 4
        0xEAFF_FFFB, // b     back to adds
    ];
    for (i, word) in program.iter().enumerate() {
        rom[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
    }
    rom
}

fn console(rom: Vec<u8>) -> Ember {
    let (mut gg, _tx) = Ember::new(SharedData::new());
    gg.launch(LaunchConfig {
        rom,
        bios: None,
        skip_bios: true,
        audio_frequency: 0,
        settings: Settings::default(),
        backup_type: BackupType::Sram,
        gpio_device: GpioDeviceType::Rtc,
    })
    .unwrap();
    gg
}

fn fingerprint(gg: &mut Ember) -> (u64, [u32; 8], u32, u32, Vec<u8>) {
    let mem: Vec<u8> = (0..64u32)
        .map(|i| gg.memory.ewram.read8(i as usize * 4))
        .collect();
    (
        gg.scheduler.now(),
        gg.cpu.low,
        gg.cpu.pc,
        gg.cpu.cpsr,
        mem,
    )
}

#[test]
fn diverged_execution_rejoins_after_load() {
    let mut a = console(test_rom());
    // Give the timers and backup some state to carry.
    a.set_hword(0x0400_0100, 0xFF00);
    a.set_hword(0x0400_0102, 0x00C0);
    a.set_byte(0x0E00_0123, 0x5A);

    for _ in 0..1024 {
        a.advance();
    }
    let state = savestate::save(&a);

    for _ in 0..512 {
        a.advance();
    }
    let expected = fingerprint(&mut a);

    let mut b = console(test_rom());
    savestate::load(&mut b, &state).unwrap();
    for _ in 0..512 {
        b.advance();
    }
    assert_eq!(fingerprint(&mut b), expected);
}

#[test]
fn load_restores_the_exact_snapshot() {
    let mut a = console(test_rom());
    for _ in 0..300 {
        a.advance();
    }
    let state = savestate::save(&a);
    let expected = fingerprint(&mut a);

    let mut b = console(test_rom());
    savestate::load(&mut b, &state).unwrap();
    assert_eq!(fingerprint(&mut b), expected);

    // Saving the restored console reproduces the same image.
    assert_eq!(savestate::save(&b), state);
}

#[test]
fn backup_contents_travel_with_the_state() {
    let mut a = console(test_rom());
    a.set_byte(0x0E00_0042, 0x77);
    let state = savestate::save(&a);

    let mut b = console(test_rom());
    savestate::load(&mut b, &state).unwrap();
    assert_eq!(b.get_byte(0x0E00_0042), 0x77);
}

#[test]
fn rejects_foreign_and_damaged_states() {
    let mut a = console(test_rom());
    for _ in 0..64 {
        a.advance();
    }
    let state = savestate::save(&a);

    let mut b = console(test_rom());

    // Bad magic (also the deprecated unversioned format).
    let mut bad = state.clone();
    bad[0] = b'X';
    assert_eq!(
        savestate::load(&mut b, &bad).unwrap_err(),
        LoadStateError::BadMagic
    );

    // Wrong version.
    let mut bad = state.clone();
    bad[4] = 9;
    assert_eq!(
        savestate::load(&mut b, &bad).unwrap_err(),
        LoadStateError::UnsupportedVersion(9)
    );

    // Truncation inside a chunk.
    let truncated = &state[..state.len() - 7];
    assert!(savestate::load(&mut b, truncated).is_err());

    // A different ROM (other size) is a fingerprint mismatch.
    let mut c = console(vec![0; 0x8000]);
    assert_eq!(
        savestate::load(&mut c, &state).unwrap_err(),
        LoadStateError::RomMismatch
    );
}

#[test]
fn unknown_chunks_are_skipped() {
    let mut a = console(test_rom());
    let mut state = savestate::save(&a);

    // Append a chunk of an unknown kind; loading must ignore it.
    state.extend_from_slice(&0xBEEFu32.to_le_bytes());
    state.extend_from_slice(&4u32.to_le_bytes());
    state.extend_from_slice(&[1, 2, 3, 4]);

    savestate::load(&mut a, &state).unwrap();
}
