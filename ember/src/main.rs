// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Headless front-end: loads a ROM (and optional BIOS), runs the core on a
//! background thread and prints frame statistics in place.

use std::{
    env, fs,
    io::Write,
    path::PathBuf,
    process::ExitCode,
    thread,
    time::{Duration, Instant},
};

use ember_core::{
    cart::{gpio::GpioDeviceType, Cartridge},
    common::Settings,
    Ember, LaunchConfig, Message, SharedData,
};

/// Frames to emulate before exiting; keeps unattended runs bounded.
const FRAME_LIMIT: u32 = 1500;

struct Args {
    rom: PathBuf,
    bios: Option<PathBuf>,
    skip_bios: bool,
}

fn parse_args() -> Option<Args> {
    let mut args = env::args().skip(1);
    let mut rom = None;
    let mut bios = None;
    let mut skip_bios = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--bios" => bios = Some(PathBuf::from(args.next()?)),
            "--skip-bios" => skip_bios = true,
            _ if rom.is_none() => rom = Some(PathBuf::from(arg)),
            _ => return None,
        }
    }
    Some(Args {
        rom: rom?,
        bios,
        skip_bios,
    })
}

fn main() -> ExitCode {
    env_logger::init();

    let Some(args) = parse_args() else {
        eprintln!("Usage: ember <rom> [--bios <path>] [--skip-bios]");
        return ExitCode::FAILURE;
    };

    let rom = match fs::read(&args.rom) {
        Ok(rom) => rom,
        Err(err) => {
            eprintln!("Failed to read {}: {err}", args.rom.display());
            return ExitCode::FAILURE;
        }
    };
    let (bios, skip_bios) = match &args.bios {
        Some(path) => match fs::read(path) {
            Ok(bios) => (Some(bios), args.skip_bios),
            Err(err) => {
                eprintln!("Failed to read {}: {err}", path.display());
                return ExitCode::FAILURE;
            }
        },
        // Without a BIOS image the boot animation cannot run.
        None => (None, true),
    };

    let backup_type = Cartridge::detect_backup(&rom);
    let config = LaunchConfig {
        rom,
        bios,
        skip_bios,
        audio_frequency: 0,
        settings: Settings::default(),
        backup_type,
        gpio_device: GpioDeviceType::None,
    };

    let shared = SharedData::new();
    let (mut console, tx) = Ember::new(shared.clone());
    tx.send(Message::Reset(Box::new(config))).unwrap();
    tx.send(Message::Run).unwrap();
    let emu_thread = thread::spawn(move || console.run());

    let mut total_frames = 0u32;
    let mut frame_window = 0u32;
    let mut fps = 0.0;
    let mut window_start = Instant::now();
    let mut last_frame = Instant::now();

    while total_frames < FRAME_LIMIT {
        // A console that stopped producing frames (e.g. a rejected reset)
        // should not hang the port.
        if last_frame.elapsed() > Duration::from_secs(10) {
            eprintln!("\nNo frames for 10 seconds, giving up.");
            break;
        }
        let frames = shared.take_frame_counter();
        if frames > 0 {
            last_frame = Instant::now();
            total_frames += frames;
            frame_window += frames;
            let elapsed = window_start.elapsed().as_secs_f64();
            if elapsed >= 0.25 {
                fps = frame_window as f64 / elapsed;
                frame_window = 0;
                window_start = Instant::now();
            }
            let [ewram, iwram, vram] = shared.ram_usage_kib();
            print!(
                "\rFrames: {total_frames:<12} | FPS: {fps:<8.2} | \
                 RAM usage (KiB): E={ewram:<5} I={iwram:<5} V={vram:<5}"
            );
            let _ = std::io::stdout().flush();
        }
        thread::sleep(Duration::from_millis(5));
    }
    println!("\nStopping...");

    tx.send(Message::Exit).unwrap();
    emu_thread.join().unwrap();

    if let Some(save) = shared.backup.take_dirty() {
        let path = args.rom.with_extension("sav");
        if let Err(err) = fs::write(&path, save) {
            eprintln!("Failed to write {}: {err}", path.display());
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}
