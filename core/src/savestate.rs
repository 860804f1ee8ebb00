// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Save states.
//!
//! The wire format is a fixed header followed by typed chunks:
//!
//! ```text
//! header:  magic "HSQS" | version u32 | rom_size u32 | rom_code u32
//! chunk:   kind u32 | size u32 | payload[size]
//! ```
//!
//! Every integer is little-endian. Unknown chunk kinds are skipped over by
//! their size, which keeps old readers compatible with newer writers.
//! Memory regions nest a `{decoded_size u32, encoding u8, reserved[3]}`
//! header; encoding 1 is a run-length scheme of `{len u16, value u8}` pairs,
//! chosen only when it is strictly smaller than the raw bytes.
//!
//! Loading rejects states whose ROM fingerprint (size + header code) does
//! not match what is currently inserted; the ROM itself is never part of a
//! state. On a structural error the console may be left partially restored
//! and callers should follow up with a reset.

use std::sync::atomic::Ordering;

use crate::{
    cart::{
        backup::{BackupType, Eeprom, EepromCmd, FlashCmdStage, FlashMode, FlashState, SaveType},
        gpio::{Gpio, GpioDevice, GpioDeviceType, Rtc},
    },
    common::LoadStateError,
    console::Ember,
    memory::MemRegion,
    scheduler::{Event, EventHandle, EventKind},
};

const MAGIC: &[u8; 4] = b"HSQS";
const VERSION: u32 = 2;

// Chunk kinds.
const CHUNK_CPU: u32 = 1;
const CHUNK_IO: u32 = 2;
const CHUNK_PPU: u32 = 3;
const CHUNK_GPIO: u32 = 4;
const CHUNK_APU: u32 = 5;
const CHUNK_SCHEDULER: u32 = 6;
const CHUNK_SCHED_EVENTS: u32 = 7;
const CHUNK_MEMORY_META: u32 = 8;
const CHUNK_EWRAM: u32 = 9;
const CHUNK_IWRAM: u32 = 10;
const CHUNK_VRAM: u32 = 11;
const CHUNK_PALETTE: u32 = 12;
const CHUNK_OAM: u32 = 13;
const CHUNK_BACKUP: u32 = 14;

const ENCODING_RAW: u8 = 0;
const ENCODING_RLE: u8 = 1;

type Result<T> = std::result::Result<T, LoadStateError>;

/// Serialize the full deterministic state of the console, minus the ROM.
pub fn save(gg: &Ember) -> Vec<u8> {
    let mut out = Writer::default();
    out.bytes(MAGIC);
    out.u32(VERSION);
    out.u32(gg.cart.rom.len() as u32);
    out.u32(gg.cart.rom_code());

    out.chunk(CHUNK_CPU, |w| write_cpu(gg, w));
    out.chunk(CHUNK_IO, |w| write_io(gg, w));
    out.chunk(CHUNK_PPU, |w| write_ppu(gg, w));
    out.chunk(CHUNK_GPIO, |w| write_gpio(gg, w));
    out.chunk(CHUNK_APU, |w| write_apu(gg, w));

    let events = gg.scheduler.events();
    out.chunk(CHUNK_SCHEDULER, |w| {
        w.u64(gg.scheduler.now());
        w.u64(next_event_of(events));
        w.u64(events.len() as u64);
    });
    out.chunk(CHUNK_SCHED_EVENTS, |w| {
        for event in events {
            let (kind, arg) = event.kind.to_raw();
            w.u32(kind);
            w.u32(arg);
            w.u64(event.at);
            w.u64(event.period);
            w.u8(event.repeat as u8);
            w.u8(event.active as u8);
            w.pad(2);
        }
    });

    out.chunk(CHUNK_MEMORY_META, |w| write_memory_meta(gg, w));

    out.region_chunk(CHUNK_EWRAM, &gg.memory.ewram);
    out.region_chunk(CHUNK_IWRAM, &gg.memory.iwram);
    out.region_chunk(CHUNK_VRAM, &gg.ppu.vram);
    out.region_chunk(CHUNK_PALETTE, &gg.ppu.palette);
    out.region_chunk(CHUNK_OAM, &gg.ppu.oam);

    let backup = gg.cart.backup.data.lock().unwrap();
    if !backup.is_empty() {
        let dirty = gg.cart.backup.dirty.load(Ordering::Acquire);
        out.chunk(CHUNK_BACKUP, |w| {
            w.u64(backup.len() as u64);
            w.u8(dirty as u8);
            w.pad(7);
            w.region_payload(&backup);
        });
    }

    out.buf
}

/// Restore a state produced by [`save`]. The current ROM view is kept.
pub fn load(gg: &mut Ember, data: &[u8]) -> Result<()> {
    let mut r = Reader::new(data);
    if data.len() < 16 || r.bytes(4)? != MAGIC {
        // Also covers the deprecated unversioned flat format, which
        // serialized raw structs and cannot be restored portably.
        return Err(LoadStateError::BadMagic);
    }
    let version = r.u32()?;
    if version != VERSION {
        return Err(LoadStateError::UnsupportedVersion(version));
    }
    if r.u32()? != gg.cart.rom.len() as u32 || r.u32()? != gg.cart.rom_code() {
        return Err(LoadStateError::RomMismatch);
    }

    // From here on the console mutates; failures leave it for a reset.
    gg.scheduler.clear();
    gg.timers.scheduled = [None; 4];

    let mut seen = [false; 15];
    let mut sched_header: Option<(u64, u64)> = None;
    let mut sched_len = 0u64;
    let mut events: Vec<Event> = Vec::new();

    while !r.at_end() {
        let kind = r.u32()?;
        let size = r.u32()? as usize;
        let mut chunk = r.sub(size)?;

        match kind {
            CHUNK_CPU => read_cpu(gg, &mut chunk)?,
            CHUNK_IO => read_io(gg, &mut chunk)?,
            CHUNK_PPU => read_ppu(gg, &mut chunk)?,
            CHUNK_GPIO => read_gpio(gg, &mut chunk)?,
            CHUNK_APU => read_apu(gg, &mut chunk)?,
            CHUNK_SCHEDULER => {
                let cycles = chunk.u64()?;
                let _next = chunk.u64()?;
                sched_len = chunk.u64()?;
                sched_header = Some((cycles, _next));
            }
            CHUNK_SCHED_EVENTS => {
                if size % 28 != 0 {
                    return Err(LoadStateError::BadChunk("scheduler events"));
                }
                for _ in 0..size / 28 {
                    let kind = chunk.u32()?;
                    let arg = chunk.u32()?;
                    let at = chunk.u64()?;
                    let period = chunk.u64()?;
                    let repeat = chunk.u8()? != 0;
                    let active = chunk.u8()? != 0;
                    chunk.skip(2)?;
                    let kind = EventKind::from_raw(kind, arg)
                        .ok_or(LoadStateError::BadChunk("scheduler events"))?;
                    events.push(Event::from_parts(kind, at, period, repeat, active));
                }
            }
            CHUNK_MEMORY_META => read_memory_meta(gg, &mut chunk)?,
            CHUNK_EWRAM => read_region(&mut chunk, &mut gg.memory.ewram)?,
            CHUNK_IWRAM => read_region(&mut chunk, &mut gg.memory.iwram)?,
            CHUNK_VRAM => read_region(&mut chunk, &mut gg.ppu.vram)?,
            CHUNK_PALETTE => read_region(&mut chunk, &mut gg.ppu.palette)?,
            CHUNK_OAM => read_region(&mut chunk, &mut gg.ppu.oam)?,
            CHUNK_BACKUP => {
                let len = chunk.u64()? as usize;
                let dirty = chunk.u8()? != 0;
                chunk.skip(7)?;
                let mut data = vec![0; len];
                read_region_payload(&mut chunk, &mut data)?;
                *gg.cart.backup.data.lock().unwrap() = data;
                gg.cart.backup.dirty.store(dirty, Ordering::Release);
                seen[CHUNK_BACKUP as usize] = true;
            }
            _ => {
                log::debug!(target: "save", "skipping unknown chunk kind {kind}");
            }
        }
        if (kind as usize) < seen.len() {
            seen[kind as usize] = true;
        }
    }

    const MANDATORY: [(u32, &str); 12] = [
        (CHUNK_CPU, "cpu"),
        (CHUNK_IO, "io"),
        (CHUNK_PPU, "ppu"),
        (CHUNK_GPIO, "gpio"),
        (CHUNK_APU, "apu"),
        (CHUNK_SCHEDULER, "scheduler"),
        (CHUNK_MEMORY_META, "memory metadata"),
        (CHUNK_EWRAM, "ewram"),
        (CHUNK_IWRAM, "iwram"),
        (CHUNK_VRAM, "vram"),
        (CHUNK_PALETTE, "palette"),
        (CHUNK_OAM, "oam"),
    ];
    for (kind, name) in MANDATORY {
        if !seen[kind as usize] {
            return Err(LoadStateError::MissingChunk(name));
        }
    }

    let (cycles, _next) = sched_header.unwrap();
    if sched_len != events.len() as u64 {
        return Err(LoadStateError::EventCountMismatch);
    }
    gg.scheduler.restore(cycles, events);

    if !seen[CHUNK_BACKUP as usize] {
        gg.cart.backup.dirty.store(false, Ordering::Release);
    }

    // Rebuild the derived bus state from the restored register file.
    gg.update_wait_times();
    Ok(())
}

fn next_event_of(events: &[Event]) -> u64 {
    events
        .iter()
        .filter(|e| e.active)
        .map(|e| e.at)
        .min()
        .unwrap_or(u64::MAX)
}

fn write_cpu(gg: &Ember, w: &mut Writer) {
    let cpu = &gg.cpu;
    for reg in cpu.low {
        w.u32(reg);
    }
    for fiq in cpu.fiqs {
        w.u32(fiq.reg);
        w.u32(fiq.fiq);
    }
    for bank in [&cpu.sp, &cpu.lr, &cpu.spsr] {
        for reg in bank.iter() {
            w.u32(*reg);
        }
    }
    w.u32(cpu.pc);
    w.u32(cpu.cpsr);
    w.u32(cpu.pipeline[0]);
    w.u32(cpu.pipeline[1]);
    w.u8(matches!(cpu.access_type, crate::memory::Access::Seq) as u8);
    w.u8(cpu.halted as u8);
    w.pad(2);
}

fn read_cpu(gg: &mut Ember, r: &mut Reader) -> Result<()> {
    let cpu = &mut gg.cpu;
    for reg in &mut cpu.low {
        *reg = r.u32()?;
    }
    for fiq in &mut cpu.fiqs {
        fiq.reg = r.u32()?;
        fiq.fiq = r.u32()?;
    }
    for bank in [&mut cpu.sp, &mut cpu.lr, &mut cpu.spsr] {
        for reg in bank.iter_mut() {
            *reg = r.u32()?;
        }
    }
    cpu.pc = r.u32()?;
    cpu.cpsr = r.u32()?;
    cpu.pipeline[0] = r.u32()?;
    cpu.pipeline[1] = r.u32()?;
    cpu.access_type = if r.u8()? != 0 {
        crate::memory::Access::Seq
    } else {
        crate::memory::Access::NonSeq
    };
    cpu.halted = r.u8()? != 0;
    r.skip(2)?;
    r.done("cpu")
}

fn write_io(gg: &Ember, w: &mut Writer) {
    for value in gg.memory.mmio {
        w.u16(value);
    }
    // Internal DMA and timer registers live in the hardware's register
    // block and belong to this chunk.
    for i in 0..4 {
        w.u32(gg.dma.src[i]);
    }
    for i in 0..4 {
        w.u32(gg.dma.dst[i]);
    }
    w.u32(gg.dma.cache);
    w.u16(gg.dma.running);
    for pending in gg.dma.pending {
        w.u8(match pending {
            None => 0xFF,
            Some(reason) => reason as u8,
        });
    }
    w.pad(2);
    for i in 0..4 {
        w.u16(gg.timers.reload[i]);
    }
    for i in 0..4 {
        w.u16(gg.timers.counters[i]);
    }
    for i in 0..4 {
        w.u64(gg.timers.start[i]);
    }
    for handle in gg.timers.scheduled {
        w.u32(handle.map_or(u32::MAX, |h| h.0));
    }
}

fn read_io(gg: &mut Ember, r: &mut Reader) -> Result<()> {
    for value in &mut gg.memory.mmio {
        *value = r.u16()?;
    }
    for i in 0..4 {
        gg.dma.src[i] = r.u32()?;
    }
    for i in 0..4 {
        gg.dma.dst[i] = r.u32()?;
    }
    gg.dma.cache = r.u32()?;
    gg.dma.running = r.u16()?;
    for pending in &mut gg.dma.pending {
        *pending = match r.u8()? {
            0 => Some(crate::dma::DmaReason::CtrlWrite),
            1 => Some(crate::dma::DmaReason::HBlank),
            2 => Some(crate::dma::DmaReason::VBlank),
            3 => Some(crate::dma::DmaReason::Fifo),
            4 => Some(crate::dma::DmaReason::Special),
            _ => None,
        };
    }
    r.skip(2)?;
    for i in 0..4 {
        gg.timers.reload[i] = r.u16()?;
    }
    for i in 0..4 {
        gg.timers.counters[i] = r.u16()?;
    }
    for i in 0..4 {
        gg.timers.start[i] = r.u64()?;
    }
    for handle in &mut gg.timers.scheduled {
        let raw = r.u32()?;
        *handle = (raw != u32::MAX).then_some(EventHandle(raw));
    }
    r.done("io")
}

fn write_ppu(gg: &Ember, w: &mut Writer) {
    for value in gg.ppu.ref_x.iter().chain(gg.ppu.ref_y.iter()) {
        w.u32(*value as u32);
    }
    w.u8(gg.ppu.reload_affine as u8);
    w.u8(gg.ppu.skip_current_frame as u8);
    w.u8(gg.ppu.frame_skip_ctr);
    w.u8(gg.ppu.video_capture as u8);
}

fn read_ppu(gg: &mut Ember, r: &mut Reader) -> Result<()> {
    gg.ppu.ref_x[0] = r.u32()? as i32;
    gg.ppu.ref_x[1] = r.u32()? as i32;
    gg.ppu.ref_y[0] = r.u32()? as i32;
    gg.ppu.ref_y[1] = r.u32()? as i32;
    gg.ppu.reload_affine = r.u8()? != 0;
    gg.ppu.skip_current_frame = r.u8()? != 0;
    gg.ppu.frame_skip_ctr = r.u8()?;
    gg.ppu.video_capture = r.u8()? != 0;
    r.done("ppu")
}

fn write_gpio(gg: &Ember, w: &mut Writer) {
    let gpio = &gg.cart.gpio;
    w.u8(match gpio.device_type() {
        GpioDeviceType::None => 0,
        GpioDeviceType::Rtc => 1,
    });
    w.u8(gpio.data);
    w.u8(gpio.direction);
    w.u8(gpio.control);

    let rtc = match &gpio.device {
        GpioDevice::Rtc(rtc) => rtc.clone(),
        GpioDevice::None => Rtc::default(),
    };
    w.u8(rtc.control);
    w.bytes(&rtc.datetime);
    w.u8(rtc.selected as u8);
    w.u8(rtc.sck as u8);
    w.u8(rtc.in_count);
    w.u8(rtc.in_expected);
    w.u8(rtc.command);
    w.u8(rtc.out_count);
    w.u8(rtc.sio_out as u8);
    w.pad(1);
    w.u64(rtc.in_buffer);
    w.u64(rtc.out_buffer);
}

fn read_gpio(gg: &mut Ember, r: &mut Reader) -> Result<()> {
    let device = r.u8()?;
    let mut gpio = Gpio::new(match device {
        1 => GpioDeviceType::Rtc,
        _ => GpioDeviceType::None,
    });
    gpio.data = r.u8()?;
    gpio.direction = r.u8()?;
    gpio.control = r.u8()?;

    let mut rtc = Rtc {
        control: r.u8()?,
        ..Rtc::default()
    };
    for slot in &mut rtc.datetime {
        *slot = r.u8()?;
    }
    rtc.selected = r.u8()? != 0;
    rtc.sck = r.u8()? != 0;
    rtc.in_count = r.u8()?;
    rtc.in_expected = r.u8()?;
    rtc.command = r.u8()?;
    rtc.out_count = r.u8()?;
    rtc.sio_out = r.u8()? != 0;
    r.skip(1)?;
    rtc.in_buffer = r.u64()?;
    rtc.out_buffer = r.u64()?;

    if let GpioDevice::Rtc(slot) = &mut gpio.device {
        *slot = rtc;
    }
    gg.cart.gpio = gpio;
    r.done("gpio")
}

fn write_apu(gg: &Ember, w: &mut Writer) {
    w.u8(gg.apu.current[0] as u8);
    w.u8(gg.apu.current[1] as u8);
    w.pad(2);
    for fifo in [&gg.apu.fifo_a, &gg.apu.fifo_b] {
        w.u32(fifo.len() as u32);
        let mut bytes = [0u8; crate::apu::FIFO_LEN];
        for (dst, sample) in bytes.iter_mut().zip(fifo.iter()) {
            *dst = *sample as u8;
        }
        w.bytes(&bytes);
    }
}

fn read_apu(gg: &mut Ember, r: &mut Reader) -> Result<()> {
    gg.apu.current[0] = r.u8()? as i8;
    gg.apu.current[1] = r.u8()? as i8;
    r.skip(2)?;
    for fifo in [&mut gg.apu.fifo_a, &mut gg.apu.fifo_b] {
        let len = r.u32()? as usize;
        if len > crate::apu::FIFO_LEN {
            return Err(LoadStateError::BadChunk("apu"));
        }
        let bytes = r.bytes(crate::apu::FIFO_LEN)?;
        fifo.clear();
        for byte in &bytes[..len] {
            let _ = fifo.try_push(*byte as i8);
        }
    }
    r.done("apu")
}

fn write_memory_meta(gg: &Ember, w: &mut Writer) {
    let (backup_type, flash, bank, eeprom) = match &gg.cart.save_type {
        SaveType::None => (0u32, FlashState::default(), 0, None),
        SaveType::Sram => (1, FlashState::default(), 0, None),
        SaveType::Flash64(state) => (2, *state, 0, None),
        SaveType::Flash128 { state, bank } => (3, *state, *bank, None),
        SaveType::Eeprom(chip) => (4, FlashState::default(), 0, Some(chip.clone())),
    };

    w.u32(backup_type);
    w.u8(match flash.command_stage {
        None => 0,
        Some(FlashCmdStage::FirstWritten) => 1,
        Some(FlashCmdStage::SecondWritten) => 2,
    });
    w.u8(match flash.mode {
        FlashMode::Regular => 0,
        FlashMode::Write => 1,
        FlashMode::Id => 2,
        FlashMode::Erase => 3,
        FlashMode::BankSelect => 4,
    });
    w.u8(bank);
    w.pad(1);

    let eeprom = eeprom.unwrap_or_else(|| Eeprom::new(None, gg.cart.rom.len()));
    w.u8(eeprom.size_bits.map_or(0, |b| b as u8));
    w.u8(match eeprom.command {
        EepromCmd::Idle => 0,
        EepromCmd::Read => 1,
        EepromCmd::Write => 2,
    });
    w.pad(2);
    w.u32(eeprom.recv_count);
    w.u64(eeprom.recv_buffer as u64);
    w.u64((eeprom.recv_buffer >> 64) as u64);
    w.u32(eeprom.send_count);
    w.u64(eeprom.send_buffer as u64);
    w.u64((eeprom.send_buffer >> 64) as u64);

    let pf = &gg.memory.prefetch;
    w.u8(pf.enabled as u8);
    w.pad(3);
    w.u32(pf.head);
    w.u32(pf.tail);
    w.u32(pf.countdown);
    w.u32(pf.reload);
    w.u32(pf.insn_len);
    w.u32(pf.size);
    w.u32(pf.capacity);

    w.u32(gg.memory.bios_bus);
    w.u32(gg.memory.dma_bus);
    w.u8(gg.memory.last_access_from_dma as u8);
    w.u8(gg.memory.cart_bus_busy as u8);
    w.u8(gg.dma.any_running() as u8);
    w.pad(1);
}

fn read_memory_meta(gg: &mut Ember, r: &mut Reader) -> Result<()> {
    let backup_type = r.u32()?;
    let stage = match r.u8()? {
        0 => None,
        1 => Some(FlashCmdStage::FirstWritten),
        2 => Some(FlashCmdStage::SecondWritten),
        _ => return Err(LoadStateError::BadChunk("memory metadata")),
    };
    let mode = match r.u8()? {
        0 => FlashMode::Regular,
        1 => FlashMode::Write,
        2 => FlashMode::Id,
        3 => FlashMode::Erase,
        4 => FlashMode::BankSelect,
        _ => return Err(LoadStateError::BadChunk("memory metadata")),
    };
    let bank = r.u8()?;
    r.skip(1)?;
    let flash = FlashState {
        command_stage: stage,
        mode,
    };

    let size_bits = match r.u8()? {
        0 => None,
        6 => Some(6),
        14 => Some(14),
        _ => return Err(LoadStateError::BadChunk("memory metadata")),
    };
    let command = match r.u8()? {
        0 => EepromCmd::Idle,
        1 => EepromCmd::Read,
        2 => EepromCmd::Write,
        _ => return Err(LoadStateError::BadChunk("memory metadata")),
    };
    r.skip(2)?;
    let mut eeprom = Eeprom::new(size_bits, gg.cart.rom.len());
    eeprom.command = command;
    eeprom.recv_count = r.u32()?;
    eeprom.recv_buffer = r.u64()? as u128 | ((r.u64()? as u128) << 64);
    eeprom.send_count = r.u32()?;
    eeprom.send_buffer = r.u64()? as u128 | ((r.u64()? as u128) << 64);

    gg.cart.save_type = match backup_type {
        0 => SaveType::None,
        1 => SaveType::Sram,
        2 => SaveType::Flash64(flash),
        3 => SaveType::Flash128 { state: flash, bank },
        4 => SaveType::Eeprom(eeprom),
        _ => return Err(LoadStateError::BadChunk("memory metadata")),
    };

    let pf = &mut gg.memory.prefetch;
    pf.enabled = r.u8()? != 0;
    r.skip(3)?;
    pf.head = r.u32()?;
    pf.tail = r.u32()?;
    pf.countdown = r.u32()?;
    pf.reload = r.u32()?;
    pf.insn_len = r.u32()?;
    pf.size = r.u32()?;
    pf.capacity = r.u32()?;

    gg.memory.bios_bus = r.u32()?;
    gg.memory.dma_bus = r.u32()?;
    gg.memory.last_access_from_dma = r.u8()? != 0;
    gg.memory.cart_bus_busy = r.u8()? != 0;
    let _dma_active = r.u8()?;
    r.skip(1)?;
    r.done("memory metadata")
}

fn read_region(r: &mut Reader, region: &mut MemRegion) -> Result<()> {
    let mut buf = vec![0; region.size()];
    read_region_payload(r, &mut buf)?;
    region.load_from(&buf);
    r.done("region")
}

fn read_region_payload(r: &mut Reader, dst: &mut [u8]) -> Result<()> {
    let decoded_size = r.u32()? as usize;
    let encoding = r.u8()?;
    r.skip(3)?;
    if decoded_size != dst.len() {
        return Err(LoadStateError::BadChunk("region"));
    }

    match encoding {
        ENCODING_RAW => {
            let bytes = r.bytes(decoded_size)?;
            dst.copy_from_slice(bytes);
            Ok(())
        }
        ENCODING_RLE => {
            let mut produced = 0;
            while produced < decoded_size {
                let run = r.u16()? as usize;
                let value = r.u8()?;
                if run == 0 || run > decoded_size - produced {
                    return Err(LoadStateError::BadChunk("region"));
                }
                dst[produced..produced + run].fill(value);
                produced += run;
            }
            Ok(())
        }
        _ => Err(LoadStateError::BadChunk("region")),
    }
}

/// Encode a byte buffer as `{run_len u16, value u8}` pairs.
fn encode_rle(data: &[u8], out: &mut Vec<u8>) {
    let mut i = 0;
    while i < data.len() {
        let value = data[i];
        let mut run = 1usize;
        while i + run < data.len() && data[i + run] == value && run < u16::MAX as usize {
            run += 1;
        }
        out.extend_from_slice(&(run as u16).to_le_bytes());
        out.push(value);
        i += run;
    }
}

#[derive(Default)]
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, value: u8) {
        self.buf.push(value);
    }
    fn u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }
    fn u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }
    fn u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }
    fn bytes(&mut self, value: &[u8]) {
        self.buf.extend_from_slice(value);
    }
    fn pad(&mut self, count: usize) {
        self.buf.extend(std::iter::repeat(0).take(count));
    }

    /// Write a `{kind, size, payload}` chunk, sizing it after the fact.
    fn chunk(&mut self, kind: u32, body: impl FnOnce(&mut Writer)) {
        self.u32(kind);
        let size_at = self.buf.len();
        self.u32(0);
        body(self);
        let size = (self.buf.len() - size_at - 4) as u32;
        self.buf[size_at..size_at + 4].copy_from_slice(&size.to_le_bytes());
    }

    /// Write a region payload, run-length encoded when that is a strict
    /// win.
    fn region_payload(&mut self, data: &[u8]) {
        let mut rle = Vec::new();
        encode_rle(data, &mut rle);

        self.u32(data.len() as u32);
        if !rle.is_empty() && rle.len() < data.len() {
            self.u8(ENCODING_RLE);
            self.pad(3);
            self.bytes(&rle);
        } else {
            self.u8(ENCODING_RAW);
            self.pad(3);
            self.bytes(data);
        }
    }

    fn region_chunk(&mut self, kind: u32, region: &MemRegion) {
        let mut data = vec![0; region.size()];
        region.copy_to(&mut data);
        self.chunk(kind, |w| w.region_payload(&data));
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        if self.pos + count > self.buf.len() {
            return Err(LoadStateError::Truncated);
        }
        let out = &self.buf[self.pos..self.pos + count];
        self.pos += count;
        Ok(out)
    }

    fn skip(&mut self, count: usize) -> Result<()> {
        self.bytes(count).map(|_| ())
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }
    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.bytes(2)?.try_into().unwrap()))
    }
    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.bytes(4)?.try_into().unwrap()))
    }
    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.bytes(8)?.try_into().unwrap()))
    }

    /// Split off a sub-reader over the next `count` bytes; chunk payloads
    /// are bounded by their declared size this way.
    fn sub(&mut self, count: usize) -> Result<Reader<'a>> {
        Ok(Reader::new(self.bytes(count)?))
    }

    /// Assert a fixed-size chunk was consumed exactly.
    fn done(&self, name: &'static str) -> Result<()> {
        if self.at_end() {
            Ok(())
        } else {
            Err(LoadStateError::BadChunk(name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rle_round_trip() {
        let data = [0u8; 300]
            .iter()
            .chain([1, 2, 3].iter())
            .chain([7u8; 70000].iter())
            .copied()
            .collect::<Vec<_>>();

        let mut encoded = Vec::new();
        encode_rle(&data, &mut encoded);

        // Runs cap at 65535, so the long run splits in two.
        let mut payload = Vec::new();
        payload.extend_from_slice(&(data.len() as u32).to_le_bytes());
        payload.push(ENCODING_RLE);
        payload.extend_from_slice(&[0; 3]);
        payload.extend_from_slice(&encoded);

        let mut out = vec![0xAA; data.len()];
        read_region_payload(&mut Reader::new(&payload), &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn rle_rejects_overrun() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&4u32.to_le_bytes());
        payload.push(ENCODING_RLE);
        payload.extend_from_slice(&[0; 3]);
        // A run of 9 into a 4-byte region.
        payload.extend_from_slice(&9u16.to_le_bytes());
        payload.push(0x55);

        let mut out = [0u8; 4];
        let err = read_region_payload(&mut Reader::new(&payload), &mut out).unwrap_err();
        assert_eq!(err, LoadStateError::BadChunk("region"));
    }

    #[test]
    fn truncated_reader_errors() {
        let mut r = Reader::new(&[1, 2, 3]);
        assert!(r.u16().is_ok());
        assert_eq!(r.u16().unwrap_err(), LoadStateError::Truncated);
    }
}
