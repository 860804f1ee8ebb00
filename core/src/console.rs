// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

//! The console façade: owns every subsystem and runs the emulation loop.

use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::{
    apu::Apu,
    cart::Cartridge,
    common::{LaunchError, Settings},
    cpu::Cpu,
    dma::Dmas,
    memory::{Memory, BIOS_SIZE},
    message::{LaunchConfig, Message, SharedData},
    ppu::Ppu,
    savestate,
    scheduler::{EventKind, Scheduler},
    timer::Timers,
    Colour, CPU_CLOCK,
};

/// Scanline sink, fed every composed visible row from the emulation
/// thread. The callback must not call back into the console.
pub type VideoSink = Box<dyn FnMut(u32, &[Colour]) + Send>;

/// Console struct. Contains all state and is used for system emulation.
pub struct Ember {
    pub cpu: Cpu,
    pub memory: Memory,
    pub ppu: Ppu,
    pub apu: Apu,
    pub dma: Dmas,
    pub timers: Timers,
    pub cart: Cartridge,
    pub scheduler: Scheduler,

    pub settings: Settings,
    pub shared: Arc<SharedData>,
    pub video_sink: Option<VideoSink>,

    inbox: Receiver<Message>,
    running: bool,
    launched: bool,
    exit: bool,
}

impl Ember {
    /// Create a console publishing into `shared`. The returned sender is
    /// the front-end's half of the inbox.
    pub fn new(shared: Arc<SharedData>) -> (Self, Sender<Message>) {
        let (tx, inbox) = unbounded();
        let gg = Self {
            cpu: Cpu::default(),
            memory: Memory::default(),
            ppu: Ppu::default(),
            apu: Apu::default(),
            dma: Dmas::default(),
            timers: Timers::default(),
            cart: Cartridge::default(),
            scheduler: Scheduler::default(),
            settings: Settings::default(),
            shared,
            video_sink: None,
            inbox,
            running: false,
            launched: false,
            exit: false,
        };
        (gg, tx)
    }

    /// The emulation loop. Blocks on the inbox while idle; while running,
    /// drains it between instructions and never blocks.
    pub fn run(&mut self) {
        while !self.exit {
            if !self.running {
                match self.inbox.recv() {
                    Ok(msg) => self.handle_message(msg),
                    Err(_) => break,
                }
                continue;
            }

            while let Ok(msg) = self.inbox.try_recv() {
                self.handle_message(msg);
            }
            if self.running && !self.exit {
                self.advance();
            }
        }
        log::info!(target: "core", "emulation loop exited");
    }

    /// Step forward by one instruction (or to the next event while
    /// halted), then dispatch everything that came due.
    pub fn advance(&mut self) {
        if self.cpu.halted {
            let until = self.scheduler.next_event().saturating_sub(self.scheduler.now());
            self.add_i_cycles(until.min(u32::MAX as u64) as u32);
        } else {
            Cpu::exec_next_inst(self);
        }
        self.dispatch_events();
    }

    /// Drain due events. Pop first, then dispatch: handlers are free to
    /// schedule and cancel.
    fn dispatch_events(&mut self) {
        while let Some(event) = self.scheduler.pop_due() {
            event.kind.dispatch(self, event.late_by);
        }
    }

    fn handle_message(&mut self, msg: Message) {
        match msg {
            Message::Reset(config) => {
                if let Err(err) = self.launch(*config) {
                    log::error!(target: "core", "reset rejected: {err}");
                }
            }
            Message::Run => {
                if self.launched {
                    self.running = true;
                } else {
                    log::warn!(target: "core", "run requested before a successful reset");
                }
            }
            Message::Exit => self.exit = true,
            Message::Key { button, pressed } => self.set_button(button, pressed),
            Message::LoadState(state) => {
                if let Err(err) = savestate::load(self, &state) {
                    log::error!(target: "save", "state load failed: {err}");
                }
            }
            Message::SaveState(reply) => {
                let _ = reply.send(savestate::save(self));
            }
            Message::UpdateSettings(settings) => {
                self.settings = settings;
                self.update_wait_times();
            }
        }
    }

    /// Power-cycle into the given configuration. On failure the console is
    /// left at power-on zero state and stays idle.
    pub fn launch(&mut self, config: LaunchConfig) -> Result<(), LaunchError> {
        self.running = false;
        self.launched = false;

        if config.rom.len() < 0xC0 || config.rom.len() > 32 * 1024 * 1024 {
            return Err(LaunchError::BadRom);
        }
        let bios = match config.bios {
            Some(bios) if bios.len() <= BIOS_SIZE => {
                let mut padded = bios;
                padded.resize(BIOS_SIZE, 0);
                padded
            }
            Some(_) => return Err(LaunchError::BadRom),
            None if config.skip_bios => vec![0; BIOS_SIZE],
            None => return Err(LaunchError::MissingBios),
        };

        self.cpu = Cpu::default();
        self.memory = Memory::default();
        self.ppu = Ppu::default();
        self.apu = Apu::default();
        self.dma = Dmas::default();
        self.timers = Timers::default();
        self.scheduler.clear();
        self.settings = config.settings;

        self.memory.bios = bios;
        let backup = self.shared.backup.clone();
        self.cart
            .load(config.rom, config.backup_type, config.gpio_device, backup);

        // Power-on register values the zero file does not cover.
        self[crate::addr::KEYINPUT] = 0x3FF;

        self.update_wait_times();
        Ppu::schedule_events(self);
        if self.cart.gpio.device_type() == crate::cart::gpio::GpioDeviceType::Rtc {
            self.scheduler
                .schedule_repeating(EventKind::RtcTick, CPU_CLOCK as i64, CPU_CLOCK as u64);
        }

        if config.skip_bios {
            // The boot code would leave this register state behind.
            self.cpu.cpsr = 0x1F;
            self.set_pc(0x0800_0000);
        } else {
            self.set_pc(0x0000_0000);
        }

        log::info!(
            target: "core",
            "launched \"{}\" ({}), backup {:?}",
            self.cart.title(),
            self.cart.game_code(),
            self.cart.save_type.backup_type(),
        );
        self.launched = true;
        Ok(())
    }

    /// Whether the run loop is currently in the running state.
    pub fn is_running(&self) -> bool {
        self.running
    }
}
