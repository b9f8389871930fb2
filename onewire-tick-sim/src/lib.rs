//! # onewire-tick-sim
//! A slot-level simulation of a 1-Wire bus for exercising
//! [`onewire_tick::OneWire`] without hardware.
//!
//! [`SimBus`] owns a virtual line, a virtual slot timer and any number of
//! slave devices. The master side plugs straight into the driver:
//! [`SimBus::pin`] yields an `embedded-hal` pin and [`SimBus::timer`] a
//! [`SlotTimer`], both views of the same shared bus. Virtual time advances
//! by one programmed timer period per [`SimBus::step`]; [`pump`] runs the
//! step/tick loop until the in-flight operation settles.
//!
//! Slaves decode the master's low pulses by duration, the way real devices
//! recover timing from the line: a long low is a reset or a written 0, a
//! short low is a written 1 or a read slot, and a slave sourcing a 0 keeps
//! the line low past the master's sample point. Devices answer the ROM
//! commands (READ, SKIP, MATCH, SEARCH, alarm search) and carry a
//! scratchpad behind [`WRITE_SCRATCHPAD_CMD`] / [`READ_SCRATCHPAD_CMD`],
//! which is enough surface to drive every code path of the master.

#![deny(missing_docs)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::rc::Rc;

use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use onewire_tick::{OneWire, SlotTimer, consts, crc8};

/// Function command storing the following written bytes in a slave's
/// scratchpad.
pub const WRITE_SCRATCHPAD_CMD: u8 = 0x4e;

/// Function command streaming a slave's scratchpad back to the master.
pub const READ_SCRATCHPAD_CMD: u8 = 0xbe;

// Device-side timing interpretation, in simulated ticks (microseconds at
// the standard profile).
const RESET_MIN: u64 = 400;
const SHORT_MAX: u64 = 25;
const OUT_HOLD: u64 = 30;
const PRESENCE_FROM: u64 = 20;
const PRESENCE_UNTIL: u64 = 180;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TripletStep {
    Id,
    Complement,
    Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlaveState {
    /// Ignoring the line until the next reset pulse.
    Dormant,
    /// Collecting the ROM command byte.
    RomCommand,
    /// Comparing the 64 addressed bits against our ROM.
    MatchRom,
    /// Serving triplets for a search pass.
    Search(TripletStep),
    /// Collecting the function command byte.
    Function,
    /// Storing written bytes into the scratchpad.
    Store,
    /// Sourcing queued bits into the master's read slots.
    Emit,
}

struct Slave {
    rom: [u8; 8],
    alarmed: bool,
    state: SlaveState,
    /// Bit cursor shared by the MATCH ROM compare and the search pass.
    bit_pos: usize,
    shift: u8,
    shift_bits: u8,
    out: VecDeque<bool>,
    scratch: Vec<u8>,
    holding_low_until: u64,
    presence_from: u64,
    presence_until: u64,
}

impl Slave {
    fn new(rom: [u8; 8], alarmed: bool) -> Self {
        Self {
            rom,
            alarmed,
            state: SlaveState::Dormant,
            bit_pos: 0,
            shift: 0,
            shift_bits: 0,
            out: VecDeque::new(),
            scratch: Vec::new(),
            holding_low_until: 0,
            presence_from: 0,
            presence_until: 0,
        }
    }

    fn rom_bit(&self, pos: usize) -> bool {
        self.rom[pos / 8] & (1 << (pos % 8)) != 0
    }

    fn pulls_low(&self, now: u64) -> bool {
        now < self.holding_low_until || (now >= self.presence_from && now < self.presence_until)
    }

    fn on_reset(&mut self, released_at: u64) {
        self.presence_from = released_at + PRESENCE_FROM;
        self.presence_until = released_at + PRESENCE_UNTIL;
        self.state = SlaveState::RomCommand;
        self.bit_pos = 0;
        self.shift = 0;
        self.shift_bits = 0;
        self.out.clear();
        self.holding_low_until = 0;
        log::debug!("slave {:02x?}: reset seen, presence scheduled", self.rom);
    }

    /// React to one master-driven low pulse. `short` distinguishes write-1
    /// and read slots from write-0 slots; `fell_at` anchors our own hold on
    /// the line when we source a 0.
    fn on_slot(&mut self, short: bool, fell_at: u64) {
        match self.state {
            SlaveState::Dormant => {}
            SlaveState::RomCommand => {
                if let Some(cmd) = self.shift_in(short) {
                    self.dispatch_rom_cmd(cmd);
                }
            }
            SlaveState::MatchRom => {
                if short != self.rom_bit(self.bit_pos) {
                    self.deselect("rom mismatch");
                } else {
                    self.bit_pos += 1;
                    if self.bit_pos == 64 {
                        self.state = SlaveState::Function;
                    }
                }
            }
            SlaveState::Search(step) => self.on_search_slot(step, short, fell_at),
            SlaveState::Function => {
                if let Some(cmd) = self.shift_in(short) {
                    self.dispatch_fn_cmd(cmd);
                }
            }
            SlaveState::Store => {
                if let Some(byte) = self.shift_in(short) {
                    self.scratch.push(byte);
                }
            }
            SlaveState::Emit => {
                if short {
                    if let Some(bit) = self.out.pop_front() {
                        if !bit {
                            self.holding_low_until = fell_at + OUT_HOLD;
                        }
                    }
                }
            }
        }
    }

    fn on_search_slot(&mut self, step: TripletStep, short: bool, fell_at: u64) {
        let own = self.rom_bit(self.bit_pos);
        match step {
            TripletStep::Id => {
                if !own {
                    self.holding_low_until = fell_at + OUT_HOLD;
                }
                self.state = SlaveState::Search(TripletStep::Complement);
            }
            TripletStep::Complement => {
                if own {
                    self.holding_low_until = fell_at + OUT_HOLD;
                }
                self.state = SlaveState::Search(TripletStep::Direction);
            }
            TripletStep::Direction => {
                if short != own {
                    self.deselect("search branch left us behind");
                } else {
                    self.bit_pos += 1;
                    self.state = if self.bit_pos == 64 {
                        SlaveState::Function
                    } else {
                        SlaveState::Search(TripletStep::Id)
                    };
                }
            }
        }
    }

    /// Assemble master-written bits into bytes, least-significant first.
    fn shift_in(&mut self, bit: bool) -> Option<u8> {
        self.shift >>= 1;
        if bit {
            self.shift |= 0x80;
        }
        self.shift_bits += 1;
        if self.shift_bits < 8 {
            return None;
        }
        let byte = self.shift;
        self.shift = 0;
        self.shift_bits = 0;
        Some(byte)
    }

    fn dispatch_rom_cmd(&mut self, cmd: u8) {
        log::debug!("slave {:02x?}: rom command {cmd:#04x}", self.rom);
        match cmd {
            consts::READ_ROM_CMD => {
                let rom = self.rom;
                self.load_out(&rom);
                self.state = SlaveState::Emit;
            }
            consts::SKIP_ROM_CMD => self.state = SlaveState::Function,
            consts::MATCH_ROM_CMD => {
                self.bit_pos = 0;
                self.state = SlaveState::MatchRom;
            }
            consts::SEARCH_ROM_CMD => {
                self.bit_pos = 0;
                self.state = SlaveState::Search(TripletStep::Id);
            }
            consts::ALARM_SEARCH_CMD => {
                if self.alarmed {
                    self.bit_pos = 0;
                    self.state = SlaveState::Search(TripletStep::Id);
                } else {
                    self.deselect("not alarmed");
                }
            }
            _ => self.deselect("unknown rom command"),
        }
    }

    fn dispatch_fn_cmd(&mut self, cmd: u8) {
        log::debug!("slave {:02x?}: function command {cmd:#04x}", self.rom);
        match cmd {
            WRITE_SCRATCHPAD_CMD => {
                self.scratch.clear();
                self.state = SlaveState::Store;
            }
            READ_SCRATCHPAD_CMD => {
                let bytes = self.scratch.clone();
                self.load_out(&bytes);
                self.state = SlaveState::Emit;
            }
            _ => self.deselect("unknown function command"),
        }
    }

    fn load_out(&mut self, bytes: &[u8]) {
        self.out.clear();
        for &byte in bytes {
            for bit in 0..8 {
                self.out.push_back(byte & (1 << bit) != 0);
            }
        }
    }

    fn deselect(&mut self, why: &str) {
        log::debug!("slave {:02x?}: deselected ({why})", self.rom);
        self.state = SlaveState::Dormant;
    }
}

struct Inner {
    now: u64,
    period: u32,
    running: bool,
    master_low: bool,
    fell_at: u64,
    held_low: bool,
    pin_ops: usize,
    resets: usize,
    slaves: Vec<Slave>,
}

impl Inner {
    fn new() -> Self {
        Self {
            now: 0,
            period: 0,
            running: false,
            master_low: false,
            fell_at: 0,
            held_low: false,
            pin_ops: 0,
            resets: 0,
            slaves: Vec::new(),
        }
    }

    fn drive(&mut self, high: bool) {
        self.pin_ops += 1;
        if high {
            if self.master_low {
                self.master_low = false;
                let dur = self.now - self.fell_at;
                self.pulse(dur);
            }
        } else if !self.master_low {
            self.master_low = true;
            self.fell_at = self.now;
        }
    }

    /// Classify a finished master low pulse and hand it to every slave.
    fn pulse(&mut self, dur: u64) {
        if dur >= RESET_MIN {
            self.resets += 1;
            log::debug!("bus: reset pulse, {dur} ticks low");
            let released_at = self.now;
            for slave in &mut self.slaves {
                slave.on_reset(released_at);
            }
        } else {
            let short = dur <= SHORT_MAX;
            log::trace!(
                "bus: {} slot, {dur} ticks low",
                if short { "short" } else { "long" }
            );
            let fell_at = self.fell_at;
            for slave in &mut self.slaves {
                slave.on_slot(short, fell_at);
            }
        }
    }

    fn sample(&mut self) -> bool {
        self.pin_ops += 1;
        self.level()
    }

    /// Wired-AND of the master and every slave output at the current time.
    fn level(&self) -> bool {
        if self.held_low || self.master_low {
            return false;
        }
        let now = self.now;
        !self.slaves.iter().any(|slave| slave.pulls_low(now))
    }
}

/// A simulated 1-Wire bus: the line, the slot timer and the slaves.
pub struct SimBus {
    inner: Rc<RefCell<Inner>>,
}

impl SimBus {
    /// An empty bus with an idle-high line.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner::new())),
        }
    }

    /// Attach a slave with the given ROM bytes.
    pub fn with_device(self, rom: [u8; 8]) -> Self {
        self.inner.borrow_mut().slaves.push(Slave::new(rom, false));
        self
    }

    /// Attach a slave that answers the conditional (alarm) search.
    pub fn with_alarmed_device(self, rom: [u8; 8]) -> Self {
        self.inner.borrow_mut().slaves.push(Slave::new(rom, true));
        self
    }

    /// The master's view of the line.
    pub fn pin(&self) -> SimPin {
        SimPin {
            inner: Rc::clone(&self.inner),
        }
    }

    /// The master's slot timer.
    pub fn timer(&self) -> SimTimer {
        SimTimer {
            inner: Rc::clone(&self.inner),
        }
    }

    /// Emulate an external fault clamping the line low.
    pub fn hold_low(&self, held: bool) {
        self.inner.borrow_mut().held_low = held;
    }

    /// Advance virtual time by one programmed timer period, if the timer is
    /// running.
    pub fn step(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.running {
            inner.now = inner.now.wrapping_add(u64::from(inner.period));
        }
    }

    /// Pin operations the master has performed so far.
    pub fn pin_ops(&self) -> usize {
        self.inner.borrow().pin_ops
    }

    /// Reset pulses seen so far: one per transfer, one per search pass.
    pub fn reset_pulses(&self) -> usize {
        self.inner.borrow().resets
    }

    /// Probe the line level without counting as a master operation.
    pub fn line_is_high(&self) -> bool {
        self.inner.borrow().level()
    }

    /// A copy of a slave's scratchpad, in attachment order.
    pub fn scratchpad(&self, device: usize) -> Option<Vec<u8>> {
        self.inner
            .borrow()
            .slaves
            .get(device)
            .map(|slave| slave.scratch.clone())
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

/// The master's pin on a [`SimBus`].
pub struct SimPin {
    inner: Rc<RefCell<Inner>>,
}

impl ErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.inner.borrow_mut().drive(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.inner.borrow_mut().drive(true);
        Ok(())
    }
}

impl InputPin for SimPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.inner.borrow_mut().sample())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

/// The master's periodic slot timer on a [`SimBus`].
pub struct SimTimer {
    inner: Rc<RefCell<Inner>>,
}

impl SlotTimer for SimTimer {
    fn set_next_period(&mut self, ticks: u32) {
        self.inner.borrow_mut().period = ticks;
    }

    fn start(&mut self) {
        self.inner.borrow_mut().running = true;
    }

    fn stop(&mut self) {
        self.inner.borrow_mut().running = false;
    }
}

/// Build a ROM from family code and serial, appending a valid CRC.
pub fn rom_with_crc(family: u8, serial: [u8; 6]) -> [u8; 8] {
    let mut rom = [0u8; 8];
    rom[0] = family;
    rom[1..7].copy_from_slice(&serial);
    rom[7] = crc8(&rom[..7]);
    rom
}

/// Step the bus and tick the driver until the in-flight operation settles,
/// returning the number of timer periods spent.
///
/// # Panics
/// After an absurd number of periods, on the assumption the simulated bus
/// has wedged.
pub fn pump<const MAX_DEV: usize, const BUF_LEN: usize>(
    bus: &SimBus,
    ow: &mut OneWire<SimPin, SimTimer, MAX_DEV, BUF_LEN>,
) -> usize {
    let mut ticks = 0;
    while ow.is_busy() {
        bus.step();
        ow.tick();
        ticks += 1;
        assert!(ticks < 1_000_000, "simulated bus never settled");
    }
    ticks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rom_helper_appends_a_valid_crc() {
        let rom = rom_with_crc(0x28, [1, 2, 3, 4, 5, 6]);
        assert_eq!(crc8(&rom), 0);
    }

    #[test]
    fn presence_follows_a_reset_pulse() {
        let bus = SimBus::new().with_device(rom_with_crc(0x28, [0; 6]));
        let mut pin = bus.pin();
        assert!(bus.line_is_high());

        // reset pulse: 500 ticks low, sampled 100 ticks after release
        pin.set_low().unwrap();
        bus.inner.borrow_mut().now += 500;
        pin.set_high().unwrap();
        bus.inner.borrow_mut().now += 100;
        assert!(pin.is_low().unwrap());

        // window over well before the first slot
        bus.inner.borrow_mut().now += 500;
        assert!(pin.is_high().unwrap());
    }

    #[test]
    fn short_and_long_slots_shift_bits_into_a_command() {
        let bus = SimBus::new().with_device(rom_with_crc(0x28, [0; 6]));
        let mut pin = bus.pin();

        pin.set_low().unwrap();
        bus.inner.borrow_mut().now += 500;
        pin.set_high().unwrap();
        bus.inner.borrow_mut().now += 600;

        // write 0xcc (SKIP ROM) one bit at a time, LSB first
        for bit in 0..8 {
            let low = if consts::SKIP_ROM_CMD & (1 << bit) != 0 {
                10
            } else {
                70
            };
            pin.set_low().unwrap();
            bus.inner.borrow_mut().now += low;
            pin.set_high().unwrap();
            bus.inner.borrow_mut().now += 80 - low;
        }
        assert_eq!(
            bus.inner.borrow().slaves[0].state,
            SlaveState::Function,
            "slave should be waiting for a function command"
        );
    }
}
