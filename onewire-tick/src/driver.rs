//! The driver handle and its request layer.

use embedded_hal::digital::{InputPin, OutputPin};
use heapless::Vec;

use crate::OwResult;
use crate::buffer::Transaction;
use crate::consts::{ALARM_SEARCH_CMD, MATCH_ROM_CMD, READ_ROM_CMD, SEARCH_ROM_CMD, SKIP_ROM_CMD};
use crate::crc::Crc8;
use crate::error::OwError;
use crate::rom::RomId;
use crate::search::{SearchPhase, SearchProgress};
use crate::timing::Timings;
use crate::traits::{DoneCallback, SlotTimer};
use crate::xfer::XferPhase;

/// Top-level driver state: idle, one variant per in-flight engine, or
/// settled and waiting for the final tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    Idle,
    Xfer(XferPhase),
    Search(SearchPhase),
    Done,
}

/// A 1-Wire bus master advanced one micro-phase per timer interrupt.
///
/// `MAX_DEV` bounds the discovered-device list; with `MAX_DEV == 1` device
/// discovery uses the direct READ ROM command instead of the search.
/// `BUF_LEN` sizes the transaction buffer and must be at least 10 (ROM
/// command, address, function command), leaving [`OneWire::MAX_PAYLOAD`]
/// bytes of payload headroom per request.
///
/// The handle is owned by the embedding application. While an operation is
/// in flight the only permitted call is [`OneWire::tick`], made from the
/// timer interrupt; everything else is rejected with [`OwError::Busy`].
pub struct OneWire<P, T, const MAX_DEV: usize, const BUF_LEN: usize>
where
    P: InputPin + OutputPin,
{
    pub(crate) pin: P,
    pub(crate) timer: T,
    pub(crate) timings: Timings,
    pub(crate) buf: Transaction<BUF_LEN>,
    pub(crate) state: State,
    pub(crate) search: SearchProgress,
    pub(crate) devices: Vec<RomId, MAX_DEV>,
    /// The settled transfer is a READ ROM whose response feeds the device
    /// list.
    pub(crate) capture_rom: bool,
    error: Option<OwError<P::Error>>,
    done: Option<DoneCallback<P::Error>>,
}

impl<P, T, const MAX_DEV: usize, const BUF_LEN: usize> OneWire<P, T, MAX_DEV, BUF_LEN>
where
    P: InputPin + OutputPin,
    P::Error: Clone,
    T: SlotTimer,
{
    /// Payload bytes a single request can carry.
    pub const MAX_PAYLOAD: usize = BUF_LEN - 10;

    /// Take ownership of the bus pin and the slot timer, releasing the bus
    /// to its idle-high level.
    pub fn new(pin: P, timer: T) -> OwResult<Self, P::Error> {
        let mut ow = Self {
            pin,
            timer,
            timings: Timings::STANDARD,
            buf: Transaction::new(),
            state: State::Idle,
            search: SearchProgress::new(),
            devices: Vec::new(),
            capture_rom: false,
            error: None,
            done: None,
        };
        ow.pin.set_high()?;
        Ok(ow)
    }

    /// Replace the standard timing profile.
    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Install a hook fired from interrupt context when an operation
    /// settles.
    pub fn with_completion(mut self, done: DoneCallback<P::Error>) -> Self {
        self.done = Some(done);
        self
    }

    /// Whether an operation is in flight.
    pub fn is_busy(&self) -> bool {
        !matches!(self.state, State::Idle)
    }

    /// The failure of the most recent admitted request, if any.
    ///
    /// Cleared when a request is admitted; faults detected mid-transfer are
    /// recorded here from interrupt context and can be polled once
    /// [`OneWire::is_busy`] reports idle again.
    pub fn last_error(&self) -> Option<OwError<P::Error>> {
        self.error.clone()
    }

    /// Number of devices captured by the last list update.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// ROM IDs captured by the last list update, in discovery order.
    pub fn devices(&self) -> &[RomId] {
        &self.devices
    }

    /// Give the pin and the timer back.
    pub fn release(self) -> (P, T) {
        (self.pin, self.timer)
    }

    /// Rebuild the device list.
    ///
    /// With `MAX_DEV == 1` the single device's address is read directly
    /// (READ ROM, one pass); otherwise the binary-tree search runs, one
    /// reset-and-64-triplet pass per device, until the tree is exhausted or
    /// the list is full.
    ///
    /// # Errors
    /// [`OwError::Busy`] while an operation is in flight; [`OwError::BusFault`]
    /// if the released bus does not read high. Faults after arming (missing
    /// presence pulse, mid-search dropout, a READ ROM response failing its
    /// CRC) surface through [`OneWire::last_error`] and the completion hook.
    pub fn update_device_list(&mut self) -> OwResult<(), P::Error> {
        self.admit(0)?;
        self.arm()?;
        self.devices.clear();
        if MAX_DEV == 1 {
            self.buf.data[0] = READ_ROM_CMD;
            self.buf.write_len = 1;
            self.buf.read_len = 8;
            self.capture_rom = true;
            self.state = State::Xfer(XferPhase::ResetLow);
        } else {
            self.start_search(SEARCH_ROM_CMD);
        }
        Ok(())
    }

    /// Rebuild the device list from the devices currently in an alarm
    /// condition (conditional search).
    ///
    /// A bus with no alarmed devices settles with
    /// [`OwError::AddressInvalid`]: nothing answers the first triplet.
    pub fn update_alarm_list(&mut self) -> OwResult<(), P::Error> {
        self.admit(0)?;
        self.arm()?;
        self.devices.clear();
        self.start_search(ALARM_SEARCH_CMD);
        Ok(())
    }

    /// Write a function command and payload to every device at once
    /// (SKIP ROM).
    ///
    /// # Errors
    /// [`OwError::Busy`] while an operation is in flight;
    /// [`OwError::LengthInvalid`] when `payload` exceeds
    /// [`OneWire::MAX_PAYLOAD`]; [`OwError::BusFault`] if the released bus
    /// does not read high.
    pub fn write(&mut self, fn_cmd: u8, payload: &[u8]) -> OwResult<(), P::Error> {
        self.admit(payload.len())?;
        self.arm()?;
        self.buf.data[0] = SKIP_ROM_CMD;
        self.buf.data[1] = fn_cmd;
        self.buf.data[2..2 + payload.len()].copy_from_slice(payload);
        self.buf.write_len = 2 + payload.len();
        self.state = State::Xfer(XferPhase::ResetLow);
        Ok(())
    }

    /// Write a function command, then read `len` response bytes (SKIP ROM).
    ///
    /// Meaningful on a multi-drop bus only when a single device will answer;
    /// use [`OneWire::read_from`] to address one device among several.
    pub fn read(&mut self, fn_cmd: u8, len: usize) -> OwResult<(), P::Error> {
        self.admit(len)?;
        self.arm()?;
        self.buf.data[0] = SKIP_ROM_CMD;
        self.buf.data[1] = fn_cmd;
        self.buf.write_len = 2;
        self.buf.read_len = len;
        self.state = State::Xfer(XferPhase::ResetLow);
        Ok(())
    }

    /// Write a function command and payload to one discovered device,
    /// selected by its index in [`OneWire::devices`] (MATCH ROM).
    pub fn write_to(&mut self, idx: usize, fn_cmd: u8, payload: &[u8]) -> OwResult<(), P::Error> {
        self.admit(payload.len())?;
        let rom = self.device_at(idx)?;
        self.arm()?;
        self.buf.data[0] = MATCH_ROM_CMD;
        self.buf.data[1..9].copy_from_slice(rom.as_bytes());
        self.buf.data[9] = fn_cmd;
        self.buf.data[10..10 + payload.len()].copy_from_slice(payload);
        self.buf.write_len = 10 + payload.len();
        self.state = State::Xfer(XferPhase::ResetLow);
        Ok(())
    }

    /// Write a function command to one discovered device, then read `len`
    /// response bytes from it (MATCH ROM).
    pub fn read_from(&mut self, idx: usize, fn_cmd: u8, len: usize) -> OwResult<(), P::Error> {
        self.admit(len)?;
        let rom = self.device_at(idx)?;
        self.arm()?;
        self.buf.data[0] = MATCH_ROM_CMD;
        self.buf.data[1..9].copy_from_slice(rom.as_bytes());
        self.buf.data[9] = fn_cmd;
        self.buf.write_len = 10;
        self.buf.read_len = len;
        self.state = State::Xfer(XferPhase::ResetLow);
        Ok(())
    }

    /// Copy the response of the last completed read into `out`, returning
    /// the number of bytes copied: the recorded read length, bounded by the
    /// caller's buffer.
    pub fn read_response(&self, out: &mut [u8]) -> usize {
        let len = self.buf.read_len.min(out.len());
        out[..len].copy_from_slice(&self.buf.data[self.buf.write_len..self.buf.write_len + len]);
        len
    }

    /// Advance the in-flight operation by one micro-phase.
    ///
    /// Call from the periodic timer interrupt, exactly once per elapsed
    /// period. Each invocation performs at most one bus edge and one sample
    /// and programs the duration of the next period.
    pub fn tick(&mut self) {
        let step = match self.state {
            State::Idle => {
                // Spurious interrupt; make sure the timer is quiet.
                self.timer.stop();
                Ok(())
            }
            State::Done => {
                self.settle(Ok(()));
                Ok(())
            }
            State::Xfer(phase) => self.step_xfer(phase),
            State::Search(phase) => self.step_search(phase),
        };
        if let Err(err) = step {
            self.settle(Err(err));
        }
    }

    /// Gate a new request: reject while busy, then claim the error slot and
    /// bound the payload length.
    fn admit(&mut self, payload_len: usize) -> OwResult<(), P::Error> {
        if self.is_busy() {
            // The error slot still belongs to the operation in flight.
            return Err(OwError::Busy);
        }
        self.error = None;
        if payload_len > Self::MAX_PAYLOAD {
            return Err(self.fail(OwError::LengthInvalid));
        }
        Ok(())
    }

    /// Arm the bus: release it, verify it idles high, zero the buffer and
    /// start the slot timer. The first interrupt fires after one presence
    /// window and enters the reset sequence.
    fn arm(&mut self) -> OwResult<(), P::Error> {
        // Release first, then check: a line held low by a fault or another
        // master reads back low here.
        if let Err(err) = self.pin.set_high() {
            return Err(self.fail(OwError::Pin(err)));
        }
        match self.pin.is_high() {
            Ok(true) => {}
            Ok(false) => return Err(self.fail(OwError::BusFault)),
            Err(err) => return Err(self.fail(OwError::Pin(err))),
        }
        self.buf.clear();
        self.capture_rom = false;
        self.timer.set_next_period(self.timings.presence_wait);
        self.timer.start();
        Ok(())
    }

    fn start_search(&mut self, cmd: u8) {
        self.buf.data[0] = cmd;
        self.buf.write_len = 1;
        self.search = SearchProgress::new();
        self.state = State::Search(SearchPhase::ResetLow);
    }

    fn device_at(&mut self, idx: usize) -> OwResult<RomId, P::Error> {
        if idx >= self.devices.len() {
            return Err(self.fail(OwError::AddressInvalid));
        }
        Ok(self.devices[idx])
    }

    /// Record a request-path failure and hand it back to the caller.
    fn fail(&mut self, err: OwError<P::Error>) -> OwError<P::Error> {
        self.error = Some(err.clone());
        err
    }

    /// Stop the timer, release the bus, return to idle and report the
    /// outcome through the error slot and the completion hook.
    pub(crate) fn settle(&mut self, mut outcome: Result<(), OwError<P::Error>>) {
        if outcome.is_ok() && self.capture_rom {
            outcome = self.capture_single_rom();
        }
        self.capture_rom = false;
        self.timer.stop();
        let released = self.pin.set_high();
        if outcome.is_ok() {
            if let Err(err) = released {
                outcome = Err(OwError::Pin(err));
            }
        }
        self.state = State::Idle;
        if let Err(err) = &outcome {
            self.error = Some(err.clone());
        }
        if let Some(done) = self.done {
            done(outcome);
        }
    }

    /// Validate and bank the address read by the capacity-1 list update.
    fn capture_single_rom(&mut self) -> Result<(), OwError<P::Error>> {
        let mut rom = [0u8; 8];
        rom.copy_from_slice(&self.buf.data[1..9]);
        if !Crc8::validate(&rom) {
            return Err(OwError::AddressInvalid);
        }
        self.devices.push(RomId::from_bytes(rom)).ok();
        Ok(())
    }
}
