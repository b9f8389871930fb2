//! The transfer engine: reset, presence detect, write slots, read slots.

use embedded_hal::digital::{InputPin, OutputPin};

use crate::driver::{OneWire, State};
use crate::error::OwError;
use crate::traits::SlotTimer;

/// Micro-phases of one request/response exchange. Each phase runs inside a
/// single timer interrupt and programs the period of the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum XferPhase {
    /// Drive the reset pulse low.
    ResetLow,
    /// Release the bus so devices can answer.
    ResetRelease,
    /// Sample the presence pulse.
    PresenceSample,
    /// Low half of a write slot.
    WriteSlotLow,
    /// Release half of a write slot.
    WriteSlotRelease,
    /// Open a read slot.
    ReadSlotLow,
    /// Release up to the sample point.
    ReadSlotRelease,
    /// Sample the incoming bit.
    ReadSlotSample,
}

impl<P, T, const MAX_DEV: usize, const BUF_LEN: usize> OneWire<P, T, MAX_DEV, BUF_LEN>
where
    P: InputPin + OutputPin,
    P::Error: Clone,
    T: SlotTimer,
{
    pub(crate) fn step_xfer(&mut self, phase: XferPhase) -> Result<(), OwError<P::Error>> {
        match phase {
            XferPhase::ResetLow => {
                self.step_reset_low(State::Xfer(XferPhase::ResetRelease))?;
            }
            XferPhase::ResetRelease => {
                self.step_reset_release(State::Xfer(XferPhase::PresenceSample))?;
            }
            XferPhase::PresenceSample => {
                self.step_presence_sample()?;
                self.state = if self.buf.write_len > 0 {
                    State::Xfer(XferPhase::WriteSlotLow)
                } else if self.buf.read_len > 0 {
                    State::Xfer(XferPhase::ReadSlotLow)
                } else {
                    State::Done
                };
            }
            XferPhase::WriteSlotLow => {
                self.open_write_slot(self.buf.out_bit())?;
                self.state = State::Xfer(XferPhase::WriteSlotRelease);
            }
            XferPhase::WriteSlotRelease => {
                self.close_write_slot(self.buf.out_bit())?;
                self.state = self.advance_write();
            }
            XferPhase::ReadSlotLow => {
                self.open_read_slot(State::Xfer(XferPhase::ReadSlotRelease))?;
            }
            XferPhase::ReadSlotRelease => {
                self.release_read_slot(State::Xfer(XferPhase::ReadSlotSample))?;
            }
            XferPhase::ReadSlotSample => {
                self.timer.set_next_period(self.timings.read_recovery);
                if self.pin.is_high()? {
                    self.buf.set_in_bit();
                }
                self.state = self.advance_read();
            }
        }
        Ok(())
    }

    // The reset sequence and the slot halves below are shared with the
    // search engine, which interleaves its triplets with the same timing.

    pub(crate) fn step_reset_low(&mut self, next: State) -> Result<(), OwError<P::Error>> {
        self.timer.set_next_period(self.timings.reset_low);
        self.pin.set_low()?;
        self.state = next;
        Ok(())
    }

    pub(crate) fn step_reset_release(&mut self, next: State) -> Result<(), OwError<P::Error>> {
        self.timer.set_next_period(self.timings.presence_wait);
        self.pin.set_high()?;
        self.state = next;
        Ok(())
    }

    /// Sample the presence pulse; a high bus means nobody answered the
    /// reset. The recovery period doubles as the tail of the presence
    /// window.
    pub(crate) fn step_presence_sample(&mut self) -> Result<(), OwError<P::Error>> {
        if self.pin.is_high()? {
            return Err(OwError::ResetFailed);
        }
        self.timer.set_next_period(self.timings.reset_low);
        Ok(())
    }

    /// Drive the low half of a write slot: a 1 is a short low, a 0 a long
    /// one.
    pub(crate) fn open_write_slot(&mut self, bit: bool) -> Result<(), OwError<P::Error>> {
        self.timer.set_next_period(if bit {
            self.timings.slot_short
        } else {
            self.timings.slot_long
        });
        self.pin.set_low()?;
        Ok(())
    }

    /// Release the bus for the complementary half of the slot.
    pub(crate) fn close_write_slot(&mut self, bit: bool) -> Result<(), OwError<P::Error>> {
        self.timer.set_next_period(if bit {
            self.timings.slot_long
        } else {
            self.timings.slot_short
        });
        self.pin.set_high()?;
        Ok(())
    }

    pub(crate) fn open_read_slot(&mut self, next: State) -> Result<(), OwError<P::Error>> {
        self.timer.set_next_period(self.timings.read_init);
        self.pin.set_low()?;
        self.state = next;
        Ok(())
    }

    pub(crate) fn release_read_slot(&mut self, next: State) -> Result<(), OwError<P::Error>> {
        self.timer.set_next_period(self.timings.read_wait);
        self.pin.set_high()?;
        self.state = next;
        Ok(())
    }

    fn advance_write(&mut self) -> State {
        self.buf.bit_idx += 1;
        if self.buf.bit_idx < 8 {
            return State::Xfer(XferPhase::WriteSlotLow);
        }
        self.buf.bit_idx = 0;
        self.buf.byte_idx += 1;
        if self.buf.byte_idx < self.buf.write_len {
            return State::Xfer(XferPhase::WriteSlotLow);
        }
        if self.buf.read_len > 0 {
            self.buf.byte_idx = 0;
            return State::Xfer(XferPhase::ReadSlotLow);
        }
        State::Done
    }

    fn advance_read(&mut self) -> State {
        self.buf.bit_idx += 1;
        if self.buf.bit_idx < 8 {
            return State::Xfer(XferPhase::ReadSlotLow);
        }
        self.buf.bit_idx = 0;
        self.buf.byte_idx += 1;
        if self.buf.byte_idx < self.buf.read_len {
            return State::Xfer(XferPhase::ReadSlotLow);
        }
        State::Done
    }
}
