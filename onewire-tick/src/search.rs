//! The ROM search engine: binary-tree device discovery with discrepancy
//! backtracking, run one micro-phase per timer interrupt.
//!
//! One pass walks reset, the search command byte, then 64 triplets: read
//! the address bit, read its complement, write the chosen direction back.
//! Devices whose address disagrees with the written direction drop out for
//! the rest of the pass, so every pass isolates exactly one address. The
//! discrepancy bookkeeping follows Maxim application note 187, revisiting
//! the deepest unexplored branch point on the next pass.

use embedded_hal::digital::{InputPin, OutputPin};

use crate::crc::Crc8;
use crate::driver::{OneWire, State};
use crate::error::OwError;
use crate::rom::RomId;
use crate::traits::SlotTimer;

/// Micro-phases of a search pass. The sampled address bit and the resolved
/// direction ride along in the variants that need them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SearchPhase {
    ResetLow,
    ResetRelease,
    PresenceSample,
    /// Write slots for the search command byte.
    CmdSlotLow,
    CmdSlotRelease,
    /// Read the address bit at the current position.
    IdBitLow,
    IdBitRelease,
    IdBitSample,
    /// Read its complement.
    CmpBitLow { id_bit: bool },
    CmpBitRelease { id_bit: bool },
    CmpBitSample { id_bit: bool },
    /// Write the chosen direction back; only agreeing devices stay
    /// selected.
    DirBitLow { dir: bool },
    DirBitRelease { dir: bool },
}

/// Backtracking state spanning all passes of one search operation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SearchProgress {
    /// 1-based position of the deepest unexplored branch point; 0 once the
    /// tree is exhausted.
    pub(crate) last_discrepancy: u8,
    /// Branch-point candidate recorded during the current pass.
    pub(crate) last_zero: u8,
    /// Set when no unexplored branch remains.
    pub(crate) last_device: bool,
    /// Candidate address assembled this pass. Bits below `last_discrepancy`
    /// replay the previous pass's path, so the value carries over between
    /// passes.
    pub(crate) rom: u64,
    /// 1-based position of the triplet in flight.
    pub(crate) bit_num: u8,
}

impl SearchProgress {
    pub(crate) const fn new() -> Self {
        Self {
            last_discrepancy: 0,
            last_zero: 0,
            last_device: false,
            rom: 0,
            bit_num: 1,
        }
    }
}

impl<P, T, const MAX_DEV: usize, const BUF_LEN: usize> OneWire<P, T, MAX_DEV, BUF_LEN>
where
    P: InputPin + OutputPin,
    P::Error: Clone,
    T: SlotTimer,
{
    pub(crate) fn step_search(&mut self, phase: SearchPhase) -> Result<(), OwError<P::Error>> {
        match phase {
            SearchPhase::ResetLow => {
                self.step_reset_low(State::Search(SearchPhase::ResetRelease))?;
            }
            SearchPhase::ResetRelease => {
                self.step_reset_release(State::Search(SearchPhase::PresenceSample))?;
            }
            SearchPhase::PresenceSample => {
                self.step_presence_sample()?;
                self.state = State::Search(SearchPhase::CmdSlotLow);
            }
            SearchPhase::CmdSlotLow => {
                self.open_write_slot(self.buf.out_bit())?;
                self.state = State::Search(SearchPhase::CmdSlotRelease);
            }
            SearchPhase::CmdSlotRelease => {
                self.close_write_slot(self.buf.out_bit())?;
                self.buf.bit_idx += 1;
                self.state = if self.buf.bit_idx == 8 {
                    self.buf.bit_idx = 0;
                    State::Search(SearchPhase::IdBitLow)
                } else {
                    State::Search(SearchPhase::CmdSlotLow)
                };
            }
            SearchPhase::IdBitLow => {
                self.open_read_slot(State::Search(SearchPhase::IdBitRelease))?;
            }
            SearchPhase::IdBitRelease => {
                self.release_read_slot(State::Search(SearchPhase::IdBitSample))?;
            }
            SearchPhase::IdBitSample => {
                self.timer.set_next_period(self.timings.read_recovery);
                let id_bit = self.pin.is_high()?;
                self.state = State::Search(SearchPhase::CmpBitLow { id_bit });
            }
            SearchPhase::CmpBitLow { id_bit } => {
                self.open_read_slot(State::Search(SearchPhase::CmpBitRelease { id_bit }))?;
            }
            SearchPhase::CmpBitRelease { id_bit } => {
                self.release_read_slot(State::Search(SearchPhase::CmpBitSample { id_bit }))?;
            }
            SearchPhase::CmpBitSample { id_bit } => {
                self.timer.set_next_period(self.timings.read_recovery);
                let cmp_bit = self.pin.is_high()?;
                let dir = self.resolve_direction(id_bit, cmp_bit)?;
                self.state = State::Search(SearchPhase::DirBitLow { dir });
            }
            SearchPhase::DirBitLow { dir } => {
                self.open_write_slot(dir)?;
                let mask = 1u64 << (self.search.bit_num - 1);
                if dir {
                    self.search.rom |= mask;
                } else {
                    self.search.rom &= !mask;
                }
                self.state = State::Search(SearchPhase::DirBitRelease { dir });
            }
            SearchPhase::DirBitRelease { dir } => {
                self.close_write_slot(dir)?;
                self.state = if self.search.bit_num == 64 {
                    self.finish_pass()
                } else {
                    self.search.bit_num += 1;
                    State::Search(SearchPhase::IdBitLow)
                };
            }
        }
        Ok(())
    }

    /// Pick the branch to follow from one triplet read.
    fn resolve_direction(&mut self, id_bit: bool, cmp_bit: bool) -> Result<bool, OwError<P::Error>> {
        let dir = match (id_bit, cmp_bit) {
            // Every selected device dropped off the bus mid-pass.
            (true, true) => return Err(OwError::AddressInvalid),
            // All remaining devices agree on this bit.
            (true, false) => true,
            (false, true) => false,
            // Discrepancy: both values exist among the selected devices.
            (false, false) => {
                let n = self.search.bit_num;
                if n < self.search.last_discrepancy {
                    // Stay on the previous pass's path.
                    self.search.rom & (1u64 << (n - 1)) != 0
                } else {
                    // Take the unexplored 1-branch at the old branch point,
                    // zeros everywhere deeper.
                    n == self.search.last_discrepancy
                }
            }
        };
        // Any zero taken at a discrepancy, replayed or fresh, is a branch
        // point left to revisit.
        if !id_bit && !cmp_bit && !dir {
            self.search.last_zero = self.search.bit_num;
        }
        Ok(dir)
    }

    /// Close a 64-triplet pass: bank the candidate, move the branch point
    /// and decide between another pass and completion.
    fn finish_pass(&mut self) -> State {
        let rom = self.search.rom.to_le_bytes();
        if Crc8::validate(&rom) {
            // Cannot overflow: a pass only starts while there is room.
            self.devices.push(RomId::from_bytes(rom)).ok();
        }
        // A candidate failing its CRC is dropped, but the pass still
        // counts; transient bus noise must not wedge the search.
        self.search.last_discrepancy = self.search.last_zero;
        self.search.last_zero = 0;
        self.search.last_device = self.search.last_discrepancy == 0;
        if self.search.last_device || self.devices.is_full() {
            return State::Done;
        }
        self.search.bit_num = 1;
        self.buf.bit_idx = 0;
        State::Search(SearchPhase::ResetLow)
    }
}
