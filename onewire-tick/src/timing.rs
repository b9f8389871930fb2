//! The bus timing profile.

/// Slot and reset durations, in timer ticks.
///
/// The protocol fixes the sequencing and the bit encoding; the absolute
/// widths are supplied here so the same engine runs off any timer base.
/// [`Timings::STANDARD`] assumes one tick per microsecond and standard
/// (non-overdrive) speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Reset-pulse low time; doubles as the recovery period after the
    /// presence sample.
    pub reset_low: u32,
    /// Delay from releasing the reset pulse to the presence sample point.
    pub presence_wait: u32,
    /// Long half of a write slot: the low time of a 0, the release time of
    /// a 1.
    pub slot_long: u32,
    /// Short half of a write slot: the low time of a 1, the release time of
    /// a 0.
    pub slot_short: u32,
    /// Read-slot initiation low time.
    pub read_init: u32,
    /// Delay from releasing a read slot to the sample point.
    pub read_wait: u32,
    /// Read-slot recovery time after sampling.
    pub read_recovery: u32,
}

impl Timings {
    /// Standard-speed profile for a 1 MHz timer tick.
    pub const STANDARD: Self = Self {
        reset_low: 500,
        presence_wait: 100,
        slot_long: 70,
        slot_short: 10,
        read_init: 10,
        read_wait: 10,
        read_recovery: 60,
    };
}

impl Default for Timings {
    fn default() -> Self {
        Self::STANDARD
    }
}
