#![no_std]
#![deny(missing_docs)]
//! # onewire-tick
//! A no-std 1-Wire bus master that never blocks: reset pulses, write slots
//! and read slots are carved into micro-phases, and a periodic hardware
//! timer interrupt advances the protocol exactly one micro-phase per fired
//! period.
//!
//! The embedding application supplies one open-drain GPIO pin (the
//! [`InputPin`](embedded_hal::digital::InputPin) +
//! [`OutputPin`](embedded_hal::digital::OutputPin) pair from `embedded-hal`)
//! and a reprogrammable periodic timer implementing [`SlotTimer`]. A request
//! call ([`OneWire::write`], [`OneWire::read`],
//! [`OneWire::update_device_list`], ...) validates its arguments, arms the
//! exchange and returns immediately; the application's timer interrupt then
//! calls [`OneWire::tick`] once per elapsed period until the operation
//! settles. Each tick performs at most one bus edge and one sample, then
//! programs the duration of the next period.
//!
//! Multi-drop buses are enumerated with the Dallas/Maxim binary-tree ROM
//! search (triplet reads with discrepancy backtracking), run by the same
//! micro-phase engine. Discovered addresses are CRC-checked with the
//! [`Crc8`] validator before they enter the device list.

pub mod consts;

mod buffer;
mod crc;
mod driver;
mod error;
mod rom;
mod search;
mod timing;
mod traits;
mod xfer;

pub use crc::{Crc8, crc8};
pub use driver::OneWire;
pub use error::OwError;
pub use rom::RomId;
pub use timing::Timings;
pub use traits::{DoneCallback, SlotTimer};

/// Result type for 1-Wire operations; `E` is the GPIO pin error type.
pub type OwResult<T, E> = Result<T, OwError<E>>;
