//! Interfaces to the collaborators the embedding application provides.

use crate::error::OwError;

/// A reprogrammable periodic-interrupt timer.
///
/// The driver owns the timer while an operation is in flight: every
/// micro-phase programs the duration of the next one before its interrupt
/// returns. The application's timer ISR must call
/// [`OneWire::tick`](crate::OneWire::tick) exactly once per elapsed period,
/// and must not fire for any other reason while the bus is busy.
pub trait SlotTimer {
    /// Program the duration of the next period, in timer ticks.
    fn set_next_period(&mut self, ticks: u32);

    /// Begin firing the periodic interrupt.
    fn start(&mut self);

    /// Stop firing the periodic interrupt.
    fn stop(&mut self);
}

/// Completion hook invoked from interrupt context when an operation settles,
/// carrying the settled outcome.
///
/// The hook runs inside the final timer interrupt, after the bus has been
/// released and the driver returned to idle, so issuing a follow-up request
/// from it is allowed but keeps the interrupt long; most applications just
/// record the outcome and request from thread context.
pub type DoneCallback<E> = fn(Result<(), OwError<E>>);
