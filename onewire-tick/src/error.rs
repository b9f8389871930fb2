/// Errors reported by request calls and by settled operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwError<E> {
    /// A request arrived while an operation was still in flight.
    Busy,
    /// The idle bus did not read high when the transaction was armed;
    /// something else is holding the line low.
    BusFault,
    /// No device answered the reset pulse with a presence pulse.
    ResetFailed,
    /// The requested payload does not fit the transaction buffer.
    LengthInvalid,
    /// A device index beyond the discovered list, or the bus stopped
    /// answering in the middle of a search pass.
    AddressInvalid,
    /// The GPIO pin itself failed.
    Pin(E),
}

impl<E> From<E> for OwError<E> {
    fn from(err: E) -> Self {
        Self::Pin(err)
    }
}
