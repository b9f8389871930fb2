//! 64-bit device addresses.

use core::fmt;

use crate::crc::Crc8;

/// A 1-Wire ROM ID: one family-code byte, six serial bytes and a trailing
/// CRC-8, stored in wire order (family code first).
///
/// Equality is byte-exact. The `u64` conversions use little-endian byte
/// order, putting the family code in the low byte as the wire does.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RomId([u8; 8]);

impl RomId {
    /// Wrap raw ROM bytes in wire order.
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// The device family code.
    pub const fn family(&self) -> u8 {
        self.0[0]
    }

    /// The six serial-number bytes between family code and CRC.
    pub fn serial(&self) -> &[u8] {
        &self.0[1..7]
    }

    /// The trailing CRC-8 byte.
    pub const fn crc(&self) -> u8 {
        self.0[7]
    }

    /// The raw bytes in wire order.
    pub const fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// Whether the trailing CRC matches the other seven bytes.
    pub fn is_valid(&self) -> bool {
        Crc8::validate(&self.0)
    }
}

impl From<u64> for RomId {
    fn from(value: u64) -> Self {
        Self(value.to_le_bytes())
    }
}

impl From<RomId> for u64 {
    fn from(value: RomId) -> Self {
        u64::from_le_bytes(value.0)
    }
}

impl fmt::Debug for RomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Display for RomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::crc8;

    fn sample() -> RomId {
        let mut bytes = [0x28, 0x11, 0x64, 0x05, 0x00, 0x00, 0x7a, 0x00];
        bytes[7] = crc8(&bytes[..7]);
        RomId::from_bytes(bytes)
    }

    #[test]
    fn fields_slice_the_wire_bytes() {
        let rom = sample();
        assert_eq!(rom.family(), 0x28);
        assert_eq!(rom.serial(), &rom.as_bytes()[1..7]);
        assert_eq!(rom.crc(), rom.as_bytes()[7]);
        assert!(rom.is_valid());
    }

    #[test]
    fn u64_conversion_round_trips() {
        let rom = sample();
        let value: u64 = rom.into();
        assert_eq!(value & 0xff, u64::from(rom.family()));
        assert_eq!(RomId::from(value), rom);
    }
}
