//! ROM command bytes understood by every 1-Wire device family.

/// Read the ROM ID of the only device on a single-drop bus.
pub const READ_ROM_CMD: u8 = 0x33;

/// Address one device by its full 64-bit ROM ID.
pub const MATCH_ROM_CMD: u8 = 0x55;

/// Address every device on the bus at once.
pub const SKIP_ROM_CMD: u8 = 0xcc;

/// Begin one pass of the binary-tree ROM search.
pub const SEARCH_ROM_CMD: u8 = 0xf0;

/// Begin one search pass in which only devices in an alarm condition
/// participate.
pub const ALARM_SEARCH_CMD: u8 = 0xec;
