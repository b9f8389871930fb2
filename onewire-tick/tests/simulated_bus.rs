//! End-to-end exercises of the driver against the simulated bus.

use core::convert::Infallible;
use core::sync::atomic::{AtomicU8, Ordering};

use onewire_tick::{OneWire, OwError, RomId};
use onewire_tick_sim::{
    READ_SCRATCHPAD_CMD, SimBus, SimPin, SimTimer, WRITE_SCRATCHPAD_CMD, pump, rom_with_crc,
};

type Driver<const MAX_DEV: usize> = OneWire<SimPin, SimTimer, MAX_DEV, 26>;

fn driver<const MAX_DEV: usize>(bus: &SimBus) -> Driver<MAX_DEV> {
    OneWire::new(bus.pin(), bus.timer()).unwrap()
}

const FAMILY: u8 = 0x28;

#[test]
fn search_finds_every_device_exactly_once() {
    let roms = [
        rom_with_crc(FAMILY, [0x01, 0x5b, 0x00, 0x00, 0xc4, 0x01]),
        rom_with_crc(FAMILY, [0x02, 0x44, 0x00, 0x00, 0xc4, 0x7f]),
        rom_with_crc(0x10, [0xa0, 0x00, 0x31, 0x00, 0x00, 0x02]),
    ];
    let bus = roms
        .iter()
        .fold(SimBus::new(), |bus, rom| bus.with_device(*rom));
    let mut ow: Driver<8> = driver(&bus);

    ow.update_device_list().unwrap();
    pump(&bus, &mut ow);

    assert_eq!(ow.last_error(), None);
    assert_eq!(ow.device_count(), roms.len());
    for rom in &roms {
        assert!(ow.devices().contains(&RomId::from_bytes(*rom)));
    }
    for (i, a) in ow.devices().iter().enumerate() {
        for b in &ow.devices()[i + 1..] {
            assert_ne!(a, b);
        }
    }
    // every pass isolates exactly one device
    assert_eq!(bus.reset_pulses(), roms.len());
}

#[test]
fn discovery_order_ignores_registration_order() {
    let r1 = rom_with_crc(FAMILY, [1, 2, 3, 4, 5, 6]);
    let r2 = rom_with_crc(FAMILY, [9, 8, 7, 6, 5, 4]);
    let r3 = rom_with_crc(0x22, [0x10, 0x00, 0x77, 0x00, 0x01, 0x00]);

    let mut orders = Vec::new();
    for roms in [[r1, r2, r3], [r3, r1, r2]] {
        let bus = roms
            .iter()
            .fold(SimBus::new(), |bus, rom| bus.with_device(*rom));
        let mut ow: Driver<4> = driver(&bus);
        ow.update_device_list().unwrap();
        pump(&bus, &mut ow);
        assert_eq!(ow.device_count(), 3);
        orders.push(ow.devices().to_vec());
    }
    assert_eq!(orders[0], orders[1]);
}

#[test]
fn corrupted_crc_device_is_excluded() {
    let good1 = rom_with_crc(FAMILY, [1, 0, 0, 0, 0, 0]);
    let good2 = rom_with_crc(FAMILY, [2, 0, 0, 0, 0, 0]);
    let mut bad = rom_with_crc(FAMILY, [3, 0, 0, 0, 0, 0]);
    bad[7] ^= 0x5a;

    let bus = SimBus::new()
        .with_device(good1)
        .with_device(bad)
        .with_device(good2);
    let mut ow: Driver<8> = driver(&bus);
    ow.update_device_list().unwrap();
    pump(&bus, &mut ow);

    assert_eq!(ow.last_error(), None);
    assert_eq!(ow.device_count(), 2);
    assert!(ow.devices().contains(&RomId::from_bytes(good1)));
    assert!(ow.devices().contains(&RomId::from_bytes(good2)));
    assert!(!ow.devices().contains(&RomId::from_bytes(bad)));
    // the discarded pass still counts
    assert_eq!(bus.reset_pulses(), 3);
}

#[test]
fn alarm_search_reports_only_alarmed_devices() {
    let quiet = rom_with_crc(FAMILY, [4, 4, 4, 4, 4, 4]);
    let noisy = rom_with_crc(FAMILY, [5, 5, 5, 5, 5, 5]);
    let bus = SimBus::new()
        .with_device(quiet)
        .with_alarmed_device(noisy);
    let mut ow: Driver<8> = driver(&bus);

    ow.update_alarm_list().unwrap();
    pump(&bus, &mut ow);
    assert_eq!(ow.last_error(), None);
    assert_eq!(ow.device_count(), 1);
    assert_eq!(ow.devices()[0], RomId::from_bytes(noisy));

    // the unconditional search still sees both
    ow.update_device_list().unwrap();
    pump(&bus, &mut ow);
    assert_eq!(ow.device_count(), 2);
}

#[test]
fn discovery_stops_at_list_capacity() {
    let bus = (0u8..4).fold(SimBus::new(), |bus, i| {
        bus.with_device(rom_with_crc(FAMILY, [i + 1, 0, 0, 0, 0, 0]))
    });
    let mut ow: Driver<2> = driver(&bus);
    ow.update_device_list().unwrap();
    pump(&bus, &mut ow);
    assert_eq!(ow.last_error(), None);
    assert_eq!(ow.device_count(), 2);
}

#[test]
fn scratchpad_round_trip_echoes_the_payload() {
    let bus = SimBus::new().with_device(rom_with_crc(FAMILY, [6, 0, 0, 0, 0, 0]));
    let mut ow: Driver<4> = driver(&bus);

    ow.write(WRITE_SCRATCHPAD_CMD, b"echo!").unwrap();
    pump(&bus, &mut ow);
    assert_eq!(ow.last_error(), None);
    assert_eq!(bus.scratchpad(0), Some(b"echo!".to_vec()));

    ow.read(READ_SCRATCHPAD_CMD, 5).unwrap();
    pump(&bus, &mut ow);
    let mut buf = [0u8; 16];
    assert_eq!(ow.read_response(&mut buf), 5);
    assert_eq!(&buf[..5], b"echo!");

    // the caller's capacity bounds the copy
    let mut small = [0u8; 3];
    assert_eq!(ow.read_response(&mut small), 3);
    assert_eq!(&small, b"ech");
}

#[test]
fn match_rom_reaches_only_the_addressed_device() {
    let rom_a = rom_with_crc(FAMILY, [0xaa, 1, 0, 0, 0, 0]);
    let rom_b = rom_with_crc(FAMILY, [0xbb, 2, 0, 0, 0, 0]);
    let bus = SimBus::new().with_device(rom_a).with_device(rom_b);
    let mut ow: Driver<4> = driver(&bus);

    ow.update_device_list().unwrap();
    pump(&bus, &mut ow);
    assert_eq!(ow.device_count(), 2);

    let idx_b = ow
        .devices()
        .iter()
        .position(|rom| rom.as_bytes() == &rom_b)
        .unwrap();
    ow.write_to(idx_b, WRITE_SCRATCHPAD_CMD, b"B!").unwrap();
    pump(&bus, &mut ow);
    assert_eq!(ow.last_error(), None);
    assert_eq!(bus.scratchpad(1), Some(b"B!".to_vec()));
    assert_eq!(bus.scratchpad(0), Some(Vec::new()));

    ow.read_from(idx_b, READ_SCRATCHPAD_CMD, 2).unwrap();
    pump(&bus, &mut ow);
    let mut buf = [0u8; 2];
    assert_eq!(ow.read_response(&mut buf), 2);
    assert_eq!(&buf, b"B!");
}

#[test]
fn requests_while_busy_are_rejected_without_touching_the_bus() {
    let bus = SimBus::new().with_device(rom_with_crc(FAMILY, [7, 7, 0, 0, 0, 0]));
    let mut ow: Driver<4> = driver(&bus);

    ow.update_device_list().unwrap();
    assert!(ow.is_busy());
    let ops_before = bus.pin_ops();
    assert_eq!(ow.write(WRITE_SCRATCHPAD_CMD, b"x"), Err(OwError::Busy));
    assert_eq!(bus.pin_ops(), ops_before);
    assert_eq!(ow.last_error(), None);

    // the in-flight search was unharmed
    pump(&bus, &mut ow);
    assert_eq!(ow.device_count(), 1);
}

#[test]
fn empty_bus_fails_reset_and_releases_the_line() {
    let bus = SimBus::new();
    let mut ow: Driver<4> = driver(&bus);
    // the line idles high, so arming succeeds
    ow.update_device_list().unwrap();
    pump(&bus, &mut ow);
    assert_eq!(ow.last_error(), Some(OwError::ResetFailed));
    assert!(!ow.is_busy());
    assert!(bus.line_is_high());
}

#[test]
fn held_low_line_faults_before_any_slot() {
    let bus = SimBus::new().with_device(rom_with_crc(FAMILY, [8, 0, 0, 0, 0, 0]));
    bus.hold_low(true);
    let mut ow: Driver<4> = driver(&bus);
    assert_eq!(ow.read(READ_SCRATCHPAD_CMD, 1), Err(OwError::BusFault));
    assert!(!ow.is_busy());
    assert_eq!(bus.reset_pulses(), 0);
}

#[test]
fn single_device_configuration_reads_the_rom_directly() {
    let rom = rom_with_crc(0x10, [0x31, 0x15, 0x00, 0x00, 0x0a, 0x00]);
    let bus = SimBus::new().with_device(rom);
    let mut ow: Driver<1> = driver(&bus);

    ow.update_device_list().unwrap();
    pump(&bus, &mut ow);

    assert_eq!(ow.last_error(), None);
    assert_eq!(ow.device_count(), 1);
    assert_eq!(ow.devices()[0], RomId::from_bytes(rom));
    assert_eq!(ow.devices()[0].family(), 0x10);
    assert!(ow.devices()[0].is_valid());
    assert_eq!(bus.reset_pulses(), 1);
}

static OUTCOME: AtomicU8 = AtomicU8::new(0);

fn record_outcome(result: Result<(), OwError<Infallible>>) {
    OUTCOME.store(if result.is_ok() { 1 } else { 2 }, Ordering::SeqCst);
}

#[test]
fn completion_hook_fires_when_the_operation_settles() {
    let bus = SimBus::new().with_device(rom_with_crc(FAMILY, [9, 0, 0, 0, 0, 0]));
    let mut ow: Driver<4> = OneWire::new(bus.pin(), bus.timer())
        .unwrap()
        .with_completion(record_outcome);

    ow.write(WRITE_SCRATCHPAD_CMD, b"hi").unwrap();
    pump(&bus, &mut ow);
    assert_eq!(OUTCOME.load(Ordering::SeqCst), 1);
}
