use clap::Parser;
use onewire_tick::OneWire;
use onewire_tick_sim::{
    READ_SCRATCHPAD_CMD, SimBus, WRITE_SCRATCHPAD_CMD, pump, rom_with_crc,
};

/// Exercise the slot-timer 1-Wire master against a simulated bus.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of simulated devices to put on the bus
    #[arg(short, long, default_value_t = 3)]
    devices: u8,
    /// Payload to store in the first device's scratchpad and read back
    #[arg(short, long, default_value = "ping")]
    payload: String,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut bus = SimBus::new();
    for i in 0..args.devices {
        bus = bus.with_device(rom_with_crc(0x28, [i + 1, 0xd4, 0x13, 0x02, 0x00, 0x9e]));
    }

    let mut ow: OneWire<_, _, 16, 26> =
        OneWire::new(bus.pin(), bus.timer()).expect("failed to claim the bus pin");

    ow.update_device_list().expect("failed to arm the search");
    let ticks = pump(&bus, &mut ow);
    if let Some(err) = ow.last_error() {
        log::error!("search failed: {err:?}");
        return;
    }
    log::info!(
        "search found {} devices in {ticks} timer periods",
        ow.device_count()
    );
    for (idx, rom) in ow.devices().iter().enumerate() {
        log::info!("  [{idx}] {rom} (family {:#04x})", rom.family());
    }

    let payload = args.payload.as_bytes();
    ow.write_to(0, WRITE_SCRATCHPAD_CMD, payload)
        .expect("failed to arm the scratchpad write");
    pump(&bus, &mut ow);

    ow.read_from(0, READ_SCRATCHPAD_CMD, payload.len())
        .expect("failed to arm the scratchpad read");
    pump(&bus, &mut ow);

    let mut response = vec![0u8; payload.len()];
    let copied = ow.read_response(&mut response);
    log::info!(
        "device 0 echoed {copied} bytes: {:?}",
        String::from_utf8_lossy(&response[..copied])
    );
}
