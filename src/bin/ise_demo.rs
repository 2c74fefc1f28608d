//! Drives a simulated ISE through its lifecycle and prints every event as JSON
//!
//! Usage: `ise-demo [config.json]`

use anyhow::{bail, Context, Result};
use ise_host::sim::{MemoryStorage, RecordingSink, SharedMedMemory, SimIse, SimOptions};
use ise_host::{command, Collaborators, IseConfig, IseDevice, MedMemory, MedRegion, MedRewriteRequest, StdDelay};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Serialize)]
struct Summary {
    power_state: String,
    ping_reply: String,
    events: usize,
    persisted: Vec<String>,
}

fn load_config() -> Result<IseConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path))?;
            IseConfig::from_json(&json).with_context(|| format!("parsing {}", path))
        }
        None => Ok(IseConfig::default()),
    }
}

fn main() -> Result<()> {
    ise_host::init_logging();

    let config = load_config()?;
    log::info!("Using MED window of {:#x} bytes", config.med.area_size);

    let sim = Arc::new(SimIse::new(SimOptions::default()));
    let storage = MemoryStorage::new();
    let memory = Arc::new(SharedMedMemory::new(&config.med));
    let events = Arc::new(RecordingSink::new());

    memory.write(MedRegion::Counter, config.med.counter_base, &[0xC0; 4])?;
    memory.write(MedRegion::Level1, config.med.level1_base, &[0x11; 16])?;

    let device = IseDevice::attach(
        sim.clone(),
        StdDelay,
        config.clone(),
        Collaborators {
            storage: Box::new(storage.clone()),
            memory: memory.clone(),
            events: events.clone(),
        },
    )?;

    let irq = device.irq_handle();
    sim.connect_irq(move || {
        irq.handle();
    });

    device.power_on().context("power on")?;

    let ping = device.send_command_wait_reply(
        command::PING,
        &[0xDE, 0xAD, 0xBE, 0xEF],
        1,
        config.reply_timeout(),
    )?;
    let ping_reply = hex::encode(ping.iter().flat_map(|w| w.to_be_bytes()).collect::<Vec<u8>>());
    log::info!("PING reply: {}", ping_reply);

    sim.inject_fault(0x21);
    sim.inject_rewrite(&[MedRewriteRequest {
        offset: config.med.window_base + 0x80000,
        length: 0x10,
    }]);

    let rewritten = events.wait_for(
        |e| matches!(e, ise_host::IseEvent::MedRewritten { .. }),
        Duration::from_secs(2),
    );
    if rewritten.is_none() {
        bail!("rewrite notification was not handled");
    }
    device.acknowledge_fault_delivery()?;

    device.soft_reset().context("soft reset")?;
    device.full_power_down().context("power down")?;
    let power_state = device.query_power_status()?;

    sim.disconnect_irq();
    device.detach()?;

    let delivered = events.events();
    for event in &delivered {
        println!("{}", serde_json::to_string(event)?);
    }

    let summary = Summary {
        power_state: format!("{:?}", power_state),
        ping_reply,
        events: delivered.len(),
        persisted: storage
            .writes()
            .iter()
            .map(|(region, offset, len)| format!("{:?}@{:#x}+{:#x}", region, offset, len))
            .collect(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
