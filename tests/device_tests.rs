//! End-to-end tests against the simulated ISE

use ise_host::sim::{
    MemoryStorage, RecordingSink, SharedMedMemory, SimIse, SimOptions, SIM_ATR, SIM_REFUSE_STATUS, SIM_UNKNOWN_COMMAND,
};
use ise_host::{
    command, Collaborators, FaultEntry, Frame, IseConfig, IseDevice, IseError, IseEvent, MedLayout, MedMemory,
    MedRange, MedRegion, MedRewriteRequest, PowerState, StdDelay,
};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

struct Harness {
    sim: Arc<SimIse>,
    device: IseDevice<SimIse, StdDelay>,
    storage: MemoryStorage,
    memory: Arc<SharedMedMemory>,
    events: Arc<RecordingSink>,
}

fn test_config() -> IseConfig {
    IseConfig {
        fifo_poll_interval_us: 10,
        fifo_timeout_ms: 50,
        status_poll_interval_us: 10,
        status_poll_attempts: 50,
        calibration_poll_interval_us: 10,
        calibration_attempts: 50,
        reset_settle_us: 10,
        reply_timeout_ms: 1_000,
        read_timeout_ms: 100,
        fault_capacity: 4,
        med: MedLayout::with_area_size(0x20_0000),
        ..IseConfig::default()
    }
}

fn harness_with(options: SimOptions, config: IseConfig) -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();

    let sim = Arc::new(SimIse::new(options));
    let storage = MemoryStorage::new();
    let memory = Arc::new(SharedMedMemory::new(&config.med));
    let events = Arc::new(RecordingSink::new());

    let device = IseDevice::attach(
        sim.clone(),
        StdDelay,
        config,
        Collaborators {
            storage: Box::new(storage.clone()),
            memory: memory.clone(),
            events: events.clone(),
        },
    )
    .unwrap();

    let irq = device.irq_handle();
    sim.connect_irq(move || {
        irq.handle();
    });

    Harness {
        sim,
        device,
        storage,
        memory,
        events,
    }
}

fn harness(options: SimOptions) -> Harness {
    harness_with(options, test_config())
}

fn powered() -> Harness {
    let h = harness(SimOptions::default());
    h.device.power_on().unwrap();
    h
}

fn data_frame(payload: &[u8]) -> Vec<u32> {
    Frame::new(payload.to_vec(), 1024).unwrap().to_words()
}

fn read_frame(device: &IseDevice<SimIse, StdDelay>) -> Result<Vec<u8>, IseError> {
    let mut buf = [0u8; 64];
    let n = device.read(&mut buf)?;
    Ok(buf[..n].to_vec())
}

fn fault_batches(events: &[IseEvent]) -> Vec<(Vec<u32>, bool)> {
    events
        .iter()
        .filter_map(|e| match e {
            IseEvent::Faults(batch) => Some((
                batch.entries.iter().map(|FaultEntry { code }| *code).collect(),
                batch.possible_loss,
            )),
            _ => None,
        })
        .collect()
}

#[test]
fn test_power_on_delivers_atr() {
    let h = powered();

    assert_eq!(h.device.query_power_status().unwrap(), PowerState::PoweredOn);
    let ready = h.events.wait_for(|e| matches!(e, IseEvent::Ready { .. }), WAIT);
    assert_eq!(ready, Some(IseEvent::Ready { atr: SIM_ATR.to_vec() }));
}

#[test]
fn test_power_on_when_already_on_is_noop() {
    let h = powered();
    let writes = h.sim.power_write_log().len();

    h.device.power_on().unwrap();
    assert_eq!(h.sim.power_write_log().len(), writes);
}

#[test]
fn test_soft_reset_twice_stays_powered() {
    let h = powered();

    h.device.soft_reset().unwrap();
    h.device.soft_reset().unwrap();

    assert_eq!(h.device.query_power_status().unwrap(), PowerState::PoweredOn);
}

#[test]
fn test_soft_reset_requires_power() {
    let h = harness(SimOptions::default());
    assert_eq!(h.device.soft_reset(), Err(IseError::PowerNotReady));
}

#[test]
fn test_calibration_failure_surfaces() {
    let h = harness(SimOptions {
        fail_calibration: true,
        ..SimOptions::default()
    });

    assert_eq!(
        h.device.power_on(),
        Err(IseError::CalibrationFailed { attempts: 50 })
    );
    assert_eq!(h.device.query_power_status().unwrap(), PowerState::PoweredDown);
}

#[test]
fn test_stuck_status_reports_timed_out() {
    let h = harness(SimOptions {
        status_stuck: true,
        ..SimOptions::default()
    });

    assert_eq!(h.device.query_power_status().unwrap(), PowerState::TimedOut);
    assert_eq!(h.device.write(b"x"), Err(IseError::PowerNotReady));
}

#[test]
fn test_ping_round_trip() {
    let h = powered();

    let reply = h
        .device
        .send_command_wait_reply(command::PING, &[1, 2, 3, 4, 5, 6, 7, 8], 2, WAIT)
        .unwrap();
    assert_eq!(reply, vec![0x0102_0304, 0x0506_0708]);
}

#[test]
fn test_reply_truncated_to_requested_words() {
    let h = powered();

    let reply = h
        .device
        .send_command_wait_reply(command::PING, &[0xAA; 12], 1, WAIT)
        .unwrap();
    assert_eq!(reply, vec![0xAAAA_AAAA]);
    assert_eq!(h.sim.inbound_len(), 0);
}

#[test]
fn test_unknown_command_reply() {
    let h = powered();
    let reply = h.device.send_command_wait_reply(0x7F, &[], 1, WAIT).unwrap();
    assert_eq!(reply, vec![SIM_UNKNOWN_COMMAND]);
}

#[test]
fn test_stalled_write_times_out_and_status_still_works() {
    let h = harness(SimOptions {
        stall_outbound: true,
        ..SimOptions::default()
    });
    h.device.power_on().unwrap();
    let clears = h.sim.fifo_clears();

    assert_eq!(h.device.write(&[0x1, 0x2, 0x3]), Err(IseError::Timeout));
    assert!(h.sim.fifo_clears() > clears);
    assert_eq!(h.device.query_power_status().unwrap(), PowerState::PoweredOn);
}

#[test]
fn test_command_timeout_clears_fifo() {
    let h = harness(SimOptions {
        stall_outbound: true,
        ..SimOptions::default()
    });
    h.device.power_on().unwrap();

    assert_eq!(
        h.device.send_command_wait_reply(command::PING, &[], 1, WAIT),
        Err(IseError::Timeout)
    );
    assert_eq!(h.device.query_power_status().unwrap(), PowerState::PoweredOn);
}

#[test]
fn test_write_then_read() {
    let h = powered();

    h.device.write(&command::encode(command::PING, &[0xCAFE_F00D])).unwrap();

    let mut buf = [0u8; 16];
    let n = h.device.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], &[0xCA, 0xFE, 0xF0, 0x0D]);
}

#[test]
fn test_read_times_out_without_data() {
    let h = powered();
    let clears = h.sim.fifo_clears();

    let mut buf = [0u8; 16];
    assert_eq!(h.device.read(&mut buf), Err(IseError::Timeout));
    assert!(h.sim.fifo_clears() > clears);
}

#[test]
fn test_read_into_small_buffer() {
    let h = powered();
    h.device.write(&command::encode(command::PING, &[1, 2])).unwrap();

    let mut buf = [0u8; 4];
    assert_eq!(
        h.device.read(&mut buf),
        Err(IseError::BufferTooSmall { needed: 8, available: 4 })
    );
}

#[test]
fn test_corrupt_inbound_frame_is_discarded() {
    let h = powered();
    h.sim.inject_inbound_data(&[0xBAD0_0008, 0x1111_1111, 0x2222_2222]);

    let mut buf = [0u8; 16];
    assert_eq!(
        h.device.read(&mut buf),
        Err(IseError::InvalidMagic { found: 0xBAD0 })
    );
    assert_eq!(h.sim.inbound_len(), 0);

    let reply = h.device.send_command_wait_reply(command::PING, &[9, 9, 9, 9], 1, WAIT).unwrap();
    assert_eq!(reply, vec![0x0909_0909]);
}

#[test]
fn test_queued_frames_are_each_read() {
    let h = powered();
    h.sim.inject_inbound_data(&data_frame(&[1; 4]));
    h.sim.inject_inbound_data(&data_frame(&[2; 4]));

    assert_eq!(read_frame(&h.device), Ok(vec![1; 4]));
    assert_eq!(read_frame(&h.device), Ok(vec![2; 4]));
    assert_eq!(h.sim.inbound_len(), 0);
}

#[test]
fn test_back_to_back_writes_each_get_a_reply() {
    let h = powered();
    h.device.write(&command::encode(command::PING, &[0x1111_1111])).unwrap();
    h.device.write(&command::encode(command::PING, &[0x2222_2222])).unwrap();

    assert_eq!(read_frame(&h.device), Ok(vec![0x11; 4]));
    assert_eq!(read_frame(&h.device), Ok(vec![0x22; 4]));
}

#[test]
fn test_data_frame_ahead_of_rewrite_info_is_routed_apart() {
    let h = powered();
    let request = MedRewriteRequest {
        offset: 0x1000,
        length: 0x20,
    };
    h.sim.inject_inbound_data(&data_frame(b"hello!!!"));
    h.sim.inject_rewrite(&[request]);

    let event = h
        .events
        .wait_for(|e| matches!(e, IseEvent::MedRewritten { .. }), WAIT)
        .unwrap();
    assert!(matches!(event, IseEvent::MedRewritten { request: r, .. } if r == request));
    assert_eq!(read_frame(&h.device), Ok(b"hello!!!".to_vec()));

    let rejected = h
        .events
        .events()
        .into_iter()
        .filter(|e| matches!(e, IseEvent::MedRewriteRejected { .. }))
        .count();
    assert_eq!(rejected, 0);
}

#[test]
fn test_unsolicited_data_survives_a_command() {
    let h = powered();
    let request = MedRewriteRequest {
        offset: 0x4000,
        length: 0x10,
    };
    h.sim.inject_inbound_data(&data_frame(b"early"));
    h.sim.inject_rewrite(&[request]);

    let reply = h
        .device
        .send_command_wait_reply(command::PING, &[3, 3, 3, 3], 1, WAIT)
        .unwrap();
    assert_eq!(reply, vec![0x0303_0303]);

    assert!(h
        .events
        .wait_for(|e| matches!(e, IseEvent::MedRewritten { request: r, .. } if *r == request), WAIT)
        .is_some());
    assert_eq!(read_frame(&h.device), Ok(b"early".to_vec()));
}

#[test]
fn test_power_down_after_deep_sleep_is_rejected() {
    let h = powered();
    h.sim.enter_deep_sleep();

    assert_eq!(h.device.query_power_status().unwrap(), PowerState::PoweredDown);
    assert_eq!(h.device.full_power_down(), Err(IseError::PowerNotReady));
    assert_eq!(h.device.write(b"late"), Err(IseError::PowerNotReady));
    assert!(h.storage.writes().is_empty());
}

#[test]
fn test_full_power_down_persists_after_ack() {
    let h = powered();
    let layout = h.device.config().med;
    h.memory.write(MedRegion::Counter, layout.counter_base, &[0xC0, 0x01]).unwrap();
    h.memory.write(MedRegion::Level1, layout.level1_base, &[0x11; 8]).unwrap();

    h.device.full_power_down().unwrap();

    assert_eq!(h.device.query_power_status().unwrap(), PowerState::PoweredDown);
    assert_eq!(
        h.storage.writes(),
        vec![(MedRegion::Counter, 0, 64), (MedRegion::Level1, 0, 512)]
    );
    assert_eq!(&h.storage.region(MedRegion::Counter)[..2], &[0xC0, 0x01]);
    assert_eq!(&h.storage.region(MedRegion::Level1)[..8], &[0x11; 8]);
}

#[test]
fn test_refused_power_down_persists_nothing() {
    let h = harness(SimOptions {
        refuse_power_down: true,
        ..SimOptions::default()
    });
    h.device.power_on().unwrap();

    assert_eq!(
        h.device.full_power_down(),
        Err(IseError::PowerDownRefused { status: SIM_REFUSE_STATUS })
    );
    assert!(h.storage.writes().is_empty());
    assert_eq!(h.device.query_power_status().unwrap(), PowerState::PoweredOn);
}

#[test]
fn test_hard_reset_cycle() {
    let h = powered();

    h.device.hard_reset_set().unwrap();
    assert_eq!(h.device.query_power_status().unwrap(), PowerState::PoweredDown);
    h.device.hard_reset_clear().unwrap();
    assert_eq!(h.device.query_power_status().unwrap(), PowerState::PoweredOn);

    h.device.hard_reset().unwrap();
    assert_eq!(h.device.query_power_status().unwrap(), PowerState::PoweredOn);
}

#[test]
fn test_fault_delivery_is_rate_limited() {
    let h = powered();

    h.sim.inject_fault(5);
    h.sim.inject_fault(5);
    h.sim.inject_fault(7);

    assert!(h
        .events
        .wait_for(|e| matches!(e, IseEvent::Faults(_)), WAIT)
        .is_some());
    // Give the worker time to drain the remaining codes into the cache
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(fault_batches(&h.events.events()), vec![(vec![5], false)]);

    h.device.acknowledge_fault_delivery().unwrap();
    assert_eq!(
        fault_batches(&h.events.events()),
        vec![(vec![5], false), (vec![7], false)]
    );
}

#[test]
fn test_fault_overflow_reports_possible_loss() {
    let h = powered();

    h.sim.inject_fault(1);
    assert!(h
        .events
        .wait_for(|e| matches!(e, IseEvent::Faults(_)), WAIT)
        .is_some());

    for code in 10..16 {
        h.sim.inject_fault(code);
    }
    std::thread::sleep(Duration::from_millis(200));

    h.device.acknowledge_fault_delivery().unwrap();
    let batches = fault_batches(&h.events.events());
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[1], (vec![10, 11, 12, 13], true));
}

#[test]
fn test_rewrite_persists_leaves_before_roots() {
    let h = powered();
    let request = MedRewriteRequest {
        offset: 0x80000,
        length: 0x10,
    };
    h.sim.inject_rewrite(&[request]);

    let event = h
        .events
        .wait_for(|e| matches!(e, IseEvent::MedRewritten { .. }), WAIT)
        .unwrap();
    let IseEvent::MedRewritten { plan, .. } = event else {
        unreachable!()
    };

    assert_eq!(plan.level2_range, MedRange { offset: 0, length: 0x800 });
    assert_eq!(
        h.storage.writes(),
        vec![
            (MedRegion::Data, plan.data_range.offset, plan.data_range.length as usize),
            (MedRegion::Level3, plan.level3_range.offset, plan.level3_range.length as usize),
            (MedRegion::Level2, 0, 0x800),
            (MedRegion::Level1, 0, 512),
        ]
    );
}

#[test]
fn test_rewrite_outside_window_is_rejected() {
    let h = powered();
    let area = h.device.config().med.area_size;
    let request = MedRewriteRequest {
        offset: area - 1,
        length: 2,
    };
    h.sim.inject_rewrite(&[request]);

    let event = h
        .events
        .wait_for(|e| matches!(e, IseEvent::MedRewriteRejected { .. }), WAIT)
        .unwrap();
    assert!(matches!(event, IseEvent::MedRewriteRejected { request: r, .. } if r == request));
    assert!(h.storage.writes().is_empty());
}

#[test]
fn test_rewrite_storage_failure_is_reported() {
    let h = powered();
    h.storage.set_fail_writes(true);
    h.sim.inject_rewrite(&[MedRewriteRequest { offset: 0, length: 4 }]);

    assert!(h
        .events
        .wait_for(|e| matches!(e, IseEvent::MedRewriteRejected { .. }), WAIT)
        .is_some());
}

#[test]
fn test_med_error_and_watchdog_events() {
    let h = powered();

    h.sim.inject_med_error(0x42);
    h.sim.inject_watchdog();

    assert_eq!(
        h.events.wait_for(|e| matches!(e, IseEvent::MedError { .. }), WAIT),
        Some(IseEvent::MedError { code: 0x42 })
    );
    assert!(h.events.wait_for(|e| matches!(e, IseEvent::Watchdog), WAIT).is_some());
}

#[test]
fn test_transfer_error_clears_fifo() {
    let h = powered();
    let clears = h.sim.fifo_clears();

    h.sim.inject_transfer_error();
    assert!(h
        .events
        .wait_for(|e| matches!(e, IseEvent::TransferError), WAIT)
        .is_some());
    assert!(h.sim.fifo_clears() > clears);
}

#[test]
fn test_restore_med_copies_storage_back() {
    let h = powered();
    let layout = h.device.config().med;
    h.memory.write(MedRegion::Counter, layout.counter_base, &[7; 4]).unwrap();
    h.device.full_power_down().unwrap();

    h.memory.write(MedRegion::Counter, layout.counter_base, &[0; 4]).unwrap();
    h.device.restore_med().unwrap();

    let range = MedRange { offset: layout.counter_base, length: 4 };
    assert_eq!(h.memory.read(MedRegion::Counter, range).unwrap(), vec![7; 4]);
}

#[test]
fn test_transport_state_snapshot() {
    let h = powered();
    h.sim.push_inbound(&[1, 2, 3]);

    let state = h.device.transport_state().unwrap();
    assert_eq!(state.inbound.count, 3);

    h.device.clear_fifo().unwrap();
    assert_eq!(h.device.transport_state().unwrap().inbound.count, 0);
}

#[test]
fn test_concurrent_commands_are_serialized() {
    let h = powered();
    let device = Arc::new(h.device);

    let workers: Vec<_> = (0u8..4)
        .map(|i| {
            let device = device.clone();
            std::thread::spawn(move || {
                device
                    .send_command_wait_reply(command::PING, &[i; 4], 1, WAIT)
                    .unwrap()
            })
        })
        .collect();

    for (i, worker) in workers.into_iter().enumerate() {
        let expected = u32::from_be_bytes([i as u8; 4]);
        assert_eq!(worker.join().unwrap(), vec![expected]);
    }
}
