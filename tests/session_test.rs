//! End-to-end session tests against the simulated dongle

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use rtlstream::sim::{CancelBehavior, SimDriver, SimTransport};
use rtlstream::{
    DeviceRegistry, DeviceSelector, Error, Gain, Session, SessionState, StreamConfig, StreamState,
    TunerConfig,
};

const READ_WAIT: Duration = Duration::from_secs(2);

fn open_session(count: usize) -> (Arc<SimTransport>, Session) {
    let driver = SimDriver::new(count);
    let sim = driver.device(0).expect("sim device 0");
    let registry = DeviceRegistry::new(driver);
    let session = Session::open(&registry, &DeviceSelector::Index(0)).unwrap();
    (sim, session)
}

#[test]
fn test_ten_completions_read_in_order() {
    let (sim, mut session) = open_session(1);
    session.start(16384, 4).unwrap();
    assert_eq!(sim.pending(), 4);

    for n in 0..10u8 {
        assert!(sim.complete_next(&helpers::tagged_block(n, 16384)));
        let buffer = session.read_timeout(READ_WAIT).unwrap().expect("buffer");
        assert_eq!(buffer.sequence(), u64::from(n));
        assert_eq!(buffer.len(), 16384);
        assert!(buffer.as_bytes().iter().all(|&b| b == n));
        session.release(buffer).unwrap();
    }

    let stats = session.stats().unwrap();
    assert_eq!(stats.delivered, 10);
    assert_eq!(stats.completed, 10);
    assert_eq!(stats.pool.submitted, 4);
    session.close().unwrap();
}

#[test]
fn test_sequences_strictly_increase_with_backlog() {
    let (sim, mut session) = open_session(1);
    session.start(512, 4).unwrap();

    // complete the whole pool before reading anything
    for n in 0..4u8 {
        assert!(sim.complete_next(&[n; 512]));
    }
    let mut last = None;
    let mut seen = 0;
    while seen < 4 {
        let buffer = session.read_timeout(READ_WAIT).unwrap().expect("buffer");
        if let Some(prev) = last {
            assert!(buffer.sequence() > prev);
        }
        last = Some(buffer.sequence());
        session.release(buffer).unwrap();
        seen += 1;
    }
    let stats = session.stats().unwrap();
    assert!(stats.backpressure_events >= 1);
}

#[test]
fn test_pool_invariant_holds_throughout() {
    let (sim, mut session) = open_session(1);
    session.start(512, 3).unwrap();

    let check = |session: &Session| {
        let pool = session.stats().unwrap().pool;
        assert_eq!(pool.free + pool.submitted + pool.ready, 3, "{:?}", pool);
    };

    check(&session);
    sim.complete_next(&[1; 512]);
    let a = session.read_timeout(READ_WAIT).unwrap().unwrap();
    check(&session);
    sim.complete_next(&[2; 512]);
    let b = session.read_timeout(READ_WAIT).unwrap().unwrap();
    check(&session);
    session.release(a).unwrap();
    check(&session);
    session.stop().unwrap();
    check(&session);
    session.release(b).unwrap();
    check(&session);
    assert_eq!(session.stats().unwrap().pool.free, 3);
}

#[test]
fn test_configure_after_start_is_invalid_state() {
    let (_, mut session) = open_session(1);
    session
        .configure(&TunerConfig::default().center_freq(1_090_000_000).gain(Gain::Manual(496)))
        .unwrap();
    session.start(512, 2).unwrap();
    let err = session
        .configure(&TunerConfig::default().center_freq(100_000_000))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));
    assert_eq!(session.settings().center_freq, 1_090_000_000);
}

#[test]
fn test_read_after_stop_is_stopped() {
    let (sim, mut session) = open_session(1);
    session.start(512, 2).unwrap();
    sim.complete_next(&[7; 512]);
    std::thread::sleep(Duration::from_millis(20));
    session.stop().unwrap();
    // the queued buffer was dropped by stop
    assert!(matches!(session.read(), Err(Error::Stopped)));
    assert_eq!(session.state(), SessionState::Stopped);
}

#[test]
fn test_stop_with_all_but_one_in_flight() {
    let (sim, mut session) = open_session(1);
    session.start(512, 4).unwrap();
    sim.complete_next(&[1; 512]);
    let lent = session.read_timeout(READ_WAIT).unwrap().unwrap();
    assert_eq!(sim.pending(), 3);

    session.stop().unwrap();
    let stats = session.stats().unwrap();
    assert_eq!(stats.pool.submitted, 0);
    assert_eq!(stats.pool.lent, 1);
    assert_eq!(sim.pending(), 0);
    session.release(lent).unwrap();
}

#[test]
fn test_stop_drain_timeout_reclaims_buffers() {
    let (sim, mut session) = open_session(1);
    sim.set_cancel_behavior(CancelBehavior::Stall);
    let config = StreamConfig::new(512, 4).with_drain_timeout(Duration::from_millis(100));
    session.start_with(config).unwrap();
    sim.complete_next(&[1; 512]);
    let lent = session.read_timeout(READ_WAIT).unwrap().unwrap();

    let started = std::time::Instant::now();
    let err = session.stop().unwrap_err();
    assert!(matches!(err, Error::DrainTimeout { outstanding: 3 }));
    assert!(started.elapsed() < Duration::from_secs(2));

    let pool = session.stats().unwrap().pool;
    assert_eq!(pool.submitted, 0);
    assert_eq!(pool.free + pool.ready, 4);
    session.release(lent).unwrap();
    assert_eq!(session.stats().unwrap().pool.free, 4);
}

#[test]
fn test_unplug_faults_stream() {
    let (sim, mut session) = open_session(1);
    session.start(512, 3).unwrap();
    sim.complete_next(&[1; 512]);
    let buffer = session.read_timeout(READ_WAIT).unwrap().unwrap();

    sim.unplug();
    let err = session.read_timeout(READ_WAIT).unwrap_err();
    assert!(matches!(err, Error::DeviceDisconnected(_)));
    assert!(matches!(session.release(buffer), Err(Error::DeviceDisconnected(_))));
    assert_eq!(session.stats().unwrap().state, StreamState::Faulted);

    // stop and close still succeed so the device can be reopened
    session.stop().unwrap();
    session.close().unwrap();
}

#[test]
fn test_second_session_on_same_device_is_busy() {
    let registry = DeviceRegistry::new(SimDriver::new(1));
    let _first = Session::open(&registry, &DeviceSelector::Index(0)).unwrap();
    assert!(matches!(
        Session::open(&registry, &DeviceSelector::Index(0)),
        Err(Error::DeviceBusy(_))
    ));
}

#[test]
fn test_open_by_serial_and_filter() {
    let registry = DeviceRegistry::new(SimDriver::new(3));
    let session = Session::open(&registry, &DeviceSelector::Serial("00000002".into())).unwrap();
    assert_eq!(session.device().info().index, 1);

    let filter = DeviceSelector::Filter {
        manufacturer: Some("Realtek".into()),
        product: None,
        serial: Some("00000003".into()),
    };
    let session = Session::open(&registry, &filter).unwrap();
    assert_eq!(session.device().info().index, 2);

    assert!(matches!(
        Session::open(&registry, &DeviceSelector::Index(9)),
        Err(Error::DeviceNotFound(_))
    ));
}

#[test]
fn test_reader_on_other_thread() {
    let (sim, mut session) = open_session(1);
    session.start(512, 2).unwrap();
    let reader = session.reader().unwrap();

    let consumer = std::thread::spawn(move || {
        let mut sequences = Vec::new();
        loop {
            match reader.read() {
                Ok(buffer) => {
                    sequences.push(buffer.sequence());
                    reader.release(buffer).unwrap();
                }
                Err(Error::Stopped) => return sequences,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
    });

    let mut completed = 0;
    while completed < 6 {
        if sim.complete_next(&[0; 512]) {
            completed += 1;
        } else {
            std::thread::yield_now();
        }
    }
    // let the consumer catch up before stopping
    let deadline = std::time::Instant::now() + READ_WAIT;
    while session.stats().unwrap().delivered < 6 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    session.stop().unwrap();

    let sequences = consumer.join().unwrap();
    assert_eq!(sequences, (0..6).collect::<Vec<u64>>());
}
