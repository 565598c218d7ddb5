//! ---
//! ezmb_section: "15-testing-qa-runbook"
//! ezmb_subsection: "integration-tests"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Port set behaviour against pseudo-terminal devices."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ezmb_common::PortConfig;
use ezmb_serial::{PortHandler, PortSet, PortSetOptions, SerialError};
use parking_lot::Mutex;
use serialport::{SerialPort, TTYPort};

type Deliveries = Arc<Mutex<Vec<(String, Vec<u8>)>>>;

fn recording_handler() -> (PortHandler, Deliveries) {
    let seen: Deliveries = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler: PortHandler = Arc::new(move |id: &str, data: &[u8]| {
        sink.lock().push((id.to_owned(), data.to_vec()));
    });
    (handler, seen)
}

/// A pseudo-terminal whose slave side is addressed by path.
fn virtual_device() -> (TTYPort, PathBuf) {
    let (mut master, slave) = TTYPort::pair().expect("pty pair");
    master.set_timeout(Duration::from_secs(2)).unwrap();
    let path = PathBuf::from(slave.name().expect("slave name"));
    drop(slave);
    (master, path)
}

fn fast_options() -> PortSetOptions {
    PortSetOptions {
        monitor_interval: Duration::from_millis(200),
        ..PortSetOptions::default()
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn wait_open(set: &PortSet, id: &str) {
    assert!(
        wait_until(Duration::from_secs(3), || set.port(id).is_some_and(|p| p.is_open())),
        "port {id} never opened"
    );
}

fn delivered_bytes(seen: &Deliveries, id: &str) -> Vec<u8> {
    seen.lock()
        .iter()
        .filter(|(port, _)| port == id)
        .flat_map(|(_, data)| data.iter().copied())
        .collect()
}

#[test]
fn bytes_round_trip_in_order_within_buffer_capacity() {
    let (mut master, device) = virtual_device();
    let (handler, seen) = recording_handler();
    let set = PortSet::with_options(fast_options());
    set.add_port(PortConfig::new("U1", &device).with_maxlen(8), handler)
        .unwrap();
    set.start().unwrap();
    wait_open(&set, "U1");

    let inbound: Vec<u8> = (0u8..19).collect();
    master.write_all(&inbound).unwrap();
    assert!(wait_until(Duration::from_secs(2), || delivered_bytes(&seen, "U1").len() == 19));
    assert_eq!(delivered_bytes(&seen, "U1"), inbound);
    assert!(seen.lock().iter().all(|(_, chunk)| chunk.len() <= 8));

    let outbound = b"\x01\x03\x00\x10\x00\x02";
    assert_eq!(set.write("U1", outbound).unwrap(), outbound.len());
    let mut echoed = [0u8; 6];
    master.read_exact(&mut echoed).unwrap();
    assert_eq!(&echoed, outbound);

    set.stop();
}

#[test]
fn only_the_port_with_pending_data_is_called_back() {
    let (mut master1, device1) = virtual_device();
    let (_master2, device2) = virtual_device();
    let (handler, seen) = recording_handler();
    let set = PortSet::with_options(fast_options());
    set.add_port(PortConfig::new("U1", &device1), Arc::clone(&handler))
        .unwrap();
    set.add_port(PortConfig::new("U2", &device2), handler)
        .unwrap();
    set.start().unwrap();
    wait_open(&set, "U1");
    wait_open(&set, "U2");

    master1.write_all(b"0123456789abcdefghi").unwrap();
    assert!(wait_until(Duration::from_secs(2), || !seen.lock().is_empty()));
    thread::sleep(Duration::from_millis(300));

    let deliveries = seen.lock().clone();
    assert_eq!(deliveries.len(), 1, "deliveries: {deliveries:?}");
    assert_eq!(deliveries[0].0, "U1");
    assert_eq!(deliveries[0].1, b"0123456789abcdefghi");
    set.stop();
}

#[test]
fn stuck_output_on_one_port_never_stalls_another() {
    let (_undrained, device1) = virtual_device();
    let (mut master2, device2) = virtual_device();
    let (handler, seen) = recording_handler();
    let set = PortSet::with_options(fast_options());
    set.add_port(PortConfig::new("U1", &device1), Arc::clone(&handler))
        .unwrap();
    set.add_port(PortConfig::new("U2", &device2), handler)
        .unwrap();
    set.start().unwrap();
    wait_open(&set, "U1");
    wait_open(&set, "U2");

    let (done_tx, done_rx) = mpsc::channel();
    thread::scope(|scope| {
        let set = &set;
        scope.spawn(move || {
            let outcome = set.write("U1", &vec![b'x'; 1 << 20]);
            let _ = done_tx.send(outcome);
        });

        master2.write_all(b"u2").unwrap();
        assert!(
            wait_until(Duration::from_millis(1500), || delivered_bytes(&seen, "U2") == b"u2"),
            "U2 starved while U1 was writing"
        );
        let outcome = done_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("write to an undrained port returned");
        match outcome {
            Ok(written) => assert!(written < 1 << 20),
            Err(SerialError::TransientIo(_)) => {}
            Err(err) => panic!("unexpected write error: {err}"),
        }
    });
    set.stop();
}

#[test]
fn vanished_device_closes_and_reopens() {
    let dir = tempfile::tempdir().unwrap();
    let (mut master, target) = virtual_device();
    let link = dir.path().join("ttyEZMB0");
    std::os::unix::fs::symlink(&target, &link).unwrap();

    let (handler, seen) = recording_handler();
    let set = PortSet::with_options(fast_options());
    set.add_port(PortConfig::new("U1", &link), handler).unwrap();
    set.start().unwrap();
    wait_open(&set, "U1");

    std::fs::remove_file(&link).unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || !set.port("U1").unwrap().is_open()),
        "port stayed open after its device vanished"
    );
    assert!(matches!(
        set.write("U1", b"x"),
        Err(SerialError::Closed { .. })
    ));

    std::os::unix::fs::symlink(&target, &link).unwrap();
    wait_open(&set, "U1");
    master.write_all(b"back").unwrap();
    assert!(wait_until(Duration::from_secs(2), || delivered_bytes(&seen, "U1") == b"back"));
    set.stop();
}

#[test]
fn ports_added_while_running_join_the_reader() {
    let set = PortSet::with_options(fast_options());
    set.start().unwrap();

    let (mut master, device) = virtual_device();
    let (handler, seen) = recording_handler();
    set.add_port(PortConfig::new("late", &device), handler)
        .unwrap();
    wait_open(&set, "late");
    master.write_all(b"hi").unwrap();
    assert!(wait_until(Duration::from_secs(2), || delivered_bytes(&seen, "late") == b"hi"));

    assert!(set.remove_port("late"));
    assert!(matches!(
        set.write("late", b"x"),
        Err(SerialError::NotFound { .. })
    ));
    set.stop();
}

#[test]
fn missing_device_never_blocks_other_ports() {
    let (mut master, device) = virtual_device();
    let (handler, seen) = recording_handler();
    let set = PortSet::with_options(fast_options());
    set.add_port(
        PortConfig::new("ghost", Path::new("/dev/ezmb-does-not-exist")),
        Arc::clone(&handler),
    )
    .unwrap();
    set.add_port(PortConfig::new("real", &device), handler)
        .unwrap();
    set.start().unwrap();
    wait_open(&set, "real");

    master.write_all(b"ok").unwrap();
    assert!(wait_until(Duration::from_secs(2), || delivered_bytes(&seen, "real") == b"ok"));
    let statuses = set.statuses();
    assert_eq!(statuses.len(), 2);
    assert!(!statuses[0].open);
    assert!(statuses[1].open);
    set.stop();
}
