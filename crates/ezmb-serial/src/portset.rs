//! ---
//! ezmb_section: "04-field-io"
//! ezmb_subsection: "module"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Port collection with multiplexed reader and reconnection monitor."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::os::fd::{BorrowedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ezmb_common::PortConfig;
use indexmap::IndexMap;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, SerialError};
use crate::port::{Port, PortHandler, PortStatus, ReadOutcome};

/// Timing knobs for the two workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSetOptions {
    /// Upper bound on one multiplexed wait.
    pub poll_timeout: Duration,
    /// Sleep when no port is open or a pass could not allocate.
    pub idle_backoff: Duration,
    /// Interval between reconnection sweeps.
    pub monitor_interval: Duration,
}

impl Default for PortSetOptions {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(100),
            idle_backoff: Duration::from_millis(100),
            monitor_interval: Duration::from_secs(1),
        }
    }
}

struct Inner {
    ports: Mutex<IndexMap<String, Arc<Port>>>,
    running: AtomicBool,
    options: PortSetOptions,
}

impl Inner {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Clone the current membership without holding the lock afterwards.
    fn snapshot(&self, into: &mut Vec<Arc<Port>>) -> bool {
        into.clear();
        let ports = self.ports.lock();
        if into.try_reserve(ports.len()).is_err() {
            return false;
        }
        into.extend(ports.values().cloned());
        true
    }
}

struct Workers {
    reader: JoinHandle<()>,
    monitor: JoinHandle<()>,
}

/// Owns a set of serial ports and the workers that serve them.
///
/// Ports may be added and removed while the workers run. Every worker wait
/// is bounded, so [`PortSet::stop`] returns within one interval.
pub struct PortSet {
    inner: Arc<Inner>,
    workers: Mutex<Option<Workers>>,
}

impl PortSet {
    /// Empty set with default timings.
    pub fn new() -> Self {
        Self::with_options(PortSetOptions::default())
    }

    /// Empty set with custom timings.
    pub fn with_options(options: PortSetOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                ports: Mutex::new(IndexMap::new()),
                running: AtomicBool::new(false),
                options,
            }),
            workers: Mutex::new(None),
        }
    }

    /// Register a port in the closed state; the monitor opens it once its
    /// device is accessible. Fails with [`SerialError::DuplicateId`] if the id
    /// is taken.
    pub fn add_port(&self, config: PortConfig, handler: PortHandler) -> Result<Arc<Port>> {
        config.validate()?;
        let mut ports = self.inner.ports.lock();
        if ports.contains_key(&config.uid) {
            return Err(SerialError::DuplicateId { id: config.uid });
        }
        let uid = config.uid.clone();
        let port = Arc::new(Port::new(config, handler));
        ports.insert(uid.clone(), Arc::clone(&port));
        drop(ports);
        debug!(uid = %uid, device = %port.device().display(), "port added");
        Ok(port)
    }

    /// Stop managing `id`, closing its descriptor. Returns whether it existed.
    pub fn remove_port(&self, id: &str) -> bool {
        let removed = self.inner.ports.lock().shift_remove(id);
        match removed {
            Some(port) => {
                port.retire();
                debug!(uid = %id, "port removed");
                true
            }
            None => false,
        }
    }

    /// Write to the port `id`; see [`Port::write`].
    pub fn write(&self, id: &str, data: &[u8]) -> Result<usize> {
        let port = self.port(id).ok_or_else(|| SerialError::NotFound { id: id.to_owned() })?;
        port.write(data)
    }

    /// Look up a port.
    pub fn port(&self, id: &str) -> Option<Arc<Port>> {
        self.inner.ports.lock().get(id).cloned()
    }

    /// Number of managed ports.
    pub fn len(&self) -> usize {
        self.inner.ports.lock().len()
    }

    /// Whether no ports are managed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Status of every port in insertion order.
    pub fn statuses(&self) -> Vec<PortStatus> {
        let ports: Vec<Arc<Port>> = self.inner.ports.lock().values().cloned().collect();
        ports.iter().map(|port| port.status()).collect()
    }

    /// Whether the workers are active.
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Launch the reader and monitor workers. A no-op when already running.
    pub fn start(&self) -> Result<()> {
        let mut workers = self.workers.lock();
        if workers.is_some() {
            return Ok(());
        }
        self.inner.running.store(true, Ordering::Release);

        let reader_inner = Arc::clone(&self.inner);
        let reader = thread::Builder::new()
            .name("ezmb-serial-reader".into())
            .spawn(move || reader_loop(reader_inner))
            .map_err(|source| {
                self.inner.running.store(false, Ordering::Release);
                SerialError::Spawn {
                    name: "serial-reader",
                    source,
                }
            })?;

        let monitor_inner = Arc::clone(&self.inner);
        let monitor = match thread::Builder::new()
            .name("ezmb-serial-monitor".into())
            .spawn(move || monitor_loop(monitor_inner))
        {
            Ok(monitor) => monitor,
            Err(source) => {
                self.inner.running.store(false, Ordering::Release);
                let _ = reader.join();
                return Err(SerialError::Spawn {
                    name: "serial-monitor",
                    source,
                });
            }
        };

        *workers = Some(Workers { reader, monitor });
        info!(ports = self.len(), "port set started");
        Ok(())
    }

    /// Signal both workers and wait for them to exit.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::Release);
        let Some(workers) = self.workers.lock().take() else {
            return;
        };
        if workers.reader.join().is_err() {
            warn!("serial reader worker panicked");
        }
        if workers.monitor.join().is_err() {
            warn!("serial monitor worker panicked");
        }
        info!("port set stopped");
    }
}

impl Default for PortSet {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PortSet {
    fn drop(&mut self) {
        self.stop();
        let ports = std::mem::take(&mut *self.inner.ports.lock());
        for port in ports.values() {
            port.retire();
        }
    }
}

impl std::fmt::Debug for PortSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortSet")
            .field("ports", &self.len())
            .field("running", &self.is_running())
            .field("options", &self.inner.options)
            .finish()
    }
}

/// One open descriptor captured for a poll pass.
struct Target {
    port: Arc<Port>,
    fd: RawFd,
    generation: u64,
}

fn poll_timeout(duration: Duration) -> PollTimeout {
    PollTimeout::from(u16::try_from(duration.as_millis()).unwrap_or(u16::MAX))
}

/// Grow `buf` to `capacity` bytes and return that slice, or `None` when the
/// allocation fails. `buf` stays usable for smaller requests either way.
fn read_buffer(buf: &mut Vec<u8>, capacity: usize) -> Option<&mut [u8]> {
    if buf.len() < capacity {
        buf.try_reserve(capacity - buf.len()).ok()?;
        buf.resize(capacity, 0);
    }
    Some(&mut buf[..capacity])
}

fn reader_loop(inner: Arc<Inner>) {
    let options = inner.options;
    let mut members: Vec<Arc<Port>> = Vec::new();
    let mut targets: Vec<Target> = Vec::new();
    let mut events: Vec<PollFlags> = Vec::new();
    let mut buf: Vec<u8> = Vec::new();
    let hangup = PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL;

    debug!("serial reader started");
    while inner.is_running() {
        if !inner.snapshot(&mut members) {
            warn!("serial reader could not allocate snapshot; backing off");
            thread::sleep(options.idle_backoff);
            continue;
        }

        targets.clear();
        if targets.try_reserve(members.len()).is_err() {
            thread::sleep(options.idle_backoff);
            continue;
        }
        for port in members.drain(..) {
            if let Some((fd, generation)) = port.poll_target() {
                targets.push(Target {
                    port,
                    fd,
                    generation,
                });
            }
        }
        if targets.is_empty() {
            thread::sleep(options.idle_backoff);
            continue;
        }

        events.clear();
        if events.try_reserve(targets.len()).is_err() {
            thread::sleep(options.idle_backoff);
            continue;
        }
        {
            let mut fds: Vec<PollFd<'_>> = Vec::new();
            if fds.try_reserve(targets.len()).is_err() {
                thread::sleep(options.idle_backoff);
                continue;
            }
            for target in &targets {
                // SAFETY: the descriptor may be closed by another thread while we
                // wait; poll then reports POLLNVAL or a stale event, and every
                // event is checked against the port's generation before use.
                let fd = unsafe { BorrowedFd::borrow_raw(target.fd) };
                fds.push(PollFd::new(fd, PollFlags::POLLIN | hangup));
            }
            match poll(&mut fds, poll_timeout(options.poll_timeout)) {
                Ok(0) => continue,
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(err) => {
                    warn!(error = %err, "serial poll failed");
                    thread::sleep(options.idle_backoff);
                    continue;
                }
            }
            events.extend(fds.iter().map(|fd| fd.revents().unwrap_or(PollFlags::empty())));
        }

        let mut starved = false;
        for (target, revents) in targets.iter().zip(events.iter()) {
            if revents.intersects(hangup) {
                if target.port.close_if_current(target.generation) {
                    target.port.report_closed(&format!("poll reported {revents:?}"));
                }
                continue;
            }
            if !revents.contains(PollFlags::POLLIN) {
                continue;
            }

            let capacity = target.port.config().maxlen;
            let Some(chunk) = read_buffer(&mut buf, capacity) else {
                warn!(uid = %target.port.id(), capacity, "read buffer allocation failed; skipping port");
                starved = true;
                continue;
            };
            if let ReadOutcome::Closed(err) = target.port.read_ready(target.generation, chunk) {
                target.port.report_closed(&err);
            }
        }
        targets.clear();
        if starved {
            thread::sleep(options.idle_backoff);
        }
    }
    debug!("serial reader stopped");
}

fn monitor_loop(inner: Arc<Inner>) {
    let options = inner.options;
    let mut members: Vec<Arc<Port>> = Vec::new();
    // Last open failure per port, so a persistently missing device logs once.
    let mut failures: HashMap<String, String> = HashMap::new();

    debug!("serial monitor started");
    while inner.is_running() {
        if inner.snapshot(&mut members) {
            for port in members.drain(..) {
                if !port.is_running() {
                    continue;
                }
                let present = port.device().exists();
                if port.is_open() {
                    if !present && port.close() {
                        port.report_closed(&"device path no longer accessible");
                    }
                    continue;
                }
                if !present {
                    continue;
                }
                match port.open() {
                    Ok(_) => {
                        failures.remove(port.id());
                    }
                    Err(err) => {
                        let message = err.to_string();
                        if failures.get(port.id()) != Some(&message) {
                            warn!(uid = %port.id(), error = %message, "port reopen failed");
                            failures.insert(port.id().to_owned(), message);
                        }
                    }
                }
            }
        }
        sleep_while_running(&inner, options.monitor_interval, options.poll_timeout);
    }
    debug!("serial monitor stopped");
}

/// Sleep for `total`, waking every `step` to honour a cleared running flag.
fn sleep_while_running(inner: &Inner, total: Duration, step: Duration) {
    let deadline = Instant::now() + total;
    while inner.is_running() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        thread::sleep(remaining.min(step));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> PortHandler {
        Arc::new(|_: &str, _: &[u8]| {})
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let set = PortSet::new();
        set.add_port(PortConfig::new("U1", "/dev/ezmb-a"), noop())
            .unwrap();
        let err = set
            .add_port(PortConfig::new("U1", "/dev/ezmb-b"), noop())
            .unwrap_err();
        assert!(matches!(err, SerialError::DuplicateId { id } if id == "U1"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn removing_unknown_id_is_a_noop() {
        let set = PortSet::new();
        set.add_port(PortConfig::new("U1", "/dev/ezmb-a"), noop())
            .unwrap();
        assert!(!set.remove_port("U2"));
        assert_eq!(set.len(), 1);
        assert!(set.remove_port("U1"));
        assert!(set.is_empty());
    }

    #[test]
    fn removed_id_can_be_reused() {
        let set = PortSet::new();
        let first = set
            .add_port(PortConfig::new("U1", "/dev/ezmb-a"), noop())
            .unwrap();
        set.remove_port("U1");
        assert!(!first.is_running());
        set.add_port(PortConfig::new("U1", "/dev/ezmb-b"), noop())
            .unwrap();
        assert_eq!(set.statuses()[0].device, "/dev/ezmb-b");
    }

    #[test]
    fn write_reports_not_found_and_closed() {
        let set = PortSet::new();
        assert!(matches!(
            set.write("nope", b"x"),
            Err(SerialError::NotFound { .. })
        ));
        set.add_port(PortConfig::new("U1", "/dev/ezmb-a"), noop())
            .unwrap();
        assert!(matches!(
            set.write("U1", b"x"),
            Err(SerialError::Closed { .. })
        ));
    }

    #[test]
    fn invalid_descriptor_is_rejected_synchronously() {
        let set = PortSet::new();
        let err = set
            .add_port(PortConfig::new("U1", "/dev/ezmb-a").with_maxlen(0), noop())
            .unwrap_err();
        assert!(matches!(err, SerialError::ConfigInvalid(_)));
        assert!(set.is_empty());
    }

    #[test]
    fn start_and_stop_are_idempotent_and_prompt() {
        let set = PortSet::new();
        set.add_port(PortConfig::new("U1", "/dev/ezmb-missing"), noop())
            .unwrap();
        set.start().unwrap();
        set.start().unwrap();
        assert!(set.is_running());
        thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        set.stop();
        set.stop();
        assert!(!set.is_running());
        assert!(started.elapsed() < Duration::from_millis(900));
    }

    #[test]
    fn concurrent_add_remove_keeps_ids_unique() {
        let set = Arc::new(PortSet::new());
        set.start().unwrap();
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let set = Arc::clone(&set);
                thread::spawn(move || {
                    for round in 0..50 {
                        let id = format!("P{}", round % 5);
                        let device = format!("/dev/ezmb-missing-{worker}");
                        let _ = set.add_port(PortConfig::new(id.clone(), device), noop());
                        if round % 3 == 0 {
                            set.remove_port(&id);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        set.stop();
        let statuses = set.statuses();
        let mut ids: Vec<_> = statuses.iter().map(|s| s.uid.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), statuses.len());
        assert!(statuses.len() <= 5);
    }

    #[test]
    fn oversized_read_buffer_is_rejected_by_validation() {
        let set = PortSet::new();
        let err = set
            .add_port(
                PortConfig::new("BIG", "/dev/ezmb-a").with_maxlen(1 << 60),
                noop(),
            )
            .unwrap_err();
        assert!(matches!(err, SerialError::ConfigInvalid(_)));
    }

    #[test]
    fn failed_buffer_growth_leaves_buffer_usable() {
        let mut buf = Vec::new();
        assert!(read_buffer(&mut buf, usize::MAX).is_none());
        assert_eq!(read_buffer(&mut buf, 8).map(|chunk| chunk.len()), Some(8));
        assert_eq!(read_buffer(&mut buf, 4).map(|chunk| chunk.len()), Some(4));
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn poll_timeout_saturates() {
        assert_eq!(i32::from(poll_timeout(Duration::from_millis(100))), 100);
        assert_eq!(i32::from(poll_timeout(Duration::from_secs(3600))), 65_535);
    }
}
