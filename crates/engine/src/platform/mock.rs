//! In-memory platform for tests and dry runs
//!
//! Holds a list of descriptors that tests attach, detach, mount and unmount
//! at will. Failures can be injected per operation, and an enumeration can be
//! held mid-flight with [`EnumerationGate`] to interleave it with other calls.

use super::{Platform, PlatformError};
use records::{DeviceRecord, RawDeviceDescriptor};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// How long a held enumeration waits for release before giving up
const GATE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct MockState {
    devices: Vec<RawDeviceDescriptor>,
    fail_next_query: Option<String>,
    unmount_busy: bool,
    mount_error: Option<String>,
    query_count: usize,
    gate: Option<(Sender<()>, Receiver<()>)>,
}

/// Scriptable platform backend
#[derive(Default)]
pub struct MockPlatform {
    state: Mutex<MockState>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: Vec<RawDeviceDescriptor>) -> Self {
        let platform = Self::new();
        platform.set_devices(devices);
        platform
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace every attached device
    pub fn set_devices(&self, devices: Vec<RawDeviceDescriptor>) {
        self.state().devices = devices;
    }

    pub fn attach(&self, device: RawDeviceDescriptor) {
        self.state().devices.push(device);
    }

    /// Remove every device with this serial number
    pub fn detach(&self, serial_number: &str) {
        self.state()
            .devices
            .retain(|d| d.serial_number.as_deref() != Some(serial_number));
    }

    /// Set the mount point of the device at `slot` as if the OS changed it
    pub fn set_mount(&self, slot: &str, mount: Option<&str>) {
        for device in self.state().devices.iter_mut().filter(|d| d.slot == slot) {
            device.mount = mount.map(str::to_string);
        }
    }

    /// Make the next enumeration fail with a query error
    pub fn fail_next_query(&self, reason: &str) {
        self.state().fail_next_query = Some(reason.to_string());
    }

    /// Make unmount calls report the device as busy
    pub fn set_unmount_busy(&self, busy: bool) {
        self.state().unmount_busy = busy;
    }

    /// Make mount calls fail with this OS error
    pub fn set_mount_error(&self, error: Option<&str>) {
        self.state().mount_error = error.map(str::to_string);
    }

    /// Number of enumerations performed so far
    pub fn query_count(&self) -> usize {
        self.state().query_count
    }

    /// Current descriptors as the OS would report them
    pub fn devices(&self) -> Vec<RawDeviceDescriptor> {
        self.state().devices.clone()
    }

    /// Hold the next enumeration after it has read the device list
    ///
    /// The enumeration signals the gate once its snapshot is taken and then
    /// blocks until [`EnumerationGate::release`] is called.
    pub fn hold_next_enumeration(&self) -> EnumerationGate {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        self.state().gate = Some((started_tx, release_rx));
        EnumerationGate {
            started_rx,
            release_tx,
        }
    }
}

impl Platform for MockPlatform {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn list_attached_devices(&self) -> Result<Vec<RawDeviceDescriptor>, PlatformError> {
        let (devices, gate) = {
            let mut state = self.state();
            state.query_count += 1;
            if let Some(reason) = state.fail_next_query.take() {
                return Err(PlatformError::Query(reason));
            }
            (state.devices.clone(), state.gate.take())
        };

        if let Some((started_tx, release_rx)) = gate {
            let _ = started_tx.send(());
            debug!("Enumeration held");
            match release_rx.recv_timeout(GATE_TIMEOUT) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
                Err(RecvTimeoutError::Timeout) => {
                    return Err(PlatformError::Query("held enumeration timed out".to_string()));
                }
            }
        }

        Ok(devices)
    }

    fn unmount(&self, device: &DeviceRecord) -> Result<(), PlatformError> {
        let mut state = self.state();
        if state.unmount_busy {
            return Err(PlatformError::Busy);
        }

        let points = device.mount_points();
        if points.is_empty() {
            return Err(PlatformError::NotMounted);
        }

        let mut volumes = Vec::with_capacity(points.len());
        for point in points {
            let index = state
                .devices
                .iter()
                .position(|d| d.mount.as_deref() == Some(point))
                .ok_or(PlatformError::NotMounted)?;
            volumes.push(index);
        }
        for index in volumes {
            state.devices[index].mount = None;
        }
        Ok(())
    }

    fn mount(&self, device: &DeviceRecord, target: &Path) -> Result<(), PlatformError> {
        let mut state = self.state();
        if let Some(error) = &state.mount_error {
            return Err(PlatformError::Os(error.clone()));
        }

        let node = device
            .node
            .as_deref()
            .ok_or_else(|| PlatformError::Os("no block device node".to_string()))?;
        let entry = state
            .devices
            .iter_mut()
            .find(|d| d.node.as_deref() == Some(node))
            .ok_or_else(|| PlatformError::Os(format!("{}: no such device", node)))?;
        if entry.mount.is_some() {
            return Err(PlatformError::Busy);
        }
        entry.mount = Some(target.to_string_lossy().into_owned());
        Ok(())
    }
}

/// Handle on an enumeration held by [`MockPlatform::hold_next_enumeration`]
pub struct EnumerationGate {
    started_rx: Receiver<()>,
    release_tx: Sender<()>,
}

impl EnumerationGate {
    /// Block until the held enumeration has taken its snapshot
    ///
    /// Returns false if nothing started within the gate timeout.
    pub fn wait_started(&self) -> bool {
        self.started_rx.recv_timeout(GATE_TIMEOUT).is_ok()
    }

    /// Let the held enumeration return
    pub fn release(self) {
        let _ = self.release_tx.send(());
    }
}
