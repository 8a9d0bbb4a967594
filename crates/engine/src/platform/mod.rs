//! Platform layer
//!
//! Backends that query the OS for attached USB mass-storage devices and
//! perform mount/unmount calls. Every method here may block on I/O; the
//! engine only calls them from the blocking thread pool.

pub mod libusb;
pub mod mock;
#[cfg(target_os = "linux")]
pub mod sysfs;

use records::{DeviceRecord, RawDeviceDescriptor};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

pub use libusb::LibusbPlatform;
pub use mock::{EnumerationGate, MockPlatform};
#[cfg(target_os = "linux")]
pub use sysfs::SysfsPlatform;

/// Errors reported by platform backends
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The enumeration subsystem itself is unavailable
    #[error("Subsystem query failed: {0}")]
    Query(String),

    #[error("Device or resource busy")]
    Busy,

    #[error("Permission denied")]
    PermissionDenied,

    /// The OS reports no mount at the given path
    #[error("Not mounted")]
    NotMounted,

    #[error("Operation not supported by the {0} backend")]
    NotSupported(&'static str),

    #[error("OS error: {0}")]
    Os(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// OS access used by the engine
pub trait Platform: Send + Sync + 'static {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Enumerate currently attached USB mass-storage devices
    ///
    /// Always queries the OS. A device with unreadable metadata is skipped,
    /// only a whole-subsystem failure is an error.
    fn list_attached_devices(&self) -> Result<Vec<RawDeviceDescriptor>, PlatformError>;

    /// Unmount every mount point in `device.mount_points()`
    ///
    /// Succeeds only if none of them is left mounted.
    fn unmount(&self, device: &DeviceRecord) -> Result<(), PlatformError>;

    /// Mount `device.node` at `target`
    fn mount(&self, device: &DeviceRecord, target: &Path) -> Result<(), PlatformError>;
}

/// Backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// sysfs on Linux, libusb elsewhere
    #[default]
    Auto,
    Sysfs,
    Libusb,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "sysfs" => Ok(Self::Sysfs),
            "libusb" => Ok(Self::Libusb),
            other => Err(format!(
                "Unknown backend '{}', expected one of: auto, sysfs, libusb",
                other
            )),
        }
    }
}

/// Paths consulted by the sysfs backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformPaths {
    /// sysfs mount point
    pub sys_root: PathBuf,
    /// Mount table in `/proc/mounts` format
    pub mounts_path: PathBuf,
    /// Filesystem list in `/proc/filesystems` format
    pub filesystems_path: PathBuf,
}

impl Default for PlatformPaths {
    fn default() -> Self {
        Self {
            sys_root: PathBuf::from("/sys"),
            mounts_path: PathBuf::from("/proc/self/mounts"),
            filesystems_path: PathBuf::from("/proc/filesystems"),
        }
    }
}

/// Create the platform backend for `kind`
pub fn open_platform(
    kind: BackendKind,
    paths: &PlatformPaths,
) -> Result<Arc<dyn Platform>, PlatformError> {
    match kind {
        #[cfg(target_os = "linux")]
        BackendKind::Auto | BackendKind::Sysfs => Ok(Arc::new(SysfsPlatform::new(paths.clone()))),
        #[cfg(not(target_os = "linux"))]
        BackendKind::Auto => Ok(Arc::new(LibusbPlatform::new())),
        #[cfg(not(target_os = "linux"))]
        BackendKind::Sysfs => {
            let _ = paths;
            Err(PlatformError::NotSupported("sysfs"))
        }
        BackendKind::Libusb => Ok(Arc::new(LibusbPlatform::new())),
    }
}
