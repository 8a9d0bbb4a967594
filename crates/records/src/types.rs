//! Device record and descriptor types
//!
//! This module defines the data that flows through the engine: raw
//! descriptors produced by platform enumeration, the resolved device
//! records held in the registry, and the events published on changes.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Stable device identifier
///
/// Derived from durable hardware attributes (vendor code, product code and
/// serial number). Never derived from a transient OS handle or mount path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for DeviceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Raw device descriptor (platform -> resolver)
///
/// Carries everything a [`DeviceRecord`] does except the identity, plus the
/// hardware slot used when no serial number is available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDeviceDescriptor {
    /// USB Vendor ID
    pub vendor_code: u16,
    /// USB Product ID
    pub product_code: u16,
    /// Manufacturer string (if reported)
    pub manufacturer: Option<String>,
    /// Product string (if reported)
    pub product: Option<String>,
    /// Serial number string (if reported)
    pub serial_number: Option<String>,
    /// Current mount point, if the OS has one
    pub mount: Option<String>,
    /// Block device node backing the volume (e.g. `/dev/sdb1`)
    pub node: Option<String>,
    /// Hardware location of the device (e.g. USB port path `1-2.3`)
    pub slot: String,
}

impl RawDeviceDescriptor {
    /// Serial number, if present and not blank
    pub fn usable_serial(&self) -> Option<&str> {
        self.serial_number
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// True if the descriptor lacks a serial number
    pub fn is_degraded(&self) -> bool {
        self.usable_serial().is_none()
    }
}

/// One physical USB storage device at a point in time
///
/// Serializes to the fixed external shape
/// `{ id, vendorCode, productCode, manufacturer, product, serialNumber, mount, degraded }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub id: DeviceId,
    #[serde(with = "crate::hex::serde_code")]
    pub vendor_code: u16,
    #[serde(with = "crate::hex::serde_code")]
    pub product_code: u16,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    /// Filesystem mount path, absent when not mounted
    pub mount: Option<String>,
    /// True when `id` was computed without a serial number and may not be
    /// stable across polls
    #[serde(default)]
    pub degraded: bool,
    /// Block device node used for mount operations
    #[serde(skip)]
    pub node: Option<String>,
    /// Mount points of the unit's other volumes, only set when `mount` is
    #[serde(skip)]
    pub other_mounts: Vec<String>,
}

impl DeviceRecord {
    /// Build a record from a descriptor and its resolved identity
    pub fn from_descriptor(id: DeviceId, degraded: bool, raw: RawDeviceDescriptor) -> Self {
        Self {
            id,
            vendor_code: raw.vendor_code,
            product_code: raw.product_code,
            manufacturer: raw.manufacturer,
            product: raw.product,
            serial_number: raw.serial_number,
            mount: raw.mount,
            degraded,
            node: raw.node,
            other_mounts: Vec::new(),
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.mount.is_some()
    }

    /// Every active mount point of the unit, primary first
    pub fn mount_points(&self) -> Vec<&str> {
        self.mount
            .iter()
            .chain(self.other_mounts.iter())
            .map(String::as_str)
            .collect()
    }

    /// Fold another volume of the same unit into this record
    ///
    /// The first mounted volume becomes the primary mount and supplies the
    /// node; later ones are kept in `other_mounts`.
    pub fn merge_volume(&mut self, raw: RawDeviceDescriptor) {
        let Some(mount) = raw.mount else {
            return;
        };
        if self.mount.is_none() {
            self.mount = Some(mount);
            self.node = raw.node;
        } else if !self.mount_points().contains(&mount.as_str()) {
            self.other_mounts.push(mount);
        }
    }

    /// Copy of this record with a single mount state
    pub fn with_mount(&self, mount: Option<String>) -> Self {
        Self {
            mount,
            other_mounts: Vec::new(),
            ..self.clone()
        }
    }

    /// Render as the external JSON object
    pub fn to_json(&self) -> serde_json::Value {
        // Every field is a string, bool or null, so this cannot fail
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Events published when the registry changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum DeviceEvent {
    /// A device appeared in enumeration
    Attached { device: DeviceRecord },
    /// A device is no longer enumerated
    Detached { id: DeviceId },
    /// A device gained a mount point
    Mounted { id: DeviceId, mount: String },
    /// A device lost its mount point
    Unmounted { id: DeviceId, previous: String },
}

impl DeviceEvent {
    /// Identifier of the device the event is about
    pub fn device_id(&self) -> &DeviceId {
        match self {
            DeviceEvent::Attached { device } => &device.id,
            DeviceEvent::Detached { id }
            | DeviceEvent::Mounted { id, .. }
            | DeviceEvent::Unmounted { id, .. } => id,
        }
    }
}
