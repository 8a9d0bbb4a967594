//! Mount controller
//!
//! Validates preconditions against the registry, runs the OS call on the
//! blocking pool and records the outcome. The registry write and the event
//! happen inside the blocking task, so dropping the returned future does not
//! lose a completed OS operation.

use crate::platform::Platform;
use crate::registry::DeviceRegistry;
use common::EventPublisher;
use records::{DeviceId, DeviceRecord, DriveError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where default mount points are created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOptions {
    pub mount_root: PathBuf,
    /// Create the target directory when missing
    pub create_dirs: bool,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            mount_root: PathBuf::from("/media/usbdrive"),
            create_dirs: true,
        }
    }
}

#[derive(Clone)]
pub struct MountController {
    platform: Arc<dyn Platform>,
    registry: Arc<DeviceRegistry>,
    events: EventPublisher,
    options: MountOptions,
}

impl MountController {
    pub fn new(
        platform: Arc<dyn Platform>,
        registry: Arc<DeviceRegistry>,
        events: EventPublisher,
        options: MountOptions,
    ) -> Self {
        Self {
            platform,
            registry,
            events,
            options,
        }
    }

    /// Unmount the device with this id
    pub async fn unmount(&self, id: &str) -> Result<()> {
        let record = self.lookup(id)?;
        if record.mount.is_none() {
            return Err(DriveError::AlreadyUnmounted { id: record.id });
        }

        let controller = self.clone();
        let device_id = record.id.clone();
        tokio::task::spawn_blocking(move || controller.unmount_blocking(record))
            .await
            .map_err(|e| DriveError::UnmountFailed {
                id: device_id,
                reason: format!("unmount task failed: {}", e),
            })?
    }

    /// Mount the device with this id, returning the mount path
    ///
    /// Without a target the device is mounted below the mount root in a
    /// directory named after its product string.
    pub async fn mount(&self, id: &str, target: Option<PathBuf>) -> Result<String> {
        let record = self.lookup(id)?;
        if let Some(mount) = record.mount {
            return Err(DriveError::AlreadyMounted {
                id: record.id,
                mount,
            });
        }
        if record.node.is_none() {
            return Err(DriveError::MountFailed {
                id: record.id,
                reason: "no block device node known".to_string(),
            });
        }

        let target = target.unwrap_or_else(|| {
            default_target(&self.options.mount_root, &record, &self.registry.snapshot())
        });

        let controller = self.clone();
        let device_id = record.id.clone();
        tokio::task::spawn_blocking(move || controller.mount_blocking(record, target))
            .await
            .map_err(|e| DriveError::MountFailed {
                id: device_id,
                reason: format!("mount task failed: {}", e),
            })?
    }

    fn lookup(&self, id: &str) -> Result<DeviceRecord> {
        self.registry
            .get(id)
            .ok_or_else(|| DriveError::DeviceNotFound {
                id: DeviceId::from(id),
            })
    }

    fn unmount_blocking(&self, record: DeviceRecord) -> Result<()> {
        debug!("Unmounting {} from {:?}", record.id, record.mount_points());

        if let Err(e) = self.platform.unmount(&record) {
            warn!("Unmount of {} failed: {}", record.id, e);
            return Err(DriveError::UnmountFailed {
                id: record.id,
                reason: e.to_string(),
            });
        }

        let confirmed_at = self.registry.tick();
        self.record_outcome(&record.id, None, confirmed_at);
        info!("Unmounted {}", record.id);
        Ok(())
    }

    fn mount_blocking(&self, record: DeviceRecord, target: PathBuf) -> Result<String> {
        let failed = |reason: String| DriveError::MountFailed {
            id: record.id.clone(),
            reason,
        };

        let created = self.options.create_dirs && !target.exists();
        if created {
            fs::create_dir_all(&target).map_err(|e| {
                failed(format!("cannot create {}: {}", target.display(), e))
            })?;
            debug!("Created mount directory {}", target.display());
        }

        if let Err(e) = self.platform.mount(&record, &target) {
            warn!("Mount of {} at {} failed: {}", record.id, target.display(), e);
            if created {
                remove_mount_dir(&target);
            }
            return Err(failed(e.to_string()));
        }

        let confirmed_at = self.registry.tick();
        let mount = target.to_string_lossy().into_owned();
        self.record_outcome(&record.id, Some(mount.clone()), confirmed_at);
        info!("Mounted {} at {}", record.id, mount);
        Ok(mount)
    }

    fn record_outcome(&self, id: &DeviceId, mount: Option<String>, confirmed_at: u64) {
        match self
            .registry
            .apply_mount_state(id.as_str(), mount, confirmed_at)
        {
            Some((_, Some(event))) => {
                self.events.publish(event);
            }
            Some((_, None)) => {}
            None => debug!("Registry not updated for {}", id),
        }
    }
}

/// Remove a directory created for a mount that did not happen
fn remove_mount_dir(target: &Path) {
    match fs::remove_dir(target) {
        Ok(()) => debug!("Removed mount directory {}", target.display()),
        Err(e) => warn!("Failed to remove {}: {}", target.display(), e),
    }
}

/// Default mount point for a record
///
/// Uses the product string, else the id, made safe for a path component.
/// A name already used as a mount point by another device gets a numeric
/// suffix.
pub fn default_target(root: &Path, record: &DeviceRecord, others: &[DeviceRecord]) -> PathBuf {
    let label = record
        .product
        .as_deref()
        .and_then(sanitize_label)
        .or_else(|| sanitize_label(record.id.as_str()))
        .unwrap_or_else(|| "usbdrive".to_string());

    let in_use = |path: &Path| {
        others
            .iter()
            .filter(|r| r.id != record.id)
            .any(|r| r.mount_points().into_iter().any(|m| Path::new(m) == path))
    };

    let mut candidate = root.join(&label);
    let mut n = 2;
    while in_use(&candidate) {
        candidate = root.join(format!("{}-{}", label, n));
        n += 1;
    }
    candidate
}

/// Turn a hardware string into a single safe path component
///
/// Returns `None` if nothing usable is left.
pub fn sanitize_label(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '_' || c == '.');

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::create_mock_record;

    #[test]
    fn test_sanitize_label() {
        assert_eq!(
            sanitize_label("Baz Sensing Quux").as_deref(),
            Some("Baz_Sensing_Quux")
        );
        assert_eq!(sanitize_label("../etc").as_deref(), Some("etc"));
        assert_eq!(sanitize_label("a/b").as_deref(), Some("a_b"));
        assert_eq!(sanitize_label("  "), None);
        assert_eq!(sanitize_label(".."), None);
    }

    #[test]
    fn test_default_target_uses_product() {
        let record = create_mock_record("0x781-0x5581-SN1", None);
        let target = default_target(Path::new("/media/usbdrive"), &record, &[]);
        assert_eq!(target, PathBuf::from("/media/usbdrive/Test_Drive"));
    }

    #[test]
    fn test_default_target_falls_back_to_id() {
        let mut record = create_mock_record("0x781-0x5581-SN1", None);
        record.product = Some("///".to_string());
        let target = default_target(Path::new("/mnt"), &record, &[]);
        assert_eq!(target, PathBuf::from("/mnt/0x781-0x5581-SN1"));
    }

    #[test]
    fn test_default_target_avoids_collision() {
        let record = create_mock_record("a", None);
        let mut other = create_mock_record("c", Some("/mnt/elsewhere"));
        other.other_mounts.push("/mnt/Test_Drive-2".to_string());
        let others = vec![create_mock_record("b", Some("/mnt/Test_Drive")), other];
        let target = default_target(Path::new("/mnt"), &record, &others);
        assert_eq!(target, PathBuf::from("/mnt/Test_Drive-3"));
    }
}
