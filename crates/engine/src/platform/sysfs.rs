//! Linux sysfs backend
//!
//! Enumerates block devices under `/sys/block`, keeps those that sit below a
//! USB device in the sysfs hierarchy, and reads the USB attributes from that
//! ancestor. Mount points come from the mount table.
//!
//! Layout walked for a typical flash drive:
//!
//! ```text
//! /sys/block/sdb -> ../devices/pci0000:00/.../usb2/2-1/2-1:1.0/host6/.../block/sdb
//!                                             ^^^^ idVendor, idProduct, serial
//! ```

use super::{Platform, PlatformError, PlatformPaths};
use nix::errno::Errno;
use nix::mount::{MntFlags, MsFlags};
use records::{DeviceRecord, RawDeviceDescriptor};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, warn};

/// sysfs-backed platform
pub struct SysfsPlatform {
    paths: PlatformPaths,
}

impl SysfsPlatform {
    pub fn new(paths: PlatformPaths) -> Self {
        Self { paths }
    }

    /// Describe one `/sys/block` entry, one descriptor per mounted volume
    ///
    /// An unmounted disk yields a single descriptor. Block devices that are
    /// not USB storage or have no medium inserted yield none.
    fn describe_block(
        &self,
        name: &str,
        entry: &Path,
        mounts: &MountTable,
    ) -> io::Result<Vec<RawDeviceDescriptor>> {
        let real = fs::canonicalize(entry)?;

        let Some(usb_dir) = usb_ancestor(&real) else {
            debug!("Block device {} has no USB parent, skipping", name);
            return Ok(Vec::new());
        };

        if read_attr(entry, "size").and_then(|s| s.parse::<u64>().ok()) == Some(0) {
            debug!("Block device {} has no medium, skipping", name);
            return Ok(Vec::new());
        }

        let vendor_code = read_hex_attr(usb_dir, "idVendor")?;
        let product_code = read_hex_attr(usb_dir, "idProduct")?;

        let slot = usb_dir
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string());

        let volumes = locate_volumes(name, entry, mounts)?;

        debug!(
            "Found USB block device {}: vid={:#06x}, pid={:#06x}, slot={}, volumes={:?}",
            name, vendor_code, product_code, slot, volumes
        );

        let manufacturer = read_attr(usb_dir, "manufacturer");
        let product = read_attr(usb_dir, "product");
        let serial_number = read_attr(usb_dir, "serial");

        Ok(volumes
            .into_iter()
            .map(|(node, mount)| RawDeviceDescriptor {
                vendor_code,
                product_code,
                manufacturer: manufacturer.clone(),
                product: product.clone(),
                serial_number: serial_number.clone(),
                mount,
                node: Some(node),
                slot: slot.clone(),
            })
            .collect())
    }

    /// Block filesystems the kernel can mount, in its preferred order
    fn block_filesystems(&self) -> Result<Vec<String>, PlatformError> {
        let data = fs::read_to_string(&self.paths.filesystems_path)?;
        Ok(parse_filesystems(&data))
    }
}

impl Platform for SysfsPlatform {
    fn name(&self) -> &'static str {
        "sysfs"
    }

    fn list_attached_devices(&self) -> Result<Vec<RawDeviceDescriptor>, PlatformError> {
        let block_dir = self.paths.sys_root.join("block");
        let entries = fs::read_dir(&block_dir).map_err(|e| {
            PlatformError::Query(format!("Failed to read {}: {}", block_dir.display(), e))
        })?;

        let mounts = fs::read_to_string(&self.paths.mounts_path)
            .map(|data| MountTable::parse(&data))
            .map_err(|e| {
                PlatformError::Query(format!(
                    "Failed to read {}: {}",
                    self.paths.mounts_path.display(),
                    e
                ))
            })?;

        let mut devices = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Failed to read block directory entry: {}", e);
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();

            match self.describe_block(&name, &entry.path(), &mounts) {
                Ok(volumes) => devices.extend(volumes),
                Err(e) => warn!("Skipping block device {}: {}", name, e),
            }
        }

        debug!("Enumerated {} USB storage volumes", devices.len());
        Ok(devices)
    }

    fn unmount(&self, device: &DeviceRecord) -> Result<(), PlatformError> {
        let mut points = device.mount_points();
        if points.is_empty() {
            return Err(PlatformError::NotMounted);
        }
        // Nested mount points go first
        points.sort_by_key(|p| std::cmp::Reverse(Path::new(p).components().count()));

        let mut first_error = None;
        for point in points {
            match nix::mount::umount2(Path::new(point), MntFlags::empty()) {
                Ok(()) => debug!("Unmounted {} from {}", device.id, point),
                Err(e) => {
                    warn!("Failed to unmount {} from {}: {}", device.id, point, e);
                    if first_error.is_none() {
                        first_error = Some(map_errno(e));
                    }
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    fn mount(&self, device: &DeviceRecord, target: &Path) -> Result<(), PlatformError> {
        let node = device
            .node
            .as_deref()
            .ok_or_else(|| PlatformError::Os("no block device node".to_string()))?;

        let flags = MsFlags::MS_NOSUID | MsFlags::MS_NODEV;
        let mut last_error = PlatformError::Os("no filesystem type matched".to_string());

        for fstype in self.block_filesystems()? {
            match nix::mount::mount(Some(node), target, Some(fstype.as_str()), flags, None::<&str>) {
                Ok(()) => {
                    debug!("Mounted {} ({}) at {}", node, fstype, target.display());
                    return Ok(());
                }
                // Wrong filesystem type, try the next one
                Err(Errno::EINVAL) | Err(Errno::ENODEV) => {
                    debug!("{} is not {}", node, fstype);
                }
                Err(e) => {
                    last_error = map_errno(e);
                    break;
                }
            }
        }

        Err(last_error)
    }
}

/// Nearest ancestor directory describing a USB device
fn usb_ancestor(path: &Path) -> Option<&Path> {
    path.ancestors()
        .skip(1)
        .find(|dir| dir.join("idVendor").is_file() && dir.join("idProduct").is_file())
}

/// Block nodes to report with their mount points
///
/// Every mount of the whole disk, then of each partition in name order. An
/// unmounted device reports its first partition (or the disk if
/// unpartitioned) with no mount.
fn locate_volumes(
    disk: &str,
    entry: &Path,
    mounts: &MountTable,
) -> io::Result<Vec<(String, Option<String>)>> {
    let mut partitions: Vec<String> = fs::read_dir(entry)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().join("partition").is_file())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    partitions.sort();

    let mounted: Vec<(String, Option<String>)> = std::iter::once(disk)
        .chain(partitions.iter().map(String::as_str))
        .flat_map(|name| {
            mounts
                .mounts(name)
                .iter()
                .map(move |point| (format!("/dev/{}", name), Some(point.clone())))
        })
        .collect();
    if !mounted.is_empty() {
        return Ok(mounted);
    }

    let node = partitions.first().map(String::as_str).unwrap_or(disk);
    Ok(vec![(format!("/dev/{}", node), None)])
}

fn read_attr(dir: &Path, attr: &str) -> Option<String> {
    fs::read_to_string(dir.join(attr))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn read_hex_attr(dir: &Path, attr: &str) -> io::Result<u16> {
    let value = read_attr(dir, attr).ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("missing attribute {}", attr))
    })?;
    u16::from_str_radix(&value, 16).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid {} value '{}'", attr, value),
        )
    })
}

fn map_errno(errno: Errno) -> PlatformError {
    match errno {
        Errno::EBUSY => PlatformError::Busy,
        Errno::EPERM | Errno::EACCES => PlatformError::PermissionDenied,
        Errno::EINVAL => PlatformError::NotMounted,
        other => PlatformError::Os(other.desc().to_string()),
    }
}

/// Mount points keyed by block device name (`sdb1`)
#[derive(Debug, Default)]
struct MountTable {
    by_device: HashMap<String, Vec<String>>,
}

impl MountTable {
    fn parse(data: &str) -> Self {
        let mut by_device: HashMap<String, Vec<String>> = HashMap::new();
        for line in data.lines() {
            let mut parts = line.split_whitespace();
            let (Some(device), Some(mount_point)) = (parts.next(), parts.next()) else {
                continue;
            };
            let Some(name) = device.strip_prefix("/dev/") else {
                continue;
            };
            let name = Path::new(name)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if name.is_empty() {
                continue;
            }
            by_device
                .entry(name)
                .or_default()
                .push(unescape_mount(mount_point));
        }
        Self { by_device }
    }

    fn mounts(&self, device: &str) -> &[String] {
        self.by_device
            .get(device)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Decode the octal escapes used in the mount table (`\040` for space)
fn unescape_mount(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && let Some(octal) = bytes.get(i + 1..i + 4)
            && octal.iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let value = octal.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            if let Ok(value) = u8::try_from(value) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn parse_filesystems(data: &str) -> Vec<String> {
    data.lines()
        .filter(|line| !line.starts_with("nodev"))
        .map(str::trim)
        .filter(|fs| !fs.is_empty())
        .map(str::to_string)
        .collect()
}
