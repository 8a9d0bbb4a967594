//! sysfs enumeration against a fake sysfs tree
#![cfg(target_os = "linux")]

use engine::{DriveEngine, Platform, PlatformError, PlatformPaths, SysfsPlatform};
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

struct FakeSys {
    _temp: TempDir,
    paths: PlatformPaths,
}

impl FakeSys {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let sys_root = temp.path().join("sys");
        fs::create_dir_all(sys_root.join("block")).unwrap();

        let mounts_path = temp.path().join("mounts");
        fs::write(&mounts_path, "/dev/sda2 / ext4 rw 0 0\n").unwrap();
        let filesystems_path = temp.path().join("filesystems");
        fs::write(&filesystems_path, "nodev\tsysfs\n\text4\n\tvfat\n").unwrap();

        Self {
            _temp: temp,
            paths: PlatformPaths {
                sys_root,
                mounts_path,
                filesystems_path,
            },
        }
    }

    fn write(dir: &Path, attr: &str, value: &str) {
        fs::write(dir.join(attr), format!("{}\n", value)).unwrap();
    }

    /// Add a USB device at `port` with one block disk below it
    fn add_usb_disk(
        &self,
        port: &str,
        disk: &str,
        attrs: &[(&str, &str)],
        partitions: &[&str],
        size: u64,
    ) -> PathBuf {
        let usb_dir = self
            .paths
            .sys_root
            .join("devices/pci0000:00/0000:00:14.0/usb1")
            .join(port);
        fs::create_dir_all(&usb_dir).unwrap();
        for (attr, value) in attrs {
            Self::write(&usb_dir, attr, value);
        }

        let disk_dir = usb_dir
            .join(format!("{}:1.0/host6/target6:0:0/6:0:0:0/block", port))
            .join(disk);
        fs::create_dir_all(&disk_dir).unwrap();
        Self::write(&disk_dir, "size", &size.to_string());

        for (n, part) in partitions.iter().enumerate() {
            let part_dir = disk_dir.join(part);
            fs::create_dir_all(&part_dir).unwrap();
            Self::write(&part_dir, "partition", &(n + 1).to_string());
        }

        symlink(&disk_dir, self.paths.sys_root.join("block").join(disk)).unwrap();
        disk_dir
    }

    fn add_ata_disk(&self, disk: &str) {
        let disk_dir = self
            .paths
            .sys_root
            .join("devices/pci0000:00/0000:00:17.0/ata1/host0/target0:0:0/0:0:0:0/block")
            .join(disk);
        fs::create_dir_all(&disk_dir).unwrap();
        Self::write(&disk_dir, "size", "1000215216");
        symlink(&disk_dir, self.paths.sys_root.join("block").join(disk)).unwrap();
    }

    fn set_mounts(&self, data: &str) {
        fs::write(&self.paths.mounts_path, data).unwrap();
    }

    fn platform(&self) -> SysfsPlatform {
        SysfsPlatform::new(self.paths.clone())
    }
}

fn foobar_attrs() -> Vec<(&'static str, &'static str)> {
    vec![
        ("idVendor", "000a"),
        ("idProduct", "0012"),
        ("manufacturer", "Foo Bar Technologies"),
        ("product", "Baz Sensing Quux"),
        ("serial", "IDQFB0023AB"),
    ]
}

#[test]
fn test_lists_only_usb_disks() {
    let sys = FakeSys::new();
    sys.add_ata_disk("sda");
    sys.add_usb_disk("1-2", "sdb", &foobar_attrs(), &["sdb1"], 31_260_672);
    sys.set_mounts(
        "/dev/sda2 / ext4 rw 0 0\n\
         /dev/sdb1 /media/user/FOO\\040BAR vfat rw,nosuid,nodev 0 0\n",
    );

    let devices = sys.platform().list_attached_devices().unwrap();
    assert_eq!(devices.len(), 1);

    let device = &devices[0];
    assert_eq!(device.vendor_code, 0x0a);
    assert_eq!(device.product_code, 0x12);
    assert_eq!(device.manufacturer.as_deref(), Some("Foo Bar Technologies"));
    assert_eq!(device.product.as_deref(), Some("Baz Sensing Quux"));
    assert_eq!(device.serial_number.as_deref(), Some("IDQFB0023AB"));
    assert_eq!(device.mount.as_deref(), Some("/media/user/FOO BAR"));
    assert_eq!(device.node.as_deref(), Some("/dev/sdb1"));
    assert_eq!(device.slot, "1-2");
}

#[test]
fn test_unmounted_disk_reports_first_partition() {
    let sys = FakeSys::new();
    sys.add_usb_disk("1-3", "sdc", &foobar_attrs(), &["sdc2", "sdc1"], 1024);

    let devices = sys.platform().list_attached_devices().unwrap();
    assert_eq!(devices[0].mount, None);
    assert_eq!(devices[0].node.as_deref(), Some("/dev/sdc1"));
}

#[test]
fn test_whole_disk_mount() {
    let sys = FakeSys::new();
    sys.add_usb_disk("1-3", "sdc", &foobar_attrs(), &[], 1024);
    sys.set_mounts("/dev/sdc /mnt/stick vfat rw 0 0\n");

    let devices = sys.platform().list_attached_devices().unwrap();
    assert_eq!(devices[0].mount.as_deref(), Some("/mnt/stick"));
    assert_eq!(devices[0].node.as_deref(), Some("/dev/sdc"));
}

#[tokio::test]
async fn test_every_mounted_partition_reported() {
    let sys = FakeSys::new();
    sys.add_usb_disk("1-2", "sdb", &foobar_attrs(), &["sdb1", "sdb2"], 1024);
    sys.set_mounts(
        "/dev/sdb1 /media/p1 vfat rw 0 0\n\
         /dev/sdb2 /media/p2 ext4 rw 0 0\n",
    );

    let volumes = sys.platform().list_attached_devices().unwrap();
    assert_eq!(volumes.len(), 2);
    assert!(volumes.iter().all(|v| v.slot == "1-2"));

    let engine = DriveEngine::new(Arc::new(sys.platform()));
    let devices = engine.poll_devices().await.unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].mount.as_deref(), Some("/media/p1"));
    assert_eq!(devices[0].node.as_deref(), Some("/dev/sdb1"));
    assert_eq!(devices[0].mount_points(), vec!["/media/p1", "/media/p2"]);
}

#[test]
fn test_missing_serial_is_not_an_error() {
    let sys = FakeSys::new();
    sys.add_usb_disk(
        "2-1.4",
        "sdd",
        &[("idVendor", "0781"), ("idProduct", "5581")],
        &["sdd1"],
        1024,
    );

    let devices = sys.platform().list_attached_devices().unwrap();
    assert_eq!(devices.len(), 1);
    assert!(devices[0].serial_number.is_none());
    assert!(devices[0].is_degraded());
    assert_eq!(devices[0].slot, "2-1.4");
}

#[test]
fn test_skips_empty_and_malformed_devices() {
    let sys = FakeSys::new();
    // Card reader without a card
    sys.add_usb_disk("1-5", "sde", &foobar_attrs(), &[], 0);
    // Garbage vendor id
    sys.add_usb_disk(
        "1-6",
        "sdf",
        &[("idVendor", "zzzz"), ("idProduct", "0001")],
        &[],
        1024,
    );
    sys.add_usb_disk("1-2", "sdb", &foobar_attrs(), &["sdb1"], 1024);

    let devices = sys.platform().list_attached_devices().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].slot, "1-2");
}

#[test]
fn test_missing_block_dir_is_query_error() {
    let sys = FakeSys::new();
    fs::remove_dir_all(sys.paths.sys_root.join("block")).unwrap();

    assert!(matches!(
        sys.platform().list_attached_devices(),
        Err(PlatformError::Query(_))
    ));
}

#[test]
fn test_unreadable_mount_table_is_query_error() {
    let sys = FakeSys::new();
    fs::remove_file(&sys.paths.mounts_path).unwrap();

    assert!(matches!(
        sys.platform().list_attached_devices(),
        Err(PlatformError::Query(_))
    ));
}

#[tokio::test]
async fn test_engine_over_sysfs() {
    let sys = FakeSys::new();
    sys.add_usb_disk("1-2", "sdb", &foobar_attrs(), &["sdb1"], 1024);
    sys.set_mounts("/dev/sdb1 /Volumes/FOOBAR1 vfat rw 0 0\n");

    let engine = DriveEngine::new(Arc::new(sys.platform()));
    let devices = engine.poll_devices().await.unwrap();
    assert_eq!(devices[0].id.as_str(), "0x0a-0x12-IDQFB0023AB");
    assert_eq!(devices[0].mount.as_deref(), Some("/Volumes/FOOBAR1"));

    // Unplugged
    fs::remove_file(sys.paths.sys_root.join("block/sdb")).unwrap();
    assert!(engine.poll_devices().await.unwrap().is_empty());
}
