//! Test utilities for usbdrive
//!
//! Provides descriptor and record builders plus async helpers for testing
//! across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::create_mock_descriptor;
//!
//! let raw = create_mock_descriptor(1);
//! assert_eq!(raw.serial_number.as_deref(), Some("SN000001"));
//! ```

use records::{DeviceId, DeviceRecord, RawDeviceDescriptor};
use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Descriptor of the reference flash drive
///
/// Vendor `0x0a`, product `0x12`, serial `IDQFB0023AB`, mounted at
/// `/Volumes/FOOBAR1`.
pub fn foobar_descriptor() -> RawDeviceDescriptor {
    RawDeviceDescriptor {
        vendor_code: 0x0a,
        product_code: 0x12,
        manufacturer: Some("Foo Bar Technologies".to_string()),
        product: Some("Baz Sensing Quux".to_string()),
        serial_number: Some("IDQFB0023AB".to_string()),
        mount: Some("/Volumes/FOOBAR1".to_string()),
        node: Some("/dev/sdb1".to_string()),
        slot: "1-2".to_string(),
    }
}

/// Create a mock descriptor with a serial number derived from `n`
///
/// # Arguments
/// * `n` - Device number, used for serial, slot and product name
pub fn create_mock_descriptor(n: u32) -> RawDeviceDescriptor {
    RawDeviceDescriptor {
        vendor_code: 0x0781,
        product_code: 0x5581,
        manufacturer: Some(format!("Test Manufacturer {}", n)),
        product: Some(format!("Test Drive {}", n)),
        serial_number: Some(format!("SN{:06}", n)),
        mount: None,
        node: Some(format!("/dev/sd{}1", drive_letter(n))),
        slot: format!("1-{}", n),
    }
}

/// Create a mock descriptor that is mounted at `mount`
pub fn create_mounted_descriptor(n: u32, mount: &str) -> RawDeviceDescriptor {
    RawDeviceDescriptor {
        mount: Some(mount.to_string()),
        ..create_mock_descriptor(n)
    }
}

/// Create a mock descriptor without a serial number
pub fn create_serialless_descriptor(n: u32) -> RawDeviceDescriptor {
    RawDeviceDescriptor {
        serial_number: None,
        ..create_mock_descriptor(n)
    }
}

/// Create a list of mock descriptors with distinct serials and slots
///
/// # Example
/// ```
/// use common::test_utils::create_mock_descriptor_list;
///
/// let devices = create_mock_descriptor_list(3);
/// assert_eq!(devices.len(), 3);
/// ```
pub fn create_mock_descriptor_list(count: u32) -> Vec<RawDeviceDescriptor> {
    (1..=count).map(create_mock_descriptor).collect()
}

/// Create a record directly, bypassing identity resolution
pub fn create_mock_record(id: &str, mount: Option<&str>) -> DeviceRecord {
    DeviceRecord {
        id: DeviceId::from(id),
        vendor_code: 0x0781,
        product_code: 0x5581,
        manufacturer: Some("Test Manufacturer".to_string()),
        product: Some("Test Drive".to_string()),
        serial_number: Some(id.to_string()),
        mount: mount.map(str::to_string),
        degraded: false,
        node: Some("/dev/sdz1".to_string()),
        other_mounts: Vec::new(),
    }
}

fn drive_letter(n: u32) -> char {
    (b'b' + (n % 24) as u8) as char
}

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
