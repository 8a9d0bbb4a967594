//! Record types for usbdrive
//!
//! This crate defines the data shared by the engine and its callers: the
//! device record with its fixed external JSON shape, raw platform
//! descriptors, change events and the error taxonomy.
//!
//! # Example
//!
//! ```
//! use records::{DeviceId, DeviceRecord, RawDeviceDescriptor};
//!
//! let raw = RawDeviceDescriptor {
//!     vendor_code: 0x0a,
//!     product_code: 0x12,
//!     manufacturer: Some("Foo Bar Technologies".to_string()),
//!     product: Some("Baz Sensing Quux".to_string()),
//!     serial_number: Some("IDQFB0023AB".to_string()),
//!     mount: Some("/Volumes/FOOBAR1".to_string()),
//!     node: None,
//!     slot: "1-2".to_string(),
//! };
//!
//! let record = DeviceRecord::from_descriptor(DeviceId::from("0x0a-0x12-IDQFB0023AB"), false, raw);
//! assert_eq!(record.to_json()["vendorCode"], "0x0a");
//! ```

pub mod error;
pub mod hex;
pub mod types;

pub use error::{DriveError, Result};
pub use types::{DeviceEvent, DeviceId, DeviceRecord, RawDeviceDescriptor};
