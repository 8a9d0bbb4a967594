//! libusb backend
//!
//! Portable enumeration through `rusb`. Lists USB devices that expose a
//! mass-storage interface and reads their string descriptors. libusb has no
//! view of volumes, so devices are always reported unmounted and mount
//! operations are not supported.

use super::{Platform, PlatformError};
use records::{DeviceRecord, RawDeviceDescriptor};
use rusb::{Context, Device, DeviceDescriptor, DeviceHandle, UsbContext};
use std::path::Path;
use tracing::{debug, warn};

/// USB class code for mass storage
pub const MASS_STORAGE_CLASS: u8 = 0x08;

/// libusb-backed platform
///
/// A fresh context is created for every enumeration.
#[derive(Debug, Default)]
pub struct LibusbPlatform;

impl LibusbPlatform {
    pub fn new() -> Self {
        Self
    }
}

impl Platform for LibusbPlatform {
    fn name(&self) -> &'static str {
        "libusb"
    }

    fn list_attached_devices(&self) -> Result<Vec<RawDeviceDescriptor>, PlatformError> {
        let context = Context::new()
            .map_err(|e| PlatformError::Query(format!("Failed to create USB context: {}", e)))?;
        let devices = context
            .devices()
            .map_err(|e| PlatformError::Query(format!("Failed to list USB devices: {}", e)))?;

        let mut found = Vec::new();
        for device in devices.iter() {
            match describe_device(&device) {
                Ok(Some(raw)) => found.push(raw),
                Ok(None) => {}
                Err(e) => warn!(
                    "Skipping USB device bus={}, addr={}: {}",
                    device.bus_number(),
                    device.address(),
                    e
                ),
            }
        }

        debug!("Enumerated {} USB mass-storage devices", found.len());
        Ok(found)
    }

    fn unmount(&self, _device: &DeviceRecord) -> Result<(), PlatformError> {
        Err(PlatformError::NotSupported(self.name()))
    }

    fn mount(&self, _device: &DeviceRecord, _target: &Path) -> Result<(), PlatformError> {
        Err(PlatformError::NotSupported(self.name()))
    }
}

/// Build a descriptor for a mass-storage device, `None` for anything else
fn describe_device<T: UsbContext>(
    device: &Device<T>,
) -> Result<Option<RawDeviceDescriptor>, rusb::Error> {
    let descriptor = device.device_descriptor()?;

    if !is_mass_storage(device, &descriptor) {
        return Ok(None);
    }

    // Strings need an open handle; without access we still report the codes
    let (manufacturer, product, serial_number) = match device.open() {
        Ok(handle) => read_string_descriptors(&handle, &descriptor),
        Err(e) => {
            debug!(
                "Cannot open device {:#06x}:{:#06x} to read strings: {}",
                descriptor.vendor_id(),
                descriptor.product_id(),
                e
            );
            (None, None, None)
        }
    };

    Ok(Some(RawDeviceDescriptor {
        vendor_code: descriptor.vendor_id(),
        product_code: descriptor.product_id(),
        manufacturer,
        product,
        serial_number,
        mount: None,
        node: None,
        slot: port_path(device),
    }))
}

/// Check the device class and every interface of every configuration
fn is_mass_storage<T: UsbContext>(device: &Device<T>, descriptor: &DeviceDescriptor) -> bool {
    if descriptor.class_code() == MASS_STORAGE_CLASS {
        return true;
    }

    (0..descriptor.num_configurations()).any(|index| {
        device.config_descriptor(index).is_ok_and(|config| {
            config.interfaces().any(|interface| {
                interface
                    .descriptors()
                    .any(|alt| alt.class_code() == MASS_STORAGE_CLASS)
            })
        })
    })
}

/// Port path in sysfs notation (`1-2.3`), falling back to bus and address
fn port_path<T: UsbContext>(device: &Device<T>) -> String {
    match device.port_numbers() {
        Ok(ports) if !ports.is_empty() => {
            let ports: Vec<String> = ports.iter().map(|p| p.to_string()).collect();
            format!("{}-{}", device.bus_number(), ports.join("."))
        }
        _ => format!("{}:{}", device.bus_number(), device.address()),
    }
}

fn read_string_descriptors<T: UsbContext>(
    handle: &DeviceHandle<T>,
    descriptor: &DeviceDescriptor,
) -> (Option<String>, Option<String>, Option<String>) {
    let manufacturer = descriptor
        .manufacturer_string_index()
        .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

    let product = descriptor
        .product_string_index()
        .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

    let serial_number = descriptor
        .serial_number_string_index()
        .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

    (manufacturer, product, serial_number)
}
