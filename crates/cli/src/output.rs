//! Human-readable rendering of records and events

use records::hex::format_code;
use records::{DeviceEvent, DeviceRecord};
use std::fmt::Write;

/// Multi-line description of one device
pub fn format_device(device: &DeviceRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "  [{}]", device.id);
    let _ = writeln!(
        out,
        "      {}:{} - {} {}",
        format_code(device.vendor_code),
        format_code(device.product_code),
        device
            .manufacturer
            .as_deref()
            .unwrap_or("Unknown Manufacturer"),
        device.product.as_deref().unwrap_or("Unknown Product")
    );
    if let Some(serial) = &device.serial_number {
        let _ = writeln!(out, "      Serial: {}", serial);
    }
    match &device.mount {
        Some(mount) => {
            let _ = writeln!(out, "      Mounted at: {}", mount);
            for other in &device.other_mounts {
                let _ = writeln!(out, "      Also mounted at: {}", other);
            }
        }
        None => {
            let _ = writeln!(out, "      Not mounted");
        }
    }
    if device.degraded {
        let _ = writeln!(out, "      (no serial number, id depends on the USB port)");
    }
    out
}

/// Device listing as printed by `list`
pub fn format_device_list(devices: &[DeviceRecord]) -> String {
    if devices.is_empty() {
        return "No USB storage devices found.\n".to_string();
    }

    let mut out = format!("Found {} USB storage device(s):\n\n", devices.len());
    for device in devices {
        out.push_str(&format_device(device));
        out.push('\n');
    }
    out
}

/// One-line description of an event
pub fn format_event(event: &DeviceEvent) -> String {
    match event {
        DeviceEvent::Attached { device } => format!(
            "attached   {} ({})",
            device.id,
            device.product.as_deref().unwrap_or("Unknown Product")
        ),
        DeviceEvent::Detached { id } => format!("detached   {}", id),
        DeviceEvent::Mounted { id, mount } => format!("mounted    {} at {}", id, mount),
        DeviceEvent::Unmounted { id, previous } => {
            format!("unmounted  {} from {}", id, previous)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{create_mock_record, foobar_descriptor};
    use records::DeviceId;

    fn foobar() -> DeviceRecord {
        DeviceRecord::from_descriptor(
            DeviceId::from("0x0a-0x12-IDQFB0023AB"),
            false,
            foobar_descriptor(),
        )
    }

    #[test]
    fn test_format_device() {
        let text = format_device(&foobar());
        assert!(text.contains("[0x0a-0x12-IDQFB0023AB]"));
        assert!(text.contains("0x0a:0x12 - Foo Bar Technologies Baz Sensing Quux"));
        assert!(text.contains("Serial: IDQFB0023AB"));
        assert!(text.contains("Mounted at: /Volumes/FOOBAR1"));
        assert!(!text.contains("no serial number"));
        assert!(!text.contains("Also mounted"));
    }

    #[test]
    fn test_format_device_with_two_volumes() {
        let mut record = foobar();
        record.other_mounts.push("/Volumes/FOOBAR2".to_string());

        let text = format_device(&record);
        assert!(text.contains("Mounted at: /Volumes/FOOBAR1"));
        assert!(text.contains("Also mounted at: /Volumes/FOOBAR2"));
    }

    #[test]
    fn test_format_degraded_unmounted() {
        let mut record = create_mock_record("0x781-0x5581-@1-4", None);
        record.degraded = true;
        record.serial_number = None;

        let text = format_device(&record);
        assert!(text.contains("Not mounted"));
        assert!(text.contains("no serial number"));
        assert!(!text.contains("Serial:"));
    }

    #[test]
    fn test_format_empty_list() {
        assert_eq!(format_device_list(&[]), "No USB storage devices found.\n");
        assert!(format_device_list(&[foobar()]).starts_with("Found 1 USB storage device(s)"));
    }

    #[test]
    fn test_format_event() {
        let id = DeviceId::from("0x0a-0x12-IDQFB0023AB");
        assert_eq!(
            format_event(&DeviceEvent::Unmounted {
                id: id.clone(),
                previous: "/Volumes/FOOBAR1".to_string()
            }),
            "unmounted  0x0a-0x12-IDQFB0023AB from /Volumes/FOOBAR1"
        );
        assert_eq!(
            format_event(&DeviceEvent::Detached { id }),
            "detached   0x0a-0x12-IDQFB0023AB"
        );
    }
}
