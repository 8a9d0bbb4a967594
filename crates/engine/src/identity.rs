//! Device identity resolution
//!
//! Turns raw descriptors into records with stable identifiers. The id is a
//! pure function of vendor code, product code and serial number, so it
//! survives re-plugging and remounting. Devices without a serial fall back to
//! their hardware slot and are flagged as degraded.
//!
//! Slot ids put `@` right after the product code. A serial starting with `@`
//! or `%` gets a `%` prefix, so no serial id can take the shape of a slot id.

use records::hex::format_code;
use records::{DeviceId, DeviceRecord, RawDeviceDescriptor};
use std::borrow::Cow;
use std::collections::HashMap;
use tracing::warn;

/// Marker that starts the slot part of a degraded id
const SLOT_MARKER: char = '@';
const ESCAPE: char = '%';

/// Resolved identity of one descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: DeviceId,
    /// True if the id is derived from the hardware slot
    pub degraded: bool,
}

/// Resolve the identity of a single descriptor
pub fn resolve(raw: &RawDeviceDescriptor) -> Identity {
    match raw.usable_serial() {
        Some(serial) => Identity {
            id: DeviceId(format!(
                "{}-{}-{}",
                format_code(raw.vendor_code),
                format_code(raw.product_code),
                escape_serial(serial)
            )),
            degraded: false,
        },
        None => slot_identity(raw),
    }
}

/// Identity derived from the hardware slot, always degraded
pub fn slot_identity(raw: &RawDeviceDescriptor) -> Identity {
    Identity {
        id: DeviceId(format!(
            "{}-{}-{}{}",
            format_code(raw.vendor_code),
            format_code(raw.product_code),
            SLOT_MARKER,
            raw.slot
        )),
        degraded: true,
    }
}

fn escape_serial(serial: &str) -> Cow<'_, str> {
    if serial.starts_with([SLOT_MARKER, ESCAPE]) {
        Cow::Owned(format!("{}{}", ESCAPE, serial))
    } else {
        Cow::Borrowed(serial)
    }
}

/// Resolve one enumeration pass into records, one per physical unit
///
/// Descriptors with the same id and slot are volumes of one unit and merge
/// into a single record that keeps every mount point. A unit whose serial id
/// is already taken by a unit in another slot gets its slot identity instead.
/// Output order follows the first appearance of each unit.
pub fn resolve_all(descriptors: Vec<RawDeviceDescriptor>) -> Vec<DeviceRecord> {
    let mut records: Vec<DeviceRecord> = Vec::with_capacity(descriptors.len());
    // id -> (index into records, slot of the unit that owns it)
    let mut owners: HashMap<DeviceId, (usize, String)> = HashMap::new();

    for raw in descriptors {
        let mut identity = resolve(&raw);

        if let Some((_, slot)) = owners.get(&identity.id)
            && *slot != raw.slot
        {
            let demoted = slot_identity(&raw);
            warn!(
                "Device in slot {} reports the same id {} as slot {}, using {}",
                raw.slot, identity.id, slot, demoted.id
            );
            identity = demoted;
        }

        // Slot ids embed the slot, so an owner found here is the same unit
        if let Some((index, _)) = owners.get(&identity.id) {
            records[*index].merge_volume(raw);
            continue;
        }

        owners.insert(identity.id.clone(), (records.len(), raw.slot.clone()));
        records.push(DeviceRecord::from_descriptor(
            identity.id,
            identity.degraded,
            raw,
        ));
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn descriptor(serial: Option<&str>, slot: &str) -> RawDeviceDescriptor {
        RawDeviceDescriptor {
            vendor_code: 0x0a,
            product_code: 0x12,
            manufacturer: Some("Foo Bar Technologies".to_string()),
            product: Some("Baz Sensing Quux".to_string()),
            serial_number: serial.map(str::to_string),
            mount: None,
            node: Some("/dev/sdb".to_string()),
            slot: slot.to_string(),
        }
    }

    #[test]
    fn test_resolve_with_serial() {
        let identity = resolve(&descriptor(Some("IDQFB0023AB"), "1-2"));
        assert_eq!(identity.id.as_str(), "0x0a-0x12-IDQFB0023AB");
        assert!(!identity.degraded);
    }

    #[test]
    fn test_resolve_ignores_mount_and_slot() {
        let mut a = descriptor(Some("S1"), "1-2");
        let mut b = descriptor(Some("S1"), "3-4");
        a.mount = Some("/media/a".to_string());
        b.node = Some("/dev/sdz".to_string());
        assert_eq!(resolve(&a), resolve(&b));
    }

    #[test]
    fn test_resolve_without_serial() {
        let identity = resolve(&descriptor(None, "1-2.3"));
        assert_eq!(identity.id.as_str(), "0x0a-0x12-@1-2.3");
        assert!(identity.degraded);

        let blank = resolve(&descriptor(Some("  "), "1-2.3"));
        assert_eq!(blank, identity);
    }

    #[test]
    fn test_resolve_all_merges_partitions() {
        let first = descriptor(Some("S1"), "1-2");
        let mut second = descriptor(Some("S1"), "1-2");
        second.mount = Some("/media/part2".to_string());
        second.node = Some("/dev/sdb2".to_string());

        let records = resolve_all(vec![first, second]);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].mount.as_deref(), Some("/media/part2"));
        assert_eq!(records[0].node.as_deref(), Some("/dev/sdb2"));
    }

    #[test]
    fn test_resolve_all_keeps_every_mount() {
        let mut first = descriptor(Some("S1"), "1-2");
        first.mount = Some("/media/one".to_string());
        let mut second = descriptor(Some("S1"), "1-2");
        second.mount = Some("/media/two".to_string());

        let records = resolve_all(vec![first, second]);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].mount.as_deref(), Some("/media/one"));
        assert_eq!(records[0].other_mounts, vec!["/media/two".to_string()]);
    }

    #[test]
    fn test_serial_cannot_look_like_slot_id() {
        let identity = resolve(&descriptor(Some("@1-3"), "2-1"));
        assert_eq!(identity.id.as_str(), "0x0a-0x12-%@1-3");
        assert!(!identity.degraded);

        let escaped = resolve(&descriptor(Some("%@1-3"), "2-1"));
        assert_eq!(escaped.id.as_str(), "0x0a-0x12-%%@1-3");
        assert_ne!(escaped, identity);

        assert_eq!(
            resolve(&descriptor(Some("A@B"), "2-1")).id.as_str(),
            "0x0a-0x12-A@B"
        );
    }

    #[test]
    fn test_resolve_all_marker_serial_and_serialless_unit() {
        let records = resolve_all(vec![
            descriptor(Some("@1-3"), "2-1"),
            descriptor(None, "1-3"),
        ]);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id.as_str(), "0x0a-0x12-%@1-3");
        assert_eq!(records[1].id.as_str(), "0x0a-0x12-@1-3");
        assert!(records[1].degraded);
    }

    #[test]
    fn test_resolve_all_demoted_unit_merges_its_volumes() {
        let mut second = descriptor(Some("BOGUS"), "1-3");
        second.mount = Some("/media/b1".to_string());
        let mut third = descriptor(None, "1-3");
        third.mount = Some("/media/b2".to_string());

        let records = resolve_all(vec![descriptor(Some("BOGUS"), "1-2"), second, third]);

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].id.as_str(), "0x0a-0x12-@1-3");
        assert_eq!(records[1].mount_points(), vec!["/media/b1", "/media/b2"]);
    }

    #[test]
    fn test_resolve_all_demotes_duplicate_serial() {
        let records = resolve_all(vec![
            descriptor(Some("BOGUS"), "1-2"),
            descriptor(Some("BOGUS"), "1-3"),
        ]);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id.as_str(), "0x0a-0x12-BOGUS");
        assert!(!records[0].degraded);
        assert_eq!(records[1].id.as_str(), "0x0a-0x12-@1-3");
        assert!(records[1].degraded);
    }

    proptest! {
        #[test]
        fn prop_resolve_is_deterministic(
            vendor in any::<u16>(),
            product in any::<u16>(),
            serial in proptest::option::of("[A-Za-z0-9@%]{0,16}"),
            slot in "[0-9]-[0-9](\\.[0-9]){0,2}",
            mount in proptest::option::of("/media/[a-z]{1,8}"),
        ) {
            let raw = RawDeviceDescriptor {
                vendor_code: vendor,
                product_code: product,
                manufacturer: None,
                product: None,
                serial_number: serial.clone(),
                mount: mount.clone(),
                node: None,
                slot: slot.clone(),
            };
            let unmounted = RawDeviceDescriptor { mount: None, ..raw.clone() };

            let identity = resolve(&raw);
            prop_assert_eq!(&identity, &resolve(&raw));
            prop_assert_eq!(&identity, &resolve(&unmounted));
            prop_assert_eq!(identity.degraded, serial.as_deref().is_none_or(str::is_empty));
            prop_assert_eq!(identity.degraded, identity.id.as_str().contains("-@"));
        }
    }
}
