//! Intel GPU enumeration and device-filter matching
//!
//! Cards are found by walking `/sys/class/drm` for `cardN` entries whose
//! PCI vendor is Intel. The selected card yields the PMU unit name the
//! rest of the tool keys on: the literal `i915` for the integrated GPU,
//! or `i915_dddd_bb_dd.f` derived from the PCI slot for discrete cards.

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Intel PCI vendor id
pub const INTEL_VENDOR_ID: u16 = 0x8086;

/// PCI slot the integrated GPU always occupies
const IGPU_PCI_SLOT: &str = "0000:00:02.0";

/// Default DRM class directory
pub const SYSFS_DRM: &str = "/sys/class/drm";

/// One Intel GPU as seen through the DRM class directory
#[derive(Debug, Clone)]
pub struct DeviceCard {
    /// DRM card id, e.g. `card0`
    pub card: String,
    /// PCI slot, e.g. `0000:00:02.0`
    pub pci_slot: String,
    /// PCI vendor id
    pub vendor_id: u16,
    /// PCI device id
    pub device_id: u16,
    /// Marketing name, or a hex fallback
    pub codename: String,
}

impl DeviceCard {
    /// True for the integrated GPU slot
    pub fn is_integrated(&self) -> bool {
        self.pci_slot == IGPU_PCI_SLOT
    }

    /// PMU unit name under `/sys/devices` for this card
    ///
    /// Discrete cards transliterate their PCI slot: every `:` becomes `_`
    /// and the whole is prefixed `i915_`.
    pub fn pmu_name(&self) -> String {
        if self.is_integrated() || self.pci_slot.is_empty() {
            "i915".to_string()
        } else {
            format!("i915_{}", self.pci_slot.replace(':', "_"))
        }
    }
}

fn parse_hex_id(s: &str) -> Option<u16> {
    let s = s.trim();
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u16::from_str_radix(digits, 16).ok()
}

fn read_hex_id(path: &Path) -> Result<u16> {
    let text = fs::read_to_string(path)
        .map_err(|e| Error::parse(path, format!("failed to read: {e}")))?;

    parse_hex_id(&text).ok_or_else(|| Error::parse(path, format!("invalid id {:?}", text.trim())))
}

fn pci_slot_of(card_path: &Path) -> String {
    let device = card_path.join("device");

    let target = match fs::read_link(&device) {
        Ok(t) => t,
        Err(_) => match fs::canonicalize(&device) {
            Ok(t) => t,
            Err(_) => return String::new(),
        },
    };

    target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn driver_of(card_path: &Path) -> Option<String> {
    let target = fs::read_link(card_path.join("device/driver")).ok()?;
    target.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// Marketing name for a handful of common device ids
fn codename(device_id: u16) -> String {
    let name = match device_id {
        0x3e90..=0x3e92 | 0x3e98 => "Intel UHD Graphics 630",
        0x5917 => "Intel UHD Graphics 620",
        0x9a40 | 0x9a49 => "Intel UHD Graphics (11th Gen)",
        0x4680 => "Intel UHD Graphics 770",
        0x4692 => "Intel UHD Graphics 730",
        0x8a52 => "Intel Iris Plus Graphics G7",
        0x8a56 => "Intel Iris Plus Graphics G1",
        0x46a6 | 0x9a78 => "Intel Iris Xe Graphics",
        0x5690 => "Intel Arc A770M",
        0x5691 => "Intel Arc A730M",
        0x5692 => "Intel Arc A550M",
        0x56a0 => "Intel Arc A770",
        0x56a1 => "Intel Arc A750",
        0x56a5 => "Intel Arc A380",
        other => return format!("Intel GPU (0x{other:04x})"),
    };

    name.to_string()
}

/// Enumerate Intel cards under a DRM class directory
pub fn scan_at(drm_root: &Path) -> Result<Vec<DeviceCard>> {
    let entries = match fs::read_dir(drm_root) {
        Ok(e) => e,
        Err(_) => return Ok(Vec::new()),
    };

    let mut cards = Vec::new();

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();

        // cardN only; card0-DP-1 style connector entries carry a dash.
        if !name.starts_with("card") || name.contains('-') {
            continue;
        }

        let card_path = entry.path();
        let vendor_id = match read_hex_id(&card_path.join("device/vendor")) {
            Ok(id) => id,
            Err(_) => continue,
        };
        if vendor_id != INTEL_VENDOR_ID {
            continue;
        }

        if let Some(driver) = driver_of(&card_path) {
            if driver != "i915" {
                continue;
            }
        }

        let device_id = read_hex_id(&card_path.join("device/device")).unwrap_or(0);

        cards.push(DeviceCard {
            card: name,
            pci_slot: pci_slot_of(&card_path),
            vendor_id,
            device_id,
            codename: codename(device_id),
        });
    }

    cards.sort_by(|a, b| a.card.cmp(&b.card));

    Ok(cards)
}

/// Enumerate Intel cards on the running system
pub fn scan() -> Result<Vec<DeviceCard>> {
    scan_at(Path::new(SYSFS_DRM))
}

/// Parsed device-filter expression
///
/// Supported forms:
/// - `card0` or `drm:card0` or `drm:/dev/dri/card0`
/// - `pci:vendor=8086,device=5916,slot=0000:00:02.0,card=0`
///   (each key optional; `card=N` indexes into the remaining matches)
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DeviceFilter {
    card: Option<String>,
    vendor: Option<u16>,
    device: Option<u16>,
    slot: Option<String>,
    index: Option<usize>,
}

impl DeviceFilter {
    /// Parse a filter expression; `None` when the syntax is unrecognised
    pub fn parse(expr: &str) -> Option<Self> {
        let expr = expr.trim();

        if let Some(rest) = expr.strip_prefix("drm:") {
            let card = rest.rsplit('/').next()?.to_string();
            if !card.starts_with("card") {
                return None;
            }
            return Some(DeviceFilter {
                card: Some(card),
                ..DeviceFilter::default()
            });
        }

        if let Some(rest) = expr.strip_prefix("pci:") {
            let mut filter = DeviceFilter::default();
            for kv in rest.split(',') {
                let (key, value) = kv.split_once('=')?;
                match key.trim() {
                    "vendor" => filter.vendor = Some(parse_hex_id(value)?),
                    "device" => filter.device = Some(parse_hex_id(value)?),
                    "slot" => filter.slot = Some(value.trim().to_string()),
                    "card" => filter.index = Some(value.trim().parse().ok()?),
                    _ => return None,
                }
            }
            return Some(filter);
        }

        if expr.starts_with("card") && !expr.contains('/') {
            return Some(DeviceFilter {
                card: Some(expr.to_string()),
                ..DeviceFilter::default()
            });
        }

        None
    }

    fn matches(&self, card: &DeviceCard) -> bool {
        if let Some(name) = &self.card {
            if *name != card.card {
                return false;
            }
        }
        if let Some(vendor) = self.vendor {
            if vendor != card.vendor_id {
                return false;
            }
        }
        if let Some(device) = self.device {
            if device != card.device_id {
                return false;
            }
        }
        if let Some(slot) = &self.slot {
            if *slot != card.pci_slot {
                return false;
            }
        }
        true
    }

    /// Apply the filter to a scanned card list
    pub fn select<'a>(&self, cards: &'a [DeviceCard]) -> Option<&'a DeviceCard> {
        let mut matches = cards.iter().filter(|c| self.matches(c));
        match self.index {
            Some(n) => matches.nth(n),
            None => matches.next(),
        }
    }
}

/// Pick the card a filter expression names, or the default card
///
/// With no filter the first discrete card wins, falling back to the
/// integrated GPU. A filter that matches nothing is fatal.
pub fn select_card<'a>(cards: &'a [DeviceCard], filter: Option<&str>) -> Result<&'a DeviceCard> {
    match filter {
        Some(expr) => DeviceFilter::parse(expr)
            .and_then(|f| f.select(cards))
            .ok_or_else(|| Error::DeviceNotFound {
                filter: expr.to_string(),
            }),
        None => cards
            .iter()
            .find(|c| !c.is_integrated())
            .or_else(|| cards.iter().find(|c| c.is_integrated()))
            .ok_or(Error::NoDevice),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    fn card(card: &str, slot: &str, device_id: u16) -> DeviceCard {
        DeviceCard {
            card: card.to_string(),
            pci_slot: slot.to_string(),
            vendor_id: INTEL_VENDOR_ID,
            device_id,
            codename: codename(device_id),
        }
    }

    #[test]
    fn integrated_card_uses_the_bare_pmu_name() {
        let igpu = card("card0", "0000:00:02.0", 0x5917);
        assert!(igpu.is_integrated());
        assert_eq!(igpu.pmu_name(), "i915");
    }

    #[test]
    fn discrete_card_transliterates_its_slot() {
        let dgpu = card("card1", "0000:03:00.0", 0x56a0);
        assert!(!dgpu.is_integrated());
        assert_eq!(dgpu.pmu_name(), "i915_0000_03_00.0");
    }

    #[test]
    fn default_selection_prefers_discrete() {
        let cards = vec![
            card("card0", "0000:00:02.0", 0x5917),
            card("card1", "0000:03:00.0", 0x56a0),
        ];
        assert_eq!(select_card(&cards, None).unwrap().card, "card1");

        let only_igpu = vec![card("card0", "0000:00:02.0", 0x5917)];
        assert_eq!(select_card(&only_igpu, None).unwrap().card, "card0");

        assert!(matches!(select_card(&[], None), Err(Error::NoDevice)));
    }

    #[test]
    fn filters_parse_and_match() {
        let cards = vec![
            card("card0", "0000:00:02.0", 0x5917),
            card("card1", "0000:03:00.0", 0x56a0),
        ];

        let by_card = DeviceFilter::parse("card1").unwrap();
        assert_eq!(by_card.select(&cards).unwrap().device_id, 0x56a0);

        let by_node = DeviceFilter::parse("drm:/dev/dri/card0").unwrap();
        assert_eq!(by_node.select(&cards).unwrap().card, "card0");

        let by_pci = DeviceFilter::parse("pci:vendor=8086,device=5917").unwrap();
        assert_eq!(by_pci.select(&cards).unwrap().card, "card0");

        let by_index = DeviceFilter::parse("pci:vendor=8086,card=1").unwrap();
        assert_eq!(by_index.select(&cards).unwrap().card, "card1");
    }

    #[test]
    fn unmatched_filter_is_device_not_found() {
        let cards = vec![card("card0", "0000:00:02.0", 0x5917)];
        let err = select_card(&cards, Some("pci:vendor=0x8086,card=99")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Requested device pci:vendor=0x8086,card=99 not found!"
        );
    }

    #[test]
    fn malformed_filter_is_device_not_found() {
        let cards = vec![card("card0", "0000:00:02.0", 0x5917)];
        assert!(matches!(
            select_card(&cards, Some("nvml:gpu0")),
            Err(Error::DeviceNotFound { .. })
        ));
    }

    #[test]
    fn scan_reads_fixture_drm_tree() {
        let root = std::env::temp_dir().join(format!(
            "intel-gpu-top-drm-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&root);

        // card0 -> intel igpu at the canonical slot
        let pci_dir = root.join("pci").join("0000:00:02.0");
        fs::create_dir_all(&pci_dir).unwrap();
        fs::write(pci_dir.join("vendor"), "0x8086\n").unwrap();
        fs::write(pci_dir.join("device"), "0x5917\n").unwrap();
        fs::create_dir_all(root.join("card0")).unwrap();
        symlink(&pci_dir, root.join("card0/device")).unwrap();

        // card0-eDP-1 connector entry and a non-Intel card must be skipped
        fs::create_dir_all(root.join("card0-eDP-1")).unwrap();
        let other_dir = root.join("pci").join("0000:01:00.0");
        fs::create_dir_all(&other_dir).unwrap();
        fs::write(other_dir.join("vendor"), "0x10de\n").unwrap();
        fs::write(other_dir.join("device"), "0x2204\n").unwrap();
        fs::create_dir_all(root.join("card1")).unwrap();
        symlink(&other_dir, root.join("card1/device")).unwrap();

        let cards = scan_at(&root).unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].card, "card0");
        assert_eq!(cards[0].pci_slot, "0000:00:02.0");
        assert_eq!(cards[0].codename, "Intel UHD Graphics 620");

        let _ = fs::remove_dir_all(&root);
    }
}
