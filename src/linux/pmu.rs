//! PMU sysfs metadata: event attribute resolution and engine discovery
//!
//! A PMU unit directory (e.g. `/sys/devices/i915`) carries a `type` file
//! with the perf event source id and an `events/` directory describing the
//! counters it exports. Engine counters follow the `<engine>-busy` naming
//! convention; their class and instance are recovered from the config bits.
//!
//! Every function takes the unit directory explicitly so tests can point
//! them at fixture trees.

use std::fs;
use std::path::{Path, PathBuf};

use crate::engine::Engine;
use crate::error::{Error, Result};

/// Root under which PMU unit directories live
pub const SYSFS_DEVICES: &str = "/sys/devices";

/// PMU unit name of the RAPL energy counters
pub const RAPL_UNIT: &str = "power";

/// PMU unit name of the memory-controller bandwidth counters
pub const IMC_UNIT: &str = "uncore_imc";

/// Longest event file name the discovery walk accepts
const NAME_MAX: usize = 255;

/// Resolved perf attributes of one named sysfs event
///
/// Everything needed to open the counter, and nothing more; opening is the
/// multiplexer's job.
#[derive(Debug, Clone, PartialEq)]
pub struct EventAttrs {
    /// Perf event source type id
    pub type_id: u64,
    /// Event config bits
    pub config: u64,
    /// Scale multiplier for rate display
    pub scale: f64,
    /// Unit string, e.g. `MiB` or `Joules`
    pub unit: String,
}

/// Path of a PMU unit directory under the sysfs devices root
pub fn unit_dir(device: &str) -> PathBuf {
    Path::new(SYSFS_DEVICES).join(device)
}

fn read_trimmed(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(s) => Ok(s.trim().to_string()),
        Err(e) => Err(Error::parse(path, format!("failed to read: {e}"))),
    }
}

/// Read the perf event source id from the unit's `type` file
pub fn perf_type_id(unit: &Path) -> Result<u64> {
    let path = unit.join("type");
    let text = read_trimmed(&path)?;

    text.parse()
        .map_err(|e| Error::parse(&path, format!("invalid type id {text:?}: {e}")))
}

fn parse_hex_or_dec(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

/// Parse an `events/<name>` file body of the form `event=0xHEX`
fn parse_event_value(text: &str) -> Option<u64> {
    for part in text.trim().split(',') {
        if let Some(value) = part.trim().strip_prefix("event=") {
            return parse_hex_or_dec(value);
        }
    }

    parse_hex_or_dec(text)
}

/// Read the config bits of a named event
pub fn event_config(unit: &Path, event: &str) -> Result<u64> {
    let path = unit.join("events").join(event);
    let text = read_trimmed(&path)?;

    parse_event_value(&text)
        .ok_or_else(|| Error::parse(&path, format!("invalid event config {text:?}")))
}

/// Resolve the full attribute set of a named event
///
/// Reads the unit `type` plus the event's config, `.scale` and `.unit`
/// sibling files. A scale that is zero or non-finite is refused; rate
/// arithmetic would divide the world by it later.
pub fn resolve_event(unit: &Path, event: &str) -> Result<EventAttrs> {
    let type_id = perf_type_id(unit)?;
    let config = event_config(unit, event)?;

    let scale_path = unit.join("events").join(format!("{event}.scale"));
    let scale_text = read_trimmed(&scale_path)?;
    let scale: f64 = scale_text
        .parse()
        .map_err(|e| Error::parse(&scale_path, format!("invalid scale {scale_text:?}: {e}")))?;

    if !scale.is_finite() || scale == 0.0 {
        return Err(Error::BadScale {
            path: scale_path,
            value: scale,
        });
    }

    let unit_path = unit.join("events").join(format!("{event}.unit"));
    let unit_str = read_trimmed(&unit_path)?;

    Ok(EventAttrs {
        type_id,
        config,
        scale,
        unit: unit_str,
    })
}

/// Discover the GPU engines a PMU unit exports
///
/// Walks `events/` for regular files named `<stem>-busy`, derives class
/// and instance from each config, and returns the table sorted stably by
/// (class, instance). An empty table means the kernel offers no engine
/// PMU for this device; a missing directory is reported the same way by
/// the caller.
pub fn discover_engines(unit: &Path) -> Result<Vec<Engine>> {
    const SUFFIX: &str = "-busy";

    let events_dir = unit.join("events");
    let entries = fs::read_dir(&events_dir).map_err(|_| Error::PmuUnsupported {
        device: unit.display().to_string(),
    })?;

    let mut engines = Vec::new();

    for entry in entries {
        let entry = entry.map_err(Error::Io)?;
        if !entry.file_type().map_err(Error::Io)?.is_file() {
            continue;
        }

        let file_name = entry.file_name();
        let name = match file_name.to_str() {
            Some(name) => name,
            None => continue,
        };

        if name.len() > NAME_MAX {
            return Err(Error::NameTooLong {
                name: name.to_string(),
            });
        }

        // xxxN-busy
        let stem = match name.strip_suffix(SUFFIX) {
            Some(stem) if stem.len() >= 4 => stem,
            _ => continue,
        };

        let config = event_config(unit, name)?;
        engines.push(Engine::from_busy_config(stem.to_string(), config));
    }

    engines.sort_by_key(|e| (e.class, e.instance));

    Ok(engines)
}
