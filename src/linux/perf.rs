//! Linux perf_event_open syscall wrapper and grouped counter I/O
//!
//! All counters of one logical group are opened against a shared group
//! leader so a single blocking read returns every value with one kernel
//! timestamp. The leader is opened with the group read format:
//!
//! ```text
//! [ nr_values:u64 ][ time_enabled:u64 ][ value_0:u64 ] ... [ value_{N-1}:u64 ]
//! ```
//!
//! `time_enabled` is the sampling timestamp the rate math runs on.

use std::fs::File;
use std::io::{self, Read};
use std::mem;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

use crate::error::{Error, Result};

/// perf_event_attr structure for perf_event_open
///
/// A prefix of the kernel structure wide enough for counting events; the
/// kernel accepts any size recorded in `size`.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct PerfEventAttr {
    /// Major type: the PMU's sysfs `type` id
    pub type_: u32,
    /// Size of the attr structure
    pub size: u32,
    /// Type-specific configuration
    pub config: u64,
    /// Sample period or frequency
    pub sample_period_or_freq: u64,
    /// Sampling type
    pub sample_type: u64,
    /// Reading format
    pub read_format: u64,
    /// Flag bits (disabled, inherit, ...)
    pub flags: u64,
    /// Wakeup events/watermark
    pub wakeup_events_or_watermark: u32,
    /// Breakpoint type
    pub bp_type: u32,
    /// Config1 (extension)
    pub config1: u64,
    /// Config2 (extension)
    pub config2: u64,
    /// Branch sample type
    pub branch_sample_type: u64,
    /// Sample regs user
    pub sample_regs_user: u64,
    /// Sample stack user
    pub sample_stack_user: u32,
    /// Clock ID
    pub clockid: i32,
    /// Sample regs intr
    pub sample_regs_intr: u64,
    /// Aux watermark
    pub aux_watermark: u32,
    /// Sample max stack
    pub sample_max_stack: u16,
    /// Reserved
    pub __reserved_2: u16,
    /// Aux sample size
    pub aux_sample_size: u32,
    /// Reserved
    pub __reserved_3: u32,
    /// Sig data
    pub sig_data: u64,
    /// Config3
    pub config3: u64,
}

impl Default for PerfEventAttr {
    fn default() -> Self {
        Self {
            type_: 0,
            size: mem::size_of::<Self>() as u32,
            config: 0,
            sample_period_or_freq: 0,
            sample_type: 0,
            read_format: 0,
            flags: 0,
            wakeup_events_or_watermark: 0,
            bp_type: 0,
            config1: 0,
            config2: 0,
            branch_sample_type: 0,
            sample_regs_user: 0,
            sample_stack_user: 0,
            clockid: 0,
            sample_regs_intr: 0,
            aux_watermark: 0,
            sample_max_stack: 0,
            __reserved_2: 0,
            aux_sample_size: 0,
            __reserved_3: 0,
            sig_data: 0,
            config3: 0,
        }
    }
}

/// read_format bits understood by the group reader
pub mod read_format {
    /// Include time_enabled after the value count
    pub const TOTAL_TIME_ENABLED: u64 = 1 << 0;
    /// Deliver every group member's value in one read
    pub const GROUP: u64 = 1 << 3;
}

/// Wrapper for the perf_event_open syscall
///
/// # Safety
///
/// `attr` must point to a valid attr structure for the duration of the
/// call; the remaining parameters are passed through to the kernel.
unsafe fn perf_event_open(
    attr: *const PerfEventAttr,
    pid: libc::pid_t,
    cpu: libc::c_int,
    group_fd: libc::c_int,
    flags: libc::c_ulong,
) -> libc::c_int {
    libc::syscall(libc::SYS_perf_event_open, attr, pid, cpu, group_fd, flags) as libc::c_int
}

fn open_event(type_id: u64, config: u64, group_fd: RawFd, event_name: &str) -> Result<File> {
    let mut format = read_format::TOTAL_TIME_ENABLED | read_format::GROUP;

    // Only the leader carries the group format; followers deliver through it.
    if group_fd >= 0 {
        format &= !read_format::GROUP;
    }

    let attr = PerfEventAttr {
        type_: type_id as u32,
        config,
        read_format: format,
        ..PerfEventAttr::default()
    };

    // pid=-1, cpu=0: device PMU events are system-wide.
    let fd = unsafe { perf_event_open(&attr as *const PerfEventAttr, -1, 0, group_fd, 0) };
    if fd < 0 {
        return Err(Error::CounterOpenRefused {
            event: event_name.to_string(),
            source: io::Error::last_os_error(),
        });
    }

    Ok(unsafe { File::from_raw_fd(fd) })
}

/// One kernel-grouped counter set: a leader plus its followers
///
/// The first successful [`open`](EventGroup::open) establishes the leader;
/// later opens attach to it. Indices returned by `open` are insertion
/// order and select slots in the value vector [`read`](EventGroup::read)
/// returns. Descriptors close when the group drops.
#[derive(Debug, Default)]
pub struct EventGroup {
    events: Vec<File>,
}

impl EventGroup {
    /// An empty group with no leader yet
    pub fn new() -> Self {
        EventGroup::default()
    }

    /// Open a counter into this group, returning its value index
    pub fn open(&mut self, type_id: u64, config: u64, event_name: &str) -> Result<usize> {
        let group_fd = match self.events.first() {
            Some(leader) => leader.as_raw_fd(),
            None => -1,
        };

        let file = open_event(type_id, config, group_fd, event_name)?;
        self.events.push(file);

        Ok(self.events.len() - 1)
    }

    /// Number of counters opened into the group
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when no counter has been opened
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Read every counter in one shot
    ///
    /// Returns the kernel timestamp and the value vector, index-aligned
    /// with the values handed out by [`open`](EventGroup::open).
    pub fn read(&mut self) -> Result<(u64, Vec<u64>)> {
        let num = self.events.len();
        let expected = (2 + num) * mem::size_of::<u64>();
        let mut buf = vec![0u8; expected];

        let leader = self
            .events
            .first_mut()
            .expect("read on a group with no leader");

        let got = leader.read(&mut buf)?;
        if got != expected {
            return Err(Error::ShortRead { expected, got });
        }

        let word = |i: usize| {
            let off = i * mem::size_of::<u64>();
            u64::from_ne_bytes(buf[off..off + 8].try_into().unwrap())
        };

        debug_assert_eq!(word(0) as usize, num);

        let timestamp = word(1);
        let values = (0..num).map(|i| word(2 + i)).collect();

        Ok((timestamp, values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_size_matches_struct() {
        let attr = PerfEventAttr::default();
        assert_eq!(attr.size as usize, mem::size_of::<PerfEventAttr>());
    }

    #[test]
    fn empty_group_has_no_leader() {
        let group = EventGroup::new();
        assert!(group.is_empty());
        assert_eq!(group.len(), 0);
    }

    #[test]
    fn open_refused_reports_the_event_name() {
        // Type id 0 with a garbage config is rejected on every kernel.
        let mut group = EventGroup::new();
        let err = group
            .open(u32::MAX as u64, u64::MAX, "bogus-event")
            .unwrap_err();
        match err {
            Error::CounterOpenRefused { event, .. } => assert_eq!(event, "bogus-event"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
