//! Kernel-facing half of the sampler
//!
//! Everything here talks to Linux directly: DRM device enumeration, PMU
//! sysfs metadata, the perf_event_open syscall and the grouped counter
//! reads the sampler is built on.

pub mod device;
pub mod perf;
pub mod pmu;
pub mod sampler;

pub use device::DeviceCard;
pub use perf::EventGroup;
pub use sampler::Sampler;
