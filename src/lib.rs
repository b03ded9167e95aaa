//! Intel GPU telemetry sampler and exporter
//!
//! Periodically harvests the performance-monitoring counters the i915
//! driver exposes through the kernel perf subsystem, derives rates and
//! utilisations, and renders them as an interactive dashboard, plain-text
//! columns, a JSON object stream or a Prometheus exposition.
//!
//! The pipeline is linear: sysfs metadata resolution feeds engine
//! discovery, discovered counters are opened as kernel event groups so
//! one read yields a coherent snapshot, the sampler shifts value pairs
//! every tick, and the renderers all consume the same per-sample report.
//!
//! # Permissions
//!
//! Reading GPU counters requires root, membership in the `render` group,
//! or the `CAP_PERFMON` capability.
//!
//! # Example
//!
//! ```rust,no_run
//! use intel_gpu_top::linux::{device, sampler::Sampler};
//! use intel_gpu_top::output::{build_report, render_sample, text::TextRenderer};
//!
//! let cards = device::scan()?;
//! let card = device::select_card(&cards, None)?;
//! let mut sampler = Sampler::open(card)?;
//!
//! sampler.sample()?; // prime the previous-value slots
//! std::thread::sleep(std::time::Duration::from_secs(1));
//! sampler.sample()?;
//!
//! let report = build_report(&sampler.view(false, &card.codename, &card.card));
//! let mut renderer = TextRenderer::new(std::io::stdout());
//! render_sample(&mut renderer, &report)?;
//! # Ok::<(), intel_gpu_top::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod counter;
pub mod engine;
pub mod error;
pub mod output;

#[cfg(target_os = "linux")]
pub mod linux;

pub use counter::{rate, Counter, CounterValue};
pub use engine::{Engine, EngineClass};
pub use error::{Error, Result};
