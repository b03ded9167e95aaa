//! GPU engine records and the per-class aggregated view
//!
//! Engine events carry their class and instance inside the perf config
//! bits. The layout is fixed by the kernel PMU ABI:
//!
//! ```text
//! bit  0..7   sample selector (busy, wait, sema)
//! bit  8..15  engine instance
//! bit 16..23  engine class
//! ```
//!
//! Configs at or above [`OTHER_BASE`] belong to the device-wide counters
//! (frequencies, interrupts, RC6) rather than to any engine.

use crate::counter::{Counter, CounterValue};

/// Width of the sample selector field
pub const SAMPLE_BITS: u32 = 8;
/// Width of the instance field
pub const INSTANCE_BITS: u32 = 8;
/// Offset of the class field
pub const CLASS_SHIFT: u32 = SAMPLE_BITS + INSTANCE_BITS;

/// First config value past the engine event space
pub const OTHER_BASE: u64 =
    ((0xff << CLASS_SHIFT) | (0xff << SAMPLE_BITS) | 0xff) + 1;

/// Config of the actual-frequency counter
pub const CONFIG_ACTUAL_FREQUENCY: u64 = OTHER_BASE;
/// Config of the requested-frequency counter
pub const CONFIG_REQUESTED_FREQUENCY: u64 = OTHER_BASE + 1;
/// Config of the interrupt counter
pub const CONFIG_INTERRUPTS: u64 = OTHER_BASE + 2;
/// Config of the RC6 residency counter
pub const CONFIG_RC6_RESIDENCY: u64 = OTHER_BASE + 3;

/// Sample selector values within an engine's config space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SampleType {
    /// Engine busy time
    Busy = 0,
    /// Engine wait time
    Wait = 1,
    /// Engine semaphore time
    Sema = 2,
}

/// Functional grouping of GPU execution units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineClass {
    /// Render/3D engine
    Render,
    /// Copy/blitter engine
    Copy,
    /// Video decode engine
    Video,
    /// Video enhance/encode engine
    VideoEnhance,
    /// Compute engine (Arc and newer)
    Compute,
    /// A class this tool has no name for
    Other(u16),
}

impl EngineClass {
    /// Map a numeric class id onto a known class
    pub fn from_id(id: u16) -> Self {
        match id {
            0 => EngineClass::Render,
            1 => EngineClass::Copy,
            2 => EngineClass::Video,
            3 => EngineClass::VideoEnhance,
            4 => EngineClass::Compute,
            other => EngineClass::Other(other),
        }
    }

    /// The numeric class id
    pub fn id(&self) -> u16 {
        match self {
            EngineClass::Render => 0,
            EngineClass::Copy => 1,
            EngineClass::Video => 2,
            EngineClass::VideoEnhance => 3,
            EngineClass::Compute => 4,
            EngineClass::Other(id) => *id,
        }
    }

    /// Long display name, as shown in row labels and JSON keys
    pub fn display_name(&self) -> &'static str {
        match self {
            EngineClass::Render => "Render/3D",
            EngineClass::Copy => "Blitter",
            EngineClass::Video => "Video",
            EngineClass::VideoEnhance => "VideoEnhance",
            EngineClass::Compute => "Compute",
            EngineClass::Other(_) => "[unknown]",
        }
    }

    /// Short name used in column headers
    pub fn short_name(&self) -> &'static str {
        match self {
            EngineClass::Render => "RCS",
            EngineClass::Copy => "BCS",
            EngineClass::Video => "VCS",
            EngineClass::VideoEnhance => "VECS",
            EngineClass::Compute => "CCS",
            EngineClass::Other(_) => "UNKN",
        }
    }
}

/// Build an engine event config from its parts
pub fn engine_config(class: u16, instance: u32, sample: SampleType) -> u64 {
    ((class as u64) << CLASS_SHIFT)
        | ((instance as u64) << SAMPLE_BITS)
        | (sample as u64)
}

/// Extract the class id from an engine event config
pub fn config_class(config: u64) -> u16 {
    ((config & (OTHER_BASE - 1)) >> CLASS_SHIFT) as u16
}

/// Extract the instance id from an engine event config
pub fn config_instance(config: u64) -> u32 {
    ((config >> SAMPLE_BITS) & ((1 << INSTANCE_BITS) - 1) as u64) as u32
}

/// One discovered GPU engine and its three counters
///
/// Immutable after discovery apart from the counter value pairs, which the
/// sampler rewrites every tick.
#[derive(Debug, Clone)]
pub struct Engine {
    /// sysfs event stem, e.g. `vcs0`
    pub name: String,
    /// Long label, e.g. `Video/0`
    pub display_name: String,
    /// Column label, e.g. `VCS/0`
    pub short_name: String,
    /// Numeric engine class
    pub class: u16,
    /// Instance within the class; `None` for a synthetic per-class engine
    pub instance: Option<u32>,
    /// Number of counters that opened successfully
    pub num_counters: u32,
    /// Busy time counter
    pub busy: Counter,
    /// Wait time counter
    pub wait: Counter,
    /// Semaphore time counter
    pub sema: Counter,
}

impl Engine {
    /// Build an engine record from its sysfs stem and busy-event config
    pub fn from_busy_config(name: String, config: u64) -> Self {
        let class = config_class(config);
        let instance = config_instance(config);
        let ec = EngineClass::from_id(class);

        Engine {
            display_name: format!("{}/{}", ec.display_name(), instance),
            short_name: format!("{}/{}", ec.short_name(), instance),
            name,
            class,
            instance: Some(instance),
            num_counters: 0,
            busy: Counter::with_config(config),
            wait: Counter::default(),
            sema: Counter::default(),
        }
    }
}

/// Per-class engine population, derived from the discovered engine table
#[derive(Debug, Clone, Copy)]
pub struct ClassPopulation {
    /// Numeric class id
    pub class: u16,
    /// Number of real engines in the class
    pub num_engines: u32,
}

fn count_classes(engines: &[Engine]) -> Vec<ClassPopulation> {
    let max = engines.iter().map(|e| e.class).max().unwrap_or(0);

    let mut classes: Vec<ClassPopulation> = (0..=max)
        .map(|class| ClassPopulation {
            class,
            num_engines: 0,
        })
        .collect();

    for engine in engines {
        classes[engine.class as usize].num_engines += 1;
    }

    classes
}

fn sum(dst: &mut CounterValue, src: &CounterValue) {
    dst.prev += src.prev;
    dst.cur += src.cur;
}

fn normalize(val: &mut CounterValue, n: u64) {
    val.prev /= n;
    val.cur /= n;
}

/// Aggregated per-class view of the engine table
///
/// One synthetic engine per populated class whose busy/wait/sema pairs are
/// the arithmetic mean of the real engines' pairs. Built lazily on the
/// first switch into class view and refreshed from the instance table each
/// tick; the instance table itself is never touched.
#[derive(Debug)]
pub struct ClassView {
    classes: Vec<ClassPopulation>,
    engines: Vec<Engine>,
}

impl ClassView {
    /// Build the synthetic engine table from the real one
    pub fn new(real: &[Engine]) -> Self {
        let classes = count_classes(real);
        let mut engines = Vec::new();

        for pop in classes.iter().filter(|c| c.num_engines > 0) {
            let ec = EngineClass::from_id(pop.class);

            // Counter metadata comes from one real engine of the class; the
            // value pairs are rewritten on every refresh.
            let template = real
                .iter()
                .find(|e| e.class == pop.class)
                .expect("populated class has at least one engine");

            engines.push(Engine {
                name: ec.short_name().to_ascii_lowercase(),
                display_name: ec.display_name().to_string(),
                short_name: ec.short_name().to_string(),
                class: pop.class,
                instance: None,
                num_counters: template.num_counters,
                busy: template.busy.clone(),
                wait: template.wait.clone(),
                sema: template.sema.clone(),
            });
        }

        ClassView { classes, engines }
    }

    /// Re-fold the real engines' value pairs into the class engines
    pub fn refresh(&mut self, real: &[Engine]) {
        for engine in &mut self.engines {
            let n = self.classes[engine.class as usize].num_engines as u64;

            engine.busy.val = CounterValue::default();
            engine.wait.val = CounterValue::default();
            engine.sema.val = CounterValue::default();

            for e in real.iter().filter(|e| e.class == engine.class) {
                sum(&mut engine.busy.val, &e.busy.val);
                sum(&mut engine.wait.val, &e.wait.val);
                sum(&mut engine.sema.val, &e.sema.val);
            }

            normalize(&mut engine.busy.val, n);
            normalize(&mut engine.wait.val, n);
            normalize(&mut engine.sema.val, n);
        }
    }

    /// The synthetic per-class engine table
    pub fn engines(&self) -> &[Engine] {
        &self.engines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::rate;

    #[test]
    fn config_round_trips_class_and_instance() {
        let config = engine_config(2, 1, SampleType::Busy);
        assert_eq!(config, 0x20100);
        assert_eq!(config_class(config), 2);
        assert_eq!(config_instance(config), 1);

        let config = engine_config(0, 0, SampleType::Wait);
        assert_eq!(config_class(config), 0);
        assert_eq!(config_instance(config), 0);
    }

    #[test]
    fn special_counter_configs_sit_past_the_engine_space() {
        assert_eq!(OTHER_BASE, 1 << 24);
        for config in [
            CONFIG_ACTUAL_FREQUENCY,
            CONFIG_REQUESTED_FREQUENCY,
            CONFIG_INTERRUPTS,
            CONFIG_RC6_RESIDENCY,
        ] {
            assert!(config >= OTHER_BASE);
        }
        // The densest possible engine config still sorts below them.
        assert!(engine_config(0xff, 0xff, SampleType::Sema) < OTHER_BASE);
    }

    #[test]
    fn engine_names_follow_class_and_instance() {
        let e = Engine::from_busy_config(
            "vcs1".into(),
            engine_config(2, 1, SampleType::Busy),
        );
        assert_eq!(e.display_name, "Video/1");
        assert_eq!(e.short_name, "VCS/1");
        assert_eq!(e.class, 2);
        assert_eq!(e.instance, Some(1));
    }

    #[test]
    fn unknown_classes_get_placeholder_names() {
        let e = Engine::from_busy_config(
            "odd0".into(),
            engine_config(9, 0, SampleType::Busy),
        );
        assert_eq!(e.display_name, "[unknown]/0");
        assert_eq!(e.short_name, "UNKN/0");
    }

    fn video_engine(instance: u32, prev: u64, cur: u64) -> Engine {
        let mut e = Engine::from_busy_config(
            format!("vcs{instance}"),
            engine_config(2, instance, SampleType::Busy),
        );
        e.num_counters = 1;
        e.busy.present = true;
        e.busy.val = CounterValue { cur, prev };
        e
    }

    #[test]
    fn class_view_averages_per_tick_deltas() {
        // Two video engines advancing 4e8 and 6e8 ns over a 1e9 ns interval
        // aggregate to a Video row reporting 50%.
        let real = vec![
            video_engine(0, 0, 400_000_000),
            video_engine(1, 0, 600_000_000),
        ];

        let mut view = ClassView::new(&real);
        view.refresh(&real);

        let video = &view.engines()[0];
        assert_eq!(video.display_name, "Video");
        assert_eq!(video.instance, None);
        assert_eq!(video.busy.val.delta(), 500_000_000);

        let busy = rate(&video.busy.val, 1e9, 1.0, 100.0);
        assert!((busy - 50.0).abs() < 1e-9);
    }

    #[test]
    fn class_view_delta_equals_mean_of_real_deltas() {
        let real = vec![
            video_engine(0, 100, 300),
            video_engine(1, 500, 900),
        ];

        let mut view = ClassView::new(&real);
        view.refresh(&real);

        let agg = &view.engines()[0].busy.val;
        let mean: u64 = real
            .iter()
            .map(|e| e.busy.val.delta())
            .sum::<u64>()
            / real.len() as u64;
        assert_eq!(agg.cur - agg.prev, mean);
    }

    #[test]
    fn refresh_leaves_instance_table_untouched() {
        let real = vec![video_engine(0, 0, 42)];
        let mut view = ClassView::new(&real);
        view.refresh(&real);
        assert_eq!(real[0].busy.val.cur, 42);
    }
}
