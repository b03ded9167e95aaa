//! Fixed-interval sampling of the three counter groups
//!
//! The sampler owns every counter and all engine records. Init opens three
//! independent kernel groups (engines, RAPL, IMC); each tick issues one
//! grouped read per non-empty group and shifts current values into the
//! previous slots. The engine group's timestamp is the canonical sample
//! timestamp.
//!
//! Counters are opportunistic: one that fails to open is marked absent and
//! skipped everywhere. The single exception is the interrupt counter,
//! which anchors the engine group as its leader and is therefore required.

use std::path::PathBuf;

use log::warn;

use crate::counter::{Counter, CounterValue};
use crate::engine::{
    ClassView, Engine, CONFIG_ACTUAL_FREQUENCY, CONFIG_INTERRUPTS,
    CONFIG_REQUESTED_FREQUENCY, CONFIG_RC6_RESIDENCY,
};
use crate::error::{Error, Result};
use crate::linux::device::DeviceCard;
use crate::linux::perf::EventGroup;
use crate::linux::pmu::{self, EventAttrs};
use crate::output::SampleView;

/// RAPL energy counters expected to report joules
const RAPL_UNIT_NAME: &str = "Joules";

/// All counter state for one GPU, updated in place every tick
pub struct Sampler {
    device: String,
    discrete: bool,
    unit: PathBuf,
    type_id: u64,

    engine_group: EventGroup,
    rapl_group: EventGroup,
    imc_group: EventGroup,

    ts: CounterValue,

    /// Interrupt counter (engine group leader)
    pub irq: Counter,
    /// Requested GPU frequency
    pub freq_req: Counter,
    /// Actual GPU frequency
    pub freq_act: Counter,
    /// RC6 residency
    pub rc6: Counter,
    /// GPU energy (integrated only)
    pub r_gpu: Counter,
    /// Package energy (integrated only)
    pub r_pkg: Counter,
    /// Memory-controller read bytes
    pub imc_reads: Counter,
    /// Memory-controller write bytes
    pub imc_writes: Counter,

    /// Discovered engines, sorted by (class, instance)
    pub engines: Vec<Engine>,

    class_view: Option<ClassView>,
}

impl Sampler {
    /// Discover engines and open all counter groups for a card
    pub fn open(card: &DeviceCard) -> Result<Self> {
        let device = card.pmu_name();
        let unit = pmu::unit_dir(&device);

        let engines = pmu::discover_engines(&unit)?;
        if engines.is_empty() {
            return Err(Error::PmuUnsupported {
                device: device.clone(),
            });
        }

        let type_id = pmu::perf_type_id(&unit)?;

        let mut sampler = Sampler {
            device,
            discrete: !card.is_integrated(),
            unit,
            type_id,
            engine_group: EventGroup::new(),
            rapl_group: EventGroup::new(),
            imc_group: EventGroup::new(),
            ts: CounterValue::default(),
            irq: Counter::with_config(CONFIG_INTERRUPTS),
            freq_req: Counter::with_config(CONFIG_REQUESTED_FREQUENCY),
            freq_act: Counter::with_config(CONFIG_ACTUAL_FREQUENCY),
            rc6: Counter::with_config(CONFIG_RC6_RESIDENCY),
            r_gpu: Counter::default(),
            r_pkg: Counter::default(),
            imc_reads: Counter::default(),
            imc_writes: Counter::default(),
            engines,
            class_view: None,
        };

        sampler.open_engine_group()?;
        sampler.open_rapl_group();
        sampler.open_imc_group();

        Ok(sampler)
    }

    /// PMU unit name the sampler is attached to
    pub fn device(&self) -> &str {
        &self.device
    }

    /// True when RAPL energy counters opened
    pub fn has_rapl(&self) -> bool {
        !self.rapl_group.is_empty()
    }

    /// True when IMC bandwidth counters opened
    pub fn has_imc(&self) -> bool {
        !self.imc_group.is_empty()
    }

    /// Wall-time delta of the last tick in seconds
    pub fn t(&self) -> f64 {
        self.ts.delta() as f64 / 1e9
    }

    fn open_engine_group(&mut self) -> Result<()> {
        let type_id = self.type_id;

        // The interrupt counter is the group leader: without it there is
        // nothing to attach the rest of the group to.
        self.irq.type_id = type_id;
        self.irq.idx = self
            .engine_group
            .open(type_id, self.irq.config, "interrupts")?;
        self.irq.present = true;

        for (counter, name) in [
            (&mut self.freq_req, "requested-frequency"),
            (&mut self.freq_act, "actual-frequency"),
            (&mut self.rc6, "rc6-residency"),
        ] {
            counter.type_id = type_id;
            match self.engine_group.open(type_id, counter.config, name) {
                Ok(idx) => {
                    counter.idx = idx;
                    counter.present = true;
                }
                Err(e) => warn!("{name} unavailable: {e}"),
            }
        }

        for engine in &mut self.engines {
            // The busy config came from discovery; wait and sema are read
            // from their sibling event files here.
            for (counter, kind) in [
                (&mut engine.busy, "busy"),
                (&mut engine.wait, "wait"),
                (&mut engine.sema, "sema"),
            ] {
                let event = format!("{}-{}", engine.name, kind);

                if kind != "busy" {
                    match pmu::event_config(&self.unit, &event) {
                        Ok(config) => counter.config = config,
                        Err(_) => continue,
                    }
                }

                counter.type_id = type_id;
                match self.engine_group.open(type_id, counter.config, &event) {
                    Ok(idx) => {
                        counter.idx = idx;
                        counter.present = true;
                        engine.num_counters += 1;
                    }
                    Err(e) => warn!("{event} unavailable: {e}"),
                }
            }
        }

        Ok(())
    }

    fn open_resolved(
        group: &mut EventGroup,
        counter: &mut Counter,
        attrs: EventAttrs,
        name: &str,
    ) {
        match group.open(attrs.type_id, attrs.config, name) {
            Ok(idx) => {
                counter.type_id = attrs.type_id;
                counter.config = attrs.config;
                counter.scale = attrs.scale;
                counter.unit = Some(attrs.unit);
                counter.idx = idx;
                counter.present = true;
            }
            Err(e) => warn!("{name} unavailable: {e}"),
        }
    }

    fn open_rapl_group(&mut self) {
        // Discrete cards report power through their own sensors, not the
        // CPU package RAPL domains.
        if self.discrete {
            return;
        }

        let unit = pmu::unit_dir(pmu::RAPL_UNIT);

        for (counter, name) in [
            (&mut self.r_gpu, "energy-gpu"),
            (&mut self.r_pkg, "energy-pkg"),
        ] {
            match pmu::resolve_event(&unit, name) {
                Ok(attrs) => {
                    if attrs.unit != RAPL_UNIT_NAME {
                        warn!(
                            "Unexpected units for RAPL {name}: found '{}', expected '{RAPL_UNIT_NAME}'",
                            attrs.unit
                        );
                    }
                    Self::open_resolved(&mut self.rapl_group, counter, attrs, name);
                }
                Err(e) => warn!("RAPL {name} unavailable: {e}"),
            }
        }
    }

    fn open_imc_group(&mut self) {
        let unit = pmu::unit_dir(pmu::IMC_UNIT);

        for (counter, name) in [
            (&mut self.imc_reads, "data_reads"),
            (&mut self.imc_writes, "data_writes"),
        ] {
            match pmu::resolve_event(&unit, name) {
                Ok(attrs) => Self::open_resolved(&mut self.imc_group, counter, attrs, name),
                Err(e) => warn!("IMC {name} unavailable: {e}"),
            }
        }
    }

    /// Take one sample: read every non-empty group and shift value pairs
    pub fn sample(&mut self) -> Result<()> {
        let (ts, values) = self.engine_group.read()?;
        self.ts.update(ts);

        self.freq_req.update_from(&values);
        self.freq_act.update_from(&values);
        self.irq.update_from(&values);
        self.rc6.update_from(&values);

        for engine in &mut self.engines {
            engine.busy.update_from(&values);
            engine.sema.update_from(&values);
            engine.wait.update_from(&values);
        }

        if !self.rapl_group.is_empty() {
            let (_, values) = self.rapl_group.read()?;
            self.r_gpu.update_from(&values);
            self.r_pkg.update_from(&values);
        }

        if !self.imc_group.is_empty() {
            let (_, values) = self.imc_group.read()?;
            self.imc_reads.update_from(&values);
            self.imc_writes.update_from(&values);
        }

        Ok(())
    }

    /// Reduce the current tick to the renderers' input model
    ///
    /// With `class_view` set, the lazily-built per-class table is refreshed
    /// and displayed; the instance table is never modified by the fold.
    pub fn view<'a>(
        &'a mut self,
        class_view: bool,
        codename: &'a str,
        card: &'a str,
    ) -> SampleView<'a> {
        let t = self.t();
        let has_imc = !self.imc_group.is_empty();

        let engines: &[Engine] = if class_view {
            let view = self
                .class_view
                .get_or_insert_with(|| ClassView::new(&self.engines));
            view.refresh(&self.engines);
            view.engines()
        } else {
            &self.engines
        };

        SampleView {
            t,
            codename,
            card,
            irq: &self.irq,
            freq_req: &self.freq_req,
            freq_act: &self.freq_act,
            rc6: &self.rc6,
            r_gpu: &self.r_gpu,
            r_pkg: &self.r_pkg,
            imc_reads: &self.imc_reads,
            imc_writes: &self.imc_writes,
            engines,
            has_imc,
        }
    }
}
