//! Per-sample data model and the renderer surface
//!
//! Every tick is reduced to one [`Report`]: an ordered list of counter
//! groups, each holding ordered items with their display geometry and the
//! already-computed rate. All four renderers walk the same report in the
//! same order; only formatting differs.

pub mod json;
pub mod prometheus;
pub mod term;
pub mod text;

use std::io;

use crate::counter::{rate, Counter};
use crate::engine::Engine;

/// Which row of a columned output is being produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Group display names
    GroupNames,
    /// Per-item unit labels
    Units,
    /// Counter values
    Data,
}

/// One metric within a group, ready to print
#[derive(Debug, Clone)]
pub struct Item {
    /// Member name, e.g. `busy` or `requested`
    pub key: &'static str,
    /// Short column label, e.g. `req` or `rd`
    pub label: String,
    /// Minimum printed width of the integer part
    pub width: usize,
    /// Fractional digits
    pub precision: usize,
    /// Whether the backing counter opened
    pub present: bool,
    /// Computed rate for this tick
    pub value: f64,
}

impl Item {
    fn new(
        key: &'static str,
        label: &str,
        width: usize,
        precision: usize,
        counter: &Counter,
        d: f64,
        t: f64,
        s: f64,
    ) -> Self {
        Item {
            key,
            label: label.to_string(),
            width,
            precision,
            present: counter.present,
            value: rate(&counter.val, d, t, s),
        }
    }

    /// Total column width including the decimal point
    pub fn field_width(&self) -> usize {
        self.width + usize::from(self.precision > 0)
    }

    /// The value formatted into its column, X-filled when it cannot fit
    pub fn formatted(&self) -> String {
        let w = self.field_width();
        let s = format!("{:>w$.p$}", self.value, w = w, p = self.precision);
        if s.len() > w {
            "X".repeat(w)
        } else {
            s
        }
    }

    /// Dash fill for an absent counter's column
    pub fn dashes(&self) -> String {
        "-".repeat(self.field_width())
    }
}

/// An ordered group of items sharing one label
#[derive(Debug, Clone)]
pub struct Group {
    /// Member key, e.g. `frequency` or `Render/3D/0`
    pub key: String,
    /// Column/HELP label, e.g. `Freq MHz` or `RCS/0`
    pub display_name: String,
    /// Unit of the group as a whole, emitted as a trailing JSON member
    pub unit: Option<String>,
    /// Ordered items
    pub items: Vec<Item>,
}

impl Group {
    /// True when at least one item has a live counter behind it
    pub fn has_present(&self) -> bool {
        self.items.iter().any(|i| i.present)
    }

    /// Total column width of the group in text output
    pub fn header_width(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.present)
            .map(|i| 1 + i.field_width())
            .sum()
    }
}

/// Everything the report builder needs from one tick
pub struct SampleView<'a> {
    /// Wall-time delta in seconds
    pub t: f64,
    /// Card marketing name
    pub codename: &'a str,
    /// DRM card id
    pub card: &'a str,
    /// Interrupt counter
    pub irq: &'a Counter,
    /// Requested frequency counter
    pub freq_req: &'a Counter,
    /// Actual frequency counter
    pub freq_act: &'a Counter,
    /// RC6 residency counter
    pub rc6: &'a Counter,
    /// GPU energy counter
    pub r_gpu: &'a Counter,
    /// Package energy counter
    pub r_pkg: &'a Counter,
    /// IMC read bandwidth counter
    pub imc_reads: &'a Counter,
    /// IMC write bandwidth counter
    pub imc_writes: &'a Counter,
    /// Engine table to display (instance or class view)
    pub engines: &'a [Engine],
    /// Whether the IMC group opened
    pub has_imc: bool,
}

/// One tick reduced to renderer-ready groups
#[derive(Debug, Clone)]
pub struct Report {
    /// Sample period group (JSON stream only)
    pub period: Group,
    /// Frequency, interrupts, RC6 and power groups, in emission order
    pub headline: Vec<Group>,
    /// Memory-controller bandwidth, when the counters exist
    pub imc: Option<Group>,
    /// One group per displayed engine
    pub engines: Vec<Group>,
    /// Card marketing name, for the interactive summary
    pub codename: String,
    /// DRM card id, for the interactive summary
    pub card: String,
}

/// Fold a tick into the fixed metric display table
pub fn build_report(view: &SampleView<'_>) -> Report {
    let t = view.t;

    let period_item = Item {
        key: "duration",
        label: String::new(),
        width: 0,
        precision: 0,
        present: true,
        value: t * 1e3,
    };
    let period = Group {
        key: "period".to_string(),
        display_name: String::new(),
        unit: Some("ms".to_string()),
        items: vec![period_item],
    };

    let frequency = Group {
        key: "frequency".to_string(),
        display_name: "Freq MHz".to_string(),
        unit: Some("MHz".to_string()),
        items: vec![
            Item::new("requested", "req", 4, 0, view.freq_req, 1.0, t, 1.0),
            Item::new("actual", "act", 4, 0, view.freq_act, 1.0, t, 1.0),
        ],
    };

    let interrupts = Group {
        key: "interrupts".to_string(),
        display_name: "IRQ".to_string(),
        unit: Some("irq/s".to_string()),
        items: vec![Item::new("count", "/s", 8, 0, view.irq, 1.0, t, 1.0)],
    };

    let rc6 = Group {
        key: "rc6".to_string(),
        display_name: "RC6".to_string(),
        unit: Some("%".to_string()),
        items: vec![Item::new("value", "%", 3, 0, view.rc6, 1e9, t, 100.0)],
    };

    let power = Group {
        key: "power".to_string(),
        display_name: "Power W".to_string(),
        unit: Some("W".to_string()),
        items: vec![
            Item::new("GPU", "gpu", 4, 2, view.r_gpu, 1.0, t, view.r_gpu.scale),
            Item::new("Package", "pkg", 4, 2, view.r_pkg, 1.0, t, view.r_pkg.scale),
        ],
    };

    let imc = view.has_imc.then(|| {
        let unit = view
            .imc_reads
            .unit
            .as_deref()
            .or(view.imc_writes.unit.as_deref())
            .unwrap_or("MiB");

        Group {
            key: "imc-bandwidth".to_string(),
            display_name: format!("IMC {unit}/s"),
            unit: Some(format!("{unit}/s")),
            items: vec![
                Item::new("reads", "rd", 6, 0, view.imc_reads, 1.0, t, view.imc_reads.scale),
                Item::new("writes", "wr", 6, 0, view.imc_writes, 1.0, t, view.imc_writes.scale),
            ],
        }
    });

    let engines = view
        .engines
        .iter()
        .filter(|e| e.num_counters > 0)
        .map(|e| Group {
            key: e.display_name.clone(),
            display_name: e.short_name.clone(),
            unit: Some("%".to_string()),
            items: vec![
                Item::new("busy", "%", 6, 2, &e.busy, 1e9, t, 100.0),
                Item::new("sema", "se", 3, 0, &e.sema, 1e9, t, 100.0),
                Item::new("wait", "wa", 3, 0, &e.wait, 1e9, t, 100.0),
            ],
        })
        .collect();

    Report {
        period,
        headline: vec![frequency, interrupts, rc6, power],
        imc,
        engines,
        codename: view.codename.to_string(),
        card: view.card.to_string(),
    }
}

/// The renderer surface every output mode implements
///
/// A report is emitted as a nested structure walk: an anonymous top-level
/// struct, one struct per group, one member per item, with the engine
/// groups wrapped in an `engines` struct. Renderer state is explicit;
/// nothing here is process-global.
pub trait Renderer {
    /// Row passes due for this sample, in emission order
    fn passes(&mut self) -> Vec<Pass> {
        vec![Pass::Data]
    }

    /// Whether the `period` group belongs in the output
    fn wants_period(&self) -> bool {
        false
    }

    /// Adopt this tick's terminal geometry and view mode
    fn begin_frame(&mut self, _width: usize, _height: usize, _class_view: bool) {}

    /// Begin a struct; `None` is the anonymous per-sample root
    fn open_struct(&mut self, name: Option<&str>) -> io::Result<()>;

    /// End the innermost struct
    fn close_struct(&mut self) -> io::Result<()>;

    /// Emit one item; returns how much output it produced
    fn add_member(&mut self, group: &Group, item: &Item, pass: Pass) -> io::Result<usize>;

    /// Emit one group; default skips groups with no live counters
    fn print_group(&mut self, group: &Group, pass: Pass) -> io::Result<bool> {
        if !group.has_present() {
            return Ok(false);
        }

        self.open_struct(Some(&group.key))?;
        let mut consumed = 0;
        for item in &group.items {
            consumed += self.add_member(group, item, pass)?;
        }
        self.close_struct()?;

        Ok(consumed > 0)
    }
}

/// Emit one report through a renderer
pub fn render_sample(renderer: &mut dyn Renderer, report: &Report) -> io::Result<()> {
    for pass in renderer.passes() {
        renderer.open_struct(None)?;

        if renderer.wants_period() {
            renderer.print_group(&report.period, pass)?;
        }
        for group in &report.headline {
            renderer.print_group(group, pass)?;
        }
        if let Some(imc) = &report.imc {
            renderer.print_group(imc, pass)?;
        }

        renderer.open_struct(Some("engines"))?;
        for group in &report.engines {
            renderer.print_group(group, pass)?;
        }
        renderer.close_struct()?;

        renderer.close_struct()?;
    }

    Ok(())
}
