//! Interactive terminal renderer
//!
//! Repaints the whole screen every tick: an ANSI home/erase, a one-line
//! device summary, optional IMC bandwidth lines, an inverse-video engine
//! table header and one row per engine with a 1/8-block utilisation bar
//! scaled to the terminal width. Output past the reported terminal height
//! is clipped.

use std::io::{self, Write};

use super::{Group, Item, Pass, Renderer};

/// ANSI home + erase-display
const CLEAR: &str = "\x1b[H\x1b[J";

/// Eighth-block fill glyphs; index is eighths filled
const BARS: [&str; 9] = [" ", "\u{258f}", "\u{258e}", "\u{258d}", "\u{258c}", "\u{258b}", "\u{258a}", "\u{2589}", "\u{2588}"];

/// Draw a `|`-delimited utilisation bar of exactly `max_len` cells
fn percentage_bar(out: &mut impl Write, percent: f64, max_len: usize) -> io::Result<()> {
    if max_len < 2 {
        return Ok(());
    }

    let cells = max_len - 2;
    let mut bar_len = (percent * (8 * cells) as f64 / 100.0) as usize;
    if bar_len > 8 * cells {
        bar_len = 8 * cells;
    }

    write!(out, "|")?;

    let mut i = bar_len;
    while i >= 8 {
        write!(out, "{}", BARS[8])?;
        i -= 8;
    }
    if i > 0 {
        write!(out, "{}", BARS[i])?;
    }

    for _ in 0..cells.saturating_sub(bar_len.div_ceil(8)) {
        write!(out, " ")?;
    }

    write!(out, "|")
}

#[derive(Default)]
struct SummaryBufs {
    freq_req: String,
    freq_act: String,
    rc6: String,
    irq: String,
    power: Option<(String, String)>,
}

/// Renderer painting the interactive dashboard
pub struct TermRenderer<W: Write> {
    out: W,
    codename: String,
    card: String,

    // Refreshed by begin_frame each tick.
    width: usize,
    height: usize,
    class_view: bool,

    // Per-frame state.
    lines: usize,
    level: usize,
    in_engines: bool,
    engines_header_done: bool,
    summary_done: bool,
    summary: SummaryBufs,
    row: Vec<String>,
}

impl<W: Write> TermRenderer<W> {
    /// A dashboard renderer writing to `out`
    pub fn new(out: W, codename: &str, card: &str) -> Self {
        TermRenderer {
            out,
            codename: codename.to_string(),
            card: card.to_string(),
            width: 80,
            height: 24,
            class_view: false,
            lines: 0,
            level: 0,
            in_engines: false,
            engines_header_done: false,
            summary_done: false,
            summary: SummaryBufs::default(),
            row: Vec::new(),
        }
    }

    fn fits(&self) -> bool {
        self.lines < self.height
    }

    fn ensure_summary(&mut self) -> io::Result<()> {
        if self.summary_done {
            return Ok(());
        }
        self.summary_done = true;

        write!(self.out, "{CLEAR}")?;

        if self.fits() {
            write!(
                self.out,
                "intel-gpu-top: {} @ {} - ",
                self.codename, self.card
            )?;
            write!(
                self.out,
                "{}/{} MHz;  {}% RC6; ",
                self.summary.freq_act, self.summary.freq_req, self.summary.rc6
            )?;
            if let Some((gpu, pkg)) = &self.summary.power {
                write!(self.out, "{gpu}/{pkg} W; ")?;
            }
            writeln!(self.out, "{} irqs/s", self.summary.irq)?;
            self.lines += 1;
        }

        if self.fits() {
            writeln!(self.out)?;
            self.lines += 1;
        }

        Ok(())
    }

    fn print_imc(&mut self, group: &Group) -> io::Result<()> {
        self.ensure_summary()?;

        let unit = group.unit.as_deref().unwrap_or("");

        if self.fits() {
            writeln!(self.out, "      IMC reads:   {} {}", self.row[0], unit)?;
            self.lines += 1;
        }
        if self.fits() {
            writeln!(self.out, "     IMC writes:   {} {}", self.row[1], unit)?;
            self.lines += 1;
        }
        if self.fits() {
            writeln!(self.out)?;
            self.lines += 1;
        }

        Ok(())
    }

    fn print_engines_header(&mut self) -> io::Result<()> {
        if self.engines_header_done || !self.fits() {
            return Ok(());
        }
        self.engines_header_done = true;

        let left = if self.class_view {
            "         ENGINES     BUSY  "
        } else {
            "          ENGINE     BUSY  "
        };
        let right = " MI_SEMA MI_WAIT";
        let pad = self
            .width
            .saturating_sub(1 + left.len() + right.len())
            .max(1);

        writeln!(self.out, "\x1b[7m{left}{:pad$}{right}\x1b[0m", " ")?;
        self.lines += 1;

        Ok(())
    }

    fn print_engine(&mut self, group: &Group) -> io::Result<()> {
        self.print_engines_header()?;

        if !self.fits() {
            return Ok(());
        }

        let tail = format!("    {}%    {}%", self.row[1], self.row[2]);
        let head = format!("{:>16} {}% ", group.key, self.row[0]);

        write!(self.out, "{head}")?;
        let max_w = self.width.saturating_sub(1);
        percentage_bar(
            &mut self.out,
            group.items[0].value,
            max_w.saturating_sub(head.len() + tail.len()),
        )?;
        writeln!(self.out, "{tail}")?;
        self.lines += 1;

        Ok(())
    }
}

impl<W: Write> Renderer for TermRenderer<W> {
    fn begin_frame(&mut self, width: usize, height: usize, class_view: bool) {
        self.width = width;
        self.height = height;
        self.class_view = class_view;
    }

    fn open_struct(&mut self, name: Option<&str>) -> io::Result<()> {
        self.level += 1;

        match name {
            None => {
                self.lines = 0;
                self.in_engines = false;
                self.engines_header_done = false;
                self.summary_done = false;
                self.summary = SummaryBufs::default();
            }
            Some("engines") => {
                self.ensure_summary()?;
                self.in_engines = true;
            }
            Some(_) => {}
        }

        Ok(())
    }

    fn close_struct(&mut self) -> io::Result<()> {
        self.level -= 1;

        if self.in_engines && self.level == 1 {
            self.in_engines = false;
            if self.fits() {
                writeln!(self.out)?;
                self.lines += 1;
            }
        }

        if self.level == 0 {
            // A frame with no engine rows still needs its summary painted.
            self.ensure_summary()?;
            self.out.flush()?;
        }

        Ok(())
    }

    fn add_member(&mut self, _group: &Group, item: &Item, _pass: Pass) -> io::Result<usize> {
        let buf = if item.present {
            item.formatted()
        } else {
            item.dashes()
        };
        self.row.push(buf);
        Ok(1)
    }

    fn print_group(&mut self, group: &Group, pass: Pass) -> io::Result<bool> {
        self.row.clear();
        for item in &group.items {
            self.add_member(group, item, pass)?;
        }

        if self.in_engines {
            self.print_engine(group)?;
            return Ok(true);
        }

        match group.key.as_str() {
            "frequency" => {
                self.summary.freq_req = self.row[0].clone();
                self.summary.freq_act = self.row[1].clone();
            }
            "interrupts" => self.summary.irq = self.row[0].clone(),
            "rc6" => self.summary.rc6 = self.row[0].clone(),
            "power" => {
                self.summary.power = group.items[0]
                    .present
                    .then(|| (self.row[0].clone(), self.row[1].clone()));
            }
            "imc-bandwidth" => self.print_imc(group)?,
            _ => {}
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{counter, Fixture};
    use super::super::{build_report, render_sample};
    use super::*;

    fn render_frame(fx: &Fixture, width: usize, height: usize, class_view: bool) -> String {
        let report = build_report(&fx.view());

        let mut renderer = TermRenderer::new(Vec::new(), "Intel UHD Graphics 620", "card0");
        renderer.begin_frame(width, height, class_view);
        render_sample(&mut renderer, &report).unwrap();
        String::from_utf8(renderer.out).unwrap()
    }

    #[test]
    fn frame_starts_with_home_and_erase() {
        let out = render_frame(&Fixture::default(), 80, 24, false);
        assert!(out.starts_with("\x1b[H\x1b[J"));
    }

    #[test]
    fn summary_line_reports_frequency_rc6_and_irqs() {
        let out = render_frame(&Fixture::default(), 80, 24, false);
        let summary = out.lines().next().unwrap();

        assert!(summary.contains("intel-gpu-top: Intel UHD Graphics 620 @ card0"));
        assert!(summary.contains(" 750/ 800 MHz"));
        assert!(summary.contains(" 25% RC6"));
        assert!(summary.contains("120 irqs/s"));
        // RAPL denied: the power clause is simply absent.
        assert!(!summary.contains(" W; "));
    }

    #[test]
    fn summary_includes_power_when_rapl_opened() {
        let mut fx = Fixture::default();
        fx.r_gpu = counter(0, 5_000_000, 1e-6, None);
        fx.r_pkg = counter(0, 12_000_000, 1e-6, None);

        let out = render_frame(&fx, 80, 24, false);
        assert!(out.lines().next().unwrap().contains("5.00/12.00 W; "));
    }

    #[test]
    fn engine_rows_carry_name_busy_and_bar() {
        let out = render_frame(&Fixture::default(), 80, 24, false);

        assert!(out.contains("ENGINE     BUSY"));
        let row = out
            .lines()
            .find(|l| l.contains("Render/3D/0"))
            .expect("engine row");
        assert!(row.contains("  50.00% "));
        assert!(row.contains('|'));
        assert!(row.ends_with("%"));
    }

    #[test]
    fn class_view_header_says_engines() {
        let out = render_frame(&Fixture::default(), 80, 24, true);
        assert!(out.contains("ENGINES     BUSY"));
    }

    #[test]
    fn rows_are_clipped_to_terminal_height() {
        // Height 2 leaves room for the summary and its blank line only.
        let out = render_frame(&Fixture::default(), 80, 2, false);
        assert!(!out.contains("Render/3D/0"));
    }

    #[test]
    fn bar_fill_scales_with_percent() {
        let mut full = Vec::new();
        percentage_bar(&mut full, 100.0, 12).unwrap();
        let full = String::from_utf8(full).unwrap();
        assert_eq!(full.chars().count(), 12);
        assert_eq!(full.matches('\u{2588}').count(), 10);

        let mut half = Vec::new();
        percentage_bar(&mut half, 50.0, 12).unwrap();
        let half = String::from_utf8(half).unwrap();
        assert_eq!(half.chars().count(), 12);
        assert_eq!(half.matches('\u{2588}').count(), 5);

        let mut empty = Vec::new();
        percentage_bar(&mut empty, 0.0, 12).unwrap();
        let empty = String::from_utf8(empty).unwrap();
        assert_eq!(empty, "|          |");
    }

    #[test]
    fn frames_are_deterministic() {
        let fx = Fixture::default();
        assert_eq!(
            render_frame(&fx, 80, 24, false),
            render_frame(&fx, 80, 24, false)
        );
    }
}
