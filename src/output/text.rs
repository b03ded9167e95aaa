//! Plain-text column renderer
//!
//! One line per sample, every item in a fixed-width column, suitable for
//! grep/awk pipelines. Two header rows (group names, then unit labels)
//! are woven in every twenty lines so scrolling output stays legible.

use std::io::{self, Write};

use super::{Group, Item, Pass, Renderer};

/// Lines between repeated header rows
const HEADER_REPEAT: usize = 20;

/// Renderer producing fixed-column text
pub struct TextRenderer<W: Write> {
    out: W,
    level: usize,
    lines: usize,
}

impl<W: Write> TextRenderer<W> {
    /// A column renderer writing to `out`
    pub fn new(out: W) -> Self {
        TextRenderer {
            out,
            level: 0,
            lines: 0,
        }
    }

    /// Give back the underlying writer
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Renderer for TextRenderer<W> {
    fn passes(&mut self) -> Vec<Pass> {
        if self.lines % HEADER_REPEAT == 0 {
            vec![Pass::GroupNames, Pass::Units, Pass::Data]
        } else {
            vec![Pass::Data]
        }
    }

    fn open_struct(&mut self, _name: Option<&str>) -> io::Result<()> {
        self.level += 1;
        Ok(())
    }

    fn close_struct(&mut self) -> io::Result<()> {
        self.level -= 1;
        if self.level == 0 {
            writeln!(self.out)?;
            self.out.flush()?;
            self.lines += 1;
        }
        Ok(())
    }

    fn add_member(&mut self, _group: &Group, item: &Item, pass: Pass) -> io::Result<usize> {
        if !item.present {
            return Ok(0);
        }

        match pass {
            Pass::Units => {
                write!(self.out, "{:>w$} ", item.label, w = item.field_width())?;
                Ok(0)
            }
            Pass::Data => {
                let buf = item.formatted();
                write!(self.out, "{buf} ")?;
                Ok(buf.len() + 1)
            }
            // Group names are a group-level concern.
            Pass::GroupNames => Ok(0),
        }
    }

    fn print_group(&mut self, group: &Group, pass: Pass) -> io::Result<bool> {
        if !group.has_present() {
            return Ok(false);
        }

        self.open_struct(Some(&group.key))?;

        let mut consumed = 0;
        if pass == Pass::GroupNames {
            write!(
                self.out,
                "{:>w$} ",
                group.display_name,
                w = group.header_width().saturating_sub(1)
            )?;
        } else {
            for item in &group.items {
                consumed += self.add_member(group, item, pass)?;
            }
        }

        self.close_struct()?;

        Ok(consumed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{counter, Fixture};
    use super::super::{build_report, render_sample};
    use super::*;

    fn lines_of(fx: &Fixture, samples: usize) -> Vec<String> {
        let report = build_report(&fx.view());
        let mut renderer = TextRenderer::new(Vec::new());
        for _ in 0..samples {
            render_sample(&mut renderer, &report).unwrap();
        }
        String::from_utf8(renderer.out)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn first_sample_prints_both_header_rows_then_data() {
        let lines = lines_of(&Fixture::default(), 1);
        assert_eq!(lines.len(), 3);

        assert!(lines[0].contains("Freq MHz"));
        assert!(lines[0].contains("RCS/0"));
        assert!(lines[1].contains("req"));
        assert!(lines[1].contains("act"));
        assert!(lines[2].contains("50.00"));
    }

    #[test]
    fn priming_scenario_reports_fifty_percent_busy() {
        // One render engine: ts 0 -> 1e9, busy 0 -> 5e8.
        let lines = lines_of(&Fixture::default(), 1);
        let data = lines.last().unwrap();
        assert!(data.contains(" 50.00"), "row: {data:?}");
    }

    #[test]
    fn clamped_counter_prints_one_hundred() {
        let mut fx = Fixture::default();
        fx.engines[0].busy = counter(0, 1_100_000_000, 1.0, None);
        let lines = lines_of(&fx, 1);
        assert!(lines.last().unwrap().contains("100.00"));
    }

    #[test]
    fn headers_repeat_every_twenty_lines() {
        let lines = lines_of(&Fixture::default(), 36);
        // Rows 0..1 headers, 2..19 data, 20..21 headers again.
        assert!(lines[0].contains("Freq MHz"));
        assert!(lines[2].contains("50.00"));
        assert!(lines[19].contains("50.00"));
        assert!(lines[20].contains("Freq MHz"));
        assert!(lines[21].contains("req"));
        assert!(lines[22].contains("50.00"));
    }

    #[test]
    fn absent_power_group_leaves_no_hole_in_the_columns() {
        let with_power = {
            let mut fx = Fixture::default();
            fx.r_gpu = counter(0, 5_000_000, 1.0, None);
            fx.r_pkg = counter(0, 12_000_000, 1.0, None);
            lines_of(&fx, 1)
        };
        let without_power = lines_of(&Fixture::default(), 1);

        // Headers list the power group only when its counters opened.
        assert!(with_power[0].contains("Power W"));
        assert!(!without_power[0].contains("Power W"));

        // Columns before and after stay identical in both cases.
        assert!(without_power[1].contains("req"));
        assert!(without_power[2].contains("50.00"));
    }

    #[test]
    fn output_is_deterministic() {
        let fx = Fixture::default();
        let a = lines_of(&fx, 2);
        let b = lines_of(&fx, 2);
        assert_eq!(a, b);
    }
}
