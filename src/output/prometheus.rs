//! Prometheus text exposition renderer
//!
//! One `# HELP`/`# TYPE`/value triplet per live counter. Metric names are
//! `intel_gpu_top_<group>_<item>` with both keys lower-cased and every
//! character outside `[a-z0-9]` replaced by an underscore. The renderer
//! performs no HTTP; an external front-end runs the binary per scrape.

use std::io::{self, Write};

use super::{Group, Item, Pass, Renderer};

/// Prefix of every emitted metric name
const METRIC_PREFIX: &str = "intel_gpu_top";

/// Flatten an arbitrary key into a metric-name fragment
pub fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Renderer producing one Prometheus exposition snapshot
pub struct PrometheusRenderer<W: Write> {
    out: W,
    level: usize,
}

impl<W: Write> PrometheusRenderer<W> {
    /// A Prometheus renderer writing to `out`
    pub fn new(out: W) -> Self {
        PrometheusRenderer { out, level: 0 }
    }

    /// Give back the underlying writer
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Renderer for PrometheusRenderer<W> {
    fn open_struct(&mut self, _name: Option<&str>) -> io::Result<()> {
        self.level += 1;
        Ok(())
    }

    fn close_struct(&mut self) -> io::Result<()> {
        self.level -= 1;
        if self.level == 0 {
            self.out.flush()?;
        }
        Ok(())
    }

    fn add_member(&mut self, group: &Group, item: &Item, _pass: Pass) -> io::Result<usize> {
        if !item.present {
            return Ok(0);
        }

        let name = format!(
            "{METRIC_PREFIX}_{}_{}",
            sanitize(&group.key),
            sanitize(item.key)
        );

        write!(self.out, "# HELP {name} {} {}", group.display_name, item.key)?;
        if !item.label.is_empty() {
            write!(self.out, " ({})", item.label)?;
        }
        writeln!(self.out)?;

        writeln!(self.out, "# TYPE {name} gauge")?;
        writeln!(self.out, "{name} {:.6}", item.value)?;

        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{counter, Fixture};
    use super::super::{build_report, render_sample};
    use super::*;

    fn render_once(fx: &Fixture) -> String {
        let report = build_report(&fx.view());
        let mut renderer = PrometheusRenderer::new(Vec::new());
        render_sample(&mut renderer, &report).unwrap();
        String::from_utf8(renderer.out).unwrap()
    }

    #[test]
    fn sanitizer_lowercases_and_collapses_punctuation() {
        assert_eq!(sanitize("Render/3D/0"), "render_3d_0");
        assert_eq!(sanitize("imc-bandwidth"), "imc_bandwidth");
        assert_eq!(sanitize("GPU"), "gpu");
        // Long keys keep their full length.
        assert_eq!(
            sanitize("a-very-long-item-key-indeed"),
            "a_very_long_item_key_indeed"
        );
    }

    #[test]
    fn every_metric_name_is_fully_sanitized() {
        let out = render_once(&Fixture::default());

        let mut metrics = 0;
        for line in out.lines().filter(|l| !l.starts_with('#')) {
            let name = line.split_whitespace().next().unwrap();
            metrics += 1;
            assert!(
                name.starts_with("intel_gpu_top_")
                    && name
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'),
                "unsanitized metric name: {name}"
            );
        }
        assert!(metrics > 0);
    }

    #[test]
    fn engine_metrics_carry_class_and_instance() {
        let out = render_once(&Fixture::default());
        assert!(out.contains("# TYPE intel_gpu_top_render_3d_0_busy gauge"));
        assert!(out.contains("intel_gpu_top_render_3d_0_busy 50.000000"));
    }

    #[test]
    fn help_lines_describe_group_and_item() {
        let out = render_once(&Fixture::default());
        assert!(out.contains("# HELP intel_gpu_top_frequency_requested Freq MHz requested (req)"));
    }

    #[test]
    fn absent_counters_emit_nothing() {
        let out = render_once(&Fixture::default());
        assert!(!out.contains("_power_"));

        let mut fx = Fixture::default();
        fx.r_gpu = counter(0, 5_000_000, 1e-6, None);
        fx.r_pkg = counter(0, 12_000_000, 1e-6, None);
        let out = render_once(&fx);
        assert!(out.contains("intel_gpu_top_power_gpu 5.000000"));
        assert!(out.contains("intel_gpu_top_power_package 12.000000"));
    }

    #[test]
    fn snapshot_is_deterministic() {
        let fx = Fixture::default();
        assert_eq!(render_once(&fx), render_once(&fx));
    }
}
