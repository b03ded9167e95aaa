//! Streaming JSON renderer
//!
//! Emits each sample as one tab-indented JSON object. The stream is a
//! concatenation of whole objects separated by a comma-newline, so piping
//! through `jq -s` or wrapping in `[...]` yields a valid array. Members
//! are written as they are computed; nothing is buffered.

use std::io::{self, Write};

use super::{Group, Item, Pass, Renderer};

const INDENT: &str = "\t";

/// Renderer producing the JSON object stream
pub struct JsonRenderer<W: Write> {
    out: W,
    indent: usize,
    // One member count per open level; slot 0 counts emitted samples.
    members: Vec<usize>,
}

impl<W: Write> JsonRenderer<W> {
    /// A JSON renderer writing to `out`
    pub fn new(out: W) -> Self {
        JsonRenderer {
            out,
            indent: 0,
            members: vec![0],
        }
    }

    /// Give back the underlying writer
    pub fn into_inner(self) -> W {
        self.out
    }

    fn tabs(&self) -> String {
        INDENT.repeat(self.indent)
    }

    fn member_prefix(&mut self) -> &'static str {
        let count = self.members.last_mut().expect("open level");
        let first = *count == 0;
        *count += 1;
        if first {
            ""
        } else {
            ",\n"
        }
    }
}

impl<W: Write> Renderer for JsonRenderer<W> {
    fn wants_period(&self) -> bool {
        true
    }

    fn open_struct(&mut self, name: Option<&str>) -> io::Result<()> {
        let tabs = self.tabs();

        match name {
            Some(name) => {
                let prefix = self.member_prefix();
                write!(self.out, "{prefix}{tabs}\"{name}\": {{\n")?;
            }
            None => {
                let first = *self.members.first().expect("stream level") == 0;
                *self.members.first_mut().expect("stream level") += 1;
                let comma = if first { "" } else { "," };
                write!(self.out, "{comma}\n{tabs}{{\n")?;
            }
        }

        self.indent += 1;
        self.members.push(0);

        Ok(())
    }

    fn close_struct(&mut self) -> io::Result<()> {
        self.members.pop();
        self.indent -= 1;

        let tabs = self.tabs();
        write!(self.out, "\n{tabs}}}")?;

        if self.indent == 0 {
            self.out.flush()?;
        }

        Ok(())
    }

    fn add_member(&mut self, _group: &Group, item: &Item, _pass: Pass) -> io::Result<usize> {
        let tabs = self.tabs();
        let prefix = self.member_prefix();
        write!(
            self.out,
            "{prefix}{tabs}\"{}\": {:.6}",
            item.key, item.value
        )?;

        Ok(1)
    }

    fn print_group(&mut self, group: &Group, pass: Pass) -> io::Result<bool> {
        if !group.has_present() {
            return Ok(false);
        }

        self.open_struct(Some(&group.key))?;

        for item in &group.items {
            self.add_member(group, item, pass)?;
        }

        if let Some(unit) = &group.unit {
            let tabs = self.tabs();
            let prefix = self.member_prefix();
            write!(self.out, "{prefix}{tabs}\"unit\": \"{unit}\"")?;
        }

        self.close_struct()?;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Fixture;
    use super::super::{build_report, render_sample};
    use super::*;

    fn render_once(fx: &Fixture) -> String {
        let report = build_report(&fx.view());
        let mut renderer = JsonRenderer::new(Vec::new());
        render_sample(&mut renderer, &report).unwrap();
        String::from_utf8(renderer.out).unwrap()
    }

    #[test]
    fn one_sample_is_a_complete_tab_indented_object() {
        let out = render_once(&Fixture::default());

        let expected = "\n{\n\
            \t\"period\": {\n\t\t\"duration\": 1000.000000,\n\t\t\"unit\": \"ms\"\n\t},\n\
            \t\"frequency\": {\n\t\t\"requested\": 800.000000,\n\t\t\"actual\": 750.000000,\n\t\t\"unit\": \"MHz\"\n\t},\n\
            \t\"interrupts\": {\n\t\t\"count\": 120.000000,\n\t\t\"unit\": \"irq/s\"\n\t},\n\
            \t\"rc6\": {\n\t\t\"value\": 25.000000,\n\t\t\"unit\": \"%\"\n\t},\n\
            \t\"engines\": {\n\
            \t\t\"Render/3D/0\": {\n\t\t\t\"busy\": 50.000000,\n\t\t\t\"sema\": 0.000000,\n\t\t\t\"wait\": 0.000000,\n\t\t\t\"unit\": \"%\"\n\t\t}\n\
            \t}\n}";
        assert_eq!(out, expected);
    }

    #[test]
    fn samples_are_separated_by_a_comma() {
        let fx = Fixture::default();
        let report = build_report(&fx.view());
        let mut renderer = JsonRenderer::new(Vec::new());
        render_sample(&mut renderer, &report).unwrap();
        render_sample(&mut renderer, &report).unwrap();

        let out = String::from_utf8(renderer.out).unwrap();
        assert_eq!(out.matches("\"period\"").count(), 2);
        assert!(out.contains("},\n{\n"), "missing sample separator: {out:?}");
    }

    #[test]
    fn output_is_deterministic() {
        let fx = Fixture::default();
        assert_eq!(render_once(&fx), render_once(&fx));
    }

    #[test]
    fn absent_groups_vanish_without_shifting_structure() {
        let out = render_once(&Fixture::default());
        // RAPL never opened, so no power group appears.
        assert!(!out.contains("\"power\""));
        assert!(out.contains("\"rc6\""));
    }
}
