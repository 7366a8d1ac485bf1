//! Report presentation.
//!
//! Renders a [`VerificationReport`] as coloured console text or as JSON.
//! Output goes through [`termcolor::WriteColor`], so tests can render into
//! a [`termcolor::Buffer`] and colours are simply switched off when the
//! terminal doesn't want them.

use std::io;

use difference::{Changeset, Difference};
use serde::Serialize;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::errors::VerifyError;
use crate::matcher::{Mismatch, Status};
use crate::orchestrator::{ReportEntry, VerificationReport};

/// How reports are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportConfig {
    pub use_colors: bool,
    /// Also list passing snippets and skip notes.
    pub verbose: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            use_colors: atty::is(atty::Stream::Stdout),
            verbose: false,
        }
    }
}

impl ReportConfig {
    pub fn color_choice(&self) -> ColorChoice {
        if self.use_colors {
            ColorChoice::Auto
        } else {
            ColorChoice::Never
        }
    }
}

fn status_color(status: &Status) -> Color {
    match status {
        Status::Pass => Color::Green,
        Status::Fail | Status::InternalError => Color::Red,
        Status::Skipped(_) => Color::Yellow,
        Status::Timeout => Color::Magenta,
    }
}

fn colored<W: WriteColor>(out: &mut W, color: Color, text: &str) -> io::Result<()> {
    out.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(true))?;
    write!(out, "{}", text)?;
    out.reset()
}

// =============================================================================
// TEXT RENDERING
// =============================================================================

fn location(entry: &ReportEntry) -> String {
    match (&entry.heading, entry.line) {
        (Some(heading), Some(line)) => format!(" [{}, line {}]", heading, line),
        (Some(heading), None) => format!(" [{}]", heading),
        (None, Some(line)) => format!(" [line {}]", line),
        (None, None) => String::new(),
    }
}

/// Writes one entry. Passing entries are only shown when verbose.
pub fn write_entry<W: WriteColor>(
    out: &mut W,
    entry: &ReportEntry,
    config: &ReportConfig,
) -> io::Result<()> {
    let noteworthy = entry.status.is_failure();
    if !noteworthy && !config.verbose {
        return Ok(());
    }
    colored(out, status_color(&entry.status), entry.status.label())?;
    write!(out, ": snippet {}{}", entry.snippet_id, location(entry))?;
    if let Status::Skipped(reason) = entry.status {
        write!(out, " ({})", reason)?;
    }
    writeln!(out)?;
    if let Some(mismatch) = &entry.mismatch {
        write_mismatch(out, mismatch)?;
    } else if let Some(diff) = &entry.diff {
        for line in diff.lines() {
            writeln!(out, "  {}", line)?;
        }
    }
    Ok(())
}

/// Shows the first differing line with a word-level diff.
fn write_mismatch<W: WriteColor>(out: &mut W, mismatch: &Mismatch) -> io::Result<()> {
    writeln!(out, "  output line {} differs", mismatch.index + 1)?;
    match (&mismatch.expected, &mismatch.actual) {
        (Some(expected), Some(actual)) => {
            write!(out, "  - expected: ")?;
            colored(out, Color::Green, expected)?;
            write!(out, "\n  + actual:   ")?;
            colored(out, Color::Red, actual)?;
            write!(out, "\n    ")?;
            let changeset = Changeset::new(expected, actual, " ");
            for diff in &changeset.diffs {
                match diff {
                    Difference::Same(text) => write!(out, "{} ", text)?,
                    Difference::Add(text) => {
                        colored(out, Color::Red, &format!("+{}", text))?;
                        write!(out, " ")?;
                    }
                    Difference::Rem(text) => {
                        colored(out, Color::Green, &format!("-{}", text))?;
                        write!(out, " ")?;
                    }
                }
            }
            writeln!(out)
        }
        (Some(expected), None) => {
            write!(out, "  - expected: ")?;
            colored(out, Color::Green, expected)?;
            writeln!(out, "\n  + actual:   (no output)")
        }
        (None, Some(actual)) => {
            write!(out, "  - expected: (no more output)\n  + actual:   ")?;
            colored(out, Color::Red, actual)?;
            writeln!(out)
        }
        (None, None) => Ok(()),
    }
}

/// Writes every entry, then the summary line and the failed list.
pub fn write_report<W: WriteColor>(
    out: &mut W,
    title: Option<&str>,
    report: &VerificationReport,
    config: &ReportConfig,
) -> io::Result<()> {
    if let Some(title) = title {
        out.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)).set_bold(true))?;
        writeln!(out, "== {} ==", title)?;
        out.reset()?;
    }
    for entry in &report.entries {
        write_entry(out, entry, config)?;
    }

    let summary = &report.summary;
    write!(out, "\nSummary: total {}, ", summary.total())?;
    colored(out, Color::Green, "passed")?;
    write!(out, " {}, ", summary.pass)?;
    colored(out, Color::Red, "failed")?;
    write!(out, " {}, ", summary.fail)?;
    colored(out, Color::Yellow, "skipped")?;
    write!(out, " {}, ", summary.skipped)?;
    colored(out, Color::Magenta, "timed out")?;
    write!(out, " {}", summary.timeout)?;
    if summary.internal_error > 0 {
        write!(out, ", ")?;
        colored(out, Color::Red, "internal errors")?;
        write!(out, " {}", summary.internal_error)?;
    }
    writeln!(out)?;

    let failed: Vec<&ReportEntry> = report
        .entries
        .iter()
        .filter(|entry| entry.status.is_failure())
        .collect();
    if !failed.is_empty() {
        writeln!(out, "\nFailed snippets:")?;
        for entry in failed {
            writeln!(
                out,
                "  - {} {}{}",
                entry.status.label(),
                entry.snippet_id,
                location(entry)
            )?;
        }
    }
    Ok(())
}

/// Prints a report to stdout.
pub fn print_report(title: Option<&str>, report: &VerificationReport, config: &ReportConfig) {
    let mut stdout = StandardStream::stdout(config.color_choice());
    // A closed stdout is not worth failing the run over.
    let _ = write_report(&mut stdout, title, report, config);
}

/// Renders a report into a plain string.
pub fn render_text(report: &VerificationReport, config: &ReportConfig) -> String {
    let mut buffer = termcolor::Buffer::no_color();
    let plain = ReportConfig {
        use_colors: false,
        ..*config
    };
    let _ = write_report(&mut buffer, None, report, &plain);
    String::from_utf8_lossy(buffer.as_slice()).into_owned()
}

// =============================================================================
// JSON RENDERING
// =============================================================================

/// A document's report, as emitted by `--json`.
#[derive(Debug, Serialize)]
pub struct DocumentReport<'a> {
    pub document: &'a str,
    #[serde(flatten)]
    pub report: &'a VerificationReport,
}

pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, VerifyError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| VerifyError::internal(format!("could not serialize report: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::SkipReason;
    use crate::snippet::{GroupId, SnippetId};

    fn entry(id: usize, status: Status) -> ReportEntry {
        ReportEntry {
            snippet_id: SnippetId(id),
            group: GroupId(id),
            status,
            diff: None,
            mismatch: None,
            heading: Some("Arrays".into()),
            line: Some(10 + id),
            fingerprint: "0123456789ab".into(),
            duration_ticks: 5,
        }
    }

    fn sample() -> VerificationReport {
        let mut failing = entry(1, Status::Fail);
        failing.diff = Some("output line 1 differs".into());
        failing.mismatch = Some(Mismatch {
            index: 0,
            expected: Some("[1,2,3]".into()),
            actual: Some("[1,2,4]".into()),
        });
        VerificationReport::new(vec![
            entry(0, Status::Pass),
            failing,
            entry(2, Status::Skipped(SkipReason::NoAssertion)),
        ])
    }

    #[test]
    fn quiet_text_lists_only_failures() {
        let text = render_text(&sample(), &ReportConfig { use_colors: false, verbose: false });
        assert!(!text.contains("PASS"));
        assert!(text.contains("FAIL: snippet #1 [Arrays, line 11]"));
        assert!(text.contains("- expected: [1,2,3]"));
        assert!(text.contains("+ actual:   [1,2,4]"));
        assert!(text.contains("Summary: total 3, passed 1, failed 1, skipped 1, timed out 0"));
        assert!(text.contains("Failed snippets:\n  - FAIL #1 [Arrays, line 11]"));
    }

    #[test]
    fn verbose_text_includes_passes_and_skips() {
        let text = render_text(&sample(), &ReportConfig { use_colors: false, verbose: true });
        assert!(text.contains("PASS: snippet #0"));
        assert!(text.contains("SKIP: snippet #2 [Arrays, line 12] (nothing asserted)"));
    }

    #[test]
    fn json_carries_statuses_and_summary() {
        let report = sample();
        let json = to_json(&DocumentReport {
            document: "arrays.yaml",
            report: &report,
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["document"], "arrays.yaml");
        assert_eq!(value["entries"][0]["status"], "pass");
        assert_eq!(value["entries"][2]["status"]["skipped"], "no_assertion");
        assert_eq!(value["summary"]["fail"], 1);
    }
}
