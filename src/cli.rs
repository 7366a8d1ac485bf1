//! The snipcheck command-line interface.
//!
//! This module parses arguments, merges them over the configuration file and
//! dispatches to the subcommand handlers. Exit codes: `0` when everything
//! verified, `1` when a snippet failed, `2` when the run itself could not
//! proceed (bad input, bad configuration, substrate fault).

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use clap::{ArgAction, Parser, Subcommand};

use crate::config::VerifyConfig;
use crate::errors::{print_error, VerifyError};
use crate::executor::EVAL_STACK_SIZE;
use crate::orchestrator::{VerificationReport, Verifier};
use crate::report::{print_report, to_json, DocumentReport, ReportConfig};
use crate::runtime::script::ScriptRuntime;
use crate::runtime::{Budget, Completion, Runtime, StdoutSink};
use crate::snippet::{build_records, GroupId, SnippetRecord};
use crate::source::load_documents;

// ============================================================================
// CLI ARGUMENTS
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "snipcheck",
    version,
    about = "Verifies the code examples of a teaching document against their annotated output."
)]
pub struct SnipcheckArgs {
    #[command(subcommand)]
    pub command: Command,

    /// YAML configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Wall-clock ceiling per snippet, in milliseconds.
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Worker threads for independent snippet groups.
    #[arg(long, short = 'j', global = true)]
    pub jobs: Option<usize>,

    /// Seed for `Math.random`.
    #[arg(long, global = true)]
    pub seed: Option<u64>,

    /// More output: list every snippet, and log at info (-v) or debug (-vv).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Disable coloured output.
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Verify every snippet of a document, or of every document in a directory.
    Verify {
        #[arg(required = true)]
        path: PathBuf,
    },
    /// Show the expectations parsed from each snippet without running anything.
    Annotations {
        #[arg(required = true)]
        path: PathBuf,
    },
    /// Run a single script file, printing its console output.
    Run {
        #[arg(required = true)]
        file: PathBuf,
    },
}

impl SnipcheckArgs {
    /// The configuration file (if any) with flag overrides applied.
    pub fn resolve_config(&self) -> Result<VerifyConfig, VerifyError> {
        let mut config = match &self.config {
            Some(path) => VerifyConfig::load(path)?,
            None => VerifyConfig::default(),
        };
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout_ms = timeout_ms;
        }
        if let Some(jobs) = self.jobs {
            config.jobs = jobs;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn report_config(&self) -> ReportConfig {
        let defaults = ReportConfig::default();
        ReportConfig {
            use_colors: defaults.use_colors && !self.no_color,
            verbose: self.verbose > 0,
        }
    }
}

// ============================================================================
// DISPATCH
// ============================================================================

/// Runs the parsed command and returns the process exit code.
pub fn run(args: SnipcheckArgs) -> i32 {
    let outcome = args.resolve_config().and_then(|config| match &args.command {
        Command::Verify { path } => handle_verify(path, &config, &args),
        Command::Annotations { path } => handle_annotations(path, args.json),
        Command::Run { file } => handle_run(file, &config),
    });
    match outcome {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(error) => {
            print_error(error);
            2
        }
    }
}

fn handle_verify(path: &Path, config: &VerifyConfig, args: &SnipcheckArgs) -> Result<bool, VerifyError> {
    let documents = load_documents(path)?;
    let verifier = Verifier::new(ScriptRuntime::new(config.step_check_interval), config);
    let report_config = args.report_config();

    let mut reports: Vec<(String, VerificationReport)> = Vec::with_capacity(documents.len());
    for document in documents {
        let name = document.display_name();
        let report = verifier.verify_snippets(document.snippets);
        if !args.json {
            print_report(Some(&name), &report, &report_config);
        }
        reports.push((name, report));
    }

    if args.json {
        let rendered: Vec<DocumentReport<'_>> = reports
            .iter()
            .map(|(document, report)| DocumentReport { document, report })
            .collect();
        println!("{}", to_json(&rendered)?);
    }

    if let Some((name, report)) = reports.iter().find(|(_, report)| report.aborted()) {
        return Err(VerifyError::internal(format!(
            "verification of {} aborted after {} internal error(s)",
            name, report.summary.internal_error
        )));
    }
    Ok(reports.iter().all(|(_, report)| report.is_success()))
}

fn describe_record(record: &SnippetRecord) -> String {
    let mut line = format!("{} {}", record.id, record.isolation_group);
    if let Some(heading) = &record.heading {
        line.push_str(&format!(" [{}]", heading));
    }
    if record.is_unasserted() {
        line.push_str(" no assertion");
    }
    if record.expected_to_throw {
        line.push_str(" throws");
    }
    if record.nondeterministic {
        line.push_str(" nondeterministic");
    }
    for expected in &record.expected_outputs {
        line.push_str(&format!("\n    {:?}", expected));
    }
    if let Some(note) = &record.annotation_note {
        line.push_str(&format!("\n    note: {}", note));
    }
    line
}

fn handle_annotations(path: &Path, json: bool) -> Result<bool, VerifyError> {
    let documents = load_documents(path)?;
    for document in documents {
        let name = document.display_name();
        let records = build_records(document.snippets);
        if json {
            println!("{}", to_json(&records)?);
            continue;
        }
        println!("== {} ==", name);
        for record in &records {
            println!("{}", describe_record(record));
        }
    }
    Ok(true)
}

fn handle_run(file: &Path, config: &VerifyConfig) -> Result<bool, VerifyError> {
    let source = fs::read_to_string(file).map_err(|source| VerifyError::Io {
        path: file.display().to_string(),
        source,
    })?;
    let runtime = ScriptRuntime::new(config.step_check_interval);
    let mut context = runtime.new_context(GroupId(0), config.seed)?;
    let budget = Budget::new(config.ceiling());
    let worker = thread::Builder::new()
        .name("snipcheck-run".into())
        .stack_size(EVAL_STACK_SIZE)
        .spawn(move || runtime.evaluate(&mut context, &source, &mut StdoutSink, &budget))
        .map_err(|e| VerifyError::internal(format!("could not start evaluation thread: {}", e)))?;
    let completion = worker
        .join()
        .map_err(|_| VerifyError::internal("evaluation thread panicked"))??;
    match completion {
        Completion::Normal => Ok(true),
        Completion::Threw(description) => {
            eprintln!("Uncaught {}", description);
            Ok(false)
        }
        Completion::Interrupted => {
            eprintln!("Timed out after {} ms", config.timeout_ms);
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let args = SnipcheckArgs::parse_from([
            "snipcheck",
            "verify",
            "docs",
            "--timeout-ms",
            "50",
            "-j",
            "3",
            "-vv",
            "--no-color",
        ]);
        let config = args.resolve_config().unwrap();
        assert_eq!(config.timeout_ms, 50);
        assert_eq!(config.jobs, 3);
        assert_eq!(args.verbose, 2);
        assert!(!args.report_config().use_colors);
        assert!(matches!(args.command, Command::Verify { .. }));
    }

    #[test]
    fn invalid_overrides_are_config_errors() {
        let args = SnipcheckArgs::parse_from(["snipcheck", "run", "x.js", "--jobs", "0"]);
        assert!(matches!(args.resolve_config(), Err(VerifyError::Config { .. })));
    }
}
