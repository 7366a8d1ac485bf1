//! snipcheck: verifies that the code examples of a teaching document still
//! produce the output their annotations claim.
//!
//! The pipeline runs leaves first: [`snippet`] turns raw code blocks into
//! records with parsed expectations, [`executor`] runs each record in its
//! isolation group's context through a [`runtime::Runtime`], [`matcher`]
//! compares what happened with what was promised, and [`orchestrator`]
//! drives the whole document and assembles the report.

pub use crate::errors::VerifyError;
pub use crate::orchestrator::{ReportEntry, Summary, VerificationReport, Verifier};

pub mod cli;
pub mod config;
pub mod errors;
pub mod executor;
pub mod matcher;
pub mod orchestrator;
pub mod report;
pub mod runtime;
pub mod snippet;
pub mod source;
