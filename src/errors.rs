//! snipcheck error handling.
//!
//! One error type covers the whole verifier. Most of its variants describe
//! what happened to a snippet and end up as report data, never as an `Err`
//! leaving the executor. Only substrate and input faults (`Internal`, `Io`,
//! `Decode`, `Config`) are ever propagated with `?`.

use miette::Diagnostic;
use thiserror::Error;

/// Classification of [`VerifyError`] variants.
///
/// Lets callers branch on the kind of failure without matching on fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// An annotation comment could not be read unambiguously.
    Annotation,
    /// The snippet threw, as data.
    Snippet,
    /// The snippet ran past its wall-clock ceiling.
    Timeout,
    /// The evaluation substrate itself is unusable.
    Internal,
    /// Reading snippet input or configuration failed.
    Io,
    /// Snippet input could not be decoded.
    Decode,
    /// Configuration is invalid.
    Config,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Annotation => "Annotation",
            ErrorType::Snippet => "Snippet",
            ErrorType::Timeout => "Timeout",
            ErrorType::Internal => "Internal",
            ErrorType::Io => "Io",
            ErrorType::Decode => "Decode",
            ErrorType::Config => "Config",
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unified error type for every verifier failure mode.
#[derive(Debug, Error, Diagnostic)]
pub enum VerifyError {
    #[error("ambiguous annotation on line {line}: `// {comment}`")]
    #[diagnostic(
        code(snipcheck::annotation),
        help("quote the expected value or write `// Output: <text>` to make the assertion explicit")
    )]
    AnnotationParseAmbiguous { line: usize, comment: String },

    #[error("snippet threw: {description}")]
    #[diagnostic(code(snipcheck::snippet_throw))]
    SnippetThrow { description: String },

    #[error("snippet exceeded its {ceiling_ms} ms budget (ran {elapsed_ms} ms)")]
    #[diagnostic(code(snipcheck::timeout))]
    Timeout { ceiling_ms: u64, elapsed_ms: u64 },

    #[error("unexpected throw: {description}")]
    #[diagnostic(code(snipcheck::unexpected_throw))]
    UnexpectedThrow { description: String },

    #[error("Internal error: {message}")]
    #[diagnostic(
        code(snipcheck::internal),
        help("the evaluation substrate is unusable; the remaining snippets were not run")
    )]
    Internal { message: String },

    #[error("failed to read {path}")]
    #[diagnostic(code(snipcheck::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode snippets in {path}: {message}")]
    #[diagnostic(
        code(snipcheck::decode),
        help("snippet files hold a list of `{{ code, chained, group, nondeterministic }}` records")
    )]
    Decode { path: String, message: String },

    #[error("invalid configuration: {message}")]
    #[diagnostic(code(snipcheck::config))]
    Config { message: String },
}

impl VerifyError {
    /// Returns the classification of this error.
    pub fn error_type(&self) -> ErrorType {
        match self {
            VerifyError::AnnotationParseAmbiguous { .. } => ErrorType::Annotation,
            VerifyError::SnippetThrow { .. } | VerifyError::UnexpectedThrow { .. } => {
                ErrorType::Snippet
            }
            VerifyError::Timeout { .. } => ErrorType::Timeout,
            VerifyError::Internal { .. } => ErrorType::Internal,
            VerifyError::Io { .. } => ErrorType::Io,
            VerifyError::Decode { .. } => ErrorType::Decode,
            VerifyError::Config { .. } => ErrorType::Config,
        }
    }

    /// True for faults that must abort the remaining run.
    pub fn is_fatal(&self) -> bool {
        matches!(self.error_type(), ErrorType::Internal)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        VerifyError::Internal {
            message: message.into(),
        }
    }
}

/// Prints a VerifyError with full miette diagnostics.
pub fn print_error(error: VerifyError) {
    let report = miette::Report::new(error);
    eprintln!("{report:?}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_internal_errors_are_fatal() {
        assert!(VerifyError::internal("no context").is_fatal());
        assert!(!VerifyError::Timeout {
            ceiling_ms: 10,
            elapsed_ms: 12
        }
        .is_fatal());
        assert!(!VerifyError::AnnotationParseAmbiguous {
            line: 1,
            comment: "hm".into()
        }
        .is_fatal());
    }

    #[test]
    fn unexpected_throw_renders_description() {
        let err = VerifyError::UnexpectedThrow {
            description: "TypeError: x is not a function".into(),
        };
        assert_eq!(
            err.to_string(),
            "unexpected throw: TypeError: x is not a function"
        );
        assert_eq!(err.error_type(), ErrorType::Snippet);
    }
}
