//! Driver-visible diagnostics and the error sink.
//!
//! The core never prints; it reports structured [`Diagnostic`]s into a
//! [`DiagnosticSink`]. The sink enforces the driver's policy knobs
//! (warnings-as-errors, fatal errors, the error limit) by answering each
//! report with either `Ok` or [`CompilationAborted`].

use std::sync::Arc;

// =============================================================================
// Diagnostics
// =============================================================================

/// How severe a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Message,
    Event,
}

/// A half-open range within a named source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRange {
    pub document: Arc<str>,
    pub start: usize,
    pub length: usize,
}

impl SourceRange {
    pub fn new(document: impl Into<Arc<str>>, start: usize, length: usize) -> Self {
        Self {
            document: document.into(),
            start,
            length,
        }
    }
}

/// A structured diagnostic: severity, a short title, a message body, and an
/// optional source anchor.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub range: Option<SourceRange>,
}

impl Diagnostic {
    pub fn new(severity: Severity, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            title: title.into(),
            message: message.into(),
            range: None,
        }
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, title, message)
    }

    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, title, message)
    }

    pub fn message(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Message, title, message)
    }

    /// Attach a source range.
    pub fn with_range(mut self, range: SourceRange) -> Self {
        self.range = Some(range);
        self
    }

    /// The conventional diagnostic for a source file the front-end could
    /// not provide. An ordinary error; the driver decides whether it is
    /// fatal.
    pub fn unavailable_source(document: &str) -> Self {
        Self::error(
            "unavailable source",
            format!("source file '{}' could not be read", document),
        )
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Message => "message",
            Severity::Event => "event",
        };
        match &self.range {
            Some(range) => write!(
                f,
                "{}:{}: {}: {}: {}",
                range.document, range.start, severity, self.title, self.message
            ),
            None => write!(f, "{}: {}: {}", severity, self.title, self.message),
        }
    }
}

// =============================================================================
// Driver configuration
// =============================================================================

/// The policy knobs the core recognizes.
#[derive(Debug, Clone, Default)]
pub struct DriverConfig {
    /// `-Werror`: promote warnings to errors.
    pub warnings_as_errors: bool,
    /// `-Wfatal-errors`: abort on the first error.
    pub fatal_errors: bool,
    /// `-fmax-errors=N`: abort after N errors; zero means unlimited.
    pub max_errors: usize,
}

// =============================================================================
// Abort
// =============================================================================

/// Compilation crossed the configured error policy and must stop.
#[derive(Debug, Clone)]
pub struct CompilationAborted {
    pub reason: String,
}

impl std::fmt::Display for CompilationAborted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "compilation aborted: {}", self.reason)
    }
}

impl std::error::Error for CompilationAborted {}

// =============================================================================
// Sink
// =============================================================================

/// Collects diagnostics and enforces the driver policy.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    config: DriverConfig,
    diagnostics: Vec<Diagnostic>,
    error_count: usize,
}

impl DiagnosticSink {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            diagnostics: Vec::new(),
            error_count: 0,
        }
    }

    /// Record a diagnostic. Returns `CompilationAborted` when the policy
    /// says to stop; the diagnostic itself is recorded either way.
    pub fn report(&mut self, mut diagnostic: Diagnostic) -> Result<(), CompilationAborted> {
        if diagnostic.severity == Severity::Warning && self.config.warnings_as_errors {
            diagnostic.severity = Severity::Error;
        }

        let is_error = diagnostic.severity == Severity::Error;
        self.diagnostics.push(diagnostic);
        if !is_error {
            return Ok(());
        }
        self.error_count += 1;

        if self.config.fatal_errors {
            return Err(CompilationAborted {
                reason: "fatal error".into(),
            });
        }
        if self.config.max_errors != 0 && self.error_count >= self.config.max_errors {
            return Err(CompilationAborted {
                reason: format!("too many errors (limit {})", self.config.max_errors),
            });
        }
        Ok(())
    }

    /// Everything reported so far, in order.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Number of errors after promotion.
    #[inline]
    pub fn error_count(&self) -> usize {
        self.error_count
    }

    /// Whether any error was reported.
    #[inline]
    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    /// The process exit code the driver should use: zero on success, one
    /// when any error was emitted.
    pub fn exit_code(&self) -> i32 {
        if self.has_errors() {
            1
        } else {
            0
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
