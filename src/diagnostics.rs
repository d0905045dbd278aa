//! Diagnostic classification.
//!
//! Almost every anomaly the engine hits while ingesting or categorizing
//! coverage data is recoverable: a best-effort default is substituted and a
//! [`Diagnostic`] is recorded rather than bubbling up a [`crate::error::CovError`].
//! Only structural failures above this layer (unreadable diff, uncreatable
//! output directory) use `Result`.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use strum_macros::{Display, EnumIter, EnumString};

/// The closed set of diagnostic kinds the core engine can raise.
#[derive(Debug, Display, EnumString, EnumIter, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DiagnosticKind {
    Source,
    Unmapped,
    Category,
    Path,
    Inconsistent,
    Mismatch,
    Branch,
    Version,
    Empty,
    Unused,
    Parallel,
    Package,
    Negative,
    Count,
    Format,
    Corrupt,
    Unsupported,
}

/// How a [`DiagnosticKind`] should be handled once raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiagnosticPolicy {
    Fatal,
    #[default]
    Warn,
    Ignore,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub file: Option<String>,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}: {} ({file})", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

/// Raised when a diagnostic's policy is [`DiagnosticPolicy::Fatal`]; the
/// caller should propagate this up to a hard process failure.
#[derive(Debug, thiserror::Error)]
#[error("fatal diagnostic: {0}")]
pub struct FatalDiagnostic(pub Diagnostic);

struct Counts {
    raised: HashMap<DiagnosticKind, usize>,
    recorded: Vec<Diagnostic>,
}

/// Collects diagnostics raised across the whole run, applying per-kind
/// policy and a shared maximum-message-count suppressor (`max_message_count`
/// in the config table).
pub struct DiagnosticSink {
    policies: HashMap<DiagnosticKind, DiagnosticPolicy>,
    max_message_count: Option<usize>,
    inner: Mutex<Counts>,
}

impl DiagnosticSink {
    pub fn new(policies: HashMap<DiagnosticKind, DiagnosticPolicy>, max_message_count: Option<usize>) -> Self {
        DiagnosticSink {
            policies,
            max_message_count,
            inner: Mutex::new(Counts {
                raised: HashMap::new(),
                recorded: Vec::new(),
            }),
        }
    }

    fn policy_for(&self, kind: DiagnosticKind) -> DiagnosticPolicy {
        self.policies.get(&kind).copied().unwrap_or_default()
    }

    /// Records a diagnostic, honoring its policy and the max-count
    /// suppressor. Returns `Err` only when the kind's policy is `Fatal`.
    pub fn raise(
        &self,
        kind: DiagnosticKind,
        message: impl Into<String>,
        file: Option<String>,
    ) -> Result<(), FatalDiagnostic> {
        let diagnostic = Diagnostic {
            kind,
            message: message.into(),
            file,
        };

        match self.policy_for(kind) {
            DiagnosticPolicy::Ignore => Ok(()),
            DiagnosticPolicy::Fatal => Err(FatalDiagnostic(diagnostic)),
            DiagnosticPolicy::Warn => {
                let mut guard: MutexGuard<Counts> = self.inner.lock().unwrap();
                let count = guard.raised.entry(kind).or_insert(0);
                *count += 1;
                let suppressed = self
                    .max_message_count
                    .is_some_and(|max| *count > max);
                if !suppressed {
                    tracing::warn!(%diagnostic, "diagnostic");
                    guard.recorded.push(diagnostic);
                }
                Ok(())
            }
        }
    }

    /// All recorded (non-suppressed) diagnostics, in raise order.
    pub fn recorded(&self) -> Vec<Diagnostic> {
        self.inner.lock().unwrap().recorded.clone()
    }

    /// Per-kind counts of how many messages were suppressed past
    /// `max_message_count`, for the end-of-run summary.
    pub fn suppressed_counts(&self) -> Vec<(DiagnosticKind, usize)> {
        let Some(max) = self.max_message_count else {
            return Vec::new();
        };
        let guard = self.inner.lock().unwrap();
        guard
            .raised
            .iter()
            .filter(|(_, count)| **count > max)
            .map(|(kind, count)| (*kind, count - max))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warn_is_recorded_and_fatal_propagates() {
        let mut policies = HashMap::new();
        policies.insert(DiagnosticKind::Path, DiagnosticPolicy::Fatal);
        let sink = DiagnosticSink::new(policies, None);

        sink.raise(DiagnosticKind::Empty, "no differences", None)
            .unwrap();
        assert_eq!(sink.recorded().len(), 1);

        let err = sink
            .raise(DiagnosticKind::Path, "ambiguous basename", Some("a.rs".into()))
            .unwrap_err();
        assert_eq!(err.0.kind, DiagnosticKind::Path);
    }

    #[test]
    fn max_message_count_suppresses_after_threshold() {
        let sink = DiagnosticSink::new(HashMap::new(), Some(2));
        for _ in 0..5 {
            sink.raise(DiagnosticKind::Unmapped, "x", None).unwrap();
        }
        assert_eq!(sink.recorded().len(), 2);
        let suppressed = sink.suppressed_counts();
        assert_eq!(suppressed, vec![(DiagnosticKind::Unmapped, 3)]);
    }
}
