//! Annotator: invokes an external program per file to obtain, per line,
//! `(commit-id, author, when, text)`, and computes the line's age in days.

use std::{
    path::Path,
    process::Command,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::diagnostics::{DiagnosticKind, DiagnosticSink};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedLine {
    pub commit_id: String,
    pub author: String,
    pub age_in_days: u32,
    pub text: String,
}

/// Seam for invoking the external annotate script, mocked in tests via
/// `#[cfg_attr(test, automock)]`.
#[cfg_attr(test, mockall::automock)]
pub trait Annotator {
    /// Returns `None` for a line that has no real commit (`commit == NONE`),
    /// meaning it isn't a project line and carries no owner.
    fn annotate(&self, path: &Path) -> crate::error::Result<Vec<Option<AnnotatedLine>>>;
}

/// Invokes `annotate_script <abs-path>` and parses `commit|author|when|text`
/// lines from its stdout.
pub struct ExternalAnnotator {
    program: String,
    args: Vec<String>,
    now: u64,
}

impl ExternalAnnotator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        ExternalAnnotator {
            program: program.into(),
            args,
            now: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        }
    }
}

impl Annotator for ExternalAnnotator {
    fn annotate(&self, path: &Path) -> crate::error::Result<Vec<Option<AnnotatedLine>>> {
        let abs_path = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&abs_path)
            .output()?;

        if !output.status.success() {
            return Err(crate::error::CovError::AnnotatorFailed(
                path.display().to_string(),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().map(|l| parse_annotate_line(l, self.now)).collect())
    }
}

/// Parses one `commit|author|when|text` line. `when` is either an epoch-day
/// timestamp or, for reproducible fixtures, a bare integer day count that's
/// passed straight through as the age.
fn parse_annotate_line(line: &str, now: u64) -> Option<AnnotatedLine> {
    let mut parts = line.splitn(4, '|');
    let commit_id = parts.next()?.to_string();
    let author = parts.next()?.to_string();
    let when = parts.next()?;
    let text = parts.next().unwrap_or("").to_string();

    if commit_id == "NONE" {
        return None;
    }

    let age_in_days = if let Ok(days) = when.parse::<u32>() {
        days
    } else if let Ok(epoch_secs) = when.parse::<u64>() {
        ((now.saturating_sub(epoch_secs)) / 86_400) as u32
    } else {
        0
    };

    Some(AnnotatedLine {
        commit_id,
        author,
        age_in_days,
        text,
    })
}

/// Enforces the all-or-nothing invariant: within one file,
/// every line is either annotated with a real commit or none are. Violation
/// is an ignorable diagnostic, not a crash; on violation this clears all
/// annotations for the file so downstream code sees a consistent "no
/// ownership data" state rather than a partially-annotated file.
pub fn enforce_all_or_nothing(
    file: &str,
    lines: &mut [Option<AnnotatedLine>],
    diagnostics: &DiagnosticSink,
) {
    let annotated = lines.iter().filter(|l| l.is_some()).count();
    if annotated != 0 && annotated != lines.len() {
        let _ = diagnostics.raise(
            DiagnosticKind::Unmapped,
            format!("{annotated}/{} lines annotated, expected all-or-nothing", lines.len()),
            Some(file.to_string()),
        );
        lines.iter_mut().for_each(|l| *l = None);
    }
}
