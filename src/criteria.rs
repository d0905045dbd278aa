//! Criteria predicate. Invokes an optional external program with each
//! node's JSON summary and collects pass/fail plus messages.

use std::process::Command;

use serde::Serialize;

use crate::summary::{KindSummary, NodeKind, Summary};

#[derive(Debug, Clone, Serialize)]
struct KindSummaryJson<'a> {
    found: u64,
    hit: u64,
    per_tla: &'a [u64],
}

impl<'a> From<&'a KindSummary> for KindSummaryJson<'a> {
    fn from(k: &'a KindSummary) -> Self {
        KindSummaryJson {
            found: k.totals.found(),
            hit: k.totals.hit(),
            per_tla: &k.totals.per_tla,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct SummaryJson<'a> {
    line: KindSummaryJson<'a>,
    branch: KindSummaryJson<'a>,
    function: KindSummaryJson<'a>,
}

impl<'a> From<&'a Summary> for SummaryJson<'a> {
    fn from(s: &'a Summary) -> Self {
        SummaryJson {
            line: (&s.line).into(),
            branch: (&s.branch).into(),
            function: (&s.function).into(),
        }
    }
}

fn kind_label(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::File => "file",
        NodeKind::Directory => "directory",
        NodeKind::Top => "top",
    }
}

/// One node's verdict: whether the external program exited zero, and
/// whatever it wrote to stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub node: String,
    pub passed: bool,
    pub messages: Vec<String>,
}

/// Invoked as `<program> <name> <kind> <json>`. Absent `program`, every node
/// trivially passes — a criteria program is optional.
pub struct CriteriaChecker {
    program: Option<String>,
}

impl CriteriaChecker {
    pub fn new(program: Option<String>) -> Self {
        CriteriaChecker { program }
    }

    pub fn check(&self, summary: &Summary) -> crate::error::Result<Verdict> {
        let Some(program) = &self.program else {
            return Ok(Verdict {
                node: summary.name.clone(),
                passed: true,
                messages: Vec::new(),
            });
        };

        let json = serde_json::to_string(&SummaryJson::from(summary))?;
        let output = Command::new(program)
            .arg(&summary.name)
            .arg(kind_label(summary.kind))
            .arg(&json)
            .output()?;

        let messages: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect();

        Ok(Verdict {
            node: summary.name.clone(),
            passed: output.status.success(),
            messages,
        })
    }
}

/// Overall process exit code: non-zero iff any node failed.
pub fn exit_code(verdicts: &[Verdict]) -> i32 {
    if verdicts.iter().all(|v| v.passed) {
        0
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::DateBins;

    #[test]
    fn absent_program_always_passes() {
        let bins = DateBins::default();
        let summary = Summary::new(NodeKind::Top, "top", &bins);
        let checker = CriteriaChecker::new(None);
        let verdict = checker.check(&summary).unwrap();
        assert!(verdict.passed);
        assert!(verdict.messages.is_empty());
    }

    #[test]
    fn exit_code_is_nonzero_iff_any_node_failed() {
        let passing = Verdict {
            node: "a".into(),
            passed: true,
            messages: Vec::new(),
        };
        let failing = Verdict {
            node: "b".into(),
            passed: false,
            messages: vec!["below threshold".into()],
        };
        assert_eq!(exit_code(&[passing.clone()]), 0);
        assert_eq!(exit_code(&[passing, failing]), 1);
    }
}
