//! Ingest data model for coverage traces. Trace-file parsing is meant to be
//! an external, pluggable producer — the engine consumes already-parsed
//! records, not raw bytes — but the lcov-style wire format is simple and
//! line-oriented, so a small reference parser is included here for
//! end-to-end usability. [`Categorizer`](crate::categorize) only depends on
//! the [`FileTrace`] struct, not on this parser.

use std::collections::BTreeMap;

use crate::diagnostics::{DiagnosticKind, DiagnosticSink};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchEntry {
    pub block_id: u32,
    pub branch_id: u32,
    /// `None` for the `-` ("not instrumented on this path") sentinel.
    pub taken: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionEntry {
    pub name: String,
    pub decl_line: Option<u32>,
    pub hits: u64,
}

/// Per-file coverage counts, already summed across every `TN:` test-case
/// block that named this file.
#[derive(Debug, Clone, Default)]
pub struct FileTrace {
    pub path: String,
    pub line_hits: BTreeMap<u32, u64>,
    pub branches: BTreeMap<u32, Vec<BranchEntry>>,
    pub functions: Vec<FunctionEntry>,
}

#[derive(Debug, Default)]
pub struct Trace {
    pub files: BTreeMap<String, FileTrace>,
}

impl Trace {
    pub fn file(&self, path: &str) -> Option<&FileTrace> {
        self.files.get(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}

/// Reference parser for an lcov-style record format: `TN:`/`SF:`/
/// `end_of_record` blocks containing `DA:`, `BRDA:`, `FN:`/`FNDA:` lines.
/// `LF`/`LH`/`BRF`/`BRH` totals are recognized and skipped; they're
/// recomputed by the engine rather than trusted from the trace.
pub fn parse_trace(text: &str, diagnostics: &DiagnosticSink) -> Trace {
    let mut trace = Trace::default();
    let mut current_path: Option<String> = None;
    let mut pending_fn_decls: BTreeMap<String, u32> = BTreeMap::new();

    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        if let Some(path) = line.strip_prefix("SF:") {
            current_path = Some(path.to_string());
            trace
                .files
                .entry(path.to_string())
                .or_insert_with(|| FileTrace {
                    path: path.to_string(),
                    ..Default::default()
                });
            pending_fn_decls.clear();
            continue;
        }

        if line == "end_of_record" {
            current_path = None;
            continue;
        }

        let Some(path) = current_path.clone() else {
            if line.starts_with("TN:") {
                continue;
            }
            let _ = diagnostics.raise(
                DiagnosticKind::Format,
                format!("record line outside SF block: {line}"),
                None,
            );
            continue;
        };
        let file = trace.files.get_mut(&path).unwrap();

        if let Some(rest) = line.strip_prefix("DA:") {
            match parse_da(rest) {
                Some((lineno, count)) => {
                    *file.line_hits.entry(lineno).or_insert(0) += count;
                }
                None => {
                    let _ = diagnostics.raise(DiagnosticKind::Format, format!("bad DA: {rest}"), Some(path));
                }
            }
        } else if let Some(rest) = line.strip_prefix("BRDA:") {
            match parse_brda(rest) {
                Some((lineno, entry)) => {
                    let entries = file.branches.entry(lineno).or_default();
                    if let Some(existing) = entries
                        .iter_mut()
                        .find(|e| e.block_id == entry.block_id && e.branch_id == entry.branch_id)
                    {
                        existing.taken = match (existing.taken, entry.taken) {
                            (Some(a), Some(b)) => Some(a + b),
                            (a, b) => a.or(b),
                        };
                    } else {
                        entries.push(entry);
                    }
                }
                None => {
                    let _ = diagnostics.raise(DiagnosticKind::Branch, format!("bad BRDA: {rest}"), Some(path));
                }
            }
        } else if let Some(rest) = line.strip_prefix("FN:") {
            if let Some((lineno, name)) = rest.split_once(',') {
                if let Ok(lineno) = lineno.parse() {
                    pending_fn_decls.insert(name.to_string(), lineno);
                }
            }
        } else if let Some(rest) = line.strip_prefix("FNDA:") {
            if let Some((count, name)) = rest.split_once(',') {
                if let Ok(count) = count.parse::<u64>() {
                    if let Some(existing) = file.functions.iter_mut().find(|f| f.name == name) {
                        existing.hits += count;
                    } else {
                        file.functions.push(FunctionEntry {
                            name: name.to_string(),
                            decl_line: pending_fn_decls.get(name).copied(),
                            hits: count,
                        });
                    }
                }
            }
        }
        // LF/LH/BRF/BRH/FNF/FNH totals are ignored: the engine recomputes them.
    }

    for file in trace.files.values_mut() {
        for func in &mut file.functions {
            if func.decl_line.is_none() {
                func.decl_line = pending_fn_decls.get(&func.name).copied();
            }
        }
    }

    trace
}

fn parse_da(rest: &str) -> Option<(u32, u64)> {
    let mut parts = rest.split(',');
    let lineno = parts.next()?.parse().ok()?;
    let count = parts.next()?.parse().ok()?;
    Some((lineno, count))
}

fn parse_brda(rest: &str) -> Option<(u32, BranchEntry)> {
    let mut parts = rest.split(',');
    let lineno = parts.next()?.parse().ok()?;
    let block_id = parts.next()?.parse().ok()?;
    let branch_id = parts.next()?.parse().ok()?;
    let taken_raw = parts.next()?;
    let taken = if taken_raw == "-" {
        None
    } else {
        Some(taken_raw.parse().ok()?)
    };
    Some((
        lineno,
        BranchEntry {
            block_id,
            branch_id,
            taken,
        },
    ))
}
