//! Categorizer. Given baseline and current per-line/branch/function
//! counts and the [`DiffMap`], assigns every coverpoint a TLA.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    diagnostics::{DiagnosticKind, DiagnosticSink},
    diffmap::{ChunkKind, DiffMap, Side},
    model::{BranchSubrecord, FunctionRecord, LineKey, LineRecord},
    policy::Policy,
    tla::{assign_tla, remap_new_file_as_baseline, Presence, Tla},
    trace::{BranchEntry, FileTrace},
};

pub struct CategorizedFile {
    pub lines: BTreeMap<LineKey, LineRecord>,
    pub functions: Vec<FunctionRecord>,
}

pub struct Categorizer<'a> {
    policy: &'a Policy,
    diagnostics: &'a DiagnosticSink,
}

impl<'a> Categorizer<'a> {
    pub fn new(policy: &'a Policy, diagnostics: &'a DiagnosticSink) -> Self {
        Categorizer { policy, diagnostics }
    }

    pub fn categorize(
        &self,
        file: &str,
        base: Option<&FileTrace>,
        curr: &FileTrace,
        diff: &DiffMap,
        newest_curr_line_is_older_than_baseline: bool,
    ) -> CategorizedFile {
        let mut lines: BTreeMap<LineKey, LineRecord> = BTreeMap::new();

        let curr_line_nos: BTreeSet<u32> = curr
            .line_hits
            .keys()
            .chain(curr.branches.keys())
            .copied()
            .collect();

        for &curr_line in &curr_line_nos {
            let kind = diff.kind(file, Side::New, curr_line);
            if kind == ChunkKind::Delete {
                // A current line can never live in a delete chunk (delete
                // chunks have no new-side range); this would mean the trace
                // and diff disagree about the file's shape.
                let _ = self.diagnostics.raise(
                    DiagnosticKind::Inconsistent,
                    format!("current line {curr_line} falls in a delete chunk"),
                    Some(file.to_string()),
                );
                continue;
            }

            let curr_count = curr.line_hits.get(&curr_line).copied();
            let (base_lineno, base_count) = match kind {
                ChunkKind::Insert => (None, None),
                ChunkKind::Equal => {
                    let base_lineno = diff.lookup(file, Side::New, curr_line);
                    let base_count = base.and_then(|b| b.line_hits.get(&base_lineno)).copied();
                    (Some(base_lineno), base_count)
                }
                ChunkKind::Delete => unreachable!(),
            };

            let presence = match (base_count, curr_count) {
                (Some(b), Some(c)) => Presence::Both { base: b, curr: c },
                (Some(b), None) => Presence::OnlyBase { base: b },
                (None, Some(c)) => Presence::OnlyCurr { curr: c },
                (None, None) => Presence::OnlyCurr { curr: 0 },
            };

            if kind == ChunkKind::Insert && base.is_some_and(|b| b.line_hits.contains_key(&curr_line)) {
                let _ = self.diagnostics.raise(
                    DiagnosticKind::Inconsistent,
                    format!("baseline data present at inserted line {curr_line}"),
                    Some(file.to_string()),
                );
            }

            let mut tla = assign_tla(kind, presence);
            if self.policy.new_file_as_baseline
                && base.is_none()
                && newest_curr_line_is_older_than_baseline
            {
                tla = remap_new_file_as_baseline(tla);
            }

            let base_branches = base_lineno.and_then(|b| base.and_then(|t| t.branches.get(&b)));
            let curr_branches = curr.branches.get(&curr_line);
            let branches = self.categorize_branches(file, kind, base_branches, curr_branches);

            let record = LineRecord {
                kind,
                base_lineno,
                curr_lineno: Some(curr_line),
                base_count,
                curr_count,
                branches,
                tla,
            };
            lines.insert(LineKey::Current(curr_line), record);
        }

        if let Some(base) = base {
            let base_line_nos: BTreeSet<u32> = base
                .line_hits
                .keys()
                .chain(base.branches.keys())
                .copied()
                .collect();

            for &base_line in &base_line_nos {
                let kind = diff.kind(file, Side::Old, base_line);
                let base_count = base.line_hits.get(&base_line).copied();

                match kind {
                    ChunkKind::Delete => {
                        let tla = assign_tla(kind, Presence::OnlyBase { base: base_count.unwrap_or(0) });
                        let branches = self.categorize_branches(
                            file,
                            kind,
                            base.branches.get(&base_line),
                            None,
                        );
                        lines.insert(
                            LineKey::Ghost(base_line),
                            LineRecord {
                                kind,
                                base_lineno: Some(base_line),
                                curr_lineno: None,
                                base_count,
                                curr_count: None,
                                branches,
                                tla,
                            },
                        );
                    }
                    ChunkKind::Equal => {
                        let new_line = diff.lookup(file, Side::Old, base_line);
                        if lines.contains_key(&LineKey::Current(new_line)) {
                            // Already produced (and, if it had a current
                            // count, already categorized as `Both`) while
                            // iterating current lines above.
                            continue;
                        }
                        let tla = assign_tla(
                            kind,
                            Presence::OnlyBase {
                                base: base_count.unwrap_or(0),
                            },
                        );
                        let branches = self.categorize_branches(
                            file,
                            kind,
                            base.branches.get(&base_line),
                            None,
                        );
                        lines.insert(
                            LineKey::Current(new_line),
                            LineRecord {
                                kind,
                                base_lineno: Some(base_line),
                                curr_lineno: Some(new_line),
                                base_count,
                                curr_count: None,
                                branches,
                                tla,
                            },
                        );
                    }
                    ChunkKind::Insert => {
                        let _ = self.diagnostics.raise(
                            DiagnosticKind::Inconsistent,
                            format!("baseline line {base_line} falls in an insert chunk"),
                            Some(file.to_string()),
                        );
                    }
                }
            }
        }

        let functions = self.categorize_functions(file, base, curr, diff);

        CategorizedFile { lines, functions }
    }

    /// Branches are organized into blocks; for `equal` lines, zip baseline
    /// and current blocks by id, then by positional index within the block.
    /// For `insert`/`delete` lines, only the side that actually has a line
    /// number contributes branches.
    fn categorize_branches(
        &self,
        file: &str,
        kind: ChunkKind,
        base_entries: Option<&Vec<BranchEntry>>,
        curr_entries: Option<&Vec<BranchEntry>>,
    ) -> Vec<BranchSubrecord> {
        match kind {
            ChunkKind::Insert => {
                if base_entries.is_some_and(|v| !v.is_empty()) {
                    let _ = self.diagnostics.raise(
                        DiagnosticKind::Branch,
                        "baseline branch data on an inserted line",
                        Some(file.to_string()),
                    );
                }
                curr_entries
                    .into_iter()
                    .flatten()
                    .map(|e| BranchSubrecord {
                        block_id: e.block_id,
                        branch_id: e.branch_id,
                        base_count: None,
                        curr_count: e.taken,
                        tla: assign_tla(kind, Presence::OnlyCurr { curr: e.taken.unwrap_or(0) }),
                        expr: None,
                    })
                    .collect()
            }
            ChunkKind::Delete => {
                if curr_entries.is_some_and(|v| !v.is_empty()) {
                    let _ = self.diagnostics.raise(
                        DiagnosticKind::Branch,
                        "current branch data on a deleted line",
                        Some(file.to_string()),
                    );
                }
                base_entries
                    .into_iter()
                    .flatten()
                    .map(|e| BranchSubrecord {
                        block_id: e.block_id,
                        branch_id: e.branch_id,
                        base_count: e.taken,
                        curr_count: None,
                        tla: assign_tla(kind, Presence::OnlyBase { base: e.taken.unwrap_or(0) }),
                        expr: None,
                    })
                    .collect()
            }
            ChunkKind::Equal => {
                let mut by_block: BTreeMap<u32, (Vec<&BranchEntry>, Vec<&BranchEntry>)> = BTreeMap::new();
                for e in base_entries.into_iter().flatten() {
                    by_block.entry(e.block_id).or_default().0.push(e);
                }
                for e in curr_entries.into_iter().flatten() {
                    by_block.entry(e.block_id).or_default().1.push(e);
                }

                let mut out = Vec::new();
                for (block_id, (mut base_list, mut curr_list)) in by_block {
                    base_list.sort_by_key(|e| e.branch_id);
                    curr_list.sort_by_key(|e| e.branch_id);
                    let n = base_list.len().max(curr_list.len());
                    for i in 0..n {
                        let base_entry = base_list.get(i).copied();
                        let curr_entry = curr_list.get(i).copied();
                        let presence = match (base_entry, curr_entry) {
                            (Some(b), Some(c)) => Presence::Both {
                                base: b.taken.unwrap_or(0),
                                curr: c.taken.unwrap_or(0),
                            },
                            (Some(b), None) => Presence::OnlyBase { base: b.taken.unwrap_or(0) },
                            (None, Some(c)) => Presence::OnlyCurr { curr: c.taken.unwrap_or(0) },
                            (None, None) => continue,
                        };
                        out.push(BranchSubrecord {
                            block_id,
                            branch_id: curr_entry.or(base_entry).map(|e| e.branch_id).unwrap_or(i as u32),
                            base_count: base_entry.and_then(|e| e.taken),
                            curr_count: curr_entry.and_then(|e| e.taken),
                            tla: assign_tla(kind, presence),
                            expr: None,
                        });
                    }
                }
                out
            }
        }
    }

    /// Functions are coverpoints keyed on their declared line, categorized
    /// the same way lines are. Aliases are functions sharing a declared line;
    /// the shortest name is treated as the leader (see DESIGN.md).
    fn categorize_functions(
        &self,
        file: &str,
        base: Option<&FileTrace>,
        curr: &FileTrace,
        diff: &DiffMap,
    ) -> Vec<FunctionRecord> {
        use std::collections::HashMap;

        let mut groups: HashMap<Option<u32>, Vec<&crate::trace::FunctionEntry>> = HashMap::new();
        for f in &curr.functions {
            groups.entry(f.decl_line).or_default().push(f);
        }

        let mut out = Vec::new();
        for (decl_line, mut members) in groups {
            members.sort_by_key(|f| (f.name.len(), f.name.clone()));
            let Some(leader) = members.first() else { continue };

            let kind = decl_line
                .map(|l| diff.kind(file, Side::New, l))
                .unwrap_or(ChunkKind::Insert);
            let base_hits: u64 = base
                .map(|b| {
                    members
                        .iter()
                        .filter_map(|m| b.functions.iter().find(|bf| bf.name == m.name))
                        .map(|bf| bf.hits)
                        .sum()
                })
                .unwrap_or(0);
            let curr_hits: u64 = members.iter().map(|m| m.hits).sum();

            let base_present = base.is_some_and(|b| members.iter().any(|m| b.functions.iter().any(|bf| bf.name == m.name)));
            if kind == ChunkKind::Insert && base_present {
                let _ = self.diagnostics.raise(
                    DiagnosticKind::Inconsistent,
                    format!("baseline data present for function at inserted line {}", leader.name),
                    Some(file.to_string()),
                );
            }
            let presence = if base_present {
                Presence::Both { base: base_hits, curr: curr_hits }
            } else {
                Presence::OnlyCurr { curr: curr_hits }
            };
            let tla = assign_tla(kind, presence);

            let aliases = members
                .iter()
                .map(|m| {
                    let alias_tla = if self.policy.function_alias_filter {
                        tla
                    } else {
                        let m_base = base.and_then(|b| b.functions.iter().find(|bf| bf.name == m.name));
                        let presence = match m_base {
                            Some(b) => Presence::Both { base: b.hits, curr: m.hits },
                            None => Presence::OnlyCurr { curr: m.hits },
                        };
                        assign_tla(kind, presence)
                    };
                    (
                        m.name.clone(),
                        crate::model::FunctionAlias {
                            hits: m.hits,
                            tla: Some(alias_tla),
                        },
                    )
                })
                .collect();

            out.push(FunctionRecord {
                name: leader.name.clone(),
                file: file.to_string(),
                line: decl_line,
                hit_count: curr_hits,
                tla,
                aliases,
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticSink;

    fn diag() -> DiagnosticSink {
        DiagnosticSink::new(Default::default(), None)
    }

    #[test]
    fn s1_insertion_with_no_baseline() {
        let mut curr = FileTrace {
            path: "x.rs".into(),
            ..Default::default()
        };
        curr.line_hits.insert(5, 3);
        let diff = DiffMap::empty(false);
        let diagnostics = diag();
        let policy = Policy::default();
        let categorizer = Categorizer::new(&policy, &diagnostics);
        let result = categorizer.categorize("x.rs", None, &curr, &diff, false);
        let record = &result.lines[&LineKey::Current(5)];
        assert_eq!(record.tla, Tla::Gnc);
        assert_eq!(record.curr_count, Some(3));
        assert_eq!(record.base_lineno, None);
    }

    #[test]
    fn s2_regression_equal_chunk() {
        let diff_text = "--- a/x.rs\n+++ b/x.rs\n@@ -1,1 +1,1 @@\n line\n";
        let diagnostics = diag();
        let diff = DiffMap::load(diff_text, 0, true, &diagnostics).unwrap();

        let mut base = FileTrace::default();
        base.line_hits.insert(1, 7);
        let mut curr = FileTrace::default();
        curr.line_hits.insert(1, 0);

        let policy = Policy::default();
        let categorizer = Categorizer::new(&policy, &diagnostics);
        let result = categorizer.categorize("x.rs", Some(&base), &curr, &diff, false);
        let record = &result.lines[&LineKey::Current(1)];
        assert_eq!(record.tla, Tla::Lbc);
    }

    #[test]
    fn s3_branch_split() {
        let diagnostics = diag();
        let diff = DiffMap::empty(true);
        let mut base = FileTrace::default();
        base.branches.insert(
            10,
            vec![
                BranchEntry { block_id: 0, branch_id: 0, taken: Some(5) },
                BranchEntry { block_id: 0, branch_id: 1, taken: Some(0) },
            ],
        );
        base.line_hits.insert(10, 5);
        let mut curr = FileTrace::default();
        curr.branches.insert(
            10,
            vec![
                BranchEntry { block_id: 0, branch_id: 0, taken: Some(5) },
                BranchEntry { block_id: 0, branch_id: 1, taken: Some(2) },
            ],
        );
        curr.line_hits.insert(10, 7);

        let policy = Policy::default();
        let categorizer = Categorizer::new(&policy, &diagnostics);
        let result = categorizer.categorize("x.rs", Some(&base), &curr, &diff, false);
        let record = &result.lines[&LineKey::Current(10)];
        assert_eq!(record.branches.len(), 2);
        assert_eq!(record.branches[0].tla, Tla::Cbc);
        assert_eq!(record.branches[1].tla, Tla::Gbc);
    }

    #[test]
    fn s4_deletion_only_produces_ghost() {
        let diff_text = "--- a/x.rs\n+++ b/x.rs\n@@ -42,1 +41,0 @@\n-gone\n";
        let diagnostics = diag();
        let diff = DiffMap::load(diff_text, 0, true, &diagnostics).unwrap();
        let mut base = FileTrace::default();
        base.line_hits.insert(42, 0);
        let curr = FileTrace::default();

        let policy = Policy::default();
        let categorizer = Categorizer::new(&policy, &diagnostics);
        let result = categorizer.categorize("x.rs", Some(&base), &curr, &diff, false);
        let record = &result.lines[&LineKey::Ghost(42)];
        assert_eq!(record.tla, Tla::Dub);
        assert!(result.lines.get(&LineKey::Current(42)).is_none());
    }

    #[test]
    fn idempotent_categorization() {
        let diagnostics = diag();
        let diff = DiffMap::empty(false);
        let mut curr = FileTrace::default();
        curr.line_hits.insert(1, 1);
        let policy = Policy::default();
        let categorizer = Categorizer::new(&policy, &diagnostics);
        let a = categorizer.categorize("x.rs", None, &curr, &diff, false);
        let b = categorizer.categorize("x.rs", None, &curr, &diff, false);
        assert_eq!(a.lines, b.lines);
    }
}
