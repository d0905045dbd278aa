//! Per-line/branch/function records, and the `SourceFile` constructor that
//! joins annotation to categorization and builds the category/owner/age-bin
//! indices.

use std::collections::{BTreeMap, HashMap};

use crate::{
    annotate::AnnotatedLine,
    diagnostics::{DiagnosticKind, DiagnosticSink},
    diffmap::ChunkKind,
    policy::DateBins,
    summary::Summary,
    tla::Tla,
};

/// A per-file line-table key. Deleted baseline lines are keyed separately
/// from current lines rather than trying to overload the current line
/// number space with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LineKey {
    Current(u32),
    Ghost(u32),
}

impl LineKey {
    pub fn current_lineno(self) -> Option<u32> {
        match self {
            LineKey::Current(l) => Some(l),
            LineKey::Ghost(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchSubrecord {
    pub block_id: u32,
    pub branch_id: u32,
    pub base_count: Option<u64>,
    pub curr_count: Option<u64>,
    pub tla: Tla,
    pub expr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRecord {
    pub kind: ChunkKind,
    pub base_lineno: Option<u32>,
    pub curr_lineno: Option<u32>,
    pub base_count: Option<u64>,
    pub curr_count: Option<u64>,
    pub branches: Vec<BranchSubrecord>,
    pub tla: Tla,
}

impl LineRecord {
    /// `kind = Delete` implies `base_lineno` present and `curr_lineno` absent,
    /// symmetrically for `Insert`; for `Equal`, both line numbers are present.
    pub fn check_invariant(&self) -> bool {
        match self.kind {
            ChunkKind::Delete => self.base_lineno.is_some() && self.curr_lineno.is_none() && self.curr_count.is_none(),
            ChunkKind::Insert => self.curr_lineno.is_some() && self.base_lineno.is_none() && self.base_count.is_none(),
            ChunkKind::Equal => self.base_lineno.is_some() && self.curr_lineno.is_some(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionAlias {
    pub hits: u64,
    pub tla: Option<Tla>,
}

/// A function identified by a representative `leader` name once aliases
/// (same-source-location instantiations, e.g. templates) are merged. Never
/// flatten `aliases` into separate top-level functions — rollup depends on
/// the leader invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRecord {
    pub name: String,
    pub file: String,
    pub line: Option<u32>,
    pub hit_count: u64,
    pub tla: Tla,
    pub aliases: HashMap<String, FunctionAlias>,
}

#[derive(Debug, Clone)]
pub struct SourceLine {
    pub no: u32,
    pub text: String,
    pub owner: Option<String>,
    pub age: Option<u32>,
    pub tla: Option<Tla>,
    pub branches: Vec<BranchSubrecord>,
    pub function: Option<String>,
}

/// Indices kept strictly increasing so "next after L" can be answered by
/// binary search.
#[derive(Debug, Clone, Default)]
pub struct OwnerIndex {
    pub lines: Vec<u32>,
    pub by_tla: HashMap<Tla, Vec<u32>>,
}

/// One current-revision file: constructed once all per-line TLAs are known,
/// mutated only inside the constructor, read-only afterwards.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: String,
    pub lines: Vec<SourceLine>,
    pub by_category: HashMap<Tla, Vec<u32>>,
    pub by_category_branch: HashMap<Tla, Vec<u32>>,
    pub by_owner: HashMap<String, OwnerIndex>,
    pub by_owner_branch: HashMap<String, OwnerIndex>,
    pub summary: Summary,
}

impl SourceFile {
    /// Walks the `LineRecord` map in ascending line order (ghosts last, so
    /// they don't perturb the visible index) and builds every index in one
    /// pass.
    pub fn build(
        path: &str,
        records: &BTreeMap<LineKey, LineRecord>,
        functions: &[FunctionRecord],
        annotations: &HashMap<u32, AnnotatedLine>,
        date_bins: &DateBins,
        diagnostics: &DiagnosticSink,
    ) -> SourceFile {
        let mut summary = Summary::new(crate::summary::NodeKind::File, path, date_bins);
        let mut lines: Vec<SourceLine> = Vec::new();
        let mut by_category: HashMap<Tla, Vec<u32>> = HashMap::new();
        let mut by_category_branch: HashMap<Tla, Vec<u32>> = HashMap::new();
        let mut by_owner: HashMap<String, OwnerIndex> = HashMap::new();
        let mut by_owner_branch: HashMap<String, OwnerIndex> = HashMap::new();

        let mut ordered: Vec<(&LineKey, &LineRecord)> = records.iter().collect();
        // Current lines first (in ascending order), ghosts last: `Ord` on
        // `LineKey` already sorts `Current(_)` before `Ghost(_)` by variant
        // discriminant, and ascending within each, so a plain sort suffices.
        ordered.sort_by_key(|(k, _)| **k);

        for (key, record) in ordered {
            if !record.check_invariant() {
                let _ = diagnostics.raise(
                    DiagnosticKind::Category,
                    format!("line record invariant violated for {key:?}"),
                    Some(path.to_string()),
                );
            }

            let Some(curr_lineno) = key.current_lineno() else {
                // Ghost (deleted baseline) line: counted in totals, not in
                // the visible source/index. `record()` is never called for
                // it, so totals are updated directly here.
                summary.line.totals.record(record.tla);
                for branch in &record.branches {
                    summary.branch.totals.record(branch.tla);
                }
                continue;
            };

            let annotation = annotations.get(&curr_lineno);
            let owner = annotation.map(|a| a.author.clone());
            let age = annotation.map(|a| a.age_in_days);
            let age_bin = age.map(|a| date_bins.bin_of(a));

            by_category.entry(record.tla).or_default().push(curr_lineno);
            if let Some(owner) = &owner {
                let idx = by_owner.entry(owner.clone()).or_default();
                idx.lines.push(curr_lineno);
                idx.by_tla.entry(record.tla).or_default().push(curr_lineno);
            }
            summary.line.record(record.tla, owner.as_deref(), age_bin);

            for branch in &record.branches {
                by_category_branch.entry(branch.tla).or_default().push(curr_lineno);
                if let Some(owner) = &owner {
                    let idx = by_owner_branch.entry(owner.clone()).or_default();
                    idx.lines.push(curr_lineno);
                    idx.by_tla.entry(branch.tla).or_default().push(curr_lineno);
                }
                summary.branch.record(branch.tla, owner.as_deref(), age_bin);
            }

            let function_name = functions
                .iter()
                .find(|f| f.line == Some(curr_lineno))
                .map(|f| f.name.clone());

            lines.push(SourceLine {
                no: curr_lineno,
                text: annotation.map(|a| a.text.clone()).unwrap_or_default(),
                owner,
                age,
                tla: Some(record.tla),
                branches: record.branches.clone(),
                function: function_name,
            });
        }

        for function in functions {
            let owner = function
                .line
                .and_then(|l| annotations.get(&l))
                .map(|a| a.author.clone());
            let age_bin = function
                .line
                .and_then(|l| annotations.get(&l))
                .map(|a| date_bins.bin_of(a.age_in_days));
            summary.function.record(function.tla, owner.as_deref(), age_bin);
        }

        for idx in by_category.values_mut() {
            idx.sort_unstable();
        }
        for idx in by_category_branch.values_mut() {
            idx.sort_unstable();
        }
        for owner_idx in by_owner.values_mut() {
            owner_idx.lines.sort_unstable();
            for v in owner_idx.by_tla.values_mut() {
                v.sort_unstable();
            }
        }
        for owner_idx in by_owner_branch.values_mut() {
            owner_idx.lines.sort_unstable();
            for v in owner_idx.by_tla.values_mut() {
                v.sort_unstable();
            }
        }

        SourceFile {
            path: path.to_string(),
            lines,
            by_category,
            by_category_branch,
            by_owner,
            by_owner_branch,
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diffmap::ChunkKind;

    fn line_record(kind: ChunkKind, curr: Option<u32>, base: Option<u32>, tla: Tla) -> LineRecord {
        LineRecord {
            kind,
            base_lineno: base,
            curr_lineno: curr,
            base_count: None,
            curr_count: None,
            branches: Vec::new(),
            tla,
        }
    }

    #[test]
    fn s4_deletion_produces_ghost_not_in_current_index() {
        let mut records = BTreeMap::new();
        records.insert(
            LineKey::Ghost(42),
            line_record(ChunkKind::Delete, None, Some(42), Tla::Dub),
        );
        let diagnostics = DiagnosticSink::new(Default::default(), None);
        let file = SourceFile::build(
            "f.rs",
            &records,
            &[],
            &HashMap::new(),
            &DateBins::default(),
            &diagnostics,
        );
        assert_eq!(file.summary.line.totals.per_tla[Tla::Dub.index()], 1);
        assert!(file.lines.is_empty());
        assert!(file.by_category.get(&Tla::Dub).is_none());
    }

    #[test]
    fn by_category_index_is_strictly_increasing() {
        let mut records = BTreeMap::new();
        records.insert(
            LineKey::Current(5),
            line_record(ChunkKind::Insert, Some(5), None, Tla::Gnc),
        );
        records.insert(
            LineKey::Current(2),
            line_record(ChunkKind::Insert, Some(2), None, Tla::Gnc),
        );
        let diagnostics = DiagnosticSink::new(Default::default(), None);
        let file = SourceFile::build(
            "f.rs",
            &records,
            &[],
            &HashMap::new(),
            &DateBins::default(),
            &diagnostics,
        );
        let idx = &file.by_category[&Tla::Gnc];
        assert_eq!(idx, &vec![2, 5]);
        assert!(idx.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn invariant_violation_raises_category_diagnostic() {
        let mut records = BTreeMap::new();
        // Violates: delete kind but curr_count present.
        let mut bad = line_record(ChunkKind::Delete, None, Some(1), Tla::Dub);
        bad.curr_count = Some(1);
        records.insert(LineKey::Ghost(1), bad);
        let diagnostics = DiagnosticSink::new(Default::default(), None);
        SourceFile::build("f.rs", &records, &[], &HashMap::new(), &DateBins::default(), &diagnostics);
        assert_eq!(diagnostics.recorded().len(), 1);
    }
}
