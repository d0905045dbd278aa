//! Navigation index. For each `(file, category)`, `(file, category,
//! owner)`, and `(file, category, age-bin)` — and the branch analogues —
//! answers "next occurrence after L" via binary search over the strictly
//! increasing indices `SourceFile` already built.

use crate::{
    model::SourceFile,
    policy::DateBins,
    tla::Tla,
};

/// The result of a "next after L" query: either a concrete line, or "top"
/// (nothing further in the file).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Line(u32),
    Top,
}

fn first_after(sorted: &[u32], after: Option<u32>) -> Option<usize> {
    let cutoff = after.unwrap_or(0);
    let idx = sorted.partition_point(|&l| l <= cutoff);
    (idx < sorted.len()).then_some(idx)
}

pub struct NavigationIndex<'a> {
    file: &'a SourceFile,
}

impl<'a> NavigationIndex<'a> {
    pub fn new(file: &'a SourceFile) -> Self {
        NavigationIndex { file }
    }

    /// Next "block" of consecutive lines sharing `tla`, coalescing runs so
    /// the detail view doesn't repeat itself line by line. Since
    /// `SourceFile::lines` already omits non-coverage text, adjacency in
    /// that vector already encodes "non-code lines don't break a block".
    pub fn next_tla_group(&self, tla: Tla, after: Option<u32>) -> Next {
        let lines = &self.file.lines;
        let Some(start_idx) = first_after(
            &lines.iter().map(|l| l.no).collect::<Vec<_>>(),
            after,
        ) else {
            return Next::Top;
        };

        for idx in start_idx..lines.len() {
            if lines[idx].tla != Some(tla) {
                continue;
            }
            let is_block_start = idx == 0 || lines[idx - 1].tla != Some(tla);
            if is_block_start {
                return Next::Line(lines[idx].no);
            }
        }
        Next::Top
    }

    /// Branches never coalesce into blocks: every line whose
    /// branch set contains `tla` is its own occurrence.
    pub fn next_branch_group(&self, tla: Tla, after: Option<u32>) -> Next {
        let matches: Vec<u32> = self
            .file
            .lines
            .iter()
            .filter(|l| l.branches.iter().any(|b| b.tla == tla))
            .map(|l| l.no)
            .collect();
        match first_after(&matches, after) {
            Some(idx) => Next::Line(matches[idx]),
            None => Next::Top,
        }
    }

    pub fn next_in_date_bin(&self, date_bins: &DateBins, bin: usize, tla: Tla, after: Option<u32>) -> Next {
        let matches: Vec<u32> = self
            .file
            .lines
            .iter()
            .filter(|l| l.tla == Some(tla) && l.age.is_some_and(|a| date_bins.bin_of(a) == bin))
            .map(|l| l.no)
            .collect();
        match first_after(&matches, after) {
            Some(idx) => Next::Line(matches[idx]),
            None => Next::Top,
        }
    }

    pub fn next_in_owner_bin(&self, owner: &str, tla: Tla, after: Option<u32>) -> Next {
        match self.file.by_owner.get(owner).and_then(|idx| idx.by_tla.get(&tla)) {
            Some(list) => match first_after(list, after) {
                Some(i) => Next::Line(list[i]),
                None => Next::Top,
            },
            None => Next::Top,
        }
    }

    pub fn next_branch_in_date_bin(&self, date_bins: &DateBins, bin: usize, tla: Tla, after: Option<u32>) -> Next {
        let matches: Vec<u32> = self
            .file
            .lines
            .iter()
            .filter(|l| {
                l.age.is_some_and(|a| date_bins.bin_of(a) == bin) && l.branches.iter().any(|b| b.tla == tla)
            })
            .map(|l| l.no)
            .collect();
        match first_after(&matches, after) {
            Some(idx) => Next::Line(matches[idx]),
            None => Next::Top,
        }
    }

    pub fn next_branch_in_owner_bin(&self, owner: &str, tla: Tla, after: Option<u32>) -> Next {
        match self.file.by_owner_branch.get(owner).and_then(|idx| idx.by_tla.get(&tla)) {
            Some(list) => match first_after(list, after) {
                Some(i) => Next::Line(list[i]),
                None => Next::Top,
            },
            None => Next::Top,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        diagnostics::DiagnosticSink,
        model::{LineKey, LineRecord},
    };
    use std::collections::{BTreeMap, HashMap};

    fn build(records: Vec<(u32, Tla)>) -> SourceFile {
        let mut map = BTreeMap::new();
        for (lineno, tla) in records {
            map.insert(
                LineKey::Current(lineno),
                LineRecord {
                    kind: crate::diffmap::ChunkKind::Insert,
                    base_lineno: None,
                    curr_lineno: Some(lineno),
                    base_count: None,
                    curr_count: None,
                    branches: Vec::new(),
                    tla,
                },
            );
        }
        let diagnostics = DiagnosticSink::new(Default::default(), None);
        SourceFile::build("f.rs", &map, &[], &HashMap::new(), &DateBins::default(), &diagnostics)
    }

    #[test]
    fn next_tla_group_skips_within_a_block() {
        let file = build(vec![(1, Tla::Gnc), (2, Tla::Gnc), (3, Tla::Unc), (5, Tla::Gnc)]);
        let nav = NavigationIndex::new(&file);
        // Starting before the file, the first GNC block starts at line 1.
        assert_eq!(nav.next_tla_group(Tla::Gnc, None), Next::Line(1));
        // From inside the first block, the next GNC occurrence is the next
        // block's start (line 5), not line 2.
        assert_eq!(nav.next_tla_group(Tla::Gnc, Some(1)), Next::Line(5));
        assert_eq!(nav.next_tla_group(Tla::Unc, Some(3)), Next::Top);
    }

    #[test]
    fn next_in_owner_bin_uses_binary_search_over_sorted_index() {
        let mut map = BTreeMap::new();
        for lineno in [1u32, 4, 9] {
            map.insert(
                LineKey::Current(lineno),
                LineRecord {
                    kind: crate::diffmap::ChunkKind::Insert,
                    base_lineno: None,
                    curr_lineno: Some(lineno),
                    base_count: None,
                    curr_count: None,
                    branches: Vec::new(),
                    tla: Tla::Gnc,
                },
            );
        }
        let mut annotations = HashMap::new();
        for lineno in [1u32, 4, 9] {
            annotations.insert(
                lineno,
                crate::annotate::AnnotatedLine {
                    commit_id: "c".into(),
                    author: "alice".into(),
                    age_in_days: 1,
                    text: String::new(),
                },
            );
        }
        let diagnostics = DiagnosticSink::new(Default::default(), None);
        let file = SourceFile::build("f.rs", &map, &[], &annotations, &DateBins::default(), &diagnostics);
        let nav = NavigationIndex::new(&file);
        assert_eq!(nav.next_in_owner_bin("alice", Tla::Gnc, Some(2)), Next::Line(4));
        assert_eq!(nav.next_in_owner_bin("alice", Tla::Gnc, Some(9)), Next::Top);
    }
}
