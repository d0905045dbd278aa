//! Summary & rollup. Additive aggregation of per-file counts into
//! per-directory and top-level summaries.

use std::collections::HashMap;

use crate::{policy::DateBins, tla::Tla};

/// `per_tla[12]` plus the derived `found`/`hit` totals for one coverage kind
/// (line, branch, or function) at one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CoverageTotals {
    pub per_tla: [u64; crate::tla::TLA_COUNT],
}

impl CoverageTotals {
    pub fn record(&mut self, tla: Tla) {
        self.per_tla[tla.index()] += 1;
    }

    /// `found` sums every TLA with a current-revision location; `hit` sums
    /// the four "covered" TLAs.
    pub fn found(&self) -> u64 {
        (0..crate::tla::TLA_COUNT)
            .filter(|&i| Tla::from_index(i).has_current_location())
            .map(|i| self.per_tla[i])
            .sum()
    }

    pub fn hit(&self) -> u64 {
        (0..crate::tla::TLA_COUNT)
            .filter(|&i| Tla::from_index(i).is_hit())
            .map(|i| self.per_tla[i])
            .sum()
    }

    pub fn append(&mut self, other: &CoverageTotals) {
        for i in 0..crate::tla::TLA_COUNT {
            self.per_tla[i] += other.per_tla[i];
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AgeBinSummary {
    pub totals: CoverageTotals,
}

impl AgeBinSummary {
    pub fn append(&mut self, other: &AgeBinSummary) {
        self.totals.append(&other.totals);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OwnerBin {
    pub totals: CoverageTotals,
}

impl OwnerBin {
    pub fn append(&mut self, other: &OwnerBin) {
        self.totals.append(&other.totals);
    }
}

/// The per-node breakdown for one coverage kind: its grand total plus its
/// age-bin and owner breakdowns.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct KindSummary {
    pub totals: CoverageTotals,
    pub age_bins: Vec<AgeBinSummary>,
    pub owners: HashMap<String, OwnerBin>,
}

impl KindSummary {
    pub fn with_bin_count(bin_count: usize) -> Self {
        KindSummary {
            totals: CoverageTotals::default(),
            age_bins: vec![AgeBinSummary::default(); bin_count],
            owners: HashMap::new(),
        }
    }

    pub fn record(&mut self, tla: Tla, owner: Option<&str>, age_bin: Option<usize>) {
        self.totals.record(tla);
        if let Some(owner) = owner {
            self.owners.entry(owner.to_string()).or_default().totals.record(tla);
        }
        if let Some(bin) = age_bin {
            if let Some(slot) = self.age_bins.get_mut(bin) {
                slot.totals.record(tla);
            }
        }
    }

    /// Strictly additive merge across every field.
    pub fn append(&mut self, child: &KindSummary) {
        self.totals.append(&child.totals);

        if self.age_bins.len() < child.age_bins.len() {
            self.age_bins.resize(child.age_bins.len(), AgeBinSummary::default());
        }
        for (bin, child_bin) in self.age_bins.iter_mut().zip(child.age_bins.iter()) {
            bin.append(child_bin);
        }

        for (owner, child_bin) in &child.owners {
            self.owners.entry(owner.clone()).or_default().append(child_bin);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum NodeKind {
    File,
    Directory,
    Top,
}

/// One node's coverage summary. `parent` is a non-owning name reference
/// rather than a cyclic pointer; it is meaningful only while building the
/// tree and is not consulted once rollup is complete.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Summary {
    pub kind: NodeKind,
    pub name: String,
    pub parent: Option<String>,
    pub line: KindSummary,
    pub branch: KindSummary,
    pub function: KindSummary,
}

impl Summary {
    pub fn new(kind: NodeKind, name: impl Into<String>, date_bins: &DateBins) -> Self {
        let bin_count = date_bins.bin_count();
        Summary {
            kind,
            name: name.into(),
            parent: None,
            line: KindSummary::with_bin_count(bin_count),
            branch: KindSummary::with_bin_count(bin_count),
            function: KindSummary::with_bin_count(bin_count),
        }
    }

    /// Strictly additive merge of a child's fields into this (parent)
    /// summary. Commutative and associative, so task execution order never
    /// affects the result.
    pub fn append(&mut self, child: &Summary) {
        self.line.append(&child.line);
        self.branch.append(&child.branch);
        self.function.append(&child.function);
    }

    /// `hit*1000/found*10 + 2 - 1/found`, collapsing ties on percentage by
    /// total size; `found == 0` returns the sentinel `1000`.
    pub fn rate(totals: &CoverageTotals) -> f64 {
        let found = totals.found();
        if found == 0 {
            return 1000.0;
        }
        let hit = totals.hit() as f64;
        let found = found as f64;
        (hit * 1000.0 / found) * 10.0 + 2.0 - 1.0 / found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::DateBins;

    fn leaf(name: &str, found_hit: &[(Tla, u64)], bins: &DateBins) -> Summary {
        let mut s = Summary::new(NodeKind::File, name, bins);
        for &(tla, n) in found_hit {
            for _ in 0..n {
                s.line.record(tla, None, None);
            }
        }
        s
    }

    #[test]
    fn s6_rollup_sums_two_files() {
        let bins = DateBins::default();
        // file A: found=10 hit=7 -> 7 CBC, 3 UBC
        let a = leaf("a.rs", &[(Tla::Cbc, 7), (Tla::Ubc, 3)], &bins);
        // file B: found=5 hit=5 -> 5 CBC
        let b = leaf("b.rs", &[(Tla::Cbc, 5)], &bins);

        let mut dir = Summary::new(NodeKind::Directory, "dir", &bins);
        dir.append(&a);
        dir.append(&b);

        assert_eq!(dir.line.totals.found(), 15);
        assert_eq!(dir.line.totals.hit(), 12);
        assert_eq!(dir.line.totals.per_tla[Tla::Cbc.index()], 12);
        assert_eq!(dir.line.totals.per_tla[Tla::Ubc.index()], 3);
    }

    #[test]
    fn rate_is_monotone_in_hit_and_sentinel_when_empty() {
        let empty = CoverageTotals::default();
        assert_eq!(Summary::rate(&empty), 1000.0);

        let mut low = CoverageTotals::default();
        low.per_tla[Tla::Cbc.index()] = 1;
        low.per_tla[Tla::Ubc.index()] = 9;
        let mut high = CoverageTotals::default();
        high.per_tla[Tla::Cbc.index()] = 5;
        high.per_tla[Tla::Ubc.index()] = 5;
        assert!(Summary::rate(&high) > Summary::rate(&low));

        let mut full = CoverageTotals::default();
        full.per_tla[Tla::Cbc.index()] = 10;
        assert!(Summary::rate(&full) > Summary::rate(&high));
    }

    #[test]
    fn owner_and_age_bin_breakdowns_are_additive() {
        let bins = DateBins::default();
        let mut a = Summary::new(NodeKind::File, "a.rs", &bins);
        a.line.record(Tla::Cbc, Some("alice"), Some(0));
        let mut b = Summary::new(NodeKind::File, "b.rs", &bins);
        b.line.record(Tla::Cbc, Some("alice"), Some(0));
        b.line.record(Tla::Ubc, Some("bob"), Some(1));

        let mut dir = Summary::new(NodeKind::Directory, "dir", &bins);
        dir.append(&a);
        dir.append(&b);

        assert_eq!(dir.line.owners["alice"].totals.per_tla[Tla::Cbc.index()], 2);
        assert_eq!(dir.line.owners["bob"].totals.per_tla[Tla::Ubc.index()], 1);
        assert_eq!(dir.line.age_bins[0].totals.per_tla[Tla::Cbc.index()], 2);
        assert_eq!(dir.line.age_bins[1].totals.per_tla[Tla::Ubc.index()], 1);
    }
}
