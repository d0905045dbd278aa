//! A single immutable configuration value built once and passed by reference
//! to every component.

use std::collections::HashMap;

use serde::Deserialize;

use crate::diagnostics::{DiagnosticKind, DiagnosticPolicy};

/// Ordered cutpoints `c1 < c2 < ... < cn` partitioning `age_in_days` into
/// `n+1` half-open bins: `[..c1], (c1,c2], ..., (cn,..)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateBins(Vec<u32>);

impl DateBins {
    pub fn new(mut cutpoints: Vec<u32>) -> Self {
        cutpoints.sort_unstable();
        cutpoints.dedup();
        DateBins(cutpoints)
    }

    pub fn bin_count(&self) -> usize {
        self.0.len() + 1
    }

    /// Which of the `n+1` bins `age_in_days` falls into.
    pub fn bin_of(&self, age_in_days: u32) -> usize {
        self.0
            .iter()
            .position(|&cutpoint| age_in_days <= cutpoint)
            .unwrap_or(self.0.len())
    }

    pub fn cutpoints(&self) -> &[u32] {
        &self.0
    }
}

impl Default for DateBins {
    /// The documented default: `7,30,180`.
    fn default() -> Self {
        DateBins::new(vec![7, 30, 180])
    }
}

impl std::str::FromStr for DateBins {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cutpoints = s
            .split(',')
            .map(|piece| piece.trim().parse())
            .collect::<Result<Vec<u32>, _>>()?;
        Ok(DateBins::new(cutpoints))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeShape {
    /// Two-level view: top -> files, no intermediate directory nodes.
    Flat,
    /// Multi-level directory tree.
    Hierarchical,
}

/// Everything the core engine cares about. Options that only affect the
/// out-of-scope CLI/ingest layer (`omit_lines`, `exclude`, `include`,
/// `substitute`) are intentionally absent; they're applied before data
/// reaches this engine.
#[derive(Debug, Clone)]
pub struct Policy {
    pub differential: bool,
    pub date_bins: DateBins,
    pub function_coverage: bool,
    pub branch_coverage: bool,
    pub tree_shape: TreeShape,
    pub elide_path_mismatch: bool,
    pub new_file_as_baseline: bool,
    pub parallel: usize,
    pub memory_cap_mb: Option<u64>,
    pub diagnostic_policies: HashMap<DiagnosticKind, DiagnosticPolicy>,
    pub max_message_count: Option<usize>,
    pub function_alias_filter: bool,
    pub preserve_worker_output: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Policy {
            differential: false,
            date_bins: DateBins::default(),
            function_coverage: true,
            branch_coverage: true,
            tree_shape: TreeShape::Hierarchical,
            elide_path_mismatch: false,
            new_file_as_baseline: false,
            parallel: 0,
            memory_cap_mb: None,
            diagnostic_policies: HashMap::new(),
            max_message_count: None,
            function_alias_filter: true,
            preserve_worker_output: false,
        }
    }
}

impl Policy {
    /// Worker count after resolving `0` to host concurrency.
    pub fn resolved_parallelism(&self) -> usize {
        if self.parallel == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.parallel
        }
    }
}

/// A serde-friendly mirror of [`Policy`] for loading from TOML, since
/// `Policy` itself carries a couple of non-`Deserialize` fields
/// (`HashMap<DiagnosticKind, _>` needs string keys on the wire).
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct RawPolicy {
    pub baseline_file: Option<String>,
    pub diff_file: Option<String>,
    pub date_bins: Option<String>,
    pub function_coverage: Option<bool>,
    pub branch_coverage: Option<bool>,
    pub hierarchical: Option<bool>,
    pub elide_path_mismatch: Option<bool>,
    pub new_file_as_baseline: Option<bool>,
    pub parallel: Option<usize>,
    pub memory: Option<u64>,
    pub max_message_count: Option<usize>,
}

impl RawPolicy {
    /// Resolves a config-file-shaped [`RawPolicy`] into a [`Policy`]. This is
    /// a pure function over already-loaded text; the actual file I/O and CLI
    /// flag merging live outside the core.
    pub fn into_policy(self) -> crate::error::Result<Policy> {
        let mut policy = Policy {
            differential: self.baseline_file.is_some(),
            ..Policy::default()
        };
        if let Some(bins) = self.date_bins {
            policy.date_bins = bins
                .parse()
                .map_err(|e| crate::error::CovError::ConfigError(format!("bad date_bins: {e}")))?;
        }
        if let Some(v) = self.function_coverage {
            policy.function_coverage = v;
        }
        if let Some(v) = self.branch_coverage {
            policy.branch_coverage = v;
        }
        if let Some(v) = self.hierarchical {
            policy.tree_shape = if v { TreeShape::Hierarchical } else { TreeShape::Flat };
        }
        if let Some(v) = self.elide_path_mismatch {
            policy.elide_path_mismatch = v;
        }
        if let Some(v) = self.new_file_as_baseline {
            policy.new_file_as_baseline = v;
        }
        if let Some(v) = self.parallel {
            policy.parallel = v;
        }
        policy.memory_cap_mb = self.memory.filter(|&m| m != 0);
        policy.max_message_count = self.max_message_count;
        Ok(policy)
    }
}

/// Parses a TOML config string into a [`Policy`]. See [`RawPolicy`].
pub fn from_toml(text: &str) -> crate::error::Result<Policy> {
    let raw: RawPolicy =
        toml::from_str(text).map_err(|e| crate::error::CovError::ConfigError(e.to_string()))?;
    raw.into_policy()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_date_bins_match_documented_default() {
        let bins = DateBins::default();
        assert_eq!(bins.cutpoints(), &[7, 30, 180]);
        assert_eq!(bins.bin_count(), 4);
    }

    #[test]
    fn s5_age_bin_placement() {
        let bins = DateBins::default();
        assert_eq!(bins.bin_of(3), 0);
        assert_eq!(bins.bin_of(20), 1);
        assert_eq!(bins.bin_of(200), 3);
        assert_eq!(bins.bin_of(7), 0);
        assert_eq!(bins.bin_of(8), 1);
    }

    #[test]
    fn parallel_zero_resolves_to_some_positive_count() {
        let policy = Policy::default();
        assert!(policy.resolved_parallelism() >= 1);
    }

    #[test]
    fn raw_policy_from_toml() {
        let policy = from_toml("date_bins = \"1,2,3\"\nparallel = 4\n").unwrap();
        assert_eq!(policy.date_bins.cutpoints(), &[1, 2, 3]);
        assert_eq!(policy.parallel, 4);
        assert!(!policy.differential);
    }
}
