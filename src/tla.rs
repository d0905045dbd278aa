//! The closed twelve-element coverage category set ("TLA", three-letter
//! abbreviation), and the pure functions that assign it.

use strum_macros::{Display, EnumIter, EnumString};

use crate::diffmap::ChunkKind;

/// One of the twelve coverage categories a coverpoint (line, branch, or
/// function) can be assigned.
#[derive(Debug, Display, EnumString, EnumIter, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tla {
    /// Gained New Coverage: inserted, hit in current.
    Gnc,
    /// Uncovered New Code: inserted, not hit in current.
    Unc,
    /// Gained Included Coverage: only in current (no diff/baseline), hit.
    Gic,
    /// Uncovered Included Code: only in current, not hit.
    Uic,
    /// Covered Baseline Code: present in both, hit in both.
    Cbc,
    /// Gain Baseline Coverage: present in both, hit now but not before.
    Gbc,
    /// Lost Baseline Coverage: present in both, hit before but not now.
    Lbc,
    /// Uncovered Baseline Code: present in both, never hit.
    Ubc,
    /// Excluded Covered Baseline: only in baseline (unreachable now), was hit.
    Ecb,
    /// Excluded Uncovered Baseline: only in baseline (unreachable now), never hit.
    Eub,
    /// Deleted Covered Baseline: removed by the diff, was hit.
    Dcb,
    /// Deleted Uncovered Baseline: removed by the diff, never hit.
    Dub,
}

/// Total number of [`Tla`] variants. Kept in sync with the enum by a unit
/// test below; `Summary::per_tla` arrays are sized to this constant.
pub const TLA_COUNT: usize = 12;

impl Tla {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Self {
        use Tla::*;
        const ALL: [Tla; TLA_COUNT] = [
            Gnc, Unc, Gic, Uic, Cbc, Gbc, Lbc, Ubc, Ecb, Eub, Dcb, Dub,
        ];
        ALL[i]
    }

    /// True iff the coverpoint has a line number in the current revision.
    /// This gates whether a coverpoint with this TLA appears in the
    /// source-detail view.
    pub fn has_current_location(self) -> bool {
        !matches!(self, Tla::Ecb | Tla::Eub | Tla::Dcb | Tla::Dub)
    }

    /// True for the four "hit" categories that contribute to `Summary.hit`.
    pub fn is_hit(self) -> bool {
        matches!(self, Tla::Cbc | Tla::Gbc | Tla::Gic | Tla::Gnc)
    }

    pub fn is_baseline_only(self) -> bool {
        matches!(self, Tla::Ecb | Tla::Eub)
    }

    pub fn is_deleted(self) -> bool {
        matches!(self, Tla::Dcb | Tla::Dub)
    }
}

/// An `equal`-chunk line/branch present on both sides.
fn categorize_pair(base: u32, curr: u32) -> Tla {
    match (base > 0, curr > 0) {
        (true, true) => Tla::Cbc,
        (false, true) => Tla::Gbc,
        (true, false) => Tla::Lbc,
        (false, false) => Tla::Ubc,
    }
}

/// The side of a diff chunk a coverpoint was only found on, used for the
/// `equal, only-base` / `equal, only-curr` cases — a line counted in one
/// revision's trace but absent from the other, despite the diff calling the
/// chunk `equal` (e.g. a line added to the trace's source snapshot but not
/// to the one the diff describes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Both { base: u32, curr: u32 },
    OnlyBase { base: u32 },
    OnlyCurr { curr: u32 },
}

/// Assigns the TLA for one coverpoint given its diff chunk kind and its
/// hit presence on each side.
pub fn assign_tla(kind: ChunkKind, presence: Presence) -> Tla {
    match (kind, presence) {
        (ChunkKind::Insert, Presence::OnlyCurr { curr }) => {
            if curr > 0 {
                Tla::Gnc
            } else {
                Tla::Unc
            }
        }
        (ChunkKind::Delete, Presence::OnlyBase { base }) => {
            if base > 0 {
                Tla::Dcb
            } else {
                Tla::Dub
            }
        }
        (ChunkKind::Equal, Presence::Both { base, curr }) => categorize_pair(base, curr),
        (ChunkKind::Equal, Presence::OnlyBase { base }) => {
            if base > 0 {
                Tla::Ecb
            } else {
                Tla::Eub
            }
        }
        (ChunkKind::Equal, Presence::OnlyCurr { curr }) => {
            if curr > 0 {
                Tla::Gic
            } else {
                Tla::Uic
            }
        }
        // The remaining combinations (e.g. `Insert` with baseline data, or
        // `Delete` with current data) indicate the trace and diff disagree
        // about which revision a line belongs to. The categorizer raises an
        // `inconsistent` diagnostic before ever calling this function with
        // such a combination; this arm exists so the match is exhaustive and
        // falls back to the most conservative read of the coverpoint.
        (ChunkKind::Insert, _) | (_, Presence::Both { .. }) => Tla::Unc,
        (ChunkKind::Delete, _) => Tla::Dub,
    }
}

/// §4.3 "new file as baseline": remap ratcheting-unfriendly TLAs once it's
/// been decided that a file should be treated as though it existed at
/// baseline time.
pub fn remap_new_file_as_baseline(tla: Tla) -> Tla {
    match tla {
        Tla::Uic => Tla::Ubc,
        Tla::Gic => Tla::Cbc,
        other => other,
    }
}
