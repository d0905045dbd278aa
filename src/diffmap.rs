//! DiffMap. Ingests a unified diff and exposes, per file, the partition
//! of line numbers into `{equal, insert, delete}` chunks and the bijection
//! between baseline ("old") and current ("new") line numbers where defined.

use std::{collections::HashMap, ops::Range};

use winnow::{
    ascii::digit1,
    combinator::{opt, preceded},
    PResult, Parser,
};

use crate::diagnostics::{DiagnosticKind, DiagnosticSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Old,
    New,
}

impl Side {
    fn other(self) -> Side {
        match self {
            Side::Old => Side::New,
            Side::New => Side::Old,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Equal,
    Insert,
    Delete,
}

/// One non-overlapping partition of `[1..)`. `old_range` is empty iff
/// `kind == Insert`; `new_range` is empty iff `kind == Delete`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub kind: ChunkKind,
    pub old_range: Range<u32>,
    pub new_range: Range<u32>,
}

impl Chunk {
    fn range(&self, side: Side) -> &Range<u32> {
        match side {
            Side::Old => &self.old_range,
            Side::New => &self.new_range,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct FileDiff {
    baseline_path: Option<String>,
    /// Sorted, non-overlapping, ascending by both ranges.
    chunks: Vec<Chunk>,
}

impl FileDiff {
    fn chunk_containing(&self, side: Side, line: u32) -> Option<&Chunk> {
        self.chunks.iter().find(|c| {
            let r = c.range(side);
            !r.is_empty() && r.start <= line && line < r.end
        })
    }
}

/// Ingests a unified diff and answers per-line, per-file queries about how
/// baseline and current revisions relate.
pub struct DiffMap {
    files: HashMap<String, FileDiff>,
    /// Whether a diff was actually loaded (as opposed to differential mode
    /// running without one, relying on a baseline trace alone).
    loaded: bool,
    /// Whether a baseline trace is configured, independent of whether a diff
    /// was loaded. Drives the no-diff fallback in [`DiffMap::kind`].
    has_baseline_trace: bool,
}

impl DiffMap {
    /// A `DiffMap` with no diff loaded. `has_baseline_trace` should reflect
    /// whether a baseline trace is configured, since it changes the
    /// no-diff fallback behavior of [`DiffMap::kind`].
    pub fn empty(has_baseline_trace: bool) -> Self {
        DiffMap {
            files: HashMap::new(),
            loaded: false,
            has_baseline_trace,
        }
    }

    /// Parses a unified diff. An empty diff is not an error: it is recorded
    /// as an `empty` diagnostic and the map behaves as though no
    /// diff were loaded.
    pub fn load(
        text: &str,
        strip_components: usize,
        has_baseline_trace: bool,
        diagnostics: &DiagnosticSink,
    ) -> crate::error::Result<Self> {
        let parsed = parse_unified_diff(text, strip_components)
            .map_err(|e| crate::error::CovError::DiffParseError(e))?;

        if parsed.is_empty() {
            let _ = diagnostics.raise(DiagnosticKind::Empty, "diff contains no differences", None);
            return Ok(DiffMap::empty(has_baseline_trace));
        }

        let mut files = HashMap::new();
        for file in parsed {
            files.insert(
                file.current_path.clone(),
                FileDiff {
                    baseline_path: file.baseline_path,
                    chunks: file.chunks,
                },
            );
        }

        Ok(DiffMap {
            files,
            loaded: true,
            has_baseline_trace,
        })
    }

    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn baseline_path(&self, current: &str) -> Option<&str> {
        self.files
            .get(current)
            .and_then(|f| f.baseline_path.as_deref())
    }

    /// Looks up the chunk kind containing `line` on the given `side` of `file`.
    pub fn kind(&self, file: &str, side: Side, line: u32) -> ChunkKind {
        match self.files.get(file).and_then(|f| f.chunk_containing(side, line)) {
            Some(chunk) => chunk.kind,
            None if self.has_baseline_trace => ChunkKind::Equal,
            None => ChunkKind::Insert,
        }
    }

    /// Within the chunk containing
    /// `line`, returns the corresponding line on the opposite side, or the
    /// (empty) sibling range's boundary if the chunk has no sibling line
    /// (an insert or delete chunk).
    pub fn lookup(&self, file: &str, side: Side, line: u32) -> u32 {
        let Some(chunk) = self.files.get(file).and_then(|f| f.chunk_containing(side, line)) else {
            return line;
        };
        let src = chunk.range(side);
        let dst = chunk.range(side.other());
        if dst.is_empty() {
            dst.start
        } else {
            dst.start + (line - src.start)
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// §4.1 path consistency check: for trace files that appear on only one
    /// side and whose basename (but not full path) matches some diff entry,
    /// emit a `path` diagnostic with every candidate. If exactly one
    /// candidate exists and `elide_path_mismatch` is enabled, remap the diff
    /// entry onto the trace path and return the number of remaps performed.
    pub fn reconcile_path_mismatches(
        &mut self,
        trace_only_paths: &[String],
        elide_path_mismatch: bool,
        diagnostics: &DiagnosticSink,
    ) -> usize {
        let mut remapped = 0;
        for trace_path in trace_only_paths {
            let basename = basename_of(trace_path);
            let candidates: Vec<String> = self
                .files
                .keys()
                .filter(|diff_path| {
                    diff_path.as_str() != trace_path.as_str() && basename_of(diff_path) == basename
                })
                .cloned()
                .collect();

            if candidates.is_empty() {
                continue;
            }

            let _ = diagnostics.raise(
                DiagnosticKind::Path,
                format!("basename-only match candidates: {candidates:?}"),
                Some(trace_path.clone()),
            );

            if elide_path_mismatch && candidates.len() == 1 {
                if let Some(entry) = self.files.remove(&candidates[0]) {
                    self.files.insert(trace_path.clone(), entry);
                    remapped += 1;
                }
            }
        }
        remapped
    }
}

fn basename_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

struct ParsedFileDiff {
    current_path: String,
    baseline_path: Option<String>,
    chunks: Vec<Chunk>,
}

/// Parses a `diff -u` stream into per-file chunk lists. Malformed hunk
/// headers are recorded via the returned `Err` and treated as an ignorable
/// diagnostic by the caller; an individual malformed hunk simply terminates
/// that file's parse, it does not abort the whole diff.
fn parse_unified_diff(text: &str, strip: usize) -> Result<Vec<ParsedFileDiff>, String> {
    let mut files = Vec::new();
    let mut lines = text.lines().peekable();

    while let Some(line) = lines.next() {
        if let Some(rest) = line.strip_prefix("=== ") {
            // Identical-in-both-revisions marker; no chunks to record.
            files.push(ParsedFileDiff {
                current_path: strip_path(rest.trim(), strip),
                baseline_path: Some(strip_path(rest.trim(), strip)),
                chunks: Vec::new(),
            });
            continue;
        }

        if !line.starts_with("--- ") {
            continue;
        }
        let old_path = strip_path(old_new_path(line), strip);

        let Some(new_line) = lines.next() else {
            break;
        };
        if !new_line.starts_with("+++ ") {
            return Err(format!("expected '+++' after '---', got: {new_line}"));
        }
        let new_path = strip_path(old_new_path(new_line), strip);

        let mut chunks = Vec::new();
        let mut old_cursor: u32 = 1;
        let mut new_cursor: u32 = 1;

        while let Some(&peeked) = lines.peek() {
            if !peeked.starts_with("@@") {
                break;
            }
            let hunk_line = lines.next().unwrap();
            let (old_start, old_count, new_start, new_count) = parse_hunk_header(hunk_line)
                .map_err(|e| format!("malformed hunk header '{hunk_line}': {e}"))?;

            // Any gap between the previous hunk and this one is an
            // unrepresented `equal` chunk spanning both revisions 1:1.
            if old_start > old_cursor {
                let gap = old_start - old_cursor;
                chunks.push(Chunk {
                    kind: ChunkKind::Equal,
                    old_range: old_cursor..old_cursor + gap,
                    new_range: new_cursor..new_cursor + gap,
                });
                old_cursor += gap;
                new_cursor += gap;
            }

            let mut old_left = old_count;
            let mut new_left = new_count;
            while old_left > 0 || new_left > 0 {
                let Some(&content) = lines.peek() else {
                    break;
                };
                if content.starts_with("@@") || content.starts_with("--- ") || content.starts_with("=== ") {
                    break;
                }
                let content = lines.next().unwrap();
                let tag = content.chars().next().unwrap_or(' ');
                match tag {
                    ' ' => {
                        chunks.push(Chunk {
                            kind: ChunkKind::Equal,
                            old_range: old_cursor..old_cursor + 1,
                            new_range: new_cursor..new_cursor + 1,
                        });
                        old_cursor += 1;
                        new_cursor += 1;
                        old_left = old_left.saturating_sub(1);
                        new_left = new_left.saturating_sub(1);
                    }
                    '-' => {
                        chunks.push(Chunk {
                            kind: ChunkKind::Delete,
                            old_range: old_cursor..old_cursor + 1,
                            new_range: new_cursor..new_cursor,
                        });
                        old_cursor += 1;
                        old_left = old_left.saturating_sub(1);
                    }
                    '+' => {
                        chunks.push(Chunk {
                            kind: ChunkKind::Insert,
                            old_range: old_cursor..old_cursor,
                            new_range: new_cursor..new_cursor + 1,
                        });
                        new_cursor += 1;
                        new_left = new_left.saturating_sub(1);
                    }
                    '\\' => {
                        // "\ No newline at end of file" - not a content line.
                    }
                    _ => return Err(format!("unexpected diff line: {content}")),
                }
            }
            let _ = (old_start, new_start);
        }

        chunks.sort_by(|a, b| chunk_sort_key(a).cmp(&chunk_sort_key(b)));
        files.push(ParsedFileDiff {
            current_path: new_path,
            baseline_path: Some(old_path),
            chunks: merge_adjacent_equal(chunks),
        });
    }

    Ok(files)
}

fn chunk_sort_key(c: &Chunk) -> u32 {
    if !c.old_range.is_empty() {
        c.old_range.start
    } else {
        c.new_range.start
    }
}

/// Collapses consecutive single-line `Equal` chunks produced line-by-line
/// above into contiguous ranges, so `chunk_containing` does less work and
/// the representation stays an ordered, non-overlapping partition into
/// chunks.
fn merge_adjacent_equal(chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut out: Vec<Chunk> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        if let Some(last) = out.last_mut() {
            if last.kind == ChunkKind::Equal
                && chunk.kind == ChunkKind::Equal
                && last.old_range.end == chunk.old_range.start
                && last.new_range.end == chunk.new_range.start
            {
                last.old_range.end = chunk.old_range.end;
                last.new_range.end = chunk.new_range.end;
                continue;
            }
        }
        out.push(chunk);
    }
    out
}

fn old_new_path(line: &str) -> &str {
    let rest = &line[4..];
    // Tolerate a trailing tab-separated timestamp, as real `diff -u` emits.
    rest.split('\t').next().unwrap_or(rest).trim()
}

fn strip_path(path: &str, strip: usize) -> String {
    let mut components = path.splitn(strip + 1, '/');
    for _ in 0..strip {
        components.next();
    }
    components.next().unwrap_or(path).to_string()
}

/// Parses `@@ -o,c +o,c @@` (the `,c` count is optional, defaulting to 1, as
/// real `diff -u` omits it for single-line hunks).
fn parse_hunk_header(line: &str) -> PResult<(u32, u32, u32, u32)> {
    let mut input = line;
    let (old_start, old_count) = preceded("@@ -", range_pair).parse_next(&mut input)?;
    let (new_start, new_count) = preceded(" +", range_pair).parse_next(&mut input)?;
    Ok((old_start, old_count, new_start, new_count))
}

fn range_pair(input: &mut &str) -> PResult<(u32, u32)> {
    let start: u32 = digit1.parse_to().parse_next(input)?;
    let count: u32 = opt(preceded(',', digit1.parse_to())).parse_next(input)?.unwrap_or(1);
    Ok((start, count))
}
