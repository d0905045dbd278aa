//! SourceReader. Loads the text of a source file at either the current
//! or baseline revision. Misses synthesize empty content rather than erroring —
//! an unreadable file is a `source` diagnostic, not a hard failure.

use std::{fs, path::Path};

use memmap2::Mmap;

use crate::{
    diagnostics::{DiagnosticKind, DiagnosticSink},
    diffmap::{ChunkKind, DiffMap, Side},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revision {
    Current,
    Baseline,
}

/// Text of a single source file, split into 1-indexed lines. Lines that
/// don't exist on the requested revision (a line deleted before "current",
/// or never existing at "baseline") are represented as `None`.
pub struct SourceText {
    lines: Vec<Option<String>>,
}

impl SourceText {
    pub fn line(&self, line_no: u32) -> Option<&str> {
        self.lines
            .get(line_no.checked_sub(1)? as usize)
            .and_then(|l| l.as_deref())
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Reads whole-file text off disk, memory-mapping when the file is large
/// enough to make that worthwhile.
fn read_file_text(path: &Path) -> std::io::Result<String> {
    const MMAP_THRESHOLD: u64 = 64 * 1024;
    let meta = fs::metadata(path)?;
    if meta.len() >= MMAP_THRESHOLD {
        let file = fs::File::open(path)?;
        // SAFETY: the file is opened read-only for the duration of this
        // call and not concurrently truncated by this process.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(String::from_utf8_lossy(&mmap).into_owned())
    } else {
        fs::read_to_string(path)
    }
}

pub struct SourceReader<'a> {
    diagnostics: &'a DiagnosticSink,
}

impl<'a> SourceReader<'a> {
    pub fn new(diagnostics: &'a DiagnosticSink) -> Self {
        SourceReader { diagnostics }
    }

    /// For `Revision::Current` this just reads the file. For
    /// `Revision::Baseline` it delegates to a baseline reader built from the
    /// current file's text plus the diff map, since no separate
    /// baseline-revision checkout is assumed to be on disk.
    pub fn open(&self, path: &Path, revision: Revision, diff: &DiffMap, file_key: &str) -> SourceText {
        match revision {
            Revision::Current => self.open_current(path),
            Revision::Baseline => {
                let current = self.open_current(path);
                BaselineView::new(&current, diff, file_key).materialize()
            }
        }
    }

    fn open_current(&self, path: &Path) -> SourceText {
        match read_file_text(path) {
            Ok(text) => SourceText {
                lines: text.lines().map(|l| Some(l.to_string())).collect(),
            },
            Err(e) => {
                let _ = self.diagnostics.raise(
                    DiagnosticKind::Source,
                    format!("unreadable: {e}"),
                    Some(path.display().to_string()),
                );
                SourceText { lines: Vec::new() }
            }
        }
    }
}

/// Wraps a current-revision reader plus the [`DiffMap`] to reconstruct
/// baseline-revision text, by walking current lines back through
/// `equal`/`delete` chunks. Lines only present as an `insert` in current have
/// no baseline counterpart and are omitted.
struct BaselineView<'a> {
    current: &'a SourceText,
    diff: &'a DiffMap,
    file_key: &'a str,
}

impl<'a> BaselineView<'a> {
    fn new(current: &'a SourceText, diff: &'a DiffMap, file_key: &'a str) -> Self {
        BaselineView { current, diff, file_key }
    }

    fn materialize(&self) -> SourceText {
        let mut lines = Vec::new();
        for new_line in 1..=self.current.len() as u32 {
            match self.diff.kind(self.file_key, Side::New, new_line) {
                ChunkKind::Insert => continue,
                ChunkKind::Equal | ChunkKind::Delete => {
                    let old_line = self.diff.lookup(self.file_key, Side::New, new_line);
                    let idx = old_line.saturating_sub(1) as usize;
                    while lines.len() <= idx {
                        lines.push(None);
                    }
                    lines[idx] = self.current.line(new_line).map(str::to_string);
                }
            }
        }
        SourceText { lines }
    }

    fn is_close_brace(&self, line: &str) -> bool {
        line.trim_end().ends_with('}')
    }

    fn is_blank(&self, line: &str) -> bool {
        line.trim().is_empty()
    }

    fn contains_conditional(&self, line: &str) -> bool {
        ["if ", "if(", "else", "match ", "while", "for ", "?", "&&", "||"]
            .iter()
            .any(|kw| line.contains(kw))
    }

    fn is_character(&self, line: &str, col: usize) -> bool {
        line.chars().nth(col).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diag() -> DiagnosticSink {
        DiagnosticSink::new(Default::default(), None)
    }

    #[test]
    fn missing_file_synthesizes_empty_content() {
        let diagnostics = diag();
        let reader = SourceReader::new(&diagnostics);
        let diff = DiffMap::empty(false);
        let text = reader.open(Path::new("/nonexistent/path.rs"), Revision::Current, &diff, "x.rs");
        assert!(text.is_empty());
        assert_eq!(diagnostics.recorded().len(), 1);
    }

    #[test]
    fn baseline_view_delegates_predicates_to_mapped_current_line() {
        let current = SourceText {
            lines: vec![Some("if (x) {".to_string()), Some("}".to_string())],
        };
        let diff = DiffMap::empty(true);
        let view = BaselineView::new(&current, &diff, "x.rs");
        assert!(view.contains_conditional("if (x) {"));
        assert!(view.is_close_brace("}"));
        assert!(!view.is_blank("}"));
        assert!(view.is_character("if", 0));
    }
}
