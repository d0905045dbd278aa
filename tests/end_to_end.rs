//! End-to-end scenarios across C1 (diff), C4 (categorize), C5 (index build),
//! C6 (rollup), and C8 (navigation) for a small two-file change.

use std::collections::HashMap;

use covdiff::{
    annotate::AnnotatedLine,
    categorize::Categorizer,
    diagnostics::DiagnosticSink,
    diffmap::DiffMap,
    model::SourceFile,
    nav::{NavigationIndex, Next},
    policy::Policy,
    scheduler::{InProcessScheduler, LeafExecutor, TaskGraph},
    summary::NodeKind,
    tla::Tla,
    trace::{FileTrace, Trace},
};

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

fn annotated(author: &str, age: u32) -> AnnotatedLine {
    AnnotatedLine {
        commit_id: "deadbeef".into(),
        author: author.into(),
        age_in_days: age,
        text: String::new(),
    }
}

/// Builds a `SourceFile` for one file the way the scheduler's per-file
/// pipeline would, without the external-process seams (annotate/read).
fn build_file(
    path: &str,
    base: Option<&FileTrace>,
    curr: &FileTrace,
    diff: &DiffMap,
    annotations: &HashMap<u32, AnnotatedLine>,
    policy: &Policy,
    diagnostics: &DiagnosticSink,
) -> SourceFile {
    let categorizer = Categorizer::new(policy, diagnostics);
    let categorized = categorizer.categorize(path, base, curr, diff, false);
    SourceFile::build(
        path,
        &categorized.lines,
        &categorized.functions,
        annotations,
        &policy.date_bins,
        diagnostics,
    )
}

#[test]
fn gained_and_lost_coverage_across_two_files_rolls_up_and_navigates() {
    init_tracing();
    let diff_text = "\
--- a/src/a.rs
+++ b/src/a.rs
@@ -1,2 +1,2 @@
 fn a() {
 branch();
--- a/src/b.rs
+++ b/src/b.rs
@@ -1,1 +1,1 @@
 fn b() {
";
    let diagnostics = DiagnosticSink::new(Default::default(), None);
    let diff = DiffMap::load(diff_text, 0, true, &diagnostics).unwrap();
    let policy = Policy::default();

    // a.rs: line 2 was hit at baseline, unhit now (regression -> LBC).
    let mut base_a = FileTrace::default();
    base_a.line_hits.insert(2, 4);
    let mut curr_a = FileTrace::default();
    curr_a.line_hits.insert(1, 1);
    curr_a.line_hits.insert(2, 0);
    let mut annotations_a = HashMap::new();
    annotations_a.insert(1, annotated("alice", 2));
    annotations_a.insert(2, annotated("alice", 2));
    let file_a = build_file("src/a.rs", Some(&base_a), &curr_a, &diff, &annotations_a, &policy, &diagnostics);

    // b.rs: unchanged line, hit, but with no baseline trace entry for it —
    // GIC ("gained, included": present only in the current trace, hit).
    let mut curr_b = FileTrace::default();
    curr_b.line_hits.insert(1, 2);
    let mut annotations_b = HashMap::new();
    annotations_b.insert(1, annotated("bob", 40));
    let file_b = build_file("src/b.rs", None, &curr_b, &diff, &annotations_b, &policy, &diagnostics);

    assert_eq!(file_a.summary.line.totals.per_tla[Tla::Lbc.index()], 1);
    assert_eq!(file_b.summary.line.totals.per_tla[Tla::Gic.index()], 1);

    let nav_a = NavigationIndex::new(&file_a);
    assert_eq!(nav_a.next_tla_group(Tla::Lbc, None), Next::Line(2));
    assert_eq!(nav_a.next_in_owner_bin("alice", Tla::Lbc, None), Next::Line(2));

    let mut top = covdiff::summary::Summary::new(NodeKind::Top, "top", &policy.date_bins);
    top.append(&file_a.summary);
    top.append(&file_b.summary);
    assert_eq!(top.line.totals.found(), 3);
    assert_eq!(top.line.totals.hit(), 2);
    assert_eq!(top.line.owners["bob"].totals.per_tla[Tla::Gic.index()], 1);
}

#[test]
fn categorized_files_feed_the_scheduler_and_roll_up_through_directories() {
    struct FixedExecutor {
        diagnostics: DiagnosticSink,
        policy: Policy,
        trace: Trace,
        diff: DiffMap,
    }

    impl LeafExecutor for FixedExecutor {
        fn execute(&self, path: &str) -> covdiff::error::Result<(covdiff::summary::Summary, Vec<covdiff::diagnostics::Diagnostic>)> {
            let empty = FileTrace::default();
            let curr = self.trace.file(path).unwrap_or(&empty);
            let file = build_file(path, None, curr, &self.diff, &HashMap::new(), &self.policy, &self.diagnostics);
            Ok((file.summary, Vec::new()))
        }
    }

    let mut trace = Trace::default();
    let mut t1 = FileTrace::default();
    t1.line_hits.insert(1, 1);
    trace.files.insert("pkg/x.rs".to_string(), t1);
    let mut t2 = FileTrace::default();
    t2.line_hits.insert(1, 0);
    trace.files.insert("pkg/y.rs".to_string(), t2);

    let diagnostics = DiagnosticSink::new(Default::default(), None);
    let diff = DiffMap::empty(false);
    let policy = Policy::default();

    let files = vec!["pkg/x.rs".to_string(), "pkg/y.rs".to_string()];
    let graph = TaskGraph::build(&files, policy.tree_shape);
    let executor = FixedExecutor {
        diagnostics,
        policy: Policy::default(),
        trace,
        diff,
    };
    let scheduler = InProcessScheduler::new(graph, &executor, &policy.date_bins);
    let (top, diagnostics) = scheduler.run();

    assert!(diagnostics.is_empty());
    assert_eq!(top.line.totals.per_tla[Tla::Gnc.index()], 1);
    assert_eq!(top.line.totals.per_tla[Tla::Unc.index()], 1);
}

#[test]
fn lcov_trace_feeds_straight_into_categorization() {
    let diagnostics = DiagnosticSink::new(Default::default(), None);
    let text = "SF:src/a.rs\nDA:1,1\nDA:2,0\nend_of_record\n";
    let trace = covdiff::trace::parse_trace(text, &diagnostics);
    let curr = trace.file("src/a.rs").unwrap();

    let diff = DiffMap::empty(false);
    let policy = Policy::default();
    let categorizer = Categorizer::new(&policy, &diagnostics);
    let result = categorizer.categorize("src/a.rs", None, curr, &diff, false);

    assert_eq!(result.lines.len(), 2);
}
