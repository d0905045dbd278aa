use covdiff::{
    diagnostics::Diagnostic,
    error::Result,
    policy::{DateBins, TreeShape},
    scheduler::{InProcessScheduler, LeafExecutor, TaskGraph},
    summary::{NodeKind, Summary},
    tla::Tla,
};
use divan::Bencher;

fn main() {
    divan::main();
}

struct SyntheticExecutor {
    date_bins: DateBins,
}

impl LeafExecutor for SyntheticExecutor {
    fn execute(&self, path: &str) -> Result<(Summary, Vec<Diagnostic>)> {
        let mut summary = Summary::new(NodeKind::File, path, &self.date_bins);
        for _ in 0..50 {
            summary.line.record(Tla::Cbc, Some("owner"), Some(0));
        }
        Ok((summary, Vec::new()))
    }
}

fn synthetic_files(count: usize, dirs: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("pkg{}/file{i}.rs", i % dirs))
        .collect()
}

#[divan::bench(args = [10, 100, 1000])]
fn hierarchical_rollup(bencher: Bencher, file_count: usize) {
    let files = synthetic_files(file_count, 8);
    let date_bins = DateBins::default();
    bencher.bench_local(|| {
        let graph = TaskGraph::build(&files, TreeShape::Hierarchical);
        let executor = SyntheticExecutor {
            date_bins: date_bins.clone(),
        };
        let scheduler = InProcessScheduler::new(graph, &executor, &date_bins);
        scheduler.run()
    });
}

#[divan::bench(args = [10, 100, 1000])]
fn flat_rollup(bencher: Bencher, file_count: usize) {
    let files = synthetic_files(file_count, 8);
    let date_bins = DateBins::default();
    bencher.bench_local(|| {
        let graph = TaskGraph::build(&files, TreeShape::Flat);
        let executor = SyntheticExecutor {
            date_bins: date_bins.clone(),
        };
        let scheduler = InProcessScheduler::new(graph, &executor, &date_bins);
        scheduler.run()
    });
}

#[divan::bench]
fn criteria_json_roundtrip_for_top_summary() {
    let date_bins = DateBins::default();
    let mut summary = Summary::new(NodeKind::Top, "top", &date_bins);
    for _ in 0..1000 {
        summary.line.record(Tla::Cbc, Some("owner"), Some(0));
    }
    let checker = covdiff::criteria::CriteriaChecker::new(None);
    let _ = checker.check(&summary);
}
