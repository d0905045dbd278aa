//! Task scheduler. Converts the current-revision file set into a
//! dependency forest and runs it leaf-to-root, merging child summaries into
//! parents via [`Summary::append`].

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    process::Command,
    time::Duration,
};

use crate::{
    diagnostics::{Diagnostic, DiagnosticKind},
    error::{CovError, Result},
    policy::{DateBins, TreeShape},
    summary::{NodeKind, Summary},
};

fn parent_of(name: &str) -> Option<String> {
    let parent = Path::new(name).parent()?;
    if parent.as_os_str().is_empty() {
        None
    } else {
        Some(parent.to_string_lossy().into_owned())
    }
}

/// The root task's name; never collides with a real path since paths are
/// never empty strings.
pub const TOP: &str = "";

#[derive(Debug, Clone)]
struct TaskNode {
    kind: NodeKind,
    deps: Vec<String>,
}

/// The dependency forest: leaves are files, inner nodes are directories (or,
/// in flat mode, just the single root), the root is "top".
///
/// Built in two passes deliberately: the first pass creates every node, the
/// second wires `deps` between them. Doing both in one pass while the
/// directory map is still being populated would mean a file's parent
/// sometimes doesn't exist yet depending on iteration order.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    nodes: HashMap<String, TaskNode>,
}

impl TaskGraph {
    pub fn build(files: &[String], shape: TreeShape) -> TaskGraph {
        let mut nodes: HashMap<String, TaskNode> = HashMap::new();
        nodes.insert(
            TOP.to_string(),
            TaskNode {
                kind: NodeKind::Top,
                deps: Vec::new(),
            },
        );

        match shape {
            TreeShape::Flat => {
                for file in files {
                    nodes.insert(
                        file.clone(),
                        TaskNode {
                            kind: NodeKind::File,
                            deps: Vec::new(),
                        },
                    );
                }
                let top = nodes.get_mut(TOP).unwrap();
                top.deps = files.to_vec();
            }
            TreeShape::Hierarchical => {
                for file in files {
                    nodes.entry(file.clone()).or_insert_with(|| TaskNode {
                        kind: NodeKind::File,
                        deps: Vec::new(),
                    });
                    let mut dir = parent_of(file);
                    while let Some(d) = dir {
                        let next = parent_of(&d);
                        nodes.entry(d).or_insert_with(|| TaskNode {
                            kind: NodeKind::Directory,
                            deps: Vec::new(),
                        });
                        dir = next;
                    }
                }

                let names: Vec<String> = nodes.keys().cloned().collect();
                for name in names {
                    if name == TOP {
                        continue;
                    }
                    let parent = parent_of(&name).unwrap_or_else(|| TOP.to_string());
                    nodes.get_mut(&parent).unwrap().deps.push(name);
                }
            }
        }

        TaskGraph { nodes }
    }

    fn deps(&self, name: &str) -> &[String] {
        self.nodes
            .get(name)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    fn kind(&self, name: &str) -> NodeKind {
        self.nodes.get(name).map(|n| n.kind).unwrap_or(NodeKind::Directory)
    }

    /// Every file task, for handing to a [`ProcessPoolScheduler`]'s initial
    /// eligible set.
    pub fn leaves(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.kind == NodeKind::File)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// The seam between the scheduler and the per-file pipeline (C2+C3+C4+C5+C8).
/// Kept abstract so the in-process and process-pool schedulers can share
/// tests; a real caller wires this to source-read + annotate + categorize +
/// `SourceFile::build`.
pub trait LeafExecutor {
    fn execute(&self, path: &str) -> Result<(Summary, Vec<Diagnostic>)>;
}

/// `P == 1` degenerates to depth-first in-process execution — the only
/// scheduling mode this module unit-tests, since the process-pool path
/// needs a real child binary to exercise.
pub struct InProcessScheduler<'a> {
    graph: TaskGraph,
    executor: &'a dyn LeafExecutor,
    date_bins: &'a DateBins,
}

impl<'a> InProcessScheduler<'a> {
    pub fn new(graph: TaskGraph, executor: &'a dyn LeafExecutor, date_bins: &'a DateBins) -> Self {
        InProcessScheduler {
            graph,
            executor,
            date_bins,
        }
    }

    pub fn run(&self) -> (Summary, Vec<Diagnostic>) {
        let mut diagnostics = Vec::new();
        let summary = self.run_node(TOP, &mut diagnostics);
        (summary, diagnostics)
    }

    fn run_node(&self, name: &str, diagnostics: &mut Vec<Diagnostic>) -> Summary {
        match self.graph.kind(name) {
            NodeKind::File => match self.executor.execute(name) {
                Ok((summary, diags)) => {
                    diagnostics.extend(diags);
                    summary
                }
                Err(e) => {
                    diagnostics.push(Diagnostic {
                        kind: DiagnosticKind::Parallel,
                        message: e.to_string(),
                        file: Some(name.to_string()),
                    });
                    Summary::new(NodeKind::File, name, self.date_bins)
                }
            },
            kind => {
                let label = if name == TOP { "top" } else { name };
                let mut summary = Summary::new(kind, label, self.date_bins);
                for dep in self.graph.deps(name) {
                    let child = self.run_node(dep, diagnostics);
                    summary.append(&child);
                }
                summary
            }
        }
    }
}

/// One bincode-serialized worker exchange: the request written before
/// forking, the response the worker writes to a scratch file before exiting.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct WorkerRequest {
    pub path: String,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct WorkerResponse {
    pub summary: Summary,
    pub diagnostics: Vec<Diagnostic>,
}

struct RunningWorker {
    child: std::process::Child,
    task: String,
    request_path: PathBuf,
    result_path: PathBuf,
}

/// `P > 1`: a bounded pool of real OS processes for parallelism across
/// independent subtrees. Each worker is invoked as
/// `<program> <args...> <request-file> <result-file>`; it is expected to read
/// a bincode-encoded [`WorkerRequest`] and write a bincode-encoded
/// [`WorkerResponse`] before exiting zero, or to exit non-zero and leave
/// stderr describing the failure.
///
/// Not unit-tested here: exercising it needs a real child binary, which this
/// crate doesn't ship (the per-file pipeline a worker runs is wired by the
/// caller, same as [`crate::annotate::ExternalAnnotator`]).
pub struct ProcessPoolScheduler<'a> {
    graph: TaskGraph,
    program: String,
    args: Vec<String>,
    parallel: usize,
    memory_cap_mb: Option<u64>,
    date_bins: &'a DateBins,
    scratch_dir: PathBuf,
    preserve_worker_output: bool,
}

impl<'a> ProcessPoolScheduler<'a> {
    pub fn new(
        graph: TaskGraph,
        program: impl Into<String>,
        args: Vec<String>,
        parallel: usize,
        memory_cap_mb: Option<u64>,
        date_bins: &'a DateBins,
        scratch_dir: PathBuf,
        preserve_worker_output: bool,
    ) -> Self {
        ProcessPoolScheduler {
            graph,
            program: program.into(),
            args,
            parallel: parallel.max(1),
            memory_cap_mb,
            date_bins,
            scratch_dir,
            preserve_worker_output,
        }
    }

    /// Estimated worker RSS used for back-pressure before any worker has
    /// reported its own size, probed via a platform call; refined once at
    /// least one worker has run.
    const DEFAULT_RSS_ESTIMATE_MB: u64 = 64;

    pub fn run(&self) -> Result<(Summary, Vec<Diagnostic>)> {
        std::fs::create_dir_all(&self.scratch_dir)?;

        let mut outstanding: HashMap<String, HashSet<String>> = self
            .graph
            .nodes
            .iter()
            .map(|(name, node)| (name.clone(), node.deps.iter().cloned().collect()))
            .collect();
        // Invert: for each dep, which node(s) it unblocks.
        let mut unblocks: HashMap<String, Vec<String>> = HashMap::new();
        for (name, node) in &self.graph.nodes {
            for dep in &node.deps {
                unblocks.entry(dep.clone()).or_default().push(name.clone());
            }
        }

        let mut eligible: Vec<String> = self
            .graph
            .leaves()
            .into_iter()
            .filter(|name| outstanding.get(name).map(HashSet::is_empty).unwrap_or(true))
            .collect();
        let mut pending_dirs: HashSet<String> = self
            .graph
            .nodes
            .iter()
            .filter(|(_, n)| n.kind != NodeKind::File)
            .map(|(name, _)| name.clone())
            .collect();

        let mut partial: HashMap<String, Summary> = self
            .graph
            .nodes
            .iter()
            .map(|(name, node)| (name.clone(), Summary::new(node.kind, name.clone(), self.date_bins)))
            .collect();
        let mut diagnostics: Vec<Diagnostic> = Vec::new();
        let mut running: Vec<RunningWorker> = Vec::new();
        let mut rss_estimate_mb = Self::DEFAULT_RSS_ESTIMATE_MB;

        let mut system = sysinfo::System::new();

        while !eligible.is_empty() || !running.is_empty() {
            while running.len() < self.parallel {
                let Some(task) = eligible.pop() else { break };
                if let Some(cap) = self.memory_cap_mb {
                    if ((running.len() + 1) as u64) * rss_estimate_mb > cap {
                        eligible.push(task);
                        break;
                    }
                }
                let worker = self.spawn(&task)?;
                running.push(worker);
            }

            if running.is_empty() {
                continue;
            }

            let (finished_idx, status) = self.wait_any(&mut running, &mut system, &mut rss_estimate_mb);
            let worker = running.remove(finished_idx);

            if !status.success() {
                diagnostics.push(Diagnostic {
                    kind: DiagnosticKind::Parallel,
                    message: format!("worker exited with status {:?}", status.code()),
                    file: Some(worker.task.clone()),
                });
            } else {
                match self.collect(&worker.result_path) {
                    Ok(response) => {
                        if let Some(slot) = partial.get_mut(&worker.task) {
                            *slot = response.summary;
                        }
                        diagnostics.extend(response.diagnostics);
                    }
                    Err(e) => diagnostics.push(Diagnostic {
                        kind: DiagnosticKind::Parallel,
                        message: e.to_string(),
                        file: Some(worker.task.clone()),
                    }),
                }
            }
            if !self.preserve_worker_output {
                let _ = std::fs::remove_file(&worker.result_path);
                let _ = std::fs::remove_file(&worker.request_path);
            }

            Self::propagate_completion(&worker.task, &unblocks, &mut outstanding, &mut partial, &mut pending_dirs);
        }

        let top = partial.remove(TOP).unwrap_or_else(|| Summary::new(NodeKind::Top, "top", self.date_bins));
        Ok((top, diagnostics))
    }

    /// Marks `node` done and merges its `partial` summary into every parent
    /// it unblocks. Directory and top nodes are never spawned as workers —
    /// a worker only receives a bare path and has no way to reconstruct a
    /// rollup of its children — so once a directory's dependency count hits
    /// zero, its `partial` entry (built purely from `append`) is already its
    /// final summary, and completion cascades straight to its own parent
    /// instead of being pushed onto the spawn queue.
    fn propagate_completion(
        node: &str,
        unblocks: &HashMap<String, Vec<String>>,
        outstanding: &mut HashMap<String, HashSet<String>>,
        partial: &mut HashMap<String, Summary>,
        pending_dirs: &mut HashSet<String>,
    ) {
        let mut done = vec![node.to_string()];
        while let Some(node) = done.pop() {
            let Some(parents) = unblocks.get(&node) else { continue };
            let child_summary = partial.get(&node).cloned();
            for parent in parents.clone() {
                if let Some(deps) = outstanding.get_mut(&parent) {
                    deps.remove(&node);
                    if let Some(child) = &child_summary {
                        if let Some(parent_summary) = partial.get_mut(&parent) {
                            parent_summary.append(child);
                        }
                    }
                    if deps.is_empty() && pending_dirs.remove(&parent) {
                        done.push(parent);
                    }
                }
            }
        }
    }

    fn spawn(&self, task: &str) -> Result<RunningWorker> {
        let request_path = self.scratch_dir.join(format!("req_{}", sanitize(task)));
        let result_path = self.scratch_dir.join(format!("res_{}", sanitize(task)));
        let request = WorkerRequest { path: task.to_string() };
        let bytes = bincode::serialize(&request).map_err(|e| CovError::WorkerResultCorrupt(e.to_string()))?;
        std::fs::write(&request_path, bytes)?;

        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(&request_path)
            .arg(&result_path)
            .spawn()?;

        Ok(RunningWorker {
            child,
            task: task.to_string(),
            request_path,
            result_path,
        })
    }

    fn collect(&self, result_path: &Path) -> Result<WorkerResponse> {
        let bytes = std::fs::read(result_path)?;
        bincode::deserialize(&bytes).map_err(|e| CovError::WorkerResultCorrupt(e.to_string()))
    }

    /// Blocks until at least one running worker exits, reaps it, and (best
    /// effort) refines `rss_estimate_mb` from a live probe of a surviving
    /// sibling before the slot is reused.
    fn wait_any(
        &self,
        running: &mut [RunningWorker],
        system: &mut sysinfo::System,
        rss_estimate_mb: &mut u64,
    ) -> (usize, std::process::ExitStatus) {
        loop {
            for (idx, worker) in running.iter_mut().enumerate() {
                if let Ok(Some(status)) = worker.child.try_wait() {
                    return (idx, status);
                }
            }
            if let Some(worker) = running.first() {
                let pid = sysinfo::Pid::from_u32(worker.child.id());
                system.refresh_process(pid);
                if let Some(proc) = system.process(pid) {
                    let mb = proc.memory() / (1024 * 1024);
                    if mb > 0 {
                        *rss_estimate_mb = mb.max(1);
                    }
                }
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

fn sanitize(path: &str) -> String {
    path.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
