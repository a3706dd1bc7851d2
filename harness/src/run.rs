//! The per-test pipeline: run, canonicalize, compare, summarize, persist.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use futures::{future, stream, StreamExt as _};
use trace_diff::{
    attribute, compare, summarize, track_contexts, CallContext, CanonicalStep, ClientKind,
    ComparisonResult, Step, DEFAULT_CONTEXT_WINDOW,
};
use tracing::{error, info, warn};

use crate::artifacts::{Artifacts, ClientReport, Report};
use crate::client::{run_client, ClientSpec, RawOutput};
use crate::fixture;

/// Result of one differential test.
#[derive(Clone, Debug)]
pub struct Outcome {
    pub test_id: String,
    pub comparison: ComparisonResult,
    pub summary: Vec<String>,
    /// Files written for a divergent test; empty when the clients agreed.
    pub artifacts: Vec<PathBuf>,
}

impl Outcome {
    pub fn passed(&self) -> bool {
        self.comparison.equivalent
    }
}

/// Pass/fail counts of a suite run. A test whose fixture could not be used
/// is an error, not a failure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SuiteSummary {
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
}

impl SuiteSummary {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.errored
    }
}

/// Output previously captured from a client, for [`Harness::compare_files`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapturedTrace {
    pub name: String,
    pub kind: ClientKind,
    pub path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct Harness {
    pub clients: Vec<ClientSpec>,
    pub artifact_dir: PathBuf,
    pub context_window: usize,
}

impl Harness {
    pub fn new(clients: Vec<ClientSpec>, artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            clients,
            artifact_dir: artifact_dir.into(),
            context_window: DEFAULT_CONTEXT_WINDOW,
        }
    }

    /// Runs every client on the fixture at `path` and compares their traces.
    ///
    /// Only an unusable fixture is an error. Clients that fail to start,
    /// crash or time out contribute whatever they printed.
    pub async fn run_test(&self, path: &Path) -> anyhow::Result<Outcome> {
        let test = fixture::load(path)?;
        let test_id = test_id(path);
        info!(test = %test_id, clients = self.clients.len(), "running test");

        let outputs =
            future::join_all(self.clients.iter().map(|client| run_client(client, path))).await;
        let runs: Vec<Run> = self
            .clients
            .iter()
            .zip(outputs)
            .map(|(client, output)| Run {
                name: client.name.clone(),
                kind: client.kind,
                output,
            })
            .collect();

        self.evaluate(test_id, Some(path), test.entry_context(), runs)
            .await
    }

    /// Compares client output captured earlier instead of running clients.
    pub async fn compare_files(
        &self,
        test_id: &str,
        inputs: &[CapturedTrace],
        entry: CallContext,
    ) -> anyhow::Result<Outcome> {
        let mut runs = Vec::with_capacity(inputs.len());
        for input in inputs {
            let text = tokio::fs::read_to_string(&input.path)
                .await
                .with_context(|| format!("unable to read trace {}", input.path.display()))?;
            runs.push(Run {
                name: input.name.clone(),
                kind: input.kind,
                output: RawOutput::captured(&text),
            });
        }
        self.evaluate(test_id.to_owned(), None, entry, runs).await
    }

    /// Runs each fixture in `fixtures`, at most `jobs` at a time.
    pub async fn run_suite(&self, fixtures: Vec<PathBuf>, jobs: usize) -> SuiteSummary {
        stream::iter(fixtures)
            .map(|path| async move {
                let result = self.run_test(&path).await;
                (path, result)
            })
            .buffer_unordered(jobs.max(1))
            .fold(SuiteSummary::default(), |mut summary, (path, result)| async move {
                match result {
                    Ok(outcome) if outcome.passed() => summary.passed += 1,
                    Ok(_) => summary.failed += 1,
                    Err(e) => {
                        error!(fixture = %path.display(), "test not run: {e:#}");
                        summary.errored += 1;
                    }
                }
                summary
            })
            .await
    }

    async fn evaluate(
        &self,
        test_id: String,
        fixture: Option<&Path>,
        entry: CallContext,
        runs: Vec<Run>,
    ) -> anyhow::Result<Outcome> {
        let traces: Vec<Vec<CanonicalStep>> = runs
            .iter()
            .map(|run| run.kind.canonicalize(&run.output.lines))
            .collect();
        let names: Vec<&str> = runs.iter().map(|run| run.name.as_str()).collect();

        let comparison = compare(&traces, &names);
        let summary = summarize(&comparison.diff_lines, self.context_window);

        if comparison.equivalent {
            info!(test = %test_id, steps = traces.first().map_or(0, Vec::len), "clients agree");
            return Ok(Outcome {
                test_id,
                comparison,
                summary,
                artifacts: Vec::new(),
            });
        }

        warn!(
            test = %test_id,
            first_divergence = comparison.first_divergence(),
            divergent_steps = comparison.divergences.len(),
            "clients diverge"
        );

        let clients = runs
            .iter()
            .zip(&traces)
            .map(|(run, trace)| {
                let steps: Vec<Step> = trace
                    .iter()
                    .filter_map(CanonicalStep::as_exec)
                    .cloned()
                    .collect();
                let contexts = track_contexts(&steps, entry);
                ClientReport {
                    name: run.name.clone(),
                    kind: run.kind,
                    status: run.output.status.clone(),
                    steps: trace.len(),
                    attribution: attribute(&steps, &contexts),
                }
            })
            .collect();
        let report = Report {
            test_id: test_id.clone(),
            fixture: fixture.map(Path::to_path_buf),
            equivalent: comparison.equivalent,
            first_divergence: comparison.first_divergence(),
            divergences: comparison.divergences.clone(),
            entry,
            clients,
        };

        let outputs: Vec<(&str, &RawOutput)> = runs
            .iter()
            .map(|run| (run.name.as_str(), &run.output))
            .collect();
        let artifacts = Artifacts::new(&self.artifact_dir, &test_id)
            .persist(&report, &comparison, &summary, &outputs)
            .await?;

        Ok(Outcome {
            test_id,
            comparison,
            summary,
            artifacts,
        })
    }
}

/// One client's contribution to a test.
#[derive(Debug)]
struct Run {
    name: String,
    kind: ClientKind,
    output: RawOutput,
}

/// The fixture's file name without its extension.
pub fn test_id(path: &Path) -> String {
    path.file_stem()
        .map(|it| it.to_string_lossy().into_owned())
        .unwrap_or_else(|| "test".to_owned())
}
