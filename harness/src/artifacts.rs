//! Files written when a test diverges.
//!
//! Every file name carries the test id, the id of this process and a
//! sequence number unique within it. Several harnesses can share an artifact
//! directory, and same-named fixtures of one suite do not overwrite each
//! other:
//!
//! ```text
//! {dir}/{test_id}-{pid}-{seq}.diff          full combined diff
//! {dir}/{test_id}-{pid}-{seq}.summary       bounded excerpt around the first divergence
//! {dir}/{test_id}-{pid}-{seq}.report.json   verdict, divergences, per-client details
//! {dir}/{test_id}-{pid}-{seq}-{client}.trace  raw output of each client
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use trace_diff::{Attribution, CallContext, ClientKind, ComparisonResult};
use tracing::info;

use crate::client::{ExitStatus, RawOutput};

static NEXT_RUN: AtomicUsize = AtomicUsize::new(0);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifacts {
    dir: PathBuf,
    stem: String,
}

impl Artifacts {
    pub fn new(dir: impl Into<PathBuf>, test_id: &str) -> Self {
        Self {
            dir: dir.into(),
            stem: format!(
                "{}-{}-{}",
                sanitize(test_id),
                std::process::id(),
                NEXT_RUN.fetch_add(1, Ordering::Relaxed)
            ),
        }
    }

    pub fn diff_path(&self) -> PathBuf {
        self.dir.join(format!("{}.diff", self.stem))
    }

    pub fn summary_path(&self) -> PathBuf {
        self.dir.join(format!("{}.summary", self.stem))
    }

    pub fn report_path(&self) -> PathBuf {
        self.dir.join(format!("{}.report.json", self.stem))
    }

    pub fn trace_path(&self, client: &str) -> PathBuf {
        self.dir
            .join(format!("{}-{}.trace", self.stem, sanitize(client)))
    }

    /// Writes the diff, summary, raw outputs and report of a divergent run.
    /// Returns the paths written.
    pub async fn persist(
        &self,
        report: &Report,
        comparison: &ComparisonResult,
        summary: &[String],
        outputs: &[(&str, &RawOutput)],
    ) -> anyhow::Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("unable to create {}", self.dir.display()))?;

        let mut files = vec![
            (self.diff_path(), comparison.render()),
            (self.summary_path(), lines(summary)),
            (
                self.report_path(),
                serde_json::to_string_pretty(report).context("unable to serialize report")?,
            ),
        ];
        files.extend(
            outputs
                .iter()
                .map(|(client, output)| (self.trace_path(client), lines(&output.lines))),
        );

        let mut written = Vec::with_capacity(files.len());
        for (path, contents) in files {
            write(&path, contents).await?;
            written.push(path);
        }
        info!(
            test = %report.test_id,
            diff = %self.diff_path().display(),
            "wrote divergence artifacts"
        );
        Ok(written)
    }
}

async fn write(path: &Path, contents: String) -> anyhow::Result<()> {
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("unable to write {}", path.display()))
}

fn lines(lines: &[String]) -> String {
    lines.iter().map(|it| format!("{it}\n")).collect()
}

/// Keeps file names flat and portable.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}

/// Machine-readable record of one divergent test.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub test_id: String,
    pub fixture: Option<PathBuf>,
    pub equivalent: bool,
    pub first_divergence: Option<usize>,
    pub divergences: Vec<usize>,
    pub entry: CallContext,
    pub clients: Vec<ClientReport>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientReport {
    pub name: String,
    pub kind: ClientKind,
    pub status: ExitStatus,
    /// Canonical steps, terminal record included.
    pub steps: usize,
    pub attribution: Attribution,
}

#[cfg(test)]
mod tests {
    use trace_diff::{compare, CanonicalStep, Step};

    use super::*;

    #[test]
    fn paths_are_unique() {
        let artifacts = Artifacts::new("/tmp/out", "stAdd/add11 (Cancun)");
        let prefix = format!("/tmp/out/stAdd_add11__Cancun_-{}-", std::process::id());
        let diff = artifacts.diff_path().display().to_string();
        assert!(diff.starts_with(&prefix) && diff.ends_with(".diff"), "{diff}");
        let trace = artifacts.trace_path("geth").display().to_string();
        assert!(trace.starts_with(&prefix) && trace.ends_with("-geth.trace"), "{trace}");

        let again = Artifacts::new("/tmp/out", "stAdd/add11 (Cancun)");
        assert_ne!(again.diff_path(), artifacts.diff_path());
        assert_ne!(again.trace_path("geth"), artifacts.trace_path("geth"));
    }

    #[tokio::test]
    async fn persists_everything() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = Artifacts::new(dir.path().join("nested"), "add11");

        let step = CanonicalStep::Exec(Step {
            pc: 0,
            op: 0x60,
            gas: 10,
            depth: 0,
            stack: vec![],
        });
        let comparison = compare(&[vec![step], vec![]], &["geth", "parity"]);
        let report = Report {
            test_id: "add11".into(),
            fixture: None,
            equivalent: comparison.equivalent,
            first_divergence: comparison.first_divergence(),
            divergences: comparison.divergences.clone(),
            entry: CallContext::PendingCreate,
            clients: vec![],
        };
        let geth = RawOutput::captured("{\"pc\":0}\n");
        let parity = RawOutput::captured("");

        let written = artifacts
            .persist(
                &report,
                &comparison,
                &["[!!] 0 parity: (exhausted)".to_owned()],
                &[("geth", &geth), ("parity", &parity)],
            )
            .await
            .unwrap();
        assert_eq!(written.len(), 5);
        assert!(written.iter().all(|it| it.exists()));

        let diff = std::fs::read_to_string(artifacts.diff_path()).unwrap();
        assert_eq!(diff.lines().count(), 2);
        let saved: Report =
            serde_json::from_str(&std::fs::read_to_string(artifacts.report_path()).unwrap())
                .unwrap();
        assert_eq!(saved, report);
        let trace = std::fs::read_to_string(artifacts.trace_path("geth")).unwrap();
        assert_eq!(trace, "{\"pc\":0}\n");
    }
}
