use std::path::PathBuf;

use alloy_primitives::Address;
use clap::{Parser, Subcommand, ValueHint};
use harness::client::ClientSpec;
use harness::run::CapturedTrace;
use trace_diff::{ClientKind, DEFAULT_CONTEXT_WINDOW};

const REPORT_HELP_HEADING: &str = "Report options";

/// Runs EVM state tests through several clients and reports where their
/// execution traces diverge.
#[derive(Parser)]
#[command(version, propagate_version = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,

    /// Directory divergence artifacts are written to.
    #[arg(
        long,
        global = true,
        env = "DIFFER_ARTIFACT_DIR",
        default_value = "./artifacts",
        value_hint = ValueHint::DirPath,
        help_heading = REPORT_HELP_HEADING
    )]
    pub(crate) artifact_dir: PathBuf,

    /// Diff lines kept before the first divergence in summaries.
    #[arg(
        long,
        global = true,
        env = "DIFFER_CONTEXT_WINDOW",
        default_value_t = DEFAULT_CONTEXT_WINDOW,
        help_heading = REPORT_HELP_HEADING
    )]
    pub(crate) context_window: usize,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Runs every client on each fixture and compares the traces.
    Run {
        /// State test fixtures.
        #[arg(required = true, value_hint = ValueHint::FilePath)]
        fixtures: Vec<PathBuf>,
        /// A client to run, as `[name=]kind[:program [args...]]`, where kind
        /// is one of geth, parity, aleth, ethereumjs. `{fixture}` in the
        /// arguments is replaced with the fixture path. The first client is
        /// the reference.
        #[arg(
            short,
            long = "client",
            env = "DIFFER_CLIENTS",
            value_delimiter = ',',
            required = true
        )]
        clients: Vec<ClientSpec>,
        /// Per-client timeout in seconds, overriding the per-kind default.
        #[arg(long, env = "DIFFER_TIMEOUT_SECS")]
        timeout_secs: Option<u64>,
        /// How many tests to run at the same time.
        #[arg(short, long, env = "DIFFER_JOBS", default_value_t = 1)]
        jobs: usize,
    },
    /// Compares client output captured earlier.
    Compare {
        /// A captured trace, as `name=kind:path`.
        #[arg(short, long = "input", required = true, value_parser = parse_input)]
        inputs: Vec<CapturedTrace>,
        /// The transaction's recipient, for attributing storage accesses.
        /// Omit for contract creation.
        #[arg(long)]
        to: Option<Address>,
        /// Name used for the artifacts.
        #[arg(long, default_value = "compare")]
        test_id: String,
    },
}

fn parse_input(s: &str) -> anyhow::Result<CapturedTrace> {
    let (name, rest) = s
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("expected `name=kind:path`, got `{s}`"))?;
    let (kind, path) = rest
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("expected `name=kind:path`, got `{s}`"))?;
    Ok(CapturedTrace {
        name: name.to_owned(),
        kind: kind.parse::<ClientKind>()?,
        path: PathBuf::from(path),
    })
}
