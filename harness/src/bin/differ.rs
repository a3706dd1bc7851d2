//! Differential tester for EVM implementations.
//!
//! Runs each state test through every configured client, compares the
//! execution traces step by step and, for every test where they disagree,
//! prints a short summary and writes the full diff and a report to the
//! artifact directory.
//!
//! Example usage:
//! ```text
//! RUST_LOG=info differ run \
//!     --client geth:evm --client parity:parity-evm \
//!     ./GeneralStateTests/stExample/add11.json
//! ```

use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use cli::Command;
use harness::env::load_dotenv_if_present;
use harness::run::{Harness, Outcome};
use trace_diff::CallContext;
use tracing::info;

use self::differ::*;
mod differ {
    pub mod cli;
}

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv_if_present();
    harness::tracing::init();

    let args = cli::Cli::parse();

    match args.command {
        Command::Run {
            fixtures,
            mut clients,
            timeout_secs,
            jobs,
        } => {
            if let Some(secs) = timeout_secs {
                for client in &mut clients {
                    client.timeout = Duration::from_secs(secs);
                }
            }
            let harness = Harness {
                clients,
                artifact_dir: args.artifact_dir,
                context_window: args.context_window,
            };

            if let [fixture] = &fixtures[..] {
                let outcome = harness.run_test(fixture).await?;
                report(&outcome);
                if !outcome.passed() {
                    bail!("clients diverge on {}", outcome.test_id);
                }
                return Ok(());
            }

            let summary = harness.run_suite(fixtures, jobs).await;
            info!(
                passed = summary.passed,
                failed = summary.failed,
                errored = summary.errored,
                "suite finished"
            );
            println!(
                "{} passed, {} failed, {} errored",
                summary.passed, summary.failed, summary.errored
            );
            if summary.passed != summary.total() {
                bail!(
                    "{} of {} tests did not pass",
                    summary.total() - summary.passed,
                    summary.total()
                );
            }
        }
        Command::Compare {
            inputs,
            to,
            test_id,
        } => {
            let harness = Harness {
                clients: Vec::new(),
                artifact_dir: args.artifact_dir,
                context_window: args.context_window,
            };
            let entry = to.map_or(CallContext::PendingCreate, CallContext::Known);
            let outcome = harness.compare_files(&test_id, &inputs, entry).await?;
            report(&outcome);
            if !outcome.passed() {
                bail!("traces diverge");
            }
        }
    }

    Ok(())
}

fn report(outcome: &Outcome) {
    if outcome.passed() {
        println!("{}: clients agree", outcome.test_id);
        return;
    }
    println!("{}: clients diverge", outcome.test_id);
    for line in &outcome.summary {
        println!("{line}");
    }
    for path in &outcome.artifacts {
        println!("  wrote {}", path.display());
    }
}
