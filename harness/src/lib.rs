//! Runs state tests through several EVM clients and reports where their
//! execution traces diverge.
//!
//! The pipeline for one test is:
//!
//! 1. load the fixture ([`fixture::load`]);
//! 2. run every configured client on it concurrently, each under its own
//!    timeout ([`client::run_client`]);
//! 3. canonicalize, compare and summarize the traces with [`trace_diff`];
//! 4. on divergence, write the diff, the summary, the raw client output and a
//!    JSON report next to each other ([`artifacts::Artifacts`]).
//!
//! [`run::Harness`] ties the steps together, for one test or a whole suite.

pub mod artifacts;
pub mod client;
pub mod env;
pub mod fixture;
pub mod run;
pub mod tracing;
