//! Differential testing of EVM implementations works by running the same
//! state test through several clients and checking that they execute it the
//! same way, instruction by instruction.
//!
//! Getting there means dealing with the fact that every client prints its
//! trace in its own dialect. This library:
//!
//! 1. reduces each client's raw output to a sequence of [`CanonicalStep`]s
//!    ([`ClientKind::canonicalize`]),
//! 2. lines up N such traces and reports every position where they disagree
//!    ([`compare`]),
//! 3. cuts the resulting diff down to the part around the first divergence
//!    ([`summarize`]),
//! 4. reconstructs which contract was executing at each step
//!    ([`track_contexts`]) so storage accesses and calls can be attributed
//!    ([`attribute`]).
//!
//! Nothing here runs a client; see the `harness` crate for that.
//!
//! # Non-Goals
//! - Executing bytecode. Execution is always delegated to a client.
//! - Generic JSON diffing. Only the canonical step fields are compared.

#![deny(rustdoc::broken_intra_doc_links)]
#![warn(missing_debug_implementations)]

pub mod attribution;
pub mod canonical;
pub mod compare;
pub mod context;
pub mod opcodes;
pub mod step;
pub mod summary;

pub use attribution::{attribute, Attribution};
pub use canonical::ClientKind;
pub use compare::{compare, ComparisonResult, DiffLine};
pub use context::{track_contexts, CallContext};
pub use step::{CanonicalStep, Step, Terminal};
pub use summary::{summarize, DEFAULT_CONTEXT_WINDOW};
