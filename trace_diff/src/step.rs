//! The canonical execution-step record every client trace is reduced to.

use std::fmt;

use alloy_primitives::{B256, U256};
use itertools::Itertools as _;
use serde::{Deserialize, Serialize};

use crate::opcodes;

/// One executed instruction, normalized across clients.
///
/// Memory, storage and return data are deliberately absent: clients format
/// them differently enough that comparing them produces mostly noise.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Step {
    pub pc: u64,
    pub op: u8,
    /// Gas remaining before `op` executes.
    pub gas: u64,
    /// Zero-based call depth; the outermost frame is `0`.
    pub depth: usize,
    /// Bottom of the stack first, top of the stack last.
    pub stack: Vec<U256>,
}

impl Step {
    /// The element `n` positions below the top of the stack.
    pub fn peek(&self, n: usize) -> Option<&U256> {
        self.stack.iter().rev().nth(n)
    }
}

/// End-of-execution record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Terminal {
    StateRoot(B256),
    Output {
        /// Lower-case, `0x`-prefixed.
        output: String,
        gas_used: u64,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CanonicalStep {
    Exec(Step),
    Terminal(Terminal),
}

impl CanonicalStep {
    pub fn as_exec(&self) -> Option<&Step> {
        match self {
            CanonicalStep::Exec(step) => Some(step),
            CanonicalStep::Terminal(_) => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CanonicalStep::Terminal(_))
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pc {:>5} op {:#04x} {:<14} gas {:>10} depth {:>2} stack [{}]",
            self.pc,
            self.op,
            opcodes::name(self.op),
            self.gas,
            self.depth,
            self.stack.iter().map(|it| format!("0x{it:x}")).join(", ")
        )
    }
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminal::StateRoot(root) => write!(f, "stateRoot {root}"),
            Terminal::Output { output, gas_used } => write!(f, "output {output} gasUsed {gas_used}"),
        }
    }
}

impl fmt::Display for CanonicalStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanonicalStep::Exec(step) => step.fmt(f),
            CanonicalStep::Terminal(terminal) => terminal.fmt(f),
        }
    }
}

/// A step that enters a frame more than one level below its predecessor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("depth jumps from {from} to {to} at step {index}")]
pub struct DepthError {
    pub index: usize,
    pub from: usize,
    pub to: usize,
}

/// Checks that every call-depth increase between consecutive steps is exactly
/// one. Decreases may span several frames when the intermediate frames ended
/// on a filtered `STOP`.
pub fn check_depth<'a>(steps: impl IntoIterator<Item = &'a Step>) -> Result<(), DepthError> {
    steps
        .into_iter()
        .enumerate()
        .tuple_windows()
        .try_for_each(|((_, prev), (index, step))| match step.depth > prev.depth + 1 {
            true => Err(DepthError {
                index,
                from: prev.depth,
                to: step.depth,
            }),
            false => Ok(()),
        })
}
