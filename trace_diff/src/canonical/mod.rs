//! Client trace dialects -> [`CanonicalStep`]s.
//!
//! Every client prints its execution trace a little differently: numeric or
//! symbolic opcodes, hex or decimal gas, one- or zero-based depth, a JSON
//! object per line or one big array, test envelopes, duplicated state roots,
//! and whatever the client happened to write to stderr in between.
//!
//! Each dialect has its own module that decodes records into [`Record`]s. The
//! rules every dialect shares (depth baseline, opcode filtering, a single
//! trailing terminal record) live in [`TraceBuilder`].

mod aleth;
mod ethereumjs;
mod geth;
mod parity;

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{B256, U256};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::opcodes;
use crate::step::{CanonicalStep, Step, Terminal};

/// The trace dialects we know how to read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    /// `evm --json statetest`: one object per line, numeric `op`, one-based
    /// depth.
    Geth,
    /// `parity-evm state-test --std-json`: one object per line, preceded by a
    /// `{"action", "test"}` envelope, may repeat its final records.
    Parity,
    /// `testeth --jsontrace`: a single JSON array of steps with symbolic
    /// opcodes and decimal gas.
    Aleth,
    /// `ethereumjs` state runner: one object per line with zero-based depth.
    EthereumJs,
}

impl ClientKind {
    pub const ALL: [ClientKind; 4] = [
        ClientKind::Geth,
        ClientKind::Parity,
        ClientKind::Aleth,
        ClientKind::EthereumJs,
    ];

    /// Reduce the raw output of one client process to its canonical trace.
    ///
    /// Never fails: anything that cannot be understood is logged and skipped.
    pub fn canonicalize<S: AsRef<str>>(self, lines: &[S]) -> Vec<CanonicalStep> {
        match self {
            ClientKind::Geth => geth::canonicalize(lines),
            ClientKind::Parity => parity::canonicalize(lines),
            ClientKind::Aleth => aleth::canonicalize(lines),
            ClientKind::EthereumJs => ethereumjs::canonicalize(lines),
        }
    }

    /// The depth the dialect reports for the outermost frame.
    pub fn depth_base(self) -> u64 {
        match self {
            ClientKind::Geth | ClientKind::Parity | ClientKind::Aleth => 1,
            ClientKind::EthereumJs => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClientKind::Geth => "geth",
            ClientKind::Parity => "parity",
            ClientKind::Aleth => "aleth",
            ClientKind::EthereumJs => "ethereumjs",
        }
    }
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown client kind `{0}`, expected one of geth, parity, aleth, ethereumjs")]
pub struct UnknownClientKind(pub String);

impl FromStr for ClientKind {
    type Err = UnknownClientKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ClientKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownClientKind(s.to_owned()))
    }
}

/// One decoded record of a client's output.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Record {
    Step(RawStep),
    Terminal(Terminal),
    /// Recognised, carries nothing comparable (test envelopes and the like).
    Ignored,
    /// Not understood; already logged by the dialect.
    Invalid,
}

/// A step as the client reported it, before depth and opcode normalization.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawStep {
    pub pc: u64,
    /// `None` if the client's opcode could not be mapped to a byte.
    pub op: Option<u8>,
    pub gas: u64,
    pub depth: u64,
    pub stack: Vec<U256>,
}

/// Applies the rules shared by every dialect while records stream in.
#[derive(Debug)]
pub(crate) struct TraceBuilder {
    client: ClientKind,
    baseline: Option<u64>,
    last_raw: Option<RawStep>,
    steps: Vec<Step>,
    terminal: Option<Terminal>,
}

impl TraceBuilder {
    pub fn new(client: ClientKind) -> Self {
        Self {
            client,
            baseline: None,
            last_raw: None,
            steps: Vec::new(),
            terminal: None,
        }
    }

    pub fn push(&mut self, record: Record) {
        match record {
            Record::Step(raw) => self.step(raw),
            Record::Terminal(terminal) => self.terminal(terminal),
            Record::Ignored | Record::Invalid => {}
        }
    }

    fn step(&mut self, raw: RawStep) {
        if self.last_raw.as_ref() == Some(&raw) {
            debug!(client = %self.client, pc = raw.pc, "dropping repeated step");
            return;
        }
        self.last_raw = Some(raw.clone());

        // The first step of a trace is in the outermost frame, whatever the
        // client calls that depth.
        let baseline = *self.baseline.get_or_insert_with(|| {
            if raw.depth != self.client.depth_base() {
                warn!(
                    client = %self.client,
                    expected = self.client.depth_base(),
                    found = raw.depth,
                    "first step is not at the documented base depth, using it as the baseline"
                );
            }
            raw.depth
        });

        let Some(op) = raw.op.filter(|op| opcodes::is_defined(*op)) else {
            debug!(client = %self.client, pc = raw.pc, op = ?raw.op, "dropping unknown opcode");
            return;
        };
        if op == opcodes::STOP || op == opcodes::INVALID {
            return;
        }

        let Some(depth) = raw.depth.checked_sub(baseline) else {
            warn!(
                client = %self.client,
                pc = raw.pc,
                depth = raw.depth,
                baseline,
                "dropping step above the outermost frame"
            );
            return;
        };
        let depth = depth as usize;
        if let Some(prev) = self.steps.last() {
            if depth > prev.depth + 1 {
                warn!(
                    client = %self.client,
                    pc = raw.pc,
                    from = prev.depth,
                    to = depth,
                    "dropping step that skips a call frame"
                );
                return;
            }
        }

        self.steps.push(Step {
            pc: raw.pc,
            op,
            gas: raw.gas,
            depth,
            stack: raw.stack,
        });
    }

    fn terminal(&mut self, terminal: Terminal) {
        let replaces = matches!(
            (&self.terminal, &terminal),
            (None, _) | (Some(Terminal::Output { .. }), Terminal::StateRoot(_))
        );
        match replaces {
            true => self.terminal = Some(terminal),
            false => debug!(client = %self.client, %terminal, "dropping extra terminal record"),
        }
    }

    pub fn finish(self) -> Vec<CanonicalStep> {
        let has_steps = !self.steps.is_empty();
        let mut out: Vec<CanonicalStep> =
            self.steps.into_iter().map(CanonicalStep::Exec).collect();
        // A transaction that never entered the EVM has nothing to terminate.
        if let Some(terminal) = self.terminal.filter(|_| has_steps) {
            out.push(CanonicalStep::Terminal(terminal));
        }
        out
    }
}

/// Feeds every JSON object found in `text` to `sink`, in order.
///
/// Text around objects is logged and skipped unless it consists solely of
/// whitespace and `separators`. After a malformed fragment the scan resumes at
/// the next `{`. A fragment cut short by the end of `text` ends the scan.
pub(crate) fn scan_objects(
    client: ClientKind,
    text: &str,
    separators: &[char],
    mut sink: impl FnMut(Map<String, Value>),
) {
    let junk = |s: &str| {
        let s = s.trim_matches(|c: char| c.is_whitespace() || separators.contains(&c));
        if !s.is_empty() {
            warn!(%client, text = %excerpt(s), "skipping non-JSON output");
        }
    };

    let mut rest = text;
    while let Some(start) = rest.find('{') {
        junk(&rest[..start]);
        rest = &rest[start..];
        let mut stream =
            serde_json::Deserializer::from_str(rest).into_iter::<Map<String, Value>>();
        match stream.next() {
            Some(Ok(object)) => {
                sink(object);
                rest = &rest[stream.byte_offset()..];
            }
            Some(Err(e)) if e.is_eof() => {
                warn!(
                    %client,
                    fragment = %excerpt(rest),
                    "truncated JSON fragment, no further steps"
                );
                return;
            }
            Some(Err(e)) => {
                warn!(
                    %client,
                    error = %e,
                    fragment = %excerpt(rest),
                    "skipping malformed JSON fragment"
                );
                rest = &rest[1..];
            }
            None => return,
        }
    }
    junk(rest);
}

/// Decodes the records every dialect shares: state roots and output/gasUsed
/// summaries.
pub(crate) fn terminal(value: &Value) -> Option<Terminal> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        StateRoot {
            #[serde(rename = "stateRoot")]
            state_root: B256,
        },
        Output {
            #[serde(default)]
            output: Option<String>,
            #[serde(rename = "gasUsed")]
            gas_used: Quantity,
        },
    }

    Some(match Raw::deserialize(value).ok()? {
        Raw::StateRoot { state_root } => Terminal::StateRoot(state_root),
        Raw::Output { output, gas_used } => Terminal::Output {
            output: normalize_output(output.as_deref().unwrap_or_default()),
            gas_used: gas_used.0,
        },
    })
}

/// Decodes a step record, logging the raw record if it does not fit.
pub(crate) fn decode<'de, T: Deserialize<'de>>(client: ClientKind, value: &'de Value) -> Option<T> {
    T::deserialize(value)
        .inspect_err(|e| warn!(%client, error = %e, record = %value, "skipping malformed step"))
        .ok()
}

pub(crate) fn unrecognised(client: ClientKind, value: &Value) -> Record {
    warn!(%client, record = %value, "skipping unrecognised record");
    Record::Invalid
}

fn normalize_output(output: &str) -> String {
    let digits = output
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    match hex::decode(digits) {
        Ok(bytes) => format!("0x{}", hex::encode(bytes)),
        Err(_) => format!("0x{}", digits.to_ascii_lowercase()),
    }
}

fn excerpt(s: &str) -> String {
    const MAX: usize = 120;
    match s.char_indices().nth(MAX) {
        Some((end, _)) => format!("{}...", &s[..end]),
        None => s.to_owned(),
    }
}

/// A gas amount: a JSON number, a `0x`-prefixed hex string or a decimal
/// string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Quantity(pub u64);

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            String(String),
        }
        match Raw::deserialize(d)? {
            Raw::Number(it) => Ok(Quantity(it)),
            Raw::String(s) => parse_quantity(&s)
                .map(Quantity)
                .ok_or_else(|| D::Error::custom(format_args!("invalid quantity {s:?}"))),
        }
    }
}

fn parse_quantity(s: &str) -> Option<u64> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some("") => Some(0),
        Some(digits) => u64::from_str_radix(digits, 16).ok(),
        None => s.parse().ok(),
    }
}

/// A stack element: a hex string, with or without `0x`, any padding, any case.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Word(pub U256);

impl<'de> Deserialize<'de> for Word {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            String(String),
        }
        match Raw::deserialize(d)? {
            Raw::Number(it) => Ok(Word(U256::from(it))),
            Raw::String(s) => parse_word(&s)
                .map(Word)
                .ok_or_else(|| D::Error::custom(format_args!("invalid stack word {s:?}"))),
        }
    }
}

pub(crate) fn parse_word(s: &str) -> Option<U256> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    match digits.trim_start_matches('0') {
        "" => Some(U256::ZERO),
        significant => U256::from_str_radix(significant, 16).ok(),
    }
}

pub(crate) fn words(stack: Vec<Word>) -> Vec<U256> {
    stack.into_iter().map(|Word(it)| it).collect()
}

/// Opcodes are either the byte itself or the mnemonic.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub(crate) enum OpField {
    Code(u64),
    Name(String),
}

impl OpField {
    pub fn resolve(&self) -> Option<u8> {
        match self {
            OpField::Code(code) => u8::try_from(*code).ok(),
            OpField::Name(name) => opcodes::by_name(name)
                .or_else(|| parse_quantity(name).and_then(|it| u8::try_from(it).ok())),
        }
    }
}
