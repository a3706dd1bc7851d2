//! `testeth --jsontrace` output: every step in one JSON array, mnemonic
//! opcodes and decimal gas, followed by the state root once the test is done.
//!
//! ```text
//! [{"pc":0,"op":"PUSH1","gas":"79000","gasCost":"3","depth":1,"stack":[]},
//! {"pc":2,"op":"PUSH1","gas":"78997","gasCost":"3","depth":1,"stack":["0x1"]}]
//! {"stateRoot":"0x1d1a..."}
//! ```
//!
//! The array is usually pretty-printed over many lines, so the output is
//! scanned as a whole rather than line by line.

use itertools::Itertools as _;
use serde::Deserialize;
use serde_json::Value;

use super::{
    decode, scan_objects, terminal, unrecognised, words, ClientKind, OpField, Quantity, RawStep,
    Record, TraceBuilder, Word,
};
use crate::step::CanonicalStep;

const CLIENT: ClientKind = ClientKind::Aleth;

const SEPARATORS: &[char] = &['[', ']', ','];

#[derive(Deserialize)]
struct AlethStep {
    pc: u64,
    op: OpField,
    gas: Quantity,
    depth: u64,
    #[serde(default)]
    stack: Vec<Word>,
}

pub(super) fn canonicalize<S: AsRef<str>>(lines: &[S]) -> Vec<CanonicalStep> {
    let text = lines.iter().map(AsRef::as_ref).join("\n");
    let mut builder = TraceBuilder::new(CLIENT);
    scan_objects(CLIENT, &text, SEPARATORS, |object| {
        builder.push(record(Value::Object(object)))
    });
    builder.finish()
}

fn record(value: Value) -> Record {
    if value.get("pc").is_some() {
        return match decode::<AlethStep>(CLIENT, &value) {
            Some(step) => Record::Step(RawStep {
                pc: step.pc,
                op: step.op.resolve(),
                gas: step.gas.0,
                depth: step.depth,
                stack: words(step.stack),
            }),
            None => Record::Invalid,
        };
    }
    match terminal(&value) {
        Some(terminal) => Record::Terminal(terminal),
        None => unrecognised(CLIENT, &value),
    }
}
