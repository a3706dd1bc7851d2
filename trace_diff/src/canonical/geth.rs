//! `evm --json statetest` output.
//!
//! ```text
//! {"pc":0,"op":96,"gas":"0x79bf20","gasCost":"0x3","memSize":0,"stack":[],"depth":1,"refund":0,"opName":"PUSH1"}
//! {"output":"","gasUsed":"0x5208","time":1234}
//! {"stateRoot": "0x1d1a..."}
//! ```
//!
//! The trace goes to stderr, so anything else the binary logs there ends up
//! interleaved with it, sometimes on the same line.

use serde::Deserialize;
use serde_json::Value;

use super::{
    decode, scan_objects, terminal, unrecognised, words, ClientKind, OpField, Quantity, RawStep,
    Record, TraceBuilder, Word,
};
use crate::step::CanonicalStep;

const CLIENT: ClientKind = ClientKind::Geth;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GethStep {
    pc: u64,
    op: OpField,
    gas: Quantity,
    depth: u64,
    #[serde(default)]
    stack: Vec<Word>,
}

pub(super) fn canonicalize<S: AsRef<str>>(lines: &[S]) -> Vec<CanonicalStep> {
    let mut builder = TraceBuilder::new(CLIENT);
    for line in lines {
        scan_objects(CLIENT, line.as_ref(), &[], |object| {
            builder.push(record(Value::Object(object)))
        });
    }
    builder.finish()
}

fn record(value: Value) -> Record {
    if value.get("pc").is_some() {
        return match decode::<GethStep>(CLIENT, &value) {
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
