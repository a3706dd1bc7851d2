//! `parity-evm state-test --std-json` output.
//!
//! ```text
//! {"action":"starting","test":"add11"}
//! {"pc":0,"op":96,"opName":"PUSH1","gas":"0x79bf20","stack":[],"storage":{},"depth":1}
//! {"output":"0x","gasUsed":"0x9","time":112}
//! {"stateRoot":"0x1d1a..."}
//! {"stateRoot":"0x1d1a..."}
//! ```
//!
//! Failed executions end with `{"error": ..., "gasUsed": ...}` instead of an
//! output record, and the final records are sometimes printed twice.

use serde::Deserialize;
use serde_json::Value;

use super::{
    decode, scan_objects, terminal, unrecognised, words, ClientKind, OpField, Quantity, RawStep,
    Record, TraceBuilder, Word,
};
use crate::step::CanonicalStep;

const CLIENT: ClientKind = ClientKind::Parity;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParityStep {
    pc: u64,
    op: OpField,
    #[serde(default)]
    op_name: Option<String>,
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
    if value.get("action").is_some() && value.get("test").is_some() {
        return Record::Ignored;
    }
    if value.get("pc").is_some() {
        return match decode::<ParityStep>(CLIENT, &value) {
            Some(step) => Record::Step(RawStep {
                pc: step.pc,
                // Older builds print a byte that is not in their own table.
                op: step
                    .op
                    .resolve()
                    .or_else(|| step.op_name.as_deref().and_then(crate::opcodes::by_name)),
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
