//! `ethereumjs` state-test runner with `--jsontrace`.
//!
//! Same line-per-step framing as geth, but depth starts at `0` and stack
//! words are printed fully padded.

use serde::Deserialize;
use serde_json::Value;

use super::{
    decode, scan_objects, terminal, unrecognised, words, ClientKind, OpField, Quantity, RawStep,
    Record, TraceBuilder, Word,
};
use crate::step::CanonicalStep;

const CLIENT: ClientKind = ClientKind::EthereumJs;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EthereumJsStep {
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
    if value.get("pc").is_some() {
        return match decode::<EthereumJsStep>(CLIENT, &value) {
            Some(step) => Record::Step(RawStep {
                pc: step.pc,
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
