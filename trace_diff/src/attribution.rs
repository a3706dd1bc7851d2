//! Storage accesses and outgoing calls, tagged with the contract that made
//! them.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::context::{low_address, CallContext};
use crate::opcodes;
use crate::step::Step;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageAccess {
    /// Position of the step in the trace.
    pub index: usize,
    pub op: u8,
    pub contract: CallContext,
    pub key: U256,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalCall {
    pub index: usize,
    pub op: u8,
    pub caller: CallContext,
    /// The callee for the call family, the created contract (if it was
    /// resolved) for `CREATE`/`CREATE2`.
    pub target: CallContext,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    pub storage: Vec<StorageAccess>,
    pub calls: Vec<ExternalCall>,
}

impl Attribution {
    /// Storage keys touched by `contract`, in trace order.
    pub fn keys_of(&self, contract: Address) -> impl Iterator<Item = &U256> + '_ {
        self.storage
            .iter()
            .filter(move |it| it.contract == CallContext::Known(contract))
            .map(|it| &it.key)
    }
}

/// Pairs every storage access and outgoing call in `steps` with the contexts
/// computed by [`track_contexts`](crate::track_contexts).
pub fn attribute(steps: &[Step], contexts: &[CallContext]) -> Attribution {
    if steps.len() != contexts.len() {
        warn!(
            steps = steps.len(),
            contexts = contexts.len(),
            "context count does not match the trace, attributing the common prefix"
        );
    }

    let mut attribution = Attribution::default();
    for (index, (step, &context)) in steps.iter().zip(contexts).enumerate() {
        match step.op {
            opcodes::SLOAD | opcodes::SSTORE | opcodes::TLOAD | opcodes::TSTORE => {
                let Some(key) = opcodes::operand_slot(step.op, "key").and_then(|it| step.peek(it))
                else {
                    warn!(index, op = opcodes::name(step.op), "storage access without a key");
                    continue;
                };
                attribution.storage.push(StorageAccess {
                    index,
                    op: step.op,
                    contract: context,
                    key: *key,
                });
            }
            op if opcodes::is_call(op) => {
                let target = opcodes::operand_slot(op, "address")
                    .and_then(|it| step.peek(it))
                    .map(low_address);
                let Some(target) = target else {
                    warn!(index, op = opcodes::name(op), "call without a target");
                    continue;
                };
                attribution.calls.push(ExternalCall {
                    index,
                    op,
                    caller: context,
                    target: CallContext::Known(target),
                });
            }
            op if opcodes::is_create(op) => {
                // The created contract is the context of the next step if the
                // creation ran any code at all.
                let target = steps
                    .get(index + 1)
                    .zip(contexts.get(index + 1))
                    .filter(|(next, _)| next.depth > step.depth)
                    .map_or(CallContext::PendingCreate, |(_, it)| *it);
                attribution.calls.push(ExternalCall {
                    index,
                    op,
                    caller: context,
                    target,
                });
            }
            _ => {}
        }
    }
    attribution
}
