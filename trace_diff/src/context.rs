//! Reconstructs, for every step of a canonical trace, the address of the
//! contract whose storage the step executes against.
//!
//! The walk mirrors the EVM call stack with a stack of frames. Entering a
//! frame looks at the instruction that caused it:
//!
//! - `CALL`, `CALLCODE` and `STATICCALL` switch to the callee taken from the
//!   caller's stack;
//! - `DELEGATECALL` keeps the caller's address;
//! - `CREATE` and `CREATE2` push a [`CallContext::PendingCreate`] frame whose
//!   address only becomes known once the frame returns.
//!
//! A resolved `CREATE` frame back-fills every step it covered, including the
//! steps of frames it called into with `DELEGATECALL`.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::opcodes;
use crate::step::Step;

/// Address of the executing contract at some point of a trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallContext {
    Known(Address),
    /// Code running in a frame entered through `CREATE`/`CREATE2` whose
    /// address has not been seen yet, or whose creation failed.
    PendingCreate,
}

impl CallContext {
    pub fn address(&self) -> Option<Address> {
        match self {
            CallContext::Known(address) => Some(*address),
            CallContext::PendingCreate => None,
        }
    }
}

/// Low 20 bytes of a stack word, or `None` for zero (a failed `CREATE` pushes
/// zero).
pub fn word_to_address(word: &U256) -> Option<Address> {
    (!word.is_zero()).then(|| low_address(word))
}

pub(crate) fn low_address(word: &U256) -> Address {
    Address::from_slice(&word.to_be_bytes::<32>()[12..])
}

#[derive(Debug)]
struct Frame {
    id: usize,
    /// Last step executed in this frame so far.
    last_step: Option<usize>,
}

/// State of one walk over a trace. Contexts are kept per frame id, so that
/// resolving a frame late updates every step that ran in it.
#[derive(Debug)]
struct Tracker<'a> {
    steps: &'a [Step],
    frames: Vec<Frame>,
    contexts: Vec<CallContext>,
    /// Frames sharing their context with an earlier frame through
    /// `DELEGATECALL` point at that frame here.
    shared_with: Vec<Option<usize>>,
    step_frames: Vec<usize>,
}

impl<'a> Tracker<'a> {
    fn new(steps: &'a [Step], entry: CallContext) -> Self {
        Self {
            steps,
            frames: vec![Frame {
                id: 0,
                last_step: None,
            }],
            contexts: vec![entry],
            shared_with: vec![None],
            step_frames: Vec::with_capacity(steps.len()),
        }
    }

    /// Follows delegation links to the frame that owns the context of `id`.
    fn owner(&self, mut id: usize) -> usize {
        while let Some(parent) = self.shared_with[id] {
            id = parent;
        }
        id
    }

    fn current(&self) -> usize {
        // The root frame is never popped.
        self.frames.last().map_or(0, |it| it.id)
    }

    fn enter(&mut self, caller: &Step) {
        let caller_id = self.current();
        let id = self.contexts.len();
        let (context, shared_with) = match caller.op {
            op if opcodes::is_create(op) => (CallContext::PendingCreate, None),
            opcodes::DELEGATECALL => (self.contexts[self.owner(caller_id)], Some(caller_id)),
            op if opcodes::is_call(op) => {
                let target = opcodes::operand_slot(op, "address")
                    .and_then(|slot| caller.peek(slot))
                    .map(low_address);
                match target {
                    Some(address) => (CallContext::Known(address), None),
                    None => {
                        warn!(
                            pc = caller.pc,
                            op = opcodes::name(op),
                            "call without a target on the stack, keeping the caller's context"
                        );
                        (self.contexts[self.owner(caller_id)], Some(caller_id))
                    }
                }
            }
            op => {
                warn!(
                    pc = caller.pc,
                    op = opcodes::name(op),
                    "frame entered by a non-call instruction, keeping the caller's context"
                );
                (self.contexts[self.owner(caller_id)], Some(caller_id))
            }
        };
        debug!(frame = id, ?context, "entering frame");
        self.contexts.push(context);
        self.shared_with.push(shared_with);
        self.frames.push(Frame {
            id,
            last_step: None,
        });
    }

    /// Pops frames until `depth` frames remain above the root, resolving
    /// pending creations on the way out. `resumed` is the first step back in
    /// the surviving frame, if there is one.
    fn leave(&mut self, depth: usize, resumed: Option<&Step>) {
        while self.frames.len() > depth + 1 {
            let Some(frame) = self.frames.pop() else {
                return;
            };
            // Only the innermost surviving frame sees the CREATE result; the
            // frames popped before it ended without reaching their caller.
            let returned_to_parent = self.frames.len() == depth + 1;
            let pushed = resumed
                .filter(|_| returned_to_parent)
                .and_then(|step| step.peek(0));
            self.resolve(&frame, pushed);
        }
    }

    fn resolve(&mut self, frame: &Frame, pushed: Option<&U256>) {
        let steps = self.steps;
        if self.shared_with[frame.id].is_some()
            || self.contexts[frame.id] != CallContext::PendingCreate
        {
            return;
        }
        let address = match pushed {
            // The parent saw the result of the CREATE. Zero means it failed,
            // even if the init code got as far as RETURN.
            Some(word) => word_to_address(word),
            None => frame
                .last_step
                .map(|index| &steps[index])
                .filter(|step| step.op == opcodes::RETURN)
                .and_then(|step| step.peek(0))
                .and_then(word_to_address),
        };
        match address {
            Some(address) => {
                debug!(frame = frame.id, %address, "resolved created contract");
                self.contexts[frame.id] = CallContext::Known(address);
            }
            None => debug!(frame = frame.id, "creation did not produce an address"),
        }
    }

    fn visit(&mut self, index: usize) {
        let steps = self.steps;
        let step = &steps[index];
        let depth = step.depth.saturating_sub(steps[0].depth);
        if index > 0 {
            let prev = &steps[index - 1];
            while depth + 1 > self.frames.len() {
                self.enter(prev);
            }
            if depth + 1 < self.frames.len() {
                self.leave(depth, Some(step));
            }
        }
        let frame = self.frames.len() - 1;
        self.frames[frame].last_step = Some(index);
        self.step_frames.push(self.current());
    }

    fn finish(mut self) -> Vec<CallContext> {
        // Frames still open when the trace ends never got to resume their
        // caller, so only their own RETURN can tell where they were created.
        while self.frames.len() > 1 {
            if let Some(frame) = self.frames.pop() {
                self.resolve(&frame, None);
            }
        }
        self.step_frames
            .iter()
            .map(|&id| self.contexts[self.owner(id)])
            .collect()
    }
}

/// Returns the executing contract of every step in `steps`.
///
/// `entry` is the context of the outermost frame: the transaction's `to`
/// address, or [`CallContext::PendingCreate`] for contract creation. Depths
/// are taken relative to the first step.
pub fn track_contexts(steps: &[Step], entry: CallContext) -> Vec<CallContext> {
    if steps.is_empty() {
        return Vec::new();
    }
    let mut tracker = Tracker::new(steps, entry);
    for index in 0..steps.len() {
        tracker.visit(index);
    }
    tracker.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: Address = Address::repeat_byte(0xaa);
    const BOB: Address = Address::repeat_byte(0xbb);

    fn step(op: u8, depth: usize, stack: &[U256]) -> Step {
        Step {
            pc: 0,
            op,
            gas: 1000,
            depth,
            stack: stack.to_vec(),
        }
    }

    fn word(address: Address) -> U256 {
        U256::from_be_slice(address.as_slice())
    }

    /// Operands of a call to `target`, bottom of the stack first.
    fn call_stack(target: Address) -> Vec<U256> {
        vec![
            U256::ZERO,
            U256::ZERO,
            U256::ZERO,
            U256::ZERO,
            U256::ZERO,
            word(target),
            U256::from(50_000),
        ]
    }

    #[test]
    fn call_switches_and_return_restores() {
        let steps = [
            step(0x60, 0, &[]),
            step(opcodes::CALL, 0, &call_stack(BOB)),
            step(0x60, 1, &[]),
            step(opcodes::SLOAD, 1, &[U256::from(1)]),
            step(0x50, 0, &[U256::from(1)]),
        ];
        let contexts = track_contexts(&steps, CallContext::Known(ALICE));
        assert_eq!(
            contexts,
            [
                CallContext::Known(ALICE),
                CallContext::Known(ALICE),
                CallContext::Known(BOB),
                CallContext::Known(BOB),
                CallContext::Known(ALICE),
            ]
        );
    }

    #[test]
    fn delegatecall_keeps_the_callers_address() {
        let mut stack = call_stack(BOB);
        stack.remove(4);
        let steps = [
            step(opcodes::DELEGATECALL, 0, &stack),
            step(opcodes::SSTORE, 1, &[U256::from(2), U256::from(1)]),
            step(0x50, 0, &[U256::from(1)]),
        ];
        let contexts = track_contexts(&steps, CallContext::Known(ALICE));
        assert!(contexts.iter().all(|it| *it == CallContext::Known(ALICE)));
    }

    #[test]
    fn callcode_runs_in_the_target_frame() {
        let steps = [
            step(opcodes::CALLCODE, 0, &call_stack(BOB)),
            step(0x60, 1, &[]),
        ];
        let contexts = track_contexts(&steps, CallContext::Known(ALICE));
        assert_eq!(contexts[1], CallContext::Known(BOB));
    }

    #[test]
    fn create_resolves_from_the_pushed_address() {
        let steps = [
            step(opcodes::CREATE, 0, &[U256::from(10), U256::ZERO, U256::ZERO]),
            step(0x60, 1, &[]),
            step(opcodes::RETURN, 1, &[U256::from(32), U256::ZERO]),
            step(0x50, 0, &[word(BOB)]),
        ];
        let contexts = track_contexts(&steps, CallContext::Known(ALICE));
        assert_eq!(contexts[1], CallContext::Known(BOB));
        assert_eq!(contexts[2], CallContext::Known(BOB));
        assert_eq!(contexts[3], CallContext::Known(ALICE));
    }

    #[test]
    fn failed_create_stays_pending() {
        let steps = [
            step(opcodes::CREATE2, 0, &[U256::ZERO; 4]),
            step(0x60, 1, &[]),
            step(0xfd, 1, &[U256::ZERO, U256::ZERO]),
            step(0x50, 0, &[U256::ZERO]),
        ];
        let contexts = track_contexts(&steps, CallContext::Known(ALICE));
        assert_eq!(contexts[1], CallContext::PendingCreate);
        assert_eq!(contexts[3], CallContext::Known(ALICE));
    }

    #[test]
    fn failed_create_after_return() {
        // The init code returned, but the deposit failed and CREATE pushed 0.
        let steps = [
            step(opcodes::CREATE, 0, &[U256::ZERO; 3]),
            step(0x60, 1, &[]),
            step(opcodes::RETURN, 1, &[U256::from(0x20), U256::from(0x40)]),
            step(0x50, 0, &[U256::ZERO]),
        ];
        let contexts = track_contexts(&steps, CallContext::Known(ALICE));
        assert_eq!(contexts[1], CallContext::PendingCreate);
        assert_eq!(contexts[2], CallContext::PendingCreate);
        assert_eq!(contexts[3], CallContext::Known(ALICE));
    }

    #[test]
    fn create_without_a_visible_result_falls_back_to_return() {
        let steps = [
            step(opcodes::CREATE, 0, &[U256::ZERO; 3]),
            step(opcodes::RETURN, 1, &[U256::from(0x20), word(BOB)]),
            step(0x5f, 0, &[]),
        ];
        let contexts = track_contexts(&steps, CallContext::Known(ALICE));
        assert_eq!(contexts[1], CallContext::Known(BOB));
    }

    #[test]
    fn delegatecall_inside_create_is_back_filled() {
        let mut delegate = call_stack(ALICE);
        delegate.remove(4);
        let steps = [
            step(opcodes::CREATE, 0, &[U256::ZERO; 3]),
            step(opcodes::DELEGATECALL, 1, &delegate),
            step(opcodes::SSTORE, 2, &[U256::ZERO, U256::from(1)]),
            step(opcodes::RETURN, 1, &[U256::ZERO, U256::ZERO]),
            step(0x50, 0, &[word(BOB)]),
        ];
        let contexts = track_contexts(&steps, CallContext::Known(ALICE));
        assert_eq!(contexts[2], CallContext::Known(BOB));
    }

    #[test]
    fn multi_level_return() {
        let steps = [
            step(opcodes::CALL, 0, &call_stack(BOB)),
            step(opcodes::CREATE, 1, &[U256::ZERO; 3]),
            step(0x60, 2, &[]),
            step(0x50, 0, &[U256::from(1)]),
        ];
        let contexts = track_contexts(&steps, CallContext::Known(ALICE));
        assert_eq!(contexts[2], CallContext::PendingCreate);
        assert_eq!(contexts[3], CallContext::Known(ALICE));
    }

    #[test]
    fn relative_to_the_first_step() {
        let steps = [step(opcodes::CALL, 1, &call_stack(BOB)), step(0x60, 2, &[])];
        let contexts = track_contexts(&steps, CallContext::Known(ALICE));
        assert_eq!(contexts[1], CallContext::Known(BOB));
        assert!(track_contexts(&[], CallContext::PendingCreate).is_empty());
    }

    #[test]
    fn words_to_addresses() {
        assert_eq!(word_to_address(&U256::ZERO), None);
        assert_eq!(word_to_address(&word(BOB)), Some(BOB));
        let high = (U256::from(1) << 200) | word(BOB);
        assert_eq!(word_to_address(&high), Some(BOB));
    }
}
