//! End-to-end: raw client output in every dialect, through canonicalization,
//! comparison and summarization.

use alloy_primitives::{Address, B256, U256};
use assert2::{check, let_assert};
use serde_json::json;
use trace_diff::{
    compare, opcodes, step::check_depth, summarize, track_contexts, CallContext, CanonicalStep,
    ClientKind, DiffLine, Step, DEFAULT_CONTEXT_WINDOW,
};

/// One executed instruction, independent of any dialect.
#[derive(Clone, Copy)]
struct Op {
    pc: u64,
    op: u8,
    gas: u64,
    depth: u64,
    stack: &'static [u64],
}

const fn op(pc: u64, op: u8, gas: u64, depth: u64, stack: &'static [u64]) -> Op {
    Op {
        pc,
        op,
        gas,
        depth,
        stack,
    }
}

/// PUSH1 1, PUSH1 2, ADD, POP, STOP.
const PROGRAM: &[Op] = &[
    op(0, 0x60, 100, 0, &[]),
    op(2, 0x60, 97, 0, &[1]),
    op(4, 0x01, 94, 0, &[1, 2]),
    op(5, 0x50, 91, 0, &[3]),
    op(6, 0x00, 89, 0, &[]),
];

const ROOT: &str = "0x5a4b3c2d1e0f5a4b3c2d1e0f5a4b3c2d1e0f5a4b3c2d1e0f5a4b3c2d1e0f5a4b";

fn geth(ops: &[Op]) -> Vec<String> {
    let mut lines: Vec<String> = ops
        .iter()
        .map(|it| {
            json!({
                "pc": it.pc,
                "op": it.op,
                "gas": format!("{:#x}", it.gas),
                "gasCost": "0x3",
                "memSize": 0,
                "stack": it.stack.iter().map(|v| format!("{v:#x}")).collect::<Vec<_>>(),
                "depth": it.depth + 1,
                "refund": 0,
                "opName": opcodes::name(it.op),
            })
            .to_string()
        })
        .collect();
    lines.push(json!({"output": "", "gasUsed": "0xb", "time": 1000}).to_string());
    lines.push(json!({ "stateRoot": ROOT }).to_string());
    lines
}

fn parity(ops: &[Op]) -> Vec<String> {
    let mut lines = vec![json!({"action": "starting", "test": "add"}).to_string()];
    lines.extend(ops.iter().map(|it| {
        json!({
            "pc": it.pc,
            "op": it.op,
            "opName": opcodes::name(it.op),
            "gas": format!("{:#x}", it.gas),
            "stack": it.stack.iter().map(|v| format!("0x{v:04x}")).collect::<Vec<_>>(),
            "storage": {},
            "depth": it.depth + 1,
        })
        .to_string()
    }));
    lines.push(json!({"output": "0x", "gasUsed": "0xb", "time": 15}).to_string());
    lines.push(json!({ "stateRoot": ROOT }).to_string());
    lines.push(json!({ "stateRoot": ROOT }).to_string());
    lines
}

fn aleth(ops: &[Op]) -> Vec<String> {
    let steps: Vec<_> = ops
        .iter()
        .map(|it| {
            json!({
                "pc": it.pc,
                "op": opcodes::name(it.op),
                "gas": it.gas.to_string(),
                "gasCost": "3",
                "depth": it.depth + 1,
                "stack": it.stack.iter().map(|v| format!("{v:#X}")).collect::<Vec<_>>(),
            })
        })
        .collect();
    let pretty = serde_json::to_string_pretty(&steps).unwrap();
    let mut lines: Vec<String> = pretty.lines().map(str::to_owned).collect();
    lines.push(json!({ "stateRoot": ROOT }).to_string());
    lines
}

fn ethereumjs(ops: &[Op]) -> Vec<String> {
    let mut lines: Vec<String> = ops
        .iter()
        .map(|it| {
            json!({
                "pc": it.pc,
                "op": it.op,
                "gas": format!("{:#x}", it.gas),
                "gasCost": "0x3",
                "stack": it.stack.iter().map(|v| format!("0x{v:064x}")).collect::<Vec<_>>(),
                "depth": it.depth,
                "opName": opcodes::name(it.op),
            })
            .to_string()
        })
        .collect();
    lines.push(json!({ "stateRoot": ROOT }).to_string());
    lines
}

fn raw(kind: ClientKind, ops: &[Op]) -> Vec<String> {
    match kind {
        ClientKind::Geth => geth(ops),
        ClientKind::Parity => parity(ops),
        ClientKind::Aleth => aleth(ops),
        ClientKind::EthereumJs => ethereumjs(ops),
    }
}

fn canonical(ops: &[Op]) -> Vec<CanonicalStep> {
    ops.iter()
        .filter(|it| it.op != opcodes::STOP)
        .map(|it| {
            CanonicalStep::Exec(Step {
                pc: it.pc,
                op: it.op,
                gas: it.gas,
                depth: it.depth as usize,
                stack: it.stack.iter().copied().map(U256::from).collect(),
            })
        })
        .collect()
}

#[test]
fn every_dialect_agrees_on_the_same_execution() {
    let traces: Vec<_> = ClientKind::ALL
        .iter()
        .map(|kind| kind.canonicalize(&raw(*kind, PROGRAM)))
        .collect();
    let names = ClientKind::ALL.map(|it| it.to_string());

    let result = compare(&traces, &names);
    check!(result.equivalent, "{}", result.render());
    check!(result.diff_lines.len() == 5);

    let mut expected = canonical(PROGRAM);
    expected.push(CanonicalStep::Terminal(trace_diff::Terminal::StateRoot(
        ROOT.parse::<B256>().unwrap(),
    )));
    check!(traces[0] == expected);
}

#[test]
fn identical_traces() {
    let trace = canonical(&PROGRAM[..3]);
    let result = compare(&[trace.clone(), trace], &["a", "b"]);
    check!(result.equivalent);
    check!(result.diff_lines.len() == 3);
    check!(result.diff_lines.iter().all(|it| !it.is_disagreement()));
}

#[test]
fn shorter_trace_is_a_divergence() {
    let full = canonical(&PROGRAM[..3]);
    let short = canonical(&PROGRAM[..2]);
    let result = compare(&[full, short], &["a", "b"]);
    check!(!result.equivalent);
    check!(result.first_divergence() == Some(2));
    let_assert!(
        [DiffLine::Disagree { client, text, .. }] = &result.diff_lines[3..]
    );
    check!(client == "b");
    check!(text == "(exhausted)");
}

#[test]
fn depth_bases_are_normalized() {
    let one_based = ClientKind::Geth.canonicalize(&geth(PROGRAM));
    let zero_based = ClientKind::EthereumJs.canonicalize(&ethereumjs(PROGRAM));
    let_assert!(Some(first) = zero_based[0].as_exec());
    check!(first.depth == 0);
    check!(one_based[0] == zero_based[0]);
    check!(compare(&[one_based, zero_based], &["geth", "ethereumjs"]).equivalent);
}

#[test]
fn create_resolves_on_return() {
    let created: Address = "0xdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef".parse().unwrap();
    let word = U256::from_be_slice(created.as_slice());
    let exec = |pc: u64, op: u8, depth: usize, stack: Vec<U256>| Step {
        pc,
        op,
        gas: 10_000 - pc,
        depth,
        stack,
    };
    let steps = [
        exec(0, 0x60, 0, vec![]),
        exec(2, 0x60, 0, vec![U256::from(5)]),
        exec(4, 0x60, 0, vec![U256::from(5), U256::ZERO]),
        exec(6, 0x60, 0, vec![U256::from(5), U256::ZERO, U256::ZERO]),
        exec(7, 0x60, 0, vec![U256::from(5), U256::ZERO, U256::ZERO]),
        exec(8, opcodes::CREATE, 0, vec![U256::ZERO, U256::ZERO, U256::ZERO]),
        exec(0, 0x60, 1, vec![]),
        exec(2, 0x60, 1, vec![U256::from(32)]),
        exec(4, opcodes::SSTORE, 1, vec![U256::from(32), U256::from(1)]),
        exec(5, opcodes::RETURN, 1, vec![word]),
    ];
    let caller = Address::repeat_byte(0x11);
    let contexts = track_contexts(&steps, CallContext::Known(caller));
    check!(contexts[5] == CallContext::Known(caller));
    check!(contexts[6] == CallContext::Known(created));
    check!(contexts[9] == CallContext::Known(created));

    let attribution = trace_diff::attribute(&steps, &contexts);
    check!(attribution.keys_of(created).count() == 1);
}

#[test]
fn garbage_between_steps() {
    let lines = geth(&PROGRAM[..2]);
    let lines = [lines[0].clone(), "garbage-not-json".to_owned(), lines[1].clone()];
    let trace = ClientKind::Geth.canonicalize(&lines);
    check!(trace == canonical(&PROGRAM[..2]));
}

#[test]
fn stack_padding_does_not_matter() {
    let padded = [json!({"pc": 0, "op": 1, "gas": "0x10", "stack": ["0x02", "0x0003"], "depth": 1})
        .to_string()];
    let minimal = [json!({"pc": 0, "op": 1, "gas": "0x10", "stack": ["0x2", "0x3"], "depth": 1})
        .to_string()];
    let a = ClientKind::Geth.canonicalize(&padded);
    let b = ClientKind::Parity.canonicalize(&minimal);
    check!(compare(&[a, b], &["geth", "parity"]).equivalent);
}

#[test]
fn canonicalization_is_idempotent() {
    for kind in ClientKind::ALL {
        let lines = raw(kind, PROGRAM);
        check!(kind.canonicalize(&lines) == kind.canonicalize(&lines), "{kind}");
    }
}

#[test]
fn depth_changes_by_at_most_one() {
    let nested = [
        op(0, opcodes::CALL, 100, 0, &[0, 0, 0, 0, 0, 0xbb, 50]),
        op(0, 0x60, 50, 1, &[]),
        op(2, opcodes::DELEGATECALL, 47, 1, &[0, 0, 0, 0, 0xcc, 20]),
        op(0, 0x60, 20, 2, &[]),
        op(2, 0x50, 17, 2, &[1]),
        op(3, 0x50, 40, 1, &[1]),
        op(4, 0x50, 30, 0, &[1]),
    ];
    for kind in ClientKind::ALL {
        let trace = kind.canonicalize(&raw(kind, &nested));
        let steps: Vec<_> = trace.iter().filter_map(CanonicalStep::as_exec).collect();
        check!(steps.len() == nested.len(), "{kind}");
        check!(check_depth(steps.iter().copied()).is_ok(), "{kind}");
        check!(
            steps
                .windows(2)
                .all(|w| w[0].depth.abs_diff(w[1].depth) <= 1),
            "{kind}"
        );
    }
}

#[test]
fn equivalence_is_symmetric() {
    let a = canonical(PROGRAM);
    let mut b = canonical(PROGRAM);
    b.pop();
    for (x, y) in [(&a, &b), (&a, &a), (&b, &b)] {
        check!(
            compare(&[x.clone(), y.clone()], &["x", "y"]).equivalent
                == compare(&[y.clone(), x.clone()], &["y", "x"]).equivalent
        );
    }
}

#[test]
fn value_transfers_have_no_terminal_in_any_dialect() {
    for kind in ClientKind::ALL {
        check!(kind.canonicalize(&raw(kind, &[])).is_empty(), "{kind}");
    }
}

#[test]
fn summary_of_a_late_divergence() {
    let ops: Vec<Op> = (0..40)
        .map(|pc| op(pc, 0x5b, 1000 - pc, 0, &[]))
        .collect();
    let reference = canonical(&ops);
    let mut diverged = reference.clone();
    diverged.truncate(30);
    diverged.push(CanonicalStep::Exec(Step {
        pc: 30,
        op: 0x5b,
        gas: 1,
        depth: 0,
        stack: vec![],
    }));

    let result = compare(&[reference, diverged], &["geth", "parity"]);
    check!(result.divergences.len() == 10);
    let summary = summarize(&result.diff_lines, DEFAULT_CONTEXT_WINDOW);
    check!(summary.len() == DEFAULT_CONTEXT_WINDOW + 5);
    check!(summary[19] == result.diff_lines[30].to_string());
    check!(summary[19].starts_with("[!!] 30 geth: pc    30"));
    check!(summary[20].starts_with("[!!] 30 parity: pc    30"));
}
