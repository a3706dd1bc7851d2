//! The EVM instruction set as seen by the canonicalizers.
//!
//! Every dialect ends up here: some clients report the numeric opcode, some
//! only the mnemonic, and all of them disagree slightly on which values are
//! defined. The table is built once and never changes afterwards.

use std::collections::HashMap;

use once_cell::sync::Lazy;

pub const STOP: u8 = 0x00;
pub const SLOAD: u8 = 0x54;
pub const SSTORE: u8 = 0x55;
pub const TLOAD: u8 = 0x5c;
pub const TSTORE: u8 = 0x5d;
pub const CREATE: u8 = 0xf0;
pub const CALL: u8 = 0xf1;
pub const CALLCODE: u8 = 0xf2;
pub const RETURN: u8 = 0xf3;
pub const DELEGATECALL: u8 = 0xf4;
pub const CREATE2: u8 = 0xf5;
pub const STATICCALL: u8 = 0xfa;
pub const INVALID: u8 = 0xfe;

/// Static description of a defined opcode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpcodeInfo {
    pub code: u8,
    pub name: &'static str,
    /// Number of items popped from the stack.
    pub inputs: usize,
    /// Number of items pushed onto the stack.
    pub outputs: usize,
    /// Named stack operands, top of stack first. Only populated for opcodes
    /// whose operands the tracker needs to address by name.
    pub operands: &'static [&'static str],
}

const CALL_OPERANDS: &[&str] = &[
    "gas",
    "address",
    "value",
    "argsOffset",
    "argsSize",
    "retOffset",
    "retSize",
];
const CALL_NO_VALUE_OPERANDS: &[&str] =
    &["gas", "address", "argsOffset", "argsSize", "retOffset", "retSize"];
const CREATE_OPERANDS: &[&str] = &["value", "offset", "size"];
const CREATE2_OPERANDS: &[&str] = &["value", "offset", "size", "salt"];
const RETURN_OPERANDS: &[&str] = &["offset", "size"];
const SLOAD_OPERANDS: &[&str] = &["key"];
const SSTORE_OPERANDS: &[&str] = &["key", "value"];

/// `(code, name, inputs, outputs)` for every opcode without named operands.
const PLAIN: &[(u8, &str, usize, usize)] = &[
    (0x00, "STOP", 0, 0),
    (0x01, "ADD", 2, 1),
    (0x02, "MUL", 2, 1),
    (0x03, "SUB", 2, 1),
    (0x04, "DIV", 2, 1),
    (0x05, "SDIV", 2, 1),
    (0x06, "MOD", 2, 1),
    (0x07, "SMOD", 2, 1),
    (0x08, "ADDMOD", 3, 1),
    (0x09, "MULMOD", 3, 1),
    (0x0a, "EXP", 2, 1),
    (0x0b, "SIGNEXTEND", 2, 1),
    (0x10, "LT", 2, 1),
    (0x11, "GT", 2, 1),
    (0x12, "SLT", 2, 1),
    (0x13, "SGT", 2, 1),
    (0x14, "EQ", 2, 1),
    (0x15, "ISZERO", 1, 1),
    (0x16, "AND", 2, 1),
    (0x17, "OR", 2, 1),
    (0x18, "XOR", 2, 1),
    (0x19, "NOT", 1, 1),
    (0x1a, "BYTE", 2, 1),
    (0x1b, "SHL", 2, 1),
    (0x1c, "SHR", 2, 1),
    (0x1d, "SAR", 2, 1),
    (0x20, "KECCAK256", 2, 1),
    (0x30, "ADDRESS", 0, 1),
    (0x31, "BALANCE", 1, 1),
    (0x32, "ORIGIN", 0, 1),
    (0x33, "CALLER", 0, 1),
    (0x34, "CALLVALUE", 0, 1),
    (0x35, "CALLDATALOAD", 1, 1),
    (0x36, "CALLDATASIZE", 0, 1),
    (0x37, "CALLDATACOPY", 3, 0),
    (0x38, "CODESIZE", 0, 1),
    (0x39, "CODECOPY", 3, 0),
    (0x3a, "GASPRICE", 0, 1),
    (0x3b, "EXTCODESIZE", 1, 1),
    (0x3c, "EXTCODECOPY", 4, 0),
    (0x3d, "RETURNDATASIZE", 0, 1),
    (0x3e, "RETURNDATACOPY", 3, 0),
    (0x3f, "EXTCODEHASH", 1, 1),
    (0x40, "BLOCKHASH", 1, 1),
    (0x41, "COINBASE", 0, 1),
    (0x42, "TIMESTAMP", 0, 1),
    (0x43, "NUMBER", 0, 1),
    (0x44, "DIFFICULTY", 0, 1),
    (0x45, "GASLIMIT", 0, 1),
    (0x46, "CHAINID", 0, 1),
    (0x47, "SELFBALANCE", 0, 1),
    (0x48, "BASEFEE", 0, 1),
    (0x49, "BLOBHASH", 1, 1),
    (0x4a, "BLOBBASEFEE", 0, 1),
    (0x50, "POP", 1, 0),
    (0x51, "MLOAD", 1, 1),
    (0x52, "MSTORE", 2, 0),
    (0x53, "MSTORE8", 2, 0),
    (0x56, "JUMP", 1, 0),
    (0x57, "JUMPI", 2, 0),
    (0x58, "PC", 0, 1),
    (0x59, "MSIZE", 0, 1),
    (0x5a, "GAS", 0, 1),
    (0x5b, "JUMPDEST", 0, 0),
    (0x5e, "MCOPY", 3, 0),
    (0x5f, "PUSH0", 0, 1),
    (0xa0, "LOG0", 2, 0),
    (0xa1, "LOG1", 3, 0),
    (0xa2, "LOG2", 4, 0),
    (0xa3, "LOG3", 5, 0),
    (0xa4, "LOG4", 6, 0),
    (0xfd, "REVERT", 2, 0),
    (0xfe, "INVALID", 0, 0),
    (0xff, "SELFDESTRUCT", 1, 0),
];

const NAMED: &[(u8, &str, &[&str], usize)] = &[
    (SLOAD, "SLOAD", SLOAD_OPERANDS, 1),
    (SSTORE, "SSTORE", SSTORE_OPERANDS, 0),
    (TLOAD, "TLOAD", SLOAD_OPERANDS, 1),
    (TSTORE, "TSTORE", SSTORE_OPERANDS, 0),
    (CREATE, "CREATE", CREATE_OPERANDS, 1),
    (CALL, "CALL", CALL_OPERANDS, 1),
    (CALLCODE, "CALLCODE", CALL_OPERANDS, 1),
    (RETURN, "RETURN", RETURN_OPERANDS, 0),
    (DELEGATECALL, "DELEGATECALL", CALL_NO_VALUE_OPERANDS, 1),
    (CREATE2, "CREATE2", CREATE2_OPERANDS, 1),
    (STATICCALL, "STATICCALL", CALL_NO_VALUE_OPERANDS, 1),
];

const ALIASES: &[(&str, u8)] = &[
    ("SHA3", 0x20),
    ("SUICIDE", 0xff),
    ("PREVRANDAO", 0x44),
    ("GETPC", 0x58),
];

const PUSH_NAMES: [&str; 32] = [
    "PUSH1", "PUSH2", "PUSH3", "PUSH4", "PUSH5", "PUSH6", "PUSH7", "PUSH8", "PUSH9", "PUSH10",
    "PUSH11", "PUSH12", "PUSH13", "PUSH14", "PUSH15", "PUSH16", "PUSH17", "PUSH18", "PUSH19",
    "PUSH20", "PUSH21", "PUSH22", "PUSH23", "PUSH24", "PUSH25", "PUSH26", "PUSH27", "PUSH28",
    "PUSH29", "PUSH30", "PUSH31", "PUSH32",
];
const DUP_NAMES: [&str; 16] = [
    "DUP1", "DUP2", "DUP3", "DUP4", "DUP5", "DUP6", "DUP7", "DUP8", "DUP9", "DUP10", "DUP11",
    "DUP12", "DUP13", "DUP14", "DUP15", "DUP16",
];
const SWAP_NAMES: [&str; 16] = [
    "SWAP1", "SWAP2", "SWAP3", "SWAP4", "SWAP5", "SWAP6", "SWAP7", "SWAP8", "SWAP9", "SWAP10",
    "SWAP11", "SWAP12", "SWAP13", "SWAP14", "SWAP15", "SWAP16",
];

/// Lookup table shared by every canonicalizer and the call-context tracker.
#[derive(Debug)]
pub struct OpcodeTable {
    by_code: Vec<Option<OpcodeInfo>>,
    by_name: HashMap<&'static str, u8>,
}

static TABLE: Lazy<OpcodeTable> = Lazy::new(OpcodeTable::build);

impl OpcodeTable {
    fn build() -> Self {
        let mut by_code: Vec<Option<OpcodeInfo>> = vec![None; 256];
        let mut insert = |info: OpcodeInfo| {
            let slot = info.code as usize;
            by_code[slot] = Some(info);
        };

        for &(code, name, inputs, outputs) in PLAIN {
            insert(OpcodeInfo {
                code,
                name,
                inputs,
                outputs,
                operands: &[],
            });
        }
        for &(code, name, operands, outputs) in NAMED {
            insert(OpcodeInfo {
                code,
                name,
                inputs: operands.len(),
                outputs,
                operands,
            });
        }
        for (i, name) in PUSH_NAMES.into_iter().enumerate() {
            insert(OpcodeInfo {
                code: 0x60 + i as u8,
                name,
                inputs: 0,
                outputs: 1,
                operands: &[],
            });
        }
        for (i, name) in DUP_NAMES.into_iter().enumerate() {
            insert(OpcodeInfo {
                code: 0x80 + i as u8,
                name,
                inputs: i + 1,
                outputs: i + 2,
                operands: &[],
            });
        }
        for (i, name) in SWAP_NAMES.into_iter().enumerate() {
            insert(OpcodeInfo {
                code: 0x90 + i as u8,
                name,
                inputs: i + 2,
                outputs: i + 2,
                operands: &[],
            });
        }

        let mut by_name: HashMap<&'static str, u8> = by_code
            .iter()
            .flatten()
            .map(|info| (info.name, info.code))
            .collect();
        by_name.extend(ALIASES.iter().copied());

        Self { by_code, by_name }
    }
}

/// Returns the description of `op`, or `None` if the opcode is undefined.
pub fn info(op: u8) -> Option<&'static OpcodeInfo> {
    TABLE.by_code[op as usize].as_ref()
}

pub fn is_defined(op: u8) -> bool {
    info(op).is_some()
}

/// Mnemonic for display purposes; undefined opcodes render as `UNKNOWN`.
pub fn name(op: u8) -> &'static str {
    info(op).map_or("UNKNOWN", |it| it.name)
}

/// Case-insensitive mnemonic lookup, including historical aliases.
pub fn by_name(name: &str) -> Option<u8> {
    let upper = name.trim().to_ascii_uppercase();
    TABLE.by_name.get(upper.as_str()).copied()
}

/// Distance from the top of the stack of the operand called `operand` when
/// `op` executes, derived from the opcode's operand list.
pub fn operand_slot(op: u8, operand: &str) -> Option<usize> {
    info(op)?.operands.iter().position(|it| *it == operand)
}

pub fn is_call(op: u8) -> bool {
    matches!(op, CALL | CALLCODE | DELEGATECALL | STATICCALL)
}

pub fn is_create(op: u8) -> bool {
    matches!(op, CREATE | CREATE2)
}
