use std::fmt;

use thiserror::Error;

use crate::opcodes::*;

/// Errors raised while turning bytecode into a routine. None of these are
/// ever observed at run time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JitError {
    #[error("unsupported opcode 0x{opcode:02x} at pc={pc}")]
    UnsupportedOpcode { opcode: u8, pc: usize },
    #[error("code size {0} exceeds the addressable program counter range")]
    CodeTooLarge(usize),
}

/// Identity of a modeled instruction. `Push`, `Dup` and `Swap` carry their
/// width (1-based, as in the mnemonic).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instruction {
    Stop,
    Add,
    Sub,
    Pop,
    Jump,
    JumpI,
    Pc,
    JumpDest,
    Push(u8),
    Dup(u8),
    Swap(u8),
}

impl Instruction {
    pub const fn from_byte(byte: u8) -> Option<Instruction> {
        Some(match byte {
            STOP => Instruction::Stop,
            ADD => Instruction::Add,
            SUB => Instruction::Sub,
            POP => Instruction::Pop,
            JUMP => Instruction::Jump,
            JUMPI => Instruction::JumpI,
            PC => Instruction::Pc,
            JUMPDEST => Instruction::JumpDest,
            PUSH1..=PUSH32 => Instruction::Push(byte - PUSH1 + 1),
            DUP1..=DUP16 => Instruction::Dup(byte - DUP1 + 1),
            SWAP1..=SWAP16 => Instruction::Swap(byte - SWAP1 + 1),
            _ => return None,
        })
    }

    pub const fn opcode(self) -> u8 {
        match self {
            Instruction::Stop => STOP,
            Instruction::Add => ADD,
            Instruction::Sub => SUB,
            Instruction::Pop => POP,
            Instruction::Jump => JUMP,
            Instruction::JumpI => JUMPI,
            Instruction::Pc => PC,
            Instruction::JumpDest => JUMPDEST,
            Instruction::Push(n) => PUSH1 + n - 1,
            Instruction::Dup(n) => DUP1 + n - 1,
            Instruction::Swap(n) => SWAP1 + n - 1,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Stop => f.write_str("STOP"),
            Instruction::Add => f.write_str("ADD"),
            Instruction::Sub => f.write_str("SUB"),
            Instruction::Pop => f.write_str("POP"),
            Instruction::Jump => f.write_str("JUMP"),
            Instruction::JumpI => f.write_str("JUMPI"),
            Instruction::Pc => f.write_str("PC"),
            Instruction::JumpDest => f.write_str("JUMPDEST"),
            Instruction::Push(n) => write!(f, "PUSH{n}"),
            Instruction::Dup(n) => write!(f, "DUP{n}"),
            Instruction::Swap(n) => write!(f, "SWAP{n}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    pub instruction: Instruction,
    pub gas_cost: u64,
    pub immediate_bytes: u8,
    pub pops: u8,
    pub pushes: u8,
    /// Starts a new basic block for cost accounting.
    pub is_block_boundary: bool,
}

static OPERATIONS: [Option<Operation>; 256] = build_table();

const fn build_table() -> [Option<Operation>; 256] {
    let mut table = [None; 256];
    let mut byte = 0usize;
    while byte < 256 {
        table[byte] = describe(byte as u8);
        byte += 1;
    }
    table
}

const fn describe(byte: u8) -> Option<Operation> {
    let instruction = match Instruction::from_byte(byte) {
        Some(instruction) => instruction,
        None => return None,
    };
    let (gas_cost, immediate_bytes, pops, pushes, is_block_boundary) = match instruction {
        Instruction::Stop => (0, 0, 0, 0, true),
        Instruction::Add | Instruction::Sub => (3, 0, 2, 1, false),
        Instruction::Pop => (2, 0, 1, 0, false),
        Instruction::Jump => (8, 0, 1, 0, true),
        Instruction::JumpI => (10, 0, 2, 0, true),
        Instruction::Pc => (2, 0, 0, 1, false),
        Instruction::JumpDest => (1, 0, 0, 0, true),
        Instruction::Push(n) => (3, n, 0, 1, false),
        Instruction::Dup(n) => (3, 0, n, n + 1, false),
        Instruction::Swap(n) => (3, 0, n + 1, n + 1, false),
    };
    Some(Operation { instruction, gas_cost, immediate_bytes, pops, pushes, is_block_boundary })
}

/// Metadata for `opcode`, or `None` when the opcode has no template.
pub fn lookup(opcode: u8) -> Option<&'static Operation> {
    OPERATIONS[opcode as usize].as_ref()
}

/// One instruction as it appears in the code. `immediate` is shorter than
/// `operation.immediate_bytes` when the code ends early; the missing bytes
/// read as zero.
#[derive(Debug, Clone, Copy)]
pub struct DecodedOp<'a> {
    pub pc: usize,
    pub operation: &'static Operation,
    pub immediate: &'a [u8],
}

pub struct Decoder<'a> {
    code: &'a [u8],
    pc: usize,
}

pub fn decode(code: &[u8]) -> Decoder<'_> {
    Decoder { code, pc: 0 }
}

impl<'a> Iterator for Decoder<'a> {
    type Item = Result<DecodedOp<'a>, JitError>;

    fn next(&mut self) -> Option<Self::Item> {
        let len = self.code.len();
        if self.pc >= len {
            return None;
        }
        let pc = self.pc;
        let opcode = self.code[pc];
        let Some(operation) = lookup(opcode) else {
            self.pc = len;
            return Some(Err(JitError::UnsupportedOpcode { opcode, pc }));
        };
        let start = pc + 1;
        let end = start.saturating_add(operation.immediate_bytes as usize);
        let immediate = &self.code[start.min(len)..end.min(len)];
        self.pc = end;
        Some(Ok(DecodedOp { pc, operation, immediate }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modeled_bytes_round_trip_through_instruction() {
        for byte in 0..=255u8 {
            if let Some(op) = lookup(byte) {
                assert_eq!(op.instruction.opcode(), byte);
            }
        }
    }

    #[test]
    fn push0_and_arithmetic_gaps_are_unsupported() {
        assert!(lookup(0x5F).is_none()); // PUSH0
        assert!(lookup(0x02).is_none()); // MUL
        assert!(lookup(0xFE).is_none()); // INVALID
    }

    #[test]
    fn push_declares_its_immediate_width() {
        let op = lookup(0x63).unwrap();
        assert_eq!(op.instruction, Instruction::Push(4));
        assert_eq!(op.immediate_bytes, 4);
        assert_eq!(lookup(PUSH32).unwrap().immediate_bytes, 32);
        assert_eq!(lookup(DUP1).unwrap().pushes, 2);
        assert_eq!(lookup(SWAP16).unwrap().pops, 17);
    }

    #[test]
    fn decoder_skips_immediates_and_truncates() {
        // PUSH2 0x0102; JUMPDEST; PUSH4 0xaa <eof>
        let code = [0x61, 0x01, 0x02, 0x5B, 0x63, 0xaa];
        let ops: Vec<_> = decode(&code).collect::<Result<_, _>>().unwrap();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].immediate, &[0x01, 0x02]);
        assert_eq!(ops[1].pc, 3);
        assert_eq!(ops[1].operation.instruction, Instruction::JumpDest);
        assert_eq!(ops[2].pc, 4);
        assert_eq!(ops[2].immediate, &[0xaa]);
    }

    #[test]
    fn decoder_stops_after_unsupported_opcode() {
        let code = [0x60, 0x01, 0x02, 0x50];
        let mut it = decode(&code);
        assert!(it.next().unwrap().is_ok());
        assert_eq!(
            it.next().unwrap().unwrap_err(),
            JitError::UnsupportedOpcode { opcode: 0x02, pc: 2 }
        );
        assert!(it.next().is_none());
    }

    #[test]
    fn mnemonics() {
        assert_eq!(Instruction::Push(3).to_string(), "PUSH3");
        assert_eq!(Instruction::Dup(16).to_string(), "DUP16");
        assert_eq!(Instruction::JumpI.to_string(), "JUMPI");
    }
}
