// Opcode constants for the instruction slice the compiler understands.

// 0x00 range - stop/arithmetic
pub const STOP: u8 = 0x00;
pub const ADD: u8 = 0x01;
pub const SUB: u8 = 0x03;

// 0x50 range - stack/flow
pub const POP: u8 = 0x50;
pub const JUMP: u8 = 0x56;
pub const JUMPI: u8 = 0x57;
pub const PC: u8 = 0x58;
pub const JUMPDEST: u8 = 0x5B;

// 0x60..0x7f - PUSH1..PUSH32
pub const PUSH1: u8 = 0x60; // start
pub const PUSH32: u8 = 0x7F; // end

// 0x80..0x8f - DUP1..DUP16
pub const DUP1: u8 = 0x80;
pub const DUP16: u8 = 0x8F;

// 0x90..0x9f - SWAP1..SWAP16
pub const SWAP1: u8 = 0x90;
pub const SWAP16: u8 = 0x9F;
