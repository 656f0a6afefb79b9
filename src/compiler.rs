use tracing::{debug, trace};

use crate::cost::{self, BlockCosts};
use crate::jump::{JumpResolver, JumpTable, DEFAULT_BUCKET_BITS};
use crate::machine::ExceptionStatus;
use crate::operation::{decode, DecodedOp, Instruction, JitError};
use crate::word::Word;

pub const MAX_STACK_SIZE: usize = 1024;

#[derive(Debug, Clone)]
pub struct JitConfig {
    /// Stack capacity in words.
    pub max_stack_size: usize,
    /// log2 of the number of jump-resolution buckets.
    pub jump_bucket_bits: u8,
    /// When set, routines are compiled with per-block gas charges and run
    /// with this budget.
    pub gas_limit: Option<u64>,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            max_stack_size: MAX_STACK_SIZE,
            jump_bucket_bits: DEFAULT_BUCKET_BITS,
            gas_limit: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub(crate) u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Template {
    /// Deduct a block's static cost from the gas budget.
    Charge(u64),
    PushPc(u32),
    /// Push of an immediate no wider than 8 bytes.
    PushNarrow(u64),
    PushWide(Word),
    Dup(u8),
    Swap(u8),
    Pop,
    Add,
    Sub,
    Branch(Label),
    BranchIf(Label),
    ResolveJump { invalid: Label },
    Return(ExceptionStatus),
}

/// A finalized routine. Immutable and shareable across threads.
#[derive(Debug, Clone)]
pub struct CompiledRoutine {
    name: String,
    program: Box<[Template]>,
    offsets: Box<[usize]>,
    jump_table: JumpTable,
    metered: bool,
}

impl CompiledRoutine {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> &[Template] {
        &self.program
    }

    pub fn offset(&self, label: Label) -> usize {
        self.offsets[label.0 as usize]
    }

    pub fn jump_table(&self) -> &JumpTable {
        &self.jump_table
    }

    pub fn is_metered(&self) -> bool {
        self.metered
    }
}

struct Compiler {
    program: Vec<Template>,
    offsets: Vec<usize>,
    jumps: JumpResolver,
    costs: Option<BlockCosts>,
    resolve_label: Label,
    invalid_label: Label,
}

// Epilogue order: normal return, shared jump resolution, invalid-jump exit.
impl Compiler {
    const UNBOUND: usize = usize::MAX;

    fn new(costs: Option<BlockCosts>) -> Self {
        let mut compiler = Compiler {
            program: Vec::new(),
            offsets: Vec::new(),
            jumps: JumpResolver::new(),
            costs,
            resolve_label: Label(0),
            invalid_label: Label(0),
        };
        compiler.resolve_label = compiler.forward_declare_label();
        compiler.invalid_label = compiler.forward_declare_label();
        compiler
    }

    fn forward_declare_label(&mut self) -> Label {
        let label = Label(self.offsets.len() as u32);
        self.offsets.push(Self::UNBOUND);
        label
    }

    fn define_label(&mut self, label: Label) {
        self.offsets[label.0 as usize] = self.program.len();
    }

    fn emit(&mut self, template: Template) {
        self.program.push(template);
    }

    fn visit(&mut self, op: &DecodedOp<'_>) {
        let operation = op.operation;
        let pc = op.pc as u32;
        trace!(pc, op = %operation.instruction, "emit");

        if operation.instruction == Instruction::JumpDest {
            let label = self.forward_declare_label();
            self.define_label(label);
            self.jumps.record(pc, label);
        }

        let block_cost = if op.pc == 0 || operation.is_block_boundary {
            self.costs.as_ref().and_then(|c| c.get(&op.pc)).copied()
        } else {
            None
        };
        // A block that opens with a control transfer pays only for the
        // transfer up front; the rest is charged on fall-through.
        let (head, tail) = match (block_cost, operation.instruction) {
            (Some(cost), Instruction::Jump | Instruction::JumpI | Instruction::Stop) => {
                let own = operation.gas_cost.min(cost);
                (own, cost - own)
            }
            (Some(cost), _) => (cost, 0),
            (None, _) => (0, 0),
        };
        if head > 0 {
            self.emit(Template::Charge(head));
        }
        self.emit_template(op);
        if tail > 0 {
            self.emit(Template::Charge(tail));
        }
    }

    fn emit_template(&mut self, op: &DecodedOp<'_>) {
        let pc = op.pc as u32;
        match op.operation.instruction {
            Instruction::Stop => self.emit(Template::Return(ExceptionStatus::None)),
            Instruction::Add => self.emit(Template::Add),
            Instruction::Sub => self.emit(Template::Sub),
            Instruction::Pop => self.emit(Template::Pop),
            Instruction::Pc => self.emit(Template::PushPc(pc)),
            Instruction::Push(n) => {
                let word = Word::from_immediate(op.immediate, n as usize);
                if n <= 8 {
                    self.emit(Template::PushNarrow(word.low_u64()));
                } else {
                    self.emit(Template::PushWide(word));
                }
            }
            Instruction::Dup(n) => self.emit(Template::Dup(n)),
            Instruction::Swap(n) => self.emit(Template::Swap(n)),
            Instruction::JumpDest => {}
            Instruction::Jump => self.emit(Template::Branch(self.resolve_label)),
            Instruction::JumpI => self.emit(Template::BranchIf(self.resolve_label)),
        }
    }

    fn finalize(mut self, name: String, bucket_bits: u8) -> CompiledRoutine {
        self.emit(Template::Return(ExceptionStatus::None));

        self.define_label(self.resolve_label);
        self.emit(Template::ResolveJump { invalid: self.invalid_label });

        self.define_label(self.invalid_label);
        self.emit(Template::Return(ExceptionStatus::InvalidJumpDestination));

        debug_assert!(self.offsets.iter().all(|o| *o != Self::UNBOUND));

        CompiledRoutine {
            name,
            program: self.program.into_boxed_slice(),
            offsets: self.offsets.into_boxed_slice(),
            jump_table: self.jumps.lower(bucket_bits),
            metered: self.costs.is_some(),
        }
    }
}

/// Translates `code` into a routine. `source` only names the routine.
///
/// Fails before anything is finalized if the code contains an opcode
/// without a template.
pub fn compile(code: &[u8], source: &str, config: &JitConfig) -> Result<CompiledRoutine, JitError> {
    if u32::try_from(code.len()).is_err() {
        return Err(JitError::CodeTooLarge(code.len()));
    }
    let costs = match config.gas_limit {
        Some(_) => Some(cost::analyze(code)?),
        None => None,
    };

    let mut compiler = Compiler::new(costs);
    for op in decode(code) {
        compiler.visit(&op?);
    }

    let routine = compiler.finalize(format!("{source}@jit"), config.jump_bucket_bits);
    debug!(
        routine = routine.name(),
        code_len = code.len(),
        templates = routine.program().len(),
        jump_destinations = routine.jump_table().len(),
        metered = routine.is_metered(),
        "compiled routine"
    );
    Ok(routine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::lookup;

    fn compile_default(code: &[u8]) -> Result<CompiledRoutine, JitError> {
        compile(code, "test", &JitConfig::default())
    }

    #[test]
    fn every_unmodeled_byte_fails_to_compile() {
        for byte in 0..=255u8 {
            let result = compile_default(&[byte]);
            if lookup(byte).is_some() {
                assert!(result.is_ok(), "0x{byte:02x} should compile");
            } else {
                assert_eq!(
                    result.unwrap_err(),
                    JitError::UnsupportedOpcode { opcode: byte, pc: 0 }
                );
            }
        }
    }

    #[test]
    fn unsupported_opcode_after_valid_code_reports_its_pc() {
        let err = compile_default(&[0x60, 0x01, 0x5B, 0x0A]).unwrap_err();
        assert_eq!(err, JitError::UnsupportedOpcode { opcode: 0x0A, pc: 3 });
    }

    #[test]
    fn epilogue_layout() {
        // PUSH1 3; JUMP; JUMPDEST
        let routine = compile_default(&[0x60, 0x03, 0x56, 0x5B]).unwrap();
        let program = routine.program();
        assert_eq!(program[0], Template::PushNarrow(3));
        assert!(matches!(program[1], Template::Branch(_)));
        assert_eq!(program[2], Template::Return(ExceptionStatus::None));
        assert!(matches!(program[3], Template::ResolveJump { .. }));
        assert_eq!(program[4], Template::Return(ExceptionStatus::InvalidJumpDestination));

        let label = routine.jump_table().resolve(3).unwrap();
        // The JUMPDEST binds to the template right after the JUMP.
        assert_eq!(routine.offset(label), 2);
        assert!(routine.jump_table().resolve(1).is_none());
    }

    #[test]
    fn wide_pushes_keep_the_full_word() {
        let mut code = vec![0x7F];
        code.extend((1..=32u8).collect::<Vec<_>>());
        let routine = compile_default(&code).unwrap();
        match &routine.program()[0] {
            Template::PushWide(word) => assert_eq!(word.as_bytes()[0], 1),
            other => panic!("unexpected template {other:?}"),
        }
    }

    #[test]
    fn truncated_push_is_zero_padded() {
        // PUSH2 0xAB <eof>
        let routine = compile_default(&[0x61, 0xAB]).unwrap();
        assert_eq!(routine.program()[0], Template::PushNarrow(0xAB00));
    }

    #[test]
    fn pc_is_recorded_as_template_operand() {
        // PUSH1 0; PC
        let routine = compile_default(&[0x60, 0x00, 0x58]).unwrap();
        assert_eq!(routine.program()[1], Template::PushPc(2));
    }

    #[test]
    fn metering_inserts_charges_at_block_starts() {
        let config = JitConfig { gas_limit: Some(100), ..JitConfig::default() };
        // PUSH1 3; JUMP; JUMPDEST
        let routine = compile(&[0x60, 0x03, 0x56, 0x5B], "metered", &config).unwrap();
        assert!(routine.is_metered());
        let program = routine.program();
        assert_eq!(program[0], Template::Charge(3));
        assert_eq!(program[1], Template::PushNarrow(3));
        assert_eq!(program[2], Template::Charge(8));
        assert!(matches!(program[3], Template::Branch(_)));
        let label = routine.jump_table().resolve(3).unwrap();
        assert_eq!(program[routine.offset(label)], Template::Charge(1));
    }

    #[test]
    fn branch_charges_only_itself_before_transfer() {
        let config = JitConfig { gas_limit: Some(100), ..JitConfig::default() };
        // PUSH1 1; PUSH1 7; JUMPI; PUSH1 0; POP; JUMPDEST
        let routine = compile(&[0x60, 0x01, 0x60, 0x07, 0x57, 0x60, 0x00, 0x50, 0x5B], "split", &config).unwrap();
        let program = routine.program();
        assert_eq!(program[0], Template::Charge(6));
        assert_eq!(program[3], Template::Charge(10));
        assert!(matches!(program[4], Template::BranchIf(_)));
        // PUSH1 + POP, paid only on fall-through.
        assert_eq!(program[5], Template::Charge(5));
        assert_eq!(program[6], Template::PushNarrow(0));
    }

    #[test]
    fn routine_name_carries_source() {
        let routine = compile(&[], "0xabc", &JitConfig::default()).unwrap();
        assert_eq!(routine.name(), "0xabc@jit");
        assert_eq!(routine.program().len(), 3);
    }
}
