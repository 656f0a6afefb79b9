use std::sync::Arc;

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{code_hash, MemoryCache};
use crate::compiler::{self, CompiledRoutine, JitConfig, Label, Template};
use crate::jump::JumpTable;
use crate::operation::JitError;
use crate::word::Word;

/// Outcome status of one routine invocation. Reported in the result record,
/// never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExceptionStatus {
    None,
    InvalidJumpDestination,
    StackUnderflow,
    StackOverflow,
    OutOfGas,
}

impl ExceptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExceptionStatus::None => "None",
            ExceptionStatus::InvalidJumpDestination => "InvalidJumpDestination",
            ExceptionStatus::StackUnderflow => "StackUnderflow",
            ExceptionStatus::StackOverflow => "StackOverflow",
            ExceptionStatus::OutOfGas => "OutOfGas",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub exception_status: ExceptionStatus,
    /// No modeled instruction touches state, so this is always false.
    pub state_changed: bool,
}

#[derive(Debug, Clone)]
pub struct Execution {
    pub result: ExecutionResult,
    /// Logical stack after return, bottom first.
    pub stack: Vec<U256>,
    /// Remaining budget for metered routines.
    pub gas_remaining: Option<u64>,
}

impl Execution {
    pub fn status(&self) -> ExceptionStatus {
        self.result.exception_status
    }

    pub fn top(&self) -> Option<U256> {
        self.stack.last().copied()
    }
}

/// Fixed-capacity word stack. `top` never leaves `0..=capacity`: every
/// operation that would move it out of range fails instead.
#[derive(Debug)]
pub struct StackRegion {
    slots: Box<[Word]>,
    top: usize,
}

impl StackRegion {
    pub fn new(capacity: usize) -> Self {
        Self { slots: vec![Word::ZERO; capacity].into_boxed_slice(), top: 0 }
    }

    pub fn len(&self) -> usize {
        self.top
    }

    pub fn is_empty(&self) -> bool {
        self.top == 0
    }

    fn next_slot(&mut self) -> Result<&mut Word, ExceptionStatus> {
        let slot = self.slots.get_mut(self.top).ok_or(ExceptionStatus::StackOverflow)?;
        self.top += 1;
        Ok(slot)
    }

    /// Claims the next slot and clears it. Slots are reused, so anything
    /// written narrower than a word must go through here.
    pub fn push_zeroed(&mut self) -> Result<&mut Word, ExceptionStatus> {
        let slot = self.next_slot()?;
        slot.clear();
        Ok(slot)
    }

    pub fn push(&mut self, word: Word) -> Result<(), ExceptionStatus> {
        *self.next_slot()? = word;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Word, ExceptionStatus> {
        if self.top == 0 {
            return Err(ExceptionStatus::StackUnderflow);
        }
        self.top -= 1;
        Ok(self.slots[self.top])
    }

    /// Word `depth` slots below the top (0 is the top itself).
    pub fn peek(&self, depth: usize) -> Result<&Word, ExceptionStatus> {
        if depth >= self.top {
            return Err(ExceptionStatus::StackUnderflow);
        }
        Ok(&self.slots[self.top - 1 - depth])
    }

    pub fn drop_words(&mut self, n: usize) -> Result<(), ExceptionStatus> {
        if n > self.top {
            return Err(ExceptionStatus::StackUnderflow);
        }
        self.top -= n;
        Ok(())
    }

    /// DUPn: copies the n-th word (1-based) onto the top.
    pub fn dup(&mut self, n: usize) -> Result<(), ExceptionStatus> {
        let depth = n.checked_sub(1).ok_or(ExceptionStatus::StackUnderflow)?;
        let word = *self.peek(depth)?;
        self.push(word)
    }

    /// SWAPn: exchanges the top with the word n slots below it.
    pub fn swap(&mut self, n: usize) -> Result<(), ExceptionStatus> {
        if n >= self.top {
            return Err(ExceptionStatus::StackUnderflow);
        }
        let top = self.top - 1;
        self.slots.swap(top, top - n);
        Ok(())
    }

    pub fn words(&self) -> &[Word] {
        &self.slots[..self.top]
    }
}

enum Flow {
    Next,
    Jump(Label),
    Exit(ExceptionStatus),
}

struct Frame {
    stack: StackRegion,
    /// Set by a taken JUMPI: the condition word still has to be removed by
    /// the jump-resolution block.
    pending_pop: bool,
    gas_left: u64,
}

impl Frame {
    fn binop<F: Fn(U256, U256) -> U256>(&mut self, f: F) -> Result<(), ExceptionStatus> {
        let a = self.stack.pop()?.to_u256();
        let b = self.stack.pop()?.to_u256();
        self.stack.push(Word::from_u256(f(a, b)))
    }

    fn step(&mut self, template: &Template, jumps: &JumpTable) -> Result<Flow, ExceptionStatus> {
        match template {
            Template::Charge(cost) => {
                if self.gas_left < *cost {
                    return Ok(Flow::Exit(ExceptionStatus::OutOfGas));
                }
                self.gas_left -= cost;
            }
            Template::PushPc(pc) => self.stack.push_zeroed()?.set_u32(*pc),
            Template::PushNarrow(value) => self.stack.push_zeroed()?.set_u64(*value),
            Template::PushWide(word) => self.stack.push(*word)?,
            Template::Dup(n) => self.stack.dup(*n as usize)?,
            Template::Swap(n) => self.stack.swap(*n as usize)?,
            Template::Pop => {
                self.stack.pop()?;
            }
            Template::Add => self.binop(|a, b| a.overflowing_add(b).0)?,
            Template::Sub => self.binop(|a, b| a.overflowing_sub(b).0)?,
            Template::Branch(resolve) => return Ok(Flow::Jump(*resolve)),
            Template::BranchIf(resolve) => {
                // The address stays on top; only the condition below it is
                // inspected here.
                if self.stack.peek(1)?.is_zero() {
                    self.stack.drop_words(2)?;
                } else {
                    self.pending_pop = true;
                    return Ok(Flow::Jump(*resolve));
                }
            }
            Template::ResolveJump { invalid } => {
                let dest = self.stack.pop()?;
                if !dest.fits_u32() {
                    return Ok(Flow::Jump(*invalid));
                }
                let candidate = dest.low_u32();
                if self.pending_pop {
                    self.pending_pop = false;
                    self.stack.pop()?;
                }
                return Ok(Flow::Jump(jumps.resolve(candidate).unwrap_or(*invalid)));
            }
            Template::Return(status) => return Ok(Flow::Exit(*status)),
        }
        Ok(Flow::Next)
    }
}

fn run(routine: &CompiledRoutine, frame: &mut Frame) -> ExceptionStatus {
    let program = routine.program();
    let jumps = routine.jump_table();
    let mut ip = 0usize;
    // Every routine ends in a return template, so falling off the end
    // cannot happen for compiled code.
    while let Some(template) = program.get(ip) {
        ip += 1;
        match frame.step(template, jumps) {
            Ok(Flow::Next) => {}
            Ok(Flow::Jump(label)) => ip = routine.offset(label),
            Ok(Flow::Exit(status)) | Err(status) => return status,
        }
    }
    ExceptionStatus::None
}

/// Runs `routine` once on a fresh stack region sized by `config`.
pub fn execute(routine: &CompiledRoutine, config: &JitConfig) -> Execution {
    let mut frame = Frame {
        stack: StackRegion::new(config.max_stack_size),
        pending_pop: false,
        gas_left: config.gas_limit.unwrap_or(u64::MAX),
    };
    let status = run(routine, &mut frame);
    debug!(
        routine = routine.name(),
        status = status.as_str(),
        stack_depth = frame.stack.len(),
        "routine returned"
    );
    Execution {
        result: ExecutionResult { exception_status: status, state_changed: false },
        stack: frame.stack.words().iter().map(Word::to_u256).collect(),
        gas_remaining: routine.is_metered().then_some(frame.gas_left),
    }
}

/// Compiles through a code-hash keyed cache and runs routines.
#[derive(Debug, Default)]
pub struct Jit {
    config: JitConfig,
    cache: MemoryCache,
}

impl Jit {
    pub fn new(config: JitConfig) -> Self {
        Self { config, cache: MemoryCache::new() }
    }

    pub fn cache(&self) -> &MemoryCache {
        &self.cache
    }

    pub fn compile(&self, code: &[u8], source: &str) -> Result<Arc<CompiledRoutine>, JitError> {
        self.cache
            .get_or_compile(code_hash(code), || compiler::compile(code, source, &self.config))
    }

    pub fn run(&self, code: &[u8], source: &str) -> Result<Execution, JitError> {
        let routine = self.compile(code, source)?;
        Ok(execute(&routine, &self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_code(code: &[u8]) -> Execution {
        Jit::default().run(code, "test").unwrap()
    }

    #[test]
    fn stack_region_bounds() {
        let mut s = StackRegion::new(2);
        assert_eq!(s.pop(), Err(ExceptionStatus::StackUnderflow));
        s.push(Word::from_u256(U256::one())).unwrap();
        s.push_zeroed().unwrap().set_u8(2);
        assert_eq!(s.push(Word::ZERO), Err(ExceptionStatus::StackOverflow));
        assert_eq!(s.len(), 2);
        assert_eq!(s.peek(0).unwrap().to_u256(), U256::from(2u64));
        assert_eq!(s.peek(2), Err(ExceptionStatus::StackUnderflow));
        s.swap(1).unwrap();
        assert_eq!(s.peek(0).unwrap().to_u256(), U256::one());
        assert_eq!(s.swap(2), Err(ExceptionStatus::StackUnderflow));
        s.drop_words(2).unwrap();
        assert!(s.is_empty());
        assert_eq!(s.drop_words(1), Err(ExceptionStatus::StackUnderflow));
    }

    #[test]
    fn push_zeroed_scrubs_reused_slot() {
        let mut s = StackRegion::new(1);
        s.push(Word::from_u256(U256::MAX)).unwrap();
        s.pop().unwrap();
        s.push_zeroed().unwrap().set_u8(5);
        assert_eq!(s.peek(0).unwrap().to_u256(), U256::from(5u64));
    }

    #[test]
    fn sub_takes_top_minus_next() {
        // PUSH1 1; PUSH1 4; SUB
        let exec = run_code(&[0x60, 0x01, 0x60, 0x04, 0x03]);
        assert_eq!(exec.stack, vec![U256::from(3u64)]);
    }

    #[test]
    fn sub_wraps() {
        // PUSH1 1; PUSH1 0; SUB -> 0 - 1
        let exec = run_code(&[0x60, 0x01, 0x60, 0x00, 0x03]);
        assert_eq!(exec.top(), Some(U256::MAX));
    }

    #[test]
    fn add_wraps() {
        let mut code = vec![0x7F];
        code.extend([0xFF; 32]);
        code.extend([0x60, 0x02, 0x01]);
        let exec = run_code(&code);
        assert_eq!(exec.top(), Some(U256::one()));
    }

    #[test]
    fn narrow_push_after_wide_value_is_clean() {
        // PUSH32 0xff..ff; POP; PUSH1 0x07
        let mut code = vec![0x7F];
        code.extend([0xFF; 32]);
        code.extend([0x50, 0x60, 0x07]);
        let exec = run_code(&code);
        assert_eq!(exec.stack, vec![U256::from(7u64)]);
    }

    #[test]
    fn underflow_is_a_status() {
        assert_eq!(run_code(&[0x50]).status(), ExceptionStatus::StackUnderflow);
        assert_eq!(run_code(&[0x03]).status(), ExceptionStatus::StackUnderflow);
        // JUMPI with only an address on the stack.
        assert_eq!(run_code(&[0x60, 0x00, 0x57]).status(), ExceptionStatus::StackUnderflow);
    }

    #[test]
    fn overflow_is_a_status() {
        let jit = Jit::new(JitConfig { max_stack_size: 2, ..JitConfig::default() });
        let exec = jit.run(&[0x58, 0x58, 0x58], "overflow").unwrap();
        assert_eq!(exec.status(), ExceptionStatus::StackOverflow);
        assert_eq!(exec.stack.len(), 2);
    }

    #[test]
    fn stop_returns_early() {
        // PUSH1 1; STOP; POP
        let exec = run_code(&[0x60, 0x01, 0x00, 0x50]);
        assert_eq!(exec.status(), ExceptionStatus::None);
        assert_eq!(exec.stack, vec![U256::one()]);
        assert!(!exec.result.state_changed);
    }

    #[test]
    fn unmetered_runs_report_no_gas() {
        assert_eq!(run_code(&[0x58]).gas_remaining, None);
    }

    #[test]
    fn jit_reuses_cached_routine() {
        let jit = Jit::default();
        let a = jit.compile(&[0x58, 0x50], "a").unwrap();
        let b = jit.compile(&[0x58, 0x50], "b").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.name(), "a@jit");
        assert_eq!(jit.cache().len(), 1);
    }
}
