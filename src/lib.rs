pub mod opcodes;
pub mod operation;
pub mod word;
pub mod cost;
pub mod jump;
pub mod compiler;
pub mod machine;
pub mod cache;
pub mod disasm;

pub use cache::{code_hash, MemoryCache, RoutineCache};
pub use compiler::{compile, CompiledRoutine, JitConfig};
pub use machine::{execute, ExceptionStatus, Execution, ExecutionResult, Jit, StackRegion};
pub use operation::{lookup, Instruction, JitError, Operation};
pub use word::Word;
