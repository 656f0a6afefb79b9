use clap::{Parser, Subcommand};
use evm_jit::{cost, disasm, Execution, Jit, JitConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "evm", about = "Compile and run EVM bytecode through the routine translator")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Compile and run bytecode
    Run {
        /// Hex bytecode (e.g., 0x6001600103) or @file
        code: String,
        /// Enable per-block gas metering with this budget
        #[arg(long)]
        gas: Option<u64>,
        /// Stack capacity in words
        #[arg(long, default_value_t = evm_jit::compiler::MAX_STACK_SIZE)]
        stack_size: usize,
        /// Name used for the compiled routine
        #[arg(long, default_value = "cli")]
        source: String,
        /// Print full stack
        #[arg(long)]
        dump_stack: bool,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Disassemble bytecode
    Disasm {
        /// Hex bytecode or @file
        code: String,
    },
    /// Print static per-block gas costs
    Costs {
        /// Hex bytecode or @file
        code: String,
        /// Print the table as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Run { code, gas, stack_size, source, dump_stack, json } => {
            run_cmd(&code, gas, stack_size, &source, dump_stack, json)
        }
        Cmd::Disasm { code } => disasm_cmd(&code),
        Cmd::Costs { code, json } => costs_cmd(&code, json),
    }
}

fn run_cmd(code_arg: &str, gas: Option<u64>, stack_size: usize, source: &str, dump_stack: bool, json: bool) {
    let code = read_code_arg(code_arg);
    let cfg = JitConfig { gas_limit: gas, max_stack_size: stack_size, ..JitConfig::default() };
    let jit = Jit::new(cfg);
    let exec = jit.run(&code, source).unwrap_or_else(|e| die(&format!("Compilation error: {e}")));
    if json {
        println!("{}", execution_to_json(&exec));
        return;
    }
    println!("status: {}", exec.status().as_str());
    println!("state changed: {}", exec.result.state_changed);
    println!("stack size: {}", exec.stack.len());
    if let Some(top) = exec.top() { println!("top: 0x{:x}", top); }
    if let Some(g) = exec.gas_remaining { println!("gas left: {}", g); }
    if dump_stack {
        for (i, v) in exec.stack.iter().rev().enumerate() {
            println!("[{}] 0x{:x}", i, v);
        }
    }
}

fn disasm_cmd(code_arg: &str) {
    let code = read_code_arg(code_arg);
    for line in disasm::disassemble(&code) {
        println!("{}", line);
    }
}

fn costs_cmd(code_arg: &str, json: bool) {
    let code = read_code_arg(code_arg);
    let costs = cost::analyze(&code).unwrap_or_else(|e| die(&format!("Compilation error: {e}")));
    if json {
        let out = serde_json::to_string_pretty(&costs).unwrap_or_else(|e| die(&format!("encode costs: {e}")));
        println!("{}", out);
        return;
    }
    for (pc, cost) in &costs {
        println!("{:04x}: {}", pc, cost);
    }
}

fn execution_to_json(exec: &Execution) -> String {
    use serde_json::{json, Value};
    let stack: Vec<Value> = exec.stack.iter().map(|v| Value::String(format!("0x{:x}", v))).collect();
    let out = json!({
        "result": exec.result,
        "stack": stack,
        "gasRemaining": exec.gas_remaining,
    });
    serde_json::to_string_pretty(&out).unwrap_or_else(|e| die(&format!("encode result: {e}")))
}

fn read_code_arg(arg: &str) -> Vec<u8> {
    if let Some(rest) = arg.strip_prefix('@') {
        std::fs::read(rest).unwrap_or_else(|e| die(&format!("Failed to read file: {e}")))
    } else {
        parse_hex(arg).unwrap_or_else(|| die("Invalid code hex"))
    }
}

fn parse_hex(s: &str) -> Option<Vec<u8>> {
    let s = s.trim();
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() { return Some(Vec::new()); }
    if s.len() % 2 != 0 { return None; }
    (0..s.len())
        .step_by(2)
        .map(|i| s.get(i..i + 2).and_then(|b| u8::from_str_radix(b, 16).ok()))
        .collect()
}

fn die(msg: &str) -> ! { eprintln!("{}", msg); std::process::exit(1); }
