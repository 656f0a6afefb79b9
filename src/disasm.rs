use crate::operation::lookup;

pub fn disassemble(code: &[u8]) -> Vec<String> {
    let mut out = Vec::new();
    let mut pc = 0usize;
    while pc < code.len() {
        let op = code[pc];
        let mut line = format!("{:04x}: ", pc);
        match lookup(op) {
            Some(operation) => {
                line.push_str(&operation.instruction.to_string());
                let n = operation.immediate_bytes as usize;
                if n > 0 {
                    let start = pc + 1;
                    let end = (start + n).min(code.len());
                    line.push_str(&format!(" 0x{}", hex(&code[start..end])));
                }
                pc += 1 + n;
            }
            None => {
                line.push_str(&format!("0x{:02x}", op));
                pc += 1;
            }
        }
        out.push(line);
    }
    out
}

fn hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes { s.push_str(&format!("{:02x}", b)); }
    s
}
