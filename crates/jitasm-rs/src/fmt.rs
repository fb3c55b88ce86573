//! Instruction formatting and the line-oriented logger sink.

use alloc::format;
use alloc::string::String;

use core::fmt::Write;

use crate::error::Error;
use crate::inst::{BaseInst, InstOptions};
use crate::operand::{Imm, Operand};
use crate::support::bitset_type;

bitset_type! {
    /// Output options for formatted instructions.
    pub struct FormatFlags {
        /// Prefix each line with the emitted machine-code bytes in hex.
        const MACHINE_CODE = 0x0000_0001;
        /// Append the pending inline comment, if any.
        const COMMENTS = 0x0000_0002;
    }
}

/// Line-oriented UTF-8 text sink.
///
/// Implementations may write anywhere; the core calls them synchronously on
/// the emitting thread and treats them as black boxes.
pub trait Logger {
    /// Consume one line of text (no trailing newline).
    fn log(&mut self, line: &str);
}

/// A [`Logger`] that accumulates lines into a `String`, one per line.
#[derive(Debug, Default)]
pub struct StringLogger {
    content: String,
}

impl StringLogger {
    /// Create an empty logger.
    #[must_use]
    pub fn new() -> Self {
        Self {
            content: String::new(),
        }
    }

    /// The accumulated text.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }
}

impl Logger for StringLogger {
    fn log(&mut self, line: &str) {
        self.content.push_str(line);
        self.content.push('\n');
    }
}

/// Append `bytes` as contiguous uppercase hex.
pub(crate) fn write_bytes_hex(out: &mut String, bytes: &[u8]) {
    for b in bytes {
        let _ = write!(out, "{:02X}", b);
    }
}

/// Append the option prefixes (`lock`, `rep`, `repne`) that precede a
/// formatted mnemonic.
pub(crate) fn write_inst_prefixes(out: &mut String, inst: &BaseInst) {
    if inst.options.contains(InstOptions::LOCK) {
        out.push_str("lock ");
    }
    if inst.options.contains(InstOptions::REP) {
        out.push_str("rep ");
    }
    if inst.options.contains(InstOptions::REPNE) {
        out.push_str("repne ");
    }
}

/// Format an operand list with an architecture-supplied register namer.
pub(crate) fn write_operands(
    out: &mut String,
    ops: &[Operand],
    reg_name: fn(crate::operand::Reg) -> String,
) -> Result<(), Error> {
    for (i, op) in ops.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        match op {
            Operand::Reg(r) => out.push_str(&reg_name(*r)),
            Operand::Imm(imm) => {
                let _ = write!(out, "{}", imm);
            }
            Operand::Mem(m) => {
                out.push('[');
                let mut first = true;
                if let Some(b) = m.base_reg() {
                    out.push_str(&reg_name(b));
                    first = false;
                }
                if let Some(ix) = m.index_reg() {
                    if !first {
                        out.push('+');
                    }
                    out.push_str(&reg_name(ix));
                    if m.scale() > 1 {
                        let _ = write!(out, "*{}", m.scale());
                    }
                    first = false;
                }
                if m.disp() != 0 || first {
                    if !first && m.disp() >= 0 {
                        out.push('+');
                    }
                    let _ = write!(out, "{}", Imm::new(i64::from(m.disp())));
                }
                out.push(']');
            }
            Operand::Label(l) => {
                let _ = write!(out, "L{}", l.raw());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::{Mem, Reg, RegGroup};

    fn namer(r: Reg) -> String {
        format!("r{}", r.id())
    }

    #[test]
    fn string_logger_collects_lines() {
        let mut l = StringLogger::new();
        l.log("mov r0, 1");
        l.log("ret");
        assert_eq!(l.content(), "mov r0, 1\nret\n");
    }

    #[test]
    fn hex_dump() {
        let mut s = String::new();
        write_bytes_hex(&mut s, &[0x48, 0x89, 0xE5]);
        assert_eq!(s, "4889E5");
    }

    #[test]
    fn operand_formatting() {
        let mut s = String::new();
        let ops = [
            Operand::Reg(Reg::new(RegGroup::Gp, 0, 8)),
            Operand::Mem(Mem::base_disp(Reg::new(RegGroup::Gp, 5, 8), -8)),
        ];
        write_operands(&mut s, &ops, namer).unwrap();
        assert_eq!(s, "r0, [r5-0x8]");
    }
}
