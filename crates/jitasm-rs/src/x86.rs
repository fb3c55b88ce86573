//! x86 / x86-64 backend: registers, validation, encoding, formatting,
//! and prolog/epilog emission.
//!
//! Encoding is REX/ModR/M/SIB construction over a small opcode table.
//! Branches to labels resolve inline when the target is already bound in
//! the current section; otherwise a placeholder displacement is emitted
//! and a fixup is reported for the link chain.

use alloc::format;
use alloc::string::String;

use crate::buffer::{CodeBuffer, InstrBytes};
use crate::emitter::{ArchFuncs, EncodeCtx, Emitter, FuncFrame};
use crate::error::Error;
use crate::fmt::{self, FormatFlags};
use crate::holder::FixupKind;
use crate::inst::{BaseInst, EncodedInst, Fixup, InstId, InstOptions, ValidationFlags};
use crate::operand::{Arch, Imm, Mem, Operand, Reg, RegGroup, VIRT_ID_MIN};
use crate::support::fits_signed;

// ─── Registers ─────────────────────────────────────────────

/// 64-bit general-purpose register.
pub const RAX: Reg = Reg::gp(0, 8);
/// 64-bit general-purpose register.
pub const RCX: Reg = Reg::gp(1, 8);
/// 64-bit general-purpose register.
pub const RDX: Reg = Reg::gp(2, 8);
/// 64-bit general-purpose register.
pub const RBX: Reg = Reg::gp(3, 8);
/// 64-bit stack pointer.
pub const RSP: Reg = Reg::gp(4, 8);
/// 64-bit frame pointer.
pub const RBP: Reg = Reg::gp(5, 8);
/// 64-bit general-purpose register.
pub const RSI: Reg = Reg::gp(6, 8);
/// 64-bit general-purpose register.
pub const RDI: Reg = Reg::gp(7, 8);
/// Extended 64-bit register (needs REX).
pub const R8: Reg = Reg::gp(8, 8);
/// Extended 64-bit register.
pub const R9: Reg = Reg::gp(9, 8);
/// Extended 64-bit register.
pub const R10: Reg = Reg::gp(10, 8);
/// Extended 64-bit register.
pub const R11: Reg = Reg::gp(11, 8);
/// Extended 64-bit register.
pub const R12: Reg = Reg::gp(12, 8);
/// Extended 64-bit register.
pub const R13: Reg = Reg::gp(13, 8);
/// Extended 64-bit register.
pub const R14: Reg = Reg::gp(14, 8);
/// Extended 64-bit register.
pub const R15: Reg = Reg::gp(15, 8);

/// 32-bit general-purpose register.
pub const EAX: Reg = Reg::gp(0, 4);
/// 32-bit general-purpose register.
pub const ECX: Reg = Reg::gp(1, 4);
/// 32-bit general-purpose register.
pub const EDX: Reg = Reg::gp(2, 4);
/// 32-bit general-purpose register.
pub const EBX: Reg = Reg::gp(3, 4);
/// 32-bit stack pointer.
pub const ESP: Reg = Reg::gp(4, 4);
/// 32-bit frame pointer.
pub const EBP: Reg = Reg::gp(5, 4);
/// 32-bit general-purpose register.
pub const ESI: Reg = Reg::gp(6, 4);
/// 32-bit general-purpose register.
pub const EDI: Reg = Reg::gp(7, 4);

/// AVX-512 opmask register `k0`–`k7`.
#[must_use]
pub const fn k(n: u16) -> Reg {
    Reg::new(RegGroup::Mask, n, 8)
}

const GP64_NAMES: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];

const GP32_NAMES: [&str; 16] = [
    "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi", "r8d", "r9d", "r10d", "r11d",
    "r12d", "r13d", "r14d", "r15d",
];

pub(crate) fn reg_name(reg: Reg) -> String {
    if reg.is_virtual() {
        return format!("v{}", reg.id() - VIRT_ID_MIN);
    }
    match reg.group() {
        RegGroup::Gp => {
            let idx = reg.id() as usize;
            let table = if reg.size() == 8 {
                &GP64_NAMES
            } else {
                &GP32_NAMES
            };
            table
                .get(idx)
                .map_or_else(|| format!("gp{}", reg.id()), |n| String::from(*n))
        }
        RegGroup::Mask => format!("k{}", reg.id()),
        RegGroup::Vec => format!("xmm{}", reg.id()),
    }
}

// ─── Encoding helpers ──────────────────────────────────────

/// Encode the REX prefix byte.
const fn rex(w: bool, r: bool, x: bool, b: bool) -> u8 {
    0x40 | ((w as u8) << 3) | ((r as u8) << 2) | ((x as u8) << 1) | (b as u8)
}

/// Encode a ModR/M byte.
const fn modrm(md: u8, reg: u8, rm: u8) -> u8 {
    ((md & 0b11) << 6) | ((reg & 0b111) << 3) | (rm & 0b111)
}

/// Encode a SIB byte.
const fn sib(scale: u8, index: u8, base: u8) -> u8 {
    ((scale & 0b11) << 6) | ((index & 0b111) << 3) | (base & 0b111)
}

fn scale_bits(scale: u8) -> Result<u8, Error> {
    match scale {
        1 => Ok(0),
        2 => Ok(1),
        4 => Ok(2),
        8 => Ok(3),
        other => Err(Error::invalid_operand(format!(
            "memory index scale {} (must be 1, 2, 4, or 8)",
            other
        ))),
    }
}

/// General-purpose register usable in the current mode.
fn check_gp(reg: Reg, arch: Arch) -> Result<(), Error> {
    if reg.group() != RegGroup::Gp {
        return Err(Error::invalid_operand(format!(
            "expected a general-purpose register, got {}",
            reg_name(reg)
        )));
    }
    if reg.is_virtual() {
        return Err(Error::invalid_operand(
            "virtual register reached the encoder (finalize a Compiler first)",
        ));
    }
    match reg.size() {
        8 if arch == Arch::X86 => Err(Error::invalid_operand(
            "64-bit register in 32-bit mode",
        )),
        4 | 8 => Ok(()),
        other => Err(Error::invalid_operand(format!(
            "unsupported register size {}",
            other
        ))),
    }
}

fn check_same_size(a: Reg, b: Reg) -> Result<(), Error> {
    if a.size() != b.size() {
        return Err(Error::OperandSizeMismatch {
            detail: format!("{} vs {}", reg_name(a), reg_name(b)),
        });
    }
    Ok(())
}

/// REX.X / REX.B bits contributed by a memory operand.
fn mem_rex_bits(mem: &Mem) -> (bool, bool) {
    let x = mem.index_reg().is_some_and(|r| r.id() >= 8);
    let b = mem.base_reg().is_some_and(|r| r.id() >= 8);
    (x, b)
}

/// Append ModR/M + SIB + displacement for a memory operand.
fn push_mem(buf: &mut InstrBytes, reg_field: u8, mem: &Mem, arch: Arch) -> Result<(), Error> {
    for r in [mem.base_reg(), mem.index_reg()].into_iter().flatten() {
        if r.is_virtual() {
            return Err(Error::invalid_operand(
                "virtual register reached the encoder (finalize a Compiler first)",
            ));
        }
    }
    if let Some(index) = mem.index_reg() {
        if index.id() == 4 {
            return Err(Error::invalid_operand("rsp/esp cannot be an index register"));
        }
    }
    match (mem.base_reg(), mem.index_reg()) {
        (Some(base), None) => {
            let b = base.low_bits();
            // rsp/r12 base always needs a SIB byte.
            let needs_sib = b == 4;
            let (md, disp_size) = disp_mode(mem.disp(), b);
            buf.push(modrm(md, reg_field, if needs_sib { 4 } else { b }));
            if needs_sib {
                buf.push(sib(0, 4, b));
            }
            push_disp(buf, mem.disp(), disp_size);
        }
        (Some(base), Some(index)) => {
            let b = base.low_bits();
            let (md, disp_size) = disp_mode(mem.disp(), b);
            buf.push(modrm(md, reg_field, 4));
            buf.push(sib(scale_bits(mem.scale())?, index.low_bits(), b));
            push_disp(buf, mem.disp(), disp_size);
        }
        (None, Some(index)) => {
            buf.push(modrm(0, reg_field, 4));
            buf.push(sib(scale_bits(mem.scale())?, index.low_bits(), 5));
            push_disp(buf, mem.disp(), 4);
        }
        (None, None) => {
            // Absolute disp32: SIB form in long mode (plain disp32 would be
            // RIP-relative), short form in 32-bit mode.
            if arch == Arch::X86 {
                buf.push(modrm(0, reg_field, 5));
            } else {
                buf.push(modrm(0, reg_field, 4));
                buf.push(sib(0, 4, 5));
            }
            push_disp(buf, mem.disp(), 4);
        }
    }
    Ok(())
}

/// Choose the ModR/M `mod` bits and displacement width for a base register.
fn disp_mode(disp: i32, base_low: u8) -> (u8, u8) {
    // rbp/r13 with no displacement still needs mod=01 disp8=0.
    if disp == 0 && base_low != 5 {
        (0, 0)
    } else if fits_signed(i64::from(disp), 8) {
        (1, 1)
    } else {
        (2, 4)
    }
}

fn push_disp(buf: &mut InstrBytes, disp: i32, size: u8) {
    match size {
        0 => {}
        1 => buf.push(disp as i8 as u8),
        _ => buf.extend_from_slice(&disp.to_le_bytes()),
    }
}

/// Append legacy prefixes requested by instruction options.
fn push_legacy_prefixes(buf: &mut InstrBytes, inst: &BaseInst) {
    if inst.options.contains(InstOptions::LOCK) {
        buf.push(0xF0);
    }
    if inst.options.contains(InstOptions::REP) {
        buf.push(0xF3);
    }
    if inst.options.contains(InstOptions::REPNE) {
        buf.push(0xF2);
    }
}

/// Append the REX prefix when any bit is set (or W is required).
fn push_rex(buf: &mut InstrBytes, arch: Arch, w: bool, r: bool, x: bool, b: bool) -> Result<(), Error> {
    if w || r || x || b {
        if arch == Arch::X86 {
            return Err(Error::invalid_operand("REX prefix unavailable in 32-bit mode"));
        }
        buf.push(rex(w, r, x, b));
    }
    Ok(())
}

// ─── ALU table ─────────────────────────────────────────────

/// `(base opcode, /digit)` per classic ALU instruction; the MR form is
/// `base+1`, the RM form `base+3`.
fn alu_entry(id: InstId) -> Option<(u8, u8)> {
    match id {
        InstId::Add => Some((0x00, 0)),
        InstId::Or => Some((0x08, 1)),
        InstId::And => Some((0x20, 4)),
        InstId::Sub => Some((0x28, 5)),
        InstId::Xor => Some((0x30, 6)),
        InstId::Cmp => Some((0x38, 7)),
        _ => None,
    }
}

/// Condition-code nibble for the Jcc family.
fn jcc_code(id: InstId) -> Option<u8> {
    match id {
        InstId::Jo => Some(0x0),
        InstId::Jno => Some(0x1),
        InstId::Jb => Some(0x2),
        InstId::Jae => Some(0x3),
        InstId::Je => Some(0x4),
        InstId::Jne => Some(0x5),
        InstId::Jbe => Some(0x6),
        InstId::Ja => Some(0x7),
        InstId::Js => Some(0x8),
        InstId::Jns => Some(0x9),
        InstId::Jl => Some(0xC),
        InstId::Jge => Some(0xD),
        InstId::Jle => Some(0xE),
        InstId::Jg => Some(0xF),
        _ => None,
    }
}

fn unary_digit(id: InstId) -> Option<u8> {
    match id {
        InstId::Not => Some(2),
        InstId::Neg => Some(3),
        _ => None,
    }
}

fn shift_digit(id: InstId) -> Option<u8> {
    match id {
        InstId::Shl => Some(4),
        InstId::Shr => Some(5),
        InstId::Sar => Some(7),
        _ => None,
    }
}

// ─── Validation ────────────────────────────────────────────

/// Structural validation of an instruction before encoding.
pub fn validate(
    inst: &BaseInst,
    operands: &[Operand],
    flags: ValidationFlags,
) -> Result<(), Error> {
    let virt_ok = flags.contains(ValidationFlags::ENABLE_VIRT_REGS);
    let mut reg_size: Option<u8> = None;
    for op in operands {
        match op {
            Operand::Reg(r) => {
                if r.is_virtual() && !virt_ok {
                    return Err(Error::invalid_operand(
                        "virtual register outside a compiler stream",
                    ));
                }
                if r.group() == RegGroup::Gp {
                    if let Some(prev) = reg_size {
                        if prev != r.size() {
                            return Err(Error::OperandSizeMismatch {
                                detail: format!(
                                    "{}-bit vs {}-bit register operands",
                                    u32::from(prev) * 8,
                                    u32::from(r.size()) * 8
                                ),
                            });
                        }
                    }
                    reg_size = Some(r.size());
                }
            }
            Operand::Mem(m) => {
                scale_bits(m.scale())?;
                for r in [m.base_reg(), m.index_reg()].into_iter().flatten() {
                    if r.is_virtual() && !virt_ok {
                        return Err(Error::invalid_operand(
                            "virtual register outside a compiler stream",
                        ));
                    }
                }
            }
            Operand::Label(_) => {
                let branch = inst.id == InstId::Jmp
                    || inst.id == InstId::Call
                    || jcc_code(inst.id).is_some();
                if !branch {
                    return Err(Error::invalid_operand(format!(
                        "label operand not accepted by '{}'",
                        inst.id.as_str()
                    )));
                }
            }
            Operand::Imm(_) => {}
        }
    }
    if let Some(extra) = inst.extra_reg {
        if extra.group() != RegGroup::Mask {
            return Err(Error::invalid_operand(
                "extra register must be an opmask (k0-k7)",
            ));
        }
    }
    Ok(())
}

// ─── Encoding ──────────────────────────────────────────────

/// Encode one instruction.
pub fn encode(
    inst: &BaseInst,
    operands: &[Operand],
    ctx: &EncodeCtx,
) -> Result<EncodedInst, Error> {
    if inst.extra_reg.is_some() {
        return Err(Error::invalid_operand(format!(
            "'{}' does not accept an extra register",
            inst.id.as_str()
        )));
    }

    let mut buf = InstrBytes::new();
    push_legacy_prefixes(&mut buf, inst);
    let arch = ctx.arch;

    match (inst.id, operands) {
        (InstId::Nop, []) => buf.push(0x90),
        (InstId::Ret, []) => buf.push(0xC3),
        (InstId::Ret, [Operand::Imm(imm)]) => {
            let v = imm.value();
            if !(0..=0xFFFF).contains(&v) {
                return Err(Error::invalid_operand("ret immediate exceeds 16 bits"));
            }
            buf.push(0xC2);
            buf.extend_from_slice(&(v as u16).to_le_bytes());
        }
        (InstId::Int3, []) => buf.push(0xCC),
        (InstId::Hlt, []) => buf.push(0xF4),
        (InstId::Movsb, []) => buf.push(0xA4),
        (InstId::Movsq, []) => {
            if arch == Arch::X86 {
                return Err(Error::invalid_inst("movsq requires 64-bit mode"));
            }
            buf.push(rex(true, false, false, false));
            buf.push(0xA5);
        }

        (InstId::Push | InstId::Pop, [Operand::Reg(r)]) => {
            check_gp(*r, arch)?;
            let expected = arch.pointer_width();
            if r.size() != expected {
                return Err(Error::OperandSizeMismatch {
                    detail: format!(
                        "push/pop operates on {}-bit registers here",
                        u32::from(expected) * 8
                    ),
                });
            }
            push_rex(&mut buf, arch, false, false, false, r.id() >= 8)?;
            let base = if inst.id == InstId::Push { 0x50 } else { 0x58 };
            buf.push(base + r.low_bits());
        }
        (InstId::Push, [Operand::Imm(imm)]) => {
            let v = imm.value();
            if fits_signed(v, 8) {
                buf.push(0x6A);
                buf.push(v as i8 as u8);
            } else if fits_signed(v, 32) {
                buf.push(0x68);
                buf.extend_from_slice(&(v as i32).to_le_bytes());
            } else {
                return Err(Error::invalid_operand("push immediate exceeds 32 bits"));
            }
        }

        (InstId::Mov, [Operand::Reg(dst), Operand::Imm(imm)]) => {
            encode_mov_reg_imm(&mut buf, *dst, *imm, ctx)?;
        }
        (InstId::Mov, [Operand::Reg(dst), Operand::Reg(src)]) => {
            check_gp(*dst, arch)?;
            check_gp(*src, arch)?;
            check_same_size(*dst, *src)?;
            push_rex(&mut buf, arch, dst.size() == 8, src.id() >= 8, false, dst.id() >= 8)?;
            buf.push(0x89);
            buf.push(modrm(3, src.low_bits(), dst.low_bits()));
        }
        (InstId::Mov, [Operand::Reg(dst), Operand::Mem(mem)]) => {
            encode_reg_mem(&mut buf, 0x8B, *dst, mem, arch)?;
        }
        (InstId::Mov, [Operand::Mem(mem), Operand::Reg(src)]) => {
            encode_reg_mem(&mut buf, 0x89, *src, mem, arch)?;
        }
        (InstId::Mov, [Operand::Mem(mem), Operand::Imm(imm)]) => {
            let size = operand_size_of_mem(mem)?;
            if !fits_signed(imm.value(), 32) {
                return Err(Error::invalid_operand(
                    "mov to memory accepts at most a 32-bit immediate",
                ));
            }
            let (x, b) = mem_rex_bits(mem);
            push_rex(&mut buf, arch, size == 8, false, x, b)?;
            buf.push(0xC7);
            push_mem(&mut buf, 0, mem, arch)?;
            buf.extend_from_slice(&(imm.value() as i32).to_le_bytes());
        }

        (InstId::Lea, [Operand::Reg(dst), Operand::Mem(mem)]) => {
            encode_reg_mem(&mut buf, 0x8D, *dst, mem, arch)?;
        }

        (InstId::Test, [Operand::Reg(a), Operand::Reg(b)]) => {
            check_gp(*a, arch)?;
            check_gp(*b, arch)?;
            check_same_size(*a, *b)?;
            push_rex(&mut buf, arch, a.size() == 8, b.id() >= 8, false, a.id() >= 8)?;
            buf.push(0x85);
            buf.push(modrm(3, b.low_bits(), a.low_bits()));
        }
        (InstId::Test, [Operand::Reg(r), Operand::Imm(imm)]) => {
            check_gp(*r, arch)?;
            if !fits_signed(imm.value(), 32) {
                return Err(Error::invalid_operand("test immediate exceeds 32 bits"));
            }
            push_rex(&mut buf, arch, r.size() == 8, false, false, r.id() >= 8)?;
            buf.push(0xF7);
            buf.push(modrm(3, 0, r.low_bits()));
            buf.extend_from_slice(&(imm.value() as i32).to_le_bytes());
        }

        (InstId::Inc | InstId::Dec, [Operand::Reg(r)]) => {
            check_gp(*r, arch)?;
            push_rex(&mut buf, arch, r.size() == 8, false, false, r.id() >= 8)?;
            buf.push(0xFF);
            let digit = if inst.id == InstId::Inc { 0 } else { 1 };
            buf.push(modrm(3, digit, r.low_bits()));
        }

        (InstId::Neg | InstId::Not, [Operand::Reg(r)]) => {
            check_gp(*r, arch)?;
            push_rex(&mut buf, arch, r.size() == 8, false, false, r.id() >= 8)?;
            buf.push(0xF7);
            // digit presence guaranteed by the match arm
            buf.push(modrm(3, unary_digit(inst.id).unwrap_or(0), r.low_bits()));
        }

        (InstId::Shl | InstId::Shr | InstId::Sar, [Operand::Reg(r), Operand::Imm(imm)]) => {
            check_gp(*r, arch)?;
            let v = imm.value();
            if !(0..=63).contains(&v) {
                return Err(Error::invalid_operand("shift count out of range"));
            }
            push_rex(&mut buf, arch, r.size() == 8, false, false, r.id() >= 8)?;
            buf.push(0xC1);
            buf.push(modrm(3, shift_digit(inst.id).unwrap_or(4), r.low_bits()));
            buf.push(v as u8);
        }

        (InstId::Jmp, [Operand::Reg(r)]) => {
            check_gp(*r, arch)?;
            push_rex(&mut buf, arch, false, false, false, r.id() >= 8)?;
            buf.push(0xFF);
            buf.push(modrm(3, 4, r.low_bits()));
        }
        (InstId::Call, [Operand::Reg(r)]) => {
            check_gp(*r, arch)?;
            push_rex(&mut buf, arch, false, false, false, r.id() >= 8)?;
            buf.push(0xFF);
            buf.push(modrm(3, 2, r.low_bits()));
        }

        (InstId::Jmp, [Operand::Label(label)]) => {
            return encode_rel_branch(buf, inst, ctx, RelBranch::Jmp, *label);
        }
        (InstId::Call, [Operand::Label(label)]) => {
            return encode_rel_branch(buf, inst, ctx, RelBranch::Call, *label);
        }

        (id, [Operand::Label(label)]) if jcc_code(id).is_some() => {
            if ctx.options.contains(crate::inst::EncodingOptions::PREDICTED_JUMPS) {
                if inst.options.contains(InstOptions::TAKEN) {
                    buf.push(0x3E);
                } else if inst.options.contains(InstOptions::NOT_TAKEN) {
                    buf.push(0x2E);
                }
            }
            // presence guaranteed by the guard
            let cc = jcc_code(id).unwrap_or(0);
            return encode_rel_branch(buf, inst, ctx, RelBranch::Jcc(cc), *label);
        }

        (id, ops) if alu_entry(id).is_some() => {
            // presence guaranteed by the guard
            let (base, digit) = alu_entry(id).unwrap_or((0, 0));
            encode_alu(&mut buf, base, digit, ops, arch)?;
        }

        (id, ops) => {
            return Err(Error::invalid_inst(format!(
                "'{}' with {} operand(s) has no x86 encoding here",
                id.as_str(),
                ops.len()
            )));
        }
    }

    Ok(EncodedInst::resolved(buf))
}

fn operand_size_of_mem(mem: &Mem) -> Result<u8, Error> {
    match mem.size() {
        4 | 8 => Ok(mem.size()),
        0 => Err(Error::OperandSizeMismatch {
            detail: String::from("memory operand size unspecified"),
        }),
        other => Err(Error::OperandSizeMismatch {
            detail: format!("unsupported memory operand size {}", other),
        }),
    }
}

/// `opcode reg, mem` (RM) or `opcode mem, reg` (MR); the caller picks
/// the opcode and `reg` supplies the ModR/M reg field.
fn encode_reg_mem(
    buf: &mut InstrBytes,
    opcode: u8,
    reg: Reg,
    mem: &Mem,
    arch: Arch,
) -> Result<(), Error> {
    check_gp(reg, arch)?;
    let (x, b) = mem_rex_bits(mem);
    push_rex(buf, arch, reg.size() == 8, reg.id() >= 8, x, b)?;
    buf.push(opcode);
    push_mem(buf, reg.low_bits(), mem, arch)
}

fn encode_mov_reg_imm(
    buf: &mut InstrBytes,
    dst: Reg,
    imm: Imm,
    ctx: &EncodeCtx,
) -> Result<(), Error> {
    let arch = ctx.arch;
    check_gp(dst, arch)?;
    let value = imm.value();
    if dst.size() == 4 {
        if !fits_signed(value, 32) && u64::try_from(value).map_or(true, |v| v > u64::from(u32::MAX)) {
            return Err(Error::invalid_operand("immediate exceeds 32 bits"));
        }
        push_rex(buf, arch, false, false, false, dst.id() >= 8)?;
        buf.push(0xB8 + dst.low_bits());
        buf.extend_from_slice(&(value as u32).to_le_bytes());
        return Ok(());
    }

    let optimize = ctx
        .options
        .contains(crate::inst::EncodingOptions::OPTIMIZE_FOR_SIZE);
    let zero_extends = value >= 0 && value <= i64::from(u32::MAX);
    if optimize && zero_extends {
        // mov r32, imm32 zero-extends into the full 64-bit register.
        push_rex(buf, arch, false, false, false, dst.id() >= 8)?;
        buf.push(0xB8 + dst.low_bits());
        buf.extend_from_slice(&(value as u32).to_le_bytes());
    } else if fits_signed(value, 32) {
        push_rex(buf, arch, true, false, false, dst.id() >= 8)?;
        buf.push(0xC7);
        buf.push(modrm(3, 0, dst.low_bits()));
        buf.extend_from_slice(&(value as i32).to_le_bytes());
    } else {
        push_rex(buf, arch, true, false, false, dst.id() >= 8)?;
        buf.push(0xB8 + dst.low_bits());
        buf.extend_from_slice(&value.to_le_bytes());
    }
    Ok(())
}

fn encode_alu(
    buf: &mut InstrBytes,
    base: u8,
    digit: u8,
    operands: &[Operand],
    arch: Arch,
) -> Result<(), Error> {
    match operands {
        [Operand::Reg(dst), Operand::Reg(src)] => {
            check_gp(*dst, arch)?;
            check_gp(*src, arch)?;
            check_same_size(*dst, *src)?;
            push_rex(buf, arch, dst.size() == 8, src.id() >= 8, false, dst.id() >= 8)?;
            buf.push(base + 0x01);
            buf.push(modrm(3, src.low_bits(), dst.low_bits()));
        }
        [Operand::Reg(dst), Operand::Imm(imm)] => {
            check_gp(*dst, arch)?;
            let v = imm.value();
            push_rex(buf, arch, dst.size() == 8, false, false, dst.id() >= 8)?;
            if fits_signed(v, 8) {
                buf.push(0x83);
                buf.push(modrm(3, digit, dst.low_bits()));
                buf.push(v as i8 as u8);
            } else if fits_signed(v, 32) {
                buf.push(0x81);
                buf.push(modrm(3, digit, dst.low_bits()));
                buf.extend_from_slice(&(v as i32).to_le_bytes());
            } else {
                return Err(Error::invalid_operand("ALU immediate exceeds 32 bits"));
            }
        }
        [Operand::Reg(dst), Operand::Mem(mem)] => {
            check_gp(*dst, arch)?;
            let (x, b) = mem_rex_bits(mem);
            push_rex(buf, arch, dst.size() == 8, dst.id() >= 8, x, b)?;
            buf.push(base + 0x03);
            push_mem(buf, dst.low_bits(), mem, arch)?;
        }
        [Operand::Mem(mem), Operand::Reg(src)] => {
            check_gp(*src, arch)?;
            let (x, b) = mem_rex_bits(mem);
            push_rex(buf, arch, src.size() == 8, src.id() >= 8, x, b)?;
            buf.push(base + 0x01);
            push_mem(buf, src.low_bits(), mem, arch)?;
        }
        [Operand::Mem(mem), Operand::Imm(imm)] => {
            let size = operand_size_of_mem(mem)?;
            let v = imm.value();
            if !fits_signed(v, 32) {
                return Err(Error::invalid_operand("ALU immediate exceeds 32 bits"));
            }
            let (x, b) = mem_rex_bits(mem);
            push_rex(buf, arch, size == 8, false, x, b)?;
            if fits_signed(v, 8) {
                buf.push(0x83);
                push_mem(buf, digit, mem, arch)?;
                buf.push(v as i8 as u8);
            } else {
                buf.push(0x81);
                push_mem(buf, digit, mem, arch)?;
                buf.extend_from_slice(&(v as i32).to_le_bytes());
            }
        }
        other => {
            return Err(Error::invalid_inst(format!(
                "ALU form with {} operand(s) not encodable",
                other.len()
            )));
        }
    }
    Ok(())
}

// ─── Relative branches ─────────────────────────────────────

enum RelBranch {
    Jmp,
    Call,
    Jcc(u8),
}

/// Encode `jmp/call/jcc label`.
///
/// A target already bound in the current section resolves inline (short
/// form when it fits, unless `LONG_FORM`); anything else emits a
/// placeholder displacement and reports a fixup for the link chain.
fn encode_rel_branch(
    mut buf: InstrBytes,
    inst: &BaseInst,
    ctx: &EncodeCtx,
    branch: RelBranch,
    label: crate::holder::LabelId,
) -> Result<EncodedInst, Error> {
    let force_short = inst.options.contains(InstOptions::SHORT_FORM);
    let force_long = inst.options.contains(InstOptions::LONG_FORM);
    let prefix_len = buf.len();

    let has_short = !matches!(branch, RelBranch::Call);
    let short_len = prefix_len + 2;
    let long_len = prefix_len
        + match branch {
            RelBranch::Jmp | RelBranch::Call => 5,
            RelBranch::Jcc(_) => 6,
        };

    let use_short = if force_short {
        if !has_short {
            return Err(Error::invalid_inst("call has no short form"));
        }
        true
    } else if force_long || !has_short {
        false
    } else {
        matches!(ctx.label_delta, Some(d) if fits_signed(d - short_len as i64, 8))
    };

    if use_short {
        match branch {
            RelBranch::Jmp => buf.push(0xEB),
            RelBranch::Jcc(cc) => buf.push(0x70 + cc),
            RelBranch::Call => unreachable!(),
        }
        match ctx.label_delta {
            Some(delta) => {
                let disp = delta - short_len as i64;
                if !fits_signed(disp, 8) {
                    return Err(Error::RelocationOutOfRange {
                        displacement: disp,
                        bits: 8,
                    });
                }
                buf.push(disp as i8 as u8);
                Ok(EncodedInst::resolved(buf))
            }
            None => {
                let offset = buf.len() as u8;
                buf.push(0);
                Ok(EncodedInst {
                    bytes: buf,
                    fixup: Some(Fixup {
                        offset,
                        kind: FixupKind::X86Rel8 { trailing: 0 },
                        label,
                        addend: 0,
                    }),
                })
            }
        }
    } else {
        match branch {
            RelBranch::Jmp => buf.push(0xE9),
            RelBranch::Call => buf.push(0xE8),
            RelBranch::Jcc(cc) => {
                buf.push(0x0F);
                buf.push(0x80 + cc);
            }
        }
        match ctx.label_delta {
            Some(delta) => {
                let disp = delta - long_len as i64;
                if !fits_signed(disp, 32) {
                    return Err(Error::RelocationOutOfRange {
                        displacement: disp,
                        bits: 32,
                    });
                }
                buf.extend_from_slice(&(disp as i32).to_le_bytes());
                Ok(EncodedInst::resolved(buf))
            }
            None => {
                let offset = buf.len() as u8;
                buf.extend_from_slice(&[0, 0, 0, 0]);
                Ok(EncodedInst {
                    bytes: buf,
                    fixup: Some(Fixup {
                        offset,
                        kind: FixupKind::X86Rel32 { trailing: 0 },
                        label,
                        addend: 0,
                    }),
                })
            }
        }
    }
}

// ─── Code-alignment padding ────────────────────────────────

/// Intel-recommended multi-byte NOP sequences, indexed by length.
const NOP_SEQUENCES: [&[u8]; 10] = [
    &[],
    &[0x90],
    &[0x66, 0x90],
    &[0x0F, 0x1F, 0x00],
    &[0x0F, 0x1F, 0x40, 0x00],
    &[0x0F, 0x1F, 0x44, 0x00, 0x00],
    &[0x66, 0x0F, 0x1F, 0x44, 0x00, 0x00],
    &[0x0F, 0x1F, 0x80, 0x00, 0x00, 0x00, 0x00],
    &[0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
];

/// Emit `n` bytes of code padding: multi-byte NOPs when `optimized`,
/// single-byte NOPs otherwise.
pub(crate) fn nop_padding(buffer: &mut CodeBuffer, mut n: usize, optimized: bool) {
    if !optimized {
        buffer.append_fill(0x90, n);
        return;
    }
    while n > 0 {
        let chunk = n.min(9);
        buffer.append(NOP_SEQUENCES[chunk]);
        n -= chunk;
    }
}

// ─── Formatting ────────────────────────────────────────────

/// Format one instruction in Intel-like syntax.
pub fn format_inst(
    out: &mut String,
    _flags: FormatFlags,
    inst: &BaseInst,
    operands: &[Operand],
) -> Result<(), Error> {
    fmt::write_inst_prefixes(out, inst);
    out.push_str(inst.id.as_str());
    if !operands.is_empty() {
        out.push(' ');
        fmt::write_operands(out, operands, reg_name)?;
    }
    Ok(())
}

// ─── Prolog / epilog ───────────────────────────────────────

/// Standard frame prolog: `push rbp; mov rbp, rsp; sub rsp, N`.
pub fn emit_prolog(e: &mut dyn Emitter, frame: &FuncFrame) -> Result<(), Error> {
    let arch = e.state().arch.ok_or(Error::NotAttached)?;
    let (bp, sp) = if arch == Arch::X86 { (EBP, ESP) } else { (RBP, RSP) };
    if frame.save_frame_pointer {
        e.emit(InstId::Push, &[Operand::Reg(bp)])?;
        e.emit(InstId::Mov, &[Operand::Reg(bp), Operand::Reg(sp)])?;
    }
    if frame.stack_size > 0 {
        e.emit(
            InstId::Sub,
            &[Operand::Reg(sp), Operand::Imm(Imm::new(i64::from(frame.stack_size)))],
        )?;
    }
    Ok(())
}

/// Frame epilog matching [`emit_prolog`], ending in `ret`.
pub fn emit_epilog(e: &mut dyn Emitter, frame: &FuncFrame) -> Result<(), Error> {
    let arch = e.state().arch.ok_or(Error::NotAttached)?;
    let (bp, sp) = if arch == Arch::X86 { (EBP, ESP) } else { (RBP, RSP) };
    if frame.save_frame_pointer {
        e.emit(InstId::Mov, &[Operand::Reg(sp), Operand::Reg(bp)])?;
        e.emit(InstId::Pop, &[Operand::Reg(bp)])?;
    } else if frame.stack_size > 0 {
        e.emit(
            InstId::Add,
            &[Operand::Reg(sp), Operand::Imm(Imm::new(i64::from(frame.stack_size)))],
        )?;
    }
    e.emit(InstId::Ret, &[])
}

/// The x86/x86-64 function table.
pub(crate) const FUNCS: ArchFuncs = ArchFuncs {
    validate,
    encode,
    format_inst,
    emit_prolog,
    emit_epilog,
};
