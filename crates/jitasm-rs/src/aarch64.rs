//! AArch64 backend: registers, encoding, formatting, and prolog/epilog
//! emission.
//!
//! Every instruction is one 32-bit little-endian word.  Words are built
//! with the immediate field zeroed; label targets already bound in the
//! current section are patched into the word immediately, everything else
//! becomes a fixup for the link chain.
//!
//! `validate` intentionally accepts everything and returns `Ok`: the
//! operand tables to reject malformed AArch64 input do not exist yet, and
//! callers must not rely on rejection.

use alloc::format;
use alloc::string::String;

use crate::buffer::InstrBytes;
use crate::emitter::{ArchFuncs, EncodeCtx, Emitter, FuncFrame};
use crate::error::Error;
use crate::fmt::{self, FormatFlags};
use crate::holder::{write_fixup, FixupKind, LabelId};
use crate::inst::{BaseInst, EncodedInst, Fixup, InstId, ValidationFlags};
use crate::operand::{Imm, Mem, Operand, Reg, RegGroup, VIRT_ID_MIN};

/// Id of the zero register (`xzr`/`wzr`).
const ZR_ID: u16 = 31;
/// Internal id of the stack pointer, kept distinct from `xzr`.
const SP_ID: u16 = 32;

/// 64-bit general-purpose register `x0`–`x30`.
#[must_use]
pub const fn x(n: u16) -> Reg {
    Reg::gp(n, 8)
}

/// 32-bit general-purpose register `w0`–`w30`.
#[must_use]
pub const fn w(n: u16) -> Reg {
    Reg::gp(n, 4)
}

/// Frame pointer.
pub const X29: Reg = x(29);
/// Link register.
pub const X30: Reg = x(30);
/// 64-bit zero register.
pub const XZR: Reg = Reg::gp(ZR_ID, 8);
/// Stack pointer.
pub const SP: Reg = Reg::gp(SP_ID, 8);

pub(crate) fn reg_name(reg: Reg) -> String {
    if reg.is_virtual() {
        return format!("v{}", reg.id() - VIRT_ID_MIN);
    }
    match (reg.id(), reg.size()) {
        (SP_ID, _) => String::from("sp"),
        (ZR_ID, 8) => String::from("xzr"),
        (ZR_ID, _) => String::from("wzr"),
        (n, 8) => format!("x{}", n),
        (n, _) => format!("w{}", n),
    }
}

// ─── Field helpers ─────────────────────────────────────────

/// Register number in a context where 31 means the zero register.
fn rn_zr(reg: Reg) -> Result<u32, Error> {
    check_reg(reg)?;
    if reg.id() == SP_ID {
        return Err(Error::invalid_operand("sp not allowed here"));
    }
    Ok(u32::from(reg.id()))
}

/// Register number in a context where 31 means the stack pointer.
fn rn_sp(reg: Reg) -> Result<u32, Error> {
    check_reg(reg)?;
    if reg.id() == ZR_ID {
        return Err(Error::invalid_operand("zero register not allowed here"));
    }
    Ok(u32::from(reg.id().min(ZR_ID)))
}

/// Register number where both `sp` and `zr` encode as 31.
fn rn_any(reg: Reg) -> Result<u32, Error> {
    check_reg(reg)?;
    Ok(u32::from(reg.id().min(ZR_ID)))
}

fn check_reg(reg: Reg) -> Result<(), Error> {
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
    if reg.id() > SP_ID {
        return Err(Error::invalid_operand(format!(
            "register id {} out of range",
            reg.id()
        )));
    }
    match reg.size() {
        4 | 8 => Ok(()),
        other => Err(Error::invalid_operand(format!(
            "unsupported register size {}",
            other
        ))),
    }
}

/// The `sf` bit for a register's width.
fn sf(reg: Reg) -> u32 {
    u32::from(reg.size() == 8) << 31
}

fn same_width(a: Reg, b: Reg) -> Result<(), Error> {
    if a.size() != b.size() {
        return Err(Error::OperandSizeMismatch {
            detail: format!("{} vs {}", reg_name(a), reg_name(b)),
        });
    }
    Ok(())
}

fn imm16(imm: Imm) -> Result<u32, Error> {
    let v = imm.value();
    if !(0..=0xFFFF).contains(&v) {
        return Err(Error::invalid_operand("immediate exceeds 16 bits"));
    }
    Ok(v as u32)
}

/// Condition codes for the `b.<cond>` family.
fn cond_code(id: InstId) -> Option<u32> {
    match id {
        InstId::Beq => Some(0x0),
        InstId::Bne => Some(0x1),
        InstId::Bcs => Some(0x2),
        InstId::Bcc => Some(0x3),
        InstId::Bmi => Some(0x4),
        InstId::Bpl => Some(0x5),
        InstId::Bge => Some(0xA),
        InstId::Blt => Some(0xB),
        InstId::Bgt => Some(0xC),
        InstId::Ble => Some(0xD),
        _ => None,
    }
}

// ─── Validation (stub) ─────────────────────────────────────

/// Accepts everything.
///
/// The real operand tables are not wired up yet; rejection of malformed
/// AArch64 input must not be assumed.
pub fn validate(
    _inst: &BaseInst,
    _operands: &[Operand],
    _flags: ValidationFlags,
) -> Result<(), Error> {
    Ok(())
}

// ─── Encoding ──────────────────────────────────────────────

/// Push a finished word, or a word whose immediate field is patched from
/// `ctx.label_delta` / deferred through a fixup.
fn finish_label_word(
    mut buf: InstrBytes,
    word: u32,
    kind: FixupKind,
    label: LabelId,
    ctx: &EncodeCtx,
) -> Result<EncodedInst, Error> {
    let offset = buf.len() as u8;
    buf.push_u32(word);
    match ctx.label_delta {
        Some(delta) => {
            write_fixup(&mut buf[offset as usize..], kind, delta)?;
            Ok(EncodedInst::resolved(buf))
        }
        None => Ok(EncodedInst {
            bytes: buf,
            fixup: Some(Fixup {
                offset,
                kind,
                label,
                addend: 0,
            }),
        }),
    }
}

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
    let mut word: u32;

    match (inst.id, operands) {
        (InstId::Nop, []) => word = 0xD503_201F,
        (InstId::Ret, []) => word = 0xD65F_0000 | (30 << 5),
        (InstId::Ret, [Operand::Reg(rn)]) => word = 0xD65F_0000 | (rn_zr(*rn)? << 5),
        (InstId::Br, [Operand::Reg(rn)]) => word = 0xD61F_0000 | (rn_zr(*rn)? << 5),
        (InstId::Blr, [Operand::Reg(rn)]) => word = 0xD63F_0000 | (rn_zr(*rn)? << 5),
        (InstId::Brk, [Operand::Imm(imm)]) => word = 0xD420_0000 | (imm16(*imm)? << 5),
        (InstId::Svc, [Operand::Imm(imm)]) => word = 0xD400_0001 | (imm16(*imm)? << 5),

        (InstId::B, [Operand::Label(label)]) => {
            return finish_label_word(buf, 0x1400_0000, FixupKind::A64Jump26, *label, ctx);
        }
        (InstId::Bl, [Operand::Label(label)]) => {
            return finish_label_word(buf, 0x9400_0000, FixupKind::A64Jump26, *label, ctx);
        }
        (id, [Operand::Label(label)]) if cond_code(id).is_some() => {
            let word = 0x5400_0000 | cond_code(id).unwrap_or(0);
            return finish_label_word(buf, word, FixupKind::A64Branch19, *label, ctx);
        }
        (InstId::Cbz | InstId::Cbnz, [Operand::Reg(rt), Operand::Label(label)]) => {
            let op = u32::from(inst.id == InstId::Cbnz) << 24;
            let word = sf(*rt) | 0x3400_0000 | op | rn_zr(*rt)?;
            return finish_label_word(buf, word, FixupKind::A64Branch19, *label, ctx);
        }
        (
            InstId::Tbz | InstId::Tbnz,
            [Operand::Reg(rt), Operand::Imm(bit), Operand::Label(label)],
        ) => {
            let b = bit.value();
            let max_bit = if rt.size() == 8 { 63 } else { 31 };
            if !(0..=max_bit).contains(&b) {
                return Err(Error::invalid_operand("test bit out of range"));
            }
            let op = u32::from(inst.id == InstId::Tbnz) << 24;
            let b5 = ((b as u32) >> 5) << 31;
            let b40 = ((b as u32) & 0x1F) << 19;
            let word = b5 | 0x3600_0000 | op | b40 | rn_zr(*rt)?;
            return finish_label_word(buf, word, FixupKind::A64Branch14, *label, ctx);
        }
        (InstId::Adr, [Operand::Reg(rd), Operand::Label(label)]) => {
            if rd.size() != 8 {
                return Err(Error::invalid_operand("adr requires a 64-bit register"));
            }
            let word = 0x1000_0000 | rn_zr(*rd)?;
            return finish_label_word(buf, word, FixupKind::A64Adr21, *label, ctx);
        }
        (InstId::Ldr, [Operand::Reg(rt), Operand::Label(label)]) => {
            let opc = if rt.size() == 8 { 0x5800_0000 } else { 0x1800_0000 };
            let word = opc | rn_zr(*rt)?;
            return finish_label_word(buf, word, FixupKind::A64LdrLit19, *label, ctx);
        }

        (InstId::Ldr | InstId::Str, [Operand::Reg(rt), Operand::Mem(mem)]) => {
            word = encode_ldr_str(inst.id, *rt, mem)?;
        }

        (InstId::Movz | InstId::Movn | InstId::Movk, [Operand::Reg(rd), Operand::Imm(imm)]) => {
            word = encode_movx(inst.id, *rd, *imm, 0)?;
        }
        (
            InstId::Movz | InstId::Movn | InstId::Movk,
            [Operand::Reg(rd), Operand::Imm(imm), Operand::Imm(shift)],
        ) => {
            word = encode_movx(inst.id, *rd, *imm, shift.value())?;
        }

        (InstId::Mov, [Operand::Reg(rd), Operand::Reg(rm)]) => {
            same_width(*rd, *rm)?;
            if rd.id() == SP_ID || rm.id() == SP_ID {
                return Err(Error::invalid_operand(
                    "mov to/from sp not supported (use add with an immediate)",
                ));
            }
            // ORR rd, xzr, rm
            word = sf(*rd) | 0x2A00_0000 | (rn_zr(*rm)? << 16) | (31 << 5) | rn_zr(*rd)?;
        }
        (InstId::Mov, [Operand::Reg(rd), Operand::Imm(imm)]) => {
            word = encode_mov_imm(*rd, *imm)?;
        }

        (
            InstId::Add | InstId::Sub,
            [Operand::Reg(rd), Operand::Reg(rn), Operand::Imm(imm)],
        ) => {
            word = encode_addsub_imm(inst.id, *rd, *rn, *imm)?;
        }
        (
            InstId::Add | InstId::Sub,
            [Operand::Reg(rd), Operand::Reg(rn), Operand::Reg(rm)],
        ) => {
            same_width(*rd, *rn)?;
            same_width(*rd, *rm)?;
            let op = u32::from(inst.id == InstId::Sub) << 30;
            word = sf(*rd)
                | op
                | 0x0B00_0000
                | (rn_zr(*rm)? << 16)
                | (rn_zr(*rn)? << 5)
                | rn_zr(*rd)?;
        }

        (
            InstId::And | InstId::Orr | InstId::Eor,
            [Operand::Reg(rd), Operand::Reg(rn), Operand::Reg(rm)],
        ) => {
            same_width(*rd, *rn)?;
            same_width(*rd, *rm)?;
            let opc = match inst.id {
                InstId::And => 0x0A00_0000,
                InstId::Orr => 0x2A00_0000,
                _ => 0x4A00_0000,
            };
            word = sf(*rd)
                | opc
                | (rn_zr(*rm)? << 16)
                | (rn_zr(*rn)? << 5)
                | rn_zr(*rd)?;
        }

        (id, ops) => {
            return Err(Error::invalid_inst(format!(
                "'{}' with {} operand(s) has no AArch64 encoding here",
                id.as_str(),
                ops.len()
            )));
        }
    }

    buf.push_u32(word);
    Ok(EncodedInst::resolved(buf))
}

fn encode_ldr_str(id: InstId, rt: Reg, mem: &Mem) -> Result<u32, Error> {
    let base = mem
        .base_reg()
        .ok_or_else(|| Error::invalid_operand("ldr/str requires a base register"))?;
    if mem.index_reg().is_some() {
        return Err(Error::invalid_operand(
            "indexed addressing not supported here",
        ));
    }
    let scale = u32::from(rt.size());
    let disp = mem.disp();
    if disp < 0 || disp as u32 % scale != 0 || u32::try_from(disp).unwrap_or(u32::MAX) / scale > 4095 {
        return Err(Error::invalid_operand(format!(
            "ldr/str offset {} not a scaled 12-bit immediate",
            disp
        )));
    }
    let imm12 = (disp as u32 / scale) << 10;
    let opc: u32 = match (id, rt.size()) {
        (InstId::Ldr, 8) => 0xF940_0000,
        (InstId::Ldr, _) => 0xB940_0000,
        (_, 8) => 0xF900_0000,
        (_, _) => 0xB900_0000,
    };
    Ok(opc | imm12 | (rn_sp(base)? << 5) | rn_zr(rt)?)
}

fn encode_movx(id: InstId, rd: Reg, imm: Imm, shift: i64) -> Result<u32, Error> {
    if rd.id() == SP_ID {
        return Err(Error::invalid_operand("sp not allowed here"));
    }
    let max_shift = if rd.size() == 8 { 48 } else { 16 };
    if shift % 16 != 0 || !(0..=max_shift).contains(&shift) {
        return Err(Error::invalid_operand("shift must be 0, 16, 32, or 48"));
    }
    let hw = (shift / 16) as u32;
    let opc: u32 = match id {
        InstId::Movn => 0x1280_0000,
        InstId::Movz => 0x5280_0000,
        _ => 0x7280_0000,
    };
    Ok(sf(rd) | opc | (hw << 21) | (imm16(imm)? << 5) | rn_zr(rd)?)
}

/// `mov rd, #imm` alias: a MOVZ or MOVN when one halfword suffices.
fn encode_mov_imm(rd: Reg, imm: Imm) -> Result<u32, Error> {
    let width: u32 = if rd.size() == 8 { 64 } else { 32 };
    let mask = if width == 64 {
        u64::MAX
    } else {
        u64::from(u32::MAX)
    };
    let value = imm.value() as u64 & mask;
    for hw in 0..(width / 16) {
        let shift = hw * 16;
        if value & !(0xFFFFu64 << shift) == 0 {
            return encode_movx(
                InstId::Movz,
                rd,
                Imm::new(((value >> shift) & 0xFFFF) as i64),
                i64::from(shift),
            );
        }
        let inverted = !value & mask;
        if inverted & !(0xFFFFu64 << shift) == 0 {
            return encode_movx(
                InstId::Movn,
                rd,
                Imm::new(((inverted >> shift) & 0xFFFF) as i64),
                i64::from(shift),
            );
        }
    }
    Err(Error::invalid_operand(
        "immediate needs a movz/movk sequence",
    ))
}

fn encode_addsub_imm(id: InstId, rd: Reg, rn: Reg, imm: Imm) -> Result<u32, Error> {
    same_width(rd, rn)?;
    let v = imm.value();
    let (imm12, sh) = if (0..=0xFFF).contains(&v) {
        (v as u32, 0u32)
    } else if v >= 0 && v & 0xFFF == 0 && (v >> 12) <= 0xFFF {
        ((v >> 12) as u32, 1)
    } else {
        return Err(Error::invalid_operand(format!(
            "immediate {} not encodable as a shifted 12-bit value",
            v
        )));
    };
    let op = u32::from(id == InstId::Sub) << 30;
    Ok(sf(rd) | op | 0x1100_0000 | (sh << 22) | (imm12 << 10) | (rn_any(rn)? << 5) | rn_any(rd)?)
}

// ─── Formatting ────────────────────────────────────────────

/// Format one instruction in UAL-like syntax.
pub fn format_inst(
    out: &mut String,
    _flags: FormatFlags,
    inst: &BaseInst,
    operands: &[Operand],
) -> Result<(), Error> {
    out.push_str(inst.id.as_str());
    if !operands.is_empty() {
        out.push(' ');
        fmt::write_operands(out, operands, reg_name)?;
    }
    Ok(())
}

// ─── Prolog / epilog ───────────────────────────────────────

/// Frame prolog: reserve stack, save fp/lr, establish the frame pointer.
pub fn emit_prolog(e: &mut dyn Emitter, frame: &FuncFrame) -> Result<(), Error> {
    let total = frame_total(frame);
    if total > 0 {
        let amount = Operand::Imm(Imm::new(i64::from(total)));
        e.emit(InstId::Sub, &[SP.into(), SP.into(), amount])?;
    }
    if frame.save_frame_pointer {
        e.emit(InstId::Str, &[X29.into(), Mem::base(SP).into()])?;
        e.emit(InstId::Str, &[X30.into(), Mem::base_disp(SP, 8).into()])?;
        e.emit(InstId::Add, &[X29.into(), SP.into(), Operand::Imm(Imm::new(0))])?;
    }
    Ok(())
}

/// Frame epilog matching [`emit_prolog`], ending in `ret`.
pub fn emit_epilog(e: &mut dyn Emitter, frame: &FuncFrame) -> Result<(), Error> {
    let total = frame_total(frame);
    if frame.save_frame_pointer {
        e.emit(InstId::Ldr, &[X30.into(), Mem::base_disp(SP, 8).into()])?;
        e.emit(InstId::Ldr, &[X29.into(), Mem::base(SP).into()])?;
    }
    if total > 0 {
        let amount = Operand::Imm(Imm::new(i64::from(total)));
        e.emit(InstId::Add, &[SP.into(), SP.into(), amount])?;
    }
    e.emit(InstId::Ret, &[])
}

/// Stack bytes the prolog reserves: locals plus the fp/lr pair, kept
/// 16-byte aligned.
fn frame_total(frame: &FuncFrame) -> u32 {
    let save = if frame.save_frame_pointer { 16 } else { 0 };
    (frame.stack_size + save + 15) & !15
}

/// The AArch64 function table.
pub(crate) const FUNCS: ArchFuncs = ArchFuncs {
    validate,
    encode,
    format_inst,
    emit_prolog,
    emit_epilog,
};
