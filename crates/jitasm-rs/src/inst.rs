//! Instruction identifiers, per-instruction options, and the encoder
//! output type shared by the architecture backends.

use crate::buffer::InstrBytes;
use crate::holder::{FixupKind, LabelId};
use crate::operand::Reg;
use crate::support::bitset_type;

/// Instruction identifier.
///
/// One flat namespace across the supported architectures; each backend
/// encodes the ids it understands and rejects the rest with
/// [`InvalidInstruction`](crate::error::Error::InvalidInstruction).
/// Mnemonic text round-trips through [`InstId::as_str`] /
/// [`InstId::from_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub enum InstId {
    /// Reserved "no instruction" id; rejected by every backend.
    None,

    // ── Shared / x86 ───────────────────────────────────────
    Add,
    And,
    Call,
    Cmp,
    Dec,
    Hlt,
    Inc,
    Int3,
    Ja,
    Jae,
    Jb,
    Jbe,
    Je,
    Jg,
    Jge,
    Jl,
    Jle,
    Jmp,
    Jne,
    Jno,
    Jns,
    Jo,
    Js,
    Lea,
    Mov,
    Movsb,
    Movsq,
    Neg,
    Nop,
    Not,
    Or,
    Pop,
    Push,
    Ret,
    Sar,
    Shl,
    Shr,
    Sub,
    Test,
    Xor,

    // ── AArch64 ────────────────────────────────────────────
    Adr,
    B,
    Bcc,
    Bcs,
    Beq,
    Bge,
    Bgt,
    Bl,
    Ble,
    Blr,
    Blt,
    Bmi,
    Bne,
    Bpl,
    Br,
    Brk,
    Cbnz,
    Cbz,
    Eor,
    Ldr,
    Movk,
    Movn,
    Movz,
    Orr,
    Str,
    Svc,
    Tbnz,
    Tbz,
}

impl InstId {
    /// Every id except [`InstId::None`], for exhaustive table tests.
    pub const ALL: &'static [InstId] = &[
        InstId::Add,
        InstId::And,
        InstId::Call,
        InstId::Cmp,
        InstId::Dec,
        InstId::Hlt,
        InstId::Inc,
        InstId::Int3,
        InstId::Ja,
        InstId::Jae,
        InstId::Jb,
        InstId::Jbe,
        InstId::Je,
        InstId::Jg,
        InstId::Jge,
        InstId::Jl,
        InstId::Jle,
        InstId::Jmp,
        InstId::Jne,
        InstId::Jno,
        InstId::Jns,
        InstId::Jo,
        InstId::Js,
        InstId::Lea,
        InstId::Mov,
        InstId::Movsb,
        InstId::Movsq,
        InstId::Neg,
        InstId::Nop,
        InstId::Not,
        InstId::Or,
        InstId::Pop,
        InstId::Push,
        InstId::Ret,
        InstId::Sar,
        InstId::Shl,
        InstId::Shr,
        InstId::Sub,
        InstId::Test,
        InstId::Xor,
        InstId::Adr,
        InstId::B,
        InstId::Bcc,
        InstId::Bcs,
        InstId::Beq,
        InstId::Bge,
        InstId::Bgt,
        InstId::Bl,
        InstId::Ble,
        InstId::Blr,
        InstId::Blt,
        InstId::Bmi,
        InstId::Bne,
        InstId::Bpl,
        InstId::Br,
        InstId::Brk,
        InstId::Cbnz,
        InstId::Cbz,
        InstId::Eor,
        InstId::Ldr,
        InstId::Movk,
        InstId::Movn,
        InstId::Movz,
        InstId::Orr,
        InstId::Str,
        InstId::Svc,
        InstId::Tbnz,
        InstId::Tbz,
    ];

    /// Canonical mnemonic text.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            InstId::None => "<none>",
            InstId::Add => "add",
            InstId::And => "and",
            InstId::Call => "call",
            InstId::Cmp => "cmp",
            InstId::Dec => "dec",
            InstId::Hlt => "hlt",
            InstId::Inc => "inc",
            InstId::Int3 => "int3",
            InstId::Ja => "ja",
            InstId::Jae => "jae",
            InstId::Jb => "jb",
            InstId::Jbe => "jbe",
            InstId::Je => "je",
            InstId::Jg => "jg",
            InstId::Jge => "jge",
            InstId::Jl => "jl",
            InstId::Jle => "jle",
            InstId::Jmp => "jmp",
            InstId::Jne => "jne",
            InstId::Jno => "jno",
            InstId::Jns => "jns",
            InstId::Jo => "jo",
            InstId::Js => "js",
            InstId::Lea => "lea",
            InstId::Mov => "mov",
            InstId::Movsb => "movsb",
            InstId::Movsq => "movsq",
            InstId::Neg => "neg",
            InstId::Nop => "nop",
            InstId::Not => "not",
            InstId::Or => "or",
            InstId::Pop => "pop",
            InstId::Push => "push",
            InstId::Ret => "ret",
            InstId::Sar => "sar",
            InstId::Shl => "shl",
            InstId::Shr => "shr",
            InstId::Sub => "sub",
            InstId::Test => "test",
            InstId::Xor => "xor",
            InstId::Adr => "adr",
            InstId::B => "b",
            InstId::Bcc => "b.cc",
            InstId::Bcs => "b.cs",
            InstId::Beq => "b.eq",
            InstId::Bge => "b.ge",
            InstId::Bgt => "b.gt",
            InstId::Bl => "bl",
            InstId::Ble => "b.le",
            InstId::Blr => "blr",
            InstId::Blt => "b.lt",
            InstId::Bmi => "b.mi",
            InstId::Bne => "b.ne",
            InstId::Bpl => "b.pl",
            InstId::Br => "br",
            InstId::Brk => "brk",
            InstId::Cbnz => "cbnz",
            InstId::Cbz => "cbz",
            InstId::Eor => "eor",
            InstId::Ldr => "ldr",
            InstId::Movk => "movk",
            InstId::Movn => "movn",
            InstId::Movz => "movz",
            InstId::Orr => "orr",
            InstId::Str => "str",
            InstId::Svc => "svc",
            InstId::Tbnz => "tbnz",
            InstId::Tbz => "tbz",
        }
    }

    /// Parse a canonical mnemonic back to its id.
    #[must_use]
    pub fn from_str(s: &str) -> Option<InstId> {
        InstId::ALL.iter().copied().find(|id| id.as_str() == s)
    }
}

bitset_type! {
    /// Per-instruction options.
    ///
    /// Transient options set via
    /// [`Emitter::set_inst_options`](crate::emitter::Emitter::set_inst_options)
    /// decorate only the next instruction; forced options are merged into
    /// every instruction.  Bits outside the named set are reserved and
    /// carried through unchanged.
    pub struct InstOptions {
        /// Force the short (rel8) branch form even for unbound labels.
        const SHORT_FORM = 0x0000_0001;
        /// Force the long (rel32) branch form.
        const LONG_FORM = 0x0000_0002;
        /// x86 `lock` prefix.
        const LOCK = 0x0000_0004;
        /// x86 `rep` / `repe` prefix.
        const REP = 0x0000_0008;
        /// x86 `repne` prefix.
        const REPNE = 0x0000_0010;
        /// Branch-hint: predicted taken (emitted only under
        /// `EncodingOptions::PREDICTED_JUMPS`).
        const TAKEN = 0x0000_0020;
        /// Branch-hint: predicted not taken.
        const NOT_TAKEN = 0x0000_0040;
    }
}

bitset_type! {
    /// Global encoding options of an emitter.
    pub struct EncodingOptions {
        /// Prefer operation-equivalent shorter forms (e.g. `mov r64, imm`
        /// narrowed to `mov r32, imm` when the value zero-extends).
        const OPTIMIZE_FOR_SIZE = 0x0000_0001;
        /// Pad code alignment with multi-byte NOP sequences instead of
        /// repeating the single-byte NOP.
        const OPTIMIZED_ALIGN = 0x0000_0002;
        /// Emit branch-prediction prefixes for `TAKEN` / `NOT_TAKEN`.
        const PREDICTED_JUMPS = 0x0000_0010;
    }
}

bitset_type! {
    /// Diagnostic options of an emitter.
    pub struct DiagnosticOptions {
        /// Validate instructions before direct assembly.
        const VALIDATE_ASSEMBLER = 0x0000_0001;
        /// Validate instructions entering a Builder/Compiler stream.
        const VALIDATE_INTERMEDIATE = 0x0000_0002;
        /// Annotate compiler nodes with register-assignment comments.
        const RA_ANNOTATE = 0x0000_0008;
        /// Reserved for allocator CFG dumps.
        const RA_DEBUG_CFG = 0x0000_0010;
        /// Reserved for allocator liveness dumps.
        const RA_DEBUG_LIVENESS = 0x0000_0020;
        /// Reserved for allocator assignment dumps.
        const RA_DEBUG_ASSIGNMENT = 0x0000_0040;
        /// Reserved for unreachable-code reporting.
        const RA_DEBUG_UNREACHABLE = 0x0000_0080;
    }
}

bitset_type! {
    /// Strictness switches passed to a backend `validate` function.
    pub struct ValidationFlags {
        /// Accept virtual register ids (Builder/Compiler streams).
        const ENABLE_VIRT_REGS = 0x0000_0001;
    }
}

/// An instruction value: id plus the options and extra register that were
/// pending when it was submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BaseInst {
    /// Instruction id.
    pub id: InstId,
    /// Effective options (`next | forced` at submission time).
    pub options: InstOptions,
    /// Extra register decorator (e.g. an AVX-512 opmask).
    pub extra_reg: Option<Reg>,
}

impl BaseInst {
    /// An instruction with no options.
    #[must_use]
    pub const fn new(id: InstId) -> Self {
        Self {
            id,
            options: InstOptions::NONE,
            extra_reg: None,
        }
    }

    /// An instruction with explicit options.
    #[must_use]
    pub const fn with_options(id: InstId, options: InstOptions) -> Self {
        Self {
            id,
            options,
            extra_reg: None,
        }
    }
}

/// A pending patch recorded by an encoder inside freshly produced bytes.
///
/// `offset` addresses the fixup field (x86) or the instruction word
/// (AArch64) relative to the start of [`EncodedInst::bytes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fixup {
    /// Offset of the field/word within the instruction bytes.
    pub offset: u8,
    /// Bit-level patch format.
    pub kind: FixupKind,
    /// Target label.
    pub label: LabelId,
    /// Constant addend applied to the resolved target.
    pub addend: i64,
}

/// Encoder output: instruction bytes plus at most one pending fixup.
#[derive(Debug, Clone)]
pub struct EncodedInst {
    /// The machine-code bytes.
    pub bytes: InstrBytes,
    /// Pending label fixup, when the target could not be resolved inline.
    pub fixup: Option<Fixup>,
}

impl EncodedInst {
    /// Bytes only, fully resolved.
    #[must_use]
    pub fn resolved(bytes: InstrBytes) -> Self {
        Self { bytes, fixup: None }
    }
}
