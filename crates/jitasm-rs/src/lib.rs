//! # jitasm-rs — Runtime Machine-Code Emission
//!
//! `jitasm-rs` is a pure Rust, zero-C-dependency library for constructing
//! native x86/x86-64 and AArch64 instruction streams at run time: an
//! in-process assembler with sections, labels, forward-reference patching,
//! and relocations, feeding a JIT runtime or any executable-buffer consumer.
//!
//! ## Quick Start
//!
//! ```rust
//! use jitasm_rs::asm::Assembler;
//! use jitasm_rs::emitter::Emitter;
//! use jitasm_rs::holder::CodeHolder;
//! use jitasm_rs::inst::InstId;
//! use jitasm_rs::operand::{Arch, Environment};
//! use jitasm_rs::x86::RAX;
//!
//! let code = CodeHolder::new(Environment::new(Arch::X86_64)).into_ref();
//! let mut a = Assembler::new(&code)?;
//! a.emit2(InstId::Mov, RAX, 42i64)?;
//! a.emit(InstId::Ret, &[])?;
//! let bytes = code.borrow_mut().flatten_to_vec()?;
//! assert_eq!(bytes, [0x48, 0xC7, 0xC0, 0x2A, 0x00, 0x00, 0x00, 0xC3]);
//! # Ok::<(), jitasm_rs::error::Error>(())
//! ```
//!
//! ## Emitters
//!
//! Three front-ends share one [`Emitter`](emitter::Emitter) protocol:
//!
//! - [`Assembler`](asm::Assembler) — encodes immediately into the current
//!   section's buffer.
//! - [`Builder`](builder::Builder) — records a deferred instruction list;
//!   `finalize()` replays it through a transient Assembler.
//! - [`Compiler`](compiler::Compiler) — Builder plus virtual registers and
//!   an allocation pass.
//!
//! ## Features
//!
//! - **Pure Rust** — no C/C++ FFI, no LLVM, no system assembler.
//! - **`no_std` + `alloc`** — embeddable in kernels and firmware.
//! - **Labels & relocations** — forward/backward references, cross-section
//!   fixups, flattened output with residual relocation records.

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]
#![warn(missing_docs)]
// ── Lint policy ─────────────────────────────────────────────
// An instruction encoder performs many deliberate narrowing casts between
// integer widths (i64→u8, u32→u8, …) and is written against dense hex
// opcode literals.  These lints are expected and acceptable here.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_lossless,
    clippy::cast_possible_wrap,
    clippy::unreadable_literal,
    clippy::match_same_arms,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::uninlined_format_args,
    clippy::return_self_not_must_use,
    clippy::too_many_lines
)]

extern crate alloc;

#[cfg(feature = "aarch64")]
pub mod aarch64;
/// The direct byte-emitting assembler.
pub mod asm;
/// Byte sinks: section buffers and inline instruction buffers.
pub mod buffer;
/// The deferred instruction-list builder.
pub mod builder;
/// The compiling emitter with virtual registers.
pub mod compiler;
/// The shared emitter protocol, options, and function tables.
pub mod emitter;
/// Error types.
pub mod error;
/// Instruction formatting and logger sinks.
pub mod fmt;
/// Sections, labels, relocations, and the code holder.
pub mod holder;
/// Instruction ids, options, and encoder output.
pub mod inst;
/// Registers, immediates, memory references, operands.
pub mod operand;
/// Deduplicating constant pool.
pub mod pool;
pub(crate) mod support;
#[cfg(feature = "x86")]
pub mod x86;

// Re-exports of the everyday surface.
pub use asm::Assembler;
pub use builder::Builder;
pub use compiler::Compiler;
pub use emitter::{
    AlignMode, DataType, Emitter, EmitterFlags, EmitterType, ErrorHandler, FuncFrame,
};
pub use error::Error;
pub use fmt::{FormatFlags, Logger, StringLogger};
pub use holder::{
    CodeHolder, CodeRef, FixupKind, LabelId, LabelType, RelocEntry, RelocKind, RelocTarget,
    Section, SectionFlags, SectionId,
};
pub use inst::{
    BaseInst, DiagnosticOptions, EncodingOptions, InstId, InstOptions, ValidationFlags,
};
pub use operand::{Arch, Environment, Imm, Mem, Operand, Reg, RegGroup};
pub use pool::ConstPool;
