//! The emitter front-end: one polymorphic surface over the three engines
//! (direct assembly, deferred instruction list, compiler with virtual
//! registers).
//!
//! [`Emitter`] is the shared protocol.  Its provided `emit()` is the
//! template method that owns the per-instruction transient state (pending
//! options, extra register, inline comment): the state is snapshotted and
//! cleared *before* dispatching to the variant hook, so it cannot leak
//! across instructions no matter how the dispatch ends.  Variants implement
//! the `*_impl` hooks and the operations whose meaning differs between
//! immediate and deferred emission (bind, section switch, align, embeds).

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
#[allow(unused_imports)]
use alloc::vec;

use crate::error::Error;
use crate::fmt::{FormatFlags, Logger};
use crate::holder::{CodeRef, LabelId, LabelType, SectionId};
use crate::inst::{
    BaseInst, DiagnosticOptions, EncodedInst, EncodingOptions, InstId, InstOptions,
    ValidationFlags,
};
use crate::operand::{Arch, Operand, Reg, MAX_OPERAND_COUNT};
use crate::pool::ConstPool;
use crate::support::bitset_type;

/// Identity of an attached emitter within its code holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EmitterId(u64);

impl EmitterId {
    /// Construct from a raw value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Which engine backs an emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EmitterType {
    /// Immediate byte emission.
    Assembler,
    /// Deferred instruction-list IR.
    Builder,
    /// Instruction-list IR plus virtual-register allocation.
    Compiler,
}

bitset_type! {
    /// Emitter status flags.
    pub struct EmitterFlags {
        /// Attached to a code holder.
        const ATTACHED = 0x0000_0001;
        /// Comments are forwarded to the logger / IR nodes.
        const LOG_COMMENTS = 0x0000_0008;
        /// The emitter overrides the holder's logger.
        const OWN_LOGGER = 0x0000_0010;
        /// The emitter overrides the holder's error handler.
        const OWN_ERROR_HANDLER = 0x0000_0020;
        /// `finalize()` completed; the stream is frozen.
        const FINALIZED = 0x0000_0040;
    }
}

/// Padding flavor for [`Emitter::align`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AlignMode {
    /// Executable padding (architecture NOP sequences).
    Code,
    /// Non-executable padding (0xCC on x86, zeros on AArch64).
    Data,
    /// Always zeros.
    Zero,
}

/// Element type for [`Emitter::embed_data_array`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub enum DataType {
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl DataType {
    /// Element size in bytes.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            DataType::U8 => 1,
            DataType::U16 => 2,
            DataType::U32 | DataType::F32 => 4,
            DataType::U64 | DataType::F64 => 8,
        }
    }
}

/// Minimal function-frame description consumed by the per-arch prolog and
/// epilog emission functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FuncFrame {
    /// Local stack space in bytes.
    pub stack_size: u32,
    /// Whether to establish a frame pointer.
    pub save_frame_pointer: bool,
}

/// Receives errors before they are returned to the caller.
///
/// The handler may record, log, or escalate; the emitter only requires that
/// it returns.  The original error is returned to the caller unchanged.
pub trait ErrorHandler {
    /// Handle one error originating from an emitter of the given type.
    fn handle_error(&mut self, error: &Error, origin: EmitterType);
}

/// Context handed to a backend `encode` function.
#[derive(Debug, Clone, Copy)]
pub struct EncodeCtx {
    /// The concrete architecture (distinguishes x86 from x86-64).
    pub arch: Arch,
    /// The emitter's encoding options.
    pub options: EncodingOptions,
    /// For a label operand already bound in the current section: the
    /// distance from the current buffer cursor to the target.  `None` when
    /// the target is unbound or lives in another section.
    pub label_delta: Option<i64>,
}

/// The per-architecture function table, selected once at attach time.
#[derive(Clone, Copy)]
pub struct ArchFuncs {
    /// Instruction/operand validation.
    pub validate: fn(&BaseInst, &[Operand], ValidationFlags) -> Result<(), Error>,
    /// Instruction encoding.
    pub encode: fn(&BaseInst, &[Operand], &EncodeCtx) -> Result<EncodedInst, Error>,
    /// Textual instruction formatting.
    pub format_inst:
        fn(&mut String, FormatFlags, &BaseInst, &[Operand]) -> Result<(), Error>,
    /// Function prolog emission.
    pub emit_prolog: fn(&mut dyn Emitter, &FuncFrame) -> Result<(), Error>,
    /// Function epilog emission.
    pub emit_epilog: fn(&mut dyn Emitter, &FuncFrame) -> Result<(), Error>,
}

impl core::fmt::Debug for ArchFuncs {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("ArchFuncs { .. }")
    }
}

/// Select the function table for an architecture.
pub(crate) fn arch_funcs(arch: Arch) -> Result<ArchFuncs, Error> {
    match arch {
        #[cfg(feature = "x86")]
        Arch::X86 | Arch::X86_64 => Ok(crate::x86::FUNCS),
        #[cfg(feature = "aarch64")]
        Arch::Aarch64 => Ok(crate::aarch64::FUNCS),
        #[allow(unreachable_patterns)]
        other => Err(Error::FeatureNotEnabled {
            feature: match other {
                Arch::Aarch64 => "aarch64",
                _ => "x86",
            },
        }),
    }
}

// ─── EmitterState ──────────────────────────────────────────

/// State shared by every emitter variant.
///
/// `inst_options`, `extra_reg`, and `inline_comment` form the transient
/// per-instruction group; every `emit()` consumes them.
pub struct EmitterState {
    pub(crate) code: Option<CodeRef>,
    pub(crate) emitter_id: EmitterId,
    pub(crate) etype: EmitterType,
    pub(crate) flags: EmitterFlags,
    pub(crate) funcs: Option<ArchFuncs>,
    pub(crate) arch: Option<Arch>,
    pub(crate) section: SectionId,
    pub(crate) encoding_options: EncodingOptions,
    pub(crate) diagnostic_options: DiagnosticOptions,
    pub(crate) forced_inst_options: InstOptions,
    pub(crate) inst_options: InstOptions,
    pub(crate) extra_reg: Option<Reg>,
    pub(crate) inline_comment: Option<String>,
    pub(crate) logger: Option<Box<dyn Logger>>,
    pub(crate) error_handler: Option<Box<dyn ErrorHandler>>,
}

impl EmitterState {
    pub(crate) fn new(etype: EmitterType) -> Self {
        Self {
            code: None,
            emitter_id: EmitterId(0),
            etype,
            flags: EmitterFlags::NONE,
            funcs: None,
            arch: None,
            section: SectionId::from_raw(0),
            encoding_options: EncodingOptions::NONE,
            diagnostic_options: DiagnosticOptions::NONE,
            forced_inst_options: InstOptions::NONE,
            inst_options: InstOptions::NONE,
            extra_reg: None,
            inline_comment: None,
            logger: None,
            error_handler: None,
        }
    }

    /// Whether the diagnostic options request validation for this variant.
    pub(crate) fn wants_validation(&self) -> bool {
        match self.etype {
            EmitterType::Assembler => self
                .diagnostic_options
                .contains(DiagnosticOptions::VALIDATE_ASSEMBLER),
            _ => self
                .diagnostic_options
                .contains(DiagnosticOptions::VALIDATE_INTERMEDIATE),
        }
    }

    pub(crate) fn validation_flags(&self) -> ValidationFlags {
        match self.etype {
            EmitterType::Assembler => ValidationFlags::NONE,
            _ => ValidationFlags::ENABLE_VIRT_REGS,
        }
    }
}

impl core::fmt::Debug for EmitterState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EmitterState")
            .field("etype", &self.etype)
            .field("flags", &self.flags)
            .field("section", &self.section)
            .field("inst_options", &self.inst_options)
            .field("extra_reg", &self.extra_reg)
            .field("inline_comment", &self.inline_comment)
            .finish_non_exhaustive()
    }
}

/// Route an error through the effective handler (the state's own, else the
/// holder's) and hand it back unchanged.
pub(crate) fn report_error_state(state: &mut EmitterState, error: Error) -> Error {
    let origin = state.etype;
    if let Some(handler) = state.error_handler.as_deref_mut() {
        handler.handle_error(&error, origin);
        return error;
    }
    if let Some(code) = state.code.clone() {
        if let Ok(mut holder) = code.try_borrow_mut() {
            if let Some(handler) = holder.error_handler_mut() {
                handler.handle_error(&error, origin);
            }
        }
    }
    error
}

/// Attach `state` to a code holder: allocate an emitter id, select the
/// function table, and point the current section at `.text`.
pub(crate) fn attach_state(state: &mut EmitterState, code: &CodeRef) -> Result<(), Error> {
    if state.flags.contains(EmitterFlags::ATTACHED) {
        return Err(Error::AlreadyAttached);
    }
    let mut holder = code.borrow_mut();
    let arch = holder.env().arch();
    let funcs = arch_funcs(arch)?;
    let id = holder.attach_emitter();
    let text = holder.text_section();
    let inherited_logger = holder.has_logger();
    drop(holder);

    state.code = Some(code.clone());
    state.emitter_id = id;
    state.arch = Some(arch);
    state.funcs = Some(funcs);
    state.section = text;
    state.flags.insert(EmitterFlags::ATTACHED);
    if inherited_logger {
        state.flags.insert(EmitterFlags::LOG_COMMENTS);
    }
    Ok(())
}

/// Detach `state` from its holder; safe to call repeatedly (and from
/// `Drop`, where a stale holder is silently tolerated).
pub(crate) fn detach_state(state: &mut EmitterState) {
    if let Some(code) = state.code.take() {
        if let Ok(mut holder) = code.try_borrow_mut() {
            let _ = holder.detach_emitter(state.emitter_id);
        }
    }
    state.flags.remove(EmitterFlags::ATTACHED);
    state.funcs = None;
    state.arch = None;
}

/// Route a line to the effective logger: the emitter's own, else the
/// holder's.
pub(crate) fn log_line(state: &mut EmitterState, line: &str) {
    if let Some(logger) = state.logger.as_deref_mut() {
        logger.log(line);
        return;
    }
    if let Some(code) = state.code.clone() {
        if let Ok(mut holder) = code.try_borrow_mut() {
            if let Some(logger) = holder.logger_mut() {
                logger.log(line);
            }
        }
    }
}

/// Whether an effective logger exists (own or inherited).
pub(crate) fn has_effective_logger(state: &EmitterState) -> bool {
    if state.logger.is_some() {
        return true;
    }
    state
        .code
        .as_ref()
        .is_some_and(|code| code.try_borrow().is_ok_and(|h| h.has_logger()))
}

// ─── The Emitter trait ─────────────────────────────────────

/// The polymorphic instruction front-end.
///
/// `emit()` and the label/section/data operations form the stable surface;
/// the `*_impl` hooks and the deferred-vs-immediate operations are supplied
/// by [`Assembler`](crate::asm::Assembler),
/// [`Builder`](crate::builder::Builder), and
/// [`Compiler`](crate::compiler::Compiler).
pub trait Emitter {
    /// Shared emitter state (implementation detail of the variants).
    fn state(&self) -> &EmitterState;

    /// Shared emitter state, mutable.
    fn state_mut(&mut self) -> &mut EmitterState;

    /// Variant emission hook.  Called by [`Emitter::emit`] after transient
    /// state has been consumed and validation has passed; do not call
    /// directly.
    fn emit_inst_impl(
        &mut self,
        inst: &BaseInst,
        operands: &[Operand],
        comment: Option<String>,
    ) -> Result<(), Error>;

    /// Bind a label at the current position (immediately for an Assembler,
    /// as an IR node for Builder/Compiler).
    fn bind(&mut self, label: LabelId) -> Result<(), Error>;

    /// Switch the active section.
    fn set_section(&mut self, section: SectionId) -> Result<(), Error>;

    /// Insert padding up to `alignment` (a power of two).
    fn align(&mut self, mode: AlignMode, alignment: u32) -> Result<(), Error>;

    /// Emit raw data bytes.
    fn embed(&mut self, data: &[u8]) -> Result<(), Error>;

    /// Emit `repeat` copies of `count` elements of `ty` read from `data`.
    fn embed_data_array(
        &mut self,
        ty: DataType,
        data: &[u8],
        count: usize,
        repeat: usize,
    ) -> Result<(), Error>;

    /// Emit the absolute address of `label` as a `size`-byte field
    /// (0 = pointer width), recording a relocation.
    fn embed_label(&mut self, label: LabelId, size: u8) -> Result<(), Error>;

    /// Emit `label - base` as a `size`-byte field.
    fn embed_label_delta(
        &mut self,
        label: LabelId,
        base: LabelId,
        size: u8,
    ) -> Result<(), Error>;

    /// Align to the pool's requirement, bind `label` at the pool base, and
    /// emit the pooled bytes.
    fn embed_const_pool(&mut self, label: LabelId, pool: &ConstPool) -> Result<(), Error>;

    /// Attach a standalone comment (logger for an Assembler, IR for
    /// Builder/Compiler).
    fn comment(&mut self, text: &str) -> Result<(), Error>;

    /// Materialize deferred state.  No-op for an Assembler; Builder and
    /// Compiler replay their IR through a transient Assembler and freeze.
    fn finalize(&mut self) -> Result<(), Error>;

    // ── provided: identity and configuration ───────────────

    /// Which engine backs this emitter.
    fn emitter_type(&self) -> EmitterType {
        self.state().etype
    }

    /// Status flags.
    fn emitter_flags(&self) -> EmitterFlags {
        self.state().flags
    }

    /// Whether the emitter is attached to a code holder.
    fn is_attached(&self) -> bool {
        self.state().flags.contains(EmitterFlags::ATTACHED)
    }

    /// Whether `finalize()` completed.
    fn is_finalized(&self) -> bool {
        self.state().flags.contains(EmitterFlags::FINALIZED)
    }

    /// The attached code holder handle.
    fn code(&self) -> Option<CodeRef> {
        self.state().code.clone()
    }

    /// The active section.
    fn current_section(&self) -> SectionId {
        self.state().section
    }

    /// Detach from the code holder.  Fails `NotAttached` when already
    /// detached.
    fn detach(&mut self) -> Result<(), Error> {
        if !self.is_attached() {
            return Err(Error::NotAttached);
        }
        detach_state(self.state_mut());
        Ok(())
    }

    /// Encoding options.
    fn encoding_options(&self) -> EncodingOptions {
        self.state().encoding_options
    }

    /// Replace the encoding options.
    fn set_encoding_options(&mut self, options: EncodingOptions) {
        self.state_mut().encoding_options = options;
    }

    /// Set encoding option bits.
    fn add_encoding_options(&mut self, options: EncodingOptions) {
        self.state_mut().encoding_options.insert(options);
    }

    /// Diagnostic options.
    fn diagnostic_options(&self) -> DiagnosticOptions {
        self.state().diagnostic_options
    }

    /// Replace the diagnostic options.
    fn set_diagnostic_options(&mut self, options: DiagnosticOptions) {
        self.state_mut().diagnostic_options = options;
    }

    /// Set diagnostic option bits.
    fn add_diagnostic_options(&mut self, options: DiagnosticOptions) {
        self.state_mut().diagnostic_options.insert(options);
    }

    // ── provided: transient per-instruction state ──────────

    /// Options applied to the next instruction only.
    fn inst_options(&self) -> InstOptions {
        self.state().inst_options
    }

    /// Set the next instruction's options.
    fn set_inst_options(&mut self, options: InstOptions) {
        self.state_mut().inst_options = options;
    }

    /// Add bits to the next instruction's options.
    fn add_inst_options(&mut self, options: InstOptions) {
        self.state_mut().inst_options.insert(options);
    }

    /// Options merged into every instruction.
    fn forced_inst_options(&self) -> InstOptions {
        self.state().forced_inst_options
    }

    /// Replace the forced (sticky) instruction options.
    fn set_forced_inst_options(&mut self, options: InstOptions) {
        self.state_mut().forced_inst_options = options;
    }

    /// The pending extra register decorator.
    fn extra_reg(&self) -> Option<Reg> {
        self.state().extra_reg
    }

    /// Decorate the next instruction with an extra register (e.g. an
    /// AVX-512 opmask).
    fn set_extra_reg(&mut self, reg: Reg) {
        self.state_mut().extra_reg = Some(reg);
    }

    /// Clear the pending extra register.
    fn reset_extra_reg(&mut self) {
        self.state_mut().extra_reg = None;
    }

    /// The pending inline comment.
    fn inline_comment(&self) -> Option<&str> {
        self.state().inline_comment.as_deref()
    }

    /// Attach a comment to the next instruction.  The text is copied; the
    /// copy lives until the next `emit()` consumes it.
    fn set_inline_comment(&mut self, text: &str) {
        self.state_mut().inline_comment = Some(String::from(text));
    }

    /// Clear all transient per-instruction state.
    fn reset_state(&mut self) {
        let st = self.state_mut();
        st.inst_options = InstOptions::NONE;
        st.extra_reg = None;
        st.inline_comment = None;
    }

    // ── provided: logger / error handler ───────────────────

    /// Install an emitter-own logger, or `None` to revert to inheriting
    /// the holder's.
    fn set_logger(&mut self, logger: Option<Box<dyn Logger>>) {
        let st = self.state_mut();
        if logger.is_some() {
            st.flags.insert(EmitterFlags::OWN_LOGGER | EmitterFlags::LOG_COMMENTS);
        } else {
            st.flags.remove(EmitterFlags::OWN_LOGGER | EmitterFlags::LOG_COMMENTS);
        }
        st.logger = logger;
    }

    /// Whether this emitter overrides the holder's logger.
    fn has_own_logger(&self) -> bool {
        self.state().flags.contains(EmitterFlags::OWN_LOGGER)
    }

    /// Install an emitter-own error handler, or `None` to revert to
    /// inheriting the holder's.
    fn set_error_handler(&mut self, handler: Option<Box<dyn ErrorHandler>>) {
        let st = self.state_mut();
        if handler.is_some() {
            st.flags.insert(EmitterFlags::OWN_ERROR_HANDLER);
        } else {
            st.flags.remove(EmitterFlags::OWN_ERROR_HANDLER);
        }
        st.error_handler = handler;
    }

    /// Whether this emitter overrides the holder's error handler.
    fn has_own_error_handler(&self) -> bool {
        self.state().flags.contains(EmitterFlags::OWN_ERROR_HANDLER)
    }

    /// Route an error through the effective handler (own, else the
    /// holder's) and hand it back unchanged.
    fn report_error(&mut self, error: Error) -> Error {
        report_error_state(self.state_mut(), error)
    }

    // ── provided: instruction submission ───────────────────

    /// Submit one instruction with up to [`MAX_OPERAND_COUNT`] operands.
    ///
    /// The contract:
    /// 1. pending options are merged with the forced options;
    /// 2. the transient group (options, extra register, inline comment) is
    ///    consumed whether emission succeeds or fails;
    /// 3. validation runs first when the diagnostic options request it;
    /// 4. failures are routed through [`Emitter::report_error`] and
    ///    returned.
    fn emit(&mut self, id: InstId, operands: &[Operand]) -> Result<(), Error> {
        // Consume transient state up front; it must not survive this call.
        let (inst, comment) = {
            let st = self.state_mut();
            let options = st.inst_options | st.forced_inst_options;
            st.inst_options = InstOptions::NONE;
            let extra_reg = st.extra_reg.take();
            let comment = st.inline_comment.take();
            (
                BaseInst {
                    id,
                    options,
                    extra_reg,
                },
                comment,
            )
        };

        let precheck = (|| {
            let st = self.state();
            if !st.flags.contains(EmitterFlags::ATTACHED) {
                return Err(Error::NotAttached);
            }
            if st.flags.contains(EmitterFlags::FINALIZED) {
                return Err(Error::AlreadyFinalized);
            }
            if operands.len() > MAX_OPERAND_COUNT {
                return Err(Error::invalid_arg(format!(
                    "{} operands exceed the maximum of {}",
                    operands.len(),
                    MAX_OPERAND_COUNT
                )));
            }
            if st.wants_validation() {
                let funcs = st.funcs.as_ref().ok_or(Error::NotAttached)?;
                (funcs.validate)(&inst, operands, st.validation_flags())?;
            }
            Ok(())
        })();

        let result = match precheck {
            Ok(()) => self.emit_inst_impl(&inst, operands, comment),
            Err(e) => Err(e),
        };
        result.map_err(|e| self.report_error(e))
    }

    /// Submit an instruction value: its options and extra register load
    /// the transient state, then the array form runs.
    fn emit_inst(&mut self, inst: &BaseInst, operands: &[Operand]) -> Result<(), Error> {
        {
            let st = self.state_mut();
            st.inst_options.insert(inst.options);
            if inst.extra_reg.is_some() {
                st.extra_reg = inst.extra_reg;
            }
        }
        self.emit(inst.id, operands)
    }

    /// Convenience: emit with one operand.
    fn emit1(&mut self, id: InstId, o0: impl Into<Operand>) -> Result<(), Error>
    where
        Self: Sized,
    {
        self.emit(id, &[o0.into()])
    }

    /// Convenience: emit with two operands.
    fn emit2(
        &mut self,
        id: InstId,
        o0: impl Into<Operand>,
        o1: impl Into<Operand>,
    ) -> Result<(), Error>
    where
        Self: Sized,
    {
        self.emit(id, &[o0.into(), o1.into()])
    }

    /// Convenience: emit with three operands.
    fn emit3(
        &mut self,
        id: InstId,
        o0: impl Into<Operand>,
        o1: impl Into<Operand>,
        o2: impl Into<Operand>,
    ) -> Result<(), Error>
    where
        Self: Sized,
    {
        self.emit(id, &[o0.into(), o1.into(), o2.into()])
    }

    // ── provided: label management ─────────────────────────

    /// Create an anonymous label.
    fn new_label(&mut self) -> Result<LabelId, Error> {
        let result = match self.state().code.clone() {
            Some(code) => code.borrow_mut().new_label(),
            None => Err(Error::NotAttached),
        };
        result.map_err(|e| self.report_error(e))
    }

    /// Create a named label.
    fn new_named_label(
        &mut self,
        name: &str,
        ty: LabelType,
        parent: Option<LabelId>,
    ) -> Result<LabelId, Error> {
        let result = match self.state().code.clone() {
            Some(code) => code.borrow_mut().new_named_label(name, ty, parent),
            None => Err(Error::NotAttached),
        };
        result.map_err(|e| self.report_error(e))
    }

    /// Create an external label (resolvable only by the final consumer).
    fn new_external_label(&mut self, name: &str) -> Result<LabelId, Error> {
        self.new_named_label(name, LabelType::External, None)
    }

    /// Create an anonymous label with a display name.
    fn new_anonymous_label(&mut self, name: &str) -> Result<LabelId, Error> {
        self.new_named_label(name, LabelType::Anonymous, None)
    }

    /// Look up a registered label by name.
    fn label_by_name(&mut self, name: &str, parent: Option<LabelId>) -> Option<LabelId> {
        let code = self.state().code.clone()?;
        let holder = code.try_borrow().ok()?;
        holder.label_by_name(name, parent)
    }

    /// Whether `label` names a live label of the attached holder.
    fn is_label_valid(&self, label: LabelId) -> bool {
        self.state()
            .code
            .as_ref()
            .is_some_and(|code| {
                code.try_borrow()
                    .is_ok_and(|holder| holder.is_label_valid(label))
            })
    }

    /// Format a comment through the emitter's comment channel.
    fn comment_fmt(&mut self, args: core::fmt::Arguments<'_>) -> Result<(), Error> {
        let text = format!("{}", args);
        self.comment(&text)
    }

    // ── provided: function frames ──────────────────────────

    /// Emit the architecture's standard function prolog for `frame`.
    fn emit_prolog(&mut self, frame: &FuncFrame) -> Result<(), Error>
    where
        Self: Sized,
    {
        let funcs = self.state().funcs.ok_or(Error::NotAttached)?;
        (funcs.emit_prolog)(self, frame)
    }

    /// Emit the matching epilog (including the return).
    fn emit_epilog(&mut self, frame: &FuncFrame) -> Result<(), Error>
    where
        Self: Sized,
    {
        let funcs = self.state().funcs.ok_or(Error::NotAttached)?;
        (funcs.emit_epilog)(self, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_type_sizes() {
        assert_eq!(DataType::U8.size(), 1);
        assert_eq!(DataType::U16.size(), 2);
        assert_eq!(DataType::F32.size(), 4);
        assert_eq!(DataType::U64.size(), 8);
    }

    #[test]
    fn emitter_flags_bits_are_distinct() {
        let all = [
            EmitterFlags::ATTACHED,
            EmitterFlags::LOG_COMMENTS,
            EmitterFlags::OWN_LOGGER,
            EmitterFlags::OWN_ERROR_HANDLER,
            EmitterFlags::FINALIZED,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert!(!a.intersects(*b));
            }
        }
    }
}
