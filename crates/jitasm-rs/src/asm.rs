//! The Assembler: encodes every submitted instruction immediately into the
//! current section's buffer.
//!
//! Label references that cannot be resolved inline reserve placeholder
//! displacement bytes and join the label's link chain; binding the label
//! patches them (see [`CodeHolder::bind_label`](crate::holder::CodeHolder)).
//! A failing emission leaves the section buffer untouched: bytes are
//! appended only after encoding and fixup bookkeeping succeed.

use alloc::format;
use alloc::string::String;

use crate::emitter::{
    attach_state, detach_state, log_line, has_effective_logger, report_error_state, AlignMode,
    DataType, EmitterFlags, EmitterState, EmitterType, EncodeCtx, Emitter,
};
use crate::error::Error;
use crate::fmt::FormatFlags;
use crate::holder::{
    write_fixup, CodeRef, LabelId, PatchSite, RelocEntry, RelocKind, RelocTarget, SectionId,
};
use crate::inst::{BaseInst, EncodingOptions};
use crate::operand::{Arch, Operand};
use crate::pool::ConstPool;
use crate::support::align_padding;

/// Direct byte-emitting assembler.
///
/// # Examples
///
/// ```rust
/// use jitasm_rs::asm::Assembler;
/// use jitasm_rs::emitter::Emitter;
/// use jitasm_rs::holder::CodeHolder;
/// use jitasm_rs::inst::InstId;
/// use jitasm_rs::operand::{Arch, Environment};
/// use jitasm_rs::x86::{RAX, RBP, RSP};
///
/// let code = CodeHolder::new(Environment::new(Arch::X86_64)).into_ref();
/// let mut a = Assembler::new(&code)?;
/// a.emit(InstId::Push, &[RBP.into()])?;
/// a.emit(InstId::Mov, &[RBP.into(), RSP.into()])?;
/// a.emit(InstId::Pop, &[RBP.into()])?;
/// a.emit(InstId::Ret, &[])?;
/// let text = code.borrow().text_section();
/// assert_eq!(code.borrow().section(text)?.buffer().as_slice()[0], 0x55);
/// # Ok::<(), jitasm_rs::error::Error>(())
/// ```
#[derive(Debug)]
pub struct Assembler {
    state: EmitterState,
}

impl Assembler {
    /// Create an assembler attached to `code`.
    pub fn new(code: &CodeRef) -> Result<Self, Error> {
        let mut state = EmitterState::new(EmitterType::Assembler);
        attach_state(&mut state, code)?;
        Ok(Self { state })
    }

    /// Re-attach a detached assembler to a code holder.  Fails with
    /// `AlreadyAttached` while an attachment is live.
    pub fn attach(&mut self, code: &CodeRef) -> Result<(), Error> {
        attach_state(&mut self.state, code)
    }

    /// Current write offset in the active section.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.cursor().unwrap_or(0)
    }

    fn cursor(&self) -> Result<u64, Error> {
        let code = self.state.code.as_ref().ok_or(Error::NotAttached)?;
        let holder = code.borrow();
        Ok(holder.section(self.state.section)?.buffer().len() as u64)
    }

    /// The holder handle, verified live: a `CodeHolder::reset` silently
    /// drops attachments, so the registration is re-checked on every
    /// operation rather than trusting the local flag.
    fn require_attached(&self) -> Result<CodeRef, Error> {
        if !self.state.flags.contains(EmitterFlags::ATTACHED) {
            return Err(Error::NotAttached);
        }
        let code = self.state.code.clone().ok_or(Error::NotAttached)?;
        if !code.borrow().is_emitter_attached(self.state.emitter_id) {
            return Err(Error::NotAttached);
        }
        Ok(code)
    }

    /// Append raw bytes to the active section.
    fn append_to_section(&mut self, f: impl FnOnce(&mut crate::buffer::CodeBuffer)) -> Result<(), Error> {
        let code = self.require_attached()?;
        let mut holder = code.borrow_mut();
        let section = self.state.section;
        f(holder.section_mut(section)?.buffer_mut());
        Ok(())
    }
}

impl Emitter for Assembler {
    fn state(&self) -> &EmitterState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut EmitterState {
        &mut self.state
    }

    fn emit_inst_impl(
        &mut self,
        inst: &BaseInst,
        operands: &[Operand],
        comment: Option<String>,
    ) -> Result<(), Error> {
        let code = self.require_attached()?;
        let funcs = self.state.funcs.ok_or(Error::NotAttached)?;
        let arch = self.state.arch.ok_or(Error::NotAttached)?;
        let section = self.state.section;

        {
            let mut holder = code.borrow_mut();
            let cursor = holder.section(section)?.buffer().len() as u64;

            // A label operand already bound in this section resolves inline.
            let mut label_delta = None;
            for op in operands {
                if let Operand::Label(l) = op {
                    let entry = holder.label_entry(*l)?;
                    if entry.section() == Some(section) {
                        label_delta = Some(entry.offset() as i64 - cursor as i64);
                    }
                }
            }

            let ctx = EncodeCtx {
                arch,
                options: self.state.encoding_options,
                label_delta,
            };
            let mut enc = (funcs.encode)(inst, operands, &ctx)?;

            if let Some(fx) = enc.fixup {
                let site_offset = cursor + u64::from(fx.offset);
                let entry = holder.label_entry(fx.label)?;
                match entry.section() {
                    Some(sec) if sec == section => {
                        // Bound while encoding chose the deferred path;
                        // patch the local bytes before they are appended.
                        let disp = entry.offset() as i64 + fx.addend
                            - fx.kind.pc_base(site_offset) as i64;
                        write_fixup(&mut enc.bytes[fx.offset as usize..], fx.kind, disp)?;
                    }
                    Some(_) => holder.add_relocation(RelocEntry {
                        kind: RelocKind::Relative,
                        src_section: section,
                        src_offset: site_offset,
                        target: RelocTarget::Label(fx.label),
                        delta_base: None,
                        addend: fx.addend,
                        size: fx.kind.size(),
                        format: Some(fx.kind),
                    }),
                    None => holder.add_label_link(
                        fx.label,
                        PatchSite {
                            section,
                            offset: site_offset,
                            kind: fx.kind,
                        },
                    )?,
                }
            }

            holder.section_mut(section)?.buffer_mut().append(&enc.bytes);
        }

        if has_effective_logger(&self.state) {
            let mut line = String::from("  ");
            (funcs.format_inst)(&mut line, FormatFlags::NONE, inst, operands)?;
            if self.state.flags.contains(EmitterFlags::LOG_COMMENTS) {
                if let Some(c) = &comment {
                    line.push_str(" ; ");
                    line.push_str(c);
                }
            }
            log_line(&mut self.state, &line);
        }
        Ok(())
    }

    fn bind(&mut self, label: LabelId) -> Result<(), Error> {
        let result = (|| {
            let code = self.require_attached()?;
            let mut holder = code.borrow_mut();
            let section = self.state.section;
            let offset = holder.section(section)?.buffer().len() as u64;
            holder.bind_label(label, section, offset)
        })();
        match result {
            Ok(()) => {
                if has_effective_logger(&self.state) {
                    let line = format!("L{}:", label.raw());
                    log_line(&mut self.state, &line);
                }
                Ok(())
            }
            Err(e) => Err(report_error_state(&mut self.state, e)),
        }
    }

    fn set_section(&mut self, section: SectionId) -> Result<(), Error> {
        let result = (|| {
            let code = self.require_attached()?;
            let holder = code.borrow();
            holder.section(section)?;
            Ok(())
        })();
        match result {
            Ok(()) => {
                self.state.section = section;
                Ok(())
            }
            Err(e) => Err(report_error_state(&mut self.state, e)),
        }
    }

    fn align(&mut self, mode: AlignMode, alignment: u32) -> Result<(), Error> {
        let result = (|| {
            if alignment == 0 || !alignment.is_power_of_two() {
                return Err(Error::invalid_arg(format!(
                    "alignment {} is not a power of two",
                    alignment
                )));
            }
            let arch = self.state.arch.ok_or(Error::NotAttached)?;
            let optimized = self
                .state
                .encoding_options
                .contains(EncodingOptions::OPTIMIZED_ALIGN);
            let code = self.require_attached()?;
            let mut holder = code.borrow_mut();
            let section = self.state.section;
            let buffer = holder.section_mut(section)?.buffer_mut();
            let pad = align_padding(buffer.len() as u64, alignment) as usize;
            if pad == 0 {
                return Ok(());
            }
            match (mode, arch) {
                (AlignMode::Zero, _) => buffer.append_zeros(pad),
                (AlignMode::Data, Arch::Aarch64) => buffer.append_zeros(pad),
                (AlignMode::Data, _) => buffer.append_fill(0xCC, pad),
                (AlignMode::Code, Arch::Aarch64) => {
                    if pad % 4 != 0 {
                        return Err(Error::invalid_arg(
                            "AArch64 code alignment must be a multiple of 4",
                        ));
                    }
                    for _ in 0..pad / 4 {
                        buffer.append(&0xD503_201Fu32.to_le_bytes());
                    }
                }
                #[cfg(feature = "x86")]
                (AlignMode::Code, _) => crate::x86::nop_padding(buffer, pad, optimized),
                #[cfg(not(feature = "x86"))]
                (AlignMode::Code, _) => {
                    let _ = optimized;
                    buffer.append_fill(0x90, pad);
                }
            }
            Ok(())
        })();
        result.map_err(|e| report_error_state(&mut self.state, e))
    }

    fn embed(&mut self, data: &[u8]) -> Result<(), Error> {
        self.append_to_section(|buf| buf.append(data))
            .map_err(|e| report_error_state(&mut self.state, e))
    }

    fn embed_data_array(
        &mut self,
        ty: DataType,
        data: &[u8],
        count: usize,
        repeat: usize,
    ) -> Result<(), Error> {
        let result = (|| {
            let len = count
                .checked_mul(ty.size())
                .ok_or_else(|| Error::invalid_arg("data array size overflows"))?;
            if data.len() < len {
                return Err(Error::invalid_arg(format!(
                    "data array needs {} bytes, got {}",
                    len,
                    data.len()
                )));
            }
            self.append_to_section(|buf| {
                for _ in 0..repeat {
                    buf.append(&data[..len]);
                }
            })
        })();
        result.map_err(|e| report_error_state(&mut self.state, e))
    }

    fn embed_label(&mut self, label: LabelId, size: u8) -> Result<(), Error> {
        let result = (|| {
            let code = self.require_attached()?;
            let mut holder = code.borrow_mut();
            let size = if size == 0 {
                holder.env().pointer_width()
            } else {
                size
            };
            if !matches!(size, 1 | 2 | 4 | 8) {
                return Err(Error::invalid_arg(format!("embed size {} invalid", size)));
            }
            holder.label_entry(label)?;
            let section = self.state.section;
            let offset = holder.section(section)?.buffer().len() as u64;
            holder.add_relocation(RelocEntry {
                kind: RelocKind::Absolute,
                src_section: section,
                src_offset: offset,
                target: RelocTarget::Label(label),
                delta_base: None,
                addend: 0,
                size,
                format: None,
            });
            holder
                .section_mut(section)?
                .buffer_mut()
                .append_zeros(size as usize);
            Ok(())
        })();
        result.map_err(|e| report_error_state(&mut self.state, e))
    }

    fn embed_label_delta(
        &mut self,
        label: LabelId,
        base: LabelId,
        size: u8,
    ) -> Result<(), Error> {
        let result = (|| {
            let code = self.require_attached()?;
            let mut holder = code.borrow_mut();
            let size = if size == 0 {
                holder.env().pointer_width()
            } else {
                size
            };
            if !matches!(size, 1 | 2 | 4 | 8) {
                return Err(Error::invalid_arg(format!("embed size {} invalid", size)));
            }
            let section = self.state.section;
            let (le, be) = (holder.label_entry(label)?, holder.label_entry(base)?);
            // Same-section pairs resolve immediately; everything else waits
            // for the flattened layout.
            if let (Some(ls), Some(bs)) = (le.section(), be.section()) {
                if ls == bs {
                    let delta = le.offset() as i64 - be.offset() as i64;
                    holder
                        .section_mut(section)?
                        .buffer_mut()
                        .append_le(delta as u64, size);
                    return Ok(());
                }
            }
            let offset = holder.section(section)?.buffer().len() as u64;
            holder.add_relocation(RelocEntry {
                kind: RelocKind::Delta,
                src_section: section,
                src_offset: offset,
                target: RelocTarget::Label(label),
                delta_base: Some(base),
                addend: 0,
                size,
                format: None,
            });
            holder
                .section_mut(section)?
                .buffer_mut()
                .append_zeros(size as usize);
            Ok(())
        })();
        result.map_err(|e| report_error_state(&mut self.state, e))
    }

    fn embed_const_pool(&mut self, label: LabelId, pool: &ConstPool) -> Result<(), Error> {
        let result = (|| {
            let code = self.require_attached()?;
            let mut holder = code.borrow_mut();
            let section = self.state.section;
            {
                let buffer = holder.section_mut(section)?.buffer_mut();
                let pad = align_padding(buffer.len() as u64, pool.alignment()) as usize;
                buffer.append_zeros(pad);
            }
            let offset = holder.section(section)?.buffer().len() as u64;
            holder.bind_label(label, section, offset)?;
            holder.section_mut(section)?.buffer_mut().append(pool.data());
            Ok(())
        })();
        result.map_err(|e| report_error_state(&mut self.state, e))
    }

    fn comment(&mut self, text: &str) -> Result<(), Error> {
        if has_effective_logger(&self.state) {
            let line = format!("; {}", text);
            log_line(&mut self.state, &line);
        }
        Ok(())
    }

    /// No-op for an assembler: bytes were final at emission time.
    fn finalize(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

impl Drop for Assembler {
    fn drop(&mut self) {
        detach_state(&mut self.state);
    }
}
