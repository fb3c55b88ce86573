//! The Builder: records submissions as a deferred instruction list and
//! materializes bytes on `finalize()` by replaying the list through a
//! transient [`Assembler`] attached to the same code holder.
//!
//! Nodes carry a monotonic position counter, not byte offsets; offsets do
//! not exist until replay.

use alloc::collections::BTreeSet;
use alloc::string::String;
use alloc::vec::Vec;

use crate::asm::Assembler;
use crate::emitter::{
    attach_state, detach_state, report_error_state, AlignMode, DataType, EmitterFlags,
    EmitterState, EmitterType, Emitter,
};
use crate::error::Error;
use crate::holder::{CodeRef, LabelId, SectionId};
use crate::inst::BaseInst;
use crate::operand::Operand;
use crate::pool::ConstPool;

/// A recorded instruction submission.
#[derive(Debug, Clone)]
pub struct InstNode {
    /// The instruction with its effective options and extra register.
    pub inst: BaseInst,
    /// Operand snapshot.
    pub operands: Vec<Operand>,
    /// Inline comment copied out of the transient state.
    pub comment: Option<String>,
}

/// One deferred operation.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// An instruction.
    Inst(InstNode),
    /// A label bind point.
    Label(LabelId),
    /// Alignment padding.
    Align {
        /// Padding flavor.
        mode: AlignMode,
        /// Required alignment.
        alignment: u32,
    },
    /// Raw data bytes.
    EmbedData(Vec<u8>),
    /// Absolute label address field.
    EmbedLabel {
        /// Target label.
        label: LabelId,
        /// Field size (0 = pointer width).
        size: u8,
    },
    /// Label difference field.
    EmbedLabelDelta {
        /// Minuend label.
        label: LabelId,
        /// Subtrahend label.
        base: LabelId,
        /// Field size (0 = pointer width).
        size: u8,
    },
    /// A constant pool snapshot with its bind label.
    EmbedConstPool {
        /// Label bound at the pool base.
        label: LabelId,
        /// Pooled bytes.
        data: Vec<u8>,
        /// Base alignment.
        alignment: u32,
    },
    /// Section switch.
    Section(SectionId),
    /// Standalone comment.
    Comment(String),
}

/// A node in the deferred stream.
#[derive(Debug, Clone)]
pub struct Node {
    /// Monotonic position counter (not a byte offset).
    pub position: u32,
    /// The operation.
    pub kind: NodeKind,
}

/// Deferred instruction-list emitter.
///
/// # Examples
///
/// ```rust
/// use jitasm_rs::builder::Builder;
/// use jitasm_rs::emitter::Emitter;
/// use jitasm_rs::holder::CodeHolder;
/// use jitasm_rs::inst::InstId;
/// use jitasm_rs::operand::{Arch, Environment};
///
/// let code = CodeHolder::new(Environment::new(Arch::X86_64)).into_ref();
/// let mut b = Builder::new(&code)?;
/// b.emit(InstId::Nop, &[])?;
/// b.emit(InstId::Ret, &[])?;
/// b.finalize()?;
/// let text = code.borrow().text_section();
/// assert_eq!(code.borrow().section(text)?.buffer().as_slice(), &[0x90, 0xC3]);
/// # Ok::<(), jitasm_rs::error::Error>(())
/// ```
#[derive(Debug)]
pub struct Builder {
    state: EmitterState,
    nodes: Vec<Node>,
    /// Labels with a bind node already in the stream.
    bound_in_ir: BTreeSet<LabelId>,
    next_position: u32,
}

impl Builder {
    /// Create a builder attached to `code`.
    pub fn new(code: &CodeRef) -> Result<Self, Error> {
        Self::with_type(code, EmitterType::Builder)
    }

    pub(crate) fn with_type(code: &CodeRef, etype: EmitterType) -> Result<Self, Error> {
        let mut state = EmitterState::new(etype);
        attach_state(&mut state, code)?;
        Ok(Self {
            state,
            nodes: Vec::new(),
            bound_in_ir: BTreeSet::new(),
            next_position: 0,
        })
    }

    /// Re-attach a detached builder to a code holder.  Fails with
    /// `AlreadyAttached` while an attachment is live.
    pub fn attach(&mut self, code: &CodeRef) -> Result<(), Error> {
        attach_state(&mut self.state, code)
    }

    /// The recorded nodes, in program order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut Vec<Node> {
        &mut self.nodes
    }

    fn check_open(&self) -> Result<(), Error> {
        if !self.state.flags.contains(EmitterFlags::ATTACHED) {
            return Err(Error::NotAttached);
        }
        if self.state.flags.contains(EmitterFlags::FINALIZED) {
            return Err(Error::AlreadyFinalized);
        }
        Ok(())
    }

    fn push_node(&mut self, kind: NodeKind) {
        let position = self.next_position;
        self.next_position += 1;
        self.nodes.push(Node { position, kind });
    }

    /// Replay every node through a transient assembler.  Errors inside the
    /// replay were already routed through the holder's error handler by
    /// the assembler and are returned as-is.
    pub(crate) fn replay(&mut self) -> Result<(), Error> {
        let code = self.state.code.clone().ok_or(Error::NotAttached)?;
        let mut a = Assembler::new(&code)?;
        a.set_encoding_options(self.state.encoding_options);
        for node in &self.nodes {
            match &node.kind {
                NodeKind::Inst(n) => {
                    if let Some(comment) = &n.comment {
                        a.set_inline_comment(comment);
                    }
                    a.emit_inst(&n.inst, &n.operands)?;
                }
                NodeKind::Label(label) => a.bind(*label)?,
                NodeKind::Align { mode, alignment } => a.align(*mode, *alignment)?,
                NodeKind::EmbedData(data) => a.embed(data)?,
                NodeKind::EmbedLabel { label, size } => a.embed_label(*label, *size)?,
                NodeKind::EmbedLabelDelta { label, base, size } => {
                    a.embed_label_delta(*label, *base, *size)?;
                }
                NodeKind::EmbedConstPool {
                    label,
                    data,
                    alignment,
                } => {
                    a.align(AlignMode::Zero, *alignment)?;
                    a.bind(*label)?;
                    a.embed(data)?;
                }
                NodeKind::Section(section) => a.set_section(*section)?,
                NodeKind::Comment(text) => a.comment(text)?,
            }
        }
        Ok(())
    }
}

impl Emitter for Builder {
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
        self.push_node(NodeKind::Inst(InstNode {
            inst: *inst,
            operands: operands.to_vec(),
            comment,
        }));
        Ok(())
    }

    fn bind(&mut self, label: LabelId) -> Result<(), Error> {
        let result = (|| {
            self.check_open()?;
            let code = self.state.code.clone().ok_or(Error::NotAttached)?;
            let holder = code.borrow();
            holder.label_entry(label)?;
            if holder.is_label_bound(label) || self.bound_in_ir.contains(&label) {
                return Err(Error::AlreadyBound { id: label.raw() });
            }
            Ok(())
        })();
        match result {
            Ok(()) => {
                self.bound_in_ir.insert(label);
                self.push_node(NodeKind::Label(label));
                Ok(())
            }
            Err(e) => Err(report_error_state(&mut self.state, e)),
        }
    }

    fn set_section(&mut self, section: SectionId) -> Result<(), Error> {
        let result = (|| {
            self.check_open()?;
            let code = self.state.code.clone().ok_or(Error::NotAttached)?;
            code.borrow().section(section)?;
            Ok(())
        })();
        match result {
            Ok(()) => {
                self.state.section = section;
                self.push_node(NodeKind::Section(section));
                Ok(())
            }
            Err(e) => Err(report_error_state(&mut self.state, e)),
        }
    }

    fn align(&mut self, mode: AlignMode, alignment: u32) -> Result<(), Error> {
        let result = (|| {
            self.check_open()?;
            if alignment == 0 || !alignment.is_power_of_two() {
                return Err(Error::invalid_arg(alloc::format!(
                    "alignment {} is not a power of two",
                    alignment
                )));
            }
            Ok(())
        })();
        match result {
            Ok(()) => {
                self.push_node(NodeKind::Align { mode, alignment });
                Ok(())
            }
            Err(e) => Err(report_error_state(&mut self.state, e)),
        }
    }

    fn embed(&mut self, data: &[u8]) -> Result<(), Error> {
        self.check_open()
            .map_err(|e| report_error_state(&mut self.state, e))?;
        self.push_node(NodeKind::EmbedData(data.to_vec()));
        Ok(())
    }

    fn embed_data_array(
        &mut self,
        ty: DataType,
        data: &[u8],
        count: usize,
        repeat: usize,
    ) -> Result<(), Error> {
        let result = (|| {
            self.check_open()?;
            let len = count
                .checked_mul(ty.size())
                .ok_or_else(|| Error::invalid_arg("data array size overflows"))?;
            if data.len() < len {
                return Err(Error::invalid_arg(alloc::format!(
                    "data array needs {} bytes, got {}",
                    len,
                    data.len()
                )));
            }
            let mut bytes = Vec::with_capacity(len * repeat);
            for _ in 0..repeat {
                bytes.extend_from_slice(&data[..len]);
            }
            Ok(bytes)
        })();
        match result {
            Ok(bytes) => {
                self.push_node(NodeKind::EmbedData(bytes));
                Ok(())
            }
            Err(e) => Err(report_error_state(&mut self.state, e)),
        }
    }

    fn embed_label(&mut self, label: LabelId, size: u8) -> Result<(), Error> {
        let result = (|| {
            self.check_open()?;
            let code = self.state.code.clone().ok_or(Error::NotAttached)?;
            code.borrow().label_entry(label)?;
            Ok(())
        })();
        match result {
            Ok(()) => {
                self.push_node(NodeKind::EmbedLabel { label, size });
                Ok(())
            }
            Err(e) => Err(report_error_state(&mut self.state, e)),
        }
    }

    fn embed_label_delta(
        &mut self,
        label: LabelId,
        base: LabelId,
        size: u8,
    ) -> Result<(), Error> {
        let result = (|| {
            self.check_open()?;
            let code = self.state.code.clone().ok_or(Error::NotAttached)?;
            let holder = code.borrow();
            holder.label_entry(label)?;
            holder.label_entry(base)?;
            Ok(())
        })();
        match result {
            Ok(()) => {
                self.push_node(NodeKind::EmbedLabelDelta { label, base, size });
                Ok(())
            }
            Err(e) => Err(report_error_state(&mut self.state, e)),
        }
    }

    fn embed_const_pool(&mut self, label: LabelId, pool: &ConstPool) -> Result<(), Error> {
        let result = (|| {
            self.check_open()?;
            let code = self.state.code.clone().ok_or(Error::NotAttached)?;
            let holder = code.borrow();
            holder.label_entry(label)?;
            if holder.is_label_bound(label) || self.bound_in_ir.contains(&label) {
                return Err(Error::AlreadyBound { id: label.raw() });
            }
            Ok(())
        })();
        match result {
            Ok(()) => {
                self.bound_in_ir.insert(label);
                self.push_node(NodeKind::EmbedConstPool {
                    label,
                    data: pool.data().to_vec(),
                    alignment: pool.alignment(),
                });
                Ok(())
            }
            Err(e) => Err(report_error_state(&mut self.state, e)),
        }
    }

    /// Attach to the most recently created instruction node, or record a
    /// standalone comment node.
    fn comment(&mut self, text: &str) -> Result<(), Error> {
        self.check_open()
            .map_err(|e| report_error_state(&mut self.state, e))?;
        if let Some(Node {
            kind: NodeKind::Inst(node),
            ..
        }) = self.nodes.last_mut()
        {
            if node.comment.is_none() {
                node.comment = Some(String::from(text));
                return Ok(());
            }
        }
        self.push_node(NodeKind::Comment(String::from(text)));
        Ok(())
    }

    /// Replay the node list through a transient assembler attached to the
    /// same holder, then freeze this builder.
    fn finalize(&mut self) -> Result<(), Error> {
        let precheck = self.check_open();
        if let Err(e) = precheck {
            return Err(report_error_state(&mut self.state, e));
        }
        self.replay()?;
        self.state.flags.insert(EmitterFlags::FINALIZED);
        Ok(())
    }
}

impl Drop for Builder {
    fn drop(&mut self) {
        detach_state(&mut self.state);
    }
}
