//! The Compiler: Builder semantics plus a virtual-register pool and an
//! allocation pass that rewrites virtual ids to physical ids before the
//! replay step of `finalize()`.
//!
//! The allocator is deliberately simple: first-use assignment from the
//! architecture's allocatable set, no liveness splitting, no spilling.
//! Exhausting the set surfaces as `RegAllocFailure`.

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::builder::{Builder, NodeKind};
use crate::emitter::{
    report_error_state, AlignMode, DataType, EmitterState, EmitterType, Emitter,
};
use crate::error::Error;
use crate::holder::{CodeRef, LabelId, SectionId};
use crate::inst::{BaseInst, DiagnosticOptions};
use crate::operand::{Arch, Operand, Reg, RegGroup, VIRT_ID_MIN};
use crate::pool::ConstPool;

/// A virtual register record.
#[derive(Debug, Clone, Copy)]
struct VirtReg {
    group: RegGroup,
    size: u8,
}

/// Compiling emitter with virtual registers.
///
/// # Examples
///
/// ```rust
/// use jitasm_rs::compiler::Compiler;
/// use jitasm_rs::emitter::Emitter;
/// use jitasm_rs::holder::CodeHolder;
/// use jitasm_rs::inst::InstId;
/// use jitasm_rs::operand::{Arch, Environment};
///
/// let code = CodeHolder::new(Environment::new(Arch::X86_64)).into_ref();
/// let mut c = Compiler::new(&code)?;
/// let tmp = c.new_gp64()?;
/// c.emit2(InstId::Mov, tmp, 42i64)?;
/// c.emit(InstId::Ret, &[])?;
/// c.finalize()?;
/// # Ok::<(), jitasm_rs::error::Error>(())
/// ```
#[derive(Debug)]
pub struct Compiler {
    base: Builder,
    virt_regs: Vec<VirtReg>,
}

impl Compiler {
    /// Create a compiler attached to `code`.
    pub fn new(code: &CodeRef) -> Result<Self, Error> {
        Ok(Self {
            base: Builder::with_type(code, EmitterType::Compiler)?,
            virt_regs: Vec::new(),
        })
    }

    /// Allocate a virtual register.
    pub fn new_virt_reg(&mut self, group: RegGroup, size: u8) -> Result<Reg, Error> {
        let idx = self.virt_regs.len();
        if idx >= usize::from(u16::MAX - VIRT_ID_MIN) {
            return Err(Error::RegAllocFailure {
                detail: String::from("virtual register pool exhausted"),
            });
        }
        self.virt_regs.push(VirtReg { group, size });
        Ok(Reg::new(group, VIRT_ID_MIN + idx as u16, size))
    }

    /// Allocate a 64-bit general-purpose virtual register.
    pub fn new_gp64(&mut self) -> Result<Reg, Error> {
        self.new_virt_reg(RegGroup::Gp, 8)
    }

    /// Allocate a 32-bit general-purpose virtual register.
    pub fn new_gp32(&mut self) -> Result<Reg, Error> {
        self.new_virt_reg(RegGroup::Gp, 4)
    }

    /// Number of virtual registers created so far.
    #[must_use]
    pub fn virt_reg_count(&self) -> usize {
        self.virt_regs.len()
    }

    /// Physical ids assignable per register group.
    fn allocatable(arch: Arch, group: RegGroup) -> Vec<u16> {
        match (group, arch) {
            // rsp/rbp are reserved for the stack frame.
            (RegGroup::Gp, Arch::X86_64) => (0..16).filter(|id| *id != 4 && *id != 5).collect(),
            (RegGroup::Gp, Arch::X86) => (0..8).filter(|id| *id != 4 && *id != 5).collect(),
            // x29/x30/sp are frame pointer, link register, stack pointer.
            (RegGroup::Gp, Arch::Aarch64) => (0..29).collect(),
            (RegGroup::Vec, Arch::Aarch64) => (0..32).collect(),
            (RegGroup::Vec, _) => (0..16).collect(),
            // k0 means "no mask" and is not assignable.
            (RegGroup::Mask, _) => (1..8).collect(),
        }
    }

    /// Rewrite every virtual register in the node list to a physical one.
    fn ra_pass(&mut self) -> Result<(), Error> {
        let arch = self.base.state().arch.ok_or(Error::NotAttached)?;
        let annotate = self
            .base
            .state()
            .diagnostic_options
            .contains(DiagnosticOptions::RA_ANNOTATE);
        let virt_regs = self.virt_regs.clone();

        let mut assigned: BTreeMap<u16, u16> = BTreeMap::new();
        let mut cursors: BTreeMap<u8, usize> = BTreeMap::new();

        let mut assign = |reg: Reg| -> Result<Reg, Error> {
            if !reg.is_virtual() {
                return Ok(reg);
            }
            let idx = usize::from(reg.id() - VIRT_ID_MIN);
            let info = virt_regs.get(idx).ok_or_else(|| Error::RegAllocFailure {
                detail: format!("unknown virtual register v{}", idx),
            })?;
            if let Some(&phys) = assigned.get(&reg.id()) {
                return Ok(reg.with_id(phys));
            }
            let pool = Self::allocatable(arch, info.group);
            let group_key = info.group as u8;
            let cursor = cursors.entry(group_key).or_insert(0);
            let Some(&phys) = pool.get(*cursor) else {
                return Err(Error::RegAllocFailure {
                    detail: format!(
                        "out of physical registers for v{} ({} assignable)",
                        idx,
                        pool.len()
                    ),
                });
            };
            *cursor += 1;
            assigned.insert(reg.id(), phys);
            Ok(reg.with_id(phys))
        };

        let mut annotations: Vec<(usize, String)> = Vec::new();
        for (node_idx, node) in self.base.nodes_mut().iter_mut().enumerate() {
            let NodeKind::Inst(inst_node) = &mut node.kind else {
                continue;
            };
            let mut touched: Vec<(u16, Reg)> = Vec::new();
            for op in &mut inst_node.operands {
                match op {
                    Operand::Reg(r) => {
                        let old = *r;
                        let new = assign(old)?;
                        if old.is_virtual() {
                            touched.push((old.id(), new));
                        }
                        *op = Operand::Reg(new);
                    }
                    Operand::Mem(m) => {
                        let mut failure = None;
                        m.map_regs(|r| match assign(r) {
                            Ok(new) => {
                                if r.is_virtual() {
                                    touched.push((r.id(), new));
                                }
                                new
                            }
                            Err(e) => {
                                failure = Some(e);
                                r
                            }
                        });
                        if let Some(e) = failure {
                            return Err(e);
                        }
                    }
                    _ => {}
                }
            }
            if let Some(extra) = inst_node.inst.extra_reg {
                let new = assign(extra)?;
                if extra.is_virtual() {
                    touched.push((extra.id(), new));
                }
                inst_node.inst.extra_reg = Some(new);
            }
            if annotate && !touched.is_empty() {
                let mut text = String::new();
                for (i, (vid, phys)) in touched.iter().enumerate() {
                    if i > 0 {
                        text.push_str(", ");
                    }
                    let _ = core::fmt::Write::write_fmt(
                        &mut text,
                        format_args!("v{} -> {}", vid - VIRT_ID_MIN, phys_name(arch, *phys)),
                    );
                }
                annotations.push((node_idx, text));
            }
        }

        for (node_idx, text) in annotations {
            if let NodeKind::Inst(inst_node) = &mut self.base.nodes_mut()[node_idx].kind {
                match &mut inst_node.comment {
                    Some(existing) => {
                        existing.push_str(" | ");
                        existing.push_str(&text);
                    }
                    None => inst_node.comment = Some(text),
                }
            }
        }
        Ok(())
    }
}

/// Display name for an assigned physical register in annotations.
fn phys_name(arch: Arch, reg: Reg) -> String {
    match arch {
        #[cfg(feature = "x86")]
        Arch::X86 | Arch::X86_64 => crate::x86::reg_name(reg),
        #[cfg(feature = "aarch64")]
        Arch::Aarch64 => crate::aarch64::reg_name(reg),
        #[allow(unreachable_patterns)]
        _ => format!("r{}", reg.id()),
    }
}

impl Emitter for Compiler {
    fn state(&self) -> &EmitterState {
        self.base.state()
    }

    fn state_mut(&mut self) -> &mut EmitterState {
        self.base.state_mut()
    }

    fn emit_inst_impl(
        &mut self,
        inst: &BaseInst,
        operands: &[Operand],
        comment: Option<String>,
    ) -> Result<(), Error> {
        self.base.emit_inst_impl(inst, operands, comment)
    }

    fn bind(&mut self, label: LabelId) -> Result<(), Error> {
        self.base.bind(label)
    }

    fn set_section(&mut self, section: SectionId) -> Result<(), Error> {
        self.base.set_section(section)
    }

    fn align(&mut self, mode: AlignMode, alignment: u32) -> Result<(), Error> {
        self.base.align(mode, alignment)
    }

    fn embed(&mut self, data: &[u8]) -> Result<(), Error> {
        self.base.embed(data)
    }

    fn embed_data_array(
        &mut self,
        ty: DataType,
        data: &[u8],
        count: usize,
        repeat: usize,
    ) -> Result<(), Error> {
        self.base.embed_data_array(ty, data, count, repeat)
    }

    fn embed_label(&mut self, label: LabelId, size: u8) -> Result<(), Error> {
        self.base.embed_label(label, size)
    }

    fn embed_label_delta(
        &mut self,
        label: LabelId,
        base: LabelId,
        size: u8,
    ) -> Result<(), Error> {
        self.base.embed_label_delta(label, base, size)
    }

    fn embed_const_pool(&mut self, label: LabelId, pool: &ConstPool) -> Result<(), Error> {
        self.base.embed_const_pool(label, pool)
    }

    fn comment(&mut self, text: &str) -> Result<(), Error> {
        self.base.comment(text)
    }

    /// Allocate registers, then replay like a Builder.
    fn finalize(&mut self) -> Result<(), Error> {
        if self.base.is_finalized() {
            let e = Error::AlreadyFinalized;
            return Err(report_error_state(self.base.state_mut(), e));
        }
        if let Err(e) = self.ra_pass() {
            return Err(report_error_state(self.base.state_mut(), e));
        }
        self.base.finalize()
    }
}
