//! The code holder: sections, labels, relocations, and the byte-level
//! source of truth shared by every attached emitter.
//!
//! Labels are addressed by dense stable [`LabelId`]s and sections by
//! [`SectionId`]s; emitters refer to the holder through a shared
//! [`CodeRef`] handle, so no raw back-pointers exist in either direction.
//! Unresolved label references live as [`PatchSite`]s on the label's link
//! chain and are patched when the label binds; references that cannot be
//! patched inline become [`RelocEntry`] records.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
#[allow(unused_imports)]
use alloc::format;
use alloc::rc::Rc;
use alloc::string::String;
#[allow(unused_imports)]
use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;

use crate::buffer::CodeBuffer;
use crate::emitter::{EmitterId, ErrorHandler};
use crate::fmt::Logger;
use crate::error::Error;
use crate::operand::Environment;
use crate::support::{align_up, bitset_type, fits_signed};

/// Upper bound on live labels; allocation past this fails `TooManyLabels`.
pub const MAX_LABEL_COUNT: usize = 1 << 24;

/// Shared handle to a [`CodeHolder`].
///
/// A holder and its attached emitters form one single-threaded unit; the
/// `RefCell` enforces the exclusive-access discipline at runtime.
pub type CodeRef = Rc<RefCell<CodeHolder>>;

// ─── Ids ───────────────────────────────────────────────────

/// Stable dense section id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SectionId(u32);

impl SectionId {
    /// Construct from a raw index.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw index.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Stable dense label id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LabelId(u32);

impl LabelId {
    /// Construct from a raw index.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw index.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

// ─── Sections ──────────────────────────────────────────────

bitset_type! {
    /// Section attributes.
    pub struct SectionFlags {
        /// Section holds executable code.
        const EXECUTABLE = 0x0000_0001;
        /// Section is writable at run time.
        const WRITABLE = 0x0000_0002;
        /// Section occupies no file bytes; zero-filled when materialized.
        const ZERO_INITIALIZED = 0x0000_0004;
    }
}

/// A named contiguous output region with its own byte buffer.
#[derive(Debug)]
pub struct Section {
    id: SectionId,
    name: String,
    flags: SectionFlags,
    alignment: u32,
    /// Final image offset, assigned by [`CodeHolder::flatten`].
    offset: u64,
    buffer: CodeBuffer,
}

impl Section {
    /// The section id.
    #[must_use]
    pub fn id(&self) -> SectionId {
        self.id
    }

    /// The section name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Section attributes.
    #[must_use]
    pub fn flags(&self) -> SectionFlags {
        self.flags
    }

    /// Required alignment (a power of two).
    #[must_use]
    pub fn alignment(&self) -> u32 {
        self.alignment
    }

    /// Final image offset; meaningful after [`CodeHolder::flatten`].
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The section's byte buffer.
    #[must_use]
    pub fn buffer(&self) -> &CodeBuffer {
        &self.buffer
    }

    /// Mutable access to the byte buffer.
    pub fn buffer_mut(&mut self) -> &mut CodeBuffer {
        &mut self.buffer
    }
}

// ─── Labels ────────────────────────────────────────────────

/// Label classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LabelType {
    /// Unnamed (or display-named) local label; never collides.
    Anonymous,
    /// Named label scoped to a parent label's namespace.
    Local,
    /// Named label in the root namespace.
    Global,
    /// Named symbol resolved outside this code holder; cannot be bound.
    External,
}

/// How a patch value is written into instruction bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FixupKind {
    /// Absolute 32-bit little-endian value.
    Abs32,
    /// Absolute 64-bit little-endian value.
    Abs64,
    /// x86 rel8: signed byte displacement, PC = end of field plus
    /// `trailing` immediate bytes.
    X86Rel8 {
        /// Instruction bytes following the displacement field.
        trailing: u8,
    },
    /// x86 rel32 displacement.
    X86Rel32 {
        /// Instruction bytes following the displacement field.
        trailing: u8,
    },
    /// AArch64 B/BL: offset >> 2 in bits 25:0.
    A64Jump26,
    /// AArch64 B.cond / CBZ / CBNZ: offset >> 2 in bits 23:5.
    A64Branch19,
    /// AArch64 TBZ / TBNZ: offset >> 2 in bits 18:5.
    A64Branch14,
    /// AArch64 ADR: 21-bit byte offset split across immhi/immlo.
    A64Adr21,
    /// AArch64 LDR (literal): offset >> 2 in bits 23:5.
    A64LdrLit19,
}

impl FixupKind {
    /// Size in bytes of the patched field (the whole word on AArch64).
    #[must_use]
    pub const fn size(self) -> u8 {
        match self {
            FixupKind::X86Rel8 { .. } => 1,
            FixupKind::Abs32
            | FixupKind::X86Rel32 { .. }
            | FixupKind::A64Jump26
            | FixupKind::A64Branch19
            | FixupKind::A64Branch14
            | FixupKind::A64Adr21
            | FixupKind::A64LdrLit19 => 4,
            FixupKind::Abs64 => 8,
        }
    }

    /// Whether the patched value is PC-relative.
    #[must_use]
    pub const fn is_pc_relative(self) -> bool {
        !matches!(self, FixupKind::Abs32 | FixupKind::Abs64)
    }

    /// The PC value displacement is measured from, given the offset of the
    /// patched field: past the field (and any trailing immediate) on x86,
    /// the instruction word itself on AArch64.
    #[must_use]
    pub const fn pc_base(self, field_offset: u64) -> u64 {
        match self {
            FixupKind::X86Rel8 { trailing } => field_offset + 1 + trailing as u64,
            FixupKind::X86Rel32 { trailing } => field_offset + 4 + trailing as u64,
            _ => field_offset,
        }
    }
}

/// Check that `value` fits the fixup encoding without writing anything.
pub(crate) fn check_fixup(kind: FixupKind, value: i64) -> Result<(), Error> {
    let (ok, bits) = match kind {
        FixupKind::Abs32 => (
            fits_signed(value, 32) || (value >= 0 && value <= i64::from(u32::MAX)),
            32,
        ),
        FixupKind::Abs64 => (true, 64),
        FixupKind::X86Rel8 { .. } => (fits_signed(value, 8), 8),
        FixupKind::X86Rel32 { .. } => (fits_signed(value, 32), 32),
        FixupKind::A64Jump26 => (value % 4 == 0 && fits_signed(value, 28), 26),
        FixupKind::A64Branch19 | FixupKind::A64LdrLit19 => {
            (value % 4 == 0 && fits_signed(value, 21), 19)
        }
        FixupKind::A64Branch14 => (value % 4 == 0 && fits_signed(value, 16), 14),
        FixupKind::A64Adr21 => (fits_signed(value, 21), 21),
    };
    if ok {
        Ok(())
    } else {
        Err(Error::RelocationOutOfRange {
            displacement: value,
            bits,
        })
    }
}

/// Write `value` into `field` (at least [`FixupKind::size`] bytes) using
/// the fixup encoding.  AArch64 kinds read-modify-write the instruction
/// word; the immediate field is expected to hold zeros.
pub(crate) fn write_fixup(field: &mut [u8], kind: FixupKind, value: i64) -> Result<(), Error> {
    check_fixup(kind, value)?;
    let size = kind.size() as usize;
    if field.len() < size {
        return Err(Error::invalid_arg("patch site out of buffer bounds"));
    }
    match kind {
        FixupKind::Abs32 => field[..4].copy_from_slice(&(value as u32).to_le_bytes()),
        FixupKind::Abs64 => field[..8].copy_from_slice(&(value as u64).to_le_bytes()),
        FixupKind::X86Rel8 { .. } => field[0] = value as i8 as u8,
        FixupKind::X86Rel32 { .. } => {
            field[..4].copy_from_slice(&(value as i32).to_le_bytes());
        }
        FixupKind::A64Jump26 => {
            patch_word(field, ((value >> 2) as u32) & 0x03FF_FFFF);
        }
        FixupKind::A64Branch19 | FixupKind::A64LdrLit19 => {
            patch_word(field, (((value >> 2) as u32) & 0x7_FFFF) << 5);
        }
        FixupKind::A64Branch14 => {
            patch_word(field, (((value >> 2) as u32) & 0x3FFF) << 5);
        }
        FixupKind::A64Adr21 => {
            let immlo = (value as u32) & 0x3;
            let immhi = ((value >> 2) as u32) & 0x7_FFFF;
            patch_word(field, (immlo << 29) | (immhi << 5));
        }
    }
    Ok(())
}

/// OR immediate bits into the little-endian word at the start of `field`.
fn patch_word(field: &mut [u8], bits: u32) {
    let mut word = u32::from_le_bytes([field[0], field[1], field[2], field[3]]);
    word |= bits;
    field[..4].copy_from_slice(&word.to_le_bytes());
}

/// A pending reference to an unbound label: where the displacement goes
/// and how to write it once the target is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PatchSite {
    /// Section containing the patch field.
    pub section: SectionId,
    /// Offset of the patch field (x86) or instruction word (AArch64).
    pub offset: u64,
    /// Bit-level patch format.
    pub kind: FixupKind,
}

/// One label: identity, bind state, and pending patch sites.
#[derive(Debug)]
pub struct LabelEntry {
    id: LabelId,
    ty: LabelType,
    name: Option<String>,
    parent: Option<LabelId>,
    section: Option<SectionId>,
    offset: u64,
    links: Vec<PatchSite>,
}

impl LabelEntry {
    /// The label id.
    #[must_use]
    pub fn id(&self) -> LabelId {
        self.id
    }

    /// Label classification.
    #[must_use]
    pub fn label_type(&self) -> LabelType {
        self.ty
    }

    /// The name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Parent label for `Local` labels.
    #[must_use]
    pub fn parent(&self) -> Option<LabelId> {
        self.parent
    }

    /// Whether the label is bound.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.section.is_some()
    }

    /// The owning section once bound.
    #[must_use]
    pub fn section(&self) -> Option<SectionId> {
        self.section
    }

    /// The bound offset; meaningless while unbound.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of unresolved references.
    #[must_use]
    pub fn link_count(&self) -> usize {
        self.links.len()
    }
}

// ─── Relocations ───────────────────────────────────────────

/// Relocation flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RelocKind {
    /// Absolute target address written at the source field.
    Absolute,
    /// PC-relative displacement to the target.
    Relative,
    /// Difference of two labels (`label - base`).
    Delta,
}

/// What a relocation resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RelocTarget {
    /// A label owned by this holder.
    Label(LabelId),
    /// A known external address.
    Address(u64),
    /// The base of a section.
    SectionRel(SectionId),
}

/// A deferred fixup whose target could not be resolved inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RelocEntry {
    /// Relocation flavor.
    pub kind: RelocKind,
    /// Section containing the source field.
    pub src_section: SectionId,
    /// Offset of the source field within its section.
    pub src_offset: u64,
    /// Resolution target.
    pub target: RelocTarget,
    /// Subtracted label for [`RelocKind::Delta`].
    pub delta_base: Option<LabelId>,
    /// Constant addend.
    pub addend: i64,
    /// Field size in bytes.
    pub size: u8,
    /// Bit-level write format; `None` means a raw little-endian value of
    /// `size` bytes.
    pub format: Option<FixupKind>,
}

// ─── CodeHolder ────────────────────────────────────────────

/// Owns sections, labels, relocations, and emitter-attachment bookkeeping.
pub struct CodeHolder {
    env: Environment,
    sections: Vec<Section>,
    labels: Vec<LabelEntry>,
    /// `(parent-or-root, name)` → id for collision checks and lookup.
    label_names: BTreeMap<(u32, String), LabelId>,
    relocs: Vec<RelocEntry>,
    attached: Vec<EmitterId>,
    next_emitter_id: u64,
    logger: Option<Box<dyn Logger>>,
    error_handler: Option<Box<dyn ErrorHandler>>,
}

/// Root namespace marker in the label-name index.
const ROOT_NAMESPACE: u32 = u32::MAX;

impl CodeHolder {
    /// Create a holder for the given environment with the implicit `.text`
    /// section (id 0), aligned to the architecture's instruction alignment.
    #[must_use]
    pub fn new(env: Environment) -> Self {
        let mut holder = Self {
            env,
            sections: Vec::new(),
            labels: Vec::new(),
            label_names: BTreeMap::new(),
            relocs: Vec::new(),
            attached: Vec::new(),
            next_emitter_id: 0,
            logger: None,
            error_handler: None,
        };
        holder.push_text_section();
        holder
    }

    /// Wrap into the shared handle emitters attach to.
    #[must_use]
    pub fn into_ref(self) -> CodeRef {
        Rc::new(RefCell::new(self))
    }

    fn push_text_section(&mut self) {
        self.sections.push(Section {
            id: SectionId(0),
            name: String::from(".text"),
            flags: SectionFlags::EXECUTABLE,
            alignment: self.env.arch().instruction_alignment(),
            offset: 0,
            buffer: CodeBuffer::new(),
        });
    }

    /// The target environment.
    #[must_use]
    pub fn env(&self) -> Environment {
        self.env
    }

    /// Clear all sections, labels, relocations, and attachments; the
    /// environment and logger/error-handler configuration survive.
    /// Previously attached emitters discover the detachment on next use.
    pub fn reset(&mut self) {
        self.sections.clear();
        self.labels.clear();
        self.label_names.clear();
        self.relocs.clear();
        self.attached.clear();
        self.push_text_section();
    }

    // ── emitter attachment ─────────────────────────────────

    pub(crate) fn attach_emitter(&mut self) -> EmitterId {
        let id = EmitterId::from_raw(self.next_emitter_id);
        self.next_emitter_id += 1;
        self.attached.push(id);
        id
    }

    pub(crate) fn detach_emitter(&mut self, id: EmitterId) -> Result<(), Error> {
        match self.attached.iter().position(|&e| e == id) {
            Some(pos) => {
                self.attached.remove(pos);
                Ok(())
            }
            None => Err(Error::NotAttached),
        }
    }

    pub(crate) fn is_emitter_attached(&self, id: EmitterId) -> bool {
        self.attached.contains(&id)
    }

    /// Number of currently attached emitters.
    #[must_use]
    pub fn attached_emitter_count(&self) -> usize {
        self.attached.len()
    }

    // ── sections ───────────────────────────────────────────

    /// The implicit `.text` section id.
    #[must_use]
    pub fn text_section(&self) -> SectionId {
        SectionId(0)
    }

    /// Number of sections.
    #[must_use]
    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// Append a new section.
    pub fn new_section(
        &mut self,
        name: &str,
        flags: SectionFlags,
        alignment: u32,
    ) -> Result<SectionId, Error> {
        if alignment == 0 || !alignment.is_power_of_two() {
            return Err(Error::invalid_arg(format!(
                "section alignment {} is not a power of two",
                alignment
            )));
        }
        let id = SectionId(self.sections.len() as u32);
        self.sections.push(Section {
            id,
            name: String::from(name),
            flags,
            alignment,
            offset: 0,
            buffer: CodeBuffer::new(),
        });
        Ok(id)
    }

    /// Look up a section.
    pub fn section(&self, id: SectionId) -> Result<&Section, Error> {
        self.sections
            .get(id.0 as usize)
            .ok_or(Error::InvalidSection { id: id.0 })
    }

    /// Look up a section mutably.
    pub fn section_mut(&mut self, id: SectionId) -> Result<&mut Section, Error> {
        self.sections
            .get_mut(id.0 as usize)
            .ok_or(Error::InvalidSection { id: id.0 })
    }

    /// Find a section by name.
    #[must_use]
    pub fn section_by_name(&self, name: &str) -> Option<SectionId> {
        self.sections.iter().find(|s| s.name == name).map(|s| s.id)
    }

    // ── labels ─────────────────────────────────────────────

    fn namespace_key(parent: Option<LabelId>) -> u32 {
        parent.map_or(ROOT_NAMESPACE, |p| p.0)
    }

    /// Allocate an anonymous label.
    pub fn new_label(&mut self) -> Result<LabelId, Error> {
        self.new_label_entry(LabelType::Anonymous, None, None)
    }

    /// Allocate a named label.
    ///
    /// `Global`, `Local`, and `External` labels live in a namespace
    /// (the root, or the parent label for `Local`) and collide by name;
    /// `Anonymous` labels may carry a display name and never collide.
    pub fn new_named_label(
        &mut self,
        name: &str,
        ty: LabelType,
        parent: Option<LabelId>,
    ) -> Result<LabelId, Error> {
        self.new_label_entry(ty, Some(name), parent)
    }

    fn new_label_entry(
        &mut self,
        ty: LabelType,
        name: Option<&str>,
        parent: Option<LabelId>,
    ) -> Result<LabelId, Error> {
        if self.labels.len() >= MAX_LABEL_COUNT {
            return Err(Error::TooManyLabels);
        }
        if let Some(p) = parent {
            if !self.is_label_valid(p) {
                return Err(Error::InvalidLabel { id: p.0 });
            }
            if ty != LabelType::Local {
                return Err(Error::invalid_arg(
                    "only local labels may have a parent label",
                ));
            }
        }
        let registered = matches!(
            ty,
            LabelType::Global | LabelType::Local | LabelType::External
        );
        if registered {
            let name = name.unwrap_or("");
            if name.is_empty() {
                return Err(Error::invalid_arg("named label requires a non-empty name"));
            }
            let key = (Self::namespace_key(parent), String::from(name));
            if self.label_names.contains_key(&key) {
                return Err(Error::LabelNameCollision {
                    name: String::from(name),
                });
            }
        }
        let id = LabelId(self.labels.len() as u32);
        if registered {
            let key = (
                Self::namespace_key(parent),
                String::from(name.unwrap_or("")),
            );
            self.label_names.insert(key, id);
        }
        self.labels.push(LabelEntry {
            id,
            ty,
            name: name.filter(|n| !n.is_empty()).map(String::from),
            parent,
            section: None,
            offset: 0,
            links: Vec::new(),
        });
        Ok(id)
    }

    /// Find a registered label by name within a namespace.
    #[must_use]
    pub fn label_by_name(&self, name: &str, parent: Option<LabelId>) -> Option<LabelId> {
        self.label_names
            .get(&(Self::namespace_key(parent), String::from(name)))
            .copied()
    }

    /// Whether `id` names a live label.
    #[must_use]
    pub fn is_label_valid(&self, id: LabelId) -> bool {
        (id.0 as usize) < self.labels.len()
    }

    /// Look up a label entry.
    pub fn label_entry(&self, id: LabelId) -> Result<&LabelEntry, Error> {
        self.labels
            .get(id.0 as usize)
            .ok_or(Error::InvalidLabel { id: id.0 })
    }

    /// Whether the label exists and is bound.
    #[must_use]
    pub fn is_label_bound(&self, id: LabelId) -> bool {
        self.labels
            .get(id.0 as usize)
            .is_some_and(LabelEntry::is_bound)
    }

    /// The bound offset of a label within its section.
    pub fn label_offset(&self, id: LabelId) -> Result<u64, Error> {
        let entry = self.label_entry(id)?;
        if entry.is_bound() {
            Ok(entry.offset)
        } else {
            Err(Error::InvalidState {
                detail: String::from("label is not bound"),
            })
        }
    }

    /// Record an unresolved reference on an unbound label's link chain.
    pub(crate) fn add_label_link(&mut self, id: LabelId, site: PatchSite) -> Result<(), Error> {
        let entry = self
            .labels
            .get_mut(id.0 as usize)
            .ok_or(Error::InvalidLabel { id: id.0 })?;
        debug_assert!(!entry.is_bound(), "links may only target unbound labels");
        entry.links.push(site);
        Ok(())
    }

    /// Bind a label to `(section, offset)` and patch every recorded
    /// reference.
    ///
    /// Same-section sites are patched in place; cross-section sites are
    /// rewritten into [`RelocEntry`] records for
    /// [`resolve_cross_section`](Self::resolve_cross_section).  If any
    /// same-section displacement does not fit its encoding the bind fails
    /// with `RelocationOutOfRange` and no state changes.
    pub fn bind_label(
        &mut self,
        id: LabelId,
        section: SectionId,
        offset: u64,
    ) -> Result<(), Error> {
        let section_len = self.section(section)?.buffer.len() as u64;
        if offset > section_len {
            return Err(Error::invalid_arg(format!(
                "bind offset {} beyond section size {}",
                offset, section_len
            )));
        }
        let entry = self
            .labels
            .get(id.0 as usize)
            .ok_or(Error::InvalidLabel { id: id.0 })?;
        if entry.ty == LabelType::External {
            return Err(Error::InvalidState {
                detail: String::from("external labels cannot be bound"),
            });
        }
        if entry.is_bound() {
            return Err(Error::AlreadyBound { id: id.0 });
        }

        // Pre-validate every same-section displacement so a failed bind
        // leaves the label unbound with its link chain intact.
        for site in &entry.links {
            if site.section == section {
                let disp = offset as i64 - site.kind.pc_base(site.offset) as i64;
                check_fixup(site.kind, disp)?;
            }
        }

        let links = {
            let entry = &mut self.labels[id.0 as usize];
            entry.section = Some(section);
            entry.offset = offset;
            core::mem::take(&mut entry.links)
        };

        for site in links {
            if site.section == section {
                let disp = offset as i64 - site.kind.pc_base(site.offset) as i64;
                let start = site.offset as usize;
                let buffer = self.sections[site.section.0 as usize].buffer.as_mut_slice();
                if start > buffer.len() {
                    return Err(Error::invalid_arg("patch site out of buffer bounds"));
                }
                write_fixup(&mut buffer[start..], site.kind, disp)?;
            } else {
                self.relocs.push(RelocEntry {
                    kind: RelocKind::Relative,
                    src_section: site.section,
                    src_offset: site.offset,
                    target: RelocTarget::Label(id),
                    delta_base: None,
                    addend: 0,
                    size: site.kind.size(),
                    format: Some(site.kind),
                });
            }
        }
        Ok(())
    }

    // ── relocations ────────────────────────────────────────

    /// Append a relocation record.
    pub fn add_relocation(&mut self, entry: RelocEntry) {
        self.relocs.push(entry);
    }

    /// The pending relocation records.
    #[must_use]
    pub fn relocations(&self) -> &[RelocEntry] {
        &self.relocs
    }

    /// Assign final contiguous offsets to all sections, honoring their
    /// alignment, and return the total image size.
    pub fn flatten(&mut self) -> Result<u64, Error> {
        let mut offset = 0u64;
        for section in &mut self.sections {
            offset = align_up(offset, section.alignment);
            section.offset = offset;
            offset = offset
                .checked_add(section.buffer.len() as u64)
                .ok_or(Error::OutOfMemory)?;
        }
        Ok(offset)
    }

    /// After [`flatten`](Self::flatten), rewrite cross-section references
    /// that are encodable inline; entries that remain become output
    /// relocations for the final consumer.
    pub fn resolve_cross_section(&mut self) -> Result<(), Error> {
        let mut remaining = Vec::new();
        let relocs = core::mem::take(&mut self.relocs);
        for reloc in relocs {
            let resolved = self.try_resolve_reloc(&reloc)?;
            if !resolved {
                remaining.push(reloc);
            }
        }
        self.relocs = remaining;
        Ok(())
    }

    /// Attempt to patch one relocation inline; `Ok(false)` means it must
    /// stay as an output relocation.
    fn try_resolve_reloc(&mut self, reloc: &RelocEntry) -> Result<bool, Error> {
        let value = match (reloc.kind, reloc.target) {
            (RelocKind::Relative, RelocTarget::Label(l)) => {
                let entry = self.label_entry(l)?;
                let Some(target_section) = entry.section else {
                    return Ok(false);
                };
                let target_abs =
                    self.sections[target_section.0 as usize].offset + entry.offset;
                let format = reloc
                    .format
                    .ok_or_else(|| Error::invalid_arg("relative relocation without format"))?;
                let src_abs = self.sections[reloc.src_section.0 as usize].offset
                    + format.pc_base(reloc.src_offset);
                target_abs as i64 - src_abs as i64 + reloc.addend
            }
            (RelocKind::Delta, RelocTarget::Label(l)) => {
                let Some(base) = reloc.delta_base else {
                    return Ok(false);
                };
                let (le, be) = (self.label_entry(l)?, self.label_entry(base)?);
                let (Some(ls), Some(bs)) = (le.section, be.section) else {
                    return Ok(false);
                };
                let label_abs = self.sections[ls.0 as usize].offset + le.offset();
                let base_abs = self.sections[bs.0 as usize].offset + be.offset();
                label_abs as i64 - base_abs as i64 + reloc.addend
            }
            // Absolute targets need the final load address; always kept.
            _ => return Ok(false),
        };

        let start = reloc.src_offset as usize;
        let buffer = self.sections[reloc.src_section.0 as usize]
            .buffer
            .as_mut_slice();
        if start > buffer.len() {
            return Err(Error::invalid_arg("relocation field out of bounds"));
        }
        match reloc.format {
            Some(format) => write_fixup(&mut buffer[start..], format, value)?,
            None => {
                let size = reloc.size as usize;
                if start + size > buffer.len() {
                    return Err(Error::invalid_arg("relocation field out of bounds"));
                }
                buffer[start..start + size]
                    .copy_from_slice(&(value as u64).to_le_bytes()[..size]);
            }
        }
        Ok(true)
    }

    /// Convenience: flatten, resolve cross-section references, and
    /// serialize into a fresh vector.
    pub fn flatten_to_vec(&mut self) -> Result<Vec<u8>, Error> {
        let size = self.flatten()?;
        self.resolve_cross_section()?;
        let mut out = vec![0u8; size as usize];
        self.copy_flattened_data(&mut out)?;
        Ok(out)
    }

    /// Serialize all sections at their flattened offsets into `dst`.
    ///
    /// `dst` must be at least the size returned by [`flatten`](Self::flatten);
    /// gaps and zero-initialized sections stay zero.
    pub fn copy_flattened_data(&self, dst: &mut [u8]) -> Result<usize, Error> {
        let mut total = 0usize;
        for section in &self.sections {
            let end = section.offset as usize + section.buffer.len();
            if end > dst.len() {
                return Err(Error::invalid_arg(format!(
                    "destination too small: need {} bytes, have {}",
                    end,
                    dst.len()
                )));
            }
            if !section.flags.contains(SectionFlags::ZERO_INITIALIZED) {
                dst[section.offset as usize..end].copy_from_slice(section.buffer.as_slice());
            }
            total = total.max(end);
        }
        Ok(total)
    }

    // ── logger / error handler ─────────────────────────────

    /// Install or clear the holder-level logger inherited by attached
    /// emitters without their own.
    pub fn set_logger(&mut self, logger: Option<Box<dyn Logger>>) {
        self.logger = logger;
    }

    /// Whether a holder-level logger is installed.
    #[must_use]
    pub fn has_logger(&self) -> bool {
        self.logger.is_some()
    }

    pub(crate) fn logger_mut(&mut self) -> Option<&mut (dyn Logger + 'static)> {
        self.logger.as_deref_mut()
    }

    /// Install or clear the holder-level error handler inherited by
    /// attached emitters without their own.
    pub fn set_error_handler(&mut self, handler: Option<Box<dyn ErrorHandler>>) {
        self.error_handler = handler;
    }

    /// Whether a holder-level error handler is installed.
    #[must_use]
    pub fn has_error_handler(&self) -> bool {
        self.error_handler.is_some()
    }

    pub(crate) fn error_handler_mut(&mut self) -> Option<&mut (dyn ErrorHandler + 'static)> {
        self.error_handler.as_deref_mut()
    }
}

impl fmt::Debug for CodeHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeHolder")
            .field("env", &self.env)
            .field("sections", &self.sections.len())
            .field("labels", &self.labels.len())
            .field("relocs", &self.relocs.len())
            .field("attached", &self.attached.len())
            .finish()
    }
}
