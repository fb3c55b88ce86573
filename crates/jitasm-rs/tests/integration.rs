//! Integration tests for jitasm_rs.
//!
//! These exercise the public API end-to-end: emitter contracts, label
//! patching, sections and relocations, deferred replay, and error routing.

use std::cell::RefCell;
use std::rc::Rc;

use jitasm_rs::asm::Assembler;
use jitasm_rs::builder::Builder;
use jitasm_rs::compiler::Compiler;
use jitasm_rs::emitter::{AlignMode, DataType, Emitter, EmitterType, ErrorHandler, FuncFrame};
use jitasm_rs::error::Error;
use jitasm_rs::fmt::Logger;
use jitasm_rs::holder::{
    CodeHolder, CodeRef, LabelType, RelocKind, RelocTarget, SectionFlags,
};
use jitasm_rs::inst::{DiagnosticOptions, EncodingOptions, InstId, InstOptions};
use jitasm_rs::operand::{Arch, Environment, Imm, Operand};
use jitasm_rs::pool::ConstPool;
use jitasm_rs::x86::{k, EAX, RAX, RBP, RBX, RCX};

// ============================================================================
// Helpers
// ============================================================================

fn code64() -> CodeRef {
    CodeHolder::new(Environment::new(Arch::X86_64)).into_ref()
}

fn text_bytes(code: &CodeRef) -> Vec<u8> {
    let holder = code.borrow();
    let text = holder.text_section();
    holder.section(text).unwrap().buffer().as_slice().to_vec()
}

/// Error handler recording every invocation into shared storage.
#[derive(Clone, Default)]
struct RecordingHandler {
    seen: Rc<RefCell<Vec<(Error, EmitterType)>>>,
}

impl ErrorHandler for RecordingHandler {
    fn handle_error(&mut self, error: &Error, origin: EmitterType) {
        self.seen.borrow_mut().push((error.clone(), origin));
    }
}

/// Logger writing into shared storage so tests can read it back.
#[derive(Clone, Default)]
struct SharedLogger {
    lines: Rc<RefCell<Vec<String>>>,
}

impl Logger for SharedLogger {
    fn log(&mut self, line: &str) {
        self.lines.borrow_mut().push(line.to_string());
    }
}

// ============================================================================
// Transient per-instruction state (never leaks across instructions)
// ============================================================================

#[test]
fn transient_state_cleared_after_successful_emit() {
    let code = code64();
    let mut a = Assembler::new(&code).unwrap();
    a.set_inst_options(InstOptions::REP);
    a.set_extra_reg(k(1));
    a.set_inline_comment("copy loop");
    // The emit fails (extra register unsupported), but that must not matter.
    let _ = a.emit(InstId::Movsb, &[]);
    assert_eq!(a.inst_options(), InstOptions::NONE);
    assert_eq!(a.extra_reg(), None);
    assert_eq!(a.inline_comment(), None);

    a.set_inst_options(InstOptions::REP);
    a.emit(InstId::Movsb, &[]).unwrap();
    assert_eq!(a.inst_options(), InstOptions::NONE);
    assert_eq!(a.extra_reg(), None);
    assert_eq!(a.inline_comment(), None);
}

#[test]
fn transient_state_cleared_after_failing_emit() {
    let code = code64();
    let mut a = Assembler::new(&code).unwrap();
    a.set_inst_options(InstOptions::LOCK);
    a.set_inline_comment("will fail");
    assert!(a.emit(InstId::None, &[]).is_err());
    assert_eq!(a.inst_options(), InstOptions::NONE);
    assert_eq!(a.inline_comment(), None);
}

#[test]
fn sticky_rep_prefix_decorates_one_instruction() {
    let code = code64();
    let mut a = Assembler::new(&code).unwrap();
    a.set_inst_options(InstOptions::REP);
    a.emit(InstId::Movsb, &[]).unwrap();
    a.emit(InstId::Movsb, &[]).unwrap();
    assert_eq!(text_bytes(&code), [0xF3, 0xA4, 0xA4]);
}

#[test]
fn forced_inst_options_apply_to_every_instruction() {
    let code = code64();
    let mut a = Assembler::new(&code).unwrap();
    a.set_forced_inst_options(InstOptions::REP);
    a.emit(InstId::Movsb, &[]).unwrap();
    a.emit(InstId::Movsb, &[]).unwrap();
    assert_eq!(text_bytes(&code), [0xF3, 0xA4, 0xF3, 0xA4]);
}

#[test]
fn reset_state_clears_pending_group() {
    let code = code64();
    let mut a = Assembler::new(&code).unwrap();
    a.set_inst_options(InstOptions::REP);
    a.set_extra_reg(k(2));
    a.set_inline_comment("pending");
    a.reset_state();
    assert_eq!(a.inst_options(), InstOptions::NONE);
    assert_eq!(a.extra_reg(), None);
    assert_eq!(a.inline_comment(), None);
}

// ============================================================================
// Labels
// ============================================================================

#[test]
fn forward_branch_patches_to_zero_displacement() {
    let code = code64();
    let mut a = Assembler::new(&code).unwrap();
    let l = a.new_label().unwrap();
    a.emit(InstId::Jmp, &[l.into()]).unwrap();
    a.bind(l).unwrap();
    a.emit(InstId::Nop, &[]).unwrap();

    let bytes = text_bytes(&code);
    assert_eq!(bytes, [0xE9, 0x00, 0x00, 0x00, 0x00, 0x90]);
    // link chain fully drained
    assert_eq!(code.borrow().label_entry(l).unwrap().link_count(), 0);
}

#[test]
fn multiple_forward_references_all_patch() {
    let code = code64();
    let mut a = Assembler::new(&code).unwrap();
    let l = a.new_label().unwrap();
    a.emit(InstId::Jmp, &[l.into()]).unwrap();
    a.emit(InstId::Je, &[l.into()]).unwrap();
    a.emit(InstId::Call, &[l.into()]).unwrap();
    a.bind(l).unwrap();

    let bytes = text_bytes(&code);
    // jmp rel32 -> target 16: disp = 16 - 5 = 11
    assert_eq!(&bytes[1..5], &11i32.to_le_bytes());
    // je rel32 at 5..11: disp = 16 - 11 = 5
    assert_eq!(&bytes[7..11], &5i32.to_le_bytes());
    // call rel32 at 11..16: disp = 0
    assert_eq!(&bytes[12..16], &0i32.to_le_bytes());
}

#[test]
fn double_bind_rejected() {
    let code = code64();
    let mut a = Assembler::new(&code).unwrap();
    let l = a.new_label().unwrap();
    a.bind(l).unwrap();
    assert_eq!(a.bind(l), Err(Error::AlreadyBound { id: l.raw() }));
}

#[test]
fn named_labels_and_lookup() {
    let code = code64();
    let mut a = Assembler::new(&code).unwrap();
    let g = a
        .new_named_label("entry", LabelType::Global, None)
        .unwrap();
    assert_eq!(a.label_by_name("entry", None), Some(g));
    assert!(a.is_label_valid(g));

    // global name collision
    assert!(matches!(
        a.new_named_label("entry", LabelType::Global, None),
        Err(Error::LabelNameCollision { .. })
    ));

    // two anonymous labels with identical display names coexist
    let a1 = a.new_anonymous_label("tmp").unwrap();
    let a2 = a.new_anonymous_label("tmp").unwrap();
    assert_ne!(a1, a2);

    // external labels resolve by name but refuse to bind
    let ext = a.new_external_label("memcpy").unwrap();
    assert!(matches!(a.bind(ext), Err(Error::InvalidState { .. })));
}

#[test]
fn short_form_forward_branch_patches_rel8() {
    let code = code64();
    let mut a = Assembler::new(&code).unwrap();
    let l = a.new_label().unwrap();
    a.set_inst_options(InstOptions::SHORT_FORM);
    a.emit(InstId::Jmp, &[l.into()]).unwrap();
    a.emit(InstId::Nop, &[]).unwrap();
    a.bind(l).unwrap();
    // EB disp8: target 3, site end 2 -> disp 1
    assert_eq!(text_bytes(&code), [0xEB, 0x01, 0x90]);
}

#[test]
fn short_form_out_of_range_bind_fails() {
    let code = code64();
    let mut a = Assembler::new(&code).unwrap();
    let l = a.new_label().unwrap();
    a.set_inst_options(InstOptions::SHORT_FORM);
    a.emit(InstId::Jmp, &[l.into()]).unwrap();
    for _ in 0..200 {
        a.emit(InstId::Nop, &[]).unwrap();
    }
    let err = a.bind(l).unwrap_err();
    assert!(matches!(err, Error::RelocationOutOfRange { bits: 8, .. }));
}

// ============================================================================
// Sections and relocations
// ============================================================================

#[test]
fn cross_section_label_embed_creates_relocation() {
    let code = code64();
    let data = code
        .borrow_mut()
        .new_section(".data", SectionFlags::WRITABLE, 8)
        .unwrap();
    let mut a = Assembler::new(&code).unwrap();
    let l = a.new_label().unwrap();

    a.set_section(data).unwrap();
    a.embed(&[0u8; 8]).unwrap();
    a.bind(l).unwrap();
    a.embed(&[1, 2, 3, 4]).unwrap();

    let text = code.borrow().text_section();
    a.set_section(text).unwrap();
    a.embed_label(l, 8).unwrap();

    let holder = code.borrow();
    assert_eq!(holder.section(text).unwrap().buffer().len(), 8);
    let relocs = holder.relocations();
    assert_eq!(relocs.len(), 1);
    let r = relocs[0];
    assert_eq!(r.kind, RelocKind::Absolute);
    assert_eq!(r.src_section, text);
    assert_eq!(r.src_offset, 0);
    assert_eq!(r.target, RelocTarget::Label(l));
    assert_eq!(r.addend, 0);
    assert_eq!(r.size, 8);
}

#[test]
fn cross_section_branch_resolves_after_flatten() {
    let code = code64();
    let stubs = code
        .borrow_mut()
        .new_section(".text.stubs", SectionFlags::EXECUTABLE, 16)
        .unwrap();
    let mut a = Assembler::new(&code).unwrap();
    let l = a.new_label().unwrap();

    a.emit(InstId::Jmp, &[l.into()]).unwrap();
    a.set_section(stubs).unwrap();
    a.bind(l).unwrap();
    a.emit(InstId::Ret, &[]).unwrap();
    drop(a);

    let mut holder = code.borrow_mut();
    let total = holder.flatten().unwrap();
    assert_eq!(total, 17); // 5 bytes text, stubs aligned to 16
    holder.resolve_cross_section().unwrap();
    assert!(holder.relocations().is_empty());

    let mut out = vec![0u8; total as usize];
    holder.copy_flattened_data(&mut out).unwrap();
    // jmp at 0, target at 16: disp = 16 - 5 = 11
    assert_eq!(out[0], 0xE9);
    assert_eq!(&out[1..5], &11i32.to_le_bytes());
    assert_eq!(out[16], 0xC3);
}

#[test]
fn label_delta_same_section_resolves_immediately() {
    let code = code64();
    let mut a = Assembler::new(&code).unwrap();
    let start = a.new_label().unwrap();
    let end = a.new_label().unwrap();
    a.bind(start).unwrap();
    a.emit(InstId::Nop, &[]).unwrap();
    a.emit(InstId::Ret, &[]).unwrap();
    a.bind(end).unwrap();
    a.embed_label_delta(end, start, 4).unwrap();
    let bytes = text_bytes(&code);
    assert_eq!(&bytes[2..6], &2u32.to_le_bytes());
}

#[test]
fn monotonic_section_growth() {
    let code = code64();
    let mut a = Assembler::new(&code).unwrap();
    let mut prev = 0;
    let trace = [
        (InstId::Nop, vec![]),
        (InstId::Mov, vec![Operand::from(RAX), Operand::from(7i64)]),
        (InstId::Push, vec![Operand::from(RBP)]),
        (InstId::Pop, vec![Operand::from(RBP)]),
        (InstId::Ret, vec![]),
    ];
    for (id, ops) in trace {
        a.emit(id, &ops).unwrap();
        let len = text_bytes(&code).len();
        assert!(len >= prev);
        prev = len;
    }
}

// ============================================================================
// Alignment
// ============================================================================

#[test]
fn alignment_boundaries() {
    for alignment in [1u32, 2, 4, 8, 16, 64] {
        let code = code64();
        let mut a = Assembler::new(&code).unwrap();
        a.emit(InstId::Nop, &[]).unwrap();
        a.align(AlignMode::Code, alignment).unwrap();
        let len = text_bytes(&code).len() as u32;
        assert_eq!(len % alignment.max(1), 0, "alignment {}", alignment);
    }
}

#[test]
fn optimized_align_uses_multibyte_nops() {
    let code = code64();
    let mut a = Assembler::new(&code).unwrap();
    a.add_encoding_options(EncodingOptions::OPTIMIZED_ALIGN);
    a.emit(InstId::Nop, &[]).unwrap();
    a.align(AlignMode::Code, 8).unwrap();
    let bytes = text_bytes(&code);
    assert_eq!(bytes.len(), 8);
    // 7-byte Intel NOP: 0F 1F 80 00 00 00 00
    assert_eq!(&bytes[1..4], &[0x0F, 0x1F, 0x80]);
}

#[test]
fn data_align_fills_with_int3() {
    let code = code64();
    let mut a = Assembler::new(&code).unwrap();
    a.emit(InstId::Nop, &[]).unwrap();
    a.align(AlignMode::Data, 4).unwrap();
    assert_eq!(text_bytes(&code), [0x90, 0xCC, 0xCC, 0xCC]);
}

#[test]
fn zero_align_always_zeros() {
    let code = code64();
    let mut a = Assembler::new(&code).unwrap();
    a.emit(InstId::Nop, &[]).unwrap();
    a.align(AlignMode::Zero, 4).unwrap();
    assert_eq!(text_bytes(&code), [0x90, 0x00, 0x00, 0x00]);
}

// ============================================================================
// Operand-count boundaries
// ============================================================================

#[test]
fn empty_operand_list_is_fine() {
    let code = code64();
    let mut a = Assembler::new(&code).unwrap();
    a.emit(InstId::Nop, &[]).unwrap();
}

#[test]
fn seventh_operand_rejected() {
    let code = code64();
    let mut a = Assembler::new(&code).unwrap();
    let ops: Vec<Operand> = (0..7).map(|i| Operand::from(Imm::new(i))).collect();
    assert!(matches!(
        a.emit(InstId::Nop, &ops),
        Err(Error::InvalidArgument { .. })
    ));
    // exactly six is accepted by the front-end (the encoder may still
    // reject the combination)
    let ops: Vec<Operand> = (0..6).map(|i| Operand::from(Imm::new(i))).collect();
    assert!(matches!(
        a.emit(InstId::Nop, &ops),
        Err(Error::InvalidInstruction { .. })
    ));
}

// ============================================================================
// Error routing
// ============================================================================

#[test]
fn error_handler_called_exactly_once_per_failure() {
    let code = code64();
    let handler = RecordingHandler::default();
    let seen = handler.seen.clone();
    let mut a = Assembler::new(&code).unwrap();
    a.set_error_handler(Some(Box::new(handler)));

    let before = text_bytes(&code);
    let err = a.emit(InstId::None, &[]).unwrap_err();
    assert!(matches!(err, Error::InvalidInstruction { .. }));

    let seen = seen.borrow();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, err);
    assert_eq!(seen[0].1, EmitterType::Assembler);
    assert_eq!(text_bytes(&code), before);
}

#[test]
fn holder_error_handler_inherited() {
    let code = code64();
    let handler = RecordingHandler::default();
    let seen = handler.seen.clone();
    code.borrow_mut().set_error_handler(Some(Box::new(handler)));

    let mut a = Assembler::new(&code).unwrap();
    assert!(!a.has_own_error_handler());
    let _ = a.emit(InstId::None, &[]);
    assert_eq!(seen.borrow().len(), 1);
}

#[test]
fn own_error_handler_overrides_holder() {
    let code = code64();
    let holder_handler = RecordingHandler::default();
    let holder_seen = holder_handler.seen.clone();
    code.borrow_mut()
        .set_error_handler(Some(Box::new(holder_handler)));

    let own = RecordingHandler::default();
    let own_seen = own.seen.clone();
    let mut a = Assembler::new(&code).unwrap();
    a.set_error_handler(Some(Box::new(own)));
    assert!(a.has_own_error_handler());

    let _ = a.emit(InstId::None, &[]);
    assert_eq!(own_seen.borrow().len(), 1);
    assert!(holder_seen.borrow().is_empty());

    // clearing reverts to inheritance
    a.set_error_handler(None);
    assert!(!a.has_own_error_handler());
    let _ = a.emit(InstId::None, &[]);
    assert_eq!(holder_seen.borrow().len(), 1);
}

// ============================================================================
// Logging
// ============================================================================

#[test]
fn logger_receives_instructions_and_comments() {
    let code = code64();
    let logger = SharedLogger::default();
    let lines = logger.lines.clone();
    let mut a = Assembler::new(&code).unwrap();
    a.set_logger(Some(Box::new(logger)));
    assert!(a.has_own_logger());

    a.set_inline_comment("the answer");
    a.emit2(InstId::Mov, RAX, 42i64).unwrap();
    a.comment("standalone").unwrap();
    a.emit(InstId::Ret, &[]).unwrap();

    let lines = lines.borrow();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "  mov rax, 0x2a ; the answer");
    assert_eq!(lines[1], "; standalone");
    assert_eq!(lines[2], "  ret");
}

#[test]
fn holder_logger_inherited() {
    let code = code64();
    let logger = SharedLogger::default();
    let lines = logger.lines.clone();
    code.borrow_mut().set_logger(Some(Box::new(logger)));

    let mut a = Assembler::new(&code).unwrap();
    assert!(!a.has_own_logger());
    a.emit(InstId::Nop, &[]).unwrap();
    assert_eq!(lines.borrow().as_slice(), ["  nop"]);
}

// ============================================================================
// Builder replay equivalence
// ============================================================================

/// A deterministic 100-instruction trace exercising registers, immediates,
/// branches, and labels.
fn drive_trace<E: Emitter>(e: &mut E) -> Result<(), Error> {
    let loop_top = e.new_label()?;
    let done = e.new_label()?;
    e.emit2(InstId::Mov, RCX, 25i64)?;
    e.bind(loop_top)?;
    for i in 0..24 {
        let regs = [RAX, RBX, RCX];
        let r = regs[i % 3];
        match i % 4 {
            0 => e.emit2(InstId::Add, r, Imm::new(i as i64))?,
            1 => e.emit2(InstId::Xor, RAX, RBX)?,
            2 => e.emit1(InstId::Push, RAX)?,
            _ => e.emit1(InstId::Pop, RAX)?,
        }
    }
    e.emit2(InstId::Sub, RCX, 1i64)?;
    e.emit1(InstId::Je, done)?;
    e.emit1(InstId::Jmp, loop_top)?;
    e.bind(done)?;
    for _ in 0..70 {
        e.emit(InstId::Nop, &[])?;
    }
    e.emit(InstId::Ret, &[])?;
    Ok(())
}

#[test]
fn builder_replay_matches_direct_assembly() {
    let code_a = code64();
    let mut a = Assembler::new(&code_a).unwrap();
    drive_trace(&mut a).unwrap();

    let code_b = code64();
    let mut b = Builder::new(&code_b).unwrap();
    drive_trace(&mut b).unwrap();
    assert!(text_bytes(&code_b).is_empty());
    b.finalize().unwrap();

    assert_eq!(text_bytes(&code_a), text_bytes(&code_b));
}

#[test]
fn finalize_twice_returns_already_finalized() {
    let code = code64();
    let mut b = Builder::new(&code).unwrap();
    b.emit(InstId::Nop, &[]).unwrap();
    b.finalize().unwrap();
    let before = text_bytes(&code);
    assert_eq!(b.finalize(), Err(Error::AlreadyFinalized));
    assert_eq!(text_bytes(&code), before);
    assert_eq!(b.emit(InstId::Nop, &[]), Err(Error::AlreadyFinalized));
}

// ============================================================================
// emit_inst / validation
// ============================================================================

#[test]
fn emit_inst_pulls_options_from_value() {
    let code = code64();
    let mut a = Assembler::new(&code).unwrap();
    let inst = jitasm_rs::inst::BaseInst::with_options(InstId::Movsb, InstOptions::REP);
    a.emit_inst(&inst, &[]).unwrap();
    assert_eq!(text_bytes(&code), [0xF3, 0xA4]);
    // and the transient state did not leak
    a.emit(InstId::Movsb, &[]).unwrap();
    assert_eq!(text_bytes(&code), [0xF3, 0xA4, 0xA4]);
}

#[test]
fn assembler_validation_rejects_before_encoding() {
    let code = code64();
    let mut a = Assembler::new(&code).unwrap();
    a.add_diagnostic_options(DiagnosticOptions::VALIDATE_ASSEMBLER);
    let err = a.emit2(InstId::Add, RAX, EAX).unwrap_err();
    assert!(matches!(err, Error::OperandSizeMismatch { .. }));
    assert!(text_bytes(&code).is_empty());
}

#[test]
fn builder_intermediate_validation() {
    let code = code64();
    let mut b = Builder::new(&code).unwrap();
    b.add_diagnostic_options(DiagnosticOptions::VALIDATE_INTERMEDIATE);
    let err = b.emit2(InstId::Add, RAX, EAX).unwrap_err();
    assert!(matches!(err, Error::OperandSizeMismatch { .. }));
    assert!(b.nodes().is_empty());
}

// ============================================================================
// Data embedding
// ============================================================================

#[test]
fn embed_data_array_repeats() {
    let code = code64();
    let mut a = Assembler::new(&code).unwrap();
    a.embed_data_array(DataType::U32, &0xAABB_CCDDu32.to_le_bytes(), 1, 3)
        .unwrap();
    let bytes = text_bytes(&code);
    assert_eq!(bytes.len(), 12);
    assert_eq!(&bytes[..4], &[0xDD, 0xCC, 0xBB, 0xAA]);
    assert_eq!(&bytes[..4], &bytes[8..]);
}

#[test]
fn const_pool_binds_label_at_base() {
    let code = code64();
    let mut a = Assembler::new(&code).unwrap();
    let mut pool = ConstPool::new();
    let off_a = pool.add_u64(0x1111_2222_3333_4444).unwrap();
    let off_b = pool.add_u64(0x5555_6666_7777_8888).unwrap();
    assert_ne!(off_a, off_b);

    a.emit(InstId::Nop, &[]).unwrap();
    let pool_label = a.new_label().unwrap();
    a.embed_const_pool(pool_label, &pool).unwrap();

    let holder = code.borrow();
    let entry = holder.label_entry(pool_label).unwrap();
    assert!(entry.is_bound());
    assert_eq!(entry.offset(), 8); // aligned up from 1
    assert_eq!(holder.section(holder.text_section()).unwrap().buffer().len(), 24);
}

// ============================================================================
// Function frames
// ============================================================================

#[test]
fn prolog_epilog_roundtrip_x64() {
    let code = code64();
    let mut a = Assembler::new(&code).unwrap();
    let frame = FuncFrame {
        stack_size: 32,
        save_frame_pointer: true,
    };
    a.emit_prolog(&frame).unwrap();
    a.emit_epilog(&frame).unwrap();
    assert_eq!(
        text_bytes(&code),
        [
            0x55, // push rbp
            0x48, 0x89, 0xE5, // mov rbp, rsp
            0x48, 0x83, 0xEC, 0x20, // sub rsp, 32
            0x48, 0x89, 0xEC, // mov rsp, rbp
            0x5D, // pop rbp
            0xC3, // ret
        ]
    );
}

// ============================================================================
// Compiler end-to-end
// ============================================================================

#[test]
fn compiler_function_emits_like_handwritten() {
    let code = code64();
    let mut c = Compiler::new(&code).unwrap();
    let acc = c.new_gp64().unwrap();
    let tmp = c.new_gp64().unwrap();
    c.emit2(InstId::Mov, acc, 10i64).unwrap();
    c.emit2(InstId::Mov, tmp, 32i64).unwrap();
    c.emit2(InstId::Add, acc, tmp).unwrap();
    c.emit(InstId::Ret, &[]).unwrap();
    c.finalize().unwrap();

    let code_ref = code64();
    let mut a = Assembler::new(&code_ref).unwrap();
    a.emit2(InstId::Mov, RAX, 10i64).unwrap();
    a.emit2(InstId::Mov, RCX, 32i64).unwrap();
    a.emit2(InstId::Add, RAX, RCX).unwrap();
    a.emit(InstId::Ret, &[]).unwrap();

    assert_eq!(text_bytes(&code), text_bytes(&code_ref));
}

#[test]
fn compiler_reg_alloc_failure_routed_to_handler() {
    let code = code64();
    let handler = RecordingHandler::default();
    let seen = handler.seen.clone();
    let mut c = Compiler::new(&code).unwrap();
    c.set_error_handler(Some(Box::new(handler)));
    for _ in 0..15 {
        let v = c.new_gp64().unwrap();
        c.emit2(InstId::Mov, v, 0i64).unwrap();
    }
    let err = c.finalize().unwrap_err();
    assert!(matches!(err, Error::RegAllocFailure { .. }));
    let seen = seen.borrow();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].1, EmitterType::Compiler);
}

// ============================================================================
// Holder lifecycle
// ============================================================================

#[test]
fn holder_reset_detaches_emitters_lazily() {
    let code = code64();
    let mut a = Assembler::new(&code).unwrap();
    a.emit(InstId::Nop, &[]).unwrap();
    code.borrow_mut().reset();
    // the holder dropped the attachment; the emitter finds out on use
    assert_eq!(a.emit(InstId::Nop, &[]), Err(Error::NotAttached));
}

#[test]
fn flatten_respects_section_alignment() {
    let code = code64();
    {
        let mut holder = code.borrow_mut();
        let d16 = holder
            .new_section(".data16", SectionFlags::WRITABLE, 16)
            .unwrap();
        let d64 = holder
            .new_section(".data64", SectionFlags::WRITABLE, 64)
            .unwrap();
        let text = holder.text_section();
        holder
            .section_mut(text)
            .unwrap()
            .buffer_mut()
            .append(&[0x90; 3]);
        holder.section_mut(d16).unwrap().buffer_mut().append(&[1; 5]);
        holder.section_mut(d64).unwrap().buffer_mut().append(&[2; 2]);
        let total = holder.flatten().unwrap();
        assert_eq!(holder.section(d16).unwrap().offset(), 16);
        assert_eq!(holder.section(d64).unwrap().offset(), 64);
        assert_eq!(total, 66);
    }
}

#[test]
fn mnemonic_round_trip() {
    for &id in InstId::ALL {
        assert_eq!(InstId::from_str(id.as_str()), Some(id));
    }
}
