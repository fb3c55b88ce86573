//! x86-64 end-to-end byte tests through the public Assembler API.

use jitasm_rs::asm::Assembler;
use jitasm_rs::emitter::Emitter;
use jitasm_rs::holder::{CodeHolder, CodeRef};
use jitasm_rs::inst::{EncodingOptions, InstId, InstOptions};
use jitasm_rs::operand::{Arch, Environment, Mem, Operand};
use jitasm_rs::x86::{EAX, EBX, ECX, EDX, R10, R8, R9, RAX, RBP, RBX, RCX, RDI, RDX, RSI, RSP};

fn emit_one(id: InstId, ops: &[Operand]) -> Vec<u8> {
    let code: CodeRef = CodeHolder::new(Environment::new(Arch::X86_64)).into_ref();
    let mut a = Assembler::new(&code).unwrap();
    a.emit(id, ops).unwrap();
    let holder = code.borrow();
    let text = holder.text_section();
    holder.section(text).unwrap().buffer().as_slice().to_vec()
}

#[test]
fn no_operand_instructions() {
    assert_eq!(emit_one(InstId::Nop, &[]), [0x90]);
    assert_eq!(emit_one(InstId::Ret, &[]), [0xC3]);
    assert_eq!(emit_one(InstId::Int3, &[]), [0xCC]);
    assert_eq!(emit_one(InstId::Hlt, &[]), [0xF4]);
    assert_eq!(emit_one(InstId::Movsb, &[]), [0xA4]);
    assert_eq!(emit_one(InstId::Movsq, &[]), [0x48, 0xA5]);
}

#[test]
fn push_pop_all_encodings() {
    assert_eq!(emit_one(InstId::Push, &[RAX.into()]), [0x50]);
    assert_eq!(emit_one(InstId::Push, &[RDI.into()]), [0x57]);
    assert_eq!(emit_one(InstId::Push, &[R8.into()]), [0x41, 0x50]);
    assert_eq!(emit_one(InstId::Pop, &[RAX.into()]), [0x58]);
    assert_eq!(emit_one(InstId::Pop, &[R10.into()]), [0x41, 0x5A]);
    assert_eq!(emit_one(InstId::Push, &[8i64.into()]), [0x6A, 0x08]);
    assert_eq!(
        emit_one(InstId::Push, &[0x1234i64.into()]),
        [0x68, 0x34, 0x12, 0x00, 0x00]
    );
}

#[test]
fn mov_matrix() {
    assert_eq!(
        emit_one(InstId::Mov, &[RAX.into(), RBX.into()]),
        [0x48, 0x89, 0xD8]
    );
    assert_eq!(
        emit_one(InstId::Mov, &[R8.into(), R9.into()]),
        [0x4D, 0x89, 0xC8]
    );
    assert_eq!(
        emit_one(InstId::Mov, &[EAX.into(), EBX.into()]),
        [0x89, 0xD8]
    );
    assert_eq!(
        emit_one(InstId::Mov, &[ECX.into(), 0x1234i64.into()]),
        [0xB9, 0x34, 0x12, 0x00, 0x00]
    );
    // store and load
    assert_eq!(
        emit_one(InstId::Mov, &[Mem::base(RBX).into(), RAX.into()]),
        [0x48, 0x89, 0x03]
    );
    assert_eq!(
        emit_one(InstId::Mov, &[RAX.into(), Mem::base(RBX).into()]),
        [0x48, 0x8B, 0x03]
    );
    // store immediate through a sized memory operand
    assert_eq!(
        emit_one(
            InstId::Mov,
            &[Mem::base(RBX).with_size(8).into(), 7i64.into()]
        ),
        [0x48, 0xC7, 0x03, 0x07, 0x00, 0x00, 0x00]
    );
}

#[test]
fn alu_matrix() {
    assert_eq!(
        emit_one(InstId::Add, &[RAX.into(), RBX.into()]),
        [0x48, 0x01, 0xD8]
    );
    assert_eq!(
        emit_one(InstId::Sub, &[RAX.into(), 8i64.into()]),
        [0x48, 0x83, 0xE8, 0x08]
    );
    assert_eq!(
        emit_one(InstId::And, &[EAX.into(), 0xFFi64.into()]),
        [0x81, 0xE0, 0xFF, 0x00, 0x00, 0x00]
    );
    assert_eq!(
        emit_one(InstId::Or, &[EAX.into(), 0x80i64.into()]),
        [0x81, 0xC8, 0x80, 0x00, 0x00, 0x00]
    );
    assert_eq!(
        emit_one(InstId::Xor, &[ECX.into(), EDX.into()]),
        [0x31, 0xD1]
    );
    assert_eq!(
        emit_one(InstId::Cmp, &[EAX.into(), 0i64.into()]),
        [0x83, 0xF8, 0x00]
    );
    assert_eq!(
        emit_one(InstId::Add, &[Mem::base(RBX).with_size(8).into(), 1i64.into()]),
        [0x48, 0x83, 0x03, 0x01]
    );
}

#[test]
fn shifts_and_unary() {
    assert_eq!(
        emit_one(InstId::Shl, &[EAX.into(), 1i64.into()]),
        [0xC1, 0xE0, 0x01]
    );
    assert_eq!(
        emit_one(InstId::Shr, &[RAX.into(), 4i64.into()]),
        [0x48, 0xC1, 0xE8, 0x04]
    );
    assert_eq!(
        emit_one(InstId::Sar, &[EAX.into(), 2i64.into()]),
        [0xC1, 0xF8, 0x02]
    );
    assert_eq!(emit_one(InstId::Inc, &[ECX.into()]), [0xFF, 0xC1]);
    assert_eq!(emit_one(InstId::Dec, &[RDX.into()]), [0x48, 0xFF, 0xCA]);
    assert_eq!(emit_one(InstId::Neg, &[RAX.into()]), [0x48, 0xF7, 0xD8]);
    assert_eq!(emit_one(InstId::Not, &[EAX.into()]), [0xF7, 0xD0]);
}

#[test]
fn test_and_lea() {
    assert_eq!(
        emit_one(InstId::Test, &[EAX.into(), EAX.into()]),
        [0x85, 0xC0]
    );
    assert_eq!(
        emit_one(InstId::Test, &[RAX.into(), RAX.into()]),
        [0x48, 0x85, 0xC0]
    );
    // lea rax, [rbx+rcx*4+8]
    let m = Mem::base_disp(RBX, 8).with_index(RCX, 4);
    assert_eq!(
        emit_one(InstId::Lea, &[RAX.into(), m.into()]),
        [0x48, 0x8D, 0x44, 0x8B, 0x08]
    );
}

#[test]
fn addressing_modes() {
    // [rsi+rdi*2]
    let m = Mem::base(RSI).with_index(RDI, 2);
    assert_eq!(
        emit_one(InstId::Mov, &[RAX.into(), m.into()]),
        [0x48, 0x8B, 0x04, 0x7E]
    );
    // [rbp+0x80] needs disp32
    let m = Mem::base_disp(RBP, 0x80);
    assert_eq!(
        emit_one(InstId::Mov, &[RAX.into(), m.into()]),
        [0x48, 0x8B, 0x85, 0x80, 0x00, 0x00, 0x00]
    );
    // [rsp] always takes the SIB path
    assert_eq!(
        emit_one(InstId::Mov, &[RAX.into(), Mem::base(RSP).into()]),
        [0x48, 0x8B, 0x04, 0x24]
    );
}

#[test]
fn reg_indirect_jumps() {
    assert_eq!(emit_one(InstId::Jmp, &[RAX.into()]), [0xFF, 0xE0]);
    assert_eq!(emit_one(InstId::Call, &[RCX.into()]), [0xFF, 0xD1]);
    assert_eq!(emit_one(InstId::Jmp, &[R8.into()]), [0x41, 0xFF, 0xE0]);
}

#[test]
fn lock_prefix_on_memory_alu() {
    let code: CodeRef = CodeHolder::new(Environment::new(Arch::X86_64)).into_ref();
    let mut a = Assembler::new(&code).unwrap();
    a.set_inst_options(InstOptions::LOCK);
    a.emit(
        InstId::Add,
        &[Mem::base(RBX).with_size(8).into(), 1i64.into()],
    )
    .unwrap();
    let holder = code.borrow();
    let text = holder.text_section();
    assert_eq!(
        holder.section(text).unwrap().buffer().as_slice(),
        &[0xF0, 0x48, 0x83, 0x03, 0x01]
    );
}

#[test]
fn predicted_jump_hints() {
    let code: CodeRef = CodeHolder::new(Environment::new(Arch::X86_64)).into_ref();
    let mut a = Assembler::new(&code).unwrap();
    a.add_encoding_options(EncodingOptions::PREDICTED_JUMPS);
    let l = a.new_label().unwrap();
    a.bind(l).unwrap();
    a.set_inst_options(InstOptions::NOT_TAKEN);
    a.emit(InstId::Je, &[l.into()]).unwrap();
    let holder = code.borrow();
    let text = holder.text_section();
    let bytes = holder.section(text).unwrap().buffer().as_slice();
    // 2E hint prefix, then short je backward
    assert_eq!(bytes[0], 0x2E);
    assert_eq!(bytes[1], 0x74);
}

#[test]
fn optimize_for_size_mov_narrowing() {
    let code: CodeRef = CodeHolder::new(Environment::new(Arch::X86_64)).into_ref();
    let mut a = Assembler::new(&code).unwrap();
    a.add_encoding_options(EncodingOptions::OPTIMIZE_FOR_SIZE);
    a.emit2(InstId::Mov, RAX, 1i64).unwrap();
    let holder = code.borrow();
    let text = holder.text_section();
    assert_eq!(
        holder.section(text).unwrap().buffer().as_slice(),
        &[0xB8, 0x01, 0x00, 0x00, 0x00]
    );
}

#[test]
fn jcc_family_condition_codes() {
    let cases = [
        (InstId::Jo, 0x70u8),
        (InstId::Jno, 0x71),
        (InstId::Jb, 0x72),
        (InstId::Jae, 0x73),
        (InstId::Je, 0x74),
        (InstId::Jne, 0x75),
        (InstId::Jbe, 0x76),
        (InstId::Ja, 0x77),
        (InstId::Js, 0x78),
        (InstId::Jns, 0x79),
        (InstId::Jl, 0x7C),
        (InstId::Jge, 0x7D),
        (InstId::Jle, 0x7E),
        (InstId::Jg, 0x7F),
    ];
    for (id, opcode) in cases {
        let code: CodeRef = CodeHolder::new(Environment::new(Arch::X86_64)).into_ref();
        let mut a = Assembler::new(&code).unwrap();
        let l = a.new_label().unwrap();
        a.bind(l).unwrap();
        a.emit(id, &[l.into()]).unwrap();
        let holder = code.borrow();
        let text = holder.text_section();
        let bytes = holder.section(text).unwrap().buffer().as_slice();
        assert_eq!(bytes[0], opcode, "{:?}", id);
        assert_eq!(bytes[1], 0xFE, "{:?} disp", id); // -2
    }
}
