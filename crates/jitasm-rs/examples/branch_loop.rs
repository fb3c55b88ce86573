//! Labels and branches: a counted loop, with a logger attached so the
//! emitted stream is printed as it is assembled.

use jitasm_rs::asm::Assembler;
use jitasm_rs::emitter::Emitter;
use jitasm_rs::fmt::StringLogger;
use jitasm_rs::holder::CodeHolder;
use jitasm_rs::inst::InstId;
use jitasm_rs::operand::{Arch, Environment};
use jitasm_rs::x86::{RAX, RCX};

fn main() -> Result<(), jitasm_rs::error::Error> {
    let code = CodeHolder::new(Environment::new(Arch::X86_64)).into_ref();
    code.borrow_mut().set_logger(Some(Box::new(StringLogger::new())));

    let mut a = Assembler::new(&code)?;
    let top = a.new_label()?;
    let done = a.new_label()?;

    a.set_inline_comment("iteration count");
    a.emit2(InstId::Mov, RCX, 10i64)?;
    a.emit2(InstId::Xor, RAX, RAX)?;
    a.bind(top)?;
    a.emit2(InstId::Add, RAX, RCX)?;
    a.emit2(InstId::Sub, RCX, 1i64)?;
    a.emit1(InstId::Je, done)?;
    a.emit1(InstId::Jmp, top)?;
    a.bind(done)?;
    a.emit(InstId::Ret, &[])?;
    drop(a);

    let bytes = code.borrow_mut().flatten_to_vec()?;
    println!("{} bytes of machine code", bytes.len());
    Ok(())
}
