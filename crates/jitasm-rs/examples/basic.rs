//! Minimal usage: emit a tiny function and print its bytes.

use jitasm_rs::asm::Assembler;
use jitasm_rs::emitter::Emitter;
use jitasm_rs::holder::CodeHolder;
use jitasm_rs::inst::InstId;
use jitasm_rs::operand::{Arch, Environment};
use jitasm_rs::x86::{RAX, RBP, RSP};

fn main() -> Result<(), jitasm_rs::error::Error> {
    let code = CodeHolder::new(Environment::new(Arch::X86_64)).into_ref();
    let mut a = Assembler::new(&code)?;

    a.emit1(InstId::Push, RBP)?;
    a.emit2(InstId::Mov, RBP, RSP)?;
    a.emit2(InstId::Mov, RAX, 42i64)?;
    a.emit1(InstId::Pop, RBP)?;
    a.emit(InstId::Ret, &[])?;

    let bytes = code.borrow_mut().flatten_to_vec()?;
    print!("fn() -> 42:");
    for b in &bytes {
        print!(" {:02X}", b);
    }
    println!();
    Ok(())
}
