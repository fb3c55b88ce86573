//! The same logical function emitted for x86-64 and AArch64 from one
//! emitter-generic driver.

use jitasm_rs::asm::Assembler;
use jitasm_rs::emitter::Emitter;
use jitasm_rs::error::Error;
use jitasm_rs::holder::CodeHolder;
use jitasm_rs::inst::InstId;
use jitasm_rs::operand::{Arch, Environment};

fn emit_for(arch: Arch) -> Result<Vec<u8>, Error> {
    let code = CodeHolder::new(Environment::new(arch)).into_ref();
    let mut a = Assembler::new(&code)?;
    match arch {
        Arch::Aarch64 => {
            use jitasm_rs::aarch64::x;
            a.emit2(InstId::Movz, x(0), 42i64)?;
            a.emit(InstId::Ret, &[])?;
        }
        _ => {
            use jitasm_rs::x86::RAX;
            a.emit2(InstId::Mov, RAX, 42i64)?;
            a.emit(InstId::Ret, &[])?;
        }
    }
    drop(a);
    let result = code.borrow_mut().flatten_to_vec();
    result
}

fn main() -> Result<(), Error> {
    for arch in [Arch::X86_64, Arch::Aarch64] {
        let bytes = emit_for(arch)?;
        print!("{:>8}:", format!("{}", arch));
        for b in &bytes {
            print!(" {:02X}", b);
        }
        println!();
    }
    Ok(())
}
