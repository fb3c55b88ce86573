//! Fuzz the x86-64 emission path: drive an Assembler with an instruction
//! stream derived from arbitrary bytes and assert it never panics.

#![no_main]

use libfuzzer_sys::fuzz_target;

use jitasm_rs::asm::Assembler;
use jitasm_rs::emitter::Emitter;
use jitasm_rs::holder::CodeHolder;
use jitasm_rs::inst::InstId;
use jitasm_rs::operand::{Arch, Environment, Imm, Mem, Operand, Reg};

fn reg(byte: u8) -> Reg {
    Reg::gp(u16::from(byte & 0x0F), if byte & 0x10 != 0 { 8 } else { 4 })
}

fuzz_target!(|data: &[u8]| {
    let code = CodeHolder::new(Environment::new(Arch::X86_64)).into_ref();
    let Ok(mut a) = Assembler::new(&code) else {
        return;
    };
    let mut labels = Vec::new();

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let all = InstId::ALL;
        let id = all[usize::from(chunk[0]) % all.len()];
        let ops: Vec<Operand> = match chunk[1] % 4 {
            0 => vec![],
            1 => vec![reg(chunk[2]).into()],
            2 => vec![reg(chunk[2]).into(), Imm::new(i64::from(chunk[3])).into()],
            _ => vec![
                reg(chunk[2]).into(),
                Mem::base_disp(reg(chunk[3] | 0x10), i32::from(chunk[3])).into(),
            ],
        };
        // Errors are fine; panics are not.
        let _ = a.emit(id, &ops);

        if chunk[3] & 1 == 0 {
            if let Ok(l) = a.new_label() {
                labels.push(l);
                let _ = a.emit(InstId::Jmp, &[l.into()]);
            }
        } else if let Some(l) = labels.pop() {
            let _ = a.bind(l);
        }
    }

    for l in labels {
        let _ = a.bind(l);
    }
    drop(a);
    let _ = code.borrow_mut().flatten_to_vec();
});
