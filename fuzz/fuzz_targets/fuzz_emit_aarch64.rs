//! Fuzz the AArch64 emission path through a Builder + finalize replay.

#![no_main]

use libfuzzer_sys::fuzz_target;

use jitasm_rs::aarch64::{w, x};
use jitasm_rs::builder::Builder;
use jitasm_rs::emitter::Emitter;
use jitasm_rs::holder::CodeHolder;
use jitasm_rs::inst::InstId;
use jitasm_rs::operand::{Arch, Environment, Imm, Operand};

fuzz_target!(|data: &[u8]| {
    let code = CodeHolder::new(Environment::new(Arch::Aarch64)).into_ref();
    let Ok(mut b) = Builder::new(&code) else {
        return;
    };
    let mut labels = Vec::new();

    for chunk in data.chunks_exact(4) {
        let all = InstId::ALL;
        let id = all[usize::from(chunk[0]) % all.len()];
        let r = if chunk[1] & 0x20 != 0 {
            x(u16::from(chunk[1] & 0x1F))
        } else {
            w(u16::from(chunk[1] & 0x1F))
        };
        let ops: Vec<Operand> = match chunk[2] % 3 {
            0 => vec![],
            1 => vec![r.into()],
            _ => vec![r.into(), Imm::new(i64::from(chunk[3])).into()],
        };
        let _ = b.emit(id, &ops);

        if chunk[3] & 1 == 0 {
            if let Ok(l) = b.new_label() {
                labels.push(l);
                let _ = b.emit(InstId::B, &[l.into()]);
            }
        } else if let Some(l) = labels.pop() {
            let _ = b.bind(l);
        }
    }

    for l in labels {
        let _ = b.bind(l);
    }
    let _ = b.finalize();
});
