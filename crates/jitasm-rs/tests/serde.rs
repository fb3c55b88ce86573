//! Serde round-trip tests for the public data types (feature-gated).

#![cfg(feature = "serde")]

use jitasm_rs::error::Error;
use jitasm_rs::holder::{FixupKind, LabelId, RelocEntry, RelocKind, RelocTarget, SectionId};
use jitasm_rs::inst::{InstId, InstOptions};
use jitasm_rs::operand::{Imm, Mem, Operand, Reg};

#[test]
fn error_round_trips() {
    let err = Error::RelocationOutOfRange {
        displacement: 4096,
        bits: 8,
    };
    let json = serde_json::to_string(&err).unwrap();
    let back: Error = serde_json::from_str(&json).unwrap();
    assert_eq!(err, back);
}

#[test]
fn reloc_entry_round_trips() {
    let entry = RelocEntry {
        kind: RelocKind::Relative,
        src_section: SectionId::from_raw(0),
        src_offset: 17,
        target: RelocTarget::Label(LabelId::from_raw(3)),
        delta_base: None,
        addend: -4,
        size: 4,
        format: Some(FixupKind::X86Rel32 { trailing: 0 }),
    };
    let json = serde_json::to_string(&entry).unwrap();
    let back: RelocEntry = serde_json::from_str(&json).unwrap();
    assert_eq!(entry, back);
}

#[test]
fn operands_round_trip() {
    let ops = vec![
        Operand::Reg(Reg::gp(3, 8)),
        Operand::Imm(Imm::new(-7)),
        Operand::Mem(Mem::base_disp(Reg::gp(4, 8), 16)),
        Operand::Label(LabelId::from_raw(1)),
    ];
    let json = serde_json::to_string(&ops).unwrap();
    let back: Vec<Operand> = serde_json::from_str(&json).unwrap();
    assert_eq!(ops, back);
}

#[test]
fn options_preserve_reserved_bits() {
    let opts = InstOptions::from_bits(0xDEAD_0008);
    let json = serde_json::to_string(&opts).unwrap();
    let back: InstOptions = serde_json::from_str(&json).unwrap();
    assert_eq!(back.bits(), 0xDEAD_0008);
}

#[test]
fn inst_id_round_trips() {
    let json = serde_json::to_string(&InstId::Mov).unwrap();
    let back: InstId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, InstId::Mov);
}
