//! End-to-end emulation properties exercised through the public API.
//!
//! These tests drive whole instruction sequences the way the deobfuscation
//! driver does: hand-delimited encodings fed to `run`, with the known/unknown
//! lattice inspected between steps. They pin down the engine's load-bearing
//! guarantees:
//! 1. Fully known writes read back fully known at every width
//! 2. Self-XOR produces certainty from uncertainty
//! 3. Bitwise known masks only ever shrink (conservative AND)
//! 4. Arithmetic never manufactures knowledge from unknown inputs
//! 5. Stack discipline survives nested push/call/ret sequences

use vmpeel::emulation::{ByteHalf, KnownValue, OpSize};
use vmpeel::prelude::*;

const VA: u32 = 0x0040_1000;

fn emu() -> Emulator<'static> {
    Emulator::new(EmulatorConfig::default()).expect("engine allocation")
}

#[test]
fn known_write_read_round_trip_at_every_width() {
    // mov reg, imm at dword, word, and byte widths; each must read back
    // exactly and fully known.
    let mut emu = emu();

    emu.run(VA, &[0xb9, 0xef, 0xbe, 0xad, 0xde]).unwrap(); // mov ecx, 0xdeadbeef
    assert_eq!(emu.reg(Gpr::Ecx).get(OpSize::Dword), 0xdead_beef);
    assert!(emu.reg(Gpr::Ecx).is_known(OpSize::Dword));

    emu.run(VA, &[0x66, 0xbb, 0x34, 0x12]).unwrap(); // mov bx, 0x1234
    assert_eq!(emu.reg(Gpr::Ebx).get(OpSize::Word), 0x1234);
    assert!(emu.reg(Gpr::Ebx).is_known(OpSize::Word));

    emu.run(VA, &[0xb2, 0x7f]).unwrap(); // mov dl, 0x7f
    assert_eq!(emu.reg(Gpr::Edx).byte(ByteHalf::Low), 0x7f);
    assert!(emu.reg(Gpr::Edx).is_byte_known(ByteHalf::Low));
}

#[test]
fn self_xor_holds_in_any_prior_state() {
    for seed in [
        KnownValue::UNKNOWN,
        KnownValue::known(0xdead_beef),
        KnownValue::with_mask(0x1234, 0x0000_ffff),
    ] {
        let mut emu = emu();
        emu.set_reg(Gpr::Edi, seed);
        emu.run(VA, &[0x33, 0xff]).unwrap(); // xor edi, edi
        assert!(emu.reg(Gpr::Edi).is_known(OpSize::Dword));
        assert_eq!(emu.reg(Gpr::Edi).get(OpSize::Dword), 0);
        assert_eq!(emu.flag(Flag::Of), Some(false));
        assert_eq!(emu.flag(Flag::Cf), Some(false));
    }
}

#[test]
fn bitwise_known_masks_are_conservative() {
    // For AND/OR/XOR over partially known operands, the result mask must be
    // a subset of the operand masks' intersection.
    let cases: [(u8, &str); 3] = [(0x23, "and"), (0x0b, "or"), (0x33, "xor")];
    for (opcode, _name) in cases {
        let mut emu = emu();
        let k1 = 0xffff_0000;
        let k2 = 0x00ff_ff00;
        emu.set_reg(Gpr::Eax, KnownValue::with_mask(0x1234_5678, k1));
        emu.set_reg(Gpr::Ecx, KnownValue::with_mask(0x9abc_def0, k2));
        emu.run(VA, &[opcode, 0xc1]).unwrap(); // op eax, ecx
        let result_mask = emu.reg(Gpr::Eax).known_mask();
        assert_eq!(
            result_mask & !(k1 & k2),
            0,
            "result mask {result_mask:#010x} escapes the operand intersection"
        );
    }
}

#[test]
fn arithmetic_knowledge_is_monotone() {
    // Whatever the starting mask, adding an unknown operand must not leave
    // the destination more known than before.
    for seed_mask in [0u32, 0x0000_ffff, 0xffff_ffff] {
        let mut emu = emu();
        emu.set_reg(Gpr::Eax, KnownValue::with_mask(0x1111_1111, seed_mask));
        emu.run(VA, &[0x03, 0xc6]).unwrap(); // add eax, esi (ESI unknown)
        assert_eq!(emu.reg(Gpr::Eax).known_mask(), 0);
    }
}

#[test]
fn add_carry_matches_the_unsigned_wrap_rule() {
    let cases = [
        (0xffff_ffffu32, 1u32, true, true),
        (0x8000_0000, 0x8000_0000, true, false),
        (0x7fff_ffff, 1, false, false),
        (0, 0, false, true),
    ];
    for (a, b, carry, zero) in cases {
        let mut emu = emu();
        emu.set_reg(Gpr::Eax, KnownValue::known(a));
        emu.set_reg(Gpr::Edx, KnownValue::known(b));
        emu.run(VA, &[0x03, 0xc2]).unwrap(); // add eax, edx
        let sum = a.wrapping_add(b);
        assert_eq!(emu.reg(Gpr::Eax).get(OpSize::Dword), sum);
        assert_eq!(emu.flag(Flag::Cf), Some(carry), "CF for {a:#x}+{b:#x}");
        assert_eq!(emu.flag(Flag::Zf), Some(zero), "ZF for {a:#x}+{b:#x}");
    }
}

#[test]
fn stack_round_trip_restores_the_pointer() {
    let mut emu = emu();
    emu.set_reg(Gpr::Eax, KnownValue::known(0x1234_5678));
    let esp = emu.reg(Gpr::Esp).get(OpSize::Dword);

    emu.run(VA, &[0x50]).unwrap(); // push eax
    assert_eq!(emu.reg(Gpr::Esp).get(OpSize::Dword), esp - 4);

    emu.run(VA, &[0x5a]).unwrap(); // pop edx
    assert_eq!(emu.reg(Gpr::Esp).get(OpSize::Dword), esp);
    assert!(emu.reg(Gpr::Edx).is_known(OpSize::Dword));
    assert_eq!(emu.reg(Gpr::Edx).get(OpSize::Dword), 0x1234_5678);
}

#[test]
fn nested_stack_ops_keep_their_ordering() {
    let mut emu = emu();
    emu.set_reg(Gpr::Eax, KnownValue::known(0x1234));
    let esp0 = emu.reg(Gpr::Esp).get(OpSize::Dword);

    // push eax; call +0; two rets peel the frames in LIFO order.
    emu.run(VA, &[0x50]).unwrap();
    let call_va = VA + 1;
    emu.run(call_va, &[0xe8, 0x00, 0x00, 0x00, 0x00]).unwrap();
    assert_eq!(emu.reg(Gpr::Esp).get(OpSize::Dword), esp0 - 8);

    let after_call = call_va + 5;
    emu.run(after_call, &[0xc3]).unwrap();
    assert_eq!(emu.eip().get(OpSize::Dword), after_call);

    emu.run(after_call, &[0xc3]).unwrap();
    assert_eq!(emu.eip().get(OpSize::Dword), 0x1234);
    assert_eq!(emu.reg(Gpr::Esp).get(OpSize::Dword), esp0);
}

#[test]
fn effective_address_with_unknown_register_is_fully_unknown() {
    let mut emu = emu();
    emu.set_reg(Gpr::Ebx, KnownValue::known(0x0011_2000));
    // lea eax, [ebx+edi*2+0x10] - EDI unknown; the conservative rule is
    // all-or-nothing for the address mask.
    emu.run(VA, &[0x8d, 0x44, 0x7b, 0x10]).unwrap();
    assert_eq!(emu.reg(Gpr::Eax).known_mask(), 0);
}

#[test]
fn constant_folding_scenario() {
    // The bread-and-butter deobfuscation pattern: a wholly constant
    // computation threaded through registers, memory, and the stack must
    // come out fully known.
    let mut emu = emu();

    emu.run(VA, &[0xb8, 0x10, 0x00, 0x00, 0x00]).unwrap(); // mov eax, 0x10
    emu.run(VA, &[0xc1, 0xe0, 0x04]).unwrap(); //             shl eax, 4
    emu.run(VA, &[0x83, 0xc0, 0x0f]).unwrap(); //             add eax, 15
    emu.run(VA, &[0x50]).unwrap(); //                         push eax
    emu.run(VA, &[0x5b]).unwrap(); //                         pop ebx
    emu.run(VA, &[0x83, 0xf3, 0xff]).unwrap(); //             xor ebx, -1

    let ebx = emu.reg(Gpr::Ebx);
    assert!(ebx.is_known(OpSize::Dword));
    assert_eq!(ebx.get(OpSize::Dword), !(0x10f));
}

#[test]
fn unknown_input_stops_folding_cleanly() {
    // Same pattern, but the seed comes from an untracked register: every
    // derived value must read unknown, and nothing errors.
    let mut emu = emu();

    emu.run(VA, &[0x8b, 0xc6]).unwrap(); //       mov eax, esi (unknown seed)
    emu.run(VA, &[0xc1, 0xe0, 0x04]).unwrap(); // shl eax, 4
    emu.run(VA, &[0x83, 0xc0, 0x0f]).unwrap(); // add eax, 15
    emu.run(VA, &[0x50]).unwrap(); //             push eax
    emu.run(VA, &[0x5b]).unwrap(); //             pop ebx

    assert_eq!(emu.reg(Gpr::Ebx).known_mask(), 0);
    assert!(emu.reg(Gpr::Esp).is_known(OpSize::Dword));
}

#[test]
fn byte_aliases_do_not_leak_across_halves() {
    let mut emu = emu();
    emu.run(VA, &[0xb0, 0x11]).unwrap(); // mov al, 0x11
    emu.run(VA, &[0xb4, 0x22]).unwrap(); // mov ah, 0x22

    let eax = emu.reg(Gpr::Eax);
    assert_eq!(eax.get(OpSize::Word), 0x2211);
    assert!(eax.is_known(OpSize::Word));
    assert!(!eax.is_known(OpSize::Dword));

    // xor ah, ah clears only the high half's byte.
    emu.run(VA, &[0x32, 0xe4]).unwrap();
    let eax = emu.reg(Gpr::Eax);
    assert_eq!(eax.get(OpSize::Word), 0x0011);
    assert!(eax.is_byte_known(ByteHalf::Low));
}

#[test]
fn decode_failures_leave_state_untouched() {
    let mut emu = emu();
    emu.set_reg(Gpr::Eax, KnownValue::known(0xabcd));
    let before = emu.reg(Gpr::Eax);

    // Unknown opcode, then a recognized opcode with a truncated immediate.
    assert!(matches!(
        emu.run(VA, &[0x0f, 0x31]),
        Err(Error::UnsupportedInstruction { .. })
    ));
    assert!(matches!(
        emu.run(VA, &[0x81, 0xc0, 0x01]),
        Err(Error::TruncatedInstruction { .. })
    ));
    assert_eq!(emu.reg(Gpr::Eax), before);
}

#[test]
fn no_image_attached_routes_everything_to_the_stack_window() {
    let mut emu = emu();
    let addr = emu.stack_base() + 0x40;
    emu.set_reg(Gpr::Esi, KnownValue::known(addr));
    emu.set_reg(Gpr::Eax, KnownValue::known(0x0bad_cafe));

    emu.run(VA, &[0x89, 0x06]).unwrap(); // mov [esi], eax
    emu.run(VA, &[0x8b, 0x1e]).unwrap(); // mov ebx, [esi]
    assert_eq!(emu.reg(Gpr::Ebx).get(OpSize::Dword), 0x0bad_cafe);
}
