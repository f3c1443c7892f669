//! Semantic handlers for the dispatch loop.
//!
//! One method per instruction family, invoked from [`Emulator::run`] with the
//! bytes starting at the opcode (prefixes already stripped). Handlers mutate
//! machine state in place and share a small vocabulary:
//!
//! - **Operand locations** ([`Loc`]): a register view or a computed memory
//!   operand; [`Emulator::read_loc`] / [`Emulator::write_loc`] /
//!   [`Emulator::downgrade_loc`] centralize the known-bit and
//!   unknown-address policy so every family behaves identically at the seams.
//! - **Encoding shapes**: the `reg <- r/m`, `r/m <- imm` and accumulator
//!   shapes recur across families and are decoded by shared helpers instead
//!   of duplicated per opcode.
//! - **Flag recipes**: carry/overflow/zero/sign/parity/aux computation for
//!   add-with-carry and subtract-with-borrow lives in two width-generic
//!   helpers.
//!
//! The load-bearing precision rules:
//!
//! - Bitwise results keep a bit known only when both operand bits are known;
//!   XOR of a register with itself is the one unconditional shortcut and
//!   yields a fully known zero.
//! - Arithmetic only evaluates (and only computes flags) when every operand
//!   is fully known at the instruction width; otherwise the destination is
//!   downgraded and the flags keep their prior known/unknown state.
//! - A memory store through a not-fully-known address is skipped entirely; a
//!   load through one downgrades its destination.
//! - A handler never leaves stale known bits on a location it conceptually
//!   modified: when it cannot compute the new contents, it forgets them.

use crate::{
    emulation::{
        flags::{Condition, Flag},
        operand::{decode_modrm, MemOperand, Operand, RegView},
        registers::{byte_register, Gpr},
        value::{ByteHalf, KnownValue, OpSize},
    },
    Error, Result,
};

use super::{read_u8, read_u16, read_u32, Emulator, MemSlot, Op};

/// Resolved destination/source location at the current operand width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Loc {
    /// A 16/32-bit register view.
    Reg(Gpr),
    /// An 8-bit register view.
    ByteReg(Gpr, ByteHalf),
    /// A memory operand with its (possibly partial) address knowledge.
    Mem(MemOperand),
}

fn sign_extend(value: u32, size: OpSize) -> u32 {
    let shift = 32 - size.bits();
    (((value << shift) as i32) >> shift) as u32
}

impl Emulator<'_> {
    // ---- operand plumbing ---------------------------------------------------

    fn loc_of(&self, operand: &Operand) -> Loc {
        match operand {
            Operand::Register {
                view: RegView::Full(gpr),
                ..
            } => Loc::Reg(*gpr),
            Operand::Register {
                view: RegView::Byte(gpr, half),
                ..
            } => Loc::ByteReg(*gpr, *half),
            Operand::Memory(mem) => Loc::Mem(*mem),
        }
    }

    /// Location named by a ModRM `reg` field at the current width.
    fn reg_field_loc(&self, sel: u8) -> Loc {
        match self.ctx.op_size {
            OpSize::Byte => {
                let (gpr, half) = byte_register(sel);
                Loc::ByteReg(gpr, half)
            }
            _ => Loc::Reg(Gpr::from_selector(sel)),
        }
    }

    /// Reads a location as a `(value, known)` pair at `size`.
    ///
    /// Memory with a not-fully-known or unmapped address reads as entirely
    /// unknown rather than faulting: unknown values are the expected common
    /// case of this analysis.
    fn read_loc(&self, loc: Loc, size: OpSize) -> (u32, u32) {
        match loc {
            Loc::Reg(gpr) => self.regs.read_sized(gpr, size),
            Loc::ByteReg(gpr, half) => {
                let r = self.regs.read(gpr);
                (u32::from(r.byte(half)), u32::from(r.byte_known(half)))
            }
            Loc::Mem(mem) => {
                if !mem.is_known() {
                    return (0, 0);
                }
                self.mem_read(mem.addr, size).unwrap_or((0, 0))
            }
        }
    }

    /// Writes a `(value, known)` pair to a location at `size`.
    ///
    /// An unknown effective address must never be dereferenced for a write,
    /// so memory stores through one are skipped wholesale.
    fn write_loc(&mut self, loc: Loc, size: OpSize, value: u32, known: u32) {
        match loc {
            Loc::Reg(gpr) => self.regs.get_mut(gpr).set_masked(size, value, known),
            Loc::ByteReg(gpr, half) => {
                self.regs
                    .get_mut(gpr)
                    .set_byte_masked(half, value as u8, known as u8);
            }
            Loc::Mem(mem) => {
                if mem.is_known() {
                    self.mem_write(mem.addr, size, value, known);
                }
            }
        }
    }

    /// Marks a location's contents unknown at `size`.
    ///
    /// For stack-window memory this clears the known shadow; image memory
    /// carries no shadow, so there is nothing to record there.
    fn downgrade_loc(&mut self, loc: Loc, size: OpSize) {
        match loc {
            Loc::Reg(gpr) => self.regs.get_mut(gpr).forget(size),
            Loc::ByteReg(gpr, half) => self.regs.get_mut(gpr).forget_byte(half),
            Loc::Mem(mem) => {
                if !mem.is_known() {
                    return;
                }
                if let Some(MemSlot::Stack(offset)) = self.resolve(mem.addr, size.bytes()) {
                    for byte in &mut self.stack.known_mut()[offset..offset + size.bytes()] {
                        *byte = 0;
                    }
                }
            }
        }
    }

    /// Reads an immediate at the current operand width.
    fn read_imm(&self, code: &[u8], at: usize) -> Result<u32> {
        match self.ctx.op_size {
            OpSize::Byte => Ok(u32::from(read_u8(code, at)?)),
            OpSize::Word => Ok(u32::from(read_u16(code, at)?)),
            OpSize::Dword => read_u32(code, at),
        }
    }

    /// Reads a sign-extended relative displacement at the current width.
    fn read_rel(&self, code: &[u8], at: usize) -> Result<i32> {
        match self.ctx.op_size {
            OpSize::Byte => Ok(i32::from(read_u8(code, at)? as i8)),
            OpSize::Word => Ok(i32::from(read_u16(code, at)? as i16)),
            OpSize::Dword => Ok(read_u32(code, at)? as i32),
        }
    }

    // ---- shared encoding shapes ---------------------------------------------

    /// `op reg, r/m`: destination is the ModRM reg field.
    fn shape_reg_rm(&mut self, code: &[u8], byte: bool) -> Result<(Loc, Loc)> {
        if byte {
            self.ctx.op_size = OpSize::Byte;
        }
        let d = decode_modrm(&self.regs, self.ctx.op_size, &code[1..])?;
        Ok((self.reg_field_loc(d.modrm.reg), self.loc_of(&d.operand)))
    }

    /// `op r/m, reg`: destination is the ModRM r/m operand.
    fn shape_rm_reg(&mut self, code: &[u8], byte: bool) -> Result<(Loc, Loc)> {
        if byte {
            self.ctx.op_size = OpSize::Byte;
        }
        let d = decode_modrm(&self.regs, self.ctx.op_size, &code[1..])?;
        Ok((self.loc_of(&d.operand), self.reg_field_loc(d.modrm.reg)))
    }

    /// Immediate-group shape (`0x80`/`0x81`/`0x83`): destination is the r/m
    /// operand, the source an immediate trailing the ModRM encoding. `0x83`
    /// sign-extends its 8-bit immediate to the operand width.
    fn shape_rm_imm(&mut self, code: &[u8]) -> Result<(Loc, u32)> {
        if code[0] == 0x80 {
            self.ctx.op_size = OpSize::Byte;
        }
        let size = self.ctx.op_size;
        let d = decode_modrm(&self.regs, size, &code[1..])?;
        let imm_at = 1 + d.consumed;
        let imm = match code[0] {
            0x80 => u32::from(read_u8(code, imm_at)?),
            0x81 => self.read_imm(code, imm_at)?,
            0x83 => sign_extend(u32::from(read_u8(code, imm_at)?), OpSize::Byte) & size.mask(),
            opcode => return Err(Error::UnsupportedEncoding { opcode }),
        };
        Ok((self.loc_of(&d.operand), imm))
    }

    // ---- flag recipes -------------------------------------------------------

    /// ZF/SF/PF from a result at `size`. PF covers the low byte, even parity
    /// sets it.
    fn set_result_flags(&mut self, size: OpSize, result: u32) {
        let masked = result & size.mask();
        self.eflags.set(Flag::Zf, masked == 0);
        self.eflags.set(Flag::Sf, masked & size.sign_bit() != 0);
        self.eflags.set(Flag::Pf, (masked as u8).count_ones() % 2 == 0);
    }

    /// Add with carry-in at `size`, computing CF/OF/AF/ZF/SF/PF. Returns the
    /// masked result.
    fn flags_add(&mut self, size: OpSize, a: u32, b: u32, carry: u32) -> u32 {
        let mask = size.mask();
        let (a, b) = (a & mask, b & mask);
        let wide = u64::from(a) + u64::from(b) + u64::from(carry);
        let result = (wide & u64::from(mask)) as u32;
        self.eflags.set(Flag::Cf, wide > u64::from(mask));
        self.eflags
            .set(Flag::Of, (a ^ result) & (b ^ result) & size.sign_bit() != 0);
        self.eflags.set(Flag::Af, (a ^ b ^ result) & 0x10 != 0);
        self.set_result_flags(size, result);
        result
    }

    /// Subtract with borrow-in at `size`; CF is the unsigned borrow. Returns
    /// the masked result.
    fn flags_sub(&mut self, size: OpSize, a: u32, b: u32, borrow: u32) -> u32 {
        let mask = size.mask();
        let (a, b) = (a & mask, b & mask);
        let result = a.wrapping_sub(b).wrapping_sub(borrow) & mask;
        self.eflags
            .set(Flag::Cf, u64::from(b) + u64::from(borrow) > u64::from(a));
        self.eflags
            .set(Flag::Of, (a ^ b) & (a ^ result) & size.sign_bit() != 0);
        self.eflags.set(Flag::Af, (a ^ b ^ result) & 0x10 != 0);
        self.set_result_flags(size, result);
        result
    }

    // ---- move family --------------------------------------------------------

    pub(super) fn op_mov(&mut self, code: &[u8]) -> Result<()> {
        let (dst, value, known) = match code[0] {
            0x88 => {
                let (dst, src) = self.shape_rm_reg(code, true)?;
                let (v, k) = self.read_loc(src, OpSize::Byte);
                (dst, v, k)
            }
            0x89 => {
                let (dst, src) = self.shape_rm_reg(code, false)?;
                let (v, k) = self.read_loc(src, self.ctx.op_size);
                (dst, v, k)
            }
            0x8a => {
                let (dst, src) = self.shape_reg_rm(code, true)?;
                let (v, k) = self.read_loc(src, OpSize::Byte);
                (dst, v, k)
            }
            0x8b => {
                let (dst, src) = self.shape_reg_rm(code, false)?;
                let (v, k) = self.read_loc(src, self.ctx.op_size);
                (dst, v, k)
            }
            op @ 0xb0..=0xb7 => {
                self.ctx.op_size = OpSize::Byte;
                let (gpr, half) = byte_register(op - 0xb0);
                let imm = u32::from(read_u8(code, 1)?);
                (Loc::ByteReg(gpr, half), imm, 0xff)
            }
            op @ 0xb8..=0xbf => {
                let imm = self.read_imm(code, 1)?;
                (
                    Loc::Reg(Gpr::from_selector(op - 0xb8)),
                    imm,
                    self.ctx.op_size.mask(),
                )
            }
            0xc6 => {
                self.ctx.op_size = OpSize::Byte;
                let d = decode_modrm(&self.regs, OpSize::Byte, &code[1..])?;
                let imm = u32::from(read_u8(code, 1 + d.consumed)?);
                (self.loc_of(&d.operand), imm, 0xff)
            }
            0xc7 => {
                let d = decode_modrm(&self.regs, self.ctx.op_size, &code[1..])?;
                let imm = self.read_imm(code, 1 + d.consumed)?;
                (self.loc_of(&d.operand), imm, self.ctx.op_size.mask())
            }
            opcode => return Err(Error::UnsupportedEncoding { opcode }),
        };
        // MOV is an exact copy: value and known mask travel together.
        self.write_loc(dst, self.ctx.op_size, value, known);
        Ok(())
    }

    pub(super) fn op_lea(&mut self, code: &[u8]) -> Result<()> {
        let d = decode_modrm(&self.regs, self.ctx.op_size, &code[1..])?;
        match d.operand {
            Operand::Memory(mem) => {
                // The address value itself is the result; its known mask is
                // whatever the contributing registers left of it.
                let dst = self.reg_field_loc(d.modrm.reg);
                self.write_loc(dst, self.ctx.op_size, mem.addr, mem.known);
                Ok(())
            }
            // LEA from a direct register has no address to take.
            Operand::Register { .. } => Err(Error::UnsupportedEncoding { opcode: code[0] }),
        }
    }

    pub(super) fn op_movzx(&mut self, code: &[u8]) -> Result<()> {
        let src_size = if code[0] == 0xb6 {
            OpSize::Byte
        } else {
            OpSize::Word
        };
        let dst_size = self.ctx.op_size;
        let d = decode_modrm(&self.regs, src_size, &code[1..])?;
        let (value, known) = self.read_loc(self.loc_of(&d.operand), src_size);

        // The extended bits are architecturally zero, hence known even when
        // the source bits are not.
        let value = value & src_size.mask();
        let known = (known & src_size.mask()) | (dst_size.mask() & !src_size.mask());
        let dst = Loc::Reg(Gpr::from_selector(d.modrm.reg));
        self.write_loc(dst, dst_size, value, known);
        Ok(())
    }

    pub(super) fn op_movsx(&mut self, code: &[u8]) -> Result<()> {
        let src_size = if code[0] == 0xbe {
            OpSize::Byte
        } else {
            OpSize::Word
        };
        let dst_size = self.ctx.op_size;
        let d = decode_modrm(&self.regs, src_size, &code[1..])?;
        let (value, known) = self.read_loc(self.loc_of(&d.operand), src_size);
        let dst = Loc::Reg(Gpr::from_selector(d.modrm.reg));

        // Sign extension replicates the source sign bit; without the full
        // source the upper bits are unknowable.
        if known & src_size.mask() == src_size.mask() {
            self.write_loc(dst, dst_size, sign_extend(value, src_size), dst_size.mask());
        } else {
            self.downgrade_loc(dst, dst_size);
        }
        Ok(())
    }

    pub(super) fn op_cmov(&mut self, code: &[u8]) -> Result<()> {
        let cond = Condition::from_nibble(code[0]);
        let size = self.ctx.op_size;
        let d = decode_modrm(&self.regs, size, &code[1..])?;
        let dst = self.reg_field_loc(d.modrm.reg);

        match self.eflags.eval(cond) {
            Some(true) => {
                let (v, k) = self.read_loc(self.loc_of(&d.operand), size);
                self.write_loc(dst, size, v, k);
            }
            Some(false) => {}
            // Whether the move happens depends on an untracked flag, so the
            // destination could be either value.
            None => self.downgrade_loc(dst, size),
        }
        Ok(())
    }

    pub(super) fn op_bswap(&mut self, code: &[u8]) -> Result<()> {
        let gpr = Gpr::from_selector(code[0] - 0xc8);
        let r = self.regs.read(gpr);
        // A byte permutation permutes knowledge with it; partially known
        // registers stay exactly as known as before.
        match self.ctx.op_size {
            OpSize::Word => {
                let v = r.get(OpSize::Word);
                let k = r.known_bits(OpSize::Word);
                let value = ((v & 0xff) << 8) | (v >> 8);
                let known = ((k & 0xff) << 8) | (k >> 8);
                self.regs.get_mut(gpr).set_masked(OpSize::Word, value, known);
            }
            _ => {
                self.regs.get_mut(gpr).set_masked(
                    OpSize::Dword,
                    r.raw().swap_bytes(),
                    r.known_mask().swap_bytes(),
                );
            }
        }
        Ok(())
    }

    // ---- arithmetic family --------------------------------------------------

    pub(super) fn op_arith(&mut self, op: Op, code: &[u8]) -> Result<()> {
        let (dst, src_value, src_known) = match code[0] {
            0x03 | 0x13 | 0x1b | 0x2b | 0x3b => {
                let (dst, src) = self.shape_reg_rm(code, false)?;
                let (v, k) = self.read_loc(src, self.ctx.op_size);
                (dst, v, k)
            }
            0x3a => {
                let (dst, src) = self.shape_reg_rm(code, true)?;
                let (v, k) = self.read_loc(src, OpSize::Byte);
                (dst, v, k)
            }
            0x3c => {
                self.ctx.op_size = OpSize::Byte;
                let imm = u32::from(read_u8(code, 1)?);
                (Loc::ByteReg(Gpr::Eax, ByteHalf::Low), imm, 0xff)
            }
            0x3d => {
                let imm = self.read_imm(code, 1)?;
                (Loc::Reg(Gpr::Eax), imm, self.ctx.op_size.mask())
            }
            0x80 | 0x81 | 0x83 => {
                let (dst, imm) = self.shape_rm_imm(code)?;
                (dst, imm, self.ctx.op_size.mask())
            }
            opcode => return Err(Error::UnsupportedEncoding { opcode }),
        };
        self.alu_apply(op, dst, src_value, src_known)
    }

    /// Common ADD/ADC/SUB/SBB/CMP application with the conservative
    /// evaluation gate.
    fn alu_apply(&mut self, op: Op, dst: Loc, src_value: u32, src_known: u32) -> Result<()> {
        let size = self.ctx.op_size;
        let mask = size.mask();
        let (dv, dk) = self.read_loc(dst, size);

        let carry = match op {
            Op::Adc | Op::Sbb => match self.eflags.get(Flag::Cf) {
                Some(cf) => u32::from(cf),
                None => {
                    // Folding in an untracked carry poisons the whole result.
                    self.downgrade_loc(dst, size);
                    return Ok(());
                }
            },
            _ => 0,
        };

        if dk == mask && src_known & mask == mask {
            let result = match op {
                Op::Add | Op::Adc => self.flags_add(size, dv, src_value, carry),
                _ => self.flags_sub(size, dv, src_value, carry),
            };
            if op != Op::Cmp {
                self.write_loc(dst, size, result, mask);
            }
        } else if op != Op::Cmp {
            // Monotonic loss of precision; flags keep their prior state.
            self.downgrade_loc(dst, size);
        }
        Ok(())
    }

    pub(super) fn op_incdec(&mut self, code: &[u8], inc: bool) -> Result<()> {
        let dst = match code[0] {
            op @ 0x40..=0x47 => Loc::Reg(Gpr::from_selector(op - 0x40)),
            op @ 0x48..=0x4f => Loc::Reg(Gpr::from_selector(op - 0x48)),
            0xfe => {
                self.ctx.op_size = OpSize::Byte;
                let d = decode_modrm(&self.regs, OpSize::Byte, &code[1..])?;
                self.loc_of(&d.operand)
            }
            0xff => {
                let d = decode_modrm(&self.regs, self.ctx.op_size, &code[1..])?;
                self.loc_of(&d.operand)
            }
            opcode => return Err(Error::UnsupportedEncoding { opcode }),
        };

        let size = self.ctx.op_size;
        let (dv, dk) = self.read_loc(dst, size);
        if dk != size.mask() {
            self.downgrade_loc(dst, size);
            return Ok(());
        }

        // INC/DEC preserve CF through the shared recipe.
        let saved_cf = self.eflags.get(Flag::Cf);
        let result = if inc {
            self.flags_add(size, dv, 1, 0)
        } else {
            self.flags_sub(size, dv, 1, 0)
        };
        match saved_cf {
            Some(cf) => self.eflags.set(Flag::Cf, cf),
            None => self.eflags.forget(Flag::Cf),
        }
        self.write_loc(dst, size, result, size.mask());
        Ok(())
    }

    pub(super) fn op_neg(&mut self, code: &[u8]) -> Result<()> {
        if code[0] == 0xf6 {
            self.ctx.op_size = OpSize::Byte;
        }
        let size = self.ctx.op_size;
        let d = decode_modrm(&self.regs, size, &code[1..])?;
        let dst = self.loc_of(&d.operand);

        let (dv, dk) = self.read_loc(dst, size);
        if dk != size.mask() {
            self.downgrade_loc(dst, size);
            return Ok(());
        }
        // 0 - x delivers the architectural CF (set unless the operand was
        // zero) and OF (set for the most negative value) for free.
        let result = self.flags_sub(size, 0, dv, 0);
        self.write_loc(dst, size, result, size.mask());
        Ok(())
    }

    pub(super) fn op_not(&mut self, code: &[u8]) -> Result<()> {
        if code[0] == 0xf6 {
            self.ctx.op_size = OpSize::Byte;
        }
        let size = self.ctx.op_size;
        let d = decode_modrm(&self.regs, size, &code[1..])?;
        let dst = self.loc_of(&d.operand);

        // Complement is per-bit: every known bit stays known. No flags.
        let (dv, dk) = self.read_loc(dst, size);
        self.write_loc(dst, size, !dv, dk);
        Ok(())
    }

    pub(super) fn op_muldiv(&mut self, code: &[u8]) -> Result<()> {
        if code[0] == 0xf6 {
            self.ctx.op_size = OpSize::Byte;
        }
        // Validate the encoding, then surrender: these are recognized but not
        // evaluated, so the implicit destinations and the arithmetic flags
        // must not keep pre-instruction knowledge.
        decode_modrm(&self.regs, self.ctx.op_size, &code[1..])?;

        match self.ctx.op_size {
            OpSize::Byte => self.regs.get_mut(Gpr::Eax).forget(OpSize::Word),
            OpSize::Word => {
                self.regs.get_mut(Gpr::Eax).forget(OpSize::Word);
                self.regs.get_mut(Gpr::Edx).forget(OpSize::Word);
            }
            OpSize::Dword => {
                self.regs.get_mut(Gpr::Eax).forget(OpSize::Dword);
                self.regs.get_mut(Gpr::Edx).forget(OpSize::Dword);
            }
        }
        for flag in [Flag::Cf, Flag::Of, Flag::Sf, Flag::Zf, Flag::Af, Flag::Pf] {
            self.eflags.forget(flag);
        }
        Ok(())
    }

    // ---- logical family -----------------------------------------------------

    pub(super) fn op_logic(&mut self, op: Op, code: &[u8]) -> Result<()> {
        let (dst, src_value, src_known) = match (op, code[0]) {
            (Op::Or, 0x0a) | (Op::Xor, 0x32) => {
                let (dst, src) = self.shape_reg_rm(code, true)?;
                if op == Op::Xor && dst == src {
                    return self.apply_self_xor(dst);
                }
                let (v, k) = self.read_loc(src, OpSize::Byte);
                (dst, v, k)
            }
            (Op::Or, 0x0b) | (Op::And, 0x23) | (Op::Xor, 0x33) => {
                let (dst, src) = self.shape_reg_rm(code, false)?;
                if op == Op::Xor && dst == src {
                    return self.apply_self_xor(dst);
                }
                let (v, k) = self.read_loc(src, self.ctx.op_size);
                (dst, v, k)
            }
            (Op::Test, 0x84) => {
                let (dst, src) = self.shape_rm_reg(code, true)?;
                let (v, k) = self.read_loc(src, OpSize::Byte);
                (dst, v, k)
            }
            (Op::Test, 0x85) => {
                let (dst, src) = self.shape_rm_reg(code, false)?;
                let (v, k) = self.read_loc(src, self.ctx.op_size);
                (dst, v, k)
            }
            (Op::Test, 0xa8) => {
                self.ctx.op_size = OpSize::Byte;
                let imm = u32::from(read_u8(code, 1)?);
                (Loc::ByteReg(Gpr::Eax, ByteHalf::Low), imm, 0xff)
            }
            (Op::Test, 0xa9) => {
                let imm = self.read_imm(code, 1)?;
                (Loc::Reg(Gpr::Eax), imm, self.ctx.op_size.mask())
            }
            (Op::Test, 0xf6 | 0xf7) => {
                if code[0] == 0xf6 {
                    self.ctx.op_size = OpSize::Byte;
                }
                let d = decode_modrm(&self.regs, self.ctx.op_size, &code[1..])?;
                let imm = self.read_imm(code, 1 + d.consumed)?;
                (self.loc_of(&d.operand), imm, self.ctx.op_size.mask())
            }
            (_, 0x80 | 0x81 | 0x83) => {
                let (dst, imm) = self.shape_rm_imm(code)?;
                (dst, imm, self.ctx.op_size.mask())
            }
            (_, opcode) => return Err(Error::UnsupportedEncoding { opcode }),
        };
        self.logic_apply(op, dst, src_value, src_known)
    }

    /// XOR of a register with itself: a fully known zero regardless of the
    /// register's prior state. Compilers zero registers this way, and the
    /// downstream constant folding leans on recognizing it.
    fn apply_self_xor(&mut self, dst: Loc) -> Result<()> {
        let size = self.ctx.op_size;
        self.write_loc(dst, size, 0, size.mask());
        self.eflags.set(Flag::Of, false);
        self.eflags.set(Flag::Cf, false);
        self.set_result_flags(size, 0);
        self.eflags.forget(Flag::Af);
        Ok(())
    }

    /// Common AND/OR/XOR/TEST application: conservative known-mask AND,
    /// unconditional OF/CF clear.
    fn logic_apply(&mut self, op: Op, dst: Loc, src_value: u32, src_known: u32) -> Result<()> {
        let size = self.ctx.op_size;
        let mask = size.mask();
        let (dv, dk) = self.read_loc(dst, size);

        let value = match op {
            Op::Or => dv | src_value,
            Op::Xor => dv ^ src_value,
            _ => dv & src_value,
        };
        let known = dk & src_known & mask;

        self.eflags.set(Flag::Of, false);
        self.eflags.set(Flag::Cf, false);
        if known == mask {
            self.set_result_flags(size, value);
        } else {
            self.eflags.forget(Flag::Sf);
            self.eflags.forget(Flag::Zf);
            self.eflags.forget(Flag::Pf);
        }
        self.eflags.forget(Flag::Af);

        if op != Op::Test {
            self.write_loc(dst, size, value, known);
        }
        Ok(())
    }

    // ---- shift/rotate family ------------------------------------------------

    /// Destination and shift count for the C0/C1/D0/D1/D2/D3 group.
    ///
    /// `None` count means the count comes from an unknown CL.
    fn shift_operands(&mut self, code: &[u8]) -> Result<(Loc, Option<u32>)> {
        if matches!(code[0], 0xc0 | 0xd0 | 0xd2) {
            self.ctx.op_size = OpSize::Byte;
        }
        let d = decode_modrm(&self.regs, self.ctx.op_size, &code[1..])?;
        let dst = self.loc_of(&d.operand);
        let count = match code[0] {
            0xc0 | 0xc1 => Some(u32::from(read_u8(code, 1 + d.consumed)?)),
            0xd0 | 0xd1 => Some(1),
            0xd2 | 0xd3 => {
                let (cl, cl_known) = self.regs.read_byte(1);
                (cl_known == 0xff).then_some(u32::from(cl))
            }
            opcode => return Err(Error::UnsupportedEncoding { opcode }),
        };
        // The hardware masks the count to five bits before anything else.
        Ok((dst, count.map(|c| c & 0x1f)))
    }

    pub(super) fn op_shift(&mut self, op: Op, code: &[u8]) -> Result<()> {
        let (dst, count) = self.shift_operands(code)?;
        let size = self.ctx.op_size;
        let bits = size.bits();
        let mask = size.mask();

        let Some(count) = count else {
            self.downgrade_loc(dst, size);
            return Ok(());
        };
        if count == 0 {
            // Masked count zero touches neither the operand nor any flag.
            return Ok(());
        }

        let (dv, dk) = self.read_loc(dst, size);
        if dk != mask {
            self.downgrade_loc(dst, size);
            return Ok(());
        }

        let result = match op {
            Op::Shl => {
                let wide = u64::from(dv) << count;
                let result = (wide & u64::from(mask)) as u32;
                self.eflags.set(Flag::Cf, (wide >> bits) & 1 != 0);
                if count == 1 {
                    let cf = (wide >> bits) & 1 != 0;
                    self.eflags.set(Flag::Of, cf != (result & size.sign_bit() != 0));
                } else {
                    self.eflags.forget(Flag::Of);
                }
                self.set_result_flags(size, result);
                self.eflags.forget(Flag::Af);
                result
            }
            Op::Shr => {
                let result = dv >> count;
                self.eflags.set(Flag::Cf, (dv >> (count - 1)) & 1 != 0);
                if count == 1 {
                    self.eflags.set(Flag::Of, dv & size.sign_bit() != 0);
                } else {
                    self.eflags.forget(Flag::Of);
                }
                self.set_result_flags(size, result);
                self.eflags.forget(Flag::Af);
                result
            }
            Op::Sar => {
                let sx = sign_extend(dv, size) as i32;
                let result = ((sx >> count) as u32) & mask;
                self.eflags.set(Flag::Cf, (sx >> (count - 1)) & 1 != 0);
                if count == 1 {
                    // A one-bit arithmetic shift cannot overflow.
                    self.eflags.set(Flag::Of, false);
                } else {
                    self.eflags.forget(Flag::Of);
                }
                self.set_result_flags(size, result);
                self.eflags.forget(Flag::Af);
                result
            }
            Op::Rol => {
                let c = count % bits;
                let result = if c == 0 {
                    dv
                } else {
                    ((dv << c) | (dv >> (bits - c))) & mask
                };
                let cf = result & 1 != 0;
                self.eflags.set(Flag::Cf, cf);
                if count == 1 {
                    self.eflags
                        .set(Flag::Of, (result & size.sign_bit() != 0) != cf);
                } else {
                    self.eflags.forget(Flag::Of);
                }
                result
            }
            Op::Ror => {
                let c = count % bits;
                let result = if c == 0 {
                    dv
                } else {
                    ((dv >> c) | (dv << (bits - c))) & mask
                };
                self.eflags.set(Flag::Cf, result & size.sign_bit() != 0);
                if count == 1 {
                    let msb = result & size.sign_bit() != 0;
                    let next = result & (size.sign_bit() >> 1) != 0;
                    self.eflags.set(Flag::Of, msb != next);
                } else {
                    self.eflags.forget(Flag::Of);
                }
                result
            }
            // RCL/RCR rotate through the carry, so the carry must be known.
            _ => {
                let Some(cf_in) = self.eflags.get(Flag::Cf) else {
                    self.downgrade_loc(dst, size);
                    return Ok(());
                };
                let c = count % (bits + 1);
                if c == 0 {
                    return Ok(());
                }
                let span = bits + 1;
                let wide_mask = (1u64 << span) - 1;
                let wide = u64::from(dv) | (u64::from(cf_in) << bits);
                let rotated = if op == Op::Rcl {
                    ((wide << c) | (wide >> (span - c))) & wide_mask
                } else {
                    ((wide >> c) | (wide << (span - c))) & wide_mask
                };
                let result = (rotated & u64::from(mask)) as u32;
                let cf_out = (rotated >> bits) & 1 != 0;
                self.eflags.set(Flag::Cf, cf_out);
                if count == 1 {
                    let of = if op == Op::Rcl {
                        (result & size.sign_bit() != 0) != cf_out
                    } else {
                        (dv & size.sign_bit() != 0) != cf_in
                    };
                    self.eflags.set(Flag::Of, of);
                } else {
                    self.eflags.forget(Flag::Of);
                }
                result
            }
        };

        self.write_loc(dst, size, result, mask);
        Ok(())
    }

    pub(super) fn op_shrd(&mut self, code: &[u8]) -> Result<()> {
        let size = self.ctx.op_size;
        let bits = size.bits();
        let mask = size.mask();
        let d = decode_modrm(&self.regs, size, &code[1..])?;
        let dst = self.loc_of(&d.operand);
        let (sv, sk) = self
            .regs
            .read_sized(Gpr::from_selector(d.modrm.reg), size);

        let count = match code[0] {
            0xac => Some(u32::from(read_u8(code, 1 + d.consumed)?)),
            0xad => {
                let (cl, cl_known) = self.regs.read_byte(1);
                (cl_known == 0xff).then_some(u32::from(cl))
            }
            opcode => return Err(Error::UnsupportedEncoding { opcode }),
        };

        let Some(count) = count.map(|c| c & 0x1f) else {
            self.downgrade_loc(dst, size);
            return Ok(());
        };
        if count == 0 {
            return Ok(());
        }
        if count >= bits {
            // Result is architecturally undefined past the operand width.
            self.downgrade_loc(dst, size);
            return Ok(());
        }

        let (dv, dk) = self.read_loc(dst, size);
        if dk != mask || sk != mask {
            self.downgrade_loc(dst, size);
            return Ok(());
        }

        // Bits leaving the low operand are replaced by bits entering from
        // the high operand.
        let result = ((dv >> count) | (sv << (bits - count))) & mask;
        self.eflags.set(Flag::Cf, (dv >> (count - 1)) & 1 != 0);
        if count == 1 {
            self.eflags.set(
                Flag::Of,
                (dv & size.sign_bit() != 0) != (result & size.sign_bit() != 0),
            );
        } else {
            self.eflags.forget(Flag::Of);
        }
        self.set_result_flags(size, result);
        self.eflags.forget(Flag::Af);
        self.write_loc(dst, size, result, mask);
        Ok(())
    }

    // ---- bit test family ----------------------------------------------------

    pub(super) fn op_bittest(&mut self, op: Op, code: &[u8]) -> Result<()> {
        let size = self.ctx.op_size;
        let bits = size.bits();
        let d = decode_modrm(&self.regs, size, &code[1..])?;
        let dst = self.loc_of(&d.operand);
        if matches!(dst, Loc::Mem(_)) {
            // Memory bit strings are not modeled.
            return Err(Error::UnsupportedEncoding { opcode: code[0] });
        }

        let index = match code[0] {
            0xba => Some(u32::from(read_u8(code, 1 + d.consumed)?)),
            _ => {
                let (iv, ik) = self
                    .regs
                    .read_sized(Gpr::from_selector(d.modrm.reg), size);
                (ik == size.mask()).then_some(iv)
            }
        };

        let Some(index) = index else {
            // Unknown bit index: CF takes an unknowable bit, and BTS/BTC
            // could have flipped any position.
            self.eflags.forget(Flag::Cf);
            if op != Op::Bt {
                self.downgrade_loc(dst, size);
            }
            return Ok(());
        };

        let bit = 1u32 << (index % bits);
        let (dv, dk) = self.read_loc(dst, size);
        if dk & bit != 0 {
            self.eflags.set(Flag::Cf, dv & bit != 0);
        } else {
            self.eflags.forget(Flag::Cf);
        }
        match op {
            // The written bit value is certain regardless of its old state.
            Op::Bts => self.write_loc(dst, size, dv | bit, dk | bit),
            Op::Btc => self.write_loc(dst, size, dv & !bit, dk | bit),
            _ => {}
        }
        Ok(())
    }

    // ---- stack family -------------------------------------------------------

    /// Pushes a value/mask pair as `n` little-endian byte cells, keeping ESP
    /// and the stack top in lockstep.
    fn push_value(&mut self, value: u32, known: u32, n: usize) -> Result<()> {
        let data = value.to_le_bytes();
        let shadow = known.to_le_bytes();
        self.push_cells(&data[..n], &shadow[..n])
    }

    fn push_cells(&mut self, data: &[u8], known: &[u8]) -> Result<()> {
        let esp = self.regs.read(Gpr::Esp);
        if !esp.is_known(OpSize::Dword) {
            // The stack pointer itself was lost to the analysis; the write
            // cannot land anywhere trackable, but ESP still moves.
            let moved = esp.raw().wrapping_sub(data.len() as u32);
            self.regs
                .get_mut(Gpr::Esp)
                .set_masked(OpSize::Dword, moved, esp.known_mask());
            return Ok(());
        }

        let top = esp.get(OpSize::Dword).wrapping_sub(self.stack_base) as usize;
        if top > self.stack.size() {
            return Err(Error::StackOverflow {
                requested: data.len(),
                available: 0,
            });
        }
        self.stack.set_top(top);
        self.stack.push(data, known)?;
        #[allow(clippy::cast_possible_truncation)]
        let esp_now = self.stack_base.wrapping_add(self.stack.top() as u32);
        self.regs.get_mut(Gpr::Esp).set(OpSize::Dword, esp_now);
        Ok(())
    }

    fn pop_cells(&mut self, data: &mut [u8], known: &mut [u8]) -> Result<()> {
        let esp = self.regs.read(Gpr::Esp);
        if !esp.is_known(OpSize::Dword) {
            known.fill(0);
            let moved = esp.raw().wrapping_add(data.len() as u32);
            self.regs
                .get_mut(Gpr::Esp)
                .set_masked(OpSize::Dword, moved, esp.known_mask());
            return Ok(());
        }

        let top = esp.get(OpSize::Dword).wrapping_sub(self.stack_base) as usize;
        if top > self.stack.size() {
            return Err(Error::StackUnderflow {
                requested: data.len(),
                available: 0,
            });
        }
        self.stack.set_top(top);
        self.stack.pop(data, known)?;
        #[allow(clippy::cast_possible_truncation)]
        let esp_now = self.stack_base.wrapping_add(self.stack.top() as u32);
        self.regs.get_mut(Gpr::Esp).set(OpSize::Dword, esp_now);
        Ok(())
    }

    fn release_cells(&mut self, n: usize) -> Result<()> {
        let esp = self.regs.read(Gpr::Esp);
        if !esp.is_known(OpSize::Dword) {
            let moved = esp.raw().wrapping_add(n as u32);
            self.regs
                .get_mut(Gpr::Esp)
                .set_masked(OpSize::Dword, moved, esp.known_mask());
            return Ok(());
        }
        let top = esp.get(OpSize::Dword).wrapping_sub(self.stack_base) as usize;
        if top > self.stack.size() {
            return Err(Error::StackUnderflow {
                requested: n,
                available: 0,
            });
        }
        self.stack.set_top(top);
        self.stack.release(n)?;
        #[allow(clippy::cast_possible_truncation)]
        let esp_now = self.stack_base.wrapping_add(self.stack.top() as u32);
        self.regs.get_mut(Gpr::Esp).set(OpSize::Dword, esp_now);
        Ok(())
    }

    pub(super) fn op_push(&mut self, code: &[u8]) -> Result<()> {
        let size = self.ctx.op_size;
        let n = size.bytes();
        match code[0] {
            op @ 0x50..=0x57 => {
                let r = self.regs.read(Gpr::from_selector(op - 0x50));
                self.push_value(r.get(size), r.known_bits(size), n)
            }
            0x68 => {
                let imm = self.read_imm(code, 1)?;
                self.push_value(imm, size.mask(), n)
            }
            0x6a => {
                let imm = sign_extend(u32::from(read_u8(code, 1)?), OpSize::Byte);
                self.push_value(imm & size.mask(), size.mask(), n)
            }
            0xff => {
                let d = decode_modrm(&self.regs, size, &code[1..])?;
                let (v, k) = self.read_loc(self.loc_of(&d.operand), size);
                self.push_value(v, k, n)
            }
            opcode => Err(Error::UnsupportedEncoding { opcode }),
        }
    }

    pub(super) fn op_pop(&mut self, code: &[u8]) -> Result<()> {
        let size = self.ctx.op_size;
        let n = size.bytes();
        let gpr = match code[0] {
            op @ 0x58..=0x5f => Gpr::from_selector(op - 0x58),
            opcode => return Err(Error::UnsupportedEncoding { opcode }),
        };
        let mut data = [0u8; 4];
        let mut known = [0u8; 4];
        self.pop_cells(&mut data[..n], &mut known[..n])?;
        self.regs.get_mut(gpr).set_masked(
            size,
            u32::from_le_bytes(data),
            u32::from_le_bytes(known),
        );
        Ok(())
    }

    pub(super) fn op_pushfd(&mut self, _code: &[u8]) -> Result<()> {
        let (value, known) = self.eflags.image();
        let n = self.ctx.op_size.bytes();
        self.push_value(value, known, n)
    }

    pub(super) fn op_popfd(&mut self, _code: &[u8]) -> Result<()> {
        let n = self.ctx.op_size.bytes();
        let mut data = [0u8; 4];
        let mut known = [0u8; 4];
        self.pop_cells(&mut data[..n], &mut known[..n])?;
        self.eflags
            .load_image(u32::from_le_bytes(data), u32::from_le_bytes(known));
        Ok(())
    }

    // ---- control transfer ---------------------------------------------------

    /// VA of the byte after this instruction, which is both the fall-through
    /// address and the return address CALL pushes.
    fn next_ip(&self) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        let len = self.ctx.len as u32;
        self.ctx.va.wrapping_add(len)
    }

    pub(super) fn op_call(&mut self, code: &[u8]) -> Result<()> {
        match code[0] {
            0xe8 => {
                let rel = self.read_rel(code, 1)?;
                let ret = self.next_ip();
                let mut target = ret.wrapping_add(rel as u32);
                if self.ctx.op_size == OpSize::Word {
                    target &= 0xffff;
                }
                // The return address is a constant of the encoding, hence
                // fully known no matter what state the analysis is in.
                self.push_value(ret, u32::MAX, 4)?;
                self.eip = KnownValue::known(target);
                Ok(())
            }
            0xff => {
                let size = self.ctx.op_size;
                let d = decode_modrm(&self.regs, size, &code[1..])?;
                let (v, k) = self.read_loc(self.loc_of(&d.operand), size);
                if k != size.mask() {
                    return Err(Error::IndeterminateTarget);
                }
                let ret = self.next_ip();
                self.push_value(ret, u32::MAX, 4)?;
                self.eip = KnownValue::known(v);
                Ok(())
            }
            opcode => Err(Error::UnsupportedEncoding { opcode }),
        }
    }

    pub(super) fn op_jmp(&mut self, code: &[u8]) -> Result<()> {
        match code[0] {
            0xe9 | 0xeb => {
                let rel = if code[0] == 0xeb {
                    i32::from(read_u8(code, 1)? as i8)
                } else {
                    self.read_rel(code, 1)?
                };
                let mut target = self.next_ip().wrapping_add(rel as u32);
                if self.ctx.op_size == OpSize::Word {
                    target &= 0xffff;
                }
                self.eip = KnownValue::known(target);
                Ok(())
            }
            0xff => {
                let size = self.ctx.op_size;
                let d = decode_modrm(&self.regs, size, &code[1..])?;
                let (v, k) = self.read_loc(self.loc_of(&d.operand), size);
                if k != size.mask() {
                    return Err(Error::IndeterminateTarget);
                }
                self.eip = KnownValue::known(v);
                Ok(())
            }
            opcode => Err(Error::UnsupportedEncoding { opcode }),
        }
    }

    pub(super) fn op_ret(&mut self, code: &[u8]) -> Result<()> {
        let mut data = [0u8; 4];
        let mut known = [0u8; 4];
        self.pop_cells(&mut data, &mut known)?;
        // A partially known return address is a successful RET whose target
        // the caller must treat as unresolvable.
        self.eip = KnownValue::with_mask(u32::from_le_bytes(data), u32::from_le_bytes(known));

        if code[0] == 0xc2 {
            let extra = usize::from(read_u16(code, 1)?);
            self.release_cells(extra)?;
        }
        Ok(())
    }

    // ---- flag instructions --------------------------------------------------

    pub(super) fn op_setcf(&mut self, _code: &[u8], value: bool) -> Result<()> {
        self.eflags.set(Flag::Cf, value);
        Ok(())
    }

    pub(super) fn op_cmc(&mut self, _code: &[u8]) -> Result<()> {
        // Complement of an unknown carry is still unknown; nothing to do then.
        if let Some(cf) = self.eflags.get(Flag::Cf) {
            self.eflags.set(Flag::Cf, !cf);
        }
        Ok(())
    }

    pub(super) fn op_setdf(&mut self, _code: &[u8], value: bool) -> Result<()> {
        self.eflags.set(Flag::Df, value);
        Ok(())
    }
}
