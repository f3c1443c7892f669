//! The decode-dispatch-execute engine.
//!
//! [`Emulator`] owns one machine state - register file, tracked flags, EIP,
//! and the synthetic stack - and mutates it in place, one instruction per
//! [`Emulator::run`] call. The caller owns instruction boundaries (an
//! external length decoder) and hands in exactly one instruction's bytes
//! together with its virtual address.
//!
//! # Decode Pipeline
//!
//! ```text
//! bytes -> prefix strip -> opcode space select -> table scan -> handler
//! ```
//!
//! 1. The per-instruction context resets to 32-bit operands; at most one
//!    recognized prefix is consumed (`0x66` switches to 16-bit operands;
//!    `0x67`, `0xf0`, `0xf2`, `0xf3` are recognized and ignored).
//! 2. A leading `0x0f` escapes into the two-byte opcode space.
//! 3. The active table - an ordered `const` list of
//!    `(opcode, optional ModRM reg, operation)` entries - is scanned for the
//!    first match; entries with a required reg field also match the ModRM
//!    byte's reg bits.
//! 4. The matched [`Op`] dispatches through one `match` to its semantic
//!    handler. Exhausting the table is [`crate::Error::UnsupportedInstruction`]; a
//!    handler rejecting its sub-encoding is [`crate::Error::UnsupportedEncoding`].
//!    Neither corrupts machine state.
//!
//! # Memory Model
//!
//! Every dereference resolves through one translation step: the attached
//! [`LoadedImage`] is asked first; addresses it does not claim fall into the
//! synthetic stack window at the configured base VA. Image bytes read as
//! fully known; stack bytes carry their per-byte known shadow.

mod handlers;

use std::fmt;

use crate::{
    emulation::{
        flags::{Eflags, Flag},
        registers::{Gpr, RegisterFile},
        stack::ShadowStack,
        value::{KnownValue, OpSize},
    },
    loader::LoadedImage,
    Error, Result,
};

/// Engine construction parameters.
///
/// The defaults mirror a 32-bit Windows process: a 128 KiB stack whose top
/// sits at `0x0013_0000`.
#[derive(Debug, Clone, Copy)]
pub struct EmulatorConfig {
    /// Synthetic stack capacity in bytes.
    pub stack_size: usize,
    /// Virtual address of the stack window's low end.
    pub stack_base: u32,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        EmulatorConfig {
            stack_size: 128 * 1024,
            stack_base: 0x0011_0000,
        }
    }
}

/// Transient per-instruction state, reset at the start of every decode.
#[derive(Debug, Clone, Copy)]
pub(crate) struct InstrContext {
    /// Active operand width for this instruction.
    pub op_size: OpSize,
    /// Virtual address of the instruction's first byte.
    pub va: u32,
    /// Total instruction length in bytes, prefixes included.
    pub len: usize,
}

/// Instruction-family operations the dispatch tables can name.
///
/// Dispatch goes through one `match` over this enum instead of through raw
/// function pointers, so the table stays plain `const` data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Mov,
    Lea,
    Movzx,
    Movsx,
    Cmov,
    Bswap,
    Add,
    Adc,
    Sub,
    Sbb,
    Cmp,
    Inc,
    Dec,
    Neg,
    Not,
    MulDiv,
    And,
    Or,
    Xor,
    Test,
    Rol,
    Ror,
    Rcl,
    Rcr,
    Shl,
    Shr,
    Sar,
    Shrd,
    Bt,
    Bts,
    Btc,
    Push,
    Pop,
    Pushfd,
    Popfd,
    Call,
    Jmp,
    Ret,
    Clc,
    Stc,
    Cmc,
    Cld,
    Std,
}

/// One dispatch-table row: opcode, optional required ModRM reg field, and
/// the operation to invoke.
struct DispatchEntry {
    opcode: u8,
    reg: Option<u8>,
    op: Op,
}

const fn ent(opcode: u8, op: Op) -> DispatchEntry {
    DispatchEntry {
        opcode,
        reg: None,
        op,
    }
}

const fn ext(opcode: u8, reg: u8, op: Op) -> DispatchEntry {
    DispatchEntry {
        opcode,
        reg: Some(reg),
        op,
    }
}

/// Single-byte opcode space.
#[rustfmt::skip]
const ONE_BYTE_TABLE: &[DispatchEntry] = &[
    ent(0x03, Op::Add),
    ent(0x0a, Op::Or),
    ent(0x0b, Op::Or),
    ent(0x13, Op::Adc),
    ent(0x1b, Op::Sbb),
    ent(0x23, Op::And),
    ent(0x2b, Op::Sub),
    ent(0x32, Op::Xor),
    ent(0x33, Op::Xor),
    ent(0x3a, Op::Cmp),
    ent(0x3b, Op::Cmp),
    ent(0x3c, Op::Cmp),
    ent(0x3d, Op::Cmp),
    ent(0x40, Op::Inc), ent(0x41, Op::Inc), ent(0x42, Op::Inc), ent(0x43, Op::Inc),
    ent(0x44, Op::Inc), ent(0x45, Op::Inc), ent(0x46, Op::Inc), ent(0x47, Op::Inc),
    ent(0x48, Op::Dec), ent(0x49, Op::Dec), ent(0x4a, Op::Dec), ent(0x4b, Op::Dec),
    ent(0x4c, Op::Dec), ent(0x4d, Op::Dec), ent(0x4e, Op::Dec), ent(0x4f, Op::Dec),
    ent(0x50, Op::Push), ent(0x51, Op::Push), ent(0x52, Op::Push), ent(0x53, Op::Push),
    ent(0x54, Op::Push), ent(0x55, Op::Push), ent(0x56, Op::Push), ent(0x57, Op::Push),
    ent(0x58, Op::Pop), ent(0x59, Op::Pop), ent(0x5a, Op::Pop), ent(0x5b, Op::Pop),
    ent(0x5c, Op::Pop), ent(0x5d, Op::Pop), ent(0x5e, Op::Pop), ent(0x5f, Op::Pop),
    ent(0x68, Op::Push),
    ent(0x6a, Op::Push),
    ext(0x80, 0, Op::Add), ext(0x80, 1, Op::Or),  ext(0x80, 2, Op::Adc), ext(0x80, 3, Op::Sbb),
    ext(0x80, 4, Op::And), ext(0x80, 5, Op::Sub), ext(0x80, 6, Op::Xor), ext(0x80, 7, Op::Cmp),
    ext(0x81, 0, Op::Add), ext(0x81, 1, Op::Or),  ext(0x81, 2, Op::Adc), ext(0x81, 3, Op::Sbb),
    ext(0x81, 4, Op::And), ext(0x81, 5, Op::Sub), ext(0x81, 6, Op::Xor), ext(0x81, 7, Op::Cmp),
    ext(0x83, 0, Op::Add), ext(0x83, 1, Op::Or),  ext(0x83, 2, Op::Adc), ext(0x83, 3, Op::Sbb),
    ext(0x83, 4, Op::And), ext(0x83, 5, Op::Sub), ext(0x83, 6, Op::Xor), ext(0x83, 7, Op::Cmp),
    ent(0x84, Op::Test),
    ent(0x85, Op::Test),
    ent(0x88, Op::Mov),
    ent(0x89, Op::Mov),
    ent(0x8a, Op::Mov),
    ent(0x8b, Op::Mov),
    ent(0x8d, Op::Lea),
    ent(0x9c, Op::Pushfd),
    ent(0x9d, Op::Popfd),
    ent(0xa8, Op::Test),
    ent(0xa9, Op::Test),
    ent(0xb0, Op::Mov), ent(0xb1, Op::Mov), ent(0xb2, Op::Mov), ent(0xb3, Op::Mov),
    ent(0xb4, Op::Mov), ent(0xb5, Op::Mov), ent(0xb6, Op::Mov), ent(0xb7, Op::Mov),
    ent(0xb8, Op::Mov), ent(0xb9, Op::Mov), ent(0xba, Op::Mov), ent(0xbb, Op::Mov),
    ent(0xbc, Op::Mov), ent(0xbd, Op::Mov), ent(0xbe, Op::Mov), ent(0xbf, Op::Mov),
    ext(0xc0, 0, Op::Rol), ext(0xc0, 1, Op::Ror), ext(0xc0, 2, Op::Rcl), ext(0xc0, 3, Op::Rcr),
    ext(0xc0, 4, Op::Shl), ext(0xc0, 5, Op::Shr), ext(0xc0, 6, Op::Shl), ext(0xc0, 7, Op::Sar),
    ext(0xc1, 0, Op::Rol), ext(0xc1, 1, Op::Ror), ext(0xc1, 2, Op::Rcl), ext(0xc1, 3, Op::Rcr),
    ext(0xc1, 4, Op::Shl), ext(0xc1, 5, Op::Shr), ext(0xc1, 6, Op::Shl), ext(0xc1, 7, Op::Sar),
    ent(0xc2, Op::Ret),
    ent(0xc3, Op::Ret),
    ext(0xc6, 0, Op::Mov),
    ext(0xc7, 0, Op::Mov),
    ext(0xd0, 0, Op::Rol), ext(0xd0, 1, Op::Ror), ext(0xd0, 2, Op::Rcl), ext(0xd0, 3, Op::Rcr),
    ext(0xd0, 4, Op::Shl), ext(0xd0, 5, Op::Shr), ext(0xd0, 6, Op::Shl), ext(0xd0, 7, Op::Sar),
    ext(0xd1, 0, Op::Rol), ext(0xd1, 1, Op::Ror), ext(0xd1, 2, Op::Rcl), ext(0xd1, 3, Op::Rcr),
    ext(0xd1, 4, Op::Shl), ext(0xd1, 5, Op::Shr), ext(0xd1, 6, Op::Shl), ext(0xd1, 7, Op::Sar),
    ext(0xd2, 0, Op::Rol), ext(0xd2, 1, Op::Ror), ext(0xd2, 2, Op::Rcl), ext(0xd2, 3, Op::Rcr),
    ext(0xd2, 4, Op::Shl), ext(0xd2, 5, Op::Shr), ext(0xd2, 6, Op::Shl), ext(0xd2, 7, Op::Sar),
    ext(0xd3, 0, Op::Rol), ext(0xd3, 1, Op::Ror), ext(0xd3, 2, Op::Rcl), ext(0xd3, 3, Op::Rcr),
    ext(0xd3, 4, Op::Shl), ext(0xd3, 5, Op::Shr), ext(0xd3, 6, Op::Shl), ext(0xd3, 7, Op::Sar),
    ent(0xe8, Op::Call),
    ent(0xe9, Op::Jmp),
    ent(0xeb, Op::Jmp),
    ent(0xf5, Op::Cmc),
    ext(0xf6, 0, Op::Test), ext(0xf6, 1, Op::Test),
    ext(0xf6, 2, Op::Not),  ext(0xf6, 3, Op::Neg),
    ext(0xf6, 4, Op::MulDiv), ext(0xf6, 5, Op::MulDiv),
    ext(0xf6, 6, Op::MulDiv), ext(0xf6, 7, Op::MulDiv),
    ext(0xf7, 0, Op::Test), ext(0xf7, 1, Op::Test),
    ext(0xf7, 2, Op::Not),  ext(0xf7, 3, Op::Neg),
    ext(0xf7, 4, Op::MulDiv), ext(0xf7, 5, Op::MulDiv),
    ext(0xf7, 6, Op::MulDiv), ext(0xf7, 7, Op::MulDiv),
    ent(0xf8, Op::Clc),
    ent(0xf9, Op::Stc),
    ent(0xfc, Op::Cld),
    ent(0xfd, Op::Std),
    ext(0xfe, 0, Op::Inc), ext(0xfe, 1, Op::Dec),
    ext(0xff, 0, Op::Inc), ext(0xff, 1, Op::Dec),
    ext(0xff, 2, Op::Call),
    ext(0xff, 4, Op::Jmp),
    ext(0xff, 6, Op::Push),
];

/// Two-byte (`0x0f`-escaped) opcode space.
#[rustfmt::skip]
const TWO_BYTE_TABLE: &[DispatchEntry] = &[
    ent(0x40, Op::Cmov), ent(0x41, Op::Cmov), ent(0x42, Op::Cmov), ent(0x43, Op::Cmov),
    ent(0x44, Op::Cmov), ent(0x45, Op::Cmov), ent(0x46, Op::Cmov), ent(0x47, Op::Cmov),
    ent(0x48, Op::Cmov), ent(0x49, Op::Cmov), ent(0x4a, Op::Cmov), ent(0x4b, Op::Cmov),
    ent(0x4c, Op::Cmov), ent(0x4d, Op::Cmov), ent(0x4e, Op::Cmov), ent(0x4f, Op::Cmov),
    ent(0xa3, Op::Bt),
    ent(0xab, Op::Bts),
    ent(0xac, Op::Shrd),
    ent(0xad, Op::Shrd),
    ent(0xb6, Op::Movzx),
    ent(0xb7, Op::Movzx),
    ext(0xba, 4, Op::Bt),
    ext(0xba, 5, Op::Bts),
    ext(0xba, 7, Op::Btc),
    ent(0xbb, Op::Btc),
    ent(0xbe, Op::Movsx),
    ent(0xbf, Op::Movsx),
    ent(0xc8, Op::Bswap), ent(0xc9, Op::Bswap), ent(0xca, Op::Bswap), ent(0xcb, Op::Bswap),
    ent(0xcc, Op::Bswap), ent(0xcd, Op::Bswap), ent(0xce, Op::Bswap), ent(0xcf, Op::Bswap),
];

/// Where a translated memory access lands.
#[derive(Debug, Clone, Copy)]
pub(crate) enum MemSlot {
    /// Offset into the attached image's byte buffer.
    Image(usize),
    /// Offset into the synthetic stack buffers.
    Stack(usize),
}

/// The partial-evaluation x86 engine.
///
/// One `Emulator` owns one machine state for its whole lifetime. Nothing in
/// it is shared or re-entrant: a [`Emulator::run`] call either completes one
/// instruction or fails without partial side effects.
///
/// # Examples
///
/// ```rust
/// use vmpeel::{Emulator, EmulatorConfig};
/// use vmpeel::emulation::{Gpr, OpSize};
///
/// let mut emu = Emulator::new(EmulatorConfig::default())?;
/// // mov eax, 0x1234
/// emu.run(0x40_1000, &[0xb8, 0x34, 0x12, 0x00, 0x00])?;
///
/// let eax = emu.reg(Gpr::Eax);
/// assert!(eax.is_known(OpSize::Dword));
/// assert_eq!(eax.get(OpSize::Dword), 0x1234);
/// # Ok::<(), vmpeel::Error>(())
/// ```
pub struct Emulator<'img> {
    pub(crate) regs: RegisterFile,
    pub(crate) eflags: Eflags,
    pub(crate) eip: KnownValue,
    pub(crate) stack: ShadowStack,
    pub(crate) stack_base: u32,
    pub(crate) image: Option<&'img mut dyn LoadedImage>,
    pub(crate) ctx: InstrContext,
}

impl<'img> Emulator<'img> {
    /// Creates an engine with no attached image; all memory traffic resolves
    /// into the synthetic stack window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`] if the stack buffers cannot be
    /// reserved.
    pub fn new(config: EmulatorConfig) -> Result<Emulator<'static>> {
        Emulator::build(config, None)
    }

    /// Creates an engine bound to a loaded image.
    ///
    /// The engine borrows the image for its lifetime and writes through into
    /// its buffer; it never frees or resizes it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`] if the stack buffers cannot be
    /// reserved.
    pub fn with_image(
        config: EmulatorConfig,
        image: &'img mut dyn LoadedImage,
    ) -> Result<Emulator<'img>> {
        Emulator::build(config, Some(image))
    }

    fn build(
        config: EmulatorConfig,
        image: Option<&'img mut dyn LoadedImage>,
    ) -> Result<Emulator<'img>> {
        let stack = ShadowStack::new(config.stack_size)?;
        let mut regs = RegisterFile::new();

        // Every register starts unknown except ESP: address computations
        // depend on a concrete stack pointer even under otherwise-unknown
        // analysis, so it begins fully known at the top of the stack window.
        #[allow(clippy::cast_possible_truncation)]
        let initial_esp = config.stack_base.wrapping_add(config.stack_size as u32);
        regs.write(Gpr::Esp, KnownValue::known(initial_esp));

        Ok(Emulator {
            regs,
            eflags: Eflags::new(),
            eip: KnownValue::UNKNOWN,
            stack,
            stack_base: config.stack_base,
            image,
            ctx: InstrContext {
                op_size: OpSize::Dword,
                va: 0,
                len: 0,
            },
        })
    }

    /// Executes exactly one instruction.
    ///
    /// `va` is the instruction's virtual address and `code` its complete byte
    /// encoding; the caller's length decoder owns the boundary decision.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedInstruction`] - no table entry for the opcode
    /// - [`Error::UnsupportedEncoding`] - unhandled sub-encoding
    /// - [`Error::TruncatedInstruction`] - `code` ends inside the encoding
    /// - [`Error::StackOverflow`] / [`Error::StackUnderflow`] - stack-family
    ///   instructions running off either end of the synthetic stack
    /// - [`Error::IndeterminateTarget`] - indirect control transfer through a
    ///   value that is not fully known
    pub fn run(&mut self, va: u32, code: &[u8]) -> Result<()> {
        self.ctx = InstrContext {
            op_size: OpSize::Dword,
            va,
            len: code.len(),
        };

        if code.is_empty() {
            return Err(Error::TruncatedInstruction { needed: 1, have: 0 });
        }

        // At most one prefix byte from the recognized set is consumed.
        let mut idx = 0;
        match code[0] {
            0x66 => {
                self.ctx.op_size = OpSize::Word;
                idx = 1;
            }
            0x67 | 0xf0 | 0xf2 | 0xf3 => idx = 1,
            _ => {}
        }

        let two_byte = code.get(idx) == Some(&0x0f);
        if two_byte {
            idx += 1;
        }
        let table = if two_byte {
            TWO_BYTE_TABLE
        } else {
            ONE_BYTE_TABLE
        };

        let code = &code[idx..];
        let opcode = *code.first().ok_or(Error::TruncatedInstruction {
            needed: 1,
            have: 0,
        })?;

        for entry in table {
            if entry.opcode != opcode {
                continue;
            }
            if let Some(required) = entry.reg {
                let modrm = *code.get(1).ok_or(Error::TruncatedInstruction {
                    needed: 2,
                    have: code.len(),
                })?;
                if (modrm >> 3) & 7 != required {
                    continue;
                }
            }
            return self.exec(entry.op, code);
        }

        Err(Error::UnsupportedInstruction { opcode, two_byte })
    }

    fn exec(&mut self, op: Op, code: &[u8]) -> Result<()> {
        match op {
            Op::Mov => self.op_mov(code),
            Op::Lea => self.op_lea(code),
            Op::Movzx => self.op_movzx(code),
            Op::Movsx => self.op_movsx(code),
            Op::Cmov => self.op_cmov(code),
            Op::Bswap => self.op_bswap(code),
            Op::Add | Op::Adc | Op::Sub | Op::Sbb | Op::Cmp => self.op_arith(op, code),
            Op::Inc => self.op_incdec(code, true),
            Op::Dec => self.op_incdec(code, false),
            Op::Neg => self.op_neg(code),
            Op::Not => self.op_not(code),
            Op::MulDiv => self.op_muldiv(code),
            Op::And | Op::Or | Op::Xor | Op::Test => self.op_logic(op, code),
            Op::Rol | Op::Ror | Op::Rcl | Op::Rcr | Op::Shl | Op::Shr | Op::Sar => {
                self.op_shift(op, code)
            }
            Op::Shrd => self.op_shrd(code),
            Op::Bt | Op::Bts | Op::Btc => self.op_bittest(op, code),
            Op::Push => self.op_push(code),
            Op::Pop => self.op_pop(code),
            Op::Pushfd => self.op_pushfd(code),
            Op::Popfd => self.op_popfd(code),
            Op::Call => self.op_call(code),
            Op::Jmp => self.op_jmp(code),
            Op::Ret => self.op_ret(code),
            Op::Clc => self.op_setcf(code, false),
            Op::Stc => self.op_setcf(code, true),
            Op::Cmc => self.op_cmc(code),
            Op::Cld => self.op_setdf(code, false),
            Op::Std => self.op_setdf(code, true),
        }
    }

    /// Reads a register's current value/mask pair.
    #[must_use]
    pub fn reg(&self, gpr: Gpr) -> KnownValue {
        self.regs.read(gpr)
    }

    /// Overrides a register's value/mask pair.
    ///
    /// Intended for drivers seeding analysis preconditions (e.g. a known
    /// virtual-machine context pointer).
    pub fn set_reg(&mut self, gpr: Gpr, value: KnownValue) {
        self.regs.write(gpr, value);
    }

    /// Reads a tracked flag: `Some(bit)` when known, `None` otherwise.
    #[must_use]
    pub fn flag(&self, flag: Flag) -> Option<bool> {
        self.eflags.get(flag)
    }

    /// Seeds a flag with a known value.
    pub fn set_flag(&mut self, flag: Flag, value: bool) {
        self.eflags.set(flag, value);
    }

    /// Downgrades a flag to unknown.
    pub fn forget_flag(&mut self, flag: Flag) {
        self.eflags.forget(flag);
    }

    /// The instruction pointer as last established by a control transfer.
    ///
    /// After a RET that popped a partially known return address, this is
    /// explicitly not fully known and the caller must treat the branch as
    /// unresolvable.
    #[must_use]
    pub fn eip(&self) -> KnownValue {
        self.eip
    }

    /// The synthetic stack, for callers inspecting analysis results.
    #[must_use]
    pub fn stack(&self) -> &ShadowStack {
        &self.stack
    }

    /// Virtual address of the stack window's low end.
    #[must_use]
    pub fn stack_base(&self) -> u32 {
        self.stack_base
    }

    // ---- memory translation -------------------------------------------------

    /// Resolves a virtual address to a backing slot for an access of `len`
    /// bytes: the attached image first, the stack window second.
    pub(crate) fn resolve(&self, va: u32, len: usize) -> Option<MemSlot> {
        if let Some(image) = &self.image {
            if let Some(offset) = image.va_to_file_offset(va) {
                if offset + len <= image.data().len() {
                    return Some(MemSlot::Image(offset));
                }
                return None;
            }
        }
        let offset = va.wrapping_sub(self.stack_base) as usize;
        if offset + len <= self.stack.size() {
            return Some(MemSlot::Stack(offset));
        }
        None
    }

    /// Materializes `size` bytes at `va` as a little-endian value/mask pair.
    ///
    /// Image bytes are fully known; stack bytes carry their shadow. `None`
    /// means the address maps to nothing the engine may touch.
    pub(crate) fn mem_read(&self, va: u32, size: OpSize) -> Option<(u32, u32)> {
        let n = size.bytes();
        match self.resolve(va, n)? {
            MemSlot::Image(offset) => {
                let data = self.image.as_ref()?.data();
                let mut value = 0u32;
                for i in 0..n {
                    value |= u32::from(data[offset + i]) << (8 * i);
                }
                Some((value, size.mask()))
            }
            MemSlot::Stack(offset) => {
                let mut value = 0u32;
                let mut known = 0u32;
                for i in 0..n {
                    value |= u32::from(self.stack.data()[offset + i]) << (8 * i);
                    known |= u32::from(self.stack.known()[offset + i]) << (8 * i);
                }
                Some((value, known))
            }
        }
    }

    /// Stores `size` bytes at `va`.
    ///
    /// Stack stores update both buffers; image stores write through the data
    /// bytes (the image carries no known shadow). Unmapped addresses are a
    /// silent no-op - the caller has already decided the address is known,
    /// and an address outside every region has nothing to corrupt.
    pub(crate) fn mem_write(&mut self, va: u32, size: OpSize, value: u32, known: u32) {
        let n = size.bytes();
        match self.resolve(va, n) {
            Some(MemSlot::Image(offset)) => {
                if let Some(image) = self.image.as_mut() {
                    let data = image.data_mut();
                    for i in 0..n {
                        data[offset + i] = (value >> (8 * i)) as u8;
                    }
                }
            }
            Some(MemSlot::Stack(offset)) => {
                for i in 0..n {
                    self.stack.data_mut()[offset + i] = (value >> (8 * i)) as u8;
                    self.stack.known_mut()[offset + i] = (known >> (8 * i)) as u8;
                }
            }
            None => {}
        }
    }
}

impl fmt::Display for Emulator<'_> {
    /// Diagnostic dump: all registers as `known:value` pairs plus the flag
    /// image. Tracing aid only, not part of the functional contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.regs)?;
        write!(f, "EIP{}  {}", self.eip, self.eflags)
    }
}

/// Reads one byte of instruction encoding.
pub(crate) fn read_u8(code: &[u8], at: usize) -> Result<u8> {
    code.get(at).copied().ok_or(Error::TruncatedInstruction {
        needed: at + 1,
        have: code.len(),
    })
}

/// Reads a little-endian 16-bit immediate.
pub(crate) fn read_u16(code: &[u8], at: usize) -> Result<u16> {
    if code.len() < at + 2 {
        return Err(Error::TruncatedInstruction {
            needed: at + 2,
            have: code.len(),
        });
    }
    Ok(u16::from_le_bytes([code[at], code[at + 1]]))
}

/// Reads a little-endian 32-bit immediate.
pub(crate) fn read_u32(code: &[u8], at: usize) -> Result<u32> {
    if code.len() < at + 4 {
        return Err(Error::TruncatedInstruction {
            needed: at + 4,
            have: code.len(),
        });
    }
    Ok(u32::from_le_bytes([
        code[at],
        code[at + 1],
        code[at + 2],
        code[at + 3],
    ]))
}
