//! Partial-evaluation x86 emulation engine.
//!
//! This module is the semantic core of the deobfuscation pipeline: a 32-bit
//! x86 interpreter that executes one caller-delimited instruction at a time
//! against an abstract machine state, tracking for every bit of every
//! register, flag, and stack cell whether its value is statically known.
//! Virtualized and obfuscated code mixes constant bookkeeping (dispatch
//! tables, rolling keys, junk arithmetic) with genuinely input-dependent
//! computation; the known/unknown lattice is what lets the passes above this
//! engine fold the former and stop cleanly at the latter.
//!
//! # Architecture
//!
//! ```text
//! instruction bytes -> prefix/opcode classification -> table lookup
//!     -> ModRM/SIB operand decode -> semantic handler -> machine state
//! ```
//!
//! # Key Components
//!
//! ## Value Model
//! - [`KnownValue`] - 32-bit payload plus per-bit known mask
//! - [`OpSize`] / [`ByteHalf`] - width-parameterized access to sub-views
//!
//! ## Machine State
//! - [`RegisterFile`] / [`Gpr`] - the eight general-purpose registers
//! - [`Eflags`] / [`Flag`] / [`Condition`] - individually tracked flags and
//!   the condition-code evaluator built on them
//! - [`ShadowStack`] - synthetic stack with a parallel known-byte buffer
//!
//! ## Decode and Execute
//! - [`decode_modrm`] / [`Operand`] - ModRM/SIB decoding with partially
//!   known effective addresses
//! - [`Emulator`] / [`EmulatorConfig`] - the engine itself: dispatch tables,
//!   address translation, and the per-family semantic handlers
//!
//! # Example
//!
//! ```rust
//! use vmpeel::{Emulator, EmulatorConfig};
//! use vmpeel::emulation::{Flag, Gpr, OpSize};
//!
//! let mut emu = Emulator::new(EmulatorConfig::default())?;
//!
//! // xor ebx, ebx - a fully known zero even though EBX started unknown.
//! emu.run(0x40_1000, &[0x33, 0xdb])?;
//! assert_eq!(emu.reg(Gpr::Ebx).get(OpSize::Dword), 0);
//! assert!(emu.reg(Gpr::Ebx).is_known(OpSize::Dword));
//! assert_eq!(emu.flag(Flag::Zf), Some(true));
//!
//! // add ebx, ecx - ECX is unknown, so EBX degrades instead of guessing.
//! emu.run(0x40_1002, &[0x03, 0xd9])?;
//! assert!(!emu.reg(Gpr::Ebx).is_known(OpSize::Dword));
//! # Ok::<(), vmpeel::Error>(())
//! ```

mod engine;
mod flags;
mod operand;
mod registers;
mod stack;
mod value;

pub use engine::{Emulator, EmulatorConfig};
pub use flags::{Condition, Eflags, EflagsBits, Flag};
pub use operand::{decode_modrm, DecodedOperand, MemOperand, ModRm, Operand, RegView};
pub use registers::{byte_register, Gpr, RegisterFile};
pub use stack::ShadowStack;
pub use value::{ByteHalf, KnownValue, OpSize};
