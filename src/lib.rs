#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]

//! # vmpeel
//!
//! A partial-evaluation x86 emulator core for deobfuscating and
//! devirtualizing protected 32-bit binaries. Built in pure Rust, `vmpeel`
//! decodes raw machine-code bytes one instruction at a time, maintains an
//! abstract machine state, and tracks per bit whether every register, flag,
//! and stack cell is *statically known* or *unknown* - the lattice that lets
//! a deobfuscation pipeline fold constant computation and eliminate dead
//! branches without running the target program.
//!
//! ## Features
//!
//! - **🧮 Bit-granular knowledge tracking** - every value carries a known
//!   mask; unknown data propagates conservatively instead of defaulting to
//!   zero
//! - **🔍 Faithful x86 semantics** - ModRM/SIB decoding, byte/word/dword
//!   operand widths, and architecturally correct flag side effects
//! - **🧱 Synthetic stack** - a shadowed stack buffer keeps PUSH/POP/CALL/RET
//!   analyzable, with loud overflow and underflow reporting
//! - **📦 PE image translation** - memory access resolves through a
//!   section-table adapter or any custom [`loader::LoadedImage`]
//! - **🛡️ No partial effects** - an instruction either applies fully or
//!   fails without corrupting machine state
//!
//! ## Quick Start
//!
//! ```rust
//! use vmpeel::prelude::*;
//!
//! let mut emu = Emulator::new(EmulatorConfig::default())?;
//!
//! // mov eax, 0x1234
//! emu.run(0x40_1000, &[0xb8, 0x34, 0x12, 0x00, 0x00])?;
//! assert_eq!(emu.reg(Gpr::Eax).get(OpSize::Dword), 0x1234);
//!
//! // push eax / pop ecx round-trips the value and its knowledge.
//! emu.run(0x40_1005, &[0x50])?;
//! emu.run(0x40_1006, &[0x59])?;
//! assert_eq!(emu.reg(Gpr::Ecx).get(OpSize::Dword), 0x1234);
//! # Ok::<(), vmpeel::Error>(())
//! ```
//!
//! ## Scope
//!
//! The crate covers the instruction-semantics engine only. Instruction
//! boundaries come from an external length decoder, PE loading beyond
//! VA-to-offset translation belongs to the embedding driver, and the
//! data-flow passes that consume the known/unknown results live above this
//! crate. x87/SSE/MMX decoding and 64-bit operand modes are out of scope.

pub(crate) mod error;

pub mod emulation;
pub mod loader;
pub mod prelude;

pub use emulation::{Emulator, EmulatorConfig};
pub use error::{Error, Result};
