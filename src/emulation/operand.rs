//! ModRM/SIB operand decoding with partially known effective addresses.
//!
//! x86 encodes one register-or-memory operand per instruction through a ModRM
//! byte, optionally followed by a SIB byte and an 8- or 32-bit displacement.
//! This decoder turns those bytes into an [`Operand`] descriptor:
//!
//! - `mod` 00/01/10 produce a memory operand whose effective address is
//!   computed from base/index registers and displacement. Because those
//!   registers may themselves be partially unknown, the address carries its
//!   own known mask: the AND of every contributing register's mask, with
//!   displacement-only addresses fully known.
//! - `mod` 11 produces a register operand carrying a snapshot of the selected
//!   register's current contents. Handlers write back explicitly; the
//!   snapshot is a copy, never a live alias.
//!
//! Memory operands never cache a value. A handler that wants the addressed
//! bytes materializes them through the engine's address translation, which is
//! the single choke point for all memory access.
//!
//! The ModRM encoding space is closed: every `mod`/`rm`/SIB combination maps
//! to exactly one shape below, so decoding matches exhaustively and the only
//! runtime failure is running out of bytes.

use crate::{
    emulation::{
        registers::{byte_register, Gpr, RegisterFile},
        value::{ByteHalf, KnownValue, OpSize},
    },
    Error, Result,
};

/// The three fields of a ModRM byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModRm {
    /// Addressing mode, bits 7..6.
    pub mode: u8,
    /// Register / opcode-extension field, bits 5..3.
    pub reg: u8,
    /// Register-or-memory field, bits 2..0.
    pub rm: u8,
}

impl ModRm {
    /// Splits a raw ModRM byte into its fields.
    #[must_use]
    pub const fn parse(byte: u8) -> ModRm {
        ModRm {
            mode: byte >> 6,
            reg: (byte >> 3) & 7,
            rm: byte & 7,
        }
    }
}

/// The register named by a `mod`=11 operand, resolved for the operand width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegView {
    /// A 16/32-bit view of a general-purpose register.
    Full(Gpr),
    /// An 8-bit view per the byte-register table.
    Byte(Gpr, ByteHalf),
}

/// A computed memory operand: effective address plus its known mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemOperand {
    /// The 32-bit effective address (don't-care bits where `known` is clear).
    pub addr: u32,
    /// Known mask for `addr`; only a fully known address may be dereferenced.
    pub known: u32,
}

impl MemOperand {
    /// Whether every address bit is statically determined.
    #[must_use]
    pub const fn is_known(&self) -> bool {
        self.known == u32::MAX
    }
}

/// A decoded ModRM operand.
#[derive(Debug, Clone, Copy)]
pub enum Operand {
    /// Register operand with a snapshot of the register's current contents.
    Register {
        /// Which register view the `rm` field selects at the operand width.
        view: RegView,
        /// Copy of the backing 32-bit container at decode time.
        snapshot: KnownValue,
    },
    /// Memory operand with a computed, possibly partially known address.
    Memory(MemOperand),
}

/// Decoder output: the operand, the raw ModRM fields, and how many bytes
/// (ModRM + SIB + displacement) were consumed.
#[derive(Debug, Clone, Copy)]
pub struct DecodedOperand {
    /// The decoded operand descriptor.
    pub operand: Operand,
    /// ModRM fields, for handlers that also consume the `reg` selector.
    pub modrm: ModRm,
    /// Bytes consumed starting at the ModRM byte; immediates follow here.
    pub consumed: usize,
}

fn need(code: &[u8], needed: usize) -> Result<()> {
    if code.len() < needed {
        return Err(Error::TruncatedInstruction {
            needed,
            have: code.len(),
        });
    }
    Ok(())
}

fn read_u32(code: &[u8], at: usize) -> Result<u32> {
    need(code, at + 4)?;
    Ok(u32::from_le_bytes([
        code[at],
        code[at + 1],
        code[at + 2],
        code[at + 3],
    ]))
}

fn read_disp8(code: &[u8], at: usize) -> Result<u32> {
    need(code, at + 1)?;
    Ok(code[at] as i8 as i32 as u32)
}

/// Scale/index/base contribution of a SIB byte.
///
/// Returns `(address part, known mask, displacement consumed here)`; under
/// `mod`=00 a base field of 101 replaces the base register with a trailing
/// disp32.
fn decode_sib(
    regs: &RegisterFile,
    mode: u8,
    sib: u8,
    code: &[u8],
    disp_at: usize,
) -> Result<(u32, u32, usize)> {
    let scale = sib >> 6;
    let index = (sib >> 3) & 7;
    let base = sib & 7;

    let (mut addr, mut known, extra) = if mode == 0b00 && base == 0b101 {
        (read_u32(code, disp_at)?, u32::MAX, 4)
    } else {
        let r = regs.read(Gpr::from_selector(base));
        (r.raw(), r.known_mask(), 0)
    };

    if index != 0b100 {
        let r = regs.read(Gpr::from_selector(index));
        addr = addr.wrapping_add(r.raw() << scale);
        known &= r.known_mask();
    }

    Ok((addr, known, extra))
}

/// Decodes a ModRM operand starting at `code[0]`.
///
/// `size` resolves which register view a `mod`=11 operand names; the
/// effective-address computation itself is width-independent (addresses are
/// always 32-bit in this decoding mode).
///
/// # Errors
///
/// Returns [`Error::TruncatedInstruction`] when the slice ends inside the
/// encoding. No other failure exists: the field space is exhaustively
/// matched.
pub fn decode_modrm(regs: &RegisterFile, size: OpSize, code: &[u8]) -> Result<DecodedOperand> {
    need(code, 1)?;
    let modrm = ModRm::parse(code[0]);

    let (operand, consumed) = match modrm.mode {
        0b00 => match modrm.rm {
            // Absolute disp32, no base register.
            0b101 => {
                let addr = read_u32(code, 1)?;
                (
                    Operand::Memory(MemOperand {
                        addr,
                        known: u32::MAX,
                    }),
                    5,
                )
            }
            // SIB follows; no displacement unless base=101.
            0b100 => {
                need(code, 2)?;
                let (addr, known, extra) = decode_sib(regs, modrm.mode, code[1], code, 2)?;
                (Operand::Memory(MemOperand { addr, known }), 2 + extra)
            }
            _ => {
                let r = regs.read(Gpr::from_selector(modrm.rm));
                (
                    Operand::Memory(MemOperand {
                        addr: r.raw(),
                        known: r.known_mask(),
                    }),
                    1,
                )
            }
        },

        mode @ (0b01 | 0b10) => {
            let (base_addr, base_known, disp_at, mut consumed) = if modrm.rm == 0b100 {
                need(code, 2)?;
                let (addr, known, _) = decode_sib(regs, mode, code[1], code, 2)?;
                (addr, known, 2, 2)
            } else {
                let r = regs.read(Gpr::from_selector(modrm.rm));
                (r.raw(), r.known_mask(), 1, 1)
            };

            let disp = if mode == 0b01 {
                consumed += 1;
                read_disp8(code, disp_at)?
            } else {
                consumed += 4;
                read_u32(code, disp_at)?
            };

            (
                Operand::Memory(MemOperand {
                    addr: base_addr.wrapping_add(disp),
                    known: base_known,
                }),
                consumed,
            )
        }

        // mod = 11: direct register operand.
        _ => {
            let view = match size {
                OpSize::Byte => {
                    let (gpr, half) = byte_register(modrm.rm);
                    RegView::Byte(gpr, half)
                }
                _ => RegView::Full(Gpr::from_selector(modrm.rm)),
            };
            let snapshot = match view {
                RegView::Full(gpr) | RegView::Byte(gpr, _) => regs.read(gpr),
            };
            (Operand::Register { view, snapshot }, 1)
        }
    };

    Ok(DecodedOperand {
        operand,
        modrm,
        consumed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regs_with(entries: &[(Gpr, KnownValue)]) -> RegisterFile {
        let mut regs = RegisterFile::new();
        for (gpr, value) in entries {
            regs.write(*gpr, *value);
        }
        regs
    }

    fn mem(decoded: &DecodedOperand) -> MemOperand {
        match decoded.operand {
            Operand::Memory(m) => m,
            Operand::Register { .. } => panic!("expected memory operand"),
        }
    }

    #[test]
    fn absolute_disp32_is_fully_known() {
        let regs = RegisterFile::new();
        // [0x00403000]
        let code = [0x05, 0x00, 0x30, 0x40, 0x00];
        let d = decode_modrm(&regs, OpSize::Dword, &code).unwrap();
        let m = mem(&d);
        assert_eq!(m.addr, 0x0040_3000);
        assert!(m.is_known());
        assert_eq!(d.consumed, 5);
    }

    #[test]
    fn base_plus_disp8_sign_extends() {
        let regs = regs_with(&[(Gpr::Ebp, KnownValue::known(0x1000))]);
        // [ebp - 4]
        let code = [0x45, 0xfc];
        let d = decode_modrm(&regs, OpSize::Dword, &code).unwrap();
        let m = mem(&d);
        assert_eq!(m.addr, 0x0ffc);
        assert!(m.is_known());
        assert_eq!(d.consumed, 2);
    }

    #[test]
    fn unknown_contributor_poisons_the_address() {
        // [ebx + esi*4 + 8] with ESI entirely unknown.
        let regs = regs_with(&[(Gpr::Ebx, KnownValue::known(0x2000))]);
        let code = [0x44, 0xb3, 0x08];
        let d = decode_modrm(&regs, OpSize::Dword, &code).unwrap();
        let m = mem(&d);
        assert_eq!(m.known, 0);
        assert!(!m.is_known());
        assert_eq!(d.consumed, 3);
    }

    #[test]
    fn sib_scales_the_index() {
        let regs = regs_with(&[
            (Gpr::Ebx, KnownValue::known(0x1000)),
            (Gpr::Ecx, KnownValue::known(0x10)),
        ]);
        // [ebx + ecx*8]
        let code = [0x04, 0xcb];
        let d = decode_modrm(&regs, OpSize::Dword, &code).unwrap();
        let m = mem(&d);
        assert_eq!(m.addr, 0x1080);
        assert!(m.is_known());
        assert_eq!(d.consumed, 2);
    }

    #[test]
    fn sib_base_101_under_mod00_is_disp32_only() {
        let regs = regs_with(&[(Gpr::Edx, KnownValue::known(0x100))]);
        // [edx*2 + 0x5000], no base register.
        let code = [0x04, 0x55, 0x00, 0x50, 0x00, 0x00];
        let d = decode_modrm(&regs, OpSize::Dword, &code).unwrap();
        let m = mem(&d);
        assert_eq!(m.addr, 0x5200);
        assert!(m.is_known());
        assert_eq!(d.consumed, 6);
    }

    #[test]
    fn sib_index_100_means_no_index() {
        let regs = regs_with(&[(Gpr::Esp, KnownValue::known(0x9000))]);
        // [esp] encodes through SIB with index=100.
        let code = [0x04, 0x24];
        let d = decode_modrm(&regs, OpSize::Dword, &code).unwrap();
        let m = mem(&d);
        assert_eq!(m.addr, 0x9000);
        assert!(m.is_known());
    }

    #[test]
    fn mod11_snapshots_the_register() {
        let regs = regs_with(&[(Gpr::Esi, KnownValue::with_mask(0xdead, 0xffff))]);
        let code = [0xc6]; // mod=11, rm=esi
        let d = decode_modrm(&regs, OpSize::Dword, &code).unwrap();
        match d.operand {
            Operand::Register { view, snapshot } => {
                assert_eq!(view, RegView::Full(Gpr::Esi));
                assert_eq!(snapshot.get(OpSize::Word), 0xdead);
                assert!(!snapshot.is_known(OpSize::Dword));
            }
            Operand::Memory(_) => panic!("expected register operand"),
        }
    }

    #[test]
    fn mod11_byte_width_uses_the_byte_table() {
        let regs = RegisterFile::new();
        let code = [0xc5]; // mod=11, rm=5 -> CH at byte width
        let d = decode_modrm(&regs, OpSize::Byte, &code).unwrap();
        match d.operand {
            Operand::Register { view, .. } => {
                assert_eq!(view, RegView::Byte(Gpr::Ecx, ByteHalf::High));
            }
            Operand::Memory(_) => panic!("expected register operand"),
        }
    }

    #[test]
    fn truncated_encodings_are_reported() {
        let regs = RegisterFile::new();
        assert!(matches!(
            decode_modrm(&regs, OpSize::Dword, &[0x05, 0x00]),
            Err(Error::TruncatedInstruction { .. })
        ));
        assert!(matches!(
            decode_modrm(&regs, OpSize::Dword, &[0x84]),
            Err(Error::TruncatedInstruction { .. })
        ));
    }
}
