//! General-purpose register file with known-bit shadows.
//!
//! The eight 32-bit architectural registers each hold a [`KnownValue`].
//! ModRM register selectors are 3-bit fields decoded straight into [`Gpr`];
//! byte-form instructions use the x86 byte-register table instead, where
//! selectors 0..4 name the low byte of EAX/ECX/EDX/EBX and selectors 4..8
//! name the high byte of the same four registers.
//!
//! All sub-width access goes through [`KnownValue`]'s accessors: writing AX
//! or AH can never disturb bits outside the addressed alias.

use std::fmt;

use strum::{Display, EnumIter, FromRepr};

use crate::emulation::value::{ByteHalf, KnownValue, OpSize};

/// x86 general-purpose register, in ModRM encoding order.
///
/// The discriminants match the 3-bit `reg`/`rm` field values, so decoding a
/// selector is a plain [`Gpr::from_repr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, Display, EnumIter)]
#[strum(serialize_all = "UPPERCASE")]
#[repr(u8)]
pub enum Gpr {
    /// Accumulator.
    Eax = 0,
    /// Counter; CL supplies variable shift counts.
    Ecx = 1,
    /// Data register.
    Edx = 2,
    /// Base register.
    Ebx = 3,
    /// Stack pointer; kept numerically consistent with the synthetic stack.
    Esp = 4,
    /// Frame base pointer.
    Ebp = 5,
    /// Source index.
    Esi = 6,
    /// Destination index.
    Edi = 7,
}

impl Gpr {
    /// Decodes a 3-bit ModRM selector.
    ///
    /// # Panics
    ///
    /// Panics if `sel > 7`; selectors come from 3-bit fields, so wider values
    /// indicate a decoder bug, not malformed input.
    #[must_use]
    pub fn from_selector(sel: u8) -> Gpr {
        debug_assert!(sel < 8, "register selector out of range: {sel}");
        Gpr::from_repr(sel & 7).expect("3-bit selector always decodes")
    }
}

/// Decodes a 3-bit byte-register selector into its backing register and half.
///
/// Selector 0..4 is AL/CL/DL/BL, selector 4..8 is AH/CH/DH/BH; both ranges
/// alias the low word of EAX/ECX/EDX/EBX.
#[must_use]
pub fn byte_register(sel: u8) -> (Gpr, ByteHalf) {
    debug_assert!(sel < 8, "byte-register selector out of range: {sel}");
    let gpr = Gpr::from_selector(sel & 3);
    let half = if sel < 4 { ByteHalf::Low } else { ByteHalf::High };
    (gpr, half)
}

/// The eight-entry register file.
///
/// Freshly created registers are entirely unknown except ESP, which the
/// engine initializes to the synthetic stack top: address computations lean
/// on a concrete stack pointer even when everything else is opaque.
#[derive(Debug, Clone, Default)]
pub struct RegisterFile {
    regs: [KnownValue; 8],
}

impl RegisterFile {
    /// Creates a register file with every register unknown.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a register's current value/mask pair.
    #[must_use]
    pub fn read(&self, gpr: Gpr) -> KnownValue {
        self.regs[gpr as usize]
    }

    /// Replaces a register's value/mask pair wholesale.
    pub fn write(&mut self, gpr: Gpr, value: KnownValue) {
        self.regs[gpr as usize] = value;
    }

    /// Mutable access to one register.
    pub fn get_mut(&mut self, gpr: Gpr) -> &mut KnownValue {
        &mut self.regs[gpr as usize]
    }

    /// Reads a register at the given width, returning `(payload, known)` both
    /// truncated to the width.
    #[must_use]
    pub fn read_sized(&self, gpr: Gpr, size: OpSize) -> (u32, u32) {
        let r = self.read(gpr);
        (r.get(size), r.known_bits(size))
    }

    /// Writes a fully known value at the given width.
    pub fn write_sized(&mut self, gpr: Gpr, size: OpSize, value: u32) {
        self.get_mut(gpr).set(size, value);
    }

    /// Reads a byte register by ModRM selector.
    #[must_use]
    pub fn read_byte(&self, sel: u8) -> (u8, u8) {
        let (gpr, half) = byte_register(sel);
        let r = self.read(gpr);
        (r.byte(half), r.byte_known(half))
    }

    /// Writes a byte register by ModRM selector.
    pub fn write_byte(&mut self, sel: u8, value: u8, known: u8) {
        let (gpr, half) = byte_register(sel);
        self.get_mut(gpr).set_byte_masked(half, value, known);
    }
}

impl fmt::Display for RegisterFile {
    /// Renders all eight registers as `NAME[known:value]` pairs, four per
    /// line, for diagnostic traces.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use strum::IntoEnumIterator;
        for (i, gpr) in Gpr::iter().enumerate() {
            let sep = match i {
                0 => "",
                4 => "\n",
                _ => ", ",
            };
            write!(f, "{sep}{gpr}{}", self.read(gpr))?;
        }
        Ok(())
    }
}
