//! EFLAGS modeling with per-flag known/unknown tracking.
//!
//! Each status flag is tracked individually: the flag image holds the bit
//! values, a parallel image of the same shape records which of those bits are
//! statically determined. Reading an unknown flag yields `None`, never a
//! guessed zero - any computation that consumes an unknown flag must itself
//! degrade to unknown.
//!
//! The condition-code evaluator for CMOVcc lives here too, since conditions
//! are pure functions of tracked flags: a condition is `Some(bool)` only when
//! every flag it references is known.

use std::fmt;

use bitflags::bitflags;
use strum::Display;

bitflags! {
    /// EFLAGS bit positions for the flags this engine models.
    ///
    /// Bit 1 is the architecturally reserved always-one bit; it is part of
    /// the image so PUSHFD serializes a faithful picture.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EflagsBits: u32 {
        /// Carry flag.
        const CF = 1 << 0;
        /// Reserved, reads as 1.
        const RESERVED1 = 1 << 1;
        /// Parity flag (even parity of the result's low byte).
        const PF = 1 << 2;
        /// Auxiliary carry flag (carry out of bit 3).
        const AF = 1 << 4;
        /// Zero flag.
        const ZF = 1 << 6;
        /// Sign flag.
        const SF = 1 << 7;
        /// Trap flag.
        const TF = 1 << 8;
        /// Interrupt-enable flag.
        const IF = 1 << 9;
        /// Direction flag.
        const DF = 1 << 10;
        /// Overflow flag.
        const OF = 1 << 11;
    }
}

/// Identity of a single tracked flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Flag {
    /// Carry.
    Cf,
    /// Parity.
    Pf,
    /// Auxiliary carry.
    Af,
    /// Zero.
    Zf,
    /// Sign.
    Sf,
    /// Trap.
    Tf,
    /// Interrupt enable.
    If,
    /// Direction.
    Df,
    /// Overflow.
    Of,
}

impl Flag {
    /// The EFLAGS bit backing this flag.
    #[must_use]
    pub const fn bit(self) -> EflagsBits {
        match self {
            Flag::Cf => EflagsBits::CF,
            Flag::Pf => EflagsBits::PF,
            Flag::Af => EflagsBits::AF,
            Flag::Zf => EflagsBits::ZF,
            Flag::Sf => EflagsBits::SF,
            Flag::Tf => EflagsBits::TF,
            Flag::If => EflagsBits::IF,
            Flag::Df => EflagsBits::DF,
            Flag::Of => EflagsBits::OF,
        }
    }
}

/// x86 condition codes as encoded in the low nibble of `0x0f 0x4x` (CMOVcc).
///
/// Each condition is a boolean function over CF/ZF/SF/OF/PF; evaluation
/// against tracked flags returns `None` whenever a referenced flag is
/// unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// Overflow (OF=1).
    O,
    /// Not overflow.
    No,
    /// Below, unsigned (CF=1).
    B,
    /// Above or equal, unsigned.
    Ae,
    /// Equal (ZF=1).
    E,
    /// Not equal.
    Ne,
    /// Below or equal, unsigned (CF or ZF).
    Be,
    /// Above, unsigned.
    A,
    /// Sign (SF=1).
    S,
    /// Not sign.
    Ns,
    /// Parity even (PF=1).
    P,
    /// Parity odd.
    Np,
    /// Less, signed (SF != OF).
    L,
    /// Greater or equal, signed.
    Ge,
    /// Less or equal, signed (ZF or SF != OF).
    Le,
    /// Greater, signed.
    G,
}

impl Condition {
    /// Decodes the low nibble of a `0x0f 0x40..0x4f` opcode.
    #[must_use]
    pub const fn from_nibble(cc: u8) -> Condition {
        match cc & 0xf {
            0x0 => Condition::O,
            0x1 => Condition::No,
            0x2 => Condition::B,
            0x3 => Condition::Ae,
            0x4 => Condition::E,
            0x5 => Condition::Ne,
            0x6 => Condition::Be,
            0x7 => Condition::A,
            0x8 => Condition::S,
            0x9 => Condition::Ns,
            0xa => Condition::P,
            0xb => Condition::Np,
            0xc => Condition::L,
            0xd => Condition::Ge,
            0xe => Condition::Le,
            _ => Condition::G,
        }
    }
}

/// The tracked flags register: value image plus known image.
#[derive(Debug, Clone, Copy)]
pub struct Eflags {
    value: EflagsBits,
    known: EflagsBits,
}

impl Default for Eflags {
    fn default() -> Self {
        Self::new()
    }
}

impl Eflags {
    /// Creates a flags register with every status flag unknown.
    ///
    /// The reserved always-one bit is the single known bit of a fresh image.
    #[must_use]
    pub fn new() -> Self {
        Eflags {
            value: EflagsBits::RESERVED1,
            known: EflagsBits::RESERVED1,
        }
    }

    /// Reads a flag: `Some(bit)` when tracked as known, `None` otherwise.
    #[must_use]
    pub fn get(&self, flag: Flag) -> Option<bool> {
        if self.known.contains(flag.bit()) {
            Some(self.value.contains(flag.bit()))
        } else {
            None
        }
    }

    /// Sets a flag to a known value.
    pub fn set(&mut self, flag: Flag, value: bool) {
        self.value.set(flag.bit(), value);
        self.known.insert(flag.bit());
    }

    /// Downgrades a flag to unknown.
    pub fn forget(&mut self, flag: Flag) {
        self.known.remove(flag.bit());
    }

    /// The raw `(value, known)` bit images, as pushed by PUSHFD.
    #[must_use]
    pub fn image(&self) -> (u32, u32) {
        (self.value.bits(), self.known.bits())
    }

    /// Replaces the flag images from a popped `(value, known)` pair,
    /// discarding bits outside the modeled set.
    pub fn load_image(&mut self, value: u32, known: u32) {
        self.value = EflagsBits::from_bits_truncate(value) | EflagsBits::RESERVED1;
        self.known = EflagsBits::from_bits_truncate(known) | EflagsBits::RESERVED1;
    }

    /// Evaluates a condition code against the tracked flags.
    ///
    /// Returns `None` as soon as any referenced flag is unknown; short-
    /// circuit simplifications (e.g. CF known-set deciding `Be` without ZF)
    /// are intentionally not applied, keeping the rule easy to reason about.
    #[must_use]
    pub fn eval(&self, cond: Condition) -> Option<bool> {
        match cond {
            Condition::O => self.get(Flag::Of),
            Condition::No => self.get(Flag::Of).map(|of| !of),
            Condition::B => self.get(Flag::Cf),
            Condition::Ae => self.get(Flag::Cf).map(|cf| !cf),
            Condition::E => self.get(Flag::Zf),
            Condition::Ne => self.get(Flag::Zf).map(|zf| !zf),
            Condition::Be => Some(self.get(Flag::Cf)? || self.get(Flag::Zf)?),
            Condition::A => Some(!self.get(Flag::Cf)? && !self.get(Flag::Zf)?),
            Condition::S => self.get(Flag::Sf),
            Condition::Ns => self.get(Flag::Sf).map(|sf| !sf),
            Condition::P => self.get(Flag::Pf),
            Condition::Np => self.get(Flag::Pf).map(|pf| !pf),
            Condition::L => Some(self.get(Flag::Sf)? != self.get(Flag::Of)?),
            Condition::Ge => Some(self.get(Flag::Sf)? == self.get(Flag::Of)?),
            Condition::Le => Some(self.get(Flag::Zf)? || self.get(Flag::Sf)? != self.get(Flag::Of)?),
            Condition::G => Some(!self.get(Flag::Zf)? && self.get(Flag::Sf)? == self.get(Flag::Of)?),
        }
    }
}

impl fmt::Display for Eflags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SHOWN: [Flag; 9] = [
            Flag::Cf,
            Flag::Pf,
            Flag::Af,
            Flag::Zf,
            Flag::Sf,
            Flag::Tf,
            Flag::If,
            Flag::Df,
            Flag::Of,
        ];
        for (i, flag) in SHOWN.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            match self.get(*flag) {
                Some(true) => write!(f, "{flag}=1")?,
                Some(false) => write!(f, "{flag}=0")?,
                None => write!(f, "{flag}=?")?,
            }
        }
        Ok(())
    }
}
