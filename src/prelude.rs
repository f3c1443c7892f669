//! # vmpeel Prelude
//!
//! Convenient access to the types nearly every embedding needs. Import this
//! module to drive the emulator without spelling out the module tree.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all vmpeel operations
pub use crate::Error;

/// The result type used throughout vmpeel
pub use crate::Result;

// ================================================================================================
// Engine
// ================================================================================================

/// The partial-evaluation x86 engine and its configuration
pub use crate::emulation::{Emulator, EmulatorConfig};

// ================================================================================================
// Machine State
// ================================================================================================

/// Value model: known-bit tracked values and operand widths
pub use crate::emulation::{ByteHalf, KnownValue, OpSize};

/// Register and flag identities
pub use crate::emulation::{Condition, Flag, Gpr};

// ================================================================================================
// Image Collaborators
// ================================================================================================

/// Address-translation collaborators for image-backed memory
pub use crate::loader::{LoadedImage, NoImage, PeImage};
