use thiserror::Error;

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// This enum covers all failure modes of the emulation core: instruction decode
/// and dispatch, synthetic-stack discipline, control-flow resolution, and the
/// PE-image adapter. Each variant carries enough context for a caller to decide
/// whether the failure is a decoder gap, an analysis boundary, or a hard fault.
///
/// # Error Categories
///
/// ## Decode and Dispatch
/// - [`Error::UnsupportedInstruction`] - No dispatch-table entry matched the opcode
/// - [`Error::UnsupportedEncoding`] - The opcode matched but the sub-encoding is unhandled
/// - [`Error::TruncatedInstruction`] - The byte slice ends before the encoding does
///
/// ## Synthetic Stack
/// - [`Error::StackOverflow`] - A push ran past the low end of the stack buffer
/// - [`Error::StackUnderflow`] - A pop ran past the high end of the stack buffer
///
/// ## Control Flow
/// - [`Error::IndeterminateTarget`] - An indirect jump/call source is not fully known
///
/// ## Resources and I/O
/// - [`Error::AllocationFailed`] - Stack buffer reservation failed at engine creation
/// - [`Error::FileError`] - Filesystem I/O errors from the image loader
/// - [`Error::GoblinErr`] - PE parsing errors from the goblin crate
///
/// # Examples
///
/// ```rust
/// use vmpeel::{Emulator, EmulatorConfig, Error};
///
/// let mut emu = Emulator::new(EmulatorConfig::default())?;
/// match emu.run(0x40_1000, &[0x0f, 0x05]) {
///     Err(Error::UnsupportedInstruction { opcode, .. }) => {
///         eprintln!("decoder gap at opcode {opcode:#04x}");
///     }
///     other => other?,
/// }
/// # Ok::<(), vmpeel::Error>(())
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// No dispatch-table entry matched the instruction's opcode.
    ///
    /// The engine does not guess or skip: an unrecognized opcode stops
    /// processing of the current instruction without touching machine state.
    ///
    /// # Fields
    ///
    /// * `opcode` - The opcode byte that had no table entry
    /// * `two_byte` - Whether the opcode lives in the `0x0f` escape space
    #[error("unsupported instruction - opcode {opcode:#04x} (two-byte: {two_byte})")]
    UnsupportedInstruction {
        /// The opcode byte that had no table entry.
        opcode: u8,
        /// Whether the opcode was found in the two-byte (`0x0f`-escaped) space.
        two_byte: bool,
    },

    /// A recognized opcode with an unhandled operand combination.
    ///
    /// The dispatch table matched, but the specific ModRM/immediate
    /// sub-encoding inside the handler did not. Machine state is unchanged.
    #[error("unsupported encoding for opcode {opcode:#04x}")]
    UnsupportedEncoding {
        /// The opcode whose sub-encoding is unhandled.
        opcode: u8,
    },

    /// The instruction byte slice ended before the encoding did.
    ///
    /// The caller owns instruction boundaries (via an external length
    /// decoder); this error signals a disagreement between that decoder and
    /// the bytes actually supplied.
    #[error("instruction truncated - needed {needed} bytes, have {have}")]
    TruncatedInstruction {
        /// Bytes the encoding requires from the opcode onward.
        needed: usize,
        /// Bytes actually available.
        have: usize,
    },

    /// A push ran past the low end of the synthetic stack buffer.
    ///
    /// The stack is allocated once at engine creation and never resized;
    /// exceeding its capacity is fatal for the current analysis run.
    #[error("synthetic stack overflow - push of {requested} bytes with {available} available")]
    StackOverflow {
        /// Bytes the push required.
        requested: usize,
        /// Bytes remaining below the current stack top.
        available: usize,
    },

    /// A pop ran past the high end of the synthetic stack buffer.
    #[error("synthetic stack underflow - pop of {requested} bytes with {available} on the stack")]
    StackUnderflow {
        /// Bytes the pop required.
        requested: usize,
        /// Bytes actually held on the stack.
        available: usize,
    },

    /// A register-indirect jump, call, or similar transfer has a source whose
    /// value is not fully known.
    ///
    /// This is an analysis limitation, not a decoder gap: the caller may
    /// treat it as having reached the boundary of what static knowledge can
    /// resolve rather than as a hard failure.
    #[error("indeterminate control-flow target - source operand is not fully known")]
    IndeterminateTarget,

    /// Stack buffer reservation failed at engine creation.
    #[error("failed to allocate {requested} bytes for the synthetic stack")]
    AllocationFailed {
        /// Bytes requested for the stack buffers.
        requested: usize,
    },

    /// File I/O error.
    ///
    /// Wraps standard I/O errors raised while loading a PE image from disk.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Error from the goblin crate during PE parsing.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),
}

/// Result alias used throughout vmpeel.
pub type Result<T> = std::result::Result<T, Error>;
