//! Synthetic stack with a parallel known-byte shadow.
//!
//! The emulator does not execute inside the target process, so PUSH/POP/CALL/
//! RET operate on a private buffer pair: one buffer for data bytes, one of
//! identical shape recording per byte whether the data is statically known.
//! Both grow downward from the high end, mirroring real stack behavior, with
//! `top` as the byte offset of the current stack pointer.
//!
//! Capacity is fixed at creation. Pushing past the low end and popping past
//! the high end are distinct, loudly reported errors; the buffers are never
//! silently resized or clamped.

use crate::{Error, Result};

/// Fixed-size downward-growing stack with per-byte known tracking.
///
/// Invariant: `0 <= top <= size`, where `top == size` is the empty stack.
#[derive(Debug)]
pub struct ShadowStack {
    data: Vec<u8>,
    known: Vec<u8>,
    top: usize,
}

impl ShadowStack {
    /// Allocates both buffers at the given capacity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`] if either reservation fails;
    /// engine creation surfaces this instead of aborting.
    pub fn new(size: usize) -> Result<Self> {
        let mut data = Vec::new();
        let mut known = Vec::new();
        data.try_reserve_exact(size)
            .and_then(|()| known.try_reserve_exact(size))
            .map_err(|_| Error::AllocationFailed { requested: size })?;
        data.resize(size, 0);
        known.resize(size, 0);
        Ok(ShadowStack { data, known, top: size })
    }

    /// Total capacity in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Current top-of-stack offset from the buffer base.
    #[must_use]
    pub fn top(&self) -> usize {
        self.top
    }

    /// Bytes currently held on the stack.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.size() - self.top
    }

    /// The data buffer, for window-addressed memory access.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable data buffer.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The known shadow, parallel to [`ShadowStack::data`].
    #[must_use]
    pub fn known(&self) -> &[u8] {
        &self.known
    }

    /// Mutable known shadow.
    pub fn known_mut(&mut self) -> &mut [u8] {
        &mut self.known
    }

    /// Pushes `data`/`known` byte pairs, moving `top` down by their length.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StackOverflow`] when fewer than `data.len()` bytes
    /// remain below the current top. The stack is unchanged on error.
    ///
    /// # Panics
    ///
    /// Panics if `data` and `known` disagree in length; the two shadows are
    /// always written in lockstep.
    pub fn push(&mut self, data: &[u8], known: &[u8]) -> Result<()> {
        assert_eq!(data.len(), known.len(), "data/known shadows out of step");
        let len = data.len();
        if len > self.top {
            return Err(Error::StackOverflow {
                requested: len,
                available: self.top,
            });
        }
        let base = self.top - len;
        self.data[base..self.top].copy_from_slice(data);
        self.known[base..self.top].copy_from_slice(known);
        self.top = base;
        Ok(())
    }

    /// Pops into `data`/`known` buffers, moving `top` up by their length.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StackUnderflow`] when the stack holds fewer bytes
    /// than requested. The stack is unchanged on error.
    ///
    /// # Panics
    ///
    /// Panics if `data` and `known` disagree in length.
    pub fn pop(&mut self, data: &mut [u8], known: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), known.len(), "data/known shadows out of step");
        let len = data.len();
        if self.top + len > self.size() {
            return Err(Error::StackUnderflow {
                requested: len,
                available: self.depth(),
            });
        }
        data.copy_from_slice(&self.data[self.top..self.top + len]);
        known.copy_from_slice(&self.known[self.top..self.top + len]);
        self.top += len;
        Ok(())
    }

    /// Re-bases the top from the stack pointer register.
    ///
    /// ESP is the source of truth for where the stack lives - code moves it
    /// directly (`mov esp, ...`, `add esp, 8`) without going through push or
    /// pop. Callers bound-check before re-basing.
    pub fn set_top(&mut self, top: usize) {
        debug_assert!(top <= self.size(), "stack top out of range: {top}");
        self.top = top;
    }

    /// Releases `len` bytes without reading them (RET imm16).
    ///
    /// # Errors
    ///
    /// Returns [`Error::StackUnderflow`] when fewer than `len` bytes are on
    /// the stack.
    pub fn release(&mut self, len: usize) -> Result<()> {
        if self.top + len > self.size() {
            return Err(Error::StackUnderflow {
                requested: len,
                available: self.depth(),
            });
        }
        self.top += len;
        Ok(())
    }
}
