//! Loaded-image collaborators for memory translation.
//!
//! The emulator never owns target memory. Every dereference that is not
//! stack-local is routed through a [`LoadedImage`], which maps a 32-bit
//! virtual address to an offset inside an externally managed byte buffer.
//! The engine borrows that buffer for reads and write-through, and releases
//! nothing on teardown.
//!
//! Two implementations ship with the crate:
//!
//! - [`PeImage`] - parses a PE section table with goblin and serves
//!   VA-to-file-offset translation over the raw file bytes, matching how the
//!   deobfuscation driver hands analysis targets to the engine.
//! - [`NoImage`] - a null collaborator for self-contained analysis; every
//!   translation misses, so all memory traffic lands in the synthetic stack
//!   window.

mod pe;

pub use pe::PeImage;

/// Address-translation collaborator consumed by the emulator.
///
/// Implementations expose a flat byte buffer plus a translation from virtual
/// addresses into it. Translation answering `None` means "not mine": the
/// engine then treats the address as synthetic stack space.
pub trait LoadedImage {
    /// Maps a virtual address to an offset into [`LoadedImage::data`].
    ///
    /// Returns `None` when the address lies outside every mapped region.
    fn va_to_file_offset(&self, va: u32) -> Option<usize>;

    /// The backing bytes, indexed by translated offsets.
    fn data(&self) -> &[u8];

    /// Mutable backing bytes, for emulated stores into the image.
    fn data_mut(&mut self) -> &mut [u8];
}

/// Null image: no mapped regions, no bytes.
///
/// Useful for unit tests and for analyzing code fragments that only touch
/// registers and the synthetic stack.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoImage;

impl LoadedImage for NoImage {
    fn va_to_file_offset(&self, _va: u32) -> Option<usize> {
        None
    }

    fn data(&self) -> &[u8] {
        &[]
    }

    fn data_mut(&mut self) -> &mut [u8] {
        &mut []
    }
}
