//! PE-file image backend.
//!
//! Parses just enough of a PE executable - the image base and the section
//! table - to answer virtual-address-to-file-offset queries against the raw
//! file bytes. Parsing uses goblin; file loading goes through a memory map
//! that is copied into an owned buffer, since emulated stores write through
//! into image memory and must never touch the file on disk.
//!
//! This deliberately is not a full loader: no relocations, no imports, no
//! header validation beyond what goblin enforces. The emulator only ever
//! asks "which file bytes back this VA".

use std::{fs::File, path::Path};

use goblin::pe::PE;
use memmap2::Mmap;

use crate::{loader::LoadedImage, Result};

/// One mapped section: the VA range it occupies and the raw bytes backing it.
#[derive(Debug, Clone, Copy)]
struct SectionMap {
    va: u32,
    vsize: u32,
    raw_offset: usize,
    raw_size: usize,
}

/// A PE executable opened for emulation.
///
/// Owns a private copy of the file bytes; emulated stores mutate the copy,
/// never the file.
///
/// # Examples
///
/// ```rust,no_run
/// use vmpeel::loader::{LoadedImage, PeImage};
///
/// let image = PeImage::from_file("target.exe".as_ref())?;
/// let entry_off = image.va_to_file_offset(0x0040_1000);
/// # Ok::<(), vmpeel::Error>(())
/// ```
#[derive(Debug)]
pub struct PeImage {
    data: Vec<u8>,
    image_base: u32,
    sections: Vec<SectionMap>,
}

impl PeImage {
    /// Memory-maps and parses a PE file from disk.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] for I/O failures and
    /// [`crate::Error::GoblinErr`] when the PE headers do not parse.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        // Safety: the map is read once into an owned buffer below; no code
        // observes it across external file modifications.
        let mmap = unsafe { Mmap::map(&file) }?;
        Self::from_bytes(mmap.to_vec())
    }

    /// Parses a PE image from an in-memory byte buffer.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::GoblinErr`] when the PE headers do not parse.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let pe = PE::parse(&data)?;

        #[allow(clippy::cast_possible_truncation)] // 32-bit images only; high base bits are moot
        let image_base = pe.image_base as u32;
        let sections = pe
            .sections
            .iter()
            .map(|s| SectionMap {
                va: image_base.wrapping_add(s.virtual_address),
                vsize: s.virtual_size.max(s.size_of_raw_data),
                raw_offset: s.pointer_to_raw_data as usize,
                raw_size: s.size_of_raw_data as usize,
            })
            .collect();

        Ok(PeImage {
            data,
            image_base,
            sections,
        })
    }

    /// The configured image base VA.
    #[must_use]
    pub fn image_base(&self) -> u32 {
        self.image_base
    }
}

impl LoadedImage for PeImage {
    fn va_to_file_offset(&self, va: u32) -> Option<usize> {
        for section in &self.sections {
            let offset = va.wrapping_sub(section.va);
            if offset < section.vsize {
                let offset = offset as usize;
                // Addresses in the zero-padded tail of a section have no
                // file bytes behind them.
                if offset < section.raw_size {
                    return Some(section.raw_offset + offset);
                }
                return None;
            }
        }
        None
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}
