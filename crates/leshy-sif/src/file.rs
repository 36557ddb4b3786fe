//! SIF file handling.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::{Result, SifContainer};

/// A SIF file mapped into memory.
///
/// The map stays alive for as long as parsed containers borrow from it,
/// so parsing is exposed as a method rather than done eagerly.
#[derive(Debug)]
pub struct SifFile {
    path: PathBuf,
    mmap: Mmap,
}

impl SifFile {
    /// Open and memory-map a SIF file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        // Read-only map; the decoder never writes through it.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            path: path.to_path_buf(),
            mmap,
        })
    }

    /// The path this file was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The raw mapped bytes.
    pub fn data(&self) -> &[u8] {
        &self.mmap
    }

    /// Parse the mapped bytes as a SIF container.
    pub fn parse(&self) -> Result<SifContainer<'_>> {
        SifContainer::parse(&self.mmap)
    }
}
