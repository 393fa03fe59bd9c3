//! Append-only float32 row scratch file.
//!
//! Rows arrive in chunk order during classification but must be quantised in
//! time order, so the pre-quantisation pass spills them to a scratch file
//! that the quantisation pass reads back by row index through a memory map.
//! The scratch file never outlives its band: it is removed on seal and on
//! rollback.

use crate::error::AppError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Scratch file in its append phase.
pub struct ScratchFile {
    path: PathBuf,
    writer: BufWriter<File>,
    n_freqs: usize,
    n_rows: usize,
}

impl ScratchFile {
    /// Create a scratch file for rows of `n_freqs` float32 samples.
    pub fn create(path: PathBuf, n_freqs: usize) -> Result<Self, AppError> {
        let file = File::create(&path).map_err(|e| AppError::IoError {
            message: format!("failed to create scratch '{}': {}", path.display(), e),
        })?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            n_freqs,
            n_rows: 0,
        })
    }

    /// Append one row; returns the row's scratch index.
    pub fn append_row(&mut self, row: &[f32]) -> Result<usize, AppError> {
        debug_assert_eq!(row.len(), self.n_freqs);

        for &v in row {
            self.writer.write_f32::<LittleEndian>(v)?;
        }
        let index = self.n_rows;
        self.n_rows += 1;
        Ok(index)
    }

    /// Number of rows appended so far.
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Finish the append phase and memory-map the file for random access.
    pub fn into_reader(mut self) -> Result<ScratchReader, AppError> {
        self.writer.flush()?;
        drop(self.writer);

        let file = File::open(&self.path)?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| AppError::IoError {
            message: format!("failed to memory-map scratch '{}': {}", self.path.display(), e),
        })?;

        let expected = self.n_rows * self.n_freqs * 4;
        if mmap.len() != expected {
            return Err(AppError::IoError {
                message: format!(
                    "scratch '{}' is {} bytes, expected {}",
                    self.path.display(),
                    mmap.len(),
                    expected
                ),
            });
        }

        Ok(ScratchReader {
            path: self.path,
            mmap,
            _file: file,
            n_freqs: self.n_freqs,
            n_rows: self.n_rows,
        })
    }

    /// Drop the scratch file without reading it back (rollback path).
    pub fn remove(self) -> std::io::Result<()> {
        drop(self.writer);
        std::fs::remove_file(&self.path)
    }
}

/// Scratch file in its read-back phase.
pub struct ScratchReader {
    path: PathBuf,
    mmap: Mmap,
    // Keep the file handle alive for the mmap lifetime (notably on Windows).
    _file: File,
    n_freqs: usize,
    n_rows: usize,
}

impl ScratchReader {
    /// Decode row `index` into `out`.
    pub fn read_row(&self, index: usize, out: &mut [f32]) -> Result<(), AppError> {
        if index >= self.n_rows {
            return Err(AppError::ValidationError {
                message: format!("scratch row {} out of range (total {})", index, self.n_rows),
            });
        }
        debug_assert_eq!(out.len(), self.n_freqs);

        let row_bytes = self.n_freqs * 4;
        let start = index * row_bytes;
        let mut cursor = std::io::Cursor::new(&self.mmap[start..start + row_bytes]);
        cursor.read_f32_into::<LittleEndian>(out)?;
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Delete the scratch file (success path, after the final store exists).
    pub fn remove(self) -> std::io::Result<()> {
        let path = self.path.clone();
        drop(self);
        std::fs::remove_file(path)
    }
}
