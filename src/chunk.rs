//! Capture chunk decoding.
//!
//! The wire format of rotated capture chunks is owned by the capture side;
//! the engine only requires a [`ChunkDecoder`] collaborator that turns a
//! chunk file into a lazy stream of [`TraceRecord`]s. [`RawChunkDecoder`]
//! implements the raw little-endian layout used by the batch command and the
//! test suite.

use crate::error::AppError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

/// Magic bytes at the start of every raw chunk file.
pub const CHUNK_MAGIC: [u8; 4] = *b"RFCH";

/// Raw chunk layout version understood by this decoder.
pub const CHUNK_VERSION: u16 = 1;

/// Upper bound on the per-record frequency count.
///
/// A length above this cannot be trusted to keep the stream in sync, so it is
/// treated as stream corruption rather than a skippable record.
const MAX_RECORD_FREQS: usize = 1 << 22;

/// One decoded spectrum trace: a timestamped sweep across a frequency axis.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceRecord {
    /// Unix timestamp in seconds, microsecond-precise.
    pub timestamp: f64,
    /// Frequency axis in hertz, strictly increasing.
    pub freqs_hz: Vec<f64>,
    /// Power per frequency bin, in dB.
    pub power_db: Vec<f32>,
}

impl TraceRecord {
    /// First frequency of the axis in hertz.
    pub fn f_start(&self) -> f64 {
        self.freqs_hz.first().copied().unwrap_or(0.0)
    }

    /// Last frequency of the axis in hertz.
    pub fn f_stop(&self) -> f64 {
        self.freqs_hz.last().copied().unwrap_or(0.0)
    }

    /// Check the structural invariants a record must satisfy to be usable.
    pub fn validate(&self) -> Result<(), String> {
        if self.freqs_hz.is_empty() {
            return Err("empty frequency axis".to_string());
        }
        if self.freqs_hz.len() != self.power_db.len() {
            return Err(format!(
                "axis/power length mismatch ({} vs {})",
                self.freqs_hz.len(),
                self.power_db.len()
            ));
        }
        if !self.timestamp.is_finite() {
            return Err("non-finite timestamp".to_string());
        }
        for pair in self.freqs_hz.windows(2) {
            if !(pair[1] > pair[0]) {
                return Err("frequency axis is not strictly increasing".to_string());
            }
        }
        if self.freqs_hz.iter().any(|f| !f.is_finite()) {
            return Err("non-finite frequency value".to_string());
        }
        if self.power_db.iter().any(|p| !p.is_finite()) {
            return Err("non-finite power value".to_string());
        }
        Ok(())
    }
}

/// Decode failures, split by blast radius.
///
/// A `Record` failure skips one record and leaves the stream usable; a
/// `Stream` failure poisons the rest of the chunk.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Single-record decode failure; the record is skipped and counted.
    #[error("record decode failed: {message}")]
    Record { message: String },

    /// Stream-level failure; no further records can be trusted.
    #[error("chunk stream failed: {message}")]
    Stream { message: String },
}

/// Lazy record stream produced by a decoder.
pub type RecordStream = Box<dyn Iterator<Item = Result<TraceRecord, DecodeError>>>;

/// External collaborator interface: turns chunk files into record streams.
///
/// Records must be yielded in file order. Implementations may fail per-record
/// (the driver skips and counts) or fatally (the driver surfaces the error).
pub trait ChunkDecoder {
    /// Open a chunk file and return its lazy record stream.
    fn open(&self, path: &Path) -> Result<RecordStream, AppError>;
}

/// Decoder for the raw little-endian chunk layout.
///
/// A chunk is a 6-byte preamble (magic + version) followed by records, each
/// encoded as `f64 timestamp, u32 n_freqs, n_freqs × f64 axis,
/// n_freqs × f32 power`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawChunkDecoder;

impl ChunkDecoder for RawChunkDecoder {
    fn open(&self, path: &Path) -> Result<RecordStream, AppError> {
        let file = File::open(path).map_err(|e| AppError::DecodeFatal {
            message: format!("failed to open chunk '{}': {}", path.display(), e),
        })?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|e| AppError::DecodeFatal {
                message: format!("failed to read chunk preamble '{}': {}", path.display(), e),
            })?;
        if magic != CHUNK_MAGIC {
            return Err(AppError::DecodeFatal {
                message: format!("'{}' is not a raw capture chunk", path.display()),
            });
        }

        let version = reader
            .read_u16::<LittleEndian>()
            .map_err(|e| AppError::DecodeFatal {
                message: format!("failed to read chunk version '{}': {}", path.display(), e),
            })?;
        if version != CHUNK_VERSION {
            return Err(AppError::DecodeFatal {
                message: format!(
                    "unsupported chunk version {} in '{}' (expected {})",
                    version,
                    path.display(),
                    CHUNK_VERSION
                ),
            });
        }

        Ok(Box::new(RawChunkStream {
            reader,
            done: false,
        }))
    }
}

/// Streaming record iterator over an opened raw chunk.
struct RawChunkStream {
    reader: BufReader<File>,
    done: bool,
}

impl RawChunkStream {
    /// Read the next record, or `None` at a clean end of stream.
    fn next_record(&mut self) -> Option<Result<TraceRecord, DecodeError>> {
        let timestamp = match read_f64_or_eof(&mut self.reader) {
            Ok(Some(ts)) => ts,
            Ok(None) => return None,
            Err(e) => return Some(Err(stream_error("timestamp", e))),
        };

        let n_freqs = match self.reader.read_u32::<LittleEndian>() {
            Ok(n) => n as usize,
            Err(e) => return Some(Err(stream_error("frequency count", e))),
        };
        if n_freqs == 0 || n_freqs > MAX_RECORD_FREQS {
            return Some(Err(DecodeError::Stream {
                message: format!("implausible frequency count {}", n_freqs),
            }));
        }

        let mut freqs_hz = vec![0f64; n_freqs];
        if let Err(e) = self.reader.read_f64_into::<LittleEndian>(&mut freqs_hz) {
            return Some(Err(stream_error("frequency axis", e)));
        }

        let mut power_db = vec![0f32; n_freqs];
        if let Err(e) = self.reader.read_f32_into::<LittleEndian>(&mut power_db) {
            return Some(Err(stream_error("power samples", e)));
        }

        let record = TraceRecord {
            timestamp,
            freqs_hz,
            power_db,
        };

        // The record was fully consumed, so a validation failure here only
        // costs this record, not the stream.
        if let Err(message) = record.validate() {
            return Some(Err(DecodeError::Record { message }));
        }

        Some(Ok(record))
    }
}

impl Iterator for RawChunkStream {
    type Item = Result<TraceRecord, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let item = self.next_record();
        if matches!(item, Some(Err(DecodeError::Stream { .. })) | None) {
            self.done = true;
        }
        item
    }
}

fn stream_error(what: &str, err: std::io::Error) -> DecodeError {
    DecodeError::Stream {
        message: format!("failed to read {}: {}", what, err),
    }
}

/// Read a little-endian f64, distinguishing clean EOF from truncation.
fn read_f64_or_eof<R: Read>(reader: &mut R) -> std::io::Result<Option<f64>> {
    let mut buf = [0u8; 8];
    let mut filled = 0;

    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "truncated record",
            ));
        }
        filled += n;
    }

    Ok(Some(f64::from_le_bytes(buf)))
}

/// Write records as a raw chunk file.
///
/// Used by capture-side tooling and the test suite; the layout matches what
/// [`RawChunkDecoder`] reads back.
pub fn write_chunk(path: &Path, records: &[TraceRecord]) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    writer.write_all(&CHUNK_MAGIC)?;
    writer.write_u16::<LittleEndian>(CHUNK_VERSION)?;

    for record in records {
        writer.write_f64::<LittleEndian>(record.timestamp)?;
        writer.write_u32::<LittleEndian>(record.freqs_hz.len() as u32)?;
        for &f in &record.freqs_hz {
            writer.write_f64::<LittleEndian>(f)?;
        }
        for &p in &record.power_db {
            writer.write_f32::<LittleEndian>(p)?;
        }
    }

    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_record(timestamp: f64) -> TraceRecord {
        let freqs_hz: Vec<f64> = (0..8).map(|i| 100e6 + i as f64 * 1e3).collect();
        let power_db: Vec<f32> = (0..8).map(|i| -90.0 + i as f32).collect();
        TraceRecord {
            timestamp,
            freqs_hz,
            power_db,
        }
    }

    #[test]
    fn test_chunk_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunk0.rfch");
        let records = vec![test_record(0.0), test_record(1.5)];

        write_chunk(&path, &records).unwrap();

        let decoded: Vec<TraceRecord> = RawChunkDecoder
            .open(&path)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(decoded, records);
    }

    #[test]
    fn test_bad_magic_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_a_chunk.bin");
        std::fs::write(&path, b"PNG\0garbage").unwrap();

        match RawChunkDecoder.open(&path) {
            Err(AppError::DecodeFatal { .. }) => {}
            other => panic!("expected DecodeFatal, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_truncated_record_poisons_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunk0.rfch");
        write_chunk(&path, &[test_record(0.0), test_record(1.0)]).unwrap();

        // Chop the tail off the second record.
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 7]).unwrap();

        let mut stream = RawChunkDecoder.open(&path).unwrap();
        assert!(stream.next().unwrap().is_ok());
        match stream.next() {
            Some(Err(DecodeError::Stream { .. })) => {}
            other => panic!("expected stream error, got {:?}", other),
        }
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_invalid_axis_is_record_skip() {
        let mut record = test_record(0.0);
        record.freqs_hz[3] = record.freqs_hz[2]; // not strictly increasing
        assert!(record.validate().is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunk0.rfch");
        write_chunk(&path, &[record, test_record(1.0)]).unwrap();

        let mut stream = RawChunkDecoder.open(&path).unwrap();
        match stream.next() {
            Some(Err(DecodeError::Record { .. })) => {}
            other => panic!("expected record error, got {:?}", other),
        }
        // The stream recovers on the following record.
        assert!(stream.next().unwrap().is_ok());
    }
}
