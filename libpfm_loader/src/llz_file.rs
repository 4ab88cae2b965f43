use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Cursor, Read, Write};
use std::path::Path;

use super::constants::{LLZ_MAGIC, LLZ_STATUS_INVALID, LLZ_STATUS_NULL, LLZ_VERSION, MANUALLY_INVALID};
use super::decoder::SoundingSource;
use super::error::DecodeError;
use super::sounding::RawSounding;

/// sec(8) + nsec(4) + lat(8) + lon(8) + depth(4) + status(2)
const LLZ_RECORD_SIZE: usize = 34;

/// One record of an LLZ file
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LlzRecord {
    pub seconds: i64,
    pub nanoseconds: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub depth: f32,
    pub status: u16,
}

/// A binary lat/lon/depth file.
///
/// Little-endian throughout: a `LLZ1` magic and u32 version, followed by fixed size
/// records of `i64 seconds, u32 nanoseconds, f64 lat, f64 lon, f32 depth, u16 status`.
#[derive(Debug)]
pub struct LlzFile {
    reader: BufReader<File>,
    size_bytes: u64,
    record_number: u64,
    buffer: [u8; LLZ_RECORD_SIZE],
}

impl LlzFile {
    pub fn new(path: &Path) -> Result<Self, DecodeError> {
        if !path.exists() {
            return Err(DecodeError::BadFilePath(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let size_bytes = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != LLZ_MAGIC {
            return Err(DecodeError::BadHeader(format!(
                "bad magic {magic:?} in {path:?}"
            )));
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version != LLZ_VERSION {
            return Err(DecodeError::BadHeader(format!(
                "unsupported LLZ version {version}"
            )));
        }

        Ok(Self {
            reader,
            size_bytes,
            record_number: 0,
            buffer: [0u8; LLZ_RECORD_SIZE],
        })
    }

    fn parse_record(&self) -> Result<LlzRecord, std::io::Error> {
        let mut cursor = Cursor::new(&self.buffer[..]);
        Ok(LlzRecord {
            seconds: cursor.read_i64::<LittleEndian>()?,
            nanoseconds: cursor.read_u32::<LittleEndian>()?,
            latitude: cursor.read_f64::<LittleEndian>()?,
            longitude: cursor.read_f64::<LittleEndian>()?,
            depth: cursor.read_f32::<LittleEndian>()?,
            status: cursor.read_u16::<LittleEndian>()?,
        })
    }
}

impl SoundingSource for LlzFile {
    fn next_record(&mut self) -> Result<Option<RawSounding>, DecodeError> {
        if self.reader.fill_buf()?.is_empty() {
            return Ok(None);
        }
        // A truncated trailing record is an IO error and ends the file
        self.reader.read_exact(&mut self.buffer)?;
        self.record_number += 1;

        let record = self.parse_record()?;
        if !record.latitude.is_finite()
            || !record.longitude.is_finite()
            || !record.depth.is_finite()
        {
            return Err(DecodeError::Malformed {
                record: self.record_number,
                reason: String::from("non-finite position or depth"),
            });
        }

        let mut sounding = RawSounding::new(record.latitude, record.longitude, record.depth as f64);
        sounding.timestamp = (record.seconds, record.nanoseconds);
        if record.status & LLZ_STATUS_INVALID != 0 {
            sounding.flags |= MANUALLY_INVALID;
        }
        sounding.null_placeholder = record.status & LLZ_STATUS_NULL != 0;
        Ok(Some(sounding))
    }

    fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

/// Write a complete LLZ file
pub fn write_llz_file(path: &Path, records: &[LlzRecord]) -> Result<(), std::io::Error> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(LLZ_MAGIC)?;
    writer.write_u32::<LittleEndian>(LLZ_VERSION)?;
    for record in records {
        writer.write_i64::<LittleEndian>(record.seconds)?;
        writer.write_u32::<LittleEndian>(record.nanoseconds)?;
        writer.write_f64::<LittleEndian>(record.latitude)?;
        writer.write_f64::<LittleEndian>(record.longitude)?;
        writer.write_f32::<LittleEndian>(record.depth)?;
        writer.write_u16::<LittleEndian>(record.status)?;
    }
    writer.flush()
}
