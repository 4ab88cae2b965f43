use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::decoder::SoundingSource;
use super::error::DecodeError;
use super::sounding::RawSounding;

/// A plain text sounding file.
///
/// One sounding per line: `lat lon depth [heading [beam]]`, separated by whitespace or
/// commas. Blank lines and lines starting with `#` are ignored.
#[derive(Debug)]
pub struct XyzFile {
    reader: BufReader<File>,
    size_bytes: u64,
    line_number: u64,
    buffer: Vec<u8>,
}

impl XyzFile {
    pub fn new(path: &Path) -> Result<Self, DecodeError> {
        if !path.exists() {
            return Err(DecodeError::BadFilePath(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let size_bytes = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            size_bytes,
            line_number: 0,
            buffer: Vec::new(),
        })
    }

    fn parse_line(line: &str, line_number: u64) -> Result<RawSounding, DecodeError> {
        let malformed = |reason: String| DecodeError::Malformed {
            record: line_number,
            reason,
        };
        let fields: Vec<&str> = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|f| !f.is_empty())
            .collect();
        if fields.len() < 3 || fields.len() > 5 {
            return Err(malformed(format!(
                "expected 3 to 5 fields, found {}",
                fields.len()
            )));
        }
        let mut values = [0.0f64; 5];
        for (value, field) in values.iter_mut().zip(fields.iter()) {
            *value = field
                .parse()
                .map_err(|_| malformed(format!("could not parse {field:?} as a number")))?;
        }
        if !values.iter().all(|v| v.is_finite()) {
            return Err(malformed(String::from("non-finite value")));
        }

        let mut sounding = RawSounding::new(values[0], values[1], values[2]);
        if fields.len() >= 4 {
            sounding.heading = Some(values[3]);
        }
        if fields.len() == 5 {
            sounding.beam_number = values[4] as i32;
        }
        Ok(sounding)
    }
}

impl SoundingSource for XyzFile {
    fn next_record(&mut self) -> Result<Option<RawSounding>, DecodeError> {
        loop {
            self.buffer.clear();
            if self.reader.read_until(b'\n', &mut self.buffer)? == 0 {
                return Ok(None);
            }
            self.line_number += 1;
            // A garbled line is one bad record, not the end of the file
            let line = std::str::from_utf8(&self.buffer)
                .map_err(|e| DecodeError::Malformed {
                    record: self.line_number,
                    reason: format!("line is not valid UTF-8: {e}"),
                })?
                .trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            return Self::parse_line(line, self.line_number).map(Some);
        }
    }

    fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}
