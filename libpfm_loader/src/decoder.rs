use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::Path;

use super::error::DecodeError;
use super::llz_file::LlzFile;
use super::sounding::RawSounding;
use super::xyz_file::XyzFile;

/// A decoded survey file: a lazy, finite, non-restartable sequence of soundings.
pub trait SoundingSource: Send {
    /// Get the next sounding in the file
    ///
    /// Returns `Ok(None)` at end of file. A skippable error (see
    /// [`DecodeError::is_skippable`]) leaves the source positioned at the next record; any
    /// other error ends the file.
    fn next_record(&mut self) -> Result<Option<RawSounding>, DecodeError>;

    /// Size of the underlying file in bytes, for progress and logging
    fn size_bytes(&self) -> u64;
}

/// The input formats the loader knows how to decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormatTag {
    AsciiXyz,
    Llz,
}

impl FormatTag {
    /// Pick a format by file extension. `.llz.txt` exports are plain text.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_lowercase();
        match ext.as_str() {
            "xyz" | "yxz" | "txt" => Some(Self::AsciiXyz),
            "llz" => Some(Self::Llz),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AsciiXyz => "ASCII",
            Self::Llz => "LLZ",
        }
    }

    /// Open a file with the decoder for this format
    pub fn open(&self, path: &Path) -> Result<Box<dyn SoundingSource>, DecodeError> {
        if !path.exists() {
            return Err(DecodeError::BadFilePath(path.to_path_buf()));
        }
        Ok(match self {
            Self::AsciiXyz => Box::new(XyzFile::new(path)?),
            Self::Llz => Box::new(LlzFile::new(path)?),
        })
    }
}

impl Display for FormatTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_from_path() {
        assert_eq!(
            FormatTag::from_path(&PathBuf::from("/a/line_001.XYZ")),
            Some(FormatTag::AsciiXyz)
        );
        assert_eq!(
            FormatTag::from_path(&PathBuf::from("b.llz")),
            Some(FormatTag::Llz)
        );
        assert_eq!(
            FormatTag::from_path(&PathBuf::from("nav.llz.txt")),
            Some(FormatTag::AsciiXyz)
        );
        assert_eq!(FormatTag::from_path(&PathBuf::from("c.gsf")), None);
        assert_eq!(FormatTag::from_path(&PathBuf::from("d.csv")), None);
        assert_eq!(FormatTag::from_path(&PathBuf::from("noext")), None);
    }

    #[test]
    fn test_open_missing() {
        let res = FormatTag::Llz.open(&PathBuf::from("/definitely/not/here.llz"));
        assert!(matches!(res, Err(DecodeError::BadFilePath(_))));
    }
}
