//! Prompt IDs and the crash-persistent ID allocator.
//!
//! IDs are never reused, even across restarts: the most recently issued ID
//! is written back to a small file before it is handed out, so a restarted
//! process continues from where the previous one stopped.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::debug;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{PromptError, PromptResult};

/// Size of the on-disk counter.
const MAX_ID_FILE_LEN: u64 = 8;

/// Unique, monotonically increasing prompt identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PromptId(pub u64);

impl fmt::Display for PromptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

impl FromStr for PromptId {
    type Err = PromptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 16 {
            return Err(PromptError::InvalidPromptId(s.to_string()));
        }
        u64::from_str_radix(s, 16)
            .map(PromptId)
            .map_err(|_| PromptError::InvalidPromptId(s.to_string()))
    }
}

impl Serialize for PromptId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PromptId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Source of persistent prompt IDs.
///
/// The registry only calls these methods while holding its exclusive lock,
/// so implementations need no synchronisation of their own.
pub trait IdAllocator: Send + Sync {
    /// Issue the next ID, strictly greater than every ID issued before.
    fn next_id(&mut self) -> PromptResult<PromptId>;

    /// Release the underlying storage. Fails with [`PromptError::Closed`] if
    /// already closed.
    fn close(&mut self) -> PromptResult<()>;

    /// Whether [`IdAllocator::close`] has completed successfully.
    fn is_closed(&self) -> bool;
}

/// File-backed allocator storing the last issued ID as 8 little-endian bytes.
pub struct MaxIdFile {
    path: PathBuf,
    file: Option<File>,
    current: u64,
}

impl MaxIdFile {
    /// Open the max ID file at `path`, creating it if necessary.
    ///
    /// A file of the wrong length is treated as corrupt and reset to zero.
    pub fn open(path: impl AsRef<Path>) -> PromptResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PromptError::storage(
                    format!("cannot create directory {}", parent.display()),
                    e,
                )
            })?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                PromptError::storage(format!("cannot open max ID file {}", path.display()), e)
            })?;

        let len = file
            .metadata()
            .map_err(|e| PromptError::storage("cannot stat max ID file", e))?
            .len();

        let current = if len == MAX_ID_FILE_LEN {
            let mut buf = [0u8; 8];
            file.read_exact(&mut buf)
                .map_err(|e| PromptError::storage("cannot read max ID file", e))?;
            u64::from_le_bytes(buf)
        } else {
            debug!(
                "max ID file {} has length {}, resetting",
                path.display(),
                len
            );
            file.set_len(0)
                .map_err(|e| PromptError::storage("cannot truncate max ID file", e))?;
            write_counter(&mut file, 0)?;
            0
        };

        Ok(Self {
            path,
            file: Some(file),
            current,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The most recently issued ID, or zero if none has been issued.
    pub fn current(&self) -> u64 {
        self.current
    }
}

impl IdAllocator for MaxIdFile {
    fn next_id(&mut self) -> PromptResult<PromptId> {
        let file = self.file.as_mut().ok_or(PromptError::Closed)?;
        let next = self.current + 1;
        write_counter(file, next)?;
        self.current = next;
        Ok(PromptId(next))
    }

    fn close(&mut self) -> PromptResult<()> {
        let file = self.file.as_ref().ok_or(PromptError::Closed)?;
        file.sync_all()
            .map_err(|e| PromptError::storage("cannot sync max ID file", e))?;
        self.file = None;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.file.is_none()
    }
}

fn write_counter(file: &mut File, value: u64) -> PromptResult<()> {
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.write_all(&value.to_le_bytes()))
        .map_err(|e| PromptError::storage("cannot write max ID file", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_prompt_id_format() {
        assert_eq!(PromptId(1).to_string(), "0000000000000001");
        assert_eq!(PromptId(0xABC).to_string(), "0000000000000ABC");
        assert_eq!("0000000000000ABC".parse::<PromptId>().unwrap(), PromptId(0xABC));
        assert!("ABC".parse::<PromptId>().is_err());
        assert!("000000000000000G".parse::<PromptId>().is_err());
    }

    #[test]
    fn test_prompt_id_serde() {
        let json = serde_json::to_string(&PromptId(42)).unwrap();
        assert_eq!(json, "\"000000000000002A\"");
        let parsed: PromptId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, PromptId(42));
    }

    #[test]
    fn test_ids_increase_and_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run").join("max-id");

        let mut ids = MaxIdFile::open(&path).unwrap();
        assert_eq!(ids.next_id().unwrap(), PromptId(1));
        assert_eq!(ids.next_id().unwrap(), PromptId(2));
        assert_eq!(ids.next_id().unwrap(), PromptId(3));
        ids.close().unwrap();

        let mut reopened = MaxIdFile::open(&path).unwrap();
        assert_eq!(reopened.current(), 3);
        assert_eq!(reopened.next_id().unwrap(), PromptId(4));
    }

    #[test]
    fn test_corrupt_file_is_reset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("max-id");
        std::fs::write(&path, b"junk").unwrap();

        let mut ids = MaxIdFile::open(&path).unwrap();
        assert_eq!(ids.current(), 0);
        assert_eq!(ids.next_id().unwrap(), PromptId(1));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), MAX_ID_FILE_LEN);
    }

    #[test]
    fn test_closed_allocator() {
        let dir = TempDir::new().unwrap();
        let mut ids = MaxIdFile::open(dir.path().join("max-id")).unwrap();
        assert!(!ids.is_closed());
        ids.close().unwrap();
        assert!(ids.is_closed());
        assert!(matches!(ids.next_id(), Err(PromptError::Closed)));
        assert!(matches!(ids.close(), Err(PromptError::Closed)));
    }
}
