//! Append-only JSON-lines journal.
//!
//! Each entry is one line of JSON terminated by `\n`, written with a single
//! `write_all`. On open the whole file is replayed:
//! - an unterminated final line is a torn write and is truncated away
//! - a terminated line that does not parse is corruption and fails the open
//!
//! `rewrite` replaces the content atomically (temp file -> fsync -> rename),
//! which is how repositories compact their history.
//!
//! A failed append is cut back off the file before the error is returned, so
//! a later successful append never lands behind half a record.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("{path}: line {line} is corrupt: {reason}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("journal lock poisoned")]
    Poisoned,
}

/// Append handle shared by the journals and the vector log.
///
/// If a write or sync fails, the file is truncated back to the length it had
/// before the record. If even that fails the handle is wedged and refuses
/// every further append until the file is reopened.
pub struct AppendFile {
    file: File,
    wedged: bool,
}

impl AppendFile {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            file: OpenOptions::new().create(true).append(true).open(path)?,
            wedged: false,
        })
    }

    pub fn append(&mut self, record: &[u8], sync: bool) -> std::io::Result<()> {
        self.append_with(record, sync, |file, record| file.write_all(record))
    }

    /// Drop everything written so far.
    pub fn truncate(&mut self) -> std::io::Result<()> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        self.wedged = false;
        Ok(())
    }

    pub(crate) fn append_with<W>(&mut self, record: &[u8], sync: bool, write: W) -> std::io::Result<()>
    where
        W: FnOnce(&mut File, &[u8]) -> std::io::Result<()>,
    {
        if self.wedged {
            return Err(std::io::Error::other(
                "an earlier append could not be rolled back; refusing further appends",
            ));
        }

        let start = self.file.metadata()?.len();
        let result = write(&mut self.file, record).and_then(|()| {
            if sync {
                self.file.sync_data()
            } else {
                Ok(())
            }
        });

        if let Err(err) = result {
            if let Err(rollback) = self.file.set_len(start) {
                log::error!("Failed to cut partial record back to {start} bytes: {rollback}");
                self.wedged = true;
            }
            return Err(err);
        }

        Ok(())
    }
}

pub struct Journal<E> {
    path: PathBuf,
    file: Mutex<AppendFile>,
    sync_writes: bool,
    _entry: PhantomData<fn(E)>,
}

impl<E> Journal<E>
where
    E: Serialize + DeserializeOwned,
{
    /// Open the journal at `path`, creating it if needed, and return every
    /// entry recorded so far in write order.
    pub fn open(path: PathBuf, sync_writes: bool) -> Result<(Self, Vec<E>), JournalError> {
        let entries = if path.exists() {
            Self::replay(&path)?
        } else {
            Vec::new()
        };

        let file = AppendFile::open(&path)?;

        Ok((
            Self {
                path,
                file: Mutex::new(file),
                sync_writes,
                _entry: PhantomData,
            },
            entries,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &E) -> Result<(), JournalError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut file = self.file.lock().map_err(|_| JournalError::Poisoned)?;
        file.append(&line, self.sync_writes)?;

        Ok(())
    }

    /// Replace the whole journal with `entries`.
    pub fn rewrite<I>(&self, entries: I) -> Result<(), JournalError>
    where
        I: IntoIterator,
        I::Item: Serialize,
    {
        let mut file = self.file.lock().map_err(|_| JournalError::Poisoned)?;
        let temp_path = self.path.with_extension("tmp");

        let result = Self::write_entries(&temp_path, entries);
        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, &self.path)?;
        *file = AppendFile::open(&self.path)?;

        Ok(())
    }

    fn write_entries<I>(path: &Path, entries: I) -> Result<(), JournalError>
    where
        I: IntoIterator,
        I::Item: Serialize,
    {
        let mut writer = BufWriter::new(File::create(path)?);
        for entry in entries {
            serde_json::to_writer(&mut writer, &entry)?;
            writer.write_all(b"\n")?;
        }

        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        file.sync_all()?;

        Ok(())
    }

    fn replay(path: &Path) -> Result<Vec<E>, JournalError> {
        let data = std::fs::read(path)?;
        let mut entries = Vec::new();
        let mut offset = 0usize;
        let mut line_no = 0usize;

        while offset < data.len() {
            line_no += 1;
            let rest = &data[offset..];

            let Some(end) = rest.iter().position(|b| *b == b'\n') else {
                log::warn!(
                    "{}: dropping torn trailing entry ({} bytes)",
                    path.display(),
                    rest.len()
                );
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(offset as u64)?;
                file.sync_all()?;
                break;
            };

            let line = &rest[..end];
            if !line.iter().all(u8::is_ascii_whitespace) {
                let entry = serde_json::from_slice(line).map_err(|e| JournalError::Corrupt {
                    path: path.to_path_buf(),
                    line: line_no,
                    reason: e.to_string(),
                })?;
                entries.push(entry);
            }

            offset += end + 1;
        }

        Ok(entries)
    }
}
