//! Single-owner guard for the data directory.
//!
//! The daemon and the offline commands both replay and append to the same
//! journals, so only one process may have the directory open. Ownership is an
//! advisory `flock` on `reunify.lock`; the file also records the owner's pid so
//! a refused start can say who is in the way. Closing the file drops the lock.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, Write};
use std::path::Path;

const LOCK_FILE_NAME: &str = "reunify.lock";

pub struct DataDirLock {
    _file: File,
}

impl DataDirLock {
    /// Take ownership of `data_dir` without waiting; `WouldBlock` if another
    /// process already owns it.
    pub fn acquire(data_dir: &Path) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(data_dir.join(LOCK_FILE_NAME))?;

        if let Err(err) = flock_exclusive(&file) {
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(err);
            }
            let mut owner = String::new();
            file.read_to_string(&mut owner)?;
            let owner = owner.trim();
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                format!(
                    "{} is in use by process {}",
                    data_dir.display(),
                    if owner.is_empty() { "<unknown>" } else { owner }
                ),
            ));
        }

        file.set_len(0)?;
        file.rewind()?;
        writeln!(file, "{}", std::process::id())?;

        Ok(Self { _file: file })
    }
}

#[cfg(unix)]
fn flock_exclusive(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor is owned by `file` and stays open for the call
    if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } == 0 {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::EWOULDBLOCK || code == libc::EAGAIN => {
            Err(io::Error::from(io::ErrorKind::WouldBlock))
        }
        _ => Err(err),
    }
}

#[cfg(not(unix))]
fn flock_exclusive(_file: &File) -> io::Result<()> {
    Ok(())
}
