//! Container log access.
//!
//! Detached containers write stdout and stderr to a single file owned by
//! the registry. Reading never creates it.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use corral_common::error::{CorralError, Result};

/// Interval between polls while following a log.
pub const FOLLOW_POLL: Duration = Duration::from_millis(200);

/// Reads a container log.
///
/// Returns an empty string if the log file does not exist yet.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn read_logs(path: &Path) -> Result<String> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(io_error(path, e)),
    }
}

/// Copies a log to `out`, then keeps copying appended output while
/// `running` reports the container alive.
///
/// Output written between the last poll and the container's exit is still
/// delivered.
///
/// # Errors
///
/// Returns an error if the log cannot be read or `out` cannot be written.
pub fn follow_logs(
    path: &Path,
    out: &mut dyn Write,
    mut running: impl FnMut() -> bool,
    poll: Duration,
) -> Result<()> {
    let mut file = match File::open(path) {
        Ok(file) => Some(file),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(io_error(path, e)),
    };
    let mut buf = [0u8; 8192];
    loop {
        let alive = running();
        if file.is_none() {
            file = File::open(path).ok();
        }
        if let Some(f) = file.as_mut() {
            loop {
                let n = f.read(&mut buf).map_err(|e| io_error(path, e))?;
                if n == 0 {
                    break;
                }
                out.write_all(&buf[..n]).map_err(|e| io_error(path, e))?;
            }
            out.flush().map_err(|e| io_error(path, e))?;
        }
        if !alive {
            return Ok(());
        }
        std::thread::sleep(poll);
    }
}

fn io_error(path: &Path, source: std::io::Error) -> CorralError {
    CorralError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn missing_log_reads_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(read_logs(&dir.path().join("container.log")).expect("read").is_empty());
    }

    #[test]
    fn reads_existing_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("container.log");
        std::fs::write(&path, "hello\nworld\n").expect("write");
        assert_eq!(read_logs(&path).expect("read"), "hello\nworld\n");
    }

    #[test]
    fn follow_delivers_output_appended_while_running() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("container.log");
        std::fs::write(&path, "first\n").expect("write");

        let polls = Cell::new(0);
        let mut out = Vec::new();
        follow_logs(
            &path,
            &mut out,
            || {
                polls.set(polls.get() + 1);
                if polls.get() == 2 {
                    let mut f = File::options().append(true).open(&path).expect("open");
                    f.write_all(b"second\n").expect("append");
                }
                polls.get() < 3
            },
            Duration::from_millis(1),
        )
        .expect("follow");
        assert_eq!(String::from_utf8(out).expect("utf8"), "first\nsecond\n");
    }

    #[test]
    fn follow_of_stopped_container_returns_current_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("container.log");
        std::fs::write(&path, "done\n").expect("write");
        let mut out = Vec::new();
        follow_logs(&path, &mut out, || false, FOLLOW_POLL).expect("follow");
        assert_eq!(out, b"done\n");
    }
}
