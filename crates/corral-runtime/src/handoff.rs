//! One-shot command handoff between the orchestrator and container-init.
//!
//! The orchestrator parses the user command but cannot run code inside
//! the new namespaces, so it ships the command over an anonymous pipe
//! whose read end container-init inherits at [`HANDOFF_FD`]. The message
//! is the tokens joined by single spaces; closing the write end marks the
//! end of the message. Container-init reads until end-of-stream, so it can
//! never start the payload before the orchestrator finished writing.

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use nix::fcntl::OFlag;

use corral_common::constants::HANDOFF_FD;
use corral_common::error::{CorralError, Result};

/// Creates a handoff pipe. Both ends are close-on-exec.
///
/// # Errors
///
/// Returns a handoff failure if `pipe2(2)` fails.
pub fn channel() -> Result<(HandoffReader, HandoffWriter)> {
    let (read, write) = nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(|e| {
        CorralError::HandoffFailure {
            source: std::io::Error::from(e),
        }
    })?;
    Ok((
        HandoffReader {
            file: File::from(read),
        },
        HandoffWriter {
            file: File::from(write),
        },
    ))
}

/// Joins command tokens into a handoff message.
#[must_use]
pub fn encode_command(command: &[String]) -> String {
    command.join(" ")
}

/// Splits a handoff message back into command tokens.
#[must_use]
pub fn decode_command(message: &str) -> Vec<String> {
    message.split_whitespace().map(str::to_owned).collect()
}

/// Orchestrator side of the handoff pipe.
#[derive(Debug)]
pub struct HandoffWriter {
    file: File,
}

impl HandoffWriter {
    /// Writes the command and closes the pipe, consuming the writer.
    ///
    /// # Errors
    ///
    /// Returns a usage error for an empty command, and a handoff failure
    /// if the write or the close fails (for example because
    /// container-init already exited).
    pub fn send(mut self, command: &[String]) -> Result<()> {
        if command.is_empty() {
            return Err(CorralError::usage("container command is empty"));
        }
        let message = encode_command(command);
        tracing::debug!(command = %message, "sending init command");
        self.file
            .write_all(message.as_bytes())
            .map_err(|source| CorralError::HandoffFailure { source })?;

        let fd = self.file.into_raw_fd();
        // SAFETY: `fd` was just released from the `File`, so this is the
        // only owner and it is closed exactly once.
        if unsafe { libc::close(fd) } == -1 {
            return Err(CorralError::HandoffFailure {
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

impl From<OwnedFd> for HandoffWriter {
    /// Wraps an already open descriptor as the write end.
    fn from(fd: OwnedFd) -> Self {
        Self {
            file: File::from(fd),
        }
    }
}

/// Container-init side of the handoff pipe.
#[derive(Debug)]
pub struct HandoffReader {
    file: File,
}

impl HandoffReader {
    /// Takes ownership of the read end container-init inherited at
    /// [`HANDOFF_FD`].
    ///
    /// # Errors
    ///
    /// Returns a handoff failure if the descriptor is not open.
    pub fn inherited() -> Result<Self> {
        // SAFETY: F_GETFD only inspects the descriptor table.
        if unsafe { libc::fcntl(HANDOFF_FD, libc::F_GETFD) } == -1 {
            return Err(CorralError::HandoffFailure {
                source: std::io::Error::last_os_error(),
            });
        }
        // SAFETY: the process factory placed the pipe's read end at
        // HANDOFF_FD before exec and nothing else in this process owns it.
        let file = unsafe { File::from_raw_fd(HANDOFF_FD) };
        Ok(Self { file })
    }

    /// Blocks until the writer closes, then returns the command tokens.
    ///
    /// # Errors
    ///
    /// Returns a handoff failure if reading fails or the message is empty.
    pub fn receive(mut self) -> Result<Vec<String>> {
        let mut message = String::new();
        let _ = self
            .file
            .read_to_string(&mut message)
            .map_err(|source| CorralError::HandoffFailure { source })?;
        let command = decode_command(&message);
        if command.is_empty() {
            return Err(CorralError::HandoffFailure {
                source: std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "orchestrator closed the pipe without a command",
                ),
            });
        }
        Ok(command)
    }

    /// Returns the raw descriptor so the process factory can move it into
    /// the child's [`HANDOFF_FD`] slot.
    #[must_use]
    pub fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl From<HandoffReader> for OwnedFd {
    fn from(reader: HandoffReader) -> Self {
        reader.file.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| (*w).to_string()).collect()
    }

    #[test]
    fn message_round_trips_through_pipe() {
        let (reader, writer) = channel().expect("pipe");
        let command = tokens(&["ls", "-l", "/tmp"]);
        writer.send(&command).expect("send");
        assert_eq!(reader.receive().expect("receive"), command);
    }

    #[test]
    fn reader_blocks_until_writer_closes() {
        let (reader, writer) = channel().expect("pipe");
        let handle = std::thread::spawn(move || reader.receive());
        std::thread::sleep(std::time::Duration::from_millis(100));
        assert!(!handle.is_finished(), "reader must wait for end-of-stream");

        writer.send(&tokens(&["sleep", "1"])).expect("send");
        let received = handle.join().expect("join").expect("receive");
        assert_eq!(received, tokens(&["sleep", "1"]));
    }

    #[test]
    fn empty_command_is_rejected_before_writing() {
        let (_reader, writer) = channel().expect("pipe");
        let err = writer.send(&[]).expect_err("empty command");
        assert!(matches!(err, CorralError::Usage { .. }));
    }

    #[test]
    fn writer_dropped_without_message_is_a_failure() {
        let (reader, writer) = channel().expect("pipe");
        drop(writer);
        let err = reader.receive().expect_err("no message");
        assert!(matches!(err, CorralError::HandoffFailure { .. }));
    }

    #[test]
    fn send_to_exited_reader_reports_failure() {
        let (reader, writer) = channel().expect("pipe");
        drop(reader);
        let err = writer.send(&tokens(&["true"])).expect_err("broken pipe");
        assert!(matches!(err, CorralError::HandoffFailure { .. }));
    }

    #[test]
    fn unwritable_descriptor_reports_failure() {
        let read_only = File::open("/dev/null").expect("open");
        let writer = HandoffWriter::from(OwnedFd::from(read_only));
        let err = writer.send(&tokens(&["true"])).expect_err("read-only descriptor");
        assert!(matches!(err, CorralError::HandoffFailure { .. }));
    }

    #[test]
    fn decode_splits_on_any_whitespace() {
        assert_eq!(decode_command("  echo   hi\n"), tokens(&["echo", "hi"]));
        assert_eq!(encode_command(&tokens(&["echo", "hi"])), "echo hi");
    }
}
