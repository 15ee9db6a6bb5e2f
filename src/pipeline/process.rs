//! Child process output streaming for shell hooks

use crate::error::{KeelError, KeelResult};
use std::collections::VecDeque;
use std::process::ExitStatus;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Number of trailing output lines attached to a failed hook's error
const ERROR_TAIL_LINES: usize = 50;

/// Which pipe a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stream {
    Stdout,
    Stderr,
}

/// What a finished child printed
#[derive(Debug)]
pub(crate) struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: Vec<String>,
    /// Last lines of both pipes, interleaved in arrival order
    pub tail: VecDeque<String>,
}

impl CapturedOutput {
    /// Last lines of combined output for error reporting
    pub fn error_tail(&self) -> String {
        self.tail.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

fn push_tail(tail: &mut VecDeque<String>, line: String) {
    if tail.len() == ERROR_TAIL_LINES {
        tail.pop_front();
    }
    tail.push_back(line);
}

/// Decode one raw line, dropping the terminator
///
/// Hook output is not guaranteed to be UTF-8; invalid bytes are replaced.
fn decode_line(buf: &[u8]) -> String {
    let line = buf.strip_suffix(b"\n").unwrap_or(buf);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

/// Spawn `command` with piped output, calling `on_line` for every line
/// from either pipe, and wait for it to exit
///
/// Both pipes are drained until EOF so a chatty child never blocks on a
/// full pipe.
pub(crate) async fn run_streaming(
    command: &mut Command,
    label: &str,
    on_line: &(dyn Fn(Stream, &str) + Send + Sync),
) -> KeelResult<CapturedOutput> {
    command
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| KeelError::command_failed(label, e))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| KeelError::Internal(format!("{label}: stdout was not piped")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| KeelError::Internal(format!("{label}: stderr was not piped")))?;

    let mut stdout_reader = BufReader::new(stdout);
    let mut stderr_reader = BufReader::new(stderr);
    // read_until keeps partial data in the buffer when select! drops it,
    // so a buffer is only cleared once its line has been handled
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();

    let mut captured_stdout = Vec::new();
    let mut tail = VecDeque::with_capacity(ERROR_TAIL_LINES);
    let mut stdout_done = false;
    let mut stderr_done = false;

    while !stdout_done || !stderr_done {
        let (stream, read) = tokio::select! {
            read = stdout_reader.read_until(b'\n', &mut stdout_buf), if !stdout_done => {
                (Stream::Stdout, read)
            }
            read = stderr_reader.read_until(b'\n', &mut stderr_buf), if !stderr_done => {
                (Stream::Stderr, read)
            }
        };

        let read = read.map_err(|e| KeelError::io(format!("{label}: reading output"), e))?;
        let (buf, done) = match stream {
            Stream::Stdout => (&mut stdout_buf, &mut stdout_done),
            Stream::Stderr => (&mut stderr_buf, &mut stderr_done),
        };
        if read == 0 {
            *done = true;
            if buf.is_empty() {
                continue;
            }
        }

        let line = decode_line(buf);
        buf.clear();
        on_line(stream, &line);
        if stream == Stream::Stdout {
            captured_stdout.push(line.clone());
        }
        push_tail(&mut tail, line);
    }

    let status = child
        .wait()
        .await
        .map_err(|e| KeelError::command_failed(label, e))?;

    Ok(CapturedOutput {
        status,
        stdout: captured_stdout,
        tail,
    })
}
