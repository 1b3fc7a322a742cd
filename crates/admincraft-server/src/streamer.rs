//! Output streamer: relays one log-tail subprocess into one session.
//!
//! [`attach`] starts the tail and spawns a pump task. The session reads
//! chunks from the returned [`OutputSubscription`] and owns the
//! [`StreamerHandle`]; cancelling the handle (explicitly or by dropping it)
//! signals the subprocess to terminate. Termination is fire-and-forget: the
//! pump never waits for the child after killing it.

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::process::{LogTail, ManagedProcess, ProcessError, TailHandle};

/// One unit of tail output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputChunk {
    /// Bytes from the tail's standard output.
    Stdout(Bytes),
    /// Bytes from the tail's standard error.
    Stderr(Bytes),
    /// The tail process exited on its own. No more chunks follow.
    Exited(Option<i32>),
}

/// Receiving side of a streamer. Yields chunks in production order.
pub struct OutputSubscription {
    rx: mpsc::Receiver<OutputChunk>,
}

impl OutputSubscription {
    /// Next chunk, or `None` once the streamer has stopped.
    pub async fn next(&mut self) -> Option<OutputChunk> {
        self.rx.recv().await
    }
}

/// Turns tail output into text across arbitrary chunk boundaries.
///
/// A multi-byte character split between two chunks is held back until the
/// rest of it arrives. Bytes that can never form valid UTF-8 become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    partial: Vec<u8>,
}

impl Utf8Decoder {
    /// Decode `bytes`, returning everything that forms complete characters.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.partial.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.partial.len());
        loop {
            match std::str::from_utf8(&self.partial) {
                Ok(text) => {
                    out.push_str(text);
                    self.partial.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.partial[..valid]));
                    match e.error_len() {
                        Some(invalid) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            let _ = self.partial.drain(..valid + invalid);
                        }
                        None => {
                            // Incomplete sequence at the end: wait for more.
                            let _ = self.partial.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Flush whatever is still held back, lossily. `None` if nothing is.
    pub fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        Some(rest)
    }
}

/// Controls the lifetime of a streamer's subprocess.
#[derive(Debug)]
pub struct StreamerHandle {
    cancel: CancellationToken,
}

impl StreamerHandle {
    /// Signal the tail subprocess to terminate. Repeated calls are no-ops.
    pub fn terminate(&self) {
        self.cancel.cancel();
    }

    /// Whether termination has been requested.
    pub fn is_terminated(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for StreamerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Start tailing `process` and relay its output through a channel of depth `buffer`.
///
/// Must be called from within a Tokio runtime.
pub fn attach(
    process: &dyn ManagedProcess,
    buffer: usize,
) -> Result<(StreamerHandle, OutputSubscription), ProcessError> {
    let tail = process.tail_logs()?;
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let cancel = CancellationToken::new();
    drop(tokio::spawn(pump(tail, tx, cancel.clone())));
    Ok((StreamerHandle { cancel }, OutputSubscription { rx }))
}

async fn pump(tail: LogTail, tx: mpsc::Sender<OutputChunk>, cancel: CancellationToken) {
    let LogTail {
        mut stdout,
        mut stderr,
        mut handle,
    } = tail;
    let mut stdout_open = true;
    let mut stderr_open = true;

    while stdout_open || stderr_open {
        let chunk = tokio::select! {
            () = cancel.cancelled() => {
                kill(handle.as_mut());
                return;
            }
            item = stdout.next(), if stdout_open => match item {
                Some(Ok(bytes)) => OutputChunk::Stdout(bytes),
                Some(Err(e)) => {
                    warn!(error = %e, "tail stdout read failed");
                    stdout_open = false;
                    continue;
                }
                None => {
                    stdout_open = false;
                    continue;
                }
            },
            item = stderr.next(), if stderr_open => match item {
                Some(Ok(bytes)) => OutputChunk::Stderr(bytes),
                Some(Err(e)) => {
                    warn!(error = %e, "tail stderr read failed");
                    stderr_open = false;
                    continue;
                }
                None => {
                    stderr_open = false;
                    continue;
                }
            },
        };

        let delivered = tokio::select! {
            () = cancel.cancelled() => false,
            sent = tx.send(chunk) => sent.is_ok(),
        };
        if !delivered {
            kill(handle.as_mut());
            return;
        }
    }

    let status = tokio::select! {
        () = cancel.cancelled() => None,
        status = handle.wait() => Some(status),
    };
    let Some(status) = status else {
        kill(handle.as_mut());
        return;
    };

    let exit_code = match status {
        Ok(code) => code,
        Err(e) => {
            warn!(error = %e, "failed to wait on log tail");
            None
        }
    };
    info!(exit_code = ?exit_code, "log tail exited");
    let _ = tx.send(OutputChunk::Exited(exit_code)).await;
}

fn kill(handle: &mut dyn TailHandle) {
    match handle.start_kill() {
        Ok(()) => debug!("log tail terminated"),
        Err(e) => warn!(error = %e, "failed to terminate log tail"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::process::mock::MockProcess;

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn drain(sub: &mut OutputSubscription) -> Vec<OutputChunk> {
        let mut out = Vec::new();
        while let Some(chunk) = tokio::time::timeout(TIMEOUT, sub.next()).await.unwrap() {
            out.push(chunk);
        }
        out
    }

    #[tokio::test]
    async fn forwards_stdout_in_order() {
        let mut process = MockProcess::new();
        process.stdout = vec!["one\n", "two\n", "three\n"];
        process.exit_code = Some(0);

        let (_handle, mut sub) = attach(&process, 8).unwrap();
        let chunks = drain(&mut sub).await;
        assert_eq!(
            chunks,
            vec![
                OutputChunk::Stdout(Bytes::from_static(b"one\n")),
                OutputChunk::Stdout(Bytes::from_static(b"two\n")),
                OutputChunk::Stdout(Bytes::from_static(b"three\n")),
                OutputChunk::Exited(Some(0)),
            ]
        );
    }

    #[tokio::test]
    async fn stderr_is_tagged() {
        let mut process = MockProcess::new();
        process.stderr = vec!["boom"];
        process.exit_code = Some(1);

        let (_handle, mut sub) = attach(&process, 8).unwrap();
        let chunks = drain(&mut sub).await;
        assert_eq!(chunks[0], OutputChunk::Stderr(Bytes::from_static(b"boom")));
        assert_eq!(chunks.last(), Some(&OutputChunk::Exited(Some(1))));
    }

    #[tokio::test]
    async fn natural_exit_does_not_kill() {
        let mut process = MockProcess::new();
        process.exit_code = Some(0);

        let (handle, mut sub) = attach(&process, 8).unwrap();
        let _ = drain(&mut sub).await;
        drop(handle);
        assert_eq!(process.kill_count(), 0);
    }

    #[tokio::test]
    async fn terminate_kills_once() {
        let mut process = MockProcess::new();
        process.stdout = vec!["line\n"];

        let (handle, mut sub) = attach(&process, 8).unwrap();
        let first = tokio::time::timeout(TIMEOUT, sub.next()).await.unwrap();
        assert_eq!(first, Some(OutputChunk::Stdout(Bytes::from_static(b"line\n"))));

        handle.terminate();
        handle.terminate();
        assert!(handle.is_terminated());

        let rest = drain(&mut sub).await;
        assert!(rest.is_empty());
        assert_eq!(process.kill_count(), 1);
    }

    #[tokio::test]
    async fn dropping_handle_kills() {
        let process = MockProcess::new();
        let (handle, mut sub) = attach(&process, 8).unwrap();
        drop(handle);
        let _ = drain(&mut sub).await;
        assert_eq!(process.kill_count(), 1);
    }

    #[tokio::test]
    async fn zero_buffer_is_clamped() {
        let mut process = MockProcess::new();
        process.stdout = vec!["x"];
        process.exit_code = Some(0);
        let (_handle, mut sub) = attach(&process, 0).unwrap();
        assert_eq!(drain(&mut sub).await.len(), 2);
    }

    // ── decoder ─────────────────────────────────────────────────────

    #[test]
    fn decoder_joins_split_character() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"caf\xC3"), "caf");
        assert_eq!(decoder.decode(b"\xA9\n"), "\u{e9}\n");
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn decoder_holds_four_byte_character_across_three_chunks() {
        let mut decoder = Utf8Decoder::default();
        let crab = "\u{1F980}".as_bytes();
        assert_eq!(decoder.decode(&crab[..1]), "");
        assert_eq!(decoder.decode(&crab[1..3]), "");
        assert_eq!(decoder.decode(&crab[3..]), "\u{1F980}");
    }

    #[test]
    fn decoder_replaces_invalid_bytes_and_keeps_going() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"a\xFFb"), "a\u{FFFD}b");
        assert_eq!(decoder.decode(b"c"), "c");
    }

    #[test]
    fn decoder_flushes_dangling_bytes_lossily() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"end\xE2\x82"), "end");
        assert_eq!(decoder.finish().as_deref(), Some("\u{FFFD}"));
        assert_eq!(decoder.finish(), None);
    }
}
