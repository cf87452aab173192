//! Line splitting for child process output.

use std::collections::VecDeque;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

/// Lines kept for error reporting.
const TAIL_LINES: usize = 20;

/// Forward every line of `reader` to `tx` and return the last few lines.
///
/// Both `\n` and `\r` end a line, since progress bars redraw with carriage
/// returns. Reading continues after the receiver is gone so the child never
/// blocks on a full pipe.
pub(crate) async fn forward_lines<R>(mut reader: R, tx: mpsc::Sender<String>) -> VecDeque<String>
where
    R: AsyncRead + Unpin,
{
    let mut tail = VecDeque::with_capacity(TAIL_LINES);
    let mut pending = Vec::with_capacity(256);
    let mut chunk = [0u8; 4096];
    let mut receiver_open = true;

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for &byte in &chunk[..n] {
            if byte == b'\n' || byte == b'\r' {
                emit(&mut pending, &mut tail, &tx, &mut receiver_open).await;
            } else {
                pending.push(byte);
            }
        }
    }
    emit(&mut pending, &mut tail, &tx, &mut receiver_open).await;
    tail
}

async fn emit(
    pending: &mut Vec<u8>,
    tail: &mut VecDeque<String>,
    tx: &mpsc::Sender<String>,
    receiver_open: &mut bool,
) {
    if pending.is_empty() {
        return;
    }
    let line = String::from_utf8_lossy(pending).trim_end().to_string();
    pending.clear();
    if line.is_empty() {
        return;
    }
    if tail.len() == TAIL_LINES {
        tail.pop_front();
    }
    tail.push_back(line.clone());
    if *receiver_open && tx.send(line).await.is_err() {
        *receiver_open = false;
    }
}
